use std::sync::Arc;

use tracing::{info, warn};

use course_core::model::{Role, User, UserId};
use course_core::time::Clock;
use storage::repository::{StorageError, UserRepository};

use crate::error::UserServiceError;

/// Outcome of the startup admin step.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AdminBootstrap {
    Created(User),
    /// The email was already registered; nothing was written.
    Existing(User),
}

impl AdminBootstrap {
    #[must_use]
    pub fn user(&self) -> &User {
        match self {
            AdminBootstrap::Created(user) | AdminBootstrap::Existing(user) => user,
        }
    }
}

/// The account slice the engine needs: identity, role and removal.
#[derive(Clone)]
pub struct UserService {
    clock: Clock,
    users: Arc<dyn UserRepository>,
}

impl UserService {
    #[must_use]
    pub fn new(clock: Clock, users: Arc<dyn UserRepository>) -> Self {
        Self { clock, users }
    }

    /// # Errors
    ///
    /// Returns `UserServiceError::User` for a blank email and
    /// `UserServiceError::EmailTaken` if it is already registered.
    pub async fn register(
        &self,
        email: &str,
        display_name: Option<String>,
        role: Role,
    ) -> Result<User, UserServiceError> {
        let user = User::new(UserId::random(), email, display_name, role, self.clock.now())?;
        if self.users.find_user_by_email(user.email()).await?.is_some() {
            return Err(UserServiceError::EmailTaken(user.email().to_owned()));
        }
        self.users.insert_user(&user).await.map_err(|e| match e {
            StorageError::Conflict => UserServiceError::EmailTaken(user.email().to_owned()),
            other => other.into(),
        })?;

        info!(user_id = %user.id(), role = role.as_str(), "user registered");
        Ok(user)
    }

    /// # Errors
    ///
    /// Returns `UserServiceError::NotFound` and storage errors.
    pub async fn get_user(&self, id: UserId) -> Result<User, UserServiceError> {
        self.users
            .get_user(id)
            .await?
            .ok_or(UserServiceError::NotFound(id))
    }

    /// # Errors
    ///
    /// Returns storage errors; an unknown email is `Ok(None)`.
    pub async fn find_by_email(&self, email: &str) -> Result<Option<User>, UserServiceError> {
        Ok(self.users.find_user_by_email(email).await?)
    }

    /// Remove a user; their progress record goes with them.
    ///
    /// # Errors
    ///
    /// Returns `UserServiceError::NotFound` and storage errors.
    pub async fn delete_user(&self, id: UserId) -> Result<(), UserServiceError> {
        if !self.users.delete_user(id).await? {
            return Err(UserServiceError::NotFound(id));
        }
        info!(user_id = %id, "user deleted");
        Ok(())
    }

    /// Ensure an admin account exists for `email`. Safe to call on every start.
    ///
    /// # Errors
    ///
    /// Returns `UserServiceError::User` for a blank email and storage errors.
    pub async fn bootstrap_admin(&self, email: &str) -> Result<AdminBootstrap, UserServiceError> {
        if let Some(existing) = self.users.find_user_by_email(email).await? {
            if !existing.is_admin() {
                warn!(
                    user_id = %existing.id(),
                    "bootstrap email belongs to a non-admin account; leaving it unchanged"
                );
            }
            return Ok(AdminBootstrap::Existing(existing));
        }

        match self.register(email, Some("Administrator".into()), Role::Admin).await {
            Ok(user) => Ok(AdminBootstrap::Created(user)),
            // another process bootstrapped concurrently
            Err(UserServiceError::EmailTaken(_)) => self
                .users
                .find_user_by_email(email)
                .await?
                .map(AdminBootstrap::Existing)
                .ok_or(UserServiceError::Storage(StorageError::NotFound)),
            Err(err) => Err(err),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use course_core::time::fixed_now;
    use storage::repository::InMemoryRepository;

    fn service() -> UserService {
        UserService::new(Clock::fixed(fixed_now()), Arc::new(InMemoryRepository::new()))
    }

    #[tokio::test]
    async fn bootstrap_is_idempotent() {
        let svc = service();
        let first = svc.bootstrap_admin("Admin@Example.com").await.unwrap();
        assert!(matches!(first, AdminBootstrap::Created(_)));
        assert!(first.user().is_admin());

        let second = svc.bootstrap_admin("admin@example.com").await.unwrap();
        assert_eq!(second, AdminBootstrap::Existing(first.user().clone()));
    }

    #[tokio::test]
    async fn duplicate_email_is_rejected() {
        let svc = service();
        svc.register("a@example.com", None, Role::Learner).await.unwrap();
        let err = svc
            .register(" A@EXAMPLE.com ", None, Role::Learner)
            .await
            .unwrap_err();
        assert!(matches!(err, UserServiceError::EmailTaken(_)));
    }

    #[tokio::test]
    async fn delete_unknown_user_is_not_found() {
        let svc = service();
        let err = svc.delete_user(UserId::random()).await.unwrap_err();
        assert!(matches!(err, UserServiceError::NotFound(_)));
    }
}
