use std::sync::Arc;

use course_core::model::User;
use storage::repository::Storage;

use crate::Clock;
use crate::catalog_service::CatalogService;
use crate::config::EngineConfig;
use crate::error::AppServicesError;
use crate::progression_service::ProgressionService;
use crate::user_service::{AdminBootstrap, UserService};

/// Assembles app-facing services over one store and runs the admin bootstrap.
#[derive(Clone)]
pub struct AppServices {
    admin: User,
    progression: Arc<ProgressionService>,
    catalog: Arc<CatalogService>,
    users: Arc<UserService>,
}

impl AppServices {
    /// Build services backed by `SQLite` storage.
    ///
    /// # Errors
    ///
    /// Returns `AppServicesError` if storage initialization or the admin
    /// bootstrap fails.
    pub async fn new_sqlite(
        db_url: &str,
        clock: Clock,
        config: EngineConfig,
        admin_email: &str,
    ) -> Result<Self, AppServicesError> {
        let storage = Storage::sqlite(db_url).await?;
        Self::from_storage(&storage, clock, config, admin_email).await
    }

    /// # Errors
    ///
    /// Returns `AppServicesError` if the admin bootstrap fails.
    pub async fn from_storage(
        storage: &Storage,
        clock: Clock,
        config: EngineConfig,
        admin_email: &str,
    ) -> Result<Self, AppServicesError> {
        let users = Arc::new(UserService::new(clock, Arc::clone(&storage.users)));
        let admin = match users.bootstrap_admin(admin_email).await? {
            AdminBootstrap::Created(user) => {
                tracing::info!(email = user.email(), "created admin account");
                user
            }
            AdminBootstrap::Existing(user) => user,
        };

        Ok(Self {
            admin,
            progression: Arc::new(ProgressionService::from_storage(storage, clock, config)),
            catalog: Arc::new(CatalogService::from_storage(storage, clock)),
            users,
        })
    }

    #[must_use]
    pub fn admin(&self) -> &User {
        &self.admin
    }

    #[must_use]
    pub fn progression(&self) -> Arc<ProgressionService> {
        Arc::clone(&self.progression)
    }

    #[must_use]
    pub fn catalog(&self) -> Arc<CatalogService> {
        Arc::clone(&self.catalog)
    }

    #[must_use]
    pub fn users(&self) -> Arc<UserService> {
        Arc::clone(&self.users)
    }
}
