use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::model::ids::UserId;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum UserError {
    #[error("email cannot be empty")]
    EmptyEmail,

    #[error("invalid role: {0}")]
    InvalidRole(String),
}

/// What a user is allowed to bypass.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// Sees every video regardless of progress.
    Admin,
    Learner,
}

impl Role {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Role::Admin => "admin",
            Role::Learner => "learner",
        }
    }

    /// # Errors
    ///
    /// Returns `UserError::InvalidRole` for unknown names.
    pub fn parse(raw: &str) -> Result<Self, UserError> {
        match raw {
            "admin" => Ok(Role::Admin),
            "learner" => Ok(Role::Learner),
            other => Err(UserError::InvalidRole(other.to_owned())),
        }
    }
}

/// The slice of an account the progression engine cares about.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct User {
    id: UserId,
    email: String,
    display_name: Option<String>,
    role: Role,
    created_at: DateTime<Utc>,
}

impl User {
    /// # Errors
    ///
    /// Returns `UserError::EmptyEmail` for a blank email.
    pub fn new(
        id: UserId,
        email: impl Into<String>,
        display_name: Option<String>,
        role: Role,
        created_at: DateTime<Utc>,
    ) -> Result<Self, UserError> {
        let email = email.into().trim().to_lowercase();
        if email.is_empty() {
            return Err(UserError::EmptyEmail);
        }
        Ok(Self {
            id,
            email,
            display_name,
            role,
            created_at,
        })
    }

    #[must_use]
    pub fn id(&self) -> UserId {
        self.id
    }

    #[must_use]
    pub fn email(&self) -> &str {
        &self.email
    }

    #[must_use]
    pub fn display_name(&self) -> Option<&str> {
        self.display_name.as_deref()
    }

    #[must_use]
    pub fn role(&self) -> Role {
        self.role
    }

    #[must_use]
    pub fn is_admin(&self) -> bool {
        self.role == Role::Admin
    }

    #[must_use]
    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }
}
