use std::sync::Arc;
use std::time::Duration;

use sqlx::{SqlitePool, sqlite::SqlitePoolOptions};
use thiserror::Error;

use crate::repository::{
    ProgressRepository, QuizRepository, Storage, UserRepository, VideoRepository,
};

mod mapping;
mod migrate;
mod progress_repo;
mod quiz_repo;
mod user_repo;
mod video_repo;

const MAX_CONNECTIONS: u32 = 5;
const ACQUIRE_TIMEOUT: Duration = Duration::from_secs(5);

/// One store for the catalog, users and progress documents.
#[derive(Clone)]
pub struct SqliteRepository {
    pool: SqlitePool,
}

#[derive(Debug, Error)]
#[non_exhaustive]
pub enum SqliteInitError {
    #[error(transparent)]
    Sqlx(#[from] sqlx::Error),
}

/// A private in-memory database lives and dies with its connection, so the
/// pool must never open a second one.
fn is_private_memory(database_url: &str) -> bool {
    database_url == "sqlite::memory:" || database_url == "sqlite://:memory:"
}

impl SqliteRepository {
    /// Open a pool with foreign keys enforced on every connection.
    ///
    /// Progress rows cascade from users and quizzes cascade from videos, so
    /// a connection without `foreign_keys = ON` would leave orphans behind.
    ///
    /// # Errors
    ///
    /// Returns `SqliteInitError` if the database cannot be opened or a
    /// connection PRAGMA fails.
    pub async fn connect(database_url: &str) -> Result<Self, SqliteInitError> {
        let max_connections = if is_private_memory(database_url) {
            1
        } else {
            MAX_CONNECTIONS
        };

        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections)
            .acquire_timeout(ACQUIRE_TIMEOUT)
            .after_connect(|conn, _meta| {
                Box::pin(async move {
                    for pragma in [
                        "PRAGMA foreign_keys = ON;",
                        "PRAGMA journal_mode = WAL;",
                        // versioned progress writes from several processes wait instead of failing
                        "PRAGMA busy_timeout = 5000;",
                    ] {
                        sqlx::query(pragma).execute(&mut *conn).await?;
                    }
                    Ok(())
                })
            })
            .connect(database_url)
            .await?;
        Ok(Self { pool })
    }

    #[must_use]
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Bring the schema up to date. Safe to call on every start.
    ///
    /// # Errors
    ///
    /// Returns `SqliteInitError` if a migration statement fails.
    pub async fn migrate(&self) -> Result<(), SqliteInitError> {
        migrate::run_migrations(&self.pool).await
    }
}

impl Storage {
    /// Connect, migrate, and hand out the same pool behind every repository
    /// trait.
    ///
    /// # Errors
    ///
    /// Returns `SqliteInitError` if connecting or migrating fails.
    pub async fn sqlite(database_url: &str) -> Result<Self, SqliteInitError> {
        let repo = SqliteRepository::connect(database_url).await?;
        repo.migrate().await?;
        Ok(Self {
            videos: Arc::new(repo.clone()) as Arc<dyn VideoRepository>,
            quizzes: Arc::new(repo.clone()) as Arc<dyn QuizRepository>,
            progress: Arc::new(repo.clone()) as Arc<dyn ProgressRepository>,
            users: Arc::new(repo) as Arc<dyn UserRepository>,
        })
    }
}
