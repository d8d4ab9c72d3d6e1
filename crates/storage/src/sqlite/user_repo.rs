use course_core::model::{User, UserId};

use super::SqliteRepository;
use super::mapping::{db_err, map_user_row, user_id_from_str};
use crate::repository::{StorageError, UserRepository};

#[async_trait::async_trait]
impl UserRepository for SqliteRepository {
    async fn insert_user(&self, user: &User) -> Result<(), StorageError> {
        sqlx::query(
            r"
            INSERT INTO users (id, email, display_name, role, created_at)
            VALUES (?1, ?2, ?3, ?4, ?5)
            ",
        )
        .bind(user.id().to_string())
        .bind(user.email().to_owned())
        .bind(user.display_name().map(ToOwned::to_owned))
        .bind(user.role().as_str())
        .bind(user.created_at())
        .execute(&self.pool)
        .await
        .map_err(db_err)?;
        Ok(())
    }

    async fn get_user(&self, id: UserId) -> Result<Option<User>, StorageError> {
        let row = sqlx::query(
            "SELECT id, email, display_name, role, created_at FROM users WHERE id = ?1",
        )
        .bind(id.to_string())
        .fetch_optional(&self.pool)
        .await
        .map_err(db_err)?;

        row.as_ref().map(map_user_row).transpose()
    }

    async fn find_user_by_email(&self, email: &str) -> Result<Option<User>, StorageError> {
        let row = sqlx::query(
            "SELECT id, email, display_name, role, created_at FROM users WHERE email = ?1",
        )
        .bind(email.trim().to_lowercase())
        .fetch_optional(&self.pool)
        .await
        .map_err(db_err)?;

        row.as_ref().map(map_user_row).transpose()
    }

    async fn delete_user(&self, id: UserId) -> Result<bool, StorageError> {
        // user_progress goes with it through ON DELETE CASCADE
        let res = sqlx::query("DELETE FROM users WHERE id = ?1")
            .bind(id.to_string())
            .execute(&self.pool)
            .await
            .map_err(db_err)?;
        Ok(res.rows_affected() > 0)
    }

    async fn list_user_ids(&self) -> Result<Vec<UserId>, StorageError> {
        let ids: Vec<String> = sqlx::query_scalar("SELECT id FROM users ORDER BY created_at, id")
            .fetch_all(&self.pool)
            .await
            .map_err(db_err)?;

        ids.iter().map(|raw| user_id_from_str(raw)).collect()
    }
}
