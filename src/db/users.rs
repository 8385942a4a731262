//! User database operations

use sqlx::SqlitePool;

use super::models::UserRow;
use super::StoreError;
use crate::domain::{OAuthToken, User};

impl UserRow {
    pub fn to_user(&self) -> User {
        User {
            id: self.id,
            username: self.username.clone(),
            token: self
                .token_json
                .as_deref()
                .and_then(|json| serde_json::from_str::<OAuthToken>(json).ok()),
        }
    }
}

pub async fn get_user(pool: &SqlitePool, username: &str) -> Result<User, StoreError> {
    let row = sqlx::query_as::<_, UserRow>(
        "SELECT id, username, token_json FROM users WHERE username = ?",
    )
    .bind(username)
    .fetch_optional(pool)
    .await?;

    row.map(|r| r.to_user())
        .ok_or_else(|| StoreError::NotFound(format!("user {:?}", username)))
}

pub async fn get_user_by_id(pool: &SqlitePool, id: i64) -> Result<Option<User>, StoreError> {
    let row = sqlx::query_as::<_, UserRow>("SELECT id, username, token_json FROM users WHERE id = ?")
        .bind(id)
        .fetch_optional(pool)
        .await?;

    Ok(row.map(|r| r.to_user()))
}

/// Create a user or replace the token of an existing one
pub async fn put_user(pool: &SqlitePool, user: &User) -> Result<User, StoreError> {
    let token_json = user.token.as_ref().map(serde_json::to_string).transpose()?;

    sqlx::query(
        r#"
        INSERT INTO users (username, token_json) VALUES (?, ?)
        ON CONFLICT(username) DO UPDATE SET token_json = excluded.token_json
        "#,
    )
    .bind(&user.username)
    .bind(&token_json)
    .execute(pool)
    .await?;

    get_user(pool, &user.username).await
}
