//! Repository database operations

use sqlx::SqlitePool;

use super::models::RepositoryRow;
use super::{users, StoreError};
use crate::domain::names::owner_repo;
use crate::domain::{HostRepository, Repository, User};

const SELECT_REPOSITORY: &str =
    "SELECT id, name, owner_id, disabled, private, auto_created, host_json FROM repositories";

impl RepositoryRow {
    pub fn to_repository(&self, owner: Option<User>) -> Result<Repository, StoreError> {
        Ok(Repository {
            id: self.id,
            name: self.name.clone(),
            owner,
            disabled: self.disabled != 0,
            private: self.private != 0,
            auto_created: self.auto_created != 0,
            host: serde_json::from_str(&self.host_json)?,
        })
    }
}

async fn load(pool: &SqlitePool, row: RepositoryRow) -> Result<Repository, StoreError> {
    let owner = match row.owner_id {
        Some(id) => users::get_user_by_id(pool, id).await?,
        None => None,
    };
    row.to_repository(owner)
}

/// Get a repository by its `owner/name`
pub async fn get_repository(pool: &SqlitePool, name: &str) -> Result<Repository, StoreError> {
    let row = sqlx::query_as::<_, RepositoryRow>(&format!("{} WHERE name = ?", SELECT_REPOSITORY))
        .bind(name)
        .fetch_optional(pool)
        .await?
        .ok_or_else(|| StoreError::NotFound(format!("repository {:?}", name)))?;

    load(pool, row).await
}

pub async fn get_repository_by_id(pool: &SqlitePool, id: i64) -> Result<Repository, StoreError> {
    let row = sqlx::query_as::<_, RepositoryRow>(&format!("{} WHERE id = ?", SELECT_REPOSITORY))
        .bind(id)
        .fetch_optional(pool)
        .await?
        .ok_or_else(|| StoreError::NotFound(format!("repository id {}", id)))?;

    load(pool, row).await
}

/// Insert host repositories that are not yet known, owned by `owner`
pub async fn put_repositories(
    pool: &SqlitePool,
    owner: &str,
    repos: &[HostRepository],
    auto_created: bool,
) -> Result<(), StoreError> {
    let owner = users::get_user(pool, owner).await?;

    for host in repos {
        owner_repo(&host.full_name).map_err(|e| StoreError::Invalid(e.to_string()))?;

        let exists: Option<(i64,)> = sqlx::query_as("SELECT id FROM repositories WHERE name = ?")
            .bind(&host.full_name)
            .fetch_optional(pool)
            .await?;
        if exists.is_some() {
            continue;
        }

        let repo = Repository::from_host(host, Some(owner.clone()), auto_created);

        sqlx::query(
            r#"
            INSERT INTO repositories (name, owner_id, disabled, private, auto_created, host_json)
            VALUES (?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&repo.name)
        .bind(owner.id)
        .bind(repo.disabled as i32)
        .bind(repo.private as i32)
        .bind(repo.auto_created as i32)
        .bind(serde_json::to_string(&repo.host)?)
        .execute(pool)
        .await
        .map_err(|e| StoreError::from_insert(e, format!("repository {:?}", repo.name)))?;
    }

    Ok(())
}

/// Assign an owner and enable the repository, creating it if needed
pub async fn enable_repository(
    pool: &SqlitePool,
    host: &HostRepository,
    owner: &str,
) -> Result<Repository, StoreError> {
    match put_repositories(pool, owner, std::slice::from_ref(host), false).await {
        Ok(()) | Err(StoreError::AlreadyExists(_)) => {}
        Err(e) => return Err(e),
    }

    let owner = users::get_user(pool, owner).await?;

    sqlx::query("UPDATE repositories SET owner_id = ?, disabled = 0, host_json = ? WHERE name = ?")
        .bind(owner.id)
        .bind(serde_json::to_string(host)?)
        .bind(&host.full_name)
        .execute(pool)
        .await?;

    get_repository(pool, &host.full_name).await
}
