//! Ref database operations

use sqlx::SqlitePool;

use super::models::RefRow;
use super::{repositories, StoreError};
use crate::domain::{Ref, Repository};

impl RefRow {
    pub fn to_ref(&self, repository: Repository) -> Ref {
        Ref {
            id: self.id,
            repository,
            ref_name: self.ref_name.clone(),
            sha: self.sha.clone(),
        }
    }
}

pub async fn get_ref_by_name_and_sha(
    pool: &SqlitePool,
    repo_name: &str,
    sha: &str,
) -> Result<Ref, StoreError> {
    let row = sqlx::query_as::<_, RefRow>(
        r#"
        SELECT refs.id, refs.repository_id, refs.ref_name, refs.sha
        FROM refs
        INNER JOIN repositories ON repositories.id = refs.repository_id
        WHERE repositories.name = ? AND refs.sha = ?
        "#,
    )
    .bind(repo_name)
    .bind(sha)
    .fetch_optional(pool)
    .await?
    .ok_or_else(|| StoreError::NotFound(format!("ref {} in {:?}", sha, repo_name)))?;

    let repository = repositories::get_repository_by_id(pool, row.repository_id).await?;
    Ok(row.to_ref(repository))
}

pub async fn get_ref_by_id(pool: &SqlitePool, id: i64) -> Result<Ref, StoreError> {
    let row = sqlx::query_as::<_, RefRow>(
        "SELECT id, repository_id, ref_name, sha FROM refs WHERE id = ?",
    )
    .bind(id)
    .fetch_optional(pool)
    .await?
    .ok_or_else(|| StoreError::NotFound(format!("ref id {}", id)))?;

    let repository = repositories::get_repository_by_id(pool, row.repository_id).await?;
    Ok(row.to_ref(repository))
}

/// Insert a ref; refs are never updated once written
pub async fn put_ref(pool: &SqlitePool, git_ref: &Ref) -> Result<i64, StoreError> {
    if git_ref.repository.id == 0 {
        return Err(StoreError::Invalid("ref repository was not saved".to_string()));
    }

    let result = sqlx::query("INSERT INTO refs (repository_id, ref_name, sha) VALUES (?, ?, ?)")
        .bind(git_ref.repository.id)
        .bind(&git_ref.ref_name)
        .bind(&git_ref.sha)
        .execute(pool)
        .await
        .map_err(|e| {
            StoreError::from_insert(
                e,
                format!("ref {} in {:?}", git_ref.sha, git_ref.repository.name),
            )
        })?;

    Ok(result.last_insert_rowid())
}
