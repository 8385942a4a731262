//! Database connection pool and schema setup

use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions};
use sqlx::SqlitePool;
use std::path::Path;
use std::str::FromStr;

const MIGRATIONS: &[(&str, &str)] = &[(
    "001_initial_schema",
    include_str!("../../migrations/001_initial_schema.sql"),
)];

/// Create a new SQLite connection pool
///
/// `sqlite::memory:` databases are per connection, so they get a pool of one.
pub async fn create_pool(database_path: &str) -> Result<SqlitePool, sqlx::Error> {
    let in_memory = database_path.contains(":memory:");

    if !in_memory {
        if let Some(parent) = Path::new(database_path).parent() {
            std::fs::create_dir_all(parent).ok();
        }
    }

    let url = if in_memory || database_path.starts_with("sqlite:") {
        database_path.to_string()
    } else {
        format!("sqlite://{}", database_path)
    };

    let mut options = SqliteConnectOptions::from_str(&url)?
        .create_if_missing(true)
        .foreign_keys(true);

    if !in_memory {
        options = options.journal_mode(SqliteJournalMode::Wal);
    }

    SqlitePoolOptions::new()
        .max_connections(if in_memory { 1 } else { 10 })
        .connect_with(options)
        .await
}

/// Apply the embedded schema; every statement is idempotent
pub async fn run_migrations(pool: &SqlitePool) -> Result<(), sqlx::Error> {
    for (name, sql) in MIGRATIONS {
        tracing::debug!(migration = name, "Applying migration");
        for stmt in split_statements(sql) {
            sqlx::query(&stmt).execute(pool).await?;
        }
    }

    Ok(())
}

/// Split a migration into statements, dropping comments and pragmas
fn split_statements(sql: &str) -> Vec<String> {
    let mut statements = Vec::new();
    let mut current = String::new();
    let mut in_string = false;

    for line in sql.lines() {
        let line = if in_string {
            line
        } else {
            line.split("--").next().unwrap_or("")
        };

        for c in line.chars() {
            match c {
                '\'' => {
                    in_string = !in_string;
                    current.push(c);
                }
                ';' if !in_string => {
                    push_statement(&mut statements, &current);
                    current.clear();
                }
                _ => current.push(c),
            }
        }
        current.push('\n');
    }

    push_statement(&mut statements, &current);
    statements
}

fn push_statement(statements: &mut Vec<String>, stmt: &str) {
    let stmt = stmt.trim();
    if !stmt.is_empty() && !stmt.to_ascii_uppercase().starts_with("PRAGMA") {
        statements.push(stmt.to_string());
    }
}

/// Initialize database - create pool and run migrations
pub async fn init_database(database_path: &str) -> Result<SqlitePool, sqlx::Error> {
    let pool = create_pool(database_path).await?;
    run_migrations(&pool).await?;
    Ok(pool)
}
