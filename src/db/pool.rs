//! Database connection pool and embedded migrations

use chrono::Utc;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions};
use sqlx::SqlitePool;
use std::path::Path;
use std::str::FromStr;

/// Embedded migrations, applied in order and recorded in `schema_migrations`
const MIGRATIONS: &[(i64, &str, &str)] = &[
    (
        1,
        "initial_schema",
        include_str!("../../migrations/001_initial_schema.sql"),
    ),
    (
        2,
        "one_live_trip",
        include_str!("../../migrations/002_one_live_trip.sql"),
    ),
];

fn is_memory(database_path: &str) -> bool {
    database_path.contains(":memory:") || database_path.contains("mode=memory")
}

/// Create a new SQLite connection pool
pub async fn create_pool(database_path: &str) -> Result<SqlitePool, sqlx::Error> {
    let memory = is_memory(database_path);

    if !memory {
        let file = database_path
            .trim_start_matches("sqlite://")
            .trim_start_matches("sqlite:");
        if let Some(parent) = Path::new(file).parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).ok();
            }
        }
    }

    let mut options = SqliteConnectOptions::from_str(database_path)?
        .create_if_missing(true)
        .foreign_keys(true);
    if !memory {
        options = options.journal_mode(SqliteJournalMode::Wal);
    }

    // Every connection to :memory: opens its own database
    let pool = if memory {
        SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect_with(options)
            .await?
    } else {
        SqlitePoolOptions::new()
            .max_connections(10)
            .connect_with(options)
            .await?
    };

    Ok(pool)
}

/// Apply every embedded migration not yet recorded
pub async fn run_migrations(pool: &SqlitePool) -> Result<(), sqlx::Error> {
    sqlx::query(
        "CREATE TABLE IF NOT EXISTS schema_migrations (version INTEGER PRIMARY KEY, name TEXT NOT NULL, applied_at TEXT NOT NULL)",
    )
    .execute(pool)
    .await?;

    for &(version, name, sql) in MIGRATIONS {
        let applied: Option<i64> =
            sqlx::query_scalar("SELECT version FROM schema_migrations WHERE version = ?")
                .bind(version)
                .fetch_optional(pool)
                .await?;
        if applied.is_some() {
            continue;
        }

        let mut tx = pool.begin().await?;
        for stmt in split_statements(sql) {
            sqlx::query(&stmt).execute(&mut *tx).await?;
        }
        sqlx::query("INSERT INTO schema_migrations (version, name, applied_at) VALUES (?, ?, ?)")
            .bind(version)
            .bind(name)
            .bind(Utc::now().to_rfc3339())
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;

        tracing::info!("Applied migration {:03}_{}", version, name);
    }

    Ok(())
}

/// Split a migration file into statements, dropping comments and pragmas
fn split_statements(sql: &str) -> Vec<String> {
    let mut statements = Vec::new();
    let mut current = String::new();
    let mut in_string = false;

    for line in sql.lines() {
        let line = match (in_string, line.find("--")) {
            (false, Some(idx)) => &line[..idx],
            _ => line,
        };

        for c in line.chars() {
            match c {
                '\'' => {
                    in_string = !in_string;
                    current.push(c);
                }
                ';' if !in_string => {
                    let stmt = current.trim();
                    if !stmt.is_empty() && !stmt.to_uppercase().starts_with("PRAGMA") {
                        statements.push(stmt.to_string());
                    }
                    current.clear();
                }
                _ => current.push(c),
            }
        }
        current.push('\n');
    }

    let stmt = current.trim();
    if !stmt.is_empty() && !stmt.to_uppercase().starts_with("PRAGMA") {
        statements.push(stmt.to_string());
    }

    statements
}

/// Initialize database - create pool and run migrations
pub async fn init_database(database_path: &str) -> Result<SqlitePool, sqlx::Error> {
    let pool = create_pool(database_path).await?;
    run_migrations(&pool).await?;
    Ok(pool)
}
