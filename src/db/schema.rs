//! Session table schema
//!
//! The table name is configurable, so the DDL is rendered at runtime. Every
//! statement is idempotent and the whole thing can run on each startup.
//! Callers that manage migrations themselves set `skip_create_table`.

use anyhow::{bail, Context, Result};

use super::DynDatabasePool;
use crate::config::{is_valid_table_name, DatabaseDriver};

/// DDL statements creating the session table and its expiry index
pub fn create_table_statements(driver: DatabaseDriver, table: &str) -> Vec<String> {
    match driver {
        DatabaseDriver::Sqlite => vec![
            format!(
                r#"
                CREATE TABLE IF NOT EXISTS {table} (
                    id VARCHAR(64) NOT NULL PRIMARY KEY,
                    data TEXT NOT NULL,
                    created_at TIMESTAMP NOT NULL,
                    updated_at TIMESTAMP NOT NULL,
                    expires_at TIMESTAMP NOT NULL
                )
                "#
            ),
            format!("CREATE INDEX IF NOT EXISTS idx_{table}_expires_at ON {table}(expires_at)"),
        ],
        // MySQL has no CREATE INDEX IF NOT EXISTS; the index lives in the table definition.
        DatabaseDriver::Mysql => vec![format!(
            r#"
            CREATE TABLE IF NOT EXISTS {table} (
                id VARCHAR(64) NOT NULL PRIMARY KEY,
                data MEDIUMTEXT NOT NULL,
                created_at DATETIME(6) NOT NULL,
                updated_at DATETIME(6) NOT NULL,
                expires_at DATETIME(6) NOT NULL,
                INDEX idx_{table}_expires_at (expires_at)
            )
            "#
        )],
    }
}

/// Create the session table if it does not exist yet.
pub async fn ensure_session_table(pool: &DynDatabasePool, table: &str) -> Result<()> {
    if !is_valid_table_name(table) {
        bail!("invalid session table name: {:?}", table);
    }

    for statement in create_table_statements(pool.driver(), table) {
        pool.execute(&statement)
            .await
            .with_context(|| format!("Failed to create session table '{}'", table))?;
    }

    tracing::debug!("Session table '{}' is ready", table);
    Ok(())
}
