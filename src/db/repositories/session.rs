//! Session repository
//!
//! Database operations for session rows.
//!
//! This module provides:
//! - `SessionRepository` trait defining the interface for session data access
//! - `SqlxSessionRepository` implementing the trait for SQLite and MySQL
//!
//! The table name is chosen at runtime, so queries are rendered with
//! `format!` after the name has been checked by `is_valid_table_name`.

use crate::config::{is_valid_table_name, DatabaseDriver};
use crate::db::pool::{mysql, sqlite};
use crate::db::DynDatabasePool;
use crate::models::SessionRecord;
use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{MySqlPool, Row, SqlitePool};

/// Session repository trait
#[async_trait]
pub trait SessionRepository: Send + Sync {
    /// Get a session that is still valid at `now`
    async fn find_valid(&self, id: &str, now: DateTime<Utc>) -> Result<Option<SessionRecord>>;

    /// Get a session by ID regardless of its expiry
    async fn get_by_id(&self, id: &str) -> Result<Option<SessionRecord>>;

    /// Insert a new session
    async fn create(&self, record: &SessionRecord) -> Result<()>;

    /// Insert or update a session
    async fn save(&self, record: &SessionRecord) -> Result<()>;

    /// Delete a session
    async fn delete(&self, id: &str) -> Result<()>;

    /// Delete sessions that expired at or before `now`, returning how many went
    async fn delete_expired(&self, now: DateTime<Utc>) -> Result<u64>;
}

/// SQLx-based session repository implementation
///
/// Supports both SQLite and MySQL databases.
pub struct SqlxSessionRepository {
    pool: DynDatabasePool,
    table: String,
}

impl SqlxSessionRepository {
    /// Create a repository over `table`
    pub fn new(pool: DynDatabasePool, table: impl Into<String>) -> Result<Self> {
        let table = table.into();
        if !is_valid_table_name(&table) {
            bail!("invalid session table name: {:?}", table);
        }
        Ok(Self { pool, table })
    }

    /// Name of the backing table
    pub fn table(&self) -> &str {
        &self.table
    }
}

#[async_trait]
impl SessionRepository for SqlxSessionRepository {
    async fn find_valid(&self, id: &str, now: DateTime<Utc>) -> Result<Option<SessionRecord>> {
        match self.pool.driver() {
            DatabaseDriver::Sqlite => {
                find_valid_sqlite(sqlite(&self.pool)?, &self.table, id, now).await
            }
            DatabaseDriver::Mysql => {
                find_valid_mysql(mysql(&self.pool)?, &self.table, id, now).await
            }
        }
    }

    async fn get_by_id(&self, id: &str) -> Result<Option<SessionRecord>> {
        match self.pool.driver() {
            DatabaseDriver::Sqlite => get_by_id_sqlite(sqlite(&self.pool)?, &self.table, id).await,
            DatabaseDriver::Mysql => get_by_id_mysql(mysql(&self.pool)?, &self.table, id).await,
        }
    }

    async fn create(&self, record: &SessionRecord) -> Result<()> {
        match self.pool.driver() {
            DatabaseDriver::Sqlite => create_sqlite(sqlite(&self.pool)?, &self.table, record).await,
            DatabaseDriver::Mysql => create_mysql(mysql(&self.pool)?, &self.table, record).await,
        }
    }

    async fn save(&self, record: &SessionRecord) -> Result<()> {
        match self.pool.driver() {
            DatabaseDriver::Sqlite => save_sqlite(sqlite(&self.pool)?, &self.table, record).await,
            DatabaseDriver::Mysql => save_mysql(mysql(&self.pool)?, &self.table, record).await,
        }
    }

    async fn delete(&self, id: &str) -> Result<()> {
        match self.pool.driver() {
            DatabaseDriver::Sqlite => delete_sqlite(sqlite(&self.pool)?, &self.table, id).await,
            DatabaseDriver::Mysql => delete_mysql(mysql(&self.pool)?, &self.table, id).await,
        }
    }

    async fn delete_expired(&self, now: DateTime<Utc>) -> Result<u64> {
        match self.pool.driver() {
            DatabaseDriver::Sqlite => {
                delete_expired_sqlite(sqlite(&self.pool)?, &self.table, now).await
            }
            DatabaseDriver::Mysql => {
                delete_expired_mysql(mysql(&self.pool)?, &self.table, now).await
            }
        }
    }
}

// ============================================================================
// SQLite implementations
// ============================================================================

async fn find_valid_sqlite(
    pool: &SqlitePool,
    table: &str,
    id: &str,
    now: DateTime<Utc>,
) -> Result<Option<SessionRecord>> {
    let row = sqlx::query(&format!(
        "SELECT id, data, created_at, updated_at, expires_at FROM {table} \
         WHERE id = ? AND expires_at > ? LIMIT 1"
    ))
    .bind(id)
    .bind(now)
    .fetch_optional(pool)
    .await
    .context("Failed to get valid session")?;

    row.as_ref().map(row_to_record_sqlite).transpose()
}

async fn get_by_id_sqlite(pool: &SqlitePool, table: &str, id: &str) -> Result<Option<SessionRecord>> {
    let row = sqlx::query(&format!(
        "SELECT id, data, created_at, updated_at, expires_at FROM {table} WHERE id = ?"
    ))
    .bind(id)
    .fetch_optional(pool)
    .await
    .context("Failed to get session by ID")?;

    row.as_ref().map(row_to_record_sqlite).transpose()
}

async fn create_sqlite(pool: &SqlitePool, table: &str, record: &SessionRecord) -> Result<()> {
    sqlx::query(&format!(
        "INSERT INTO {table} (id, data, created_at, updated_at, expires_at) \
         VALUES (?, ?, ?, ?, ?)"
    ))
    .bind(&record.id)
    .bind(&record.data)
    .bind(record.created_at)
    .bind(record.updated_at)
    .bind(record.expires_at)
    .execute(pool)
    .await
    .context("Failed to create session")?;

    Ok(())
}

async fn save_sqlite(pool: &SqlitePool, table: &str, record: &SessionRecord) -> Result<()> {
    sqlx::query(&format!(
        r#"
        INSERT INTO {table} (id, data, created_at, updated_at, expires_at)
        VALUES (?, ?, ?, ?, ?)
        ON CONFLICT(id) DO UPDATE SET
            data = excluded.data,
            updated_at = excluded.updated_at,
            expires_at = excluded.expires_at
        "#
    ))
    .bind(&record.id)
    .bind(&record.data)
    .bind(record.created_at)
    .bind(record.updated_at)
    .bind(record.expires_at)
    .execute(pool)
    .await
    .context("Failed to save session")?;

    Ok(())
}

async fn delete_sqlite(pool: &SqlitePool, table: &str, id: &str) -> Result<()> {
    sqlx::query(&format!("DELETE FROM {table} WHERE id = ?"))
        .bind(id)
        .execute(pool)
        .await
        .context("Failed to delete session")?;

    Ok(())
}

async fn delete_expired_sqlite(pool: &SqlitePool, table: &str, now: DateTime<Utc>) -> Result<u64> {
    let result = sqlx::query(&format!("DELETE FROM {table} WHERE expires_at <= ?"))
        .bind(now)
        .execute(pool)
        .await
        .context("Failed to delete expired sessions")?;

    Ok(result.rows_affected())
}

fn row_to_record_sqlite(row: &sqlx::sqlite::SqliteRow) -> Result<SessionRecord> {
    Ok(SessionRecord {
        id: row.try_get("id")?,
        data: row.try_get("data")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
        expires_at: row.try_get("expires_at")?,
    })
}

// ============================================================================
// MySQL implementations
// ============================================================================

async fn find_valid_mysql(
    pool: &MySqlPool,
    table: &str,
    id: &str,
    now: DateTime<Utc>,
) -> Result<Option<SessionRecord>> {
    let row = sqlx::query(&format!(
        "SELECT id, data, created_at, updated_at, expires_at FROM {table} \
         WHERE id = ? AND expires_at > ? LIMIT 1"
    ))
    .bind(id)
    .bind(now)
    .fetch_optional(pool)
    .await
    .context("Failed to get valid session")?;

    row.as_ref().map(row_to_record_mysql).transpose()
}

async fn get_by_id_mysql(pool: &MySqlPool, table: &str, id: &str) -> Result<Option<SessionRecord>> {
    let row = sqlx::query(&format!(
        "SELECT id, data, created_at, updated_at, expires_at FROM {table} WHERE id = ?"
    ))
    .bind(id)
    .fetch_optional(pool)
    .await
    .context("Failed to get session by ID")?;

    row.as_ref().map(row_to_record_mysql).transpose()
}

async fn create_mysql(pool: &MySqlPool, table: &str, record: &SessionRecord) -> Result<()> {
    sqlx::query(&format!(
        "INSERT INTO {table} (id, data, created_at, updated_at, expires_at) \
         VALUES (?, ?, ?, ?, ?)"
    ))
    .bind(&record.id)
    .bind(&record.data)
    .bind(record.created_at)
    .bind(record.updated_at)
    .bind(record.expires_at)
    .execute(pool)
    .await
    .context("Failed to create session")?;

    Ok(())
}

async fn save_mysql(pool: &MySqlPool, table: &str, record: &SessionRecord) -> Result<()> {
    sqlx::query(&format!(
        r#"
        INSERT INTO {table} (id, data, created_at, updated_at, expires_at)
        VALUES (?, ?, ?, ?, ?)
        ON DUPLICATE KEY UPDATE
            data = VALUES(data),
            updated_at = VALUES(updated_at),
            expires_at = VALUES(expires_at)
        "#
    ))
    .bind(&record.id)
    .bind(&record.data)
    .bind(record.created_at)
    .bind(record.updated_at)
    .bind(record.expires_at)
    .execute(pool)
    .await
    .context("Failed to save session")?;

    Ok(())
}

async fn delete_mysql(pool: &MySqlPool, table: &str, id: &str) -> Result<()> {
    sqlx::query(&format!("DELETE FROM {table} WHERE id = ?"))
        .bind(id)
        .execute(pool)
        .await
        .context("Failed to delete session")?;

    Ok(())
}

async fn delete_expired_mysql(pool: &MySqlPool, table: &str, now: DateTime<Utc>) -> Result<u64> {
    let result = sqlx::query(&format!("DELETE FROM {table} WHERE expires_at <= ?"))
        .bind(now)
        .execute(pool)
        .await
        .context("Failed to delete expired sessions")?;

    Ok(result.rows_affected())
}

fn row_to_record_mysql(row: &sqlx::mysql::MySqlRow) -> Result<SessionRecord> {
    let created_at: DateTime<Utc> = row.try_get("created_at")?;
    let updated_at: DateTime<Utc> = row.try_get("updated_at")?;
    let expires_at: DateTime<Utc> = row.try_get("expires_at")?;

    Ok(SessionRecord {
        id: row.try_get("id")?,
        data: row.try_get("data")?,
        created_at,
        updated_at,
        expires_at,
    })
}
