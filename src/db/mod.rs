//! Database layer
//!
//! Session rows live in a single table on SQLite (default) or MySQL.
//!
//! # Usage
//!
//! ```ignore
//! use dbsession::config::DatabaseConfig;
//! use dbsession::db::{create_pool, schema};
//!
//! let pool = create_pool(&DatabaseConfig::default()).await?;
//! schema::ensure_session_table(&pool, "sessions").await?;
//! pool.ping().await?;
//! ```

pub mod pool;
pub mod repositories;
pub mod schema;

pub use pool::{
    create_pool, create_test_pool, DatabasePool, DynDatabasePool, MysqlDatabase, SqliteDatabase,
};
