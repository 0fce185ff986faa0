//! dbsession - SQL-backed HTTP sessions
//!
//! Session values are stored in a database table; the browser only keeps a
//! signed (optionally encrypted) cookie carrying the session id.
//!
//! # Usage
//!
//! ```ignore
//! use dbsession::{db, registry::Registry, SqlStore};
//!
//! let pool = db::create_test_pool().await?;
//! let store = SqlStore::new(pool, &[(b"hash-key".to_vec(), None)]).await?;
//!
//! let mut registry = Registry::from_headers(request.headers());
//! let session = store.get(&mut registry, "session").await?;
//! session.insert("user", "alice")?;
//! registry.save_all(&store).await?;
//! let set_cookies = registry.take_set_cookies();
//! ```

pub mod api;
pub mod codec;
pub mod config;
pub mod cookie;
pub mod db;
pub mod models;
pub mod registry;
pub mod session;
pub mod store;

pub use registry::{Registry, RequestContext, SessionStore};
pub use session::Session;
pub use store::{spawn_cleanup, SessionStoreError, SqlStore, StoreOptions};
