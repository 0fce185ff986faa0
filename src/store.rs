//! SQL-backed session store
//!
//! The browser only ever holds the signed (and optionally encrypted) session
//! id. Session values live in the session table, encoded with the same codecs
//! under the session name.
//!
//! Loading never fails: a missing, tampered or expired cookie, or an unknown
//! or expired row, yields a fresh empty session. Saving reports every
//! failure and writes no cookie when it fails.

use async_trait::async_trait;
use axum::http::header::InvalidHeaderValue;
use axum::http::HeaderMap;
use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use crate::codec::{codecs_from_pairs, decode_multi, encode_multi, Codec, CodecError};
use crate::config::{ConfigError, SessionConfig, DEFAULT_TABLE_NAME, MAX_SESSION_AGE};
use crate::cookie::{append_set_cookie, is_valid_cookie_name, CookieOptions};
use crate::db::schema::ensure_session_table;
use crate::db::repositories::{SessionRepository, SqlxSessionRepository};
use crate::db::DynDatabasePool;
use crate::models::{generate_session_id, SessionRecord};
use crate::registry::{Registry, RequestContext, SessionStore};
use crate::session::{Session, Values};

/// Error type for session store operations
#[derive(Debug, thiserror::Error)]
pub enum SessionStoreError {
    #[error("codec error: {0}")]
    Codec(#[from] CodecError),

    #[error("database error: {0:#}")]
    Database(#[from] anyhow::Error),

    #[error("invalid cookie header: {0}")]
    InvalidCookie(#[from] InvalidHeaderValue),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("invalid cookie name: {0:?}")]
    InvalidCookieName(String),

    #[error("max_age {0} is out of range (at most {max} seconds)", max = MAX_SESSION_AGE)]
    MaxAgeOutOfRange(i64),
}

/// Table options applied when the store is built
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreOptions {
    /// Session table name; empty means `sessions`
    pub table_name: String,
    /// Leave table creation to externally managed migrations
    pub skip_create_table: bool,
}

impl Default for StoreOptions {
    fn default() -> Self {
        Self {
            table_name: DEFAULT_TABLE_NAME.to_string(),
            skip_create_table: false,
        }
    }
}

pub struct SqlStore {
    repo: Arc<dyn SessionRepository>,
    codecs: Vec<Box<dyn Codec>>,
    options: CookieOptions,
}

impl SqlStore {
    /// Store with default options over `pool`, one codec per key pair.
    ///
    /// The first pair encodes; all pairs are tried when decoding.
    pub async fn new(
        pool: DynDatabasePool,
        key_pairs: &[(Vec<u8>, Option<Vec<u8>>)],
    ) -> Result<Self, SessionStoreError> {
        let codecs = codecs_from_pairs(key_pairs)?;
        Self::with_options(pool, StoreOptions::default(), codecs).await
    }

    /// Store over `pool` using the given table options and codecs.
    ///
    /// Creates the session table unless `skip_create_table` is set.
    pub async fn with_options(
        pool: DynDatabasePool,
        options: StoreOptions,
        codecs: Vec<Box<dyn Codec>>,
    ) -> Result<Self, SessionStoreError> {
        if codecs.is_empty() {
            return Err(CodecError::NoCodecs.into());
        }

        let table = if options.table_name.is_empty() {
            DEFAULT_TABLE_NAME.to_string()
        } else {
            options.table_name
        };

        if !options.skip_create_table {
            ensure_session_table(&pool, &table).await?;
        }

        let repo = SqlxSessionRepository::new(pool, table)?;
        tracing::debug!("Session store using table '{}'", repo.table());
        Ok(Self::with_repository(Arc::new(repo), codecs))
    }

    /// Store built from a `session:` configuration section
    pub async fn from_config(
        pool: DynDatabasePool,
        config: &SessionConfig,
    ) -> Result<Self, SessionStoreError> {
        config.validate()?;

        let codecs = codecs_from_pairs(&config.key_pairs())?;
        let options = StoreOptions {
            table_name: config.table_name.clone(),
            skip_create_table: config.skip_create_table,
        };

        let mut store = Self::with_options(pool, options, codecs).await?;
        store.set_options(config.cookie_options());
        store.max_length(config.max_length);
        Ok(store)
    }

    /// Store over an arbitrary repository. No table is created.
    pub fn with_repository(repo: Arc<dyn SessionRepository>, codecs: Vec<Box<dyn Codec>>) -> Self {
        let mut store = Self {
            repo,
            codecs,
            options: CookieOptions::default(),
        };
        store.max_age(store.options.max_age);
        store
    }

    /// Default cookie options handed to new sessions
    pub fn options(&self) -> &CookieOptions {
        &self.options
    }

    /// Replace the default cookie options and align the codecs' max age.
    pub fn set_options(&mut self, options: CookieOptions) {
        let max_age = options.max_age;
        self.options = options;
        self.max_age(max_age);
    }

    /// Set the default session lifetime, in seconds, for new sessions and
    /// for cookie timestamp checks.
    pub fn max_age(&mut self, age: i64) {
        self.options.max_age = age;
        for codec in &mut self.codecs {
            codec.set_max_age(age);
        }
    }

    /// Set the maximum encoded length accepted by every codec.
    pub fn max_length(&mut self, length: usize) {
        for codec in &mut self.codecs {
            codec.set_max_length(length);
        }
    }

    /// Session called `name` from the request registry, loaded once per request.
    pub async fn get<'r>(
        &self,
        registry: &'r mut Registry,
        name: &str,
    ) -> Result<&'r mut Session, SessionStoreError> {
        registry.get(self, name).await
    }

    /// Delete every expired session row.
    ///
    /// Failures are logged and the next pass tries again.
    pub async fn cleanup(&self) {
        let now = Utc::now();
        match self.repo.delete_expired(now).await {
            Ok(0) => tracing::debug!("Session cleanup at {}: nothing to remove", now),
            Ok(removed) => {
                tracing::info!("Session cleanup at {}: removed {} expired sessions", now, removed)
            }
            Err(e) => tracing::warn!("Session cleanup failed: {:#}", e),
        }
    }

    /// Run `cleanup` every `period` until `cancel` fires.
    ///
    /// The first pass happens one period after the call. Ticks missed while a
    /// pass is still running are skipped.
    pub async fn periodic_cleanup(&self, period: Duration, cancel: CancellationToken) {
        if period.is_zero() {
            tracing::warn!("Periodic session cleanup disabled: interval is zero");
            return;
        }

        let mut ticker = interval_at(Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => self.cleanup().await,
            }
        }

        tracing::debug!("Periodic session cleanup stopped");
    }

    fn fresh(&self, name: &str) -> Session {
        Session::new(name, self.options.clone())
    }
}

/// Spawn `periodic_cleanup` on the runtime.
pub fn spawn_cleanup(
    store: Arc<SqlStore>,
    period: Duration,
    cancel: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move { store.periodic_cleanup(period, cancel).await })
}

#[async_trait]
impl SessionStore for SqlStore {
    async fn new_session(
        &self,
        context: &mut RequestContext,
        name: &str,
    ) -> Result<Session, SessionStoreError> {
        let mut session = self.fresh(name);

        let Some(cookie) = context.cookie(name) else {
            return Ok(session);
        };

        let id: String = match decode_multi(name, cookie, &self.codecs) {
            Ok(id) => id,
            Err(e) if e.is_decode_error() => {
                tracing::debug!("Ignoring session cookie '{}': {}", name, e);
                return Ok(session);
            }
            Err(e) => {
                tracing::warn!("Cannot decode session cookie '{}': {}", name, e);
                return Ok(session);
            }
        };

        let record = match self.repo.find_valid(&id, Utc::now()).await {
            Ok(Some(record)) => record,
            Ok(None) => {
                tracing::debug!("Session '{}' is missing or expired", name);
                return Ok(session);
            }
            Err(e) => {
                tracing::warn!("Failed to load session '{}': {:#}", name, e);
                return Ok(session);
            }
        };

        let values: Values = match decode_multi(name, &record.data, &self.codecs) {
            Ok(values) => values,
            Err(e) => {
                tracing::debug!("Ignoring stored data for session '{}': {}", name, e);
                return Ok(session);
            }
        };

        session.restore(id, values);
        context.bind_record(name, record);
        Ok(session)
    }

    async fn save(
        &self,
        context: &mut RequestContext,
        headers: &mut HeaderMap,
        session: &mut Session,
    ) -> Result<(), SessionStoreError> {
        let name = session.name().to_string();
        if !is_valid_cookie_name(&name) {
            return Err(SessionStoreError::InvalidCookieName(name));
        }

        if session.options.max_age < 0 {
            if let Some(record) = context.record(&name) {
                self.repo.delete(&record.id).await?;
                context.unbind_record(&name);
            }
            append_set_cookie(headers, &name, "", &session.options)?;
            return Ok(());
        }

        let max_age = session.options.max_age;
        if max_age > MAX_SESSION_AGE {
            return Err(SessionStoreError::MaxAgeOutOfRange(max_age));
        }

        let data = encode_multi(&name, session.values(), &self.codecs)?;
        let now = Utc::now();

        let id = match context.unbind_record(&name) {
            Some(mut record) => {
                record.touch(data, now, max_age);
                let saved = self.repo.save(&record).await;
                let id = record.id.clone();
                context.bind_record(&name, record);
                saved?;
                id
            }
            None => {
                let id = generate_session_id()?;
                let record = SessionRecord::new(id.clone(), data, now, max_age);
                self.repo.create(&record).await?;
                context.bind_record(&name, record);
                id
            }
        };
        session.set_id(id.clone());

        let value = encode_multi(&name, &id, &self.codecs)?;
        append_set_cookie(headers, &name, &value, &session.options)?;
        Ok(())
    }
}
