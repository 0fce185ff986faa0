//! Request-scoped session registry
//!
//! `RequestContext` carries what one request knows about its sessions: the
//! cookies it arrived with and the records loaded for them. `Registry` adds a
//! per-name session cache on top so a session is only loaded once per
//! request, and collects the `Set-Cookie` headers produced by saves.
//!
//! Neither type is shared between requests.

use async_trait::async_trait;
use axum::http::{header, HeaderMap};
use std::collections::hash_map::Entry;
use std::collections::HashMap;

use crate::cookie::parse_cookies;
use crate::models::SessionRecord;
use crate::session::Session;
use crate::store::SessionStoreError;

/// Contract between the registry and a session backend.
#[async_trait]
pub trait SessionStore: Send + Sync {
    /// Build the session called `name` for this request, restoring it from
    /// the request cookie when possible.
    async fn new_session(
        &self,
        context: &mut RequestContext,
        name: &str,
    ) -> Result<Session, SessionStoreError>;

    /// Persist `session` and append its cookie to `headers`.
    async fn save(
        &self,
        context: &mut RequestContext,
        headers: &mut HeaderMap,
        session: &mut Session,
    ) -> Result<(), SessionStoreError>;
}

/// Per-request session state
#[derive(Debug, Default)]
pub struct RequestContext {
    cookies: HashMap<String, String>,
    records: HashMap<String, SessionRecord>,
}

impl RequestContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// Context for a request carrying `headers`
    pub fn from_headers(headers: &HeaderMap) -> Self {
        Self {
            cookies: parse_cookies(headers),
            records: HashMap::new(),
        }
    }

    /// Raw value of the request cookie called `name`
    pub fn cookie(&self, name: &str) -> Option<&str> {
        self.cookies.get(name).map(String::as_str)
    }

    /// Record currently bound to the session called `name`
    pub fn record(&self, name: &str) -> Option<&SessionRecord> {
        self.records.get(name)
    }

    pub fn bind_record(&mut self, name: &str, record: SessionRecord) {
        self.records.insert(name.to_string(), record);
    }

    pub fn unbind_record(&mut self, name: &str) -> Option<SessionRecord> {
        self.records.remove(name)
    }
}

/// Sessions loaded during one request
#[derive(Debug, Default)]
pub struct Registry {
    context: RequestContext,
    sessions: HashMap<String, Session>,
    set_cookies: HeaderMap,
}

impl Registry {
    pub fn new(context: RequestContext) -> Self {
        Self {
            context,
            sessions: HashMap::new(),
            set_cookies: HeaderMap::new(),
        }
    }

    pub fn from_headers(headers: &HeaderMap) -> Self {
        Self::new(RequestContext::from_headers(headers))
    }

    pub fn context(&self) -> &RequestContext {
        &self.context
    }

    /// Get the session called `name`, loading it from `store` on first use.
    pub async fn get(
        &mut self,
        store: &dyn SessionStore,
        name: &str,
    ) -> Result<&mut Session, SessionStoreError> {
        match self.sessions.entry(name.to_string()) {
            Entry::Occupied(entry) => Ok(entry.into_mut()),
            Entry::Vacant(entry) => {
                let session = store.new_session(&mut self.context, name).await?;
                Ok(entry.insert(session))
            }
        }
    }

    /// Save the cached session called `name`. Unknown names are ignored.
    pub async fn save(
        &mut self,
        store: &dyn SessionStore,
        name: &str,
    ) -> Result<(), SessionStoreError> {
        match self.sessions.get_mut(name) {
            Some(session) => {
                store
                    .save(&mut self.context, &mut self.set_cookies, session)
                    .await
            }
            None => Ok(()),
        }
    }

    /// Save `session` and make it the cached copy for its name.
    pub async fn save_session(
        &mut self,
        store: &dyn SessionStore,
        session: &mut Session,
    ) -> Result<(), SessionStoreError> {
        store
            .save(&mut self.context, &mut self.set_cookies, session)
            .await?;
        self.sessions
            .insert(session.name().to_string(), session.clone());
        Ok(())
    }

    /// Save every session loaded so far, stopping at the first error.
    pub async fn save_all(&mut self, store: &dyn SessionStore) -> Result<(), SessionStoreError> {
        for session in self.sessions.values_mut() {
            store
                .save(&mut self.context, &mut self.set_cookies, session)
                .await?;
        }
        Ok(())
    }

    /// `Set-Cookie` headers produced by saves since the last call
    pub fn take_set_cookies(&mut self) -> HeaderMap {
        std::mem::take(&mut self.set_cookies)
    }

    /// Number of `Set-Cookie` headers waiting to be sent
    pub fn pending_cookies(&self) -> usize {
        self.set_cookies.get_all(header::SET_COOKIE).iter().count()
    }
}
