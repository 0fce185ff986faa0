//! In-memory session state

use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use std::collections::BTreeMap;

use crate::cookie::CookieOptions;

/// Session values keyed by name
pub type Values = BTreeMap<String, Value>;

/// A session as seen by request handlers.
///
/// Created per request by a store, mutated by the handler and persisted
/// again with the store's `save`. Setting `options.max_age` to a negative
/// value before saving deletes the session.
#[derive(Debug, Clone, PartialEq)]
pub struct Session {
    name: String,
    id: Option<String>,
    values: Values,
    /// Cookie options for this session, copied from the store defaults
    pub options: CookieOptions,
    is_new: bool,
}

impl Session {
    /// An empty, unsaved session
    pub fn new(name: impl Into<String>, options: CookieOptions) -> Self {
        Self {
            name: name.into(),
            id: None,
            values: Values::new(),
            options,
            is_new: true,
        }
    }

    /// Cookie name this session is stored under
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Record id, once the session has been loaded or saved
    pub fn id(&self) -> Option<&str> {
        self.id.as_deref()
    }

    /// Whether the session was created for this request rather than loaded
    pub fn is_new(&self) -> bool {
        self.is_new
    }

    pub fn values(&self) -> &Values {
        &self.values
    }

    /// Get a value, deserialized into `T`.
    ///
    /// Returns `None` when the key is missing or holds a different type.
    pub fn get<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        self.values
            .get(key)
            .and_then(|value| serde_json::from_value(value.clone()).ok())
    }

    pub fn insert<T: Serialize>(
        &mut self,
        key: impl Into<String>,
        value: T,
    ) -> Result<(), serde_json::Error> {
        self.values.insert(key.into(), serde_json::to_value(value)?);
        Ok(())
    }

    pub fn remove(&mut self, key: &str) -> Option<Value> {
        self.values.remove(key)
    }

    pub fn clear(&mut self) {
        self.values.clear();
    }

    /// Mark the session for deletion on the next save
    pub fn expire(&mut self) {
        self.options.max_age = -1;
    }

    pub(crate) fn restore(&mut self, id: String, values: Values) {
        self.id = Some(id);
        self.values = values;
        self.is_new = false;
    }

    pub(crate) fn set_id(&mut self, id: String) {
        self.id = Some(id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct Cart {
        items: Vec<String>,
    }

    #[test]
    fn test_new_session_is_empty() {
        let session = Session::new("sess", CookieOptions::default());

        assert_eq!(session.name(), "sess");
        assert!(session.id().is_none());
        assert!(session.is_new());
        assert!(session.values().is_empty());
    }

    #[test]
    fn test_typed_values() {
        let mut session = Session::new("sess", CookieOptions::default());
        session.insert("user", "alice").unwrap();
        session.insert("visits", 3u32).unwrap();
        session
            .insert(
                "cart",
                Cart {
                    items: vec!["book".to_string()],
                },
            )
            .unwrap();

        assert_eq!(session.get::<String>("user").as_deref(), Some("alice"));
        assert_eq!(session.get::<u32>("visits"), Some(3));
        assert_eq!(
            session.get::<Cart>("cart"),
            Some(Cart {
                items: vec!["book".to_string()]
            })
        );
        // Wrong type
        assert_eq!(session.get::<u32>("user"), None);
        assert_eq!(session.get::<u32>("missing"), None);

        assert!(session.remove("user").is_some());
        session.clear();
        assert!(session.values().is_empty());
    }

    #[test]
    fn test_expire_sets_negative_max_age() {
        let mut session = Session::new("sess", CookieOptions::default());
        session.expire();
        assert!(session.options.max_age < 0);
    }

    #[test]
    fn test_restore_marks_loaded() {
        let mut session = Session::new("sess", CookieOptions::default());
        let mut values = Values::new();
        values.insert("user".to_string(), Value::from("bob"));

        session.restore("ID".to_string(), values);

        assert_eq!(session.id(), Some("ID"));
        assert!(!session.is_new());
        assert_eq!(session.get::<String>("user").as_deref(), Some("bob"));
    }
}
