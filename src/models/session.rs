//! Session record model

use chrono::{DateTime, Duration, Utc};
use data_encoding::BASE32_NOPAD;
use serde::{Deserialize, Serialize};

use crate::codec::{generate_random_key, CodecError};

/// Number of random bytes behind a session id
pub const SESSION_ID_LEN: usize = 32;

/// A persisted session row
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionRecord {
    /// Session ID (random token, also sent to the browser inside the cookie)
    pub id: String,
    /// Codec-encoded session values
    pub data: String,
    /// Creation timestamp
    pub created_at: DateTime<Utc>,
    /// Last save timestamp
    pub updated_at: DateTime<Utc>,
    /// Expiration timestamp
    pub expires_at: DateTime<Utc>,
}

impl SessionRecord {
    /// A fresh record expiring `max_age` seconds after `now`
    pub fn new(id: String, data: String, now: DateTime<Utc>, max_age: i64) -> Self {
        Self {
            id,
            data,
            created_at: now,
            updated_at: now,
            expires_at: saturating_expiry(now, max_age),
        }
    }

    /// Replace the data and push the expiry out to `now + max_age`
    pub fn touch(&mut self, data: String, now: DateTime<Utc>, max_age: i64) {
        self.data = data;
        self.updated_at = now;
        self.expires_at = saturating_expiry(now, max_age);
    }

    /// Check if the session has expired
    pub fn is_expired(&self) -> bool {
        self.expires_at <= Utc::now()
    }
}

/// `now + max_age` seconds, or `None` when that instant is not representable.
pub fn expiry_after(now: DateTime<Utc>, max_age: i64) -> Option<DateTime<Utc>> {
    Duration::try_seconds(max_age).and_then(|age| now.checked_add_signed(age))
}

fn saturating_expiry(now: DateTime<Utc>, max_age: i64) -> DateTime<Utc> {
    expiry_after(now, max_age).unwrap_or(if max_age < 0 {
        DateTime::<Utc>::MIN_UTC
    } else {
        DateTime::<Utc>::MAX_UTC
    })
}

/// Generate a URL-safe session id: 32 random bytes, base32 without padding.
pub fn generate_session_id() -> Result<String, CodecError> {
    let bytes = generate_random_key(SESSION_ID_LEN)?;
    Ok(BASE32_NOPAD.encode(&bytes))
}
