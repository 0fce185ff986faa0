//! Data models
//!
//! Rows persisted by the session store.

mod session;

pub use session::{expiry_after, generate_session_id, SessionRecord, SESSION_ID_LEN};
