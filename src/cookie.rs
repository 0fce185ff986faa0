//! Cookie attributes and header formatting
//!
//! Session cookies are written as raw `Set-Cookie` header values and read
//! back from the request `Cookie` header.

use axum::http::{header, HeaderMap, HeaderValue};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::config::{DEFAULT_MAX_AGE, DEFAULT_PATH};
use crate::models::expiry_after;

/// One second past the epoch, as sent by deletion cookies
const EXPIRED_HTTP_DATE: &str = "Thu, 01 Jan 1970 00:00:01 GMT";

/// SameSite cookie attribute
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SameSite {
    Lax,
    Strict,
    None,
}

impl SameSite {
    fn as_str(self) -> &'static str {
        match self {
            SameSite::Lax => "Lax",
            SameSite::Strict => "Strict",
            SameSite::None => "None",
        }
    }
}

/// Per-session cookie options.
///
/// `max_age` is in seconds: positive values persist the cookie, zero makes
/// it a browser-session cookie and negative values delete it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CookieOptions {
    pub path: String,
    pub domain: Option<String>,
    pub max_age: i64,
    pub secure: bool,
    pub http_only: bool,
    pub same_site: Option<SameSite>,
}

impl Default for CookieOptions {
    fn default() -> Self {
        Self {
            path: DEFAULT_PATH.to_string(),
            domain: None,
            max_age: DEFAULT_MAX_AGE,
            secure: false,
            http_only: false,
            same_site: None,
        }
    }
}

/// Whether `name` is an RFC 6265 cookie name: a non-empty token of visible
/// ASCII without separators such as `=`, `;` or whitespace.
pub fn is_valid_cookie_name(name: &str) -> bool {
    const SEPARATORS: &[u8] = b"()<>@,;:\\\"/[]?={}";
    !name.is_empty()
        && name
            .bytes()
            .all(|b| b.is_ascii_graphic() && !SEPARATORS.contains(&b))
}

/// Build a `Set-Cookie` header value for `name=value` using `options`.
pub fn set_cookie_value(name: &str, value: &str, options: &CookieOptions) -> String {
    set_cookie_value_at(name, value, options, Utc::now())
}

fn set_cookie_value_at(
    name: &str,
    value: &str,
    options: &CookieOptions,
    now: DateTime<Utc>,
) -> String {
    let mut cookie = format!("{}={}", name, value);

    if !options.path.is_empty() {
        cookie.push_str(&format!("; Path={}", options.path));
    }
    if let Some(domain) = options.domain.as_deref().filter(|d| !d.is_empty()) {
        cookie.push_str(&format!("; Domain={}", domain));
    }

    if options.max_age > 0 {
        // Browsers cap Max-Age themselves; Expires is dropped when unrepresentable.
        if let Some(expires) = expiry_after(now, options.max_age) {
            cookie.push_str(&format!("; Expires={}", http_date(expires)));
        }
        cookie.push_str(&format!("; Max-Age={}", options.max_age));
    } else if options.max_age < 0 {
        cookie.push_str(&format!("; Expires={}; Max-Age=0", EXPIRED_HTTP_DATE));
    }

    if options.http_only {
        cookie.push_str("; HttpOnly");
    }
    if options.secure {
        cookie.push_str("; Secure");
    }
    if let Some(same_site) = options.same_site {
        cookie.push_str(&format!("; SameSite={}", same_site.as_str()));
    }

    cookie
}

fn http_date(at: DateTime<Utc>) -> String {
    at.format("%a, %d %b %Y %H:%M:%S GMT").to_string()
}

/// Collect every cookie sent in the request `Cookie` headers.
///
/// When a name appears more than once the first occurrence wins, matching
/// how browsers order the most specific path first.
pub fn parse_cookies(headers: &HeaderMap) -> HashMap<String, String> {
    let mut cookies = HashMap::new();

    for value in headers.get_all(header::COOKIE) {
        let Ok(value) = value.to_str() else {
            continue;
        };
        for pair in value.split(';') {
            let pair = pair.trim();
            if let Some((name, value)) = pair.split_once('=') {
                let name = name.trim();
                if name.is_empty() {
                    continue;
                }
                let value = value.trim().trim_matches('"');
                cookies
                    .entry(name.to_string())
                    .or_insert_with(|| value.to_string());
            }
        }
    }

    cookies
}

/// Append a `Set-Cookie` header to the response sink.
pub fn append_set_cookie(
    headers: &mut HeaderMap,
    name: &str,
    value: &str,
    options: &CookieOptions,
) -> Result<(), axum::http::header::InvalidHeaderValue> {
    let cookie = set_cookie_value(name, value, options);
    headers.append(header::SET_COOKIE, HeaderValue::from_str(&cookie)?);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn fixed_now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap()
    }

    #[test]
    fn test_persistent_cookie_attributes() {
        let options = CookieOptions {
            path: "/".to_string(),
            domain: Some("example.com".to_string()),
            max_age: 3600,
            secure: true,
            http_only: true,
            same_site: Some(SameSite::Lax),
        };

        let cookie = set_cookie_value_at("sess", "abc", &options, fixed_now());

        assert_eq!(
            cookie,
            "sess=abc; Path=/; Domain=example.com; Expires=Fri, 01 Mar 2024 13:00:00 GMT; \
             Max-Age=3600; HttpOnly; Secure; SameSite=Lax"
        );
    }

    #[test]
    fn test_browser_session_cookie_has_no_expiry() {
        let options = CookieOptions {
            max_age: 0,
            ..CookieOptions::default()
        };

        let cookie = set_cookie_value_at("sess", "abc", &options, fixed_now());

        assert_eq!(cookie, "sess=abc; Path=/");
    }

    #[test]
    fn test_deletion_cookie_expires_in_the_past() {
        let options = CookieOptions {
            max_age: -1,
            ..CookieOptions::default()
        };

        let cookie = set_cookie_value_at("sess", "", &options, fixed_now());

        assert_eq!(
            cookie,
            "sess=; Path=/; Expires=Thu, 01 Jan 1970 00:00:01 GMT; Max-Age=0"
        );
    }

    #[test]
    fn test_huge_max_age_keeps_max_age_only() {
        let options = CookieOptions {
            max_age: i64::MAX,
            ..CookieOptions::default()
        };

        let cookie = set_cookie_value_at("sess", "abc", &options, fixed_now());

        assert_eq!(cookie, format!("sess=abc; Path=/; Max-Age={}", i64::MAX));
    }

    #[test]
    fn test_cookie_names() {
        for good in ["session", "dbsession", "my_session-2", "a.b"] {
            assert!(is_valid_cookie_name(good), "rejected {good:?}");
        }
        for bad in ["", "a=b", "a;b", "a b", "a\tb", "\"q\"", "sess\u{e9}", "a,b"] {
            assert!(!is_valid_cookie_name(bad), "accepted {bad:?}");
        }
    }

    #[test]
    fn test_parse_cookies() {
        let mut headers = HeaderMap::new();
        headers.append(
            header::COOKIE,
            HeaderValue::from_static("a=1; sess=\"token\" ; =skip; b"),
        );
        headers.append(header::COOKIE, HeaderValue::from_static("a=2; c=3"));

        let cookies = parse_cookies(&headers);

        assert_eq!(cookies.get("a").map(String::as_str), Some("1"));
        assert_eq!(cookies.get("sess").map(String::as_str), Some("token"));
        assert_eq!(cookies.get("c").map(String::as_str), Some("3"));
        assert!(!cookies.contains_key("b"));
        assert!(!cookies.contains_key(""));
    }

    #[test]
    fn test_append_set_cookie_rejects_invalid_header() {
        let mut headers = HeaderMap::new();
        let options = CookieOptions {
            path: "/\n".to_string(),
            ..CookieOptions::default()
        };

        assert!(append_set_cookie(&mut headers, "sess", "v", &options).is_err());
        assert!(headers.get(header::SET_COOKIE).is_none());
    }
}
