//! Cookie codecs
//!
//! A codec turns bytes into a tamper-evident (and optionally encrypted)
//! string and back. The store only talks to the `Codec` trait; the
//! `SecureCookie` implementation signs with HMAC-SHA256 and encrypts with
//! AES-GCM.
//!
//! Several codecs can be used together for key rotation: `encode_multi`
//! always uses the first one, `decode_multi` accepts a value from any of them.

mod secure;

pub use secure::{codecs_from_pairs, generate_random_key, SecureCookie};

use serde::de::DeserializeOwned;
use serde::Serialize;

/// Error types for codec operations
#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    #[error("hash key is not set")]
    HashKeyNotSet,

    #[error("invalid block key: {0}")]
    InvalidBlockKey(String),

    #[error("the value is too long ({length} > {max})")]
    ValueTooLong { length: usize, max: usize },

    #[error("the value is not valid")]
    InvalidValue,

    #[error("the value could not be verified using HMAC")]
    MacInvalid,

    #[error("expired timestamp")]
    Expired,

    #[error("encryption failed")]
    Encryption,

    #[error("the value could not be decrypted")]
    Decryption,

    #[error("serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("no codecs were provided")]
    NoCodecs,

    #[error("random source failed: {0}")]
    Random(String),
}

impl CodecError {
    /// Whether the error came from the decoded value rather than from the codec setup
    pub fn is_decode_error(&self) -> bool {
        matches!(
            self,
            CodecError::ValueTooLong { .. }
                | CodecError::InvalidValue
                | CodecError::MacInvalid
                | CodecError::Expired
                | CodecError::Decryption
                | CodecError::Serialization(_)
        )
    }
}

/// Capability that signs/encrypts values for the browser and verifies them again.
pub trait Codec: Send + Sync {
    /// Encode `value` for the cookie (or blob) called `name`.
    fn encode(&self, name: &str, value: &[u8]) -> Result<String, CodecError>;

    /// Verify and decode a value produced by `encode` for the same `name`.
    fn decode(&self, name: &str, value: &str) -> Result<Vec<u8>, CodecError>;

    /// Reject values older than `seconds` at decode time; 0 disables the check.
    fn set_max_age(&mut self, seconds: i64);

    /// Reject encoded values longer than `bytes`; 0 disables the check.
    fn set_max_length(&mut self, bytes: usize);
}

/// Serialize `value` as JSON and encode it with the first codec.
pub fn encode_multi<T>(
    name: &str,
    value: &T,
    codecs: &[Box<dyn Codec>],
) -> Result<String, CodecError>
where
    T: Serialize + ?Sized,
{
    let codec = codecs.first().ok_or(CodecError::NoCodecs)?;
    let bytes = serde_json::to_vec(value)?;
    codec.encode(name, &bytes)
}

/// Decode `value` with each codec in turn and deserialize the first success.
///
/// When every codec fails, the error of the first codec is returned.
pub fn decode_multi<T>(
    name: &str,
    value: &str,
    codecs: &[Box<dyn Codec>],
) -> Result<T, CodecError>
where
    T: DeserializeOwned,
{
    let mut first_error = None;

    for codec in codecs {
        match codec.decode(name, value) {
            Ok(bytes) => return Ok(serde_json::from_slice(&bytes)?),
            Err(e) => {
                if first_error.is_none() {
                    first_error = Some(e);
                }
            }
        }
    }

    Err(first_error.unwrap_or(CodecError::NoCodecs))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    fn codecs(pairs: &[(&str, Option<&str>)]) -> Vec<Box<dyn Codec>> {
        let pairs: Vec<(Vec<u8>, Option<Vec<u8>>)> = pairs
            .iter()
            .map(|(hash, block)| (hash.as_bytes().to_vec(), block.map(|b| b.as_bytes().to_vec())))
            .collect();
        codecs_from_pairs(&pairs).expect("valid key pairs")
    }

    #[test]
    fn test_encode_decode_multi() {
        let codecs = codecs(&[("hash-key-one", None)]);
        let mut values = BTreeMap::new();
        values.insert("user".to_string(), serde_json::json!("alice"));

        let encoded = encode_multi("sess", &values, &codecs).unwrap();
        let decoded: BTreeMap<String, serde_json::Value> =
            decode_multi("sess", &encoded, &codecs).unwrap();

        assert_eq!(decoded, values);
    }

    #[test]
    fn test_decode_multi_accepts_rotated_keys() {
        let old = codecs(&[("old-hash-key", Some("0123456789abcdef"))]);
        let rotated = codecs(&[
            ("new-hash-key", None),
            ("old-hash-key", Some("0123456789abcdef")),
        ]);

        let encoded = encode_multi("sess", "session-id", &old).unwrap();
        let decoded: String = decode_multi("sess", &encoded, &rotated).unwrap();

        assert_eq!(decoded, "session-id");
    }

    #[test]
    fn test_decode_multi_reports_first_error() {
        let signer = codecs(&[("signer", None)]);
        let others = codecs(&[("other-one", None), ("other-two", None)]);

        let encoded = encode_multi("sess", "id", &signer).unwrap();
        let err = decode_multi::<String>("sess", &encoded, &others).unwrap_err();

        assert!(matches!(err, CodecError::MacInvalid));
        assert!(err.is_decode_error());
    }

    #[test]
    fn test_floats_survive_encoding_exactly() {
        let codecs = codecs(&[("hash-key-one", None)]);
        let mut values = BTreeMap::new();
        for (i, x) in [1.0715660391465826e-75, 0.1, 1.0 / 3.0, f64::MIN_POSITIVE, f64::MAX]
            .into_iter()
            .enumerate()
        {
            values.insert(format!("f{}", i), serde_json::json!(x));
        }

        let encoded = encode_multi("sess", &values, &codecs).unwrap();
        let decoded: BTreeMap<String, serde_json::Value> =
            decode_multi("sess", &encoded, &codecs).unwrap();

        for (key, value) in &values {
            assert_eq!(
                decoded[key].as_f64().map(f64::to_bits),
                value.as_f64().map(f64::to_bits),
                "{key} changed"
            );
        }
    }

    #[test]
    fn test_no_codecs() {
        let empty: Vec<Box<dyn Codec>> = Vec::new();

        assert!(matches!(
            encode_multi("sess", "id", &empty),
            Err(CodecError::NoCodecs)
        ));
        assert!(matches!(
            decode_multi::<String>("sess", "anything", &empty),
            Err(CodecError::NoCodecs)
        ));
    }

    mod properties {
        use super::*;
        use proptest::prelude::*;

        proptest! {
            #![proptest_config(ProptestConfig::with_cases(256))]

            /// Every finite f64 comes back bit-for-bit
            #[test]
            fn prop_finite_floats_round_trip(x in any::<f64>().prop_filter("finite", |x| x.is_finite())) {
                let codecs = codecs(&[("hash-key-one", None)]);
                let encoded = encode_multi("sess", &x, &codecs).unwrap();
                let decoded: f64 = decode_multi("sess", &encoded, &codecs).unwrap();
                prop_assert_eq!(decoded.to_bits(), x.to_bits());
            }
        }
    }
}
