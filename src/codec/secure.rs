//! HMAC-signed, optionally AES-GCM encrypted cookie values
//!
//! Encoded layout (before the outer base64url):
//!
//! ```text
//! <unix timestamp>|<base64url(payload)>|<HMAC-SHA256(name|timestamp|payload)>
//! ```
//!
//! With a block key the payload is `nonce || ciphertext`.

use aes_gcm::{
    aead::{Aead, KeyInit},
    Aes128Gcm, Aes256Gcm, Nonce,
};
use chrono::Utc;
use data_encoding::BASE64URL;
use hmac::{Hmac, Mac};
use sha2::Sha256;

use super::{Codec, CodecError};
use crate::config::{DEFAULT_MAX_AGE, DEFAULT_MAX_LENGTH};

type HmacSha256 = Hmac<Sha256>;

const NONCE_LEN: usize = 12;

enum BlockCipher {
    Aes128(Aes128Gcm),
    Aes256(Aes256Gcm),
}

impl BlockCipher {
    fn new(key: &[u8]) -> Result<Self, CodecError> {
        match key.len() {
            16 => Aes128Gcm::new_from_slice(key)
                .map(BlockCipher::Aes128)
                .map_err(|e| CodecError::InvalidBlockKey(e.to_string())),
            32 => Aes256Gcm::new_from_slice(key)
                .map(BlockCipher::Aes256)
                .map_err(|e| CodecError::InvalidBlockKey(e.to_string())),
            n => Err(CodecError::InvalidBlockKey(format!(
                "expected 16 or 32 bytes, got {n}"
            ))),
        }
    }

    fn encrypt(&self, plaintext: &[u8]) -> Result<Vec<u8>, CodecError> {
        let nonce_bytes = generate_random_key(NONCE_LEN)?;
        let nonce = Nonce::from_slice(&nonce_bytes);

        let ciphertext = match self {
            BlockCipher::Aes128(cipher) => cipher.encrypt(nonce, plaintext),
            BlockCipher::Aes256(cipher) => cipher.encrypt(nonce, plaintext),
        }
        .map_err(|_| CodecError::Encryption)?;

        let mut out = nonce_bytes;
        out.extend_from_slice(&ciphertext);
        Ok(out)
    }

    fn decrypt(&self, data: &[u8]) -> Result<Vec<u8>, CodecError> {
        if data.len() < NONCE_LEN {
            return Err(CodecError::Decryption);
        }
        let (nonce_bytes, ciphertext) = data.split_at(NONCE_LEN);
        let nonce = Nonce::from_slice(nonce_bytes);

        match self {
            BlockCipher::Aes128(cipher) => cipher.decrypt(nonce, ciphertext),
            BlockCipher::Aes256(cipher) => cipher.decrypt(nonce, ciphertext),
        }
        .map_err(|_| CodecError::Decryption)
    }
}

/// Fill a buffer of `len` bytes from the operating system's random source.
pub fn generate_random_key(len: usize) -> Result<Vec<u8>, CodecError> {
    let mut key = vec![0u8; len];
    getrandom::fill(&mut key).map_err(|e| CodecError::Random(e.to_string()))?;
    Ok(key)
}

/// Codec that signs values and optionally encrypts them.
pub struct SecureCookie {
    hash_key: Vec<u8>,
    block: Option<BlockCipher>,
    max_age: i64,
    max_length: usize,
}

impl SecureCookie {
    /// Create a codec with a signing key and an optional 16 or 32 byte block key.
    pub fn new(hash_key: &[u8], block_key: Option<&[u8]>) -> Result<Self, CodecError> {
        if hash_key.is_empty() {
            return Err(CodecError::HashKeyNotSet);
        }
        let block = block_key.map(BlockCipher::new).transpose()?;

        Ok(Self {
            hash_key: hash_key.to_vec(),
            block,
            max_age: DEFAULT_MAX_AGE,
            max_length: DEFAULT_MAX_LENGTH,
        })
    }

    fn mac(&self, name: &str, timestamp: &[u8], payload: &[u8]) -> Result<HmacSha256, CodecError> {
        let mut mac = <HmacSha256 as Mac>::new_from_slice(&self.hash_key)
            .map_err(|_| CodecError::HashKeyNotSet)?;
        mac.update(name.as_bytes());
        mac.update(b"|");
        mac.update(timestamp);
        mac.update(b"|");
        mac.update(payload);
        Ok(mac)
    }

    fn encode_at(&self, name: &str, value: &[u8], timestamp: i64) -> Result<String, CodecError> {
        let payload = match &self.block {
            Some(cipher) => cipher.encrypt(value)?,
            None => value.to_vec(),
        };
        let payload = BASE64URL.encode(&payload);
        let timestamp = timestamp.to_string();

        let signature = self
            .mac(name, timestamp.as_bytes(), payload.as_bytes())?
            .finalize()
            .into_bytes();

        let mut raw = Vec::with_capacity(timestamp.len() + payload.len() + signature.len() + 2);
        raw.extend_from_slice(timestamp.as_bytes());
        raw.push(b'|');
        raw.extend_from_slice(payload.as_bytes());
        raw.push(b'|');
        raw.extend_from_slice(&signature);

        let encoded = BASE64URL.encode(&raw);
        if self.max_length != 0 && encoded.len() > self.max_length {
            return Err(CodecError::ValueTooLong {
                length: encoded.len(),
                max: self.max_length,
            });
        }
        Ok(encoded)
    }

    fn decode_at(&self, name: &str, value: &str, now: i64) -> Result<Vec<u8>, CodecError> {
        if self.max_length != 0 && value.len() > self.max_length {
            return Err(CodecError::ValueTooLong {
                length: value.len(),
                max: self.max_length,
            });
        }

        let raw = BASE64URL
            .decode(value.as_bytes())
            .map_err(|_| CodecError::InvalidValue)?;

        // The signature is raw bytes and may itself contain '|'.
        let mut parts = raw.splitn(3, |b| *b == b'|');
        let (Some(timestamp), Some(payload), Some(signature)) =
            (parts.next(), parts.next(), parts.next())
        else {
            return Err(CodecError::InvalidValue);
        };

        self.mac(name, timestamp, payload)?
            .verify_slice(signature)
            .map_err(|_| CodecError::MacInvalid)?;

        let timestamp: i64 = std::str::from_utf8(timestamp)
            .ok()
            .and_then(|t| t.parse().ok())
            .ok_or(CodecError::InvalidValue)?;
        if self.max_age != 0 && timestamp < now.saturating_sub(self.max_age) {
            return Err(CodecError::Expired);
        }

        let payload = BASE64URL
            .decode(payload)
            .map_err(|_| CodecError::InvalidValue)?;

        match &self.block {
            Some(cipher) => cipher.decrypt(&payload),
            None => Ok(payload),
        }
    }
}

impl Codec for SecureCookie {
    fn encode(&self, name: &str, value: &[u8]) -> Result<String, CodecError> {
        self.encode_at(name, value, Utc::now().timestamp())
    }

    fn decode(&self, name: &str, value: &str) -> Result<Vec<u8>, CodecError> {
        self.decode_at(name, value, Utc::now().timestamp())
    }

    fn set_max_age(&mut self, seconds: i64) {
        self.max_age = seconds.max(0);
    }

    fn set_max_length(&mut self, bytes: usize) {
        self.max_length = bytes;
    }
}

/// Build one `SecureCookie` per (hash key, block key) pair.
///
/// The first pair is used for encoding; all of them are tried when decoding.
pub fn codecs_from_pairs(
    pairs: &[(Vec<u8>, Option<Vec<u8>>)],
) -> Result<Vec<Box<dyn Codec>>, CodecError> {
    if pairs.is_empty() {
        return Err(CodecError::NoCodecs);
    }

    pairs
        .iter()
        .map(|(hash_key, block_key)| {
            SecureCookie::new(hash_key, block_key.as_deref())
                .map(|codec| Box::new(codec) as Box<dyn Codec>)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    const HASH_KEY: &[u8] = b"a-very-secret-hash-key-of-32-byt";
    const BLOCK_KEY: &[u8] = b"0123456789abcdef0123456789abcdef";

    fn signed() -> SecureCookie {
        SecureCookie::new(HASH_KEY, None).unwrap()
    }

    fn encrypted() -> SecureCookie {
        SecureCookie::new(HASH_KEY, Some(BLOCK_KEY)).unwrap()
    }

    #[test]
    fn test_signed_roundtrip() {
        let codec = signed();
        let encoded = codec.encode("sess", b"hello").unwrap();
        assert_eq!(codec.decode("sess", &encoded).unwrap(), b"hello");
    }

    #[test]
    fn test_encrypted_roundtrip_hides_plaintext() {
        let codec = encrypted();
        let encoded = codec.encode("sess", b"top secret").unwrap();

        let raw = BASE64URL.decode(encoded.as_bytes()).unwrap();
        assert!(!raw.windows(10).any(|w| w == b"top secret"));
        assert_eq!(codec.decode("sess", &encoded).unwrap(), b"top secret");
    }

    #[test]
    fn test_aes128_block_key() {
        let codec = SecureCookie::new(HASH_KEY, Some(b"0123456789abcdef".as_slice())).unwrap();
        let encoded = codec.encode("sess", b"value").unwrap();
        assert_eq!(codec.decode("sess", &encoded).unwrap(), b"value");
    }

    #[test]
    fn test_invalid_keys() {
        assert!(matches!(
            SecureCookie::new(b"", None),
            Err(CodecError::HashKeyNotSet)
        ));
        assert!(matches!(
            SecureCookie::new(HASH_KEY, Some(b"too-short".as_slice())),
            Err(CodecError::InvalidBlockKey(_))
        ));
    }

    #[test]
    fn test_name_is_bound_to_value() {
        let codec = signed();
        let encoded = codec.encode("sess", b"hello").unwrap();
        assert!(matches!(
            codec.decode("other", &encoded),
            Err(CodecError::MacInvalid)
        ));
    }

    #[test]
    fn test_wrong_key_rejected() {
        let encoded = signed().encode("sess", b"hello").unwrap();
        let other = SecureCookie::new(b"another-hash-key", None).unwrap();
        assert!(matches!(
            other.decode("sess", &encoded),
            Err(CodecError::MacInvalid)
        ));
    }

    #[test]
    fn test_expired_value_rejected() {
        let mut codec = signed();
        codec.set_max_age(3600);
        let now = Utc::now().timestamp();

        let fresh = codec.encode_at("sess", b"v", now - 3599).unwrap();
        assert!(codec.decode_at("sess", &fresh, now).is_ok());

        let stale = codec.encode_at("sess", b"v", now - 3601).unwrap();
        assert!(matches!(
            codec.decode_at("sess", &stale, now),
            Err(CodecError::Expired)
        ));

        codec.set_max_age(0);
        assert!(codec.decode_at("sess", &stale, now).is_ok());
    }

    #[test]
    fn test_max_length() {
        let mut codec = signed();
        codec.set_max_length(64);
        assert!(matches!(
            codec.encode("sess", &[b'x'; 200]),
            Err(CodecError::ValueTooLong { max: 64, .. })
        ));

        codec.set_max_length(0);
        let encoded = codec.encode("sess", &[b'x'; 8000]).unwrap();
        assert!(encoded.len() > DEFAULT_MAX_LENGTH);

        codec.set_max_length(DEFAULT_MAX_LENGTH);
        assert!(matches!(
            codec.decode("sess", &encoded),
            Err(CodecError::ValueTooLong { .. })
        ));
    }

    #[test]
    fn test_garbage_rejected() {
        let codec = signed();
        for value in ["", "not base64!", "YWJj", "MTIzfGFiYw=="] {
            assert!(codec.decode("sess", value).is_err(), "accepted {value:?}");
        }
    }

    #[test]
    fn test_random_keys_differ() {
        let a = generate_random_key(32).unwrap();
        let b = generate_random_key(32).unwrap();
        assert_eq!(a.len(), 32);
        assert_ne!(a, b);
    }

    #[test]
    fn test_codecs_from_pairs() {
        assert!(matches!(codecs_from_pairs(&[]), Err(CodecError::NoCodecs)));

        let codecs = codecs_from_pairs(&[
            (HASH_KEY.to_vec(), Some(BLOCK_KEY.to_vec())),
            (b"old".to_vec(), None),
        ])
        .unwrap();
        assert_eq!(codecs.len(), 2);
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(64))]

        /// Changing any single character of an encoded value makes it undecodable.
        #[test]
        fn property_tampered_value_rejected(
            payload in proptest::collection::vec(any::<u8>(), 0..128),
            index in any::<proptest::sample::Index>(),
            replacement in proptest::char::range('!', '~'),
            encrypt in any::<bool>(),
        ) {
            let codec = if encrypt { encrypted() } else { signed() };
            let encoded = codec.encode("sess", &payload).unwrap();

            let position = index.index(encoded.len());
            let mut chars: Vec<char> = encoded.chars().collect();
            prop_assume!(chars[position] != replacement);
            chars[position] = replacement;
            let tampered: String = chars.into_iter().collect();

            prop_assert!(codec.decode("sess", &tampered).is_err());
        }

        #[test]
        fn property_roundtrip(
            payload in proptest::collection::vec(any::<u8>(), 0..256),
            encrypt in any::<bool>(),
        ) {
            let codec = if encrypt { encrypted() } else { signed() };
            let encoded = codec.encode("sess", &payload).unwrap();
            prop_assert_eq!(codec.decode("sess", &encoded).unwrap(), payload);
        }
    }
}
