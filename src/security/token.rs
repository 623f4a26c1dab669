//! Signed, timestamped CSRF tokens.
//!
//! Wire form: `<timestamp>.<nonce>.<signature>` where
//! - `timestamp` is milliseconds since the Unix epoch in lowercase base-36,
//! - `nonce` is 32 bytes from the OS RNG, hex encoded,
//! - `signature` is hex HMAC-SHA256 over `timestamp.nonce`.
//!
//! Verification is self-contained: no server-side token store.

use std::fmt;
use std::sync::Arc;

use hmac::{Hmac, Mac};
use rand::{rngs::OsRng, RngCore};
use sha2::Sha256;
use subtle::ConstantTimeEq;
use thiserror::Error;

use crate::security::unix_millis;

type HmacSha256 = Hmac<Sha256>;

/// Nonce size in bytes.
pub const NONCE_BYTES: usize = 32;

/// Default token lifetime: 24 hours.
pub const DEFAULT_TTL_MS: u64 = 24 * 60 * 60 * 1000;

/// Why a token was refused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum TokenError {
    #[error("missing CSRF token")]
    Empty,

    #[error("invalid CSRF token format")]
    Malformed,

    #[error("invalid CSRF token signature")]
    BadSignature,

    #[error("CSRF token expired")]
    Expired,

    #[error("CSRF signing key rejected")]
    Key,
}

/// A token split into its three fields. Borrowed from the input string.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SignedToken<'a> {
    pub timestamp: &'a str,
    pub nonce: &'a str,
    pub signature: &'a str,
}

impl<'a> SignedToken<'a> {
    /// Split into exactly three non-empty dot-separated fields.
    pub fn parse(token: &'a str) -> Result<Self, TokenError> {
        if token.is_empty() {
            return Err(TokenError::Empty);
        }
        let mut parts = token.split('.');
        match (parts.next(), parts.next(), parts.next(), parts.next()) {
            (Some(timestamp), Some(nonce), Some(signature), None)
                if !timestamp.is_empty() && !nonce.is_empty() && !signature.is_empty() =>
            {
                Ok(Self {
                    timestamp,
                    nonce,
                    signature,
                })
            }
            _ => Err(TokenError::Malformed),
        }
    }

    /// Issue time in milliseconds since the epoch.
    pub fn issued_at_ms(&self) -> Result<u64, TokenError> {
        decode_base36(self.timestamp).ok_or(TokenError::Malformed)
    }
}

impl fmt::Display for SignedToken<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.timestamp, self.nonce, self.signature)
    }
}

/// Generates and verifies tokens under one process-wide key.
#[derive(Clone)]
pub struct TokenCodec {
    secret: Arc<[u8]>,
    ttl_ms: u64,
}

impl fmt::Debug for TokenCodec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TokenCodec")
            .field("secret", &"<redacted>")
            .field("ttl_ms", &self.ttl_ms)
            .finish()
    }
}

impl TokenCodec {
    pub fn new(secret: impl AsRef<[u8]>, ttl_ms: u64) -> Self {
        Self {
            secret: Arc::from(secret.as_ref()),
            ttl_ms,
        }
    }

    pub fn ttl_ms(&self) -> u64 {
        self.ttl_ms
    }

    /// Issue a fresh token stamped with the current time.
    pub fn generate(&self) -> Result<String, TokenError> {
        self.generate_at(unix_millis())
    }

    pub fn generate_at(&self, now_ms: u64) -> Result<String, TokenError> {
        let mut nonce = [0u8; NONCE_BYTES];
        OsRng.fill_bytes(&mut nonce);
        self.seal(&encode_base36(now_ms), &hex::encode(nonce))
    }

    /// Sign `timestamp.nonce` and append the signature.
    fn seal(&self, timestamp: &str, nonce: &str) -> Result<String, TokenError> {
        let signature = self.sign(timestamp, nonce)?;
        Ok(SignedToken {
            timestamp,
            nonce,
            signature: &signature,
        }
        .to_string())
    }

    fn sign(&self, timestamp: &str, nonce: &str) -> Result<String, TokenError> {
        let mut mac = HmacSha256::new_from_slice(&self.secret).map_err(|_| TokenError::Key)?;
        mac.update(timestamp.as_bytes());
        mac.update(b".");
        mac.update(nonce.as_bytes());
        Ok(hex::encode(mac.finalize().into_bytes()))
    }

    /// Boolean view of [`TokenCodec::check`].
    pub fn verify(&self, token: &str) -> bool {
        self.check(token).is_ok()
    }

    pub fn check(&self, token: &str) -> Result<(), TokenError> {
        self.check_at(token, unix_millis())
    }

    /// Signature first, then age. A token older than the TTL is refused even
    /// when its signature is intact.
    pub fn check_at(&self, token: &str, now_ms: u64) -> Result<(), TokenError> {
        let parsed = SignedToken::parse(token)?;
        let expected = self.sign(parsed.timestamp, parsed.nonce)?;

        if !constant_time_eq(parsed.signature.as_bytes(), expected.as_bytes()) {
            return Err(TokenError::BadSignature);
        }

        let issued = parsed.issued_at_ms()?;
        if now_ms.saturating_sub(issued) > self.ttl_ms {
            return Err(TokenError::Expired);
        }
        Ok(())
    }
}

/// Byte comparison whose timing does not depend on where inputs differ.
/// Length mismatch returns early; only the fixed-length HMAC hex is compared.
pub fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    a.len() == b.len() && bool::from(a.ct_eq(b))
}

fn encode_base36(mut n: u64) -> String {
    const DIGITS: &[u8; 36] = b"0123456789abcdefghijklmnopqrstuvwxyz";
    if n == 0 {
        return "0".to_string();
    }
    let mut buf = Vec::with_capacity(13);
    while n > 0 {
        buf.push(DIGITS[(n % 36) as usize]);
        n /= 36;
    }
    buf.reverse();
    String::from_utf8(buf).unwrap_or_default()
}

/// Strict lowercase base-36; rejects signs, uppercase and overflow.
fn decode_base36(s: &str) -> Option<u64> {
    if s.is_empty() || !s.bytes().all(|b| b.is_ascii_digit() || b.is_ascii_lowercase()) {
        return None;
    }
    u64::from_str_radix(s, 36).ok()
}
