//! Bearer secret shapes, generation and digest comparison.
//!
//! Session token: `{ID}{secret}`, 12 + 24 alphanumeric characters.
//! Access key:    `{KeyID}.{secret}`, 10 + 1 + 24 characters.
//!
//! The two shapes never overlap (36 vs 35 characters, and only the access
//! key carries a dot), so classification is purely structural.

use crate::error::{Error, Result};
use rand::distributions::Alphanumeric;
use rand::rngs::OsRng;
use rand::Rng;
use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;

pub const KEY_ID_LEN: usize = 10;
pub const KEY_SECRET_LEN: usize = 24;
pub const TOKEN_ID_LEN: usize = 12;
pub const TOKEN_SECRET_LEN: usize = 24;

/// A bearer string split into its lookup ID and secret segment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Bearer<'a> {
    SessionToken { id: &'a str, secret: &'a str },
    AccessKey { key_id: &'a str, secret: &'a str },
}

/// Random alphanumeric string from the OS CSPRNG.
pub fn generate_secret(len: usize) -> String {
    OsRng
        .sample_iter(&Alphanumeric)
        .take(len)
        .map(char::from)
        .collect()
}

/// SHA-256 of a secret segment. This is what gets stored.
pub fn digest(secret: &str) -> Vec<u8> {
    Sha256::digest(secret.as_bytes()).to_vec()
}

/// Constant-time comparison of a stored digest with the digest of `secret`.
pub fn digest_matches(stored: &[u8], secret: &str) -> bool {
    stored.ct_eq(&digest(secret)).into()
}

fn is_alphanumeric(s: &str) -> bool {
    s.bytes().all(|b| b.is_ascii_alphanumeric())
}

/// Splits `{KeyID}.{secret}`. Used both for inbound bearers and for
/// pre-provisioned keys in the desired-state document.
pub fn parse_access_key(key: &str) -> Result<(&str, &str)> {
    let (key_id, secret) = key
        .split_once('.')
        .ok_or_else(|| Error::validation("access key", "format", "must be {KeyID}.{secret}"))?;

    if key_id.len() != KEY_ID_LEN || !is_alphanumeric(key_id) {
        return Err(Error::validation(
            "access key",
            "key id",
            format!("must be {} alphanumeric characters", KEY_ID_LEN),
        ));
    }
    if secret.len() != KEY_SECRET_LEN || !is_alphanumeric(secret) {
        return Err(Error::validation(
            "access key",
            "secret",
            format!("must be {} alphanumeric characters", KEY_SECRET_LEN),
        ));
    }
    Ok((key_id, secret))
}

/// Decides which credential kind a bearer string is by shape alone.
pub fn classify(bearer: &str) -> Result<Bearer<'_>> {
    if bearer.len() == TOKEN_ID_LEN + TOKEN_SECRET_LEN && is_alphanumeric(bearer) {
        let (id, secret) = bearer.split_at(TOKEN_ID_LEN);
        return Ok(Bearer::SessionToken { id, secret });
    }

    match parse_access_key(bearer) {
        Ok((key_id, secret)) => Ok(Bearer::AccessKey { key_id, secret }),
        Err(_) => Err(Error::Authentication),
    }
}
