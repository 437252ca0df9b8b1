//! Project-bound upload tokens.
//!
//! A token is `tk1_` followed by 32 random bytes in URL-safe base64. Only a
//! keyed hash is ever stored: HMAC-SHA3-256 over the raw token bytes, keyed by
//! the server secret joined with the owning project's key. A token presented
//! against a different project therefore hashes to a different value and never
//! matches.

use base64::Engine;
use base64::engine::general_purpose::{STANDARD, URL_SAFE_NO_PAD};
use hmac::{Hmac, Mac};
use rand::RngCore;
use rand::rngs::OsRng;
use sha3::Sha3_256;

/// Prefix identifying the token format version.
pub const TOKEN_PREFIX: &str = "tk1_";

/// Number of random bytes in a token or project key.
const SECRET_LEN: usize = 32;

/// A freshly minted token. The plaintext is shown once and never stored.
#[derive(Clone, Debug)]
pub struct GeneratedToken {
    pub plaintext: String,
    pub hash: String,
}

fn random_bytes() -> [u8; SECRET_LEN] {
    let mut bytes = [0u8; SECRET_LEN];
    OsRng.fill_bytes(&mut bytes);
    bytes
}

/// Generate a random project key.
pub fn generate_project_key() -> String {
    STANDARD.encode(random_bytes())
}

/// Mint a token for the project identified by `project_key`.
pub fn generate_token(server_secret: &str, project_key: &str) -> crate::Result<GeneratedToken> {
    let plaintext = format!("{TOKEN_PREFIX}{}", URL_SAFE_NO_PAD.encode(random_bytes()));
    let hash = hash_token(server_secret, project_key, &plaintext)?;
    Ok(GeneratedToken { plaintext, hash })
}

/// Compute the stored hash of a presented token.
pub fn hash_token(server_secret: &str, project_key: &str, token: &str) -> crate::Result<String> {
    let raw = decode_token(token)?;
    let key = format!("{server_secret}|{project_key}");
    let mut mac = <Hmac<Sha3_256> as Mac>::new_from_slice(key.as_bytes())
        .map_err(|e| crate::Error::InvalidSecret(e.to_string()))?;
    mac.update(&raw);
    Ok(STANDARD.encode(mac.finalize().into_bytes()))
}

fn decode_token(token: &str) -> crate::Result<Vec<u8>> {
    let body = token
        .strip_prefix(TOKEN_PREFIX)
        .ok_or_else(|| crate::Error::InvalidToken("unrecognized token format".to_string()))?;
    let raw = URL_SAFE_NO_PAD
        .decode(body)
        .map_err(|_| crate::Error::InvalidToken("malformed token".to_string()))?;
    if raw.len() != SECRET_LEN {
        return Err(crate::Error::InvalidToken("malformed token".to_string()));
    }
    Ok(raw)
}
