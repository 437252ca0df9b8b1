//! Digest types and the single-pass digest pipeline.
//!
//! Every uploaded artifact is hashed exactly once, while it streams in. The
//! pipeline feeds each chunk to five accumulators: CRC-32, MD5, SHA-1,
//! SHA3-256 and a keyed HMAC-SHA3-256. The keyed digest becomes the storage
//! address, so the presence of a known blob cannot be probed by guessing its
//! plain content hash.

use base64::Engine;
use hmac::{Hmac, Mac};
use md5::Md5;
use serde::{Deserialize, Serialize};
use sha1::Sha1;
use sha3::{Digest, Sha3_256};
use std::fmt;

type HmacSha3 = Hmac<Sha3_256>;

/// Encode bytes as lowercase hex.
pub fn to_hex(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}

fn parse_hex_32(s: &str) -> std::result::Result<[u8; 32], String> {
    if s.len() != 64 {
        return Err(format!("expected 64 hex chars, got {}", s.len()));
    }
    // from_str_radix would also accept a sign prefix such as "+f".
    if let Some(bad) = s.chars().find(|c| !c.is_ascii_hexdigit()) {
        return Err(format!("invalid hex character {bad:?}"));
    }
    let mut bytes = [0u8; 32];
    for (i, chunk) in s.as_bytes().chunks(2).enumerate() {
        let hex_str = std::str::from_utf8(chunk).map_err(|e| e.to_string())?;
        bytes[i] = u8::from_str_radix(hex_str, 16).map_err(|e| e.to_string())?;
    }
    Ok(bytes)
}

/// A SHA3-256 integrity digest.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct Sha3Digest([u8; 32]);

impl Sha3Digest {
    /// Create from raw bytes.
    pub fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    /// Get the raw bytes.
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// Compute the SHA3-256 digest of data.
    pub fn compute(data: &[u8]) -> Self {
        Self(Sha3_256::digest(data).into())
    }

    /// Parse from a 64-character hex string.
    pub fn from_hex(s: &str) -> crate::Result<Self> {
        parse_hex_32(s)
            .map(Self)
            .map_err(crate::Error::InvalidHash)
    }

    /// Encode as lowercase hex string.
    pub fn to_hex(&self) -> String {
        to_hex(&self.0)
    }
}

impl fmt::Debug for Sha3Digest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Sha3Digest({})", &self.to_hex()[..16])
    }
}

impl fmt::Display for Sha3Digest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

/// The storage address of an asset: a 32-byte keyed digest of its content.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct AssetKey([u8; 32]);

impl AssetKey {
    /// Create from raw bytes.
    pub fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    /// Get the raw bytes.
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// Parse from a 64-character hex string.
    pub fn from_hex(s: &str) -> crate::Result<Self> {
        parse_hex_32(s).map(Self).map_err(crate::Error::InvalidKey)
    }

    /// Encode as lowercase hex string. This is the asset id in metadata.
    pub fn to_hex(&self) -> String {
        to_hex(&self.0)
    }

    /// Encode as standard base64. This is the key returned to uploaders.
    pub fn to_base64(&self) -> String {
        base64::engine::general_purpose::STANDARD.encode(self.0)
    }

    /// Parse from standard base64.
    pub fn from_base64(s: &str) -> crate::Result<Self> {
        let bytes = base64::engine::general_purpose::STANDARD
            .decode(s)
            .map_err(|e| crate::Error::InvalidKey(e.to_string()))?;
        let arr: [u8; 32] = bytes.as_slice().try_into().map_err(|_| {
            crate::Error::InvalidKey(format!("expected 32 bytes, got {}", bytes.len()))
        })?;
        Ok(Self(arr))
    }

    /// Split the hex form into the 3/3/3/rest shard segments.
    pub fn shard_segments(&self) -> [String; 4] {
        let hex = self.to_hex();
        [
            hex[0..3].to_string(),
            hex[3..6].to_string(),
            hex[6..9].to_string(),
            hex[9..].to_string(),
        ]
    }
}

impl fmt::Debug for AssetKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "AssetKey({})", &self.to_hex()[..16])
    }
}

impl fmt::Display for AssetKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

/// Checksum and integrity digests of an asset, hex encoded.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssetHashes {
    pub crc32: String,
    pub md5: String,
    pub sha1: String,
    pub sha3: String,
}

/// Finalized output of a [`DigestPipeline`].
#[derive(Clone, Debug)]
pub struct Digests {
    /// Keyed digest used as the storage address.
    pub key: AssetKey,
    /// Integrity digest compared against the uploader's claim.
    pub sha3: Sha3Digest,
    /// All published digests.
    pub hashes: AssetHashes,
    /// Number of bytes fed through the pipeline.
    pub size: u64,
}

/// Incremental multi-digest hasher.
///
/// Chunks must be fed in stream order; there is no way to reorder them after
/// the fact.
pub struct DigestPipeline {
    crc32: crc32fast::Hasher,
    md5: Md5,
    sha1: Sha1,
    sha3: Sha3_256,
    keyed: HmacSha3,
    size: u64,
}

impl DigestPipeline {
    /// Create a pipeline whose keyed digest is derived from `secret`.
    pub fn new(secret: &[u8]) -> crate::Result<Self> {
        if secret.is_empty() {
            return Err(crate::Error::InvalidSecret(
                "storage secret must not be empty".to_string(),
            ));
        }
        let keyed = <HmacSha3 as Mac>::new_from_slice(secret)
            .map_err(|e| crate::Error::InvalidSecret(e.to_string()))?;

        Ok(Self {
            crc32: crc32fast::Hasher::new(),
            md5: Md5::new(),
            sha1: Sha1::new(),
            sha3: Sha3_256::new(),
            keyed,
            size: 0,
        })
    }

    /// Feed the next chunk to every accumulator.
    pub fn update(&mut self, data: &[u8]) {
        self.crc32.update(data);
        Digest::update(&mut self.md5, data);
        Digest::update(&mut self.sha1, data);
        Digest::update(&mut self.sha3, data);
        Mac::update(&mut self.keyed, data);
        self.size += data.len() as u64;
    }

    /// Bytes consumed so far.
    pub fn bytes_consumed(&self) -> u64 {
        self.size
    }

    /// Finalize all accumulators.
    pub fn finalize(self) -> Digests {
        let crc32 = self.crc32.finalize();
        let md5 = self.md5.finalize();
        let sha1 = self.sha1.finalize();
        let sha3 = Sha3Digest(self.sha3.finalize().into());
        let key = AssetKey(self.keyed.finalize().into_bytes().into());

        Digests {
            key,
            sha3,
            hashes: AssetHashes {
                crc32: to_hex(&crc32.to_be_bytes()),
                md5: to_hex(&md5),
                sha1: to_hex(&sha1),
                sha3: sha3.to_hex(),
            },
            size: self.size,
        }
    }
}

/// Compute the keyed storage address of a complete buffer.
pub fn keyed_digest(secret: &[u8], data: &[u8]) -> crate::Result<AssetKey> {
    let mut pipeline = DigestPipeline::new(secret)?;
    pipeline.update(data);
    Ok(pipeline.finalize().key)
}
