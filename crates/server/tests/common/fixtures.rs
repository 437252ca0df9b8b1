//! Test fixtures for generating test data.

use appdistrib_core::{BuildFooter, BuildHeader, BuildId};
use bytes::Bytes;
use sha3::{Digest, Sha3_256};

/// Generate deterministic test data based on a seed.
pub fn seeded_bytes(seed: u64, len: usize) -> Bytes {
    let mut data = vec![0u8; len];
    let mut state = seed;

    for chunk in data.chunks_mut(8) {
        // Simple LCG for deterministic data
        state = state.wrapping_mul(6364136223846793005).wrapping_add(1);
        let bytes = state.to_le_bytes();
        for (i, byte) in chunk.iter_mut().enumerate() {
            *byte = bytes[i % 8];
        }
    }

    Bytes::from(data)
}

/// SHA3-256 of data as lowercase hex.
/// Note: #[allow(dead_code)] because each test file compiles common/ separately.
#[allow(dead_code)]
pub fn sha3_hex(data: &[u8]) -> String {
    Sha3_256::digest(data)
        .iter()
        .map(|b| format!("{:02x}", b))
        .collect()
}

/// Header for `data` uploaded as `filename`, with an optional explicit id.
#[allow(dead_code)]
pub fn header_for(data: &[u8], filename: &str, build_id: Option<u64>) -> BuildHeader {
    BuildHeader {
        build_id: build_id.map(|id| BuildId::new(id).unwrap()),
        file_size: data.len() as u64,
        keep: false,
        filename: filename.to_string(),
        manifest: None,
        changelog: None,
        description: None,
    }
}

/// Footer carrying the correct digest of `data`.
#[allow(dead_code)]
pub fn footer_for(data: &[u8]) -> BuildFooter {
    BuildFooter {
        hash: sha3_hex(data),
    }
}
