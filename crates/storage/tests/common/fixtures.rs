use appdistrib_core::{AssetKey, DigestPipeline};
use appdistrib_storage::{AssetStore, StagedFile};
use bytes::Bytes;

pub const TEST_SECRET: &[u8] = b"storage-test-secret";

/// Generate deterministic test data using a seeded pseudo-random generator
/// Same seed produces same output (reproducible tests)
pub fn seeded_bytes(seed: u64, len: usize) -> Bytes {
    let mut data = vec![0u8; len];
    let mut state = seed;

    // Simple LCG (Linear Congruential Generator)
    for chunk in data.chunks_mut(8) {
        state = state.wrapping_mul(6364136223846793005).wrapping_add(1);
        let bytes = state.to_le_bytes();
        for (i, byte) in chunk.iter_mut().enumerate() {
            *byte = bytes[i % 8];
        }
    }

    Bytes::from(data)
}

/// Stage `data` in chunks the way an upload would, returning the finished
/// file and its storage key.
pub async fn stage_bytes(store: &dyn AssetStore, data: &[u8]) -> (StagedFile, AssetKey) {
    let mut pipeline = DigestPipeline::new(TEST_SECRET).unwrap();
    let mut staging = store.stage().await.unwrap();
    for chunk in data.chunks(4096) {
        pipeline.update(chunk);
        staging.write(chunk).await.unwrap();
    }
    let digests = pipeline.finalize();
    (staging.finish().await.unwrap(), digests.key)
}
