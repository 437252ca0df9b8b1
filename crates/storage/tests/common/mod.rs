pub mod fixtures;

#[allow(unused_imports)]
pub use fixtures::{TEST_SECRET, seeded_bytes, stage_bytes};
