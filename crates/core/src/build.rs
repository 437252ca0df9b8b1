//! Build identifiers.

use serde::{Deserialize, Deserializer, Serialize};
use std::fmt;

/// A positive, per-project build number.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(transparent)]
pub struct BuildId(u64);

impl BuildId {
    /// The first id handed out in a project.
    pub const FIRST: BuildId = BuildId(1);

    /// Create a build id, rejecting zero and values that do not fit the
    /// metadata store's signed 64-bit column.
    pub fn new(id: u64) -> crate::Result<Self> {
        if id == 0 {
            return Err(crate::Error::InvalidBuildId(
                "build id must be positive".to_string(),
            ));
        }
        if id > i64::MAX as u64 {
            return Err(crate::Error::InvalidBuildId(format!(
                "build id {id} is out of range"
            )));
        }
        Ok(Self(id))
    }

    /// Convert from the metadata store's column type.
    pub fn from_i64(id: i64) -> crate::Result<Self> {
        u64::try_from(id)
            .map_err(|_| crate::Error::InvalidBuildId(format!("negative build id: {id}")))
            .and_then(Self::new)
    }

    /// Get the numeric value.
    pub fn get(&self) -> u64 {
        self.0
    }

    /// Value for binding into the metadata store.
    pub fn as_i64(&self) -> i64 {
        // Construction guarantees the value fits.
        self.0 as i64
    }

    /// The id following this one.
    pub fn next(&self) -> crate::Result<Self> {
        Self::new(self.0 + 1)
    }
}

impl fmt::Display for BuildId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl<'de> Deserialize<'de> for BuildId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = u64::deserialize(deserializer)?;
        BuildId::new(raw).map_err(serde::de::Error::custom)
    }
}
