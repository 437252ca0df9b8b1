//! Published manifest documents.
//!
//! These are the JSON files the presentation layer reads. Field names are
//! camelCase on the wire.

use crate::build::BuildId;
use crate::hash::AssetHashes;
use serde::{Deserialize, Serialize};
use serde_json::value::RawValue;

/// Validate an uploader-supplied manifest blob.
///
/// Only JSON syntax is checked; the blob has no schema and is embedded
/// verbatim in the published per-build manifest.
pub fn parse_manifest_blob(text: &str) -> crate::Result<Box<RawValue>> {
    RawValue::from_string(text.trim().to_string())
        .map_err(|e| crate::Error::Serialization(format!("manifest is not valid JSON: {e}")))
}

/// `manifests/<org>/<project>/manifest-<id>.json`
#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BuildManifest {
    pub id: BuildId,
    /// Public, forward-slash separated path of the asset alias.
    pub path: String,
    /// The uploader's manifest blob, or null.
    pub manifest: Option<Box<RawValue>>,
    pub size: u64,
    pub hashes: AssetHashes,
    /// Creation time, seconds since the Unix epoch.
    pub created_at: i64,
}

/// Name and description of an organization or project.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Descriptor {
    pub name: String,
    pub description: Option<String>,
}

/// One entry of the project build list.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BuildEntry {
    pub id: BuildId,
    pub created_at: i64,
}

/// `manifests/<org>/<project>/manifest.json`
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProjectManifest {
    pub organization: Descriptor,
    pub project: Descriptor,
    /// Builds, newest id first.
    pub builds: Vec<BuildEntry>,
}

impl ProjectManifest {
    /// Create a manifest, ordering builds by id descending.
    pub fn new(organization: Descriptor, project: Descriptor, mut builds: Vec<BuildEntry>) -> Self {
        builds.sort_by(|a, b| b.id.cmp(&a.id));
        Self {
            organization,
            project,
            builds,
        }
    }
}

/// Render a document as two-space indented JSON.
pub fn to_pretty_json<T: Serialize>(doc: &T) -> crate::Result<Vec<u8>> {
    serde_json::to_vec_pretty(doc).map_err(|e| crate::Error::Serialization(e.to_string()))
}
