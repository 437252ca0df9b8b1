//! Storage-root relative paths and name validation.
//!
//! All paths here are forward-slash separated strings relative to the storage
//! root. Backends map them onto their own path type.

use crate::build::BuildId;
use crate::hash::AssetKey;

/// Directory holding content-addressed blobs.
pub const ASSETS_DIR: &str = "assets";
/// Directory holding per-build and per-project manifests.
pub const MANIFESTS_DIR: &str = "manifests";
/// Directory holding per-build changelogs.
pub const CHANGELOGS_DIR: &str = "changelogs";
/// Private directory for in-flight uploads.
pub const STAGING_DIR: &str = "staging";
/// Suffix of the canonical blob file.
pub const BLOB_SUFFIX: &str = ".data";

/// Maximum filename length in bytes.
const MAX_FILENAME_LEN: usize = 255;
/// Maximum organization/project identifier length.
const MAX_IDENTIFIER_LEN: usize = 64;

/// Validate an uploader-supplied display filename.
///
/// Filenames become a directory entry next to the blob, so they must be a
/// single path component.
pub fn validate_filename(filename: &str) -> crate::Result<()> {
    if filename.is_empty() {
        return Err(crate::Error::InvalidFilename(
            "filename must not be empty".to_string(),
        ));
    }
    if filename.len() > MAX_FILENAME_LEN {
        return Err(crate::Error::InvalidFilename(format!(
            "filename exceeds {MAX_FILENAME_LEN} bytes"
        )));
    }
    if filename == "." || filename == ".." {
        return Err(crate::Error::InvalidFilename(format!(
            "reserved filename: {filename}"
        )));
    }
    if filename.contains(['/', '\\', '\0']) {
        return Err(crate::Error::InvalidFilename(format!(
            "filename must not contain path separators: {filename}"
        )));
    }
    Ok(())
}

/// Validate an organization or project identifier.
///
/// Identifiers are used verbatim as path segments under `manifests/` and
/// `changelogs/`.
pub fn validate_identifier(id: &str) -> crate::Result<()> {
    if id.is_empty() || id.len() > MAX_IDENTIFIER_LEN {
        return Err(crate::Error::InvalidIdentifier(format!(
            "identifier must be 1-{MAX_IDENTIFIER_LEN} characters: {id:?}"
        )));
    }
    if id.starts_with('.') {
        return Err(crate::Error::InvalidIdentifier(format!(
            "identifier must not start with '.': {id}"
        )));
    }
    if !id
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'))
    {
        return Err(crate::Error::InvalidIdentifier(format!(
            "identifier may only contain [A-Za-z0-9._-]: {id}"
        )));
    }
    Ok(())
}

/// Leaf directory of a key, holding its filename aliases.
pub fn asset_leaf_dir(key: &AssetKey) -> String {
    let [k1, k2, k3, k4] = key.shard_segments();
    format!("{ASSETS_DIR}/{k1}/{k2}/{k3}/{k4}")
}

/// Canonical blob path of a key.
pub fn asset_blob_path(key: &AssetKey) -> String {
    format!("{}{BLOB_SUFFIX}", asset_leaf_dir(key))
}

/// Human-readable alias of a key.
pub fn asset_alias_path(key: &AssetKey, filename: &str) -> String {
    format!("{}/{filename}", asset_leaf_dir(key))
}

/// Public URL path of an asset alias, as published in build manifests.
pub fn public_asset_path(prefix: &str, key: &AssetKey, filename: &str) -> String {
    let prefix = prefix.trim_end_matches('/');
    format!("{prefix}/{}", asset_alias_path(key, filename))
}

/// Per-build manifest path.
pub fn build_manifest_path(organization: &str, project: &str, build_id: BuildId) -> String {
    format!("{MANIFESTS_DIR}/{organization}/{project}/manifest-{build_id}.json")
}

/// Per-project manifest path.
pub fn project_manifest_path(organization: &str, project: &str) -> String {
    format!("{MANIFESTS_DIR}/{organization}/{project}/manifest.json")
}

/// Per-build changelog path.
pub fn changelog_path(organization: &str, project: &str, build_id: BuildId) -> String {
    format!("{CHANGELOGS_DIR}/{organization}/{project}/changelog-{build_id}.md")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key() -> AssetKey {
        AssetKey::from_bytes([0x01; 32])
    }

    #[test]
    fn test_asset_paths_share_leaf() {
        let key = key();
        let leaf = asset_leaf_dir(&key);
        assert_eq!(
            leaf,
            "assets/010/101/010/1010101010101010101010101010101010101010101010101010101"
        );
        assert_eq!(asset_blob_path(&key), format!("{leaf}.data"));
        assert_eq!(asset_alias_path(&key, "app.zip"), format!("{leaf}/app.zip"));
    }

    #[test]
    fn test_public_path_is_forward_slashed() {
        let key = key();
        let path = public_asset_path("/storage/", &key, "app.zip");
        assert!(path.starts_with("/storage/assets/010/101/010/"));
        assert!(path.ends_with("/app.zip"));
        assert!(!path.contains("//"));
    }

    #[test]
    fn test_document_paths() {
        let id = BuildId::new(12).unwrap();
        assert_eq!(
            build_manifest_path("acme", "app", id),
            "manifests/acme/app/manifest-12.json"
        );
        assert_eq!(
            project_manifest_path("acme", "app"),
            "manifests/acme/app/manifest.json"
        );
        assert_eq!(
            changelog_path("acme", "app", id),
            "changelogs/acme/app/changelog-12.md"
        );
    }

    #[test]
    fn test_validate_filename() {
        assert!(validate_filename("app-1.2.3.zip").is_ok());
        assert!(validate_filename("").is_err());
        assert!(validate_filename(".").is_err());
        assert!(validate_filename("..").is_err());
        assert!(validate_filename("a/b").is_err());
        assert!(validate_filename("a\\b").is_err());
        assert!(validate_filename(&"x".repeat(256)).is_err());
    }

    #[test]
    fn test_validate_identifier() {
        assert!(validate_identifier("acme").is_ok());
        assert!(validate_identifier("my_app-2.0").is_ok());
        assert!(validate_identifier("").is_err());
        assert!(validate_identifier(".hidden").is_err());
        assert!(validate_identifier("a/b").is_err());
        assert!(validate_identifier("a b").is_err());
    }
}
