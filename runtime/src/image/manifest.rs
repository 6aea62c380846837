//! Saved-image manifest and image config metadata.
//!
//! `manifest.json` follows the `docker save` layout: a JSON array of
//! `{Config, RepoTags, Layers}` entries. Layers are listed base first.

use burrow_core::error::{BurrowError, Result};
use serde::{Deserialize, Serialize};

/// Length of the truncated hex content address used for on-disk keys.
///
/// Twelve hex characters is 48 bits. On a single host the chance of two
/// distinct digests sharing a prefix is small but nonzero, and a collision
/// would silently alias two images or layers.
pub const SHORT_DIGEST_LEN: usize = 12;

/// One entry of a saved-image manifest.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ManifestEntry {
    /// Config blob file name inside the archive
    pub config: String,
    #[serde(default)]
    pub repo_tags: Option<Vec<String>>,
    /// Layer archive file names, base first
    #[serde(default)]
    pub layers: Vec<String>,
}

/// A saved-image manifest.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Manifest(pub Vec<ManifestEntry>);

impl Manifest {
    pub fn from_slice(data: &[u8]) -> Result<Self> {
        serde_json::from_slice(data)
            .map_err(|e| BurrowError::InvalidManifestError(format!("failed to parse manifest: {}", e)))
    }

    /// The single entry of a valid manifest.
    ///
    /// Multi-entry manifests are rejected rather than picking one.
    pub fn validate(&self) -> Result<&ManifestEntry> {
        match self.0.as_slice() {
            [] => Err(BurrowError::InvalidManifestError(
                "manifest has no entries".to_string(),
            )),
            [entry] if entry.layers.is_empty() => Err(BurrowError::InvalidManifestError(
                "could not find any layers".to_string(),
            )),
            [entry] => Ok(entry),
            entries => Err(BurrowError::InvalidManifestError(format!(
                "expected exactly one manifest entry, found {}",
                entries.len()
            ))),
        }
    }

    /// Layer keys in manifest order (base first).
    pub fn layer_keys(&self) -> Result<Vec<String>> {
        self.validate()?
            .layers
            .iter()
            .map(|layer| layer_key(layer))
            .collect()
    }
}

/// Truncated content address of a full hex digest.
pub fn short_digest(hex_digest: &str) -> Result<String> {
    let hex_digest = hex_digest.strip_prefix("sha256:").unwrap_or(hex_digest);
    let prefix = hex_digest.get(..SHORT_DIGEST_LEN).ok_or_else(|| {
        BurrowError::InvalidManifestError(format!("digest too short: {:?}", hex_digest))
    })?;
    if !prefix.chars().all(|c| c.is_ascii_hexdigit()) {
        return Err(BurrowError::InvalidManifestError(format!(
            "digest is not hex: {:?}",
            hex_digest
        )));
    }
    Ok(prefix.to_ascii_lowercase())
}

/// Directory key for a manifest `Layers` entry.
///
/// Accepts `<hex>.tar.gz`, `<hex>/layer.tar`, `sha256:<hex>` and
/// `blobs/sha256/<hex>`.
pub fn layer_key(entry: &str) -> Result<String> {
    let entry = entry.strip_prefix("blobs/sha256/").unwrap_or(entry);
    short_digest(entry)
}

/// Image config subset used to seed the container process.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageMetadata {
    #[serde(default)]
    pub config: ProcessConfig,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ProcessConfig {
    #[serde(default)]
    pub env: Option<Vec<String>>,
    #[serde(default)]
    pub cmd: Option<Vec<String>>,
}

impl ImageMetadata {
    pub fn from_slice(data: &[u8]) -> Result<Self> {
        Ok(serde_json::from_slice(data)?)
    }

    /// `KEY=VALUE` environment declared by the image.
    pub fn env(&self) -> &[String] {
        self.config.env.as_deref().unwrap_or_default()
    }

    /// Default command declared by the image.
    pub fn cmd(&self) -> &[String] {
        self.config.cmd.as_deref().unwrap_or_default()
    }
}
