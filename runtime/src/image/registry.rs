//! Registry client seam.
//!
//! The assembly engine only needs two things from a registry: the config
//! digest of an image (cheap, manifest only) and a `docker save` style
//! archive of the whole image. [`OciRegistryClient`] provides both on top of
//! `oci-distribution`; tests substitute an in-memory implementation.

use std::fs::File;
use std::path::Path;

use async_trait::async_trait;
use burrow_core::error::{BurrowError, Result};
use burrow_core::{ImageReference, RuntimeConfig};
use oci_distribution::client::{ClientConfig, ClientProtocol};
use oci_distribution::manifest::{ImageIndexEntry, OciDescriptor};
use oci_distribution::secrets::RegistryAuth;
use oci_distribution::{Client, Reference, RegistryOperation};
use sha2::{Digest, Sha256};

use super::layout::MANIFEST_FILE;
use super::manifest::{Manifest, ManifestEntry};

/// Content descriptor of a remote blob.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteDescriptor {
    pub media_type: String,
    /// `sha256:<hex>`
    pub digest: String,
    pub size: i64,
}

impl RemoteDescriptor {
    /// Hex part of the digest.
    pub fn hex(&self) -> &str {
        self.digest.strip_prefix("sha256:").unwrap_or(&self.digest)
    }
}

/// An image as described by its registry manifest.
#[derive(Debug, Clone)]
pub struct RemoteImage {
    pub reference: ImageReference,
    pub config: RemoteDescriptor,
    /// Base layer first
    pub layers: Vec<RemoteDescriptor>,
}

/// Fetches image manifests and archives from a registry.
#[async_trait]
pub trait RegistryClient: Send + Sync {
    /// Resolve `reference` to its manifest. Only the manifest is transferred.
    async fn fetch_manifest(&self, reference: &ImageReference) -> Result<RemoteImage>;

    /// Download every blob of `image` and write a saved-image archive to `dest`.
    async fn save_archive(&self, image: &RemoteImage, dest: &Path) -> Result<()>;
}

/// A blob held in memory.
#[derive(Debug, Clone)]
pub struct Blob {
    /// Full hex digest, without algorithm prefix
    pub hex: String,
    pub data: Vec<u8>,
}

/// Write a saved-image archive: `manifest.json`, `<config>.json` and one
/// `<layer>.tar.gz` per layer.
pub fn write_image_archive(dest: &Path, repo_tag: &str, config: &Blob, layers: &[Blob]) -> Result<()> {
    let manifest = Manifest(vec![ManifestEntry {
        config: format!("{}.json", config.hex),
        repo_tags: Some(vec![repo_tag.to_string()]),
        layers: layers.iter().map(|l| format!("{}.tar.gz", l.hex)).collect(),
    }]);
    let manifest_json = serde_json::to_vec(&manifest)?;

    let file = File::create(dest).map_err(|e| {
        BurrowError::Other(format!("Failed to create archive {}: {}", dest.display(), e))
    })?;
    let mut builder = tar::Builder::new(file);

    let mut append = |name: &str, data: &[u8]| -> std::io::Result<()> {
        let mut header = tar::Header::new_gnu();
        header.set_size(data.len() as u64);
        header.set_mode(0o644);
        header.set_cksum();
        builder.append_data(&mut header, name, data)
    };

    append(MANIFEST_FILE, &manifest_json)?;
    append(&format!("{}.json", config.hex), &config.data)?;
    for layer in layers {
        append(&format!("{}.tar.gz", layer.hex), &layer.data)?;
    }

    builder.into_inner()?.sync_all()?;
    Ok(())
}

/// Registry client backed by `oci-distribution`. Anonymous access only.
pub struct OciRegistryClient {
    client: Client,
    default_registry: String,
}

impl OciRegistryClient {
    pub fn new(config: &RuntimeConfig) -> Self {
        let protocol = if config.insecure_registries.is_empty() {
            ClientProtocol::Https
        } else {
            ClientProtocol::HttpsExcept(config.insecure_registries.clone())
        };
        let client = Client::new(ClientConfig {
            protocol,
            platform_resolver: Some(Box::new(linux_platform_resolver)),
            ..Default::default()
        });

        Self {
            client,
            default_registry: config.default_registry.clone(),
        }
    }

    fn to_oci_reference(&self, reference: &ImageReference) -> Result<Reference> {
        let (registry, repository) = qualify(&reference.name, &self.default_registry);
        let ref_str = format!("{}/{}:{}", registry, repository, reference.tag);
        ref_str.parse::<Reference>().map_err(|e| BurrowError::RegistryError {
            registry,
            message: format!("Invalid reference '{}': {}", ref_str, e),
        })
    }

    async fn pull_verified(
        &self,
        oci_ref: &Reference,
        descriptor: &RemoteDescriptor,
    ) -> Result<Blob> {
        let oci_descriptor = OciDescriptor {
            media_type: descriptor.media_type.clone(),
            digest: descriptor.digest.clone(),
            size: descriptor.size,
            ..Default::default()
        };

        let mut data: Vec<u8> = Vec::new();
        self.client
            .pull_blob(oci_ref, &oci_descriptor, &mut data)
            .await
            .map_err(|e| BurrowError::RegistryError {
                registry: oci_ref.registry().to_string(),
                message: format!("Failed to pull blob {}: {}", descriptor.digest, e),
            })?;

        let actual = hex::encode(Sha256::digest(&data));
        if actual != descriptor.hex() {
            return Err(BurrowError::RegistryError {
                registry: oci_ref.registry().to_string(),
                message: format!(
                    "Digest mismatch for {}: got sha256:{}",
                    descriptor.digest, actual
                ),
            });
        }

        Ok(Blob {
            hex: actual,
            data,
        })
    }
}

#[async_trait]
impl RegistryClient for OciRegistryClient {
    async fn fetch_manifest(&self, reference: &ImageReference) -> Result<RemoteImage> {
        let oci_ref = self.to_oci_reference(reference)?;

        tracing::info!(reference = %oci_ref, "Fetching image manifest");

        let (manifest, manifest_digest) = self
            .client
            .pull_image_manifest(&oci_ref, &RegistryAuth::Anonymous)
            .await
            .map_err(|e| BurrowError::RegistryError {
                registry: oci_ref.registry().to_string(),
                message: format!("Failed to pull manifest: {}", e),
            })?;

        tracing::debug!(
            reference = %oci_ref,
            manifest = %manifest_digest,
            config = %manifest.config.digest,
            layers = manifest.layers.len(),
            "Fetched image manifest"
        );

        let to_remote = |d: &OciDescriptor| RemoteDescriptor {
            media_type: d.media_type.clone(),
            digest: d.digest.clone(),
            size: d.size,
        };

        Ok(RemoteImage {
            reference: reference.clone(),
            config: to_remote(&manifest.config),
            layers: manifest.layers.iter().map(to_remote).collect(),
        })
    }

    async fn save_archive(&self, image: &RemoteImage, dest: &Path) -> Result<()> {
        let oci_ref = self.to_oci_reference(&image.reference)?;

        // Blob pulls reuse the token cached by this call.
        self.client
            .auth(&oci_ref, &RegistryAuth::Anonymous, RegistryOperation::Pull)
            .await
            .map_err(|e| BurrowError::RegistryError {
                registry: oci_ref.registry().to_string(),
                message: format!("Failed to authenticate: {}", e),
            })?;

        let config = self.pull_verified(&oci_ref, &image.config).await?;

        let mut layers = Vec::with_capacity(image.layers.len());
        for layer in &image.layers {
            if layer.media_type.contains("zstd") {
                return Err(BurrowError::RegistryError {
                    registry: oci_ref.registry().to_string(),
                    message: format!("Unsupported layer media type {}", layer.media_type),
                });
            }
            tracing::debug!(digest = %layer.digest, size = layer.size, "Pulling layer");
            layers.push(self.pull_verified(&oci_ref, layer).await?);
        }

        write_image_archive(dest, &image.reference.identity_key(), &config, &layers)?;

        tracing::info!(
            reference = %oci_ref,
            archive = %dest.display(),
            layers = layers.len(),
            "Saved image archive"
        );
        Ok(())
    }
}

/// Split a name into `(registry, repository)`.
///
/// The first path component is a registry host when it contains `.` or `:`
/// or is `localhost`. Docker Hub official images get the `library/` prefix.
fn qualify(name: &str, default_registry: &str) -> (String, String) {
    let (registry, repository) = match name.split_once('/') {
        Some((first, rest))
            if first.contains('.') || first.contains(':') || first == "localhost" =>
        {
            (first.to_string(), rest.to_string())
        }
        _ => (default_registry.to_string(), name.to_string()),
    };

    let repository = if registry == "docker.io" && !repository.contains('/') {
        format!("library/{}", repository)
    } else {
        repository
    };

    (registry, repository)
}

/// Pick the linux image for the host architecture from a multi-platform index.
fn linux_platform_resolver(manifests: &[ImageIndexEntry]) -> Option<String> {
    let arch = match std::env::consts::ARCH {
        "x86_64" => "amd64",
        "aarch64" => "arm64",
        other => other,
    };

    manifests
        .iter()
        .find(|entry| {
            entry
                .platform
                .as_ref()
                .is_some_and(|p| p.os == "linux" && p.architecture == arch)
        })
        .map(|entry| entry.digest.clone())
}
