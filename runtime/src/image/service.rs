//! Image assembly: resolve a reference to a fully unpacked local image.
//!
//! Resolution is cache-first. A store hit returns immediately; otherwise the
//! manifest is fetched to learn the content address, identical content
//! cached under another name is reused, and only a true miss downloads and
//! unpacks the image. The store binding is written last, so a digest named
//! by the store always has complete layer and metadata directories.

use std::path::Path;
use std::sync::Arc;

use burrow_core::error::{BurrowError, Result};
use burrow_core::{ImageReference, PathLayout};

use super::layers::{commit_staged, extract_layer, install_layer, staging_dir};
use super::layout::{ImageLayout, MANIFEST_FILE};
use super::manifest::{layer_key, short_digest, ImageMetadata, Manifest};
use super::registry::{RegistryClient, RemoteImage};
use super::store::LayerStore;

/// File name of the saved archive inside a pull workspace.
const ARCHIVE_FILE: &str = "package.tar";

/// Image assembly engine.
pub struct ImageService {
    layout: ImageLayout,
    store: LayerStore,
    registry: Arc<dyn RegistryClient>,
}

impl ImageService {
    pub fn new(paths: &PathLayout, registry: Arc<dyn RegistryClient>) -> Result<Self> {
        let layout = ImageLayout::new(paths);
        let store = LayerStore::open(layout.store_path())?;
        Ok(Self {
            layout,
            store,
            registry,
        })
    }

    pub fn layout(&self) -> &ImageLayout {
        &self.layout
    }

    pub fn store(&self) -> &LayerStore {
        &self.store
    }

    /// Resolve `reference` to a local image, pulling and unpacking on a miss.
    pub async fn resolve(&self, reference: &ImageReference) -> Result<ImageReference> {
        let key = reference.identity_key();

        if self.store.has(reference)? {
            let stored = self.store.get(reference)?;
            tracing::info!(
                image = %key,
                digest = %stored.digest().unwrap_or_default(),
                "Using cached image"
            );
            return Ok(stored);
        }

        let remote = self.registry.fetch_manifest(reference).await?;
        let digest = short_digest(remote.config.hex())?;
        let resolved = ImageReference::new(&reference.name, &reference.tag).with_digest(&digest);

        if let Some(existing) = self.store.find_by_digest(&digest)? {
            tracing::info!(
                image = %key,
                digest = %digest,
                existing = %existing.identity_key(),
                "Image content already cached under different reference"
            );
            self.store.put(&resolved)?;
            return Ok(resolved);
        }

        self.assemble(&remote, &digest).await?;
        self.store.put(&resolved)?;

        tracing::info!(image = %key, digest = %digest, "Image assembled");
        Ok(resolved)
    }

    /// Saved manifest of a resolved image. No network access.
    pub fn manifest(&self, reference: &ImageReference) -> Result<Manifest> {
        self.layout.manifest(reference)
    }

    /// Config metadata of a resolved image. No network access.
    pub fn metadata(&self, reference: &ImageReference) -> Result<ImageMetadata> {
        self.layout.metadata(reference)
    }

    /// Download into a private workspace and unpack into the images root.
    async fn assemble(&self, remote: &RemoteImage, digest: &str) -> Result<()> {
        std::fs::create_dir_all(self.layout.temp_root())?;
        let workspace = tempfile::Builder::new()
            .prefix(&format!("{digest}-"))
            .tempdir_in(self.layout.temp_root())
            .map_err(|e| {
                BurrowError::Other(format!(
                    "Failed to create pull workspace in {}: {}",
                    self.layout.temp_root().display(),
                    e
                ))
            })?;

        let archive = workspace.path().join(ARCHIVE_FILE);
        tracing::info!(
            image = %remote.reference.identity_key(),
            digest = %digest,
            workspace = %workspace.path().display(),
            "Pulling image"
        );
        self.registry.save_archive(remote, &archive).await?;

        let layout = self.layout.clone();
        let workspace_path = workspace.path().to_path_buf();
        let digest_owned = digest.to_string();
        let installed = tokio::task::spawn_blocking(move || {
            unpack_image(&layout, &archive, &workspace_path, &digest_owned)
        })
        .await
        .map_err(|e| BurrowError::Other(format!("Image unpack task failed: {}", e)))??;

        let workspace_path = workspace.path().to_path_buf();
        workspace.close().map_err(|e| {
            BurrowError::Other(format!(
                "Failed to remove pull workspace {}: {}",
                workspace_path.display(),
                e
            ))
        })?;

        tracing::debug!(digest = %digest, layers = installed, "Unpacked image layers");
        Ok(())
    }
}

/// Unpack a saved-image archive and install its layers and metadata.
///
/// Returns the number of layers newly extracted.
fn unpack_image(layout: &ImageLayout, archive: &Path, workspace: &Path, digest: &str) -> Result<usize> {
    extract_layer(archive, workspace)?;

    let manifest_path = workspace.join(MANIFEST_FILE);
    let manifest_bytes = std::fs::read(&manifest_path).map_err(|e| {
        BurrowError::InvalidManifestError(format!(
            "archive has no {}: {}",
            MANIFEST_FILE, e
        ))
    })?;
    let manifest = Manifest::from_slice(&manifest_bytes)?;
    let entry = manifest.validate()?;

    let mut installed = 0;
    for layer in &entry.layers {
        let key = layer_key(layer)?;
        if install_layer(&workspace.join(layer), layout.images_root(), &key)? {
            installed += 1;
        }
    }

    let image_dir = layout.image_dir(digest);
    if !image_dir.exists() {
        let config_src = workspace.join(&entry.config);
        if !config_src.exists() {
            return Err(BurrowError::NotFoundError(format!(
                "image config {} missing from archive",
                entry.config
            )));
        }

        let staging = staging_dir(layout.images_root())?;
        std::fs::write(staging.path().join(MANIFEST_FILE), &manifest_bytes)?;
        std::fs::copy(&config_src, staging.path().join(format!("{digest}.json")))?;
        commit_staged(staging, &image_dir)?;
    }

    Ok(installed)
}
