//! On-disk layout of the images root and pure lookups against it.

use std::path::{Path, PathBuf};

use burrow_core::error::{BurrowError, Result};
use burrow_core::{ImageReference, PathLayout};

use super::manifest::{ImageMetadata, Manifest};

/// Layer store index file name.
pub const STORE_FILE: &str = "images.json";

/// Saved-manifest file name inside an image directory.
pub const MANIFEST_FILE: &str = "manifest.json";

/// Paths under the images root.
#[derive(Debug, Clone)]
pub struct ImageLayout {
    images_root: PathBuf,
    temp_root: PathBuf,
}

impl ImageLayout {
    pub fn new(paths: &PathLayout) -> Self {
        Self {
            images_root: paths.images(),
            temp_root: paths.temp(),
        }
    }

    pub fn images_root(&self) -> &Path {
        &self.images_root
    }

    pub fn temp_root(&self) -> &Path {
        &self.temp_root
    }

    pub fn store_path(&self) -> PathBuf {
        self.images_root.join(STORE_FILE)
    }

    /// `<images>/<digest>/`
    pub fn image_dir(&self, digest: &str) -> PathBuf {
        self.images_root.join(digest)
    }

    /// `<images>/<digest>/manifest.json`
    pub fn manifest_path(&self, digest: &str) -> PathBuf {
        self.image_dir(digest).join(MANIFEST_FILE)
    }

    /// `<images>/<digest>/<digest>.json`
    pub fn config_path(&self, digest: &str) -> PathBuf {
        self.image_dir(digest).join(format!("{digest}.json"))
    }

    /// `<images>/<layer>/`
    pub fn layer_dir(&self, layer_key: &str) -> PathBuf {
        self.images_root.join(layer_key)
    }

    /// `<images>/<layer>/fs/`
    pub fn layer_fs_dir(&self, layer_key: &str) -> PathBuf {
        self.layer_dir(layer_key).join("fs")
    }

    /// Saved manifest of a resolved image.
    pub fn manifest(&self, reference: &ImageReference) -> Result<Manifest> {
        let path = self.manifest_path(require_digest(reference)?);
        let data = read_metadata_file(&path, reference, "manifest")?;
        Manifest::from_slice(&data)
    }

    /// Config metadata of a resolved image.
    pub fn metadata(&self, reference: &ImageReference) -> Result<ImageMetadata> {
        let path = self.config_path(require_digest(reference)?);
        let data = read_metadata_file(&path, reference, "config")?;
        ImageMetadata::from_slice(&data)
    }

    /// Overlay lower directories, topmost layer first.
    pub fn lower_dirs(&self, reference: &ImageReference) -> Result<Vec<PathBuf>> {
        let keys = self.manifest(reference)?.layer_keys()?;
        Ok(keys
            .iter()
            .rev()
            .map(|key| self.layer_fs_dir(key))
            .collect())
    }
}

fn require_digest(reference: &ImageReference) -> Result<&str> {
    reference
        .digest()
        .ok_or_else(|| BurrowError::UnresolvedReferenceError(reference.identity_key()))
}

fn read_metadata_file(path: &Path, reference: &ImageReference, what: &str) -> Result<Vec<u8>> {
    std::fs::read(path).map_err(|e| match e.kind() {
        std::io::ErrorKind::NotFound => BurrowError::NotFoundError(format!(
            "{} for image {} ({})",
            what,
            reference,
            path.display()
        )),
        _ => BurrowError::IoError(e),
    })
}
