//! Layer extraction utilities.
//!
//! Layers are unpacked into a staging directory next to their destination
//! and renamed into place, so a layer directory that exists is complete.

use std::fs::File;
use std::io::{BufRead, BufReader, Read};
use std::path::Path;

use burrow_core::error::{BurrowError, Result};
use flate2::read::GzDecoder;
use nix::unistd::Uid;
use tar::Archive;
use tempfile::TempDir;

const GZIP_MAGIC: [u8; 2] = [0x1f, 0x8b];

/// Prefix of staging directories under the images root.
pub const STAGING_PREFIX: &str = ".staging-";

/// Extract a single layer archive (tar or tar.gz) to `target_dir`.
pub fn extract_layer(layer_path: &Path, target_dir: &Path) -> Result<()> {
    if !layer_path.exists() {
        return Err(BurrowError::NotFoundError(format!(
            "Layer file not found: {}",
            layer_path.display()
        )));
    }

    std::fs::create_dir_all(target_dir).map_err(|e| {
        BurrowError::Other(format!(
            "Failed to create target directory {}: {}",
            target_dir.display(),
            e
        ))
    })?;

    let file = File::open(layer_path).map_err(|e| {
        BurrowError::Other(format!(
            "Failed to open layer file {}: {}",
            layer_path.display(),
            e
        ))
    })?;

    // Owners and xattrs can only be restored with root privileges.
    let restore_owners = Uid::effective().is_root();

    let mut reader = BufReader::new(file);
    let is_gzip = reader.fill_buf()?.starts_with(&GZIP_MAGIC);
    let unpacked = if is_gzip {
        unpack(GzDecoder::new(reader), target_dir, restore_owners)
    } else {
        unpack(reader, target_dir, restore_owners)
    };
    unpacked.map_err(|e| {
        BurrowError::Other(format!(
            "Failed to extract layer {} to {}: {}",
            layer_path.display(),
            target_dir.display(),
            e
        ))
    })?;

    tracing::debug!(
        layer = %layer_path.display(),
        target = %target_dir.display(),
        gzip = is_gzip,
        owners = restore_owners,
        "Extracted layer"
    );

    Ok(())
}

fn unpack<R: Read>(reader: R, target_dir: &Path, restore_owners: bool) -> std::io::Result<()> {
    let mut archive = Archive::new(reader);
    archive.set_preserve_permissions(true);
    archive.set_preserve_ownerships(restore_owners);
    archive.set_unpack_xattrs(restore_owners);
    archive.set_overwrite(true);
    archive.unpack(target_dir)
}

/// Extract `layer_path` into `<images_root>/<key>/fs` via a staging directory.
///
/// Returns `false` when the layer was already present and nothing was done.
pub fn install_layer(layer_path: &Path, images_root: &Path, key: &str) -> Result<bool> {
    let dest = images_root.join(key);
    if dest.exists() {
        tracing::debug!(layer = %key, "Layer already present, skipping extraction");
        return Ok(false);
    }

    let staging = staging_dir(images_root)?;
    extract_layer(layer_path, &staging.path().join("fs"))?;
    commit_staged(staging, &dest)
}

/// Fresh staging directory under `parent`, removed on drop unless committed.
pub fn staging_dir(parent: &Path) -> Result<TempDir> {
    std::fs::create_dir_all(parent)?;
    tempfile::Builder::new()
        .prefix(STAGING_PREFIX)
        .tempdir_in(parent)
        .map_err(|e| {
            BurrowError::Other(format!(
                "Failed to create staging directory in {}: {}",
                parent.display(),
                e
            ))
        })
}

/// Atomically move a staged directory to `dest`.
///
/// If another writer placed `dest` first, its copy wins and `false` is returned.
pub fn commit_staged(staging: TempDir, dest: &Path) -> Result<bool> {
    match std::fs::rename(staging.path(), dest) {
        Ok(()) => {
            // The staged path no longer exists; dropping the guard is a no-op.
            drop(staging);
            Ok(true)
        }
        Err(_) if dest.exists() => {
            tracing::debug!(
                dest = %dest.display(),
                "Destination appeared concurrently, discarding staged copy"
            );
            Ok(false)
        }
        Err(e) => Err(BurrowError::Other(format!(
            "Failed to move {} into place at {}: {}",
            staging.path().display(),
            dest.display(),
            e
        ))),
    }
}
