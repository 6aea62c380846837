//! Layer store: the persistent index of locally assembled images.
//!
//! A single JSON object at `<images>/images.json` maps image name to
//! `{"Tag", "Hash"}`. Mutations take an exclusive `flock` on a sibling lock
//! file, re-read the document, and commit with write-to-tmp + rename, so
//! concurrent writers never lose updates and readers never see a torn file.

use std::collections::BTreeMap;
use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};

use burrow_core::error::{BurrowError, Result};
use burrow_core::ImageReference;
use nix::fcntl::{Flock, FlockArg};
use serde::{Deserialize, Serialize};

/// Most recently resolved binding for one image name.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct LayerStoreEntry {
    pub tag: String,
    pub hash: String,
}

/// JSON-backed name → `{tag, digest}` index.
#[derive(Debug)]
pub struct LayerStore {
    path: PathBuf,
    lock_path: PathBuf,
}

impl LayerStore {
    /// Open the store at `path`, creating an empty `{}` document if absent.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let lock_path = path.with_extension("json.lock");
        let store = Self { path, lock_path };

        if let Some(parent) = store.path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                BurrowError::IoError(std::io::Error::new(
                    e.kind(),
                    format!("failed to create directory {}: {}", parent.display(), e),
                ))
            })?;
        }

        if !store.path.exists() {
            let _lock = store.lock()?;
            if !store.path.exists() {
                store.save(&BTreeMap::new())?;
            }
        }

        Ok(store)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// True iff an entry for `reference.name` exists with `reference.tag`.
    ///
    /// Does not check that the image's layers are still on disk.
    pub fn has(&self, reference: &ImageReference) -> Result<bool> {
        Ok(self
            .load()?
            .get(&reference.name)
            .is_some_and(|entry| entry.tag == reference.tag))
    }

    /// Stored reference for `(name, tag)`.
    pub fn get(&self, reference: &ImageReference) -> Result<ImageReference> {
        match self.load()?.remove(&reference.name) {
            Some(entry) if entry.tag == reference.tag => {
                Ok(ImageReference::new(&reference.name, entry.tag).with_digest(entry.hash))
            }
            _ => Err(BurrowError::NotFoundError(format!(
                "image {} not in layer store",
                reference.identity_key()
            ))),
        }
    }

    /// Any stored reference whose digest equals `digest`.
    pub fn find_by_digest(&self, digest: &str) -> Result<Option<ImageReference>> {
        Ok(self
            .load()?
            .into_iter()
            .find(|(_, entry)| entry.hash == digest)
            .map(|(name, entry)| ImageReference::new(name, entry.tag).with_digest(entry.hash)))
    }

    /// Upsert the binding for `reference.name`, replacing any previous tag.
    ///
    /// # Panics
    ///
    /// Panics if `reference` carries no digest. Persisting an unresolved
    /// reference is a programming error; the store is left untouched.
    pub fn put(&self, reference: &ImageReference) -> Result<()> {
        let digest = reference.digest();
        assert!(
            digest.is_some(),
            "layer store put with unresolved reference {}",
            reference.identity_key()
        );
        let hash = digest.unwrap_or_default().to_string();

        let _lock = self.lock()?;
        let mut entries = self.load()?;
        entries.insert(
            reference.name.clone(),
            LayerStoreEntry {
                tag: reference.tag.clone(),
                hash,
            },
        );
        self.save(&entries)?;

        tracing::debug!(
            image = %reference.identity_key(),
            digest = %reference.digest().unwrap_or_default(),
            "Recorded image in layer store"
        );
        Ok(())
    }

    /// All entries, ordered by name.
    pub fn entries(&self) -> Result<BTreeMap<String, LayerStoreEntry>> {
        self.load()
    }

    fn load(&self) -> Result<BTreeMap<String, LayerStoreEntry>> {
        let data = match std::fs::read(&self.path) {
            Ok(data) => data,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(BTreeMap::new()),
            Err(e) => {
                return Err(BurrowError::IoError(std::io::Error::new(
                    e.kind(),
                    format!("failed to read layer store {}: {}", self.path.display(), e),
                )))
            }
        };

        serde_json::from_slice(&data).map_err(|e| {
            BurrowError::SerializationError(format!(
                "failed to parse layer store {}: {}",
                self.path.display(),
                e
            ))
        })
    }

    /// Atomic write: write to tmp, then rename. Caller holds the lock.
    fn save(&self, entries: &BTreeMap<String, LayerStoreEntry>) -> Result<()> {
        let json = serde_json::to_vec_pretty(entries)?;

        let tmp_path = self.path.with_extension("json.tmp");
        std::fs::write(&tmp_path, &json).map_err(|e| {
            BurrowError::IoError(std::io::Error::new(
                e.kind(),
                format!("failed to write tmp file {}: {}", tmp_path.display(), e),
            ))
        })?;

        std::fs::rename(&tmp_path, &self.path).map_err(|e| {
            BurrowError::IoError(std::io::Error::new(
                e.kind(),
                format!(
                    "failed to rename {} -> {}: {}",
                    tmp_path.display(),
                    self.path.display(),
                    e
                ),
            ))
        })?;

        Ok(())
    }

    /// Exclusive advisory lock, released on drop.
    fn lock(&self) -> Result<Flock<File>> {
        let file = OpenOptions::new()
            .create(true)
            .truncate(false)
            .write(true)
            .open(&self.lock_path)?;

        Flock::lock(file, FlockArg::LockExclusive).map_err(|(_, errno)| {
            BurrowError::IoError(std::io::Error::new(
                std::io::Error::from(errno).kind(),
                format!("failed to lock {}: {}", self.lock_path.display(), errno),
            ))
        })
    }
}
