//! Per-container directory tree.

use std::path::{Path, PathBuf};

/// Container descriptor file name.
pub const DESCRIPTOR_FILE: &str = "runtime.json";

/// `<containers>/<id>/` and its filesystem-view subdirectories.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContainerLayout {
    root: PathBuf,
}

impl ContainerLayout {
    pub fn new(containers_root: &Path, id: &str) -> Self {
        Self {
            root: containers_root.join(id),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn descriptor_path(&self) -> PathBuf {
        self.root.join(DESCRIPTOR_FILE)
    }

    pub fn fs_dir(&self) -> PathBuf {
        self.root.join("fs")
    }

    /// Union mount point; becomes the sandbox root.
    pub fn mount_dir(&self) -> PathBuf {
        self.fs_dir().join("mnt")
    }

    /// Writable overlay layer.
    pub fn upper_dir(&self) -> PathBuf {
        self.fs_dir().join("upperdir")
    }

    /// Overlay work area.
    pub fn work_dir(&self) -> PathBuf {
        self.fs_dir().join("workdir")
    }

    /// Every directory the run creates, parents first.
    pub fn required_dirs(&self) -> Vec<PathBuf> {
        vec![
            self.root.clone(),
            self.fs_dir(),
            self.mount_dir(),
            self.upper_dir(),
            self.work_dir(),
        ]
    }
}
