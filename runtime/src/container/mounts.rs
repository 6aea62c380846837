//! Mount requests for the union filesystem and the sandbox pseudo-filesystems.

use std::path::{Path, PathBuf};

/// A single `mount(2)` call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MountRequest {
    pub source: String,
    pub target: PathBuf,
    pub fstype: String,
    pub data: Option<String>,
}

impl MountRequest {
    pub fn new(source: &str, target: impl Into<PathBuf>, fstype: &str) -> Self {
        Self {
            source: source.to_string(),
            target: target.into(),
            fstype: fstype.to_string(),
            data: None,
        }
    }
}

/// Overlay mount of `lower_dirs` (topmost first) under a private upper/work pair.
pub fn overlay_mount(lower_dirs: &[PathBuf], upper: &Path, work: &Path, target: &Path) -> MountRequest {
    let lowerdir = lower_dirs
        .iter()
        .map(|p| p.display().to_string())
        .collect::<Vec<_>>()
        .join(":");

    MountRequest {
        data: Some(format!(
            "lowerdir={},upperdir={},workdir={}",
            lowerdir,
            upper.display(),
            work.display()
        )),
        ..MountRequest::new("overlay", target, "overlay")
    }
}

/// Pseudo-filesystems mounted inside the sandbox root, in mount order.
///
/// `/dev/pts` must follow `/dev`; unmounting runs in reverse.
pub const PSEUDO_FILESYSTEMS: [(&str, &str, &str); 5] = [
    ("proc", "/proc", "proc"),
    ("tmpfs", "/tmp", "tmpfs"),
    ("tmpfs", "/dev", "tmpfs"),
    ("devpts", "/dev/pts", "devpts"),
    ("sysfs", "/sys", "sysfs"),
];

pub fn pseudo_filesystems() -> Vec<MountRequest> {
    PSEUDO_FILESYSTEMS
        .iter()
        .map(|(source, target, fstype)| MountRequest::new(source, *target, fstype))
        .collect()
}
