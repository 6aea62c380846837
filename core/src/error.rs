use std::path::PathBuf;

use thiserror::Error;

/// burrow error types
#[derive(Error, Debug)]
pub enum BurrowError {
    /// Missing local image, manifest, config, descriptor or store entry
    #[error("Not found: {0}")]
    NotFoundError(String),

    /// Manifest has zero layers or more than one entry
    #[error("Invalid manifest: {0}")]
    InvalidManifestError(String),

    /// Reference used where a resolved digest is required
    #[error("Image reference not resolved: {0}")]
    UnresolvedReferenceError(String),

    /// Filesystem mount failed
    #[error("Mount of {} failed: {source}", .target.display())]
    MountError {
        target: PathBuf,
        source: std::io::Error,
        hint: Option<String>,
    },

    /// Filesystem unmount failed
    #[error("Unmount of {} failed: {source}", .target.display())]
    UnmountError {
        target: PathBuf,
        source: std::io::Error,
    },

    /// Re-executing into new namespaces failed
    #[error("Namespace launch failed: {0}")]
    NamespaceLaunchError(String),

    /// Sandbox setup inside the namespaced child failed (hostname, chroot, exec)
    #[error("Sandbox setup failed: {0}")]
    SandboxError(String),

    /// The user command exited non-zero
    #[error("Command exited with status {code}")]
    CommandFailed { code: i32 },

    /// Container registry error
    #[error("Registry error: {registry} - {message}")]
    RegistryError { registry: String, message: String },

    /// I/O error
    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),

    /// Serialization error
    #[error("Serialization error: {0}")]
    SerializationError(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    ConfigError(String),

    /// Generic error
    #[error("{0}")]
    Other(String),
}

impl BurrowError {
    /// Operator-facing remediation hint, when one is known.
    pub fn hint(&self) -> Option<&str> {
        match self {
            BurrowError::MountError { hint, .. } => hint.as_deref(),
            _ => None,
        }
    }
}

impl From<serde_json::Error> for BurrowError {
    fn from(err: serde_json::Error) -> Self {
        BurrowError::SerializationError(err.to_string())
    }
}

impl From<serde_yaml::Error> for BurrowError {
    fn from(err: serde_yaml::Error) -> Self {
        BurrowError::SerializationError(err.to_string())
    }
}

/// Result type alias for burrow operations
pub type Result<T> = std::result::Result<T, BurrowError>;

/// Documented process exit codes of the `burrow` binary.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitCode {
    Success,
    /// Usage errors and anything not attributable to a run stage
    General,
    ImageResolution,
    SandboxSetup,
    CommandFailed,
}

impl ExitCode {
    pub fn code(self) -> i32 {
        match self {
            ExitCode::Success => 0,
            ExitCode::General => 1,
            ExitCode::ImageResolution => 2,
            ExitCode::SandboxSetup => 3,
            ExitCode::CommandFailed => 4,
        }
    }
}
