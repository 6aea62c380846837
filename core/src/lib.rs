//! burrow core - foundational types shared by the runtime and the CLI.

pub mod config;
pub mod container;
pub mod error;
pub mod reference;

// Re-export commonly used types
pub use config::{PathLayout, RuntimeConfig};
pub use container::{Container, ResourceLimits};
pub use error::{BurrowError, ExitCode, Result};
pub use reference::ImageReference;

/// burrow version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
