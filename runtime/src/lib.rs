//! burrow runtime - image assembly and namespace execution.
//!
//! [`ImageService`] turns an image reference into unpacked layers under the
//! images root; [`ContainerEngine`] mounts those layers as a container root
//! and runs a command inside new namespaces.

pub mod container;
pub mod image;

// Re-export common types
pub use container::{
    default_backend, ContainerEngine, IsolationBackend, ReexecCommand, TeardownPolicy,
    CHILD_SETUP_FAILURE,
};
pub use image::{ImageService, LayerStore, OciRegistryClient, RegistryClient};

/// burrow runtime version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
