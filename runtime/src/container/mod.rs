//! Container execution engine and its isolation backends.

pub mod backend;
pub mod cleanup;
pub mod engine;
pub mod layout;
pub mod mounts;

pub use backend::{
    default_backend, ChildHandle, IsolationBackend, NamespaceConfig, ReexecCommand,
    UnsupportedBackend,
};
pub use cleanup::CleanupStack;
pub use engine::{ChildExit, ContainerEngine, RunState, TeardownPolicy, CHILD_SETUP_FAILURE};
pub use layout::ContainerLayout;
pub use mounts::{overlay_mount, pseudo_filesystems, MountRequest, PSEUDO_FILESYSTEMS};
