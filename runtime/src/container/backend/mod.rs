//! Platform isolation primitives.
//!
//! The execution engine drives a run entirely through [`IsolationBackend`],
//! so the ordering and cleanup logic is independent of the kernel features
//! that implement it.

#[cfg(target_os = "linux")]
mod linux;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use burrow_core::error::{BurrowError, Result};

use super::mounts::MountRequest;

#[cfg(target_os = "linux")]
pub use linux::NamespaceBackend;

/// A process started by [`IsolationBackend::spawn_isolated`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChildHandle {
    pub pid: i32,
}

/// Isolation capability used by the container engine.
///
/// The parent side uses `mount`/`unmount` for the union filesystem and
/// `spawn_isolated`/`wait`/`terminate` for the namespaced child. The child
/// side uses the remaining methods to build the sandbox.
pub trait IsolationBackend: Send + Sync {
    fn mount(&self, request: &MountRequest) -> Result<()>;

    fn unmount(&self, target: &Path) -> Result<()>;

    /// Re-execute the runtime in child mode inside new namespaces.
    fn spawn_isolated(&self, container_id: &str, args: &[String]) -> Result<ChildHandle>;

    /// Block until `child` exits; signal deaths map to 128+signal.
    fn wait(&self, child: ChildHandle) -> Result<i32>;

    /// Ask `child` to stop (SIGTERM).
    fn terminate(&self, child: ChildHandle) -> Result<()>;

    /// Stop sandbox mounts from propagating back to the host.
    fn isolate_mounts(&self) -> Result<()>;

    fn set_hostname(&self, hostname: &str) -> Result<()>;

    /// Change root to `root` and move to `/`.
    fn enter_root(&self, root: &Path) -> Result<()>;

    fn create_mount_point(&self, path: &Path) -> Result<()>;

    /// Catch SIGTERM and SIGINT from here on.
    ///
    /// While a command started by `exec` runs they are forwarded to it;
    /// before that they are held and reported by `pending_signal`.
    fn forward_signals(&self) -> Result<()>;

    /// A termination signal caught by `forward_signals`, if any.
    fn pending_signal(&self) -> Option<i32>;

    /// Run `argv` with exactly `env` and return its exit status.
    fn exec(&self, argv: &[String], env: &[String]) -> Result<i32>;
}

/// Namespace configuration for process isolation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NamespaceConfig {
    /// Separate filesystem view (mount namespace)
    pub mount: bool,

    /// Separate process tree (PID namespace)
    pub pid: bool,

    /// Separate IPC (IPC namespace)
    pub ipc: bool,

    /// Separate hostname (UTS namespace)
    pub uts: bool,

    /// Separate network (network namespace)
    /// Containers share the host network, so this stays off
    pub net: bool,
}

impl Default for NamespaceConfig {
    fn default() -> Self {
        Self {
            mount: true,
            pid: true,
            ipc: true,
            uts: true,
            net: false,
        }
    }
}

/// How the runtime re-invokes itself in child mode.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReexecCommand {
    /// Executable to run, normally `/proc/self/exe`
    pub program: PathBuf,
    /// `argv[0]` followed by global flags and the child-mode subcommand
    pub leading_args: Vec<String>,
}

impl ReexecCommand {
    /// Re-execute the running binary with `leading_args`.
    pub fn current_exe(leading_args: Vec<String>) -> Self {
        Self {
            program: PathBuf::from("/proc/self/exe"),
            leading_args,
        }
    }

    /// Full argv for a child-mode invocation.
    pub fn argv(&self, container_id: &str, args: &[String]) -> Vec<String> {
        let mut argv = self.leading_args.clone();
        argv.push(container_id.to_string());
        argv.push("--".to_string());
        argv.extend(args.iter().cloned());
        argv
    }
}

/// Backend for platforms without namespace support.
#[derive(Debug, Default)]
pub struct UnsupportedBackend;

impl UnsupportedBackend {
    fn unsupported<T>(&self) -> Result<T> {
        Err(BurrowError::NamespaceLaunchError(format!(
            "containers require Linux namespaces and overlayfs (running on {})",
            std::env::consts::OS
        )))
    }
}

impl IsolationBackend for UnsupportedBackend {
    fn mount(&self, _request: &MountRequest) -> Result<()> {
        self.unsupported()
    }
    fn unmount(&self, _target: &Path) -> Result<()> {
        self.unsupported()
    }
    fn spawn_isolated(&self, _container_id: &str, _args: &[String]) -> Result<ChildHandle> {
        self.unsupported()
    }
    fn wait(&self, _child: ChildHandle) -> Result<i32> {
        self.unsupported()
    }
    fn terminate(&self, _child: ChildHandle) -> Result<()> {
        self.unsupported()
    }
    fn isolate_mounts(&self) -> Result<()> {
        self.unsupported()
    }
    fn set_hostname(&self, _hostname: &str) -> Result<()> {
        self.unsupported()
    }
    fn enter_root(&self, _root: &Path) -> Result<()> {
        self.unsupported()
    }
    fn create_mount_point(&self, _path: &Path) -> Result<()> {
        self.unsupported()
    }
    fn forward_signals(&self) -> Result<()> {
        self.unsupported()
    }
    fn pending_signal(&self) -> Option<i32> {
        None
    }
    fn exec(&self, _argv: &[String], _env: &[String]) -> Result<i32> {
        self.unsupported()
    }
}

/// The native backend for this platform.
#[cfg(target_os = "linux")]
pub fn default_backend(reexec: ReexecCommand) -> Arc<dyn IsolationBackend> {
    Arc::new(NamespaceBackend::new(NamespaceConfig::default(), reexec))
}

#[cfg(not(target_os = "linux"))]
pub fn default_backend(_reexec: ReexecCommand) -> Arc<dyn IsolationBackend> {
    Arc::new(UnsupportedBackend)
}

/// Operator hint for a failed mount.
pub fn mount_hint(fstype: &str, errno: i32) -> Option<String> {
    match errno {
        libc::ENODEV => Some(format!(
            "the kernel does not support the {fstype} filesystem; try `modprobe {fstype}`"
        )),
        libc::EPERM | libc::EACCES => {
            Some("mounting requires root privileges (CAP_SYS_ADMIN)".to_string())
        }
        libc::EINVAL if fstype == "overlay" => Some(
            "overlay rejected its options; check that every lower directory exists \
             and that upperdir and workdir are on the same non-overlay filesystem"
                .to_string(),
        ),
        libc::ENOENT => Some("the mount target or a layer directory does not exist".to_string()),
        _ => None,
    }
}

/// Wrap an OS error from `mount(2)` with its target and a hint.
pub fn mount_error(request: &MountRequest, source: std::io::Error) -> BurrowError {
    let hint = source
        .raw_os_error()
        .and_then(|errno| mount_hint(&request.fstype, errno));
    BurrowError::MountError {
        target: request.target.clone(),
        source,
        hint,
    }
}
