//! Linux backend: namespaces via `clone(2)`, overlayfs, chroot.

use std::ffi::CString;
use std::os::unix::ffi::OsStrExt;
use std::os::unix::fs::DirBuilderExt;
use std::os::unix::process::ExitStatusExt;
use std::path::Path;
use std::process::Command;
use std::sync::atomic::{AtomicI32, Ordering};

use burrow_core::error::{BurrowError, Result};
use nix::errno::Errno;
use nix::mount::{mount, umount2, MntFlags, MsFlags};
use nix::sched::{clone, CloneFlags};
use nix::sys::signal::{kill, sigaction, SaFlags, SigAction, SigHandler, SigSet, Signal};
use nix::sys::wait::{waitpid, WaitStatus};
use nix::unistd::{chroot, execv, sethostname, Pid};

use super::{mount_error, ChildHandle, IsolationBackend, NamespaceConfig, ReexecCommand};
use crate::container::mounts::MountRequest;

/// Stack for the cloned child; it only lives until `execv`.
const CLONE_STACK_SIZE: usize = 1024 * 1024;

/// Status the cloned child exits with when `execv` fails.
const EXEC_FAILED_STATUS: isize = 127;

/// Shell convention for a command that could not be found.
const COMMAND_NOT_FOUND_STATUS: i32 = 127;

/// PID of the running user command, target of forwarded signals.
static COMMAND_PID: AtomicI32 = AtomicI32::new(0);

/// Last termination signal caught, 0 if none.
static PENDING_SIGNAL: AtomicI32 = AtomicI32::new(0);

/// Namespace-based isolation.
pub struct NamespaceBackend {
    namespaces: NamespaceConfig,
    reexec: ReexecCommand,
}

impl NamespaceBackend {
    pub fn new(namespaces: NamespaceConfig, reexec: ReexecCommand) -> Self {
        Self { namespaces, reexec }
    }
}

impl NamespaceConfig {
    /// Convert to CloneFlags for clone().
    fn to_clone_flags(&self) -> CloneFlags {
        let mut flags = CloneFlags::empty();

        if self.mount {
            flags |= CloneFlags::CLONE_NEWNS;
        }
        if self.pid {
            flags |= CloneFlags::CLONE_NEWPID;
        }
        if self.ipc {
            flags |= CloneFlags::CLONE_NEWIPC;
        }
        if self.uts {
            flags |= CloneFlags::CLONE_NEWUTS;
        }
        if self.net {
            flags |= CloneFlags::CLONE_NEWNET;
        }

        flags
    }
}

impl IsolationBackend for NamespaceBackend {
    fn mount(&self, request: &MountRequest) -> Result<()> {
        mount(
            Some(request.source.as_str()),
            &request.target,
            Some(request.fstype.as_str()),
            MsFlags::empty(),
            request.data.as_deref(),
        )
        .map_err(|errno| mount_error(request, std::io::Error::from(errno)))?;

        tracing::debug!(
            source = %request.source,
            target = %request.target.display(),
            fstype = %request.fstype,
            "Mounted"
        );
        Ok(())
    }

    fn unmount(&self, target: &Path) -> Result<()> {
        match umount2(target, MntFlags::empty()) {
            Ok(()) => {}
            Err(Errno::EBUSY) => {
                tracing::warn!(target = %target.display(), "Mount busy, detaching lazily");
                umount2(target, MntFlags::MNT_DETACH).map_err(|errno| {
                    BurrowError::UnmountError {
                        target: target.to_path_buf(),
                        source: std::io::Error::from(errno),
                    }
                })?;
            }
            Err(errno) => {
                return Err(BurrowError::UnmountError {
                    target: target.to_path_buf(),
                    source: std::io::Error::from(errno),
                })
            }
        }

        tracing::debug!(target = %target.display(), "Unmounted");
        Ok(())
    }

    fn spawn_isolated(&self, container_id: &str, args: &[String]) -> Result<ChildHandle> {
        let to_cstring = |s: &[u8]| {
            CString::new(s).map_err(|e| {
                BurrowError::NamespaceLaunchError(format!("argument contains NUL byte: {}", e))
            })
        };

        let program = to_cstring(self.reexec.program.as_os_str().as_bytes())?;
        let argv = self
            .reexec
            .argv(container_id, args)
            .iter()
            .map(|a| to_cstring(a.as_bytes()))
            .collect::<Result<Vec<_>>>()?;

        let flags = self.namespaces.to_clone_flags();
        let mut stack = vec![0u8; CLONE_STACK_SIZE];

        // The child only calls execv; nothing that allocates or locks.
        let child_fn = Box::new(|| {
            let _ = execv(&program, &argv);
            EXEC_FAILED_STATUS
        });

        let pid = unsafe { clone(child_fn, &mut stack, flags, Some(Signal::SIGCHLD as i32)) }
            .map_err(|e| {
                BurrowError::NamespaceLaunchError(format!(
                    "clone({:?}) failed: {}",
                    flags, e
                ))
            })?;

        tracing::info!(
            container = %container_id,
            pid = pid.as_raw(),
            namespaces = ?flags,
            "Launched isolated child"
        );

        Ok(ChildHandle { pid: pid.as_raw() })
    }

    fn wait(&self, child: ChildHandle) -> Result<i32> {
        let pid = Pid::from_raw(child.pid);
        loop {
            match waitpid(pid, None) {
                Ok(WaitStatus::Exited(_, status)) => return Ok(status),
                Ok(WaitStatus::Signaled(_, signal, _)) => {
                    tracing::warn!(pid = child.pid, signal = ?signal, "Child killed by signal");
                    return Ok(128 + signal as i32);
                }
                Ok(_) => continue,
                Err(Errno::EINTR) => continue,
                Err(e) => {
                    return Err(BurrowError::NamespaceLaunchError(format!(
                        "waitpid({}) failed: {}",
                        child.pid, e
                    )))
                }
            }
        }
    }

    fn terminate(&self, child: ChildHandle) -> Result<()> {
        match kill(Pid::from_raw(child.pid), Signal::SIGTERM) {
            Ok(()) | Err(Errno::ESRCH) => Ok(()),
            Err(e) => Err(BurrowError::NamespaceLaunchError(format!(
                "failed to signal child {}: {}",
                child.pid, e
            ))),
        }
    }

    fn isolate_mounts(&self) -> Result<()> {
        let request = MountRequest::new("none", "/", "none");
        mount(
            None::<&str>,
            "/",
            None::<&str>,
            MsFlags::MS_REC | MsFlags::MS_PRIVATE,
            None::<&str>,
        )
        .map_err(|errno| mount_error(&request, std::io::Error::from(errno)))
    }

    fn set_hostname(&self, hostname: &str) -> Result<()> {
        sethostname(hostname)
            .map_err(|e| BurrowError::SandboxError(format!("sethostname({hostname}): {e}")))
    }

    fn enter_root(&self, root: &Path) -> Result<()> {
        chroot(root)
            .map_err(|e| BurrowError::SandboxError(format!("chroot({}): {}", root.display(), e)))?;
        std::env::set_current_dir("/")
            .map_err(|e| BurrowError::SandboxError(format!("chdir(/): {}", e)))?;
        Ok(())
    }

    fn create_mount_point(&self, path: &Path) -> Result<()> {
        std::fs::DirBuilder::new()
            .recursive(true)
            .mode(0o755)
            .create(path)
            .map_err(|e| {
                BurrowError::SandboxError(format!(
                    "failed to create mount point {}: {}",
                    path.display(),
                    e
                ))
            })
    }

    fn forward_signals(&self) -> Result<()> {
        register_forwarding_handlers()
    }

    fn pending_signal(&self) -> Option<i32> {
        match PENDING_SIGNAL.load(Ordering::SeqCst) {
            0 => None,
            signal => Some(signal),
        }
    }

    fn exec(&self, argv: &[String], env: &[String]) -> Result<i32> {
        let (program, args) = argv
            .split_first()
            .ok_or_else(|| BurrowError::SandboxError("empty command".to_string()))?;

        let vars = env.iter().filter_map(|kv| kv.split_once('='));

        let spawned = Command::new(program)
            .args(args)
            .env_clear()
            .envs(vars)
            .spawn();
        let mut child = match spawned {
            Ok(child) => child,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::error!(command = %program, "Command not found in container");
                return Ok(COMMAND_NOT_FOUND_STATUS);
            }
            Err(e) => {
                return Err(BurrowError::SandboxError(format!(
                    "failed to start {}: {}",
                    program, e
                )))
            }
        };

        COMMAND_PID.store(child.id() as i32, Ordering::SeqCst);
        tracing::debug!(command = %program, pid = child.id(), "Command started");

        // A signal caught between spawn and the store above had no target.
        if let Some(signal) = self.pending_signal() {
            unsafe {
                libc::kill(child.id() as i32, signal);
            }
        }

        let status = child.wait();
        COMMAND_PID.store(0, Ordering::SeqCst);
        let status = status
            .map_err(|e| BurrowError::SandboxError(format!("failed to wait for {}: {}", program, e)))?;

        Ok(status
            .code()
            .or_else(|| status.signal().map(|s| 128 + s))
            .unwrap_or(1))
    }
}

/// Catch SIGTERM and SIGINT, forwarding them to the running command.
///
/// As PID 1 of its namespace the child only receives signals it handles.
fn register_forwarding_handlers() -> Result<()> {
    let action = SigAction::new(
        SigHandler::Handler(forward_signal),
        SaFlags::SA_RESTART,
        SigSet::empty(),
    );
    for signal in [Signal::SIGTERM, Signal::SIGINT] {
        unsafe { sigaction(signal, &action) }.map_err(|e| {
            BurrowError::SandboxError(format!("failed to install {:?} handler: {}", signal, e))
        })?;
    }
    Ok(())
}

extern "C" fn forward_signal(signal: libc::c_int) {
    PENDING_SIGNAL.store(signal, Ordering::SeqCst);
    let pid = COMMAND_PID.load(Ordering::SeqCst);
    if pid > 0 {
        unsafe {
            libc::kill(pid, signal);
        }
    }
}
