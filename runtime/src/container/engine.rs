//! Container execution engine.
//!
//! A run moves strictly forward through [`RunState`]. Every acquired
//! resource pushes its release action onto a [`CleanupStack`], so teardown
//! runs on every exit path.

use std::fmt;
use std::future::Future;
use std::os::unix::fs::MetadataExt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use burrow_core::error::{BurrowError, Result};
use burrow_core::{Container, RuntimeConfig};
use tokio::io::{AsyncBufReadExt, BufReader};

use super::backend::IsolationBackend;
use super::cleanup::CleanupStack;
use super::layout::ContainerLayout;
use super::mounts::{overlay_mount, pseudo_filesystems};
use crate::image::ImageLayout;

/// Exit status of a child-mode process whose sandbox setup failed.
///
/// Lets the parent tell setup failures apart from the user command's own
/// non-zero statuses.
pub const CHILD_SETUP_FAILURE: i32 = 125;

/// Lifecycle of a single run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunState {
    Created,
    DirsReady,
    FsMounted,
    NamespaceLaunched,
    Running,
    FsUnmounted,
    CleanedUp,
    Failed,
}

impl fmt::Display for RunState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            RunState::Created => "created",
            RunState::DirsReady => "dirs_ready",
            RunState::FsMounted => "fs_mounted",
            RunState::NamespaceLaunched => "namespace_launched",
            RunState::Running => "running",
            RunState::FsUnmounted => "fs_unmounted",
            RunState::CleanedUp => "cleaned_up",
            RunState::Failed => "failed",
        };
        f.write_str(s)
    }
}

fn enter_state(container_id: &str, state: RunState) {
    tracing::debug!(container = %container_id, state = %state, "Container state");
}

/// How the namespaced child ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChildExit {
    pub status: i32,
    /// The shutdown future fired and the child was sent SIGTERM
    pub cancelled: bool,
}

/// What to do between the command exiting and teardown.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TeardownPolicy {
    /// Pause for the operator to press Enter before destroying the container
    #[default]
    Confirm,
    /// Tear down immediately
    Auto,
}

/// Container execution engine.
pub struct ContainerEngine {
    containers_root: PathBuf,
    images: ImageLayout,
    backend: Arc<dyn IsolationBackend>,
    resolv_conf_sources: Vec<PathBuf>,
}

impl ContainerEngine {
    pub fn new(config: &RuntimeConfig, backend: Arc<dyn IsolationBackend>) -> Self {
        let paths = config.layout();
        Self {
            containers_root: paths.containers(),
            images: ImageLayout::new(&paths),
            backend,
            resolv_conf_sources: config.resolv_conf_sources.clone(),
        }
    }

    pub fn layout(&self, container_id: &str) -> ContainerLayout {
        ContainerLayout::new(&self.containers_root, container_id)
    }

    /// Create the container root and its mount/upper/work directories.
    pub fn create_private_directories(&self, container: &Container) -> Result<()> {
        for dir in self.layout(&container.id).required_dirs() {
            std::fs::create_dir_all(&dir).map_err(|e| {
                BurrowError::IoError(std::io::Error::new(
                    e.kind(),
                    format!("failed to create {}: {}", dir.display(), e),
                ))
            })?;
        }
        Ok(())
    }

    /// Mount the image layers, topmost first, under the container's upper/work pair.
    pub fn mount_union_filesystem(&self, container: &Container) -> Result<()> {
        let layout = self.layout(&container.id);
        let lower_dirs = self.images.lower_dirs(&container.image)?;

        let request = overlay_mount(
            &lower_dirs,
            &layout.upper_dir(),
            &layout.work_dir(),
            &layout.mount_dir(),
        );
        self.backend.mount(&request)?;

        tracing::info!(
            container = %container.id,
            image = %container.image,
            layers = lower_dirs.len(),
            target = %layout.mount_dir().display(),
            "Mounted union filesystem"
        );
        Ok(())
    }

    /// Write `runtime.json` for the child to pick up.
    pub fn persist_descriptor(&self, container: &Container) -> Result<()> {
        let path = self.layout(&container.id).descriptor_path();
        let json = serde_json::to_vec_pretty(container)?;
        std::fs::write(&path, json).map_err(|e| {
            BurrowError::IoError(std::io::Error::new(
                e.kind(),
                format!("failed to write descriptor {}: {}", path.display(), e),
            ))
        })
    }

    pub fn load_descriptor(&self, container_id: &str) -> Result<Container> {
        let path = self.layout(container_id).descriptor_path();
        let data = std::fs::read(&path).map_err(|e| match e.kind() {
            std::io::ErrorKind::NotFound => BurrowError::NotFoundError(format!(
                "container {} descriptor ({})",
                container_id,
                path.display()
            )),
            _ => BurrowError::IoError(e),
        })?;
        Ok(serde_json::from_slice(&data)?)
    }

    /// Persist the descriptor, start the namespaced child and wait for it.
    ///
    /// If `shutdown` completes first the child is sent SIGTERM and still
    /// waited for, so the caller's teardown never races a live sandbox.
    pub async fn launch_isolated<F>(
        &self,
        container: &Container,
        args: &[String],
        shutdown: F,
    ) -> Result<ChildExit>
    where
        F: Future<Output = ()>,
    {
        self.persist_descriptor(container)?;

        let child = self.backend.spawn_isolated(&container.id, args)?;
        enter_state(&container.id, RunState::NamespaceLaunched);
        enter_state(&container.id, RunState::Running);

        let backend = Arc::clone(&self.backend);
        let mut waiter = tokio::task::spawn_blocking(move || backend.wait(child));
        tokio::pin!(shutdown);

        let finished = tokio::select! {
            joined = &mut waiter => Some(joined),
            _ = &mut shutdown => None,
        };

        let cancelled = finished.is_none();
        let joined = match finished {
            Some(joined) => joined,
            None => {
                tracing::warn!(
                    container = %container.id,
                    pid = child.pid,
                    "Cancellation requested, terminating container"
                );
                if let Err(e) = self.backend.terminate(child) {
                    tracing::warn!(container = %container.id, error = %e, "Failed to signal child");
                }
                waiter.await
            }
        };

        let status = joined
            .map_err(|e| BurrowError::NamespaceLaunchError(format!("wait task failed: {}", e)))??;

        tracing::info!(container = %container.id, status, cancelled, "Container exited");
        Ok(ChildExit { status, cancelled })
    }

    /// Child side: build the sandbox, run the command, dismantle the sandbox.
    ///
    /// Only runs inside the freshly namespaced child. Pseudo-filesystems that
    /// were mounted are unmounted in reverse on every path.
    pub fn run_in_namespace(&self, container_id: &str, args: &[String]) -> Result<i32> {
        let container = self.load_descriptor(container_id)?;
        let metadata = self.images.metadata(&container.image)?;

        let argv = if !args.is_empty() {
            args.to_vec()
        } else if !container.args.is_empty() {
            container.args.clone()
        } else {
            metadata.cmd().to_vec()
        };
        if argv.is_empty() {
            return Err(BurrowError::SandboxError(format!(
                "no command given and image {} declares no default command",
                container.image
            )));
        }

        let root = self.layout(container_id).mount_dir();

        // Installed first: as namespace init, unhandled signals are dropped.
        self.backend.forward_signals()?;
        self.backend.isolate_mounts()?;
        self.backend.set_hostname(container_id)?;
        self.copy_nameserver_config(&root)?;
        self.backend.enter_root(&root)?;

        let mut mounts = CleanupStack::new();
        for request in pseudo_filesystems() {
            self.backend.create_mount_point(&request.target)?;
            self.backend.mount(&request)?;

            let backend = Arc::clone(&self.backend);
            let target = request.target.clone();
            mounts.push(format!("unmount {}", target.display()), move || {
                backend.unmount(&target)
            });
        }

        let status = match self.backend.pending_signal() {
            Some(signal) => {
                tracing::warn!(
                    container = %container_id,
                    signal,
                    "Terminated during sandbox setup, skipping command"
                );
                Ok(128 + signal)
            }
            None => {
                tracing::info!(container = %container_id, command = ?argv, "Running command");
                self.backend.exec(&argv, metadata.env())
            }
        };

        let teardown = mounts.unwind();
        let status = status?;
        teardown?;
        Ok(status)
    }

    /// Parent side orchestration of a whole run.
    ///
    /// Child status 0 is success, [`CHILD_SETUP_FAILURE`] becomes a sandbox
    /// error and anything else is `CommandFailed`. The container's mount and
    /// directory tree are released on every path.
    pub async fn run<F>(
        &self,
        container: &Container,
        args: &[String],
        policy: TeardownPolicy,
        shutdown: F,
    ) -> Result<()>
    where
        F: Future<Output = ()>,
    {
        enter_state(&container.id, RunState::Created);
        if !container.limits.is_empty() {
            tracing::warn!(
                container = %container.id,
                limits = ?container.limits,
                "Resource limits are recorded but not enforced"
            );
        }

        let mut cleanup = CleanupStack::new();
        let outcome = self
            .acquire_and_launch(container, args, &mut cleanup, shutdown)
            .await;

        // A cancelled run is torn down without asking.
        if let (Ok(exit), TeardownPolicy::Confirm) = (&outcome, policy) {
            if !exit.cancelled {
                wait_for_operator(&container.id, exit.status).await;
            }
        }

        let teardown = cleanup.unwind();
        match &teardown {
            Ok(()) => {
                enter_state(&container.id, RunState::FsUnmounted);
                enter_state(&container.id, RunState::CleanedUp);
            }
            Err(_) => enter_state(&container.id, RunState::Failed),
        }

        let result = match outcome.map(|exit| exit.status) {
            Ok(0) => Ok(()),
            Ok(CHILD_SETUP_FAILURE) => Err(BurrowError::SandboxError(format!(
                "container {} failed to set up its sandbox",
                container.id
            ))),
            Ok(code) => Err(BurrowError::CommandFailed { code }),
            Err(e) => {
                enter_state(&container.id, RunState::Failed);
                Err(e)
            }
        };

        match (result, teardown) {
            (Ok(()), Err(e)) => Err(e),
            (Err(e), Err(teardown_err)) => {
                tracing::error!(
                    container = %container.id,
                    error = %teardown_err,
                    "Teardown failed after run error"
                );
                Err(e)
            }
            (result, Ok(())) => result,
        }
    }

    async fn acquire_and_launch<F>(
        &self,
        container: &Container,
        args: &[String],
        cleanup: &mut CleanupStack,
        shutdown: F,
    ) -> Result<ChildExit>
    where
        F: Future<Output = ()>,
    {
        let layout = self.layout(&container.id);

        let root = layout.root().to_path_buf();
        let mount_dir = layout.mount_dir();
        cleanup.push(format!("remove {}", root.display()), move || {
            remove_container_tree(&root, &mount_dir)
        });
        self.create_private_directories(container)?;
        enter_state(&container.id, RunState::DirsReady);

        self.mount_union_filesystem(container)?;
        let backend = Arc::clone(&self.backend);
        let target = layout.mount_dir();
        cleanup.push(format!("unmount {}", target.display()), move || {
            backend.unmount(&target)
        });
        enter_state(&container.id, RunState::FsMounted);

        self.launch_isolated(container, args, shutdown).await
    }

    /// Copy the first existing resolver file into `<root>/etc/resolv.conf`.
    fn copy_nameserver_config(&self, root: &Path) -> Result<()> {
        let Some(source) = self.resolv_conf_sources.iter().find(|p| p.exists()) else {
            tracing::warn!("No resolver configuration found on host, skipping DNS setup");
            return Ok(());
        };

        let etc = root.join("etc");
        std::fs::create_dir_all(&etc)?;
        let dest = etc.join("resolv.conf");

        // Never write through a symlink from the image into the host.
        if dest.symlink_metadata().is_ok() {
            std::fs::remove_file(&dest)?;
        }
        std::fs::copy(source, &dest).map_err(|e| {
            BurrowError::SandboxError(format!(
                "failed to copy {} to {}: {}",
                source.display(),
                dest.display(),
                e
            ))
        })?;

        tracing::debug!(source = %source.display(), "Copied resolver configuration");
        Ok(())
    }
}

/// Remove a container tree, refusing while its union mount is still attached.
fn remove_container_tree(root: &Path, mount_dir: &Path) -> Result<()> {
    if is_mount_point(mount_dir) {
        return Err(BurrowError::Other(format!(
            "refusing to remove {}: {} is still mounted",
            root.display(),
            mount_dir.display()
        )));
    }

    match std::fs::remove_dir_all(root) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(BurrowError::IoError(std::io::Error::new(
            e.kind(),
            format!("failed to remove {}: {}", root.display(), e),
        ))),
    }
}

/// True when `path` is on a different device than its parent.
fn is_mount_point(path: &Path) -> bool {
    let (Ok(meta), Some(Ok(parent))) = (
        std::fs::metadata(path),
        path.parent().map(std::fs::metadata),
    ) else {
        return false;
    };
    meta.dev() != parent.dev()
}

async fn wait_for_operator(container_id: &str, status: i32) {
    eprintln!(
        "Container {container_id} exited with status {status}. Press Enter to remove it..."
    );
    let mut line = String::new();
    if let Err(e) = BufReader::new(tokio::io::stdin()).read_line(&mut line).await {
        tracing::warn!(error = %e, "Could not read confirmation, continuing teardown");
    }
}
