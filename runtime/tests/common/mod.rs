//! Shared fakes for runtime integration tests.

#![allow(dead_code)]

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Condvar, Mutex};

use async_trait::async_trait;
use burrow_core::error::{BurrowError, Result};
use burrow_core::ImageReference;
use burrow_runtime::container::{ChildHandle, IsolationBackend, MountRequest};
use burrow_runtime::image::{
    write_image_archive, Blob, RegistryClient, RemoteDescriptor, RemoteImage,
};
use sha2::{Digest, Sha256};

/// Files of one layer: `(path, contents)`.
pub type LayerFiles<'a> = &'a [(&'a str, &'a [u8])];

pub fn sha256_hex(data: &[u8]) -> String {
    hex::encode(Sha256::digest(data))
}

/// Build a gzip-compressed layer tarball in memory.
pub fn layer_blob(files: LayerFiles<'_>) -> Blob {
    use flate2::write::GzEncoder;
    use flate2::Compression;

    let mut builder = tar::Builder::new(GzEncoder::new(Vec::new(), Compression::default()));
    for (name, content) in files {
        let mut header = tar::Header::new_gnu();
        header.set_size(content.len() as u64);
        header.set_mode(0o755);
        header.set_cksum();
        builder.append_data(&mut header, name, *content).unwrap();
    }
    let data = builder.into_inner().unwrap().finish().unwrap();
    Blob {
        hex: sha256_hex(&data),
        data,
    }
}

pub fn config_blob(env: &[&str], cmd: &[&str]) -> Blob {
    let data = serde_json::to_vec(&serde_json::json!({
        "architecture": "amd64",
        "os": "linux",
        "config": { "Env": env, "Cmd": cmd },
    }))
    .unwrap();
    Blob {
        hex: sha256_hex(&data),
        data,
    }
}

struct FakeImage {
    config: Blob,
    layers: Vec<Blob>,
}

/// In-memory registry counting its network-equivalent calls.
#[derive(Default)]
pub struct FakeRegistry {
    images: Mutex<HashMap<String, Arc<FakeImage>>>,
    pub manifest_calls: AtomicUsize,
    pub archive_calls: AtomicUsize,
}

impl FakeRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Publish an image under `reference`; returns its config hex digest.
    pub fn publish(&self, reference: &str, config: Blob, layers: Vec<Blob>) -> String {
        let hex = config.hex.clone();
        let key = ImageReference::parse(reference).identity_key();
        self.images
            .lock()
            .unwrap()
            .insert(key, Arc::new(FakeImage { config, layers }));
        hex
    }

    pub fn manifest_calls(&self) -> usize {
        self.manifest_calls.load(Ordering::SeqCst)
    }

    pub fn archive_calls(&self) -> usize {
        self.archive_calls.load(Ordering::SeqCst)
    }

    fn lookup(&self, reference: &ImageReference) -> Result<Arc<FakeImage>> {
        self.images
            .lock()
            .unwrap()
            .get(&reference.identity_key())
            .cloned()
            .ok_or_else(|| BurrowError::RegistryError {
                registry: "fake".to_string(),
                message: format!("manifest unknown: {}", reference.identity_key()),
            })
    }
}

fn descriptor(blob: &Blob, media_type: &str) -> RemoteDescriptor {
    RemoteDescriptor {
        media_type: media_type.to_string(),
        digest: format!("sha256:{}", blob.hex),
        size: blob.data.len() as i64,
    }
}

#[async_trait]
impl RegistryClient for FakeRegistry {
    async fn fetch_manifest(&self, reference: &ImageReference) -> Result<RemoteImage> {
        self.manifest_calls.fetch_add(1, Ordering::SeqCst);
        let image = self.lookup(reference)?;
        Ok(RemoteImage {
            reference: reference.clone(),
            config: descriptor(&image.config, "application/vnd.oci.image.config.v1+json"),
            layers: image
                .layers
                .iter()
                .map(|l| descriptor(l, "application/vnd.oci.image.layer.v1.tar+gzip"))
                .collect(),
        })
    }

    async fn save_archive(&self, image: &RemoteImage, dest: &Path) -> Result<()> {
        self.archive_calls.fetch_add(1, Ordering::SeqCst);
        let stored = self.lookup(&image.reference)?;
        write_image_archive(
            dest,
            &image.reference.identity_key(),
            &stored.config,
            &stored.layers,
        )
    }
}

/// Every call made against the fake backend, in order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    Mount { fstype: String, target: PathBuf, data: Option<String> },
    Unmount(PathBuf),
    Spawn { container_id: String, args: Vec<String> },
    Terminate,
    IsolateMounts,
    Hostname(String),
    EnterRoot(PathBuf),
    MountPoint(PathBuf),
    ForwardSignals,
    Exec { argv: Vec<String>, env: Vec<String> },
}

type ChildFn = Box<dyn Fn(&str, &[String]) -> i32 + Send + Sync>;

/// Recording isolation backend. No syscalls are made.
pub struct FakeBackend {
    events: Mutex<Vec<Event>>,
    /// Mount target that fails with EPERM
    fail_mount: Mutex<Option<PathBuf>>,
    /// Status returned by `exec`
    exec_status: Mutex<i32>,
    /// Simulated child, run synchronously by `spawn_isolated`
    child: Mutex<Option<ChildFn>>,
    /// When set, `wait` blocks until `terminate` is called
    hang: Mutex<bool>,
    child_status: Mutex<Option<i32>>,
    terminated: (Mutex<bool>, Condvar),
    /// Signal reported by `pending_signal`
    pending: Mutex<Option<i32>>,
}

impl Default for FakeBackend {
    fn default() -> Self {
        Self {
            events: Mutex::new(Vec::new()),
            fail_mount: Mutex::new(None),
            exec_status: Mutex::new(0),
            child: Mutex::new(None),
            hang: Mutex::new(false),
            child_status: Mutex::new(None),
            terminated: (Mutex::new(false), Condvar::new()),
            pending: Mutex::new(None),
        }
    }
}

impl FakeBackend {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn events(&self) -> Vec<Event> {
        self.events.lock().unwrap().clone()
    }

    pub fn fail_mount_at(&self, target: impl Into<PathBuf>) {
        *self.fail_mount.lock().unwrap() = Some(target.into());
    }

    pub fn set_exec_status(&self, status: i32) {
        *self.exec_status.lock().unwrap() = status;
    }

    pub fn set_child(&self, child: impl Fn(&str, &[String]) -> i32 + Send + Sync + 'static) {
        *self.child.lock().unwrap() = Some(Box::new(child));
    }

    /// Simulate a termination signal arriving before the command starts.
    pub fn deliver_signal(&self, signal: i32) {
        *self.pending.lock().unwrap() = Some(signal);
    }

    pub fn hang_until_terminated(&self) {
        *self.hang.lock().unwrap() = true;
    }

    pub fn mounted_targets(&self) -> Vec<PathBuf> {
        self.events()
            .into_iter()
            .filter_map(|e| match e {
                Event::Mount { target, .. } => Some(target),
                _ => None,
            })
            .collect()
    }

    pub fn unmounted_targets(&self) -> Vec<PathBuf> {
        self.events()
            .into_iter()
            .filter_map(|e| match e {
                Event::Unmount(target) => Some(target),
                _ => None,
            })
            .collect()
    }

    fn record(&self, event: Event) {
        self.events.lock().unwrap().push(event);
    }
}

impl IsolationBackend for FakeBackend {
    fn mount(&self, request: &MountRequest) -> Result<()> {
        if self.fail_mount.lock().unwrap().as_deref() == Some(request.target.as_path()) {
            return Err(burrow_runtime::container::backend::mount_error(
                request,
                std::io::Error::from_raw_os_error(libc::EPERM),
            ));
        }
        self.record(Event::Mount {
            fstype: request.fstype.clone(),
            target: request.target.clone(),
            data: request.data.clone(),
        });
        Ok(())
    }

    fn unmount(&self, target: &Path) -> Result<()> {
        self.record(Event::Unmount(target.to_path_buf()));
        Ok(())
    }

    fn spawn_isolated(&self, container_id: &str, args: &[String]) -> Result<ChildHandle> {
        self.record(Event::Spawn {
            container_id: container_id.to_string(),
            args: args.to_vec(),
        });
        let status = match self.child.lock().unwrap().as_ref() {
            Some(child) => child(container_id, args),
            None => 0,
        };
        *self.child_status.lock().unwrap() = Some(status);
        Ok(ChildHandle { pid: 4242 })
    }

    fn wait(&self, _child: ChildHandle) -> Result<i32> {
        if *self.hang.lock().unwrap() {
            let (lock, cvar) = &self.terminated;
            let mut done = lock.lock().unwrap();
            while !*done {
                done = cvar.wait(done).unwrap();
            }
            return Ok(128 + libc::SIGTERM);
        }
        Ok(self.child_status.lock().unwrap().unwrap_or(0))
    }

    fn terminate(&self, _child: ChildHandle) -> Result<()> {
        self.record(Event::Terminate);
        let (lock, cvar) = &self.terminated;
        *lock.lock().unwrap() = true;
        cvar.notify_all();
        Ok(())
    }

    fn isolate_mounts(&self) -> Result<()> {
        self.record(Event::IsolateMounts);
        Ok(())
    }

    fn set_hostname(&self, hostname: &str) -> Result<()> {
        self.record(Event::Hostname(hostname.to_string()));
        Ok(())
    }

    fn enter_root(&self, root: &Path) -> Result<()> {
        self.record(Event::EnterRoot(root.to_path_buf()));
        Ok(())
    }

    fn create_mount_point(&self, path: &Path) -> Result<()> {
        self.record(Event::MountPoint(path.to_path_buf()));
        Ok(())
    }

    fn forward_signals(&self) -> Result<()> {
        self.record(Event::ForwardSignals);
        Ok(())
    }

    fn pending_signal(&self) -> Option<i32> {
        *self.pending.lock().unwrap()
    }

    fn exec(&self, argv: &[String], env: &[String]) -> Result<i32> {
        self.record(Event::Exec {
            argv: argv.to_vec(),
            env: env.to_vec(),
        });
        Ok(*self.exec_status.lock().unwrap())
    }
}
