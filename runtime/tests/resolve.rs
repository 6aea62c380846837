//! Image resolution against an in-memory registry.

mod common;

use std::sync::Arc;

use burrow_core::{BurrowError, ImageReference, PathLayout};
use burrow_runtime::image::{ImageService, SHORT_DIGEST_LEN};
use common::{config_blob, layer_blob, FakeRegistry};
use tempfile::TempDir;

fn service(home: &TempDir, registry: &Arc<FakeRegistry>) -> ImageService {
    let paths = PathLayout::new(home.path());
    paths.ensure().unwrap();
    ImageService::new(&paths, registry.clone()).unwrap()
}

fn publish_alpine(registry: &FakeRegistry, reference: &str) -> (String, String, String) {
    let l1 = layer_blob(&[("bin/sh", b"#!busybox"), ("etc/os-release", b"ID=alpine")]);
    let l2 = layer_blob(&[("etc/motd", b"welcome")]);
    let (k1, k2) = (l1.hex[..SHORT_DIGEST_LEN].to_string(), l2.hex[..SHORT_DIGEST_LEN].to_string());
    let config = config_blob(&["PATH=/usr/bin:/bin"], &["/bin/sh"]);
    let hex = registry.publish(reference, config, vec![l1, l2]);
    (hex[..SHORT_DIGEST_LEN].to_string(), k1, k2)
}

fn dir_names(path: &std::path::Path) -> Vec<String> {
    std::fs::read_dir(path)
        .map(|rd| {
            rd.map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
                .collect()
        })
        .unwrap_or_default()
}

#[tokio::test]
async fn test_resolve_pulls_and_unpacks_layers() {
    let home = TempDir::new().unwrap();
    let registry = Arc::new(FakeRegistry::new());
    let (digest, k1, k2) = publish_alpine(&registry, "alpine:latest");
    let images = service(&home, &registry);

    let resolved = images
        .resolve(&ImageReference::parse("alpine"))
        .await
        .unwrap();

    assert_eq!(resolved.name, "alpine");
    assert_eq!(resolved.tag, "latest");
    assert_eq!(resolved.digest(), Some(digest.as_str()));

    let layout = images.layout();
    assert!(layout.layer_fs_dir(&k1).join("bin/sh").is_file());
    assert!(layout.layer_fs_dir(&k1).join("etc/os-release").is_file());
    assert!(layout.layer_fs_dir(&k2).join("etc/motd").is_file());
    assert!(layout.manifest_path(&digest).is_file());
    assert!(layout.config_path(&digest).is_file());

    let entries = images.store().entries().unwrap();
    let entry = entries.get("alpine").unwrap();
    assert_eq!(entry.tag, "latest");
    assert_eq!(entry.hash, digest);

    let metadata = images.metadata(&resolved).unwrap();
    assert_eq!(metadata.env(), ["PATH=/usr/bin:/bin".to_string()]);
    assert_eq!(metadata.cmd(), ["/bin/sh".to_string()]);

    // Workspace and staging directories are gone.
    assert!(dir_names(layout.temp_root()).is_empty());
    assert!(dir_names(layout.images_root())
        .iter()
        .all(|name| !name.starts_with(".staging-")));
}

#[tokio::test]
async fn test_resolve_cached_makes_no_registry_calls() {
    let home = TempDir::new().unwrap();
    let registry = Arc::new(FakeRegistry::new());
    publish_alpine(&registry, "alpine:latest");
    let images = service(&home, &registry);
    let reference = ImageReference::parse("alpine:latest");

    let first = images.resolve(&reference).await.unwrap();
    assert_eq!(registry.manifest_calls(), 1);
    assert_eq!(registry.archive_calls(), 1);

    let second = images.resolve(&reference).await.unwrap();
    assert_eq!(first, second);
    assert_eq!(registry.manifest_calls(), 1);
    assert_eq!(registry.archive_calls(), 1);
}

#[tokio::test]
async fn test_resolve_deduplicates_same_content() {
    let home = TempDir::new().unwrap();
    let registry = Arc::new(FakeRegistry::new());
    let (digest, _, _) = publish_alpine(&registry, "alpine:latest");
    publish_alpine(&registry, "mirror/alpine:3");
    let images = service(&home, &registry);

    let a = images
        .resolve(&ImageReference::parse("alpine:latest"))
        .await
        .unwrap();
    let b = images
        .resolve(&ImageReference::parse("mirror/alpine:3"))
        .await
        .unwrap();

    assert_eq!(a.digest(), b.digest());
    assert_eq!(registry.manifest_calls(), 2);
    assert_eq!(registry.archive_calls(), 1);

    let entries = images.store().entries().unwrap();
    assert_eq!(entries.len(), 2);
    assert_eq!(entries["mirror/alpine"].hash, digest);
    assert_eq!(entries["mirror/alpine"].tag, "3");
}

#[tokio::test]
async fn test_resolve_shared_layers_extracted_once() {
    let home = TempDir::new().unwrap();
    let registry = Arc::new(FakeRegistry::new());
    let base = layer_blob(&[("bin/sh", b"#!busybox")]);
    let key = base.hex[..SHORT_DIGEST_LEN].to_string();
    registry.publish("one:1", config_blob(&[], &["/bin/sh"]), vec![base.clone()]);
    registry.publish(
        "two:1",
        config_blob(&["A=b"], &["/bin/sh"]),
        vec![base, layer_blob(&[("extra", b"x")])],
    );
    let images = service(&home, &registry);

    images.resolve(&ImageReference::parse("one:1")).await.unwrap();
    let marker = images.layout().layer_fs_dir(&key).join("marker");
    std::fs::write(&marker, b"kept").unwrap();

    images.resolve(&ImageReference::parse("two:1")).await.unwrap();
    assert!(marker.exists(), "existing layer directory must not be replaced");
}

#[tokio::test]
async fn test_resolve_rejects_image_without_layers() {
    let home = TempDir::new().unwrap();
    let registry = Arc::new(FakeRegistry::new());
    registry.publish("empty:1", config_blob(&[], &[]), Vec::new());
    let images = service(&home, &registry);

    let err = images
        .resolve(&ImageReference::parse("empty:1"))
        .await
        .unwrap_err();

    assert!(matches!(err, BurrowError::InvalidManifestError(_)), "{err}");
    assert!(images.store().entries().unwrap().is_empty());
    assert!(dir_names(images.layout().temp_root()).is_empty());
}

#[tokio::test]
async fn test_resolve_unknown_image_is_registry_error() {
    let home = TempDir::new().unwrap();
    let registry = Arc::new(FakeRegistry::new());
    let images = service(&home, &registry);

    let err = images
        .resolve(&ImageReference::parse("missing:latest"))
        .await
        .unwrap_err();

    assert!(matches!(err, BurrowError::RegistryError { .. }));
    assert_eq!(registry.archive_calls(), 0);
    assert!(images.store().entries().unwrap().is_empty());
}
