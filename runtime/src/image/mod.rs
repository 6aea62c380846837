//! Image assembly engine: registry access, layer store and on-disk layout.

pub mod layers;
pub mod layout;
pub mod manifest;
pub mod registry;
pub mod service;
pub mod store;

pub use layers::{extract_layer, install_layer};
pub use layout::ImageLayout;
pub use manifest::{short_digest, ImageMetadata, Manifest, ManifestEntry, SHORT_DIGEST_LEN};
pub use registry::{
    write_image_archive, Blob, OciRegistryClient, RegistryClient, RemoteDescriptor, RemoteImage,
};
pub use service::ImageService;
pub use store::{LayerStore, LayerStoreEntry};
