//! Offline pipeline state archiver
//!
//! This crate compiles pipeline state descriptions for several graphics backends and
//! packs the results into a single DLAR archive. Shaders are transcoded per backend,
//! their bindings are patched to match the pipeline's resource signatures, and every
//! shader, signature and render pass is stored once no matter how many pipelines use it.

pub mod archive;
mod archiver;
pub mod backend;
pub mod config;
pub mod dedup;
pub mod desc;
mod error;
pub mod manifest;
pub mod patch;
pub mod reflection;
pub mod serialized;
pub mod signature;
mod sink;
pub mod spirv;
pub mod transcoder;

pub use archiver::Archiver;
pub use backend::{Backend, BackendFlags, ChunkKind};
pub use config::ArchiverConfig;
pub use error::{ArchiverError, Result, SerializeError, TranscoderError};
pub use manifest::{ArchiveManifest, ManifestError, ManifestOutcome};

/// Creates an archiver holding every item of a manifest file
///
/// The archiver uses the built-in transcoders and the manifest's configuration.
/// Items that fail to archive are dropped and reported in the outcome.
///
/// # Arguments
/// * `manifest_path` - Path to a JSON or YAML manifest
/// * `default_backends` - Backends of items that do not name their own
///
/// # Returns
/// The archiver, ready to serialize, and the items it accepted and dropped
pub fn archiver_from_manifest<P: AsRef<std::path::Path>>(manifest_path: P, default_backends: BackendFlags) -> std::result::Result<(Archiver, ManifestOutcome), ManifestError> {
    let manifest = ArchiveManifest::from_file(manifest_path)?;
    let mut archiver = Archiver::new(transcoder::TranscoderRegistry::with_defaults(), manifest.config.clone());
    let outcome = manifest.add_to(&mut archiver, default_backends);
    tracing::info!("Archived {} items, dropped {}", outcome.added, outcome.dropped.len());
    Ok((archiver, outcome))
}
