//! Archive manifests
//!
//! A manifest lists the signatures and pipelines of one archive, optionally with the
//! archiver configuration and per-item backends. Manifests are JSON or YAML; shader
//! files are resolved relative to the manifest.

use crate::archiver::Archiver;
use crate::backend::{Backend, BackendFlags};
use crate::config::ArchiverConfig;
use crate::desc::{ArchiveFlags, PipelineCreateInfo, RenderPassDesc, ResourceSignatureDesc};
use crate::error::ArchiverError;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Backends items are archived for when neither the item nor the caller names any
///
/// These are the backends the built-in transcoders serve.
pub const DEFAULT_BACKENDS: BackendFlags = BackendFlags::VULKAN.union(BackendFlags::GL).union(BackendFlags::GLES).union(BackendFlags::METAL_MACOS).union(BackendFlags::METAL_IOS);

/// Errors raised while loading a manifest
#[derive(Debug, thiserror::Error)]
pub enum ManifestError {
    #[error("failed to read '{path}': {source}")]
    Io { path: PathBuf, source: std::io::Error },

    #[error("failed to parse JSON manifest: {0}")]
    Json(#[from] serde_json::Error),

    #[error("failed to parse YAML manifest: {0}")]
    Yaml(#[from] serde_norway::Error),

    #[error("manifest '{0}' is neither .json, .yaml nor .yml")]
    UnknownFormat(PathBuf),

    #[error("failed to load shader '{shader}' of pipeline '{pipeline}': {source}")]
    ShaderFile { pipeline: String, shader: String, source: std::io::Error },
}

/// A signature entry of a manifest
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct SignatureEntry {
    #[serde(flatten)]
    pub desc: ResourceSignatureDesc,
    /// Backends to archive for; the caller's default when absent
    #[serde(default)]
    pub backends: Option<Vec<Backend>>,
}

/// A pipeline entry of a manifest
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct PipelineEntry {
    #[serde(flatten)]
    pub info: PipelineCreateInfo,
    /// Backends to archive for; the caller's default when absent
    #[serde(default)]
    pub backends: Option<Vec<Backend>>,
}

/// Contents of one archive
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
pub struct ArchiveManifest {
    #[serde(default)]
    pub config: ArchiverConfig,
    #[serde(default)]
    pub signatures: Vec<SignatureEntry>,
    /// Render passes shared by graphics pipelines
    #[serde(default)]
    pub render_passes: Vec<RenderPassDesc>,
    #[serde(default)]
    pub pipelines: Vec<PipelineEntry>,
}

/// An item the archiver rejected
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DroppedItem {
    pub name: String,
    pub error: ArchiverError,
}

/// Result of adding a manifest's items to an archiver
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ManifestOutcome {
    pub added: usize,
    pub dropped: Vec<DroppedItem>,
}

impl ManifestOutcome {
    /// Whether every item was added
    pub fn is_complete(&self) -> bool {
        self.dropped.is_empty()
    }
}

fn flags(backends: Option<&[Backend]>, default_backends: BackendFlags) -> ArchiveFlags {
    ArchiveFlags::new(backends.map_or(default_backends, |backends| backends.iter().copied().collect()))
}

impl ArchiveManifest {
    pub fn from_json(json_content: &str) -> Result<Self, ManifestError> {
        Ok(serde_json::from_str(json_content)?)
    }

    pub fn from_yaml(yaml_content: &str) -> Result<Self, ManifestError> {
        Ok(serde_norway::from_str(yaml_content)?)
    }

    /// Loads a manifest file and the shader files it references
    ///
    /// # Arguments
    /// * `path` - Path to a `.json`, `.yaml` or `.yml` manifest
    ///
    /// # Returns
    /// The manifest with every shader source inline
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ManifestError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|source| ManifestError::Io { path: path.to_path_buf(), source })?;
        let extension = path.extension().and_then(|extension| extension.to_str()).map(str::to_ascii_lowercase);
        let mut manifest = match extension.as_deref() {
            Some("json") => Self::from_json(&content)?,
            Some("yaml" | "yml") => Self::from_yaml(&content)?,
            _ => return Err(ManifestError::UnknownFormat(path.to_path_buf())),
        };

        let dir = path.parent().unwrap_or_else(|| Path::new("."));
        manifest.resolve_files(|filename| std::fs::read(dir.join(filename)))?;
        Ok(manifest)
    }

    /// Replaces shader file references with the file contents
    ///
    /// # Arguments
    /// * `load_file` - Callback returning the contents of a file given its manifest-relative path
    pub fn resolve_files<F>(&mut self, mut load_file: F) -> Result<(), ManifestError>
    where
        F: FnMut(&str) -> std::io::Result<Vec<u8>>,
    {
        for entry in &mut self.pipelines {
            let pipeline = entry.info.name().to_string();
            for shader in entry.info.shaders_mut() {
                if !shader.source.is_file() {
                    continue;
                }
                shader.source = shader.source.clone().resolve(&mut load_file).map_err(|source| ManifestError::ShaderFile {
                    pipeline: pipeline.clone(),
                    shader: shader.name.clone(),
                    source,
                })?;
            }
        }
        Ok(())
    }

    /// Adds every item to an archiver: signatures, then render passes, then pipelines
    ///
    /// Items the archiver rejects are logged and reported; the remaining items are
    /// still added.
    ///
    /// # Arguments
    /// * `archiver` - Archiver to add to
    /// * `default_backends` - Backends of items that do not name their own
    pub fn add_to(&self, archiver: &mut Archiver, default_backends: BackendFlags) -> ManifestOutcome {
        let mut outcome = ManifestOutcome::default();
        let mut record = |name: &str, result: Result<(), ArchiverError>| match result {
            Ok(()) => outcome.added += 1,
            Err(error) => {
                tracing::warn!("Dropping '{name}': {error}");
                outcome.dropped.push(DroppedItem { name: name.to_string(), error });
            }
        };

        for entry in &self.signatures {
            let result = archiver.add_signature(&entry.desc, flags(entry.backends.as_deref(), default_backends));
            record(&entry.desc.name, result);
        }
        for render_pass in &self.render_passes {
            record(&render_pass.name, archiver.add_render_pass(render_pass));
        }
        for entry in &self.pipelines {
            let result = archiver.add_pipeline(entry.info.clone(), flags(entry.backends.as_deref(), default_backends));
            record(entry.info.name(), result);
        }
        outcome
    }
}
