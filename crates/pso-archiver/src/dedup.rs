//! Deduplicated archive contents
//!
//! Shaders are interned per backend by content, signatures and render passes are
//! keyed by name with a content check, and pipelines are keyed by chunk and name.
//! Synthesized default signatures are keyed by name only.
//! New content is staged first and committed in one infallible step, so a failed
//! `add_*` call never leaves partial state behind.

use crate::backend::{BACKEND_COUNT, Backend, BackendFlags, ChunkKind};
use crate::error::{ArchiverError, Result};
use crate::patch::PatchedPipeline;
use crate::serialized::SerializedBlob;
use crate::transcoder::CompiledShader;
use std::collections::{BTreeMap, HashMap};

/// Shaders of one backend in archive order
#[derive(Debug, Default, Clone)]
pub struct ShaderStore {
    shaders: Vec<SerializedBlob>,
    index: HashMap<SerializedBlob, u32>,
}

impl ShaderStore {
    /// Returns the index of an equal shader, appending the shader if there is none
    pub fn intern(&mut self, shader: &SerializedBlob) -> u32 {
        if let Some(&index) = self.index.get(shader) {
            return index;
        }
        let index = self.shaders.len() as u32;
        self.shaders.push(shader.clone());
        self.index.insert(shader.clone(), index);
        index
    }

    pub fn get(&self, index: u32) -> Option<&SerializedBlob> {
        self.shaders.get(index as usize)
    }

    pub fn len(&self) -> usize {
        self.shaders.len()
    }

    pub fn is_empty(&self) -> bool {
        self.shaders.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &SerializedBlob> {
        self.shaders.iter()
    }

    /// Keeps the shaders flagged in `referenced`, in their current order
    ///
    /// # Returns
    /// The new index of every old index, `None` for dropped shaders
    fn compact(&mut self, referenced: &[bool]) -> Vec<Option<u32>> {
        let mut kept = ShaderStore::default();
        let remap = self.shaders.iter().zip(referenced).map(|(shader, &keep)| keep.then(|| kept.intern(shader))).collect();
        *self = kept;
        remap
    }
}

/// An archived signature: the backend-agnostic description and per-backend bindings
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignatureRecord {
    pub common: SerializedBlob,
    pub device: [Option<SerializedBlob>; BACKEND_COUNT],
}

impl SignatureRecord {
    pub fn new(common: SerializedBlob) -> Self {
        Self { common, device: Default::default() }
    }

    /// Backends the record has data for
    pub fn backends(&self) -> BackendFlags {
        Backend::ALL.into_iter().filter(|backend| self.device[backend.index()].is_some()).collect()
    }

    /// Takes over backend data this record does not have yet
    fn merge(&mut self, other: SignatureRecord) {
        for (mine, theirs) in self.device.iter_mut().zip(other.device) {
            if mine.is_none() {
                *mine = theirs;
            }
        }
    }
}

/// Data of an archived pipeline on one backend
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DevicePipeline {
    /// Indices into the backend's shader store, in pipeline order
    pub shaders: Vec<u32>,
    pub header: SerializedBlob,
}

/// A pipeline ready to be committed
#[derive(Debug, Clone)]
pub struct StagedPipeline {
    pub kind: ChunkKind,
    pub name: String,
    /// Everything the caller provided; two adds under one name must agree on it
    pub source: SerializedBlob,
    pub desc: SerializedBlob,
    pub signatures: Vec<String>,
    pub render_pass: Option<String>,
    pub layout_ids: Vec<(Backend, u64)>,
    pub device: [Option<PatchedPipeline>; BACKEND_COUNT],
}

/// An archived pipeline
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PipelineRecord {
    pub source: SerializedBlob,
    pub desc: SerializedBlob,
    pub signatures: Vec<String>,
    pub render_pass: Option<String>,
    pub layout_ids: Vec<(Backend, u64)>,
    pub device: [Option<DevicePipeline>; BACKEND_COUNT],
}

impl PipelineRecord {
    /// Backends the record has data for
    pub fn backends(&self) -> BackendFlags {
        Backend::ALL.into_iter().filter(|backend| self.device[backend.index()].is_some()).collect()
    }
}

/// Everything one `add_*` call adds to the archive
#[derive(Debug, Default)]
pub struct Staging {
    pub signatures: Vec<(String, SignatureRecord)>,
    /// Synthesized signature owned by the staged pipeline; replaces an archived one of the same name
    pub default_signature: Option<(String, SignatureRecord)>,
    pub render_pass: Option<(String, SerializedBlob)>,
    pub pipeline: Option<StagedPipeline>,
}

impl Staging {
    /// Stages a signature, merging with one staged earlier under the same name
    pub fn add_signature(&mut self, name: String, record: SignatureRecord) {
        match self.signatures.iter_mut().find(|(staged, _)| *staged == name) {
            Some((_, staged)) => staged.merge(record),
            None => self.signatures.push((name, record)),
        }
    }
}

/// Deduplicated contents of an archive
#[derive(Debug, Default)]
pub struct DedupIndex {
    pub(crate) shaders: [ShaderStore; BACKEND_COUNT],
    pub(crate) signatures: BTreeMap<String, SignatureRecord>,
    pub(crate) render_passes: BTreeMap<String, SerializedBlob>,
    pub(crate) pipelines: BTreeMap<(ChunkKind, String), PipelineRecord>,
}

impl DedupIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Checks that a signature does not clash with an archived one of the same name
    ///
    /// # Returns
    /// The archived record, if there is one with equal content
    pub fn check_signature(&self, name: &str, common: &SerializedBlob) -> Result<Option<&SignatureRecord>> {
        match self.signatures.get(name) {
            Some(existing) if existing.common != *common => Err(ArchiverError::DuplicateName {
                kind: ChunkKind::ResourceSignatures,
                name: name.to_string(),
            }),
            existing => Ok(existing),
        }
    }

    /// Checks that a render pass does not clash with an archived one of the same name
    pub fn check_render_pass(&self, name: &str, blob: &SerializedBlob) -> Result<bool> {
        match self.render_passes.get(name) {
            Some(existing) if existing != blob => Err(ArchiverError::DuplicateName {
                kind: ChunkKind::RenderPasses,
                name: name.to_string(),
            }),
            existing => Ok(existing.is_some()),
        }
    }

    pub fn signature(&self, name: &str) -> Option<&SignatureRecord> {
        self.signatures.get(name)
    }

    pub fn pipeline(&self, kind: ChunkKind, name: &str) -> Option<&PipelineRecord> {
        self.pipelines.get(&(kind, name.to_string()))
    }

    pub fn shaders(&self, backend: Backend) -> &ShaderStore {
        &self.shaders[backend.index()]
    }

    /// Adds staged content to the index
    pub fn commit(&mut self, staging: Staging) {
        for (name, record) in staging.signatures {
            match self.signatures.get_mut(&name) {
                Some(existing) => existing.merge(record),
                None => {
                    self.signatures.insert(name, record);
                }
            }
        }

        if let Some((name, record)) = staging.default_signature {
            self.signatures.insert(name, record);
        }

        if let Some((name, blob)) = staging.render_pass {
            self.render_passes.entry(name).or_insert(blob);
        }

        if let Some(staged) = staging.pipeline {
            let mut device: [Option<DevicePipeline>; BACKEND_COUNT] = Default::default();
            for (backend, patched) in Backend::ALL.into_iter().zip(staged.device) {
                let Some(patched) = patched else { continue };
                let store = &mut self.shaders[backend.index()];
                device[backend.index()] = Some(DevicePipeline {
                    shaders: patched.shaders.iter().map(|shader| store.intern(shader)).collect(),
                    header: patched.header,
                });
            }
            let record = PipelineRecord {
                source: staged.source,
                desc: staged.desc,
                signatures: staged.signatures,
                render_pass: staged.render_pass,
                layout_ids: staged.layout_ids,
                device,
            };
            if self.pipelines.insert((staged.kind, staged.name), record).is_some() {
                self.release_unreferenced_shaders();
            }
        }
    }

    /// Drops shaders no archived pipeline refers to and renumbers the rest
    ///
    /// Only a replaced pipeline can leave shaders behind.
    fn release_unreferenced_shaders(&mut self) {
        for backend in Backend::ALL {
            let slot = backend.index();
            let mut referenced = vec![false; self.shaders[slot].len()];
            for device in self.pipelines.values().filter_map(|record| record.device[slot].as_ref()) {
                for &shader in &device.shaders {
                    if let Some(flag) = referenced.get_mut(shader as usize) {
                        *flag = true;
                    }
                }
            }
            if referenced.iter().all(|&flag| flag) {
                continue;
            }

            let remap = self.shaders[slot].compact(&referenced);
            for device in self.pipelines.values_mut().filter_map(|record| record.device[slot].as_mut()) {
                for shader in &mut device.shaders {
                    if let Some(&Some(index)) = remap.get(*shader as usize) {
                        *shader = index;
                    }
                }
            }
            tracing::debug!("Released {} unreferenced {backend} shaders", remap.iter().filter(|index| index.is_none()).count());
        }
    }
}

/// Compiled shaders keyed by backend and serialized create info
///
/// A shader shared by several pipelines is compiled once per backend.
#[derive(Debug, Default)]
pub struct TranscodeCache {
    shaders: HashMap<(Backend, SerializedBlob), CompiledShader>,
}

impl TranscodeCache {
    pub fn get(&self, backend: Backend, shader: &SerializedBlob) -> Option<&CompiledShader> {
        self.shaders.get(&(backend, shader.clone()))
    }

    pub fn insert(&mut self, backend: Backend, shader: SerializedBlob, compiled: CompiledShader) {
        self.shaders.insert((backend, shader), compiled);
    }

    pub fn len(&self) -> usize {
        self.shaders.len()
    }

    pub fn is_empty(&self) -> bool {
        self.shaders.is_empty()
    }
}
