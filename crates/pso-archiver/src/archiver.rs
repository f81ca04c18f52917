//! Pipeline state archiver
//!
//! `Archiver` is the public entry point: callers add pipelines, signatures and
//! render passes, then serialize the archive. Every add compiles and patches its
//! shaders eagerly and stages the result; nothing reaches the index unless the
//! whole add succeeds.

use crate::archive::{ArchiveImage, build_archive};
use crate::backend::{Backend, BackendFlags, ChunkKind};
use crate::config::ArchiverConfig;
use crate::dedup::{DedupIndex, SignatureRecord, StagedPipeline, Staging, TranscodeCache};
use crate::desc::{
    ArchiveFlags, ComputePipelineCreateInfo, GraphicsPipelineCreateInfo, PipelineCreateInfo, RayTracingPipelineCreateInfo, RenderPassDesc, ResourceSignatureDesc, TilePipelineCreateInfo,
};
use crate::error::{ArchiverError, Result, SerializeError};
use crate::patch::{patch_pipeline, patcher_for};
use crate::serialized::{SerializedBlob, Serializer};
use crate::signature::{PipelineLayout, check_binding_indices, layout_id, synthesize_default_signature, validate_signatures};
use crate::sink;
use crate::transcoder::{CompiledShader, TranscoderRegistry};
use bytes::Bytes;
use std::io::Write;

/// Written into the debug info chunk
const BUILDER_ID: &str = concat!("pso-archiver ", env!("CARGO_PKG_VERSION"));

/// Builds one archive from pipeline, signature and render pass descriptions
#[derive(Debug)]
pub struct Archiver {
    registry: TranscoderRegistry,
    config: ArchiverConfig,
    index: DedupIndex,
    cache: TranscodeCache,
    /// Largest image `serialize_*` accepts
    size_limit: u64,
}

/// Shaders of a pipeline compiled for one backend
struct BackendShaders {
    backend: Backend,
    shaders: Vec<CompiledShader>,
}

impl Archiver {
    /// Creates an archiver
    ///
    /// # Arguments
    /// * `registry` - Transcoders available to every add
    /// * `config` - Compilation options
    pub fn new(registry: TranscoderRegistry, config: ArchiverConfig) -> Self {
        Self {
            registry,
            config,
            index: DedupIndex::new(),
            cache: TranscodeCache::default(),
            size_limit: u32::MAX as u64,
        }
    }

    pub fn config(&self) -> &ArchiverConfig {
        &self.config
    }

    /// Deduplicated contents added so far
    pub fn index(&self) -> &DedupIndex {
        &self.index
    }

    #[cfg(test)]
    pub(crate) fn set_size_limit(&mut self, size_limit: u64) {
        self.size_limit = size_limit;
    }

    pub fn add_graphics_pso(&mut self, info: GraphicsPipelineCreateInfo, flags: ArchiveFlags) -> Result<()> {
        self.add_pipeline(info.into(), flags)
    }

    pub fn add_compute_pso(&mut self, info: ComputePipelineCreateInfo, flags: ArchiveFlags) -> Result<()> {
        self.add_pipeline(info.into(), flags)
    }

    pub fn add_ray_tracing_pso(&mut self, info: RayTracingPipelineCreateInfo, flags: ArchiveFlags) -> Result<()> {
        self.add_pipeline(info.into(), flags)
    }

    pub fn add_tile_pso(&mut self, info: TilePipelineCreateInfo, flags: ArchiveFlags) -> Result<()> {
        self.add_pipeline(info.into(), flags)
    }

    /// Adds a pipeline of any kind
    ///
    /// Re-adding a pipeline with identical content succeeds without changing the
    /// archive; re-adding it for more backends extends it to the union of backends.
    /// On error the archiver is left unchanged.
    pub fn add_pipeline(&mut self, info: PipelineCreateInfo, flags: ArchiveFlags) -> Result<()> {
        info.validate().map_err(ArchiverError::InvalidDescription)?;
        if flags.backends.is_empty() {
            return Err(ArchiverError::invalid(format!("pipeline '{}' targets no backends", info.name())));
        }

        let kind = info.chunk_kind();
        let name = info.name().to_string();
        let source = pipeline_source(&info);

        // Identical content is shared; backends it already has need no work
        let mut backends = flags.backends;
        let replacing = match self.index.pipeline(kind, &name) {
            Some(existing) if existing.source != source => return Err(ArchiverError::DuplicateName { kind, name }),
            Some(existing) => {
                let archived = existing.backends();
                if archived.contains(backends) {
                    tracing::debug!("{kind} '{name}' is already archived for the requested backends");
                    return Ok(());
                }
                backends |= archived;
                true
            }
            None => false,
        };

        let mut staging = Staging::default();
        let mut transcoded = Vec::new();

        // Received -> Transcoded
        let compiled = self.transcode_all(&info, backends, &mut transcoded)?;

        // Transcoded -> SignatureResolved
        let explicit = &info.desc().resource_signatures;
        let signatures = if explicit.is_empty() {
            self.resolve_default_signature(&info, &compiled, replacing, &mut staging)?
        } else {
            self.resolve_explicit_signatures(explicit, &compiled, &mut staging)?
        };

        // SignatureResolved -> Patched
        let mut device: [Option<_>; crate::backend::BACKEND_COUNT] = Default::default();
        let mut layout_ids = Vec::new();
        for BackendShaders { backend, shaders } in &compiled {
            let patcher = patcher_for(*backend);
            let gl_default;
            let layout_signatures: Vec<&ResourceSignatureDesc> = match &signatures {
                Some(signatures) => signatures.iter().collect(),
                None => Vec::new(),
            };
            let layout_signatures = if backend.is_gl() && explicit.is_empty() {
                // GL lays out its own default signature, which is not archived
                gl_default = synthesize_default_signature(&name, shaders.iter().map(|shader| &shader.reflection), &info.desc().resource_layout)?;
                vec![&gl_default]
            } else {
                layout_signatures
            };

            let layout = PipelineLayout::new(*backend, &layout_signatures)?;
            let blobs = layout.signatures.iter().map(|signature| signature.to_blob()).collect::<Vec<_>>();
            layout_ids.push((*backend, layout_id(&blobs)));
            device[backend.index()] = Some(patch_pipeline(patcher, &layout, shaders)?);
        }

        if let Some(render_pass) = info.render_pass() {
            let blob = SerializedBlob::from_value(render_pass);
            if !self.index.check_render_pass(&render_pass.name, &blob)? {
                staging.render_pass = Some((render_pass.name.clone(), blob));
            }
        }

        staging.pipeline = Some(StagedPipeline {
            kind,
            name: name.clone(),
            source,
            desc: SerializedBlob::from_value(&info),
            signatures: signatures.iter().flatten().map(|signature| signature.name.clone()).collect(),
            render_pass: info.render_pass().map(|render_pass| render_pass.name.clone()),
            layout_ids,
            device,
        });

        // Patched -> Interned
        self.index.commit(staging);
        for (backend, key, shader) in transcoded {
            self.cache.insert(backend, key, shader);
        }
        tracing::debug!("Archived {kind} '{name}' for {} backends", backends.backends().count());
        Ok(())
    }

    /// Compiles every shader of a pipeline for every backend
    ///
    /// Shaders missing from the cache are compiled and returned through `transcoded`,
    /// to be cached once the add succeeds.
    fn transcode_all(&self, info: &PipelineCreateInfo, backends: BackendFlags, transcoded: &mut Vec<(Backend, SerializedBlob, CompiledShader)>) -> Result<Vec<BackendShaders>> {
        let shaders = info.shaders();
        let mut compiled = Vec::new();
        for backend in backends.backends() {
            let patcher = patcher_for(backend);
            let mut backend_shaders = Vec::with_capacity(shaders.len());
            for shader in &shaders {
                let key = SerializedBlob::from_value(*shader);
                let cached = self.cache.get(backend, &key).or_else(|| transcoded.iter().find(|(b, k, _)| *b == backend && *k == key).map(|(_, _, shader)| shader));
                let shader = match cached {
                    Some(shader) => shader.clone(),
                    None => {
                        let shader = patcher.transcode(&self.registry, shader, &self.config)?;
                        transcoded.push((backend, key, shader.clone()));
                        shader
                    }
                };
                backend_shaders.push(shader);
            }
            compiled.push(BackendShaders { backend, shaders: backend_shaders });
        }
        Ok(compiled)
    }

    /// Validates caller signatures against reflection and stages them
    ///
    /// # Returns
    /// The signatures ordered by binding index
    fn resolve_explicit_signatures(&self, explicit: &[ResourceSignatureDesc], compiled: &[BackendShaders], staging: &mut Staging) -> Result<Option<Vec<ResourceSignatureDesc>>> {
        check_binding_indices(explicit)?;
        for BackendShaders { shaders, .. } in compiled {
            for shader in shaders {
                validate_signatures(explicit, &shader.reflection)?;
            }
        }

        for signature in explicit {
            let common = SerializedBlob::from_value(signature);
            if let Some((_, staged)) = staging.signatures.iter().find(|(name, _)| *name == signature.name) {
                if staged.common != common {
                    return Err(ArchiverError::DuplicateName { kind: ChunkKind::ResourceSignatures, name: signature.name.clone() });
                }
            }
            let existing = self.index.check_signature(&signature.name, &common)?;
            let record = signature_record(signature, common, existing, compiled.iter().map(|shaders| shaders.backend))?;
            staging.add_signature(signature.name.clone(), record);
        }

        let mut ordered = explicit.to_vec();
        ordered.sort_by_key(|signature| signature.binding_index);
        Ok(Some(ordered))
    }

    /// Synthesizes the default signature from the reflection of every non-GL backend
    ///
    /// # Returns
    /// `None` when the pipeline only targets GL backends, which lay out their own
    /// default signature
    fn resolve_default_signature(&self, info: &PipelineCreateInfo, compiled: &[BackendShaders], replacing: bool, staging: &mut Staging) -> Result<Option<Vec<ResourceSignatureDesc>>> {
        let non_gl: Vec<&BackendShaders> = compiled.iter().filter(|shaders| !shaders.backend.is_gl()).collect();
        if non_gl.is_empty() {
            return Ok(None);
        }

        let reflections = non_gl.iter().flat_map(|shaders| shaders.shaders.iter().map(|shader| &shader.reflection));
        let signature = synthesize_default_signature(info.name(), reflections, &info.desc().resource_layout)?;
        let common = SerializedBlob::from_value(&signature);

        // Defaults are owned by their pipeline: a replaced pipeline replaces its default
        let existing = match self.index.signature(&signature.name) {
            Some(existing) if existing.common != common && !replacing => {
                return Err(ArchiverError::DuplicateName { kind: ChunkKind::ResourceSignatures, name: signature.name.clone() });
            }
            Some(existing) if existing.common == common => Some(existing),
            _ => None,
        };
        let record = signature_record(&signature, common, existing, non_gl.iter().map(|shaders| shaders.backend))?;
        staging.default_signature = Some((signature.name.clone(), record));
        Ok(Some(vec![signature]))
    }

    /// Adds a standalone signature for the requested backends
    pub fn add_signature(&mut self, desc: &ResourceSignatureDesc, flags: ArchiveFlags) -> Result<()> {
        if desc.name.is_empty() {
            return Err(ArchiverError::invalid("signature name must not be empty"));
        }
        if flags.backends.is_empty() {
            return Err(ArchiverError::invalid(format!("signature '{}' targets no backends", desc.name)));
        }

        let common = SerializedBlob::from_value(desc);
        let existing = self.index.check_signature(&desc.name, &common)?;
        if existing.is_some_and(|existing| existing.backends().contains(flags.backends)) {
            tracing::debug!("Signature '{}' is already archived for the requested backends", desc.name);
            return Ok(());
        }

        let record = signature_record(desc, common, existing, flags.backends.backends())?;
        let mut staging = Staging::default();
        staging.add_signature(desc.name.clone(), record);
        self.index.commit(staging);
        tracing::debug!("Archived signature '{}'", desc.name);
        Ok(())
    }

    /// Adds a render pass; graphics pipelines add theirs through here
    pub(crate) fn add_render_pass(&mut self, desc: &RenderPassDesc) -> Result<()> {
        desc.validate().map_err(ArchiverError::InvalidDescription)?;
        let blob = SerializedBlob::from_value(desc);
        if !self.index.check_render_pass(&desc.name, &blob)? {
            self.index.commit(Staging {
                render_pass: Some((desc.name.clone(), blob)),
                ..Default::default()
            });
        }
        Ok(())
    }

    fn build(&self) -> Result<ArchiveImage> {
        let builder_id = self.config.write_debug_info.then_some(BUILDER_ID);
        build_archive(&self.index, builder_id, self.size_limit)
    }

    /// Serializes the archive into one buffer
    pub fn serialize_to_blob(self) -> Result<Bytes> {
        Ok(sink::to_blob(self.build()?))
    }

    /// Serializes the archive to a stream
    ///
    /// The archive is laid out completely before the first write, so an archive that
    /// is too large leaves the stream untouched.
    ///
    /// # Returns
    /// The number of bytes written
    pub fn serialize_to_stream<W: Write + ?Sized>(self, writer: &mut W) -> Result<u64, SerializeError> {
        let image = self.build()?;
        Ok(sink::to_stream(&image, writer)?)
    }
}

/// Everything the caller provided for a pipeline
///
/// Two adds under one name are the same pipeline only if this matches.
fn pipeline_source(info: &PipelineCreateInfo) -> SerializedBlob {
    let mut s = Serializer::new();
    s.write(info);
    let shaders = info.shaders();
    s.write_len(shaders.len());
    for shader in shaders {
        s.write(shader);
    }
    s.write_slice(&info.desc().resource_signatures);
    s.write_option(info.render_pass());
    s.finish()
}

/// Builds a signature record with backend data for `backends`
///
/// Backend data an archived record already has is reused.
fn signature_record(desc: &ResourceSignatureDesc, common: SerializedBlob, existing: Option<&SignatureRecord>, backends: impl IntoIterator<Item = Backend>) -> Result<SignatureRecord> {
    let mut record = SignatureRecord::new(common);
    for backend in backends {
        let archived = existing.and_then(|existing| existing.device[backend.index()].clone());
        record.device[backend.index()] = Some(match archived {
            Some(blob) => blob,
            None => patcher_for(backend).serialize_signature(desc)?,
        });
    }
    Ok(record)
}
