//! Archive reader
//!
//! Parses an archive image and gives typed views of its records. Every offset is
//! bounds-checked; malformed archives produce an `ArchiveReadError`, never a panic.

use super::format::{ARCHIVE_MAGIC, ARCHIVE_VERSION, ArchiveHeader, COMMON_REGION, ChunkHeader, DataHeader, INVALID_OFFSET, NAMED_RESOURCE_ENTRY_SIZE, SHADER_ENTRY_SIZE};
use crate::backend::{BACKEND_COUNT, Backend, CHUNK_KIND_COUNT, ChunkKind};
use crate::desc::ShaderStage;
use crate::serialized::{DeserializeError, Deserializer};
use bytes::Bytes;

/// Errors raised while reading an archive
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ArchiveReadError {
    #[error("not an archive: bad magic {0:#010x}")]
    BadMagic(u32),

    #[error("archive version {found} is not supported, expected {expected}")]
    VersionMismatch { found: u32, expected: u32 },

    #[error(transparent)]
    Malformed(#[from] DeserializeError),

    #[error("{what} at {offset}..{end} is outside {bounds}")]
    OutOfBounds { what: String, offset: u64, end: u64, bounds: String },

    #[error("unknown chunk kind {0}")]
    UnknownChunk(u32),

    #[error("the archive has more than one {0} chunk")]
    DuplicateChunk(ChunkKind),

    #[error("{kind} '{name}' is not in the archive")]
    NotFound { kind: ChunkKind, name: String },

    #[error("inconsistent archive: {0}")]
    Inconsistent(String),
}

type Result<T, E = ArchiveReadError> = std::result::Result<T, E>;

/// Entry of a named-resource array
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NamedResource {
    pub name: String,
    /// From the start of the common region
    pub offset: u32,
    pub size: u32,
}

/// Contents of the debug info chunk
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DebugInfo {
    pub version: u32,
    pub builder_id: String,
}

/// An archived signature
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignatureView<'a> {
    pub common: &'a [u8],
    pub device: [Option<&'a [u8]>; BACKEND_COUNT],
}

/// Data of an archived pipeline on one backend
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DevicePipelineView<'a> {
    /// Indices into the backend's shader list
    pub shaders: Vec<u32>,
    pub header: &'a [u8],
}

/// An archived pipeline
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PipelineView<'a> {
    pub desc: &'a [u8],
    /// Indices into the resource signature chunk
    pub signatures: Vec<u32>,
    /// Index into the render pass chunk
    pub render_pass: Option<u32>,
    pub layout_ids: Vec<(Backend, u64)>,
    pub device: [Option<DevicePipelineView<'a>>; BACKEND_COUNT],
}

/// An archived shader
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShaderView<'a> {
    pub stage: ShaderStage,
    pub entry_point: &'a str,
    /// Tag of the source language the shader was compiled from
    pub language: u32,
    pub code: &'a [u8],
}

/// A record of the common region
struct RecordView<'a> {
    kind: u32,
    device_offsets: [u32; BACKEND_COUNT],
    device_sizes: [u32; BACKEND_COUNT],
    payload: &'a [u8],
}

/// Read access to an archive image
#[derive(Debug, Clone)]
pub struct ArchiveReader {
    data: Bytes,
    header: ArchiveHeader,
    chunks: Vec<ChunkHeader>,
    named: [Vec<NamedResource>; CHUNK_KIND_COUNT],
    debug_info: Option<DebugInfo>,
    shader_tables: [Option<(u32, u32)>; BACKEND_COUNT],
}

fn slice<'a>(data: &'a [u8], offset: u64, size: u64, what: impl FnOnce() -> String) -> Result<&'a [u8]> {
    let end = offset.saturating_add(size);
    if end > data.len() as u64 {
        return Err(ArchiveReadError::OutOfBounds {
            what: what(),
            offset,
            end,
            bounds: format!("the {} bytes available", data.len()),
        });
    }
    Ok(&data[offset as usize..end as usize])
}

impl ArchiveReader {
    /// Opens an archive of the current version
    pub fn open(data: impl Into<Bytes>) -> Result<Self> {
        Self::open_with_version(data, ARCHIVE_VERSION)
    }

    /// Opens an archive, accepting only `expected_version`
    pub fn open_with_version(data: impl Into<Bytes>, expected_version: u32) -> Result<Self> {
        let data = data.into();
        let mut d = Deserializer::new(&data);
        let header = ArchiveHeader::read(&mut d)?;
        if header.magic != ARCHIVE_MAGIC {
            return Err(ArchiveReadError::BadMagic(header.magic));
        }
        if header.version != expected_version {
            return Err(ArchiveReadError::VersionMismatch { found: header.version, expected: expected_version });
        }

        let mut chunks: Vec<ChunkHeader> = Vec::with_capacity(header.num_chunks.min(CHUNK_KIND_COUNT as u32) as usize);
        for _ in 0..header.num_chunks {
            let (kind, size, offset) = ChunkHeader::read(&mut d)?;
            let kind = ChunkKind::from_u32(kind).ok_or(ArchiveReadError::UnknownChunk(kind))?;
            if chunks.iter().any(|chunk| chunk.kind == kind) {
                return Err(ArchiveReadError::DuplicateChunk(kind));
            }
            chunks.push(ChunkHeader { kind, size, offset });
        }

        let mut reader = Self {
            data,
            header,
            chunks: Vec::new(),
            named: Default::default(),
            debug_info: None,
            shader_tables: [None; BACKEND_COUNT],
        };
        for chunk in &chunks {
            reader.parse_chunk(chunk)?;
        }
        reader.chunks = chunks;
        Ok(reader)
    }

    fn parse_chunk(&mut self, chunk: &ChunkHeader) -> Result<()> {
        let body = slice(&self.data, chunk.offset as u64, chunk.size as u64, || format!("{} chunk", chunk.kind))?;
        let mut d = Deserializer::new(body);
        match chunk.kind {
            ChunkKind::ArchiveDebugInfo => {
                let version = d.read_u32()?;
                let builder_id = d.read_str()?.to_string();
                self.debug_info = Some(DebugInfo { version, builder_id });
            }
            ChunkKind::Shaders => {
                for table in &mut self.shader_tables {
                    let offset = d.read_u32()?;
                    let size = d.read_u32()?;
                    *table = (offset != INVALID_OFFSET).then_some((offset, size));
                }
            }
            kind => {
                let count = d.read_count(NAMED_RESOURCE_ENTRY_SIZE)?;
                let mut entries = Vec::with_capacity(count);
                for _ in 0..count {
                    let name_offset = d.read_u32()? as usize;
                    let offset = d.read_u32()?;
                    let size = d.read_u32()?;
                    let name_bytes = body.get(name_offset..).unwrap_or_default();
                    let name_len = name_bytes.iter().position(|&b| b == 0).ok_or_else(|| ArchiveReadError::Inconsistent(format!("unterminated name in the {kind} chunk")))?;
                    let name = std::str::from_utf8(&name_bytes[..name_len]).map_err(|e| ArchiveReadError::Inconsistent(format!("name in the {kind} chunk is not UTF-8: {e}")))?;
                    entries.push(NamedResource { name: name.to_string(), offset, size });
                }
                self.named[kind.index()] = entries;
            }
        }
        Ok(())
    }

    pub fn version(&self) -> u32 {
        self.header.version
    }

    pub fn header(&self) -> &ArchiveHeader {
        &self.header
    }

    /// Chunks in archive order
    pub fn chunks(&self) -> &[ChunkHeader] {
        &self.chunks
    }

    pub fn debug_info(&self) -> Option<&DebugInfo> {
        self.debug_info.as_ref()
    }

    pub fn size(&self) -> usize {
        self.data.len()
    }

    /// Entries of a named chunk in archive order; empty when the chunk is absent
    pub fn named_resources(&self, kind: ChunkKind) -> &[NamedResource] {
        &self.named[kind.index()]
    }

    pub fn find(&self, kind: ChunkKind, name: &str) -> Option<&NamedResource> {
        self.named_resources(kind).iter().find(|entry| entry.name == name)
    }

    fn lookup(&self, kind: ChunkKind, name: &str) -> Result<&NamedResource> {
        self.find(kind, name).ok_or_else(|| ArchiveReadError::NotFound { kind, name: name.to_string() })
    }

    fn record(&self, kind: ChunkKind, entry: &NamedResource) -> Result<RecordView<'_>> {
        let common = self.header.base_offsets[COMMON_REGION];
        let bytes = slice(&self.data, common.saturating_add(entry.offset as u64), entry.size as u64, || format!("{kind} '{}'", entry.name))?;
        let mut d = Deserializer::new(bytes);
        let (record_kind, device_offsets, device_sizes) = DataHeader::read(&mut d)?;
        if record_kind != kind as u32 {
            return Err(ArchiveReadError::Inconsistent(format!("{kind} '{}' has a record of kind {record_kind}", entry.name)));
        }
        Ok(RecordView {
            kind: record_kind,
            device_offsets,
            device_sizes,
            payload: &bytes[DataHeader::SIZE..],
        })
    }

    fn device_data(&self, backend: Backend, record: &RecordView<'_>, name: &str) -> Result<Option<&[u8]>> {
        let offset = record.device_offsets[backend.index()];
        if offset == INVALID_OFFSET {
            return Ok(None);
        }
        let region = self.header.backend_region(backend).ok_or_else(|| ArchiveReadError::Inconsistent(format!("'{name}' has {backend} data, but the archive has no {backend} region")))?;
        let (start, end) = self.region_bounds(backend, region);
        let data_start = start.saturating_add(offset as u64);
        let data_end = data_start.saturating_add(record.device_sizes[backend.index()] as u64);
        if data_end > end {
            return Err(ArchiveReadError::OutOfBounds {
                what: format!("{backend} data of '{name}'"),
                offset: data_start,
                end: data_end,
                bounds: format!("the {backend} region {start}..{end}"),
            });
        }
        Ok(Some(&self.data[data_start as usize..data_end as usize]))
    }

    /// Start and end of a region: it ends where the next region starts
    fn region_bounds(&self, backend: Backend, start: u64) -> (u64, u64) {
        let end = Backend::ALL[backend.index() + 1..]
            .iter()
            .filter_map(|next| self.header.backend_region(*next))
            .min()
            .unwrap_or(self.data.len() as u64);
        (start, end)
    }

    /// Looks up a signature by name
    pub fn signature(&self, name: &str) -> Result<SignatureView<'_>> {
        let entry = self.lookup(ChunkKind::ResourceSignatures, name)?;
        let record = self.record(ChunkKind::ResourceSignatures, entry)?;
        let mut device = [None; BACKEND_COUNT];
        for backend in Backend::ALL {
            device[backend.index()] = self.device_data(backend, &record, name)?;
        }
        Ok(SignatureView { common: record.payload, device })
    }

    /// Looks up a render pass by name, returning its serialized description
    pub fn render_pass(&self, name: &str) -> Result<&[u8]> {
        let entry = self.lookup(ChunkKind::RenderPasses, name)?;
        Ok(self.record(ChunkKind::RenderPasses, entry)?.payload)
    }

    /// Looks up a pipeline by chunk and name
    pub fn pipeline(&self, kind: ChunkKind, name: &str) -> Result<PipelineView<'_>> {
        let entry = self.lookup(kind, name)?;
        let record = self.record(kind, entry)?;

        let mut d = Deserializer::new(record.payload);
        let desc = d.read_bytes()?;
        let signature_count = d.read_count(4)?;
        let signatures = (0..signature_count).map(|_| d.read_u32()).collect::<Result<Vec<_>, _>>()?;
        let render_pass = Some(d.read_u32()?).filter(|&index| index != INVALID_OFFSET);
        let layout_count = d.read_count(12)?;
        let mut layout_ids = Vec::with_capacity(layout_count);
        for _ in 0..layout_count {
            let backend = d.read_u32()?;
            let backend = Backend::from_index(backend as usize).ok_or_else(|| ArchiveReadError::Inconsistent(format!("pipeline '{name}' has a layout for unknown backend {backend}")))?;
            layout_ids.push((backend, d.read_u64()?));
        }

        let mut device: [Option<DevicePipelineView<'_>>; BACKEND_COUNT] = Default::default();
        for backend in Backend::ALL {
            let Some(data) = self.device_data(backend, &record, name)? else { continue };
            let mut d = Deserializer::new(data);
            let shader_count = d.read_count(4)?;
            let shaders = (0..shader_count).map(|_| d.read_u32()).collect::<Result<Vec<_>, _>>()?;
            let header = d.read_bytes()?;
            device[backend.index()] = Some(DevicePipelineView { shaders, header });
        }

        Ok(PipelineView {
            desc,
            signatures,
            render_pass,
            layout_ids,
            device,
        })
    }

    /// Shaders of one backend in archive order
    pub fn shaders(&self, backend: Backend) -> Result<Vec<ShaderView<'_>>> {
        let Some((table_offset, table_size)) = self.shader_tables[backend.index()] else {
            return Ok(Vec::new());
        };
        let region = self.header.backend_region(backend).ok_or_else(|| ArchiveReadError::Inconsistent(format!("the archive has {backend} shaders, but no {backend} region")))?;
        let (start, end) = self.region_bounds(backend, region);
        let table_start = start.saturating_add(table_offset as u64);
        if table_start.saturating_add(table_size as u64) > end {
            return Err(ArchiveReadError::OutOfBounds {
                what: format!("{backend} shader table"),
                offset: table_start,
                end: table_start.saturating_add(table_size as u64),
                bounds: format!("the {backend} region {start}..{end}"),
            });
        }
        let region_bytes = &self.data[start as usize..end as usize];

        let mut d = Deserializer::new(&region_bytes[table_offset as usize..]);
        let count = d.read_count(SHADER_ENTRY_SIZE)?;
        let mut shaders = Vec::with_capacity(count);
        for index in 0..count {
            let offset = d.read_u32()?;
            let size = d.read_u32()?;
            let bytes = slice(region_bytes, offset as u64, size as u64, || format!("{backend} shader {index}"))?;

            let mut s = Deserializer::new(bytes);
            let bits = s.read_u32()?;
            let stage = ShaderStage::ALL.into_iter().find(|stage| stage.flag().bits() == bits).ok_or_else(|| ArchiveReadError::Inconsistent(format!("{backend} shader {index} has an invalid stage")))?;
            let entry_point = s.read_str()?;
            let language = s.read_u32()?;
            let code = s.read_bytes()?;
            shaders.push(ShaderView { stage, entry_point, language, code });
        }
        Ok(shaders)
    }

    /// Checks that every offset in the archive points inside its region
    ///
    /// Also checks that pipelines only reference archived signatures, render passes
    /// and shaders.
    pub fn verify_offsets(&self) -> Result<()> {
        let common = self.header.base_offsets[COMMON_REGION];
        let common_end = Backend::ALL.iter().filter_map(|backend| self.header.backend_region(*backend)).min().unwrap_or(self.data.len() as u64);
        if common > common_end {
            return Err(ArchiveReadError::Inconsistent(format!("common region starts at {common}, after the first backend region at {common_end}")));
        }

        let shader_counts = Backend::ALL.map(|backend| self.shaders(backend).map(|shaders| shaders.len()));
        for kind in ChunkKind::ALL.into_iter().filter(|kind| kind.is_named()) {
            for entry in self.named_resources(kind) {
                let end = common + entry.offset as u64 + entry.size as u64;
                if end > common_end || (entry.size as usize) < DataHeader::SIZE {
                    return Err(ArchiveReadError::OutOfBounds {
                        what: format!("{kind} '{}'", entry.name),
                        offset: common + entry.offset as u64,
                        end,
                        bounds: format!("the common region {common}..{common_end}"),
                    });
                }
                let record = self.record(kind, entry)?;
                debug_assert_eq!(record.kind, kind as u32);
                for backend in Backend::ALL {
                    self.device_data(backend, &record, &entry.name)?;
                }

                if !matches!(kind, ChunkKind::ResourceSignatures | ChunkKind::RenderPasses) {
                    let pipeline = self.pipeline(kind, &entry.name)?;
                    let signature_count = self.named_resources(ChunkKind::ResourceSignatures).len() as u32;
                    if let Some(index) = pipeline.signatures.iter().find(|&&index| index >= signature_count) {
                        return Err(ArchiveReadError::Inconsistent(format!("{kind} '{}' uses signature {index} of {signature_count}", entry.name)));
                    }
                    let render_pass_count = self.named_resources(ChunkKind::RenderPasses).len() as u32;
                    if let Some(index) = pipeline.render_pass.filter(|&index| index >= render_pass_count) {
                        return Err(ArchiveReadError::Inconsistent(format!("{kind} '{}' uses render pass {index} of {render_pass_count}", entry.name)));
                    }
                    for backend in Backend::ALL {
                        let Some(device) = &pipeline.device[backend.index()] else { continue };
                        let count = shader_counts[backend.index()].clone()? as u32;
                        if let Some(index) = device.shaders.iter().find(|&&index| index >= count) {
                            return Err(ArchiveReadError::Inconsistent(format!("{kind} '{}' uses {backend} shader {index} of {count}", entry.name)));
                        }
                    }
                }
            }
        }
        Ok(())
    }
}
