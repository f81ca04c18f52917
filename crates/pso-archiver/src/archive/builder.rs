//! Archive assembly
//!
//! The image is produced in two passes. The layout pass measures every region as
//! `u64` and rejects archives that 32-bit offsets cannot address, before a single
//! byte is written. The write pass serializes the common region first, patches the
//! backend offsets of each record into it as the backend regions are written, and
//! only then emits the chunk directory that points into both.

use super::format::{ARCHIVE_MAGIC, ARCHIVE_VERSION, ArchiveHeader, COMMON_REGION, ChunkHeader, DATA_ALIGNMENT, DataHeader, INVALID_OFFSET, NAMED_RESOURCE_ENTRY_SIZE, SHADER_ENTRY_SIZE};
use crate::backend::{BACKEND_COUNT, Backend, ChunkKind};
use crate::dedup::DedupIndex;
use crate::error::{ArchiverError, Result};
use crate::serialized::Serializer;
use bytes::Bytes;
use std::collections::HashMap;

static PADDING: [u8; DATA_ALIGNMENT] = [0; DATA_ALIGNMENT];

/// A finished archive as an ordered list of byte pieces
#[derive(Debug, Clone)]
pub struct ArchiveImage {
    pub pieces: Vec<Bytes>,
    pub size: u64,
}

/// One record of the common region with its backend data
struct Record<'a> {
    kind: ChunkKind,
    name: &'a str,
    payload: Bytes,
    device: [Option<Bytes>; BACKEND_COUNT],
}

fn aligned(size: u64) -> u64 {
    size.next_multiple_of(DATA_ALIGNMENT as u64)
}

fn to_u32(value: usize) -> Result<u32> {
    u32::try_from(value).map_err(|_| ArchiverError::InvariantViolation(format!("offset {value} passed the size check but does not fit in 32 bits")))
}

/// Builds the archive image of the index
///
/// # Arguments
/// * `index` - Deduplicated archive contents
/// * `builder_id` - Written into the debug info chunk when present
/// * `size_limit` - Largest image size accepted; offsets are 32-bit, so at most `u32::MAX`
///
/// # Returns
/// The image, or `SerializationOverflow` when it would exceed the limit
pub fn build_archive(index: &DedupIndex, builder_id: Option<&str>, size_limit: u64) -> Result<ArchiveImage> {
    let records = collect_records(index)?;

    // Layout pass
    let size = measure(index, &records, builder_id);
    if size > size_limit {
        return Err(ArchiverError::SerializationOverflow { size });
    }

    // Write pass
    let image = write(index, &records, builder_id)?;
    let written: u64 = image.pieces.iter().map(|piece| piece.len() as u64).sum();
    if written != size {
        return Err(ArchiverError::InvariantViolation(format!("archive layout predicted {size} bytes, but {written} were written")));
    }
    tracing::debug!("Built archive of {size} bytes in {} pieces", image.pieces.len());
    Ok(image)
}

/// Orders the records of the common region: signatures, render passes, then pipelines by kind
fn collect_records(index: &DedupIndex) -> Result<Vec<Record<'_>>> {
    let signature_indices: HashMap<&str, u32> = index.signatures.keys().enumerate().map(|(i, name)| (name.as_str(), i as u32)).collect();
    let render_pass_indices: HashMap<&str, u32> = index.render_passes.keys().enumerate().map(|(i, name)| (name.as_str(), i as u32)).collect();

    let mut records = Vec::with_capacity(index.signatures.len() + index.render_passes.len() + index.pipelines.len());
    for (name, signature) in &index.signatures {
        records.push(Record {
            kind: ChunkKind::ResourceSignatures,
            name,
            payload: signature.common.bytes(),
            device: signature.device.each_ref().map(|blob| blob.as_ref().map(|blob| blob.bytes())),
        });
    }
    for (name, render_pass) in &index.render_passes {
        records.push(Record {
            kind: ChunkKind::RenderPasses,
            name,
            payload: render_pass.bytes(),
            device: Default::default(),
        });
    }

    for ((kind, name), pipeline) in &index.pipelines {
        let mut s = Serializer::new();
        s.write_bytes(pipeline.desc.as_bytes());
        s.write_len(pipeline.signatures.len());
        for signature in &pipeline.signatures {
            let signature_index = signature_indices
                .get(signature.as_str())
                .ok_or_else(|| ArchiverError::InvariantViolation(format!("pipeline '{name}' uses signature '{signature}', which is not archived")))?;
            s.write_u32(*signature_index);
        }
        let render_pass_index = match &pipeline.render_pass {
            Some(render_pass) => *render_pass_indices
                .get(render_pass.as_str())
                .ok_or_else(|| ArchiverError::InvariantViolation(format!("pipeline '{name}' uses render pass '{render_pass}', which is not archived")))?,
            None => INVALID_OFFSET,
        };
        s.write_u32(render_pass_index);
        s.write_len(pipeline.layout_ids.len());
        for (backend, layout_id) in &pipeline.layout_ids {
            s.write_u32(*backend as u32);
            s.write_u64(*layout_id);
        }

        let mut device: [Option<Bytes>; BACKEND_COUNT] = Default::default();
        for backend in Backend::ALL {
            let Some(data) = &pipeline.device[backend.index()] else { continue };
            let store = index.shaders(backend);
            if let Some(&missing) = data.shaders.iter().find(|&&shader| store.get(shader).is_none()) {
                return Err(ArchiverError::InvariantViolation(format!("pipeline '{name}' uses {backend} shader {missing}, but there are only {}", store.len())));
            }
            let mut s = Serializer::new();
            s.write_slice(&data.shaders);
            s.write_bytes(data.header.as_bytes());
            device[backend.index()] = Some(s.into_bytes());
        }

        records.push(Record {
            kind: *kind,
            name,
            payload: s.into_bytes(),
            device,
        });
    }
    Ok(records)
}

/// Named chunks present in the archive, in kind order
fn named_chunks<'r, 'a>(records: &'r [Record<'a>]) -> Vec<(ChunkKind, Vec<(usize, &'r Record<'a>)>)> {
    ChunkKind::ALL
        .into_iter()
        .filter(|kind| kind.is_named())
        .map(|kind| (kind, records.iter().enumerate().filter(|(_, record)| record.kind == kind).collect::<Vec<_>>()))
        .filter(|(_, entries)| !entries.is_empty())
        .collect()
}

fn named_chunk_size(entries: &[(usize, &Record<'_>)]) -> u64 {
    let names: u64 = entries.iter().map(|(_, record)| record.name.len() as u64 + 1).sum();
    aligned(4 + (NAMED_RESOURCE_ENTRY_SIZE * entries.len()) as u64 + names)
}

fn debug_info_size(builder_id: &str) -> u64 {
    aligned(8 + builder_id.len() as u64)
}

const SHADERS_CHUNK_SIZE: u64 = (SHADER_ENTRY_SIZE * BACKEND_COUNT) as u64;

/// Computes the size of the image without writing it
fn measure(index: &DedupIndex, records: &[Record<'_>], builder_id: Option<&str>) -> u64 {
    let mut chunks: Vec<u64> = Vec::new();
    if let Some(builder_id) = builder_id {
        chunks.push(debug_info_size(builder_id));
    }
    chunks.extend(named_chunks(records).iter().map(|(_, entries)| named_chunk_size(entries)));
    if Backend::ALL.iter().any(|backend| !index.shaders(*backend).is_empty()) {
        chunks.push(SHADERS_CHUNK_SIZE);
    }

    let directory = ArchiveHeader::SIZE as u64 + (ChunkHeader::SIZE * chunks.len()) as u64 + chunks.iter().sum::<u64>();
    let common: u64 = records.iter().map(|record| aligned(DataHeader::SIZE as u64 + record.payload.len() as u64)).sum();
    let backends: u64 = Backend::ALL
        .into_iter()
        .map(|backend| {
            let device: u64 = records.iter().filter_map(|record| record.device[backend.index()].as_ref()).map(|data| aligned(data.len() as u64)).sum();
            let store = index.shaders(backend);
            let shaders = if store.is_empty() {
                0
            } else {
                4 + (SHADER_ENTRY_SIZE * store.len()) as u64 + store.iter().map(|shader| aligned(shader.len() as u64)).sum::<u64>()
            };
            device + shaders
        })
        .sum();
    directory + common + backends
}

fn write(index: &DedupIndex, records: &[Record<'_>], builder_id: Option<&str>) -> Result<ArchiveImage> {
    // Common region, with every backend offset left invalid for now
    let mut common = Serializer::new();
    let mut locations = Vec::with_capacity(records.len());
    for record in records {
        let start = common.position();
        DataHeader::new(record.kind).write(&mut common);
        common.write_raw(&record.payload);
        locations.push((start, common.position() - start));
        common.align(DATA_ALIGNMENT);
    }

    // Backend regions; each record's offset and size slots are patched once its data is placed
    let mut regions: Vec<(Backend, Vec<Bytes>, usize)> = Vec::new();
    let mut shader_tables = [(INVALID_OFFSET, 0u32); BACKEND_COUNT];
    for backend in Backend::ALL {
        let mut region = Serializer::new();
        for (record, &(start, _)) in records.iter().zip(&locations) {
            let Some(data) = &record.device[backend.index()] else { continue };
            let offset = region.position();
            region.write_raw(data);
            common.patch_u32(start + DataHeader::device_offset_position(backend), to_u32(offset)?);
            common.patch_u32(start + DataHeader::device_size_position(backend), to_u32(data.len())?);
            region.align(DATA_ALIGNMENT);
        }

        let store = index.shaders(backend);
        let mut shader_pieces = Vec::new();
        if !store.is_empty() {
            let table = region.position();
            region.write_len(store.len());
            let mut offset = table + 4 + SHADER_ENTRY_SIZE * store.len();
            for shader in store.iter() {
                region.write_u32(to_u32(offset)?);
                region.write_u32(to_u32(shader.len())?);
                shader_pieces.push(shader.bytes());
                let padding = shader.len().next_multiple_of(DATA_ALIGNMENT) - shader.len();
                if padding > 0 {
                    shader_pieces.push(Bytes::from_static(&PADDING[..padding]));
                }
                offset += shader.len().next_multiple_of(DATA_ALIGNMENT);
            }
            shader_tables[backend.index()] = (to_u32(table)?, to_u32(offset - table)?);
        }

        let head = region.into_bytes();
        let size = head.len() + shader_pieces.iter().map(Bytes::len).sum::<usize>();
        if size > 0 {
            let mut pieces = vec![head];
            pieces.extend(shader_pieces);
            regions.push((backend, pieces, size));
        }
    }
    let common = common.into_bytes();

    // Chunk bodies
    let mut bodies: Vec<(ChunkKind, Bytes)> = Vec::new();
    if let Some(builder_id) = builder_id {
        let mut s = Serializer::new();
        s.write_u32(ARCHIVE_VERSION);
        s.write_str(builder_id);
        s.align(DATA_ALIGNMENT);
        bodies.push((ChunkKind::ArchiveDebugInfo, s.into_bytes()));
    }
    for (kind, entries) in named_chunks(records) {
        let mut s = Serializer::new();
        s.write_len(entries.len());
        let mut name_offset = 4 + NAMED_RESOURCE_ENTRY_SIZE * entries.len();
        for (record_index, record) in &entries {
            let (data_offset, data_size) = locations[*record_index];
            s.write_u32(to_u32(name_offset)?);
            s.write_u32(to_u32(data_offset)?);
            s.write_u32(to_u32(data_size)?);
            name_offset += record.name.len() + 1;
        }
        for (_, record) in &entries {
            s.write_raw(record.name.as_bytes());
            s.write_u8(0);
        }
        s.align(DATA_ALIGNMENT);
        bodies.push((kind, s.into_bytes()));
    }
    if regions.iter().any(|(backend, ..)| shader_tables[backend.index()].0 != INVALID_OFFSET) {
        let mut s = Serializer::new();
        for (offset, size) in shader_tables {
            s.write_u32(offset);
            s.write_u32(size);
        }
        bodies.push((ChunkKind::Shaders, s.into_bytes()));
    }

    // Directory
    let directory_size = ArchiveHeader::SIZE + ChunkHeader::SIZE * bodies.len() + bodies.iter().map(|(_, body)| body.len()).sum::<usize>();
    let mut base_offsets = [u64::from(INVALID_OFFSET); BACKEND_COUNT + 1];
    base_offsets[COMMON_REGION] = directory_size as u64;
    let mut next_region = directory_size + common.len();
    for (backend, _, size) in &regions {
        base_offsets[backend.index()] = next_region as u64;
        next_region += size;
    }

    let mut directory = Serializer::new();
    ArchiveHeader {
        magic: ARCHIVE_MAGIC,
        version: ARCHIVE_VERSION,
        num_chunks: to_u32(bodies.len())?,
        base_offsets,
    }
    .write(&mut directory);
    let mut body_offset = ArchiveHeader::SIZE + ChunkHeader::SIZE * bodies.len();
    for (kind, body) in &bodies {
        ChunkHeader {
            kind: *kind,
            size: to_u32(body.len())?,
            offset: to_u32(body_offset)?,
        }
        .write(&mut directory);
        body_offset += body.len();
    }
    for (_, body) in &bodies {
        directory.write_raw(body);
    }

    let mut pieces = vec![directory.into_bytes(), common];
    for (_, region, _) in regions {
        pieces.extend(region);
    }
    pieces.retain(|piece| !piece.is_empty());
    let size = pieces.iter().map(|piece| piece.len() as u64).sum();
    Ok(ArchiveImage { pieces, size })
}
