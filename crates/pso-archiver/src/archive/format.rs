//! Binary layout of the archive
//!
//! ```text
//! ArchiveHeader       magic, version, chunk count, base offsets of the backend regions and the common region
//! ChunkHeader * N     kind, size, offset; ordered by kind
//! chunk bodies        named-resource arrays, debug info, shader table locations
//! common region       DataHeader + payload per record
//! backend regions     per-record backend data, then the shader table
//! ```
//!
//! All integers are little-endian. Offsets that do not point anywhere are
//! `INVALID_OFFSET`.

use crate::backend::{BACKEND_COUNT, Backend, ChunkKind};
use crate::serialized::{DeserializeError, Deserializer, SERIALIZATION_VERSION, Serializer};

/// `b"DLAR"` read as a little-endian `u32`
pub const ARCHIVE_MAGIC: u32 = u32::from_le_bytes(*b"DLAR");

/// Version of the archive format; bumped on every incompatible change
pub const ARCHIVE_VERSION: u32 = SERIALIZATION_VERSION;

pub const INVALID_OFFSET: u32 = 0xFFFF_FFFF;

/// Index of the common region in `ArchiveHeader::base_offsets`
pub const COMMON_REGION: usize = BACKEND_COUNT;

/// Alignment of records, chunk bodies and shaders
pub const DATA_ALIGNMENT: usize = 4;

/// Archive header
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ArchiveHeader {
    pub magic: u32,
    pub version: u32,
    pub num_chunks: u32,
    /// Backend regions in backend order, then the common region
    pub base_offsets: [u64; BACKEND_COUNT + 1],
}

impl ArchiveHeader {
    pub const SIZE: usize = 12 + 8 * (BACKEND_COUNT + 1);

    pub fn write(&self, s: &mut Serializer) {
        s.write_u32(self.magic);
        s.write_u32(self.version);
        s.write_u32(self.num_chunks);
        for offset in self.base_offsets {
            s.write_u64(offset);
        }
    }

    pub fn read(d: &mut Deserializer<'_>) -> Result<Self, DeserializeError> {
        let magic = d.read_u32()?;
        let version = d.read_u32()?;
        let num_chunks = d.read_u32()?;
        let mut base_offsets = [0; BACKEND_COUNT + 1];
        for offset in &mut base_offsets {
            *offset = d.read_u64()?;
        }
        Ok(Self { magic, version, num_chunks, base_offsets })
    }

    /// Offset of a backend region, if the archive has one
    pub fn backend_region(&self, backend: Backend) -> Option<u64> {
        Some(self.base_offsets[backend.index()]).filter(|&offset| offset != u64::from(INVALID_OFFSET))
    }
}

/// Location of one chunk body
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkHeader {
    pub kind: ChunkKind,
    pub size: u32,
    /// From the start of the archive
    pub offset: u32,
}

impl ChunkHeader {
    pub const SIZE: usize = 12;

    pub fn write(&self, s: &mut Serializer) {
        s.write_u32(self.kind as u32);
        s.write_u32(self.size);
        s.write_u32(self.offset);
    }

    pub fn read(d: &mut Deserializer<'_>) -> Result<(u32, u32, u32), DeserializeError> {
        Ok((d.read_u32()?, d.read_u32()?, d.read_u32()?))
    }
}

/// Header of every record in the common region
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DataHeader {
    pub kind: ChunkKind,
    /// From the start of each backend region
    pub device_offsets: [u32; BACKEND_COUNT],
    pub device_sizes: [u32; BACKEND_COUNT],
}

impl DataHeader {
    pub const SIZE: usize = 4 + 8 * BACKEND_COUNT;

    pub fn new(kind: ChunkKind) -> Self {
        Self {
            kind,
            device_offsets: [INVALID_OFFSET; BACKEND_COUNT],
            device_sizes: [0; BACKEND_COUNT],
        }
    }

    /// Offset of `device_offsets[backend]` within the serialized header
    pub const fn device_offset_position(backend: Backend) -> usize {
        4 + 4 * backend.index()
    }

    /// Offset of `device_sizes[backend]` within the serialized header
    pub const fn device_size_position(backend: Backend) -> usize {
        4 + 4 * BACKEND_COUNT + 4 * backend.index()
    }

    pub fn write(&self, s: &mut Serializer) {
        s.write_u32(self.kind as u32);
        for offset in self.device_offsets {
            s.write_u32(offset);
        }
        for size in self.device_sizes {
            s.write_u32(size);
        }
    }

    pub fn read(d: &mut Deserializer<'_>) -> Result<(u32, [u32; BACKEND_COUNT], [u32; BACKEND_COUNT]), DeserializeError> {
        let kind = d.read_u32()?;
        let mut device_offsets = [0; BACKEND_COUNT];
        for offset in &mut device_offsets {
            *offset = d.read_u32()?;
        }
        let mut device_sizes = [0; BACKEND_COUNT];
        for size in &mut device_sizes {
            *size = d.read_u32()?;
        }
        Ok((kind, device_offsets, device_sizes))
    }
}

/// Size of a named-resource array entry: name offset, data offset, data size
pub const NAMED_RESOURCE_ENTRY_SIZE: usize = 12;

/// Size of a shader table entry: offset, size
pub const SHADER_ENTRY_SIZE: usize = 8;
