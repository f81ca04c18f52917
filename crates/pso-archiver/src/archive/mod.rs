//! The DLAR archive container
//!
//! `format` defines the on-disk layout, `builder` assembles an image from the
//! deduplicated index and `reader` parses an image back into typed views.

mod builder;
mod format;
mod reader;

pub use builder::{ArchiveImage, build_archive};
pub use format::{ARCHIVE_MAGIC, ARCHIVE_VERSION, ArchiveHeader, COMMON_REGION, ChunkHeader, DATA_ALIGNMENT, DataHeader, INVALID_OFFSET};
pub use reader::{ArchiveReadError, ArchiveReader, DebugInfo, DevicePipelineView, NamedResource, PipelineView, ShaderView, SignatureView};
