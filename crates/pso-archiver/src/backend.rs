//! Backend and chunk tags
//!
//! Closed enumerations whose ordinals are written into the archive. Changing an
//! ordinal is an incompatible format change and requires bumping the archive version.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Number of graphics backends an archive can carry data for
pub const BACKEND_COUNT: usize = 7;

/// Number of chunk kinds an archive can contain
pub const CHUNK_KIND_COUNT: usize = 8;

/// A graphics API family with its own native shader format and binding model
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
#[repr(u32)]
pub enum Backend {
    /// Direct3D 11 (DXBC)
    D3D11 = 0,
    /// Direct3D 12 (DXBC or DXIL)
    D3D12 = 1,
    /// Desktop OpenGL (GLSL source)
    Gl = 2,
    /// OpenGL ES (GLSL ES source)
    Gles = 3,
    /// Vulkan (SPIR-V)
    Vulkan = 4,
    /// Metal on macOS (MSL)
    MetalMacos = 5,
    /// Metal on iOS (MSL)
    MetalIos = 6,
}

impl Backend {
    /// All backends in ordinal order
    pub const ALL: [Backend; BACKEND_COUNT] = [
        Backend::D3D11,
        Backend::D3D12,
        Backend::Gl,
        Backend::Gles,
        Backend::Vulkan,
        Backend::MetalMacos,
        Backend::MetalIos,
    ];

    /// Stable ordinal of this backend
    pub const fn index(self) -> usize {
        self as usize
    }

    /// Returns the backend with the given ordinal, if any
    pub fn from_index(index: usize) -> Option<Self> {
        Self::ALL.get(index).copied()
    }

    /// The flag bit corresponding to this backend
    pub const fn flag(self) -> BackendFlags {
        BackendFlags::from_bits_truncate(1 << self as u32)
    }

    /// Whether this is one of the OpenGL family backends
    pub const fn is_gl(self) -> bool {
        matches!(self, Backend::Gl | Backend::Gles)
    }

    /// Whether this is one of the Metal backends
    pub const fn is_metal(self) -> bool {
        matches!(self, Backend::MetalMacos | Backend::MetalIos)
    }

    /// Lowercase tag used on the command line and in manifests
    pub const fn tag(self) -> &'static str {
        match self {
            Backend::D3D11 => "d3d11",
            Backend::D3D12 => "d3d12",
            Backend::Gl => "gl",
            Backend::Gles => "gles",
            Backend::Vulkan => "vulkan",
            Backend::MetalMacos => "metal_macos",
            Backend::MetalIos => "metal_ios",
        }
    }
}

impl fmt::Display for Backend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Backend::D3D11 => "Direct3D11",
            Backend::D3D12 => "Direct3D12",
            Backend::Gl => "OpenGL",
            Backend::Gles => "OpenGLES",
            Backend::Vulkan => "Vulkan",
            Backend::MetalMacos => "Metal (macOS)",
            Backend::MetalIos => "Metal (iOS)",
        };
        f.write_str(name)
    }
}

impl std::str::FromStr for Backend {
    type Err = UnknownBackend;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let lowered = s.to_ascii_lowercase();
        Backend::ALL.into_iter().find(|backend| backend.tag() == lowered).ok_or_else(|| UnknownBackend(s.to_string()))
    }
}

/// Error returned when parsing an unknown backend tag
#[derive(Debug, Clone, thiserror::Error)]
#[error("unknown backend '{0}' (expected one of d3d11, d3d12, gl, gles, vulkan, metal_macos, metal_ios)")]
pub struct UnknownBackend(pub String);

bitflags::bitflags! {
    /// Set of backends an item should be archived for
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
    pub struct BackendFlags: u32 {
        const D3D11 = 1 << 0;
        const D3D12 = 1 << 1;
        const GL = 1 << 2;
        const GLES = 1 << 3;
        const VULKAN = 1 << 4;
        const METAL_MACOS = 1 << 5;
        const METAL_IOS = 1 << 6;
    }
}

impl BackendFlags {
    /// Iterates the backends in this set in ordinal order
    pub fn backends(self) -> impl Iterator<Item = Backend> {
        Backend::ALL.into_iter().filter(move |backend| self.contains(backend.flag()))
    }
}

impl FromIterator<Backend> for BackendFlags {
    fn from_iter<I: IntoIterator<Item = Backend>>(iter: I) -> Self {
        iter.into_iter().fold(BackendFlags::empty(), |flags, backend| flags | backend.flag())
    }
}

/// Kind of an archive chunk
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(u32)]
pub enum ChunkKind {
    ArchiveDebugInfo = 0,
    ResourceSignatures = 1,
    GraphicsPipelines = 2,
    ComputePipelines = 3,
    RayTracingPipelines = 4,
    TilePipelines = 5,
    RenderPasses = 6,
    Shaders = 7,
}

impl ChunkKind {
    /// All chunk kinds in ordinal order
    pub const ALL: [ChunkKind; CHUNK_KIND_COUNT] = [
        ChunkKind::ArchiveDebugInfo,
        ChunkKind::ResourceSignatures,
        ChunkKind::GraphicsPipelines,
        ChunkKind::ComputePipelines,
        ChunkKind::RayTracingPipelines,
        ChunkKind::TilePipelines,
        ChunkKind::RenderPasses,
        ChunkKind::Shaders,
    ];

    /// Stable ordinal of this chunk kind
    pub const fn index(self) -> usize {
        self as usize
    }

    /// Returns the chunk kind with the given ordinal, if any
    pub fn from_u32(value: u32) -> Option<Self> {
        Self::ALL.get(value as usize).copied()
    }

    /// Whether the chunk body is a named-resource array
    pub const fn is_named(self) -> bool {
        !matches!(self, ChunkKind::ArchiveDebugInfo | ChunkKind::Shaders)
    }
}

impl fmt::Display for ChunkKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ChunkKind::ArchiveDebugInfo => "archive debug info",
            ChunkKind::ResourceSignatures => "resource signature",
            ChunkKind::GraphicsPipelines => "graphics pipeline",
            ChunkKind::ComputePipelines => "compute pipeline",
            ChunkKind::RayTracingPipelines => "ray tracing pipeline",
            ChunkKind::TilePipelines => "tile pipeline",
            ChunkKind::RenderPasses => "render pass",
            ChunkKind::Shaders => "shaders",
        };
        f.write_str(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backend_ordinals_are_stable() {
        for (index, backend) in Backend::ALL.iter().enumerate() {
            assert_eq!(backend.index(), index);
            assert_eq!(Backend::from_index(index), Some(*backend));
        }
        assert_eq!(Backend::Vulkan as u32, 4);
        assert_eq!(Backend::from_index(BACKEND_COUNT), None);
    }

    #[test]
    fn test_backend_parsing() {
        assert_eq!("vulkan".parse::<Backend>().unwrap(), Backend::Vulkan);
        assert_eq!("D3D12".parse::<Backend>().unwrap(), Backend::D3D12);
        assert_eq!("metal_ios".parse::<Backend>().unwrap(), Backend::MetalIos);
        assert!("directx".parse::<Backend>().is_err());
    }

    #[test]
    fn test_backend_flags() {
        let flags: BackendFlags = [Backend::Vulkan, Backend::D3D12].into_iter().collect();
        assert_eq!(flags, BackendFlags::VULKAN | BackendFlags::D3D12);
        assert_eq!(flags.backends().collect::<Vec<_>>(), vec![Backend::D3D12, Backend::Vulkan]);
        assert_eq!(Backend::MetalIos.flag(), BackendFlags::METAL_IOS);
    }
}
