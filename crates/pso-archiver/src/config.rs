//! Archiver configuration

use serde::{Deserialize, Serialize};

/// Options that affect how shaders are compiled and what the archive contains
#[derive(Debug, Clone, PartialEq, Eq, Hash, Deserialize, Serialize)]
#[serde(default)]
pub struct ArchiverConfig {
    /// Compile HLSL for Direct3D12 to DXIL instead of DXBC
    pub d3d12_use_dxil: bool,
    /// Desktop GLSL version written into OpenGL shaders
    pub gl_version: u32,
    /// GLSL ES version written into OpenGL ES shaders
    pub gles_version: u32,
    /// Metal shading language version as (major, minor)
    pub msl_version: [u8; 2],
    /// Emit the ArchiveDebugInfo chunk
    pub write_debug_info: bool,
}

impl Default for ArchiverConfig {
    fn default() -> Self {
        Self {
            d3d12_use_dxil: false,
            gl_version: 430,
            gles_version: 310,
            msl_version: [2, 1],
            write_debug_info: true,
        }
    }
}
