//! Per-backend pipeline patching
//!
//! Every backend has a patcher that compiles shaders through the registry, lays out
//! signatures in its binding model, rewrites shader bindings to match the pipeline
//! layout and emits the per-backend header stored with each pipeline.

mod d3d11;
mod d3d12;
mod gl;
mod metal;
mod vulkan;

use crate::backend::Backend;
use crate::config::ArchiverConfig;
use crate::desc::{InputLanguage, ResourceSignatureDesc, ShaderCreateInfo, ShaderStage};
use crate::error::{ArchiverError, Result};
use crate::reflection::ReflectedResource;
use crate::serialized::{Serializable, SerializedBlob, Serializer};
use crate::signature::{LayoutBinding, PipelineLayout, SignatureLayout};
use crate::transcoder::{CompiledShader, TranscoderRegistry};
use bytes::Bytes;

pub use d3d11::D3D11Patcher;
pub use d3d12::D3D12Patcher;
pub use gl::GlPatcher;
pub use metal::MetalPatcher;
pub use vulkan::VulkanPatcher;

/// Magic of the DXBC container that wraps both DXBC and DXIL bytecode
const DXBC_MAGIC: &[u8; 4] = b"DXBC";

/// Backend-specific steps of archiving a pipeline
pub trait BackendPatcher: Send + Sync {
    fn backend(&self) -> Backend;

    /// Compiles a shader for this backend
    fn transcode(&self, registry: &TranscoderRegistry, shader: &ShaderCreateInfo, config: &ArchiverConfig) -> Result<CompiledShader> {
        registry.compile(self.backend(), shader, config)
    }

    /// Serializes the backend data of a signature
    fn serialize_signature(&self, desc: &ResourceSignatureDesc) -> Result<SerializedBlob> {
        Ok(SignatureLayout::standalone(self.backend(), desc)?.to_blob())
    }

    /// Rewrites the bindings of a compiled shader to match the pipeline layout
    fn patch_shader(&self, shader: &CompiledShader, layout: &PipelineLayout) -> Result<Bytes>;

    /// Header stored with the pipeline's data for this backend
    fn device_header(&self, layout: &PipelineLayout, shaders: &[CompiledShader]) -> Result<SerializedBlob>;
}

/// Looks up the patcher of a backend
pub fn patcher_for(backend: Backend) -> &'static dyn BackendPatcher {
    match backend {
        Backend::D3D11 => &D3D11Patcher,
        Backend::D3D12 => &D3D12Patcher,
        Backend::Gl => &GlPatcher { backend: Backend::Gl },
        Backend::Gles => &GlPatcher { backend: Backend::Gles },
        Backend::Vulkan => &VulkanPatcher,
        Backend::MetalMacos => &MetalPatcher { backend: Backend::MetalMacos },
        Backend::MetalIos => &MetalPatcher { backend: Backend::MetalIos },
    }
}

/// Data of one pipeline on one backend
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PatchedPipeline {
    /// Shader records in pipeline order
    pub shaders: Vec<SerializedBlob>,
    pub header: SerializedBlob,
}

/// Patches every shader of a pipeline and builds its backend header
///
/// # Arguments
/// * `patcher` - Patcher of the target backend
/// * `layout` - Pipeline layout on that backend
/// * `shaders` - Compiled shaders of the pipeline in pipeline order
pub fn patch_pipeline(patcher: &dyn BackendPatcher, layout: &PipelineLayout, shaders: &[CompiledShader]) -> Result<PatchedPipeline> {
    let mut records = Vec::with_capacity(shaders.len());
    for shader in shaders {
        let code = patcher.patch_shader(shader, layout)?;
        records.push(shader_record(shader.reflection.stage, &shader.entry_point, shader.language, &code));
    }
    let header = patcher.device_header(layout, shaders)?;
    tracing::debug!("Patched {} shaders for {}", records.len(), patcher.backend());
    Ok(PatchedPipeline { shaders: records, header })
}

/// Serializes an archived shader: stage, entry point, source language, then the native code
pub fn shader_record(stage: ShaderStage, entry_point: &str, language: InputLanguage, code: &[u8]) -> SerializedBlob {
    let mut s = Serializer::new();
    s.write(&stage);
    s.write_str(entry_point);
    s.write_u32(language.tag());
    s.write_bytes(code);
    s.finish()
}

/// Pairs every reflected resource of a shader with its binding in the layout
pub(crate) fn resolve_bindings<'a>(backend: Backend, layout: &'a PipelineLayout, shader: &'a CompiledShader) -> Result<Vec<(&'a ReflectedResource, &'a LayoutBinding)>> {
    shader
        .reflection
        .resources
        .iter()
        .map(|resource| {
            layout.find(&resource.name, resource.resource_type).map(|binding| (resource, binding)).ok_or_else(|| {
                ArchiverError::patching(backend, format!("{} '{}' of the {} shader is not in the pipeline layout", resource.resource_type, resource.name, shader.reflection.stage))
            })
        })
        .collect()
}

/// Rejects native code that is not a DXBC container
pub(crate) fn check_dxbc(backend: Backend, shader: &CompiledShader) -> Result<()> {
    if shader.code.get(..4) != Some(&DXBC_MAGIC[..]) {
        return Err(ArchiverError::patching(backend, format!("{} shader '{}' is not a DXBC container", shader.reflection.stage, shader.entry_point)));
    }
    Ok(())
}

/// Register assignment of one resource used by a Direct3D shader
pub(crate) struct RegisterBinding<'a> {
    pub name: &'a str,
    pub range: u32,
    pub space: u32,
    pub register: u32,
    pub count: u32,
}

impl Serializable for RegisterBinding<'_> {
    fn serialize(&self, s: &mut Serializer) {
        s.write_str(self.name);
        s.write_u32(self.range);
        s.write_u32(self.space);
        s.write_u32(self.register);
        s.write_u32(self.count);
    }
}

/// Serializes the register map of every shader: stage, then the bindings it uses
pub(crate) fn write_register_map(s: &mut Serializer, backend: Backend, layout: &PipelineLayout, shaders: &[CompiledShader]) -> Result<()> {
    s.write_len(shaders.len());
    for shader in shaders {
        let registers: Vec<RegisterBinding<'_>> = resolve_bindings(backend, layout, shader)?
            .into_iter()
            .map(|(resource, binding)| RegisterBinding {
                name: &resource.name,
                range: binding.resource_type.range() as u32,
                space: binding.set,
                register: binding.binding,
                count: binding.array_size,
            })
            .collect();
        s.write(&shader.reflection.stage);
        s.write_slice(&registers);
    }
    Ok(())
}
