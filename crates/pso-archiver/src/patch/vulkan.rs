//! Vulkan: rewrites `DescriptorSet` and `Binding` decorations in SPIR-V

use super::{BackendPatcher, resolve_bindings};
use crate::backend::Backend;
use crate::error::{ArchiverError, Result};
use crate::serialized::{SerializedBlob, Serializer};
use crate::signature::PipelineLayout;
use crate::spirv::SpirvModule;
use crate::transcoder::CompiledShader;
use bytes::Bytes;
use std::collections::HashMap;

#[derive(Debug, Clone, Copy, Default)]
pub struct VulkanPatcher;

impl BackendPatcher for VulkanPatcher {
    fn backend(&self) -> Backend {
        Backend::Vulkan
    }

    fn patch_shader(&self, shader: &CompiledShader, layout: &PipelineLayout) -> Result<Bytes> {
        let targets: HashMap<&str, (u32, u32)> = resolve_bindings(Backend::Vulkan, layout, shader)?
            .into_iter()
            .map(|(resource, binding)| (resource.name.as_str(), (binding.set, binding.binding)))
            .collect();

        let mut module = SpirvModule::from_bytes(&shader.code).map_err(|e| ArchiverError::patching(Backend::Vulkan, e.to_string()))?;
        module
            .remap_bindings(shader.reflection.stage, |resource| targets.get(resource.name.as_str()).copied())
            .map_err(|e| ArchiverError::patching(Backend::Vulkan, e.to_string()))?;
        Ok(Bytes::from(module.to_bytes()))
    }

    /// Descriptor set layouts: for every binding its set, binding, type, count and stages
    fn device_header(&self, layout: &PipelineLayout, _shaders: &[CompiledShader]) -> Result<SerializedBlob> {
        let mut s = Serializer::new();
        s.write_u32(layout.signatures.iter().map(|signature| signature.set_count).sum());
        let bindings: Vec<_> = layout.bindings().collect();
        s.write_len(bindings.len());
        for binding in bindings {
            s.write_u32(binding.set);
            s.write_u32(binding.binding);
            s.write(&binding.resource_type);
            s.write_u32(binding.array_size);
            s.write(&binding.stages);
            s.write_bool(binding.immutable_sampler);
        }
        Ok(s.finish())
    }
}
