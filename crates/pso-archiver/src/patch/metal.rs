//! Metal: maps placeholder argument indices in MSL to the final argument table slots

use super::{BackendPatcher, resolve_bindings};
use crate::backend::Backend;
use crate::error::{ArchiverError, Result};
use crate::serialized::{SerializedBlob, Serializer};
use crate::signature::{MetalArgument, PipelineLayout};
use crate::transcoder::CompiledShader;
use bytes::Bytes;
use regex::{Captures, Regex};
use std::collections::HashMap;

const ARGUMENT_PATTERN: &str = r"\[\[(buffer|texture|sampler)\((\d+)\)\]\]";

#[derive(Debug, Clone, Copy)]
pub struct MetalPatcher {
    pub backend: Backend,
}

impl BackendPatcher for MetalPatcher {
    fn backend(&self) -> Backend {
        self.backend
    }

    fn patch_shader(&self, shader: &CompiledShader, layout: &PipelineLayout) -> Result<Bytes> {
        // Reflection of MSL carries the argument table in `set` and the placeholder index in `binding`
        let mut slots: HashMap<(u32, u32), u32> = HashMap::new();
        for (resource, binding) in resolve_bindings(self.backend, layout, shader)? {
            slots.insert((resource.set, resource.binding), binding.binding);
        }

        // Arguments without a resource, like the buffer-size table, go after the last assigned slot
        let mut next_free = [0u32; 3];
        for binding in layout.bindings() {
            let argument = MetalArgument::of(binding.resource_type) as usize;
            next_free[argument] = next_free[argument].max(binding.binding + binding.array_size.max(1));
        }

        let source = std::str::from_utf8(&shader.code).map_err(|e| ArchiverError::patching(self.backend, format!("MSL is not valid UTF-8: {e}")))?;
        let argument = Regex::new(ARGUMENT_PATTERN).map_err(|e| ArchiverError::patching(self.backend, e.to_string()))?;
        let mut extra: HashMap<(u32, u32), u32> = HashMap::new();
        let patched = argument.replace_all(source, |caps: &Captures<'_>| {
            let kind = match &caps[1] {
                "buffer" => MetalArgument::Buffer,
                "texture" => MetalArgument::Texture,
                _ => MetalArgument::Sampler,
            };
            let table = kind as u32;
            let placeholder: u32 = caps[2].parse().unwrap_or(u32::MAX);
            let slot = match slots.get(&(table, placeholder)) {
                Some(slot) => *slot,
                None => *extra.entry((table, placeholder)).or_insert_with(|| {
                    let slot = next_free[table as usize];
                    next_free[table as usize] += 1;
                    slot
                }),
            };
            format!("[[{}({slot})]]", &caps[1])
        });
        Ok(Bytes::from(patched.into_owned()))
    }

    /// Argument buffer layout: for every resource its name, argument table, slot and count
    fn device_header(&self, layout: &PipelineLayout, _shaders: &[CompiledShader]) -> Result<SerializedBlob> {
        let bindings: Vec<_> = layout.bindings().collect();
        let mut s = Serializer::new();
        s.write_len(bindings.len());
        for binding in bindings {
            s.write_str(&binding.name);
            s.write_u32(MetalArgument::of(binding.resource_type) as u32);
            s.write_u32(binding.binding);
            s.write_u32(binding.array_size);
            s.write_bool(binding.immutable_sampler);
        }
        Ok(s.finish())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::desc::{InputLanguage, PipelineResourceDesc, ResourceSignatureDesc, ResourceType, ShaderStage, ShaderStages, VariableType};
    use crate::reflection::{ReflectedResource, ShaderReflection};

    #[test]
    fn test_placeholders_are_remapped() {
        let source = "kernel void main0(constant Params& params [[buffer(0)]], device Data& data [[buffer(1)]], constant uint* sizes [[buffer(2)]], texture2d<float> tex [[texture(0)]]) {}";
        let mut reflection = ShaderReflection::new(ShaderStage::Compute, "main0");
        for (name, resource_type, set, binding) in [("Params", ResourceType::ConstantBuffer, 0, 0), ("Data", ResourceType::BufferUav, 0, 1), ("tex", ResourceType::TextureSrv, 1, 0)] {
            reflection.resources.push(ReflectedResource {
                name: name.into(),
                resource_type,
                set,
                binding,
                array_size: 1,
                stages: ShaderStages::COMPUTE,
            });
        }
        let shader = CompiledShader {
            backend: Backend::MetalMacos,
            language: InputLanguage::Glsl,
            code: Bytes::from_static(source.as_bytes()),
            entry_point: "main0".into(),
            reflection,
        };

        let desc = ResourceSignatureDesc {
            name: "S".into(),
            binding_index: 0,
            resources: vec![
                PipelineResourceDesc::new("Other", ShaderStages::COMPUTE, ResourceType::BufferSrv, VariableType::Static),
                PipelineResourceDesc::new("Data", ShaderStages::COMPUTE, ResourceType::BufferUav, VariableType::Static),
                PipelineResourceDesc::new("tex", ShaderStages::COMPUTE, ResourceType::TextureSrv, VariableType::Static),
                PipelineResourceDesc::new("Params", ShaderStages::COMPUTE, ResourceType::ConstantBuffer, VariableType::Static),
            ],
            immutable_samplers: Vec::new(),
        };
        let layout = PipelineLayout::new(Backend::MetalMacos, &[&desc]).unwrap();
        let patcher = MetalPatcher { backend: Backend::MetalMacos };
        let patched = patcher.patch_shader(&shader, &layout).unwrap();
        let patched = std::str::from_utf8(&patched).unwrap();
        assert!(patched.contains("params [[buffer(2)]]"), "{patched}");
        assert!(patched.contains("data [[buffer(1)]]"), "{patched}");
        assert!(patched.contains("sizes [[buffer(3)]]"), "{patched}");
        assert!(patched.contains("tex [[texture(0)]]"), "{patched}");
    }
}
