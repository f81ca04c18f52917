//! Direct3D12: bytecode is stored unchanged next to a root signature and register map

use super::{BackendPatcher, check_dxbc, write_register_map};
use crate::backend::Backend;
use crate::desc::{DescriptorRange, VariableType};
use crate::error::Result;
use crate::serialized::{SerializedBlob, Serializer};
use crate::signature::{LayoutBinding, PipelineLayout, SignatureLayout};
use crate::transcoder::CompiledShader;
use bytes::Bytes;

#[derive(Debug, Clone, Copy, Default)]
pub struct D3D12Patcher;

impl BackendPatcher for D3D12Patcher {
    fn backend(&self) -> Backend {
        Backend::D3D12
    }

    fn patch_shader(&self, shader: &CompiledShader, _layout: &PipelineLayout) -> Result<Bytes> {
        check_dxbc(Backend::D3D12, shader)?;
        Ok(shader.code.clone())
    }

    fn device_header(&self, layout: &PipelineLayout, shaders: &[CompiledShader]) -> Result<SerializedBlob> {
        let mut s = Serializer::new();
        s.write_len(layout.signatures.len());
        for signature in &layout.signatures {
            write_root_signature(&mut s, signature);
        }
        write_register_map(&mut s, Backend::D3D12, layout, shaders)?;
        Ok(s.finish())
    }
}

/// Descriptor table of a root signature
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RootTable {
    StaticResources,
    StaticSamplers,
    DynamicResources,
    DynamicSamplers,
}

impl RootTable {
    const ALL: [RootTable; 4] = [RootTable::StaticResources, RootTable::StaticSamplers, RootTable::DynamicResources, RootTable::DynamicSamplers];

    fn of(binding: &LayoutBinding) -> Self {
        let sampler = binding.resource_type.range() == DescriptorRange::Sampler;
        match (binding.var_type == VariableType::Dynamic, sampler) {
            (false, false) => RootTable::StaticResources,
            (false, true) => RootTable::StaticSamplers,
            (true, false) => RootTable::DynamicResources,
            (true, true) => RootTable::DynamicSamplers,
        }
    }
}

/// Writes the root parameters of one signature
///
/// Static and mutable resources share a table, dynamic ones get their own, and
/// samplers are kept apart from CBV/SRV/UAV ranges. Immutable samplers become
/// static samplers instead of table entries. Empty tables are omitted.
fn write_root_signature(s: &mut Serializer, signature: &SignatureLayout) {
    s.write_str(&signature.name);
    s.write_u32(signature.binding_index as u32);

    let tables: Vec<(RootTable, Vec<&LayoutBinding>)> = RootTable::ALL
        .into_iter()
        .map(|table| (table, signature.bindings.iter().filter(|binding| !binding.immutable_sampler && RootTable::of(binding) == table).collect::<Vec<_>>()))
        .filter(|(_, ranges)| !ranges.is_empty())
        .collect();
    s.write_len(tables.len());
    for (table, ranges) in tables {
        s.write_u32(table as u32);
        s.write_len(ranges.len());
        for binding in ranges {
            s.write_u32(binding.resource_type.range() as u32);
            s.write_u32(binding.binding);
            s.write_u32(binding.set);
            s.write_u32(binding.array_size);
        }
    }

    let static_samplers: Vec<&LayoutBinding> = signature.bindings.iter().filter(|binding| binding.immutable_sampler).collect();
    s.write_len(static_samplers.len());
    for sampler in static_samplers {
        s.write_str(&sampler.name);
        s.write_u32(sampler.binding);
        s.write_u32(sampler.set);
        s.write(&sampler.stages);
    }
}
