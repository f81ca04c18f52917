//! Per-backend binding layouts
//!
//! A signature layout assigns every resource of a signature to a binding of one
//! backend's binding model. A pipeline layout lays out all signatures of a pipeline
//! in `binding_index` order, continuing the binding counters of the preceding
//! signatures where the backend shares one binding space between them.

use crate::backend::Backend;
use crate::desc::{DescriptorRange, ResourceSignatureDesc, ResourceType, ShaderStage, ShaderStages, VariableType};
use crate::error::{ArchiverError, Result};
use crate::serialized::{Serializable, SerializedBlob, Serializer, hash_bytes};
use std::collections::HashMap;

/// Direct3D11 slot limits per shader stage: `t`, `s`, `u` and `b` registers
const D3D11_SLOT_LIMITS: [(DescriptorRange, u32); 4] = [(DescriptorRange::Srv, 128), (DescriptorRange::Sampler, 16), (DescriptorRange::Uav, 8), (DescriptorRange::Cbv, 14)];

/// Metal argument table sizes: buffers, textures and samplers
const METAL_SLOT_LIMITS: [u32; 3] = [31, 128, 16];

/// Binding class in the OpenGL binding model
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum GlBindingRange {
    UniformBlock,
    TextureUnit,
    ImageUnit,
    StorageBlock,
}

impl GlBindingRange {
    /// Binding class of a resource type; samplers are combined with textures in GLSL
    pub fn of(resource_type: ResourceType) -> Option<Self> {
        match resource_type {
            ResourceType::ConstantBuffer => Some(Self::UniformBlock),
            ResourceType::TextureSrv | ResourceType::InputAttachment => Some(Self::TextureUnit),
            ResourceType::TextureUav => Some(Self::ImageUnit),
            ResourceType::BufferSrv | ResourceType::BufferUav => Some(Self::StorageBlock),
            ResourceType::Sampler | ResourceType::AccelStruct => None,
        }
    }
}

/// Argument table of a Metal resource
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MetalArgument {
    Buffer = 0,
    Texture = 1,
    Sampler = 2,
}

impl MetalArgument {
    pub fn of(resource_type: ResourceType) -> Self {
        match resource_type {
            ResourceType::ConstantBuffer | ResourceType::BufferSrv | ResourceType::BufferUav | ResourceType::AccelStruct => Self::Buffer,
            ResourceType::Sampler => Self::Sampler,
            ResourceType::TextureSrv | ResourceType::TextureUav | ResourceType::InputAttachment => Self::Texture,
        }
    }
}

/// A resource placed in a backend binding model
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LayoutBinding {
    pub name: String,
    pub resource_type: ResourceType,
    pub var_type: VariableType,
    pub stages: ShaderStages,
    pub array_size: u32,
    /// Descriptor set on Vulkan, register space on Direct3D12, 0 elsewhere
    pub set: u32,
    /// Binding, register, slot or unit
    pub binding: u32,
    /// The binding is an immutable sampler
    pub immutable_sampler: bool,
}

impl LayoutBinding {
    /// Number of consecutive bindings the resource occupies
    fn slot_count(&self) -> u32 {
        self.array_size.max(1)
    }
}

/// Bindings of one signature on one backend
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignatureLayout {
    pub backend: Backend,
    pub name: String,
    pub binding_index: u8,
    pub bindings: Vec<LayoutBinding>,
    /// Descriptor sets used by the signature; only meaningful on Vulkan
    pub set_count: u32,
}

impl SignatureLayout {
    /// Lays out a signature on its own, as if it was the only one in the pipeline
    pub fn standalone(backend: Backend, desc: &ResourceSignatureDesc) -> Result<Self> {
        Self::allocate(backend, desc, &mut BindingCounters::default())
    }

    /// Finds the binding of a resource by name and type
    pub fn find(&self, name: &str, resource_type: ResourceType) -> Option<&LayoutBinding> {
        self.bindings
            .iter()
            .find(|binding| binding.name == name && (binding.resource_type == resource_type || binding.resource_type.range() == resource_type.range()))
    }

    /// Serializes the backend data of the signature
    pub fn to_blob(&self) -> SerializedBlob {
        SerializedBlob::from_value(self)
    }

    fn allocate(backend: Backend, desc: &ResourceSignatureDesc, counters: &mut BindingCounters) -> Result<Self> {
        let mut bindings: Vec<LayoutBinding> = desc
            .resources
            .iter()
            .map(|resource| LayoutBinding {
                name: resource.name.clone(),
                resource_type: resource.resource_type,
                var_type: resource.var_type,
                stages: resource.shader_stages,
                array_size: resource.array_size,
                set: 0,
                binding: 0,
                immutable_sampler: resource.resource_type == ResourceType::Sampler && desc.immutable_sampler_for(&resource.name, resource.shader_stages).is_some(),
            })
            .collect();

        // Immutable samplers that are not attached to a sampler resource get a binding of their own
        for sampler in &desc.immutable_samplers {
            let attached = desc.resources.iter().any(|resource| {
                resource.resource_type == ResourceType::Sampler && resource.name == sampler.sampler_or_texture_name && resource.shader_stages.intersects(sampler.shader_stages)
            });
            if !attached {
                bindings.push(LayoutBinding {
                    name: sampler.sampler_or_texture_name.clone(),
                    resource_type: ResourceType::Sampler,
                    var_type: VariableType::Static,
                    stages: sampler.shader_stages,
                    array_size: 1,
                    set: 0,
                    binding: 0,
                    immutable_sampler: true,
                });
            }
        }

        let mut layout = Self {
            backend,
            name: desc.name.clone(),
            binding_index: desc.binding_index,
            bindings,
            set_count: 0,
        };
        match backend {
            Backend::Vulkan => layout.allocate_vulkan(counters),
            Backend::D3D12 => layout.allocate_d3d12(),
            Backend::D3D11 => layout.allocate_d3d11(counters)?,
            Backend::Gl | Backend::Gles => layout.allocate_gl(counters),
            Backend::MetalMacos | Backend::MetalIos => layout.allocate_metal(counters)?,
        }
        Ok(layout)
    }

    /// Static and mutable resources go to the first set, dynamic ones to the next
    fn allocate_vulkan(&mut self, counters: &mut BindingCounters) {
        let is_dynamic = |binding: &LayoutBinding| binding.var_type == VariableType::Dynamic && !binding.immutable_sampler;
        let has_static = self.bindings.iter().any(|binding| !is_dynamic(binding));
        let has_dynamic = self.bindings.iter().any(is_dynamic);

        let static_set = counters.next_set;
        let dynamic_set = static_set + has_static as u32;
        let mut next_binding = [0u32; 2];
        for binding in &mut self.bindings {
            let dynamic = is_dynamic(binding) as usize;
            binding.set = [static_set, dynamic_set][dynamic];
            binding.binding = next_binding[dynamic];
            next_binding[dynamic] += 1;
        }

        self.set_count = has_static as u32 + has_dynamic as u32;
        counters.next_set += self.set_count;
    }

    /// Registers are counted per range inside the register space of the signature
    fn allocate_d3d12(&mut self) {
        let space = self.binding_index as u32;
        let mut next_register: HashMap<DescriptorRange, u32> = HashMap::new();
        for binding in &mut self.bindings {
            let register = next_register.entry(binding.resource_type.range()).or_default();
            binding.set = space;
            binding.binding = *register;
            *register += binding.slot_count();
        }
    }

    /// Slots are counted per stage and range, continuing after the preceding signatures
    fn allocate_d3d11(&mut self, counters: &mut BindingCounters) -> Result<()> {
        for binding in &mut self.bindings {
            let range = binding.resource_type.range();
            let slot = binding.stages.stages().map(|stage| counters.d3d11_slot(stage, range)).max().unwrap_or(0);
            binding.binding = slot;
            for stage in binding.stages.stages() {
                let next = slot + binding.slot_count();
                let limit = D3D11_SLOT_LIMITS.iter().find(|(r, _)| *r == range).map_or(u32::MAX, |(_, limit)| *limit);
                if next > limit {
                    return Err(ArchiverError::patching(
                        Backend::D3D11,
                        format!("resource '{}' of signature '{}' needs {range:?} slot {} in the {stage} stage, the limit is {limit}", binding.name, self.name, next - 1),
                    ));
                }
                counters.d3d11.insert((stage, range), next);
            }
        }
        Ok(())
    }

    /// Units are counted per binding range across all stages; samplers are combined with textures
    fn allocate_gl(&mut self, counters: &mut BindingCounters) {
        for binding in &mut self.bindings {
            let Some(range) = GlBindingRange::of(binding.resource_type) else { continue };
            let unit = counters.gl.entry(range).or_default();
            binding.binding = *unit;
            *unit += binding.slot_count();
        }
    }

    fn allocate_metal(&mut self, counters: &mut BindingCounters) -> Result<()> {
        for binding in &mut self.bindings {
            let argument = MetalArgument::of(binding.resource_type);
            let slot = &mut counters.metal[argument as usize];
            binding.set = argument as u32;
            binding.binding = *slot;
            *slot += binding.slot_count();
            let limit = METAL_SLOT_LIMITS[argument as usize];
            if *slot > limit {
                return Err(ArchiverError::patching(
                    self.backend,
                    format!("resource '{}' of signature '{}' exceeds the {limit} {argument:?} argument slots", binding.name, self.name),
                ));
            }
        }
        Ok(())
    }
}

impl Serializable for LayoutBinding {
    fn serialize(&self, s: &mut Serializer) {
        s.write_str(&self.name);
        s.write(&self.resource_type);
        s.write(&self.var_type);
        s.write(&self.stages);
        s.write_u32(self.array_size);
        s.write_u32(self.set);
        s.write_u32(self.binding);
        s.write_bool(self.immutable_sampler);
    }
}

impl Serializable for SignatureLayout {
    fn serialize(&self, s: &mut Serializer) {
        s.write_u32(self.backend as u32);
        s.write_u8(self.binding_index);
        s.write_u32(self.set_count);
        s.write_slice(&self.bindings);
    }
}

/// Running binding counters shared by the signatures of one pipeline
#[derive(Debug, Default)]
struct BindingCounters {
    next_set: u32,
    d3d11: HashMap<(ShaderStage, DescriptorRange), u32>,
    gl: HashMap<GlBindingRange, u32>,
    metal: [u32; 3],
}

impl BindingCounters {
    fn d3d11_slot(&self, stage: ShaderStage, range: DescriptorRange) -> u32 {
        self.d3d11.get(&(stage, range)).copied().unwrap_or(0)
    }
}

/// Bindings of every signature of a pipeline on one backend
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PipelineLayout {
    pub backend: Backend,
    /// Signature layouts ordered by binding index
    pub signatures: Vec<SignatureLayout>,
}

impl PipelineLayout {
    /// Lays out the signatures of a pipeline
    ///
    /// # Arguments
    /// * `backend` - Backend whose binding model is used
    /// * `signatures` - Signatures of the pipeline, in any order
    pub fn new(backend: Backend, signatures: &[&ResourceSignatureDesc]) -> Result<Self> {
        let mut ordered = signatures.to_vec();
        ordered.sort_by_key(|signature| signature.binding_index);

        let mut counters = BindingCounters::default();
        let signatures = ordered.into_iter().map(|desc| SignatureLayout::allocate(backend, desc, &mut counters)).collect::<Result<Vec<_>>>()?;
        Ok(Self { backend, signatures })
    }

    /// Finds the binding of a reflected resource
    pub fn find(&self, name: &str, resource_type: ResourceType) -> Option<&LayoutBinding> {
        self.signatures.iter().find_map(|signature| signature.find(name, resource_type))
    }

    /// All bindings in signature order
    pub fn bindings(&self) -> impl Iterator<Item = &LayoutBinding> {
        self.signatures.iter().flat_map(|signature| signature.bindings.iter())
    }
}

/// Identity of a pipeline layout: a hash over the backend blobs of its signatures
///
/// # Arguments
/// * `signature_blobs` - Backend blobs of the signatures in binding index order
pub fn layout_id<'a>(signature_blobs: impl IntoIterator<Item = &'a SerializedBlob>) -> u64 {
    let hashes: Vec<u8> = signature_blobs.into_iter().flat_map(|blob| blob.content_hash().to_le_bytes()).collect();
    hash_bytes(&hashes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::desc::{ImmutableSamplerDesc, PipelineResourceDesc, SamplerDesc};

    fn signature(name: &str, binding_index: u8, resources: &[(&str, ResourceType, VariableType)]) -> ResourceSignatureDesc {
        ResourceSignatureDesc {
            name: name.into(),
            binding_index,
            resources: resources
                .iter()
                .map(|(name, resource_type, var_type)| PipelineResourceDesc::new(*name, ShaderStages::VERTEX | ShaderStages::PIXEL, *resource_type, *var_type))
                .collect(),
            immutable_samplers: Vec::new(),
        }
    }

    #[test]
    fn test_vulkan_sets() {
        let first = signature(
            "A",
            0,
            &[
                ("g_Constants", ResourceType::ConstantBuffer, VariableType::Static),
                ("g_Dynamic", ResourceType::ConstantBuffer, VariableType::Dynamic),
                ("g_Texture", ResourceType::TextureSrv, VariableType::Mutable),
            ],
        );
        let second = signature("B", 1, &[("g_Other", ResourceType::TextureSrv, VariableType::Dynamic)]);
        let layout = PipelineLayout::new(Backend::Vulkan, &[&second, &first]).unwrap();

        let at = |name: &str| {
            let binding = layout.bindings().find(|binding| binding.name == name).unwrap();
            (binding.set, binding.binding)
        };
        assert_eq!(at("g_Constants"), (0, 0));
        assert_eq!(at("g_Texture"), (0, 1));
        assert_eq!(at("g_Dynamic"), (1, 0));
        // The second signature has no static resources, so it only uses one set
        assert_eq!(at("g_Other"), (2, 0));
        assert_eq!(layout.signatures[1].set_count, 1);
    }

    #[test]
    fn test_d3d12_spaces_and_registers() {
        let mut desc = signature(
            "A",
            2,
            &[
                ("g_A", ResourceType::TextureSrv, VariableType::Static),
                ("g_B", ResourceType::BufferSrv, VariableType::Dynamic),
                ("g_C", ResourceType::ConstantBuffer, VariableType::Static),
            ],
        );
        desc.resources[0].array_size = 3;
        let layout = SignatureLayout::standalone(Backend::D3D12, &desc).unwrap();
        let registers: Vec<(u32, u32)> = layout.bindings.iter().map(|binding| (binding.set, binding.binding)).collect();
        assert_eq!(registers, vec![(2, 0), (2, 3), (2, 0)]);
    }

    #[test]
    fn test_d3d11_slots_continue_across_signatures() {
        let first = signature("A", 0, &[("g_A", ResourceType::TextureSrv, VariableType::Static)]);
        let second = signature("B", 1, &[("g_B", ResourceType::TextureSrv, VariableType::Static)]);
        let layout = PipelineLayout::new(Backend::D3D11, &[&first, &second]).unwrap();
        assert_eq!(layout.find("g_B", ResourceType::TextureSrv).unwrap().binding, 1);
        assert_eq!(SignatureLayout::standalone(Backend::D3D11, &second).unwrap().bindings[0].binding, 0);
    }

    #[test]
    fn test_d3d11_slot_limit() {
        let mut desc = signature("A", 0, &[("g_Samplers", ResourceType::Sampler, VariableType::Static)]);
        desc.resources[0].array_size = 17;
        let err = SignatureLayout::standalone(Backend::D3D11, &desc).unwrap_err();
        assert!(matches!(err, ArchiverError::BackendPatching { backend: Backend::D3D11, .. }), "{err}");
    }

    #[test]
    fn test_gl_units_skip_samplers() {
        let desc = signature(
            "A",
            0,
            &[
                ("g_Texture", ResourceType::TextureSrv, VariableType::Static),
                ("g_Sampler", ResourceType::Sampler, VariableType::Static),
                ("g_Other", ResourceType::TextureSrv, VariableType::Static),
                ("g_Constants", ResourceType::ConstantBuffer, VariableType::Static),
            ],
        );
        let layout = SignatureLayout::standalone(Backend::Gl, &desc).unwrap();
        assert_eq!(layout.find("g_Other", ResourceType::TextureSrv).unwrap().binding, 1);
        assert_eq!(layout.find("g_Constants", ResourceType::ConstantBuffer).unwrap().binding, 0);
    }

    #[test]
    fn test_implicit_immutable_sampler_gets_a_binding() {
        let mut desc = signature("A", 0, &[("g_Texture", ResourceType::TextureSrv, VariableType::Dynamic)]);
        desc.immutable_samplers.push(ImmutableSamplerDesc {
            shader_stages: ShaderStages::PIXEL,
            sampler_or_texture_name: "g_Texture".into(),
            desc: SamplerDesc::default(),
        });
        let layout = SignatureLayout::standalone(Backend::Vulkan, &desc).unwrap();
        let sampler = layout.find("g_Texture", ResourceType::Sampler).unwrap();
        assert!(sampler.immutable_sampler);
        assert_eq!((sampler.set, sampler.binding), (0, 0));
        assert_eq!(layout.find("g_Texture", ResourceType::TextureSrv).unwrap().set, 1);
    }

    #[test]
    fn test_layout_id_depends_on_order() {
        let a = SerializedBlob::new(&b"a"[..]);
        let b = SerializedBlob::new(&b"b"[..]);
        assert_eq!(layout_id([&a, &b]), layout_id([&a, &b]));
        assert_ne!(layout_id([&a, &b]), layout_id([&b, &a]));
    }
}
