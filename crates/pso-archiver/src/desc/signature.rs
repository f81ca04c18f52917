//! Resource signature descriptions
//!
//! A resource signature declares the shader-visible resources of a pipeline: their
//! names, types, visibility and update frequency. Pipelines combine several
//! signatures ordered by their binding index.

use super::shader::ShaderStages;
use crate::serialized::{Serializable, Serializer};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Kind of a shader resource
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourceType {
    ConstantBuffer,
    TextureSrv,
    BufferSrv,
    TextureUav,
    BufferUav,
    Sampler,
    InputAttachment,
    AccelStruct,
}

/// Descriptor range a resource type occupies in register-based binding models
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum DescriptorRange {
    /// Constant buffers (`b` registers)
    Cbv,
    /// Shader resource views (`t` registers)
    Srv,
    /// Unordered access views (`u` registers)
    Uav,
    /// Samplers (`s` registers)
    Sampler,
}

impl ResourceType {
    /// The register range this resource type binds to
    pub const fn range(self) -> DescriptorRange {
        match self {
            ResourceType::ConstantBuffer => DescriptorRange::Cbv,
            ResourceType::TextureSrv | ResourceType::BufferSrv | ResourceType::InputAttachment | ResourceType::AccelStruct => DescriptorRange::Srv,
            ResourceType::TextureUav | ResourceType::BufferUav => DescriptorRange::Uav,
            ResourceType::Sampler => DescriptorRange::Sampler,
        }
    }
}

impl fmt::Display for ResourceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ResourceType::ConstantBuffer => "constant buffer",
            ResourceType::TextureSrv => "texture SRV",
            ResourceType::BufferSrv => "buffer SRV",
            ResourceType::TextureUav => "texture UAV",
            ResourceType::BufferUav => "buffer UAV",
            ResourceType::Sampler => "sampler",
            ResourceType::InputAttachment => "input attachment",
            ResourceType::AccelStruct => "acceleration structure",
        };
        f.write_str(name)
    }
}

/// How often a resource variable is expected to change
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum VariableType {
    /// Set once, shared by all bindings of the signature
    #[default]
    Static,
    /// Set once per resource binding
    Mutable,
    /// Can change between draw calls
    Dynamic,
}

fn default_array_size() -> u32 {
    1
}

/// One resource declared by a signature
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct PipelineResourceDesc {
    pub name: String,
    pub shader_stages: ShaderStages,
    #[serde(default = "default_array_size")]
    pub array_size: u32,
    pub resource_type: ResourceType,
    #[serde(default)]
    pub var_type: VariableType,
}

impl PipelineResourceDesc {
    pub fn new(name: impl Into<String>, shader_stages: ShaderStages, resource_type: ResourceType, var_type: VariableType) -> Self {
        Self {
            name: name.into(),
            shader_stages,
            array_size: 1,
            resource_type,
            var_type,
        }
    }
}

/// Texture filtering mode
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FilterType {
    Point,
    #[default]
    Linear,
    Anisotropic,
    ComparisonPoint,
    ComparisonLinear,
}

/// Texture addressing mode
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AddressMode {
    Wrap,
    Mirror,
    #[default]
    Clamp,
    Border,
}

/// Comparison function for depth tests and comparison samplers
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ComparisonFunc {
    Never,
    #[default]
    Less,
    Equal,
    LessEqual,
    Greater,
    NotEqual,
    GreaterEqual,
    Always,
}

fn default_max_anisotropy() -> u32 {
    1
}

fn default_max_lod() -> f32 {
    f32::MAX
}

/// Sampler state
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct SamplerDesc {
    #[serde(default)]
    pub min_filter: FilterType,
    #[serde(default)]
    pub mag_filter: FilterType,
    #[serde(default)]
    pub mip_filter: FilterType,
    #[serde(default)]
    pub address_u: AddressMode,
    #[serde(default)]
    pub address_v: AddressMode,
    #[serde(default)]
    pub address_w: AddressMode,
    #[serde(default)]
    pub mip_lod_bias: f32,
    #[serde(default = "default_max_anisotropy")]
    pub max_anisotropy: u32,
    #[serde(default)]
    pub comparison_func: ComparisonFunc,
    #[serde(default)]
    pub border_color: [f32; 4],
    #[serde(default)]
    pub min_lod: f32,
    #[serde(default = "default_max_lod")]
    pub max_lod: f32,
}

impl Default for SamplerDesc {
    fn default() -> Self {
        Self {
            min_filter: FilterType::default(),
            mag_filter: FilterType::default(),
            mip_filter: FilterType::default(),
            address_u: AddressMode::default(),
            address_v: AddressMode::default(),
            address_w: AddressMode::default(),
            mip_lod_bias: 0.0,
            max_anisotropy: default_max_anisotropy(),
            comparison_func: ComparisonFunc::default(),
            border_color: [0.0; 4],
            min_lod: 0.0,
            max_lod: default_max_lod(),
        }
    }
}

/// Sampler baked into the signature and bound to a sampler or texture by name
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct ImmutableSamplerDesc {
    pub shader_stages: ShaderStages,
    pub sampler_or_texture_name: String,
    #[serde(default)]
    pub desc: SamplerDesc,
}

/// Description of a pipeline resource signature
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct ResourceSignatureDesc {
    pub name: String,
    /// Position of this signature in the pipeline layout; unique within a pipeline
    #[serde(default)]
    pub binding_index: u8,
    #[serde(default)]
    pub resources: Vec<PipelineResourceDesc>,
    #[serde(default)]
    pub immutable_samplers: Vec<ImmutableSamplerDesc>,
}

impl ResourceSignatureDesc {
    /// Finds the immutable sampler assigned to a resource, if any
    pub fn immutable_sampler_for(&self, name: &str, stages: ShaderStages) -> Option<&ImmutableSamplerDesc> {
        self.immutable_samplers.iter().find(|sampler| sampler.sampler_or_texture_name == name && sampler.shader_stages.intersects(stages))
    }
}

macro_rules! impl_serializable_as_u32 {
    ($($ty:ty),* $(,)?) => {
        $(
            impl Serializable for $ty {
                fn serialize(&self, s: &mut Serializer) {
                    s.write_u32(*self as u32);
                }
            }
        )*
    };
}

pub(crate) use impl_serializable_as_u32;

impl_serializable_as_u32!(ResourceType, VariableType, FilterType, AddressMode, ComparisonFunc);

impl Serializable for PipelineResourceDesc {
    fn serialize(&self, s: &mut Serializer) {
        s.write_str(&self.name);
        s.write(&self.shader_stages);
        s.write_u32(self.array_size);
        s.write(&self.resource_type);
        s.write(&self.var_type);
    }
}

impl Serializable for SamplerDesc {
    fn serialize(&self, s: &mut Serializer) {
        s.write(&self.min_filter);
        s.write(&self.mag_filter);
        s.write(&self.mip_filter);
        s.write(&self.address_u);
        s.write(&self.address_v);
        s.write(&self.address_w);
        s.write_f32(self.mip_lod_bias);
        s.write_u32(self.max_anisotropy);
        s.write(&self.comparison_func);
        for component in self.border_color {
            s.write_f32(component);
        }
        s.write_f32(self.min_lod);
        s.write_f32(self.max_lod);
    }
}

impl Serializable for ImmutableSamplerDesc {
    fn serialize(&self, s: &mut Serializer) {
        s.write(&self.shader_stages);
        s.write_str(&self.sampler_or_texture_name);
        s.write(&self.desc);
    }
}

impl Serializable for ResourceSignatureDesc {
    fn serialize(&self, s: &mut Serializer) {
        s.write_str(&self.name);
        s.write_u8(self.binding_index);
        s.write_slice(&self.resources);
        s.write_slice(&self.immutable_samplers);
    }
}
