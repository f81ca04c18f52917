//! Descriptions of the objects an archive stores
//!
//! Shaders, resource signatures, render passes and the four pipeline kinds. Every
//! description deserializes from manifests and has a stable binary encoding through
//! the `Serializable` trait.

mod graphics;
mod pipeline;
mod render_pass;
mod shader;
mod signature;

pub use graphics::*;
pub use pipeline::*;
pub use render_pass::*;
pub use shader::*;
pub use signature::{
    AddressMode, ComparisonFunc, DescriptorRange, FilterType, ImmutableSamplerDesc, PipelineResourceDesc, ResourceSignatureDesc, ResourceType, SamplerDesc, VariableType,
};
