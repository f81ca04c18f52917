//! Resource signatures: synthesis, validation and per-backend layouts

mod layout;
mod synthesize;
mod validate;

pub use layout::{GlBindingRange, LayoutBinding, MetalArgument, PipelineLayout, SignatureLayout, layout_id};
pub use synthesize::{default_signature_name, synthesize_default_signature};
pub use validate::{check_binding_indices, validate_signatures};
