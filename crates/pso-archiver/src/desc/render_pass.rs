//! Render pass descriptions

use super::signature::impl_serializable_as_u32;
use crate::serialized::{Serializable, Serializer};
use serde::{Deserialize, Serialize};

/// Texture formats usable as attachments and render targets
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TextureFormat {
    #[default]
    Unknown,
    Rgba8Unorm,
    Rgba8UnormSrgb,
    Bgra8Unorm,
    Bgra8UnormSrgb,
    Rgb10A2Unorm,
    R11G11B10Float,
    R8Unorm,
    Rg8Unorm,
    R16Float,
    Rg16Float,
    Rgba16Float,
    R32Float,
    Rg32Float,
    Rgba32Float,
    R32Uint,
    D16Unorm,
    D24UnormS8Uint,
    D32Float,
    D32FloatS8X24Uint,
}

/// What happens to attachment contents at the start of a pass
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AttachmentLoadOp {
    #[default]
    Load,
    Clear,
    Discard,
}

/// What happens to attachment contents at the end of a pass
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AttachmentStoreOp {
    #[default]
    Store,
    Discard,
}

/// Resource state an attachment is in
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourceState {
    #[default]
    Undefined,
    RenderTarget,
    DepthWrite,
    DepthRead,
    ShaderResource,
    InputAttachment,
    ResolveDest,
    CopySource,
    Present,
}

impl_serializable_as_u32!(TextureFormat, AttachmentLoadOp, AttachmentStoreOp, ResourceState);

fn default_sample_count() -> u8 {
    1
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Deserialize, Serialize)]
pub struct RenderPassAttachmentDesc {
    pub format: TextureFormat,
    #[serde(default = "default_sample_count")]
    pub sample_count: u8,
    #[serde(default)]
    pub load_op: AttachmentLoadOp,
    #[serde(default)]
    pub store_op: AttachmentStoreOp,
    #[serde(default)]
    pub stencil_load_op: AttachmentLoadOp,
    #[serde(default)]
    pub stencil_store_op: AttachmentStoreOp,
    #[serde(default)]
    pub initial_state: ResourceState,
    #[serde(default)]
    pub final_state: ResourceState,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Deserialize, Serialize)]
pub struct AttachmentReference {
    pub attachment_index: u32,
    pub state: ResourceState,
}

#[derive(Debug, Default, Clone, PartialEq, Eq, Hash, Deserialize, Serialize)]
pub struct SubpassDesc {
    #[serde(default)]
    pub input_attachments: Vec<AttachmentReference>,
    #[serde(default)]
    pub render_target_attachments: Vec<AttachmentReference>,
    #[serde(default)]
    pub resolve_attachments: Vec<AttachmentReference>,
    #[serde(default)]
    pub depth_stencil_attachment: Option<AttachmentReference>,
    #[serde(default)]
    pub preserve_attachments: Vec<u32>,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Deserialize, Serialize)]
pub struct SubpassDependencyDesc {
    pub src_subpass: u32,
    pub dst_subpass: u32,
    #[serde(default)]
    pub src_stage_mask: u32,
    #[serde(default)]
    pub dst_stage_mask: u32,
    #[serde(default)]
    pub src_access_mask: u32,
    #[serde(default)]
    pub dst_access_mask: u32,
}

/// Attachments, subpasses and dependencies of a render pass
#[derive(Debug, Clone, PartialEq, Eq, Hash, Deserialize, Serialize)]
pub struct RenderPassDesc {
    pub name: String,
    #[serde(default)]
    pub attachments: Vec<RenderPassAttachmentDesc>,
    #[serde(default)]
    pub subpasses: Vec<SubpassDesc>,
    #[serde(default)]
    pub dependencies: Vec<SubpassDependencyDesc>,
}

impl RenderPassDesc {
    /// Checks that every attachment reference points at a declared attachment
    pub fn validate(&self) -> Result<(), String> {
        if self.name.is_empty() {
            return Err("render pass name must not be empty".to_string());
        }
        if self.subpasses.is_empty() {
            return Err(format!("render pass '{}' has no subpasses", self.name));
        }

        let attachment_count = self.attachments.len() as u32;
        for (subpass_index, subpass) in self.subpasses.iter().enumerate() {
            let references = subpass
                .input_attachments
                .iter()
                .chain(&subpass.render_target_attachments)
                .chain(&subpass.resolve_attachments)
                .chain(&subpass.depth_stencil_attachment)
                .map(|reference| reference.attachment_index)
                .chain(subpass.preserve_attachments.iter().copied());
            for index in references {
                if index >= attachment_count {
                    return Err(format!(
                        "subpass {subpass_index} of render pass '{}' references attachment {index}, but only {attachment_count} are declared",
                        self.name
                    ));
                }
            }
        }

        let subpass_count = self.subpasses.len() as u32;
        for dependency in &self.dependencies {
            // u32::MAX stands for the external subpass
            let valid = |index: u32| index == u32::MAX || index < subpass_count;
            if !valid(dependency.src_subpass) || !valid(dependency.dst_subpass) {
                return Err(format!("render pass '{}' has a dependency on an unknown subpass", self.name));
            }
        }
        Ok(())
    }
}

impl Serializable for RenderPassAttachmentDesc {
    fn serialize(&self, s: &mut Serializer) {
        s.write(&self.format);
        s.write_u8(self.sample_count);
        s.write(&self.load_op);
        s.write(&self.store_op);
        s.write(&self.stencil_load_op);
        s.write(&self.stencil_store_op);
        s.write(&self.initial_state);
        s.write(&self.final_state);
    }
}

impl Serializable for AttachmentReference {
    fn serialize(&self, s: &mut Serializer) {
        s.write_u32(self.attachment_index);
        s.write(&self.state);
    }
}

impl Serializable for SubpassDesc {
    fn serialize(&self, s: &mut Serializer) {
        s.write_slice(&self.input_attachments);
        s.write_slice(&self.render_target_attachments);
        s.write_slice(&self.resolve_attachments);
        s.write_option(self.depth_stencil_attachment.as_ref());
        s.write_slice(&self.preserve_attachments);
    }
}

impl Serializable for SubpassDependencyDesc {
    fn serialize(&self, s: &mut Serializer) {
        s.write_u32(self.src_subpass);
        s.write_u32(self.dst_subpass);
        s.write_u32(self.src_stage_mask);
        s.write_u32(self.dst_stage_mask);
        s.write_u32(self.src_access_mask);
        s.write_u32(self.dst_access_mask);
    }
}

impl Serializable for RenderPassDesc {
    fn serialize(&self, s: &mut Serializer) {
        s.write_str(&self.name);
        s.write_slice(&self.attachments);
        s.write_slice(&self.subpasses);
        s.write_slice(&self.dependencies);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn color_pass() -> RenderPassDesc {
        RenderPassDesc {
            name: "Main".into(),
            attachments: vec![RenderPassAttachmentDesc {
                format: TextureFormat::Rgba8Unorm,
                sample_count: 1,
                load_op: AttachmentLoadOp::Clear,
                store_op: AttachmentStoreOp::Store,
                stencil_load_op: AttachmentLoadOp::Discard,
                stencil_store_op: AttachmentStoreOp::Discard,
                initial_state: ResourceState::Undefined,
                final_state: ResourceState::ShaderResource,
            }],
            subpasses: vec![SubpassDesc {
                render_target_attachments: vec![AttachmentReference { attachment_index: 0, state: ResourceState::RenderTarget }],
                ..Default::default()
            }],
            dependencies: vec![],
        }
    }

    #[test]
    fn test_validate_accepts_consistent_pass() {
        assert!(color_pass().validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_dangling_reference() {
        let mut pass = color_pass();
        pass.subpasses[0].depth_stencil_attachment = Some(AttachmentReference { attachment_index: 1, state: ResourceState::DepthWrite });
        assert!(pass.validate().unwrap_err().contains("attachment 1"));
    }
}
