//! Fixed-function state of graphics pipelines

use super::render_pass::TextureFormat;
use super::signature::{ComparisonFunc, impl_serializable_as_u32};
use crate::serialized::{Serializable, Serializer};
use serde::{Deserialize, Serialize};

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum BlendFactor {
    Zero,
    #[default]
    One,
    SrcColor,
    InvSrcColor,
    SrcAlpha,
    InvSrcAlpha,
    DestAlpha,
    InvDestAlpha,
    DestColor,
    InvDestColor,
    SrcAlphaSat,
    BlendFactor,
    InvBlendFactor,
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum BlendOperation {
    #[default]
    Add,
    Subtract,
    RevSubtract,
    Min,
    Max,
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FillMode {
    Wireframe,
    #[default]
    Solid,
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CullMode {
    None,
    Front,
    #[default]
    Back,
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PrimitiveTopology {
    PointList,
    LineList,
    LineStrip,
    #[default]
    TriangleList,
    TriangleStrip,
    PatchList,
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ValueType {
    Int8,
    Int16,
    Int32,
    Uint8,
    Uint16,
    Uint32,
    Float16,
    #[default]
    Float32,
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum InputFrequency {
    #[default]
    PerVertex,
    PerInstance,
}

impl_serializable_as_u32!(BlendFactor, BlendOperation, FillMode, CullMode, PrimitiveTopology, ValueType, InputFrequency);

fn default_write_mask() -> u8 {
    0xF
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Deserialize, Serialize)]
pub struct RenderTargetBlendDesc {
    #[serde(default)]
    pub blend_enable: bool,
    #[serde(default)]
    pub src_blend: BlendFactor,
    #[serde(default = "zero_factor")]
    pub dest_blend: BlendFactor,
    #[serde(default)]
    pub blend_op: BlendOperation,
    #[serde(default)]
    pub src_blend_alpha: BlendFactor,
    #[serde(default = "zero_factor")]
    pub dest_blend_alpha: BlendFactor,
    #[serde(default)]
    pub blend_op_alpha: BlendOperation,
    #[serde(default = "default_write_mask")]
    pub render_target_write_mask: u8,
}

fn zero_factor() -> BlendFactor {
    BlendFactor::Zero
}

impl Default for RenderTargetBlendDesc {
    fn default() -> Self {
        Self {
            blend_enable: false,
            src_blend: BlendFactor::One,
            dest_blend: BlendFactor::Zero,
            blend_op: BlendOperation::Add,
            src_blend_alpha: BlendFactor::One,
            dest_blend_alpha: BlendFactor::Zero,
            blend_op_alpha: BlendOperation::Add,
            render_target_write_mask: default_write_mask(),
        }
    }
}

#[derive(Debug, Default, Clone, PartialEq, Eq, Hash, Deserialize, Serialize)]
pub struct BlendStateDesc {
    #[serde(default)]
    pub alpha_to_coverage_enable: bool,
    #[serde(default)]
    pub independent_blend_enable: bool,
    #[serde(default)]
    pub render_targets: Vec<RenderTargetBlendDesc>,
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct RasterizerStateDesc {
    #[serde(default)]
    pub fill_mode: FillMode,
    #[serde(default)]
    pub cull_mode: CullMode,
    #[serde(default)]
    pub front_counter_clockwise: bool,
    #[serde(default = "default_true")]
    pub depth_clip_enable: bool,
    #[serde(default)]
    pub scissor_enable: bool,
    #[serde(default)]
    pub depth_bias: i32,
    #[serde(default)]
    pub slope_scaled_depth_bias: f32,
}

impl Default for RasterizerStateDesc {
    fn default() -> Self {
        Self {
            fill_mode: FillMode::Solid,
            cull_mode: CullMode::Back,
            front_counter_clockwise: false,
            depth_clip_enable: true,
            scissor_enable: false,
            depth_bias: 0,
            slope_scaled_depth_bias: 0.0,
        }
    }
}

fn default_stencil_mask() -> u8 {
    0xFF
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Deserialize, Serialize)]
pub struct DepthStencilStateDesc {
    #[serde(default = "default_true")]
    pub depth_enable: bool,
    #[serde(default = "default_true")]
    pub depth_write_enable: bool,
    #[serde(default)]
    pub depth_func: ComparisonFunc,
    #[serde(default)]
    pub stencil_enable: bool,
    #[serde(default = "default_stencil_mask")]
    pub stencil_read_mask: u8,
    #[serde(default = "default_stencil_mask")]
    pub stencil_write_mask: u8,
}

impl Default for DepthStencilStateDesc {
    fn default() -> Self {
        Self {
            depth_enable: true,
            depth_write_enable: true,
            depth_func: ComparisonFunc::Less,
            stencil_enable: false,
            stencil_read_mask: default_stencil_mask(),
            stencil_write_mask: default_stencil_mask(),
        }
    }
}

fn default_semantic() -> String {
    "ATTRIB".to_string()
}

/// One vertex attribute of the input layout
#[derive(Debug, Clone, PartialEq, Eq, Hash, Deserialize, Serialize)]
pub struct LayoutElement {
    pub input_index: u32,
    #[serde(default)]
    pub buffer_slot: u32,
    pub num_components: u32,
    #[serde(default)]
    pub value_type: ValueType,
    #[serde(default)]
    pub is_normalized: bool,
    /// Byte offset within the vertex; `None` packs the element after the previous one
    #[serde(default)]
    pub relative_offset: Option<u32>,
    #[serde(default)]
    pub stride: Option<u32>,
    #[serde(default)]
    pub frequency: InputFrequency,
    #[serde(default)]
    pub instance_data_step_rate: u32,
    /// HLSL semantic prefix; the input index is appended
    #[serde(default = "default_semantic")]
    pub hlsl_semantic: String,
}

#[derive(Debug, Default, Clone, PartialEq, Eq, Hash, Deserialize, Serialize)]
pub struct InputLayoutDesc {
    #[serde(default)]
    pub elements: Vec<LayoutElement>,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Deserialize, Serialize)]
pub struct SampleDesc {
    pub count: u8,
    #[serde(default)]
    pub quality: u8,
}

impl Default for SampleDesc {
    fn default() -> Self {
        Self { count: 1, quality: 0 }
    }
}

fn default_sample_mask() -> u32 {
    u32::MAX
}

fn default_num_viewports() -> u8 {
    1
}

/// Fixed-function state and output formats of a graphics pipeline
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct GraphicsPipelineDesc {
    #[serde(default)]
    pub blend_desc: BlendStateDesc,
    #[serde(default = "default_sample_mask")]
    pub sample_mask: u32,
    #[serde(default)]
    pub rasterizer_desc: RasterizerStateDesc,
    #[serde(default)]
    pub depth_stencil_desc: DepthStencilStateDesc,
    #[serde(default)]
    pub input_layout: InputLayoutDesc,
    #[serde(default)]
    pub primitive_topology: PrimitiveTopology,
    #[serde(default = "default_num_viewports")]
    pub num_viewports: u8,
    #[serde(default)]
    pub subpass_index: u8,
    #[serde(default)]
    pub rtv_formats: Vec<TextureFormat>,
    #[serde(default)]
    pub dsv_format: TextureFormat,
    #[serde(default)]
    pub sample_desc: SampleDesc,
}

impl Default for GraphicsPipelineDesc {
    fn default() -> Self {
        Self {
            blend_desc: BlendStateDesc::default(),
            sample_mask: default_sample_mask(),
            rasterizer_desc: RasterizerStateDesc::default(),
            depth_stencil_desc: DepthStencilStateDesc::default(),
            input_layout: InputLayoutDesc::default(),
            primitive_topology: PrimitiveTopology::default(),
            num_viewports: default_num_viewports(),
            subpass_index: 0,
            rtv_formats: Vec::new(),
            dsv_format: TextureFormat::Unknown,
            sample_desc: SampleDesc::default(),
        }
    }
}

impl Serializable for RenderTargetBlendDesc {
    fn serialize(&self, s: &mut Serializer) {
        s.write_bool(self.blend_enable);
        s.write(&self.src_blend);
        s.write(&self.dest_blend);
        s.write(&self.blend_op);
        s.write(&self.src_blend_alpha);
        s.write(&self.dest_blend_alpha);
        s.write(&self.blend_op_alpha);
        s.write_u8(self.render_target_write_mask);
    }
}

impl Serializable for BlendStateDesc {
    fn serialize(&self, s: &mut Serializer) {
        s.write_bool(self.alpha_to_coverage_enable);
        s.write_bool(self.independent_blend_enable);
        s.write_slice(&self.render_targets);
    }
}

impl Serializable for RasterizerStateDesc {
    fn serialize(&self, s: &mut Serializer) {
        s.write(&self.fill_mode);
        s.write(&self.cull_mode);
        s.write_bool(self.front_counter_clockwise);
        s.write_bool(self.depth_clip_enable);
        s.write_bool(self.scissor_enable);
        s.write_i32(self.depth_bias);
        s.write_f32(self.slope_scaled_depth_bias);
    }
}

impl Serializable for DepthStencilStateDesc {
    fn serialize(&self, s: &mut Serializer) {
        s.write_bool(self.depth_enable);
        s.write_bool(self.depth_write_enable);
        s.write(&self.depth_func);
        s.write_bool(self.stencil_enable);
        s.write_u8(self.stencil_read_mask);
        s.write_u8(self.stencil_write_mask);
    }
}

impl Serializable for LayoutElement {
    fn serialize(&self, s: &mut Serializer) {
        s.write_u32(self.input_index);
        s.write_u32(self.buffer_slot);
        s.write_u32(self.num_components);
        s.write(&self.value_type);
        s.write_bool(self.is_normalized);
        s.write_option(self.relative_offset.as_ref());
        s.write_option(self.stride.as_ref());
        s.write(&self.frequency);
        s.write_u32(self.instance_data_step_rate);
        s.write_str(&self.hlsl_semantic);
    }
}

impl Serializable for GraphicsPipelineDesc {
    fn serialize(&self, s: &mut Serializer) {
        s.write(&self.blend_desc);
        s.write_u32(self.sample_mask);
        s.write(&self.rasterizer_desc);
        s.write(&self.depth_stencil_desc);
        s.write_slice(&self.input_layout.elements);
        s.write(&self.primitive_topology);
        s.write_u8(self.num_viewports);
        s.write_u8(self.subpass_index);
        s.write_slice(&self.rtv_formats);
        s.write(&self.dsv_format);
        s.write_u8(self.sample_desc.count);
        s.write_u8(self.sample_desc.quality);
    }
}
