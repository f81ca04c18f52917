//! Pipeline state descriptions
//!
//! The four pipeline kinds share a name, a resource layout and an optional list of
//! resource signatures. Everything that is not a shader goes into the pipeline's
//! description blob; shaders are archived separately per backend.

use super::graphics::GraphicsPipelineDesc;
use super::render_pass::RenderPassDesc;
use super::shader::{ShaderCreateInfo, ShaderStage, ShaderStages};
use super::signature::{ImmutableSamplerDesc, ResourceSignatureDesc, VariableType};
use crate::backend::{BackendFlags, ChunkKind};
use crate::serialized::{Serializable, Serializer};
use serde::{Deserialize, Serialize};

/// Variable type override for resources matched by name and stage
#[derive(Debug, Clone, PartialEq, Eq, Hash, Deserialize, Serialize)]
pub struct ShaderResourceVariableDesc {
    pub shader_stages: ShaderStages,
    pub name: String,
    pub var_type: VariableType,
}

/// Resource layout used when no signatures are given
#[derive(Debug, Default, Clone, PartialEq, Deserialize, Serialize)]
pub struct PipelineResourceLayoutDesc {
    #[serde(default)]
    pub default_variable_type: VariableType,
    #[serde(default)]
    pub variables: Vec<ShaderResourceVariableDesc>,
    #[serde(default)]
    pub immutable_samplers: Vec<ImmutableSamplerDesc>,
}

impl PipelineResourceLayoutDesc {
    /// Variable type of a resource visible in `stages`
    pub fn variable_type(&self, name: &str, stages: ShaderStages) -> VariableType {
        self.variables
            .iter()
            .find(|variable| variable.name == name && variable.shader_stages.intersects(stages))
            .map_or(self.default_variable_type, |variable| variable.var_type)
    }
}

/// State shared by every pipeline kind
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct PipelineStateDesc {
    pub name: String,
    #[serde(default)]
    pub resource_layout: PipelineResourceLayoutDesc,
    /// Explicit signatures; when empty a default signature is synthesized from reflection
    #[serde(default)]
    pub resource_signatures: Vec<ResourceSignatureDesc>,
}

impl PipelineStateDesc {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            resource_layout: PipelineResourceLayoutDesc::default(),
            resource_signatures: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct GraphicsPipelineCreateInfo {
    #[serde(flatten)]
    pub desc: PipelineStateDesc,
    #[serde(default)]
    pub graphics: GraphicsPipelineDesc,
    #[serde(default)]
    pub render_pass: Option<RenderPassDesc>,
    #[serde(default)]
    pub vertex_shader: Option<ShaderCreateInfo>,
    #[serde(default)]
    pub pixel_shader: Option<ShaderCreateInfo>,
    #[serde(default)]
    pub geometry_shader: Option<ShaderCreateInfo>,
    #[serde(default)]
    pub hull_shader: Option<ShaderCreateInfo>,
    #[serde(default)]
    pub domain_shader: Option<ShaderCreateInfo>,
    #[serde(default)]
    pub amplification_shader: Option<ShaderCreateInfo>,
    #[serde(default)]
    pub mesh_shader: Option<ShaderCreateInfo>,
}

impl GraphicsPipelineCreateInfo {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            desc: PipelineStateDesc::new(name),
            graphics: GraphicsPipelineDesc::default(),
            render_pass: None,
            vertex_shader: None,
            pixel_shader: None,
            geometry_shader: None,
            hull_shader: None,
            domain_shader: None,
            amplification_shader: None,
            mesh_shader: None,
        }
    }

    /// Shader slots paired with the stage each slot expects
    fn slots(&self) -> [(ShaderStage, Option<&ShaderCreateInfo>); 7] {
        [
            (ShaderStage::Vertex, self.vertex_shader.as_ref()),
            (ShaderStage::Pixel, self.pixel_shader.as_ref()),
            (ShaderStage::Geometry, self.geometry_shader.as_ref()),
            (ShaderStage::Hull, self.hull_shader.as_ref()),
            (ShaderStage::Domain, self.domain_shader.as_ref()),
            (ShaderStage::Amplification, self.amplification_shader.as_ref()),
            (ShaderStage::Mesh, self.mesh_shader.as_ref()),
        ]
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct ComputePipelineCreateInfo {
    #[serde(flatten)]
    pub desc: PipelineStateDesc,
    pub compute_shader: ShaderCreateInfo,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct TilePipelineCreateInfo {
    #[serde(flatten)]
    pub desc: PipelineStateDesc,
    pub tile_shader: ShaderCreateInfo,
    #[serde(default)]
    pub rtv_formats: Vec<super::render_pass::TextureFormat>,
    #[serde(default = "default_sample_count")]
    pub sample_count: u8,
}

fn default_sample_count() -> u8 {
    1
}

/// Ray generation, miss or callable shader group
#[derive(Debug, Clone, PartialEq, Eq, Hash, Deserialize, Serialize)]
pub struct RayTracingGeneralShaderGroup {
    pub name: String,
    /// Index into the pipeline's shader list
    pub shader: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Deserialize, Serialize)]
pub struct RayTracingTriangleHitShaderGroup {
    pub name: String,
    pub closest_hit_shader: u32,
    #[serde(default)]
    pub any_hit_shader: Option<u32>,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Deserialize, Serialize)]
pub struct RayTracingProceduralHitShaderGroup {
    pub name: String,
    pub intersection_shader: u32,
    #[serde(default)]
    pub closest_hit_shader: Option<u32>,
    #[serde(default)]
    pub any_hit_shader: Option<u32>,
}

fn default_recursion_depth() -> u8 {
    1
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct RayTracingPipelineCreateInfo {
    #[serde(flatten)]
    pub desc: PipelineStateDesc,
    pub shaders: Vec<ShaderCreateInfo>,
    #[serde(default)]
    pub general_shaders: Vec<RayTracingGeneralShaderGroup>,
    #[serde(default)]
    pub triangle_hit_shaders: Vec<RayTracingTriangleHitShaderGroup>,
    #[serde(default)]
    pub procedural_hit_shaders: Vec<RayTracingProceduralHitShaderGroup>,
    #[serde(default = "default_recursion_depth")]
    pub max_recursion_depth: u8,
    #[serde(default)]
    pub shader_record_size: u16,
}

impl RayTracingPipelineCreateInfo {
    fn validate_groups(&self) -> Result<(), String> {
        let name = &self.desc.name;
        let check = |group: &str, index: u32, expected: &[ShaderStage]| -> Result<(), String> {
            let shader = self
                .shaders
                .get(index as usize)
                .ok_or_else(|| format!("shader group '{group}' of pipeline '{name}' references shader {index}, but the pipeline has {} shaders", self.shaders.len()))?;
            if !expected.contains(&shader.stage) {
                return Err(format!("shader group '{group}' of pipeline '{name}' references {} shader '{}'", shader.stage, shader.name));
            }
            Ok(())
        };

        for group in &self.general_shaders {
            check(&group.name, group.shader, &[ShaderStage::RayGen, ShaderStage::RayMiss, ShaderStage::Callable])?;
        }
        for group in &self.triangle_hit_shaders {
            check(&group.name, group.closest_hit_shader, &[ShaderStage::RayClosestHit])?;
            if let Some(any_hit) = group.any_hit_shader {
                check(&group.name, any_hit, &[ShaderStage::RayAnyHit])?;
            }
        }
        for group in &self.procedural_hit_shaders {
            check(&group.name, group.intersection_shader, &[ShaderStage::RayIntersection])?;
            if let Some(closest_hit) = group.closest_hit_shader {
                check(&group.name, closest_hit, &[ShaderStage::RayClosestHit])?;
            }
            if let Some(any_hit) = group.any_hit_shader {
                check(&group.name, any_hit, &[ShaderStage::RayAnyHit])?;
            }
        }
        if !self.general_shaders.iter().any(|group| self.shaders.get(group.shader as usize).is_some_and(|shader| shader.stage == ShaderStage::RayGen)) {
            return Err(format!("ray tracing pipeline '{name}' has no ray generation shader group"));
        }
        Ok(())
    }
}

/// Description of any pipeline kind, tagged by `type` in manifests
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PipelineCreateInfo {
    Graphics(GraphicsPipelineCreateInfo),
    Compute(ComputePipelineCreateInfo),
    RayTracing(RayTracingPipelineCreateInfo),
    Tile(TilePipelineCreateInfo),
}

impl PipelineCreateInfo {
    /// State shared by every pipeline kind
    pub fn desc(&self) -> &PipelineStateDesc {
        match self {
            PipelineCreateInfo::Graphics(info) => &info.desc,
            PipelineCreateInfo::Compute(info) => &info.desc,
            PipelineCreateInfo::RayTracing(info) => &info.desc,
            PipelineCreateInfo::Tile(info) => &info.desc,
        }
    }

    pub fn name(&self) -> &str {
        &self.desc().name
    }

    /// Chunk this pipeline is archived in
    pub fn chunk_kind(&self) -> ChunkKind {
        match self {
            PipelineCreateInfo::Graphics(_) => ChunkKind::GraphicsPipelines,
            PipelineCreateInfo::Compute(_) => ChunkKind::ComputePipelines,
            PipelineCreateInfo::RayTracing(_) => ChunkKind::RayTracingPipelines,
            PipelineCreateInfo::Tile(_) => ChunkKind::TilePipelines,
        }
    }

    /// Shaders of the pipeline in archive order
    pub fn shaders(&self) -> Vec<&ShaderCreateInfo> {
        match self {
            PipelineCreateInfo::Graphics(info) => info.slots().into_iter().filter_map(|(_, shader)| shader).collect(),
            PipelineCreateInfo::Compute(info) => vec![&info.compute_shader],
            PipelineCreateInfo::RayTracing(info) => info.shaders.iter().collect(),
            PipelineCreateInfo::Tile(info) => vec![&info.tile_shader],
        }
    }

    /// Mutable access to the shaders of the pipeline, in archive order
    pub fn shaders_mut(&mut self) -> Vec<&mut ShaderCreateInfo> {
        match self {
            PipelineCreateInfo::Graphics(info) => [
                &mut info.vertex_shader,
                &mut info.pixel_shader,
                &mut info.geometry_shader,
                &mut info.hull_shader,
                &mut info.domain_shader,
                &mut info.amplification_shader,
                &mut info.mesh_shader,
            ]
            .into_iter()
            .filter_map(Option::as_mut)
            .collect(),
            PipelineCreateInfo::Compute(info) => vec![&mut info.compute_shader],
            PipelineCreateInfo::RayTracing(info) => info.shaders.iter_mut().collect(),
            PipelineCreateInfo::Tile(info) => vec![&mut info.tile_shader],
        }
    }

    /// Render pass of a graphics pipeline
    pub fn render_pass(&self) -> Option<&RenderPassDesc> {
        match self {
            PipelineCreateInfo::Graphics(info) => info.render_pass.as_ref(),
            _ => None,
        }
    }

    /// Checks the description for structural errors
    ///
    /// # Returns
    /// A human-readable reason when the description is malformed
    pub fn validate(&self) -> Result<(), String> {
        let desc = self.desc();
        if desc.name.is_empty() {
            return Err("pipeline name must not be empty".to_string());
        }

        match self {
            PipelineCreateInfo::Graphics(info) => {
                for (stage, shader) in info.slots() {
                    if let Some(shader) = shader {
                        if shader.stage != stage {
                            return Err(format!("{} shader '{}' is in the {stage} slot of pipeline '{}'", shader.stage, shader.name, desc.name));
                        }
                    }
                }
                if info.vertex_shader.is_none() && info.mesh_shader.is_none() {
                    return Err(format!("graphics pipeline '{}' has neither a vertex nor a mesh shader", desc.name));
                }
                if let Some(render_pass) = &info.render_pass {
                    render_pass.validate()?;
                    if info.graphics.subpass_index as usize >= render_pass.subpasses.len() {
                        return Err(format!("graphics pipeline '{}' uses subpass {} of render pass '{}'", desc.name, info.graphics.subpass_index, render_pass.name));
                    }
                }
            }
            PipelineCreateInfo::Compute(info) => expect_stage(&info.compute_shader, ShaderStage::Compute, &desc.name)?,
            PipelineCreateInfo::Tile(info) => expect_stage(&info.tile_shader, ShaderStage::Tile, &desc.name)?,
            PipelineCreateInfo::RayTracing(info) => {
                if let Some(shader) = info.shaders.iter().find(|shader| !shader.stage.is_ray_tracing()) {
                    return Err(format!("{} shader '{}' cannot be used in ray tracing pipeline '{}'", shader.stage, shader.name, desc.name));
                }
                info.validate_groups()?;
            }
        }

        for shader in self.shaders() {
            if shader.source.is_file() {
                return Err(format!("shader '{}' of pipeline '{}' refers to an unresolved file", shader.name, desc.name));
            }
            if shader.entry_point.is_empty() {
                return Err(format!("shader '{}' of pipeline '{}' has an empty entry point", shader.name, desc.name));
            }
        }

        for (i, signature) in desc.resource_signatures.iter().enumerate() {
            if signature.name.is_empty() {
                return Err(format!("signature {i} of pipeline '{}' has an empty name", desc.name));
            }
        }
        Ok(())
    }
}

fn expect_stage(shader: &ShaderCreateInfo, stage: ShaderStage, pipeline: &str) -> Result<(), String> {
    if shader.stage != stage {
        return Err(format!("{} shader '{}' is in the {stage} slot of pipeline '{pipeline}'", shader.stage, shader.name));
    }
    Ok(())
}

impl From<GraphicsPipelineCreateInfo> for PipelineCreateInfo {
    fn from(info: GraphicsPipelineCreateInfo) -> Self {
        PipelineCreateInfo::Graphics(info)
    }
}

impl From<ComputePipelineCreateInfo> for PipelineCreateInfo {
    fn from(info: ComputePipelineCreateInfo) -> Self {
        PipelineCreateInfo::Compute(info)
    }
}

impl From<RayTracingPipelineCreateInfo> for PipelineCreateInfo {
    fn from(info: RayTracingPipelineCreateInfo) -> Self {
        PipelineCreateInfo::RayTracing(info)
    }
}

impl From<TilePipelineCreateInfo> for PipelineCreateInfo {
    fn from(info: TilePipelineCreateInfo) -> Self {
        PipelineCreateInfo::Tile(info)
    }
}

/// Target backends of an `add_*` call
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize)]
pub struct ArchiveFlags {
    pub backends: BackendFlags,
}

impl ArchiveFlags {
    pub fn new(backends: BackendFlags) -> Self {
        Self { backends }
    }
}

impl Serializable for ShaderResourceVariableDesc {
    fn serialize(&self, s: &mut Serializer) {
        s.write(&self.shader_stages);
        s.write_str(&self.name);
        s.write(&self.var_type);
    }
}

impl Serializable for PipelineResourceLayoutDesc {
    fn serialize(&self, s: &mut Serializer) {
        s.write(&self.default_variable_type);
        s.write_slice(&self.variables);
        s.write_slice(&self.immutable_samplers);
    }
}

impl Serializable for RayTracingGeneralShaderGroup {
    fn serialize(&self, s: &mut Serializer) {
        s.write_str(&self.name);
        s.write_u32(self.shader);
    }
}

impl Serializable for RayTracingTriangleHitShaderGroup {
    fn serialize(&self, s: &mut Serializer) {
        s.write_str(&self.name);
        s.write_u32(self.closest_hit_shader);
        s.write_option(self.any_hit_shader.as_ref());
    }
}

impl Serializable for RayTracingProceduralHitShaderGroup {
    fn serialize(&self, s: &mut Serializer) {
        s.write_str(&self.name);
        s.write_u32(self.intersection_shader);
        s.write_option(self.closest_hit_shader.as_ref());
        s.write_option(self.any_hit_shader.as_ref());
    }
}

/// Description blob of a pipeline: everything except shaders, signatures and the render pass
impl Serializable for PipelineCreateInfo {
    fn serialize(&self, s: &mut Serializer) {
        let desc = self.desc();
        s.write_u32(self.chunk_kind() as u32);
        s.write_str(&desc.name);
        s.write(&desc.resource_layout);
        match self {
            PipelineCreateInfo::Graphics(info) => {
                s.write(&info.graphics);
                let stages = info.slots().into_iter().filter(|(_, shader)| shader.is_some()).fold(ShaderStages::empty(), |stages, (stage, _)| stages | stage.flag());
                s.write(&stages);
            }
            PipelineCreateInfo::Compute(_) => {}
            PipelineCreateInfo::RayTracing(info) => {
                s.write_slice(&info.general_shaders);
                s.write_slice(&info.triangle_hit_shaders);
                s.write_slice(&info.procedural_hit_shaders);
                s.write_u8(info.max_recursion_depth);
                s.write_u32(info.shader_record_size as u32);
            }
            PipelineCreateInfo::Tile(info) => {
                s.write_slice(&info.rtv_formats);
                s.write_u8(info.sample_count);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::desc::ShaderSource;

    fn shader(name: &str, stage: ShaderStage) -> ShaderCreateInfo {
        ShaderCreateInfo::new(name, stage, ShaderSource::Glsl("void main() {}".into()))
    }

    #[test]
    fn test_graphics_requires_vertex_or_mesh_shader() {
        let mut info = GraphicsPipelineCreateInfo::new("G");
        info.pixel_shader = Some(shader("PS", ShaderStage::Pixel));
        assert!(PipelineCreateInfo::from(info.clone()).validate().is_err());

        info.vertex_shader = Some(shader("VS", ShaderStage::Vertex));
        assert!(PipelineCreateInfo::from(info).validate().is_ok());
    }

    #[test]
    fn test_stage_slot_mismatch_is_rejected() {
        let mut info = GraphicsPipelineCreateInfo::new("G");
        info.vertex_shader = Some(shader("PS", ShaderStage::Pixel));
        let err = PipelineCreateInfo::from(info).validate().unwrap_err();
        assert!(err.contains("vertex slot"), "{err}");
    }

    #[test]
    fn test_ray_tracing_group_indices_are_checked() {
        let info = RayTracingPipelineCreateInfo {
            desc: PipelineStateDesc::new("RT"),
            shaders: vec![shader("Gen", ShaderStage::RayGen), shader("Miss", ShaderStage::RayMiss)],
            general_shaders: vec![
                RayTracingGeneralShaderGroup { name: "gen".into(), shader: 0 },
                RayTracingGeneralShaderGroup { name: "miss".into(), shader: 5 },
            ],
            triangle_hit_shaders: vec![],
            procedural_hit_shaders: vec![],
            max_recursion_depth: 1,
            shader_record_size: 0,
        };
        assert!(PipelineCreateInfo::from(info).validate().unwrap_err().contains("references shader 5"));
    }

    #[test]
    fn test_variable_type_overrides() {
        let layout = PipelineResourceLayoutDesc {
            default_variable_type: VariableType::Mutable,
            variables: vec![ShaderResourceVariableDesc {
                shader_stages: ShaderStages::PIXEL,
                name: "g_Tex".into(),
                var_type: VariableType::Dynamic,
            }],
            immutable_samplers: vec![],
        };
        assert_eq!(layout.variable_type("g_Tex", ShaderStages::PIXEL), VariableType::Dynamic);
        assert_eq!(layout.variable_type("g_Tex", ShaderStages::VERTEX), VariableType::Mutable);
        assert_eq!(layout.variable_type("other", ShaderStages::PIXEL), VariableType::Mutable);
    }

    #[test]
    fn test_tagged_pipeline_from_json() {
        let json = r#"{
            "type": "compute",
            "name": "C1",
            "compute_shader": { "name": "CS", "stage": "compute", "source": { "glsl": "void main() {}" } }
        }"#;
        let info: PipelineCreateInfo = serde_json::from_str(json).unwrap();
        assert_eq!(info.name(), "C1");
        assert_eq!(info.chunk_kind(), ChunkKind::ComputePipelines);
        assert_eq!(info.shaders().len(), 1);
    }
}
