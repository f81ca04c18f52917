//! Shared helpers: hand-assembled SPIR-V and a mock HLSL compiler

#![allow(dead_code)]

use pso_archiver::desc::{ArchiveFlags, ComputePipelineCreateInfo, GraphicsPipelineCreateInfo, InputLanguage, PipelineStateDesc, ShaderCreateInfo, ShaderSource, ShaderStage};
use pso_archiver::reflection::ShaderReflection;
use pso_archiver::spirv::{SpirvModule, decoration, words_to_bytes};
use pso_archiver::transcoder::{TranscodeRequest, TranscodedShader, Transcoder, TranscoderCaps, TranscoderRegistry};
use pso_archiver::{Archiver, ArchiverConfig, Backend, BackendFlags, TranscoderError};

const OP_NAME: u16 = 5;
const OP_ENTRY_POINT: u16 = 15;
const OP_TYPE_FLOAT: u16 = 22;
const OP_TYPE_IMAGE: u16 = 25;
const OP_TYPE_STRUCT: u16 = 30;
const OP_TYPE_POINTER: u16 = 32;
const OP_VARIABLE: u16 = 59;
const OP_DECORATE: u16 = 71;
const OP_DECORATE_STRING: u16 = 5632;

const UNIFORM_CONSTANT: u32 = 0;
const INPUT: u32 = 1;
const UNIFORM: u32 = 2;
const STORAGE_BUFFER: u32 = 12;

/// Id of an unused `OpName` that makes modules built from different sources differ
const TAG_ID: u32 = 99;

fn string_words(s: &str) -> Vec<u32> {
    let mut bytes = s.as_bytes().to_vec();
    bytes.push(0);
    bytes.resize(bytes.len().next_multiple_of(4), 0);
    bytes.chunks_exact(4).map(|c| u32::from_le_bytes([c[0], c[1], c[2], c[3]])).collect()
}

/// Minimal SPIR-V assembler
pub struct SpirvBuilder {
    words: Vec<u32>,
}

impl SpirvBuilder {
    pub fn new() -> Self {
        Self { words: vec![0x0723_0203, 0x0001_0000, 0, 100, 0] }
    }

    pub fn op(&mut self, opcode: u16, operands: &[u32]) -> &mut Self {
        self.words.push(((operands.len() as u32 + 1) << 16) | opcode as u32);
        self.words.extend_from_slice(operands);
        self
    }

    pub fn entry_point(&mut self, execution_model: u32, name: &str) -> &mut Self {
        let mut operands = vec![execution_model, 1];
        operands.extend(string_words(name));
        self.op(OP_ENTRY_POINT, &operands)
    }

    pub fn name(&mut self, id: u32, name: &str) -> &mut Self {
        let mut operands = vec![id];
        operands.extend(string_words(name));
        self.op(OP_NAME, &operands)
    }

    pub fn semantic(&mut self, id: u32, semantic: &str) -> &mut Self {
        let mut operands = vec![id, decoration::USER_SEMANTIC];
        operands.extend(string_words(semantic));
        self.op(OP_DECORATE_STRING, &operands)
    }

    pub fn binding(&mut self, id: u32, set: u32, binding: u32) -> &mut Self {
        self.op(OP_DECORATE, &[id, decoration::DESCRIPTOR_SET, set]).op(OP_DECORATE, &[id, decoration::BINDING, binding])
    }

    pub fn finish(&self) -> Vec<u32> {
        self.words.clone()
    }
}

/// Compute shader with a read-write storage buffer `Data` at (0, 0)
pub fn compute_spirv(tag: &str) -> Vec<u32> {
    let mut asm = SpirvBuilder::new();
    asm.entry_point(5, "main")
        .name(TAG_ID, tag)
        .name(10, "Data")
        .name(11, "data")
        .op(OP_DECORATE, &[10, decoration::BLOCK])
        .binding(11, 0, 0)
        .op(OP_TYPE_FLOAT, &[3, 32])
        .op(OP_TYPE_STRUCT, &[10, 3])
        .op(OP_TYPE_POINTER, &[12, STORAGE_BUFFER, 10])
        .op(OP_VARIABLE, &[12, 11, STORAGE_BUFFER]);
    asm.finish()
}

/// Vertex or pixel shader the way HLSL compilers emit it
///
/// Both stages read the constant buffer `Constants`; the pixel shader also samples
/// `g_Texture`, and the vertex shader has one input with the given semantic.
pub fn hlsl_style_spirv(stage: ShaderStage, semantic: &str, tag: &str) -> Vec<u32> {
    let mut asm = SpirvBuilder::new();
    let execution_model = if stage == ShaderStage::Vertex { 0 } else { 4 };
    asm.entry_point(execution_model, "main")
        .name(TAG_ID, tag)
        .name(10, "type.Constants")
        .name(11, "Constants")
        .op(OP_DECORATE, &[10, decoration::BLOCK])
        .binding(11, 0, 0)
        .op(OP_TYPE_FLOAT, &[3, 32])
        .op(OP_TYPE_STRUCT, &[10, 3])
        .op(OP_TYPE_POINTER, &[12, UNIFORM, 10])
        .op(OP_VARIABLE, &[12, 11, UNIFORM]);
    match stage {
        ShaderStage::Vertex => {
            asm.name(30, "in_var_ATTRIB")
                .op(OP_DECORATE, &[30, decoration::LOCATION, 0])
                .semantic(30, semantic)
                .op(OP_TYPE_POINTER, &[15, INPUT, 3])
                .op(OP_VARIABLE, &[15, 30, INPUT]);
        }
        _ => {
            asm.name(20, "g_Texture")
                .binding(20, 0, 1)
                .op(OP_TYPE_IMAGE, &[13, 3, 1, 0, 0, 0, 1, 0])
                .op(OP_TYPE_POINTER, &[14, UNIFORM_CONSTANT, 13])
                .op(OP_VARIABLE, &[14, 20, UNIFORM_CONSTANT]);
        }
    }
    asm.finish()
}

/// Pretends to compile HLSL
///
/// Vulkan gets SPIR-V, Direct3D gets a fake DXBC container wrapping the source. A
/// `// semantic: NAME` line sets the semantic of the vertex input.
pub struct MockHlsl;

impl MockHlsl {
    fn spirv(request: &TranscodeRequest<'_>) -> Result<Vec<u32>, TranscoderError> {
        let text = request.shader.source.text().ok_or_else(|| TranscoderError::new("expected HLSL text"))?;
        if text.contains("error") {
            return Err(TranscoderError::new(format!("{}: error X3000: syntax error", request.shader.name)));
        }
        let semantic = text.lines().find_map(|line| line.trim().strip_prefix("// semantic:")).map_or("ATTRIB0", str::trim);
        Ok(hlsl_style_spirv(request.shader.stage, semantic, text))
    }
}

impl Transcoder for MockHlsl {
    fn caps(&self) -> TranscoderCaps {
        TranscoderCaps { reentrant: true, legalizes_spirv: true }
    }

    fn compile(&self, request: &TranscodeRequest<'_>) -> Result<TranscodedShader, TranscoderError> {
        let words = Self::spirv(request)?;
        match request.backend {
            Backend::Vulkan => Ok(TranscodedShader {
                code: words_to_bytes(&words).into(),
                entry_point: request.shader.entry_point.clone(),
                reflection: None,
            }),
            _ => {
                let module = SpirvModule::parse(words).map_err(|e| TranscoderError::new(e.to_string()))?;
                let mut code = b"DXBC".to_vec();
                code.extend_from_slice(request.shader.source.text().unwrap_or_default().as_bytes());
                Ok(TranscodedShader {
                    code: code.into(),
                    entry_point: request.shader.entry_point.clone(),
                    reflection: Some(module.reflect(request.shader.stage, &request.shader.entry_point)),
                })
            }
        }
    }

    fn reflect(&self, native: &[u8], stage: ShaderStage) -> Result<ShaderReflection, TranscoderError> {
        let module = SpirvModule::from_bytes(native).map_err(|e| TranscoderError::new(e.to_string()))?;
        Ok(module.reflect(stage, "main"))
    }
}

/// Built-in transcoders plus the mock HLSL compiler for Vulkan and Direct3D
pub fn registry() -> TranscoderRegistry {
    let mut registry = TranscoderRegistry::with_defaults();
    for backend in [Backend::Vulkan, Backend::D3D11, Backend::D3D12] {
        registry.register(backend, InputLanguage::Hlsl, MockHlsl).unwrap();
    }
    registry
}

pub fn archiver() -> Archiver {
    Archiver::new(registry(), ArchiverConfig::default())
}

pub fn flags(backends: BackendFlags) -> ArchiveFlags {
    ArchiveFlags::new(backends)
}

pub fn spirv_compute(name: &str, words: Vec<u32>) -> ComputePipelineCreateInfo {
    ComputePipelineCreateInfo {
        desc: PipelineStateDesc::new(name),
        compute_shader: ShaderCreateInfo::new("CS", ShaderStage::Compute, ShaderSource::Spirv(words)),
    }
}

pub fn hlsl_graphics(name: &str, vertex: &str, pixel: Option<&str>) -> GraphicsPipelineCreateInfo {
    let mut info = GraphicsPipelineCreateInfo::new(name);
    info.vertex_shader = Some(ShaderCreateInfo::new("VS", ShaderStage::Vertex, ShaderSource::Hlsl(vertex.into())));
    info.pixel_shader = pixel.map(|pixel| ShaderCreateInfo::new("PS", ShaderStage::Pixel, ShaderSource::Hlsl(pixel.into())));
    info
}
