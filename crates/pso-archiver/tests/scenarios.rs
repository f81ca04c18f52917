//! End-to-end archiving scenarios, checked through the archive reader

mod common;

use common::{archiver, compute_spirv, flags, hlsl_graphics, spirv_compute};
use pso_archiver::archive::{ArchiveReader, COMMON_REGION, DataHeader, INVALID_OFFSET};
use pso_archiver::desc::{ComputePipelineCreateInfo, PipelineResourceDesc, PipelineStateDesc, ResourceSignatureDesc, ResourceType, ShaderCreateInfo, ShaderSource, ShaderStage, ShaderStages, VariableType};
use pso_archiver::manifest::DEFAULT_BACKENDS;
use pso_archiver::serialized::Deserializer;
use pso_archiver::spirv::SpirvModule;
use pso_archiver::{ArchiverError, Backend, BackendFlags, ChunkKind};

const VERTEX: &str = "// semantic: ATTRIB0\nfloat4 main(float4 pos : ATTRIB0) : SV_Position { return pos; }";
const PIXEL_RED: &str = "float4 main() : SV_Target { return float4(1, 0, 0, 1); }";
const PIXEL_GREEN: &str = "float4 main() : SV_Target { return float4(0, 1, 0, 1); }";
const SCALED_GLSL: &str = "#version 450
layout(local_size_x = 8) in;
layout(set = 0, binding = 0) uniform Params { uint scale; } params;
layout(set = 0, binding = 1) buffer Data { uint values[]; } data;
void main() { data.values[gl_GlobalInvocationID.x] *= params.scale; }
";

fn glsl_compute(name: &str) -> ComputePipelineCreateInfo {
    ComputePipelineCreateInfo {
        desc: PipelineStateDesc::new(name),
        compute_shader: ShaderCreateInfo::new("CS", ShaderStage::Compute, ShaderSource::Glsl(SCALED_GLSL.into())),
    }
}

#[test]
fn test_single_spirv_compute_pipeline() {
    let mut archiver = archiver();
    archiver.add_compute_pso(spirv_compute("C1", compute_spirv("C1")), flags(BackendFlags::VULKAN)).unwrap();
    let reader = ArchiveReader::open(archiver.serialize_to_blob().unwrap()).unwrap();
    reader.verify_offsets().unwrap();

    let pipelines = reader.named_resources(ChunkKind::ComputePipelines);
    assert_eq!(pipelines.len(), 1);
    assert_eq!(pipelines[0].name, "C1");
    assert_eq!(reader.shaders(Backend::Vulkan).unwrap().len(), 1);

    let signatures = reader.named_resources(ChunkKind::ResourceSignatures);
    assert_eq!(signatures.len(), 1);
    assert_eq!(signatures[0].name, "Default Signature of PSO 'C1'");

    let pipeline = reader.pipeline(ChunkKind::ComputePipelines, "C1").unwrap();
    assert_eq!(pipeline.signatures, vec![0]);
    assert_eq!(pipeline.render_pass, None);
    assert_eq!(pipeline.layout_ids.len(), 1);
    assert_eq!(pipeline.layout_ids[0].0, Backend::Vulkan);
    assert!(pipeline.device[Backend::D3D12.index()].is_none());

    let signature = reader.signature("Default Signature of PSO 'C1'").unwrap();
    assert!(signature.device[Backend::Vulkan.index()].is_some());
    assert!(signature.device[Backend::Gl.index()].is_none());

    let debug_info = reader.debug_info().unwrap();
    assert!(debug_info.builder_id.starts_with("pso-archiver "));
}

#[test]
fn test_shared_vertex_shader_is_stored_once() {
    let mut archiver = archiver();
    archiver.add_graphics_pso(hlsl_graphics("G1", VERTEX, None), flags(BackendFlags::VULKAN)).unwrap();
    archiver.add_graphics_pso(hlsl_graphics("G2", VERTEX, None), flags(BackendFlags::VULKAN)).unwrap();
    let reader = ArchiveReader::open(archiver.serialize_to_blob().unwrap()).unwrap();

    assert_eq!(reader.shaders(Backend::Vulkan).unwrap().len(), 1);
    for name in ["G1", "G2"] {
        let pipeline = reader.pipeline(ChunkKind::GraphicsPipelines, name).unwrap();
        let vulkan = pipeline.device[Backend::Vulkan.index()].as_ref().unwrap();
        assert_eq!(vulkan.shaders, vec![0], "{name}");
    }
}

#[test]
fn test_identical_readd_succeeds_and_changed_readd_fails() {
    let mut once = archiver();
    once.add_compute_pso(spirv_compute("C1", compute_spirv("C1")), flags(BackendFlags::VULKAN)).unwrap();

    let mut archiver = archiver();
    archiver.add_compute_pso(spirv_compute("C1", compute_spirv("C1")), flags(BackendFlags::VULKAN)).unwrap();
    archiver.add_compute_pso(spirv_compute("C1", compute_spirv("C1")), flags(BackendFlags::VULKAN)).unwrap();

    // One byte of the shader changed
    let mut changed = compute_spirv("C1");
    let last = changed.len() - 1;
    changed[last] ^= 0x0100;
    let err = archiver.add_compute_pso(spirv_compute("C1", changed), flags(BackendFlags::VULKAN)).unwrap_err();
    assert_eq!(err, ArchiverError::DuplicateName { kind: ChunkKind::ComputePipelines, name: "C1".into() });

    assert_eq!(archiver.serialize_to_blob().unwrap(), once.serialize_to_blob().unwrap());
}

#[test]
fn test_skipped_backends_stay_invalid() {
    let mut archiver = archiver();
    archiver.add_graphics_pso(hlsl_graphics("G1", VERTEX, Some(PIXEL_RED)), flags(BackendFlags::D3D12 | BackendFlags::VULKAN)).unwrap();
    archiver.add_graphics_pso(hlsl_graphics("G2", VERTEX, Some(PIXEL_GREEN)), flags(BackendFlags::VULKAN)).unwrap();
    let archive = archiver.serialize_to_blob().unwrap();
    let reader = ArchiveReader::open(archive.clone()).unwrap();
    reader.verify_offsets().unwrap();

    // Direct3D12 only has the shaders of G1
    let d3d12 = reader.shaders(Backend::D3D12).unwrap();
    assert_eq!(d3d12.len(), 2);
    assert!(d3d12.iter().all(|shader| shader.code.starts_with(b"DXBC")));
    assert!(d3d12.iter().any(|shader| shader.code.ends_with(PIXEL_RED.as_bytes())));
    assert!(!d3d12.iter().any(|shader| shader.code.ends_with(PIXEL_GREEN.as_bytes())));
    assert_eq!(reader.shaders(Backend::Vulkan).unwrap().len(), 3);

    let g2 = reader.pipeline(ChunkKind::GraphicsPipelines, "G2").unwrap();
    assert!(g2.device[Backend::D3D12.index()].is_none());

    // The raw device offset slot of G2 for Direct3D12
    let entry = reader.find(ChunkKind::GraphicsPipelines, "G2").unwrap();
    let record = reader.header().base_offsets[COMMON_REGION] as usize + entry.offset as usize;
    let slot = record + DataHeader::device_offset_position(Backend::D3D12);
    assert_eq!(u32::from_le_bytes(archive[slot..slot + 4].try_into().unwrap()), INVALID_OFFSET);
    let slot = record + DataHeader::device_offset_position(Backend::Vulkan);
    assert_ne!(u32::from_le_bytes(archive[slot..slot + 4].try_into().unwrap()), INVALID_OFFSET);
}

#[test]
fn test_attrib_semantic_sets_vulkan_location() {
    let mut archiver = archiver();
    let vertex = "// semantic: ATTRIB3\nfloat4 main(float4 pos : ATTRIB3) : SV_Position { return pos; }";
    archiver.add_graphics_pso(hlsl_graphics("G", vertex, None), flags(BackendFlags::VULKAN)).unwrap();
    let reader = ArchiveReader::open(archiver.serialize_to_blob().unwrap()).unwrap();

    let shaders = reader.shaders(Backend::Vulkan).unwrap();
    assert_eq!(shaders[0].stage, ShaderStage::Vertex);
    let reflection = SpirvModule::from_bytes(shaders[0].code).unwrap().reflect(ShaderStage::Vertex, "main");
    assert_eq!(reflection.vertex_inputs.len(), 1);
    assert_eq!(reflection.vertex_inputs[0].location, 3);
}

#[test]
fn test_non_attrib_semantic_is_rejected() {
    let mut archiver = archiver();
    let vertex = "// semantic: POSITION\nfloat4 main(float4 pos : POSITION) : SV_Position { return pos; }";
    let err = archiver.add_graphics_pso(hlsl_graphics("G", vertex, None), flags(BackendFlags::VULKAN)).unwrap_err();
    assert!(matches!(err, ArchiverError::ReflectionSemantic { ref semantic, .. } if semantic == "POSITION"), "{err}");

    // Direct3D does not map semantics
    archiver.add_graphics_pso(hlsl_graphics("G", vertex, None), flags(BackendFlags::D3D12)).unwrap();
}

#[test]
fn test_compiler_errors_are_passed_through() {
    let mut archiver = archiver();
    let err = archiver
        .add_graphics_pso(hlsl_graphics("G", VERTEX, Some("float4 main() : SV_Target { error }")), flags(BackendFlags::VULKAN))
        .unwrap_err();
    assert_eq!(
        err,
        ArchiverError::TranscoderFailure {
            backend: Backend::Vulkan,
            stage: ShaderStage::Pixel,
            message: "PS: error X3000: syntax error".into(),
        }
    );
}

#[test]
fn test_stream_and_blob_are_identical() {
    let build = || {
        let mut archiver = archiver();
        archiver.add_graphics_pso(hlsl_graphics("G1", VERTEX, Some(PIXEL_RED)), flags(BackendFlags::D3D12 | BackendFlags::VULKAN)).unwrap();
        archiver.add_compute_pso(spirv_compute("C1", compute_spirv("C1")), flags(BackendFlags::VULKAN)).unwrap();
        archiver
    };
    let blob = build().serialize_to_blob().unwrap();
    let mut stream = Vec::new();
    let written = build().serialize_to_stream(&mut stream).unwrap();
    assert_eq!(written as usize, stream.len());
    assert_eq!(blob.as_ref(), stream.as_slice());
}

#[test]
fn test_unsupported_route() {
    let mut archiver = archiver();
    let err = archiver.add_compute_pso(spirv_compute("C1", compute_spirv("C1")), flags(BackendFlags::D3D11)).unwrap_err();
    assert!(matches!(err, ArchiverError::UnsupportedInput { backend: Backend::D3D11, .. }), "{err}");
}

#[test]
fn test_glsl_pipeline_on_every_default_backend() {
    let mut archiver = archiver();
    archiver.add_compute_pso(glsl_compute("Scale"), flags(DEFAULT_BACKENDS)).unwrap();
    let reader = ArchiveReader::open(archiver.serialize_to_blob().unwrap()).unwrap();
    reader.verify_offsets().unwrap();

    for backend in DEFAULT_BACKENDS.backends() {
        assert_eq!(reader.shaders(backend).unwrap().len(), 1, "{backend}");
    }

    // One resource per declaration on every backend that shares the default signature
    let signature = reader.signature("Default Signature of PSO 'Scale'").unwrap();
    for backend in [Backend::Vulkan, Backend::MetalMacos, Backend::MetalIos] {
        assert!(signature.device[backend.index()].is_some(), "{backend}");
    }
    assert!(signature.device[Backend::Gl.index()].is_none());

    let pipeline = reader.pipeline(ChunkKind::ComputePipelines, "Scale").unwrap();
    let header = |backend: Backend| pipeline.device[backend.index()].as_ref().unwrap().header;
    let mut vulkan = Deserializer::new(header(Backend::Vulkan));
    vulkan.read_u32().unwrap();
    assert_eq!(vulkan.read_u32().unwrap(), 2);
    for backend in [Backend::MetalMacos, Backend::Gl, Backend::Gles] {
        assert_eq!(Deserializer::new(header(backend)).read_u32().unwrap(), 2, "{backend}");
    }

    let spirv = reader.shaders(Backend::Vulkan).unwrap();
    let reflection = SpirvModule::from_bytes(spirv[0].code).unwrap().reflect(ShaderStage::Compute, "main");
    let mut names: Vec<&str> = reflection.resources.iter().map(|resource| resource.name.as_str()).collect();
    names.sort();
    assert_eq!(names, ["Data", "Params"]);

    // Two buffers, then the buffer-size table, and no unused slot in between
    let msl = reader.shaders(Backend::MetalMacos).unwrap();
    let msl = std::str::from_utf8(msl[0].code).unwrap();
    assert!(msl.contains("[[buffer(0)]]") && msl.contains("[[buffer(1)]]"), "{msl}");
    assert!(!msl.contains("[[buffer(3)]]"), "{msl}");
}

#[test]
fn test_one_signature_serves_every_backend() {
    let mut info = glsl_compute("Scale");
    info.desc.resource_signatures.push(ResourceSignatureDesc {
        name: "Shared".into(),
        binding_index: 0,
        resources: vec![
            PipelineResourceDesc::new("Params", ShaderStages::COMPUTE, ResourceType::ConstantBuffer, VariableType::Static),
            PipelineResourceDesc::new("Data", ShaderStages::COMPUTE, ResourceType::BufferUav, VariableType::Static),
        ],
        immutable_samplers: Vec::new(),
    });

    let mut archiver = archiver();
    let backends = BackendFlags::VULKAN | BackendFlags::GL | BackendFlags::METAL_MACOS;
    archiver.add_compute_pso(info, flags(backends)).unwrap();
    let reader = ArchiveReader::open(archiver.serialize_to_blob().unwrap()).unwrap();

    let signatures = reader.named_resources(ChunkKind::ResourceSignatures);
    assert_eq!(signatures.len(), 1);
    assert_eq!(signatures[0].name, "Shared");
    let signature = reader.signature("Shared").unwrap();
    let pipeline = reader.pipeline(ChunkKind::ComputePipelines, "Scale").unwrap();
    assert_eq!(pipeline.signatures, vec![0]);
    for backend in backends.backends() {
        assert!(signature.device[backend.index()].is_some(), "{backend}");
        assert!(pipeline.device[backend.index()].is_some(), "{backend}");
    }
}
