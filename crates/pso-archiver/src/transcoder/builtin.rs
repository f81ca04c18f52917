//! Built-in transcoders
//!
//! SPIR-V is passed through to Vulkan unchanged. GLSL is parsed and validated with
//! naga, then emitted as SPIR-V for Vulkan, as GLSL for OpenGL and OpenGL ES, or as MSL
//! for Metal.

use super::{TranscodeRequest, TranscodedShader, Transcoder};
use crate::backend::Backend;
use crate::desc::{InputLanguage, ResourceType, ShaderCreateInfo, ShaderSource, ShaderStage};
use crate::error::TranscoderError;
use crate::reflection::{ReflectedResource, ShaderReflection, VertexInput};
use crate::spirv::{SpirvModule, words_to_bytes};
use bytes::Bytes;
use naga::back::{msl, spv};
use naga::front::glsl;
use naga::valid::{Capabilities, ModuleInfo, ValidationFlags, Validator};
use naga::{AddressSpace, ArraySize, Binding, ImageClass, Module, StorageAccess, TypeInner};

/// Placeholder group of Metal buffers in the reflection of MSL shaders
pub(crate) const MSL_BUFFER_GROUP: u32 = 0;
/// Placeholder group of Metal textures in the reflection of MSL shaders
pub(crate) const MSL_TEXTURE_GROUP: u32 = 1;
/// Placeholder group of Metal samplers in the reflection of MSL shaders
pub(crate) const MSL_SAMPLER_GROUP: u32 = 2;

/// Passes SPIR-V bytecode through to Vulkan
#[derive(Debug, Clone, Copy, Default)]
pub struct SpirvPassthrough;

impl Transcoder for SpirvPassthrough {
    fn compile(&self, request: &TranscodeRequest<'_>) -> Result<TranscodedShader, TranscoderError> {
        let ShaderSource::Spirv(words) = &request.shader.source else {
            return Err(TranscoderError::new(format!("expected SPIR-V bytecode, got {}", request.shader.source.language())));
        };
        let module = SpirvModule::parse(words.clone()).map_err(|e| TranscoderError::new(e.to_string()))?;
        let entry_point = &request.shader.entry_point;
        if !module.entry_points().is_empty() && !module.entry_points().iter().any(|ep| &ep.name == entry_point) {
            return Err(TranscoderError::new(format!("SPIR-V module has no entry point named '{entry_point}'")));
        }

        let reflection = module.reflect(request.shader.stage, entry_point);
        Ok(TranscodedShader {
            code: Bytes::from(module.to_bytes()),
            entry_point: entry_point.clone(),
            reflection: Some(reflection),
        })
    }

    fn reflect(&self, native: &[u8], stage: ShaderStage) -> Result<ShaderReflection, TranscoderError> {
        let module = SpirvModule::from_bytes(native).map_err(|e| TranscoderError::new(e.to_string()))?;
        let entry_point = module.entry_points().first().map_or_else(|| "main".to_string(), |ep| ep.name.clone());
        Ok(module.reflect(stage, &entry_point))
    }
}

/// Compiles GLSL to SPIR-V with naga
#[derive(Debug, Clone, Copy, Default)]
pub struct GlslToSpirv;

impl Transcoder for GlslToSpirv {
    fn compile(&self, request: &TranscodeRequest<'_>) -> Result<TranscodedShader, TranscoderError> {
        let shader = request.shader;
        let stage = naga_stage(shader.stage)?;
        let (module, info) = parse_glsl(shader, &glsl_text(shader)?)?;

        let mut options = spv::Options::default();
        options.flags |= spv::WriterFlags::DEBUG;
        options.flags.remove(spv::WriterFlags::ADJUST_COORDINATE_SPACE);
        let pipeline_options = spv::PipelineOptions {
            shader_stage: stage,
            entry_point: module.entry_points.first().map_or_else(|| shader.entry_point.clone(), |ep| ep.name.clone()),
        };
        let words = spv::write_vec(&module, &info, &options, Some(&pipeline_options)).map_err(|e| TranscoderError::new(format!("SPIR-V generation failed: {e}")))?;

        let reflection = SpirvModule::parse(words.clone()).map_err(|e| TranscoderError::new(e.to_string()))?.reflect(shader.stage, &shader.entry_point);
        Ok(TranscodedShader {
            code: Bytes::from(words_to_bytes(&words)),
            entry_point: shader.entry_point.clone(),
            reflection: Some(reflection),
        })
    }

    fn reflect(&self, native: &[u8], stage: ShaderStage) -> Result<ShaderReflection, TranscoderError> {
        SpirvPassthrough.reflect(native, stage)
    }
}

/// Produces final OpenGL / OpenGL ES source from GLSL
///
/// Non-verbatim sources get a version directive for the configured GL or GLES version,
/// a default precision preamble on GLES, and the shader macros as `#define`s. The
/// source is validated with naga before it is accepted.
#[derive(Debug, Clone, Copy, Default)]
pub struct GlslToGlsl;

impl Transcoder for GlslToGlsl {
    fn compile(&self, request: &TranscodeRequest<'_>) -> Result<TranscodedShader, TranscoderError> {
        let shader = request.shader;
        let text = glsl_text(shader)?;
        let (module, _) = parse_glsl(shader, &text)?;

        let native = if shader.source.language() == InputLanguage::GlslVerbatim {
            text.to_string()
        } else {
            let mut native = match request.backend {
                Backend::Gles => format!("#version {} es\nprecision highp float;\nprecision highp int;\n", request.config.gles_version),
                _ => format!("#version {}\n", request.config.gl_version),
            };
            for shader_macro in &shader.macros {
                native.push_str(&format!("#define {} {}\n", shader_macro.name, shader_macro.definition));
            }
            native.push_str(strip_version_directive(text));
            native
        };

        Ok(TranscodedShader {
            code: Bytes::from(native),
            entry_point: shader.entry_point.clone(),
            reflection: Some(reflect_module(&module, shader.stage, &shader.entry_point, |_, binding| binding)),
        })
    }

    fn reflect(&self, native: &[u8], stage: ShaderStage) -> Result<ShaderReflection, TranscoderError> {
        let text = std::str::from_utf8(native).map_err(|e| TranscoderError::new(format!("GLSL is not valid UTF-8: {e}")))?;
        let shader = ShaderCreateInfo::new("", stage, ShaderSource::GlslVerbatim(text.to_string()));
        let (module, _) = parse_glsl(&shader, text)?;
        Ok(reflect_module(&module, stage, "main", |_, binding| binding))
    }
}

/// Compiles GLSL to MSL with naga
///
/// Resources are emitted with placeholder indices, one sequence per buffer, texture
/// and sampler group, and reflected with those placeholders so the Metal patcher can
/// rewrite them to the final layout.
#[derive(Debug, Clone, Copy, Default)]
pub struct GlslToMsl;

impl Transcoder for GlslToMsl {
    fn compile(&self, request: &TranscodeRequest<'_>) -> Result<TranscodedShader, TranscoderError> {
        let shader = request.shader;
        naga_stage(shader.stage)?;
        let (module, info) = parse_glsl(shader, &glsl_text(shader)?)?;

        let placeholders = msl_placeholders(&module)?;
        let buffer_count = placeholders.values().filter(|(group, _)| *group == MSL_BUFFER_GROUP).count();
        let mut resources = msl::EntryPointResources {
            sizes_buffer: u8::try_from(buffer_count).ok(),
            ..Default::default()
        };
        for (binding, (group, slot)) in &placeholders {
            let slot = Some(*slot);
            let target = match *group {
                MSL_BUFFER_GROUP => msl::BindTarget { buffer: slot, ..Default::default() },
                MSL_TEXTURE_GROUP => msl::BindTarget { texture: slot, ..Default::default() },
                _ => msl::BindTarget {
                    sampler: slot.map(msl::BindSamplerTarget::Resource),
                    ..Default::default()
                },
            };
            resources.resources.insert(binding.clone(), target);
        }

        let mut options = msl::Options {
            lang_version: (request.config.msl_version[0], request.config.msl_version[1]),
            fake_missing_bindings: true,
            ..Default::default()
        };
        for entry_point in &module.entry_points {
            options.per_entry_point_map.insert(entry_point.name.clone(), resources.clone());
        }

        let (source, translation) = msl::write_string(&module, &info, &options, &msl::PipelineOptions::default()).map_err(|e| TranscoderError::new(format!("MSL generation failed: {e}")))?;
        let entry_point = translation.entry_point_names.iter().find_map(|name| name.as_ref().ok()).cloned().unwrap_or_else(|| shader.entry_point.clone());

        let reflection = reflect_module(&module, shader.stage, &entry_point, |handle_binding, binding| {
            placeholders.get(handle_binding).map_or(binding, |&(group, slot)| (group, slot as u32))
        });
        Ok(TranscodedShader {
            code: Bytes::from(source),
            entry_point,
            reflection: Some(reflection),
        })
    }

    fn reflect(&self, _native: &[u8], stage: ShaderStage) -> Result<ShaderReflection, TranscoderError> {
        Err(TranscoderError::new(format!("MSL {stage} shaders cannot be reflected after compilation")))
    }
}

fn naga_stage(stage: ShaderStage) -> Result<naga::ShaderStage, TranscoderError> {
    match stage {
        ShaderStage::Vertex => Ok(naga::ShaderStage::Vertex),
        ShaderStage::Pixel => Ok(naga::ShaderStage::Fragment),
        ShaderStage::Compute => Ok(naga::ShaderStage::Compute),
        other => Err(TranscoderError::new(format!("GLSL {other} shaders are not supported by the built-in compiler"))),
    }
}

fn glsl_text(shader: &ShaderCreateInfo) -> Result<&str, TranscoderError> {
    match &shader.source {
        ShaderSource::Glsl(text) | ShaderSource::GlslVerbatim(text) => Ok(text),
        other => Err(TranscoderError::new(format!("expected GLSL source, got {}", other.language()))),
    }
}

/// Removes a leading `#version` line, if any
fn strip_version_directive(text: &str) -> &str {
    let trimmed = text.trim_start();
    if trimmed.starts_with("#version") {
        trimmed.split_once('\n').map_or("", |(_, rest)| rest)
    } else {
        text
    }
}

/// Parses and validates GLSL
///
/// Macros are passed as preprocessor definitions unless the source is verbatim.
fn parse_glsl(shader: &ShaderCreateInfo, text: &str) -> Result<(Module, ModuleInfo), TranscoderError> {
    let mut options = glsl::Options::from(naga_stage(shader.stage)?);
    if shader.source.language() != InputLanguage::GlslVerbatim {
        for shader_macro in &shader.macros {
            options.defines.insert(shader_macro.name.clone(), shader_macro.definition.clone());
        }
    }

    let module = glsl::Frontend::default().parse(&options, text).map_err(|e| TranscoderError::new(e.emit_to_string(text)))?;
    let info = Validator::new(ValidationFlags::all(), Capabilities::all())
        .validate(&module)
        .map_err(|e| TranscoderError::new(e.emit_to_string(text)))?;
    Ok((module, info))
}

fn array_len(size: &ArraySize) -> u32 {
    match size {
        ArraySize::Constant(count) => count.get(),
        _ => 0,
    }
}

fn resource_type(space: AddressSpace, inner: &TypeInner) -> Option<ResourceType> {
    match (space, inner) {
        (AddressSpace::Uniform, _) => Some(ResourceType::ConstantBuffer),
        (AddressSpace::Storage { access }, _) if access.contains(StorageAccess::STORE) => Some(ResourceType::BufferUav),
        (AddressSpace::Storage { .. }, _) => Some(ResourceType::BufferSrv),
        (AddressSpace::Handle, TypeInner::Image { class: ImageClass::Storage { .. }, .. }) => Some(ResourceType::TextureUav),
        (AddressSpace::Handle, TypeInner::Image { .. }) => Some(ResourceType::TextureSrv),
        (AddressSpace::Handle, TypeInner::Sampler { .. }) => Some(ResourceType::Sampler),
        (AddressSpace::Handle, TypeInner::AccelerationStructure { .. }) => Some(ResourceType::AccelStruct),
        _ => None,
    }
}

/// Assigns MSL placeholder slots to every bound global, grouped by resource kind
fn msl_placeholders(module: &Module) -> Result<std::collections::BTreeMap<naga::ResourceBinding, (u32, u8)>, TranscoderError> {
    let mut bindings: Vec<(naga::ResourceBinding, u32)> = Vec::new();
    for (_, variable) in module.global_variables.iter() {
        let Some(binding) = &variable.binding else { continue };
        let base = match &module.types[variable.ty].inner {
            TypeInner::BindingArray { base, .. } => *base,
            _ => variable.ty,
        };
        let Some(resource_type) = resource_type(variable.space, &module.types[base].inner) else { continue };
        let group = match resource_type {
            ResourceType::ConstantBuffer | ResourceType::BufferSrv | ResourceType::BufferUav | ResourceType::AccelStruct => MSL_BUFFER_GROUP,
            ResourceType::Sampler => MSL_SAMPLER_GROUP,
            _ => MSL_TEXTURE_GROUP,
        };
        bindings.push((binding.clone(), group));
    }
    bindings.sort_by_key(|(binding, group)| (*group, binding.group, binding.binding));

    let mut next = [0u32; 3];
    let mut placeholders = std::collections::BTreeMap::new();
    for (binding, group) in bindings {
        let slot = u8::try_from(next[group as usize]).map_err(|_| TranscoderError::new("too many resources for Metal placeholder slots"))?;
        next[group as usize] += 1;
        placeholders.insert(binding, (group, slot));
    }
    Ok(placeholders)
}

/// Reflects a naga module
///
/// Blocks are named after their block type, other resources after their variable.
///
/// # Arguments
/// * `binding_of` - Maps a resource's naga binding to the `(set, binding)` to report
fn reflect_module<F>(module: &Module, stage: ShaderStage, entry_point: &str, binding_of: F) -> ShaderReflection
where
    F: Fn(&naga::ResourceBinding, (u32, u32)) -> (u32, u32),
{
    let mut reflection = ShaderReflection::new(stage, entry_point);
    for (handle, variable) in module.global_variables.iter() {
        let Some(binding) = &variable.binding else { continue };
        let (base, array_size) = match &module.types[variable.ty].inner {
            TypeInner::BindingArray { base, size } => (*base, array_len(size)),
            _ => (variable.ty, 1),
        };
        let base_type = &module.types[base];
        let Some(resource_type) = resource_type(variable.space, &base_type.inner) else { continue };

        let is_block = matches!(base_type.inner, TypeInner::Struct { .. }) && matches!(variable.space, AddressSpace::Uniform | AddressSpace::Storage { .. });
        let name = match (is_block, &base_type.name, &variable.name) {
            (true, Some(type_name), _) => type_name.clone(),
            (_, _, Some(variable_name)) => variable_name.clone(),
            (_, Some(type_name), None) => type_name.clone(),
            _ => format!("_{}", handle.index()),
        };

        let (set, binding) = binding_of(binding, (binding.group, binding.binding));
        reflection.resources.push(ReflectedResource {
            name,
            resource_type,
            set,
            binding,
            array_size,
            stages: stage.flag(),
        });
    }
    reflection.resources.sort_by(|a, b| (a.set, a.binding, &a.name).cmp(&(b.set, b.binding, &b.name)));

    if stage == ShaderStage::Vertex {
        if let Some(ep) = module.entry_points.iter().find(|ep| ep.stage == naga::ShaderStage::Vertex) {
            for (index, argument) in ep.function.arguments.iter().enumerate() {
                match &argument.binding {
                    Some(Binding::Location { location, .. }) => reflection.vertex_inputs.push(VertexInput {
                        name: argument.name.clone().unwrap_or_else(|| format!("_{index}")),
                        semantic: None,
                        location: *location,
                    }),
                    Some(Binding::BuiltIn(_)) => {}
                    None => {
                        if let TypeInner::Struct { members, .. } = &module.types[argument.ty].inner {
                            for (member_index, member) in members.iter().enumerate() {
                                if let Some(Binding::Location { location, .. }) = &member.binding {
                                    reflection.vertex_inputs.push(VertexInput {
                                        name: member.name.clone().unwrap_or_else(|| format!("_{index}_{member_index}")),
                                        semantic: None,
                                        location: *location,
                                    });
                                }
                            }
                        }
                    }
                }
            }
            reflection.vertex_inputs.sort_by_key(|input| input.location);
        }
    }
    reflection
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ArchiverConfig;
    use crate::desc::ShaderMacro;

    const COMPUTE: &str = "#version 450
layout(local_size_x = 64) in;
layout(set = 0, binding = 0) uniform Params { uint count; } params;
layout(set = 0, binding = 1) buffer Data { float values[]; } data;
void main() {
    uint i = gl_GlobalInvocationID.x;
    if (i < params.count) {
        data.values[i] = data.values[i] * SCALE;
    }
}
";

    fn compute_shader() -> ShaderCreateInfo {
        let mut shader = ShaderCreateInfo::new("CS", ShaderStage::Compute, ShaderSource::Glsl(COMPUTE.into()));
        shader.macros.push(ShaderMacro { name: "SCALE".into(), definition: "2.0".into() });
        shader
    }

    fn request<'a>(backend: Backend, shader: &'a ShaderCreateInfo, config: &'a ArchiverConfig) -> TranscodeRequest<'a> {
        TranscodeRequest { backend, shader, config }
    }

    #[test]
    fn test_glsl_to_spirv_reflects_resources() {
        let shader = compute_shader();
        let config = ArchiverConfig::default();
        let out = GlslToSpirv.compile(&request(Backend::Vulkan, &shader, &config)).unwrap();
        assert_eq!(&out.code[..4], &crate::spirv::SPIRV_MAGIC.to_le_bytes());

        let reflection = out.reflection.unwrap();
        assert_eq!(reflection.resources.len(), 2, "{reflection:?}");
        assert_eq!(reflection.resource("Params").unwrap().resource_type, ResourceType::ConstantBuffer, "{reflection:?}");
        assert_eq!(reflection.resource("Data").unwrap().resource_type, ResourceType::BufferUav, "{reflection:?}");
    }

    #[test]
    fn test_backends_agree_on_resource_names() {
        let shader = compute_shader();
        let config = ArchiverConfig::default();
        let names = |transcoder: &dyn Transcoder, backend: Backend| {
            let reflection = transcoder.compile(&request(backend, &shader, &config)).unwrap().reflection.unwrap();
            let mut names: Vec<(String, ResourceType)> = reflection.resources.into_iter().map(|r| (r.name, r.resource_type)).collect();
            names.sort();
            names
        };
        let vulkan = names(&GlslToSpirv, Backend::Vulkan);
        assert_eq!(vulkan, vec![("Data".to_string(), ResourceType::BufferUav), ("Params".to_string(), ResourceType::ConstantBuffer)]);
        assert_eq!(names(&GlslToGlsl, Backend::Gl), vulkan);
        assert_eq!(names(&GlslToMsl, Backend::MetalMacos), vulkan);
    }

    #[test]
    fn test_glsl_to_glsl_adds_version_and_defines() {
        let shader = compute_shader();
        let config = ArchiverConfig::default();
        let out = GlslToGlsl.compile(&request(Backend::Gles, &shader, &config)).unwrap();
        let text = std::str::from_utf8(&out.code).unwrap();
        assert!(text.starts_with("#version 310 es\n"), "{text}");
        assert!(text.contains("#define SCALE 2.0"));
        assert_eq!(text.matches("#version").count(), 1);

        let reflection = out.reflection.unwrap();
        let params = reflection.resource("Params").unwrap();
        assert_eq!(params.resource_type, ResourceType::ConstantBuffer);
        assert_eq!(reflection.resource("Data").unwrap().binding, 1);
    }

    #[test]
    fn test_glsl_to_msl_uses_placeholders() {
        let shader = compute_shader();
        let config = ArchiverConfig::default();
        let out = GlslToMsl.compile(&request(Backend::MetalMacos, &shader, &config)).unwrap();
        let reflection = out.reflection.unwrap();
        assert_eq!(reflection.resource("Params").unwrap().set, MSL_BUFFER_GROUP);
        assert_eq!(reflection.resource("Params").unwrap().binding, 0);
        assert_eq!(reflection.resource("Data").unwrap().binding, 1);
        let text = std::str::from_utf8(&out.code).unwrap();
        assert!(text.contains("[[buffer(0)]]"), "{text}");
        assert!(text.contains("[[buffer(1)]]"), "{text}");
    }

    #[test]
    fn test_syntax_errors_are_reported() {
        let shader = ShaderCreateInfo::new("CS", ShaderStage::Compute, ShaderSource::Glsl("#version 450\nvoid main() { undefined_call(); }\n".into()));
        let config = ArchiverConfig::default();
        assert!(GlslToSpirv.compile(&request(Backend::Vulkan, &shader, &config)).is_err());
    }

    #[test]
    fn test_unsupported_stage() {
        let shader = ShaderCreateInfo::new("GS", ShaderStage::Geometry, ShaderSource::Glsl(String::new()));
        let config = ArchiverConfig::default();
        assert!(GlslToSpirv.compile(&request(Backend::Vulkan, &shader, &config)).is_err());
    }

    #[test]
    fn test_strip_version_directive() {
        assert_eq!(strip_version_directive("#version 450\nvoid main() {}"), "void main() {}");
        assert_eq!(strip_version_directive("void main() {}"), "void main() {}");
    }
}
