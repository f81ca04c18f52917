//! Checks caller-supplied signatures against shader reflection

use crate::desc::{ResourceSignatureDesc, ResourceType};
use crate::error::{ArchiverError, Result};
use crate::reflection::ShaderReflection;
use std::collections::HashMap;

/// Rejects pipelines whose signatures share a binding index
pub fn check_binding_indices(signatures: &[ResourceSignatureDesc]) -> Result<()> {
    let mut seen: HashMap<u8, &str> = HashMap::new();
    for signature in signatures {
        if let Some(other) = seen.insert(signature.binding_index, &signature.name) {
            return Err(ArchiverError::BindingMismatch {
                resource: signature.name.clone(),
                reason: format!("signatures '{other}' and '{}' both use binding index {}", signature.name, signature.binding_index),
            });
        }
    }
    Ok(())
}

/// Checks that every reflected resource is declared by exactly one signature
///
/// A resource matches a signature resource of the same name and type whose array
/// size is at least the reflected one and whose stages include the reflecting
/// stage. Samplers may also match an immutable sampler.
pub fn validate_signatures(signatures: &[ResourceSignatureDesc], reflection: &ShaderReflection) -> Result<()> {
    let stage = reflection.stage.flag();
    for resource in &reflection.resources {
        let mismatch = |reason: String| ArchiverError::BindingMismatch {
            resource: resource.name.clone(),
            reason,
        };

        let mut declared = Vec::new();
        for signature in signatures {
            declared.extend(signature.resources.iter().filter(|desc| desc.name == resource.name).map(|desc| (signature, Some(desc))));
            if resource.resource_type == ResourceType::Sampler {
                let attached = signature.resources.iter().any(|desc| desc.name == resource.name && desc.resource_type == ResourceType::Sampler);
                if !attached && signature.immutable_sampler_for(&resource.name, stage).is_some() {
                    declared.push((signature, None));
                }
            }
        }

        let (signature, desc) = match declared.as_slice() {
            [] => return Err(mismatch(format!("the {} shader uses it, but no signature declares it", reflection.stage))),
            [single] => *single,
            [(first, _), (second, _), ..] => return Err(mismatch(format!("declared by both '{}' and '{}'", first.name, second.name))),
        };
        let Some(desc) = desc else { continue };

        if desc.resource_type != resource.resource_type {
            return Err(mismatch(format!("signature '{}' declares a {}, the {} shader uses a {}", signature.name, desc.resource_type, reflection.stage, resource.resource_type)));
        }
        // Runtime-sized arrays fit any declaration
        if resource.array_size != 0 && resource.array_size > desc.array_size {
            return Err(mismatch(format!("signature '{}' declares {} elements, the {} shader uses {}", signature.name, desc.array_size, reflection.stage, resource.array_size)));
        }
        if !desc.shader_stages.contains(stage) {
            return Err(mismatch(format!("signature '{}' does not make it visible to the {} stage", signature.name, reflection.stage)));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::desc::{ImmutableSamplerDesc, PipelineResourceDesc, SamplerDesc, ShaderStage, ShaderStages, VariableType};
    use crate::reflection::ReflectedResource;

    fn reflection(resources: &[(&str, ResourceType, u32)]) -> ShaderReflection {
        let mut reflection = ShaderReflection::new(ShaderStage::Pixel, "main");
        reflection.resources = resources
            .iter()
            .map(|(name, resource_type, array_size)| ReflectedResource {
                name: (*name).into(),
                resource_type: *resource_type,
                set: 0,
                binding: 0,
                array_size: *array_size,
                stages: ShaderStages::PIXEL,
            })
            .collect();
        reflection
    }

    fn signature(name: &str, binding_index: u8, resources: Vec<PipelineResourceDesc>) -> ResourceSignatureDesc {
        ResourceSignatureDesc {
            name: name.into(),
            binding_index,
            resources,
            immutable_samplers: Vec::new(),
        }
    }

    fn texture(name: &str, stages: ShaderStages, array_size: u32) -> PipelineResourceDesc {
        PipelineResourceDesc {
            array_size,
            ..PipelineResourceDesc::new(name, stages, ResourceType::TextureSrv, VariableType::Static)
        }
    }

    #[test]
    fn test_matching_signature() {
        let signatures = [signature("A", 0, vec![texture("g_Texture", ShaderStages::PIXEL, 4)])];
        validate_signatures(&signatures, &reflection(&[("g_Texture", ResourceType::TextureSrv, 2)])).unwrap();
    }

    #[test]
    fn test_mismatches() {
        let signatures = [signature("A", 0, vec![texture("g_Texture", ShaderStages::VERTEX, 1)])];
        let cases = [
            ("g_Missing", ResourceType::TextureSrv, 1),
            ("g_Texture", ResourceType::BufferSrv, 1),
            ("g_Texture", ResourceType::TextureSrv, 1),
        ];
        for case in cases {
            let err = validate_signatures(&signatures, &reflection(&[case])).unwrap_err();
            assert!(matches!(err, ArchiverError::BindingMismatch { .. }), "{err}");
        }

        let signatures = [signature("A", 0, vec![texture("g_Texture", ShaderStages::PIXEL, 2)])];
        assert!(validate_signatures(&signatures, &reflection(&[("g_Texture", ResourceType::TextureSrv, 3)])).is_err());
    }

    #[test]
    fn test_resource_in_two_signatures() {
        let signatures = [signature("A", 0, vec![texture("g_Texture", ShaderStages::PIXEL, 1)]), signature("B", 1, vec![texture("g_Texture", ShaderStages::PIXEL, 1)])];
        assert!(validate_signatures(&signatures, &reflection(&[("g_Texture", ResourceType::TextureSrv, 1)])).is_err());
    }

    #[test]
    fn test_immutable_sampler_satisfies_sampler() {
        let mut desc = signature("A", 0, Vec::new());
        desc.immutable_samplers.push(ImmutableSamplerDesc {
            shader_stages: ShaderStages::PIXEL,
            sampler_or_texture_name: "g_Sampler".into(),
            desc: SamplerDesc::default(),
        });
        validate_signatures(&[desc], &reflection(&[("g_Sampler", ResourceType::Sampler, 1)])).unwrap();
    }

    #[test]
    fn test_duplicate_binding_index() {
        let signatures = [signature("A", 1, Vec::new()), signature("B", 1, Vec::new())];
        assert!(matches!(check_binding_indices(&signatures), Err(ArchiverError::BindingMismatch { .. })));
        check_binding_indices(&signatures[..1]).unwrap();
    }
}
