//! Default signature synthesis
//!
//! Pipelines without explicit signatures get one synthesized from the reflection of
//! their shaders: every reflected resource becomes a signature resource whose
//! variable type comes from the pipeline's resource layout.

use crate::desc::{PipelineResourceDesc, PipelineResourceLayoutDesc, ResourceSignatureDesc};
use crate::error::{ArchiverError, Result};
use crate::reflection::{ReflectedResource, ShaderReflection};
use std::collections::BTreeMap;

/// Name of the signature synthesized for a pipeline
pub fn default_signature_name(pso_name: &str) -> String {
    format!("Default Signature of PSO '{pso_name}'")
}

/// Builds the default signature of a pipeline from shader reflection
///
/// # Arguments
/// * `pso_name` - Name of the pipeline; the signature is named after it
/// * `reflections` - Reflection of every shader on every backend that contributes
/// * `layout` - Resource layout providing variable types and immutable samplers
///
/// # Returns
/// The signature, with resources ordered by variable type, then name
pub fn synthesize_default_signature<'a>(pso_name: &str, reflections: impl IntoIterator<Item = &'a ShaderReflection>, layout: &PipelineResourceLayoutDesc) -> Result<ResourceSignatureDesc> {
    let mut merged: BTreeMap<&str, ReflectedResource> = BTreeMap::new();
    for reflection in reflections {
        for resource in &reflection.resources {
            match merged.get_mut(resource.name.as_str()) {
                None => {
                    merged.insert(&resource.name, resource.clone());
                }
                Some(existing) => {
                    if existing.resource_type != resource.resource_type {
                        return Err(ArchiverError::ReflectionConflict {
                            resource: resource.name.clone(),
                            details: format!("declared as {} and as {} in the {} shader", existing.resource_type, resource.resource_type, reflection.stage),
                        });
                    }
                    if existing.array_size != resource.array_size {
                        return Err(ArchiverError::ReflectionConflict {
                            resource: resource.name.clone(),
                            details: format!("array size {} and {} in the {} shader", existing.array_size, resource.array_size, reflection.stage),
                        });
                    }
                    existing.stages |= resource.stages;
                }
            }
        }
    }

    let mut resources: Vec<PipelineResourceDesc> = merged
        .into_values()
        .map(|resource| PipelineResourceDesc {
            var_type: layout.variable_type(&resource.name, resource.stages),
            name: resource.name,
            shader_stages: resource.stages,
            array_size: resource.array_size,
            resource_type: resource.resource_type,
        })
        .collect();
    resources.sort_by(|a, b| (a.var_type, &a.name).cmp(&(b.var_type, &b.name)));

    Ok(ResourceSignatureDesc {
        name: default_signature_name(pso_name),
        binding_index: 0,
        resources,
        immutable_samplers: layout.immutable_samplers.clone(),
    })
}
