//! Shader reflection
//!
//! What a transcoder reports about a compiled shader: the resources it declares and,
//! for vertex shaders, its input attributes.

use crate::desc::{ResourceType, ShaderStage, ShaderStages};

/// A resource declared by a shader
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ReflectedResource {
    pub name: String,
    pub resource_type: ResourceType,
    /// Descriptor set, register space or placeholder group, depending on the backend
    pub set: u32,
    pub binding: u32,
    /// Number of array elements; 0 for runtime-sized arrays
    pub array_size: u32,
    pub stages: ShaderStages,
}

/// A vertex shader input attribute
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct VertexInput {
    pub name: String,
    /// HLSL semantic, when the compiler preserved it
    pub semantic: Option<String>,
    pub location: u32,
}

/// Reflection of one compiled shader
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ShaderReflection {
    pub stage: ShaderStage,
    pub entry_point: String,
    pub resources: Vec<ReflectedResource>,
    pub vertex_inputs: Vec<VertexInput>,
}

impl ShaderReflection {
    /// Creates an empty reflection
    pub fn new(stage: ShaderStage, entry_point: impl Into<String>) -> Self {
        Self {
            stage,
            entry_point: entry_point.into(),
            resources: Vec::new(),
            vertex_inputs: Vec::new(),
        }
    }

    /// Finds a resource by name
    pub fn resource(&self, name: &str) -> Option<&ReflectedResource> {
        self.resources.iter().find(|resource| resource.name == name)
    }
}

/// Parses an `ATTRIB<n>` semantic into its input location
///
/// The prefix is matched case-insensitively and the suffix must be a plain decimal
/// number.
pub fn parse_attrib_semantic(semantic: &str) -> Option<u32> {
    const PREFIX: &str = "ATTRIB";
    let prefix = semantic.get(..PREFIX.len())?;
    if !prefix.eq_ignore_ascii_case(PREFIX) {
        return None;
    }
    let digits = &semantic[PREFIX.len()..];
    if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    digits.parse().ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_attrib_semantic() {
        assert_eq!(parse_attrib_semantic("ATTRIB3"), Some(3));
        assert_eq!(parse_attrib_semantic("attrib12"), Some(12));
        assert_eq!(parse_attrib_semantic("AtTrIb0"), Some(0));
        assert_eq!(parse_attrib_semantic("ATTRIB"), None);
        assert_eq!(parse_attrib_semantic("ATTRIB-1"), None);
        assert_eq!(parse_attrib_semantic("ATTRIB 1"), None);
        assert_eq!(parse_attrib_semantic("POSITION"), None);
        assert_eq!(parse_attrib_semantic("TEXCOORD0"), None);
    }
}
