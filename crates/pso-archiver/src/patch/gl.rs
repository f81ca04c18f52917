//! OpenGL and OpenGL ES: writes `layout(binding = N)` into the GLSL source

use super::{BackendPatcher, resolve_bindings};
use crate::backend::Backend;
use crate::error::{ArchiverError, Result};
use crate::serialized::{SerializedBlob, Serializer};
use crate::signature::{GlBindingRange, PipelineLayout};
use crate::transcoder::CompiledShader;
use bytes::Bytes;
use regex::{Captures, Regex};
use std::collections::HashMap;

/// A uniform or buffer declaration up to the opening brace of a block or the end of the statement
const DECLARATION_PATTERN: &str = r"(?m)^[ \t]*(?:layout\s*\((?<qualifiers>[^)]*)\)\s*)?(?<head>(?:\w+\s+)*?(?:uniform|buffer)\b[^;{]*?)(?<gap>\s*)(?<end>[{;])";

#[derive(Debug, Clone, Copy)]
pub struct GlPatcher {
    pub backend: Backend,
}

impl BackendPatcher for GlPatcher {
    fn backend(&self) -> Backend {
        self.backend
    }

    fn patch_shader(&self, shader: &CompiledShader, layout: &PipelineLayout) -> Result<Bytes> {
        let units: HashMap<&str, u32> = resolve_bindings(self.backend, layout, shader)?
            .into_iter()
            .filter(|(resource, _)| GlBindingRange::of(resource.resource_type).is_some())
            .map(|(resource, binding)| (resource.name.as_str(), binding.binding))
            .collect();

        let source = std::str::from_utf8(&shader.code).map_err(|e| ArchiverError::patching(self.backend, format!("GLSL is not valid UTF-8: {e}")))?;
        let patched = assign_bindings(source, &units).map_err(|e| ArchiverError::patching(self.backend, e.to_string()))?;
        Ok(Bytes::from(patched))
    }

    /// Program bindings: for every resource its name, binding range and unit
    fn device_header(&self, layout: &PipelineLayout, _shaders: &[CompiledShader]) -> Result<SerializedBlob> {
        let bindings: Vec<_> = layout.bindings().filter_map(|binding| GlBindingRange::of(binding.resource_type).map(|range| (binding, range))).collect();
        let mut s = Serializer::new();
        s.write_len(bindings.len());
        for (binding, range) in bindings {
            s.write_str(&binding.name);
            s.write_u32(range as u32);
            s.write_u32(binding.binding);
            s.write_u32(binding.array_size);
        }
        Ok(s.finish())
    }
}

/// Rewrites the layout qualifiers of every declaration whose name has a unit
///
/// `set` and `binding` qualifiers are removed and `binding = N` is appended. Block
/// declarations are matched by block name, others by variable name. Declarations of
/// unknown names are left unchanged.
fn assign_bindings(source: &str, units: &HashMap<&str, u32>) -> std::result::Result<String, regex::Error> {
    let declaration = Regex::new(DECLARATION_PATTERN)?;
    let array_suffix = Regex::new(r"\s*\[[^\]]*\]")?;

    let patched = declaration.replace_all(source, |caps: &Captures<'_>| {
        let whole = &caps[0];
        let head = array_suffix.replace_all(&caps["head"], "");
        let Some(name) = head.split_whitespace().last() else {
            return whole.to_string();
        };
        let Some(unit) = units.get(name) else {
            return whole.to_string();
        };

        let mut qualifiers: Vec<&str> = caps
            .name("qualifiers")
            .map_or("", |m| m.as_str())
            .split(',')
            .map(str::trim)
            .filter(|qualifier| !qualifier.is_empty())
            .filter(|qualifier| {
                let key = qualifier.split('=').next().unwrap_or_default().trim();
                key != "set" && key != "binding"
            })
            .collect();
        let binding = format!("binding = {unit}");
        qualifiers.push(&binding);

        let indent = &whole[..whole.len() - whole.trim_start().len()];
        format!("{indent}layout({}) {}{}{}", qualifiers.join(", "), &caps["head"], &caps["gap"], &caps["end"])
    });
    Ok(patched.into_owned())
}
