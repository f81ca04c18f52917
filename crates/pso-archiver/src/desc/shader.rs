//! Shader descriptions
//!
//! A shader is described by its stage, entry point and source. The source is either
//! inline text, inline SPIR-V words, or a file reference that the manifest loader
//! resolves before the description reaches the archiver.

use crate::serialized::{Serializable, Serializer};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Pipeline stage a shader runs in
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ShaderStage {
    Vertex,
    Pixel,
    Geometry,
    Hull,
    Domain,
    Compute,
    Amplification,
    Mesh,
    RayGen,
    RayMiss,
    RayClosestHit,
    RayAnyHit,
    RayIntersection,
    Callable,
    Tile,
}

impl ShaderStage {
    /// All stages in bit order
    pub const ALL: [ShaderStage; 15] = [
        ShaderStage::Vertex,
        ShaderStage::Pixel,
        ShaderStage::Geometry,
        ShaderStage::Hull,
        ShaderStage::Domain,
        ShaderStage::Compute,
        ShaderStage::Amplification,
        ShaderStage::Mesh,
        ShaderStage::RayGen,
        ShaderStage::RayMiss,
        ShaderStage::RayClosestHit,
        ShaderStage::RayAnyHit,
        ShaderStage::RayIntersection,
        ShaderStage::Callable,
        ShaderStage::Tile,
    ];

    /// The single-bit stage set for this stage
    pub const fn flag(self) -> ShaderStages {
        ShaderStages::from_bits_truncate(1 << self as u32)
    }

    /// Whether this stage belongs to a ray tracing pipeline
    pub const fn is_ray_tracing(self) -> bool {
        matches!(
            self,
            ShaderStage::RayGen | ShaderStage::RayMiss | ShaderStage::RayClosestHit | ShaderStage::RayAnyHit | ShaderStage::RayIntersection | ShaderStage::Callable
        )
    }
}

impl fmt::Display for ShaderStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ShaderStage::Vertex => "vertex",
            ShaderStage::Pixel => "pixel",
            ShaderStage::Geometry => "geometry",
            ShaderStage::Hull => "hull",
            ShaderStage::Domain => "domain",
            ShaderStage::Compute => "compute",
            ShaderStage::Amplification => "amplification",
            ShaderStage::Mesh => "mesh",
            ShaderStage::RayGen => "ray generation",
            ShaderStage::RayMiss => "ray miss",
            ShaderStage::RayClosestHit => "ray closest hit",
            ShaderStage::RayAnyHit => "ray any hit",
            ShaderStage::RayIntersection => "ray intersection",
            ShaderStage::Callable => "callable",
            ShaderStage::Tile => "tile",
        };
        f.write_str(name)
    }
}

impl Serializable for ShaderStage {
    fn serialize(&self, s: &mut Serializer) {
        s.write_u32(self.flag().bits());
    }
}

bitflags::bitflags! {
    /// Set of shader stages, used for resource visibility
    #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
    pub struct ShaderStages: u32 {
        const VERTEX = 1 << 0;
        const PIXEL = 1 << 1;
        const GEOMETRY = 1 << 2;
        const HULL = 1 << 3;
        const DOMAIN = 1 << 4;
        const COMPUTE = 1 << 5;
        const AMPLIFICATION = 1 << 6;
        const MESH = 1 << 7;
        const RAY_GEN = 1 << 8;
        const RAY_MISS = 1 << 9;
        const RAY_CLOSEST_HIT = 1 << 10;
        const RAY_ANY_HIT = 1 << 11;
        const RAY_INTERSECTION = 1 << 12;
        const CALLABLE = 1 << 13;
        const TILE = 1 << 14;
    }
}

impl ShaderStages {
    /// Iterates the individual stages in this set
    pub fn stages(self) -> impl Iterator<Item = ShaderStage> {
        ShaderStage::ALL.into_iter().filter(move |stage| self.contains(stage.flag()))
    }
}

impl From<ShaderStage> for ShaderStages {
    fn from(stage: ShaderStage) -> Self {
        stage.flag()
    }
}

impl Serializable for ShaderStages {
    fn serialize(&self, s: &mut Serializer) {
        s.write_u32(self.bits());
    }
}

/// Language of a shader source as handed to the archiver
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum InputLanguage {
    /// HLSL source
    Hlsl,
    /// GLSL source; the archiver may prepend a version directive and macro definitions
    Glsl,
    /// GLSL source used exactly as written
    GlslVerbatim,
    /// SPIR-V bytecode
    Spirv,
}

impl InputLanguage {
    /// Tag written into shader records
    pub const fn tag(self) -> u32 {
        match self {
            InputLanguage::Hlsl => 1,
            InputLanguage::Glsl => 2,
            InputLanguage::GlslVerbatim => 3,
            InputLanguage::Spirv => 4,
        }
    }
}

impl fmt::Display for InputLanguage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            InputLanguage::Hlsl => write!(f, "HLSL"),
            InputLanguage::Glsl => write!(f, "GLSL"),
            InputLanguage::GlslVerbatim => write!(f, "verbatim GLSL"),
            InputLanguage::Spirv => write!(f, "SPIR-V"),
        }
    }
}

/// Source of a shader
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ShaderSource {
    Hlsl(String),
    Glsl(String),
    GlslVerbatim(String),
    Spirv(Vec<u32>),
    /// A file to be loaded by the manifest reader, relative to the manifest
    File { language: InputLanguage, path: String },
}

impl ShaderSource {
    /// The input language of this source
    pub fn language(&self) -> InputLanguage {
        match self {
            ShaderSource::Hlsl(_) => InputLanguage::Hlsl,
            ShaderSource::Glsl(_) => InputLanguage::Glsl,
            ShaderSource::GlslVerbatim(_) => InputLanguage::GlslVerbatim,
            ShaderSource::Spirv(_) => InputLanguage::Spirv,
            ShaderSource::File { language, .. } => *language,
        }
    }

    /// The source text, if this is an inline text source
    pub fn text(&self) -> Option<&str> {
        match self {
            ShaderSource::Hlsl(text) | ShaderSource::Glsl(text) | ShaderSource::GlslVerbatim(text) => Some(text),
            _ => None,
        }
    }

    /// Whether this is an unresolved file reference
    pub fn is_file(&self) -> bool {
        matches!(self, ShaderSource::File { .. })
    }

    /// Resolves a file reference into an inline source
    ///
    /// # Arguments
    /// * `load_file` - Callback returning the contents of a file given its path
    ///
    /// # Returns
    /// The inline source; inline sources are returned unchanged
    pub fn resolve<F>(self, mut load_file: F) -> std::io::Result<Self>
    where
        F: FnMut(&str) -> std::io::Result<Vec<u8>>,
    {
        let (language, path) = match self {
            ShaderSource::File { language, path } => (language, path),
            inline => return Ok(inline),
        };

        let bytes = load_file(&path)?;
        let invalid_data = |message: String| std::io::Error::new(std::io::ErrorKind::InvalidData, message);
        Ok(match language {
            InputLanguage::Spirv => {
                if bytes.len() % 4 != 0 {
                    return Err(invalid_data(format!("SPIR-V file '{path}' is not a whole number of words")));
                }
                ShaderSource::Spirv(bytes.chunks_exact(4).map(|word| u32::from_le_bytes([word[0], word[1], word[2], word[3]])).collect())
            }
            text_language => {
                let text = String::from_utf8(bytes).map_err(|e| invalid_data(format!("shader file '{path}' is not valid UTF-8: {e}")))?;
                match text_language {
                    InputLanguage::Hlsl => ShaderSource::Hlsl(text),
                    InputLanguage::Glsl => ShaderSource::Glsl(text),
                    _ => ShaderSource::GlslVerbatim(text),
                }
            }
        })
    }
}

impl Serializable for ShaderSource {
    fn serialize(&self, s: &mut Serializer) {
        s.write_u32(self.language().tag());
        match self {
            ShaderSource::Hlsl(text) | ShaderSource::Glsl(text) | ShaderSource::GlslVerbatim(text) => s.write_str(text),
            ShaderSource::Spirv(words) => s.write_words(words),
            ShaderSource::File { path, .. } => s.write_str(path),
        }
    }
}

/// Preprocessor definition passed to the shader compiler
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct ShaderMacro {
    pub name: String,
    #[serde(default)]
    pub definition: String,
}

impl Serializable for ShaderMacro {
    fn serialize(&self, s: &mut Serializer) {
        s.write_str(&self.name);
        s.write_str(&self.definition);
    }
}

fn default_entry_point() -> String {
    "main".to_string()
}

/// Description of one shader of a pipeline
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct ShaderCreateInfo {
    /// Debug name
    pub name: String,
    pub stage: ShaderStage,
    #[serde(default = "default_entry_point")]
    pub entry_point: String,
    pub source: ShaderSource,
    #[serde(default)]
    pub macros: Vec<ShaderMacro>,
}

impl ShaderCreateInfo {
    /// Creates a shader description with the default `main` entry point
    pub fn new(name: impl Into<String>, stage: ShaderStage, source: ShaderSource) -> Self {
        Self {
            name: name.into(),
            stage,
            entry_point: default_entry_point(),
            source,
            macros: Vec::new(),
        }
    }
}

/// The name is a debugging label and does not take part in the encoding, so two
/// shaders that only differ by name compile once.
impl Serializable for ShaderCreateInfo {
    fn serialize(&self, s: &mut Serializer) {
        s.write(&self.stage);
        s.write_str(&self.entry_point);
        s.write(&self.source);
        s.write_slice(&self.macros);
    }
}
