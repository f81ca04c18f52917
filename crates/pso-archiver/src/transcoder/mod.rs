//! Shader transcoder registry
//!
//! A transcoder turns a shader description into the native code of one backend and
//! reports its reflection. The registry routes each `(backend, input language)` pair
//! to the transcoder registered for it, serializes transcoders that cannot run
//! concurrently, and applies the fix-ups every Vulkan HLSL vertex shader needs.

mod builtin;

pub use builtin::{GlslToGlsl, GlslToMsl, GlslToSpirv, SpirvPassthrough};

use crate::backend::Backend;
use crate::config::ArchiverConfig;
use crate::desc::{InputLanguage, ShaderCreateInfo, ShaderStage};
use crate::error::{ArchiverError, Result, TranscoderError};
use crate::reflection::{ShaderReflection, parse_attrib_semantic};
use crate::spirv::SpirvModule;
use bytes::Bytes;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;

/// Serializes every transcoder that declared itself non-reentrant
static NON_REENTRANT_TRANSCODERS: Mutex<()> = parking_lot::const_mutex(());

/// Whether a backend accepts shaders in an input language
///
/// Vulkan takes every language, Direct3D only HLSL, and GL and Metal take HLSL or
/// GLSL.
pub fn accepts(backend: Backend, language: InputLanguage) -> bool {
    match backend {
        Backend::Vulkan => true,
        Backend::D3D11 | Backend::D3D12 => language == InputLanguage::Hlsl,
        Backend::Gl | Backend::Gles | Backend::MetalMacos | Backend::MetalIos => language != InputLanguage::Spirv,
    }
}

/// Capability bits declared by a transcoder
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TranscoderCaps {
    /// The transcoder may run on several threads at once
    pub reentrant: bool,
    /// SPIR-V produced from HLSL has been legalized
    pub legalizes_spirv: bool,
}

impl Default for TranscoderCaps {
    fn default() -> Self {
        Self { reentrant: true, legalizes_spirv: false }
    }
}

/// What to compile, and for which backend
#[derive(Debug, Clone, Copy)]
pub struct TranscodeRequest<'a> {
    pub backend: Backend,
    pub shader: &'a ShaderCreateInfo,
    pub config: &'a ArchiverConfig,
}

/// Output of a transcoder
#[derive(Debug, Clone)]
pub struct TranscodedShader {
    /// Native code: SPIR-V words, DXBC/DXIL container, GLSL or MSL text
    pub code: Bytes,
    /// Entry point name in the native code
    pub entry_point: String,
    /// Reflection, if the compiler produced it alongside the code
    pub reflection: Option<ShaderReflection>,
}

/// A backend shader compiler
pub trait Transcoder: Send + Sync {
    /// Capability bits of this transcoder
    fn caps(&self) -> TranscoderCaps {
        TranscoderCaps::default()
    }

    /// Compiles a shader into native code
    fn compile(&self, request: &TranscodeRequest<'_>) -> std::result::Result<TranscodedShader, TranscoderError>;

    /// Reflects previously compiled native code
    fn reflect(&self, native: &[u8], stage: ShaderStage) -> std::result::Result<ShaderReflection, TranscoderError>;
}

/// A shader compiled for one backend, with its reflection
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompiledShader {
    pub backend: Backend,
    pub language: InputLanguage,
    pub code: Bytes,
    pub entry_point: String,
    pub reflection: ShaderReflection,
}

struct Registration {
    transcoder: Arc<dyn Transcoder>,
    caps: TranscoderCaps,
}

/// Routes shaders to transcoders by backend and input language
#[derive(Default)]
pub struct TranscoderRegistry {
    routes: HashMap<(Backend, InputLanguage), Registration>,
}

impl std::fmt::Debug for TranscoderRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut routes: Vec<_> = self.routes.keys().collect();
        routes.sort();
        f.debug_struct("TranscoderRegistry").field("routes", &routes).finish()
    }
}

impl TranscoderRegistry {
    /// Creates a registry without any transcoders
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a registry with the built-in transcoders
    ///
    /// SPIR-V passes through to Vulkan, and GLSL is compiled with naga for Vulkan,
    /// OpenGL, OpenGL ES and both Metal backends. HLSL and Direct3D compilers have to
    /// be registered by the caller.
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        registry.insert(Backend::Vulkan, InputLanguage::Spirv, Arc::new(SpirvPassthrough));
        for language in [InputLanguage::Glsl, InputLanguage::GlslVerbatim] {
            registry.insert(Backend::Vulkan, language, Arc::new(GlslToSpirv));
            registry.insert(Backend::Gl, language, Arc::new(GlslToGlsl));
            registry.insert(Backend::Gles, language, Arc::new(GlslToGlsl));
            registry.insert(Backend::MetalMacos, language, Arc::new(GlslToMsl));
            registry.insert(Backend::MetalIos, language, Arc::new(GlslToMsl));
        }
        registry
    }

    /// Registers a transcoder, replacing any previous one for the same route
    ///
    /// Fails with `UnsupportedInput` for routes the backend does not accept, see
    /// [`accepts`].
    pub fn register(&mut self, backend: Backend, language: InputLanguage, transcoder: impl Transcoder + 'static) -> Result<&mut Self> {
        self.register_shared(backend, language, Arc::new(transcoder))
    }

    /// Registers a transcoder shared between several routes
    pub fn register_shared(&mut self, backend: Backend, language: InputLanguage, transcoder: Arc<dyn Transcoder>) -> Result<&mut Self> {
        if !accepts(backend, language) {
            return Err(ArchiverError::UnsupportedInput { backend, language });
        }
        self.insert(backend, language, transcoder);
        Ok(self)
    }

    fn insert(&mut self, backend: Backend, language: InputLanguage, transcoder: Arc<dyn Transcoder>) {
        let caps = transcoder.caps();
        self.routes.insert((backend, language), Registration { transcoder, caps });
    }

    /// Whether a transcoder is registered for the route
    pub fn supports(&self, backend: Backend, language: InputLanguage) -> bool {
        self.routes.contains_key(&(backend, language))
    }

    /// Compiles a shader for a backend
    ///
    /// # Arguments
    /// * `backend` - Target backend
    /// * `shader` - Shader description with an inline source
    /// * `config` - Archiver configuration forwarded to the transcoder
    ///
    /// # Returns
    /// The native code and its reflection
    pub fn compile(&self, backend: Backend, shader: &ShaderCreateInfo, config: &ArchiverConfig) -> Result<CompiledShader> {
        let language = shader.source.language();
        let registration = self.routes.get(&(backend, language)).ok_or(ArchiverError::UnsupportedInput { backend, language })?;
        let failure = |e: TranscoderError| ArchiverError::TranscoderFailure {
            backend,
            stage: shader.stage,
            message: e.message,
        };

        let request = TranscodeRequest { backend, shader, config };
        let transcoded = {
            let _guard = (!registration.caps.reentrant).then(|| NON_REENTRANT_TRANSCODERS.lock());
            let transcoded = registration.transcoder.compile(&request).map_err(failure)?;
            if transcoded.reflection.is_none() {
                let reflection = registration.transcoder.reflect(&transcoded.code, shader.stage).map_err(failure)?;
                TranscodedShader { reflection: Some(reflection), ..transcoded }
            } else {
                transcoded
            }
        };

        let TranscodedShader { code, entry_point, reflection } = transcoded;
        let mut compiled = CompiledShader {
            backend,
            language,
            code,
            entry_point,
            reflection: reflection.ok_or_else(|| ArchiverError::InvariantViolation("transcoder produced no reflection".to_string()))?,
        };

        if backend == Backend::Vulkan && language == InputLanguage::Hlsl {
            if !registration.caps.legalizes_spirv {
                tracing::warn!("SPIR-V for {} shader '{}' was not legalized: legalization skipped", shader.stage, shader.name);
            }
            if shader.stage == ShaderStage::Vertex {
                map_hlsl_vertex_inputs(&mut compiled, shader)?;
            }
        }

        tracing::debug!(
            "Compiled {} shader '{}' for {backend}: {} bytes, {} resources",
            shader.stage,
            shader.name,
            compiled.code.len(),
            compiled.reflection.resources.len()
        );
        Ok(compiled)
    }
}

/// Assigns input locations of an HLSL vertex shader from its `ATTRIB<n>` semantics
///
/// Every input must carry an `ATTRIB<n>` semantic; the `Location` decoration of the
/// input is rewritten to `n` in the SPIR-V itself.
fn map_hlsl_vertex_inputs(compiled: &mut CompiledShader, shader: &ShaderCreateInfo) -> Result<()> {
    let failure = |message: String| ArchiverError::TranscoderFailure {
        backend: Backend::Vulkan,
        stage: shader.stage,
        message,
    };

    let mut locations = HashMap::new();
    for input in &compiled.reflection.vertex_inputs {
        let semantic = input.semantic.clone().unwrap_or_default();
        let location = parse_attrib_semantic(&semantic).ok_or_else(|| ArchiverError::ReflectionSemantic { shader: shader.name.clone(), semantic })?;
        locations.insert(input.name.clone(), location);
    }

    let mut module = SpirvModule::from_bytes(&compiled.code).map_err(|e| failure(e.to_string()))?;
    module
        .remap_input_locations(|input| Ok::<_, crate::spirv::SpirvError>(locations.get(&input.name).copied().unwrap_or(input.location)))
        .map_err(|e| failure(e.to_string()))?;

    compiled.reflection.vertex_inputs = module.reflect(shader.stage, &compiled.entry_point).vertex_inputs;
    compiled.code = Bytes::from(module.to_bytes());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::desc::ShaderSource;
    use crate::spirv::tests::sample_module;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Pretends to compile HLSL by returning fixed SPIR-V
    struct FixedSpirv {
        words: Vec<u32>,
        caps: TranscoderCaps,
        calls: AtomicUsize,
    }

    impl Transcoder for FixedSpirv {
        fn caps(&self) -> TranscoderCaps {
            self.caps
        }

        fn compile(&self, request: &TranscodeRequest<'_>) -> std::result::Result<TranscodedShader, TranscoderError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if request.shader.source.text().is_some_and(|text| text.contains("error")) {
                return Err(TranscoderError::new("error X3000: syntax error"));
            }
            Ok(TranscodedShader {
                code: Bytes::from(crate::spirv::words_to_bytes(&self.words)),
                entry_point: request.shader.entry_point.clone(),
                reflection: None,
            })
        }

        fn reflect(&self, native: &[u8], stage: ShaderStage) -> std::result::Result<ShaderReflection, TranscoderError> {
            SpirvModule::from_bytes(native).map(|module| module.reflect(stage, "main")).map_err(|e| TranscoderError::new(e.to_string()))
        }
    }

    fn registry_with(semantic: &str, reentrant: bool) -> TranscoderRegistry {
        let mut registry = TranscoderRegistry::new();
        registry.register(
            Backend::Vulkan,
            InputLanguage::Hlsl,
            FixedSpirv {
                words: sample_module(semantic),
                caps: TranscoderCaps { reentrant, legalizes_spirv: true },
                calls: AtomicUsize::new(0),
            },
        )
        .unwrap();
        registry
    }

    fn hlsl_vertex(source: &str) -> ShaderCreateInfo {
        ShaderCreateInfo::new("VS", ShaderStage::Vertex, ShaderSource::Hlsl(source.into()))
    }

    #[test]
    fn test_missing_route_is_unsupported_input() {
        let registry = TranscoderRegistry::new();
        let err = registry.compile(Backend::D3D11, &hlsl_vertex("float4 main() : SV_Position"), &ArchiverConfig::default()).unwrap_err();
        assert_eq!(err, ArchiverError::UnsupportedInput { backend: Backend::D3D11, language: InputLanguage::Hlsl });
    }

    #[test]
    fn test_attrib_semantic_sets_location() {
        let registry = registry_with("ATTRIB3", false);
        let compiled = registry.compile(Backend::Vulkan, &hlsl_vertex("ok"), &ArchiverConfig::default()).unwrap();
        assert_eq!(compiled.reflection.vertex_inputs[0].location, 3);

        let module = SpirvModule::from_bytes(&compiled.code).unwrap();
        assert_eq!(module.reflect(ShaderStage::Vertex, "main").vertex_inputs[0].location, 3);
    }

    #[test]
    fn test_other_semantic_is_rejected() {
        let registry = registry_with("POSITION", true);
        let err = registry.compile(Backend::Vulkan, &hlsl_vertex("ok"), &ArchiverConfig::default()).unwrap_err();
        assert_eq!(err, ArchiverError::ReflectionSemantic { shader: "VS".into(), semantic: "POSITION".into() });
    }

    #[test]
    fn test_compiler_message_is_preserved() {
        let registry = registry_with("ATTRIB0", true);
        let err = registry.compile(Backend::Vulkan, &hlsl_vertex("error"), &ArchiverConfig::default()).unwrap_err();
        assert_eq!(
            err,
            ArchiverError::TranscoderFailure {
                backend: Backend::Vulkan,
                stage: ShaderStage::Vertex,
                message: "error X3000: syntax error".into()
            }
        );
    }

    #[test]
    fn test_routes_outside_the_table_are_rejected() {
        let mut registry = TranscoderRegistry::new();
        let err = registry.register(Backend::D3D11, InputLanguage::Glsl, GlslToGlsl).unwrap_err();
        assert_eq!(err, ArchiverError::UnsupportedInput { backend: Backend::D3D11, language: InputLanguage::Glsl });
        assert!(registry.register(Backend::Gl, InputLanguage::Spirv, SpirvPassthrough).is_err());
        assert!(!registry.supports(Backend::D3D11, InputLanguage::Glsl));

        registry.register(Backend::Gles, InputLanguage::Glsl, GlslToGlsl).unwrap();
        assert!(registry.supports(Backend::Gles, InputLanguage::Glsl));
        for ((backend, language), _) in &TranscoderRegistry::with_defaults().routes {
            assert!(accepts(*backend, *language), "{backend} {language}");
        }
    }

    #[test]
    fn test_defaults_cover_glsl_and_spirv() {
        let registry = TranscoderRegistry::with_defaults();
        assert!(registry.supports(Backend::Vulkan, InputLanguage::Spirv));
        assert!(registry.supports(Backend::Gles, InputLanguage::GlslVerbatim));
        assert!(registry.supports(Backend::MetalIos, InputLanguage::Glsl));
        assert!(!registry.supports(Backend::D3D12, InputLanguage::Hlsl));
        assert!(!registry.supports(Backend::Gl, InputLanguage::Spirv));
    }
}
