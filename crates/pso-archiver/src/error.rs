//! Error types of the archiver
//!
//! `ArchiverError` is what every `add_*` call and the serializer report. Errors
//! raised at the transcoder boundary use the narrower `TranscoderError`, which the
//! registry wraps with the backend and stage it was compiling for.

use crate::backend::{Backend, ChunkKind};
use crate::desc::{InputLanguage, ShaderStage};

/// Result alias used throughout the crate
pub type Result<T, E = ArchiverError> = std::result::Result<T, E>;

/// Errors reported by the archiver
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ArchiverError {
    /// Same chunk, same name, different content
    #[error("{kind} '{name}' is already in the archive with different content")]
    DuplicateName { kind: ChunkKind, name: String },

    /// No transcoder registered for the requested backend and input language
    #[error("no transcoder is registered for {language} input on {backend}")]
    UnsupportedInput { backend: Backend, language: InputLanguage },

    /// The backend compiler returned an error; the message is preserved verbatim
    #[error("failed to compile {stage} shader for {backend}: {message}")]
    TranscoderFailure { backend: Backend, stage: ShaderStage, message: String },

    /// A vertex input semantic cannot be mapped to a location
    #[error("unable to map semantic '{semantic}' of shader '{shader}' to an input location: semantics must have 'ATTRIBx' format")]
    ReflectionSemantic { shader: String, semantic: String },

    /// The same resource name is reflected with inconsistent declarations
    #[error("resource '{resource}' is declared inconsistently across shader stages: {details}")]
    ReflectionConflict { resource: String, details: String },

    /// A caller-supplied signature does not match the shader reflection
    #[error("resource '{resource}' does not match the pipeline resource signatures: {reason}")]
    BindingMismatch { resource: String, reason: String },

    /// Rewriting shader bindings for a backend failed
    #[error("failed to patch shaders for {backend}: {reason}")]
    BackendPatching { backend: Backend, reason: String },

    /// The archive would exceed the range of 32-bit offsets
    #[error("archive size {size} exceeds the 4 GiB limit of 32-bit offsets")]
    SerializationOverflow { size: u64 },

    /// The caller-supplied description is malformed
    #[error("invalid description: {0}")]
    InvalidDescription(String),

    /// An internal consistency check failed
    #[error("internal invariant violated: {0}")]
    InvariantViolation(String),
}

impl ArchiverError {
    pub(crate) fn patching(backend: Backend, reason: impl Into<String>) -> Self {
        Self::BackendPatching { backend, reason: reason.into() }
    }

    pub(crate) fn invalid(message: impl Into<String>) -> Self {
        Self::InvalidDescription(message.into())
    }
}

/// Error returned by a transcoder
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{message}")]
pub struct TranscoderError {
    /// Compiler output, passed through to the caller unchanged
    pub message: String,
}

impl TranscoderError {
    /// Creates a transcoder error from compiler output
    pub fn new(message: impl Into<String>) -> Self {
        Self { message: message.into() }
    }
}

/// Errors produced while writing an archive to a stream
#[derive(Debug, thiserror::Error)]
pub enum SerializeError {
    /// The archive could not be assembled
    #[error(transparent)]
    Archive(#[from] ArchiverError),
    /// Writing to the sink failed
    #[error("failed to write archive: {0}")]
    Io(#[from] std::io::Error),
}
