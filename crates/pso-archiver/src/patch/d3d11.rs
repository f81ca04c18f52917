//! Direct3D11: bytecode is stored unchanged next to its per-stage slot assignment

use super::{BackendPatcher, check_dxbc, write_register_map};
use crate::backend::Backend;
use crate::error::Result;
use crate::serialized::{SerializedBlob, Serializer};
use crate::signature::PipelineLayout;
use crate::transcoder::CompiledShader;
use bytes::Bytes;

#[derive(Debug, Clone, Copy, Default)]
pub struct D3D11Patcher;

impl BackendPatcher for D3D11Patcher {
    fn backend(&self) -> Backend {
        Backend::D3D11
    }

    fn patch_shader(&self, shader: &CompiledShader, _layout: &PipelineLayout) -> Result<Bytes> {
        check_dxbc(Backend::D3D11, shader)?;
        Ok(shader.code.clone())
    }

    fn device_header(&self, layout: &PipelineLayout, shaders: &[CompiledShader]) -> Result<SerializedBlob> {
        let mut s = Serializer::new();
        write_register_map(&mut s, Backend::D3D11, layout, shaders)?;
        Ok(s.finish())
    }
}
