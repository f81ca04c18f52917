//! SPIR-V module inspection and in-place decoration rewriting
//!
//! Only the parts of SPIR-V the archiver needs are decoded: debug names, decorations,
//! resource types, variables and entry points. Rewrites touch single literal words of
//! existing `OpDecorate` instructions, so the instruction stream never changes length.

use crate::desc::{ResourceType, ShaderStage};
use crate::reflection::{ReflectedResource, ShaderReflection, VertexInput};
use std::collections::HashMap;

pub const SPIRV_MAGIC: u32 = 0x0723_0203;
const HEADER_WORDS: usize = 5;

mod op {
    pub const NAME: u16 = 5;
    pub const ENTRY_POINT: u16 = 15;
    pub const TYPE_IMAGE: u16 = 25;
    pub const TYPE_SAMPLER: u16 = 26;
    pub const TYPE_SAMPLED_IMAGE: u16 = 27;
    pub const TYPE_ARRAY: u16 = 28;
    pub const TYPE_RUNTIME_ARRAY: u16 = 29;
    pub const TYPE_STRUCT: u16 = 30;
    pub const TYPE_POINTER: u16 = 32;
    pub const CONSTANT: u16 = 43;
    pub const VARIABLE: u16 = 59;
    pub const DECORATE: u16 = 71;
    pub const MEMBER_DECORATE: u16 = 72;
    pub const TYPE_ACCELERATION_STRUCTURE: u16 = 5341;
    pub const DECORATE_STRING: u16 = 5632;
}

/// Decoration numbers
pub mod decoration {
    pub const BLOCK: u32 = 2;
    pub const BUFFER_BLOCK: u32 = 3;
    pub const BUILT_IN: u32 = 11;
    pub const NON_WRITABLE: u32 = 24;
    pub const LOCATION: u32 = 30;
    pub const BINDING: u32 = 33;
    pub const DESCRIPTOR_SET: u32 = 34;
    pub const USER_SEMANTIC: u32 = 5635;
}

mod storage_class {
    pub const UNIFORM_CONSTANT: u32 = 0;
    pub const INPUT: u32 = 1;
    pub const UNIFORM: u32 = 2;
    pub const STORAGE_BUFFER: u32 = 12;
}

const DIM_BUFFER: u32 = 5;
const DIM_SUBPASS_DATA: u32 = 6;
const IMAGE_SAMPLED_STORAGE: u32 = 2;

/// Errors raised while decoding or rewriting SPIR-V
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SpirvError {
    #[error("SPIR-V byte length {0} is not a multiple of 4")]
    UnalignedLength(usize),
    #[error("SPIR-V module has {0} words, less than the 5-word header")]
    TooShort(usize),
    #[error("bad SPIR-V magic number {0:#010x}")]
    BadMagic(u32),
    #[error("malformed instruction at word {0}")]
    MalformedInstruction(usize),
    #[error("'{name}' (id {id}) has no {decoration} decoration to rewrite")]
    MissingDecoration { id: u32, name: String, decoration: &'static str },
}

/// Converts little-endian bytes to SPIR-V words
pub fn words_from_bytes(bytes: &[u8]) -> Result<Vec<u32>, SpirvError> {
    if bytes.len() % 4 != 0 {
        return Err(SpirvError::UnalignedLength(bytes.len()));
    }
    Ok(bytes.chunks_exact(4).map(|word| u32::from_le_bytes([word[0], word[1], word[2], word[3]])).collect())
}

/// Converts SPIR-V words to little-endian bytes
pub fn words_to_bytes(words: &[u32]) -> Vec<u8> {
    words.iter().flat_map(|word| word.to_le_bytes()).collect()
}

/// Decodes a null-terminated literal string packed into words
fn decode_string(words: &[u32]) -> String {
    let bytes: Vec<u8> = words.iter().flat_map(|word| word.to_le_bytes()).take_while(|&b| b != 0).collect();
    String::from_utf8_lossy(&bytes).into_owned()
}

#[derive(Debug, Clone)]
enum SpirvType {
    Image { dim: u32, sampled: u32 },
    Sampler,
    SampledImage,
    AccelerationStructure,
    Array { element: u32, length: u32 },
    RuntimeArray { element: u32 },
    Struct { members: Vec<u32> },
    Pointer { pointee: u32 },
}

#[derive(Debug, Clone, Copy)]
struct Variable {
    id: u32,
    pointer_type: u32,
    storage_class: u32,
}

/// Location of the first literal operand of an `OpDecorate`
#[derive(Debug, Clone, Copy)]
struct DecorationSlot {
    decoration: u32,
    literal_index: Option<usize>,
}

/// An entry point declared by a module
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntryPoint {
    pub execution_model: u32,
    pub name: String,
}

/// A parsed SPIR-V module
#[derive(Debug, Clone)]
pub struct SpirvModule {
    words: Vec<u32>,
    names: HashMap<u32, String>,
    decorations: HashMap<u32, Vec<DecorationSlot>>,
    non_writable_members: HashMap<u32, u32>,
    semantics: HashMap<u32, String>,
    types: HashMap<u32, SpirvType>,
    constants: HashMap<u32, u32>,
    variables: Vec<Variable>,
    entry_points: Vec<EntryPoint>,
}

impl SpirvModule {
    /// Parses a module from little-endian bytes
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, SpirvError> {
        Self::parse(words_from_bytes(bytes)?)
    }

    /// Parses a module from words
    pub fn parse(words: Vec<u32>) -> Result<Self, SpirvError> {
        if words.len() < HEADER_WORDS {
            return Err(SpirvError::TooShort(words.len()));
        }
        if words[0] != SPIRV_MAGIC {
            return Err(SpirvError::BadMagic(words[0]));
        }

        let mut module = SpirvModule {
            words: Vec::new(),
            names: HashMap::new(),
            decorations: HashMap::new(),
            non_writable_members: HashMap::new(),
            semantics: HashMap::new(),
            types: HashMap::new(),
            constants: HashMap::new(),
            variables: Vec::new(),
            entry_points: Vec::new(),
        };

        let mut offset = HEADER_WORDS;
        while offset < words.len() {
            let word_count = (words[offset] >> 16) as usize;
            let opcode = (words[offset] & 0xFFFF) as u16;
            if word_count == 0 || offset + word_count > words.len() {
                return Err(SpirvError::MalformedInstruction(offset));
            }
            let operands = &words[offset + 1..offset + word_count];
            let require = |count: usize| if operands.len() < count { Err(SpirvError::MalformedInstruction(offset)) } else { Ok(()) };

            match opcode {
                op::NAME => {
                    require(1)?;
                    module.names.insert(operands[0], decode_string(&operands[1..]));
                }
                op::ENTRY_POINT => {
                    require(3)?;
                    module.entry_points.push(EntryPoint { execution_model: operands[0], name: decode_string(&operands[2..]) });
                }
                op::TYPE_IMAGE => {
                    require(7)?;
                    module.types.insert(operands[0], SpirvType::Image { dim: operands[2], sampled: operands[6] });
                }
                op::TYPE_SAMPLER => {
                    require(1)?;
                    module.types.insert(operands[0], SpirvType::Sampler);
                }
                op::TYPE_SAMPLED_IMAGE => {
                    require(2)?;
                    module.types.insert(operands[0], SpirvType::SampledImage);
                }
                op::TYPE_ACCELERATION_STRUCTURE => {
                    require(1)?;
                    module.types.insert(operands[0], SpirvType::AccelerationStructure);
                }
                op::TYPE_ARRAY => {
                    require(3)?;
                    module.types.insert(operands[0], SpirvType::Array { element: operands[1], length: operands[2] });
                }
                op::TYPE_RUNTIME_ARRAY => {
                    require(2)?;
                    module.types.insert(operands[0], SpirvType::RuntimeArray { element: operands[1] });
                }
                op::TYPE_STRUCT => {
                    require(1)?;
                    module.types.insert(operands[0], SpirvType::Struct { members: operands[1..].to_vec() });
                }
                op::TYPE_POINTER => {
                    require(3)?;
                    module.types.insert(operands[0], SpirvType::Pointer { pointee: operands[2] });
                }
                op::CONSTANT => {
                    require(3)?;
                    module.constants.insert(operands[1], operands[2]);
                }
                op::VARIABLE => {
                    require(3)?;
                    module.variables.push(Variable { pointer_type: operands[0], id: operands[1], storage_class: operands[2] });
                }
                op::DECORATE => {
                    require(2)?;
                    module.decorations.entry(operands[0]).or_default().push(DecorationSlot {
                        decoration: operands[1],
                        literal_index: (operands.len() > 2).then_some(offset + 3),
                    });
                }
                op::MEMBER_DECORATE => {
                    require(3)?;
                    if operands[2] == decoration::NON_WRITABLE {
                        *module.non_writable_members.entry(operands[0]).or_default() += 1;
                    }
                }
                op::DECORATE_STRING => {
                    require(2)?;
                    if operands[1] == decoration::USER_SEMANTIC {
                        module.semantics.insert(operands[0], decode_string(&operands[2..]));
                    }
                }
                _ => {}
            }
            offset += word_count;
        }

        module.words = words;
        Ok(module)
    }

    pub fn words(&self) -> &[u32] {
        &self.words
    }

    pub fn into_words(self) -> Vec<u32> {
        self.words
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        words_to_bytes(&self.words)
    }

    pub fn entry_points(&self) -> &[EntryPoint] {
        &self.entry_points
    }

    fn has_decoration(&self, id: u32, decoration: u32) -> bool {
        self.decorations.get(&id).is_some_and(|slots| slots.iter().any(|slot| slot.decoration == decoration))
    }

    fn decoration_value(&self, id: u32, decoration: u32) -> Option<u32> {
        let slot = self.decorations.get(&id)?.iter().find(|slot| slot.decoration == decoration)?;
        self.words.get(slot.literal_index?).copied()
    }

    fn set_decoration_value(&mut self, id: u32, decoration: u32, value: u32, decoration_name: &'static str) -> Result<(), SpirvError> {
        let literal_index = self
            .decorations
            .get(&id)
            .and_then(|slots| slots.iter().find(|slot| slot.decoration == decoration))
            .and_then(|slot| slot.literal_index)
            .ok_or_else(|| SpirvError::MissingDecoration {
                id,
                name: self.names.get(&id).cloned().unwrap_or_default(),
                decoration: decoration_name,
            })?;
        self.words[literal_index] = value;
        Ok(())
    }

    /// Strips array types, returning the element type and the total element count
    fn unwrap_arrays(&self, mut type_id: u32) -> (u32, u32) {
        let mut count = 1u32;
        loop {
            match self.types.get(&type_id) {
                Some(SpirvType::Array { element, length }) => {
                    count = count.saturating_mul(self.constants.get(length).copied().unwrap_or(1));
                    type_id = *element;
                }
                Some(SpirvType::RuntimeArray { element }) => {
                    count = 0;
                    type_id = *element;
                }
                _ => return (type_id, count),
            }
        }
    }

    fn is_read_only_buffer(&self, variable: u32, struct_id: u32) -> bool {
        if self.has_decoration(variable, decoration::NON_WRITABLE) {
            return true;
        }
        match self.types.get(&struct_id) {
            Some(SpirvType::Struct { members }) if !members.is_empty() => self.non_writable_members.get(&struct_id).copied().unwrap_or(0) as usize >= members.len(),
            _ => false,
        }
    }

    fn classify(&self, variable: &Variable) -> Option<(ResourceType, u32, u32)> {
        let Some(SpirvType::Pointer { pointee }) = self.types.get(&variable.pointer_type) else {
            return None;
        };
        let (base, array_size) = self.unwrap_arrays(*pointee);
        let resource_type = match (variable.storage_class, self.types.get(&base)?) {
            (storage_class::UNIFORM_CONSTANT, SpirvType::Image { dim, sampled }) => match (*dim, *sampled == IMAGE_SAMPLED_STORAGE) {
                (DIM_SUBPASS_DATA, _) => ResourceType::InputAttachment,
                (DIM_BUFFER, true) => ResourceType::BufferUav,
                (DIM_BUFFER, false) => ResourceType::BufferSrv,
                (_, true) => ResourceType::TextureUav,
                (_, false) => ResourceType::TextureSrv,
            },
            (storage_class::UNIFORM_CONSTANT, SpirvType::Sampler) => ResourceType::Sampler,
            (storage_class::UNIFORM_CONSTANT, SpirvType::SampledImage) => ResourceType::TextureSrv,
            (storage_class::UNIFORM_CONSTANT, SpirvType::AccelerationStructure) => ResourceType::AccelStruct,
            (storage_class::UNIFORM, SpirvType::Struct { .. }) if !self.has_decoration(base, decoration::BUFFER_BLOCK) => ResourceType::ConstantBuffer,
            (storage_class::UNIFORM | storage_class::STORAGE_BUFFER, SpirvType::Struct { .. }) => {
                if self.is_read_only_buffer(variable.id, base) {
                    ResourceType::BufferSrv
                } else {
                    ResourceType::BufferUav
                }
            }
            _ => return None,
        };
        Some((resource_type, array_size, base))
    }

    fn debug_name(&self, id: u32) -> Option<&String> {
        self.names.get(&id).filter(|name| !name.is_empty())
    }

    /// Name of a block type
    ///
    /// An unnamed block with a single struct member is a wrapper, as naga emits
    /// around uniform blocks, and is known by the name of the wrapped struct.
    fn block_name(&self, block: u32) -> Option<&String> {
        self.debug_name(block).or_else(|| match self.types.get(&block) {
            Some(SpirvType::Struct { members }) if members.len() == 1 && matches!(self.types.get(&members[0]), Some(SpirvType::Struct { .. })) => self.debug_name(members[0]),
            _ => None,
        })
    }

    /// Name a resource is known by
    ///
    /// Blocks use their block name, except for HLSL compilers that prefix type
    /// names with `type.`, where the variable carries the declared name.
    fn resource_name(&self, variable: u32, base_type: u32) -> String {
        let variable_name = self.debug_name(variable);
        let is_block = matches!(self.types.get(&base_type), Some(SpirvType::Struct { .. }));
        let type_name = if is_block { self.block_name(base_type) } else { self.debug_name(base_type) };
        let name = match (is_block, type_name, variable_name) {
            (true, Some(type_name), Some(variable_name)) if type_name.starts_with("type.") => Some(variable_name),
            (true, Some(type_name), _) => Some(type_name),
            (_, _, Some(variable_name)) => Some(variable_name),
            (_, type_name, None) => type_name,
        };
        name.cloned().unwrap_or_else(|| format!("_{variable}"))
    }

    fn resources_with_ids(&self, stage: ShaderStage) -> Vec<(u32, ReflectedResource)> {
        let mut resources: Vec<(u32, ReflectedResource)> = self
            .variables
            .iter()
            .filter_map(|variable| {
                let (resource_type, array_size, base) = self.classify(variable)?;
                Some((
                    variable.id,
                    ReflectedResource {
                        name: self.resource_name(variable.id, base),
                        resource_type,
                        set: self.decoration_value(variable.id, decoration::DESCRIPTOR_SET).unwrap_or(0),
                        binding: self.decoration_value(variable.id, decoration::BINDING).unwrap_or(0),
                        array_size,
                        stages: stage.flag(),
                    },
                ))
            })
            .collect();
        resources.sort_by(|(_, a), (_, b)| (a.set, a.binding, &a.name).cmp(&(b.set, b.binding, &b.name)));
        resources
    }

    fn vertex_inputs_with_ids(&self) -> Vec<(u32, VertexInput)> {
        let mut inputs: Vec<(u32, VertexInput)> = self
            .variables
            .iter()
            .filter(|variable| variable.storage_class == storage_class::INPUT && !self.has_decoration(variable.id, decoration::BUILT_IN))
            .filter_map(|variable| {
                let location = self.decoration_value(variable.id, decoration::LOCATION);
                let semantic = self.semantics.get(&variable.id).cloned();
                if location.is_none() && semantic.is_none() {
                    return None;
                }
                Some((
                    variable.id,
                    VertexInput {
                        name: self.names.get(&variable.id).cloned().unwrap_or_else(|| format!("_{}", variable.id)),
                        semantic,
                        location: location.unwrap_or(0),
                    },
                ))
            })
            .collect();
        inputs.sort_by_key(|(id, input)| (input.location, *id));
        inputs
    }

    /// Reflects the resources and vertex inputs of the module
    pub fn reflect(&self, stage: ShaderStage, entry_point: &str) -> ShaderReflection {
        let mut reflection = ShaderReflection::new(stage, entry_point);
        reflection.resources = self.resources_with_ids(stage).into_iter().map(|(_, resource)| resource).collect();
        if stage == ShaderStage::Vertex {
            reflection.vertex_inputs = self.vertex_inputs_with_ids().into_iter().map(|(_, input)| input).collect();
        }
        reflection
    }

    /// Rewrites the `DescriptorSet` and `Binding` decorations of every resource
    ///
    /// # Arguments
    /// * `assign` - Returns the new `(set, binding)` of a resource, or `None` to leave it unchanged
    pub fn remap_bindings<F>(&mut self, stage: ShaderStage, mut assign: F) -> Result<(), SpirvError>
    where
        F: FnMut(&ReflectedResource) -> Option<(u32, u32)>,
    {
        for (id, resource) in self.resources_with_ids(stage) {
            if let Some((set, binding)) = assign(&resource) {
                self.set_decoration_value(id, decoration::DESCRIPTOR_SET, set, "DescriptorSet")?;
                self.set_decoration_value(id, decoration::BINDING, binding, "Binding")?;
            }
        }
        Ok(())
    }

    /// Rewrites the `Location` decoration of every vertex input
    pub fn remap_input_locations<F, E>(&mut self, mut assign: F) -> Result<(), E>
    where
        F: FnMut(&VertexInput) -> Result<u32, E>,
        E: From<SpirvError>,
    {
        for (id, input) in self.vertex_inputs_with_ids() {
            let location = assign(&input)?;
            self.set_decoration_value(id, decoration::LOCATION, location, "Location")?;
        }
        Ok(())
    }
}
