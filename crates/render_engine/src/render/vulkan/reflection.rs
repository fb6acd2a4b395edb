//! SPIR-V shader reflection
//!
//! Pulls the pipeline-facing interface out of compiled shader binaries: stage
//! inputs and outputs, uniform blocks with the offsets the compiler actually
//! laid down, and sampled images. Everything downstream (vertex formats,
//! descriptor layouts, material buffers) is driven by this data rather than
//! hand-maintained structs.

use ash::vk;

use crate::render::vulkan::{VulkanError, VulkanResult};

/// First word of every valid SPIR-V binary
const SPIRV_MAGIC: u32 = 0x0723_0203;

/// Shader stages the pipeline builder accepts
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ShaderStage {
    Vertex,
    Fragment,
}

impl ShaderStage {
    pub fn to_vk(self) -> vk::ShaderStageFlags {
        match self {
            ShaderStage::Vertex => vk::ShaderStageFlags::VERTEX,
            ShaderStage::Fragment => vk::ShaderStageFlags::FRAGMENT,
        }
    }
}

/// A compiled shader stage: the stage kind plus its SPIR-V words
#[derive(Debug, Clone, Copy)]
pub struct ShaderStageBinary<'a> {
    pub stage: ShaderStage,
    pub words: &'a [u32],
}

/// Vertex attribute types the vertex-input builder understands
///
/// Only 32-bit float scalars, vectors, and square matrices are expressible
/// as vertex input here; anything else in a shader's input signature is
/// rejected at reflection time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttributeType {
    Float,
    Vec2,
    Vec3,
    Vec4,
    Mat2,
    Mat3,
    Mat4,
}

impl AttributeType {
    /// Total byte size of the attribute
    pub fn byte_size(self) -> u32 {
        match self {
            AttributeType::Float => 4,
            AttributeType::Vec2 => 8,
            AttributeType::Vec3 => 12,
            AttributeType::Vec4 => 16,
            AttributeType::Mat2 => 16,
            AttributeType::Mat3 => 36,
            AttributeType::Mat4 => 64,
        }
    }

    /// Number of f32 components per attribute
    pub fn component_count(self) -> u32 {
        self.byte_size() / 4
    }

    /// Number of consecutive shader locations the attribute occupies
    ///
    /// Matrices are passed one column per location.
    pub fn location_span(self) -> u32 {
        match self {
            AttributeType::Float | AttributeType::Vec2 | AttributeType::Vec3
            | AttributeType::Vec4 => 1,
            AttributeType::Mat2 => 2,
            AttributeType::Mat3 => 3,
            AttributeType::Mat4 => 4,
        }
    }

    /// Format of one location's worth of data
    pub fn format(self) -> vk::Format {
        match self {
            AttributeType::Float => vk::Format::R32_SFLOAT,
            AttributeType::Vec2 | AttributeType::Mat2 => vk::Format::R32G32_SFLOAT,
            AttributeType::Vec3 | AttributeType::Mat3 => vk::Format::R32G32B32_SFLOAT,
            AttributeType::Vec4 | AttributeType::Mat4 => vk::Format::R32G32B32A32_SFLOAT,
        }
    }

    /// Byte size of one location's worth of data
    pub fn per_location_size(self) -> u32 {
        self.byte_size() / self.location_span()
    }
}

/// A stage input variable
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StageInput {
    pub name: String,
    pub location: u32,
    pub ty: AttributeType,
}

/// A stage output variable
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StageOutput {
    pub name: String,
    pub location: u32,
    pub ty: AttributeType,
}

/// One member of a uniform block, with the layout the compiler emitted
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlockMember {
    pub name: String,
    /// Byte offset within the block, read from the binary's decorations
    pub offset: u32,
    /// Byte size of the member
    pub size: u32,
}

/// A uniform buffer block declared by a shader
#[derive(Debug, Clone)]
pub struct UniformBlock {
    pub name: String,
    pub set: u32,
    pub binding: u32,
    /// Declared byte size of the whole block
    pub size: u64,
    pub members: Vec<BlockMember>,
    /// Stages that reference this block, widened during interface merging
    pub stages: vk::ShaderStageFlags,
}

/// A combined image sampler (or sampled image) declared by a shader
#[derive(Debug, Clone)]
pub struct SampledImage {
    pub name: String,
    pub set: u32,
    pub binding: u32,
    /// Stages that reference this image, widened during interface merging
    pub stages: vk::ShaderStageFlags,
}

/// A push constant block declared by a shader
#[derive(Debug, Clone)]
pub struct PushConstantBlock {
    pub name: String,
    pub size: u32,
    pub stages: vk::ShaderStageFlags,
}

/// Everything reflection extracted from a single shader stage
#[derive(Debug, Clone)]
pub struct ReflectedModule {
    pub stage: ShaderStage,
    /// Stage inputs in declaration order
    pub inputs: Vec<StageInput>,
    /// Stage outputs in declaration order
    pub outputs: Vec<StageOutput>,
    pub uniform_blocks: Vec<UniformBlock>,
    pub sampled_images: Vec<SampledImage>,
    pub push_constants: Vec<PushConstantBlock>,
}

/// Reflect a shader binary into its pipeline-facing interface
///
/// Read-only over the words; fails on malformed binaries and on resource
/// declarations the binding model cannot express (non-float vertex inputs,
/// descriptor arrays, storage resources).
pub fn reflect(binary: &ShaderStageBinary<'_>) -> VulkanResult<ReflectedModule> {
    if binary.words.first() != Some(&SPIRV_MAGIC) {
        return Err(VulkanError::ReflectionFailed(
            "Not a SPIR-V binary (bad magic word)".to_string(),
        ));
    }

    let entry_points = spirq::ReflectConfig::new()
        .spv(binary.words)
        .ref_all_rscs(true)
        .reflect()
        .map_err(|e| VulkanError::ReflectionFailed(format!("{e:?}")))?;

    let entry_point = entry_points.first().ok_or_else(|| {
        VulkanError::ReflectionFailed("Binary declares no entry points".to_string())
    })?;

    let stage_flags = binary.stage.to_vk();
    let mut inputs = Vec::new();
    let mut outputs = Vec::new();
    let mut uniform_blocks = Vec::new();
    let mut sampled_images = Vec::new();
    let mut push_constants = Vec::new();

    for var in &entry_point.vars {
        match var {
            spirq::var::Variable::Input { name, location, ty } => {
                inputs.push(StageInput {
                    name: name.clone().unwrap_or_default(),
                    location: location.loc(),
                    ty: attribute_type(ty)?,
                });
            }
            spirq::var::Variable::Output { name, location, ty } => {
                outputs.push(StageOutput {
                    name: name.clone().unwrap_or_default(),
                    location: location.loc(),
                    ty: attribute_type(ty)?,
                });
            }
            spirq::var::Variable::Descriptor {
                name,
                desc_bind,
                desc_ty,
                ty,
                nbind,
            } => {
                if *nbind != 1 {
                    return Err(VulkanError::UnsupportedShaderType(format!(
                        "Descriptor array of {nbind} at set {} binding {}",
                        desc_bind.set(),
                        desc_bind.bind()
                    )));
                }

                use spirq::ty::DescriptorType;
                match desc_ty {
                    DescriptorType::UniformBuffer() => {
                        let size = ty.nbyte().ok_or_else(|| {
                            VulkanError::ReflectionFailed(format!(
                                "Uniform block at set {} binding {} has no size",
                                desc_bind.set(),
                                desc_bind.bind()
                            ))
                        })? as u64;
                        uniform_blocks.push(UniformBlock {
                            name: name.clone().unwrap_or_default(),
                            set: desc_bind.set(),
                            binding: desc_bind.bind(),
                            size,
                            members: block_members(ty),
                            stages: stage_flags,
                        });
                    }
                    DescriptorType::CombinedImageSampler() | DescriptorType::SampledImage() => {
                        sampled_images.push(SampledImage {
                            name: name.clone().unwrap_or_default(),
                            set: desc_bind.set(),
                            binding: desc_bind.bind(),
                            stages: stage_flags,
                        });
                    }
                    other => {
                        return Err(VulkanError::UnsupportedShaderType(format!(
                            "Descriptor type {other:?} at set {} binding {}",
                            desc_bind.set(),
                            desc_bind.bind()
                        )));
                    }
                }
            }
            spirq::var::Variable::PushConstant { name, ty } => {
                let size = ty.nbyte().ok_or_else(|| {
                    VulkanError::ReflectionFailed(
                        "Push constant block has no size".to_string(),
                    )
                })? as u32;
                push_constants.push(PushConstantBlock {
                    name: name.clone().unwrap_or_default(),
                    size,
                    stages: stage_flags,
                });
            }
            _ => {}
        }
    }

    log::debug!(
        "Reflected {:?} stage: {} inputs, {} outputs, {} uniform blocks, {} sampled images",
        binary.stage,
        inputs.len(),
        outputs.len(),
        uniform_blocks.len(),
        sampled_images.len()
    );

    Ok(ReflectedModule {
        stage: binary.stage,
        inputs,
        outputs,
        uniform_blocks,
        sampled_images,
        push_constants,
    })
}

/// Map a spirq interface type onto the closed attribute set
fn attribute_type(ty: &spirq::ty::Type) -> VulkanResult<AttributeType> {
    use spirq::ty::{ScalarType, Type};

    let unsupported = || VulkanError::UnsupportedShaderType(format!("Interface type {ty:?}"));

    match ty {
        Type::Scalar(ScalarType::Float { bits: 32 }) => Ok(AttributeType::Float),
        Type::Vector(v) => {
            if !matches!(v.scalar_ty, ScalarType::Float { bits: 32 }) {
                return Err(unsupported());
            }
            match v.nscalar {
                2 => Ok(AttributeType::Vec2),
                3 => Ok(AttributeType::Vec3),
                4 => Ok(AttributeType::Vec4),
                _ => Err(unsupported()),
            }
        }
        Type::Matrix(m) => {
            if !matches!(m.vector_ty.scalar_ty, ScalarType::Float { bits: 32 }) {
                return Err(unsupported());
            }
            match (m.nvector, m.vector_ty.nscalar) {
                (2, 2) => Ok(AttributeType::Mat2),
                (3, 3) => Ok(AttributeType::Mat3),
                (4, 4) => Ok(AttributeType::Mat4),
                _ => Err(unsupported()),
            }
        }
        _ => Err(unsupported()),
    }
}

/// Extract member layout from a uniform block's struct type
///
/// Offsets come straight from the binary's decorations; they are never
/// recomputed from the member types.
fn block_members(ty: &spirq::ty::Type) -> Vec<BlockMember> {
    if let spirq::ty::Type::Struct(st) = ty {
        st.members
            .iter()
            .map(|m| BlockMember {
                name: m.name.clone().unwrap_or_default(),
                offset: m.offset.unwrap_or(0) as u32,
                size: m.ty.nbyte().unwrap_or(0) as u32,
            })
            .collect()
    } else {
        Vec::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_bad_magic() {
        let words = [0xdead_beef_u32, 0, 0, 0, 0];
        let binary = ShaderStageBinary {
            stage: ShaderStage::Vertex,
            words: &words,
        };
        let err = reflect(&binary).unwrap_err();
        assert!(matches!(err, VulkanError::ReflectionFailed(_)));
    }

    #[test]
    fn rejects_empty_binary() {
        let binary = ShaderStageBinary {
            stage: ShaderStage::Fragment,
            words: &[],
        };
        assert!(reflect(&binary).is_err());
    }

    #[test]
    fn attribute_sizes_and_spans() {
        assert_eq!(AttributeType::Float.byte_size(), 4);
        assert_eq!(AttributeType::Vec3.byte_size(), 12);
        assert_eq!(AttributeType::Mat4.byte_size(), 64);
        assert_eq!(AttributeType::Vec4.location_span(), 1);
        assert_eq!(AttributeType::Mat2.location_span(), 2);
        assert_eq!(AttributeType::Mat3.location_span(), 3);
        assert_eq!(AttributeType::Mat4.location_span(), 4);
    }

    #[test]
    fn matrix_columns_use_column_format() {
        assert_eq!(AttributeType::Mat3.format(), vk::Format::R32G32B32_SFLOAT);
        assert_eq!(AttributeType::Mat3.per_location_size(), 12);
        assert_eq!(AttributeType::Mat4.format(), vk::Format::R32G32B32A32_SFLOAT);
        assert_eq!(AttributeType::Mat4.per_location_size(), 16);
    }
}
