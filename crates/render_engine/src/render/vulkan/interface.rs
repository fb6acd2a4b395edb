//! Shader interface merging
//!
//! Folds the per-stage reflection results into a single pipeline interface:
//! the vertex format the pipeline consumes, the attachments it writes, and
//! the deduplicated resource bindings every later phase (classification,
//! layouts, materials) works from.

use std::collections::HashSet;

use ash::vk;

use crate::render::vulkan::reflection::{
    PushConstantBlock, ReflectedModule, SampledImage, ShaderStage, StageInput, StageOutput,
    UniformBlock,
};

/// One attribute of the merged vertex format
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VertexAttribute {
    pub name: String,
    pub location: u32,
    pub ty: crate::render::vulkan::reflection::AttributeType,
    /// Byte offset within the interleaved vertex
    pub offset: u32,
}

/// Tightly-packed single-binding vertex format derived from stage inputs
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VertexFormat {
    /// Attributes sorted by location
    pub attributes: Vec<VertexAttribute>,
    /// Stride of one interleaved vertex
    pub stride: u32,
}

impl VertexFormat {
    /// Vertex binding description for binding 0
    pub fn binding_description(&self) -> vk::VertexInputBindingDescription {
        vk::VertexInputBindingDescription::builder()
            .binding(0)
            .stride(self.stride)
            .input_rate(vk::VertexInputRate::VERTEX)
            .build()
    }

    /// Attribute descriptions, one per occupied location
    ///
    /// Matrix attributes expand to one description per column, each column
    /// at the next location with a column-sized offset step.
    pub fn attribute_descriptions(&self) -> Vec<vk::VertexInputAttributeDescription> {
        let mut descriptions = Vec::new();
        for attr in &self.attributes {
            let column_size = attr.ty.per_location_size();
            for column in 0..attr.ty.location_span() {
                descriptions.push(
                    vk::VertexInputAttributeDescription::builder()
                        .binding(0)
                        .location(attr.location + column)
                        .format(attr.ty.format())
                        .offset(attr.offset + column * column_size)
                        .build(),
                );
            }
        }
        descriptions
    }
}

/// The merged interface of a full shader program
#[derive(Debug, Clone)]
pub struct ReflectedInterface {
    /// Vertex-stage inputs in declaration order
    pub inputs: Vec<StageInput>,
    /// Final-stage outputs, deduplicated by location
    pub outputs: Vec<StageOutput>,
    /// Uniform blocks across all stages, keyed by (set, binding)
    pub uniform_blocks: Vec<UniformBlock>,
    /// Sampled images across all stages, keyed by (set, binding)
    pub sampled_images: Vec<SampledImage>,
    /// Push constant blocks; one range per declaring stage set
    pub push_constants: Vec<PushConstantBlock>,
}

impl ReflectedInterface {
    /// Merge per-stage reflections into one pipeline interface
    ///
    /// Inputs come from the vertex stage alone. Outputs come from the last
    /// stage, walked in reverse with the first record per location kept.
    /// Resources are unioned by (set, binding): the first declaration wins
    /// and later duplicates only widen its stage visibility.
    pub fn merge(modules: &[ReflectedModule]) -> Self {
        let inputs = modules
            .iter()
            .find(|m| m.stage == ShaderStage::Vertex)
            .map(|m| m.inputs.clone())
            .unwrap_or_default();

        let outputs = modules.last().map_or_else(Vec::new, |last| {
            let mut seen = HashSet::new();
            let mut outputs = Vec::new();
            for output in last.outputs.iter().rev() {
                if seen.insert(output.location) {
                    outputs.push(output.clone());
                }
            }
            outputs
        });

        let mut uniform_blocks: Vec<UniformBlock> = Vec::new();
        let mut sampled_images: Vec<SampledImage> = Vec::new();
        let mut push_constants: Vec<PushConstantBlock> = Vec::new();
        for module in modules {
            let stage_flags = module.stage.to_vk();

            for block in &module.uniform_blocks {
                match uniform_blocks
                    .iter_mut()
                    .find(|existing| existing.set == block.set && existing.binding == block.binding)
                {
                    Some(existing) => {
                        log::debug!(
                            "Dropping duplicate uniform block '{}' at set {} binding {} from {:?}",
                            block.name,
                            block.set,
                            block.binding,
                            module.stage
                        );
                        existing.stages |= stage_flags;
                    }
                    None => uniform_blocks.push(block.clone()),
                }
            }

            for image in &module.sampled_images {
                match sampled_images
                    .iter_mut()
                    .find(|existing| existing.set == image.set && existing.binding == image.binding)
                {
                    Some(existing) => {
                        log::debug!(
                            "Dropping duplicate sampled image '{}' at set {} binding {} from {:?}",
                            image.name,
                            image.set,
                            image.binding,
                            module.stage
                        );
                        existing.stages |= stage_flags;
                    }
                    None => sampled_images.push(image.clone()),
                }
            }

            // Stages sharing one push block widen the first record; sizes
            // take the maximum so the range covers every stage's view.
            for block in &module.push_constants {
                match push_constants.first_mut() {
                    Some(existing) => {
                        existing.stages |= stage_flags;
                        existing.size = existing.size.max(block.size);
                    }
                    None => push_constants.push(block.clone()),
                }
            }
        }

        Self {
            inputs,
            outputs,
            uniform_blocks,
            sampled_images,
            push_constants,
        }
    }

    /// Push constant ranges for pipeline layout creation
    pub fn push_constant_ranges(&self) -> Vec<vk::PushConstantRange> {
        self.push_constants
            .iter()
            .map(|block| {
                vk::PushConstantRange::builder()
                    .stage_flags(block.stages)
                    .offset(0)
                    .size(block.size)
                    .build()
            })
            .collect()
    }

    /// Derive the tightly-packed vertex format from the merged inputs
    pub fn vertex_format(&self) -> VertexFormat {
        let mut sorted = self.inputs.clone();
        sorted.sort_by_key(|input| input.location);

        let mut attributes = Vec::with_capacity(sorted.len());
        let mut offset = 0;
        for input in sorted {
            let size = input.ty.byte_size();
            attributes.push(VertexAttribute {
                name: input.name,
                location: input.location,
                ty: input.ty,
                offset,
            });
            offset += size;
        }

        VertexFormat {
            attributes,
            stride: offset,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::render::vulkan::reflection::AttributeType;

    fn vertex_module(inputs: Vec<StageInput>) -> ReflectedModule {
        ReflectedModule {
            stage: ShaderStage::Vertex,
            inputs,
            outputs: vec![],
            uniform_blocks: vec![],
            sampled_images: vec![],
            push_constants: vec![],
        }
    }

    fn fragment_module(
        outputs: Vec<StageOutput>,
        uniform_blocks: Vec<UniformBlock>,
    ) -> ReflectedModule {
        ReflectedModule {
            stage: ShaderStage::Fragment,
            inputs: vec![],
            outputs,
            uniform_blocks,
            sampled_images: vec![],
            push_constants: vec![],
        }
    }

    fn input(name: &str, location: u32, ty: AttributeType) -> StageInput {
        StageInput {
            name: name.to_string(),
            location,
            ty,
        }
    }

    fn block(name: &str, set: u32, binding: u32, stage: ShaderStage) -> UniformBlock {
        UniformBlock {
            name: name.to_string(),
            set,
            binding,
            size: 64,
            members: vec![],
            stages: stage.to_vk(),
        }
    }

    #[test]
    fn vertex_format_round_trips_inputs_by_location() {
        // Declared out of location order; the format must re-sort them.
        let module = vertex_module(vec![
            input("normal", 1, AttributeType::Vec3),
            input("position", 0, AttributeType::Vec3),
            input("uv", 2, AttributeType::Vec2),
        ]);
        let interface = ReflectedInterface::merge(&[module.clone()]);
        let format = interface.vertex_format();

        let locations: Vec<u32> = format.attributes.iter().map(|a| a.location).collect();
        assert_eq!(locations, vec![0, 1, 2]);

        let mut sorted_inputs = module.inputs.clone();
        sorted_inputs.sort_by_key(|i| i.location);
        for (attr, input) in format.attributes.iter().zip(&sorted_inputs) {
            assert_eq!(attr.name, input.name);
            assert_eq!(attr.ty, input.ty);
        }

        assert_eq!(format.attributes[0].offset, 0);
        assert_eq!(format.attributes[1].offset, 12);
        assert_eq!(format.attributes[2].offset, 24);
        assert_eq!(format.stride, 32);
    }

    #[test]
    fn matrix_attribute_expands_to_per_column_descriptions() {
        let module = vertex_module(vec![
            input("position", 0, AttributeType::Vec3),
            input("model", 1, AttributeType::Mat4),
        ]);
        let format = ReflectedInterface::merge(&[module]).vertex_format();
        let descriptions = format.attribute_descriptions();

        assert_eq!(descriptions.len(), 5);
        let locations: Vec<u32> = descriptions.iter().map(|d| d.location).collect();
        assert_eq!(locations, vec![0, 1, 2, 3, 4]);
        assert_eq!(descriptions[1].offset, 12);
        assert_eq!(descriptions[2].offset, 28);
        assert_eq!(descriptions[4].offset, 60);
        assert_eq!(format.stride, 12 + 64);
    }

    #[test]
    fn outputs_taken_from_last_stage_reverse_first_wins() {
        let fragment = fragment_module(
            vec![
                StageOutput {
                    name: "early".to_string(),
                    location: 0,
                    ty: AttributeType::Vec4,
                },
                StageOutput {
                    name: "late".to_string(),
                    location: 0,
                    ty: AttributeType::Vec4,
                },
            ],
            vec![],
        );
        let interface = ReflectedInterface::merge(&[vertex_module(vec![]), fragment]);

        assert_eq!(interface.outputs.len(), 1);
        assert_eq!(interface.outputs[0].name, "late");
    }

    #[test]
    fn push_constants_merge_into_one_widened_range() {
        let mut vertex = vertex_module(vec![]);
        vertex.push_constants = vec![PushConstantBlock {
            name: "Transform".to_string(),
            size: 64,
            stages: ShaderStage::Vertex.to_vk(),
        }];
        let mut fragment = fragment_module(vec![], vec![]);
        fragment.push_constants = vec![PushConstantBlock {
            name: "Tint".to_string(),
            size: 80,
            stages: ShaderStage::Fragment.to_vk(),
        }];

        let interface = ReflectedInterface::merge(&[vertex, fragment]);
        let ranges = interface.push_constant_ranges();

        assert_eq!(ranges.len(), 1);
        assert_eq!(ranges[0].size, 80);
        assert!(ranges[0]
            .stage_flags
            .contains(vk::ShaderStageFlags::VERTEX | vk::ShaderStageFlags::FRAGMENT));
    }

    #[test]
    fn duplicate_blocks_keep_first_and_union_stages() {
        let mut vertex = vertex_module(vec![]);
        vertex.uniform_blocks = vec![block("SceneVs", 0, 0, ShaderStage::Vertex)];
        let fragment = fragment_module(vec![], vec![block("SceneFs", 0, 0, ShaderStage::Fragment)]);

        let interface = ReflectedInterface::merge(&[vertex, fragment]);

        assert_eq!(interface.uniform_blocks.len(), 1);
        let kept = &interface.uniform_blocks[0];
        assert_eq!(kept.name, "SceneVs");
        assert!(kept.stages.contains(vk::ShaderStageFlags::VERTEX));
        assert!(kept.stages.contains(vk::ShaderStageFlags::FRAGMENT));
    }
}
