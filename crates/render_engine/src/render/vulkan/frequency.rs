//! Binding-frequency classification
//!
//! Descriptor set indices carry meaning: each of the four sets corresponds
//! to one update frequency, and that tier decides how a binding is backed.
//! Per-object uniform blocks become dynamic uniform buffers sharing one
//! allocation; everything else is a statically-offset binding.

use ash::vk;

use crate::render::vulkan::interface::ReflectedInterface;
use crate::render::vulkan::reflection::BlockMember;
use crate::render::vulkan::{VulkanError, VulkanResult};

/// Binding update frequency, one per descriptor set index
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FrequencyTier {
    /// Set 0: camera, lighting, frame globals
    PerFrame,
    /// Set 1: pass-level data
    PerPass,
    /// Set 2: material constants and textures
    PerMaterial,
    /// Set 3: per-draw transforms, dynamically offset
    PerObject,
}

impl FrequencyTier {
    /// All tiers in set-index order
    pub const ALL: [FrequencyTier; 4] = [
        FrequencyTier::PerFrame,
        FrequencyTier::PerPass,
        FrequencyTier::PerMaterial,
        FrequencyTier::PerObject,
    ];

    /// Map a descriptor set index onto its tier
    pub fn from_set_index(set: u32) -> VulkanResult<Self> {
        match set {
            0 => Ok(FrequencyTier::PerFrame),
            1 => Ok(FrequencyTier::PerPass),
            2 => Ok(FrequencyTier::PerMaterial),
            3 => Ok(FrequencyTier::PerObject),
            _ => Err(VulkanError::SetIndexOutOfRange { set }),
        }
    }

    /// The descriptor set index this tier binds at
    pub fn set_index(self) -> u32 {
        match self {
            FrequencyTier::PerFrame => 0,
            FrequencyTier::PerPass => 1,
            FrequencyTier::PerMaterial => 2,
            FrequencyTier::PerObject => 3,
        }
    }
}

/// How a classified binding is backed on the descriptor side
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BindingKind {
    UniformBuffer,
    UniformBufferDynamic,
    CombinedImageSampler,
}

impl BindingKind {
    pub fn to_vk(self) -> vk::DescriptorType {
        match self {
            BindingKind::UniformBuffer => vk::DescriptorType::UNIFORM_BUFFER,
            BindingKind::UniformBufferDynamic => vk::DescriptorType::UNIFORM_BUFFER_DYNAMIC,
            BindingKind::CombinedImageSampler => vk::DescriptorType::COMBINED_IMAGE_SAMPLER,
        }
    }
}

/// A binding assigned to a tier, carrying what materials need to back it
#[derive(Debug, Clone)]
pub struct ClassifiedBinding {
    pub name: String,
    pub binding: u32,
    pub kind: BindingKind,
    /// Union of every stage that referenced the binding
    pub stages: vk::ShaderStageFlags,
    /// Declared block size; zero for image bindings
    pub size: u64,
    /// Block member layout; empty for image bindings
    pub members: Vec<BlockMember>,
}

/// Per-tier binding lists for one shader program
#[derive(Debug, Clone, Default)]
pub struct ClassifiedBindings {
    per_frame: Vec<ClassifiedBinding>,
    per_pass: Vec<ClassifiedBinding>,
    per_material: Vec<ClassifiedBinding>,
    per_object: Vec<ClassifiedBinding>,
}

impl ClassifiedBindings {
    /// Bindings for one tier, ordered by binding index
    pub fn tier(&self, tier: FrequencyTier) -> &[ClassifiedBinding] {
        match tier {
            FrequencyTier::PerFrame => &self.per_frame,
            FrequencyTier::PerPass => &self.per_pass,
            FrequencyTier::PerMaterial => &self.per_material,
            FrequencyTier::PerObject => &self.per_object,
        }
    }

    fn tier_mut(&mut self, tier: FrequencyTier) -> &mut Vec<ClassifiedBinding> {
        match tier {
            FrequencyTier::PerFrame => &mut self.per_frame,
            FrequencyTier::PerPass => &mut self.per_pass,
            FrequencyTier::PerMaterial => &mut self.per_material,
            FrequencyTier::PerObject => &mut self.per_object,
        }
    }
}

/// Assign every merged binding to its frequency tier
///
/// Uniform blocks in the per-object tier become dynamic so one buffer can
/// serve many draws through offsets; all other uniform blocks stay static.
/// Sampled images are combined image samplers regardless of tier.
pub fn classify(interface: &ReflectedInterface) -> VulkanResult<ClassifiedBindings> {
    let mut classified = ClassifiedBindings::default();

    for block in &interface.uniform_blocks {
        let tier = FrequencyTier::from_set_index(block.set)?;
        let kind = match tier {
            FrequencyTier::PerObject => BindingKind::UniformBufferDynamic,
            FrequencyTier::PerFrame | FrequencyTier::PerPass | FrequencyTier::PerMaterial => {
                BindingKind::UniformBuffer
            }
        };
        classified.tier_mut(tier).push(ClassifiedBinding {
            name: block.name.clone(),
            binding: block.binding,
            kind,
            stages: block.stages,
            size: block.size,
            members: block.members.clone(),
        });
    }

    for image in &interface.sampled_images {
        let tier = FrequencyTier::from_set_index(image.set)?;
        classified.tier_mut(tier).push(ClassifiedBinding {
            name: image.name.clone(),
            binding: image.binding,
            kind: BindingKind::CombinedImageSampler,
            stages: image.stages,
            size: 0,
            members: Vec::new(),
        });
    }

    for tier in FrequencyTier::ALL {
        classified.tier_mut(tier).sort_by_key(|b| b.binding);
    }

    Ok(classified)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::render::vulkan::reflection::{SampledImage, ShaderStage, UniformBlock};

    fn interface_with(
        blocks: Vec<UniformBlock>,
        images: Vec<SampledImage>,
    ) -> ReflectedInterface {
        ReflectedInterface {
            inputs: vec![],
            outputs: vec![],
            uniform_blocks: blocks,
            sampled_images: images,
            push_constants: vec![],
        }
    }

    fn ubo(set: u32, binding: u32) -> UniformBlock {
        UniformBlock {
            name: format!("Block{set}_{binding}"),
            set,
            binding,
            size: 128,
            members: vec![],
            stages: ShaderStage::Vertex.to_vk(),
        }
    }

    #[test]
    fn tier_round_trips_set_index() {
        for tier in FrequencyTier::ALL {
            assert_eq!(
                FrequencyTier::from_set_index(tier.set_index()).unwrap(),
                tier
            );
        }
    }

    #[test]
    fn only_per_object_ubos_are_dynamic() {
        let interface = interface_with(
            vec![ubo(0, 0), ubo(1, 0), ubo(2, 0), ubo(3, 0)],
            vec![],
        );
        let classified = classify(&interface).unwrap();

        assert_eq!(
            classified.tier(FrequencyTier::PerFrame)[0].kind,
            BindingKind::UniformBuffer
        );
        assert_eq!(
            classified.tier(FrequencyTier::PerPass)[0].kind,
            BindingKind::UniformBuffer
        );
        assert_eq!(
            classified.tier(FrequencyTier::PerMaterial)[0].kind,
            BindingKind::UniformBuffer
        );
        assert_eq!(
            classified.tier(FrequencyTier::PerObject)[0].kind,
            BindingKind::UniformBufferDynamic
        );
    }

    #[test]
    fn images_are_combined_samplers_in_every_tier() {
        let images = (0..4)
            .map(|set| SampledImage {
                name: format!("tex{set}"),
                set,
                binding: 1,
                stages: ShaderStage::Fragment.to_vk(),
            })
            .collect();
        let classified = classify(&interface_with(vec![], images)).unwrap();

        for tier in FrequencyTier::ALL {
            assert_eq!(
                classified.tier(tier)[0].kind,
                BindingKind::CombinedImageSampler
            );
        }
    }

    #[test]
    fn set_index_out_of_range_fails_classification() {
        let interface = interface_with(vec![ubo(7, 0)], vec![]);
        let err = classify(&interface).unwrap_err();
        assert!(matches!(err, VulkanError::SetIndexOutOfRange { set: 7 }));
    }

    #[test]
    fn tier_lists_are_ordered_by_binding() {
        let interface = interface_with(vec![ubo(0, 2), ubo(0, 0), ubo(0, 1)], vec![]);
        let classified = classify(&interface).unwrap();
        let bindings: Vec<u32> = classified
            .tier(FrequencyTier::PerFrame)
            .iter()
            .map(|b| b.binding)
            .collect();
        assert_eq!(bindings, vec![0, 1, 2]);
    }
}
