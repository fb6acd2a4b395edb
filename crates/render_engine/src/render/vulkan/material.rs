//! Material binding
//!
//! A material owns one descriptor set per frequency tier, allocated from
//! the shared pool, plus the host-visible uniform buffers backing every
//! reflected block. Per-object blocks share a single dynamically-offset
//! buffer sized by the draw count; all other blocks get one buffer each.

use std::collections::HashMap;

use ash::{vk, Device, Instance};

use crate::render::vulkan::buffer::Buffer;
use crate::render::vulkan::descriptor::{DescriptorPool, DescriptorSetWriter, ResourceLayouts};
use crate::render::vulkan::frequency::{BindingKind, ClassifiedBindings, FrequencyTier};
use crate::render::vulkan::texture::Texture;
use crate::render::vulkan::{VulkanError, VulkanResult};

/// Round `value` up to the next multiple of `alignment`
///
/// An alignment of zero means the device imposes no alignment.
fn align_up(value: u64, alignment: u64) -> u64 {
    if alignment == 0 {
        value
    } else {
        value.div_ceil(alignment) * alignment
    }
}

/// Stride and offset math for a dynamically-offset uniform buffer
///
/// Pure data so the alignment rules are checkable without a device. One
/// element per draw, each at `index * stride`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DynamicBufferLayout {
    element_size: u64,
    alignment: u64,
}

impl DynamicBufferLayout {
    pub fn new(element_size: u64, alignment: u64) -> Self {
        Self {
            element_size,
            alignment,
        }
    }

    /// Declared size of one element
    pub fn element_size(&self) -> u64 {
        self.element_size
    }

    /// Spacing between consecutive elements
    pub fn stride(&self) -> u64 {
        align_up(self.element_size, self.alignment)
    }

    /// Byte offset of the element for draw `index`
    pub fn offset_for(&self, index: u32) -> u64 {
        u64::from(index) * self.stride()
    }

    /// Buffer capacity needed for `draw_count` elements
    pub fn capacity_for(&self, draw_count: u32) -> u64 {
        u64::from(draw_count) * self.stride()
    }

    /// Whether a buffer of `current_capacity` must grow for `draw_count`
    pub fn needs_grow(&self, current_capacity: u64, draw_count: u32) -> bool {
        self.capacity_for(draw_count) > current_capacity
    }
}

/// A per-object block backed by the shared dynamic buffer
struct DynamicSlot {
    binding: u32,
    layout: DynamicBufferLayout,
    buffer: Option<Buffer>,
    draw_count: u32,
}

/// Static block storage for one (tier, binding)
struct StaticSlot {
    size: u64,
    buffer: Buffer,
}

/// A shader-driven material instance
pub struct Material {
    device: Device,
    /// One descriptor set per tier, indexed by set index
    sets: Vec<vk::DescriptorSet>,
    static_slots: HashMap<(FrequencyTier, u32), StaticSlot>,
    /// Per-object dynamic blocks in binding order
    dynamic_slots: Vec<DynamicSlot>,
}

impl Material {
    /// Allocate descriptor sets and backing storage for a pipeline's bindings
    ///
    /// `texture` backs any sampled-image binding; a shader that samples a
    /// texture requires one (the renderer substitutes a placeholder when the
    /// caller registered none).
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        device: Device,
        instance: &Instance,
        physical_device: vk::PhysicalDevice,
        descriptor_pool: &DescriptorPool,
        layouts: &ResourceLayouts,
        bindings: &ClassifiedBindings,
        min_uniform_offset_alignment: u64,
        texture: Option<&Texture>,
    ) -> VulkanResult<Self> {
        let sets = descriptor_pool.allocate(&layouts.handles())?;

        let mut static_slots = HashMap::new();
        let mut dynamic_slots = Vec::new();
        let mut writer = DescriptorSetWriter::new();

        for tier in FrequencyTier::ALL {
            let set = sets[tier.set_index() as usize];
            for binding in bindings.tier(tier) {
                match binding.kind {
                    BindingKind::UniformBuffer => {
                        let buffer = Buffer::new_host_visible(
                            device.clone(),
                            instance,
                            physical_device,
                            binding.size,
                            vk::BufferUsageFlags::UNIFORM_BUFFER,
                        )?;
                        writer = writer.write_buffer(
                            set,
                            binding.binding,
                            vk::DescriptorType::UNIFORM_BUFFER,
                            buffer.handle(),
                            0,
                            binding.size,
                        );
                        static_slots.insert(
                            (tier, binding.binding),
                            StaticSlot {
                                size: binding.size,
                                buffer,
                            },
                        );
                    }
                    BindingKind::UniformBufferDynamic => {
                        // Storage is sized on the first set_draw_count call.
                        dynamic_slots.push(DynamicSlot {
                            binding: binding.binding,
                            layout: DynamicBufferLayout::new(
                                binding.size,
                                min_uniform_offset_alignment,
                            ),
                            buffer: None,
                            draw_count: 0,
                        });
                    }
                    BindingKind::CombinedImageSampler => {
                        let texture = texture.ok_or_else(|| VulkanError::InvalidOperation {
                            reason: format!(
                                "Binding '{}' samples a texture but none was provided",
                                binding.name
                            ),
                        })?;
                        writer = writer.write_image(
                            set,
                            binding.binding,
                            texture.view(),
                            texture.sampler(),
                        );
                    }
                }
            }
        }

        writer.update(&device);

        Ok(Self {
            device,
            sets,
            static_slots,
            dynamic_slots,
        })
    }

    /// Descriptor sets in set-index order
    pub fn sets(&self) -> &[vk::DescriptorSet] {
        &self.sets
    }

    /// Write uniform data for one binding
    ///
    /// Static tiers take the whole block at offset zero. The per-object tier
    /// takes one element at a stride-aligned offset produced by
    /// `DynamicBufferLayout::offset_for`.
    pub fn write(
        &mut self,
        tier: FrequencyTier,
        binding: u32,
        bytes: &[u8],
        offset: u64,
    ) -> VulkanResult<()> {
        match tier {
            FrequencyTier::PerFrame | FrequencyTier::PerPass | FrequencyTier::PerMaterial => {
                if offset != 0 {
                    return Err(VulkanError::InvalidOperation {
                        reason: format!(
                            "Nonzero offset {offset} into statically-bound {tier:?} binding {binding}"
                        ),
                    });
                }
                let slot = self.static_slots.get(&(tier, binding)).ok_or_else(|| {
                    VulkanError::InvalidOperation {
                        reason: format!("No uniform block at {tier:?} binding {binding}"),
                    }
                })?;
                if bytes.len() as u64 != slot.size {
                    return Err(VulkanError::SizeMismatch {
                        expected: slot.size,
                        actual: bytes.len() as u64,
                    });
                }
                slot.buffer.write_bytes_at(0, bytes)
            }
            FrequencyTier::PerObject => {
                let slot = self
                    .dynamic_slots
                    .iter()
                    .find(|slot| slot.binding == binding)
                    .ok_or_else(|| VulkanError::InvalidOperation {
                        reason: format!("No dynamic uniform block at binding {binding}"),
                    })?;
                if bytes.len() as u64 != slot.layout.element_size() {
                    return Err(VulkanError::SizeMismatch {
                        expected: slot.layout.element_size(),
                        actual: bytes.len() as u64,
                    });
                }
                if offset % slot.layout.stride() != 0 {
                    return Err(VulkanError::InvalidOperation {
                        reason: format!(
                            "Offset {offset} is not a multiple of the element stride {}",
                            slot.layout.stride()
                        ),
                    });
                }
                let buffer = slot.buffer.as_ref().ok_or_else(|| {
                    VulkanError::InvalidOperation {
                        reason: "set_draw_count must run before per-object writes".to_string(),
                    }
                })?;
                buffer.write_bytes_at(offset, bytes)
            }
        }
    }

    /// Size the per-object storage for `draw_count` draws
    ///
    /// Grows the shared buffer and rewrites its descriptor only when the
    /// current capacity is insufficient; a repeat call with the same count
    /// neither reallocates nor rebinds.
    pub fn set_draw_count(
        &mut self,
        instance: &Instance,
        physical_device: vk::PhysicalDevice,
        draw_count: u32,
    ) -> VulkanResult<()> {
        let set = self.sets[FrequencyTier::PerObject.set_index() as usize];

        let mut writer = DescriptorSetWriter::new();
        let mut rebind = false;
        for slot in &mut self.dynamic_slots {
            let current = slot.buffer.as_ref().map_or(0, Buffer::size);
            if slot.buffer.is_some() && !slot.layout.needs_grow(current, draw_count) {
                slot.draw_count = draw_count;
                continue;
            }

            let buffer = Buffer::new_host_visible(
                self.device.clone(),
                instance,
                physical_device,
                slot.layout.capacity_for(draw_count).max(slot.layout.stride()),
                vk::BufferUsageFlags::UNIFORM_BUFFER,
            )?;
            writer = writer.write_buffer(
                set,
                slot.binding,
                vk::DescriptorType::UNIFORM_BUFFER_DYNAMIC,
                buffer.handle(),
                0,
                slot.layout.element_size(),
            );
            slot.buffer = Some(buffer);
            slot.draw_count = draw_count;
            rebind = true;
        }

        if rebind {
            writer.update(&self.device);
        }
        Ok(())
    }

    /// Dynamic offsets for draw `index`, one per dynamic binding in
    /// binding order
    pub fn dynamic_offsets(&self, index: u32) -> VulkanResult<Vec<u32>> {
        self.dynamic_slots
            .iter()
            .map(|slot| {
                if index >= slot.draw_count {
                    return Err(VulkanError::InvalidOperation {
                        reason: format!(
                            "Draw index {index} exceeds the sized draw count {}",
                            slot.draw_count
                        ),
                    });
                }
                Ok(slot.layout.offset_for(index) as u32)
            })
            .collect()
    }

    /// Stride-aligned write offset for draw `index` at a dynamic binding
    pub fn write_offset(&self, binding: u32, index: u32) -> VulkanResult<u64> {
        let slot = self
            .dynamic_slots
            .iter()
            .find(|slot| slot.binding == binding)
            .ok_or_else(|| VulkanError::InvalidOperation {
                reason: format!("No dynamic uniform block at binding {binding}"),
            })?;
        Ok(slot.layout.offset_for(index))
    }

    /// Whether the material carries any per-object storage
    pub fn has_dynamic_bindings(&self) -> bool {
        !self.dynamic_slots.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stride_rounds_up_to_alignment() {
        let layout = DynamicBufferLayout::new(72, 64);
        assert_eq!(layout.stride(), 128);

        let exact = DynamicBufferLayout::new(128, 64);
        assert_eq!(exact.stride(), 128);

        let unaligned_device = DynamicBufferLayout::new(72, 0);
        assert_eq!(unaligned_device.stride(), 72);
    }

    #[test]
    fn offsets_step_by_stride() {
        // Three draws land at 0, stride, 2 * stride.
        let layout = DynamicBufferLayout::new(72, 64);
        let offsets: Vec<u64> = (0..3).map(|i| layout.offset_for(i)).collect();
        assert_eq!(offsets, vec![0, 128, 256]);
    }

    #[test]
    fn capacity_covers_every_element() {
        let layout = DynamicBufferLayout::new(80, 256);
        assert_eq!(layout.capacity_for(10), 2560);
        assert_eq!(layout.offset_for(9) + layout.stride(), layout.capacity_for(10));
    }

    #[test]
    fn repeat_draw_count_does_not_grow() {
        let layout = DynamicBufferLayout::new(64, 64);
        let capacity = layout.capacity_for(8);
        assert!(layout.needs_grow(0, 8));
        assert!(!layout.needs_grow(capacity, 8));
        assert!(!layout.needs_grow(capacity, 4));
        assert!(layout.needs_grow(capacity, 9));
    }
}
