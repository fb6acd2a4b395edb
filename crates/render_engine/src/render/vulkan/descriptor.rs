//! Descriptor set layouts, pipeline layout, and the shared pool
//!
//! Layouts are built per frequency tier from the classified bindings. A
//! tier a shader never touches still gets an empty layout so set numbering
//! stays contiguous from 0 to 3.

use ash::{vk, Device};

use crate::render::vulkan::frequency::{ClassifiedBindings, FrequencyTier};
use crate::render::vulkan::{VulkanError, VulkanResult};

/// Builder for a single descriptor set layout
pub struct DescriptorSetLayoutBuilder {
    bindings: Vec<vk::DescriptorSetLayoutBinding>,
}

impl DescriptorSetLayoutBuilder {
    pub fn new() -> Self {
        Self {
            bindings: Vec::new(),
        }
    }

    /// Add a static uniform buffer binding
    pub fn add_uniform_buffer(mut self, binding: u32, stages: vk::ShaderStageFlags) -> Self {
        self.bindings.push(
            vk::DescriptorSetLayoutBinding::builder()
                .binding(binding)
                .descriptor_type(vk::DescriptorType::UNIFORM_BUFFER)
                .descriptor_count(1)
                .stage_flags(stages)
                .build(),
        );
        self
    }

    /// Add a dynamically-offset uniform buffer binding
    pub fn add_dynamic_uniform_buffer(
        mut self,
        binding: u32,
        stages: vk::ShaderStageFlags,
    ) -> Self {
        self.bindings.push(
            vk::DescriptorSetLayoutBinding::builder()
                .binding(binding)
                .descriptor_type(vk::DescriptorType::UNIFORM_BUFFER_DYNAMIC)
                .descriptor_count(1)
                .stage_flags(stages)
                .build(),
        );
        self
    }

    /// Add a combined image sampler binding
    pub fn add_combined_image_sampler(
        mut self,
        binding: u32,
        stages: vk::ShaderStageFlags,
    ) -> Self {
        self.bindings.push(
            vk::DescriptorSetLayoutBinding::builder()
                .binding(binding)
                .descriptor_type(vk::DescriptorType::COMBINED_IMAGE_SAMPLER)
                .descriptor_count(1)
                .stage_flags(stages)
                .build(),
        );
        self
    }

    /// Build the layout; an empty binding list yields a valid empty layout
    pub fn build(self, device: Device) -> VulkanResult<DescriptorSetLayout> {
        let create_info = vk::DescriptorSetLayoutCreateInfo::builder().bindings(&self.bindings);
        let handle = unsafe {
            device
                .create_descriptor_set_layout(&create_info, None)
                .map_err(VulkanError::Api)?
        };
        Ok(DescriptorSetLayout { device, handle })
    }
}

impl Default for DescriptorSetLayoutBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Descriptor set layout with RAII cleanup
pub struct DescriptorSetLayout {
    device: Device,
    handle: vk::DescriptorSetLayout,
}

impl DescriptorSetLayout {
    pub fn handle(&self) -> vk::DescriptorSetLayout {
        self.handle
    }
}

impl Drop for DescriptorSetLayout {
    fn drop(&mut self) {
        unsafe {
            self.device.destroy_descriptor_set_layout(self.handle, None);
        }
    }
}

/// The four per-tier set layouts of one shader program
pub struct ResourceLayouts {
    layouts: Vec<DescriptorSetLayout>,
}

impl ResourceLayouts {
    /// Build one layout per tier from the classified bindings, in tier order
    pub fn new(device: Device, classified: &ClassifiedBindings) -> VulkanResult<Self> {
        let mut layouts = Vec::with_capacity(FrequencyTier::ALL.len());
        for tier in FrequencyTier::ALL {
            let mut builder = DescriptorSetLayoutBuilder::new();
            for binding in classified.tier(tier) {
                builder = match binding.kind {
                    crate::render::vulkan::frequency::BindingKind::UniformBuffer => {
                        builder.add_uniform_buffer(binding.binding, binding.stages)
                    }
                    crate::render::vulkan::frequency::BindingKind::UniformBufferDynamic => {
                        builder.add_dynamic_uniform_buffer(binding.binding, binding.stages)
                    }
                    crate::render::vulkan::frequency::BindingKind::CombinedImageSampler => {
                        builder.add_combined_image_sampler(binding.binding, binding.stages)
                    }
                };
            }
            layouts.push(builder.build(device.clone())?);
        }
        Ok(Self { layouts })
    }

    /// Layout for one tier
    pub fn layout(&self, tier: FrequencyTier) -> &DescriptorSetLayout {
        &self.layouts[tier.set_index() as usize]
    }

    /// All layout handles in set-index order
    pub fn handles(&self) -> Vec<vk::DescriptorSetLayout> {
        self.layouts.iter().map(DescriptorSetLayout::handle).collect()
    }
}

/// Pipeline layout owning the per-tier set layouts
pub struct PipelineLayout {
    device: Device,
    handle: vk::PipelineLayout,
    layouts: ResourceLayouts,
}

impl PipelineLayout {
    pub fn new(
        device: Device,
        layouts: ResourceLayouts,
        push_constant_ranges: &[vk::PushConstantRange],
    ) -> VulkanResult<Self> {
        let handles = layouts.handles();
        let create_info = vk::PipelineLayoutCreateInfo::builder()
            .set_layouts(&handles)
            .push_constant_ranges(push_constant_ranges);
        let handle = unsafe {
            device
                .create_pipeline_layout(&create_info, None)
                .map_err(VulkanError::Api)?
        };
        Ok(Self {
            device,
            handle,
            layouts,
        })
    }

    pub fn handle(&self) -> vk::PipelineLayout {
        self.handle
    }

    pub fn resource_layouts(&self) -> &ResourceLayouts {
        &self.layouts
    }
}

impl Drop for PipelineLayout {
    fn drop(&mut self) {
        unsafe {
            self.device.destroy_pipeline_layout(self.handle, None);
        }
    }
}

/// Shared descriptor pool sized from the renderer config
///
/// Exhaustion means the configured material capacity was undersized, which
/// is a planning bug rather than a runtime condition, so allocation failure
/// is fatal.
pub struct DescriptorPool {
    device: Device,
    handle: vk::DescriptorPool,
}

impl DescriptorPool {
    pub fn new(device: Device, max_materials: u32) -> VulkanResult<Self> {
        // Each material can allocate one set per tier.
        let max_sets = max_materials * FrequencyTier::ALL.len() as u32;
        let pool_sizes = [
            vk::DescriptorPoolSize::builder()
                .ty(vk::DescriptorType::UNIFORM_BUFFER)
                .descriptor_count(max_sets)
                .build(),
            vk::DescriptorPoolSize::builder()
                .ty(vk::DescriptorType::UNIFORM_BUFFER_DYNAMIC)
                .descriptor_count(max_materials)
                .build(),
            vk::DescriptorPoolSize::builder()
                .ty(vk::DescriptorType::COMBINED_IMAGE_SAMPLER)
                .descriptor_count(max_sets)
                .build(),
        ];

        let create_info = vk::DescriptorPoolCreateInfo::builder()
            .flags(vk::DescriptorPoolCreateFlags::FREE_DESCRIPTOR_SET)
            .max_sets(max_sets)
            .pool_sizes(&pool_sizes);

        let handle = unsafe {
            device
                .create_descriptor_pool(&create_info, None)
                .map_err(VulkanError::Api)?
        };

        Ok(Self { device, handle })
    }

    /// Allocate one set per layout handle
    pub fn allocate(
        &self,
        layouts: &[vk::DescriptorSetLayout],
    ) -> VulkanResult<Vec<vk::DescriptorSet>> {
        let alloc_info = vk::DescriptorSetAllocateInfo::builder()
            .descriptor_pool(self.handle)
            .set_layouts(layouts);

        let result = unsafe { self.device.allocate_descriptor_sets(&alloc_info) };
        match result {
            Ok(sets) => Ok(sets),
            Err(vk::Result::ERROR_OUT_OF_POOL_MEMORY | vk::Result::ERROR_FRAGMENTED_POOL) => {
                Err(VulkanError::DescriptorPoolExhausted)
            }
            Err(e) => Err(VulkanError::Api(e)),
        }
    }
}

impl Drop for DescriptorPool {
    fn drop(&mut self) {
        unsafe {
            self.device.destroy_descriptor_pool(self.handle, None);
        }
    }
}

/// Batched descriptor writes against one set
pub struct DescriptorSetWriter {
    writes: Vec<vk::WriteDescriptorSet>,
    buffer_infos: Vec<Box<vk::DescriptorBufferInfo>>,
    image_infos: Vec<Box<vk::DescriptorImageInfo>>,
}

impl DescriptorSetWriter {
    pub fn new() -> Self {
        Self {
            writes: Vec::new(),
            buffer_infos: Vec::new(),
            image_infos: Vec::new(),
        }
    }

    /// Queue a buffer write
    ///
    /// `range` is the bound range, which for dynamic bindings is the element
    /// stride rather than the whole buffer.
    pub fn write_buffer(
        mut self,
        set: vk::DescriptorSet,
        binding: u32,
        descriptor_type: vk::DescriptorType,
        buffer: vk::Buffer,
        offset: vk::DeviceSize,
        range: vk::DeviceSize,
    ) -> Self {
        let info = Box::new(
            vk::DescriptorBufferInfo::builder()
                .buffer(buffer)
                .offset(offset)
                .range(range)
                .build(),
        );
        let write = vk::WriteDescriptorSet::builder()
            .dst_set(set)
            .dst_binding(binding)
            .descriptor_type(descriptor_type)
            .buffer_info(std::slice::from_ref(info.as_ref()))
            .build();
        self.buffer_infos.push(info);
        self.writes.push(write);
        self
    }

    /// Queue a combined image sampler write
    pub fn write_image(
        mut self,
        set: vk::DescriptorSet,
        binding: u32,
        view: vk::ImageView,
        sampler: vk::Sampler,
    ) -> Self {
        let info = Box::new(
            vk::DescriptorImageInfo::builder()
                .image_layout(vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL)
                .image_view(view)
                .sampler(sampler)
                .build(),
        );
        let write = vk::WriteDescriptorSet::builder()
            .dst_set(set)
            .dst_binding(binding)
            .descriptor_type(vk::DescriptorType::COMBINED_IMAGE_SAMPLER)
            .image_info(std::slice::from_ref(info.as_ref()))
            .build();
        self.image_infos.push(info);
        self.writes.push(write);
        self
    }

    /// Flush all queued writes
    pub fn update(self, device: &Device) {
        if !self.writes.is_empty() {
            unsafe {
                device.update_descriptor_sets(&self.writes, &[]);
            }
        }
    }
}

impl Default for DescriptorSetWriter {
    fn default() -> Self {
        Self::new()
    }
}
