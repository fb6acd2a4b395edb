//! Graphics pipeline construction
//!
//! A pipeline is built entirely from reflection output: the vertex input
//! state comes from the merged vertex format and the layout from the
//! classified bindings. Fixed-function policy is uniform across pipelines:
//! triangle lists, back-face culling with counter-clockwise front faces,
//! LESS depth test with writes, and standard alpha blending. Viewport and
//! scissor are dynamic so swapchain rebuilds never touch pipelines; the
//! viewport recorded each frame is Y-flipped for a top-left origin.

use std::ffi::CString;

use ash::{vk, Device};

use crate::render::vulkan::descriptor::PipelineLayout;
use crate::render::vulkan::frequency::ClassifiedBindings;
use crate::render::vulkan::interface::ReflectedInterface;
use crate::render::vulkan::reflection::ShaderStage;
use crate::render::vulkan::{VulkanError, VulkanResult};

/// Shader module with RAII cleanup
pub struct ShaderModule {
    device: Device,
    handle: vk::ShaderModule,
    stage: ShaderStage,
}

impl ShaderModule {
    /// Create a module from SPIR-V words
    pub fn new(device: Device, stage: ShaderStage, words: &[u32]) -> VulkanResult<Self> {
        let create_info = vk::ShaderModuleCreateInfo::builder().code(words);
        let handle = unsafe {
            device
                .create_shader_module(&create_info, None)
                .map_err(VulkanError::Api)?
        };
        Ok(Self {
            device,
            handle,
            stage,
        })
    }

    pub fn handle(&self) -> vk::ShaderModule {
        self.handle
    }

    pub fn stage(&self) -> ShaderStage {
        self.stage
    }
}

impl Drop for ShaderModule {
    fn drop(&mut self) {
        unsafe {
            self.device.destroy_shader_module(self.handle, None);
        }
    }
}

/// Graphics pipeline owning its layout and reflected interface
pub struct Pipeline {
    device: Device,
    handle: vk::Pipeline,
    layout: PipelineLayout,
    interface: ReflectedInterface,
    bindings: ClassifiedBindings,
}

impl Pipeline {
    /// Assemble a graphics pipeline from reflected shader stages
    pub fn new(
        device: Device,
        render_pass: vk::RenderPass,
        modules: &[ShaderModule],
        layout: PipelineLayout,
        interface: ReflectedInterface,
        bindings: ClassifiedBindings,
    ) -> VulkanResult<Self> {
        let entry_name = CString::new("main").map_err(|_| {
            VulkanError::InitializationFailed("Entry point name contains NUL".into())
        })?;

        let stages: Vec<vk::PipelineShaderStageCreateInfo> = modules
            .iter()
            .map(|module| {
                vk::PipelineShaderStageCreateInfo::builder()
                    .stage(module.stage().to_vk())
                    .module(module.handle())
                    .name(&entry_name)
                    .build()
            })
            .collect();

        let vertex_format = interface.vertex_format();
        let binding_descriptions = [vertex_format.binding_description()];
        let attribute_descriptions = vertex_format.attribute_descriptions();
        let vertex_input = if vertex_format.attributes.is_empty() {
            vk::PipelineVertexInputStateCreateInfo::builder()
        } else {
            vk::PipelineVertexInputStateCreateInfo::builder()
                .vertex_binding_descriptions(&binding_descriptions)
                .vertex_attribute_descriptions(&attribute_descriptions)
        };

        let input_assembly = vk::PipelineInputAssemblyStateCreateInfo::builder()
            .topology(vk::PrimitiveTopology::TRIANGLE_LIST)
            .primitive_restart_enable(false);

        // Viewport and scissor are dynamic; only counts matter here.
        let viewport_state = vk::PipelineViewportStateCreateInfo::builder()
            .viewport_count(1)
            .scissor_count(1);

        let rasterizer = vk::PipelineRasterizationStateCreateInfo::builder()
            .depth_clamp_enable(false)
            .rasterizer_discard_enable(false)
            .polygon_mode(vk::PolygonMode::FILL)
            .line_width(1.0)
            .cull_mode(vk::CullModeFlags::BACK)
            .front_face(vk::FrontFace::COUNTER_CLOCKWISE)
            .depth_bias_enable(false);

        let multisampling = vk::PipelineMultisampleStateCreateInfo::builder()
            .sample_shading_enable(false)
            .rasterization_samples(vk::SampleCountFlags::TYPE_1);

        let depth_stencil = vk::PipelineDepthStencilStateCreateInfo::builder()
            .depth_test_enable(true)
            .depth_write_enable(true)
            .depth_compare_op(vk::CompareOp::LESS)
            .depth_bounds_test_enable(false)
            .stencil_test_enable(false);

        let color_blend_attachment = vk::PipelineColorBlendAttachmentState::builder()
            .color_write_mask(vk::ColorComponentFlags::RGBA)
            .blend_enable(true)
            .src_color_blend_factor(vk::BlendFactor::SRC_ALPHA)
            .dst_color_blend_factor(vk::BlendFactor::ONE_MINUS_SRC_ALPHA)
            .color_blend_op(vk::BlendOp::ADD)
            .src_alpha_blend_factor(vk::BlendFactor::ONE)
            .dst_alpha_blend_factor(vk::BlendFactor::ZERO)
            .alpha_blend_op(vk::BlendOp::ADD)
            .build();

        let attachments = [color_blend_attachment];
        let color_blending =
            vk::PipelineColorBlendStateCreateInfo::builder().attachments(&attachments);

        let dynamic_states = [vk::DynamicState::VIEWPORT, vk::DynamicState::SCISSOR];
        let dynamic_state =
            vk::PipelineDynamicStateCreateInfo::builder().dynamic_states(&dynamic_states);

        let create_info = vk::GraphicsPipelineCreateInfo::builder()
            .stages(&stages)
            .vertex_input_state(&vertex_input)
            .input_assembly_state(&input_assembly)
            .viewport_state(&viewport_state)
            .rasterization_state(&rasterizer)
            .multisample_state(&multisampling)
            .depth_stencil_state(&depth_stencil)
            .color_blend_state(&color_blending)
            .dynamic_state(&dynamic_state)
            .layout(layout.handle())
            .render_pass(render_pass)
            .subpass(0)
            .build();

        let handle = unsafe {
            device
                .create_graphics_pipelines(vk::PipelineCache::null(), &[create_info], None)
                .map_err(|(_, e)| VulkanError::Api(e))?[0]
        };

        log::debug!(
            "Pipeline created: {} vertex attributes, stride {}",
            vertex_format.attributes.len(),
            vertex_format.stride
        );

        Ok(Self {
            device,
            handle,
            layout,
            interface,
            bindings,
        })
    }

    pub fn handle(&self) -> vk::Pipeline {
        self.handle
    }

    pub fn layout(&self) -> &PipelineLayout {
        &self.layout
    }

    pub fn interface(&self) -> &ReflectedInterface {
        &self.interface
    }

    pub fn bindings(&self) -> &ClassifiedBindings {
        &self.bindings
    }
}

impl Drop for Pipeline {
    fn drop(&mut self) {
        unsafe {
            self.device.destroy_pipeline(self.handle, None);
        }
    }
}

/// Viewport covering the full extent, flipped so Y points down
///
/// Negative height with the origin at the bottom edge gives a top-left
/// origin without baking the extent into the pipeline.
pub fn flipped_viewport(extent: vk::Extent2D) -> vk::Viewport {
    vk::Viewport {
        x: 0.0,
        y: extent.height as f32,
        width: extent.width as f32,
        height: -(extent.height as f32),
        min_depth: 0.0,
        max_depth: 1.0,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flipped_viewport_has_negative_height_and_bottom_origin() {
        let viewport = flipped_viewport(vk::Extent2D {
            width: 800,
            height: 600,
        });
        assert_eq!(viewport.y, 600.0);
        assert_eq!(viewport.height, -600.0);
        assert_eq!(viewport.width, 800.0);
    }
}
