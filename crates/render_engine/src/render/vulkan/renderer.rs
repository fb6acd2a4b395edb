//! Vulkan renderer facade
//!
//! Ties the backend together behind `RenderBackend`: reflection-driven
//! pipeline registration, material and mesh registries, draw submission,
//! and the per-frame record/submit/present sequence. Resources live in
//! slotmaps so handles stay cheap to copy and stale handles fail lookup.

use slotmap::SlotMap;

use ash::vk;

use crate::config::RendererConfig;
use crate::foundation::math::Mat4;
use crate::render::api::{
    DrawSubmission, MaterialHandle, MeshHandle, PipelineHandle, RenderBackend, TextureHandle,
};
use crate::render::mesh::MeshData;
use crate::render::vulkan::buffer::{IndexBuffer, VertexBuffer};
use crate::render::vulkan::commands::CommandPool;
use crate::render::vulkan::descriptor::{DescriptorPool, PipelineLayout, ResourceLayouts};
use crate::render::vulkan::frame::{AcquiredFrame, FrameScheduler};
use crate::render::vulkan::framebuffer::{DepthBuffer, Framebuffer};
use crate::render::vulkan::frequency::{classify, FrequencyTier};
use crate::render::vulkan::interface::ReflectedInterface;
use crate::render::vulkan::material::Material;
use crate::render::vulkan::pipeline::{flipped_viewport, Pipeline, ShaderModule};
use crate::render::vulkan::reflection::{reflect, ShaderStageBinary};
use crate::render::vulkan::render_pass::RenderPass;
use crate::render::vulkan::texture::Texture;
use crate::render::vulkan::{VulkanContext, VulkanError, VulkanResult};
use crate::render::window::Window;
use crate::render::{RenderError, RenderResult};

struct MaterialEntry {
    material: Material,
    pipeline: PipelineHandle,
}

struct MeshEntry {
    vertex: VertexBuffer,
    index: Option<IndexBuffer>,
}

/// Per-material draw-index assignment
///
/// The uniform-write pass and the record pass both walk the pending draws
/// in order; sharing one cursor keeps the offset written and the offset
/// bound in agreement.
struct DrawIndexCursor<K> {
    cursors: Vec<(K, u32)>,
}

impl<K: Copy + PartialEq> DrawIndexCursor<K> {
    fn new() -> Self {
        Self {
            cursors: Vec::new(),
        }
    }

    /// Next draw index for `key`, counting from 0 per key
    fn next(&mut self, key: K) -> u32 {
        match self.cursors.iter_mut().find(|(k, _)| *k == key) {
            Some((_, cursor)) => {
                let index = *cursor;
                *cursor += 1;
                index
            }
            None => {
                self.cursors.push((key, 1));
                0
            }
        }
    }
}

/// Tracks the bound material so static sets rebind only on a switch
struct MaterialBindTracker<K> {
    bound: Option<K>,
}

impl<K: Copy + PartialEq> MaterialBindTracker<K> {
    fn new() -> Self {
        Self { bound: None }
    }

    /// Returns true when `key` is not the bound material and a bind is due
    fn switch_to(&mut self, key: K) -> bool {
        if self.bound == Some(key) {
            return false;
        }
        self.bound = Some(key);
        true
    }
}

/// The Vulkan implementation of `RenderBackend`
pub struct VulkanRenderer {
    ctx: VulkanContext,
    render_pass: RenderPass,
    depth_buffer: DepthBuffer,
    framebuffers: Vec<Framebuffer>,
    command_pool: CommandPool,
    descriptor_pool: DescriptorPool,
    scheduler: FrameScheduler,
    placeholder_texture: Texture,

    pipelines: SlotMap<PipelineHandle, Pipeline>,
    materials: SlotMap<MaterialHandle, MaterialEntry>,
    meshes: SlotMap<MeshHandle, MeshEntry>,
    textures: SlotMap<TextureHandle, Texture>,

    pending_draws: Vec<DrawSubmission>,
    in_flight: Option<AcquiredFrame>,
    clear_color: [f32; 4],
}

impl VulkanRenderer {
    /// Bring up the backend against a window
    pub fn new(window: &mut Window, config: &RendererConfig) -> VulkanResult<Self> {
        let ctx = VulkanContext::new(window, config)?;
        let device = ctx.raw_device();

        let render_pass = RenderPass::new(device.clone(), ctx.swapchain().format())?;
        let depth_buffer = DepthBuffer::new(
            device.clone(),
            ctx.instance(),
            ctx.physical_device().device,
            ctx.swapchain().extent(),
        )?;
        let framebuffers = Self::build_framebuffers(&ctx, &render_pass, &depth_buffer)?;

        let command_pool = CommandPool::new(device.clone(), ctx.graphics_queue_family())?;
        let descriptor_pool = DescriptorPool::new(device, config.max_materials)?;
        let scheduler = FrameScheduler::new(&ctx, &command_pool, config.frames_in_flight)?;

        let placeholder_texture = Texture::white_placeholder(
            ctx.raw_device(),
            ctx.instance(),
            ctx.physical_device().device,
            &command_pool,
            ctx.graphics_queue(),
        )?;

        log::info!(
            "Vulkan renderer ready: {} frames in flight, {} material capacity",
            config.frames_in_flight,
            config.max_materials
        );

        Ok(Self {
            ctx,
            render_pass,
            depth_buffer,
            framebuffers,
            command_pool,
            descriptor_pool,
            scheduler,
            placeholder_texture,
            pipelines: SlotMap::with_key(),
            materials: SlotMap::with_key(),
            meshes: SlotMap::with_key(),
            textures: SlotMap::with_key(),
            pending_draws: Vec::new(),
            in_flight: None,
            clear_color: config.clear_color,
        })
    }

    fn build_framebuffers(
        ctx: &VulkanContext,
        render_pass: &RenderPass,
        depth_buffer: &DepthBuffer,
    ) -> VulkanResult<Vec<Framebuffer>> {
        ctx.swapchain()
            .image_views()
            .iter()
            .map(|&view| {
                Framebuffer::new(
                    ctx.raw_device(),
                    render_pass.handle(),
                    view,
                    depth_buffer.view(),
                    ctx.swapchain().extent(),
                )
            })
            .collect()
    }

    /// Rebuild the swapchain, depth buffer, and framebuffers in place
    ///
    /// Pipelines survive: viewport and scissor are dynamic, so only the
    /// extent-sized resources need replacing.
    fn rebuild_swapchain(&mut self) -> VulkanResult<()> {
        let desired = self.ctx.swapchain().extent();
        self.framebuffers.clear();
        self.ctx.recreate_swapchain(desired)?;

        self.depth_buffer = DepthBuffer::new(
            self.ctx.raw_device(),
            self.ctx.instance(),
            self.ctx.physical_device().device,
            self.ctx.swapchain().extent(),
        )?;
        self.framebuffers =
            Self::build_framebuffers(&self.ctx, &self.render_pass, &self.depth_buffer)?;

        log::debug!(
            "Swapchain rebuilt at {}x{}",
            self.ctx.swapchain().extent().width,
            self.ctx.swapchain().extent().height
        );
        Ok(())
    }

    /// Write per-material uniform data outside the per-frame path
    pub fn write_material_uniform(
        &mut self,
        material: MaterialHandle,
        tier: FrequencyTier,
        binding: u32,
        bytes: &[u8],
    ) -> RenderResult<()> {
        let entry = self
            .materials
            .get_mut(material)
            .ok_or(RenderError::UnknownHandle { kind: "material" })?;
        entry.material.write(tier, binding, bytes, 0)?;
        Ok(())
    }

    /// Size the per-draw uniforms and write each draw's transform
    fn prepare_draw_uniforms(&mut self, view_projection: &Mat4) -> VulkanResult<()> {
        // Draw counts per material, in first-submission order.
        let mut counts: Vec<(MaterialHandle, u32)> = Vec::new();
        for draw in &self.pending_draws {
            match counts.iter_mut().find(|(handle, _)| *handle == draw.material) {
                Some((_, count)) => *count += 1,
                None => counts.push((draw.material, 1)),
            }
        }

        for &(handle, count) in &counts {
            let entry = self
                .materials
                .get_mut(handle)
                .ok_or(VulkanError::InvalidOperation {
                    reason: "Draw submitted with a stale material handle".to_string(),
                })?;
            entry.material.set_draw_count(
                self.ctx.instance(),
                self.ctx.physical_device().device,
                count,
            )?;

            // Per-frame globals: the view-projection matrix.
            let pipeline = self
                .pipelines
                .get(entry.pipeline)
                .ok_or(VulkanError::InvalidOperation {
                    reason: "Material references a dropped pipeline".to_string(),
                })?;
            for binding in pipeline
                .bindings()
                .tier(FrequencyTier::PerFrame)
                .iter()
                .filter(|b| b.size == std::mem::size_of::<Mat4>() as u64)
            {
                let bytes: &[u8] = bytemuck::cast_slice(view_projection.as_slice());
                entry
                    .material
                    .write(FrequencyTier::PerFrame, binding.binding, bytes, 0)?;
            }
        }

        // Per-object elements: the model transform per draw.
        let mut cursors = DrawIndexCursor::new();
        for draw in &self.pending_draws {
            let index = cursors.next(draw.material);

            let entry = self
                .materials
                .get_mut(draw.material)
                .ok_or(VulkanError::InvalidOperation {
                    reason: "Draw submitted with a stale material handle".to_string(),
                })?;
            if !entry.material.has_dynamic_bindings() {
                continue;
            }

            let pipeline = self
                .pipelines
                .get(entry.pipeline)
                .ok_or(VulkanError::InvalidOperation {
                    reason: "Material references a dropped pipeline".to_string(),
                })?;
            let bindings: Vec<u32> = pipeline
                .bindings()
                .tier(FrequencyTier::PerObject)
                .iter()
                .filter(|b| b.size == std::mem::size_of::<Mat4>() as u64)
                .map(|b| b.binding)
                .collect();
            for binding in bindings {
                let offset = entry.material.write_offset(binding, index)?;
                let bytes: &[u8] = bytemuck::cast_slice(draw.transform.as_slice());
                entry
                    .material
                    .write(FrequencyTier::PerObject, binding, bytes, offset)?;
            }
        }

        Ok(())
    }

    fn record_frame(&mut self, frame: &AcquiredFrame) -> VulkanResult<vk::CommandBuffer> {
        let extent = self.ctx.swapchain().extent();
        let mut recorder = self.scheduler.recorder(&self.ctx, frame)?;

        let clear_values = [
            vk::ClearValue {
                color: vk::ClearColorValue {
                    float32: self.clear_color,
                },
            },
            vk::ClearValue {
                depth_stencil: vk::ClearDepthStencilValue {
                    depth: 1.0,
                    stencil: 0,
                },
            },
        ];

        {
            let mut pass = recorder.begin_render_pass(
                self.render_pass.handle(),
                self.framebuffers[frame.image_index as usize].handle(),
                vk::Rect2D {
                    offset: vk::Offset2D { x: 0, y: 0 },
                    extent,
                },
                &clear_values,
            )?;

            pass.set_viewport(&flipped_viewport(extent));
            pass.set_scissor(&vk::Rect2D {
                offset: vk::Offset2D { x: 0, y: 0 },
                extent,
            });

            let mut draw_cursors = DrawIndexCursor::new();
            let mut bound_material = MaterialBindTracker::new();

            for draw in &self.pending_draws {
                let entry = self
                    .materials
                    .get(draw.material)
                    .ok_or(VulkanError::InvalidOperation {
                        reason: "Draw submitted with a stale material handle".to_string(),
                    })?;
                let pipeline = self
                    .pipelines
                    .get(entry.pipeline)
                    .ok_or(VulkanError::InvalidOperation {
                        reason: "Material references a dropped pipeline".to_string(),
                    })?;
                let mesh = self
                    .meshes
                    .get(draw.mesh)
                    .ok_or(VulkanError::InvalidOperation {
                        reason: "Draw submitted with a stale mesh handle".to_string(),
                    })?;

                // Static tiers bind once per material switch.
                if bound_material.switch_to(draw.material) {
                    pass.bind_pipeline(pipeline.handle());
                    pass.bind_descriptor_sets(
                        pipeline.layout().handle(),
                        0,
                        &entry.material.sets()[..3],
                        &[],
                    );
                }

                let index = draw_cursors.next(draw.material);

                // The layout declares set 3 whenever the per-object tier has
                // any binding, images included, so the bind cannot hinge on
                // dynamic blocks existing.
                if !pipeline
                    .bindings()
                    .tier(FrequencyTier::PerObject)
                    .is_empty()
                {
                    let offsets = if entry.material.has_dynamic_bindings() {
                        entry.material.dynamic_offsets(index)?
                    } else {
                        Vec::new()
                    };
                    pass.bind_descriptor_sets(
                        pipeline.layout().handle(),
                        FrequencyTier::PerObject.set_index(),
                        &entry.material.sets()[3..],
                        &offsets,
                    );
                }

                pass.bind_vertex_buffers(&[mesh.vertex.handle()], &[0]);
                match &mesh.index {
                    Some(index_buffer) => {
                        pass.bind_index_buffer(index_buffer.handle());
                        pass.draw_indexed(index_buffer.index_count());
                    }
                    None => pass.draw(mesh.vertex.vertex_count()),
                }
            }
        }

        recorder.end()
    }
}

impl RenderBackend for VulkanRenderer {
    fn register_shader(
        &mut self,
        binaries: &[ShaderStageBinary<'_>],
    ) -> RenderResult<PipelineHandle> {
        let device = self.ctx.raw_device();

        let reflected = binaries
            .iter()
            .map(reflect)
            .collect::<VulkanResult<Vec<_>>>()?;
        let interface = ReflectedInterface::merge(&reflected);
        let bindings = classify(&interface)?;

        let layouts = ResourceLayouts::new(device.clone(), &bindings)?;
        let layout = PipelineLayout::new(
            device.clone(),
            layouts,
            &interface.push_constant_ranges(),
        )?;

        let modules = binaries
            .iter()
            .map(|binary| ShaderModule::new(device.clone(), binary.stage, binary.words))
            .collect::<VulkanResult<Vec<_>>>()?;

        let pipeline = Pipeline::new(
            device,
            self.render_pass.handle(),
            &modules,
            layout,
            interface,
            bindings,
        )?;

        Ok(self.pipelines.insert(pipeline))
    }

    fn create_texture(
        &mut self,
        width: u32,
        height: u32,
        pixels: &[u8],
    ) -> RenderResult<TextureHandle> {
        let texture = Texture::from_rgba8(
            self.ctx.raw_device(),
            self.ctx.instance(),
            self.ctx.physical_device().device,
            &self.command_pool,
            self.ctx.graphics_queue(),
            width,
            height,
            pixels,
        )?;
        Ok(self.textures.insert(texture))
    }

    fn register_material(
        &mut self,
        pipeline: PipelineHandle,
        texture: Option<TextureHandle>,
    ) -> RenderResult<MaterialHandle> {
        let pipeline_ref = self
            .pipelines
            .get(pipeline)
            .ok_or(RenderError::UnknownHandle { kind: "pipeline" })?;

        let texture_ref = match texture {
            Some(handle) => Some(
                self.textures
                    .get(handle)
                    .ok_or(RenderError::UnknownHandle { kind: "texture" })?,
            ),
            None => Some(&self.placeholder_texture),
        };

        let material = Material::new(
            self.ctx.raw_device(),
            self.ctx.instance(),
            self.ctx.physical_device().device,
            &self.descriptor_pool,
            pipeline_ref.layout().resource_layouts(),
            pipeline_ref.bindings(),
            self.ctx
                .physical_device()
                .min_uniform_buffer_offset_alignment(),
            texture_ref,
        )?;

        Ok(self.materials.insert(MaterialEntry { material, pipeline }))
    }

    fn create_mesh(&mut self, pipeline: PipelineHandle, data: &MeshData) -> RenderResult<MeshHandle> {
        let pipeline_ref = self
            .pipelines
            .get(pipeline)
            .ok_or(RenderError::UnknownHandle { kind: "pipeline" })?;

        let format = pipeline_ref.interface().vertex_format();
        let interleaved = data.interleave(&format)?;

        let vertex = VertexBuffer::from_bytes(
            self.ctx.raw_device(),
            self.ctx.instance(),
            self.ctx.physical_device().device,
            &interleaved.bytes,
            interleaved.vertex_count,
        )?;
        let index = if data.indices().is_empty() {
            None
        } else {
            Some(IndexBuffer::new(
                self.ctx.raw_device(),
                self.ctx.instance(),
                self.ctx.physical_device().device,
                data.indices(),
            )?)
        };

        Ok(self.meshes.insert(MeshEntry { vertex, index }))
    }

    fn submit(&mut self, transform: Mat4, mesh: MeshHandle, material: MaterialHandle) {
        self.pending_draws.push(DrawSubmission {
            transform,
            mesh,
            material,
        });
    }

    fn render(&mut self, view_projection: &Mat4) -> RenderResult<()> {
        // A rebuild requested by the previous frame happens before acquire.
        if self.scheduler.take_rebuild_request() {
            self.rebuild_swapchain()?;
        }

        let frame = match self.scheduler.begin_frame(&self.ctx)? {
            Some(frame) => frame,
            None => {
                // Stale swapchain: drop this frame's draws, rebuild next time.
                self.pending_draws.clear();
                self.in_flight = None;
                return Ok(());
            }
        };

        self.prepare_draw_uniforms(view_projection)?;
        self.record_frame(&frame)?;
        self.scheduler.submit(&self.ctx, &frame)?;
        self.in_flight = Some(frame);
        Ok(())
    }

    fn present(&mut self) -> RenderResult<()> {
        if let Some(frame) = self.in_flight.take() {
            self.scheduler.present(&self.ctx, &frame)?;
        }
        self.pending_draws.clear();
        Ok(())
    }

    fn handle_resize(&mut self) {
        self.scheduler.request_rebuild();
    }
}

impl Drop for VulkanRenderer {
    fn drop(&mut self) {
        let _ = self.ctx.wait_idle();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::render::vulkan::material::DynamicBufferLayout;

    #[test]
    fn draw_indices_count_up_per_material() {
        let mut cursor = DrawIndexCursor::new();
        assert_eq!(cursor.next(7u32), 0);
        assert_eq!(cursor.next(7u32), 1);
        assert_eq!(cursor.next(7u32), 2);
    }

    #[test]
    fn three_draws_on_one_material_bind_statics_once_at_stride_offsets() {
        let layout = DynamicBufferLayout::new(64, 256);
        let mut cursor = DrawIndexCursor::new();
        let mut binds = MaterialBindTracker::new();
        let material = 1u32;

        let mut static_binds = 0;
        let mut offsets = Vec::new();
        for _ in 0..3 {
            if binds.switch_to(material) {
                static_binds += 1;
            }
            offsets.push(layout.offset_for(cursor.next(material)));
        }

        assert_eq!(static_binds, 1);
        assert_eq!(offsets, vec![0, layout.stride(), 2 * layout.stride()]);
    }

    #[test]
    fn image_only_per_object_tier_still_requires_a_set_bind() {
        use crate::render::vulkan::frequency::BindingKind;
        use crate::render::vulkan::reflection::SampledImage;

        // A per-object sampler with no per-object uniform block declares
        // set 3 in the layout, so recording must bind it with no offsets.
        let interface = ReflectedInterface {
            inputs: vec![],
            outputs: vec![],
            uniform_blocks: vec![],
            sampled_images: vec![SampledImage {
                name: "object_mask".to_string(),
                set: FrequencyTier::PerObject.set_index(),
                binding: 1,
                stages: vk::ShaderStageFlags::FRAGMENT,
            }],
            push_constants: vec![],
        };

        let classified = classify(&interface).expect("valid interface");
        let per_object = classified.tier(FrequencyTier::PerObject);

        assert!(!per_object.is_empty());
        assert!(per_object
            .iter()
            .all(|b| b.kind != BindingKind::UniformBufferDynamic));
    }

    #[test]
    fn interleaved_materials_rebind_and_keep_independent_indices() {
        let mut cursor = DrawIndexCursor::new();
        let mut binds = MaterialBindTracker::new();

        assert!(binds.switch_to(1u32));
        assert_eq!(cursor.next(1u32), 0);

        assert!(binds.switch_to(2u32));
        assert_eq!(cursor.next(2u32), 0);

        // Back to the first material: rebind, but its index keeps counting.
        assert!(binds.switch_to(1u32));
        assert_eq!(cursor.next(1u32), 1);
        assert!(!binds.switch_to(1u32));
    }
}
