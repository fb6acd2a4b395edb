//! Backend-facing render API
//!
//! Handle types and the backend trait. Handles are slotmap keys, so stale
//! handles after a resource is dropped fail lookup instead of aliasing a
//! new resource.

use slotmap::new_key_type;

use crate::foundation::math::Mat4;
use crate::render::mesh::MeshData;
use crate::render::vulkan::reflection::ShaderStageBinary;
use crate::render::RenderResult;

new_key_type! {
    /// A registered shader pipeline
    pub struct PipelineHandle;
    /// A material instance bound to a pipeline
    pub struct MaterialHandle;
    /// An uploaded mesh
    pub struct MeshHandle;
    /// An uploaded texture
    pub struct TextureHandle;
}

/// One queued draw: what to render, with what, and where
#[derive(Debug, Clone, Copy)]
pub struct DrawSubmission {
    pub transform: Mat4,
    pub mesh: MeshHandle,
    pub material: MaterialHandle,
}

/// The surface the rest of the application renders through
///
/// Exists only at the backend-selection boundary; the Vulkan types behind
/// it are not abstracted from each other.
pub trait RenderBackend {
    /// Reflect the shader binaries and build a pipeline for them
    fn register_shader(&mut self, binaries: &[ShaderStageBinary<'_>])
        -> RenderResult<PipelineHandle>;

    /// Upload raw RGBA8 pixels as a sampled texture
    fn create_texture(&mut self, width: u32, height: u32, pixels: &[u8])
        -> RenderResult<TextureHandle>;

    /// Create a material for a pipeline, optionally with a texture
    fn register_material(
        &mut self,
        pipeline: PipelineHandle,
        texture: Option<TextureHandle>,
    ) -> RenderResult<MaterialHandle>;

    /// Upload a mesh, interleaved against the pipeline's vertex format
    fn create_mesh(&mut self, pipeline: PipelineHandle, data: &MeshData)
        -> RenderResult<MeshHandle>;

    /// Queue one draw for the next frame
    fn submit(&mut self, transform: Mat4, mesh: MeshHandle, material: MaterialHandle);

    /// Record and submit the queued draws
    fn render(&mut self, view_projection: &Mat4) -> RenderResult<()>;

    /// Present the rendered frame
    fn present(&mut self) -> RenderResult<()>;

    /// Note a window resize so the swapchain is rebuilt before the next frame
    fn handle_resize(&mut self);
}
