//! Reflection-driven Vulkan rendering engine
//!
//! Shader binaries drive everything: pipelines, vertex formats, descriptor
//! layouts, and material storage are derived by reflecting SPIR-V rather
//! than hand-written per shader. See `render::api::RenderBackend` for the
//! outward surface.

pub mod config;
pub mod foundation;
pub mod render;

pub use config::RendererConfig;
pub use render::api::{
    MaterialHandle, MeshHandle, PipelineHandle, RenderBackend, TextureHandle,
};
pub use render::mesh::MeshData;
pub use render::vulkan::VulkanRenderer;
pub use render::window::Window;
