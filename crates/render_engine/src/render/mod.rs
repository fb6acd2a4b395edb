//! Rendering subsystem
//!
//! The outward surface is `api::RenderBackend` with its handle types; the
//! Vulkan implementation lives under `vulkan`.

pub mod api;
pub mod mesh;
pub mod vulkan;
pub mod window;

use thiserror::Error;

pub use api::{DrawSubmission, MaterialHandle, MeshHandle, PipelineHandle, RenderBackend, TextureHandle};
pub use mesh::MeshData;
pub use window::Window;

/// Errors crossing the renderer boundary
#[derive(Error, Debug)]
pub enum RenderError {
    #[error(transparent)]
    Vulkan(#[from] vulkan::VulkanError),

    #[error(transparent)]
    Mesh(#[from] mesh::MeshError),

    #[error(transparent)]
    Window(#[from] window::WindowError),

    #[error("Unknown {kind} handle")]
    UnknownHandle {
        /// Which registry missed: "pipeline", "material", "mesh", "texture"
        kind: &'static str,
    },
}

pub type RenderResult<T> = Result<T, RenderError>;
