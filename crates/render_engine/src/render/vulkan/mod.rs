//! Vulkan backend
//!
//! Pipeline construction is reflection-driven: shader binaries are the
//! single source of truth for vertex formats, uniform layouts, and
//! descriptor bindings. Descriptor set indices map one-to-one onto update
//! frequency tiers, and frame pacing runs through a fixed ring of
//! in-flight slots.

pub mod buffer;
pub mod commands;
pub mod context;
pub mod descriptor;
pub mod frame;
pub mod framebuffer;
pub mod frequency;
pub mod interface;
pub mod material;
pub mod pipeline;
pub mod reflection;
pub mod render_pass;
pub mod renderer;
pub mod swapchain;
pub mod sync;
pub mod texture;

pub use context::{PhysicalDeviceInfo, VulkanContext, VulkanError, VulkanResult};
pub use frame::{FrameScheduler, FRAME_TIMEOUT_NS};
pub use frequency::{BindingKind, FrequencyTier};
pub use interface::ReflectedInterface;
pub use reflection::{reflect, ShaderStage, ShaderStageBinary};
pub use renderer::VulkanRenderer;
pub use swapchain::Swapchain;
