// Backend module - Vulkan abstraction layer
//
// Design: Thin wrapper around ash with safety and ergonomics
// Ownership: every handle lives in a RAII type holding Arcs to its parents

pub mod capability;
pub mod device;
pub mod error;
pub mod frame;
pub mod instance;
pub mod pipeline;
pub mod renderer;
pub mod shader;
pub mod swapchain;
pub mod sync;

pub use capability::DeviceRequirements;
pub use error::InitError;
pub use instance::InstanceConfig;
pub use renderer::{Renderer, RendererConfig};
pub use shader::ShaderCode;
