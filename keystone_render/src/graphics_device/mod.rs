/// Graphics device module - the backend contract consumed by the core

// Module declarations
pub mod graphics_device;
pub mod sync;
pub mod buffer;
pub mod image;
pub mod command_buffer;
pub mod transfer_queue;

// Re-export everything from graphics_device.rs
pub use graphics_device::*;

// Re-export from other modules
pub use sync::*;
pub use buffer::*;
pub use image::*;
pub use command_buffer::*;
pub use transfer_queue::*;

// Mock graphics device for tests (no GPU required)
#[cfg(test)]
pub mod mock_graphics_device;
