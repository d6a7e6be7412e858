/*!
# Keystone Render

Backend-agnostic core of a frame-based renderer: background task dispatch,
asynchronous GPU uploads on dedicated transfer queues, a render resource
registry with per-frame refresh, and ordered command buffer submission
chained through timeline semaphores.

## Architecture

- **GraphicsDevice**: backend contract (buffers, images, semaphores, submission, transfer queues)
- **TaskDispatcher**: typed worker pools, completions applied on the owning thread
- **TransferWorker**: one thread per dedicated transfer queue
- **RenderResourceRegistry**: handle → GPU resource with upload state
- **CommandBufferOrchestrator**: `(phase, sub_order)` ordered submission
- **DeviceContext**: owns all of the above for one device

Backend implementations (e.g. `keystone_render_vulkan`) implement `GraphicsDevice`.
*/

// Internal modules
mod error;
mod engine;
mod config;
mod handle;
mod frame;
mod device_context;
pub mod log;
pub mod utils;
pub mod graphics_device;
pub mod task;
pub mod transfer;
pub mod resource;
pub mod command;

// Main keystone namespace module
pub mod keystone {
    // Error types
    pub use crate::error::{Error, Result};

    // Logging facade
    pub use crate::engine::Engine;

    // Configuration
    pub use crate::config::{Config, BackpressureConfig, TransferConfig, MAX_RESOURCES_PER_TABLE};

    // Handles and frame pacing
    pub use crate::handle::{Handle, TypeTag, HandleTypeRegistry};
    pub use crate::frame::FrameTracker;

    // Per-device context
    pub use crate::device_context::{DeviceContext, DeviceState, FrameReport};

    // Logging sub-module (types only, macros are exported at the crate root)
    pub mod log {
        pub use crate::log::{Logger, LogEntry, LogSeverity, DefaultLogger};
    }

    // Backend contract
    pub mod render {
        pub use crate::graphics_device::*;
    }

    pub mod task {
        pub use crate::task::*;
    }

    pub mod transfer {
        pub use crate::transfer::*;
    }

    pub mod resource {
        pub use crate::resource::*;
    }

    pub mod command {
        pub use crate::command::*;
    }
}
