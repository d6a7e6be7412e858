/// GraphicsDevice trait - the logical device contract consumed by the core
///
/// Backends (Vulkan, the test mock) implement this trait. Everything takes
/// `&self` because the device is shared between the owning thread and the
/// transfer threads through an `Arc<dyn GraphicsDevice>`.

use std::time::Duration;
use bitflags::bitflags;
use crate::error::Result;
use crate::graphics_device::{
    Buffer, BufferDesc, CommandBuffer, Image, ImageDesc, Semaphore, SemaphoreKind,
    SubmitInfo, TransferQueue,
};
use std::sync::Arc;

/// Queue a command buffer is submitted to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum QueueType {
    Graphics,
    Transfer,
    Compute,
    Present,
}

bitflags! {
    /// Capabilities advertised by a queue family
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct QueueCapabilities: u32 {
        const GRAPHICS = 1 << 0;
        const COMPUTE  = 1 << 1;
        const TRANSFER = 1 << 2;
        const PRESENT  = 1 << 3;
    }
}

/// One queue family of the physical device
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueueFamilyInfo {
    /// Family index as the backend numbers it
    pub index: u32,
    pub capabilities: QueueCapabilities,
    /// Number of queues the device created in this family
    pub queue_count: u32,
}

/// A single hardware queue: family plus index within the family
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct QueueSlot {
    pub family_index: u32,
    pub queue_index: u32,
}

/// Logical device
pub trait GraphicsDevice: Send + Sync {
    /// Queue families the device created queues in
    fn queue_families(&self) -> Vec<QueueFamilyInfo>;

    /// Families already used for graphics, compute or present work
    ///
    /// Transfer threads must pick queues outside these families.
    fn claimed_queue_families(&self) -> Vec<u32>;

    /// Create a device-local buffer that is filled through transfer uploads
    ///
    /// # Errors
    ///
    /// Returns `Error::OutOfMemory` when the allocation cannot be satisfied.
    fn create_buffer(&self, desc: &BufferDesc) -> Result<Arc<dyn Buffer>>;

    /// Create a sampled 2D image that is filled through transfer uploads
    ///
    /// # Errors
    ///
    /// Returns `Error::OutOfMemory` when the allocation cannot be satisfied.
    fn create_image(&self, desc: &ImageDesc) -> Result<Arc<dyn Image>>;

    /// Create a synchronization primitive
    fn create_semaphore(&self, kind: SemaphoreKind) -> Result<Semaphore>;

    /// Destroy a synchronization primitive
    ///
    /// The caller guarantees no pending submission references it.
    fn destroy_semaphore(&self, semaphore: Semaphore);

    /// Current counter of a timeline semaphore
    fn semaphore_value(&self, semaphore: Semaphore) -> Result<u64>;

    /// Block until a timeline semaphore reaches `value`
    ///
    /// # Errors
    ///
    /// Returns `Error::Timeout` when `timeout` expires first.
    fn wait_semaphore(&self, semaphore: Semaphore, value: u64, timeout: Duration) -> Result<()>;

    /// Allocate a primary command buffer for `queue_type`
    fn create_command_buffer(&self, queue_type: QueueType, name: &str) -> Result<Box<dyn CommandBuffer>>;

    /// Release a command buffer (it must not be pending on the GPU)
    fn destroy_command_buffer(&self, command_buffer: Box<dyn CommandBuffer>);

    /// Submit command buffers with wait and signal lists
    ///
    /// # Errors
    ///
    /// Returns `Error::SubmissionFailed` or `Error::DeviceLost`.
    fn submit(&self, queue_type: QueueType, info: &SubmitInfo) -> Result<()>;

    /// Create the per-thread upload context for one transfer queue
    ///
    /// The returned object owns its queue, command pool and staging memory.
    fn create_transfer_queue(&self, slot: QueueSlot) -> Result<Box<dyn TransferQueue>>;

    /// Block until every queue is idle
    fn wait_idle(&self) -> Result<()>;
}
