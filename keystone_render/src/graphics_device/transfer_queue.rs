/// TransferQueue trait and the GpuResource upload target

use std::sync::Arc;
use crate::error::Result;
use crate::graphics_device::{Buffer, Image, QueueSlot, SyncPoint};

/// A GPU object that uploads write into
///
/// Cloning shares the underlying object: the registry and any caller
/// holding a clone keep it alive together.
#[derive(Clone)]
pub enum GpuResource {
    Buffer(Arc<dyn Buffer>),
    Image(Arc<dyn Image>),
}

impl GpuResource {
    pub fn name(&self) -> &str {
        match self {
            GpuResource::Buffer(buffer) => &buffer.desc().name,
            GpuResource::Image(image) => &image.desc().name,
        }
    }

    /// Bytes a full upload carries
    pub fn size_bytes(&self) -> u64 {
        match self {
            GpuResource::Buffer(buffer) => buffer.size(),
            GpuResource::Image(image) => image.desc().size_bytes(),
        }
    }

    pub fn as_buffer(&self) -> Option<&Arc<dyn Buffer>> {
        match self {
            GpuResource::Buffer(buffer) => Some(buffer),
            GpuResource::Image(_) => None,
        }
    }

    pub fn as_image(&self) -> Option<&Arc<dyn Image>> {
        match self {
            GpuResource::Image(image) => Some(image),
            GpuResource::Buffer(_) => None,
        }
    }

    /// Whether both values share the same GPU object
    pub fn ptr_eq(&self, other: &GpuResource) -> bool {
        match (self, other) {
            (GpuResource::Buffer(a), GpuResource::Buffer(b)) => Arc::ptr_eq(a, b),
            (GpuResource::Image(a), GpuResource::Image(b)) => Arc::ptr_eq(a, b),
            _ => false,
        }
    }
}

impl std::fmt::Debug for GpuResource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            GpuResource::Buffer(_) => write!(f, "GpuResource::Buffer('{}', {} bytes)", self.name(), self.size_bytes()),
            GpuResource::Image(_) => write!(f, "GpuResource::Image('{}', {} bytes)", self.name(), self.size_bytes()),
        }
    }
}

/// Per-thread upload context bound to one transfer queue
///
/// Owns the queue, a command pool and staging memory. Exactly one transfer
/// thread uses a given `TransferQueue`, so implementations need no locking
/// around their own state.
pub trait TransferQueue: Send {
    /// Hardware queue this context submits to
    fn slot(&self) -> QueueSlot;

    /// Copy `data` into `target`
    ///
    /// Signals `signal` on the GPU once the copy executed, and returns only
    /// after the copy completed so the staging memory can be reused.
    ///
    /// # Errors
    ///
    /// Returns `Error::OutOfMemory` if staging memory cannot grow to
    /// `data.len()`, `Error::DeviceLost` if the copy does not finish in time.
    fn upload(&mut self, target: &GpuResource, data: &[u8], signal: Option<SyncPoint>) -> Result<()>;

    /// Wait for every submission made through this queue
    fn wait_idle(&mut self) -> Result<()>;
}
