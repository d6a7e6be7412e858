/// Buffer trait and buffer descriptor

use std::any::Any;

/// Buffer usage
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BufferUsage {
    /// Vertex buffer
    Vertex,
    /// Index buffer
    Index,
    /// Uniform/constant buffer
    Uniform,
    /// Storage buffer
    Storage,
    /// Indirect draw/dispatch arguments
    Indirect,
}

/// Descriptor for creating a buffer
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BufferDesc {
    /// Debug name, also used in fatal log lines
    pub name: String,
    /// Size in bytes
    pub size: u64,
    /// Buffer usage
    pub usage: BufferUsage,
}

/// Device-local buffer resource
///
/// Implemented by backend-specific buffer types (e.g., VulkanBuffer).
/// The GPU object is released when the last `Arc` is dropped.
pub trait Buffer: Send + Sync {
    /// Descriptor the buffer was created from
    fn desc(&self) -> &BufferDesc;

    /// Backend downcast hook (transfer queues need the concrete type)
    fn as_any(&self) -> &dyn Any;

    /// Size in bytes
    fn size(&self) -> u64 {
        self.desc().size
    }
}
