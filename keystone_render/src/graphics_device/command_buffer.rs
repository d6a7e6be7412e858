/// CommandBuffer trait and submission descriptor

use std::any::Any;
use crate::error::Result;
use crate::graphics_device::{QueueType, SemaphoreWait, SyncPoint};

/// Recordable primary command buffer
///
/// Recording callbacks receive `&mut dyn CommandBuffer` and downcast through
/// `as_any_mut` to emit backend commands.
pub trait CommandBuffer: Send {
    /// Debug name
    fn name(&self) -> &str;

    /// Queue this buffer was allocated for
    fn queue_type(&self) -> QueueType;

    /// Reset and begin recording
    fn begin(&mut self) -> Result<()>;

    /// Finish recording
    fn end(&mut self) -> Result<()>;

    /// Insert a debug label (no-op where the backend has no debug utils)
    fn insert_label(&mut self, label: &str) -> Result<()>;

    /// Backend handle used in `SubmitInfo`
    fn raw(&self) -> u64;

    /// Backend downcast hook
    fn as_any_mut(&mut self) -> &mut dyn Any;
}

/// One queue submission
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SubmitInfo {
    /// Raw command buffer handles, executed in order
    pub command_buffers: Vec<u64>,
    /// Semaphores to wait on before execution
    pub waits: Vec<SemaphoreWait>,
    /// Semaphores signaled once execution completes
    pub signals: Vec<SyncPoint>,
}
