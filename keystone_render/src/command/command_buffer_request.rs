/// Command buffer registration: recording callback and submission strategy

use crate::error::Result;
use crate::frame::FrameTracker;
use crate::graphics_device::{
    CommandBuffer, GraphicsDevice, PipelineStages, QueueType, SemaphoreWait, SyncPoint,
};
use crate::command::RecordMode;

/// Records commands into the frame's command buffer
pub type RecordFn = Box<dyn FnMut(&mut dyn CommandBuffer, &FrameTracker) -> Result<()> + Send>;

/// Runs right before recording and submission
pub type BeforeHookFn = Box<dyn FnMut(&FrameTracker) -> Result<()> + Send>;

/// Performs the submission itself and returns the point it signals
pub type OverrideFn = Box<dyn FnMut(&mut SubmitContext<'_>) -> Result<SyncPoint> + Send>;

/// How a command buffer is submitted
pub enum SubmissionStrategy {
    /// Plain submit with the computed waits, signaling the buffer's completion point
    Default,
    /// Run a hook before recording, then submit as `Default`
    BeforeHook(BeforeHookFn),
    /// Hand the recorded buffer and computed waits to the caller
    ///
    /// The returned `SyncPoint` becomes the buffer's completion: the next
    /// buffer in the chain waits on it, so it must be non-null.
    Override(OverrideFn),
}

impl std::fmt::Debug for SubmissionStrategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SubmissionStrategy::Default => write!(f, "Default"),
            SubmissionStrategy::BeforeHook(_) => write!(f, "BeforeHook(..)"),
            SubmissionStrategy::Override(_) => write!(f, "Override(..)"),
        }
    }
}

/// Everything an `Override` strategy needs to submit on its own
pub struct SubmitContext<'a> {
    pub device: &'a dyn GraphicsDevice,
    pub queue_type: QueueType,
    /// Already recorded for this frame
    pub command_buffer: &'a mut dyn CommandBuffer,
    /// Waits the default path would have used
    pub waits: &'a [SemaphoreWait],
    pub frame: &'a FrameTracker,
    /// Point the default path would have signaled
    pub signal: SyncPoint,
}

/// Description of a command buffer handed to `CommandBufferOrchestrator::add`
///
/// # Example
///
/// ```no_run
/// use keystone_render::keystone::command::{CommandBufferRequest, RecordMode};
///
/// let request = CommandBufferRequest::new("shadow_pass", |cmd, frame| {
///     cmd.insert_label(&format!("shadows #{}", frame.frame_id()))
/// })
/// .record_mode(RecordMode::EveryFrame);
/// ```
pub struct CommandBufferRequest {
    pub(crate) name: String,
    pub(crate) record_mode: RecordMode,
    pub(crate) recorder: RecordFn,
    pub(crate) strategy: SubmissionStrategy,
    pub(crate) wait_stages: PipelineStages,
}

impl CommandBufferRequest {
    /// Request recording every frame with the default submission
    pub fn new<F>(name: impl Into<String>, recorder: F) -> Self
    where
        F: FnMut(&mut dyn CommandBuffer, &FrameTracker) -> Result<()> + Send + 'static,
    {
        Self {
            name: name.into(),
            record_mode: RecordMode::EveryFrame,
            recorder: Box::new(recorder),
            strategy: SubmissionStrategy::Default,
            wait_stages: PipelineStages::ALL_COMMANDS,
        }
    }

    pub fn record_mode(mut self, mode: RecordMode) -> Self {
        self.record_mode = mode;
        self
    }

    pub fn strategy(mut self, strategy: SubmissionStrategy) -> Self {
        self.strategy = strategy;
        self
    }

    /// Shorthand for `SubmissionStrategy::BeforeHook`
    pub fn before_submit<F>(self, hook: F) -> Self
    where
        F: FnMut(&FrameTracker) -> Result<()> + Send + 'static,
    {
        self.strategy(SubmissionStrategy::BeforeHook(Box::new(hook)))
    }

    /// Shorthand for `SubmissionStrategy::Override`
    pub fn override_submit<F>(self, submit: F) -> Self
    where
        F: FnMut(&mut SubmitContext<'_>) -> Result<SyncPoint> + Send + 'static,
    {
        self.strategy(SubmissionStrategy::Override(Box::new(submit)))
    }

    /// Stages blocked by the waits chained in front of this buffer
    pub fn wait_stages(mut self, stages: PipelineStages) -> Self {
        self.wait_stages = stages;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}
