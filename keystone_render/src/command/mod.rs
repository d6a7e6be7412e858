/// Command module - ordered command buffer submission

pub mod ordering;
pub mod command_buffer_request;
pub mod orchestrator;

pub use ordering::{OrderingPhase, SubOrder, SubmitStatus, RecordMode};
pub use command_buffer_request::{
    CommandBufferRequest, SubmissionStrategy, SubmitContext,
    RecordFn, BeforeHookFn, OverrideFn,
};
pub use orchestrator::{CommandBufferOrchestrator, CommandBufferEntry};
