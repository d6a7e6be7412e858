/// Task and Completion traits
///
/// A task runs on exactly one worker thread. It may then turn into a
/// completion, which is applied later on the thread that owns `Ctx`:
/// that is the only place background results touch single-threaded state.

use crate::error::{Error, Result};
use crate::handle::TypeTag;

/// Tag selecting the worker pool a task is routed to
pub type TaskType = TypeTag;

/// Unit of background work
///
/// # Example
///
/// ```no_run
/// use keystone_render::keystone::task::{Task, TaskType, Completion, FnCompletion};
///
/// struct PackVertices { task_type: TaskType, input: Vec<f32>, packed: Vec<u8> }
///
/// impl Task<Vec<Vec<u8>>> for PackVertices {
///     fn task_type(&self) -> TaskType { self.task_type }
///     fn execute(&mut self) {
///         self.packed = self.input.iter().flat_map(|v| v.to_le_bytes()).collect();
///     }
///     fn into_completion(self: Box<Self>) -> Option<Box<dyn Completion<Vec<Vec<u8>>>>> {
///         let packed = self.packed;
///         Some(FnCompletion::boxed(move |out: &mut Vec<Vec<u8>>| { out.push(packed); Ok(()) }))
///     }
/// }
/// ```
pub trait Task<Ctx>: Send + 'static {
    /// Pool this task must run on
    fn task_type(&self) -> TaskType;

    /// Name used in log lines
    fn name(&self) -> &str {
        "task"
    }

    /// Run the work (worker thread)
    fn execute(&mut self);

    /// Turn the finished task into a completion (worker thread)
    fn into_completion(self: Box<Self>) -> Option<Box<dyn Completion<Ctx>>>;
}

/// Side effect to apply on the owning thread
pub trait Completion<Ctx>: Send + 'static {
    /// Apply to the owner's state
    ///
    /// # Errors
    ///
    /// An error is logged and reported by `drain_completions`; it never
    /// stops the remaining completions from being applied.
    fn apply(self: Box<Self>, ctx: &mut Ctx) -> Result<()>;
}

// ===== CLOSURE ADAPTERS =====

type Work<Ctx> = Box<dyn FnOnce() -> Option<Box<dyn Completion<Ctx>>> + Send>;

/// Task built from a closure
pub struct FnTask<Ctx> {
    task_type: TaskType,
    name: String,
    work: Option<Work<Ctx>>,
    completion: Option<Box<dyn Completion<Ctx>>>,
}

impl<Ctx: 'static> FnTask<Ctx> {
    pub fn new<F>(task_type: TaskType, name: impl Into<String>, work: F) -> Self
    where
        F: FnOnce() -> Option<Box<dyn Completion<Ctx>>> + Send + 'static,
    {
        Self {
            task_type,
            name: name.into(),
            work: Some(Box::new(work)),
            completion: None,
        }
    }

    /// Boxed form, ready for `TaskDispatcher::submit`
    pub fn boxed<F>(task_type: TaskType, name: impl Into<String>, work: F) -> Box<dyn Task<Ctx>>
    where
        F: FnOnce() -> Option<Box<dyn Completion<Ctx>>> + Send + 'static,
    {
        Box::new(Self::new(task_type, name, work))
    }
}

impl<Ctx: 'static> Task<Ctx> for FnTask<Ctx> {
    fn task_type(&self) -> TaskType {
        self.task_type
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn execute(&mut self) {
        if let Some(work) = self.work.take() {
            self.completion = work();
        }
    }

    fn into_completion(self: Box<Self>) -> Option<Box<dyn Completion<Ctx>>> {
        self.completion
    }
}

/// Completion built from a closure
pub struct FnCompletion<Ctx> {
    apply: Box<dyn FnOnce(&mut Ctx) -> Result<()> + Send>,
}

impl<Ctx: 'static> FnCompletion<Ctx> {
    pub fn boxed<F>(apply: F) -> Box<dyn Completion<Ctx>>
    where
        F: FnOnce(&mut Ctx) -> Result<()> + Send + 'static,
    {
        Box::new(Self { apply: Box::new(apply) })
    }
}

impl<Ctx: 'static> Completion<Ctx> for FnCompletion<Ctx> {
    fn apply(self: Box<Self>, ctx: &mut Ctx) -> Result<()> {
        (self.apply)(ctx)
    }
}

/// Completion reporting a task that panicked on its worker
pub(crate) struct TaskFailure {
    pub(crate) task: String,
    pub(crate) reason: String,
}

impl<Ctx: 'static> Completion<Ctx> for TaskFailure {
    fn apply(self: Box<Self>, _ctx: &mut Ctx) -> Result<()> {
        Err(Error::TaskFailed(format!("'{}': {}", self.task, self.reason)))
    }
}
