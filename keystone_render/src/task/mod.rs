/// Task module - background work routed to typed worker pools

pub mod task;
pub mod task_dispatcher;
pub(crate) mod worker;

pub use task::{Task, Completion, TaskType, FnTask, FnCompletion};
pub use task_dispatcher::{TaskDispatcher, WorkerRegistration, DrainReport};
