/// TaskDispatcher - bounded per-type task queues feeding worker pools
///
/// Each registered task type gets its own bounded queue and a pool of
/// named worker threads. Every pool pushes completions into one shared
/// bounded queue that the owning thread drains once per frame.

use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use crossbeam_channel::{Receiver, Sender};
use rustc_hash::FxHashMap;

use crate::config::{BackpressureConfig, Config};
use crate::error::{Error, Result};
use crate::handle::HandleTypeRegistry;
use crate::task::task::{Completion, Task, TaskFailure, TaskType};
use crate::task::worker::{self, SendFailure, WorkerControl};
use crate::{engine_debug, engine_error, engine_fail, engine_fatal, engine_info, engine_warn};

type TaskBox<Ctx> = Box<dyn Task<Ctx>>;
type CompletionBox<Ctx> = Box<dyn Completion<Ctx>>;

/// Returned by `register_worker`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkerRegistration {
    /// Tag to stamp on tasks for this pool
    pub task_type: TaskType,
    pub name: String,
    /// Total threads in the pool after this registration
    pub thread_count: usize,
}

/// Outcome of one `drain_completions` call
#[derive(Debug, Default)]
pub struct DrainReport {
    /// Completions applied (successfully or not)
    pub applied: usize,
    /// Errors returned by failing completions, in drain order
    pub failures: Vec<Error>,
}

impl DrainReport {
    pub fn is_clean(&self) -> bool {
        self.failures.is_empty()
    }
}

/// State every worker thread of the dispatcher shares
struct WorkerShared<Ctx: 'static> {
    completion_tx: Sender<CompletionBox<Ctx>>,
    in_flight: Arc<AtomicUsize>,
    backpressure: BackpressureConfig,
}

struct WorkerPool<Ctx: 'static> {
    name: String,
    sender: Sender<TaskBox<Ctx>>,
    receiver: Receiver<TaskBox<Ctx>>,
    control: Arc<WorkerControl>,
    threads: Vec<JoinHandle<()>>,
}

impl<Ctx: 'static> WorkerPool<Ctx> {
    fn spawn_worker(&mut self, shared: &WorkerShared<Ctx>) -> Result<()> {
        let thread_name = format!("keystone-{}-{}", self.name, self.threads.len());
        let receiver = self.receiver.clone();
        let control = Arc::clone(&self.control);
        let completion_tx = shared.completion_tx.clone();
        let in_flight = Arc::clone(&shared.in_flight);
        let backpressure = shared.backpressure;
        let worker_name = thread_name.clone();

        let handle = thread::Builder::new()
            .name(thread_name.clone())
            .spawn(move || {
                let no_priority = crossbeam_channel::never();
                worker::run_worker_loop(&no_priority, &receiver, &control, |task| {
                    if let Some(completion) = execute_task(task) {
                        push_completion(&completion_tx, completion, &backpressure, &worker_name);
                    }
                    in_flight.fetch_sub(1, Ordering::AcqRel);
                });
            })
            .map_err(|e| engine_fail!("keystone::TaskDispatcher", Error::InitializationFailed,
                "Failed to spawn worker thread '{}': {}", thread_name, e))?;

        self.threads.push(handle);
        Ok(())
    }
}

/// Run a task, converting a panic into a failure completion
fn execute_task<Ctx: 'static>(mut task: TaskBox<Ctx>) -> Option<CompletionBox<Ctx>> {
    let name = task.name().to_string();
    match panic::catch_unwind(AssertUnwindSafe(move || {
        task.execute();
        task
    })) {
        Ok(task) => task.into_completion(),
        Err(payload) => {
            let reason = worker::panic_message(payload.as_ref());
            engine_error!("keystone::TaskDispatcher", "Task '{}' panicked: {}", name, reason);
            Some(Box::new(TaskFailure { task: name, reason }))
        }
    }
}

/// Push a completion; never drops it while the owner is alive
fn push_completion<Ctx: 'static>(
    completion_tx: &Sender<CompletionBox<Ctx>>,
    completion: CompletionBox<Ctx>,
    backpressure: &BackpressureConfig,
    worker_name: &str,
) {
    match worker::send_with_backpressure(completion_tx, completion, backpressure) {
        Ok(_) => {}
        Err(SendFailure::Disconnected(_)) => {
            engine_warn!("keystone::TaskDispatcher",
                "Worker '{}' finished a task after the dispatcher was dropped", worker_name);
        }
        Err(SendFailure::Exhausted(_)) => {
            engine_fatal!("keystone::TaskDispatcher",
                "Completion queue full for {} attempts on worker '{}': raise completion_queue_capacity",
                backpressure.max_attempts, worker_name);
        }
    }
}

/// Generic task dispatcher owned by one thread
///
/// # Example
///
/// ```no_run
/// use keystone_render::keystone::{Config, task::{TaskDispatcher, FnTask, FnCompletion}};
///
/// let mut dispatcher = TaskDispatcher::<u32>::new(&Config::default());
/// let compile = dispatcher.register_worker("compile", 2)?;
///
/// dispatcher.submit(FnTask::boxed(compile.task_type, "count", || {
///     Some(FnCompletion::boxed(|total: &mut u32| { *total += 1; Ok(()) }))
/// }))?;
///
/// let mut total = 0;
/// let report = dispatcher.drain_completions(&mut total, None);
/// # Ok::<(), keystone_render::keystone::Error>(())
/// ```
pub struct TaskDispatcher<Ctx: 'static> {
    types: HandleTypeRegistry,
    pools: FxHashMap<TaskType, WorkerPool<Ctx>>,
    shared: WorkerShared<Ctx>,
    completion_rx: Receiver<CompletionBox<Ctx>>,
    queue_capacity: usize,
    drain_before_exit: bool,
    idle_timeout: Duration,
}

impl<Ctx: 'static> TaskDispatcher<Ctx> {
    pub fn new(config: &Config) -> Self {
        let (completion_tx, completion_rx) = crossbeam_channel::bounded(config.completion_queue_capacity);
        Self {
            types: HandleTypeRegistry::new(),
            pools: FxHashMap::default(),
            shared: WorkerShared {
                completion_tx,
                in_flight: Arc::new(AtomicUsize::new(0)),
                backpressure: config.backpressure,
            },
            completion_rx,
            queue_capacity: config.task_queue_capacity,
            drain_before_exit: config.drain_before_exit,
            idle_timeout: config.worker_idle_timeout,
        }
    }

    /// Create the pool for `name`, or grow it by `threads`
    ///
    /// # Errors
    ///
    /// Returns `Error::InitializationFailed` if `threads` is zero or a thread
    /// cannot be spawned.
    pub fn register_worker(&mut self, name: &str, threads: usize) -> Result<WorkerRegistration> {
        if threads == 0 {
            return Err(engine_fail!("keystone::TaskDispatcher", Error::InitializationFailed,
                "Worker '{}' registered with zero threads", name));
        }

        let task_type = self.types.register_type(name)?;
        let queue_capacity = self.queue_capacity;
        let drain_before_exit = self.drain_before_exit;
        let idle_timeout = self.idle_timeout;

        let pool = self.pools.entry(task_type).or_insert_with(|| {
            let (sender, receiver) = crossbeam_channel::bounded(queue_capacity);
            WorkerPool {
                name: name.to_string(),
                sender,
                receiver,
                control: Arc::new(WorkerControl::new(drain_before_exit, idle_timeout)),
                threads: Vec::new(),
            }
        });

        for _ in 0..threads {
            pool.spawn_worker(&self.shared)?;
        }

        engine_info!("keystone::TaskDispatcher", "Worker pool '{}' now has {} thread(s)",
            name, pool.threads.len());

        Ok(WorkerRegistration {
            task_type,
            name: name.to_string(),
            thread_count: pool.threads.len(),
        })
    }

    /// Tag of a registered pool
    pub fn task_type(&self, name: &str) -> Option<TaskType> {
        self.types.get_type(name)
    }

    /// Threads in the pool serving `task_type`
    pub fn worker_count(&self, task_type: TaskType) -> usize {
        self.pools.get(&task_type).map_or(0, |pool| pool.threads.len())
    }

    /// Queue a task on its pool
    ///
    /// Retries with bounded backoff while the queue is full.
    ///
    /// # Errors
    ///
    /// - `Error::InvalidHandle` if no pool serves the task's type
    /// - `Error::CapacityExceeded` if the queue stayed full for the whole
    ///   retry budget (a misconfigured capacity, logged as fatal)
    pub fn submit(&self, task: TaskBox<Ctx>) -> Result<()> {
        let task_type = task.task_type();
        let Some(pool) = self.pools.get(&task_type) else {
            return Err(engine_fail!("keystone::TaskDispatcher", Error::InvalidHandle,
                "No worker registered for task type {} (task '{}')", task_type.0, task.name()));
        };

        self.shared.in_flight.fetch_add(1, Ordering::AcqRel);
        match worker::send_with_backpressure(&pool.sender, task, &self.shared.backpressure) {
            Ok(_) => Ok(()),
            Err(SendFailure::Exhausted(task)) => {
                self.shared.in_flight.fetch_sub(1, Ordering::AcqRel);
                Err(engine_fail!("keystone::TaskDispatcher", Error::CapacityExceeded,
                    "FATAL: task queue '{}' stayed full for {} attempts (task '{}', capacity {})",
                    pool.name, self.shared.backpressure.max_attempts, task.name(), self.queue_capacity))
            }
            Err(SendFailure::Disconnected(task)) => {
                self.shared.in_flight.fetch_sub(1, Ordering::AcqRel);
                Err(engine_fail!("keystone::TaskDispatcher", Error::TaskFailed,
                    "Worker pool '{}' is shut down (task '{}')", pool.name, task.name()))
            }
        }
    }

    /// Apply queued completions to `ctx` (owning thread only)
    ///
    /// Pops everything currently queued, or at most `max`. A failing or
    /// panicking completion is logged and reported as a failure; the rest
    /// are still applied. A panic may leave `ctx` partially updated.
    pub fn drain_completions(&self, ctx: &mut Ctx, max: Option<usize>) -> DrainReport {
        let mut report = DrainReport::default();
        let limit = max.unwrap_or(usize::MAX);

        while report.applied < limit {
            let Ok(completion) = self.completion_rx.try_recv() else {
                break;
            };
            report.applied += 1;
            let applied = panic::catch_unwind(AssertUnwindSafe(|| completion.apply(ctx)))
                .unwrap_or_else(|payload| Err(Error::TaskFailed(format!(
                    "completion panicked: {}", worker::panic_message(payload.as_ref())))));
            if let Err(e) = applied {
                engine_error!("keystone::TaskDispatcher", "Completion failed: {}", e);
                report.failures.push(e);
            }
        }

        if report.applied > 0 {
            engine_debug!("keystone::TaskDispatcher", "Drained {} completion(s), {} failed",
                report.applied, report.failures.len());
        }
        report
    }

    /// Tasks submitted whose completion is not queued yet
    pub fn in_flight(&self) -> usize {
        self.shared.in_flight.load(Ordering::Acquire)
    }

    /// Completions waiting to be drained
    pub fn pending_completions(&self) -> usize {
        self.completion_rx.len()
    }

    /// Block until every submitted task has executed
    ///
    /// # Errors
    ///
    /// Returns `Error::Timeout` if tasks are still running after `timeout`.
    pub fn wait_idle(&self, timeout: Duration) -> Result<()> {
        let deadline = Instant::now() + timeout;
        while self.in_flight() > 0 {
            if Instant::now() >= deadline {
                return Err(Error::Timeout(format!("{} task(s) still in flight", self.in_flight())));
            }
            thread::sleep(Duration::from_micros(200));
        }
        Ok(())
    }

    /// Stop every pool and join its threads, applying completions meanwhile
    ///
    /// Applying while joining keeps a worker from blocking forever on a full
    /// completion queue.
    pub fn shutdown_draining(&mut self, ctx: &mut Ctx) -> DrainReport {
        self.request_stop();
        let mut report = DrainReport::default();
        loop {
            let step = self.drain_completions(ctx, None);
            report.applied += step.applied;
            report.failures.extend(step.failures);
            if self.all_finished() {
                break;
            }
            thread::sleep(self.idle_timeout);
        }
        self.join_all();
        let tail = self.drain_completions(ctx, None);
        report.applied += tail.applied;
        report.failures.extend(tail.failures);
        report
    }

    /// Stop every pool and join its threads; undrained completions are dropped
    pub fn shutdown(&mut self) {
        self.request_stop();
        self.join_all();
        let dropped = self.completion_rx.len();
        if dropped > 0 {
            engine_warn!("keystone::TaskDispatcher", "Shutdown dropped {} undrained completion(s)", dropped);
        }
    }

    fn request_stop(&self) {
        for pool in self.pools.values() {
            pool.control.request_stop();
        }
    }

    fn all_finished(&self) -> bool {
        self.pools.values().all(|pool| pool.threads.iter().all(JoinHandle::is_finished))
    }

    /// Join every worker and retire the pools; later submits are rejected
    fn join_all(&mut self) {
        for (_, mut pool) in self.pools.drain() {
            for handle in pool.threads.drain(..) {
                if handle.join().is_err() {
                    engine_error!("keystone::TaskDispatcher", "Worker thread of pool '{}' panicked", pool.name);
                }
            }
            if !pool.receiver.is_empty() {
                engine_warn!("keystone::TaskDispatcher", "Pool '{}' stopped with {} unexecuted task(s)",
                    pool.name, pool.receiver.len());
            }
        }
    }
}

impl<Ctx: 'static> Drop for TaskDispatcher<Ctx> {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[cfg(test)]
#[path = "task_dispatcher_tests.rs"]
mod tests;
