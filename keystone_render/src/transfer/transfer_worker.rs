/// TransferWorker - asynchronous uploads on dedicated transfer queues
///
/// One thread per selected hardware queue. Each thread owns its
/// `TransferQueue` (queue, command pool, staging memory), so threads never
/// share mutable GPU state. The render thread only enqueues work and later
/// observes the `UploadStatus` flag or the GPU semaphore signaled by the copy.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use crossbeam_channel::Sender;

use crate::config::{BackpressureConfig, Config};
use crate::error::{Error, Result};
use crate::graphics_device::{GpuResource, GraphicsDevice, QueueSlot, SyncPoint, TransferQueue};
use crate::task::worker::{self, SendFailure, WorkerControl};
use crate::transfer::{select_transfer_queues, UploadStatus};
use crate::{engine_debug, engine_error, engine_fail, engine_info};

/// One queued upload
struct UploadJob {
    status: Arc<UploadStatus>,
    signal: Option<SyncPoint>,
    data: Arc<[u8]>,
    target: GpuResource,
}

struct TransferThread {
    slot: QueueSlot,
    high_tx: Sender<UploadJob>,
    normal_tx: Sender<UploadJob>,
    /// Jobs routed to this thread and not finished yet
    queued: Arc<AtomicUsize>,
    handle: Option<JoinHandle<()>>,
}

/// Pool of transfer threads, one per dedicated transfer queue
pub struct TransferWorker {
    threads: Vec<TransferThread>,
    control: Arc<WorkerControl>,
    outstanding: Arc<AtomicUsize>,
    backpressure: BackpressureConfig,
    sync_timeout: Duration,
    shut_down: bool,
}

impl TransferWorker {
    /// Select transfer queues on `device` and start one thread per queue
    ///
    /// At most `config.transfer.thread_count` queues are used.
    ///
    /// # Errors
    ///
    /// Returns `Error::InitializationFailed` if the device has no unclaimed
    /// transfer-capable family, or a queue context or thread cannot be created.
    pub fn new(device: &dyn GraphicsDevice, config: &Config) -> Result<Self> {
        let slots = select_transfer_queues(
            &device.queue_families(),
            &device.claimed_queue_families(),
            config.transfer.thread_count,
        )?;

        // Threads always drain: an upload dropped on shutdown would leave its flag pending forever
        let control = Arc::new(WorkerControl::new(true, config.worker_idle_timeout));
        let outstanding = Arc::new(AtomicUsize::new(0));

        let mut worker = Self {
            threads: Vec::with_capacity(slots.len()),
            control,
            outstanding,
            backpressure: config.backpressure,
            sync_timeout: config.sync_timeout,
            shut_down: false,
        };

        for (index, slot) in slots.into_iter().enumerate() {
            let queue = device.create_transfer_queue(slot)?;
            let thread = worker.spawn_thread(index, queue, &config.transfer)?;
            worker.threads.push(thread);
        }

        engine_info!("keystone::TransferWorker", "Started {} transfer thread(s) on queues {:?}",
            worker.threads.len(), worker.queue_slots());
        Ok(worker)
    }

    fn spawn_thread(
        &self,
        index: usize,
        mut queue: Box<dyn TransferQueue>,
        config: &crate::config::TransferConfig,
    ) -> Result<TransferThread> {
        let slot = queue.slot();
        let (high_tx, high_rx) = crossbeam_channel::bounded::<UploadJob>(config.high_priority_capacity);
        let (normal_tx, normal_rx) = crossbeam_channel::bounded::<UploadJob>(config.queue_capacity);
        let queued = Arc::new(AtomicUsize::new(0));

        let control = Arc::clone(&self.control);
        let outstanding = Arc::clone(&self.outstanding);
        let thread_queued = Arc::clone(&queued);
        let thread_name = format!("keystone-transfer-{}", index);

        let handle = thread::Builder::new()
            .name(thread_name.clone())
            .spawn(move || {
                worker::run_worker_loop(&high_rx, &normal_rx, &control, |job| {
                    let ok = perform_upload(&mut *queue, &job);
                    thread_queued.fetch_sub(1, Ordering::AcqRel);
                    outstanding.fetch_sub(1, Ordering::AcqRel);
                    if ok {
                        job.status.complete();
                    } else {
                        job.status.fail();
                    }
                });
                if let Err(e) = queue.wait_idle() {
                    engine_error!("keystone::TransferWorker", "Transfer queue {:?} failed to go idle: {}", slot, e);
                }
            })
            .map_err(|e| engine_fail!("keystone::TransferWorker", Error::InitializationFailed,
                "Failed to spawn transfer thread '{}': {}", thread_name, e))?;

        Ok(TransferThread {
            slot,
            high_tx,
            normal_tx,
            queued,
            handle: Some(handle),
        })
    }

    /// Enqueue an upload of `data` into `target`
    ///
    /// Marks `status` pending before returning. The transfer thread signals
    /// `signal` on the GPU once the copy executed, then flips `status` to
    /// done (or failed). Work goes to the least loaded thread; high priority
    /// work jumps ahead of that thread's normal queue.
    ///
    /// # Errors
    ///
    /// - `Error::InvalidResource` if `data` is larger than `target`
    /// - `Error::CapacityExceeded` if the chosen queue stayed full for the
    ///   whole retry budget
    /// - `Error::DeviceLost` after `shutdown`
    pub fn add(
        &self,
        status: Arc<UploadStatus>,
        signal: Option<SyncPoint>,
        data: Arc<[u8]>,
        target: GpuResource,
        high_priority: bool,
    ) -> Result<()> {
        if data.len() as u64 > target.size_bytes() {
            return Err(engine_fail!("keystone::TransferWorker", Error::InvalidResource,
                "Upload of {} bytes does not fit '{}' ({} bytes)", data.len(), target.name(), target.size_bytes()));
        }
        let Some(thread) = self.least_loaded() else {
            return Err(engine_fail!("keystone::TransferWorker", Error::DeviceLost,
                "Upload of '{}' after transfer worker shutdown", target.name()));
        };

        let name = target.name().to_string();
        let bytes = data.len();
        status.mark_pending();
        thread.queued.fetch_add(1, Ordering::AcqRel);
        self.outstanding.fetch_add(1, Ordering::AcqRel);

        let job = UploadJob { status, signal, data, target };
        let sender = if high_priority { &thread.high_tx } else { &thread.normal_tx };
        let failure = match worker::send_with_backpressure(sender, job, &self.backpressure) {
            Ok(_) => {
                engine_debug!("keystone::TransferWorker", "Queued upload of '{}' ({} bytes{}) on {:?}",
                    name, bytes, if high_priority { ", high priority" } else { "" }, thread.slot);
                return Ok(());
            }
            Err(SendFailure::Exhausted(job)) => (job, engine_fail!("keystone::TransferWorker", Error::CapacityExceeded,
                "FATAL: transfer queue {:?} stayed full for {} attempts (upload of '{}', {} bytes)",
                thread.slot, self.backpressure.max_attempts, name, bytes)),
            Err(SendFailure::Disconnected(job)) => (job, engine_fail!("keystone::TransferWorker", Error::DeviceLost,
                "Transfer thread for {:?} is gone (upload of '{}')", thread.slot, name)),
        };

        let (job, error) = failure;
        thread.queued.fetch_sub(1, Ordering::AcqRel);
        self.outstanding.fetch_sub(1, Ordering::AcqRel);
        job.status.fail();
        Err(error)
    }

    fn least_loaded(&self) -> Option<&TransferThread> {
        if self.shut_down {
            return None;
        }
        self.threads.iter().min_by_key(|thread| thread.queued.load(Ordering::Acquire))
    }

    /// Block until every enqueued upload finished
    ///
    /// # Errors
    ///
    /// Returns `Error::DeviceLost` if uploads are still outstanding after
    /// the configured sync timeout.
    pub fn wait_idle(&self) -> Result<()> {
        let deadline = Instant::now() + self.sync_timeout;
        while self.outstanding() > 0 {
            if Instant::now() >= deadline {
                return Err(engine_fail!("keystone::TransferWorker", Error::DeviceLost,
                    "FATAL: {} upload(s) still outstanding after {:?}", self.outstanding(), self.sync_timeout));
            }
            thread::sleep(Duration::from_micros(200));
        }
        Ok(())
    }

    /// Uploads enqueued and not finished yet
    pub fn outstanding(&self) -> usize {
        self.outstanding.load(Ordering::Acquire)
    }

    pub fn thread_count(&self) -> usize {
        self.threads.len()
    }

    /// Hardware queue of each thread, in thread order
    pub fn queue_slots(&self) -> Vec<QueueSlot> {
        self.threads.iter().map(|thread| thread.slot).collect()
    }

    /// Stop every thread once its queues ran dry and join it
    ///
    /// Must run before any upload target is destroyed. Idempotent.
    ///
    /// # Errors
    ///
    /// Returns `Error::DeviceLost` if uploads are still outstanding after
    /// every thread joined (a thread died mid-upload).
    pub fn shutdown(&mut self) -> Result<()> {
        if self.shut_down {
            return Ok(());
        }
        self.shut_down = true;
        self.control.request_stop();

        for thread in &mut self.threads {
            if let Some(handle) = thread.handle.take() {
                if handle.join().is_err() {
                    engine_error!("keystone::TransferWorker", "Transfer thread for {:?} panicked", thread.slot);
                }
            }
        }

        let outstanding = self.outstanding();
        if outstanding > 0 {
            return Err(engine_fail!("keystone::TransferWorker", Error::DeviceLost,
                "FATAL: {} upload(s) still outstanding after transfer threads joined", outstanding));
        }
        engine_debug!("keystone::TransferWorker", "Transfer worker shut down");
        Ok(())
    }
}

impl Drop for TransferWorker {
    fn drop(&mut self) {
        let _ = self.shutdown();
    }
}

/// Run one upload on the calling transfer thread; false on failure
fn perform_upload(queue: &mut dyn TransferQueue, job: &UploadJob) -> bool {
    match queue.upload(&job.target, &job.data, job.signal) {
        Ok(()) => true,
        Err(e) => {
            engine_error!("keystone::TransferWorker", "FATAL: upload of '{}' ({} bytes) on {:?} failed: {}",
                job.target.name(), job.data.len(), queue.slot(), e);
            false
        }
    }
}

#[cfg(test)]
#[path = "transfer_worker_tests.rs"]
mod tests;
