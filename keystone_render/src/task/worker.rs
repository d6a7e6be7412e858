/// Worker thread plumbing shared by the task dispatcher and the transfer worker

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use crossbeam_channel::{Receiver, Sender, TryRecvError, TrySendError};
use crossbeam_utils::Backoff;
use crate::config::BackpressureConfig;

/// Stop flag plus exit policy of one worker group
pub(crate) struct WorkerControl {
    stop: AtomicBool,
    drain_before_exit: bool,
    idle_timeout: Duration,
}

impl WorkerControl {
    pub(crate) fn new(drain_before_exit: bool, idle_timeout: Duration) -> Self {
        Self {
            stop: AtomicBool::new(false),
            drain_before_exit,
            idle_timeout,
        }
    }

    pub(crate) fn request_stop(&self) {
        self.stop.store(true, Ordering::Release);
    }

    pub(crate) fn stop_requested(&self) -> bool {
        self.stop.load(Ordering::Acquire)
    }
}

enum Next<T> {
    Item(T),
    Empty,
    Disconnected,
}

fn next_item<T>(high: &Receiver<T>, normal: &Receiver<T>) -> Next<T> {
    if let Ok(item) = high.try_recv() {
        return Next::Item(item);
    }
    match normal.try_recv() {
        Ok(item) => Next::Item(item),
        Err(TryRecvError::Empty) => Next::Empty,
        Err(TryRecvError::Disconnected) if high.is_empty() => Next::Disconnected,
        Err(TryRecvError::Disconnected) => Next::Empty,
    }
}

/// Pop, handle, repeat until stopped
///
/// `high` is always polled before `normal`. Once stop is requested the loop
/// exits immediately, or after both queues ran dry when the control asks to
/// drain before exit. Senders being dropped also ends the loop.
pub(crate) fn run_worker_loop<T>(
    high: &Receiver<T>,
    normal: &Receiver<T>,
    control: &WorkerControl,
    mut handle: impl FnMut(T),
) {
    loop {
        if control.stop_requested() && !control.drain_before_exit {
            break;
        }

        match next_item(high, normal) {
            Next::Item(item) => {
                handle(item);
                continue;
            }
            Next::Disconnected => break,
            Next::Empty => {
                if control.stop_requested() {
                    break;
                }
            }
        }

        crossbeam_channel::select! {
            recv(high) -> msg => if let Ok(item) = msg { handle(item) },
            recv(normal) -> msg => if let Ok(item) = msg { handle(item) },
            default(control.idle_timeout) => {}
        }
    }
}

/// Why a bounded send gave up
pub(crate) enum SendFailure<T> {
    /// Queue stayed full for the whole retry budget
    Exhausted(T),
    /// Receiving side is gone
    Disconnected(T),
}

/// `try_send` with bounded retry: spin/yield first, then sleep between attempts
///
/// Returns the number of retries it took.
pub(crate) fn send_with_backpressure<T>(
    sender: &Sender<T>,
    mut item: T,
    policy: &BackpressureConfig,
) -> std::result::Result<u32, SendFailure<T>> {
    let backoff = Backoff::new();
    let mut attempts = 0;
    loop {
        match sender.try_send(item) {
            Ok(()) => return Ok(attempts),
            Err(TrySendError::Disconnected(back)) => return Err(SendFailure::Disconnected(back)),
            Err(TrySendError::Full(back)) => {
                attempts += 1;
                if attempts >= policy.max_attempts {
                    return Err(SendFailure::Exhausted(back));
                }
                item = back;
                if backoff.is_completed() {
                    std::thread::sleep(policy.retry_sleep);
                } else {
                    backoff.snooze();
                }
            }
        }
    }
}

/// Best-effort text of a panic payload
pub(crate) fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

#[cfg(test)]
#[path = "worker_tests.rs"]
mod tests;
