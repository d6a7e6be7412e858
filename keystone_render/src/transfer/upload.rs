/// Upload completion flag shared between the registry and transfer threads

use std::sync::atomic::{AtomicU8, Ordering};
use std::time::{Duration, Instant};
use crossbeam_utils::Backoff;
use crate::error::{Error, Result};

/// Observable state of the last upload issued against a resource
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UploadState {
    /// Queued or executing on a transfer thread
    Pending,
    /// Copy executed and its semaphore signaled
    Done,
    /// Copy could not be performed
    Failed,
}

const PENDING: u8 = 0;
const DONE: u8 = 1;
const FAILED: u8 = 2;

/// Atomic upload flag
///
/// The only state of a resource record touched from more than one thread.
/// Transitions go `Pending -> Done | Failed` once per upload; the owner
/// calls `mark_pending` before issuing the next upload.
#[derive(Debug)]
pub struct UploadStatus {
    state: AtomicU8,
}

impl UploadStatus {
    /// Flag with no upload outstanding
    pub fn new_done() -> Self {
        Self { state: AtomicU8::new(DONE) }
    }

    pub fn new_pending() -> Self {
        Self { state: AtomicU8::new(PENDING) }
    }

    pub fn mark_pending(&self) {
        self.state.store(PENDING, Ordering::Release);
    }

    /// Transfer thread: copy finished
    pub fn complete(&self) {
        self.state.store(DONE, Ordering::Release);
    }

    /// Transfer thread: copy failed
    pub fn fail(&self) {
        self.state.store(FAILED, Ordering::Release);
    }

    pub fn state(&self) -> UploadState {
        match self.state.load(Ordering::Acquire) {
            PENDING => UploadState::Pending,
            DONE => UploadState::Done,
            _ => UploadState::Failed,
        }
    }

    pub fn is_done(&self) -> bool {
        self.state() == UploadState::Done
    }

    pub fn is_pending(&self) -> bool {
        self.state() == UploadState::Pending
    }

    /// Block until the flag leaves `Pending`
    ///
    /// Spins and yields first, then sleeps in short steps.
    ///
    /// # Errors
    ///
    /// - `Error::UploadFailed` if the upload failed
    /// - `Error::DeviceLost` if the flag is still pending after `timeout`
    pub fn wait(&self, timeout: Duration) -> Result<()> {
        let backoff = Backoff::new();
        let deadline = Instant::now() + timeout;
        loop {
            match self.state() {
                UploadState::Done => return Ok(()),
                UploadState::Failed => return Err(Error::UploadFailed("upload did not complete".to_string())),
                UploadState::Pending => {}
            }
            if Instant::now() >= deadline {
                return Err(Error::DeviceLost(format!("upload still pending after {:?}", timeout)));
            }
            if backoff.is_completed() {
                std::thread::sleep(Duration::from_micros(100));
            } else {
                backoff.snooze();
            }
        }
    }
}

impl Default for UploadStatus {
    fn default() -> Self {
        Self::new_done()
    }
}

#[cfg(test)]
#[path = "upload_tests.rs"]
mod tests;
