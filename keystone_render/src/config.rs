/// Runtime configuration for a `DeviceContext`
///
/// Every capacity here is a deploy-time tuning knob: exhausting one is
/// reported as a fatal misconfiguration, never absorbed by growing a queue.

use std::time::Duration;
use crate::error::{Error, Result};

/// Bounded-retry policy for full queues
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BackpressureConfig {
    /// Attempts before a full queue is reported as fatal
    pub max_attempts: u32,
    /// Sleep between attempts once spinning/yielding gave up
    pub retry_sleep: Duration,
}

impl Default for BackpressureConfig {
    fn default() -> Self {
        Self {
            max_attempts: 2000,
            retry_sleep: Duration::from_micros(50),
        }
    }
}

/// Transfer worker tuning
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransferConfig {
    /// Maximum number of transfer threads (one hardware queue each)
    pub thread_count: usize,
    /// Capacity of each thread's normal-priority upload queue
    pub queue_capacity: usize,
    /// Capacity of each thread's high-priority upload queue
    pub high_priority_capacity: usize,
}

impl Default for TransferConfig {
    fn default() -> Self {
        Self {
            thread_count: 1,
            queue_capacity: 256,
            high_priority_capacity: 64,
        }
    }
}

/// Core configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    /// Number of frames the CPU may record ahead of the GPU
    pub frames_in_flight: u32,
    /// Capacity of each task-type queue
    pub task_queue_capacity: usize,
    /// Capacity of the shared completion queue
    pub completion_queue_capacity: usize,
    /// Retry policy shared by task submission and completion pushes
    pub backpressure: BackpressureConfig,
    /// How long an idle worker blocks before re-checking its stop flag
    pub worker_idle_timeout: Duration,
    /// Keep executing queued work after stop was requested
    pub drain_before_exit: bool,
    /// Transfer worker tuning
    pub transfer: TransferConfig,
    /// Maximum wait on a GPU primitive or upload flag; exceeding it means device lost
    pub sync_timeout: Duration,
    /// Capacity of the static resource slot table
    pub max_static_resources: u32,
    /// Capacity of the dynamic resource slot table
    pub max_dynamic_resources: u32,
}

/// Largest slot table a registry can address
///
/// Handle ids interleave the two tables (`index * 2` and `index * 2 + 1`),
/// so each table gets half of the `u32` id space.
pub const MAX_RESOURCES_PER_TABLE: u32 = u32::MAX / 2;

impl Default for Config {
    fn default() -> Self {
        Self {
            frames_in_flight: 2,
            task_queue_capacity: 256,
            completion_queue_capacity: 1024,
            backpressure: BackpressureConfig::default(),
            worker_idle_timeout: Duration::from_millis(2),
            drain_before_exit: true,
            transfer: TransferConfig::default(),
            sync_timeout: Duration::from_secs(5),
            max_static_resources: 4096,
            max_dynamic_resources: 4096,
        }
    }
}

impl Config {
    /// Check that every capacity and timeout is usable
    ///
    /// # Errors
    ///
    /// Returns `Error::InitializationFailed` naming the first bad field.
    pub fn validate(&self) -> Result<()> {
        let checks: [(&str, bool); 9] = [
            ("frames_in_flight", self.frames_in_flight > 0),
            ("task_queue_capacity", self.task_queue_capacity > 0),
            ("completion_queue_capacity", self.completion_queue_capacity > 0),
            ("backpressure.max_attempts", self.backpressure.max_attempts > 0),
            ("transfer.thread_count", self.transfer.thread_count > 0),
            ("transfer.queue_capacity", self.transfer.queue_capacity > 0),
            ("transfer.high_priority_capacity", self.transfer.high_priority_capacity > 0),
            ("sync_timeout", !self.sync_timeout.is_zero()),
            ("max_resources", self.max_static_resources > 0 && self.max_dynamic_resources > 0),
        ];

        for (field, ok) in checks {
            if !ok {
                return Err(crate::engine_fail!("keystone::Config", Error::InitializationFailed,
                    "Config field '{}' must be non-zero", field));
            }
        }

        let tables = [
            ("max_static_resources", self.max_static_resources),
            ("max_dynamic_resources", self.max_dynamic_resources),
        ];
        for (field, capacity) in tables {
            if capacity > MAX_RESOURCES_PER_TABLE {
                return Err(crate::engine_fail!("keystone::Config", Error::InitializationFailed,
                    "Config field '{}' is {}, at most {} fit in a handle id", field, capacity, MAX_RESOURCES_PER_TABLE));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
#[path = "config_tests.rs"]
mod tests;
