/// Synchronization primitives: semaphores, wait descriptors and sync points

use bitflags::bitflags;

/// Semaphore flavor
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SemaphoreKind {
    /// Signaled once per submission, waited once
    Binary,
    /// Monotonic 64-bit counter; any number of waits on any value
    Timeline,
}

/// Backend semaphore handle
///
/// A plain value: destruction goes through `GraphicsDevice::destroy_semaphore`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Semaphore {
    raw: u64,
    kind: SemaphoreKind,
}

impl Semaphore {
    pub fn new(raw: u64, kind: SemaphoreKind) -> Self {
        Self { raw, kind }
    }

    /// Backend handle (e.g. `VkSemaphore` as u64)
    pub fn raw(&self) -> u64 {
        self.raw
    }

    pub fn kind(&self) -> SemaphoreKind {
        self.kind
    }

    pub fn is_null(&self) -> bool {
        self.raw == 0
    }
}

bitflags! {
    /// Pipeline stages a wait blocks
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct PipelineStages: u32 {
        const TOP_OF_PIPE             = 1 << 0;
        const DRAW_INDIRECT           = 1 << 1;
        const VERTEX_INPUT            = 1 << 2;
        const VERTEX_SHADER           = 1 << 3;
        const FRAGMENT_SHADER         = 1 << 4;
        const EARLY_FRAGMENT_TESTS    = 1 << 5;
        const LATE_FRAGMENT_TESTS     = 1 << 6;
        const COLOR_ATTACHMENT_OUTPUT = 1 << 7;
        const COMPUTE_SHADER          = 1 << 8;
        const TRANSFER                = 1 << 9;
        const BOTTOM_OF_PIPE          = 1 << 10;
        const ALL_GRAPHICS            = 1 << 11;
        const ALL_COMMANDS            = 1 << 12;
    }
}

/// Wait entry of a submission: (semaphore, stages, optional timeline value)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SemaphoreWait {
    pub semaphore: Semaphore,
    pub stages: PipelineStages,
    /// Timeline value to wait for; `None` for binary semaphores
    pub value: Option<u64>,
}

/// Completion primitive: "work is done once `semaphore` reaches `value`"
///
/// Also used as the signal entry of a submission.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SyncPoint {
    pub semaphore: Semaphore,
    /// Timeline value signaled; `None` for binary semaphores
    pub value: Option<u64>,
}

impl SyncPoint {
    pub fn new(semaphore: Semaphore, value: Option<u64>) -> Self {
        Self { semaphore, value }
    }

    /// Wait entry blocking `stages` until this point is reached
    pub fn as_wait(&self, stages: PipelineStages) -> SemaphoreWait {
        SemaphoreWait {
            semaphore: self.semaphore,
            stages,
            value: self.value,
        }
    }

    /// Whether `wait` targets this exact point
    pub fn is_waited_by(&self, wait: &SemaphoreWait) -> bool {
        wait.semaphore == self.semaphore && wait.value == self.value
    }
}
