/// Submission coordinates and statuses of command buffers

/// Coarse position of a command buffer in the frame
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum OrderingPhase {
    BeforeRenderPass,
    /// Holds exactly one buffer: the frame's anchor
    MainRenderPass,
    AfterRenderPass,
    EndOfFrame,
    Presentation,
}

impl OrderingPhase {
    /// Every phase, in submission order
    pub const ALL: [OrderingPhase; 5] = [
        OrderingPhase::BeforeRenderPass,
        OrderingPhase::MainRenderPass,
        OrderingPhase::AfterRenderPass,
        OrderingPhase::EndOfFrame,
        OrderingPhase::Presentation,
    ];

    pub fn index(self) -> usize {
        self as usize
    }
}

/// Position of a command buffer inside its phase
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum SubOrder {
    First,
    Second,
    Third,
    Fourth,
    Fifth,
}

impl SubOrder {
    pub const ALL: [SubOrder; 5] = [
        SubOrder::First,
        SubOrder::Second,
        SubOrder::Third,
        SubOrder::Fourth,
        SubOrder::Fifth,
    ];

    pub fn index(self) -> usize {
        self as usize
    }

    /// Zero-based position; `None` past the fifth slot
    pub fn from_index(index: usize) -> Option<SubOrder> {
        Self::ALL.get(index).copied()
    }
}

/// Whether a buffer goes out on the next `update`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubmitStatus {
    /// Inert until activated
    Skip,
    /// Activated for one frame, then back to `Skip`
    SubmitOnceThenSkip,
    /// Submitted every frame
    AlwaysSubmit,
}

/// When the recording callback runs
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordMode {
    /// Once per frame-in-flight slot; later submissions replay the recording
    Once,
    /// Before every submission
    EveryFrame,
}
