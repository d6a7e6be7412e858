/// Frame tracker: global frame counter plus frame-in-flight index
///
/// Owned and advanced by whatever drives frame pacing; everything in this
/// crate only reads it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameTracker {
    frame_id: u64,
    frames_in_flight: u32,
}

impl FrameTracker {
    /// Create a tracker at frame 0
    ///
    /// `frames_in_flight` is clamped to at least 1.
    pub fn new(frames_in_flight: u32) -> Self {
        Self {
            frame_id: 0,
            frames_in_flight: frames_in_flight.max(1),
        }
    }

    /// Global frame counter
    pub fn frame_id(&self) -> u64 {
        self.frame_id
    }

    /// Slot of the current frame in per-frame-in-flight arrays
    pub fn frame_in_flight_index(&self) -> u32 {
        (self.frame_id % self.frames_in_flight as u64) as u32
    }

    pub fn frames_in_flight(&self) -> u32 {
        self.frames_in_flight
    }

    /// Move to the next frame
    pub fn advance(&mut self) {
        self.frame_id += 1;
    }
}
