/// CommandBufferOrchestrator - ordered, semaphore-chained command buffer submission
///
/// Command buffers register at a `(phase, sub_order)` coordinate. Once per
/// frame `update` submits every active buffer in coordinate order; each
/// submission waits on the completion point of the one before it, so the
/// declared order holds on the GPU whatever queue each buffer targets.
///
/// ```text
/// BeforeRenderPass:  [1] -> [2] -> [3]
///                                     \
/// MainRenderPass:                      [main]
///                                         \
/// AfterRenderPass / EndOfFrame / ...:      [1] -> [2] -> ... -> tail (returned)
/// ```

use std::time::Duration;

use crate::command::{
    CommandBufferRequest, OrderingPhase, RecordFn, RecordMode, SubOrder, SubmissionStrategy,
    SubmitContext, SubmitStatus,
};
use crate::config::Config;
use crate::error::{Error, Result};
use crate::frame::FrameTracker;
use crate::graphics_device::{
    CommandBuffer, GraphicsDevice, PipelineStages, QueueType, Semaphore, SemaphoreKind,
    SemaphoreWait, SubmitInfo, SyncPoint,
};
use crate::handle::{Handle, TypeTag};
use crate::utils::{SlotAllocator, SlotId};
use crate::{engine_debug, engine_error, engine_fail, engine_panic, engine_warn};

const PHASE_COUNT: usize = OrderingPhase::ALL.len();
const SUB_ORDER_COUNT: usize = SubOrder::ALL.len();

/// A registered command buffer
pub struct CommandBufferEntry {
    generation: u32,
    name: String,
    queue_type: QueueType,
    phase: OrderingPhase,
    sub_order: SubOrder,
    record_mode: RecordMode,
    always_submit: bool,
    status: SubmitStatus,
    /// One physical buffer per frame-in-flight slot
    command_buffers: Vec<Box<dyn CommandBuffer>>,
    /// Per slot: already recorded (for `RecordMode::Once`)
    recorded: Vec<bool>,
    recorder: RecordFn,
    strategy: SubmissionStrategy,
    wait_stages: PipelineStages,
    completion: Semaphore,
    completion_value: u64,
    /// Point signaled by the latest submission (may come from an override)
    last_signal: Option<SyncPoint>,
    one_time_waits: Vec<SemaphoreWait>,
    submit_count: u64,
}

impl CommandBufferEntry {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn queue_type(&self) -> QueueType {
        self.queue_type
    }

    pub fn phase(&self) -> OrderingPhase {
        self.phase
    }

    pub fn sub_order(&self) -> SubOrder {
        self.sub_order
    }

    pub fn record_mode(&self) -> RecordMode {
        self.record_mode
    }

    pub fn status(&self) -> SubmitStatus {
        self.status
    }

    pub fn is_always_submit(&self) -> bool {
        self.always_submit
    }

    /// Point signaled by the latest submission, `None` before the first one
    pub fn last_completion(&self) -> Option<SyncPoint> {
        self.last_signal
    }

    /// One-time waits still attached for the next submission
    pub fn pending_one_time_waits(&self) -> &[SemaphoreWait] {
        &self.one_time_waits
    }

    /// Submissions made so far
    pub fn submit_count(&self) -> u64 {
        self.submit_count
    }
}

/// Orders and submits the command buffers of one device
pub struct CommandBufferOrchestrator {
    type_tag: TypeTag,
    frames_in_flight: u32,
    sync_timeout: Duration,
    slots: SlotAllocator,
    entries: Vec<Option<CommandBufferEntry>>,
    /// `(phase, sub_order)` → slot index
    grid: [[Option<u32>; SUB_ORDER_COUNT]; PHASE_COUNT],
    main: Option<u32>,
    /// Slot indices in submission order, rebuilt lazily
    chain: Vec<u32>,
    chain_dirty: bool,
    chain_rebuilds: u64,
    /// Activation requests, flushed last-in first-out at the next update
    activations: Vec<Handle>,
    external_waits: Vec<SemaphoreWait>,
    last_submission_order: Vec<Handle>,
}

impl CommandBufferOrchestrator {
    pub fn new(type_tag: TypeTag, config: &Config) -> Self {
        Self {
            type_tag,
            frames_in_flight: config.frames_in_flight.max(1),
            sync_timeout: config.sync_timeout,
            slots: SlotAllocator::with_capacity((PHASE_COUNT * SUB_ORDER_COUNT) as u32),
            entries: Vec::new(),
            grid: [[None; SUB_ORDER_COUNT]; PHASE_COUNT],
            main: None,
            chain: Vec::new(),
            chain_dirty: false,
            chain_rebuilds: 0,
            activations: Vec::new(),
            external_waits: Vec::new(),
            last_submission_order: Vec::new(),
        }
    }

    // ===== REGISTRATION =====

    /// Register a command buffer at `(phase, sub_order)`
    ///
    /// Allocates one command buffer per frame-in-flight slot plus a timeline
    /// completion semaphore. Buffers without `always_submit` stay inert until
    /// `request_submit_this_frame`. The `MainRenderPass` buffer is submitted
    /// every frame regardless.
    ///
    /// # Errors
    ///
    /// - `Error::CapacityExceeded` if the coordinate is already taken
    /// - `Error::InvalidResource` for a second `MainRenderPass` buffer
    /// - the device error if a command buffer or semaphore cannot be created
    pub fn add(
        &mut self,
        device: &dyn GraphicsDevice,
        request: CommandBufferRequest,
        always_submit: bool,
        queue_type: QueueType,
        phase: OrderingPhase,
        sub_order: SubOrder,
    ) -> Result<Handle> {
        if phase == OrderingPhase::MainRenderPass && self.main.is_some() {
            return Err(engine_fail!("keystone::CommandBufferOrchestrator", Error::InvalidResource,
                "'{}' cannot be a second main render pass buffer", request.name));
        }
        if let Some(occupant) = self.grid[phase.index()][sub_order.index()] {
            let occupant = self.entry_name(occupant);
            return Err(engine_fail!("keystone::CommandBufferOrchestrator", Error::CapacityExceeded,
                "'{}' cannot take ({:?}, {:?}): already held by '{}'", request.name, phase, sub_order, occupant));
        }

        let mut command_buffers = Vec::with_capacity(self.frames_in_flight as usize);
        for _ in 0..self.frames_in_flight {
            match device.create_command_buffer(queue_type, &request.name) {
                Ok(command_buffer) => command_buffers.push(command_buffer),
                Err(e) => {
                    command_buffers.into_iter().for_each(|cb| device.destroy_command_buffer(cb));
                    return Err(e);
                }
            }
        }
        let completion = match device.create_semaphore(SemaphoreKind::Timeline) {
            Ok(semaphore) => semaphore,
            Err(e) => {
                command_buffers.into_iter().for_each(|cb| device.destroy_command_buffer(cb));
                return Err(e);
            }
        };

        let Some(slot) = self.slots.alloc() else {
            command_buffers.into_iter().for_each(|cb| device.destroy_command_buffer(cb));
            device.destroy_semaphore(completion);
            return Err(engine_fail!("keystone::CommandBufferOrchestrator", Error::CapacityExceeded,
                "Command buffer table full while adding '{}'", request.name));
        };

        if phase == OrderingPhase::MainRenderPass && matches!(request.strategy, SubmissionStrategy::Default) {
            engine_warn!("keystone::CommandBufferOrchestrator",
                "Main render pass buffer '{}' has no before-submit hook or override", request.name);
        }

        let entry = CommandBufferEntry {
            generation: slot.generation,
            name: request.name,
            queue_type,
            phase,
            sub_order,
            record_mode: request.record_mode,
            always_submit,
            status: if always_submit { SubmitStatus::AlwaysSubmit } else { SubmitStatus::Skip },
            recorded: vec![false; command_buffers.len()],
            command_buffers,
            recorder: request.recorder,
            strategy: request.strategy,
            wait_stages: request.wait_stages,
            completion,
            completion_value: 0,
            last_signal: None,
            one_time_waits: Vec::new(),
            submit_count: 0,
        };

        let index = slot.index as usize;
        if self.entries.len() <= index {
            self.entries.resize_with(index + 1, || None);
        }
        engine_debug!("keystone::CommandBufferOrchestrator", "Added '{}' at ({:?}, {:?}) on {:?}",
            entry.name, phase, sub_order, queue_type);
        self.entries[index] = Some(entry);
        self.grid[phase.index()][sub_order.index()] = Some(slot.index);
        if phase == OrderingPhase::MainRenderPass {
            self.main = Some(slot.index);
        }
        self.chain_dirty = true;

        Ok(Handle::new(self.type_tag, slot.index, slot.generation))
    }

    /// Unregister a command buffer and release its GPU objects
    ///
    /// Waits for its latest submission to complete first.
    pub fn remove(&mut self, device: &dyn GraphicsDevice, handle: Handle) -> Result<()> {
        let index = self.live_index(handle)?;
        let Some(entry) = self.entries[index as usize].take() else {
            return Err(stale_handle(handle));
        };
        self.slots.free(index);
        self.grid[entry.phase.index()][entry.sub_order.index()] = None;
        if self.main == Some(index) {
            self.main = None;
        }
        self.chain_dirty = true;
        release_entry(device, entry, self.sync_timeout)
    }

    // ===== ACCESS =====

    fn live_index(&self, handle: Handle) -> Result<u32> {
        let slot = SlotId { index: handle.id(), generation: handle.generation() };
        if handle.type_tag() != self.type_tag || !self.slots.is_live(slot) {
            return Err(stale_handle(handle));
        }
        Ok(handle.id())
    }

    fn entry_name(&self, index: u32) -> String {
        self.entries.get(index as usize)
            .and_then(Option::as_ref)
            .map(|entry| entry.name.clone())
            .unwrap_or_default()
    }

    pub fn get(&self, handle: Handle) -> Result<&CommandBufferEntry> {
        let index = self.live_index(handle)?;
        self.entries[index as usize].as_ref().ok_or_else(|| stale_handle(handle))
    }

    fn get_mut(&mut self, handle: Handle) -> Result<&mut CommandBufferEntry> {
        let index = self.live_index(handle)?;
        self.entries[index as usize].as_mut().ok_or_else(|| stale_handle(handle))
    }

    /// Handle of the `MainRenderPass` buffer
    pub fn main_handle(&self) -> Option<Handle> {
        let index = self.main?;
        let entry = self.entries.get(index as usize)?.as_ref()?;
        Some(Handle::new(self.type_tag, index, entry.generation))
    }

    pub fn len(&self) -> usize {
        self.slots.len() as usize
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    // ===== PER-FRAME CONTROL =====

    /// Submit a non-always-submit buffer once, at the next `update`
    pub fn request_submit_this_frame(&mut self, handle: Handle) -> Result<()> {
        self.live_index(handle)?;
        self.activations.push(handle);
        Ok(())
    }

    /// Attach a wait consumed by the next successful submission of `target`
    pub fn insert_one_time_wait(&mut self, target: Handle, wait: SemaphoreWait) -> Result<()> {
        self.get_mut(target)?.one_time_waits.push(wait);
        Ok(())
    }

    /// Waits for the first buffer submitted by the next `update` (e.g. image acquired)
    ///
    /// Consumed once that update submitted its first buffer; kept for the
    /// next update if nothing could be submitted.
    pub fn set_external_waits(&mut self, waits: Vec<SemaphoreWait>) {
        self.external_waits = waits;
    }

    /// Handles submitted by the last `update`, in submission order
    pub fn last_submission_order(&self) -> &[Handle] {
        &self.last_submission_order
    }

    /// How many times the submission chain was rebuilt
    pub fn chain_rebuild_count(&self) -> u64 {
        self.chain_rebuilds
    }

    fn flush_activations(&mut self) {
        while let Some(handle) = self.activations.pop() {
            if let Ok(entry) = self.get_mut(handle) {
                if entry.status == SubmitStatus::Skip {
                    entry.status = SubmitStatus::SubmitOnceThenSkip;
                }
            }
        }
    }

    fn rebuild_chain(&mut self) {
        self.chain = self.grid.iter()
            .flat_map(|phase| phase.iter().flatten().copied())
            .collect();
        self.chain_dirty = false;
        self.chain_rebuilds += 1;
        engine_debug!("keystone::CommandBufferOrchestrator", "Rebuilt submission chain ({} buffers)", self.chain.len());
    }

    /// Submit this frame's command buffers
    ///
    /// Every submitted buffer waits on the completion of the buffer submitted
    /// before it; the first one also waits on the external waits, and the
    /// first `EndOfFrame` buffer always waits on the main buffer. Returns the
    /// completion point of the last submission: this frame's GPU work.
    ///
    /// # Panics
    ///
    /// Panics when no `MainRenderPass` buffer is registered.
    ///
    /// # Errors
    ///
    /// A failing recorder, hook or override, or an override returning a null
    /// semaphore, is logged as fatal and returned; buffers after it in the
    /// chain are not submitted. The failed buffer keeps its one-time waits.
    pub fn update(&mut self, device: &dyn GraphicsDevice, frame: &FrameTracker) -> Result<SyncPoint> {
        let Some(main) = self.main else {
            engine_panic!("keystone::CommandBufferOrchestrator",
                "update() with no MainRenderPass command buffer registered");
        };

        self.flush_activations();
        if self.chain_dirty {
            self.rebuild_chain();
        }

        let slot = frame.frame_in_flight_index() as usize % self.frames_in_flight as usize;
        let mut previous: Option<SyncPoint> = None;
        let mut main_point: Option<SyncPoint> = None;
        let mut order = Vec::with_capacity(self.chain.len());
        let mut current_phase = None;
        let type_tag = self.type_tag;

        for position in 0..self.chain.len() {
            let index = self.chain[position];
            let Some(entry) = self.entries[index as usize].as_mut() else {
                continue;
            };
            if index != main && entry.status == SubmitStatus::Skip {
                continue;
            }

            let first_in_phase = current_phase != Some(entry.phase);
            current_phase = Some(entry.phase);

            let mut waits: Vec<SemaphoreWait> = self.external_waits.clone();
            if let Some(point) = previous {
                waits.push(point.as_wait(entry.wait_stages));
            }
            if first_in_phase && entry.phase == OrderingPhase::EndOfFrame {
                if let Some(point) = main_point {
                    if !waits.iter().any(|wait| point.is_waited_by(wait)) {
                        waits.push(point.as_wait(entry.wait_stages));
                    }
                }
            }
            waits.extend_from_slice(&entry.one_time_waits);

            let point = submit_entry(device, entry, frame, slot, &waits)?;
            entry.one_time_waits.clear();
            self.external_waits.clear();
            if entry.status == SubmitStatus::SubmitOnceThenSkip {
                entry.status = SubmitStatus::Skip;
            }
            if index == main {
                main_point = Some(point);
            }
            previous = Some(point);
            order.push(Handle::new(type_tag, index, entry.generation));
        }

        self.last_submission_order = order;
        previous.ok_or_else(|| engine_fail!("keystone::CommandBufferOrchestrator", Error::SubmissionFailed,
            "Frame {} submitted nothing", frame.frame_id()))
    }

    // ===== TEARDOWN =====

    /// Wait for every buffer's last submission, then release all GPU objects
    pub fn cleanup(&mut self, device: &dyn GraphicsDevice) -> Result<()> {
        let mut result = Ok(());
        for entry in self.entries.drain(..).flatten() {
            if let Err(e) = release_entry(device, entry, self.sync_timeout) {
                result = Err(e);
            }
        }
        self.slots = SlotAllocator::with_capacity(self.slots.capacity());
        self.grid = [[None; SUB_ORDER_COUNT]; PHASE_COUNT];
        self.main = None;
        self.chain.clear();
        self.chain_dirty = false;
        self.activations.clear();
        self.external_waits.clear();
        self.last_submission_order.clear();
        result
    }
}

impl Drop for CommandBufferOrchestrator {
    fn drop(&mut self) {
        if !self.slots.is_empty() {
            engine_warn!("keystone::CommandBufferOrchestrator",
                "Dropped with {} command buffer(s) never cleaned up", self.slots.len());
        }
    }
}

fn stale_handle(handle: Handle) -> Error {
    Error::InvalidHandle(format!("{:?} is not a live command buffer", handle))
}

/// Fatal log for a failing callback; the frame cannot be completed
fn callback_failure(entry: &str, what: &str, error: Error) -> Error {
    engine_fail!("keystone::CommandBufferOrchestrator", Error::SubmissionFailed,
        "FATAL: {} of '{}' failed: {}", what, entry, error)
}

fn submit_entry(
    device: &dyn GraphicsDevice,
    entry: &mut CommandBufferEntry,
    frame: &FrameTracker,
    slot: usize,
    waits: &[SemaphoreWait],
) -> Result<SyncPoint> {
    if let SubmissionStrategy::BeforeHook(hook) = &mut entry.strategy {
        hook(frame).map_err(|e| callback_failure(&entry.name, "before-submit hook", e))?;
    }

    let command_buffer = &mut entry.command_buffers[slot];
    if entry.record_mode == RecordMode::EveryFrame || !entry.recorded[slot] {
        command_buffer.begin()?;
        (entry.recorder)(command_buffer.as_mut(), frame)
            .map_err(|e| callback_failure(&entry.name, "recording", e))?;
        command_buffer.end()?;
        entry.recorded[slot] = true;
    }

    let signal = SyncPoint::new(entry.completion, Some(entry.completion_value + 1));

    let point = match &mut entry.strategy {
        SubmissionStrategy::Override(submit) => {
            let mut context = SubmitContext {
                device,
                queue_type: entry.queue_type,
                command_buffer: command_buffer.as_mut(),
                waits,
                frame,
                signal,
            };
            let point = submit(&mut context).map_err(|e| callback_failure(&entry.name, "override submission", e))?;
            if point.semaphore.is_null() {
                return Err(engine_fail!("keystone::CommandBufferOrchestrator", Error::SubmissionFailed,
                    "FATAL: override submission of '{}' returned no completion semaphore", entry.name));
            }
            point
        }
        SubmissionStrategy::Default | SubmissionStrategy::BeforeHook(_) => {
            let info = SubmitInfo {
                command_buffers: vec![command_buffer.raw()],
                waits: waits.to_vec(),
                signals: vec![signal],
            };
            device.submit(entry.queue_type, &info).map_err(|e| {
                engine_error!("keystone::CommandBufferOrchestrator", "FATAL: submission of '{}' failed: {}",
                    entry.name, e);
                e
            })?;
            signal
        }
    };

    entry.completion_value += 1;
    entry.last_signal = Some(point);
    entry.submit_count += 1;
    Ok(point)
}

/// Wait for the entry's latest submission, then destroy its GPU objects
///
/// Waits on the point that submission actually signals, which an override
/// may have taken from another semaphore. A binary point cannot be waited
/// on from the CPU, so the device is drained instead.
fn release_entry(device: &dyn GraphicsDevice, entry: CommandBufferEntry, timeout: Duration) -> Result<()> {
    let waited = match entry.last_signal {
        None => Ok(()),
        Some(SyncPoint { semaphore, value: Some(value) }) => device.wait_semaphore(semaphore, value, timeout),
        Some(SyncPoint { value: None, .. }) => device.wait_idle(),
    };
    if let Err(e) = &waited {
        engine_error!("keystone::CommandBufferOrchestrator", "'{}' still pending at release: {}", entry.name, e);
    }
    for command_buffer in entry.command_buffers {
        device.destroy_command_buffer(command_buffer);
    }
    device.destroy_semaphore(entry.completion);
    waited
}

#[cfg(test)]
#[path = "orchestrator_tests.rs"]
mod tests;
