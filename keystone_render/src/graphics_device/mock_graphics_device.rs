/// Mock graphics device for unit tests (no GPU required)
///
/// Executes "GPU" work instantly on the calling thread: submissions signal
/// their semaphores immediately, uploads copy bytes into `MockBuffer` /
/// `MockImage` contents. Every submission and upload is recorded so tests
/// can assert ordering and wait sets.

use std::any::Any;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::time::{Duration, Instant};
use rustc_hash::FxHashMap;

use crate::error::{Error, Result};
use crate::graphics_device::{
    Buffer, BufferDesc, CommandBuffer, GpuResource, GraphicsDevice, Image, ImageDesc,
    QueueCapabilities, QueueFamilyInfo, QueueSlot, QueueType, Semaphore, SemaphoreKind,
    SemaphoreWait, SubmitInfo, SyncPoint, TransferQueue,
};
use crate::engine_bail;

// ============================================================================
// Mock Buffer / Image
// ============================================================================

pub struct MockBuffer {
    pub desc: BufferDesc,
    pub contents: Mutex<Vec<u8>>,
}

impl MockBuffer {
    pub fn new(desc: BufferDesc) -> Self {
        let size = desc.size as usize;
        Self { desc, contents: Mutex::new(vec![0; size]) }
    }

    pub fn contents(&self) -> Vec<u8> {
        self.contents.lock().unwrap().clone()
    }
}

impl Buffer for MockBuffer {
    fn desc(&self) -> &BufferDesc {
        &self.desc
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

pub struct MockImage {
    pub desc: ImageDesc,
    pub contents: Mutex<Vec<u8>>,
}

impl MockImage {
    pub fn new(desc: ImageDesc) -> Self {
        let size = desc.size_bytes() as usize;
        Self { desc, contents: Mutex::new(vec![0; size]) }
    }

    pub fn contents(&self) -> Vec<u8> {
        self.contents.lock().unwrap().clone()
    }
}

impl Image for MockImage {
    fn desc(&self) -> &ImageDesc {
        &self.desc
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// Contents of a resource created by the mock device
pub fn resource_contents(resource: &GpuResource) -> Vec<u8> {
    match resource {
        GpuResource::Buffer(buffer) => buffer.as_any().downcast_ref::<MockBuffer>()
            .map(MockBuffer::contents)
            .unwrap_or_default(),
        GpuResource::Image(image) => image.as_any().downcast_ref::<MockImage>()
            .map(MockImage::contents)
            .unwrap_or_default(),
    }
}

// ============================================================================
// Mock Command Buffer
// ============================================================================

pub struct MockCommandBuffer {
    pub name: String,
    pub queue_type: QueueType,
    pub raw: u64,
    pub recording: bool,
    /// Commands recorded since the last begin()
    pub commands: Vec<String>,
    pub begin_count: usize,
}

impl CommandBuffer for MockCommandBuffer {
    fn name(&self) -> &str {
        &self.name
    }

    fn queue_type(&self) -> QueueType {
        self.queue_type
    }

    fn begin(&mut self) -> Result<()> {
        if self.recording {
            engine_bail!("keystone::mock", "Command buffer '{}' is already recording", self.name);
        }
        self.recording = true;
        self.begin_count += 1;
        self.commands.clear();
        Ok(())
    }

    fn end(&mut self) -> Result<()> {
        if !self.recording {
            engine_bail!("keystone::mock", "Command buffer '{}' is not recording", self.name);
        }
        self.recording = false;
        Ok(())
    }

    fn insert_label(&mut self, label: &str) -> Result<()> {
        self.commands.push(format!("label:{}", label));
        Ok(())
    }

    fn raw(&self) -> u64 {
        self.raw
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

// ============================================================================
// Recorded activity
// ============================================================================

/// A recorded queue submission
#[derive(Debug, Clone)]
pub struct MockSubmission {
    pub queue_type: QueueType,
    /// Names of the submitted command buffers
    pub command_buffers: Vec<String>,
    pub waits: Vec<SemaphoreWait>,
    pub signals: Vec<SyncPoint>,
}

/// A recorded upload
#[derive(Debug, Clone)]
pub struct MockUpload {
    pub slot: QueueSlot,
    pub target: String,
    pub bytes: usize,
    pub thread: String,
}

// ============================================================================
// Shared device state
// ============================================================================

#[derive(Default)]
struct MockDeviceState {
    next_raw: AtomicU64,
    /// raw → (kind, timeline value)
    semaphores: Mutex<FxHashMap<u64, (SemaphoreKind, u64)>>,
    destroyed_semaphores: AtomicUsize,
    command_buffer_names: Mutex<FxHashMap<u64, String>>,
    destroyed_command_buffers: AtomicUsize,
    submissions: Mutex<Vec<MockSubmission>>,
    uploads: Mutex<Vec<MockUpload>>,
    fail_allocations: AtomicBool,
    fail_submissions: AtomicBool,
    fail_uploads: AtomicBool,
    upload_delay: Mutex<Duration>,
    uploads_paused: Mutex<bool>,
    uploads_resumed: Condvar,
}

impl MockDeviceState {
    fn next_raw(&self) -> u64 {
        self.next_raw.fetch_add(1, Ordering::Relaxed) + 1
    }

    fn signal(&self, point: &SyncPoint) {
        let mut semaphores = self.semaphores.lock().unwrap();
        if let Some((_, value)) = semaphores.get_mut(&point.semaphore.raw()) {
            *value = point.value.unwrap_or(*value + 1).max(*value);
        }
    }
}

// ============================================================================
// Mock Graphics Device
// ============================================================================

/// In-process device with one universal family (0) and a dedicated transfer family (1)
pub struct MockGraphicsDevice {
    families: Vec<QueueFamilyInfo>,
    claimed: Vec<u32>,
    state: Arc<MockDeviceState>,
}

impl MockGraphicsDevice {
    pub fn new() -> Self {
        Self::with_families(
            vec![
                QueueFamilyInfo {
                    index: 0,
                    capabilities: QueueCapabilities::all(),
                    queue_count: 1,
                },
                QueueFamilyInfo {
                    index: 1,
                    capabilities: QueueCapabilities::TRANSFER,
                    queue_count: 2,
                },
            ],
            vec![0],
        )
    }

    pub fn with_families(families: Vec<QueueFamilyInfo>, claimed: Vec<u32>) -> Self {
        Self {
            families,
            claimed,
            state: Arc::new(MockDeviceState::default()),
        }
    }

    pub fn submissions(&self) -> Vec<MockSubmission> {
        self.state.submissions.lock().unwrap().clone()
    }

    pub fn clear_submissions(&self) {
        self.state.submissions.lock().unwrap().clear();
    }

    pub fn uploads(&self) -> Vec<MockUpload> {
        self.state.uploads.lock().unwrap().clone()
    }

    pub fn live_semaphores(&self) -> usize {
        self.state.semaphores.lock().unwrap().len()
    }

    pub fn destroyed_semaphores(&self) -> usize {
        self.state.destroyed_semaphores.load(Ordering::Relaxed)
    }

    pub fn destroyed_command_buffers(&self) -> usize {
        self.state.destroyed_command_buffers.load(Ordering::Relaxed)
    }

    pub fn set_fail_allocations(&self, fail: bool) {
        self.state.fail_allocations.store(fail, Ordering::Relaxed);
    }

    pub fn set_fail_submissions(&self, fail: bool) {
        self.state.fail_submissions.store(fail, Ordering::Relaxed);
    }

    pub fn set_fail_uploads(&self, fail: bool) {
        self.state.fail_uploads.store(fail, Ordering::Relaxed);
    }

    pub fn set_upload_delay(&self, delay: Duration) {
        *self.state.upload_delay.lock().unwrap() = delay;
    }

    /// Block every transfer thread at the start of its next upload
    pub fn pause_uploads(&self) {
        *self.state.uploads_paused.lock().unwrap() = true;
    }

    pub fn resume_uploads(&self) {
        *self.state.uploads_paused.lock().unwrap() = false;
        self.state.uploads_resumed.notify_all();
    }
}

impl GraphicsDevice for MockGraphicsDevice {
    fn queue_families(&self) -> Vec<QueueFamilyInfo> {
        self.families.clone()
    }

    fn claimed_queue_families(&self) -> Vec<u32> {
        self.claimed.clone()
    }

    fn create_buffer(&self, desc: &BufferDesc) -> Result<Arc<dyn Buffer>> {
        if self.state.fail_allocations.load(Ordering::Relaxed) {
            return Err(Error::OutOfMemory);
        }
        Ok(Arc::new(MockBuffer::new(desc.clone())))
    }

    fn create_image(&self, desc: &ImageDesc) -> Result<Arc<dyn Image>> {
        if self.state.fail_allocations.load(Ordering::Relaxed) {
            return Err(Error::OutOfMemory);
        }
        Ok(Arc::new(MockImage::new(desc.clone())))
    }

    fn create_semaphore(&self, kind: SemaphoreKind) -> Result<Semaphore> {
        let raw = self.state.next_raw();
        self.state.semaphores.lock().unwrap().insert(raw, (kind, 0));
        Ok(Semaphore::new(raw, kind))
    }

    fn destroy_semaphore(&self, semaphore: Semaphore) {
        if self.state.semaphores.lock().unwrap().remove(&semaphore.raw()).is_some() {
            self.state.destroyed_semaphores.fetch_add(1, Ordering::Relaxed);
        }
    }

    fn semaphore_value(&self, semaphore: Semaphore) -> Result<u64> {
        self.state.semaphores.lock().unwrap()
            .get(&semaphore.raw())
            .map(|(_, value)| *value)
            .ok_or_else(|| Error::InvalidHandle(format!("unknown semaphore {}", semaphore.raw())))
    }

    fn wait_semaphore(&self, semaphore: Semaphore, value: u64, timeout: Duration) -> Result<()> {
        let deadline = Instant::now() + timeout;
        loop {
            if self.semaphore_value(semaphore)? >= value {
                return Ok(());
            }
            if Instant::now() >= deadline {
                return Err(Error::Timeout(format!("semaphore {} never reached {}", semaphore.raw(), value)));
            }
            std::thread::sleep(Duration::from_micros(50));
        }
    }

    fn create_command_buffer(&self, queue_type: QueueType, name: &str) -> Result<Box<dyn CommandBuffer>> {
        let raw = self.state.next_raw();
        self.state.command_buffer_names.lock().unwrap().insert(raw, name.to_string());
        Ok(Box::new(MockCommandBuffer {
            name: name.to_string(),
            queue_type,
            raw,
            recording: false,
            commands: Vec::new(),
            begin_count: 0,
        }))
    }

    fn destroy_command_buffer(&self, command_buffer: Box<dyn CommandBuffer>) {
        self.state.command_buffer_names.lock().unwrap().remove(&command_buffer.raw());
        self.state.destroyed_command_buffers.fetch_add(1, Ordering::Relaxed);
    }

    fn submit(&self, queue_type: QueueType, info: &SubmitInfo) -> Result<()> {
        if self.state.fail_submissions.load(Ordering::Relaxed) {
            return Err(Error::SubmissionFailed("mock submission failure".to_string()));
        }

        let names = {
            let table = self.state.command_buffer_names.lock().unwrap();
            info.command_buffers.iter()
                .map(|raw| table.get(raw).cloned().unwrap_or_else(|| format!("#{}", raw)))
                .collect()
        };

        self.state.submissions.lock().unwrap().push(MockSubmission {
            queue_type,
            command_buffers: names,
            waits: info.waits.clone(),
            signals: info.signals.clone(),
        });

        for signal in &info.signals {
            self.state.signal(signal);
        }
        Ok(())
    }

    fn create_transfer_queue(&self, slot: QueueSlot) -> Result<Box<dyn TransferQueue>> {
        Ok(Box::new(MockTransferQueue {
            slot,
            state: Arc::clone(&self.state),
        }))
    }

    fn wait_idle(&self) -> Result<()> {
        Ok(())
    }
}

// ============================================================================
// Mock Transfer Queue
// ============================================================================

pub struct MockTransferQueue {
    slot: QueueSlot,
    state: Arc<MockDeviceState>,
}

impl TransferQueue for MockTransferQueue {
    fn slot(&self) -> QueueSlot {
        self.slot
    }

    fn upload(&mut self, target: &GpuResource, data: &[u8], signal: Option<SyncPoint>) -> Result<()> {
        {
            let mut paused = self.state.uploads_paused.lock().unwrap();
            while *paused {
                paused = self.state.uploads_resumed.wait(paused).unwrap();
            }
        }

        let delay = *self.state.upload_delay.lock().unwrap();
        if !delay.is_zero() {
            std::thread::sleep(delay);
        }

        if self.state.fail_uploads.load(Ordering::Relaxed) {
            return Err(Error::OutOfMemory);
        }

        let contents = match target {
            GpuResource::Buffer(buffer) => buffer.as_any().downcast_ref::<MockBuffer>().map(|b| &b.contents),
            GpuResource::Image(image) => image.as_any().downcast_ref::<MockImage>().map(|i| &i.contents),
        };
        let Some(contents) = contents else {
            engine_bail!("keystone::mock", "Upload target '{}' was not created by the mock device", target.name());
        };
        {
            let mut contents = contents.lock().unwrap();
            contents[..data.len()].copy_from_slice(data);
        }

        self.state.uploads.lock().unwrap().push(MockUpload {
            slot: self.slot,
            target: target.name().to_string(),
            bytes: data.len(),
            thread: std::thread::current().name().unwrap_or("").to_string(),
        });

        if let Some(signal) = signal {
            self.state.signal(&signal);
        }
        Ok(())
    }

    fn wait_idle(&mut self) -> Result<()> {
        Ok(())
    }
}

#[cfg(test)]
#[path = "mock_graphics_device_tests.rs"]
mod tests;
