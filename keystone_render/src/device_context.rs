/// DeviceContext - everything the core keeps per logical device
///
/// Owns the task dispatcher, the render resource registry and the command
/// buffer orchestrator of one device. There is no process-wide registry:
/// two devices get two contexts.

use std::sync::Arc;
use std::time::Duration;

use crate::command::{CommandBufferOrchestrator, CommandBufferRequest, OrderingPhase, SubOrder};
use crate::config::Config;
use crate::error::{Error, Result};
use crate::frame::FrameTracker;
use crate::graphics_device::{GraphicsDevice, QueueType, SyncPoint};
use crate::handle::{Handle, HandleTypeRegistry};
use crate::resource::RenderResourceRegistry;
use crate::task::{Task, TaskDispatcher, WorkerRegistration};
use crate::{engine_debug, engine_error, engine_info};

/// Owning-thread state that task completions are applied to
pub struct DeviceState {
    pub resources: RenderResourceRegistry,
    pub command_buffers: CommandBufferOrchestrator,
    device: Arc<dyn GraphicsDevice>,
}

impl DeviceState {
    /// Device the registries belong to (needed by `CommandBufferOrchestrator::add`)
    pub fn device(&self) -> &dyn GraphicsDevice {
        self.device.as_ref()
    }

    /// Register a command buffer on this device
    pub fn add_command_buffer(
        &mut self,
        request: CommandBufferRequest,
        always_submit: bool,
        queue_type: QueueType,
        phase: OrderingPhase,
        sub_order: SubOrder,
    ) -> Result<Handle> {
        self.command_buffers.add(self.device.as_ref(), request, always_submit, queue_type, phase, sub_order)
    }
}

/// Outcome of one `run_frame`
#[derive(Debug)]
pub struct FrameReport {
    /// Completion point of the frame's last submission
    pub completion: SyncPoint,
    /// Task completions applied before the frame
    pub drained: usize,
    /// Errors returned by those completions
    pub completion_failures: Vec<Error>,
    /// Dynamic resources re-uploaded for this frame
    pub refreshed: usize,
}

/// Per-device core context
///
/// # Example
///
/// ```no_run
/// use std::sync::Arc;
/// use keystone_render::keystone::{Config, DeviceContext, FrameTracker};
/// use keystone_render::keystone::render::GraphicsDevice;
///
/// fn frame_loop(device: Arc<dyn GraphicsDevice>) -> keystone_render::keystone::Result<()> {
///     let mut context = DeviceContext::new(device, Config::default())?;
///     let mut frame = FrameTracker::new(context.config().frames_in_flight);
///     // ... register a MainRenderPass command buffer, resources, workers ...
///     loop {
///         let report = context.run_frame(&frame)?;
///         # let _ = report;
///         frame.advance();
///         # break;
///     }
///     context.shutdown()
/// }
/// ```
pub struct DeviceContext {
    device: Arc<dyn GraphicsDevice>,
    config: Config,
    types: HandleTypeRegistry,
    dispatcher: TaskDispatcher<DeviceState>,
    state: DeviceState,
    shut_down: bool,
}

impl DeviceContext {
    /// Build the context: validates `config`, starts the transfer worker
    ///
    /// # Errors
    ///
    /// Returns `Error::InitializationFailed` for an invalid config or when
    /// the device offers no dedicated transfer queue.
    pub fn new(device: Arc<dyn GraphicsDevice>, config: Config) -> Result<Self> {
        config.validate()?;

        let mut types = HandleTypeRegistry::new();
        let resource_tag = types.register_type("render_resource")?;
        let command_tag = types.register_type("command_buffer")?;

        let resources = RenderResourceRegistry::new(Arc::clone(&device), resource_tag, &config)?;
        let command_buffers = CommandBufferOrchestrator::new(command_tag, &config);
        let dispatcher = TaskDispatcher::new(&config);

        engine_info!("keystone::DeviceContext", "Device context ready ({} frames in flight)",
            config.frames_in_flight);

        Ok(Self {
            state: DeviceState {
                resources,
                command_buffers,
                device: Arc::clone(&device),
            },
            device,
            config,
            types,
            dispatcher,
            shut_down: false,
        })
    }

    pub fn device(&self) -> &Arc<dyn GraphicsDevice> {
        &self.device
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Type tags of the handles this context hands out
    pub fn handle_types(&self) -> &HandleTypeRegistry {
        &self.types
    }

    pub fn state(&self) -> &DeviceState {
        &self.state
    }

    pub fn state_mut(&mut self) -> &mut DeviceState {
        &mut self.state
    }

    pub fn resources(&self) -> &RenderResourceRegistry {
        &self.state.resources
    }

    pub fn resources_mut(&mut self) -> &mut RenderResourceRegistry {
        &mut self.state.resources
    }

    pub fn command_buffers(&self) -> &CommandBufferOrchestrator {
        &self.state.command_buffers
    }

    pub fn command_buffers_mut(&mut self) -> &mut CommandBufferOrchestrator {
        &mut self.state.command_buffers
    }

    /// See `DeviceState::add_command_buffer`
    pub fn add_command_buffer(
        &mut self,
        request: CommandBufferRequest,
        always_submit: bool,
        queue_type: QueueType,
        phase: OrderingPhase,
        sub_order: SubOrder,
    ) -> Result<Handle> {
        self.state.add_command_buffer(request, always_submit, queue_type, phase, sub_order)
    }

    // ===== TASKS =====

    /// Create or grow the worker pool `name`
    pub fn register_worker(&mut self, name: &str, threads: usize) -> Result<WorkerRegistration> {
        self.dispatcher.register_worker(name, threads)
    }

    pub fn submit_task(&self, task: Box<dyn Task<DeviceState>>) -> Result<()> {
        self.dispatcher.submit(task)
    }

    /// Block until every submitted task executed (its completion may still be queued)
    pub fn wait_tasks_idle(&self, timeout: Duration) -> Result<()> {
        self.dispatcher.wait_idle(timeout)
    }

    pub fn dispatcher(&self) -> &TaskDispatcher<DeviceState> {
        &self.dispatcher
    }

    // ===== FRAME =====

    /// Run the per-frame sequence
    ///
    /// 1. apply queued task completions
    /// 2. refresh stale dynamic resources (returns once their uploads landed)
    /// 3. submit this frame's command buffers in order
    ///
    /// # Errors
    ///
    /// Refresh or submission errors; completion errors are only reported
    /// in the `FrameReport`.
    pub fn run_frame(&mut self, frame: &FrameTracker) -> Result<FrameReport> {
        if self.shut_down {
            return Err(Error::DeviceLost("device context is shut down".to_string()));
        }

        let drain = self.dispatcher.drain_completions(&mut self.state, None);
        let refreshed = self.state.resources.update(frame.frame_in_flight_index())?;
        let completion = self.state.command_buffers.update(self.device.as_ref(), frame)?;

        engine_debug!("keystone::DeviceContext", "Frame {}: {} completion(s), {} refresh(es)",
            frame.frame_id(), drain.applied, refreshed);

        Ok(FrameReport {
            completion,
            drained: drain.applied,
            completion_failures: drain.failures,
            refreshed,
        })
    }

    // ===== TEARDOWN =====

    /// Drain workers, release every GPU object, wait for the device
    ///
    /// Order: task pools (their completions still applied), then the
    /// transfer worker and resources, then command buffers, then device
    /// idle. Idempotent; returns the first error met.
    pub fn shutdown(&mut self) -> Result<()> {
        if self.shut_down {
            return Ok(());
        }
        self.shut_down = true;

        let drained = self.dispatcher.shutdown_draining(&mut self.state);
        if !drained.is_clean() {
            engine_error!("keystone::DeviceContext", "{} completion(s) failed during shutdown",
                drained.failures.len());
        }

        let resources = self.state.resources.cleanup();
        let command_buffers = self.state.command_buffers.cleanup(self.device.as_ref());
        let idle = self.device.wait_idle();

        engine_info!("keystone::DeviceContext", "Device context shut down");
        resources.and(command_buffers).and(idle)
    }
}

impl Drop for DeviceContext {
    fn drop(&mut self) {
        if let Err(e) = self.shutdown() {
            engine_error!("keystone::DeviceContext", "Shutdown on drop failed: {}", e);
        }
    }
}

#[cfg(test)]
#[path = "device_context_tests.rs"]
mod tests;
