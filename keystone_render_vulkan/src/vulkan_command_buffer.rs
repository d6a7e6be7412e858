/// VulkanCommandBuffer - Vulkan implementation of the CommandBuffer trait

use keystone_render::keystone::{Result, Error};
use keystone_render::keystone::render::{CommandBuffer, QueueType};
use keystone_render::engine_err;
use ash::vk;
use ash::vk::Handle;
use std::any::Any;
use std::ffi::CString;
use std::sync::Arc;

use crate::vulkan_context::GpuContext;

/// Primary command buffer with its own resettable pool
///
/// Recording callbacks downcast `&mut dyn CommandBuffer` to this type and
/// record through `device()` and `vk_command_buffer()`.
pub struct VulkanCommandBuffer {
    ctx: Arc<GpuContext>,
    name: String,
    queue_type: QueueType,
    command_pool: vk::CommandPool,
    command_buffer: vk::CommandBuffer,
    is_recording: bool,
}

impl VulkanCommandBuffer {
    pub(crate) fn new(ctx: Arc<GpuContext>, queue_type: QueueType, name: &str) -> Result<Self> {
        unsafe {
            let command_pool_create_info = vk::CommandPoolCreateInfo::default()
                .queue_family_index(ctx.graphics_queue_family)
                .flags(vk::CommandPoolCreateFlags::RESET_COMMAND_BUFFER);

            let command_pool = ctx.device.create_command_pool(&command_pool_create_info, None)
                .map_err(|e| engine_err!("keystone::vulkan", "Failed to create command pool for '{}': {:?}", name, e))?;

            let allocate_info = vk::CommandBufferAllocateInfo::default()
                .command_pool(command_pool)
                .level(vk::CommandBufferLevel::PRIMARY)
                .command_buffer_count(1);

            let command_buffer = match ctx.device.allocate_command_buffers(&allocate_info) {
                Ok(buffers) => buffers[0],
                Err(e) => {
                    ctx.device.destroy_command_pool(command_pool, None);
                    return Err(engine_err!("keystone::vulkan", "Failed to allocate command buffer '{}': {:?}", name, e));
                }
            };

            Ok(Self {
                ctx,
                name: name.to_string(),
                queue_type,
                command_pool,
                command_buffer,
                is_recording: false,
            })
        }
    }

    /// Logical device to record with
    pub fn device(&self) -> &ash::Device {
        &self.ctx.device
    }

    /// Underlying Vulkan command buffer
    pub fn vk_command_buffer(&self) -> vk::CommandBuffer {
        self.command_buffer
    }
}

impl CommandBuffer for VulkanCommandBuffer {
    fn name(&self) -> &str {
        &self.name
    }

    fn queue_type(&self) -> QueueType {
        self.queue_type
    }

    fn begin(&mut self) -> Result<()> {
        unsafe {
            self.ctx.device
                .reset_command_buffer(self.command_buffer, vk::CommandBufferResetFlags::empty())
                .map_err(|e| engine_err!("keystone::vulkan", "Failed to reset command buffer '{}': {:?}", self.name, e))?;

            self.ctx.device
                .begin_command_buffer(self.command_buffer, &vk::CommandBufferBeginInfo::default())
                .map_err(|e| engine_err!("keystone::vulkan", "Failed to begin command buffer '{}': {:?}", self.name, e))?;
        }
        self.is_recording = true;
        Ok(())
    }

    fn end(&mut self) -> Result<()> {
        if !self.is_recording {
            return Err(Error::BackendError(format!("Command buffer '{}' not recording", self.name)));
        }
        unsafe {
            self.ctx.device
                .end_command_buffer(self.command_buffer)
                .map_err(|e| engine_err!("keystone::vulkan", "Failed to end command buffer '{}': {:?}", self.name, e))?;
        }
        self.is_recording = false;
        Ok(())
    }

    fn insert_label(&mut self, label: &str) -> Result<()> {
        let Some(debug_utils) = &self.ctx.debug_utils_device else {
            return Ok(());
        };
        let label = CString::new(label)
            .map_err(|_| Error::BackendError(format!("Label of '{}' contains a NUL byte", self.name)))?;
        unsafe {
            debug_utils.cmd_insert_debug_utils_label(
                self.command_buffer,
                &vk::DebugUtilsLabelEXT::default().label_name(&label),
            );
        }
        Ok(())
    }

    fn raw(&self) -> u64 {
        self.command_buffer.as_raw()
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

impl Drop for VulkanCommandBuffer {
    fn drop(&mut self) {
        unsafe {
            // Frees the command buffer with it
            self.ctx.device.destroy_command_pool(self.command_pool, None);
        }
    }
}
