/// VulkanTransferQueue - per-thread upload context on a dedicated queue
///
/// Each upload: copy into a host-visible staging buffer, record a copy
/// (plus layout barriers for images), submit with the optional timeline
/// signal and a fence, then wait on the fence so the staging memory is free
/// for the next upload.

use keystone_render::keystone::{Result, Error};
use keystone_render::keystone::render::{GpuResource, QueueSlot, SyncPoint, TransferQueue};
use keystone_render::{engine_debug, engine_err, engine_error, engine_fail};
use ash::vk;
use gpu_allocator::vulkan::{Allocation, AllocationCreateDesc, AllocationScheme};
use gpu_allocator::MemoryLocation;
use std::sync::Arc;
use std::time::Duration;

use crate::vulkan_buffer::VulkanBuffer;
use crate::vulkan_context::GpuContext;
use crate::vulkan_image::{VulkanImage, COLOR_RANGE};
use crate::vulkan_sync::signal_to_vk;

/// Smallest staging buffer ever allocated
const MIN_STAGING_SIZE: u64 = 64 * 1024;

struct StagingBuffer {
    buffer: vk::Buffer,
    allocation: Allocation,
    capacity: u64,
}

pub struct VulkanTransferQueue {
    ctx: Arc<GpuContext>,
    slot: QueueSlot,
    queue: vk::Queue,
    command_pool: vk::CommandPool,
    command_buffer: vk::CommandBuffer,
    fence: vk::Fence,
    staging: Option<StagingBuffer>,
    timeout: Duration,
}

impl VulkanTransferQueue {
    pub(crate) fn new(ctx: Arc<GpuContext>, slot: QueueSlot, timeout: Duration) -> Result<Self> {
        unsafe {
            let queue = ctx.device.get_device_queue(slot.family_index, slot.queue_index);

            let pool_create_info = vk::CommandPoolCreateInfo::default()
                .queue_family_index(slot.family_index)
                .flags(vk::CommandPoolCreateFlags::TRANSIENT | vk::CommandPoolCreateFlags::RESET_COMMAND_BUFFER);

            let command_pool = ctx.device.create_command_pool(&pool_create_info, None)
                .map_err(|e| engine_fail!("keystone::vulkan", Error::InitializationFailed,
                    "Failed to create transfer command pool for queue {}/{}: {:?}", slot.family_index, slot.queue_index, e))?;

            let allocate_info = vk::CommandBufferAllocateInfo::default()
                .command_pool(command_pool)
                .level(vk::CommandBufferLevel::PRIMARY)
                .command_buffer_count(1);

            let command_buffer = match ctx.device.allocate_command_buffers(&allocate_info) {
                Ok(buffers) => buffers[0],
                Err(e) => {
                    ctx.device.destroy_command_pool(command_pool, None);
                    return Err(engine_fail!("keystone::vulkan", Error::InitializationFailed,
                        "Failed to allocate transfer command buffer: {:?}", e));
                }
            };

            let fence = match ctx.device.create_fence(&vk::FenceCreateInfo::default(), None) {
                Ok(fence) => fence,
                Err(e) => {
                    ctx.device.destroy_command_pool(command_pool, None);
                    return Err(engine_fail!("keystone::vulkan", Error::InitializationFailed,
                        "Failed to create transfer fence: {:?}", e));
                }
            };

            engine_debug!("keystone::vulkan", "Transfer queue {}/{} ready", slot.family_index, slot.queue_index);

            Ok(Self {
                ctx,
                slot,
                queue,
                command_pool,
                command_buffer,
                fence,
                staging: None,
                timeout,
            })
        }
    }

    /// Grow the staging buffer to hold `size` bytes
    fn ensure_staging(&mut self, size: u64) -> Result<&StagingBuffer> {
        let too_small = self.staging.as_ref().map_or(true, |staging| staging.capacity < size);
        if too_small {
            if let Some(old) = self.staging.take() {
                self.free_staging(old);
            }
            let capacity = size.max(MIN_STAGING_SIZE).next_power_of_two();
            self.staging = Some(self.create_staging(capacity)?);
        }
        self.staging
            .as_ref()
            .ok_or_else(|| Error::BackendError("staging buffer missing".to_string()))
    }

    fn create_staging(&self, capacity: u64) -> Result<StagingBuffer> {
        unsafe {
            let create_info = vk::BufferCreateInfo::default()
                .size(capacity)
                .usage(vk::BufferUsageFlags::TRANSFER_SRC)
                .sharing_mode(vk::SharingMode::EXCLUSIVE);

            let buffer = self.ctx.device.create_buffer(&create_info, None)
                .map_err(|e| engine_err!("keystone::vulkan", "Failed to create staging buffer ({} bytes): {:?}", capacity, e))?;

            let requirements = self.ctx.device.get_buffer_memory_requirements(buffer);
            let allocation = self.ctx.allocator.lock()
                .map_err(|_| Error::BackendError("allocator mutex poisoned".to_string()))
                .and_then(|mut allocator| {
                    allocator.allocate(&AllocationCreateDesc {
                        name: "transfer_staging",
                        requirements,
                        location: MemoryLocation::CpuToGpu,
                        linear: true,
                        allocation_scheme: AllocationScheme::GpuAllocatorManaged,
                    })
                    .map_err(|_| {
                        engine_error!("keystone::vulkan", "Out of host memory for a {} byte staging buffer", capacity);
                        Error::OutOfMemory
                    })
                });

            let allocation = match allocation {
                Ok(allocation) => allocation,
                Err(e) => {
                    self.ctx.device.destroy_buffer(buffer, None);
                    return Err(e);
                }
            };

            if let Err(e) = self.ctx.device.bind_buffer_memory(buffer, allocation.memory(), allocation.offset()) {
                self.free_staging(StagingBuffer { buffer, allocation, capacity });
                return Err(engine_err!("keystone::vulkan", "Failed to bind staging memory: {:?}", e));
            }

            Ok(StagingBuffer { buffer, allocation, capacity })
        }
    }

    fn free_staging(&self, staging: StagingBuffer) {
        unsafe {
            if let Ok(mut allocator) = self.ctx.allocator.lock() {
                allocator.free(staging.allocation).ok();
            }
            self.ctx.device.destroy_buffer(staging.buffer, None);
        }
    }

    fn record_copy(&self, target: &GpuResource, source: vk::Buffer, size: u64) -> Result<()> {
        let device = &self.ctx.device;
        let cmd = self.command_buffer;

        match target {
            GpuResource::Buffer(buffer) => {
                let buffer = buffer.as_any().downcast_ref::<VulkanBuffer>()
                    .ok_or_else(|| Error::InvalidResource(format!("'{}' is not a Vulkan buffer", target.name())))?;
                let region = vk::BufferCopy { src_offset: 0, dst_offset: 0, size };
                unsafe {
                    device.cmd_copy_buffer(cmd, source, buffer.buffer, &[region]);
                }
            }
            GpuResource::Image(image) => {
                let desc = image.desc();
                let image = image.as_any().downcast_ref::<VulkanImage>()
                    .ok_or_else(|| Error::InvalidResource(format!("'{}' is not a Vulkan image", target.name())))?;

                // Full overwrite: previous contents may be discarded
                let to_transfer = vk::ImageMemoryBarrier2::default()
                    .src_stage_mask(vk::PipelineStageFlags2::NONE)
                    .src_access_mask(vk::AccessFlags2::NONE)
                    .dst_stage_mask(vk::PipelineStageFlags2::COPY)
                    .dst_access_mask(vk::AccessFlags2::TRANSFER_WRITE)
                    .old_layout(vk::ImageLayout::UNDEFINED)
                    .new_layout(vk::ImageLayout::TRANSFER_DST_OPTIMAL)
                    .src_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
                    .dst_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
                    .image(image.image)
                    .subresource_range(COLOR_RANGE);

                let region = vk::BufferImageCopy::default()
                    .buffer_offset(0)
                    .image_subresource(vk::ImageSubresourceLayers {
                        aspect_mask: vk::ImageAspectFlags::COLOR,
                        mip_level: 0,
                        base_array_layer: 0,
                        layer_count: 1,
                    })
                    .image_extent(vk::Extent3D { width: desc.width, height: desc.height, depth: 1 });

                // Consumers synchronize through the timeline semaphore
                let to_shader_read = vk::ImageMemoryBarrier2::default()
                    .src_stage_mask(vk::PipelineStageFlags2::COPY)
                    .src_access_mask(vk::AccessFlags2::TRANSFER_WRITE)
                    .dst_stage_mask(vk::PipelineStageFlags2::NONE)
                    .dst_access_mask(vk::AccessFlags2::NONE)
                    .old_layout(vk::ImageLayout::TRANSFER_DST_OPTIMAL)
                    .new_layout(vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL)
                    .src_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
                    .dst_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
                    .image(image.image)
                    .subresource_range(COLOR_RANGE);

                unsafe {
                    device.cmd_pipeline_barrier2(cmd, &vk::DependencyInfo::default().image_memory_barriers(&[to_transfer]));
                    device.cmd_copy_buffer_to_image(cmd, source, image.image, vk::ImageLayout::TRANSFER_DST_OPTIMAL, &[region]);
                    device.cmd_pipeline_barrier2(cmd, &vk::DependencyInfo::default().image_memory_barriers(&[to_shader_read]));
                }
            }
        }
        Ok(())
    }
}

impl TransferQueue for VulkanTransferQueue {
    fn slot(&self) -> QueueSlot {
        self.slot
    }

    fn upload(&mut self, target: &GpuResource, data: &[u8], signal: Option<SyncPoint>) -> Result<()> {
        let size = data.len() as u64;
        if size > target.size_bytes() {
            return Err(Error::InvalidResource(format!(
                "{} bytes do not fit '{}' ({} bytes)", size, target.name(), target.size_bytes()
            )));
        }

        let staging = self.ensure_staging(size.max(1))?;
        let staging_buffer = staging.buffer;
        let mapped = staging.allocation.mapped_ptr()
            .ok_or_else(|| Error::BackendError("staging buffer is not host-visible".to_string()))?
            .as_ptr() as *mut u8;

        unsafe {
            std::ptr::copy_nonoverlapping(data.as_ptr(), mapped, data.len());

            let device = &self.ctx.device;
            device.reset_command_buffer(self.command_buffer, vk::CommandBufferResetFlags::empty())
                .map_err(|e| engine_err!("keystone::vulkan", "Failed to reset transfer command buffer: {:?}", e))?;
            device.begin_command_buffer(
                self.command_buffer,
                &vk::CommandBufferBeginInfo::default().flags(vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT),
            )
            .map_err(|e| engine_err!("keystone::vulkan", "Failed to begin transfer command buffer: {:?}", e))?;
        }

        // An aborted recording is reset by the next begin
        self.record_copy(target, staging_buffer, size)?;

        unsafe {
            let device = &self.ctx.device;
            device.end_command_buffer(self.command_buffer)
                .map_err(|e| engine_err!("keystone::vulkan", "Failed to end transfer command buffer: {:?}", e))?;

            let command_buffers = [vk::CommandBufferSubmitInfo::default().command_buffer(self.command_buffer)];
            let signals: Vec<vk::SemaphoreSubmitInfo> = signal.iter().map(signal_to_vk).collect();
            let submit = vk::SubmitInfo2::default()
                .command_buffer_infos(&command_buffers)
                .signal_semaphore_infos(&signals);

            device.reset_fences(&[self.fence])
                .map_err(|e| engine_err!("keystone::vulkan", "Failed to reset transfer fence: {:?}", e))?;
            device.queue_submit2(self.queue, &[submit], self.fence)
                .map_err(|e| engine_fail!("keystone::vulkan", Error::SubmissionFailed,
                    "Upload of '{}' failed to submit: {:?}", target.name(), e))?;

            match device.wait_for_fences(&[self.fence], true, self.timeout.as_nanos() as u64) {
                Ok(()) => Ok(()),
                Err(vk::Result::TIMEOUT) => Err(engine_fail!("keystone::vulkan", Error::DeviceLost,
                    "Upload of '{}' did not complete within {:?}", target.name(), self.timeout)),
                Err(vk::Result::ERROR_DEVICE_LOST) => Err(engine_fail!("keystone::vulkan", Error::DeviceLost,
                    "Device lost during upload of '{}'", target.name())),
                Err(e) => Err(engine_err!("keystone::vulkan", "Waiting for upload of '{}' failed: {:?}", target.name(), e)),
            }
        }
    }

    fn wait_idle(&mut self) -> Result<()> {
        unsafe {
            self.ctx.device
                .queue_wait_idle(self.queue)
                .map_err(|e| engine_fail!("keystone::vulkan", Error::DeviceLost,
                    "Transfer queue {}/{} failed to idle: {:?}", self.slot.family_index, self.slot.queue_index, e))
        }
    }
}

impl Drop for VulkanTransferQueue {
    fn drop(&mut self) {
        unsafe {
            self.ctx.device.queue_wait_idle(self.queue).ok();
        }
        if let Some(staging) = self.staging.take() {
            self.free_staging(staging);
        }
        unsafe {
            self.ctx.device.destroy_fence(self.fence, None);
            self.ctx.device.destroy_command_pool(self.command_pool, None);
        }
    }
}
