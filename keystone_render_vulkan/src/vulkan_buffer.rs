/// VulkanBuffer - Vulkan implementation of the Buffer trait

use keystone_render::keystone::{Result, Error};
use keystone_render::keystone::render::{Buffer, BufferDesc};
use keystone_render::{engine_err, engine_error};
use ash::vk;
use gpu_allocator::vulkan::{Allocation, AllocationCreateDesc, AllocationScheme};
use gpu_allocator::MemoryLocation;
use std::any::Any;
use std::sync::Arc;

use crate::vulkan_context::GpuContext;
use crate::vulkan_sync::buffer_usage_to_vk;

/// Device-local buffer, filled by transfer uploads
pub struct VulkanBuffer {
    /// Shared GPU context (device, allocator)
    ctx: Arc<GpuContext>,
    desc: BufferDesc,
    /// Vulkan buffer
    pub(crate) buffer: vk::Buffer,
    /// GPU memory allocation
    allocation: Option<Allocation>,
}

impl VulkanBuffer {
    pub(crate) fn new(ctx: Arc<GpuContext>, desc: &BufferDesc) -> Result<Self> {
        unsafe {
            let (sharing_mode, families) = ctx.sharing();
            let create_info = vk::BufferCreateInfo::default()
                .size(desc.size)
                .usage(buffer_usage_to_vk(desc.usage))
                .sharing_mode(sharing_mode)
                .queue_family_indices(families);

            let buffer = ctx.device.create_buffer(&create_info, None)
                .map_err(|e| engine_err!("keystone::vulkan", "Failed to create buffer '{}' ({} bytes): {:?}", desc.name, desc.size, e))?;

            let requirements = ctx.device.get_buffer_memory_requirements(buffer);
            let allocation = ctx.allocator.lock()
                .map_err(|_| Error::BackendError("allocator mutex poisoned".to_string()))
                .and_then(|mut allocator| {
                    allocator.allocate(&AllocationCreateDesc {
                        name: &desc.name,
                        requirements,
                        location: MemoryLocation::GpuOnly,
                        linear: true,
                        allocation_scheme: AllocationScheme::GpuAllocatorManaged,
                    })
                    .map_err(|_| {
                        let size_mb = requirements.size as f64 / (1024.0 * 1024.0);
                        engine_error!("keystone::vulkan", "Out of GPU memory for buffer '{}' (required: {:.2} MB)", desc.name, size_mb);
                        Error::OutOfMemory
                    })
                });

            let allocation = match allocation {
                Ok(allocation) => allocation,
                Err(e) => {
                    ctx.device.destroy_buffer(buffer, None);
                    return Err(e);
                }
            };

            if let Err(e) = ctx.device.bind_buffer_memory(buffer, allocation.memory(), allocation.offset()) {
                if let Ok(mut allocator) = ctx.allocator.lock() {
                    allocator.free(allocation).ok();
                }
                ctx.device.destroy_buffer(buffer, None);
                return Err(engine_err!("keystone::vulkan", "Failed to bind memory of buffer '{}': {:?}", desc.name, e));
            }

            Ok(Self {
                ctx,
                desc: desc.clone(),
                buffer,
                allocation: Some(allocation),
            })
        }
    }

    /// Underlying Vulkan buffer
    pub fn vk_buffer(&self) -> vk::Buffer {
        self.buffer
    }
}

impl Buffer for VulkanBuffer {
    fn desc(&self) -> &BufferDesc {
        &self.desc
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

impl Drop for VulkanBuffer {
    fn drop(&mut self) {
        unsafe {
            if let Some(allocation) = self.allocation.take() {
                // Don't panic if lock fails - we still need to destroy the buffer
                if let Ok(mut allocator) = self.ctx.allocator.lock() {
                    allocator.free(allocation).ok();
                }
            }
            self.ctx.device.destroy_buffer(self.buffer, None);
        }
    }
}
