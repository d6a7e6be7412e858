/// VulkanImage - Vulkan implementation of the Image trait

use keystone_render::keystone::{Result, Error};
use keystone_render::keystone::render::{Image, ImageDesc};
use keystone_render::{engine_err, engine_error};
use ash::vk;
use gpu_allocator::vulkan::{Allocation, AllocationCreateDesc, AllocationScheme};
use gpu_allocator::MemoryLocation;
use std::any::Any;
use std::sync::Arc;

use crate::vulkan_context::GpuContext;
use crate::vulkan_sync::image_format_to_vk;

pub(crate) const COLOR_RANGE: vk::ImageSubresourceRange = vk::ImageSubresourceRange {
    aspect_mask: vk::ImageAspectFlags::COLOR,
    base_mip_level: 0,
    level_count: 1,
    base_array_layer: 0,
    layer_count: 1,
};

/// Sampled 2D image with its view
///
/// Left in `SHADER_READ_ONLY_OPTIMAL` after every upload.
pub struct VulkanImage {
    ctx: Arc<GpuContext>,
    desc: ImageDesc,
    pub(crate) image: vk::Image,
    pub(crate) view: vk::ImageView,
    allocation: Option<Allocation>,
}

impl VulkanImage {
    pub(crate) fn new(ctx: Arc<GpuContext>, desc: &ImageDesc) -> Result<Self> {
        let format = image_format_to_vk(desc.format);

        unsafe {
            let (sharing_mode, families) = ctx.sharing();
            let image_create_info = vk::ImageCreateInfo::default()
                .image_type(vk::ImageType::TYPE_2D)
                .format(format)
                .extent(vk::Extent3D {
                    width: desc.width,
                    height: desc.height,
                    depth: 1,
                })
                .mip_levels(1)
                .array_layers(1)
                .samples(vk::SampleCountFlags::TYPE_1)
                .tiling(vk::ImageTiling::OPTIMAL)
                .usage(vk::ImageUsageFlags::SAMPLED | vk::ImageUsageFlags::TRANSFER_DST)
                .sharing_mode(sharing_mode)
                .queue_family_indices(families)
                .initial_layout(vk::ImageLayout::UNDEFINED);

            let image = ctx.device.create_image(&image_create_info, None)
                .map_err(|e| engine_err!("keystone::vulkan", "Failed to create image '{}': {:?}", desc.name, e))?;

            let requirements = ctx.device.get_image_memory_requirements(image);
            let allocation = ctx.allocator.lock()
                .map_err(|_| Error::BackendError("allocator mutex poisoned".to_string()))
                .and_then(|mut allocator| {
                    allocator.allocate(&AllocationCreateDesc {
                        name: &desc.name,
                        requirements,
                        location: MemoryLocation::GpuOnly,
                        linear: false,
                        allocation_scheme: AllocationScheme::GpuAllocatorManaged,
                    })
                    .map_err(|_| {
                        let size_mb = requirements.size as f64 / (1024.0 * 1024.0);
                        engine_error!("keystone::vulkan", "Out of GPU memory for image '{}' ({}x{}, {:.2} MB)", desc.name, desc.width, desc.height, size_mb);
                        Error::OutOfMemory
                    })
                });

            let allocation = match allocation {
                Ok(allocation) => allocation,
                Err(e) => {
                    ctx.device.destroy_image(image, None);
                    return Err(e);
                }
            };

            let release = |ctx: &GpuContext, allocation: Allocation| {
                if let Ok(mut allocator) = ctx.allocator.lock() {
                    allocator.free(allocation).ok();
                }
                ctx.device.destroy_image(image, None);
            };

            if let Err(e) = ctx.device.bind_image_memory(image, allocation.memory(), allocation.offset()) {
                release(&ctx, allocation);
                return Err(engine_err!("keystone::vulkan", "Failed to bind memory of image '{}': {:?}", desc.name, e));
            }

            let view_create_info = vk::ImageViewCreateInfo::default()
                .image(image)
                .view_type(vk::ImageViewType::TYPE_2D)
                .format(format)
                .subresource_range(COLOR_RANGE);

            let view = match ctx.device.create_image_view(&view_create_info, None) {
                Ok(view) => view,
                Err(e) => {
                    release(&ctx, allocation);
                    return Err(engine_err!("keystone::vulkan", "Failed to create view of image '{}': {:?}", desc.name, e));
                }
            };

            Ok(Self {
                ctx,
                desc: desc.clone(),
                image,
                view,
                allocation: Some(allocation),
            })
        }
    }

    pub fn vk_image(&self) -> vk::Image {
        self.image
    }

    pub fn vk_image_view(&self) -> vk::ImageView {
        self.view
    }
}

impl Image for VulkanImage {
    fn desc(&self) -> &ImageDesc {
        &self.desc
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

impl Drop for VulkanImage {
    fn drop(&mut self) {
        unsafe {
            self.ctx.device.destroy_image_view(self.view, None);
            if let Some(allocation) = self.allocation.take() {
                if let Ok(mut allocator) = self.ctx.allocator.lock() {
                    allocator.free(allocation).ok();
                }
            }
            self.ctx.device.destroy_image(self.image, None);
        }
    }
}
