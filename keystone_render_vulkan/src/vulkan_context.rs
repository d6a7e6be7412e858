/// GpuContext - Shared Vulkan state for every backend object
///
/// Buffers, images, command buffers and transfer queues each hold an
/// `Arc<GpuContext>`, so the device outlives all of them: the last `Arc`
/// to go away tears down the allocator, the device and the instance.

use ash::vk;
use gpu_allocator::vulkan::Allocator;
use std::mem::ManuallyDrop;
use std::sync::{Arc, Mutex};

pub struct GpuContext {
    /// Vulkan logical device
    pub device: ash::Device,

    /// GPU memory allocator (shared, requires mutex for thread safety)
    /// Wrapped in ManuallyDrop so it is dropped BEFORE the device is destroyed
    pub allocator: ManuallyDrop<Arc<Mutex<Allocator>>>,

    /// Family of the graphics queue (claimed, never used for transfers)
    pub graphics_queue_family: u32,

    /// Every family queues were created in; buffers and images are shared
    /// concurrently between them so uploads need no ownership transfer
    pub sharing_families: Vec<u32>,

    /// Debug utils device loader (labels), present when validation is on
    pub(crate) debug_utils_device: Option<ash::ext::debug_utils::Device>,

    /// Debug utils loader and messenger, destroyed before the instance
    pub(crate) debug_utils_loader: Option<ash::ext::debug_utils::Instance>,
    pub(crate) debug_messenger: Option<vk::DebugUtilsMessengerEXT>,

    instance: ash::Instance,

    /// Vulkan loader, must outlive the instance
    _entry: ash::Entry,
}

impl GpuContext {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        entry: ash::Entry,
        instance: ash::Instance,
        device: ash::Device,
        allocator: Allocator,
        graphics_queue_family: u32,
        sharing_families: Vec<u32>,
        debug_utils_loader: Option<ash::ext::debug_utils::Instance>,
        debug_messenger: Option<vk::DebugUtilsMessengerEXT>,
    ) -> Self {
        let debug_utils_device = debug_utils_loader
            .as_ref()
            .map(|_| ash::ext::debug_utils::Device::new(&instance, &device));

        Self {
            device,
            allocator: ManuallyDrop::new(Arc::new(Mutex::new(allocator))),
            graphics_queue_family,
            sharing_families,
            debug_utils_device,
            debug_utils_loader,
            debug_messenger,
            instance,
            _entry: entry,
        }
    }

    /// Sharing mode and family list for buffers and images
    pub(crate) fn sharing(&self) -> (vk::SharingMode, &[u32]) {
        if self.sharing_families.len() > 1 {
            (vk::SharingMode::CONCURRENT, &self.sharing_families)
        } else {
            (vk::SharingMode::EXCLUSIVE, &[])
        }
    }
}

impl Drop for GpuContext {
    fn drop(&mut self) {
        unsafe {
            self.device.device_wait_idle().ok();

            // 1. Free VkDeviceMemory pages BEFORE destroying the device
            ManuallyDrop::drop(&mut self.allocator);

            // 2. Stop routing validation messages, then destroy the messenger
            #[cfg(feature = "vulkan-validation")]
            crate::debug::cleanup_debug_config();
            if let (Some(debug_utils), Some(messenger)) =
                (&self.debug_utils_loader, self.debug_messenger.take())
            {
                debug_utils.destroy_debug_utils_messenger(messenger, None);
            }

            // 3. Device, then instance
            self.device.destroy_device(None);
            self.instance.destroy_instance(None);
        }
    }
}
