/// VulkanGraphicsDevice - Vulkan implementation of the GraphicsDevice trait
///
/// Headless: no surface, no swapchain. One graphics queue carries every
/// command buffer submission; extra queues in other transfer-capable
/// families are created for the transfer threads.

use keystone_render::keystone::{Result, Error};
use keystone_render::keystone::render::{
    Buffer, BufferDesc, CommandBuffer, GraphicsDevice, Image, ImageDesc, QueueCapabilities,
    QueueFamilyInfo, QueueSlot, QueueType, Semaphore, SemaphoreKind, SubmitInfo, TransferQueue,
};
use keystone_render::{engine_err, engine_error, engine_fail, engine_info};
use ash::vk;
use ash::vk::Handle;
use gpu_allocator::vulkan::{Allocator, AllocatorCreateDesc};
use std::ffi::CString;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::vulkan_buffer::VulkanBuffer;
use crate::vulkan_command_buffer::VulkanCommandBuffer;
use crate::vulkan_context::GpuContext;
use crate::vulkan_image::VulkanImage;
use crate::vulkan_sync::{queue_flags_to_capabilities, semaphore_to_vk, signal_to_vk, wait_to_vk};
use crate::vulkan_transfer_queue::VulkanTransferQueue;

/// Creation options of a `VulkanGraphicsDevice`
#[derive(Debug, Clone)]
pub struct VulkanDeviceConfig {
    /// Application name reported to the driver
    pub app_name: String,
    /// Enable VK_LAYER_KHRONOS_validation (needs the `vulkan-validation` feature)
    pub enable_validation: bool,
    /// Upper bound on queues created for transfer threads
    pub transfer_queue_count: u32,
    /// Index into the enumerated physical devices; `None` prefers a discrete GPU
    pub preferred_device_index: Option<usize>,
    /// How long a transfer thread waits for one upload to execute
    pub upload_timeout: Duration,
}

impl Default for VulkanDeviceConfig {
    fn default() -> Self {
        Self {
            app_name: "Keystone Application".to_string(),
            enable_validation: cfg!(feature = "vulkan-validation"),
            transfer_queue_count: 2,
            preferred_device_index: None,
            upload_timeout: Duration::from_secs(5),
        }
    }
}

/// Queues to create: the graphics family plus transfer-capable families
///
/// `families` lists `(queue flags, queue count)` per family index. The
/// graphics family gets one queue. Other transfer-capable families receive
/// up to `transfer_queue_count` queues in total, most specialized family
/// first. Returns the graphics family index and the families to create.
pub(crate) fn plan_queue_families(
    families: &[(vk::QueueFlags, u32)],
    transfer_queue_count: u32,
) -> Result<(u32, Vec<QueueFamilyInfo>)> {
    let graphics_family = families
        .iter()
        .position(|(flags, count)| flags.contains(vk::QueueFlags::GRAPHICS) && *count > 0)
        .map(|index| index as u32)
        .ok_or_else(|| Error::InitializationFailed("No graphics queue family found".to_string()))?;

    let mut planned = vec![QueueFamilyInfo {
        index: graphics_family,
        capabilities: queue_flags_to_capabilities(families[graphics_family as usize].0),
        queue_count: 1,
    }];

    let mut candidates: Vec<(u32, vk::QueueFlags, u32)> = families
        .iter()
        .enumerate()
        .map(|(index, (flags, count))| (index as u32, *flags, *count))
        .filter(|(index, flags, count)| {
            *index != graphics_family
                && *count > 0
                && queue_flags_to_capabilities(*flags).contains(QueueCapabilities::TRANSFER)
        })
        .collect();
    candidates.sort_by_key(|(index, flags, _)| (queue_flags_to_capabilities(*flags).bits().count_ones(), *index));

    let mut remaining = transfer_queue_count;
    for (index, flags, count) in candidates {
        if remaining == 0 {
            break;
        }
        let take = count.min(remaining);
        remaining -= take;
        planned.push(QueueFamilyInfo {
            index,
            capabilities: queue_flags_to_capabilities(flags),
            queue_count: take,
        });
    }

    planned.sort_by_key(|family| family.index);
    Ok((graphics_family, planned))
}

/// Vulkan logical device
pub struct VulkanGraphicsDevice {
    ctx: Arc<GpuContext>,
    device_name: String,
    /// Graphics queue (external synchronization required by Vulkan)
    graphics_queue: Mutex<vk::Queue>,
    queue_families: Vec<QueueFamilyInfo>,
    upload_timeout: Duration,
}

impl VulkanGraphicsDevice {
    /// Create a headless Vulkan 1.3 device
    ///
    /// # Errors
    ///
    /// `Error::InitializationFailed` when the loader, instance, physical
    /// device, required features (timeline semaphores, synchronization2)
    /// or the allocator are unavailable.
    pub fn new(config: VulkanDeviceConfig) -> Result<Self> {
        unsafe {
            let entry = ash::Entry::load()
                .map_err(|e| engine_fail!("keystone::vulkan", Error::InitializationFailed, "Failed to load Vulkan library: {:?}", e))?;

            let app_name = CString::new(config.app_name.as_str())
                .map_err(|_| Error::InitializationFailed("Application name contains a NUL byte".to_string()))?;
            let app_info = vk::ApplicationInfo::default()
                .application_name(&app_name)
                .application_version(vk::make_api_version(0, 1, 0, 0))
                .engine_name(c"Keystone")
                .engine_version(vk::make_api_version(0, 0, 1, 0))
                .api_version(vk::API_VERSION_1_3);

            let validation = Self::validation_enabled(&config);
            let extension_names = if validation {
                vec![ash::ext::debug_utils::NAME.as_ptr()]
            } else {
                vec![]
            };
            let layer_names = if validation {
                vec![c"VK_LAYER_KHRONOS_validation".as_ptr()]
            } else {
                vec![]
            };

            let create_info = vk::InstanceCreateInfo::default()
                .application_info(&app_info)
                .enabled_layer_names(&layer_names)
                .enabled_extension_names(&extension_names);

            let instance = entry.create_instance(&create_info, None)
                .map_err(|e| engine_fail!("keystone::vulkan", Error::InitializationFailed, "Failed to create Vulkan instance: {:?}", e))?;

            let (debug_utils_loader, debug_messenger) = if validation {
                match Self::create_debug_messenger(&entry, &instance) {
                    Ok((loader, messenger)) => (Some(loader), Some(messenger)),
                    Err(e) => {
                        instance.destroy_instance(None);
                        return Err(e);
                    }
                }
            } else {
                (None, None)
            };

            let built = Self::create_logical_device(&instance, &config);
            let (physical_device, device_name, device, graphics_family, queue_families) = match built {
                Ok(built) => built,
                Err(e) => {
                    if let (Some(loader), Some(messenger)) = (&debug_utils_loader, debug_messenger) {
                        loader.destroy_debug_utils_messenger(messenger, None);
                    }
                    instance.destroy_instance(None);
                    return Err(e);
                }
            };

            let allocator = Allocator::new(&AllocatorCreateDesc {
                instance: instance.clone(),
                device: device.clone(),
                physical_device,
                debug_settings: Default::default(),
                buffer_device_address: false,
                allocation_sizes: Default::default(),
            });
            let allocator = match allocator {
                Ok(allocator) => allocator,
                Err(e) => {
                    device.destroy_device(None);
                    if let (Some(loader), Some(messenger)) = (&debug_utils_loader, debug_messenger) {
                        loader.destroy_debug_utils_messenger(messenger, None);
                    }
                    instance.destroy_instance(None);
                    return Err(engine_fail!("keystone::vulkan", Error::InitializationFailed, "Failed to create GPU allocator: {:?}", e));
                }
            };

            let graphics_queue = device.get_device_queue(graphics_family, 0);
            let sharing_families = queue_families.iter().map(|family| family.index).collect();

            // GpuContext owns device, instance and debug messenger destruction
            let ctx = Arc::new(GpuContext::new(
                entry,
                instance,
                device,
                allocator,
                graphics_family,
                sharing_families,
                debug_utils_loader,
                debug_messenger,
            ));

            engine_info!("keystone::vulkan", "Vulkan device '{}' created ({} queue families, validation: {})",
                device_name, queue_families.len(), validation);

            Ok(Self {
                ctx,
                device_name,
                graphics_queue: Mutex::new(graphics_queue),
                queue_families,
                upload_timeout: config.upload_timeout,
            })
        }
    }

    #[cfg(feature = "vulkan-validation")]
    fn validation_enabled(config: &VulkanDeviceConfig) -> bool {
        config.enable_validation
    }

    #[cfg(not(feature = "vulkan-validation"))]
    fn validation_enabled(config: &VulkanDeviceConfig) -> bool {
        if config.enable_validation {
            keystone_render::engine_warn!("keystone::vulkan", "Validation requested but the crate was built without the 'vulkan-validation' feature");
        }
        false
    }

    #[cfg(feature = "vulkan-validation")]
    unsafe fn create_debug_messenger(
        entry: &ash::Entry,
        instance: &ash::Instance,
    ) -> Result<(ash::ext::debug_utils::Instance, vk::DebugUtilsMessengerEXT)> {
        let debug_utils = ash::ext::debug_utils::Instance::new(entry, instance);
        crate::debug::init_debug_config();

        let debug_info = vk::DebugUtilsMessengerCreateInfoEXT::default()
            .message_severity(
                vk::DebugUtilsMessageSeverityFlagsEXT::ERROR
                    | vk::DebugUtilsMessageSeverityFlagsEXT::WARNING
                    | vk::DebugUtilsMessageSeverityFlagsEXT::INFO
                    | vk::DebugUtilsMessageSeverityFlagsEXT::VERBOSE
            )
            .message_type(
                vk::DebugUtilsMessageTypeFlagsEXT::GENERAL
                    | vk::DebugUtilsMessageTypeFlagsEXT::VALIDATION
                    | vk::DebugUtilsMessageTypeFlagsEXT::PERFORMANCE
            )
            .pfn_user_callback(Some(crate::debug::vulkan_debug_callback));

        let messenger = debug_utils.create_debug_utils_messenger(&debug_info, None)
            .map_err(|e| engine_fail!("keystone::vulkan", Error::InitializationFailed, "Failed to create debug messenger: {:?}", e))?;
        Ok((debug_utils, messenger))
    }

    #[cfg(not(feature = "vulkan-validation"))]
    unsafe fn create_debug_messenger(
        _entry: &ash::Entry,
        _instance: &ash::Instance,
    ) -> Result<(ash::ext::debug_utils::Instance, vk::DebugUtilsMessengerEXT)> {
        Err(Error::InitializationFailed("validation support not compiled in".to_string()))
    }

    /// Pick a physical device that supports Vulkan 1.3
    unsafe fn pick_physical_device(instance: &ash::Instance, preferred: Option<usize>) -> Result<vk::PhysicalDevice> {
        let physical_devices = instance.enumerate_physical_devices()
            .map_err(|e| engine_fail!("keystone::vulkan", Error::InitializationFailed, "Failed to enumerate physical devices: {:?}", e))?;

        let supports_1_3 = |physical_device: &vk::PhysicalDevice| {
            instance.get_physical_device_properties(*physical_device).api_version >= vk::API_VERSION_1_3
        };

        if let Some(index) = preferred {
            return physical_devices
                .get(index)
                .copied()
                .filter(supports_1_3)
                .ok_or_else(|| engine_fail!("keystone::vulkan", Error::InitializationFailed,
                    "Physical device {} missing or below Vulkan 1.3", index));
        }

        let candidates: Vec<vk::PhysicalDevice> = physical_devices.into_iter().filter(supports_1_3).collect();
        candidates
            .iter()
            .copied()
            .find(|physical_device| {
                instance.get_physical_device_properties(*physical_device).device_type == vk::PhysicalDeviceType::DISCRETE_GPU
            })
            .or_else(|| candidates.first().copied())
            .ok_or_else(|| engine_fail!("keystone::vulkan", Error::InitializationFailed, "No Vulkan 1.3 capable GPU found"))
    }

    #[allow(clippy::type_complexity)]
    unsafe fn create_logical_device(
        instance: &ash::Instance,
        config: &VulkanDeviceConfig,
    ) -> Result<(vk::PhysicalDevice, String, ash::Device, u32, Vec<QueueFamilyInfo>)> {
        let physical_device = Self::pick_physical_device(instance, config.preferred_device_index)?;

        let properties = instance.get_physical_device_properties(physical_device);
        let device_name = properties
            .device_name_as_c_str()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|_| "unknown".to_string());

        // Timeline semaphores and synchronization2 are mandatory
        let mut supported12 = vk::PhysicalDeviceVulkan12Features::default();
        let mut supported13 = vk::PhysicalDeviceVulkan13Features::default();
        {
            let mut features2 = vk::PhysicalDeviceFeatures2::default()
                .push_next(&mut supported12)
                .push_next(&mut supported13);
            instance.get_physical_device_features2(physical_device, &mut features2);
        }
        if supported12.timeline_semaphore != vk::TRUE || supported13.synchronization2 != vk::TRUE {
            return Err(engine_fail!("keystone::vulkan", Error::InitializationFailed,
                "'{}' lacks timeline semaphores or synchronization2", device_name));
        }

        let family_properties: Vec<(vk::QueueFlags, u32)> = instance
            .get_physical_device_queue_family_properties(physical_device)
            .iter()
            .map(|family| (family.queue_flags, family.queue_count))
            .collect();
        let (graphics_family, queue_families) = plan_queue_families(&family_properties, config.transfer_queue_count)
            .inspect_err(|e| engine_error!("keystone::vulkan", "{}", e))?;

        let priorities: Vec<Vec<f32>> = queue_families
            .iter()
            .map(|family| vec![1.0; family.queue_count as usize])
            .collect();
        let queue_create_infos: Vec<vk::DeviceQueueCreateInfo> = queue_families
            .iter()
            .zip(&priorities)
            .map(|(family, priorities)| {
                vk::DeviceQueueCreateInfo::default()
                    .queue_family_index(family.index)
                    .queue_priorities(priorities)
            })
            .collect();

        let mut features12 = vk::PhysicalDeviceVulkan12Features::default().timeline_semaphore(true);
        let mut features13 = vk::PhysicalDeviceVulkan13Features::default().synchronization2(true);
        let device_create_info = vk::DeviceCreateInfo::default()
            .queue_create_infos(&queue_create_infos)
            .push_next(&mut features12)
            .push_next(&mut features13);

        let device = instance.create_device(physical_device, &device_create_info, None)
            .map_err(|e| engine_fail!("keystone::vulkan", Error::InitializationFailed, "Failed to create logical device: {:?}", e))?;

        Ok((physical_device, device_name, device, graphics_family, queue_families))
    }

    /// Name of the physical device
    pub fn device_name(&self) -> &str {
        &self.device_name
    }

    /// Logical device, for recording callbacks
    pub fn ash_device(&self) -> &ash::Device {
        &self.ctx.device
    }

    pub fn graphics_queue_family(&self) -> u32 {
        self.ctx.graphics_queue_family
    }

    fn map_wait_error(e: vk::Result, what: &str) -> Error {
        match e {
            vk::Result::TIMEOUT => Error::Timeout(what.to_string()),
            vk::Result::ERROR_DEVICE_LOST => engine_fail!("keystone::vulkan", Error::DeviceLost, "Device lost while waiting for {}", what),
            other => engine_err!("keystone::vulkan", "Waiting for {} failed: {:?}", what, other),
        }
    }
}

impl GraphicsDevice for VulkanGraphicsDevice {
    fn queue_families(&self) -> Vec<QueueFamilyInfo> {
        self.queue_families.clone()
    }

    fn claimed_queue_families(&self) -> Vec<u32> {
        vec![self.ctx.graphics_queue_family]
    }

    fn create_buffer(&self, desc: &BufferDesc) -> Result<Arc<dyn Buffer>> {
        if desc.size == 0 {
            return Err(Error::InvalidResource(format!("buffer '{}' has zero size", desc.name)));
        }
        Ok(Arc::new(VulkanBuffer::new(Arc::clone(&self.ctx), desc)?))
    }

    fn create_image(&self, desc: &ImageDesc) -> Result<Arc<dyn Image>> {
        if desc.width == 0 || desc.height == 0 {
            return Err(Error::InvalidResource(format!("image '{}' has a zero extent", desc.name)));
        }
        Ok(Arc::new(VulkanImage::new(Arc::clone(&self.ctx), desc)?))
    }

    fn create_semaphore(&self, kind: SemaphoreKind) -> Result<Semaphore> {
        let semaphore_type = match kind {
            SemaphoreKind::Binary => vk::SemaphoreType::BINARY,
            SemaphoreKind::Timeline => vk::SemaphoreType::TIMELINE,
        };
        let mut type_info = vk::SemaphoreTypeCreateInfo::default()
            .semaphore_type(semaphore_type)
            .initial_value(0);
        let create_info = vk::SemaphoreCreateInfo::default().push_next(&mut type_info);

        let semaphore = unsafe {
            self.ctx.device.create_semaphore(&create_info, None)
                .map_err(|e| engine_err!("keystone::vulkan", "Failed to create {:?} semaphore: {:?}", kind, e))?
        };
        Ok(Semaphore::new(semaphore.as_raw(), kind))
    }

    fn destroy_semaphore(&self, semaphore: Semaphore) {
        unsafe {
            self.ctx.device.destroy_semaphore(semaphore_to_vk(semaphore), None);
        }
    }

    fn semaphore_value(&self, semaphore: Semaphore) -> Result<u64> {
        if semaphore.kind() != SemaphoreKind::Timeline {
            return Err(Error::InvalidResource("binary semaphores have no counter".to_string()));
        }
        unsafe {
            self.ctx.device
                .get_semaphore_counter_value(semaphore_to_vk(semaphore))
                .map_err(|e| engine_err!("keystone::vulkan", "Failed to read semaphore counter: {:?}", e))
        }
    }

    fn wait_semaphore(&self, semaphore: Semaphore, value: u64, timeout: Duration) -> Result<()> {
        let semaphores = [semaphore_to_vk(semaphore)];
        let values = [value];
        let wait_info = vk::SemaphoreWaitInfo::default()
            .semaphores(&semaphores)
            .values(&values);
        unsafe {
            self.ctx.device
                .wait_semaphores(&wait_info, timeout.as_nanos().min(u64::MAX as u128) as u64)
                .map_err(|e| Self::map_wait_error(e, &format!("semaphore value {}", value)))
        }
    }

    fn create_command_buffer(&self, queue_type: QueueType, name: &str) -> Result<Box<dyn CommandBuffer>> {
        Ok(Box::new(VulkanCommandBuffer::new(Arc::clone(&self.ctx), queue_type, name)?))
    }

    fn destroy_command_buffer(&self, command_buffer: Box<dyn CommandBuffer>) {
        drop(command_buffer);
    }

    fn submit(&self, queue_type: QueueType, info: &SubmitInfo) -> Result<()> {
        let command_buffers: Vec<vk::CommandBufferSubmitInfo> = info.command_buffers
            .iter()
            .map(|raw| vk::CommandBufferSubmitInfo::default().command_buffer(vk::CommandBuffer::from_raw(*raw)))
            .collect();
        let waits: Vec<vk::SemaphoreSubmitInfo> = info.waits.iter().map(wait_to_vk).collect();
        let signals: Vec<vk::SemaphoreSubmitInfo> = info.signals.iter().map(signal_to_vk).collect();

        let submit = vk::SubmitInfo2::default()
            .wait_semaphore_infos(&waits)
            .command_buffer_infos(&command_buffers)
            .signal_semaphore_infos(&signals);

        // Every command buffer is allocated from the graphics family
        let queue = self.graphics_queue.lock()
            .map_err(|_| Error::SubmissionFailed(format!("{:?} queue mutex poisoned", queue_type)))?;
        unsafe {
            self.ctx.device
                .queue_submit2(*queue, &[submit], vk::Fence::null())
                .map_err(|e| match e {
                    vk::Result::ERROR_DEVICE_LOST => engine_fail!("keystone::vulkan", Error::DeviceLost, "Device lost on {:?} submit", queue_type),
                    other => engine_fail!("keystone::vulkan", Error::SubmissionFailed, "{:?} submit failed: {:?}", queue_type, other),
                })
        }
    }

    fn create_transfer_queue(&self, slot: QueueSlot) -> Result<Box<dyn TransferQueue>> {
        let created = self.queue_families
            .iter()
            .any(|family| family.index == slot.family_index && slot.queue_index < family.queue_count);
        if !created || slot.family_index == self.ctx.graphics_queue_family {
            return Err(Error::InvalidResource(format!(
                "queue {}/{} is not an unclaimed created queue", slot.family_index, slot.queue_index
            )));
        }
        Ok(Box::new(VulkanTransferQueue::new(Arc::clone(&self.ctx), slot, self.upload_timeout)?))
    }

    /// Transfer threads must be stopped first: Vulkan requires every queue
    /// to be externally synchronized during a device-wide idle.
    fn wait_idle(&self) -> Result<()> {
        let _queue = self.graphics_queue.lock()
            .map_err(|_| Error::DeviceLost("graphics queue mutex poisoned".to_string()))?;
        unsafe {
            self.ctx.device
                .device_wait_idle()
                .map_err(|e| engine_fail!("keystone::vulkan", Error::DeviceLost, "Failed to wait idle: {:?}", e))
        }
    }
}

#[cfg(test)]
#[path = "vulkan_device_tests.rs"]
mod tests;
