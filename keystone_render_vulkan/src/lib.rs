/*!
# Keystone Render - Vulkan Backend

Headless Vulkan 1.3 implementation of the `keystone_render` `GraphicsDevice`
contract, using Ash for the bindings and gpu-allocator for memory.

- Timeline semaphores and `vkQueueSubmit2` for every submission
- One graphics queue for command buffers, extra queues in other
  transfer-capable families for the transfer threads
- Device-local buffers and images shared concurrently across those families

```no_run
use std::sync::Arc;
use keystone_render::keystone::{Config, DeviceContext};
use keystone_render_vulkan::{VulkanDeviceConfig, VulkanGraphicsDevice};

let device = VulkanGraphicsDevice::new(VulkanDeviceConfig::default())?;
let context = DeviceContext::new(Arc::new(device), Config::default())?;
# Ok::<(), keystone_render::keystone::Error>(())
```
*/

mod vulkan_context;
mod vulkan_sync;
mod vulkan_buffer;
mod vulkan_image;
mod vulkan_command_buffer;
mod vulkan_transfer_queue;
mod vulkan_device;

#[cfg(feature = "vulkan-validation")]
mod debug;

pub use vulkan_device::{VulkanGraphicsDevice, VulkanDeviceConfig};
pub use vulkan_buffer::VulkanBuffer;
pub use vulkan_image::VulkanImage;
pub use vulkan_command_buffer::VulkanCommandBuffer;
pub use vulkan_transfer_queue::VulkanTransferQueue;

// Validation statistics
#[cfg(feature = "vulkan-validation")]
pub use debug::{get_validation_stats, ValidationStats};
