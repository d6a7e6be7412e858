/// Conversions between core sync/format types and Vulkan values

use ash::vk;
use ash::vk::Handle;
use keystone_render::keystone::render::{
    BufferUsage, ImageFormat, PipelineStages, QueueCapabilities, Semaphore, SemaphoreWait,
    SyncPoint,
};

/// Core stage mask to a synchronization2 stage mask
pub(crate) fn stages_to_vk(stages: PipelineStages) -> vk::PipelineStageFlags2 {
    const TABLE: [(PipelineStages, vk::PipelineStageFlags2); 13] = [
        (PipelineStages::TOP_OF_PIPE, vk::PipelineStageFlags2::TOP_OF_PIPE),
        (PipelineStages::DRAW_INDIRECT, vk::PipelineStageFlags2::DRAW_INDIRECT),
        (PipelineStages::VERTEX_INPUT, vk::PipelineStageFlags2::VERTEX_INPUT),
        (PipelineStages::VERTEX_SHADER, vk::PipelineStageFlags2::VERTEX_SHADER),
        (PipelineStages::FRAGMENT_SHADER, vk::PipelineStageFlags2::FRAGMENT_SHADER),
        (PipelineStages::EARLY_FRAGMENT_TESTS, vk::PipelineStageFlags2::EARLY_FRAGMENT_TESTS),
        (PipelineStages::LATE_FRAGMENT_TESTS, vk::PipelineStageFlags2::LATE_FRAGMENT_TESTS),
        (PipelineStages::COLOR_ATTACHMENT_OUTPUT, vk::PipelineStageFlags2::COLOR_ATTACHMENT_OUTPUT),
        (PipelineStages::COMPUTE_SHADER, vk::PipelineStageFlags2::COMPUTE_SHADER),
        (PipelineStages::TRANSFER, vk::PipelineStageFlags2::TRANSFER),
        (PipelineStages::BOTTOM_OF_PIPE, vk::PipelineStageFlags2::BOTTOM_OF_PIPE),
        (PipelineStages::ALL_GRAPHICS, vk::PipelineStageFlags2::ALL_GRAPHICS),
        (PipelineStages::ALL_COMMANDS, vk::PipelineStageFlags2::ALL_COMMANDS),
    ];

    let flags = TABLE
        .iter()
        .filter(|(stage, _)| stages.contains(*stage))
        .fold(vk::PipelineStageFlags2::empty(), |acc, (_, vk_stage)| acc | *vk_stage);

    // An empty wait mask is invalid; block everything instead
    if flags.is_empty() {
        vk::PipelineStageFlags2::ALL_COMMANDS
    } else {
        flags
    }
}

pub(crate) fn semaphore_to_vk(semaphore: Semaphore) -> vk::Semaphore {
    vk::Semaphore::from_raw(semaphore.raw())
}

pub(crate) fn wait_to_vk(wait: &SemaphoreWait) -> vk::SemaphoreSubmitInfo<'static> {
    vk::SemaphoreSubmitInfo::default()
        .semaphore(semaphore_to_vk(wait.semaphore))
        .value(wait.value.unwrap_or(0))
        .stage_mask(stages_to_vk(wait.stages))
}

pub(crate) fn signal_to_vk(signal: &SyncPoint) -> vk::SemaphoreSubmitInfo<'static> {
    vk::SemaphoreSubmitInfo::default()
        .semaphore(semaphore_to_vk(signal.semaphore))
        .value(signal.value.unwrap_or(0))
        .stage_mask(vk::PipelineStageFlags2::ALL_COMMANDS)
}

/// Capabilities a queue family advertises
///
/// Graphics and compute families implicitly support transfers.
pub(crate) fn queue_flags_to_capabilities(flags: vk::QueueFlags) -> QueueCapabilities {
    let mut capabilities = QueueCapabilities::empty();
    if flags.contains(vk::QueueFlags::GRAPHICS) {
        capabilities |= QueueCapabilities::GRAPHICS | QueueCapabilities::TRANSFER;
    }
    if flags.contains(vk::QueueFlags::COMPUTE) {
        capabilities |= QueueCapabilities::COMPUTE | QueueCapabilities::TRANSFER;
    }
    if flags.contains(vk::QueueFlags::TRANSFER) {
        capabilities |= QueueCapabilities::TRANSFER;
    }
    capabilities
}

pub(crate) fn buffer_usage_to_vk(usage: BufferUsage) -> vk::BufferUsageFlags {
    let usage = match usage {
        BufferUsage::Vertex => vk::BufferUsageFlags::VERTEX_BUFFER,
        BufferUsage::Index => vk::BufferUsageFlags::INDEX_BUFFER,
        BufferUsage::Uniform => vk::BufferUsageFlags::UNIFORM_BUFFER,
        BufferUsage::Storage => vk::BufferUsageFlags::STORAGE_BUFFER,
        BufferUsage::Indirect => vk::BufferUsageFlags::INDIRECT_BUFFER,
    };
    usage | vk::BufferUsageFlags::TRANSFER_DST
}

pub(crate) fn image_format_to_vk(format: ImageFormat) -> vk::Format {
    match format {
        ImageFormat::R8_UNORM => vk::Format::R8_UNORM,
        ImageFormat::R8G8B8A8_UNORM => vk::Format::R8G8B8A8_UNORM,
        ImageFormat::R8G8B8A8_SRGB => vk::Format::R8G8B8A8_SRGB,
        ImageFormat::B8G8R8A8_UNORM => vk::Format::B8G8R8A8_UNORM,
        ImageFormat::R16G16B16A16_SFLOAT => vk::Format::R16G16B16A16_SFLOAT,
        ImageFormat::R32_SFLOAT => vk::Format::R32_SFLOAT,
        ImageFormat::R32G32B32A32_SFLOAT => vk::Format::R32G32B32A32_SFLOAT,
    }
}

#[cfg(test)]
#[path = "vulkan_sync_tests.rs"]
mod tests;
