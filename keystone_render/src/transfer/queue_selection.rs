/// Transfer queue selection
///
/// Uploads run on hardware queues that rendering never touches, so a copy
/// can never serialize behind a frame's draw work.

use crate::error::{Error, Result};
use crate::graphics_device::{QueueCapabilities, QueueFamilyInfo, QueueSlot};
use crate::engine_fail;

/// Pick up to `max` transfer queues outside the `claimed` families
///
/// Families are taken in order of specialization: a transfer-only family
/// (the DMA engine on most discrete GPUs) comes before a family that can
/// also run compute. Queues of one family are handed out by index before
/// moving to the next family.
///
/// # Errors
///
/// Returns `Error::InitializationFailed` if no transfer-capable family is
/// left once the claimed ones are excluded.
pub fn select_transfer_queues(
    families: &[QueueFamilyInfo],
    claimed: &[u32],
    max: usize,
) -> Result<Vec<QueueSlot>> {
    let mut candidates: Vec<&QueueFamilyInfo> = families.iter()
        .filter(|family| family.capabilities.contains(QueueCapabilities::TRANSFER))
        .filter(|family| !claimed.contains(&family.index))
        .filter(|family| family.queue_count > 0)
        .collect();
    candidates.sort_by_key(|family| (family.capabilities.bits().count_ones(), family.index));

    let slots: Vec<QueueSlot> = candidates.iter()
        .flat_map(|family| (0..family.queue_count).map(move |queue_index| QueueSlot {
            family_index: family.index,
            queue_index,
        }))
        .take(max)
        .collect();

    if slots.is_empty() {
        return Err(engine_fail!("keystone::TransferWorker", Error::InitializationFailed,
            "No transfer-capable queue family outside the claimed families {:?} ({} families available)",
            claimed, families.len()));
    }
    Ok(slots)
}

#[cfg(test)]
#[path = "queue_selection_tests.rs"]
mod tests;
