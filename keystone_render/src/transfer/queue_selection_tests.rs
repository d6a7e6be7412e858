use super::*;

fn family(index: u32, capabilities: QueueCapabilities, queue_count: u32) -> QueueFamilyInfo {
    QueueFamilyInfo { index, capabilities, queue_count }
}

// ============================================================================
// Selection
// ============================================================================

#[test]
fn test_selects_unclaimed_transfer_family() {
    let families = [
        family(0, QueueCapabilities::all(), 1),
        family(1, QueueCapabilities::TRANSFER, 2),
    ];
    let slots = select_transfer_queues(&families, &[0], 4).unwrap();
    assert_eq!(slots, vec![
        QueueSlot { family_index: 1, queue_index: 0 },
        QueueSlot { family_index: 1, queue_index: 1 },
    ]);
}

#[test]
fn test_respects_max() {
    let families = [family(2, QueueCapabilities::TRANSFER, 8)];
    let slots = select_transfer_queues(&families, &[], 3).unwrap();
    assert_eq!(slots.len(), 3);
    assert!(slots.iter().all(|slot| slot.family_index == 2));
}

#[test]
fn test_prefers_dedicated_transfer_family() {
    let families = [
        family(0, QueueCapabilities::all(), 1),
        family(1, QueueCapabilities::COMPUTE | QueueCapabilities::TRANSFER, 1),
        family(2, QueueCapabilities::TRANSFER, 1),
    ];
    let slots = select_transfer_queues(&families, &[0], 2).unwrap();
    assert_eq!(slots[0].family_index, 2);
    assert_eq!(slots[1].family_index, 1);
}

#[test]
fn test_claimed_family_never_selected() {
    let families = [
        family(0, QueueCapabilities::all(), 4),
        family(1, QueueCapabilities::COMPUTE | QueueCapabilities::TRANSFER, 1),
    ];
    let slots = select_transfer_queues(&families, &[0, 1], 4);
    assert!(matches!(slots, Err(Error::InitializationFailed(_))));
}

#[test]
fn test_no_transfer_family_is_an_error() {
    let families = [family(0, QueueCapabilities::GRAPHICS | QueueCapabilities::PRESENT, 1)];
    assert!(select_transfer_queues(&families, &[], 1).is_err());
}
