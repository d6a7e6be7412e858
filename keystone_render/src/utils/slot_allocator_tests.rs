use super::*;

// ============================================================================
// Basic allocation tests
// ============================================================================

#[test]
fn test_sequential_alloc() {
    let mut alloc = SlotAllocator::with_capacity(8);
    assert_eq!(alloc.alloc().unwrap().index, 0);
    assert_eq!(alloc.alloc().unwrap().index, 1);
    assert_eq!(alloc.alloc().unwrap().index, 2);
}

#[test]
fn test_new_is_empty() {
    let alloc = SlotAllocator::with_capacity(8);
    assert!(alloc.is_empty());
    assert_eq!(alloc.len(), 0);
    assert_eq!(alloc.high_water_mark(), 0);
    assert_eq!(alloc.capacity(), 8);
}

#[test]
fn test_capacity_is_enforced() {
    let mut alloc = SlotAllocator::with_capacity(2);
    let a = alloc.alloc().unwrap();
    alloc.alloc().unwrap();
    assert!(alloc.alloc().is_none());

    // Freeing makes room again
    alloc.free(a.index);
    assert!(alloc.alloc().is_some());
}

// ============================================================================
// Free, recycle and generation tests
// ============================================================================

#[test]
fn test_free_and_recycle_bumps_generation() {
    let mut alloc = SlotAllocator::with_capacity(8);
    let a = alloc.alloc().unwrap();
    let _b = alloc.alloc().unwrap();
    alloc.free(a.index);

    let c = alloc.alloc().unwrap();
    assert_eq!(c.index, a.index);
    assert_eq!(c.generation, a.generation + 1);
    assert!(!alloc.is_live(a));
    assert!(alloc.is_live(c));
}

#[test]
fn test_free_multiple_recycle_lifo() {
    let mut alloc = SlotAllocator::with_capacity(8);
    let a = alloc.alloc().unwrap(); // 0
    let _b = alloc.alloc().unwrap(); // 1
    let c = alloc.alloc().unwrap(); // 2
    alloc.free(a.index);
    alloc.free(c.index);

    // Free list is a stack: last freed = first recycled
    assert_eq!(alloc.alloc().unwrap().index, 2);
    assert_eq!(alloc.alloc().unwrap().index, 0);
    assert_eq!(alloc.alloc().unwrap().index, 3);
}

#[test]
fn test_is_live_rejects_out_of_range() {
    let alloc = SlotAllocator::with_capacity(8);
    assert!(!alloc.is_live(SlotId { index: 5, generation: 0 }));
}

#[test]
fn test_high_water_mark_never_decreases() {
    let mut alloc = SlotAllocator::with_capacity(8);
    let a = alloc.alloc().unwrap();
    let b = alloc.alloc().unwrap();
    alloc.free(a.index);
    alloc.free(b.index);
    assert_eq!(alloc.high_water_mark(), 2);
    assert!(alloc.is_empty());
}

// ============================================================================
// Stress / pattern tests
// ============================================================================

#[test]
fn test_live_slots_are_unique() {
    let mut alloc = SlotAllocator::with_capacity(64);
    let mut live = std::collections::HashSet::new();

    for _ in 0..50 {
        live.insert(alloc.alloc().unwrap());
    }
    let freed: Vec<SlotId> = live.iter().copied().filter(|s| s.index % 3 == 0).collect();
    for slot in &freed {
        alloc.free(slot.index);
        live.remove(slot);
    }
    for _ in 0..freed.len() {
        let slot = alloc.alloc().unwrap();
        assert!(live.insert(slot), "duplicate live slot: {:?}", slot);
    }
    for slot in &freed {
        assert!(!alloc.is_live(*slot));
    }
    assert_eq!(live.len(), 50);
}
