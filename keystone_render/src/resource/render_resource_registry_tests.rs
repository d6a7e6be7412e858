use super::*;
use crate::graphics_device::mock_graphics_device::{resource_contents, MockGraphicsDevice};
use crate::graphics_device::{BufferDesc, BufferUsage, ImageDesc, ImageFormat};
use crate::resource::RefreshPolicy;
use std::collections::HashSet;
use std::panic::{self, AssertUnwindSafe};

const TAG: TypeTag = TypeTag(1);

fn test_config() -> Config {
    Config {
        worker_idle_timeout: Duration::from_millis(1),
        sync_timeout: Duration::from_secs(5),
        ..Config::default()
    }
}

fn create_registry(config: &Config) -> (Arc<MockGraphicsDevice>, RenderResourceRegistry) {
    let device = Arc::new(MockGraphicsDevice::new());
    let shared: Arc<dyn GraphicsDevice> = device.clone();
    let registry = RenderResourceRegistry::new(shared, TAG, config).unwrap();
    (device, registry)
}

fn uniform(name: &str, size: u64) -> BufferDesc {
    BufferDesc { name: name.to_string(), size, usage: BufferUsage::Uniform }
}

fn static_request(name: &str, bytes: Vec<u8>) -> UploadRequest {
    UploadRequest::buffer(uniform(name, bytes.len() as u64), bytes)
}

// ============================================================================
// add_request / readiness
// ============================================================================

#[test]
fn test_static_buffer_upload_roundtrip() {
    let (_device, mut registry) = create_registry(&test_config());
    let bytes: Vec<u8> = (0..=255u8).collect();

    let handle = registry.add_request(static_request("mesh_vertices", bytes.clone()), false).unwrap();
    registry.wait_for_ready(handle).unwrap();

    assert!(registry.is_ready(handle).unwrap());
    let resource = registry.get_resource(handle).unwrap();
    assert_eq!(resource.size_bytes(), 256);
    assert_eq!(resource_contents(&resource), bytes);
}

#[test]
fn test_not_ready_until_upload_ran() {
    let (device, mut registry) = create_registry(&test_config());
    device.pause_uploads();

    let handle = registry.add_request(static_request("held", vec![9; 16]), false).unwrap();
    assert!(!registry.is_ready(handle).unwrap());

    // The GPU-side readiness point is not reached either
    let point = registry.ready_sync_point(handle).unwrap();
    assert!(device.semaphore_value(point.semaphore).unwrap() < point.value.unwrap());

    device.resume_uploads();
    registry.wait_for_ready(handle).unwrap();
    assert!(device.semaphore_value(point.semaphore).unwrap() >= point.value.unwrap());
}

#[test]
fn test_handle_parity_encodes_category() {
    let (_device, mut registry) = create_registry(&test_config());
    let fixed = registry.add_request(static_request("fixed", vec![1; 4]), false).unwrap();
    let moving = registry.add_request(
        static_request("moving", vec![2; 4]).with_refresh(RefreshPolicy::EveryFrame), false).unwrap();

    assert_eq!(fixed.id() % 2, 0);
    assert_eq!(moving.id() % 2, 1);
    assert!(!RenderResourceRegistry::is_dynamic_handle(fixed));
    assert!(RenderResourceRegistry::is_dynamic_handle(moving));
    assert_eq!(registry.static_count(), 1);
    assert_eq!(registry.dynamic_count(), 1);
    assert_eq!(fixed.type_tag(), TAG);
}

#[test]
fn test_image_request() {
    let (_device, mut registry) = create_registry(&test_config());
    let desc = ImageDesc { name: "noise".to_string(), width: 4, height: 4, format: ImageFormat::R8_UNORM };
    let handle = registry.add_request(UploadRequest::image(desc, vec![3u8; 16]), true).unwrap();
    registry.wait_for_ready(handle).unwrap();
    assert!(registry.get_resource(handle).unwrap().as_image().is_some());
}

#[test]
fn test_zero_sized_and_oversized_requests_rejected() {
    let (_device, mut registry) = create_registry(&test_config());
    let empty = UploadRequest::buffer(uniform("empty", 0), Vec::new());
    assert!(matches!(registry.add_request(empty, false), Err(Error::InvalidResource(_))));

    let too_big = UploadRequest::buffer(uniform("small", 4), vec![0u8; 8]);
    assert!(matches!(registry.add_request(too_big, false), Err(Error::InvalidResource(_))));
    assert!(registry.is_empty());
}

#[test]
fn test_allocation_failure_surfaces_error() {
    let (device, mut registry) = create_registry(&test_config());
    device.set_fail_allocations(true);

    let result = registry.add_request(static_request("huge", vec![0; 64]), false);
    assert!(matches!(result, Err(Error::OutOfMemory)));
    assert_eq!(registry.static_count(), 0);
}

#[test]
fn test_slot_table_full() {
    let config = Config { max_static_resources: 1, ..test_config() };
    let (_device, mut registry) = create_registry(&config);
    registry.add_request(static_request("first", vec![0; 4]), false).unwrap();
    let result = registry.add_request(static_request("second", vec![0; 4]), false);
    assert!(matches!(result, Err(Error::CapacityExceeded(_))));
}

#[test]
fn test_failed_upload_reported() {
    let (device, mut registry) = create_registry(&test_config());
    device.set_fail_uploads(true);

    let handle = registry.add_request(static_request("broken", vec![0; 4]), false).unwrap();
    assert!(matches!(registry.wait_for_ready(handle), Err(Error::UploadFailed(_))));
    assert!(matches!(registry.is_ready(handle), Err(Error::UploadFailed(_))));
}

// ============================================================================
// Handles
// ============================================================================

#[test]
fn test_live_handles_unique_across_churn() {
    let (_device, mut registry) = create_registry(&test_config());
    let mut live = Vec::new();
    let mut seen_live = HashSet::new();

    for round in 0..20u8 {
        let handle = registry.add_request(static_request("churn", vec![round; 4]), false).unwrap();
        registry.wait_for_ready(handle).unwrap();
        live.push(handle);
        if round % 3 == 0 {
            let victim = live.remove(0);
            registry.destroy(victim).unwrap();
        }
        seen_live.clear();
        for handle in &live {
            assert!(seen_live.insert(*handle), "duplicate live handle {:?}", handle);
        }
    }
}

#[test]
fn test_stale_handle_rejected() {
    let (_device, mut registry) = create_registry(&test_config());
    let handle = registry.add_request(static_request("gone", vec![0; 4]), false).unwrap();
    registry.wait_for_ready(handle).unwrap();
    registry.destroy(handle).unwrap();

    // Slot is recycled under a new generation
    let reused = registry.add_request(static_request("new", vec![0; 4]), false).unwrap();
    assert_eq!(reused.id(), handle.id());
    assert_ne!(reused.generation(), handle.generation());

    assert!(matches!(registry.get_resource(handle), Err(Error::InvalidHandle(_))));
    assert!(matches!(registry.is_ready(handle), Err(Error::InvalidHandle(_))));
    assert!(matches!(registry.destroy(handle), Err(Error::InvalidHandle(_))));
}

#[test]
fn test_destroy_while_uploading_panics() {
    let (device, mut registry) = create_registry(&test_config());
    device.pause_uploads();
    let handle = registry.add_request(static_request("busy", vec![0; 4]), false).unwrap();

    let result = panic::catch_unwind(AssertUnwindSafe(|| registry.destroy(handle)));
    assert!(result.is_err());

    device.resume_uploads();
    registry.wait_for_ready(handle).unwrap();
    registry.destroy(handle).unwrap();
}

// ============================================================================
// update (dynamic refresh)
// ============================================================================

#[test]
fn test_update_refreshes_only_stale_dynamic_resources() {
    let (device, mut registry) = create_registry(&test_config());
    let fixed = registry.add_request(static_request("fixed", vec![0; 4]), false).unwrap();
    let every = registry.add_request(UploadRequest::with_source(
        ResourceDesc::Buffer(uniform("frame_constants", 4)),
        |fif: u32| fif.to_le_bytes().to_vec(),
        RefreshPolicy::EveryFrame,
    ), false).unwrap();
    let odd_only = registry.add_request(
        static_request("odd", vec![5; 4]).with_refresh(RefreshPolicy::OnFrameInFlight(1)), false).unwrap();
    registry.wait_for_ready(fixed).unwrap();
    registry.wait_for_ready(odd_only).unwrap();

    assert_eq!(registry.update(0).unwrap(), 1);
    // update returns only after the new uploads landed
    assert!(registry.is_ready(every).unwrap());
    assert_eq!(resource_contents(&registry.get_resource(every).unwrap()), 0u32.to_le_bytes().to_vec());

    assert_eq!(registry.update(1).unwrap(), 2);
    assert_eq!(resource_contents(&registry.get_resource(every).unwrap()), 1u32.to_le_bytes().to_vec());

    // Initial upload + two refreshes signal value 3
    let point = registry.ready_sync_point(every).unwrap();
    assert_eq!(point.value, Some(3));
    assert_eq!(device.semaphore_value(point.semaphore).unwrap(), 3);
}

#[test]
fn test_update_waits_for_prior_upload() {
    let (device, mut registry) = create_registry(&test_config());
    device.set_upload_delay(Duration::from_millis(5));
    let handle = registry.add_request(
        static_request("slow", vec![1; 4]).with_refresh(RefreshPolicy::EveryFrame), false).unwrap();

    assert_eq!(registry.update(0).unwrap(), 1);
    assert_eq!(device.uploads().len(), 2);
    assert!(registry.is_ready(handle).unwrap());
}

#[test]
fn test_update_retries_after_failed_upload() {
    let (device, mut registry) = create_registry(&test_config());
    device.set_fail_uploads(true);
    let handle = registry.add_request(UploadRequest::with_source(
        ResourceDesc::Buffer(uniform("dyn", 4)),
        |fif: u32| (fif + 10).to_le_bytes().to_vec(),
        RefreshPolicy::EveryFrame,
    ), false).unwrap();
    assert!(matches!(registry.wait_for_ready(handle), Err(Error::UploadFailed(_))));

    // Still failing: the refresh itself reports it
    assert!(matches!(registry.update(0), Err(Error::UploadFailed(_))));

    device.set_fail_uploads(false);
    assert_eq!(registry.update(1).unwrap(), 1);
    assert!(registry.is_ready(handle).unwrap());
    assert_eq!(resource_contents(&registry.get_resource(handle).unwrap()), 11u32.to_le_bytes().to_vec());

    let point = registry.ready_sync_point(handle).unwrap();
    assert!(device.semaphore_value(point.semaphore).unwrap() >= point.value.unwrap());
    assert_eq!(registry.update(0).unwrap(), 1);
}

#[test]
fn test_update_rejected_refresh_waits_for_queued_uploads() {
    let (device, mut registry) = create_registry(&test_config());
    let good = registry.add_request(static_request("good", vec![1; 4])
        .with_refresh(RefreshPolicy::EveryFrame), false).unwrap();
    // Produces more than its buffer holds on frame slot 1
    let bad = registry.add_request(UploadRequest::with_source(
        ResourceDesc::Buffer(uniform("bad", 4)),
        |fif: u32| vec![2u8; if fif == 1 { 32 } else { 4 }],
        RefreshPolicy::EveryFrame,
    ), false).unwrap();
    registry.wait_for_ready(good).unwrap();
    registry.wait_for_ready(bad).unwrap();
    let bad_before = registry.ready_sync_point(bad).unwrap();

    device.set_upload_delay(Duration::from_millis(5));
    assert!(matches!(registry.update(1), Err(Error::InvalidResource(_))));

    // The refresh queued before the rejection already landed
    assert!(registry.is_ready(good).unwrap());
    let good_point = registry.ready_sync_point(good).unwrap();
    assert_eq!(good_point.value, Some(2));
    assert_eq!(device.semaphore_value(good_point.semaphore).unwrap(), 2);

    // The rejected one still points at a value that was signaled
    let bad_after = registry.ready_sync_point(bad).unwrap();
    assert_eq!(bad_after, bad_before);
    assert!(device.semaphore_value(bad_after.semaphore).unwrap() >= bad_after.value.unwrap());
    assert!(registry.is_ready(bad).unwrap());
}

// ============================================================================
// update_request
// ============================================================================

#[test]
fn test_update_request_replaces_content_after_previous_upload() {
    let (device, mut registry) = create_registry(&test_config());
    device.set_upload_delay(Duration::from_millis(5));
    let handle = registry.add_request(static_request("material", vec![1; 8]), false).unwrap();

    registry.update_request(static_request("material", vec![2; 8]), handle, false).unwrap();
    registry.wait_for_ready(handle).unwrap();

    let uploads = device.uploads();
    assert_eq!(uploads.len(), 2);
    assert_eq!(resource_contents(&registry.get_resource(handle).unwrap()), vec![2; 8]);
}

#[test]
fn test_update_request_with_new_desc_recreates_resource() {
    let (_device, mut registry) = create_registry(&test_config());
    let handle = registry.add_request(static_request("grow", vec![1; 4]), false).unwrap();
    registry.wait_for_ready(handle).unwrap();
    let before = registry.get_resource(handle).unwrap();

    registry.update_request(static_request("grow", vec![7; 16]), handle, false).unwrap();
    registry.wait_for_ready(handle).unwrap();

    let after = registry.get_resource(handle).unwrap();
    assert!(!before.ptr_eq(&after));
    assert_eq!(after.size_bytes(), 16);
    assert_eq!(registry.retired_count(), 1);
}

#[test]
fn test_rejected_update_request_keeps_previous_state() {
    let (device, mut registry) = create_registry(&test_config());
    let handle = registry.add_request(static_request("params", vec![4; 16]), false).unwrap();
    registry.wait_for_ready(handle).unwrap();
    let before = registry.ready_sync_point(handle).unwrap();

    let oversized = UploadRequest::buffer(uniform("params", 16), vec![5u8; 32]);
    assert!(matches!(registry.update_request(oversized, handle, false), Err(Error::InvalidResource(_))));

    let after = registry.ready_sync_point(handle).unwrap();
    assert_eq!(after, before);
    assert!(device.semaphore_value(after.semaphore).unwrap() >= after.value.unwrap());
    assert!(registry.is_ready(handle).unwrap());
    assert_eq!(resource_contents(&registry.get_resource(handle).unwrap()), vec![4; 16]);
}

#[test]
fn test_rejected_update_request_with_new_desc_keeps_object() {
    let (_device, mut registry) = create_registry(&test_config());
    let handle = registry.add_request(static_request("shrink", vec![6; 16]), false).unwrap();
    registry.wait_for_ready(handle).unwrap();
    let before = registry.get_resource(handle).unwrap();

    let shrunk = UploadRequest::buffer(uniform("shrink", 8), vec![7u8; 32]);
    assert!(matches!(registry.update_request(shrunk, handle, false), Err(Error::InvalidResource(_))));

    let after = registry.get_resource(handle).unwrap();
    assert!(before.ptr_eq(&after));
    assert_eq!(after.size_bytes(), 16);
    assert_eq!(resource_contents(&after), vec![6; 16]);
    assert_eq!(registry.retired_count(), 0);
    assert!(registry.is_ready(handle).unwrap());
}

#[test]
fn test_failed_allocation_in_update_request_keeps_object() {
    let (device, mut registry) = create_registry(&test_config());
    let handle = registry.add_request(static_request("grow", vec![1; 4]), false).unwrap();
    registry.wait_for_ready(handle).unwrap();
    let before = registry.ready_sync_point(handle).unwrap();

    device.set_fail_allocations(true);
    let grown = static_request("grow", vec![2; 64]);
    assert!(matches!(registry.update_request(grown, handle, false), Err(Error::OutOfMemory)));

    assert_eq!(registry.ready_sync_point(handle).unwrap(), before);
    assert_eq!(registry.get_resource(handle).unwrap().size_bytes(), 4);
    assert_eq!(registry.retired_count(), 0);
}

#[test]
fn test_update_request_cannot_change_category() {
    let (_device, mut registry) = create_registry(&test_config());
    let handle = registry.add_request(static_request("fixed", vec![1; 4]), false).unwrap();
    let dynamic = static_request("fixed", vec![1; 4]).with_refresh(RefreshPolicy::EveryFrame);
    assert!(matches!(registry.update_request(dynamic, handle, false), Err(Error::InvalidResource(_))));
}

// ============================================================================
// Teardown
// ============================================================================

#[test]
fn test_destroyed_objects_released_after_frames_in_flight() {
    let (device, mut registry) = create_registry(&test_config());
    let handle = registry.add_request(static_request("short_lived", vec![0; 4]), false).unwrap();
    registry.wait_for_ready(handle).unwrap();
    registry.destroy(handle).unwrap();
    assert_eq!(registry.retired_count(), 1);
    assert_eq!(device.destroyed_semaphores(), 0);

    registry.update(0).unwrap();
    assert_eq!(registry.retired_count(), 1);
    registry.update(1).unwrap();
    assert_eq!(registry.retired_count(), 0);
    assert_eq!(device.destroyed_semaphores(), 1);
}

#[test]
fn test_cleanup_releases_everything() {
    let (device, mut registry) = create_registry(&test_config());
    for i in 0..3u8 {
        registry.add_request(static_request("bulk", vec![i; 4]), false).unwrap();
    }

    registry.cleanup().unwrap();
    assert_eq!(device.uploads().len(), 3);
    assert_eq!(device.live_semaphores(), 0);
    assert!(registry.is_empty());

    registry.cleanup().unwrap();
    assert!(matches!(registry.add_request(static_request("late", vec![0; 4]), false), Err(Error::DeviceLost(_))));
}
