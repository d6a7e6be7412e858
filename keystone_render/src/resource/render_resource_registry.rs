/// RenderResourceRegistry - handle to GPU resource mapping with upload state
///
/// Static and dynamic resources live in separate slot tables. A handle's id
/// encodes its table: even ids are static (`index * 2`), odd ids are
/// dynamic (`index * 2 + 1`), so `update` never scans static records.
///
/// Every record owns a timeline semaphore. Each upload signals the next
/// value, so command buffers can wait on `ready_sync_point` GPU-side while
/// the CPU polls the `UploadStatus` flag.

use std::sync::Arc;
use std::time::Duration;

use crate::config::Config;
use crate::error::{Error, Result};
use crate::graphics_device::{GpuResource, GraphicsDevice, Semaphore, SemaphoreKind, SyncPoint};
use crate::handle::{Handle, TypeTag};
use crate::resource::{ResourceDesc, UploadRequest};
use crate::transfer::{TransferWorker, UploadState, UploadStatus};
use crate::utils::{SlotAllocator, SlotId};
use crate::{engine_debug, engine_error, engine_fail, engine_panic, engine_warn};

struct ResourceRecord {
    resource: GpuResource,
    semaphore: Semaphore,
    /// Timeline value the latest upload signals
    signaled: u64,
    status: Arc<UploadStatus>,
    request: UploadRequest,
}

impl ResourceRecord {
    fn sync_point(&self) -> SyncPoint {
        SyncPoint::new(self.semaphore, Some(self.signaled))
    }
}

/// GPU objects released once no frame in flight can still read them
struct Retired {
    resource: Option<GpuResource>,
    semaphore: Option<Semaphore>,
    frames_left: u32,
}

/// One slot table (static or dynamic)
struct RecordTable {
    slots: SlotAllocator,
    records: Vec<Option<ResourceRecord>>,
}

impl RecordTable {
    fn new(capacity: u32) -> Self {
        Self {
            slots: SlotAllocator::with_capacity(capacity),
            records: Vec::new(),
        }
    }

    fn get(&self, index: u32, generation: u32) -> Option<&ResourceRecord> {
        if !self.slots.is_live(SlotId { index, generation }) {
            return None;
        }
        self.records.get(index as usize)?.as_ref()
    }

    fn get_mut(&mut self, index: u32, generation: u32) -> Option<&mut ResourceRecord> {
        if !self.slots.is_live(SlotId { index, generation }) {
            return None;
        }
        self.records.get_mut(index as usize)?.as_mut()
    }

    fn insert(&mut self, index: u32, record: ResourceRecord) {
        let i = index as usize;
        if self.records.len() <= i {
            self.records.resize_with(i + 1, || None);
        }
        self.records[i] = Some(record);
    }

    fn remove(&mut self, index: u32) -> Option<ResourceRecord> {
        let record = self.records.get_mut(index as usize)?.take()?;
        self.slots.free(index);
        Some(record)
    }
}

/// Registry of uploaded GPU resources for one device
pub struct RenderResourceRegistry {
    device: Arc<dyn GraphicsDevice>,
    type_tag: TypeTag,
    transfer: TransferWorker,
    statics: RecordTable,
    dynamics: RecordTable,
    retired: Vec<Retired>,
    frames_in_flight: u32,
    sync_timeout: Duration,
    cleaned_up: bool,
}

impl RenderResourceRegistry {
    /// Create the registry and its transfer worker
    ///
    /// # Errors
    ///
    /// Returns `Error::InitializationFailed` for an invalid config or if the
    /// transfer worker cannot start (no dedicated transfer queue).
    pub fn new(device: Arc<dyn GraphicsDevice>, type_tag: TypeTag, config: &Config) -> Result<Self> {
        config.validate()?;
        let transfer = TransferWorker::new(device.as_ref(), config)?;
        Ok(Self {
            device,
            type_tag,
            transfer,
            statics: RecordTable::new(config.max_static_resources),
            dynamics: RecordTable::new(config.max_dynamic_resources),
            retired: Vec::new(),
            frames_in_flight: config.frames_in_flight.max(1),
            sync_timeout: config.sync_timeout,
            cleaned_up: false,
        })
    }

    // ===== LOOKUP =====

    /// Whether `handle` addresses the dynamic table (odd id)
    pub fn is_dynamic_handle(handle: Handle) -> bool {
        handle.id() & 1 == 1
    }

    fn record(&self, handle: Handle) -> Result<&ResourceRecord> {
        let table = if Self::is_dynamic_handle(handle) { &self.dynamics } else { &self.statics };
        if handle.type_tag() != self.type_tag {
            return Err(stale_handle(handle));
        }
        table.get(handle.id() / 2, handle.generation()).ok_or_else(|| stale_handle(handle))
    }

    fn record_mut(&mut self, handle: Handle) -> Result<&mut ResourceRecord> {
        if handle.type_tag() != self.type_tag {
            return Err(stale_handle(handle));
        }
        let table = if Self::is_dynamic_handle(handle) { &mut self.dynamics } else { &mut self.statics };
        table.get_mut(handle.id() / 2, handle.generation()).ok_or_else(|| stale_handle(handle))
    }

    // ===== CREATION =====

    /// Create a resource and start uploading its content
    ///
    /// Returns immediately; the upload runs on a transfer thread. Use
    /// `is_ready`, `wait_for_ready` or `ready_sync_point` before reading it.
    ///
    /// # Errors
    ///
    /// - `Error::InvalidResource` for an empty resource or content larger than it
    /// - `Error::CapacityExceeded` when the slot table is full
    /// - the device error (e.g. `Error::OutOfMemory`) when allocation fails,
    ///   after a fatal log line naming the resource and its size
    pub fn add_request(&mut self, request: UploadRequest, high_priority: bool) -> Result<Handle> {
        self.ensure_alive()?;
        validate_desc(&request.desc)?;
        let dynamic = request.is_dynamic();

        let table = if dynamic { &mut self.dynamics } else { &mut self.statics };
        let Some(slot) = table.slots.alloc() else {
            return Err(engine_fail!("keystone::RenderResourceRegistry", Error::CapacityExceeded,
                "FATAL: {} resource table full ({} slots) while adding '{}'",
                if dynamic { "dynamic" } else { "static" }, table.slots.capacity(), request.desc.name()));
        };

        let created = create_gpu_objects(self.device.as_ref(), &request.desc);
        let (resource, semaphore) = match created {
            Ok(objects) => objects,
            Err(e) => {
                table.slots.free(slot.index);
                return Err(e);
            }
        };

        let mut record = ResourceRecord {
            resource,
            semaphore,
            signaled: 1,
            status: Arc::new(UploadStatus::new_done()),
            request,
        };
        let data = record.request.content.produce(0);

        if let Err(e) = self.transfer.add(
            Arc::clone(&record.status),
            Some(record.sync_point()),
            data,
            record.resource.clone(),
            high_priority,
        ) {
            self.device.destroy_semaphore(record.semaphore);
            table.slots.free(slot.index);
            return Err(e);
        }

        let id = if dynamic { slot.index * 2 + 1 } else { slot.index * 2 };
        let handle = Handle::new(self.type_tag, id, slot.generation);
        engine_debug!("keystone::RenderResourceRegistry", "Added {} {} '{}' ({} bytes) as {:?}",
            if dynamic { "dynamic" } else { "static" }, record.request.desc.kind(),
            record.request.desc.name(), record.request.desc.size_bytes(), handle);

        table.insert(slot.index, record);
        Ok(handle)
    }

    // ===== PER-FRAME REFRESH =====

    /// Re-upload every dynamic resource whose policy says it is stale
    ///
    /// Waits for each stale resource's previous upload, re-submits all of
    /// them, then waits for the new uploads: on return no refreshed
    /// resource has a copy in flight, so command buffers recorded next can
    /// read them. Returns how many resources were refreshed.
    ///
    /// A resource whose previous upload failed is simply uploaded again.
    /// If a re-submission is rejected, the uploads already queued are still
    /// waited for before the error is returned.
    ///
    /// # Errors
    ///
    /// Returns `Error::DeviceLost` when an upload does not finish within
    /// the sync timeout, the error of a failed upload, or the error of a
    /// rejected re-submission.
    pub fn update(&mut self, frame_in_flight_index: u32) -> Result<usize> {
        self.ensure_alive()?;
        self.age_retired();

        let stale: Vec<u32> = self.dynamics.records.iter().enumerate()
            .filter_map(|(index, record)| {
                let record = record.as_ref()?;
                record.request.refresh.needs_update(frame_in_flight_index).then_some(index as u32)
            })
            .collect();
        if stale.is_empty() {
            return Ok(0);
        }

        for &index in &stale {
            if let Some(record) = self.dynamics.records[index as usize].as_ref() {
                // A failed upload has nothing in flight; the refresh retries it
                match wait_status(record, self.sync_timeout) {
                    Ok(()) | Err(Error::UploadFailed(_)) => {}
                    Err(e) => return Err(e),
                }
            }
        }

        let mut submitted = Vec::with_capacity(stale.len());
        let mut failure = None;
        for &index in &stale {
            let Some(record) = self.dynamics.records[index as usize].as_mut() else {
                continue;
            };
            let data = record.request.content.produce(frame_in_flight_index);
            let next = record.signaled + 1;
            let queued = self.transfer.add(
                Arc::clone(&record.status),
                Some(SyncPoint::new(record.semaphore, Some(next))),
                data,
                record.resource.clone(),
                false,
            );
            match queued {
                Ok(()) => {
                    record.signaled = next;
                    submitted.push(index);
                }
                Err(e) => {
                    failure = Some(e);
                    break;
                }
            }
        }

        for &index in &submitted {
            if let Some(record) = self.dynamics.records[index as usize].as_ref() {
                if let Err(e) = wait_status(record, self.sync_timeout) {
                    failure.get_or_insert(e);
                }
            }
        }
        if let Some(e) = failure {
            return Err(e);
        }

        engine_debug!("keystone::RenderResourceRegistry", "Refreshed {} dynamic resource(s) for frame slot {}",
            stale.len(), frame_in_flight_index);
        Ok(stale.len())
    }

    // ===== READINESS =====

    /// Whether the latest upload of `handle` completed (non-blocking)
    ///
    /// # Errors
    ///
    /// `Error::InvalidHandle` for a stale handle, `Error::UploadFailed` if
    /// the upload failed.
    pub fn is_ready(&self, handle: Handle) -> Result<bool> {
        let record = self.record(handle)?;
        match record.status.state() {
            UploadState::Done => Ok(true),
            UploadState::Pending => Ok(false),
            UploadState::Failed => Err(Error::UploadFailed(format!(
                "upload of '{}' failed", record.request.desc.name()))),
        }
    }

    /// Block until the latest upload of `handle` completed
    ///
    /// # Errors
    ///
    /// `Error::DeviceLost` when the sync timeout expires first.
    pub fn wait_for_ready(&self, handle: Handle) -> Result<()> {
        let record = self.record(handle)?;
        wait_status(record, self.sync_timeout)
    }

    /// GPU-side readiness: the semaphore value the latest upload signals
    pub fn ready_sync_point(&self, handle: Handle) -> Result<SyncPoint> {
        Ok(self.record(handle)?.sync_point())
    }

    // ===== REPLACEMENT / DESTRUCTION =====

    /// Replace the content (and possibly the description) of a resource
    ///
    /// Blocks until the previous upload completed, so two uploads never
    /// target the same GPU object at once. A changed description creates a
    /// new GPU object; the old one is released once no frame in flight can
    /// still read it.
    ///
    /// # Errors
    ///
    /// - `Error::InvalidHandle` for a stale handle
    /// - `Error::InvalidResource` if the request would move the resource
    ///   between the static and dynamic tables, or its content is larger
    ///   than its description
    /// - the device error when the new object cannot be allocated
    ///
    /// On error the resource keeps its previous object, content and
    /// readiness point.
    pub fn update_request(&mut self, mut request: UploadRequest, handle: Handle, high_priority: bool) -> Result<()> {
        self.ensure_alive()?;
        validate_desc(&request.desc)?;
        if request.is_dynamic() != Self::is_dynamic_handle(handle) {
            return Err(engine_fail!("keystone::RenderResourceRegistry", Error::InvalidResource,
                "Request '{}' cannot change {:?} between static and dynamic", request.desc.name(), handle));
        }

        if handle.type_tag() != self.type_tag {
            return Err(stale_handle(handle));
        }
        let table = if Self::is_dynamic_handle(handle) { &mut self.dynamics } else { &mut self.statics };
        let record = table.get_mut(handle.id() / 2, handle.generation()).ok_or_else(|| stale_handle(handle))?;

        let data = request.content.produce(0);
        if data.len() as u64 > request.desc.size_bytes() {
            return Err(engine_fail!("keystone::RenderResourceRegistry", Error::InvalidResource,
                "Content of '{}' ({} bytes) does not fit its description ({} bytes)",
                request.desc.name(), data.len(), request.desc.size_bytes()));
        }

        // Previous upload must land before anything targets the object again
        match record.status.wait(self.sync_timeout) {
            Ok(()) | Err(Error::UploadFailed(_)) => {}
            Err(e) => return Err(e),
        }

        let replacement = if request.desc != record.request.desc {
            Some(create_resource(self.device.as_ref(), &request.desc)?)
        } else {
            None
        };
        let target = replacement.clone().unwrap_or_else(|| record.resource.clone());
        let next = record.signaled + 1;
        self.transfer.add(
            Arc::clone(&record.status),
            Some(SyncPoint::new(record.semaphore, Some(next))),
            data,
            target,
            high_priority,
        )?;

        record.signaled = next;
        if let Some(resource) = replacement {
            let old = std::mem::replace(&mut record.resource, resource);
            self.retired.push(Retired { resource: Some(old), semaphore: None, frames_left: self.frames_in_flight });
        }
        record.request = request;
        Ok(())
    }

    /// Remove a resource
    ///
    /// The caller must have waited for its upload: destroying a resource
    /// with an upload in flight is a programming error and panics. The GPU
    /// objects are released once no frame in flight can still read them.
    pub fn destroy(&mut self, handle: Handle) -> Result<()> {
        let record = self.record(handle)?;
        if record.status.is_pending() {
            engine_panic!("keystone::RenderResourceRegistry",
                "destroy({:?}) on '{}' while its upload is still in flight", handle, record.request.desc.name());
        }

        let table = if Self::is_dynamic_handle(handle) { &mut self.dynamics } else { &mut self.statics };
        let Some(record) = table.remove(handle.id() / 2) else {
            return Err(stale_handle(handle));
        };
        self.retired.push(Retired {
            resource: Some(record.resource),
            semaphore: Some(record.semaphore),
            frames_left: self.frames_in_flight,
        });
        Ok(())
    }

    /// Shared reference to the GPU object behind `handle`
    pub fn get_resource(&self, handle: Handle) -> Result<GpuResource> {
        Ok(self.record(handle)?.resource.clone())
    }

    // ===== STATS =====

    pub fn len(&self) -> usize {
        self.static_count() + self.dynamic_count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn static_count(&self) -> usize {
        self.statics.slots.len() as usize
    }

    pub fn dynamic_count(&self) -> usize {
        self.dynamics.slots.len() as usize
    }

    /// GPU objects awaiting release
    pub fn retired_count(&self) -> usize {
        self.retired.len()
    }

    pub fn type_tag(&self) -> TypeTag {
        self.type_tag
    }

    // ===== TEARDOWN =====

    fn age_retired(&mut self) {
        let device = Arc::clone(&self.device);
        self.retired.retain_mut(|retired| {
            retired.frames_left = retired.frames_left.saturating_sub(1);
            if retired.frames_left > 0 {
                return true;
            }
            if let Some(semaphore) = retired.semaphore.take() {
                device.destroy_semaphore(semaphore);
            }
            false
        });
    }

    /// Stop the transfer worker, then release every GPU object
    ///
    /// Uploads still queued are drained first, so nothing is destroyed
    /// under an in-flight copy. Idempotent; later calls to any other
    /// method fail with `Error::DeviceLost`.
    pub fn cleanup(&mut self) -> Result<()> {
        if self.cleaned_up {
            return Ok(());
        }
        self.cleaned_up = true;
        let drained = self.transfer.shutdown();
        if let Err(e) = self.device.wait_idle() {
            engine_error!("keystone::RenderResourceRegistry", "Device did not go idle before cleanup: {}", e);
        }

        let mut released = 0;
        for table in [&mut self.statics, &mut self.dynamics] {
            for record in table.records.drain(..).flatten() {
                self.device.destroy_semaphore(record.semaphore);
                released += 1;
            }
            table.slots = SlotAllocator::with_capacity(table.slots.capacity());
        }
        for retired in self.retired.drain(..) {
            if let Some(semaphore) = retired.semaphore {
                self.device.destroy_semaphore(semaphore);
            }
        }

        engine_debug!("keystone::RenderResourceRegistry", "Released {} resource(s)", released);
        drained
    }

    fn ensure_alive(&self) -> Result<()> {
        if self.cleaned_up {
            return Err(engine_fail!("keystone::RenderResourceRegistry", Error::DeviceLost,
                "Registry used after cleanup"));
        }
        Ok(())
    }
}

impl Drop for RenderResourceRegistry {
    fn drop(&mut self) {
        if let Err(e) = self.cleanup() {
            engine_warn!("keystone::RenderResourceRegistry", "Cleanup on drop failed: {}", e);
        }
    }
}

fn stale_handle(handle: Handle) -> Error {
    Error::InvalidHandle(format!("{:?} is not a live render resource", handle))
}

fn validate_desc(desc: &ResourceDesc) -> Result<()> {
    if desc.size_bytes() == 0 {
        return Err(engine_fail!("keystone::RenderResourceRegistry", Error::InvalidResource,
            "Resource '{}' has zero size", desc.name()));
    }
    Ok(())
}

fn wait_status(record: &ResourceRecord, timeout: Duration) -> Result<()> {
    record.status.wait(timeout).map_err(|e| match e {
        Error::DeviceLost(_) => engine_fail!("keystone::RenderResourceRegistry", Error::DeviceLost,
            "FATAL: upload of '{}' did not finish within {:?}", record.request.desc.name(), timeout),
        Error::UploadFailed(_) => Error::UploadFailed(format!("upload of '{}' failed", record.request.desc.name())),
        other => other,
    })
}

fn create_resource(device: &dyn GraphicsDevice, desc: &ResourceDesc) -> Result<GpuResource> {
    let created = match desc {
        ResourceDesc::Buffer(buffer) => device.create_buffer(buffer).map(GpuResource::Buffer),
        ResourceDesc::Image(image) => device.create_image(image).map(GpuResource::Image),
    };
    created.map_err(|e| {
        engine_error!("keystone::RenderResourceRegistry", "FATAL: allocation of {} '{}' ({} bytes) failed: {}",
            desc.kind(), desc.name(), desc.size_bytes(), e);
        e
    })
}

fn create_gpu_objects(device: &dyn GraphicsDevice, desc: &ResourceDesc) -> Result<(GpuResource, Semaphore)> {
    let resource = create_resource(device, desc)?;
    let semaphore = device.create_semaphore(SemaphoreKind::Timeline).map_err(|e| {
        engine_error!("keystone::RenderResourceRegistry", "FATAL: readiness semaphore for '{}' failed: {}",
            desc.name(), e);
        e
    })?;
    Ok((resource, semaphore))
}

#[cfg(test)]
#[path = "render_resource_registry_tests.rs"]
mod tests;
