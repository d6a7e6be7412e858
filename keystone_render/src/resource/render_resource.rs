/// Render resource requests: what to create, what to upload, when to refresh

use std::fmt;
use std::sync::Arc;
use bytemuck::Pod;
use crate::graphics_device::{BufferDesc, ImageDesc};

/// GPU object a request creates
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResourceDesc {
    Buffer(BufferDesc),
    Image(ImageDesc),
}

impl ResourceDesc {
    pub fn name(&self) -> &str {
        match self {
            ResourceDesc::Buffer(desc) => &desc.name,
            ResourceDesc::Image(desc) => &desc.name,
        }
    }

    /// Bytes the created object holds
    pub fn size_bytes(&self) -> u64 {
        match self {
            ResourceDesc::Buffer(desc) => desc.size,
            ResourceDesc::Image(desc) => desc.size_bytes(),
        }
    }

    /// "buffer" or "image", for log lines
    pub fn kind(&self) -> &'static str {
        match self {
            ResourceDesc::Buffer(_) => "buffer",
            ResourceDesc::Image(_) => "image",
        }
    }
}

/// Staleness policy of a resource, consulted once per frame by `update`
#[derive(Clone)]
pub enum RefreshPolicy {
    /// Uploaded once; only `update_request` changes it
    Static,
    /// Re-uploaded every frame
    EveryFrame,
    /// Re-uploaded when the given frame-in-flight slot comes around
    OnFrameInFlight(u32),
    /// Re-uploaded whenever the predicate returns true for the frame-in-flight index
    Custom(Arc<dyn Fn(u32) -> bool + Send + Sync>),
}

impl RefreshPolicy {
    pub fn needs_update(&self, frame_in_flight_index: u32) -> bool {
        match self {
            RefreshPolicy::Static => false,
            RefreshPolicy::EveryFrame => true,
            RefreshPolicy::OnFrameInFlight(index) => *index == frame_in_flight_index,
            RefreshPolicy::Custom(predicate) => predicate(frame_in_flight_index),
        }
    }

    /// Anything but `Static`
    pub fn is_dynamic(&self) -> bool {
        !matches!(self, RefreshPolicy::Static)
    }
}

impl fmt::Debug for RefreshPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RefreshPolicy::Static => write!(f, "Static"),
            RefreshPolicy::EveryFrame => write!(f, "EveryFrame"),
            RefreshPolicy::OnFrameInFlight(index) => write!(f, "OnFrameInFlight({})", index),
            RefreshPolicy::Custom(_) => write!(f, "Custom(..)"),
        }
    }
}

/// Producer of fresh bytes for a dynamic resource
///
/// Called on the owning thread, right before each re-upload.
pub trait ContentSource: Send {
    fn content(&mut self, frame_in_flight_index: u32) -> Vec<u8>;
}

impl<F> ContentSource for F
where
    F: FnMut(u32) -> Vec<u8> + Send,
{
    fn content(&mut self, frame_in_flight_index: u32) -> Vec<u8> {
        self(frame_in_flight_index)
    }
}

/// Bytes an upload carries
pub enum UploadContent {
    /// Fixed bytes, re-sent unchanged on every refresh
    Bytes(Arc<[u8]>),
    /// Bytes produced on demand
    Source(Box<dyn ContentSource>),
}

impl UploadContent {
    /// Bytes for an upload issued while `frame_in_flight_index` is current
    pub fn produce(&mut self, frame_in_flight_index: u32) -> Arc<[u8]> {
        match self {
            UploadContent::Bytes(bytes) => Arc::clone(bytes),
            UploadContent::Source(source) => source.content(frame_in_flight_index).into(),
        }
    }
}

impl fmt::Debug for UploadContent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UploadContent::Bytes(bytes) => write!(f, "Bytes({} bytes)", bytes.len()),
            UploadContent::Source(_) => write!(f, "Source(..)"),
        }
    }
}

/// Everything the registry needs to create and fill a resource
///
/// # Example
///
/// ```no_run
/// use keystone_render::keystone::render::{BufferDesc, BufferUsage};
/// use keystone_render::keystone::resource::{RefreshPolicy, UploadRequest};
///
/// let desc = BufferDesc { name: "camera".to_string(), size: 64, usage: BufferUsage::Uniform };
/// let request = UploadRequest::from_pod(desc, &[0.0f32; 16])
///     .with_refresh(RefreshPolicy::EveryFrame);
/// assert!(request.is_dynamic());
/// ```
#[derive(Debug)]
pub struct UploadRequest {
    pub desc: ResourceDesc,
    pub content: UploadContent,
    pub refresh: RefreshPolicy,
}

impl UploadRequest {
    /// Static buffer filled with `data`
    pub fn buffer(desc: BufferDesc, data: impl Into<Arc<[u8]>>) -> Self {
        Self {
            desc: ResourceDesc::Buffer(desc),
            content: UploadContent::Bytes(data.into()),
            refresh: RefreshPolicy::Static,
        }
    }

    /// Static buffer filled with the raw bytes of `values`
    pub fn from_pod<T: Pod>(desc: BufferDesc, values: &[T]) -> Self {
        Self::buffer(desc, bytemuck::cast_slice::<T, u8>(values))
    }

    /// Static image filled with `data` (tightly packed texels)
    pub fn image(desc: ImageDesc, data: impl Into<Arc<[u8]>>) -> Self {
        Self {
            desc: ResourceDesc::Image(desc),
            content: UploadContent::Bytes(data.into()),
            refresh: RefreshPolicy::Static,
        }
    }

    /// Resource whose bytes come from `source` on every upload
    pub fn with_source(desc: ResourceDesc, source: impl ContentSource + 'static, refresh: RefreshPolicy) -> Self {
        Self {
            desc,
            content: UploadContent::Source(Box::new(source)),
            refresh,
        }
    }

    pub fn with_refresh(mut self, refresh: RefreshPolicy) -> Self {
        self.refresh = refresh;
        self
    }

    /// Whether `update` re-uploads this resource
    pub fn is_dynamic(&self) -> bool {
        self.refresh.is_dynamic()
    }
}

#[cfg(test)]
#[path = "render_resource_tests.rs"]
mod tests;
