/// Image trait and image descriptor

use std::any::Any;

/// Image formats uploadable through the transfer worker
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[allow(non_camel_case_types)]
pub enum ImageFormat {
    R8_UNORM,
    R8G8B8A8_UNORM,
    R8G8B8A8_SRGB,
    B8G8R8A8_UNORM,
    R16G16B16A16_SFLOAT,
    R32_SFLOAT,
    R32G32B32A32_SFLOAT,
}

impl ImageFormat {
    /// Bytes per texel
    pub fn bytes_per_pixel(&self) -> u32 {
        match self {
            ImageFormat::R8_UNORM => 1,
            ImageFormat::R8G8B8A8_UNORM
            | ImageFormat::R8G8B8A8_SRGB
            | ImageFormat::B8G8R8A8_UNORM
            | ImageFormat::R32_SFLOAT => 4,
            ImageFormat::R16G16B16A16_SFLOAT => 8,
            ImageFormat::R32G32B32A32_SFLOAT => 16,
        }
    }
}

/// Descriptor for creating a 2D image (single mip, single layer)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageDesc {
    /// Debug name, also used in fatal log lines
    pub name: String,
    pub width: u32,
    pub height: u32,
    pub format: ImageFormat,
}

impl ImageDesc {
    /// Bytes a full upload of this image must carry
    pub fn size_bytes(&self) -> u64 {
        self.width as u64 * self.height as u64 * self.format.bytes_per_pixel() as u64
    }
}

/// Sampled image resource
pub trait Image: Send + Sync {
    /// Descriptor the image was created from
    fn desc(&self) -> &ImageDesc;

    /// Backend downcast hook (transfer queues need the concrete type)
    fn as_any(&self) -> &dyn Any;
}
