//! Render resource module
//!
//! Upload requests and the registry mapping handles to uploaded GPU resources.

pub mod render_resource;
mod render_resource_registry;

pub use render_resource::{
    ResourceDesc, RefreshPolicy, ContentSource, UploadContent, UploadRequest,
};
pub use render_resource_registry::RenderResourceRegistry;
