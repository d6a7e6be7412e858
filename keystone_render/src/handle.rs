//! Handles and handle type tags
//!
//! A `Handle` is a copyable, non-owning reference into one registry. The
//! type tag says which registry owns the slot, the id indexes into it and
//! the generation rejects handles whose slot has since been recycled.

use rustc_hash::FxHashMap;
use std::fmt;
use crate::error::{Error, Result};

/// Registry-scoped type identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TypeTag(pub u16);

/// Opaque reference into a registry
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct Handle {
    type_tag: TypeTag,
    id: u32,
    generation: u32,
}

impl Handle {
    /// Build a handle (registries only; callers receive handles, never mint them)
    pub(crate) fn new(type_tag: TypeTag, id: u32, generation: u32) -> Self {
        Self { type_tag, id, generation }
    }

    pub fn type_tag(&self) -> TypeTag {
        self.type_tag
    }

    pub fn id(&self) -> u32 {
        self.id
    }

    pub fn generation(&self) -> u32 {
        self.generation
    }
}

impl fmt::Debug for Handle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Handle({}:{}v{})", self.type_tag.0, self.id, self.generation)
    }
}

/// Name → tag table
///
/// A name keeps the same tag for the lifetime of the registry, so tags
/// can be baked into handles handed out long before they are resolved.
#[derive(Default)]
pub struct HandleTypeRegistry {
    tags: FxHashMap<String, TypeTag>,
    names: Vec<String>,
}

impl HandleTypeRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `name`, or return its existing tag
    ///
    /// # Errors
    ///
    /// Returns `Error::CapacityExceeded` once all `u16` tags are in use.
    pub fn register_type(&mut self, name: &str) -> Result<TypeTag> {
        if let Some(&tag) = self.tags.get(name) {
            return Ok(tag);
        }
        if self.names.len() > u16::MAX as usize {
            return Err(crate::engine_fail!("keystone::HandleTypeRegistry", Error::CapacityExceeded,
                "Cannot register handle type '{}': all {} tags in use", name, self.names.len()));
        }

        let tag = TypeTag(self.names.len() as u16);
        self.tags.insert(name.to_string(), tag);
        self.names.push(name.to_string());
        crate::engine_trace!("keystone::HandleTypeRegistry", "Registered type '{}' as tag {}", name, tag.0);
        Ok(tag)
    }

    pub fn get_type(&self, name: &str) -> Option<TypeTag> {
        self.tags.get(name).copied()
    }

    pub fn type_name(&self, tag: TypeTag) -> Option<&str> {
        self.names.get(tag.0 as usize).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }
}

#[cfg(test)]
#[path = "handle_tests.rs"]
mod tests;
