use super::*;

// ============================================================================
// Handle tests
// ============================================================================

#[test]
fn test_handle_accessors() {
    let handle = Handle::new(TypeTag(3), 42, 7);
    assert_eq!(handle.type_tag(), TypeTag(3));
    assert_eq!(handle.id(), 42);
    assert_eq!(handle.generation(), 7);
}

#[test]
fn test_handle_equality_includes_generation() {
    let a = Handle::new(TypeTag(0), 4, 0);
    let b = Handle::new(TypeTag(0), 4, 1);
    assert_ne!(a, b);
    assert_eq!(a, Handle::new(TypeTag(0), 4, 0));
}

#[test]
fn test_handle_debug_format() {
    let handle = Handle::new(TypeTag(1), 9, 2);
    assert_eq!(format!("{:?}", handle), "Handle(1:9v2)");
}

// ============================================================================
// HandleTypeRegistry tests
// ============================================================================

#[test]
fn test_register_type_is_stable() {
    let mut registry = HandleTypeRegistry::new();
    let resources = registry.register_type("render_resource").unwrap();
    let buffers = registry.register_type("command_buffer").unwrap();

    assert_ne!(resources, buffers);
    assert_eq!(registry.register_type("render_resource").unwrap(), resources);
    assert_eq!(registry.len(), 2);
}

#[test]
fn test_get_type_and_name() {
    let mut registry = HandleTypeRegistry::new();
    assert!(registry.is_empty());
    assert_eq!(registry.get_type("missing"), None);

    let tag = registry.register_type("shader_compile").unwrap();
    assert_eq!(registry.get_type("shader_compile"), Some(tag));
    assert_eq!(registry.type_name(tag), Some("shader_compile"));
    assert_eq!(registry.type_name(TypeTag(99)), None);
}
