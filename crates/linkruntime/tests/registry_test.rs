mod common;

use common::{registry, Probe};
use linkcore::{NodeError, RegistryError, ValueType};
use linkruntime::{ComponentDescriptor, PortDefinition};
use std::collections::HashMap;
use std::sync::Arc;

#[test]
fn test_resolve_registered_component() {
    let registry = registry(Arc::new(Probe::default()));

    let factory = registry.resolve("test.sum").expect("test.sum is registered");
    let descriptor = factory.descriptor();

    assert_eq!(descriptor.component_type, "test.sum");
    assert_eq!(descriptor.inputs.len(), 2);
    assert_eq!(
        descriptor.output_port("sum").map(|p| p.value_type),
        Some(ValueType::Number)
    );
}

#[test]
fn test_resolve_unknown_component() {
    let registry = registry(Arc::new(Probe::default()));

    match registry.resolve("embeddings.nope") {
        Err(RegistryError::UnknownComponent(name)) => assert_eq!(name, "embeddings.nope"),
        _ => panic!("Expected UnknownComponent"),
    }
}

#[test]
fn test_duplicate_registration_rejected() {
    let mut registry = registry(Arc::new(Probe::default()));

    let result = registry.register_fn(ComponentDescriptor::new("test.sum", "test"), |_| {
        Err(NodeError::Configuration("never built".to_string()))
    });

    assert_eq!(
        result,
        Err(RegistryError::DuplicateComponent("test.sum".to_string()))
    );
}

#[test]
fn test_create_surfaces_constructor_errors() {
    let mut registry = registry(Arc::new(Probe::default()));
    registry
        .register_fn(
            ComponentDescriptor::new("test.broken", "test")
                .output(PortDefinition::required("out", ValueType::Any)),
            |_| Err(NodeError::Configuration("missing api key".to_string())),
        )
        .unwrap();

    let result = registry.create("test.broken", &HashMap::new());

    match result {
        Err(NodeError::Configuration(message)) => assert!(message.contains("missing api key")),
        _ => panic!("Expected configuration error"),
    }
}

#[test]
fn test_listing_is_sorted_and_grouped() {
    let registry = registry(Arc::new(Probe::default()));

    let types = registry.list();
    let mut sorted = types.clone();
    sorted.sort();
    assert_eq!(types, sorted);
    assert_eq!(types.len(), registry.len());

    let groups = registry.list_by_category();
    assert_eq!(groups.len(), 1);
    assert_eq!(groups["test"].len(), registry.len());
}
