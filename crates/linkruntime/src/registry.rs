use linkcore::{Component, NodeError, RegistryError, Value, ValueType};
use serde::Serialize;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

/// Factory trait for creating component instances
pub trait ComponentFactory: Send + Sync {
    /// Create a new instance of the component with given configuration
    fn create(&self, config: &HashMap<String, Value>) -> Result<Box<dyn Component>, NodeError>;

    /// Static description: type name, ports, category
    fn descriptor(&self) -> &ComponentDescriptor;
}

/// Declared shape of a component type
#[derive(Debug, Clone, Serialize)]
pub struct ComponentDescriptor {
    pub component_type: String,
    pub display_name: String,
    pub description: String,
    pub category: String,
    pub inputs: Vec<PortDefinition>,
    pub outputs: Vec<PortDefinition>,
    /// Outputs depend only on config and inputs, so they may be memoized
    pub cacheable: bool,
}

impl ComponentDescriptor {
    pub fn new(component_type: impl Into<String>, category: impl Into<String>) -> Self {
        let component_type = component_type.into();
        Self {
            display_name: component_type.clone(),
            component_type,
            description: String::new(),
            category: category.into(),
            inputs: Vec::new(),
            outputs: Vec::new(),
            cacheable: false,
        }
    }

    pub fn display_name(mut self, name: impl Into<String>) -> Self {
        self.display_name = name.into();
        self
    }

    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn input(mut self, port: PortDefinition) -> Self {
        self.inputs.push(port);
        self
    }

    pub fn output(mut self, port: PortDefinition) -> Self {
        self.outputs.push(port);
        self
    }

    pub fn cacheable(mut self) -> Self {
        self.cacheable = true;
        self
    }

    pub fn input_port(&self, name: &str) -> Option<&PortDefinition> {
        self.inputs.iter().find(|p| p.name == name)
    }

    pub fn output_port(&self, name: &str) -> Option<&PortDefinition> {
        self.outputs.iter().find(|p| p.name == name)
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct PortDefinition {
    pub name: String,
    pub value_type: ValueType,
    pub description: String,
    pub required: bool,
    pub default: Option<Value>,
}

impl PortDefinition {
    /// A required port
    pub fn required(name: impl Into<String>, value_type: ValueType) -> Self {
        Self {
            name: name.into(),
            value_type,
            description: String::new(),
            required: true,
            default: None,
        }
    }

    /// An optional port
    pub fn optional(name: impl Into<String>, value_type: ValueType) -> Self {
        Self {
            required: false,
            ..Self::required(name, value_type)
        }
    }

    pub fn with_default(mut self, value: impl Into<Value>) -> Self {
        self.default = Some(value.into());
        self
    }

    pub fn describe(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }
}

type Constructor =
    dyn Fn(&HashMap<String, Value>) -> Result<Box<dyn Component>, NodeError> + Send + Sync;

/// Factory built from a descriptor and a constructor closure
pub struct FnFactory {
    descriptor: ComponentDescriptor,
    constructor: Box<Constructor>,
}

impl FnFactory {
    pub fn new<F>(descriptor: ComponentDescriptor, constructor: F) -> Self
    where
        F: Fn(&HashMap<String, Value>) -> Result<Box<dyn Component>, NodeError>
            + Send
            + Sync
            + 'static,
    {
        Self {
            descriptor,
            constructor: Box::new(constructor),
        }
    }
}

impl ComponentFactory for FnFactory {
    fn create(&self, config: &HashMap<String, Value>) -> Result<Box<dyn Component>, NodeError> {
        (self.constructor)(config)
    }

    fn descriptor(&self) -> &ComponentDescriptor {
        &self.descriptor
    }
}

/// Registry of available component types.
///
/// Filled once at startup, then shared read-only behind an `Arc`.
pub struct ComponentRegistry {
    factories: HashMap<String, Arc<dyn ComponentFactory>>,
}

impl ComponentRegistry {
    pub fn new() -> Self {
        Self {
            factories: HashMap::new(),
        }
    }

    /// Register a component factory
    pub fn register(&mut self, factory: Arc<dyn ComponentFactory>) -> Result<(), RegistryError> {
        let component_type = factory.descriptor().component_type.clone();
        if self.factories.contains_key(&component_type) {
            return Err(RegistryError::DuplicateComponent(component_type));
        }
        tracing::debug!("Registering component type: {}", component_type);
        self.factories.insert(component_type, factory);
        Ok(())
    }

    /// Register a descriptor together with a constructor closure
    pub fn register_fn<F>(
        &mut self,
        descriptor: ComponentDescriptor,
        constructor: F,
    ) -> Result<(), RegistryError>
    where
        F: Fn(&HashMap<String, Value>) -> Result<Box<dyn Component>, NodeError>
            + Send
            + Sync
            + 'static,
    {
        self.register(Arc::new(FnFactory::new(descriptor, constructor)))
    }

    /// Look up the factory for a component type
    pub fn resolve(&self, component_type: &str) -> Result<Arc<dyn ComponentFactory>, RegistryError> {
        self.factories
            .get(component_type)
            .cloned()
            .ok_or_else(|| RegistryError::UnknownComponent(component_type.to_string()))
    }

    /// Create a component instance from a component type and config
    pub fn create(
        &self,
        component_type: &str,
        config: &HashMap<String, Value>,
    ) -> Result<Box<dyn Component>, NodeError> {
        let factory = self
            .resolve(component_type)
            .map_err(|e| NodeError::Configuration(e.to_string()))?;

        let component = factory.create(config).map_err(|e| match e {
            NodeError::Configuration(_) => e,
            other => NodeError::Configuration(format!(
                "Failed to create {}: {}",
                component_type, other
            )),
        })?;
        component.validate_config(config)?;
        Ok(component)
    }

    pub fn contains(&self, component_type: &str) -> bool {
        self.factories.contains_key(component_type)
    }

    /// Get the descriptor for a component type
    pub fn descriptor(&self, component_type: &str) -> Option<&ComponentDescriptor> {
        self.factories.get(component_type).map(|f| f.descriptor())
    }

    /// All registered component types, sorted
    pub fn list(&self) -> Vec<String> {
        let mut types: Vec<String> = self.factories.keys().cloned().collect();
        types.sort();
        types
    }

    /// Descriptors grouped by category, each group sorted by type name
    pub fn list_by_category(&self) -> BTreeMap<String, Vec<&ComponentDescriptor>> {
        let mut groups: BTreeMap<String, Vec<&ComponentDescriptor>> = BTreeMap::new();
        for factory in self.factories.values() {
            let descriptor = factory.descriptor();
            groups
                .entry(descriptor.category.clone())
                .or_default()
                .push(descriptor);
        }
        for group in groups.values_mut() {
            group.sort_by(|a, b| a.component_type.cmp(&b.component_type));
        }
        groups
    }

    pub fn len(&self) -> usize {
        self.factories.len()
    }

    pub fn is_empty(&self) -> bool {
        self.factories.is_empty()
    }
}

impl Default for ComponentRegistry {
    fn default() -> Self {
        Self::new()
    }
}
