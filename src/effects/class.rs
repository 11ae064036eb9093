use std::cell::Cell;
use std::collections::HashMap;
use std::rc::Rc;

use crate::device::ProgramSource;
use crate::error::RenderError;
use crate::scene::NodeId;

use super::command::EffectCommand;
use super::instance::EffectInstance;
use super::property::PropertyDeclaration;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClassKind {
    /// Post-processing pass over a layer's rendered texture.
    Effect,
    /// Material whose shaders come with the class instead of the generator.
    CustomMaterial { has_transparency: bool },
}

/// A registered effect or custom material: property layout, shader table
/// and the command list run for each instance.
#[derive(Debug)]
pub struct EffectClass {
    name: String,
    kind: ClassKind,
    properties: Vec<PropertyDeclaration>,
    offsets: Vec<usize>,
    data_size: usize,
    shaders: Vec<ProgramSource>,
    commands: Vec<EffectCommand>,
    requires_compilation: Cell<bool>,
}

impl EffectClass {
    pub fn new(
        name: impl Into<String>,
        kind: ClassKind,
        properties: Vec<PropertyDeclaration>,
        shaders: Vec<ProgramSource>,
        commands: Vec<EffectCommand>,
    ) -> Self {
        let mut offsets = Vec::with_capacity(properties.len());
        let mut data_size = 0;
        for property in &properties {
            offsets.push(data_size);
            data_size += property.ty.size();
        }
        Self {
            name: name.into(),
            kind,
            properties,
            offsets,
            data_size,
            shaders,
            commands,
            requires_compilation: Cell::new(false),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn kind(&self) -> ClassKind {
        self.kind
    }

    pub fn properties(&self) -> &[PropertyDeclaration] {
        &self.properties
    }

    pub fn property_index(&self, name: &str) -> Option<usize> {
        self.properties.iter().position(|property| property.name == name)
    }

    /// Byte offset of property `index` inside the instance data section.
    pub fn offset(&self, index: usize) -> usize {
        self.offsets[index]
    }

    pub fn data_size(&self) -> usize {
        self.data_size
    }

    pub fn shaders(&self) -> &[ProgramSource] {
        &self.shaders
    }

    pub fn shader(&self, name: &str) -> Option<&ProgramSource> {
        self.shaders.iter().find(|shader| shader.name == name)
    }

    pub fn commands(&self) -> &[EffectCommand] {
        &self.commands
    }

    pub fn requires_compilation(&self) -> bool {
        self.requires_compilation.get()
    }

    pub fn set_requires_compilation(&self, value: bool) {
        self.requires_compilation.set(value);
    }

    pub fn has_transparency(&self) -> bool {
        matches!(self.kind, ClassKind::CustomMaterial { has_transparency: true })
    }

    /// Instance data with every property at its default.
    pub fn default_data(&self) -> Vec<u8> {
        let mut data = vec![0u8; self.data_size];
        for (property, offset) in self.properties.iter().zip(&self.offsets) {
            let end = offset + property.ty.size();
            property.default.write(&mut data[*offset..end]);
        }
        data
    }
}

#[derive(Debug, Default)]
pub struct EffectRegistry {
    classes: HashMap<String, Rc<EffectClass>>,
}

impl EffectRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, class: EffectClass) -> Result<Rc<EffectClass>, RenderError> {
        if self.classes.contains_key(class.name()) {
            return Err(RenderError::DuplicateClass(class.name().to_string()));
        }
        let class = Rc::new(class);
        self.classes
            .insert(class.name().to_string(), Rc::clone(&class));
        log::debug!("Registered class {}", class.name());
        Ok(class)
    }

    pub fn class(&self, name: &str) -> Option<Rc<EffectClass>> {
        self.classes.get(name).cloned()
    }

    pub fn is_registered(&self, name: &str) -> bool {
        self.classes.contains_key(name)
    }

    pub fn create_instance(&self, class: &str, id: NodeId) -> Result<EffectInstance, RenderError> {
        let class = self
            .class(class)
            .ok_or_else(|| RenderError::UnknownClass(class.to_string()))?;
        Ok(EffectInstance::new(id, class))
    }

    pub fn set_requires_compilation(&self, class: &str, value: bool) -> Result<(), RenderError> {
        let class = self
            .classes
            .get(class)
            .ok_or_else(|| RenderError::UnknownClass(class.to_string()))?;
        class.set_requires_compilation(value);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::effects::PropertyValue;
    use glam::Vec2;

    fn class(name: &str) -> EffectClass {
        EffectClass::new(
            name,
            ClassKind::Effect,
            vec![
                PropertyDeclaration::new("amount", PropertyValue::Float(0.5)),
                PropertyDeclaration::new("enabled", PropertyValue::Bool(true)),
                PropertyDeclaration::new("center", PropertyValue::Vec2(Vec2::new(0.5, 0.5))),
            ],
            Vec::new(),
            Vec::new(),
        )
    }

    #[test]
    fn offsets_follow_declaration_order() {
        let class = class("blur");
        assert_eq!(class.offset(0), 0);
        assert_eq!(class.offset(1), 4);
        assert_eq!(class.offset(2), 5);
        assert_eq!(class.data_size(), 13);
    }

    #[test]
    fn duplicate_registration_is_rejected() {
        let mut registry = EffectRegistry::new();
        registry.register(class("blur")).unwrap();

        let err = registry.register(class("blur")).unwrap_err();
        assert!(matches!(err, RenderError::DuplicateClass(name) if name == "blur"));
    }

    #[test]
    fn unknown_class_cannot_be_instantiated() {
        let registry = EffectRegistry::new();
        assert!(matches!(
            registry.create_instance("missing", NodeId(1)),
            Err(RenderError::UnknownClass(_))
        ));
    }
}
