use std::rc::Rc;

use crate::error::RenderError;
use crate::scene::NodeId;

use super::class::EffectClass;
use super::property::PropertyValue;

/// A placed effect or custom material: its class plus the packed values
/// of every declared property.
#[derive(Debug, Clone)]
pub struct EffectInstance {
    pub id: NodeId,
    class: Rc<EffectClass>,
    pub active: bool,
    data: Vec<u8>,
}

impl EffectInstance {
    pub fn new(id: NodeId, class: Rc<EffectClass>) -> Self {
        let data = class.default_data();
        Self {
            id,
            class,
            active: true,
            data,
        }
    }

    pub fn class(&self) -> &Rc<EffectClass> {
        &self.class
    }

    pub fn class_name(&self) -> &str {
        self.class.name()
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    /// Stores `value` if the property exists and has the same type.
    pub fn set_property(&mut self, name: &str, value: PropertyValue) -> Result<(), RenderError> {
        let index = self
            .class
            .property_index(name)
            .ok_or_else(|| RenderError::UnknownProperty {
                class: self.class.name().to_string(),
                property: name.to_string(),
            })?;
        let declared = self.class.properties()[index].ty;
        if declared != value.property_type() {
            return Err(RenderError::PropertyTypeMismatch {
                name: name.to_string(),
                expected: declared.name(),
                actual: value.property_type().name(),
            });
        }
        let offset = self.class.offset(index);
        value.write(&mut self.data[offset..offset + declared.size()]);
        Ok(())
    }

    pub fn property(&self, name: &str) -> Option<PropertyValue> {
        self.class.property_index(name).map(|index| self.property_at(index))
    }

    pub fn property_at(&self, index: usize) -> PropertyValue {
        let ty = self.class.properties()[index].ty;
        let offset = self.class.offset(index);
        PropertyValue::read(ty, &self.data[offset..offset + ty.size()])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::effects::{ClassKind, PropertyDeclaration};

    fn vignette() -> Rc<EffectClass> {
        Rc::new(EffectClass::new(
            "vignette",
            ClassKind::Effect,
            vec![
                PropertyDeclaration::new("strength", PropertyValue::Float(0.3)),
                PropertyDeclaration::new("mode", PropertyValue::Int(0))
                    .with_enum_names(["soft", "hard"]),
            ],
            Vec::new(),
            Vec::new(),
        ))
    }

    #[test]
    fn new_instances_start_from_declared_defaults() {
        let instance = EffectInstance::new(NodeId(4), vignette());
        assert_eq!(instance.property("strength"), Some(PropertyValue::Float(0.3)));
        assert_eq!(instance.property("mode"), Some(PropertyValue::Int(0)));
    }

    #[test]
    fn setter_checks_the_declared_type() {
        let mut instance = EffectInstance::new(NodeId(4), vignette());
        instance.set_property("mode", PropertyValue::Int(1)).unwrap();
        assert_eq!(instance.property("mode"), Some(PropertyValue::Int(1)));

        let err = instance
            .set_property("strength", PropertyValue::Int(2))
            .unwrap_err();
        assert!(matches!(err, RenderError::PropertyTypeMismatch { .. }));
        assert_eq!(instance.property("strength"), Some(PropertyValue::Float(0.3)));

        assert!(matches!(
            instance.set_property("radius", PropertyValue::Float(1.0)),
            Err(RenderError::UnknownProperty { .. })
        ));
    }
}
