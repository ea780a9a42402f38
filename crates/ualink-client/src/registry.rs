// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Per-client registry of custom structure decoders.
//!
//! Servers define their own structure types and send their values as
//! [`ExtensionObject`]s. A [`TypeRegistry`] maps the encoding id of such a
//! type to a constructor that decodes the body. Every client owns its own
//! registry, so two connections may register differently shaped types
//! under the same name without seeing each other's definitions.

use std::any::Any;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use parking_lot::RwLock;

use crate::error::UaResult;
use crate::types::{ExtensionObject, NodeId};

/// A decoded structure value.
pub type DecodedValue = Arc<dyn Any + Send + Sync>;

/// Decodes the body of an extension object.
pub type TypeConstructor = Arc<dyn Fn(&[u8]) -> UaResult<DecodedValue> + Send + Sync>;

/// A value produced by a registered constructor.
#[derive(Clone)]
pub struct DecodedObject {
    /// Registered type name.
    pub type_name: String,
    /// Decoded value; downcast to the concrete type.
    pub value: DecodedValue,
}

impl DecodedObject {
    /// Returns the value as `T`, if it has that type.
    pub fn downcast_ref<T: Any>(&self) -> Option<&T> {
        self.value.downcast_ref::<T>()
    }
}

impl fmt::Debug for DecodedObject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DecodedObject")
            .field("type_name", &self.type_name)
            .finish_non_exhaustive()
    }
}

#[derive(Clone)]
struct Registration {
    name: String,
    constructor: TypeConstructor,
}

/// Maps encoding ids to decoders.
#[derive(Default)]
pub struct TypeRegistry {
    types: RwLock<HashMap<NodeId, Registration>>,
}

impl TypeRegistry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a constructor for an encoding id, replacing any previous one.
    pub fn register<F>(&self, name: impl Into<String>, id: NodeId, constructor: F)
    where
        F: Fn(&[u8]) -> UaResult<DecodedValue> + Send + Sync + 'static,
    {
        let name = name.into();
        tracing::debug!(type_name = %name, type_id = %id, "Registered custom type");
        self.types.write().insert(
            id,
            Registration {
                name,
                constructor: Arc::new(constructor),
            },
        );
    }

    /// Returns the name and constructor registered for `id`.
    pub fn resolve(&self, id: &NodeId) -> Option<(String, TypeConstructor)> {
        self.types
            .read()
            .get(id)
            .map(|r| (r.name.clone(), Arc::clone(&r.constructor)))
    }

    /// Decodes an extension object.
    ///
    /// Returns `None` when its type is not registered.
    pub fn decode(&self, object: &ExtensionObject) -> Option<UaResult<DecodedObject>> {
        let (type_name, constructor) = self.resolve(&object.type_id)?;
        Some(constructor(&object.body).map(|value| DecodedObject { type_name, value }))
    }

    /// Returns `true` if `id` is registered.
    pub fn contains(&self, id: &NodeId) -> bool {
        self.types.read().contains_key(id)
    }

    /// Returns the number of registered types.
    pub fn len(&self) -> usize {
        self.types.read().len()
    }

    /// Returns `true` if nothing is registered.
    pub fn is_empty(&self) -> bool {
        self.types.read().is_empty()
    }
}

impl fmt::Debug for TypeRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TypeRegistry")
            .field("types", &self.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::UaError;

    #[derive(Debug, PartialEq)]
    struct Point {
        x: u8,
        y: u8,
    }

    fn point_decoder(body: &[u8]) -> UaResult<DecodedValue> {
        match body {
            [x, y] => Ok(Arc::new(Point { x: *x, y: *y })),
            _ => Err(UaError::malformed("Point needs two bytes")),
        }
    }

    #[test]
    fn test_decode_registered_type() {
        let registry = TypeRegistry::new();
        let id = NodeId::numeric(2, 5001);
        registry.register("Point", id.clone(), point_decoder);

        let object = ExtensionObject {
            type_id: id,
            body: vec![3, 4],
        };
        let decoded = registry.decode(&object).unwrap().unwrap();
        assert_eq!(decoded.type_name, "Point");
        assert_eq!(decoded.downcast_ref::<Point>(), Some(&Point { x: 3, y: 4 }));
    }

    #[test]
    fn test_unknown_type_is_none() {
        let registry = TypeRegistry::new();
        let object = ExtensionObject {
            type_id: NodeId::numeric(2, 1),
            body: vec![],
        };
        assert!(registry.decode(&object).is_none());
    }

    #[test]
    fn test_registries_are_independent() {
        let first = TypeRegistry::new();
        let second = TypeRegistry::new();
        let id = NodeId::numeric(2, 5001);

        first.register("Point", id.clone(), point_decoder);
        second.register("Point", id.clone(), |_body: &[u8]| -> UaResult<DecodedValue> {
            Ok(Arc::new(42u32))
        });

        let object = ExtensionObject {
            type_id: id,
            body: vec![1, 2],
        };
        let a = first.decode(&object).unwrap().unwrap();
        let b = second.decode(&object).unwrap().unwrap();
        assert!(a.downcast_ref::<Point>().is_some());
        assert_eq!(b.downcast_ref::<u32>(), Some(&42));
    }

    #[test]
    fn test_decode_failure_is_reported() {
        let registry = TypeRegistry::new();
        let id = NodeId::numeric(2, 5001);
        registry.register("Point", id.clone(), point_decoder);
        let object = ExtensionObject {
            type_id: id,
            body: vec![1],
        };
        assert!(registry.decode(&object).unwrap().is_err());
    }
}
