//! Bridging caller-facing types to schema-capable mirror types.
//!
//! Some result and argument types cannot describe themselves to a backend
//! (no `JsonSchema`, no serde impls, foreign crates). A [`TypeAdapterRegistry`]
//! maps each such external type to a mirror type that can, through a pair of
//! pure conversions. Lookups are by external-type identity; unregistered
//! types pass through with their own serde/schemars impls.
//!
//! ```
//! use llm_bind::mirror::TypeAdapterRegistry;
//! use schemars::JsonSchema;
//! use serde::{Deserialize, Serialize};
//!
//! #[derive(Debug, PartialEq)]
//! struct Celsius(f64);
//!
//! #[derive(Serialize, Deserialize, JsonSchema)]
//! struct CelsiusMirror { degrees: f64 }
//!
//! let mut registry = TypeAdapterRegistry::new();
//! registry.register(
//!     |c: &Celsius| CelsiusMirror { degrees: c.0 },
//!     |m: CelsiusMirror| Celsius(m.degrees),
//! );
//!
//! let mirror = registry.try_to_mirror(&Celsius(21.5)).unwrap().unwrap();
//! assert_eq!(mirror["degrees"], 21.5);
//! let back: Celsius = registry.try_from_mirror(mirror).unwrap().unwrap();
//! assert_eq!(back, Celsius(21.5));
//! ```

use crate::json_schema_for;
use schemars::JsonSchema;
use serde::de::{DeserializeOwned, Error as _};
use serde::Serialize;
use serde_json::Value;
use std::any::{Any, TypeId, type_name};
use std::collections::HashMap;
use tracing::debug;

/// Name and JSON Schema of a result type as advertised to a backend.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TypeDescriptor {
    pub name: String,
    pub schema: Value,
    /// Non-object results travel wrapped as `{"value": ...}`.
    pub wrapped: bool,
}

impl TypeDescriptor {
    pub fn of<T: JsonSchema>() -> Self {
        let schema = json_schema_for::<T>();
        let wrapped = schema.get("type").and_then(Value::as_str) != Some("object");
        Self {
            name: T::schema_name(),
            schema,
            wrapped,
        }
    }

    /// Strip the `{"value": ...}` envelope from a wrapped result.
    ///
    /// Backends that answer an object-typed result with a JSON string get
    /// that string parsed.
    pub fn normalize(&self, raw: Value) -> Value {
        if self.wrapped {
            return match raw {
                Value::Object(mut map) if map.len() == 1 && map.contains_key("value") => {
                    map.remove("value").unwrap_or(Value::Null)
                }
                other => other,
            };
        }
        match raw {
            Value::String(text) if text.trim_start().starts_with('{') => {
                serde_json::from_str(&text).unwrap_or(Value::String(text))
            }
            other => other,
        }
    }
}

type Forward = Box<dyn Fn(&dyn Any) -> Option<serde_json::Result<Value>> + Send + Sync>;
type Backward = Box<dyn Fn(Value) -> serde_json::Result<Box<dyn Any + Send>> + Send + Sync>;

/// A registered external ↔ mirror pair.
struct MirrorMapping {
    external: &'static str,
    mirror: TypeDescriptor,
    forward: Forward,
    backward: Backward,
}

/// Registry of external ↔ mirror type mappings.
///
/// Append-only while an instance is being built, read-only afterwards.
#[derive(Default)]
pub struct TypeAdapterRegistry {
    mappings: HashMap<TypeId, MirrorMapping>,
}

impl std::fmt::Debug for TypeAdapterRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut names: Vec<_> = self
            .mappings
            .values()
            .map(|m| (m.external, m.mirror.name.as_str()))
            .collect();
        names.sort_unstable();
        f.debug_struct("TypeAdapterRegistry")
            .field("mappings", &names)
            .finish()
    }
}

impl TypeAdapterRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register conversions between external type `E` and mirror type `M`.
    ///
    /// Returns `false` and leaves the existing mapping in place if `E` was
    /// already registered.
    pub fn register<E, M>(
        &mut self,
        forward: impl Fn(&E) -> M + Send + Sync + 'static,
        backward: impl Fn(M) -> E + Send + Sync + 'static,
    ) -> bool
    where
        E: Send + 'static,
        M: Serialize + DeserializeOwned + JsonSchema + 'static,
    {
        let key = TypeId::of::<E>();
        if self.mappings.contains_key(&key) {
            return false;
        }
        let mirror = TypeDescriptor::of::<M>();
        debug!(
            "Registered mirror type: {} -> {}",
            type_name::<E>(),
            mirror.name
        );
        self.mappings.insert(
            key,
            MirrorMapping {
                external: type_name::<E>(),
                mirror,
                forward: Box::new(move |value: &dyn Any| {
                    value
                        .downcast_ref::<E>()
                        .map(|external| serde_json::to_value(forward(external)))
                }),
                backward: Box::new(move |value: Value| {
                    let mirror: M = serde_json::from_value(value)?;
                    Ok(Box::new(backward(mirror)) as Box<dyn Any + Send>)
                }),
            },
        );
        true
    }

    pub fn is_registered<E: 'static>(&self) -> bool {
        self.mappings.contains_key(&TypeId::of::<E>())
    }

    pub fn len(&self) -> usize {
        self.mappings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.mappings.is_empty()
    }

    /// Serialize `value`, through its mirror when `T` is registered.
    pub fn to_mirror<T: Serialize + 'static>(&self, value: &T) -> serde_json::Result<Value> {
        match self.try_to_mirror(value) {
            Some(result) => result,
            None => serde_json::to_value(value),
        }
    }

    /// Serialize a registered external value through its mirror. `None` if
    /// the value's type is not registered.
    pub fn try_to_mirror(&self, value: &dyn Any) -> Option<serde_json::Result<Value>> {
        let mapping = self.mappings.get(&value.type_id())?;
        (mapping.forward)(value)
    }

    /// Deserialize `value` as `T`, through its mirror when `T` is registered.
    pub fn from_mirror<T: DeserializeOwned + 'static>(&self, value: Value) -> serde_json::Result<T> {
        match self.mappings.get(&TypeId::of::<T>()) {
            Some(mapping) => Self::convert_back(mapping, value),
            None => serde_json::from_value(value),
        }
    }

    /// Deserialize a mirror value into registered external type `T`. `None`
    /// if `T` is not registered.
    pub fn try_from_mirror<T: 'static>(&self, value: Value) -> Option<serde_json::Result<T>> {
        let mapping = self.mappings.get(&TypeId::of::<T>())?;
        Some(Self::convert_back(mapping, value))
    }

    fn convert_back<T: 'static>(mapping: &MirrorMapping, value: Value) -> serde_json::Result<T> {
        let boxed = (mapping.backward)(value)?;
        boxed.downcast::<T>().map(|b| *b).map_err(|_| {
            serde_json::Error::custom(format!(
                "mirror conversion for {} produced a different type",
                mapping.external
            ))
        })
    }

    /// The mirror descriptor registered for `T`.
    pub fn mirror_type_for<T: 'static>(&self) -> Option<&TypeDescriptor> {
        self.mirror_type_for_id(TypeId::of::<T>())
    }

    pub(crate) fn mirror_type_for_id(&self, id: TypeId) -> Option<&TypeDescriptor> {
        self.mappings.get(&id).map(|m| &m.mirror)
    }
}
