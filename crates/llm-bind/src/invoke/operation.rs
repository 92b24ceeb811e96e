//! Typed operation declarations, call arguments and the operation table.

use crate::context::ParameterDescriptor;
use crate::error::InvocationError;
use crate::mirror::{TypeAdapterRegistry, TypeDescriptor};
use schemars::JsonSchema;
use serde::Serialize;
use serde::de::{DeserializeOwned, Error as _};
use serde_json::Value;
use std::any::{Any, TypeId, type_name};
use std::collections::HashMap;
use std::marker::PhantomData;

/// A declared parameter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParameterSpec {
    pub name: String,
    pub description: String,
}

type DecodeFn<R> = fn(&TypeAdapterRegistry, Value) -> serde_json::Result<R>;

fn decode_plain<R: DeserializeOwned + 'static>(
    registry: &TypeAdapterRegistry,
    raw: Value,
) -> serde_json::Result<R> {
    registry.from_mirror(raw)
}

fn decode_mirrored<R: 'static>(
    registry: &TypeAdapterRegistry,
    raw: Value,
) -> serde_json::Result<R> {
    registry.try_from_mirror(raw).unwrap_or_else(|| {
        Err(serde_json::Error::custom(format!(
            "{} has no registered mirror type",
            type_name::<R>()
        )))
    })
}

/// An operation returning `R`, served by a bound instance.
///
/// ```ignore
/// let classify = Operation::<Sentiment>::new("classify")
///     .describe("Classify the sentiment of a review")
///     .param("review", "The review text");
/// ```
pub struct Operation<R> {
    name: String,
    description: String,
    params: Vec<ParameterSpec>,
    memorize: Option<String>,
    own_schema: Option<fn() -> TypeDescriptor>,
    pub(crate) decode: DecodeFn<R>,
    _result: PhantomData<fn() -> R>,
}

impl<R> Clone for Operation<R> {
    fn clone(&self) -> Self {
        Self {
            name: self.name.clone(),
            description: self.description.clone(),
            params: self.params.clone(),
            memorize: self.memorize.clone(),
            own_schema: self.own_schema,
            decode: self.decode,
            _result: PhantomData,
        }
    }
}

impl<R> std::fmt::Debug for Operation<R> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Operation")
            .field("name", &self.name)
            .field("result", &type_name::<R>())
            .field("params", &self.params)
            .field("memorize", &self.memorize)
            .finish()
    }
}

impl<R: DeserializeOwned + JsonSchema + 'static> Operation<R> {
    /// An operation whose result type describes itself.
    ///
    /// If `R` also has a registered mirror, the mirror wins.
    pub fn new(name: impl Into<String>) -> Self {
        let own_schema: fn() -> TypeDescriptor = TypeDescriptor::of::<R>;
        Self::with_binding(name.into(), Some(own_schema), decode_plain::<R>)
    }
}

impl<R: 'static> Operation<R> {
    /// An operation whose result type has no schema of its own and must be
    /// registered with a mirror type on the instance builder.
    pub fn mirrored(name: impl Into<String>) -> Self {
        Self::with_binding(name.into(), None, decode_mirrored::<R>)
    }

    fn with_binding(
        name: String,
        own_schema: Option<fn() -> TypeDescriptor>,
        decode: DecodeFn<R>,
    ) -> Self {
        Self {
            name,
            description: String::new(),
            params: Vec::new(),
            memorize: None,
            own_schema,
            decode,
            _result: PhantomData,
        }
    }

    pub fn describe(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    /// Declare the next parameter. Arguments are matched by name.
    pub fn param(mut self, name: impl Into<String>, description: impl Into<String>) -> Self {
        self.params.push(ParameterSpec {
            name: name.into(),
            description: description.into(),
        });
        self
    }

    /// Store each successful result in instance memory under `label`.
    pub fn memorize(mut self, label: impl Into<String>) -> Self {
        self.memorize = Some(label.into());
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn params(&self) -> &[ParameterSpec] {
        &self.params
    }

    pub fn memorize_label(&self) -> Option<&str> {
        self.memorize.as_deref()
    }

    /// Type-erased declaration for the operation table.
    pub(crate) fn declaration(&self) -> Declaration {
        Declaration {
            name: self.name.clone(),
            description: self.description.clone(),
            params: self.params.clone(),
            memorize: self.memorize.clone(),
            result_id: TypeId::of::<R>(),
            result_name: type_name::<R>(),
            own_schema: self.own_schema,
        }
    }
}

/// An operation as the builder sees it, before result-type resolution.
#[derive(Debug, Clone)]
pub(crate) struct Declaration {
    name: String,
    description: String,
    params: Vec<ParameterSpec>,
    memorize: Option<String>,
    result_id: TypeId,
    result_name: &'static str,
    own_schema: Option<fn() -> TypeDescriptor>,
}

impl Declaration {
    pub(crate) fn name(&self) -> &str {
        &self.name
    }
}

/// An operation with its result type resolved against the registry.
#[derive(Debug, Clone)]
pub struct ResolvedOperation {
    pub name: String,
    pub description: String,
    pub params: Vec<ParameterSpec>,
    pub memorize: Option<String>,
    pub result_type: TypeDescriptor,
    result_id: TypeId,
}

/// Every operation a bound instance serves, keyed by name.
#[derive(Debug, Default)]
pub struct OperationTable {
    operations: HashMap<String, ResolvedOperation>,
}

impl OperationTable {
    /// Resolve declarations once. Fails on duplicate names and on result
    /// types with neither a mirror nor a schema of their own.
    pub(crate) fn resolve(
        declarations: Vec<Declaration>,
        registry: &TypeAdapterRegistry,
    ) -> Result<Self, InvocationError> {
        let mut operations = HashMap::with_capacity(declarations.len());
        for decl in declarations {
            if operations.contains_key(&decl.name) {
                return Err(InvocationError::Configuration(format!(
                    "operation `{}` declared twice",
                    decl.name
                )));
            }
            let result_type = match registry.mirror_type_for_id(decl.result_id) {
                Some(mirror) => mirror.clone(),
                None => match decl.own_schema {
                    Some(schema) => schema(),
                    None => {
                        return Err(InvocationError::Configuration(format!(
                            "operation `{}` returns {}, which has no registered mirror type",
                            decl.name, decl.result_name
                        )));
                    }
                },
            };
            operations.insert(
                decl.name.clone(),
                ResolvedOperation {
                    name: decl.name,
                    description: decl.description,
                    params: decl.params,
                    memorize: decl.memorize,
                    result_type,
                    result_id: decl.result_id,
                },
            );
        }
        Ok(Self { operations })
    }

    /// Look up `name`, checking it was declared with result type `R`.
    pub fn get<R: 'static>(&self, name: &str) -> Result<&ResolvedOperation, InvocationError> {
        match self.operations.get(name) {
            Some(op) if op.result_id == TypeId::of::<R>() => Ok(op),
            Some(_) => Err(InvocationError::UnknownOperation(format!(
                "{name} (declared with a result type other than {})",
                type_name::<R>()
            ))),
            None => Err(InvocationError::UnknownOperation(name.to_string())),
        }
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.operations.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.operations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.operations.is_empty()
    }
}

// ── Arguments ──────────────────────────────────────────────────────

trait ErasedArg: Send + Sync {
    fn to_mirror(&self, registry: &TypeAdapterRegistry) -> serde_json::Result<Value>;
}

struct PlainArg<T>(T);

impl<T: Serialize + Send + Sync + 'static> ErasedArg for PlainArg<T> {
    fn to_mirror(&self, registry: &TypeAdapterRegistry) -> serde_json::Result<Value> {
        registry.to_mirror(&self.0)
    }
}

struct MirroredArg<T>(T);

impl<T: Any + Send + Sync> ErasedArg for MirroredArg<T> {
    fn to_mirror(&self, registry: &TypeAdapterRegistry) -> serde_json::Result<Value> {
        registry.try_to_mirror(&self.0).unwrap_or_else(|| {
            Err(serde_json::Error::custom(format!(
                "{} has no registered mirror type",
                type_name::<T>()
            )))
        })
    }
}

/// Named arguments for one call.
///
/// ```ignore
/// let args = Arguments::new()
///     .arg("text", "Bonjour")
///     .mirrored("budget", Money::from_cents(500));
/// ```
#[derive(Default)]
pub struct Arguments {
    values: Vec<(String, Box<dyn ErasedArg>)>,
}

impl std::fmt::Debug for Arguments {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list()
            .entries(self.values.iter().map(|(name, _)| name))
            .finish()
    }
}

impl Arguments {
    pub fn new() -> Self {
        Self::default()
    }

    /// A serializable argument. Goes through its mirror if one is registered.
    pub fn arg<T: Serialize + Send + Sync + 'static>(
        mut self,
        name: impl Into<String>,
        value: T,
    ) -> Self {
        self.values.push((name.into(), Box::new(PlainArg(value))));
        self
    }

    /// An argument of a registered external type without serde support.
    pub fn mirrored<T: Any + Send + Sync>(mut self, name: impl Into<String>, value: T) -> Self {
        self.values.push((name.into(), Box::new(MirroredArg(value))));
        self
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Match arguments to declared parameters and convert them to mirror form.
    pub(crate) fn bind(
        self,
        operation: &ResolvedOperation,
        registry: &TypeAdapterRegistry,
    ) -> Result<Vec<ParameterDescriptor>, InvocationError> {
        let invalid = |message: String| InvocationError::InvalidArguments {
            operation: operation.name.clone(),
            message,
        };

        let mut supplied: HashMap<String, Box<dyn ErasedArg>> = HashMap::new();
        for (name, value) in self.values {
            if !operation.params.iter().any(|p| p.name == name) {
                return Err(invalid(format!("undeclared parameter `{name}`")));
            }
            if supplied.insert(name.clone(), value).is_some() {
                return Err(invalid(format!("parameter `{name}` supplied twice")));
            }
        }

        operation
            .params
            .iter()
            .map(|param| {
                let value = supplied
                    .get(&param.name)
                    .ok_or_else(|| invalid(format!("missing parameter `{}`", param.name)))?;
                let value = value
                    .to_mirror(registry)
                    .map_err(|e| invalid(format!("parameter `{}`: {e}", param.name)))?;
                Ok(ParameterDescriptor {
                    name: param.name.clone(),
                    description: param.description.clone(),
                    value,
                })
            })
            .collect()
    }
}
