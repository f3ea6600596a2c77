//! Typed operations and their type-erased descriptors.
//!
//! Host code implements [`Operation`] for each callable. Registration wraps it
//! in an [`OperationDescriptor`], which owns the operation, its precomputed
//! [`FunctionSchema`], and the ability to validate raw JSON arguments into the
//! operation's input type before invoking it.

use std::any::Any;
use std::panic::AssertUnwindSafe;

use async_trait::async_trait;
use futures::FutureExt;
use schemars::JsonSchema;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;

use crate::error::{OperationFailure, SchemaError};
use crate::schema;
use crate::types::FunctionSchema;

/// A locally defined operation exposed to the model.
///
/// `Input` is the input contract: its `JsonSchema` drives the parameter
/// schema and its `Deserialize` impl validates model-produced arguments.
/// Use `#[serde(default)]` or `Option<T>` for optional fields.
#[async_trait]
pub trait Operation: Send + Sync + 'static {
    type Input: DeserializeOwned + Serialize + JsonSchema + Send + 'static;
    type Output: Serialize + Send + 'static;

    /// Unique name the model calls this operation by
    fn name(&self) -> &str;

    /// Description shown to the model
    fn description(&self) -> &str;

    async fn call(&self, input: Self::Input) -> anyhow::Result<Self::Output>;
}

/// Arguments that passed validation against an operation's input contract.
pub struct ValidatedArguments {
    canonical: Value,
    typed: Box<dyn Any + Send>,
}

impl ValidatedArguments {
    /// Arguments as JSON, with defaults filled in
    pub fn canonical(&self) -> &Value {
        &self.canonical
    }
}

impl std::fmt::Debug for ValidatedArguments {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ValidatedArguments")
            .field("canonical", &self.canonical)
            .finish_non_exhaustive()
    }
}

/// Object-safe view of an [`Operation`]
#[async_trait]
trait ErasedOperation: Send + Sync {
    fn validate(&self, raw: Value) -> Result<ValidatedArguments, OperationFailure>;

    async fn invoke(&self, args: ValidatedArguments) -> Result<Value, OperationFailure>;
}

struct TypedOperation<O: Operation> {
    inner: O,
}

#[async_trait]
impl<O: Operation> ErasedOperation for TypedOperation<O> {
    fn validate(&self, raw: Value) -> Result<ValidatedArguments, OperationFailure> {
        // Models sometimes send null for "no arguments"
        let raw = if raw.is_null() {
            Value::Object(Default::default())
        } else {
            raw
        };

        let typed: O::Input = serde_json::from_value(raw)
            .map_err(|e| OperationFailure::validation(e.to_string()))?;
        let canonical = serde_json::to_value(&typed)
            .map_err(|e| OperationFailure::validation(e.to_string()))?;

        Ok(ValidatedArguments {
            canonical,
            typed: Box::new(typed),
        })
    }

    async fn invoke(&self, args: ValidatedArguments) -> Result<Value, OperationFailure> {
        let input = args.typed.downcast::<O::Input>().map_err(|_| {
            OperationFailure::execution(format!(
                "Arguments were validated for a different operation than {}",
                self.inner.name()
            ))
        })?;

        let output = AssertUnwindSafe(self.inner.call(*input))
            .catch_unwind()
            .await
            .map_err(|panic| OperationFailure::execution(panic_message(panic.as_ref())))?
            .map_err(|e| OperationFailure::execution(format!("{:#}", e)))?;

        serde_json::to_value(output).map_err(|e| {
            OperationFailure::execution(format!("Failed to serialize output: {}", e))
        })
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        format!("Operation panicked: {}", s)
    } else if let Some(s) = panic.downcast_ref::<String>() {
        format!("Operation panicked: {}", s)
    } else {
        "Operation panicked".to_string()
    }
}

/// One registered operation: name, description, schema and callable.
///
/// The schema is synthesized once here and never changes afterwards. The
/// descriptor is the sole owner of its callable.
pub struct OperationDescriptor {
    name: String,
    description: String,
    schema: FunctionSchema,
    input_contract: Value,
    callable: Box<dyn ErasedOperation>,
}

impl OperationDescriptor {
    /// Wrap an operation, synthesizing its parameter schema.
    pub fn new<O: Operation>(operation: O) -> Result<Self, SchemaError> {
        let name = operation.name().to_string();
        let description = operation.description().to_string();
        let input_contract = schema::input_schema_for::<O::Input>();
        let schema = schema::synthesize_from_value(&input_contract, &name, &description)?;

        Ok(Self {
            name,
            description,
            schema,
            input_contract,
            callable: Box::new(TypedOperation { inner: operation }),
        })
    }

    /// Wrap an operation, replacing its own description.
    pub fn with_description<O: Operation>(
        operation: O,
        description: impl Into<String>,
    ) -> Result<Self, SchemaError> {
        Ok(Self::new(operation)?.described_as(description))
    }

    /// The same operation shown to the model under another description.
    pub fn described_as(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self.schema.description = self.description.clone();
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn description(&self) -> &str {
        &self.description
    }

    /// Parameter schema handed to the chat service
    pub fn schema(&self) -> &FunctionSchema {
        &self.schema
    }

    /// Full JSON Schema of the input type
    pub fn input_contract(&self) -> &Value {
        &self.input_contract
    }

    /// Construct typed arguments from a raw payload.
    pub fn validate(&self, raw: Value) -> Result<ValidatedArguments, OperationFailure> {
        self.callable.validate(raw)
    }

    /// Run the operation. Errors and panics come back as execution failures.
    pub async fn invoke(&self, args: ValidatedArguments) -> Result<Value, OperationFailure> {
        self.callable.invoke(args).await
    }
}

impl std::fmt::Debug for OperationDescriptor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OperationDescriptor")
            .field("name", &self.name)
            .field("description", &self.description)
            .finish_non_exhaustive()
    }
}
