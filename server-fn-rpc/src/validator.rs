//! Input validators
//!
//! Three calling conventions are supported, chosen when the validator is
//! built rather than detected at call time:
//!
//! - [`Validator::Standard`]: a [`StandardSchema`] returning a value or a
//!   list of issues.
//! - [`Validator::Parser`]: a [`Parse`] implementation that returns the
//!   parsed value or fails.
//! - [`Validator::Function`]: a plain closure.
//!
//! All of them are synchronous. A standard schema that can only answer
//! asynchronously reports [`StandardResult::Pending`], which fails the call.
//!
//! # Example
//! ```rust,ignore
//! #[derive(Deserialize, Serialize)]
//! struct CreateUser { name: String }
//!
//! impl Validate for CreateUser {
//!     fn validate(&self) -> ValidationResult {
//!         if self.name.is_empty() {
//!             ValidationResult::from_issues(vec![ValidationIssue::required("name")])
//!         } else {
//!             ValidationResult::ok()
//!         }
//!     }
//! }
//!
//! let validator = Validator::schema::<CreateUser>();
//! ```

use crate::context::Payload;
use crate::error::{RpcError, ServerFnResult};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::marker::PhantomData;
use std::sync::Arc;

/// One problem reported by a validator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationIssue {
    pub message: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub path: Vec<String>,
}

impl ValidationIssue {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            path: Vec::new(),
        }
    }

    /// Attach the field path the issue refers to.
    pub fn at(mut self, path: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.path = path.into_iter().map(Into::into).collect();
        self
    }

    pub fn required(field: &str) -> Self {
        Self::new(format!("{} is required", field)).at([field])
    }

    pub fn range(field: &str, min: i64, max: i64) -> Self {
        Self::new(format!("{} must be between {} and {}", field, min, max)).at([field])
    }

    pub fn invalid(field: &str, message: impl Into<String>) -> Self {
        Self::new(message).at([field])
    }
}

/// Outcome of [`Validate::validate`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ValidationResult {
    pub issues: Vec<ValidationIssue>,
}

impl ValidationResult {
    pub fn ok() -> Self {
        Self::default()
    }

    pub fn from_issues(issues: Vec<ValidationIssue>) -> Self {
        Self { issues }
    }

    pub fn is_valid(&self) -> bool {
        self.issues.is_empty()
    }
}

/// Field-level validation for a typed input.
pub trait Validate {
    fn validate(&self) -> ValidationResult;
}

/// Result of a standard-schema validation.
#[derive(Debug, Clone, PartialEq)]
pub enum StandardResult {
    Success(Payload),
    Failure(Vec<ValidationIssue>),
    /// The schema can only answer asynchronously.
    Pending,
}

/// Standard-schema (v1) validator contract.
pub trait StandardSchema: Send + Sync {
    /// Standard-schema version; only version 1 is understood.
    fn version(&self) -> u32 {
        1
    }

    /// Library that produced the schema.
    fn vendor(&self) -> &str;

    fn validate(&self, input: Payload) -> StandardResult;
}

/// Validator exposing a fallible `parse`.
pub trait Parse: Send + Sync {
    fn parse(&self, input: Payload) -> ServerFnResult<Payload>;
}

type ValidatorFn = Arc<dyn Fn(Payload) -> ServerFnResult<Payload> + Send + Sync>;

/// A validator in one of the three supported conventions.
#[derive(Clone)]
pub enum Validator {
    Standard(Arc<dyn StandardSchema>),
    Parser(Arc<dyn Parse>),
    Function(ValidatorFn),
}

impl Validator {
    pub fn standard(schema: impl StandardSchema + 'static) -> Self {
        Self::Standard(Arc::new(schema))
    }

    pub fn parser(parser: impl Parse + 'static) -> Self {
        Self::Parser(Arc::new(parser))
    }

    pub fn function<F>(f: F) -> Self
    where
        F: Fn(Payload) -> ServerFnResult<Payload> + Send + Sync + 'static,
    {
        Self::Function(Arc::new(f))
    }

    /// Parse the payload into `T` and forward its serialized form.
    pub fn typed<T>() -> Self
    where
        T: DeserializeOwned + Serialize + Send + Sync + 'static,
    {
        Self::parser(TypedParser::<T>(PhantomData))
    }

    /// Parse the payload into `T`, then run its [`Validate`] impl.
    pub fn schema<T>() -> Self
    where
        T: DeserializeOwned + Serialize + Validate + Send + Sync + 'static,
    {
        Self::standard(ValidatedSchema::<T>(PhantomData))
    }

    /// Run the validator against `input`.
    pub fn execute(&self, input: Payload) -> ServerFnResult<Payload> {
        match self {
            Self::Standard(schema) => {
                if schema.version() != 1 {
                    return Err(RpcError::invalid_validator_type(format!(
                        "Unsupported standard schema version {} from {}",
                        schema.version(),
                        schema.vendor()
                    ))
                    .into());
                }
                match schema.validate(input) {
                    StandardResult::Success(value) => Ok(value),
                    StandardResult::Failure(issues) => {
                        Err(RpcError::validation_failed(issues).into())
                    }
                    StandardResult::Pending => {
                        Err(RpcError::unsupported_async_validation().into())
                    }
                }
            }
            Self::Parser(parser) => parser.parse(input),
            Self::Function(f) => f(input),
        }
    }
}

impl fmt::Debug for Validator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Standard(schema) => write!(f, "Validator::Standard({})", schema.vendor()),
            Self::Parser(_) => write!(f, "Validator::Parser"),
            Self::Function(_) => write!(f, "Validator::Function"),
        }
    }
}

/// Run an optional validator. Without one, the validated data is `{}`.
pub fn execute_validator(validator: Option<&Validator>, input: Payload) -> ServerFnResult<Payload> {
    match validator {
        Some(validator) => validator.execute(input),
        None => Ok(Payload::Json(serde_json::Value::Object(Default::default()))),
    }
}

struct TypedParser<T>(PhantomData<fn() -> T>);

impl<T> Parse for TypedParser<T>
where
    T: DeserializeOwned + Serialize,
{
    fn parse(&self, input: Payload) -> ServerFnResult<Payload> {
        let value = parse_json::<T>(&input)?;
        Payload::from_serialize(value)
    }
}

struct ValidatedSchema<T>(PhantomData<fn() -> T>);

impl<T> StandardSchema for ValidatedSchema<T>
where
    T: DeserializeOwned + Serialize + Validate,
{
    fn vendor(&self) -> &str {
        "server-fn-rpc"
    }

    fn validate(&self, input: Payload) -> StandardResult {
        let value = match parse_json::<T>(&input) {
            Ok(value) => value,
            Err(_) => {
                return StandardResult::Failure(vec![ValidationIssue::new(format!(
                    "Expected {}",
                    std::any::type_name::<T>()
                ))]);
            }
        };
        let result = value.validate();
        if !result.is_valid() {
            return StandardResult::Failure(result.issues);
        }
        match Payload::from_serialize(value) {
            Ok(payload) => StandardResult::Success(payload),
            Err(e) => StandardResult::Failure(vec![ValidationIssue::new(e.to_string())]),
        }
    }
}

fn parse_json<T: DeserializeOwned>(input: &Payload) -> ServerFnResult<T> {
    let value = input
        .as_json()
        .ok_or_else(|| {
            RpcError::validation_failed(vec![ValidationIssue::new("Expected JSON input")])
        })?;
    serde_json::from_value(value.clone())
        .map_err(|e| RpcError::validation_failed(vec![ValidationIssue::new(e.to_string())]).into())
}
