//! Error types for server-function calls
//!
//! A call can end in three ways besides returning a value: a structured
//! [`RpcError`], a [`Redirect`] or a [`NotFound`]. The latter two are control
//! signals for the caller's routing layer and are kept apart from real
//! failures in [`ServerFnError`] so that every boundary can re-raise them
//! untouched.
//!
//! # Error Codes
//!
//! Error codes are represented by the [`RpcErrorCode`] enum. When serialized,
//! codes are converted to SCREAMING_SNAKE_CASE strings.
//!
//! # Example
//! ```rust,ignore
//! use server_fn_rpc::{RpcError, RpcErrorCode};
//!
//! let error = RpcError::new(RpcErrorCode::Forbidden, "Admins only");
//! let error = RpcError::forbidden("Admins only"); // Convenience method
//! ```

use crate::signal::{NotFound, Redirect};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use thiserror::Error;

/// Type-safe error codes for server-function operations.
///
/// When serialized to JSON, codes are converted to SCREAMING_SNAKE_CASE
/// (e.g., `ValidationFailed` becomes `"VALIDATION_FAILED"`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RpcErrorCode {
    // Client errors (4xx equivalent)
    /// The request was malformed or invalid
    BadRequest,
    /// Authentication is required
    Unauthorized,
    /// The authenticated user lacks permission
    Forbidden,
    /// The requested resource was not found
    NotFound,
    /// The request conflicts with current state
    Conflict,
    /// The request payload exceeds size limits
    PayloadTooLarge,
    /// A validator rejected the input
    ValidationFailed,
    /// A validator produced a pending (asynchronous) result
    UnsupportedAsyncValidation,
    /// A validator has a shape the adapter cannot call
    InvalidValidatorType,

    // Server errors (5xx equivalent)
    /// An unexpected internal error occurred
    InternalError,
    /// The requested functionality is not implemented
    NotImplemented,
    /// The service is temporarily unavailable
    ServiceUnavailable,

    // Server-function specific errors
    /// No server function is registered under the requested id
    FunctionNotFound,
    /// The server half of a function ran in a client-only build
    ServerFnCalledFromClient,
    /// Middleware nesting refers back to itself
    MiddlewareCycleDetected,
    /// A middleware body failed
    MiddlewareError,
    /// The global middleware registry no longer accepts registrations
    RegistryLocked,
    /// The remote end answered with a non-2xx status
    RequestFailed,
    /// The injected transport failed before a response was produced
    TransportError,
    /// Reading or writing the static result cache failed
    StaticCacheError,
    /// JSON serialization/deserialization failed
    SerializationError,
}

impl RpcErrorCode {
    /// Returns the string representation of the error code.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::BadRequest => "BAD_REQUEST",
            Self::Unauthorized => "UNAUTHORIZED",
            Self::Forbidden => "FORBIDDEN",
            Self::NotFound => "NOT_FOUND",
            Self::Conflict => "CONFLICT",
            Self::PayloadTooLarge => "PAYLOAD_TOO_LARGE",
            Self::ValidationFailed => "VALIDATION_FAILED",
            Self::UnsupportedAsyncValidation => "UNSUPPORTED_ASYNC_VALIDATION",
            Self::InvalidValidatorType => "INVALID_VALIDATOR_TYPE",
            Self::InternalError => "INTERNAL_ERROR",
            Self::NotImplemented => "NOT_IMPLEMENTED",
            Self::ServiceUnavailable => "SERVICE_UNAVAILABLE",
            Self::FunctionNotFound => "FUNCTION_NOT_FOUND",
            Self::ServerFnCalledFromClient => "SERVER_FN_CALLED_FROM_CLIENT",
            Self::MiddlewareCycleDetected => "MIDDLEWARE_CYCLE_DETECTED",
            Self::MiddlewareError => "MIDDLEWARE_ERROR",
            Self::RegistryLocked => "REGISTRY_LOCKED",
            Self::RequestFailed => "REQUEST_FAILED",
            Self::TransportError => "TRANSPORT_ERROR",
            Self::StaticCacheError => "STATIC_CACHE_ERROR",
            Self::SerializationError => "SERIALIZATION_ERROR",
        }
    }

    /// Returns true if this is a client error (4xx equivalent).
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            Self::BadRequest
                | Self::Unauthorized
                | Self::Forbidden
                | Self::NotFound
                | Self::Conflict
                | Self::PayloadTooLarge
                | Self::ValidationFailed
                | Self::UnsupportedAsyncValidation
                | Self::InvalidValidatorType
                | Self::FunctionNotFound
        )
    }

    /// Returns true if this is a server error (5xx equivalent).
    pub fn is_server_error(&self) -> bool {
        !self.is_client_error()
    }

    /// HTTP status used when this error crosses the server boundary.
    pub fn http_status(&self) -> u16 {
        match self {
            Self::BadRequest
            | Self::ValidationFailed
            | Self::UnsupportedAsyncValidation
            | Self::InvalidValidatorType => 400,
            Self::Unauthorized => 401,
            Self::Forbidden => 403,
            Self::NotFound | Self::FunctionNotFound => 404,
            Self::Conflict => 409,
            Self::PayloadTooLarge => 413,
            Self::NotImplemented => 501,
            Self::RequestFailed | Self::TransportError => 502,
            Self::ServiceUnavailable => 503,
            _ => 500,
        }
    }
}

impl fmt::Display for RpcErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Structured failure with a type-safe code and message.
///
/// # Example
/// ```rust,ignore
/// use server_fn_rpc::{RpcError, RpcErrorCode};
///
/// let error = RpcError::new(RpcErrorCode::Conflict, "Email already taken")
///     .with_details(serde_json::json!({"email": "a@b.c"}))
///     .with_cause("unique index violated");
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Error)]
#[error("[{code}] {message}")]
pub struct RpcError {
    /// Type-safe error code
    pub code: RpcErrorCode,
    /// Human-readable error message
    pub message: String,
    /// Optional additional details (JSON value)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
    /// Optional cause for debugging (not exposed to clients when sanitized)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cause: Option<String>,
}

impl RpcError {
    /// Create a new error with code and message.
    pub fn new(code: RpcErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            details: None,
            cause: None,
        }
    }

    /// Add details to the error.
    pub fn with_details(mut self, details: impl Serialize) -> Self {
        self.details = serde_json::to_value(details).ok();
        self
    }

    /// Add a cause string for debugging.
    pub fn with_cause(mut self, cause: impl Into<String>) -> Self {
        self.cause = Some(cause.into());
        self
    }

    /// Sanitize error for client response (removes internal details for server errors).
    pub fn sanitize(mut self) -> Self {
        if matches!(self.code, RpcErrorCode::InternalError) {
            self.message = "An internal error occurred".to_string();
            self.details = None;
            self.cause = None;
        }
        self
    }

    // Convenience constructors

    /// Create a NOT_FOUND error.
    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(RpcErrorCode::NotFound, message)
    }

    /// Create a BAD_REQUEST error.
    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(RpcErrorCode::BadRequest, message)
    }

    /// Create an UNAUTHORIZED error.
    pub fn unauthorized(message: impl Into<String>) -> Self {
        Self::new(RpcErrorCode::Unauthorized, message)
    }

    /// Create a FORBIDDEN error.
    pub fn forbidden(message: impl Into<String>) -> Self {
        Self::new(RpcErrorCode::Forbidden, message)
    }

    /// Create an INTERNAL_ERROR error.
    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(RpcErrorCode::InternalError, message)
    }

    /// Create a CONFLICT error.
    pub fn conflict(message: impl Into<String>) -> Self {
        Self::new(RpcErrorCode::Conflict, message)
    }

    /// Create a PAYLOAD_TOO_LARGE error.
    pub fn payload_too_large(message: impl Into<String>) -> Self {
        Self::new(RpcErrorCode::PayloadTooLarge, message)
    }

    /// Create a NOT_IMPLEMENTED error.
    pub fn not_implemented(message: impl Into<String>) -> Self {
        Self::new(RpcErrorCode::NotImplemented, message)
    }

    /// Create a SERIALIZATION_ERROR error.
    pub fn serialization(message: impl Into<String>) -> Self {
        Self::new(RpcErrorCode::SerializationError, message)
    }

    /// Create a MIDDLEWARE_ERROR error.
    pub fn middleware(message: impl Into<String>) -> Self {
        Self::new(RpcErrorCode::MiddlewareError, message)
    }

    /// Create a VALIDATION_FAILED error carrying the validator's issues.
    ///
    /// The issues are pretty-printed into the message and kept verbatim in
    /// `details`.
    pub fn validation_failed(issues: impl Serialize) -> Self {
        let details = serde_json::to_value(issues).unwrap_or_default();
        let message =
            serde_json::to_string_pretty(&details).unwrap_or_else(|_| details.to_string());
        Self::new(RpcErrorCode::ValidationFailed, message).with_details(details)
    }

    /// Create an UNSUPPORTED_ASYNC_VALIDATION error.
    pub fn unsupported_async_validation() -> Self {
        Self::new(
            RpcErrorCode::UnsupportedAsyncValidation,
            "Async validation not supported",
        )
    }

    /// Create an INVALID_VALIDATOR_TYPE error.
    pub fn invalid_validator_type(message: impl Into<String>) -> Self {
        Self::new(RpcErrorCode::InvalidValidatorType, message)
    }

    /// Create a MIDDLEWARE_CYCLE_DETECTED error.
    pub fn middleware_cycle(message: impl Into<String>) -> Self {
        Self::new(RpcErrorCode::MiddlewareCycleDetected, message)
    }

    /// Create a FUNCTION_NOT_FOUND error.
    pub fn function_not_found(function_id: &str) -> Self {
        Self::new(
            RpcErrorCode::FunctionNotFound,
            format!("Server function info not found for {}", function_id),
        )
    }

    /// The marker raised when the server half runs in a client-only build.
    pub fn server_fn_called_from_client() -> Self {
        Self::new(
            RpcErrorCode::ServerFnCalledFromClient,
            "Server function called from the client!",
        )
    }

    /// Create a REGISTRY_LOCKED error.
    pub fn registry_locked() -> Self {
        Self::new(
            RpcErrorCode::RegistryLocked,
            "Global middleware must be registered before the first request is served",
        )
    }

    /// Create a REQUEST_FAILED error for a non-2xx response.
    ///
    /// The message embeds the status and, when the body was JSON, the parsed
    /// body, which is also kept in `details`.
    pub fn request_failed(status: u16, body: Option<serde_json::Value>, text: &str) -> Self {
        match body {
            Some(json) => Self::new(
                RpcErrorCode::RequestFailed,
                format!("Request failed with status {}: {}", status, json),
            )
            .with_details(json),
            None => Self::new(
                RpcErrorCode::RequestFailed,
                format!("Request failed with status {}: {}", status, text),
            ),
        }
    }

    /// Create a TRANSPORT_ERROR error.
    pub fn transport(message: impl Into<String>) -> Self {
        Self::new(RpcErrorCode::TransportError, message)
    }

    /// Create a STATIC_CACHE_ERROR error.
    pub fn static_cache(message: impl Into<String>) -> Self {
        Self::new(RpcErrorCode::StaticCacheError, message)
    }
}

impl From<serde_json::Error> for RpcError {
    fn from(err: serde_json::Error) -> Self {
        Self::serialization(format!("JSON error: {}", err))
    }
}

impl From<std::io::Error> for RpcError {
    fn from(err: std::io::Error) -> Self {
        Self::internal(format!("IO error: {}", err))
    }
}

/// Anything a server-function call raises instead of returning a value.
///
/// `Redirect` and `NotFound` are not failures. They pass through the
/// middleware engine, the fetcher and the HTTP boundary exactly as raised.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ServerFnError {
    /// Instruction to navigate elsewhere.
    #[error("redirect to {0}")]
    Redirect(Redirect),
    /// Instruction to render a not-found state.
    #[error("{0}")]
    NotFound(NotFound),
    /// A real failure.
    #[error(transparent)]
    Rpc(#[from] RpcError),
}

impl ServerFnError {
    /// True for redirect and not-found signals.
    pub fn is_control_signal(&self) -> bool {
        matches!(self, Self::Redirect(_) | Self::NotFound(_))
    }

    /// The structured failure, if this is not a control signal.
    pub fn as_rpc(&self) -> Option<&RpcError> {
        match self {
            Self::Rpc(e) => Some(e),
            _ => None,
        }
    }

    /// Error code of a failure; `None` for control signals.
    pub fn code(&self) -> Option<RpcErrorCode> {
        self.as_rpc().map(|e| e.code)
    }

    /// Classify a JSON value by its markers.
    ///
    /// Objects carrying `isRedirect: true` become redirects, objects carrying
    /// `isNotFound: true` become not-found signals, anything else must parse
    /// as an [`RpcError`].
    pub fn from_value(value: serde_json::Value) -> Result<Self, serde_json::Error> {
        if let Some(redirect) = Redirect::parse(&value) {
            return Ok(Self::Redirect(redirect));
        }
        if let Some(not_found) = NotFound::parse(&value) {
            return Ok(Self::NotFound(not_found));
        }
        serde_json::from_value(value).map(Self::Rpc)
    }
}

impl From<Redirect> for ServerFnError {
    fn from(redirect: Redirect) -> Self {
        Self::Redirect(redirect)
    }
}

impl From<NotFound> for ServerFnError {
    fn from(not_found: NotFound) -> Self {
        Self::NotFound(not_found)
    }
}

impl From<serde_json::Error> for ServerFnError {
    fn from(err: serde_json::Error) -> Self {
        Self::Rpc(err.into())
    }
}

impl From<std::io::Error> for ServerFnError {
    fn from(err: std::io::Error) -> Self {
        Self::Rpc(err.into())
    }
}

impl Serialize for ServerFnError {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Self::Redirect(redirect) => redirect.serialize(serializer),
            Self::NotFound(not_found) => not_found.serialize(serializer),
            Self::Rpc(error) => error.serialize(serializer),
        }
    }
}

impl<'de> Deserialize<'de> for ServerFnError {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let value = serde_json::Value::deserialize(deserializer)?;
        Self::from_value(value).map_err(serde::de::Error::custom)
    }
}

/// Result type alias for server-function operations.
pub type ServerFnResult<T> = Result<T, ServerFnError>;

/// Result type alias for operations that can only fail, never signal.
pub type RpcResult<T> = Result<T, RpcError>;
