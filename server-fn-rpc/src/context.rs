//! Per-call context threaded through the middleware chain
//!
//! A [`MiddlewareCtx`] is created fresh for every call and flows through one
//! chain traversal per environment. Middleware never mutate it in place:
//! they hand a [`NextOptions`] to `next`, and the engine builds the next
//! context by merging it over the current one.

use crate::error::{RpcError, ServerFnResult};
use crate::form_data::FormData;
use http::HeaderMap;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Accumulated context values, keyed by name.
pub type ContextMap = serde_json::Map<String, serde_json::Value>;

/// Which trust domain a chain runs in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Env {
    Client,
    Server,
}

impl fmt::Display for Env {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Client => write!(f, "client"),
            Self::Server => write!(f, "server"),
        }
    }
}

/// HTTP method of a server function, fixed for the whole call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "UPPERCASE")]
pub enum Method {
    #[default]
    Get,
    Post,
}

impl Method {
    pub fn as_http(&self) -> http::Method {
        match self {
            Self::Get => http::Method::GET,
            Self::Post => http::Method::POST,
        }
    }

    pub fn from_http(method: &http::Method) -> Option<Self> {
        match *method {
            http::Method::GET => Some(Self::Get),
            http::Method::POST => Some(Self::Post),
            _ => None,
        }
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Get => write!(f, "GET"),
            Self::Post => write!(f, "POST"),
        }
    }
}

/// Cache policy of a server function.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ServerFnType {
    /// Results may be served from the static result cache.
    Static,
    /// Always executed.
    #[default]
    Dynamic,
}

impl fmt::Display for ServerFnType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Static => write!(f, "static"),
            Self::Dynamic => write!(f, "dynamic"),
        }
    }
}

/// The input of a call: JSON, or a form for POST calls.
#[derive(Debug, Clone, PartialEq)]
pub enum Payload {
    Json(serde_json::Value),
    FormData(FormData),
}

impl Payload {
    /// An absent payload.
    pub fn empty() -> Self {
        Self::Json(serde_json::Value::Null)
    }

    /// Serialize any value into a JSON payload.
    pub fn from_serialize(value: impl Serialize) -> ServerFnResult<Self> {
        Ok(Self::Json(serde_json::to_value(value)?))
    }

    pub fn is_empty(&self) -> bool {
        matches!(self, Self::Json(serde_json::Value::Null))
    }

    pub fn as_json(&self) -> Option<&serde_json::Value> {
        match self {
            Self::Json(value) => Some(value),
            Self::FormData(_) => None,
        }
    }

    pub fn as_form_data(&self) -> Option<&FormData> {
        match self {
            Self::FormData(form) => Some(form),
            Self::Json(_) => None,
        }
    }

    /// JSON view of the payload; forms become `[name, value]` pairs.
    pub fn to_json(&self) -> serde_json::Value {
        match self {
            Self::Json(value) => value.clone(),
            Self::FormData(form) => form.to_json(),
        }
    }

    /// Deserialize a JSON payload into `T`.
    pub fn deserialize<T: DeserializeOwned>(&self) -> ServerFnResult<T> {
        match self {
            Self::Json(value) => serde_json::from_value(value.clone())
                .map_err(|e| RpcError::bad_request(format!("Invalid input: {}", e)).into()),
            Self::FormData(_) => {
                Err(RpcError::bad_request("Expected a JSON payload, got FormData").into())
            }
        }
    }
}

impl Default for Payload {
    fn default() -> Self {
        Self::empty()
    }
}

impl From<serde_json::Value> for Payload {
    fn from(value: serde_json::Value) -> Self {
        Self::Json(value)
    }
}

impl From<FormData> for Payload {
    fn from(form: FormData) -> Self {
        Self::FormData(form)
    }
}

/// Identity of the server function a call belongs to.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FunctionMeta {
    pub function_id: String,
    pub filename: String,
}

impl FunctionMeta {
    pub fn new(function_id: impl Into<String>, filename: impl Into<String>) -> Self {
        Self {
            function_id: function_id.into(),
            filename: filename.into(),
        }
    }
}

/// State of one call as seen by a middleware.
#[derive(Debug, Clone)]
pub struct MiddlewareCtx {
    /// Originating server function; namespaces the static cache key.
    pub function_id: String,
    pub filename: String,
    pub method: Method,
    pub fn_type: ServerFnType,
    /// Validated input, narrowed by each middleware's validator.
    pub data: Payload,
    /// Values visible to later middleware in the current environment.
    pub context: ContextMap,
    /// Client values that cross the network (and server values sent back).
    pub send_context: ContextMap,
    pub headers: HeaderMap,
    /// Return value, set once a `next` call has resolved.
    pub result: Option<serde_json::Value>,
}

impl MiddlewareCtx {
    pub fn new(meta: &FunctionMeta, method: Method, data: Payload) -> Self {
        Self {
            function_id: meta.function_id.clone(),
            filename: meta.filename.clone(),
            method,
            fn_type: ServerFnType::default(),
            data,
            context: ContextMap::new(),
            send_context: ContextMap::new(),
            headers: HeaderMap::new(),
            result: None,
        }
    }

    pub fn with_type(mut self, fn_type: ServerFnType) -> Self {
        self.fn_type = fn_type;
        self
    }

    pub fn with_context(mut self, context: ContextMap) -> Self {
        self.context = context;
        self
    }

    pub fn with_headers(mut self, headers: HeaderMap) -> Self {
        self.headers = headers;
        self
    }

    pub fn meta(&self) -> FunctionMeta {
        FunctionMeta::new(self.function_id.clone(), self.filename.clone())
    }

    /// Build the context handed to the next link.
    ///
    /// Context maps are spread with the new keys winning, headers are
    /// appended, and `result` is replaced only when the options carry one.
    pub fn merge(mut self, options: NextOptions) -> Self {
        if let Some(context) = options.context {
            self.context.extend(context);
        }
        if let Some(send_context) = options.send_context {
            self.send_context.extend(send_context);
        }
        if let Some(headers) = options.headers {
            merge_headers(&mut self.headers, &headers);
        }
        if options.result.is_some() {
            self.result = options.result;
        }
        self
    }

    /// Read a context value as `T`.
    pub fn context_value<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        self.context
            .get(key)
            .and_then(|value| serde_json::from_value(value.clone()).ok())
    }
}

/// Append every header of `extra` to `headers`; duplicate names accumulate.
pub fn merge_headers(headers: &mut HeaderMap, extra: &HeaderMap) {
    for (name, value) in extra {
        headers.append(name.clone(), value.clone());
    }
}

/// What a middleware passes to `next`.
///
/// # Example
/// ```rust,ignore
/// next.run(
///     NextOptions::new()
///         .context(json!({"user": {"id": 1}}))
///         .send_context(json!({"traceId": "t-1"})),
/// )
/// .await
/// ```
#[derive(Debug, Clone, Default)]
pub struct NextOptions {
    pub context: Option<ContextMap>,
    pub send_context: Option<ContextMap>,
    pub headers: Option<HeaderMap>,
    pub result: Option<serde_json::Value>,
}

impl NextOptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add context keys; non-object values are ignored.
    pub fn context(mut self, context: serde_json::Value) -> Self {
        if let serde_json::Value::Object(map) = context {
            self.context.get_or_insert_with(ContextMap::new).extend(map);
        }
        self
    }

    /// Add keys to the context that crosses the network.
    pub fn send_context(mut self, send_context: serde_json::Value) -> Self {
        if let serde_json::Value::Object(map) = send_context {
            self.send_context
                .get_or_insert_with(ContextMap::new)
                .extend(map);
        }
        self
    }

    pub fn headers(mut self, headers: HeaderMap) -> Self {
        match &mut self.headers {
            Some(existing) => merge_headers(existing, &headers),
            None => self.headers = Some(headers),
        }
        self
    }

    pub fn result(mut self, result: serde_json::Value) -> Self {
        self.result = Some(result);
        self
    }
}
