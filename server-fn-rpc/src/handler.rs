//! Server HTTP boundary
//!
//! [`ServerFnHandler`] turns an inbound `<base>/<functionId>` request into a
//! response. The function id is resolved through a [`ServerFnManifest`]; the
//! payload is decoded according to the method, content type and payload-type
//! header; the outcome is rendered as JSON:
//!
//! | outcome              | status              | body                      |
//! |----------------------|---------------------|---------------------------|
//! | value                | 200                 | `{ result, context }`     |
//! | redirect / not-found | 200                 | the signal                |
//! | error                | `code.http_status()`| the (sanitized) error     |

use crate::config::ServerFnConfig;
use crate::context::{ContextMap, Method, Payload};
use crate::error::{RpcError, RpcResult, ServerFnError, ServerFnResult};
use crate::fetcher::{
    Body, PAYLOAD_QUERY_PARAM, PAYLOAD_TYPE_HEADER, PayloadType, RETURN_TYPE_HEADER, ReturnType,
    ServerFnEnvelope, preview,
};
use crate::form_data::FormData;
use crate::server_fn::{ServerFn, ServerInput};
use futures::future::BoxFuture;
use http::header::{CONTENT_TYPE, HeaderName, HeaderValue};
use http::{HeaderMap, Request, Response, StatusCode};
use regex::Regex;
use std::collections::{BTreeMap, HashMap};
use std::future::Future;
use std::sync::Arc;

const FORM_DATA_CONTENT_TYPES: [&str; 2] =
    ["multipart/form-data", "application/x-www-form-urlencoded"];
const URLENCODED_CONTENT_TYPE: &str = "application/x-www-form-urlencoded";

/// Boxed server action for type erasure
pub(crate) type BoxedAction =
    Arc<dyn Fn(ServerInput) -> BoxFuture<'static, ServerFnResult<ServerFnEnvelope>> + Send + Sync>;

/// Trait for server actions
///
/// Automatically implemented for async functions with the signature:
/// `async fn(ServerInput) -> ServerFnResult<ServerFnEnvelope>`
pub trait ServerAction: Clone + Send + Sync + 'static {
    /// The future type returned by the action
    type Future: Future<Output = ServerFnResult<ServerFnEnvelope>> + Send;

    /// Run the action for one inbound call
    fn call(&self, input: ServerInput) -> Self::Future;
}

impl<F, Fut> ServerAction for F
where
    F: Fn(ServerInput) -> Fut + Clone + Send + Sync + 'static,
    Fut: Future<Output = ServerFnResult<ServerFnEnvelope>> + Send + 'static,
{
    type Future = Fut;

    fn call(&self, input: ServerInput) -> Self::Future {
        (self)(input)
    }
}

fn into_boxed<A: ServerAction>(action: A) -> BoxedAction {
    Arc::new(move |input| {
        let action = action.clone();
        Box::pin(async move { action.call(input).await })
    })
}

/// Resolves function ids to server actions.
#[derive(Clone, Default)]
pub struct ServerFnManifest {
    actions: HashMap<String, BoxedAction>,
}

impl ServerFnManifest {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register the server half of `server_fn` under its function id.
    pub fn register(mut self, server_fn: &ServerFn) -> Self {
        let server_fn = server_fn.clone();
        let id = server_fn.function_id().to_string();
        self.actions.insert(
            id,
            into_boxed(move |input: ServerInput| {
                let server_fn = server_fn.clone();
                async move { server_fn.execute_server(input).await }
            }),
        );
        self
    }

    /// Register an arbitrary action.
    pub fn register_action<A: ServerAction>(
        mut self,
        function_id: impl Into<String>,
        action: A,
    ) -> Self {
        self.actions.insert(function_id.into(), into_boxed(action));
        self
    }

    pub fn contains(&self, function_id: &str) -> bool {
        self.actions.contains_key(function_id)
    }

    /// Registered function ids, sorted.
    pub fn functions(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.actions.keys().cloned().collect();
        ids.sort();
        ids
    }

    pub fn len(&self) -> usize {
        self.actions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.actions.is_empty()
    }

    fn get(&self, function_id: &str) -> Option<&BoxedAction> {
        self.actions.get(function_id)
    }
}

impl std::fmt::Debug for ServerFnManifest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServerFnManifest")
            .field("functions", &self.functions())
            .finish()
    }
}

/// Serves server functions over HTTP.
///
/// # Example
/// ```rust,ignore
/// let manifest = ServerFnManifest::new().register(&get_user).register(&create_user);
/// let handler = ServerFnHandler::new(manifest, ServerFnConfig::from_env())?;
/// let response = handler.handle(request).await;
/// ```
#[derive(Clone)]
pub struct ServerFnHandler {
    manifest: Arc<ServerFnManifest>,
    config: ServerFnConfig,
    path: Regex,
}

impl ServerFnHandler {
    /// Create a handler; fails when the configuration is invalid.
    pub fn new(manifest: ServerFnManifest, config: ServerFnConfig) -> RpcResult<Self> {
        config.validate().map_err(RpcError::bad_request)?;
        let pattern = format!("^/{}/([^/?#]+)", regex::escape(config.sanitized_base()));
        let path = Regex::new(&pattern).map_err(|e| {
            RpcError::internal(format!("Invalid server function path pattern: {}", e))
        })?;
        Ok(Self {
            manifest: Arc::new(manifest),
            config,
            path,
        })
    }

    pub fn config(&self) -> &ServerFnConfig {
        &self.config
    }

    pub fn manifest(&self) -> &ServerFnManifest {
        &self.manifest
    }

    /// Function id addressed by `path`, if it is under the configured base.
    pub fn function_id(&self, path: &str) -> Option<String> {
        let segment = self.path.captures(path)?.get(1)?.as_str();
        url::form_urlencoded::parse(segment.as_bytes())
            .next()
            .map(|(id, _)| id.into_owned())
    }

    /// Serve one request. Never fails: every outcome becomes a response.
    pub async fn handle(&self, request: Request<Body>) -> Response<Body> {
        let path = request.uri().path().to_string();
        let Some(function_id) = self.function_id(&path) else {
            let error = RpcError::not_found(format!("No server function at {}", path));
            return self.render(Err(error.into()));
        };

        if self.config.debug_logging {
            tracing::info!("ServerFn Request: {}", function_id);
        }

        let result = self.dispatch(&function_id, request).await;
        if let Err(ServerFnError::Rpc(e)) = &result {
            if e.code.is_server_error() {
                tracing::error!(function = %function_id, error = %e, "Server function failed");
            } else {
                tracing::debug!(
                    function = %function_id,
                    error = %e,
                    "Server function rejected request"
                );
            }
        }
        let response = self.render(result);

        if self.config.debug_logging {
            tracing::info!("ServerFn Response: {}", response.status().as_u16());
            if let Some(text) = response.body().as_text() {
                tracing::info!("ServerFn Response Payload: {}", preview(text));
            }
        }
        response
    }

    async fn dispatch(
        &self,
        function_id: &str,
        request: Request<Body>,
    ) -> ServerFnResult<ServerFnEnvelope> {
        let action = self
            .manifest
            .get(function_id)
            .cloned()
            .ok_or_else(|| RpcError::function_not_found(function_id))?;
        let input = self.parse_input(request)?;
        action(input).await
    }

    fn parse_input(&self, request: Request<Body>) -> RpcResult<ServerInput> {
        let (parts, body) = request.into_parts();
        let method = Method::from_http(&parts.method)
            .ok_or_else(|| RpcError::bad_request(format!("Unsupported method {}", parts.method)))?;
        let content_type = header_str(&parts.headers, CONTENT_TYPE.as_str()).unwrap_or("");
        let payload_type =
            header_str(&parts.headers, PAYLOAD_TYPE_HEADER).and_then(PayloadType::parse);

        let is_form = FORM_DATA_CONTENT_TYPES.iter().any(|t| content_type.contains(t))
            || matches!(body, Body::FormData(_))
            || payload_type == Some(PayloadType::FormData);

        if is_form {
            if method == Method::Get {
                return Err(RpcError::bad_request(
                    "GET requests with FormData payloads are not supported",
                ));
            }
            let form = match body {
                Body::FormData(form) => form,
                Body::Empty => FormData::new(),
                Body::Text(text) if content_type.contains(URLENCODED_CONTENT_TYPE) => {
                    FormData::from_urlencoded(&text)
                }
                Body::Text(_) => {
                    return Err(RpcError::bad_request(
                        "Multipart bodies must be decoded by the transport",
                    ));
                }
            };
            return Ok(ServerInput {
                method,
                data: Payload::FormData(form),
                context: ContextMap::new(),
                headers: parts.headers,
            });
        }

        let (data, context) = match method {
            Method::Get => {
                let param = parts.uri.query().and_then(|query| {
                    url::form_urlencoded::parse(query.as_bytes())
                        .find(|(name, _)| name == PAYLOAD_QUERY_PARAM)
                        .map(|(_, value)| value.into_owned())
                });
                match param {
                    Some(param) if param.len() > self.config.max_payload_size => {
                        return Err(RpcError::payload_too_large("Payload too large"));
                    }
                    Some(param) => split_payload(serde_json::from_str(&param)?)?,
                    None => (Payload::empty(), ContextMap::new()),
                }
            }
            Method::Post => {
                let text = body.into_text()?;
                if payload_type == Some(PayloadType::Args) {
                    let args: Vec<serde_json::Value> = serde_json::from_str(&text)?;
                    (Payload::Json(serde_json::Value::Array(args)), ContextMap::new())
                } else if text.is_empty() {
                    (Payload::empty(), ContextMap::new())
                } else {
                    split_payload(serde_json::from_str(&text)?)?
                }
            }
        };

        Ok(ServerInput {
            method,
            data,
            context,
            headers: parts.headers,
        })
    }

    fn render(&self, result: ServerFnResult<ServerFnEnvelope>) -> Response<Body> {
        match result {
            Ok(envelope) => json_response(StatusCode::OK, &envelope, BTreeMap::new()),
            Err(ServerFnError::Redirect(mut redirect)) => {
                let headers = std::mem::take(&mut redirect.headers);
                json_response(StatusCode::OK, &redirect, headers)
            }
            Err(ServerFnError::NotFound(mut not_found)) => {
                let headers = std::mem::take(&mut not_found.headers);
                json_response(StatusCode::OK, &not_found, headers)
            }
            Err(ServerFnError::Rpc(error)) => {
                let status = StatusCode::from_u16(error.code.http_status())
                    .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
                let error = if self.config.sanitize_errors {
                    error.sanitize()
                } else {
                    error
                };
                json_response(status, &error, BTreeMap::new())
            }
        }
    }
}

impl std::fmt::Debug for ServerFnHandler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServerFnHandler")
            .field("manifest", &self.manifest)
            .field("config", &self.config)
            .finish()
    }
}

fn header_str<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers.get(name).and_then(|v| v.to_str().ok())
}

/// Split a decoded `{ data, context }` payload.
fn split_payload(value: serde_json::Value) -> RpcResult<(Payload, ContextMap)> {
    let serde_json::Value::Object(mut map) = value else {
        return Err(RpcError::bad_request("Expected a { data, context } payload object"));
    };
    let data = map.remove("data").unwrap_or_default();
    let context = match map.remove("context") {
        Some(serde_json::Value::Object(context)) => context,
        _ => ContextMap::new(),
    };
    Ok((Payload::Json(data), context))
}

fn json_response(
    status: StatusCode,
    body: &impl serde::Serialize,
    extra_headers: BTreeMap<String, String>,
) -> Response<Body> {
    let (status, text) = match serde_json::to_string(body) {
        Ok(text) => (status, text),
        Err(e) => {
            tracing::error!(error = %e, "Failed to serialize server function response");
            let fallback = RpcError::serialization("Failed to serialize response");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                serde_json::to_string(&fallback).unwrap_or_default(),
            )
        }
    };

    let mut response = Response::new(Body::Text(text));
    *response.status_mut() = status;
    let headers = response.headers_mut();
    for (name, value) in extra_headers {
        match (HeaderName::try_from(name.as_str()), HeaderValue::try_from(value.as_str())) {
            (Ok(name), Ok(value)) => {
                headers.append(name, value);
            }
            _ => tracing::warn!(header = %name, "Dropping invalid signal header"),
        }
    }
    headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
    headers.insert(
        HeaderName::from_static(RETURN_TYPE_HEADER),
        HeaderValue::from_static(ReturnType::Json.as_str()),
    );
    response
}
