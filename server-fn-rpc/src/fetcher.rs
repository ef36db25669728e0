//! Outbound requests and response decoding
//!
//! The client half of a server function never talks to the network itself.
//! It builds an [`http::Request`] and hands it to an injected
//! [`FetchHandler`]; tests and the demo substitute an in-memory handler.
//!
//! Encoding depends on the method:
//!
//! - `GET`: `{ data, context }` is JSON-encoded into the `payload` query
//!   parameter. No body. An absent payload adds no query string.
//! - `POST` with a form: the client `sendContext` is written into the
//!   `__TSR_CONTEXT` field and the form is sent as the body.
//! - `POST` otherwise: the body is the JSON text of `{ data, context }`.

use crate::config::ServerFnConfig;
use crate::context::{ContextMap, Method, Payload};
use crate::error::{RpcError, RpcResult, ServerFnError, ServerFnResult};
use crate::form_data::{FORM_DATA_CONTEXT_FIELD, FormData};
use crate::signal::{NotFound, Redirect};
use futures::future::BoxFuture;
use http::header::{ACCEPT, CONTENT_TYPE, HeaderName, HeaderValue};
use http::{HeaderMap, Request, Response};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::future::Future;
use std::sync::Arc;

/// Request header naming the payload encoding.
pub const PAYLOAD_TYPE_HEADER: &str = "x-tsr-payload-type";
/// Response header naming the result encoding.
pub const RETURN_TYPE_HEADER: &str = "x-tsr-return-type";
/// Request header asking the server not to follow redirects itself.
pub const REDIRECT_HEADER: &str = "x-tsr-redirect";
/// Query parameter carrying a GET payload.
pub const PAYLOAD_QUERY_PARAM: &str = "payload";

const JSON_ACCEPT: &str = "application/x-ndjson, application/json";
const JSON_CONTENT_TYPE: &str = "application/json";
const MULTIPART_CONTENT_TYPE: &str = "multipart/form-data";

/// How the request body (or query) is encoded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PayloadType {
    FormData,
    Request,
    Payload,
    Args,
}

impl PayloadType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::FormData => "formData",
            Self::Request => "request",
            Self::Payload => "payload",
            Self::Args => "args",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "formData" => Some(Self::FormData),
            "request" => Some(Self::Request),
            "payload" => Some(Self::Payload),
            "args" => Some(Self::Args),
            _ => None,
        }
    }
}

impl fmt::Display for PayloadType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How the response body is encoded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ReturnType {
    Json,
    Rsc,
    Raw,
}

impl ReturnType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Json => "json",
            Self::Rsc => "rsc",
            Self::Raw => "raw",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "json" => Some(Self::Json),
            "rsc" => Some(Self::Rsc),
            "raw" => Some(Self::Raw),
            _ => None,
        }
    }
}

impl fmt::Display for ReturnType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Body of a request or response.
#[derive(Debug, Clone, PartialEq, Default)]
pub enum Body {
    #[default]
    Empty,
    Text(String),
    FormData(FormData),
}

impl Body {
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text(text) => Some(text),
            Self::Empty => Some(""),
            Self::FormData(_) => None,
        }
    }

    pub fn into_text(self) -> RpcResult<String> {
        match self {
            Self::Text(text) => Ok(text),
            Self::Empty => Ok(String::new()),
            Self::FormData(_) => Err(RpcError::bad_request("Expected a text body, got FormData")),
        }
    }
}

impl From<String> for Body {
    fn from(text: String) -> Self {
        Self::Text(text)
    }
}

impl From<FormData> for Body {
    fn from(form: FormData) -> Self {
        Self::FormData(form)
    }
}

/// Transport seam: sends a request and resolves its response.
pub type FetchHandler =
    Arc<dyn Fn(Request<Body>) -> BoxFuture<'static, RpcResult<Response<Body>>> + Send + Sync>;

/// Create a [`FetchHandler`] from an async function.
pub fn fetch_handler<F, Fut>(f: F) -> FetchHandler
where
    F: Fn(Request<Body>) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = RpcResult<Response<Body>>> + Send + 'static,
{
    Arc::new(move |request| Box::pin(f(request)))
}

/// What the server sends back for a successful call: the result and the
/// server's `sendContext`.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ServerFnEnvelope {
    #[serde(default)]
    pub result: serde_json::Value,
    #[serde(default)]
    pub context: ContextMap,
}

/// Everything the client terminal middleware sends.
#[derive(Debug, Clone, Default)]
pub struct FetchPayload {
    pub method: Method,
    pub data: Payload,
    /// The client `sendContext`; becomes the server's initial context.
    pub context: ContextMap,
    pub headers: HeaderMap,
}

/// Build the outbound request for a server-function call.
pub fn build_request(url: &str, payload: FetchPayload) -> RpcResult<Request<Body>> {
    let FetchPayload {
        method,
        data,
        context,
        headers: extra_headers,
    } = payload;

    let payload_type = match data {
        Payload::FormData(_) => PayloadType::FormData,
        Payload::Json(_) => PayloadType::Payload,
    };

    let mut headers = HeaderMap::new();
    headers.insert(
        HeaderName::from_static(REDIRECT_HEADER),
        HeaderValue::from_static("manual"),
    );
    headers.insert(
        HeaderName::from_static(PAYLOAD_TYPE_HEADER),
        HeaderValue::from_static(payload_type.as_str()),
    );
    if payload_type == PayloadType::Payload {
        headers.insert(CONTENT_TYPE, HeaderValue::from_static(JSON_CONTENT_TYPE));
        headers.insert(ACCEPT, HeaderValue::from_static(JSON_ACCEPT));
    }
    for name in extra_headers.keys() {
        headers.remove(name);
    }
    crate::context::merge_headers(&mut headers, &extra_headers);

    let (uri, body) = match (method, data) {
        (Method::Get, Payload::FormData(_)) => {
            return Err(RpcError::bad_request(
                "FormData is not supported with GET requests",
            ));
        }
        (Method::Get, Payload::Json(data)) => {
            let query = encode_query(&data, &context)?;
            (append_query(url, query.as_deref()), Body::Empty)
        }
        (Method::Post, Payload::FormData(mut form)) => {
            form.set(FORM_DATA_CONTEXT_FIELD, serde_json::to_string(&context)?);
            headers.insert(CONTENT_TYPE, HeaderValue::from_static(MULTIPART_CONTENT_TYPE));
            (url.to_string(), Body::FormData(form))
        }
        (Method::Post, Payload::Json(data)) => {
            let body = serde_json::json!({ "data": data, "context": context });
            (url.to_string(), Body::Text(serde_json::to_string(&body)?))
        }
    };

    let mut request = Request::new(body);
    *request.method_mut() = method.as_http();
    *request.uri_mut() = uri
        .parse()
        .map_err(|e| RpcError::bad_request(format!("Invalid server function URL {}: {}", uri, e)))?;
    *request.headers_mut() = headers;
    Ok(request)
}

fn encode_query(data: &serde_json::Value, context: &ContextMap) -> RpcResult<Option<String>> {
    let mut payload = serde_json::Map::new();
    if !data.is_null() {
        payload.insert("data".to_string(), data.clone());
    }
    if !context.is_empty() {
        payload.insert("context".to_string(), serde_json::Value::Object(context.clone()));
    }
    if payload.is_empty() {
        return Ok(None);
    }
    let encoded = serde_json::to_string(&payload)?;
    Ok(Some(
        url::form_urlencoded::Serializer::new(String::new())
            .append_pair(PAYLOAD_QUERY_PARAM, &encoded)
            .finish(),
    ))
}

fn append_query(url: &str, query: Option<&str>) -> String {
    match query {
        Some(query) if url.contains('?') => format!("{}&{}", url, query),
        Some(query) => format!("{}?{}", url, query),
        None => url.to_string(),
    }
}

/// Decode a server-function response.
///
/// Redirect and not-found bodies are raised as signals whatever the status.
/// Any other non-2xx response fails with `REQUEST_FAILED`.
pub fn decode_response(response: Response<Body>) -> ServerFnResult<serde_json::Value> {
    let status = response.status();
    let return_type = response
        .headers()
        .get(RETURN_TYPE_HEADER)
        .and_then(|v| v.to_str().ok())
        .and_then(ReturnType::parse)
        .unwrap_or(ReturnType::Json);
    let text = response.into_body().into_text()?;
    let json = serde_json::from_str::<serde_json::Value>(&text).ok();

    if let Some(signal) = json.as_ref().and_then(parse_signal) {
        return Err(signal);
    }

    if !status.is_success() {
        tracing::debug!(status = status.as_u16(), "Server function request failed");
        return Err(RpcError::request_failed(status.as_u16(), json, &text).into());
    }

    match return_type {
        ReturnType::Raw => Ok(serde_json::Value::String(text)),
        ReturnType::Json | ReturnType::Rsc => {
            if text.is_empty() {
                return Ok(serde_json::Value::Null);
            }
            json.ok_or_else(|| {
                RpcError::serialization(format!("Invalid JSON response body: {}", preview(&text)))
                    .into()
            })
        }
    }
}

fn parse_signal(value: &serde_json::Value) -> Option<ServerFnError> {
    if let Some(redirect) = Redirect::parse(value) {
        return Some(redirect.into());
    }
    NotFound::parse(value).map(Into::into)
}

pub(crate) fn preview(text: &str) -> String {
    text.chars().take(100).collect()
}

/// Client half of a server function: where and how requests are sent.
#[derive(Clone)]
pub struct ClientStub {
    function_id: String,
    filename: String,
    url: String,
    /// Set by [`ClientStub::with_url`]; such a URL survives [`ClientStub::configured`].
    explicit_url: bool,
    handler: Option<FetchHandler>,
}

impl ClientStub {
    /// A stub sending through `handler` to the default URL of `function_id`.
    pub fn new(
        function_id: impl Into<String>,
        filename: impl Into<String>,
        handler: FetchHandler,
    ) -> Self {
        let function_id = function_id.into();
        let url = ServerFnConfig::default().function_url(&function_id);
        Self {
            function_id,
            filename: filename.into(),
            url,
            explicit_url: false,
            handler: Some(handler),
        }
    }

    /// A stub for a server-side build, which never sends requests.
    pub fn detached(function_id: impl Into<String>, filename: impl Into<String>) -> Self {
        let function_id = function_id.into();
        let url = ServerFnConfig::default().function_url(&function_id);
        Self {
            function_id,
            filename: filename.into(),
            url,
            explicit_url: false,
            handler: None,
        }
    }

    pub fn with_url(mut self, url: impl Into<String>) -> Self {
        self.url = url.into();
        self.explicit_url = true;
        self
    }

    /// Point the stub at `config`'s server-function base, unless a URL was
    /// set explicitly.
    pub fn configured(mut self, config: &ServerFnConfig) -> Self {
        if !self.explicit_url {
            self.url = config.function_url(&self.function_id);
        }
        self
    }

    pub fn function_id(&self) -> &str {
        &self.function_id
    }

    pub fn filename(&self) -> &str {
        &self.filename
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn handler(&self) -> Option<&FetchHandler> {
        self.handler.as_ref()
    }

    fn require_handler(&self) -> RpcResult<&FetchHandler> {
        self.handler.as_ref().ok_or_else(|| {
            RpcError::transport(format!(
                "No fetch handler configured for server function {}",
                self.function_id
            ))
        })
    }

    /// Send one call and decode the envelope it returns.
    pub async fn fetch(&self, payload: FetchPayload) -> ServerFnResult<ServerFnEnvelope> {
        let handler = self.require_handler()?;
        let request = build_request(&self.url, payload)?;
        tracing::debug!(
            function = %self.function_id,
            method = %request.method(),
            uri = %request.uri(),
            "Sending server function request"
        );
        let response = handler(request).await?;
        let value = decode_response(response)?;
        Ok(serde_json::from_value(value)?)
    }

    /// Call a plain server action with positional arguments.
    ///
    /// The arguments are POSTed as a JSON array; the call bypasses every
    /// middleware.
    pub async fn fetch_args(
        &self,
        args: Vec<serde_json::Value>,
    ) -> ServerFnResult<serde_json::Value> {
        let handler = self.require_handler()?;
        let body = serde_json::to_string(&args)?;
        let mut request = Request::new(Body::Text(body));
        *request.method_mut() = http::Method::POST;
        *request.uri_mut() = self
            .url
            .parse()
            .map_err(|e| {
                RpcError::bad_request(format!("Invalid server function URL {}: {}", self.url, e))
            })?;
        let headers = request.headers_mut();
        headers.insert(ACCEPT, HeaderValue::from_static(JSON_CONTENT_TYPE));
        headers.insert(CONTENT_TYPE, HeaderValue::from_static(JSON_CONTENT_TYPE));
        headers.insert(
            HeaderName::from_static(PAYLOAD_TYPE_HEADER),
            HeaderValue::from_static(PayloadType::Args.as_str()),
        );

        let response = handler(request).await?;
        let envelope: ServerFnEnvelope = serde_json::from_value(decode_response(response)?)?;
        Ok(envelope.result)
    }
}

impl fmt::Debug for ClientStub {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClientStub")
            .field("function_id", &self.function_id)
            .field("filename", &self.filename)
            .field("url", &self.url)
            .field("detached", &self.handler.is_none())
            .finish()
    }
}
