//! Control-flow signals raised by server functions
//!
//! A [`Redirect`] or [`NotFound`] is raised through the error channel to
//! interrupt normal return flow, but it is an instruction for the caller's
//! routing layer rather than a failure. On the wire both are plain JSON
//! objects recognized by their `isRedirect` / `isNotFound` markers.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

fn default_redirect_status() -> u16 {
    307
}

/// Navigation instruction raised by a server function or middleware.
///
/// # Example
/// ```rust,ignore
/// async fn guard(ctx: MiddlewareCtx, next: Next) -> ServerFnResult<MiddlewareCtx> {
///     if !ctx.context.contains_key("user") {
///         return Err(Redirect::to("/login").into());
///     }
///     next.proceed().await
/// }
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Redirect {
    is_redirect: bool,
    /// Router-relative destination.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub to: Option<String>,
    /// Absolute destination.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub href: Option<String>,
    /// HTTP status to use if the redirect is followed by the transport.
    #[serde(default = "default_redirect_status")]
    pub status_code: u16,
    /// Replace the current history entry instead of pushing.
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub replace: bool,
    /// Force a full document load.
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub reload_document: bool,
    /// Headers to attach to the HTTP response carrying this redirect.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub headers: BTreeMap<String, String>,
}

impl Redirect {
    /// Redirect to a router path.
    pub fn to(path: impl Into<String>) -> Self {
        Self {
            is_redirect: true,
            to: Some(path.into()),
            href: None,
            status_code: default_redirect_status(),
            replace: false,
            reload_document: false,
            headers: BTreeMap::new(),
        }
    }

    /// Redirect to an absolute URL.
    pub fn href(url: impl Into<String>) -> Self {
        Self {
            href: Some(url.into()),
            to: None,
            ..Self::to(String::new())
        }
    }

    /// Set the HTTP status code.
    pub fn with_status(mut self, status_code: u16) -> Self {
        self.status_code = status_code;
        self
    }

    /// Replace the current history entry.
    pub fn replacing(mut self) -> Self {
        self.replace = true;
        self
    }

    /// Force a full document load.
    pub fn reloading_document(mut self) -> Self {
        self.reload_document = true;
        self
    }

    /// Attach a response header.
    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name.into(), value.into());
        self
    }

    /// Recognize a serialized redirect by its marker.
    pub fn parse(value: &serde_json::Value) -> Option<Self> {
        if value.get("isRedirect") != Some(&serde_json::Value::Bool(true)) {
            return None;
        }
        serde_json::from_value(value.clone()).ok()
    }

    /// Where this redirect points.
    pub fn target(&self) -> &str {
        self.href.as_deref().or(self.to.as_deref()).unwrap_or("/")
    }
}

impl fmt::Display for Redirect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.target(), self.status_code)
    }
}

/// Not-found instruction raised by a server function or middleware.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NotFound {
    is_not_found: bool,
    /// Route that should render the not-found state.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub route_id: Option<String>,
    /// Render at the root instead of the nearest route.
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub global: bool,
    /// Arbitrary data for the not-found component.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
    /// Headers to attach to the HTTP response carrying this signal.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub headers: BTreeMap<String, String>,
}

impl NotFound {
    pub fn new() -> Self {
        Self {
            is_not_found: true,
            route_id: None,
            global: false,
            data: None,
            headers: BTreeMap::new(),
        }
    }

    pub fn for_route(mut self, route_id: impl Into<String>) -> Self {
        self.route_id = Some(route_id.into());
        self
    }

    pub fn global(mut self) -> Self {
        self.global = true;
        self
    }

    pub fn with_data(mut self, data: serde_json::Value) -> Self {
        self.data = Some(data);
        self
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name.into(), value.into());
        self
    }

    /// Recognize a serialized not-found signal by its marker.
    pub fn parse(value: &serde_json::Value) -> Option<Self> {
        if value.get("isNotFound") != Some(&serde_json::Value::Bool(true)) {
            return None;
        }
        serde_json::from_value(value.clone()).ok()
    }
}

impl Default for NotFound {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for NotFound {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.route_id {
            Some(route) => write!(f, "not found in route {}", route),
            None => write!(f, "not found"),
        }
    }
}
