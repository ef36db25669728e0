//! Middleware descriptors and the `next` continuation
//!
//! A [`Middleware`] is an immutable value. Every builder call returns a new
//! descriptor with a fresh [`MiddlewareId`] and leaves the receiver usable,
//! so one middleware can be shared by many parents and server functions.
//!
//! # Example
//! ```rust,ignore
//! let auth = create_middleware().server(|ctx, next| async move {
//!     let user = lookup_user(&ctx.headers).await?;
//!     next.run(NextOptions::new().context(json!({ "user": user }))).await
//! });
//!
//! let audit = create_middleware()
//!     .middleware(vec![auth.clone()])
//!     .server(|ctx, next| async move {
//!         let out = next.proceed().await?;
//!         tracing::info!(function = %out.function_id, "audited");
//!         Ok(out)
//!     });
//! ```

use crate::context::{MiddlewareCtx, NextOptions};
use crate::error::ServerFnResult;
use crate::validator::Validator;
use futures::future::BoxFuture;
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use uuid::Uuid;

/// Handler body of a middleware: `(ctx, next) -> ctx`.
pub type MiddlewareFn = Arc<
    dyn Fn(MiddlewareCtx, Next) -> BoxFuture<'static, ServerFnResult<MiddlewareCtx>>
        + Send
        + Sync,
>;

type Continuation =
    Box<dyn FnOnce(MiddlewareCtx) -> BoxFuture<'static, ServerFnResult<MiddlewareCtx>> + Send>;

/// Create a [`MiddlewareFn`] from an async function.
pub fn from_fn<F, Fut>(f: F) -> MiddlewareFn
where
    F: Fn(MiddlewareCtx, Next) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = ServerFnResult<MiddlewareCtx>> + Send + 'static,
{
    Arc::new(move |ctx, next| Box::pin(f(ctx, next)))
}

/// Remainder of the chain, handed to a middleware body.
///
/// Consuming it runs every later middleware. Dropping it without calling
/// [`Next::run`] short-circuits the chain.
pub struct Next {
    ctx: MiddlewareCtx,
    continuation: Continuation,
}

impl Next {
    pub(crate) fn new<F>(ctx: MiddlewareCtx, continuation: F) -> Self
    where
        F: FnOnce(MiddlewareCtx) -> BoxFuture<'static, ServerFnResult<MiddlewareCtx>>
            + Send
            + 'static,
    {
        Self {
            ctx,
            continuation: Box::new(continuation),
        }
    }

    /// A continuation that returns the merged context as-is.
    pub(crate) fn identity(ctx: MiddlewareCtx) -> Self {
        Self::new(ctx, |ctx| Box::pin(async move { Ok(ctx) }))
    }

    /// Merge `options` into the context and continue down the chain.
    pub async fn run(self, options: NextOptions) -> ServerFnResult<MiddlewareCtx> {
        let Self { ctx, continuation } = self;
        continuation(ctx.merge(options)).await
    }

    /// Continue without adding anything.
    pub async fn proceed(self) -> ServerFnResult<MiddlewareCtx> {
        self.run(NextOptions::new()).await
    }
}

impl fmt::Debug for Next {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Next").field("function_id", &self.ctx.function_id).finish()
    }
}

/// Identity of a middleware descriptor, used for deduplication.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MiddlewareId(Uuid);

impl MiddlewareId {
    fn new() -> Self {
        Self(Uuid::now_v7())
    }

    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl fmt::Display for MiddlewareId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "mw_{}", self.0.simple())
    }
}

#[derive(Clone)]
struct MiddlewareOptions {
    id: MiddlewareId,
    label: Option<String>,
    nested: Vec<Middleware>,
    validator: Option<Validator>,
    validate_client: bool,
    client: Option<MiddlewareFn>,
    server: Option<MiddlewareFn>,
    client_after: Option<MiddlewareFn>,
}

/// An immutable middleware descriptor.
///
/// Cloning is cheap and keeps the identity; builder methods mint a new one.
#[derive(Clone)]
pub struct Middleware {
    inner: Arc<MiddlewareOptions>,
}

/// Start a new, empty middleware.
pub fn create_middleware() -> Middleware {
    Middleware::new()
}

impl Middleware {
    /// A pass-through middleware with no handlers.
    pub fn new() -> Self {
        Self {
            inner: Arc::new(MiddlewareOptions {
                id: MiddlewareId::new(),
                label: None,
                nested: Vec::new(),
                validator: None,
                validate_client: false,
                client: None,
                server: None,
                client_after: None,
            }),
        }
    }

    fn derive(&self, apply: impl FnOnce(&mut MiddlewareOptions)) -> Self {
        let mut options = (*self.inner).clone();
        options.id = MiddlewareId::new();
        apply(&mut options);
        Self {
            inner: Arc::new(options),
        }
    }

    /// Middleware that run before this one.
    pub fn middleware(&self, nested: Vec<Middleware>) -> Self {
        self.derive(|o| o.nested = nested)
    }

    /// Validator applied to `ctx.data` before this middleware runs.
    pub fn input(&self, validator: Validator) -> Self {
        self.derive(|o| o.validator = Some(validator))
    }

    /// Also run the validator in the client environment.
    pub fn validate_client(&self, enabled: bool) -> Self {
        self.derive(|o| o.validate_client = enabled)
    }

    /// Handler run in the client environment.
    pub fn client<F, Fut>(&self, f: F) -> Self
    where
        F: Fn(MiddlewareCtx, Next) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ServerFnResult<MiddlewareCtx>> + Send + 'static,
    {
        let handler = from_fn(f);
        self.derive(|o| o.client = Some(handler))
    }

    /// Handler run in the server environment.
    pub fn server<F, Fut>(&self, f: F) -> Self
    where
        F: Fn(MiddlewareCtx, Next) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ServerFnResult<MiddlewareCtx>> + Send + 'static,
    {
        let handler = from_fn(f);
        self.derive(|o| o.server = Some(handler))
    }

    /// Handler run on the client after the rest of the chain, including the
    /// network round trip, has resolved.
    pub fn client_after<F, Fut>(&self, f: F) -> Self
    where
        F: Fn(MiddlewareCtx, Next) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ServerFnResult<MiddlewareCtx>> + Send + 'static,
    {
        let handler = from_fn(f);
        self.derive(|o| o.client_after = Some(handler))
    }

    /// Human-readable name used in logs.
    pub fn label(&self, label: impl Into<String>) -> Self {
        let label = label.into();
        self.derive(|o| o.label = Some(label))
    }

    pub fn id(&self) -> MiddlewareId {
        self.inner.id
    }

    pub fn name(&self) -> Option<&str> {
        self.inner.label.as_deref()
    }

    pub fn nested(&self) -> &[Middleware] {
        &self.inner.nested
    }

    pub fn validator(&self) -> Option<&Validator> {
        self.inner.validator.as_ref()
    }

    pub fn validates_on_client(&self) -> bool {
        self.inner.validate_client
    }

    pub fn client_fn(&self) -> Option<&MiddlewareFn> {
        self.inner.client.as_ref()
    }

    pub fn server_fn(&self) -> Option<&MiddlewareFn> {
        self.inner.server.as_ref()
    }

    pub fn client_after_fn(&self) -> Option<&MiddlewareFn> {
        self.inner.client_after.as_ref()
    }

    /// True when the middleware has neither a client nor a server handler.
    pub fn is_pass_through(&self) -> bool {
        self.inner.client.is_none() && self.inner.server.is_none()
    }
}

impl Default for Middleware {
    fn default() -> Self {
        Self::new()
    }
}

impl PartialEq for Middleware {
    fn eq(&self, other: &Self) -> bool {
        self.id() == other.id()
    }
}

impl Eq for Middleware {}

impl fmt::Debug for Middleware {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Middleware")
            .field("id", &self.inner.id)
            .field("label", &self.inner.label)
            .field("nested", &self.inner.nested.len())
            .field("validator", &self.inner.validator)
            .field("validate_client", &self.inner.validate_client)
            .field("client", &self.inner.client.is_some())
            .field("server", &self.inner.server.is_some())
            .field("client_after", &self.inner.client_after.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::{FunctionMeta, Method, Payload};
    use serde_json::json;

    fn ctx() -> MiddlewareCtx {
        MiddlewareCtx::new(&FunctionMeta::new("fn", "file.rs"), Method::Get, Payload::empty())
    }

    #[test]
    fn test_builder_returns_new_descriptor() {
        let base = create_middleware();
        let with_server = base.server(|_ctx, next| next.proceed());

        assert_ne!(base.id(), with_server.id());
        assert!(base.server_fn().is_none());
        assert!(with_server.server_fn().is_some());
        assert!(base.is_pass_through());
        assert!(!with_server.is_pass_through());
    }

    #[test]
    fn test_builder_keeps_prior_fields() {
        let nested = create_middleware().label("nested");
        let mw = create_middleware()
            .middleware(vec![nested.clone()])
            .input(Validator::function(Ok))
            .validate_client(true)
            .client(|_ctx, next| next.proceed())
            .label("outer");

        assert_eq!(mw.nested(), &[nested]);
        assert!(mw.validator().is_some());
        assert!(mw.validates_on_client());
        assert!(mw.client_fn().is_some());
        assert_eq!(mw.name(), Some("outer"));
    }

    #[test]
    fn test_clone_keeps_identity() {
        let mw = create_middleware();
        assert_eq!(mw.clone(), mw);
        assert!(mw.id().to_string().starts_with("mw_"));
    }

    #[tokio::test]
    async fn test_next_merges_options() {
        let next = Next::identity(ctx());
        let out = next
            .run(NextOptions::new().context(json!({"a": 1})).result(json!("done")))
            .await
            .unwrap();
        assert_eq!(out.context.get("a"), Some(&json!(1)));
        assert_eq!(out.result, Some(json!("done")));
    }
}
