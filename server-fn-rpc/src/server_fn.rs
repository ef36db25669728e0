//! Server-function builder
//!
//! [`create_server_fn`] collects the method, middleware, validator and cache
//! policy of a server function. [`ServerFnBuilder::handler`] then appends one
//! terminal middleware to the user's list:
//!
//! - on the client it sends the call through the [`ClientStub`] (or replays
//!   a static cache entry) and merges the returned envelope;
//! - on the server it invokes the user function and records its result.
//!
//! The same [`ServerFn`] value serves both halves: [`ServerFn::call`] runs the
//! client chain, [`ServerFn::execute_server`] the server chain.
//!
//! # Example
//! ```rust,ignore
//! let get_user = create_server_fn()
//!     .method(Method::Get)
//!     .middleware(vec![auth.clone()])
//!     .input(Validator::typed::<GetUserInput>())
//!     .handler(stub, |ctx: ServerFnCtx| async move {
//!         let input: GetUserInput = ctx.data()?;
//!         db.get_user(input.id).await
//!     });
//!
//! let user: User = get_user.invoke(GetUserInput { id: 1 }).await?;
//! ```

use crate::config::ServerFnConfig;
use crate::context::{
    ContextMap, Env, FunctionMeta, Method, MiddlewareCtx, NextOptions, Payload, ServerFnType,
};
use crate::error::{RpcError, ServerFnError, ServerFnResult};
use crate::executor::{execute_middleware, execute_middleware_in};
use crate::fetcher::{ClientStub, FetchPayload, ServerFnEnvelope};
use crate::form_data::extract_form_data_context;
use crate::middleware::{Middleware, Next, create_middleware};
use crate::registry::MiddlewareRegistry;
use crate::static_cache::{StaticCache, StaticCachedResult};
use crate::validator::Validator;
use http::HeaderMap;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::fmt;
use std::future::Future;
use std::sync::Arc;

/// What the user function receives on the server.
#[derive(Debug, Clone)]
pub struct ServerFnCtx {
    pub method: Method,
    /// Input after every validator of the chain.
    pub data: Payload,
    /// Context accumulated by the server middleware.
    pub context: ContextMap,
    pub headers: HeaderMap,
}

impl ServerFnCtx {
    fn from_middleware(ctx: &MiddlewareCtx) -> Self {
        Self {
            method: ctx.method,
            data: ctx.data.clone(),
            context: ctx.context.clone(),
            headers: ctx.headers.clone(),
        }
    }

    /// Deserialize the validated input.
    pub fn data<T: DeserializeOwned>(&self) -> ServerFnResult<T> {
        self.data.deserialize()
    }

    /// Read a context value as `T`.
    pub fn context_value<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        self.context
            .get(key)
            .and_then(|value| serde_json::from_value(value.clone()).ok())
    }
}

type TypeResolver = Arc<dyn Fn(&MiddlewareCtx) -> ServerFnType + Send + Sync>;

#[derive(Clone)]
enum TypePolicy {
    Fixed(ServerFnType),
    Computed(TypeResolver),
}

impl TypePolicy {
    fn resolve(&self, ctx: &MiddlewareCtx) -> ServerFnType {
        match self {
            Self::Fixed(fn_type) => *fn_type,
            Self::Computed(resolve) => resolve(ctx),
        }
    }

    fn fixed(&self) -> Option<ServerFnType> {
        match self {
            Self::Fixed(fn_type) => Some(*fn_type),
            Self::Computed(_) => None,
        }
    }
}

/// Start building a server function.
pub fn create_server_fn() -> ServerFnBuilder {
    ServerFnBuilder::new()
}

/// Options of a server function before its handler is attached.
#[derive(Clone)]
pub struct ServerFnBuilder {
    method: Method,
    middleware: Vec<Middleware>,
    validator: Option<Validator>,
    validate_client: bool,
    fn_type: TypePolicy,
    static_cache: Option<Arc<dyn StaticCache>>,
    registry: Option<Arc<MiddlewareRegistry>>,
    config: ServerFnConfig,
}

impl Default for ServerFnBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl ServerFnBuilder {
    pub fn new() -> Self {
        Self {
            method: Method::Get,
            middleware: Vec::new(),
            validator: None,
            validate_client: false,
            fn_type: TypePolicy::Fixed(ServerFnType::Dynamic),
            static_cache: None,
            registry: None,
            config: ServerFnConfig::default(),
        }
    }

    pub fn method(mut self, method: Method) -> Self {
        self.method = method;
        self
    }

    /// Middleware run before the function, in order.
    pub fn middleware(mut self, middleware: Vec<Middleware>) -> Self {
        self.middleware = middleware;
        self
    }

    /// Validator applied to the input after every middleware validator.
    pub fn input(mut self, validator: Validator) -> Self {
        self.validator = Some(validator);
        self
    }

    /// Also run the input validator on the client.
    pub fn validate_client(mut self, enabled: bool) -> Self {
        self.validate_client = enabled;
        self
    }

    /// Fixed cache policy.
    pub fn fn_type(mut self, fn_type: ServerFnType) -> Self {
        self.fn_type = TypePolicy::Fixed(fn_type);
        self
    }

    /// Cache policy computed per call from its method, data and context.
    pub fn fn_type_with<F>(mut self, resolve: F) -> Self
    where
        F: Fn(&MiddlewareCtx) -> ServerFnType + Send + Sync + 'static,
    {
        self.fn_type = TypePolicy::Computed(Arc::new(resolve));
        self
    }

    /// Store consulted for `static` calls.
    pub fn static_cache(mut self, cache: Arc<dyn StaticCache>) -> Self {
        self.static_cache = Some(cache);
        self
    }

    /// Run against `registry` instead of the process-wide one.
    pub fn registry(mut self, registry: Arc<MiddlewareRegistry>) -> Self {
        self.registry = Some(registry);
        self
    }

    pub fn config(mut self, config: ServerFnConfig) -> Self {
        self.config = config;
        self
    }

    /// Attach the server function body.
    pub fn handler<F, Fut, T>(self, stub: ClientStub, f: F) -> ServerFn
    where
        F: Fn(ServerFnCtx) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ServerFnResult<T>> + Send + 'static,
        T: Serialize + Send + 'static,
    {
        let f = Arc::new(f);
        let server = create_middleware().server(move |ctx: MiddlewareCtx, next: Next| {
            let f = Arc::clone(&f);
            async move {
                let value = f(ServerFnCtx::from_middleware(&ctx)).await?;
                let result = serde_json::to_value(value)?;
                next.run(NextOptions::new().result(result)).await
            }
        });
        self.build(stub, server)
    }

    /// Build the client half only; running its server half fails.
    pub fn client_handler(self, stub: ClientStub) -> ServerFn {
        let server = create_middleware().server(|_ctx: MiddlewareCtx, _next: Next| async move {
            Err::<MiddlewareCtx, _>(ServerFnError::from(RpcError::server_fn_called_from_client()))
        });
        self.build(stub, server)
    }

    fn build(self, stub: ClientStub, terminal: Middleware) -> ServerFn {
        let stub = stub.configured(&self.config);
        let meta = FunctionMeta::new(stub.function_id(), stub.filename());
        let client_stub = stub.clone();
        let cache = self.static_cache.clone();
        let production = self.config.is_production();
        let fn_type = self.fn_type.clone();

        let mut terminal = terminal
            .client(move |mut ctx: MiddlewareCtx, next: Next| {
                let stub = client_stub.clone();
                let cache = cache.clone();
                ctx.fn_type = fn_type.resolve(&ctx);
                async move { send_from_client(stub, cache, production, ctx, next).await }
            })
            .validate_client(self.validate_client)
            .label(format!("{}:terminal", meta.function_id));
        if let Some(validator) = self.validator {
            terminal = terminal.input(validator);
        }

        let mut middleware = self.middleware;
        middleware.push(terminal);

        ServerFn {
            inner: Arc::new(ServerFnInner {
                meta,
                stub,
                method: self.method,
                fn_type: self.fn_type,
                middleware,
                static_cache: self.static_cache,
                registry: self.registry,
            }),
        }
    }
}

async fn send_from_client(
    stub: ClientStub,
    cache: Option<Arc<dyn StaticCache>>,
    production: bool,
    ctx: MiddlewareCtx,
    next: Next,
) -> ServerFnResult<MiddlewareCtx> {
    if ctx.fn_type == ServerFnType::Static && production {
        match &cache {
            Some(cache) => match cache.fetch_item(&ctx).await? {
                Some(hit) => {
                    tracing::debug!(function = %ctx.function_id, "Serving static cache entry");
                    let envelope = hit.into_result()?;
                    return next.run(envelope_options(envelope)).await;
                }
                None => tracing::warn!(
                    "No static cache item found for {}__{}, falling back to server function...",
                    ctx.function_id,
                    ctx.data.to_json()
                ),
            },
            None => tracing::warn!(function = %ctx.function_id, "No static cache configured"),
        }
    }

    let envelope = stub
        .fetch(FetchPayload {
            method: ctx.method,
            data: ctx.data.clone(),
            context: ctx.send_context.clone(),
            headers: ctx.headers.clone(),
        })
        .await?;
    next.run(envelope_options(envelope)).await
}

fn envelope_options(envelope: ServerFnEnvelope) -> NextOptions {
    NextOptions::new()
        .context(serde_json::Value::Object(envelope.context))
        .result(envelope.result)
}

/// Per-call client options.
#[derive(Debug, Clone, Default)]
pub struct CallOptions {
    pub data: Payload,
    pub headers: HeaderMap,
}

impl CallOptions {
    pub fn new(data: impl Into<Payload>) -> Self {
        Self {
            data: data.into(),
            headers: HeaderMap::new(),
        }
    }

    pub fn with_headers(mut self, headers: HeaderMap) -> Self {
        self.headers = headers;
        self
    }
}

/// Result of [`ServerFn::call_full`].
#[derive(Debug, Clone, PartialEq)]
pub struct FullResponse {
    pub result: serde_json::Value,
    /// Client context after the chain, including context sent back by the
    /// server.
    pub context: ContextMap,
}

/// Inbound call as seen by the server.
#[derive(Debug, Clone, Default)]
pub struct ServerInput {
    pub method: Method,
    pub data: Payload,
    /// The client's `sendContext`.
    pub context: ContextMap,
    pub headers: HeaderMap,
}

struct ServerFnInner {
    meta: FunctionMeta,
    stub: ClientStub,
    method: Method,
    fn_type: TypePolicy,
    middleware: Vec<Middleware>,
    static_cache: Option<Arc<dyn StaticCache>>,
    registry: Option<Arc<MiddlewareRegistry>>,
}

/// A built server function.
#[derive(Clone)]
pub struct ServerFn {
    inner: Arc<ServerFnInner>,
}

impl ServerFn {
    pub fn function_id(&self) -> &str {
        &self.inner.meta.function_id
    }

    pub fn meta(&self) -> &FunctionMeta {
        &self.inner.meta
    }

    pub fn url(&self) -> &str {
        self.inner.stub.url()
    }

    pub fn method(&self) -> Method {
        self.inner.method
    }

    /// The resolved chain, terminal middleware last.
    pub fn middleware(&self) -> &[Middleware] {
        &self.inner.middleware
    }

    /// Call from the client and return the result.
    pub async fn call(&self, options: CallOptions) -> ServerFnResult<serde_json::Value> {
        Ok(self.call_full(options).await?.result)
    }

    /// Call with a serializable input and deserialize the result.
    pub async fn invoke<I, O>(&self, input: I) -> ServerFnResult<O>
    where
        I: Serialize,
        O: DeserializeOwned,
    {
        let result = self.call(CallOptions::new(Payload::from_serialize(input)?)).await?;
        Ok(serde_json::from_value(result)?)
    }

    /// Call from the client and return the result with the final context.
    pub async fn call_full(&self, options: CallOptions) -> ServerFnResult<FullResponse> {
        let mut ctx = MiddlewareCtx::new(&self.inner.meta, self.inner.method, options.data)
            .with_headers(options.headers);
        // A computed type sees the client context, so it is resolved by the
        // terminal middleware instead.
        if let Some(fn_type) = self.inner.fn_type.fixed() {
            ctx.fn_type = fn_type;
        }

        let out = self.execute(Env::Client, ctx).await?;
        Ok(FullResponse {
            result: out.result.unwrap_or_default(),
            context: out.context,
        })
    }

    /// Run the server chain for an inbound call.
    ///
    /// Only the result and the server `sendContext` are returned. `static`
    /// calls consult the static cache first and store the outcome, raised
    /// errors included, on a miss.
    pub async fn execute_server(&self, input: ServerInput) -> ServerFnResult<ServerFnEnvelope> {
        let (data, context) = match input.data {
            Payload::FormData(form) => {
                let (form_context, form) = extract_form_data_context(form);
                let mut context = input.context;
                context.extend(form_context);
                (Payload::FormData(form), context)
            }
            data => (data, input.context),
        };

        let mut ctx = MiddlewareCtx::new(&self.inner.meta, input.method, data)
            .with_context(context)
            .with_headers(input.headers);
        ctx.fn_type = self.inner.fn_type.resolve(&ctx);

        let cache = match (&self.inner.static_cache, ctx.fn_type) {
            (Some(cache), ServerFnType::Static) => cache,
            _ => return self.run_server(ctx).await,
        };

        if let Some(hit) = cache.get_item(&ctx).await? {
            tracing::debug!(function = %ctx.function_id, "Static cache hit");
            return hit.into_result();
        }
        let response = match self.run_server(ctx.clone()).await {
            Ok(envelope) => StaticCachedResult::success(envelope),
            Err(error) => StaticCachedResult::failure(error),
        };
        cache.set_item(&ctx, &response).await?;
        response.into_result()
    }

    async fn run_server(&self, ctx: MiddlewareCtx) -> ServerFnResult<ServerFnEnvelope> {
        let out = self.execute(Env::Server, ctx).await?;
        Ok(ServerFnEnvelope {
            result: out.result.unwrap_or_default(),
            context: out.send_context,
        })
    }

    async fn execute(&self, env: Env, ctx: MiddlewareCtx) -> ServerFnResult<MiddlewareCtx> {
        match &self.inner.registry {
            Some(registry) => {
                execute_middleware_in(registry, &self.inner.middleware, env, ctx).await
            }
            None => execute_middleware(&self.inner.middleware, env, ctx).await,
        }
    }
}

impl fmt::Debug for ServerFn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServerFn")
            .field("meta", &self.inner.meta)
            .field("method", &self.inner.method)
            .field("url", &self.inner.stub.url())
            .field("middleware", &self.inner.middleware.len())
            .finish()
    }
}
