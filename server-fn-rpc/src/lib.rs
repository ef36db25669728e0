//! # Server Function RPC
//!
//! Server functions are procedures declared once and callable from both the
//! client and the server. A call runs an ordered middleware chain on the
//! client, crosses the network, runs the same chain's server half and
//! finally the handler. Every middleware can validate input, add context in
//! either direction and short-circuit the chain.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                          Client                             │
//! │  ┌─────────────┐  ┌──────────────────┐  ┌───────────────┐   │
//! │  │ ServerFn    │──│ client middleware│──│ ClientStub    │   │
//! │  └─────────────┘  └──────────────────┘  └───────┬───────┘   │
//! └─────────────────────────────────────────────────┼───────────┘
//!                                                   │ GET ?payload= / POST JSON / FormData
//!                                                   ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │                          Server                             │
//! │  ┌─────────────────┐  ┌──────────────────┐  ┌───────────┐   │
//! │  │ ServerFnHandler │──│ server middleware│──│ handler   │   │
//! │  └─────────────────┘  └──────────────────┘  └───────────┘   │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use server_fn_rpc::prelude::*;
//!
//! let auth = create_middleware().server(|ctx, next| async move {
//!     next.run(NextOptions::new().context(json!({ "user": "ada" }))).await
//! });
//!
//! let greet = create_server_fn()
//!     .middleware(vec![auth])
//!     .input(Validator::typed::<GreetInput>())
//!     .handler(stub, |ctx: ServerFnCtx| async move {
//!         let input: GreetInput = ctx.data()?;
//!         Ok(format!("Hello, {}!", input.name))
//!     });
//!
//! let message: String = greet.invoke(GreetInput { name: "Ada".into() }).await?;
//! ```
//!
//! ## Control Signals
//!
//! Raising a [`Redirect`] or [`NotFound`] is not a failure: both travel
//! through middleware, the transport and the HTTP boundary untouched and
//! reach the caller exactly as raised.
//!
//! ## Module Structure
//!
//! - [`Middleware`] - Immutable middleware descriptors
//! - [`flatten()`] - Dependency-first middleware ordering
//! - [`MiddlewareRegistry`] - Process-wide middleware applied to every call
//! - [`execute_middleware`] - The chain engine
//! - [`ClientStub`] - Request encoding and response decoding
//! - [`StaticCache`] - Precomputed results for static server functions
//! - [`ServerFnHandler`] - The server HTTP boundary

mod config;
mod context;
mod error;
mod executor;
mod fetcher;
mod flatten;
mod form_data;
mod handler;
pub mod middleware;
mod registry;
mod server_fn;
mod signal;
pub mod static_cache;
pub mod validator;

#[cfg(test)]
mod tests;

// Public API
pub use config::{
    ENV_OUTPUT_PUBLIC_DIR, ENV_RUNTIME, ENV_SERVER_FN_BASE, RuntimeEnv, ServerFnConfig,
};
pub use context::{
    ContextMap, Env, FunctionMeta, Method, MiddlewareCtx, NextOptions, Payload, ServerFnType,
    merge_headers,
};
pub use error::{RpcError, RpcErrorCode, RpcResult, ServerFnError, ServerFnResult};
pub use executor::{execute_middleware, execute_middleware_in};
pub use fetcher::{
    Body, ClientStub, FetchHandler, FetchPayload, PAYLOAD_QUERY_PARAM, PAYLOAD_TYPE_HEADER,
    PayloadType, REDIRECT_HEADER, RETURN_TYPE_HEADER, ReturnType, ServerFnEnvelope, build_request,
    decode_response, fetch_handler,
};
pub use flatten::{DEFAULT_MAX_DEPTH, flatten, flatten_with_limit};
pub use form_data::{FORM_DATA_CONTEXT_FIELD, FormData, FormValue, extract_form_data_context};
pub use handler::{ServerAction, ServerFnHandler, ServerFnManifest};
pub use middleware::{Middleware, MiddlewareFn, MiddlewareId, Next, create_middleware, from_fn};
pub use registry::{MiddlewareRegistry, global as global_registry, register_global_middleware};
pub use server_fn::{
    CallOptions, FullResponse, ServerFn, ServerFnBuilder, ServerFnCtx, ServerInput,
    create_server_fn,
};
pub use signal::{NotFound, Redirect};
pub use static_cache::{
    FsStaticCache, HttpStaticCache, MemoryStaticCache, STATIC_CACHE_PREFIX, StaticCache,
    StaticCachedResult, cache_key_hash, static_cache_path,
};
pub use validator::{
    Parse, StandardResult, StandardSchema, Validate, ValidationIssue, ValidationResult, Validator,
    execute_validator,
};

/// Prelude for convenient imports
///
/// ```rust,ignore
/// use server_fn_rpc::prelude::*;
/// ```
pub mod prelude {
    pub use crate::{
        // Calls
        CallOptions,
        ClientStub,
        // Context
        ContextMap,
        Env,
        FetchHandler,
        FullResponse,
        Method,
        // Middleware
        Middleware,
        MiddlewareCtx,
        Next,
        NextOptions,
        // Signals
        NotFound,
        Payload,
        Redirect,
        // Errors
        RpcError,
        RpcErrorCode,
        RpcResult,
        ServerFn,
        // Configuration
        ServerFnConfig,
        ServerFnCtx,
        ServerFnError,
        // Server boundary
        ServerFnHandler,
        ServerFnManifest,
        ServerFnResult,
        ServerFnType,
        // Validation
        Validate,
        ValidationIssue,
        ValidationResult,
        Validator,
        create_middleware,
        create_server_fn,
        fetch_handler,
        register_global_middleware,
    };
    pub use serde_json::json;
}
