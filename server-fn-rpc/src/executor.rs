//! Middleware execution engine
//!
//! Runs a flattened chain in one environment. Each link receives the
//! current context and a [`Next`] continuation; the link decides when (and
//! whether) the rest of the chain runs, which lets a single handler hold
//! both "before" and "after" logic.

use crate::context::{Env, MiddlewareCtx};
use crate::error::ServerFnResult;
use crate::flatten::flatten;
use crate::middleware::{Middleware, Next};
use crate::registry::{self, MiddlewareRegistry};
use futures::future::BoxFuture;
use std::sync::Arc;

/// Run `middlewares`, preceded by the global registry, in `env`.
///
/// Errors and control signals raised by any validator or handler abort the
/// chain and are returned unchanged.
pub async fn execute_middleware(
    middlewares: &[Middleware],
    env: Env,
    ctx: MiddlewareCtx,
) -> ServerFnResult<MiddlewareCtx> {
    execute_middleware_in(registry::global(), middlewares, env, ctx).await
}

/// [`execute_middleware`] against an explicit registry.
pub async fn execute_middleware_in(
    registry: &MiddlewareRegistry,
    middlewares: &[Middleware],
    env: Env,
    ctx: MiddlewareCtx,
) -> ServerFnResult<MiddlewareCtx> {
    let mut all = registry.seal();
    all.extend_from_slice(middlewares);
    let chain = Arc::new(flatten(&all)?);

    tracing::debug!(
        function = %ctx.function_id,
        env = %env,
        links = chain.len(),
        "Executing middleware chain"
    );

    let function_id = ctx.function_id.clone();
    let result = dispatch(chain, 0, env, ctx).await;
    if let Err(e) = &result {
        if e.is_control_signal() {
            tracing::debug!(
                function = %function_id,
                env = %env,
                signal = %e,
                "Middleware chain raised a signal"
            );
        } else {
            tracing::debug!(
                function = %function_id,
                env = %env,
                error = %e,
                "Middleware chain failed"
            );
        }
    }
    result
}

fn dispatch(
    chain: Arc<Vec<Middleware>>,
    index: usize,
    env: Env,
    mut ctx: MiddlewareCtx,
) -> BoxFuture<'static, ServerFnResult<MiddlewareCtx>> {
    Box::pin(async move {
        let Some(middleware) = chain.get(index).cloned() else {
            return Ok(ctx);
        };

        if let Some(validator) = middleware.validator() {
            if env == Env::Server || middleware.validates_on_client() {
                ctx.data = validator.execute(std::mem::take(&mut ctx.data))?;
            }
        }

        let handler = match env {
            Env::Client => middleware.client_fn(),
            Env::Server => middleware.server_fn(),
        };
        // The after-hook belongs to the continuation: it fires only once the
        // remainder of the chain has resolved, never on a short-circuit.
        let after = match env {
            Env::Client => middleware.client_after_fn().cloned(),
            Env::Server => None,
        };
        let rest = {
            let chain = Arc::clone(&chain);
            move |ctx: MiddlewareCtx| -> BoxFuture<'static, ServerFnResult<MiddlewareCtx>> {
                Box::pin(async move {
                    let ctx = dispatch(chain, index + 1, env, ctx).await?;
                    match after {
                        Some(after) => after(ctx.clone(), Next::identity(ctx)).await,
                        None => Ok(ctx),
                    }
                })
            }
        };

        match handler {
            Some(handler) => handler(ctx.clone(), Next::new(ctx, rest)).await,
            None => rest(ctx).await,
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::{FunctionMeta, Method, NextOptions, Payload};
    use crate::middleware::create_middleware;
    use serde_json::json;

    fn ctx() -> MiddlewareCtx {
        MiddlewareCtx::new(&FunctionMeta::new("fn", "file.rs"), Method::Post, Payload::empty())
    }

    #[tokio::test]
    async fn test_empty_chain_returns_context() {
        let registry = MiddlewareRegistry::new();
        let out = execute_middleware_in(&registry, &[], Env::Server, ctx()).await.unwrap();
        assert!(out.context.is_empty());
        assert!(out.result.is_none());
        assert!(registry.is_sealed());
    }

    #[tokio::test]
    async fn test_short_circuit_skips_rest() {
        let registry = MiddlewareRegistry::new();
        let stop = create_middleware().server(|mut ctx: MiddlewareCtx, _next| async move {
            ctx.result = Some(json!("stopped"));
            Ok(ctx)
        });
        let never = create_middleware().server(|_ctx, _next| async move {
            Err(crate::error::ServerFnError::from(crate::error::RpcError::internal(
                "should not run",
            )))
        });

        let out = execute_middleware_in(&registry, &[stop, never], Env::Server, ctx())
            .await
            .unwrap();
        assert_eq!(out.result, Some(json!("stopped")));
    }

    #[tokio::test]
    async fn test_environment_selects_handler() {
        let registry = MiddlewareRegistry::new();
        let mw = create_middleware()
            .client(|_ctx, next| next.run(NextOptions::new().context(json!({"side": "client"}))))
            .server(|_ctx, next| next.run(NextOptions::new().context(json!({"side": "server"}))));

        let client = execute_middleware_in(&registry, &[mw.clone()], Env::Client, ctx())
            .await
            .unwrap();
        let server = execute_middleware_in(&registry, &[mw], Env::Server, ctx())
            .await
            .unwrap();
        assert_eq!(client.context.get("side"), Some(&json!("client")));
        assert_eq!(server.context.get("side"), Some(&json!("server")));
    }

    #[tokio::test]
    async fn test_global_registry_runs_first() {
        let registry = MiddlewareRegistry::new();
        let global = create_middleware().server(|_ctx, next| {
            next.run(NextOptions::new().context(json!({"order": ["global"]})))
        });
        registry.register(vec![global]).unwrap();

        let local = create_middleware().server(|ctx: MiddlewareCtx, next| {
            let mut order = ctx.context_value::<Vec<String>>("order").unwrap_or_default();
            order.push("local".to_string());
            next.run(NextOptions::new().context(json!({ "order": order })))
        });

        let out = execute_middleware_in(&registry, &[local], Env::Server, ctx())
            .await
            .unwrap();
        assert_eq!(out.context.get("order"), Some(&json!(["global", "local"])));
    }
}
