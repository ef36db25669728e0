//! Chain execution tests
//!
//! Covers context accumulation across links, validator gating per
//! environment, signal passthrough and the order of after-handlers.

use crate::{
    Env, FunctionMeta, Method, MiddlewareCtx, MiddlewareRegistry, NextOptions, Payload, Redirect,
    RpcErrorCode, ServerFnError, ValidationIssue, Validator, create_middleware,
    execute_middleware_in,
};
use proptest::prelude::*;
use serde_json::json;
use std::sync::{Arc, Mutex};

fn ctx(data: serde_json::Value) -> MiddlewareCtx {
    MiddlewareCtx::new(&FunctionMeta::new("chain", "chain.rs"), Method::Post, Payload::Json(data))
}

fn runtime() -> tokio::runtime::Runtime {
    tokio::runtime::Builder::new_current_thread()
        .build()
        .expect("Failed to build runtime")
}

fn rejecting_validator() -> Validator {
    Validator::function(|_input| {
        Err(crate::RpcError::validation_failed(vec![ValidationIssue::required("name")]).into())
    })
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(50))]

    /// Context only grows along the chain and later keys win.
    #[test]
    fn prop_context_accumulates(count in 1usize..8) {
        let chain: Vec<_> = (0..count)
            .map(|i| {
                create_middleware().server(move |_ctx, next| {
                    next.run(NextOptions::new().context(json!({
                        format!("k{}", i): i,
                        "last": i,
                    })))
                })
            })
            .collect();

        let registry = MiddlewareRegistry::new();
        let out = runtime()
            .block_on(execute_middleware_in(&registry, &chain, Env::Server, ctx(json!(null))))
            .unwrap();

        for i in 0..count {
            let key = format!("k{}", i);
            prop_assert_eq!(out.context.get(&key), Some(&json!(i)));
        }
        prop_assert_eq!(out.context.get("last"), Some(&json!(count - 1)));
        prop_assert_eq!(out.context.len(), count + 1);
    }
}

#[tokio::test]
async fn test_validator_runs_on_server_only_by_default() {
    let registry = MiddlewareRegistry::new();
    let mw = create_middleware().input(rejecting_validator());

    let client = execute_middleware_in(&registry, &[mw.clone()], Env::Client, ctx(json!({})))
        .await;
    assert!(client.is_ok());

    let server = execute_middleware_in(&registry, &[mw], Env::Server, ctx(json!({}))).await;
    assert_eq!(server.unwrap_err().code(), Some(RpcErrorCode::ValidationFailed));
}

#[tokio::test]
async fn test_validate_client_runs_validator_on_client() {
    let registry = MiddlewareRegistry::new();
    let mw = create_middleware()
        .input(rejecting_validator())
        .validate_client(true);

    let client = execute_middleware_in(&registry, &[mw], Env::Client, ctx(json!({}))).await;
    assert_eq!(client.unwrap_err().code(), Some(RpcErrorCode::ValidationFailed));
}

#[tokio::test]
async fn test_validator_output_replaces_data() {
    let registry = MiddlewareRegistry::new();
    let trim = create_middleware().input(Validator::function(|input| {
        let name = input.to_json()["name"].as_str().unwrap_or_default().trim().to_string();
        Ok(Payload::Json(json!({ "name": name })))
    }));
    let check = create_middleware().server(|ctx: MiddlewareCtx, next| async move {
        assert_eq!(ctx.data, Payload::Json(json!({"name": "ada"})));
        next.proceed().await
    });

    execute_middleware_in(&registry, &[trim, check], Env::Server, ctx(json!({"name": "  ada "})))
        .await
        .unwrap();
}

#[tokio::test]
async fn test_nested_middleware_context_reaches_parent() {
    let registry = MiddlewareRegistry::new();
    let a = create_middleware()
        .server(|_ctx, next| next.run(NextOptions::new().context(json!({"x": 1}))));
    let b = create_middleware()
        .middleware(vec![a])
        .server(|ctx: MiddlewareCtx, next| async move {
            assert_eq!(ctx.context.get("x"), Some(&json!(1)));
            next.run(NextOptions::new().context(json!({"y": 2}))).await
        });

    let out = execute_middleware_in(&registry, &[b], Env::Server, ctx(json!(null)))
        .await
        .unwrap();
    assert_eq!(serde_json::Value::Object(out.context), json!({"x": 1, "y": 2}));
}

#[tokio::test]
async fn test_redirect_passes_through_unchanged() {
    let registry = MiddlewareRegistry::new();
    let redirect = Redirect::to("/login").with_status(307).with_header("x-reason", "auth");
    let raised = redirect.clone();
    let guard = create_middleware().server(move |_ctx, _next| {
        let raised = raised.clone();
        async move { Err::<MiddlewareCtx, _>(ServerFnError::from(raised)) }
    });
    let outer = create_middleware().server(|_ctx, next| async move {
        let out = next.proceed().await;
        assert!(out.as_ref().is_err_and(ServerFnError::is_control_signal));
        out
    });

    let err = execute_middleware_in(&registry, &[outer, guard], Env::Server, ctx(json!(null)))
        .await
        .unwrap_err();
    assert_eq!(err, ServerFnError::Redirect(redirect));
}

#[tokio::test]
async fn test_client_after_runs_innermost_first() {
    let registry = MiddlewareRegistry::new();
    let log = Arc::new(Mutex::new(Vec::<String>::new()));

    let logged = |name: &'static str| {
        let before = Arc::clone(&log);
        let after = Arc::clone(&log);
        create_middleware()
            .client(move |_ctx, next| {
                before.lock().unwrap().push(name.to_string());
                next.proceed()
            })
            .client_after(move |_ctx, next| {
                after.lock().unwrap().push(format!("{}:after", name));
                next.proceed()
            })
    };
    let chain = vec![logged("a"), logged("b")];

    execute_middleware_in(&registry, &chain, Env::Client, ctx(json!(null)))
        .await
        .unwrap();
    assert_eq!(*log.lock().unwrap(), vec!["a", "b", "b:after", "a:after"]);

    log.lock().unwrap().clear();
    execute_middleware_in(&registry, &chain, Env::Server, ctx(json!(null)))
        .await
        .unwrap();
    assert!(log.lock().unwrap().is_empty());
}

#[tokio::test]
async fn test_client_after_skipped_on_short_circuit() {
    let registry = MiddlewareRegistry::new();
    let log = Arc::new(Mutex::new(Vec::<String>::new()));

    let cached = {
        let before = Arc::clone(&log);
        let after = Arc::clone(&log);
        create_middleware()
            .client(move |mut ctx: MiddlewareCtx, _next| {
                before.lock().unwrap().push("cached".to_string());
                ctx.result = Some(json!("from cache"));
                async move { Ok::<_, ServerFnError>(ctx) }
            })
            .client_after(move |_ctx, next| {
                after.lock().unwrap().push("cached:after".to_string());
                next.proceed()
            })
    };
    let terminal = {
        let log = Arc::clone(&log);
        create_middleware().client(move |_ctx, next| {
            log.lock().unwrap().push("terminal".to_string());
            next.proceed()
        })
    };

    let out = execute_middleware_in(&registry, &[cached, terminal], Env::Client, ctx(json!(null)))
        .await
        .unwrap();
    assert_eq!(out.result, Some(json!("from cache")));
    assert_eq!(*log.lock().unwrap(), vec!["cached"]);
}

#[tokio::test]
async fn test_client_after_runs_when_next_resolves() {
    let registry = MiddlewareRegistry::new();
    let log = Arc::new(Mutex::new(Vec::<String>::new()));

    let mw = {
        let handler_log = Arc::clone(&log);
        let after = Arc::clone(&log);
        create_middleware()
            .client(move |_ctx, next| {
                let log = Arc::clone(&handler_log);
                async move {
                    let out = next.proceed().await?;
                    log.lock().unwrap().push("handler post-next".to_string());
                    Ok::<_, ServerFnError>(out)
                }
            })
            .client_after(move |_ctx, next| {
                after.lock().unwrap().push("after".to_string());
                next.proceed()
            })
    };

    execute_middleware_in(&registry, &[mw], Env::Client, ctx(json!(null)))
        .await
        .unwrap();
    assert_eq!(*log.lock().unwrap(), vec!["after", "handler post-next"]);
}

#[tokio::test]
async fn test_late_registration_is_rejected() {
    let registry = MiddlewareRegistry::new();
    execute_middleware_in(&registry, &[], Env::Server, ctx(json!(null)))
        .await
        .unwrap();

    let err = registry.register(vec![create_middleware()]).unwrap_err();
    assert_eq!(err.code, RpcErrorCode::RegistryLocked);
}
