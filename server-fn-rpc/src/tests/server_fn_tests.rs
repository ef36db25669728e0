//! End-to-end server function tests
//!
//! Each test builds the server half of a function, serves it through a
//! [`ServerFnHandler`] and calls it from a client half whose transport is the
//! handler itself.

use crate::{
    CallOptions, ClientStub, Env, FetchHandler, FormData, MemoryStaticCache, Method, MiddlewareCtx,
    MiddlewareRegistry, NextOptions, Payload, Redirect, RpcError, RpcErrorCode, RuntimeEnv,
    ServerFn, ServerFnBuilder, ServerFnConfig, ServerFnCtx, ServerFnError, ServerFnHandler,
    ServerFnManifest, ServerFnType, ServerInput, StaticCache, StaticCachedResult, Validator,
    create_middleware, create_server_fn, fetch_handler,
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

#[derive(Debug, Clone, Serialize, Deserialize)]
struct GreetInput {
    name: String,
}

/// Serve `server` and return a transport that routes requests to it.
fn serve(server: &ServerFn) -> (FetchHandler, Arc<AtomicUsize>) {
    let handler =
        ServerFnHandler::new(ServerFnManifest::new().register(server), ServerFnConfig::default())
            .unwrap();
    let requests = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&requests);
    let transport = fetch_handler(move |request| {
        let handler = handler.clone();
        counter.fetch_add(1, Ordering::SeqCst);
        async move { Ok(handler.handle(request).await) }
    });
    (transport, requests)
}

/// Build both halves of a function from the same definition.
fn pair<F>(id: &str, define: F) -> (ServerFn, ServerFn, Arc<AtomicUsize>)
where
    F: Fn(ServerFnBuilder, ClientStub) -> ServerFn,
{
    let builder = || create_server_fn().registry(Arc::new(MiddlewareRegistry::new()));
    let server = define(builder(), ClientStub::detached(id, "tests.rs"));
    let (transport, requests) = serve(&server);
    let client = define(builder(), ClientStub::new(id, "tests.rs", transport));
    (client, server, requests)
}

fn auth() -> crate::Middleware {
    create_middleware()
        .client(|_ctx, next| {
            next.run(
                NextOptions::new()
                    .context(json!({"clientOnly": true}))
                    .send_context(json!({"token": "secret"})),
            )
        })
        .server(|ctx: MiddlewareCtx, next| async move {
            let token: Option<String> = ctx.context_value("token");
            if token.as_deref() != Some("secret") {
                return Err(RpcError::unauthorized("Missing token").into());
            }
            next.run(
                NextOptions::new()
                    .context(json!({"user": "ada"}))
                    .send_context(json!({"servedBy": "node-1"})),
            )
            .await
        })
}

#[tokio::test]
async fn test_call_round_trip_with_context() {
    let (client, _server, requests) = pair("greet", |builder, stub| {
        builder
            .middleware(vec![auth()])
            .input(Validator::typed::<GreetInput>())
            .handler(stub, |ctx: ServerFnCtx| async move {
                let input: GreetInput = ctx.data()?;
                let user: String = ctx.context_value("user").unwrap_or_default();
                Ok(json!({
                    "greeting": format!("Hello {} from {}", input.name, user),
                    "sawClientOnly": ctx.context.contains_key("clientOnly"),
                }))
            })
    });

    let response = client
        .call_full(CallOptions::new(json!({"name": "Grace"})))
        .await
        .unwrap();

    assert_eq!(
        response.result,
        json!({"greeting": "Hello Grace from ada", "sawClientOnly": false})
    );
    assert_eq!(response.context.get("servedBy"), Some(&json!("node-1")));
    assert_eq!(response.context.get("clientOnly"), Some(&json!(true)));
    assert_eq!(requests.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_post_invoke_deserializes_result() {
    let (client, _server, _) = pair("shout", |builder, stub| {
        builder
            .method(Method::Post)
            .input(Validator::typed::<GreetInput>())
            .handler(stub, |ctx: ServerFnCtx| async move {
                let input: GreetInput = ctx.data()?;
                Ok(input.name.to_uppercase())
            })
    });

    let shouted: String = client
        .invoke(GreetInput {
            name: "ada".to_string(),
        })
        .await
        .unwrap();
    assert_eq!(shouted, "ADA");
}

#[tokio::test]
async fn test_server_validation_failure_reaches_client() {
    let (client, _server, _) = pair("strict", |builder, stub| {
        builder
            .input(Validator::typed::<GreetInput>())
            .handler(stub, |_ctx: ServerFnCtx| async move { Ok(()) })
    });

    let err = client.call(CallOptions::new(json!({}))).await.unwrap_err();
    let ServerFnError::Rpc(err) = err else {
        panic!("expected an rpc error, got {:?}", err);
    };
    assert_eq!(err.code, RpcErrorCode::RequestFailed);
    assert_eq!(err.details.unwrap()["code"], "VALIDATION_FAILED");
}

#[tokio::test]
async fn test_client_validation_skips_the_network() {
    let (client, _server, requests) = pair("checked", |builder, stub| {
        builder
            .input(Validator::function(|input: Payload| {
                if input.to_json().get("name").is_some() {
                    Ok(input)
                } else {
                    let issues = vec![crate::ValidationIssue::required("name")];
                    Err(RpcError::validation_failed(issues).into())
                }
            }))
            .validate_client(true)
            .handler(stub, |_ctx: ServerFnCtx| async move { Ok(()) })
    });

    let err = client.call(CallOptions::new(json!({}))).await.unwrap_err();
    assert_eq!(err.code(), Some(RpcErrorCode::ValidationFailed));
    assert_eq!(requests.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_redirect_reaches_caller_unchanged() {
    let (client, _server, _) = pair("guarded", |builder, stub| {
        let guard = create_middleware().server(|_ctx, _next| async move {
            Err::<MiddlewareCtx, ServerFnError>(Redirect::to("/login").with_status(307).into())
        });
        builder
            .middleware(vec![guard])
            .handler(stub, |_ctx: ServerFnCtx| async move { Ok("unreachable") })
    });

    let err = client.call(CallOptions::default()).await.unwrap_err();
    assert_eq!(
        err,
        ServerFnError::Redirect(Redirect::to("/login").with_status(307))
    );
}

#[tokio::test]
async fn test_form_data_carries_send_context() {
    let (client, _server, _) = pair("upload", |builder, stub| {
        let tag = create_middleware()
            .client(|_ctx, next| next.run(NextOptions::new().send_context(json!({"user": 7}))));
        builder
            .method(Method::Post)
            .middleware(vec![tag])
            .handler(stub, |ctx: ServerFnCtx| async move {
                let form = ctx.data.as_form_data().cloned().unwrap_or_default();
                Ok(json!({
                    "file": form.get("file").and_then(|v| v.as_text()).map(str::to_string),
                    "user": ctx.context.get("user"),
                    "fields": form.len(),
                }))
            })
    });

    let result = client
        .call(CallOptions::new(FormData::new().with("file", "avatar.png")))
        .await
        .unwrap();
    assert_eq!(result, json!({"file": "avatar.png", "user": 7, "fields": 1}));
}

#[tokio::test]
async fn test_static_function_runs_once_per_input() {
    let runs = Arc::new(AtomicUsize::new(0));
    let cache = Arc::new(MemoryStaticCache::new());
    let counter = Arc::clone(&runs);
    let server = create_server_fn()
        .registry(Arc::new(MiddlewareRegistry::new()))
        .fn_type(ServerFnType::Static)
        .static_cache(cache.clone())
        .handler(ClientStub::detached("stats", "tests.rs"), move |ctx: ServerFnCtx| {
            let counter = Arc::clone(&counter);
            async move {
                let n = counter.fetch_add(1, Ordering::SeqCst);
                if ctx.data.to_json()["fail"] == true {
                    return Err(RpcError::conflict("stale").into());
                }
                Ok(n)
            }
        });

    let input = |data: serde_json::Value| ServerInput {
        data: Payload::Json(data),
        ..Default::default()
    };

    let first = server.execute_server(input(json!({"page": 1}))).await.unwrap();
    let second = server.execute_server(input(json!({"page": 1}))).await.unwrap();
    assert_eq!(first, second);
    assert_eq!(runs.load(Ordering::SeqCst), 1);

    let failed = server.execute_server(input(json!({"fail": true}))).await.unwrap_err();
    let replayed = server.execute_server(input(json!({"fail": true}))).await.unwrap_err();
    assert_eq!(failed, replayed);
    assert_eq!(failed.code(), Some(RpcErrorCode::Conflict));
    assert_eq!(runs.load(Ordering::SeqCst), 2);
    assert_eq!(cache.len().await, 2);
}

#[tokio::test]
async fn test_production_client_reads_static_cache() {
    let cache = Arc::new(MemoryStaticCache::new());
    let (client, _server, requests) = pair("page", |builder, stub| {
        builder
            .fn_type_with(|ctx: &MiddlewareCtx| match ctx.data.to_json()["id"].as_u64() {
                Some(id) if id < 10 => ServerFnType::Static,
                _ => ServerFnType::Dynamic,
            })
            .static_cache(cache.clone())
            .config(ServerFnConfig::default().with_environment(RuntimeEnv::Production))
            .handler(stub, |_ctx: ServerFnCtx| async move { Ok("live") })
    });

    let mut precomputed =
        MiddlewareCtx::new(client.meta(), Method::Get, Payload::Json(json!({"id": 1})));
    precomputed.fn_type = ServerFnType::Static;
    cache
        .set_item(
            &precomputed,
            &StaticCachedResult::success(crate::ServerFnEnvelope {
                result: json!("prebuilt"),
                context: Default::default(),
            }),
        )
        .await
        .unwrap();

    assert_eq!(client.call(CallOptions::new(json!({"id": 1}))).await.unwrap(), json!("prebuilt"));
    assert_eq!(requests.load(Ordering::SeqCst), 0);

    // Static but never precomputed: falls back to the server.
    assert_eq!(client.call(CallOptions::new(json!({"id": 2}))).await.unwrap(), json!("live"));
    assert_eq!(requests.load(Ordering::SeqCst), 1);

    assert_eq!(client.call(CallOptions::new(json!({"id": 42}))).await.unwrap(), json!("live"));
    assert_eq!(requests.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn test_client_only_build_rejects_server_execution() {
    let client_only = create_server_fn()
        .registry(Arc::new(MiddlewareRegistry::new()))
        .client_handler(ClientStub::detached("remote", "tests.rs"));

    let err = client_only.execute_server(ServerInput::default()).await.unwrap_err();
    assert_eq!(err.code(), Some(RpcErrorCode::ServerFnCalledFromClient));
}

#[tokio::test]
async fn test_detached_stub_cannot_send() {
    let server = create_server_fn()
        .registry(Arc::new(MiddlewareRegistry::new()))
        .handler(ClientStub::detached("local", "tests.rs"), |_ctx: ServerFnCtx| async move {
            Ok(1)
        });

    let err = server.call(CallOptions::default()).await.unwrap_err();
    assert_eq!(err.code(), Some(RpcErrorCode::TransportError));
}

#[tokio::test]
async fn test_fetch_args_calls_plain_action() {
    let manifest = ServerFnManifest::new().register_action("sum", |input: ServerInput| async move {
        let total: i64 = input
            .data
            .to_json()
            .as_array()
            .map(|args| args.iter().filter_map(serde_json::Value::as_i64).sum())
            .unwrap_or_default();
        Ok::<_, ServerFnError>(crate::ServerFnEnvelope {
            result: json!(total),
            context: Default::default(),
        })
    });
    let handler = ServerFnHandler::new(manifest, ServerFnConfig::default()).unwrap();
    let transport = fetch_handler(move |request| {
        let handler = handler.clone();
        async move { Ok(handler.handle(request).await) }
    });

    let stub = ClientStub::new("sum", "tests.rs", transport);
    assert_eq!(stub.fetch_args(vec![json!(1), json!(2), json!(39)]).await.unwrap(), json!(42));
}

#[tokio::test]
async fn test_server_middleware_sees_client_env_only_on_client() {
    let seen = Arc::new(std::sync::Mutex::new(Vec::<Env>::new()));
    let (client, _server, _) = pair("envs", |builder, stub| {
        let client_seen = Arc::clone(&seen);
        let server_seen = Arc::clone(&seen);
        let recorder = create_middleware()
            .client(move |_ctx, next| {
                client_seen.lock().unwrap().push(Env::Client);
                next.proceed()
            })
            .server(move |_ctx, next| {
                server_seen.lock().unwrap().push(Env::Server);
                next.proceed()
            });
        builder
            .middleware(vec![recorder])
            .handler(stub, |_ctx: ServerFnCtx| async move { Ok(()) })
    });

    client.call(CallOptions::default()).await.unwrap();
    assert_eq!(*seen.lock().unwrap(), vec![Env::Client, Env::Server]);
}

#[tokio::test]
async fn test_builder_config_sets_client_url() {
    let config = ServerFnConfig::default().with_server_fn_base("/api/fns");
    let builder = || {
        create_server_fn()
            .registry(Arc::new(MiddlewareRegistry::new()))
            .config(config.clone())
    };
    let body = |_ctx: ServerFnCtx| async move { Ok::<_, ServerFnError>("configured") };

    let server = builder().handler(ClientStub::detached("getX", "tests.rs"), body);
    let handler =
        ServerFnHandler::new(ServerFnManifest::new().register(&server), config.clone()).unwrap();
    let transport = fetch_handler(move |request| {
        let handler = handler.clone();
        async move { Ok(handler.handle(request).await) }
    });

    let client = builder().handler(ClientStub::new("getX", "tests.rs", transport.clone()), body);
    assert_eq!(client.url(), "/api/fns/getX");
    assert_eq!(client.call(CallOptions::default()).await.unwrap(), json!("configured"));

    let pinned = builder().handler(
        ClientStub::new("getX", "tests.rs", transport).with_url("/elsewhere/getX"),
        body,
    );
    assert_eq!(pinned.url(), "/elsewhere/getX");
}

#[tokio::test]
async fn test_computed_type_sees_client_context() {
    let cache = Arc::new(MemoryStaticCache::new());
    let (client, _server, requests) = pair("report", |builder, stub| {
        let prerender = create_middleware().client(|_ctx, next| {
            next.run(NextOptions::new().context(json!({"prerendered": true})))
        });
        builder
            .middleware(vec![prerender])
            .fn_type_with(|ctx: &MiddlewareCtx| {
                if ctx.context_value::<bool>("prerendered").unwrap_or(false) {
                    ServerFnType::Static
                } else {
                    ServerFnType::Dynamic
                }
            })
            .static_cache(cache.clone())
            .config(ServerFnConfig::default().with_environment(RuntimeEnv::Production))
            .handler(stub, |_ctx: ServerFnCtx| async move { Ok("live") })
    });

    let mut precomputed =
        MiddlewareCtx::new(client.meta(), Method::Get, Payload::Json(json!({"id": 1})));
    precomputed.fn_type = ServerFnType::Static;
    cache
        .set_item(
            &precomputed,
            &StaticCachedResult::success(crate::ServerFnEnvelope {
                result: json!("prebuilt"),
                context: Default::default(),
            }),
        )
        .await
        .unwrap();

    assert_eq!(client.call(CallOptions::new(json!({"id": 1}))).await.unwrap(), json!("prebuilt"));
    assert_eq!(requests.load(Ordering::SeqCst), 0);
}
