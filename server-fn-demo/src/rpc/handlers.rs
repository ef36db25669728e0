//! Server functions and middleware
//!
//! Every function is defined once by [`define`]. The server build passes
//! detached stubs, the client build passes stubs wired to the transport.

use super::*;
use server_fn_rpc::prelude::*;
use server_fn_rpc::{FormData, RpcResult};
use std::time::Instant;

/// Source file the functions are declared in; part of each static cache key.
const FILENAME: &str = "src/rpc/handlers.rs";

// =============================================================================
// Middleware
// =============================================================================

/// Logging middleware - logs every call on both sides of the network
pub fn logging() -> Middleware {
    create_middleware()
        .label("logging")
        .client(|ctx: MiddlewareCtx, next| async move {
            let start = Instant::now();
            tracing::info!("→ [client] {} {}", ctx.method, ctx.function_id);
            let result = next.proceed().await;
            match &result {
                Ok(_) => tracing::info!("← [client] {} ({:?})", ctx.function_id, start.elapsed()),
                Err(e) if e.is_control_signal() => {
                    tracing::info!("↪ [client] {} - {}", ctx.function_id, e)
                }
                Err(e) => tracing::warn!(
                    "✗ [client] {} - {} ({:?})",
                    ctx.function_id,
                    e,
                    start.elapsed()
                ),
            }
            result
        })
        .server(|ctx: MiddlewareCtx, next| async move {
            let start = Instant::now();
            let result = next.proceed().await;
            let elapsed = start.elapsed();
            match &result {
                Ok(_) => tracing::info!("[server] {} ({:?})", ctx.function_id, elapsed),
                Err(e) => tracing::info!("[server] {} - {} ({:?})", ctx.function_id, e, elapsed),
            }
            result
        })
}

/// Auth middleware - forwards the bearer token and resolves it on the server
pub fn auth(sessions: SessionStore) -> Middleware {
    create_middleware()
        .label("auth")
        .client(|ctx: MiddlewareCtx, next| async move {
            let token = ctx
                .headers
                .get(http::header::AUTHORIZATION)
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.strip_prefix("Bearer "))
                .map(str::to_string);
            next.run(NextOptions::new().send_context(json!({ "token": token })))
                .await
        })
        .server(move |ctx: MiddlewareCtx, next| {
            let sessions = sessions.clone();
            async move {
                let token: Option<String> = ctx.context_value("token");
                let user = match token {
                    Some(token) => sessions.resolve(&token).await,
                    None => None,
                };
                let Some(user) = user else {
                    return Err(Redirect::to("/login").into());
                };
                next.run(NextOptions::new().context(json!({ "user": user })))
                    .await
            }
        })
}

// =============================================================================
// Server functions
// =============================================================================

/// All server functions of the app
#[derive(Clone, Debug)]
pub struct ServerFns {
    pub health: ServerFn,
    pub greet: ServerFn,
    pub get_user: ServerFn,
    pub list_users: ServerFn,
    pub create_user: ServerFn,
    pub update_user: ServerFn,
    pub delete_user: ServerFn,
    pub upload_avatar: ServerFn,
}

impl ServerFns {
    /// Manifest serving the server half of every function.
    pub fn manifest(&self) -> ServerFnManifest {
        [
            &self.health,
            &self.greet,
            &self.get_user,
            &self.list_users,
            &self.create_user,
            &self.update_user,
            &self.delete_user,
            &self.upload_avatar,
        ]
        .into_iter()
        .fold(ServerFnManifest::new(), |manifest, f| manifest.register(f))
    }
}

/// Declare every server function against `stub`.
pub fn define(services: &AppServices, stub: impl Fn(&str) -> ClientStub) -> ServerFns {
    let db = services.db.clone();
    let authed = vec![auth(services.sessions.clone())];

    ServerFns {
        health: create_server_fn()
            .fn_type(ServerFnType::Static)
            .handler(stub("health"), |_ctx: ServerFnCtx| async move {
                Ok(HealthResponse {
                    status: "ok".into(),
                    version: env!("CARGO_PKG_VERSION").into(),
                })
            }),

        greet: create_server_fn()
            .input(Validator::typed::<GreetInput>())
            .handler(stub("greet"), |ctx: ServerFnCtx| async move {
                let input: GreetInput = ctx.data()?;
                if input.name.is_empty() {
                    return Err(RpcError::bad_request("Name cannot be empty").into());
                }
                Ok(format!("Hello, {}! 👋", input.name))
            }),

        get_user: create_server_fn()
            .input(Validator::typed::<GetUserInput>())
            .handler(stub("getUser"), {
                let db = db.clone();
                move |ctx: ServerFnCtx| {
                    let db = db.clone();
                    async move {
                        let input: GetUserInput = ctx.data()?;
                        match db.get_user(input.id).await {
                            Some(user) => Ok(user),
                            None => Err(NotFound::new()
                                .for_route("/users/$id")
                                .with_data(json!({ "id": input.id }))
                                .into()),
                        }
                    }
                }
            }),

        list_users: create_server_fn()
            .middleware(authed.clone())
            .handler(stub("listUsers"), {
                let db = db.clone();
                move |_ctx: ServerFnCtx| {
                    let db = db.clone();
                    async move { Ok(db.list_users().await) }
                }
            }),

        create_user: create_server_fn()
            .method(Method::Post)
            .middleware(authed.clone())
            .input(Validator::schema::<CreateUserInput>())
            .validate_client(true)
            .handler(stub("createUser"), {
                let db = db.clone();
                move |ctx: ServerFnCtx| {
                    let db = db.clone();
                    async move {
                        let input: CreateUserInput = ctx.data()?;
                        let creator: String = ctx.context_value("user").unwrap_or_default();
                        tracing::info!("{} creates user {}", creator, input.name);
                        Ok(db.create_user(&input.name, &input.email).await)
                    }
                }
            }),

        update_user: create_server_fn()
            .method(Method::Post)
            .middleware(authed.clone())
            .input(Validator::schema::<UpdateUserInput>())
            .handler(stub("updateUser"), {
                let db = db.clone();
                move |ctx: ServerFnCtx| {
                    let db = db.clone();
                    async move {
                        let input: UpdateUserInput = ctx.data()?;
                        db.update_user(input.id, input.name.as_deref(), input.email.as_deref())
                            .await
                            .ok_or_else(|| {
                                ServerFnError::from(RpcError::not_found(format!(
                                    "User {} not found",
                                    input.id
                                )))
                            })
                    }
                }
            }),

        delete_user: create_server_fn()
            .method(Method::Post)
            .middleware(authed.clone())
            .input(Validator::typed::<DeleteUserInput>())
            .handler(stub("deleteUser"), {
                let db = db.clone();
                move |ctx: ServerFnCtx| {
                    let db = db.clone();
                    async move {
                        let input: DeleteUserInput = ctx.data()?;
                        if db.delete_user(input.id).await {
                            Ok(SuccessResponse::ok(format!("User {} deleted", input.id)))
                        } else {
                            Err(RpcError::not_found(format!("User {} not found", input.id)).into())
                        }
                    }
                }
            }),

        upload_avatar: create_server_fn()
            .method(Method::Post)
            .middleware(authed)
            .handler(stub("uploadAvatar"), |ctx: ServerFnCtx| async move {
                let form = ctx
                    .data
                    .as_form_data()
                    .ok_or_else(|| RpcError::bad_request("Expected a form upload"))?;
                let file = form
                    .get("file")
                    .and_then(|v| v.as_text())
                    .ok_or_else(|| RpcError::bad_request("file is required"))?;
                let user: String = ctx.context_value("user").unwrap_or_default();
                Ok(SuccessResponse::ok(format!("Stored {} for {}", file, user)))
            }),
    }
}

// =============================================================================
// App wiring
// =============================================================================

/// Client functions connected in-process to a server handler
pub struct App {
    pub services: AppServices,
    pub handler: ServerFnHandler,
    pub client: ServerFns,
}

impl App {
    pub fn new(config: ServerFnConfig) -> RpcResult<Self> {
        let services = AppServices::new();

        let server = define(&services, |id| ClientStub::detached(id, FILENAME));
        let handler = ServerFnHandler::new(server.manifest(), config)?;
        tracing::info!("Serving server functions: {:?}", handler.manifest().functions());

        let transport = {
            let handler = handler.clone();
            fetch_handler(move |request| {
                let handler = handler.clone();
                async move { Ok(handler.handle(request).await) }
            })
        };
        let client = define(&services, |id| {
            ClientStub::new(id, FILENAME, transport.clone()).configured(handler.config())
        });

        Ok(Self {
            services,
            handler,
            client,
        })
    }
}

/// Headers of a signed-in caller.
pub fn bearer(token: &str) -> http::HeaderMap {
    let mut headers = http::HeaderMap::new();
    if let Ok(value) = format!("Bearer {}", token).parse() {
        headers.insert(http::header::AUTHORIZATION, value);
    }
    headers
}

/// Form payload for [`ServerFns::upload_avatar`].
pub fn avatar_form(file: &str) -> FormData {
    FormData::new().with("file", file)
}
