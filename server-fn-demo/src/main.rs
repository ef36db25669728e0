//! In-process demo: client server functions talking to a server handler.
//! Run: RUST_LOG=info,server_fn_rpc=debug cargo run -p server-fn-demo

mod rpc;

use rpc::{
    App, CreateUserInput, GetUserInput, GreetInput, HealthResponse, User, avatar_form, bearer,
};
use server_fn_rpc::prelude::*;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Default to INFO, but allow RUST_LOG to override
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(env_filter).init();

    register_global_middleware(vec![rpc::logging()])?;

    let app = App::new(ServerFnConfig::from_env())?;
    tracing::info!(
        "{} server functions under {}",
        app.handler.manifest().len(),
        app.handler.config().server_fn_base
    );
    let fns = &app.client;

    let health: HealthResponse = fns.health.invoke(()).await?;
    tracing::info!("health: {} v{}", health.status, health.version);

    let greeting: String = fns
        .greet
        .invoke(GreetInput {
            name: "World".into(),
        })
        .await?;
    tracing::info!("greet: {}", greeting);

    let alice: User = fns.get_user.invoke(GetUserInput { id: 1 }).await?;
    tracing::info!("user 1: {} <{}>", alice.name, alice.email);

    match fns.get_user.invoke::<_, User>(GetUserInput { id: 42 }).await {
        Err(ServerFnError::NotFound(not_found)) => tracing::info!("user 42: {}", not_found),
        other => tracing::warn!("user 42: unexpected {:?}", other),
    }

    match fns.list_users.call(CallOptions::default()).await {
        Err(ServerFnError::Redirect(redirect)) => {
            tracing::info!("anonymous list: redirect to {}", redirect.target())
        }
        other => tracing::warn!("anonymous list: unexpected {:?}", other),
    }

    let signed_in = bearer("demo-token");
    let created = fns
        .create_user
        .call(
            CallOptions::new(Payload::from_serialize(CreateUserInput {
                name: "Carol".into(),
                email: "carol@example.com".into(),
            })?)
            .with_headers(signed_in.clone()),
        )
        .await?;
    tracing::info!("created: {}", created);

    let users = fns
        .list_users
        .call_full(CallOptions::default().with_headers(signed_in.clone()))
        .await?;
    tracing::info!("users: {}", users.result);

    let upload = fns
        .upload_avatar
        .call(CallOptions::new(avatar_form("carol.png")).with_headers(signed_in.clone()))
        .await?;
    tracing::info!("upload: {}", upload);

    let renamed = fns
        .update_user
        .call(CallOptions::new(json!({"id": 2, "name": "Robert"})).with_headers(signed_in.clone()))
        .await?;
    tracing::info!("updated: {}", renamed);

    let deleted = fns
        .delete_user
        .call(CallOptions::new(json!({"id": 1})).with_headers(signed_in.clone()))
        .await?;
    tracing::info!("deleted: {} ({} users left)", deleted, app.services.db.count_users().await);

    app.services.sessions.revoke("demo-token").await;
    if let Err(e) = fns.list_users.call(CallOptions::default().with_headers(signed_in)).await {
        tracing::info!("after sign-out: {}", e);
    }

    Ok(())
}
