//! Cookie-session demo web app.

use axum::Router;
use axum::middleware::from_fn_with_state;
use axum::response::{Html, IntoResponse, Response};
use axum::routing::get;
use keycloak_session::middleware::{
    SessionAuthConfig, SessionState, auth_routes, require_role, require_session,
};
use keycloak_session::{Environment, Principal};
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let environment = Environment::from_env();
    let state = SessionState::new(SessionAuthConfig::from_env(environment)?);

    let protected = Router::new()
        .route("/index", get(index))
        .route("/admin", get(admin))
        .layer(from_fn_with_state(state.clone(), require_session));

    let app = Router::new()
        .route("/", get(home))
        .merge(auth_routes(&state))
        .merge(protected);

    let addr = std::env::var("LISTEN_ADDR").unwrap_or_else(|_| "127.0.0.1:5002".into());
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!(%addr, ?environment, "Web app listening");
    axum::serve(listener, app).await?;
    Ok(())
}

async fn home() -> Html<&'static str> {
    Html(r#"<a href="/index">Sign in</a>"#)
}

async fn index(principal: Principal) -> String {
    format!("Hello, {}", principal.name().unwrap_or("user"))
}

async fn admin(principal: Principal) -> Response {
    if let Err(e) = require_role(&principal, "admin") {
        return e.into_response();
    }
    "Administrators only".into_response()
}
