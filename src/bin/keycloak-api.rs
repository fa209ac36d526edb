//! Bearer-protected demo API.

use std::sync::Arc;

use axum::Router;
use axum::routing::get;
use keycloak_session::environment::DEFAULT_BACKCHANNEL_TIMEOUT;
use keycloak_session::{
    BearerConfig, BearerPrincipal, BearerValidator, Environment, backchannel_client,
};
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let environment = Environment::from_env();
    let http = backchannel_client(environment, DEFAULT_BACKCHANNEL_TIMEOUT)?;
    let validator = BearerValidator::discover(BearerConfig::from_env()?, http).await?;

    let app = Router::new()
        .route("/index", get(index))
        .with_state(Arc::new(validator));

    let addr = std::env::var("LISTEN_ADDR").unwrap_or_else(|_| "127.0.0.1:5001".into());
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!(%addr, ?environment, "API listening");
    axum::serve(listener, app).await?;
    Ok(())
}

async fn index(BearerPrincipal(principal): BearerPrincipal) -> String {
    let roles: Vec<&str> = principal.roles().collect();
    format!(
        "Hello, {}! Roles: {}",
        principal.name().unwrap_or("anonymous"),
        roles.join(", ")
    )
}
