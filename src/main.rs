use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;

use anyhow::Context;
use dotenvy::dotenv;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::info;
use tracing_subscriber::EnvFilter;

use deskserver::api_router::configure_api_routes;
use deskserver::config::AppConfig;
use deskserver::directory::lookup::{HttpPersonLookup, NoopPersonLookup, PersonLookup};
use deskserver::security::jwt::JwtManager;
use deskserver::security::middleware::authentication_middleware;
use deskserver::shared::state::AppState;
use deskserver::shared::utils::{create_conn, run_migrations};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("deskserver=info,tower_http=info")),
        )
        .init();

    let config = AppConfig::load().context("Failed to load configuration")?;

    let pool = create_conn(&config.database.url).context("Failed to create connection pool")?;
    run_migrations(&pool)?;

    let jwt = Arc::new(JwtManager::new(&config.jwt));
    let persons: Arc<dyn PersonLookup> = match &config.person_service.base_url {
        Some(url) => {
            info!("person enrichment via {url}");
            Arc::new(HttpPersonLookup::new(url.clone()))
        }
        None => Arc::new(NoopPersonLookup),
    };

    let state = Arc::new(AppState::new(pool, config.clone(), jwt, persons));

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let app = configure_api_routes()
        .layer(axum::middleware::from_fn_with_state(
            state.clone(),
            authentication_middleware,
        ))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state);

    let host: IpAddr = config
        .server
        .host
        .parse()
        .with_context(|| format!("Invalid listen host {:?}", config.server.host))?;
    let addr = SocketAddr::new(host, config.server.port);

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind to {addr} - is another instance running?"))?;
    info!("HTTP server listening on {addr}");

    axum::serve(listener, app.into_make_service())
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")
}

async fn shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
    info!("Shutting down...");
}
