use std::panic;
use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

use codesync_relay::clients::judge_client;
use codesync_relay::clients::session_store_client;
use codesync_relay::config::{self, Config};
use codesync_relay::docs::ApiDoc;
use codesync_relay::relay::registry::{RoomRegistry, SweepHook};
use codesync_relay::relay::server;
use codesync_relay::routes::api::create_api_routes;

#[tokio::main]
async fn main() {
    // Set panic hook for better error messages
    panic::set_hook(Box::new(|info| {
        eprintln!("PANIC: {info}");
    }));

    // Initialize tracing
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| {
            "codesync_relay=debug,tower_http=debug,axum::rejection=trace,info".into()
        }))
        .init();

    info!("Starting server...");

    // Load configuration
    let config = config::Config::load().unwrap_or_else(|e| {
        error!("Failed to load configuration: {}", e);
        warn!("Using default configuration");
        Config::default()
    });
    if config.jwt_secret.is_none() {
        warn!("No JWT secret configured - every connection will be refused");
    }
    let config = config::init_config(config);

    // Execution proxy
    if let Err(e) = judge_client::init_judge_client(
        config.judge_api_url.clone(),
        config.judge_api_key.clone(),
    ) {
        error!("Failed to initialize judge client: {}", e);
    }

    // Best-effort snapshot push to the session store, if configured
    let mut registry = RoomRegistry::new(Duration::from_secs(config.room_grace_secs));
    if let (Some(store_url), Some(secret)) = (&config.session_store_url, &config.jwt_secret) {
        match session_store_client::init_session_store_client(store_url.clone(), secret.clone()) {
            Ok(()) => {
                let hook: SweepHook = Arc::new(|room, text| {
                    Box::pin(session_store_client::push_snapshot(room, text))
                });
                registry = registry.with_sweep_hook(hook);
                info!("Session store snapshot push enabled: {}", store_url);
            }
            Err(e) => error!("Failed to initialize session store client: {}", e),
        }
    } else {
        info!("No session store configured - swept rooms are discarded");
    }
    let registry = Arc::new(registry);

    // Combine all routes
    let app_routes = Router::new()
        // Mount API routes
        .nest("/api", create_api_routes())
        // Mount Swagger UI
        .merge(SwaggerUi::new("/swagger").url("/api-docs/openapi.json", ApiDoc::openapi()))
        // Add tracing layer
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive());

    // Start the relay WebSocket server
    let ws_addr = format!("{}:{}", config.host, config.websocket_port());
    let ws_listener = tokio::net::TcpListener::bind(&ws_addr)
        .await
        .unwrap_or_else(|_| panic!("Failed to bind relay server to {}", ws_addr));

    info!("Relay WebSocket server starting on ws://{}", ws_addr);

    let relay_registry = registry.clone();
    tokio::spawn(async move {
        if let Err(e) = server::serve_incoming(ws_listener, relay_registry).await {
            error!("Relay server error: {}", e);
        }
    });

    // Start the HTTP/API server
    let listener = tokio::net::TcpListener::bind(config.server_address())
        .await
        .unwrap_or_else(|_| panic!("Failed to bind to {}", config.server_address()));

    info!("Server running on http://{}", config.server_address());
    info!("Relay available at ws://{}", ws_addr);
    info!("Swagger UI available at http://{}/swagger", config.server_address());

    axum::serve(listener, app_routes)
        .await
        .expect("Server failed to start");
}
