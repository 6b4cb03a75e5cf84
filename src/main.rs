use axum::{Extension, Router};
use std::sync::Arc;
use tower_http::cors::CorsLayer;

mod config;
mod db;
mod handlers;
mod middleware;
mod models;
mod openai_client;
mod services;
mod stripe_client;

use config::AppConfig;
use openai_client::{OpenAiClient, ResponseGenerator};
use services::quota::QuotaPolicy;
use services::turn::TurnService;
use stripe_client::StripeClient;

pub struct AppState {
    pub db_pool: sqlx::PgPool,
    pub config: AppConfig,
    pub turn_service: TurnService,
    pub stripe_client: Option<StripeClient>,
    pub stripe_webhook_secret: Option<String>,
}

#[tokio::main]
async fn main() {
    // Load environment variables from .env file
    dotenvy::dotenv().ok();

    init_logging().expect("Failed to initialize logging");

    let config = AppConfig::from_env();
    tracing::info!(
        message_limit = config.message_limit,
        time_frame = config.time_frame.label(),
        "quota configuration loaded"
    );

    // Create the database connection pool (runs migrations)
    let db_pool = db::create_pool()
        .await
        .expect("Failed to create database pool.");

    // Initialize the response generator if an API key is provided; without
    // one every turn gets the fallback reply
    let generator: Option<Arc<dyn ResponseGenerator>> = match std::env::var("OPENAI_API_KEY").ok()
    {
        Some(api_key) if !api_key.is_empty() => {
            tracing::info!("Initializing OpenAI chat completion client...");
            Some(Arc::new(OpenAiClient::new(api_key)))
        }
        _ => {
            tracing::warn!("OPENAI_API_KEY not found. Bot replies will use the fallback text.");
            None
        }
    };

    // Initialize Stripe client if credentials are provided
    let stripe_client = match std::env::var("STRIPE_SECRET_KEY").ok() {
        Some(secret_key) if !secret_key.is_empty() => {
            tracing::info!("Initializing Stripe billing client...");
            Some(StripeClient::new(secret_key))
        }
        _ => {
            tracing::warn!("STRIPE_SECRET_KEY not found. Premium upgrades will be disabled.");
            None
        }
    };

    let stripe_webhook_secret = std::env::var("STRIPE_WEBHOOK_SECRET").ok();
    if stripe_client.is_some() && stripe_webhook_secret.is_none() {
        tracing::warn!("STRIPE_WEBHOOK_SECRET not set. Checkout webhooks will be rejected.");
    }

    let policy = QuotaPolicy::new(config.message_limit, config.time_frame);
    let turn_service = TurnService::new(db_pool.clone(), policy, generator);

    // Create the shared state
    let shared_state = Arc::new(AppState {
        db_pool,
        config,
        turn_service,
        stripe_client,
        stripe_webhook_secret,
    });

    // Build our application with all routes and shared state
    let app = Router::new()
        .merge(handlers::auth::auth_routes())
        .merge(handlers::chat::chat_routes())
        .merge(handlers::billing::billing_routes())
        .route("/api/status", axum::routing::get(api_status))
        .layer(axum::middleware::from_fn(
            middleware::logging::request_logging_middleware,
        ))
        .layer(CorsLayer::permissive())
        .layer(Extension(shared_state));

    // Run the server with ConnectInfo to provide socket addresses for rate limiting
    let listener = tokio::net::TcpListener::bind("0.0.0.0:3000").await.unwrap();
    tracing::info!("listening on {}", listener.local_addr().unwrap());
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<std::net::SocketAddr>(),
    )
    .await
    .unwrap();
}

// Production-grade logging configuration
fn init_logging() -> Result<(), Box<dyn std::error::Error>> {
    use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

    // Get log level from environment or default to INFO for production
    let log_level = std::env::var("RUST_LOG").unwrap_or_else(|_| {
        if cfg!(debug_assertions) {
            "debug,chatterbox=trace,sqlx=info,reqwest=info,hyper=info,tower=info".to_string()
        } else {
            "info,chatterbox=info,sqlx=warn,reqwest=warn,hyper=warn,tower=warn".to_string()
        }
    });

    let env_filter = EnvFilter::try_from_default_env().or_else(|_| EnvFilter::try_new(&log_level))?;

    // JSON logging for production, human-readable for development
    let fmt_layer = if std::env::var("LOG_FORMAT").as_deref() == Ok("json") {
        fmt::layer()
            .json()
            .with_current_span(true)
            .with_span_list(false)
            .with_target(true)
            .boxed()
    } else {
        fmt::layer()
            .with_target(true)
            .with_file(true)
            .with_line_number(true)
            .boxed()
    };

    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt_layer)
        .init();

    tracing::info!("Chatterbox starting up...");
    tracing::info!("Version: {}", env!("CARGO_PKG_VERSION"));
    tracing::info!(
        "Build mode: {}",
        if cfg!(debug_assertions) {
            "development"
        } else {
            "production"
        }
    );

    Ok(())
}

// API Status endpoint
async fn api_status(
    Extension(state): Extension<Arc<AppState>>,
) -> axum::response::Json<serde_json::Value> {
    use serde_json::json;

    let db_status = match sqlx::query("SELECT 1").fetch_one(&state.db_pool).await {
        Ok(_) => "healthy",
        Err(_) => "unhealthy",
    };

    let billing_status = if state.stripe_client.is_some() {
        "configured"
    } else {
        "not_configured"
    };

    axum::response::Json(json!({
        "status": "operational",
        "version": env!("CARGO_PKG_VERSION"),
        "services": {
            "database": db_status,
            "billing": billing_status,
        },
        "quota": {
            "message_limit": state.config.message_limit,
            "time_frame": state.config.time_frame.label(),
        }
    }))
}
