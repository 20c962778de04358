use axum::{
    http::Method,
    routing::get,
    Router,
};
use std::sync::Arc;
use tower::ServiceBuilder;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod automations;
mod config;
mod database;
mod error;
mod handlers;
mod messaging;
mod services;

pub use error::{ApiError, ApiResult, AppError};

use automations::{
    AutomationEngine, AutomationStore, Dispatcher, PgAutomationStore, RetryCoordinator,
    RetryPolicy,
};
use messaging::{InboundProcessor, PgMessageStore};
use services::{SmsGateway, SmtpMailer};

pub struct AppState {
    pub db_pool: sqlx::PgPool,
    pub automations: Arc<dyn AutomationStore>,
    pub engine: AutomationEngine,
    pub dispatcher: Dispatcher,
    pub retry: RetryCoordinator,
    pub inbound: InboundProcessor,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv::dotenv().ok();

    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = config::Config::from_env()?;
    let db_pool = database::create_pool(&config.database_url).await?;

    database::migrate(&db_pool).await?;

    if !config.smtp.is_configured() {
        tracing::warn!("SMTP is not configured; email steps will fail until it is");
    }
    if !config.sms.is_configured() {
        tracing::warn!("SMS gateway is not configured; SMS steps will fail until it is");
    }

    let sms = Arc::new(SmsGateway::new(&config.sms));
    let email = Arc::new(SmtpMailer::new(&config.smtp).map_err(|e| anyhow::anyhow!(e))?);

    let automation_store: Arc<dyn AutomationStore> =
        Arc::new(PgAutomationStore::new(db_pool.clone()));
    let message_store = Arc::new(PgMessageStore::new(db_pool.clone()));

    let engine = AutomationEngine::new(automation_store.clone());
    let dispatcher = Dispatcher::new(automation_store.clone(), sms, email);
    let retry = RetryCoordinator::new(
        automation_store.clone(),
        dispatcher.clone(),
        RetryPolicy::from_config(&config.automation),
    );
    let inbound = InboundProcessor::new(message_store);

    let app_state = Arc::new(AppState {
        db_pool,
        automations: automation_store,
        engine,
        dispatcher,
        retry,
        inbound,
    });

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST, Method::PUT, Method::DELETE])
        .allow_headers(Any);

    let app = Router::new()
        .route("/", get(|| async { "FieldHub API v1.0.0" }))
        .route("/health", get(handlers::health_check))
        .nest("/api/v1/automations", handlers::automation_routes())
        .nest("/api/v1/webhooks", handlers::webhook_routes())
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(cors),
        )
        .with_state(app_state);

    let listener = tokio::net::TcpListener::bind(&config.server_addr).await?;
    tracing::info!("Server running on {}", config.server_addr);

    axum::serve(listener, app).await?;

    Ok(())
}
