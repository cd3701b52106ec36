// src/main.rs

// Declare modules for the application
mod config;
mod errors;
mod lifecycle;
mod models;
mod payments;
mod services;
mod state;
mod store;
mod web;

use crate::config::AppConfig;
use crate::services::gateway::PaymentGateways;
use crate::services::notifications::{MailApiTransport, NotificationTransport};
use crate::services::ratelimit::FixedWindowLimiter;
use crate::state::AppState;
use crate::store::{OrderStore, PgOrderStore};

use actix_web::{web as actix_data, App, HttpServer};
use sqlx::PgPool;
use std::sync::Arc;
use tracing::Level;
use tracing_subscriber::fmt::format::FmtSpan;

#[actix_web::main]
async fn main() -> std::io::Result<()> {
  // Initialize tracing subscriber for logging
  tracing_subscriber::fmt()
    .with_max_level(Level::INFO) // Default level
    .with_env_filter(tracing_subscriber::EnvFilter::from_default_env()) // Allow RUST_LOG override
    .with_span_events(FmtSpan::CLOSE) // Log when spans close, showing duration
    .init();

  tracing::info!("Starting payments server...");

  // Load application configuration
  let app_config = match AppConfig::from_env() {
    Ok(cfg) => Arc::new(cfg),
    Err(e) => {
      tracing::error!(error = %e, "Failed to load application configuration.");
      panic!("Configuration error: {}", e);
    }
  };

  // Initialize Database Pool
  let db_pool = match PgPool::connect(&app_config.database_url).await {
    Ok(pool) => {
      tracing::info!("Successfully connected to the database.");
      pool
    }
    Err(e) => {
      tracing::error!(error = %e, "Failed to connect to the database.");
      panic!("Database connection error: {}", e);
    }
  };

  // Wire up collaborators. Gateway and mail clients share the configured
  // outbound timeout; the limiter shares the database pool.
  let orders: Arc<dyn OrderStore> = Arc::new(PgOrderStore::new(db_pool.clone()));
  let gateways = match PaymentGateways::new(app_config.clone()) {
    Ok(g) => Arc::new(g),
    Err(e) => panic!("Failed to initialize payment gateways: {}", e),
  };
  let notifier: Arc<dyn NotificationTransport> = match MailApiTransport::new(app_config.clone()) {
    Ok(t) => Arc::new(t),
    Err(e) => panic!("Failed to initialize mail transport: {}", e),
  };
  let limiter = Arc::new(FixedWindowLimiter::new(
    db_pool.clone(),
    app_config.rate_limit_max_requests,
    app_config.rate_limit_window_secs,
  ));

  let app_state = AppState {
    config: app_config.clone(),
    orders,
    gateways,
    notifier,
    limiter,
  };

  // Configure and Start Actix Web Server
  let server_address = format!("{}:{}", app_config.server_host, app_config.server_port);
  tracing::info!("Attempting to bind server to {}...", server_address);

  HttpServer::new(move || {
    App::new()
      .app_data(actix_data::Data::new(app_state.clone())) // Share AppState with handlers
      .wrap(tracing_actix_web::TracingLogger::default()) // Actix middleware for tracing requests
      .configure(web::configure_app_routes)
  })
  .bind(&server_address)?
  .run()
  .await
}
