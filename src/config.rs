// src/config.rs

use crate::errors::{AppError, Result};
use dotenvy::dotenv;
use std::env;
use std::time::Duration;

/// Per-processor credentials: API key for outbound calls, webhook signing
/// secret and signature header name for inbound callbacks.
#[derive(Debug, Clone)]
pub struct ProcessorConfig {
  pub api_key: String,
  pub webhook_secret: String,
  pub signature_header: &'static str,
  pub api_base_url: String,
}

#[derive(Debug, Clone)]
pub struct AppConfig {
  pub server_host: String,
  pub server_port: u16,
  pub database_url: String,
  pub app_base_url: String,

  pub stripe: ProcessorConfig,
  pub cryptomus: ProcessorConfig,
  pub cryptomus_merchant_id: String,

  /// Bound on every outbound processor/mail call. On timeout the checkout
  /// request fails with a Gateway error and no order row is written.
  pub gateway_timeout: Duration,

  // Mail API (Brevo-style HTTP transport)
  pub mail_api_base_url: String,
  pub mail_api_key: String,
  pub mail_sender: String,
  pub ops_alert_recipient: String,

  // Fixed-window limiter for checkout creation
  pub rate_limit_max_requests: i64,
  pub rate_limit_window_secs: i64,
}

impl AppConfig {
  pub fn from_env() -> Result<Self> {
    dotenv().ok(); // Load .env file if present

    let get_env = |var_name: &str| {
      env::var(var_name).map_err(|e| AppError::Config(format!("Missing environment variable '{}': {}", var_name, e)))
    };

    let server_host = get_env("SERVER_HOST").unwrap_or_else(|_| "127.0.0.1".to_string());
    let server_port = get_env("SERVER_PORT")
      .unwrap_or_else(|_| "8080".to_string())
      .parse::<u16>()
      .map_err(|e| AppError::Config(format!("Invalid SERVER_PORT: {}", e)))?;
    let database_url = get_env("DATABASE_URL")?;
    let app_base_url = get_env("APP_BASE_URL").unwrap_or_else(|_| format!("http://{}:{}", server_host, server_port));

    let stripe_api_key = get_env("STRIPE_SECRET_KEY")?;
    let stripe = ProcessorConfig {
      api_key: stripe_api_key,
      webhook_secret: get_env("STRIPE_WEBHOOK_SECRET")?,
      signature_header: "stripe-signature",
      api_base_url: get_env("STRIPE_API_BASE_URL").unwrap_or_else(|_| "https://api.stripe.com".to_string()),
    };

    // Cryptomus signs callbacks with a dedicated webhook secret when one is
    // configured, otherwise with the API key (matches the processor docs).
    let cryptomus_api_key = get_env("CRYPTOMUS_API_KEY")?;
    let cryptomus = ProcessorConfig {
      webhook_secret: get_env("CRYPTOMUS_WEBHOOK_SECRET").unwrap_or_else(|_| cryptomus_api_key.clone()),
      api_key: cryptomus_api_key,
      signature_header: "sign",
      api_base_url: get_env("CRYPTOMUS_API_BASE_URL").unwrap_or_else(|_| "https://api.cryptomus.com".to_string()),
    };
    let cryptomus_merchant_id = get_env("CRYPTOMUS_MERCHANT_ID")?;

    let gateway_timeout_secs = get_env("GATEWAY_TIMEOUT_SECS")
      .unwrap_or_else(|_| "10".to_string())
      .parse::<u64>()
      .map_err(|e| AppError::Config(format!("Invalid GATEWAY_TIMEOUT_SECS: {}", e)))?;

    let mail_api_base_url = get_env("MAIL_API_BASE_URL").unwrap_or_else(|_| "https://api.brevo.com".to_string());
    let mail_api_key = get_env("MAIL_API_KEY").unwrap_or_default();
    let mail_sender = get_env("MAIL_SENDER").unwrap_or_else(|_| "noreply@example.com".to_string());
    let ops_alert_recipient = get_env("OPS_ALERT_RECIPIENT").unwrap_or_else(|_| mail_sender.clone());

    let rate_limit_max_requests = get_env("RATE_LIMIT_MAX_REQUESTS")
      .unwrap_or_else(|_| "5".to_string())
      .parse::<i64>()
      .map_err(|e| AppError::Config(format!("Invalid RATE_LIMIT_MAX_REQUESTS: {}", e)))?;
    let rate_limit_window_secs = get_env("RATE_LIMIT_WINDOW_SECS")
      .unwrap_or_else(|_| "60".to_string())
      .parse::<i64>()
      .map_err(|e| AppError::Config(format!("Invalid RATE_LIMIT_WINDOW_SECS: {}", e)))?;

    tracing::info!("Application configuration loaded successfully.");
    // Avoid logging secrets; only non-sensitive fields are ever traced.

    Ok(Self {
      server_host,
      server_port,
      database_url,
      app_base_url,
      stripe,
      cryptomus,
      cryptomus_merchant_id,
      gateway_timeout: Duration::from_secs(gateway_timeout_secs),
      mail_api_base_url,
      mail_api_key,
      mail_sender,
      ops_alert_recipient,
      rate_limit_max_requests,
      rate_limit_window_secs,
    })
  }
}
