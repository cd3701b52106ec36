// src/errors.rs

use actix_web::{HttpResponse, ResponseError};
use serde_json::json;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum AppError {
  #[error("Validation Error: {0}")]
  Validation(String),

  #[error("Rate limit exceeded: {0}")]
  RateLimited(String),

  #[error("Webhook signature rejected: {0}")]
  SignatureRejected(String),

  #[error("Resource Not Found: {0}")]
  NotFound(String),

  #[error("Payment Gateway Error: {0}")]
  Gateway(String), // Upstream processor call failed; detail stays in logs

  #[error("Configuration Error: {0}")]
  Config(String),

  #[error("Database Error: {0}")]
  Sqlx(#[from] sqlx::Error),

  #[error("Notification Error: {0}")]
  Notification(String), // Logged only; never becomes an HTTP response on its own

  #[error("Internal Server Error: {0}")]
  Internal(String),
}

// Allow anyhow::Error to be converted into AppError::Internal for convenience
// in handlers that use `?` on functions returning anyhow::Result.
impl From<anyhow::Error> for AppError {
  fn from(err: anyhow::Error) -> Self {
    if err.is::<sqlx::Error>() {
      return AppError::Sqlx(err.downcast::<sqlx::Error>().unwrap());
    }
    AppError::Internal(err.to_string())
  }
}

impl From<reqwest::Error> for AppError {
  fn from(err: reqwest::Error) -> Self {
    // Includes connect errors and the bounded client timeout. The gateway
    // callers log the full chain; the response body stays generic.
    AppError::Gateway(err.to_string())
  }
}

impl ResponseError for AppError {
  fn error_response(&self) -> HttpResponse {
    // Log the full error when it's turned into a response
    tracing::error!(application_error = %self, "Responding with error");
    match self {
      AppError::Validation(m) => HttpResponse::BadRequest().json(json!({"error": m})),
      AppError::RateLimited(m) => HttpResponse::TooManyRequests().json(json!({"error": m})),
      AppError::SignatureRejected(_) => {
        // Do not echo verification detail back to the caller.
        HttpResponse::Unauthorized().json(json!({"error": "Invalid signature"}))
      }
      AppError::NotFound(m) => HttpResponse::NotFound().json(json!({"error": m})),
      AppError::Gateway(_) => {
        HttpResponse::BadGateway().json(json!({"error": "Payment provider is unavailable"}))
      }
      AppError::Config(m) => {
        HttpResponse::InternalServerError().json(json!({"error": "Configuration issue", "detail": m}))
      }
      AppError::Sqlx(_) => HttpResponse::InternalServerError().json(json!({"error": "Database operation failed"})),
      AppError::Notification(_) | AppError::Internal(_) => {
        HttpResponse::InternalServerError().json(json!({"error": "An internal error occurred"}))
      }
    }
  }
}

// Define a Result type alias for the application
pub type Result<T, E = AppError> = std::result::Result<T, E>;
