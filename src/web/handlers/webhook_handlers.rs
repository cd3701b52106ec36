// src/web/handlers/webhook_handlers.rs

use actix_web::{web, HttpRequest, HttpResponse};
use serde_json::json;
use tracing::{info, instrument};

use crate::errors::AppError;
use crate::lifecycle::Processor;
use crate::payments;
use crate::state::AppState;

#[instrument(
    name = "handler::processor_webhook",
    skip(app_state, req, body),
    fields(processor = %processor_path, payload_bytes = body.len())
)]
pub async fn processor_webhook_handler(
  app_state: web::Data<AppState>,
  req: HttpRequest,
  processor_path: web::Path<String>,
  body: web::Bytes, // Raw request body; the signature covers these exact bytes
) -> Result<HttpResponse, AppError> {
  let processor = Processor::from_path(&processor_path)
    .ok_or_else(|| AppError::Validation(format!("Unknown webhook processor '{}'", processor_path)))?;

  // Each processor names its signature header differently.
  let header_name = match processor {
    Processor::Stripe => app_state.config.stripe.signature_header,
    Processor::Cryptomus => app_state.config.cryptomus.signature_header,
  };
  let signature = req.headers().get(header_name).and_then(|h| h.to_str().ok());

  let outcome = payments::process_webhook(
    &app_state.orders,
    &app_state.notifier,
    &app_state.config,
    processor,
    &body,
    signature,
  )
  .await?;

  // Lifecycle anomalies (unknown order, finalized order, duplicates) are
  // already logged inside the service; acknowledging them with 200 is what
  // stops upstream retry storms. Only signature and parse failures (the
  // Err path above) produce non-2xx responses.
  info!(outcome = ?outcome, "Webhook delivery handled");
  Ok(HttpResponse::Ok().json(json!({ "received": true })))
}
