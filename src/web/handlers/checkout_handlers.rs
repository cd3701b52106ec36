// src/web/handlers/checkout_handlers.rs

use actix_web::{web, HttpRequest, HttpResponse};
use serde_json::json;
use tracing::{info, instrument};

use crate::errors::AppError;
use crate::payments::{self, CreatePaymentRequest};
use crate::state::AppState;

/// Identity used for rate limiting: the peer address, or the first
/// X-Forwarded-For hop when running behind a proxy.
fn client_key(req: &HttpRequest) -> String {
  req
    .headers()
    .get("x-forwarded-for")
    .and_then(|h| h.to_str().ok())
    .and_then(|v| v.split(',').next())
    .map(|ip| ip.trim().to_string())
    .or_else(|| req.peer_addr().map(|addr| addr.ip().to_string()))
    .unwrap_or_else(|| "unknown".to_string())
}

#[instrument(name = "handler::create_payment", skip(app_state, req, payload))]
pub async fn create_payment_handler(
  app_state: web::Data<AppState>,
  req: HttpRequest,
  payload: web::Json<CreatePaymentRequest>,
) -> Result<HttpResponse, AppError> {
  let key = client_key(&req);
  if app_state.limiter.is_rate_limited(&key).await {
    return Err(AppError::RateLimited(
      "Too many checkout attempts, please try again shortly".to_string(),
    ));
  }

  let created = payments::create_checkout(&app_state.orders, &app_state.gateways, payload.into_inner()).await?;

  info!(order_id = %created.order_id, "Checkout creation succeeded");
  Ok(HttpResponse::Created().json(created))
}

/// Order status lookup for the post-payment return pages.
#[instrument(name = "handler::get_order", skip(app_state, order_ref), fields(gateway_ref = %order_ref))]
pub async fn get_order_handler(
  app_state: web::Data<AppState>,
  order_ref: web::Path<String>,
) -> Result<HttpResponse, AppError> {
  let gateway_ref = order_ref.into_inner();
  let order = app_state
    .orders
    .get_by_gateway_ref(&gateway_ref)
    .await?
    .ok_or_else(|| AppError::NotFound(format!("No order for reference '{}'", gateway_ref)))?;

  let history = app_state.orders.get_history(order.id).await?;
  let timeline: Vec<_> = history
    .iter()
    .map(|entry| {
      json!({
        "status": entry.status,
        "recordedAt": entry.recorded_at,
      })
    })
    .collect();

  Ok(HttpResponse::Ok().json(json!({
    "orderId": order.id,
    "status": order.status,
    "productRef": order.product_ref,
    "updatedAt": order.updated_at,
    "timeline": timeline,
  })))
}
