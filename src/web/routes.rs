// src/web/routes.rs

use crate::state::AppState;
use actix_web::web;

/// Liveness probe that also pings the order store.
async fn health_check_handler(app_state: web::Data<AppState>) -> actix_web::HttpResponse {
  if app_state.orders.healthy().await {
    actix_web::HttpResponse::Ok().json(serde_json::json!({ "status": "ok" }))
  } else {
    actix_web::HttpResponse::ServiceUnavailable().json(serde_json::json!({ "status": "degraded" }))
  }
}

// Called in `main.rs` to configure services for the Actix App.
pub fn configure_app_routes(cfg: &mut web::ServiceConfig) {
  cfg.service(
    web::scope("/api/v1")
      // Health Check Route
      .route("/health", web::get().to(health_check_handler))
      // Checkout creation + order status lookup
      .service(
        web::scope("/payments")
          .route(
            "/create",
            web::post().to(crate::web::handlers::checkout_handlers::create_payment_handler),
          )
          .route(
            "/{gateway_ref}",
            web::get().to(crate::web::handlers::checkout_handlers::get_order_handler),
          ),
      )
      // Webhook Receivers, one path per processor; the {processor} segment
      // selects the signature header and shared secret.
      .service(web::scope("/webhooks").route(
        "/{processor}",
        web::post().to(crate::web::handlers::webhook_handlers::processor_webhook_handler),
      )),
  );
}
