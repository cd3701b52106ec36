// src/services/notifications.rs

//! Best-effort notifications fired after an order transition commits.
//!
//! Notifications are strictly downstream of state: a slow or failing mail
//! provider must never block, stall, or roll back a transition. Dispatch is
//! spawned off the webhook request path and every failure ends in a log
//! line, not an error response.

use crate::config::AppConfig;
use crate::errors::{AppError, Result as AppResult};
use crate::models::{Order, OrderStatus};
use async_trait::async_trait;
use serde_json::json;
use std::sync::Arc;
use tracing::{info, warn};

/// Template identifiers understood by the transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NotificationKind {
  OrderConfirmation,
  PaymentFailedAlert,
}

impl NotificationKind {
  fn subject(&self) -> &'static str {
    match self {
      NotificationKind::OrderConfirmation => "Your order is confirmed",
      NotificationKind::PaymentFailedAlert => "Payment failure on order",
    }
  }
}

/// Opaque, best-effort side channel for outbound mail. The production impl
/// talks to an HTTP mail API; tests record calls instead.
#[async_trait]
pub trait NotificationTransport: Send + Sync {
  async fn send(&self, to: &str, kind: NotificationKind, data: serde_json::Value) -> AppResult<()>;
}

/// Brevo-style transactional mail API over the shared HTTP client.
pub struct MailApiTransport {
  client: reqwest::Client,
  config: Arc<AppConfig>,
}

impl MailApiTransport {
  pub fn new(config: Arc<AppConfig>) -> AppResult<Self> {
    let client = reqwest::Client::builder()
      .timeout(config.gateway_timeout)
      .build()
      .map_err(|e| AppError::Internal(format!("Failed to build mail client: {}", e)))?;
    Ok(Self { client, config })
  }
}

#[async_trait]
impl NotificationTransport for MailApiTransport {
  async fn send(&self, to: &str, kind: NotificationKind, data: serde_json::Value) -> AppResult<()> {
    let url = format!("{}/v3/smtp/email", self.config.mail_api_base_url);
    let body = json!({
      "sender": { "email": self.config.mail_sender },
      "to": [{ "email": to }],
      "subject": kind.subject(),
      "params": data,
    });

    let response = self
      .client
      .post(&url)
      .header("api-key", &self.config.mail_api_key)
      .json(&body)
      .send()
      .await
      .map_err(|e| AppError::Notification(format!("Mail API request failed: {}", e)))?;

    if !response.status().is_success() {
      return Err(AppError::Notification(format!(
        "Mail API returned HTTP {}",
        response.status()
      )));
    }
    Ok(())
  }
}

/// Fire the notifications appropriate for a committed transition: customer
/// confirmation on `Completed`, internal ops alert on `Failed`. Other
/// statuses are silent.
///
/// Callers spawn this; it holds no store locks and swallows every error.
pub async fn dispatch_for_transition(
  transport: Arc<dyn NotificationTransport>,
  config: Arc<AppConfig>,
  order: Order,
) {
  let (recipient, kind) = match order.status {
    OrderStatus::Completed => (order.customer_email.clone(), NotificationKind::OrderConfirmation),
    OrderStatus::Failed => (config.ops_alert_recipient.clone(), NotificationKind::PaymentFailedAlert),
    _ => return,
  };

  let data = json!({
    "order_id": order.id.to_string(),
    "product_ref": order.product_ref,
    "customer_name": order.customer_name,
    "amount": crate::services::gateway::cents_to_major(order.amount_cents),
    "currency": order.currency,
    "failure_reason": order.failure_reason,
  });

  match transport.send(&recipient, kind, data).await {
    Ok(()) => {
      info!(order_id = %order.id, notification = ?kind, recipient = %recipient, "Notification sent");
    }
    Err(e) => {
      // Logged only. Never propagated, never reverses the transition.
      warn!(order_id = %order.id, notification = ?kind, error = %e, "Notification send failed");
    }
  }
}
