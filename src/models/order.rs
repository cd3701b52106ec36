// src/models/order.rs

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, Type as SqlxType};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, SqlxType)]
#[sqlx(type_name = "payment_method_enum", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum PaymentMethod {
  Card,
  Crypto,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, SqlxType)]
#[sqlx(type_name = "order_status_enum", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum OrderStatus {
  Pending,
  Processing,
  Completed,
  Failed,
  Expired,
}

impl OrderStatus {
  /// Terminal statuses admit no further transitions.
  pub fn is_terminal(&self) -> bool {
    matches!(self, OrderStatus::Completed | OrderStatus::Failed | OrderStatus::Expired)
  }
}

/// One purchase attempt. Everything except `status`, `failure_reason`,
/// `external_tx_id` and `updated_at` is immutable after creation;
/// `gateway_ref` is written once by checkout creation and never rewritten.
#[derive(Debug, Clone, Serialize, FromRow)]
pub struct Order {
  pub id: Uuid,
  pub product_ref: String,
  pub amount_cents: i64,
  pub currency: String,
  pub customer_name: String,
  pub customer_email: String,
  pub customer_phone: String,
  pub payment_method: PaymentMethod,
  pub gateway_ref: Option<String>,
  pub status: OrderStatus,
  pub failure_reason: Option<String>,
  pub external_tx_id: Option<String>,
  pub created_at: DateTime<Utc>,
  pub updated_at: DateTime<Utc>,
}

/// Append-only status log row. `source_event_id` doubles as the idempotency
/// key for webhook redelivery; rows are never updated or deleted.
#[derive(Debug, Clone, Serialize, FromRow)]
pub struct StatusHistoryEntry {
  pub order_id: Uuid,
  pub status: OrderStatus,
  pub source_event_id: String,
  pub recorded_at: DateTime<Utc>,
}
