// src/store.rs

//! Durable order records and their lifecycle state.
//!
//! The store is the only writer of `orders.status`, and it writes it through
//! exactly one path: `apply_transition`, a single-transaction conditional
//! update. Two guards are enforced atomically there, in this order:
//!
//! 1. the history insert (unique on `(order_id, source_event_id)`) absorbs
//!    at-least-once redelivery of the same event, and
//! 2. the status update matches only non-terminal rows, so a concurrent
//!    delivery that already finalized the order makes this one a no-op.
//!
//! Orders are never physically deleted; failure and expiry are statuses.

use crate::errors::Result as AppResult;
use crate::models::{Order, OrderStatus, PaymentMethod, StatusHistoryEntry};
use async_trait::async_trait;
use sqlx::PgPool;
use tracing::debug;
use uuid::Uuid;

/// Everything checkout creation knows when it persists a pending order. The
/// gateway ref comes from the already-created upstream session.
#[derive(Debug, Clone)]
pub struct NewOrder {
  pub id: Uuid,
  pub product_ref: String,
  pub amount_cents: i64,
  pub currency: String,
  pub customer_name: String,
  pub customer_email: String,
  pub customer_phone: String,
  pub payment_method: PaymentMethod,
  pub gateway_ref: String,
}

/// What a conditional transition did.
#[derive(Debug, Clone)]
pub enum TransitionOutcome {
  /// Status row updated and history appended; notify from this order.
  Applied(Order),
  /// The event id was already recorded; nothing changed.
  Duplicate(Order),
  /// The order is already in a terminal state; nothing changed.
  Finalized(Order),
  /// No order for this gateway ref.
  NotFound,
}

#[async_trait]
pub trait OrderStore: Send + Sync {
  async fn insert_pending(&self, order: NewOrder) -> AppResult<Order>;

  async fn get_by_gateway_ref(&self, gateway_ref: &str) -> AppResult<Option<Order>>;

  /// Secondary lookup for webhook events that carry the order id as
  /// embedded metadata instead of the session/invoice ref.
  async fn get_by_id(&self, id: Uuid) -> AppResult<Option<Order>>;

  /// Full status log for one order, oldest first.
  async fn get_history(&self, order_id: Uuid) -> AppResult<Vec<StatusHistoryEntry>>;

  /// Apply a decided transition under the per-order guards described in the
  /// module docs. `failure_reason` and `external_tx_id` are recorded only
  /// when the transition actually applies.
  async fn apply_transition(
    &self,
    gateway_ref: &str,
    event_id: &str,
    new_status: OrderStatus,
    failure_reason: Option<String>,
    external_tx_id: Option<String>,
  ) -> AppResult<TransitionOutcome>;

  async fn healthy(&self) -> bool;
}

pub struct PgOrderStore {
  pool: PgPool,
}

impl PgOrderStore {
  pub fn new(pool: PgPool) -> Self {
    Self { pool }
  }
}

#[async_trait]
impl OrderStore for PgOrderStore {
  async fn insert_pending(&self, order: NewOrder) -> AppResult<Order> {
    let mut tx = self.pool.begin().await?;

    let persisted: Order = sqlx::query_as(
      r#"
      INSERT INTO orders
        (id, product_ref, amount_cents, currency, customer_name, customer_email,
         customer_phone, payment_method, gateway_ref, status)
      VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, 'pending')
      RETURNING *
      "#,
    )
    .bind(order.id)
    .bind(&order.product_ref)
    .bind(order.amount_cents)
    .bind(&order.currency)
    .bind(&order.customer_name)
    .bind(&order.customer_email)
    .bind(&order.customer_phone)
    .bind(order.payment_method)
    .bind(&order.gateway_ref)
    .fetch_one(&mut *tx)
    .await?;

    // Seed the history with the creation event so the log covers the full
    // lifecycle from the first row.
    sqlx::query(
      r#"
      INSERT INTO order_status_history (order_id, status, source_event_id)
      VALUES ($1, 'pending', $2)
      "#,
    )
    .bind(persisted.id)
    .bind(format!("checkout:{}", persisted.id))
    .execute(&mut *tx)
    .await?;

    tx.commit().await?;
    debug!(order_id = %persisted.id, gateway_ref = ?persisted.gateway_ref, "Pending order persisted");
    Ok(persisted)
  }

  async fn get_by_gateway_ref(&self, gateway_ref: &str) -> AppResult<Option<Order>> {
    let order: Option<Order> = sqlx::query_as("SELECT * FROM orders WHERE gateway_ref = $1")
      .bind(gateway_ref)
      .fetch_optional(&self.pool)
      .await?;
    Ok(order)
  }

  async fn get_by_id(&self, id: Uuid) -> AppResult<Option<Order>> {
    let order: Option<Order> = sqlx::query_as("SELECT * FROM orders WHERE id = $1")
      .bind(id)
      .fetch_optional(&self.pool)
      .await?;
    Ok(order)
  }

  async fn get_history(&self, order_id: Uuid) -> AppResult<Vec<StatusHistoryEntry>> {
    let entries: Vec<StatusHistoryEntry> = sqlx::query_as(
      r#"
      SELECT order_id, status, source_event_id, recorded_at
      FROM order_status_history
      WHERE order_id = $1
      ORDER BY id
      "#,
    )
    .bind(order_id)
    .fetch_all(&self.pool)
    .await?;
    Ok(entries)
  }

  async fn apply_transition(
    &self,
    gateway_ref: &str,
    event_id: &str,
    new_status: OrderStatus,
    failure_reason: Option<String>,
    external_tx_id: Option<String>,
  ) -> AppResult<TransitionOutcome> {
    let mut tx = self.pool.begin().await?;

    let current: Option<Order> = sqlx::query_as("SELECT * FROM orders WHERE gateway_ref = $1 FOR UPDATE")
      .bind(gateway_ref)
      .fetch_optional(&mut *tx)
      .await?;

    let current = match current {
      Some(order) => order,
      None => {
        tx.rollback().await?;
        return Ok(TransitionOutcome::NotFound);
      }
    };

    // Guard 1: idempotency. Zero rows inserted means this event id was
    // already recorded and the whole delivery is a replay.
    let history_rows = sqlx::query(
      r#"
      INSERT INTO order_status_history (order_id, status, source_event_id)
      VALUES ($1, $2, $3)
      ON CONFLICT (order_id, source_event_id) DO NOTHING
      "#,
    )
    .bind(current.id)
    .bind(new_status)
    .bind(event_id)
    .execute(&mut *tx)
    .await?
    .rows_affected();

    if history_rows == 0 {
      tx.rollback().await?;
      return Ok(TransitionOutcome::Duplicate(current));
    }

    // Guard 2: terminal states admit nothing further. Matching zero rows
    // here also rolls back the history insert above.
    let updated: Option<Order> = sqlx::query_as(
      r#"
      UPDATE orders
      SET status = $1,
          failure_reason = COALESCE($2, failure_reason),
          external_tx_id = COALESCE($3, external_tx_id),
          updated_at = now()
      WHERE gateway_ref = $4
        AND status NOT IN ('completed', 'failed', 'expired')
      RETURNING *
      "#,
    )
    .bind(new_status)
    .bind(failure_reason)
    .bind(external_tx_id)
    .bind(gateway_ref)
    .fetch_optional(&mut *tx)
    .await?;

    match updated {
      Some(order) => {
        tx.commit().await?;
        debug!(order_id = %order.id, new_status = ?order.status, event_id = %event_id, "Transition applied");
        Ok(TransitionOutcome::Applied(order))
      }
      None => {
        tx.rollback().await?;
        Ok(TransitionOutcome::Finalized(current))
      }
    }
  }

  async fn healthy(&self) -> bool {
    sqlx::query("SELECT 1").execute(&self.pool).await.is_ok()
  }
}

/// In-memory store mirroring the Postgres guard semantics, for service-level
/// tests that exercise the webhook flow without a database.
#[cfg(test)]
pub mod memory {
  use super::*;
  use chrono::Utc;
  use std::collections::{HashMap, HashSet};
  use std::sync::Mutex;

  #[derive(Default)]
  struct Inner {
    orders: HashMap<String, Order>,
    recorded_events: HashSet<(Uuid, String)>,
    history: Vec<StatusHistoryEntry>,
    applied_transitions: u64,
  }

  #[derive(Default)]
  pub struct MemoryOrderStore {
    inner: Mutex<Inner>,
  }

  impl MemoryOrderStore {
    pub fn new() -> Self {
      Self::default()
    }

    /// Number of transitions that actually applied, across all orders.
    pub fn applied_transitions(&self) -> u64 {
      self.inner.lock().unwrap().applied_transitions
    }

    pub fn order_status(&self, gateway_ref: &str) -> Option<OrderStatus> {
      self.inner.lock().unwrap().orders.get(gateway_ref).map(|o| o.status)
    }
  }

  #[async_trait]
  impl OrderStore for MemoryOrderStore {
    async fn insert_pending(&self, order: NewOrder) -> AppResult<Order> {
      let now = Utc::now();
      let persisted = Order {
        id: order.id,
        product_ref: order.product_ref,
        amount_cents: order.amount_cents,
        currency: order.currency,
        customer_name: order.customer_name,
        customer_email: order.customer_email,
        customer_phone: order.customer_phone,
        payment_method: order.payment_method,
        gateway_ref: Some(order.gateway_ref.clone()),
        status: OrderStatus::Pending,
        failure_reason: None,
        external_tx_id: None,
        created_at: now,
        updated_at: now,
      };
      let mut inner = self.inner.lock().unwrap();
      inner.history.push(StatusHistoryEntry {
        order_id: persisted.id,
        status: OrderStatus::Pending,
        source_event_id: format!("checkout:{}", persisted.id),
        recorded_at: now,
      });
      inner.orders.insert(order.gateway_ref, persisted.clone());
      Ok(persisted)
    }

    async fn get_by_gateway_ref(&self, gateway_ref: &str) -> AppResult<Option<Order>> {
      Ok(self.inner.lock().unwrap().orders.get(gateway_ref).cloned())
    }

    async fn get_by_id(&self, id: Uuid) -> AppResult<Option<Order>> {
      Ok(self.inner.lock().unwrap().orders.values().find(|o| o.id == id).cloned())
    }

    async fn get_history(&self, order_id: Uuid) -> AppResult<Vec<StatusHistoryEntry>> {
      Ok(
        self
          .inner
          .lock()
          .unwrap()
          .history
          .iter()
          .filter(|e| e.order_id == order_id)
          .cloned()
          .collect(),
      )
    }

    async fn apply_transition(
      &self,
      gateway_ref: &str,
      event_id: &str,
      new_status: OrderStatus,
      failure_reason: Option<String>,
      external_tx_id: Option<String>,
    ) -> AppResult<TransitionOutcome> {
      // One mutex for the whole store stands in for the row lock; the guard
      // order matches the Postgres impl exactly.
      let mut inner = self.inner.lock().unwrap();

      let current = match inner.orders.get(gateway_ref).cloned() {
        Some(order) => order,
        None => return Ok(TransitionOutcome::NotFound),
      };

      let event_key = (current.id, event_id.to_string());
      if inner.recorded_events.contains(&event_key) {
        return Ok(TransitionOutcome::Duplicate(current));
      }

      if current.status.is_terminal() {
        return Ok(TransitionOutcome::Finalized(current));
      }

      inner.recorded_events.insert(event_key);
      let order = inner.orders.get_mut(gateway_ref).expect("checked above");
      order.status = new_status;
      if failure_reason.is_some() {
        order.failure_reason = failure_reason;
      }
      if external_tx_id.is_some() {
        order.external_tx_id = external_tx_id;
      }
      order.updated_at = Utc::now();
      // Clone before touching the counters so the mutable borrow of the
      // order entry ends here.
      let applied = order.clone();
      inner.history.push(StatusHistoryEntry {
        order_id: applied.id,
        status: new_status,
        source_event_id: event_id.to_string(),
        recorded_at: applied.updated_at,
      });
      inner.applied_transitions += 1;
      Ok(TransitionOutcome::Applied(applied))
    }

    async fn healthy(&self) -> bool {
      true
    }
  }
}
