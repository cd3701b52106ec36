// src/payments.rs

//! Orchestration of the two request flows: checkout creation and webhook
//! processing.
//!
//! Checkout creation validates the client input, opens an upstream session
//! through the gateway adapter, and only then persists the pending order
//! with the returned gateway ref (a failed or timed-out upstream call leaves
//! no row behind). Webhook processing verifies the signature over the raw
//! bytes, normalizes the processor payload into a `PaymentEvent`, runs the
//! transition decision, persists it through the store's conditional update,
//! and finally spawns notifications for terminal outcomes.

use crate::config::AppConfig;
use crate::errors::{AppError, Result as AppResult};
use crate::lifecycle::{self, Decision, PaymentEvent, Processor};
use crate::models::{OrderStatus, PaymentMethod};
use crate::services::gateway::{self, CheckoutSpec, PaymentGateways};
use crate::services::notifications::{self, NotificationTransport};
use crate::store::{NewOrder, OrderStore, TransitionOutcome};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{info, instrument, warn};
use uuid::Uuid;

// --- Checkout creation ---

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CustomerInfo {
  pub full_name: String,
  pub email: String,
  #[serde(default)]
  pub phone: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreatePaymentRequest {
  pub product_ref: String,
  /// Major-unit amount as sent by the client (e.g. 99.0).
  pub amount: f64,
  #[serde(default = "default_currency")]
  pub currency: String,
  pub payment_method: PaymentMethod,
  pub customer: CustomerInfo,
}

fn default_currency() -> String {
  "USD".to_string()
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CheckoutCreated {
  pub order_id: Uuid,
  pub redirect_url: String,
}

/// Convert a client-supplied major-unit amount to cents, rejecting
/// non-positive values and sub-cent precision.
fn request_amount_to_cents(amount: f64) -> Option<i64> {
  let parsed = Decimal::from_f64_retain(amount)?.round_dp(6);
  if parsed <= Decimal::ZERO {
    return None;
  }
  let scaled = parsed.checked_mul(Decimal::from(100))?;
  if scaled.fract() != Decimal::ZERO {
    return None;
  }
  scaled.to_i64()
}

/// Minimal email grammar: something@something.something, no whitespace.
fn is_valid_email(email: &str) -> bool {
  if email.chars().any(char::is_whitespace) {
    return false;
  }
  let mut parts = email.splitn(2, '@');
  let local = parts.next().unwrap_or_default();
  let domain = parts.next().unwrap_or_default();
  if local.is_empty() || domain.is_empty() || domain.contains('@') {
    return false;
  }
  match domain.rsplit_once('.') {
    Some((host, tld)) => !host.is_empty() && !tld.is_empty(),
    None => false,
  }
}

/// Optional phone: leading `+` allowed, then 8-16 digits (spaces, dashes and
/// parentheses ignored), not starting with zero.
fn is_valid_phone(phone: &str) -> bool {
  let trimmed = phone.trim();
  if trimmed.is_empty() {
    return true; // optional field
  }
  let digits: String = trimmed
    .strip_prefix('+')
    .unwrap_or(trimmed)
    .chars()
    .filter(|c| !matches!(c, ' ' | '-' | '(' | ')'))
    .collect();
  (8..=16).contains(&digits.len())
    && digits.chars().all(|c| c.is_ascii_digit())
    && !digits.starts_with('0')
}

/// Validate the request and return the amount in cents. Validation failures
/// never reach the gateway or the store.
fn validate_create_request(req: &CreatePaymentRequest) -> AppResult<i64> {
  if req.product_ref.trim().is_empty() {
    return Err(AppError::Validation("productRef is required".to_string()));
  }
  if req.customer.full_name.trim().len() < 2 {
    return Err(AppError::Validation(
      "Full name must be at least 2 characters long".to_string(),
    ));
  }
  if !is_valid_email(req.customer.email.trim()) {
    return Err(AppError::Validation("Please enter a valid email address".to_string()));
  }
  if !is_valid_phone(&req.customer.phone) {
    return Err(AppError::Validation("Please enter a valid phone number".to_string()));
  }
  if req.currency.trim().len() != 3 {
    return Err(AppError::Validation("Currency must be a 3-letter code".to_string()));
  }
  request_amount_to_cents(req.amount)
    .ok_or_else(|| AppError::Validation("Amount must be a positive value with at most 2 decimals".to_string()))
}

#[instrument(name = "payments::create_checkout", skip(orders, gateways, req), fields(method = ?req.payment_method))]
pub async fn create_checkout(
  orders: &Arc<dyn OrderStore>,
  gateways: &PaymentGateways,
  req: CreatePaymentRequest,
) -> AppResult<CheckoutCreated> {
  let amount_cents = validate_create_request(&req)?;
  let order_id = Uuid::new_v4();

  let spec = CheckoutSpec {
    order_id,
    product_ref: req.product_ref.trim().to_string(),
    amount_cents,
    currency: req.currency.trim().to_uppercase(),
    customer_name: req.customer.full_name.trim().to_string(),
    customer_email: req.customer.email.trim().to_string(),
    payment_method: req.payment_method,
  };

  // Upstream session first; the pending row exists only once there is a
  // gateway ref to correlate webhooks against.
  let session = gateways.create_checkout(&spec).await?;

  let order = orders
    .insert_pending(NewOrder {
      id: order_id,
      product_ref: spec.product_ref,
      amount_cents,
      currency: spec.currency,
      customer_name: spec.customer_name,
      customer_email: spec.customer_email,
      customer_phone: req.customer.phone.trim().to_string(),
      payment_method: req.payment_method,
      gateway_ref: session.gateway_ref,
    })
    .await?;

  info!(order_id = %order.id, gateway_ref = ?order.gateway_ref, "Checkout created");
  Ok(CheckoutCreated {
    order_id: order.id,
    redirect_url: session.redirect_url,
  })
}

// --- Webhook processing ---

/// Terminal-ish result of handling one delivery. Everything here is
/// acknowledged with HTTP 200; the anomaly variants exist so handlers and
/// tests can see what happened.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WebhookOutcome {
  Applied(OrderStatus),
  Duplicate,
  AlreadyFinalized,
  IllegalTransition,
  UnknownOrder,
  /// Recognized delivery for an event type we deliberately do not act on.
  Ignored,
}

#[derive(Debug, Deserialize)]
struct StripeEvent {
  id: String,
  #[serde(rename = "type")]
  event_type: String,
  data: StripeEventData,
}

#[derive(Debug, Deserialize)]
struct StripeEventData {
  object: StripeEventObject,
}

#[derive(Debug, Deserialize)]
struct StripeEventObject {
  id: String,
  #[serde(default)]
  amount_total: Option<i64>,
  #[serde(default)]
  amount_received: Option<i64>,
  #[serde(default)]
  currency: Option<String>,
  #[serde(default)]
  payment_intent: Option<String>,
  #[serde(default)]
  metadata: HashMap<String, String>,
}

#[derive(Debug, Deserialize)]
struct CryptomusEvent {
  uuid: String,
  #[serde(default)]
  order_id: Option<String>,
  #[serde(default)]
  status: Option<String>,
  #[serde(default)]
  payment_status: Option<String>,
  #[serde(default)]
  amount: Option<String>,
  #[serde(default)]
  currency: Option<String>,
  #[serde(default)]
  txid: Option<String>,
  #[serde(default)]
  fail_reason: Option<String>,
}

/// Normalize a raw, already-verified payload into a canonical event.
/// `Ok(None)` means a recognized delivery whose event type is not part of
/// the lifecycle vocabulary; it is acknowledged and ignored.
fn normalize_event(processor: Processor, raw_body: &[u8]) -> AppResult<Option<PaymentEvent>> {
  match processor {
    Processor::Stripe => {
      let event: StripeEvent = serde_json::from_slice(raw_body)
        .map_err(|e| AppError::Validation(format!("Malformed webhook payload: {}", e)))?;

      let mapped = match lifecycle::canonical_status(processor, &event.event_type) {
        Some(mapped) => mapped,
        None => {
          info!(event_type = %event.event_type, "Ignoring unhandled card processor event type");
          return Ok(None);
        }
      };
      let (target_status, reason) = mapped;

      // Session events name the stored gateway ref directly; intent events
      // name the intent, so correlation falls back to the order id we
      // embedded as session metadata at creation.
      let order_id_hint = event
        .data
        .object
        .metadata
        .get("order_id")
        .and_then(|raw| Uuid::parse_str(raw).ok());

      Ok(Some(PaymentEvent {
        gateway_ref: event.data.object.id,
        event_id: event.id,
        order_id_hint,
        target_status,
        // Card amounts arrive in minor units already.
        amount_paid_cents: event.data.object.amount_total.or(event.data.object.amount_received),
        currency: event.data.object.currency,
        external_tx_id: event.data.object.payment_intent,
        failure_reason: reason.map(str::to_string),
      }))
    }
    Processor::Cryptomus => {
      // The processor wraps the payment object in `data` on some event
      // shapes and sends it flat on others; accept both.
      let value: JsonValue = serde_json::from_slice(raw_body)
        .map_err(|e| AppError::Validation(format!("Malformed webhook payload: {}", e)))?;
      let payload = value.get("data").cloned().unwrap_or(value);
      let event: CryptomusEvent = serde_json::from_value(payload)
        .map_err(|e| AppError::Validation(format!("Malformed webhook payload: {}", e)))?;

      let raw_status = event
        .status
        .or(event.payment_status)
        .ok_or_else(|| AppError::Validation("Webhook payload missing payment status".to_string()))?;

      let mapped = match lifecycle::canonical_status(processor, &raw_status) {
        Some(mapped) => mapped,
        None => {
          info!(payment_status = %raw_status, "Ignoring unhandled crypto processor status");
          return Ok(None);
        }
      };
      let (target_status, reason) = mapped;

      let amount_paid_cents = match &event.amount {
        Some(amount) => Some(
          gateway::major_to_cents(amount)
            .ok_or_else(|| AppError::Validation(format!("Unparseable webhook amount: {}", amount)))?,
        ),
        None => None,
      };

      Ok(Some(PaymentEvent {
        // No native event id on these callbacks; invoice + status is unique
        // per real state change, so a repeat is by definition a redelivery.
        event_id: format!("{}:{}", event.uuid, raw_status),
        gateway_ref: event.uuid,
        order_id_hint: event.order_id.as_deref().and_then(|raw| Uuid::parse_str(raw).ok()),
        target_status,
        amount_paid_cents,
        currency: event.currency,
        external_tx_id: event.txid,
        failure_reason: reason.map(str::to_string).or(event.fail_reason),
      }))
    }
  }
}

/// Handle one webhook delivery end to end. Signature and payload failures
/// come back as errors (401/400); lifecycle anomalies come back as outcomes
/// and are acknowledged upstream so retry storms stop.
#[instrument(
    name = "payments::process_webhook",
    skip(orders, notifier, config, raw_body, provided_signature),
    fields(processor = %processor, payload_bytes = raw_body.len())
)]
pub async fn process_webhook(
  orders: &Arc<dyn OrderStore>,
  notifier: &Arc<dyn NotificationTransport>,
  config: &Arc<AppConfig>,
  processor: Processor,
  raw_body: &[u8],
  provided_signature: Option<&str>,
) -> AppResult<WebhookOutcome> {
  let secret = match processor {
    Processor::Stripe => &config.stripe.webhook_secret,
    Processor::Cryptomus => &config.cryptomus.webhook_secret,
  };

  // Signature first, over the raw bytes, before any parsing.
  let signature = provided_signature
    .ok_or_else(|| AppError::SignatureRejected("Missing signature header".to_string()))?;
  if !crate::services::verifier::verify(raw_body, signature, secret) {
    // Potential security event: a caller who is not the processor.
    warn!(processor = %processor, "Webhook signature verification failed");
    return Err(AppError::SignatureRejected("Signature mismatch".to_string()));
  }

  let event = match normalize_event(processor, raw_body)? {
    Some(event) => event,
    None => return Ok(WebhookOutcome::Ignored),
  };

  let mut order = orders.get_by_gateway_ref(&event.gateway_ref).await?;
  if order.is_none() {
    // Intent-level events reference the intent, not the stored session
    // ref; correlate through the order id embedded at creation instead.
    if let Some(hint) = event.order_id_hint {
      order = orders.get_by_id(hint).await?;
    }
  }
  let order = match order {
    Some(order) => order,
    None => {
      // Do not create an order for an unknown ref; log and acknowledge.
      warn!(gateway_ref = %event.gateway_ref, "Webhook for unknown order");
      return Ok(WebhookOutcome::UnknownOrder);
    }
  };

  // The conditional update is keyed by the ref the order was stored under,
  // which may differ from the object the event named.
  let transition_ref = order.gateway_ref.clone().unwrap_or_else(|| event.gateway_ref.clone());

  let (new_status, failure_reason) = match lifecycle::decide(&order, &event) {
    Decision::Transition {
      new_status,
      failure_reason,
    } => (new_status, failure_reason),
    Decision::NoChange => {
      info!(order_id = %order.id, event_id = %event.event_id, "Duplicate status report; no-op");
      return Ok(WebhookOutcome::Duplicate);
    }
    Decision::AlreadyFinalized => {
      warn!(order_id = %order.id, status = ?order.status, event_id = %event.event_id, "Event for finalized order");
      return Ok(WebhookOutcome::AlreadyFinalized);
    }
    Decision::IllegalTransition => {
      warn!(
        order_id = %order.id,
        from = ?order.status,
        to = ?event.target_status,
        "Illegal transition requested by webhook"
      );
      return Ok(WebhookOutcome::IllegalTransition);
    }
  };

  // The store re-checks the event id and the terminal guard atomically, so
  // a concurrent delivery racing this one collapses to a single Applied.
  let outcome = orders
    .apply_transition(
      &transition_ref,
      &event.event_id,
      new_status,
      failure_reason,
      event.external_tx_id.clone(),
    )
    .await?;

  match outcome {
    TransitionOutcome::Applied(updated) => {
      info!(order_id = %updated.id, status = ?updated.status, event_id = %event.event_id, "Order transitioned");
      // Fire-and-forget: the webhook response never waits on the mail
      // provider, and no store lock is held here.
      tokio::spawn(notifications::dispatch_for_transition(
        Arc::clone(notifier),
        Arc::clone(config),
        updated.clone(),
      ));
      Ok(WebhookOutcome::Applied(updated.status))
    }
    TransitionOutcome::Duplicate(_) => {
      info!(event_id = %event.event_id, "Event already recorded; no-op");
      Ok(WebhookOutcome::Duplicate)
    }
    TransitionOutcome::Finalized(order) => {
      warn!(order_id = %order.id, status = ?order.status, "Order finalized concurrently; event dropped");
      Ok(WebhookOutcome::AlreadyFinalized)
    }
    TransitionOutcome::NotFound => {
      warn!(gateway_ref = %event.gateway_ref, "Order disappeared between lookup and update");
      Ok(WebhookOutcome::UnknownOrder)
    }
  }
}
