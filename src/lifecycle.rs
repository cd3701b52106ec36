// src/lifecycle.rs

//! Order lifecycle rules: canonical status vocabulary and the pure
//! transition decision.
//!
//! Legal transitions:
//!   pending    -> processing | completed | failed | expired
//!   processing -> completed | failed
//! completed, failed and expired are terminal.
//!
//! The decision here is pure; idempotency (event-id replay) and the atomic
//! terminal-state guard are enforced again by the store when the transition
//! persists, so a stale read between decide and persist cannot double-apply.

use crate::models::{Order, OrderStatus};
use std::fmt;
use uuid::Uuid;

/// Upstream processors the webhook receivers understand.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Processor {
  Stripe,
  Cryptomus,
}

impl Processor {
  pub fn from_path(segment: &str) -> Option<Self> {
    match segment {
      "stripe" => Some(Processor::Stripe),
      "cryptomus" => Some(Processor::Cryptomus),
      _ => None,
    }
  }
}

impl fmt::Display for Processor {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      Processor::Stripe => write!(f, "stripe"),
      Processor::Cryptomus => write!(f, "cryptomus"),
    }
  }
}

/// Reason recorded when an amount mismatch demotes a completion.
pub const WRONG_AMOUNT: &str = "WrongAmount";

/// A verified, normalized webhook event, ready for the transition decision.
#[derive(Debug, Clone)]
pub struct PaymentEvent {
  pub gateway_ref: String,
  /// Idempotency key. Card events carry one natively; crypto events get a
  /// synthesized `"{invoice}:{status}"` key since the processor sends none.
  pub event_id: String,
  /// Order id embedded as metadata at checkout creation. Used as a fallback
  /// lookup when `gateway_ref` names an object (e.g. a payment intent) other
  /// than the stored session/invoice ref.
  pub order_id_hint: Option<Uuid>,
  /// Canonical target status, already mapped from the processor vocabulary.
  pub target_status: OrderStatus,
  pub amount_paid_cents: Option<i64>,
  pub currency: Option<String>,
  pub external_tx_id: Option<String>,
  pub failure_reason: Option<String>,
}

/// Map a processor-specific status/event-type string onto the canonical
/// enum. Returns the target status plus a pre-set failure reason for
/// statuses that are themselves a diagnosis (`wrong_amount`).
///
/// Unrecognized vocabulary maps to `None`; such events are acknowledged and
/// ignored, never guessed at.
pub fn canonical_status(processor: Processor, raw: &str) -> Option<(OrderStatus, Option<&'static str>)> {
  match processor {
    Processor::Stripe => match raw {
      "checkout.session.completed" | "payment_intent.succeeded" => Some((OrderStatus::Completed, None)),
      "payment_intent.payment_failed" => Some((OrderStatus::Failed, None)),
      "payment_intent.processing" => Some((OrderStatus::Processing, None)),
      "checkout.session.expired" => Some((OrderStatus::Expired, None)),
      _ => None,
    },
    Processor::Cryptomus => match raw {
      // paid_over: customer overpaid; the invoice itself is settled.
      "paid" | "paid_over" => Some((OrderStatus::Completed, None)),
      "cancel" | "fail" => Some((OrderStatus::Failed, None)),
      "process" | "check" => Some((OrderStatus::Processing, None)),
      "expired" => Some((OrderStatus::Expired, None)),
      "wrong_amount" => Some((OrderStatus::Failed, Some(WRONG_AMOUNT))),
      _ => None,
    },
  }
}

/// What the state machine decided for one event against one order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decision {
  /// Apply this status (possibly demoted by the amount guard).
  Transition {
    new_status: OrderStatus,
    failure_reason: Option<String>,
  },
  /// The event re-reports the order's current status; nothing to do.
  NoChange,
  /// The order is terminal and the event wants something else.
  AlreadyFinalized,
  /// The event asks for a hop the lifecycle does not permit
  /// (e.g. expiry of an order already being processed).
  IllegalTransition,
}

/// Pure transition decision for a looked-up order. The caller reports
/// `UnknownOrder` itself when the lookup found nothing.
pub fn decide(order: &Order, event: &PaymentEvent) -> Decision {
  let mut target = event.target_status;
  let mut failure_reason = event.failure_reason.clone();

  // Amount guard: a completion must confirm the amount recorded at
  // creation. A short (or mis-currency) payment becomes a failure with
  // reason WrongAmount, never a silent completion. Events that do not
  // report an amount (e.g. card expiry callbacks) skip the guard.
  if target == OrderStatus::Completed {
    let amount_mismatch = matches!(event.amount_paid_cents, Some(paid) if paid != order.amount_cents);
    let currency_mismatch = matches!(
      &event.currency,
      Some(c) if !c.eq_ignore_ascii_case(&order.currency)
    );
    if amount_mismatch || currency_mismatch {
      target = OrderStatus::Failed;
      failure_reason = Some(WRONG_AMOUNT.to_string());
    }
  }

  if order.status.is_terminal() {
    // A repeat of the terminal state itself is a harmless redelivery even
    // when the event id differs; anything else is an anomaly.
    return if target == order.status {
      Decision::NoChange
    } else {
      Decision::AlreadyFinalized
    };
  }

  if target == order.status {
    return Decision::NoChange;
  }

  let legal = match (order.status, target) {
    (OrderStatus::Pending, OrderStatus::Processing)
    | (OrderStatus::Pending, OrderStatus::Completed)
    | (OrderStatus::Pending, OrderStatus::Failed)
    | (OrderStatus::Pending, OrderStatus::Expired)
    | (OrderStatus::Processing, OrderStatus::Completed)
    | (OrderStatus::Processing, OrderStatus::Failed) => true,
    _ => false,
  };

  if legal {
    Decision::Transition {
      new_status: target,
      failure_reason,
    }
  } else {
    Decision::IllegalTransition
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::models::PaymentMethod;
  use chrono::Utc;
  use uuid::Uuid;

  fn order_with_status(status: OrderStatus) -> Order {
    let now = Utc::now();
    Order {
      id: Uuid::new_v4(),
      product_ref: "defi-template".to_string(),
      amount_cents: 9900,
      currency: "USD".to_string(),
      customer_name: "Ada Lovelace".to_string(),
      customer_email: "ada@example.com".to_string(),
      customer_phone: "".to_string(),
      payment_method: PaymentMethod::Card,
      gateway_ref: Some("cs_test_123".to_string()),
      status,
      failure_reason: None,
      external_tx_id: None,
      created_at: now,
      updated_at: now,
    }
  }

  fn event(target: OrderStatus, amount_paid_cents: Option<i64>) -> PaymentEvent {
    PaymentEvent {
      gateway_ref: "cs_test_123".to_string(),
      event_id: "evt_1".to_string(),
      order_id_hint: None,
      target_status: target,
      amount_paid_cents,
      currency: Some("USD".to_string()),
      external_tx_id: None,
      failure_reason: None,
    }
  }

  #[test]
  fn stripe_vocabulary_maps_to_canonical_statuses() {
    assert_eq!(
      canonical_status(Processor::Stripe, "checkout.session.completed"),
      Some((OrderStatus::Completed, None))
    );
    assert_eq!(
      canonical_status(Processor::Stripe, "payment_intent.succeeded"),
      Some((OrderStatus::Completed, None))
    );
    assert_eq!(
      canonical_status(Processor::Stripe, "payment_intent.payment_failed"),
      Some((OrderStatus::Failed, None))
    );
    assert_eq!(
      canonical_status(Processor::Stripe, "payment_intent.processing"),
      Some((OrderStatus::Processing, None))
    );
    assert_eq!(
      canonical_status(Processor::Stripe, "checkout.session.expired"),
      Some((OrderStatus::Expired, None))
    );
    assert_eq!(canonical_status(Processor::Stripe, "invoice.paid"), None);
  }

  #[test]
  fn cryptomus_vocabulary_maps_to_canonical_statuses() {
    for raw in ["paid", "paid_over"] {
      assert_eq!(
        canonical_status(Processor::Cryptomus, raw),
        Some((OrderStatus::Completed, None))
      );
    }
    for raw in ["cancel", "fail"] {
      assert_eq!(
        canonical_status(Processor::Cryptomus, raw),
        Some((OrderStatus::Failed, None))
      );
    }
    for raw in ["process", "check"] {
      assert_eq!(
        canonical_status(Processor::Cryptomus, raw),
        Some((OrderStatus::Processing, None))
      );
    }
    assert_eq!(
      canonical_status(Processor::Cryptomus, "expired"),
      Some((OrderStatus::Expired, None))
    );
    assert_eq!(
      canonical_status(Processor::Cryptomus, "wrong_amount"),
      Some((OrderStatus::Failed, Some(WRONG_AMOUNT)))
    );
    assert_eq!(canonical_status(Processor::Cryptomus, "refund"), None);
  }

  #[test]
  fn matching_amount_completes_a_pending_order() {
    let order = order_with_status(OrderStatus::Pending);
    let decision = decide(&order, &event(OrderStatus::Completed, Some(9900)));
    assert_eq!(
      decision,
      Decision::Transition {
        new_status: OrderStatus::Completed,
        failure_reason: None,
      }
    );
  }

  #[test]
  fn short_payment_is_demoted_to_failed_wrong_amount() {
    let order = order_with_status(OrderStatus::Pending);
    let decision = decide(&order, &event(OrderStatus::Completed, Some(5000)));
    assert_eq!(
      decision,
      Decision::Transition {
        new_status: OrderStatus::Failed,
        failure_reason: Some(WRONG_AMOUNT.to_string()),
      }
    );
  }

  #[test]
  fn currency_mismatch_is_also_wrong_amount() {
    let order = order_with_status(OrderStatus::Processing);
    let mut evt = event(OrderStatus::Completed, Some(9900));
    evt.currency = Some("EUR".to_string());
    let decision = decide(&order, &evt);
    assert_eq!(
      decision,
      Decision::Transition {
        new_status: OrderStatus::Failed,
        failure_reason: Some(WRONG_AMOUNT.to_string()),
      }
    );
  }

  #[test]
  fn completion_without_reported_amount_is_accepted() {
    // Card session callbacks confirm the session's own amount; when none is
    // echoed there is no mismatch to guard against.
    let order = order_with_status(OrderStatus::Pending);
    let decision = decide(&order, &event(OrderStatus::Completed, None));
    assert_eq!(
      decision,
      Decision::Transition {
        new_status: OrderStatus::Completed,
        failure_reason: None,
      }
    );
  }

  #[test]
  fn no_event_leaves_a_terminal_state() {
    for terminal in [OrderStatus::Completed, OrderStatus::Failed, OrderStatus::Expired] {
      let order = order_with_status(terminal);
      for target in [OrderStatus::Processing, OrderStatus::Completed, OrderStatus::Failed, OrderStatus::Expired] {
        let decision = decide(&order, &event(target, Some(9900)));
        match decision {
          Decision::NoChange | Decision::AlreadyFinalized => {}
          other => panic!("terminal {:?} must not transition, got {:?}", terminal, other),
        }
      }
    }
  }

  #[test]
  fn terminal_status_repeat_is_a_noop_not_an_anomaly() {
    let order = order_with_status(OrderStatus::Completed);
    assert_eq!(decide(&order, &event(OrderStatus::Completed, Some(9900))), Decision::NoChange);
    assert_eq!(
      decide(&order, &event(OrderStatus::Failed, Some(9900))),
      Decision::AlreadyFinalized
    );
  }

  #[test]
  fn expiry_of_a_processing_order_is_illegal() {
    let order = order_with_status(OrderStatus::Processing);
    assert_eq!(decide(&order, &event(OrderStatus::Expired, None)), Decision::IllegalTransition);
  }

  #[test]
  fn processing_repeat_is_a_noop() {
    let order = order_with_status(OrderStatus::Processing);
    assert_eq!(decide(&order, &event(OrderStatus::Processing, None)), Decision::NoChange);
  }
}
