// src/services/gateway.rs

//! Uniform adapter over the upstream payment processors.
//!
//! Card checkouts go through a Stripe-style hosted session (amounts in minor
//! units, order id carried as session metadata); crypto checkouts through a
//! Cryptomus-style invoice (amounts in major units, order id in the invoice
//! body, bounded lifetime). Either way the adapter only performs the outbound
//! call: the caller persists the pending order after, and only after, the
//! processor has returned a usable session.

use crate::config::AppConfig;
use crate::errors::{AppError, Result as AppResult};
use crate::models::PaymentMethod;
use hmac::{Hmac, Mac};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use serde::Deserialize;
use serde_json::json;
use sha2::Sha256;
use std::sync::Arc;
use tracing::{error, info, instrument};
use uuid::Uuid;

/// Invoice lifetime passed to the crypto processor, in seconds.
const CRYPTO_INVOICE_LIFETIME_SECS: u32 = 3600;

/// Everything the adapter needs to open an upstream session. Built by
/// checkout creation from the validated request, before any order exists.
#[derive(Debug, Clone)]
pub struct CheckoutSpec {
  pub order_id: Uuid,
  pub product_ref: String,
  pub amount_cents: i64,
  pub currency: String,
  pub customer_name: String,
  pub customer_email: String,
  pub payment_method: PaymentMethod,
}

/// Upstream session handle returned on success.
#[derive(Debug, Clone)]
pub struct CheckoutSession {
  pub gateway_ref: String,
  pub redirect_url: String,
}

/// Render minor units as the major-unit decimal string the crypto processor
/// expects ("9900" cents -> "99.00").
pub fn cents_to_major(amount_cents: i64) -> String {
  Decimal::new(amount_cents, 2).to_string()
}

/// Parse a processor-reported major-unit amount back into minor units.
/// Rejects amounts with sub-cent precision rather than rounding them.
pub fn major_to_cents(amount: &str) -> Option<i64> {
  let parsed: Decimal = amount.trim().parse().ok()?;
  let scaled = parsed.checked_mul(Decimal::from(100))?;
  if scaled.fract() != Decimal::ZERO {
    return None;
  }
  scaled.to_i64()
}

// --- Upstream response shapes ---

#[derive(Debug, Deserialize)]
struct StripeSessionResponse {
  id: String,
  url: String,
}

#[derive(Debug, Deserialize)]
struct CryptomusEnvelope {
  state: i32,
  message: Option<String>,
  result: Option<CryptomusInvoice>,
}

#[derive(Debug, Deserialize)]
struct CryptomusInvoice {
  uuid: String,
  url: String,
}

pub struct PaymentGateways {
  client: reqwest::Client,
  config: Arc<AppConfig>,
}

impl PaymentGateways {
  pub fn new(config: Arc<AppConfig>) -> AppResult<Self> {
    // One shared client; the timeout bounds every outbound processor call so
    // a stalled processor fails the checkout request instead of hanging it.
    let client = reqwest::Client::builder()
      .timeout(config.gateway_timeout)
      .build()
      .map_err(|e| AppError::Internal(format!("Failed to build HTTP client: {}", e)))?;
    Ok(Self { client, config })
  }

  #[instrument(
      name = "gateway::create_checkout",
      skip(self, spec),
      fields(order_id = %spec.order_id, method = ?spec.payment_method, amount_cents = spec.amount_cents)
  )]
  pub async fn create_checkout(&self, spec: &CheckoutSpec) -> AppResult<CheckoutSession> {
    match spec.payment_method {
      PaymentMethod::Card => self.create_card_session(spec).await,
      PaymentMethod::Crypto => self.create_crypto_invoice(spec).await,
    }
  }

  /// Hosted checkout session with the card processor. Amount goes up in
  /// minor units; the order id rides along as opaque session metadata so the
  /// webhook can correlate the callback later.
  async fn create_card_session(&self, spec: &CheckoutSpec) -> AppResult<CheckoutSession> {
    let url = format!("{}/v1/checkout/sessions", self.config.stripe.api_base_url);
    let amount_minor = spec.amount_cents.to_string();
    let success_url = format!("{}/payment/success", self.config.app_base_url);
    let cancel_url = format!("{}/payment/cancelled", self.config.app_base_url);
    let currency = spec.currency.to_lowercase();
    let order_id = spec.order_id.to_string();

    let form: Vec<(&str, &str)> = vec![
      ("mode", "payment"),
      ("success_url", success_url.as_str()),
      ("cancel_url", cancel_url.as_str()),
      ("customer_email", spec.customer_email.as_str()),
      ("line_items[0][quantity]", "1"),
      ("line_items[0][price_data][currency]", currency.as_str()),
      ("line_items[0][price_data][unit_amount]", amount_minor.as_str()),
      ("line_items[0][price_data][product_data][name]", spec.product_ref.as_str()),
      ("metadata[order_id]", order_id.as_str()),
    ];

    let response = self
      .client
      .post(&url)
      .bearer_auth(&self.config.stripe.api_key)
      .form(&form)
      .send()
      .await?;

    let status = response.status();
    if !status.is_success() {
      // Surface a typed failure; upstream detail goes to the log only.
      let body = response.text().await.unwrap_or_default();
      error!(http_status = %status, upstream_body = %body, "Card processor rejected session creation");
      return Err(AppError::Gateway(format!("Card processor returned HTTP {}", status)));
    }

    let session: StripeSessionResponse = response
      .json()
      .await
      .map_err(|e| AppError::Gateway(format!("Malformed card processor response: {}", e)))?;

    info!(gateway_ref = %session.id, "Card checkout session created");
    Ok(CheckoutSession {
      gateway_ref: session.id,
      redirect_url: session.url,
    })
  }

  /// Invoice with the crypto processor. The request body is signed with the
  /// merchant API key (hex HMAC-SHA256 over the exact serialized bytes), so
  /// the body must be serialized once and sent verbatim.
  async fn create_crypto_invoice(&self, spec: &CheckoutSpec) -> AppResult<CheckoutSession> {
    let url = format!("{}/v1/payment", self.config.cryptomus.api_base_url);

    let additional_data = json!({
      "customer_email": spec.customer_email,
      "customer_name": spec.customer_name,
      "product_ref": spec.product_ref,
    })
    .to_string();

    let invoice_body = json!({
      "amount": cents_to_major(spec.amount_cents),
      "currency": spec.currency,
      "order_id": spec.order_id.to_string(),
      "url_return": format!("{}/payment/success", self.config.app_base_url),
      "url_callback": format!("{}/api/v1/webhooks/cryptomus", self.config.app_base_url),
      "is_payment_multiple": false,
      "lifetime": CRYPTO_INVOICE_LIFETIME_SECS,
      "subtitle": spec.product_ref,
      "additional_data": additional_data,
    })
    .to_string();

    let signature = sign_request_body(&invoice_body, &self.config.cryptomus.api_key);

    let response = self
      .client
      .post(&url)
      .header("Content-Type", "application/json")
      .header("merchant", &self.config.cryptomus_merchant_id)
      .header("sign", signature)
      .body(invoice_body)
      .send()
      .await?;

    let status = response.status();
    if !status.is_success() {
      let body = response.text().await.unwrap_or_default();
      error!(http_status = %status, upstream_body = %body, "Crypto processor rejected invoice creation");
      return Err(AppError::Gateway(format!("Crypto processor returned HTTP {}", status)));
    }

    let envelope: CryptomusEnvelope = response
      .json()
      .await
      .map_err(|e| AppError::Gateway(format!("Malformed crypto processor response: {}", e)))?;

    if envelope.state != 0 {
      let message = envelope.message.unwrap_or_else(|| "unspecified".to_string());
      error!(upstream_state = envelope.state, upstream_message = %message, "Crypto processor reported failure");
      return Err(AppError::Gateway("Crypto processor declined the invoice".to_string()));
    }

    let invoice = envelope
      .result
      .ok_or_else(|| AppError::Gateway("Crypto processor response missing invoice".to_string()))?;

    info!(gateway_ref = %invoice.uuid, "Crypto invoice created");
    Ok(CheckoutSession {
      gateway_ref: invoice.uuid,
      redirect_url: invoice.url,
    })
  }
}

/// Hex HMAC-SHA256 of an outbound request body under the merchant API key.
fn sign_request_body(body: &str, api_key: &str) -> String {
  type HmacSha256 = Hmac<Sha256>;
  // Keys of any length are valid for HMAC.
  let mut mac = HmacSha256::new_from_slice(api_key.as_bytes()).expect("HMAC accepts any key length");
  mac.update(body.as_bytes());
  hex::encode(mac.finalize().into_bytes())
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::services::verifier;

  #[test]
  fn cents_render_as_major_units() {
    assert_eq!(cents_to_major(9900), "99.00");
    assert_eq!(cents_to_major(5), "0.05");
    assert_eq!(cents_to_major(100), "1.00");
    assert_eq!(cents_to_major(123456), "1234.56");
  }

  #[test]
  fn major_units_parse_back_to_cents() {
    assert_eq!(major_to_cents("99.00"), Some(9900));
    assert_eq!(major_to_cents("99"), Some(9900));
    assert_eq!(major_to_cents("0.05"), Some(5));
    assert_eq!(major_to_cents(" 12.50 "), Some(1250));
  }

  #[test]
  fn sub_cent_and_garbage_amounts_are_rejected() {
    assert_eq!(major_to_cents("99.001"), None);
    assert_eq!(major_to_cents("abc"), None);
    assert_eq!(major_to_cents(""), None);
  }

  #[test]
  fn outbound_signature_matches_verifier() {
    // The invoice signature and the webhook verifier share one scheme, so a
    // body we sign must verify against the same secret.
    let body = r#"{"amount":"99.00","order_id":"x"}"#;
    let sig = sign_request_body(body, "merchant-key");
    assert!(verifier::verify(body.as_bytes(), &sig, "merchant-key"));
  }
}
