// src/state.rs
use crate::config::AppConfig;
use crate::services::gateway::PaymentGateways;
use crate::services::notifications::NotificationTransport;
use crate::services::ratelimit::FixedWindowLimiter;
use crate::store::OrderStore;
use std::sync::Arc;

#[derive(Clone)]
pub struct AppState {
  pub config: Arc<AppConfig>,
  pub orders: Arc<dyn OrderStore>,
  pub gateways: Arc<PaymentGateways>,
  pub notifier: Arc<dyn NotificationTransport>,
  pub limiter: Arc<FixedWindowLimiter>,
}
