// src/services/ratelimit.rs

//! Fixed-window request limiter for checkout creation.
//!
//! Counters live in Postgres rather than an in-process map keyed by IP, so
//! limits survive restarts and hold across replicas. Window start times are
//! truncated to the configured width; one upsert per request both bumps and
//! reads the counter, and each call opportunistically purges windows older
//! than the previous one so the table stays bounded.

use chrono::{DateTime, Duration, TimeZone, Utc};
use sqlx::PgPool;
use tracing::{debug, warn};

/// Truncate a unix timestamp to the start of its window.
fn window_start_ts(now_ts: i64, window_secs: i64) -> i64 {
  now_ts - now_ts.rem_euclid(window_secs)
}

pub struct FixedWindowLimiter {
  pool: PgPool,
  max_requests: i64,
  window_secs: i64,
}

impl FixedWindowLimiter {
  pub fn new(pool: PgPool, max_requests: i64, window_secs: i64) -> Self {
    Self {
      pool,
      max_requests,
      window_secs,
    }
  }

  fn current_window_start(&self) -> DateTime<Utc> {
    let start = window_start_ts(Utc::now().timestamp(), self.window_secs);
    // timestamp_opt is total for in-range unix seconds
    Utc.timestamp_opt(start, 0).single().unwrap_or_else(Utc::now)
  }

  /// Returns `true` when the caller identified by `client_key` is over the
  /// limit for the current window. A counter-store failure fails open with a
  /// warning: a limiter outage must not take checkout down with it.
  pub async fn is_rate_limited(&self, client_key: &str) -> bool {
    let window_start = self.current_window_start();

    let result: Result<i64, sqlx::Error> = sqlx::query_scalar(
      r#"
      INSERT INTO rate_limit_windows (client_key, window_start, request_count)
      VALUES ($1, $2, 1)
      ON CONFLICT (client_key, window_start)
      DO UPDATE SET request_count = rate_limit_windows.request_count + 1
      RETURNING request_count
      "#,
    )
    .bind(client_key)
    .bind(window_start)
    .fetch_one(&self.pool)
    .await;

    // Expired windows contribute nothing to any future decision; drop
    // everything older than the immediately preceding window. Best-effort,
    // piggybacked on the request that is already here.
    let cutoff = window_start - Duration::seconds(self.window_secs);
    if let Err(e) = sqlx::query("DELETE FROM rate_limit_windows WHERE window_start < $1")
      .bind(cutoff)
      .execute(&self.pool)
      .await
    {
      debug!(error = %e, "Expired rate limit window purge failed");
    }

    match result {
      Ok(count) => {
        debug!(client_key = %client_key, count, max = self.max_requests, "Rate limit window bumped");
        count > self.max_requests
      }
      Err(e) => {
        warn!(client_key = %client_key, error = %e, "Rate limit counter unavailable; allowing request");
        false
      }
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn timestamps_in_one_window_share_a_start() {
    assert_eq!(window_start_ts(0, 60), 0);
    assert_eq!(window_start_ts(59, 60), 0);
    assert_eq!(window_start_ts(61, 60), 60);
    assert_eq!(window_start_ts(119, 60), 60);
  }

  #[test]
  fn window_rolls_over_at_the_boundary() {
    // Requests landing one second apart across the boundary count against
    // different windows, so a fresh window starts the count over.
    let before = window_start_ts(1_700_000_099, 60);
    let after = window_start_ts(1_700_000_100, 60);
    assert_ne!(before, after);
    assert_eq!(after - before, 60);
  }

  #[test]
  fn purge_cutoff_keeps_current_and_previous_windows() {
    // The purge threshold sits one full window behind the current start, so
    // the in-flight window and its predecessor always survive.
    let window_secs = 60;
    let current = window_start_ts(1_700_000_123, window_secs);
    let cutoff = current - window_secs;
    assert!(cutoff < current);
    assert_eq!(window_start_ts(cutoff, window_secs), cutoff);
  }
}
