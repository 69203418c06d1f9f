// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2025 Daniel Negri
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU Affero General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the
// GNU Affero General Public License for more details.
//
// You should have received a copy of the GNU Affero General Public License
// along with this program. If not, see <https://www.gnu.org/licenses/>.

//! Engine configuration.
//!
//! Values are loaded from environment variables with defaults, or built
//! directly (tests, CLI flags).

use crate::error::BookingError;
use chrono::{DateTime, TimeDelta, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::env;
use std::time::Duration;

/// Who performed a booking cancellation, relative to the booking.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Canceller {
    Passenger,
    Driver,
    Admin,
}

/// Refund rules for cancelled bookings.
///
/// Driver and admin cancellations always refund the full price. A passenger
/// cancelling at least `full_refund_cutoff_hours` before departure is refunded
/// in full; closer to departure they get `late_refund_percent` of the price.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RefundPolicy {
    pub full_refund_cutoff_hours: i64,
    /// Percentage (0-100) refunded on late self-cancellation.
    pub late_refund_percent: Decimal,
}

impl Default for RefundPolicy {
    fn default() -> Self {
        Self {
            full_refund_cutoff_hours: 24,
            late_refund_percent: Decimal::ZERO,
        }
    }
}

impl RefundPolicy {
    /// Computes the refund owed for a booking paid `total_price`. The
    /// refund never exceeds `total_price`.
    ///
    /// # Errors
    ///
    /// Returns [`BookingError::AmountOverflow`] if the partial refund cannot
    /// be represented.
    pub fn refund(
        &self,
        total_price: Decimal,
        canceller: Canceller,
        now: DateTime<Utc>,
        departure: DateTime<Utc>,
    ) -> Result<Decimal, BookingError> {
        match canceller {
            Canceller::Driver | Canceller::Admin => Ok(total_price),
            Canceller::Passenger => {
                let cutoff = TimeDelta::try_hours(self.full_refund_cutoff_hours.max(0))
                    .unwrap_or(TimeDelta::MAX);
                if departure - now >= cutoff {
                    return Ok(total_price);
                }
                let share = self
                    .late_refund_percent
                    .clamp(Decimal::ZERO, Decimal::ONE_HUNDRED)
                    .checked_div(Decimal::ONE_HUNDRED)
                    .and_then(|share| total_price.checked_mul(share))
                    .ok_or(BookingError::AmountOverflow {
                        amount: total_price,
                    })?;
                Ok(share.min(total_price))
            }
        }
    }
}

/// Row-store tuning: lock timeouts and retry budget for transient failures.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    pub lock_timeout_ms: u64,
    pub max_retries: u32,
    /// Base delay; attempt `n` waits `n * retry_backoff_ms`.
    pub retry_backoff_ms: u64,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            lock_timeout_ms: 250,
            max_retries: 3,
            retry_backoff_ms: 10,
        }
    }
}

impl StoreConfig {
    pub fn lock_timeout(&self) -> Duration {
        Duration::from_millis(self.lock_timeout_ms)
    }

    pub fn backoff(&self, attempt: u32) -> Duration {
        Duration::from_millis(self.retry_backoff_ms.saturating_mul(u64::from(attempt)))
    }
}

/// Top-level engine configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub refund: RefundPolicy,
    pub store: StoreConfig,
}

impl EngineConfig {
    /// Loads configuration from `CARPOOL_*` environment variables.
    ///
    /// Missing or unparsable values fall back to their defaults.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            refund: RefundPolicy {
                full_refund_cutoff_hours: env_or(
                    "CARPOOL_FULL_REFUND_CUTOFF_HOURS",
                    defaults.refund.full_refund_cutoff_hours,
                ),
                late_refund_percent: env_or(
                    "CARPOOL_LATE_REFUND_PERCENT",
                    defaults.refund.late_refund_percent,
                ),
            },
            store: StoreConfig {
                lock_timeout_ms: env_or("CARPOOL_LOCK_TIMEOUT_MS", defaults.store.lock_timeout_ms),
                max_retries: env_or("CARPOOL_MAX_RETRIES", defaults.store.max_retries),
                retry_backoff_ms: env_or(
                    "CARPOOL_RETRY_BACKOFF_MS",
                    defaults.store.retry_backoff_ms,
                ),
            },
        }
    }
}

fn env_or<T: std::str::FromStr>(key: &str, default: T) -> T {
    env::var(key)
        .ok()
        .and_then(|s| s.trim().parse().ok())
        .unwrap_or(default)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use rust_decimal_macros::dec;

    fn at(hour: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 1, hour, 0, 0).unwrap()
    }

    #[test]
    fn driver_and_admin_always_refund_in_full() {
        let policy = RefundPolicy::default();
        assert_eq!(policy.refund(dec!(20), Canceller::Driver, at(9), at(10)), Ok(dec!(20)));
        assert_eq!(policy.refund(dec!(20), Canceller::Admin, at(9), at(10)), Ok(dec!(20)));
    }

    #[test]
    fn passenger_refund_depends_on_cutoff() {
        let policy = RefundPolicy {
            full_refund_cutoff_hours: 5,
            late_refund_percent: dec!(50),
        };
        assert_eq!(policy.refund(dec!(30), Canceller::Passenger, at(0), at(5)), Ok(dec!(30)));
        assert_eq!(policy.refund(dec!(30), Canceller::Passenger, at(1), at(5)), Ok(dec!(15)));
    }

    #[test]
    fn default_late_refund_is_zero() {
        let policy = RefundPolicy::default();
        assert_eq!(
            policy.refund(dec!(10), Canceller::Passenger, at(0), at(23)),
            Ok(Decimal::ZERO)
        );
    }

    #[test]
    fn late_refund_percent_is_clamped() {
        let policy = RefundPolicy {
            full_refund_cutoff_hours: 24,
            late_refund_percent: dec!(250),
        };
        assert_eq!(policy.refund(dec!(10), Canceller::Passenger, at(0), at(1)), Ok(dec!(10)));
    }

    #[test]
    fn late_refund_of_largest_total_stays_in_range() {
        let policy = RefundPolicy {
            full_refund_cutoff_hours: 24,
            late_refund_percent: dec!(100),
        };
        assert_eq!(
            policy.refund(Decimal::MAX, Canceller::Passenger, at(0), at(1)),
            Ok(Decimal::MAX)
        );
    }

    #[test]
    fn backoff_grows_linearly() {
        let store = StoreConfig::default();
        assert_eq!(store.backoff(0), Duration::ZERO);
        assert_eq!(store.backoff(3), Duration::from_millis(30));
        assert_eq!(store.lock_timeout(), Duration::from_millis(250));
    }

    #[test]
    fn partial_config_deserializes_with_defaults() {
        let config: EngineConfig =
            serde_json::from_str(r#"{"refund": {"late_refund_percent": "25"}}"#).unwrap();
        assert_eq!(config.refund.late_refund_percent, dec!(25));
        assert_eq!(config.refund.full_refund_cutoff_hours, 24);
        assert_eq!(config.store, StoreConfig::default());
    }
}
