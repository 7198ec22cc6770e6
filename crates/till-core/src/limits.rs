//! Offline exposure limit guard
//!
//! Checked before a payment is enqueued, so a declined payment leaves no
//! rows behind. Caps come from cached store settings; the local config
//! supplies fallbacks for terminals that have never synced settings.

use crate::config::CoreConfig;
use crate::db::Database;
use crate::error::{Error, Result};
use crate::models::{OfflineLimits, PaymentMethod};

/// Guards offline spending against the configured caps.
#[derive(Clone)]
pub struct ExposureGuard {
    db: Database,
    fallback: OfflineLimits,
}

/// Outcome of a non-failing limit probe (the gateway `check-limit` call).
#[derive(Debug, Clone, serde::Serialize)]
pub struct LimitCheck {
    pub allowed: bool,
    pub reason: Option<String>,
}

impl ExposureGuard {
    pub fn new(db: Database, config: &CoreConfig) -> Self {
        Self {
            db,
            fallback: OfflineLimits {
                transaction_cap: config.offline_transaction_cap,
                daily_cap: config.offline_daily_cap,
                transaction_count_cap: config.offline_transaction_count_cap,
            },
        }
    }

    /// Caps in effect right now: synced settings win, config fills gaps.
    pub fn effective_limits(&self) -> Result<OfflineLimits> {
        let synced = self.db.settings_offline_limits()?;
        Ok(OfflineLimits {
            transaction_cap: synced.transaction_cap.or(self.fallback.transaction_cap),
            daily_cap: synced.daily_cap.or(self.fallback.daily_cap),
            transaction_count_cap: synced
                .transaction_count_cap
                .or(self.fallback.transaction_count_cap),
        })
    }

    /// Probe whether a payment of `amount` via `method` would be accepted.
    ///
    /// The per-transaction money cap guards card captures (the amount at
    /// risk if the authorization later fails); cash is already in the
    /// drawer. The aggregate and count caps bound the whole offline burst.
    pub fn check(&self, method: PaymentMethod, amount: f64) -> Result<LimitCheck> {
        let limits = self.effective_limits()?;
        let exposure = self.db.exposure()?;

        if let Some(cap) = limits.transaction_cap {
            if method.is_card() && amount > cap {
                return Ok(LimitCheck {
                    allowed: false,
                    reason: Some(format!(
                        "payment {:.2} exceeds per-transaction cap {:.2}",
                        amount, cap
                    )),
                });
            }
        }

        if let Some(cap) = limits.daily_cap {
            let aggregate = exposure.cash_total + exposure.card_total + amount;
            if aggregate > cap {
                return Ok(LimitCheck {
                    allowed: false,
                    reason: Some(format!(
                        "aggregate offline exposure {:.2} exceeds daily cap {:.2}",
                        aggregate, cap
                    )),
                });
            }
        }

        if let Some(cap) = limits.transaction_count_cap {
            if exposure.transaction_count + 1 > cap {
                return Ok(LimitCheck {
                    allowed: false,
                    reason: Some(format!(
                        "offline transaction count would exceed cap {}",
                        cap
                    )),
                });
            }
        }

        Ok(LimitCheck {
            allowed: true,
            reason: None,
        })
    }

    /// Enforce the caps, turning a refusal into [`Error::LimitExceeded`].
    pub fn enforce(&self, method: PaymentMethod, amount: f64) -> Result<()> {
        let check = self.check(method, amount)?;
        if let Some(reason) = check.reason {
            return Err(Error::LimitExceeded(reason));
        }
        Ok(())
    }

    /// Enforce the caps for a whole payment list (order enqueue).
    pub fn enforce_all(&self, payments: &[crate::models::NewOfflinePayment]) -> Result<()> {
        for payment in payments {
            self.enforce(payment.method, payment.exposure())?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::NewOfflinePayment;

    fn guard_with_caps(
        transaction_cap: Option<f64>,
        daily_cap: Option<f64>,
        count_cap: Option<i64>,
    ) -> (Database, ExposureGuard) {
        let db = Database::in_memory().unwrap();
        let config = CoreConfig {
            offline_transaction_cap: transaction_cap,
            offline_daily_cap: daily_cap,
            offline_transaction_count_cap: count_cap,
            ..Default::default()
        };
        let guard = ExposureGuard::new(db.clone(), &config);
        (db, guard)
    }

    fn card(amount: f64) -> NewOfflinePayment {
        NewOfflinePayment {
            method: PaymentMethod::CardTerminal,
            amount,
            tip: 0.0,
            surcharge: 0.0,
            provider_transaction_id: None,
            cash_tendered: None,
        }
    }

    #[test]
    fn test_transaction_cap_blocks_large_card_payment() {
        let (_db, guard) = guard_with_caps(Some(50.0), None, None);

        let err = guard.enforce(PaymentMethod::CardTerminal, 75.0).unwrap_err();
        assert!(matches!(err, Error::LimitExceeded(_)));

        guard.enforce(PaymentMethod::CardTerminal, 49.99).unwrap();
        // Cash already sits in the drawer; the money cap is a card guard
        guard.enforce(PaymentMethod::Cash, 75.0).unwrap();
    }

    #[test]
    fn test_daily_cap_counts_existing_exposure() {
        let (db, guard) = guard_with_caps(None, Some(100.0), None);

        db.record_order(serde_json::json!({"total": 80.0}), &[card(80.0)])
            .unwrap();

        assert!(guard.enforce(PaymentMethod::CardTerminal, 30.0).is_err());
        guard.enforce(PaymentMethod::CardTerminal, 19.0).unwrap();
    }

    #[test]
    fn test_count_cap() {
        let (db, guard) = guard_with_caps(None, None, Some(1));

        db.record_order(serde_json::json!({"total": 5.0}), &[card(5.0)])
            .unwrap();

        let check = guard.check(PaymentMethod::Cash, 5.0).unwrap();
        assert!(!check.allowed);
        assert!(check.reason.unwrap().contains("count"));
    }

    #[test]
    fn test_synced_settings_override_config() {
        let (db, guard) = guard_with_caps(Some(500.0), None, None);
        db.cache_dataset(
            crate::models::DatasetKey::Settings,
            &[serde_json::json!({"id": 1, "data": {"offline_transaction_cap": 25.0}})],
            &[],
            "1",
        )
        .unwrap();

        assert!(guard.enforce(PaymentMethod::CardTerminal, 30.0).is_err());
    }

    #[test]
    fn test_no_caps_allows_anything() {
        let (_db, guard) = guard_with_caps(None, None, None);
        guard.enforce(PaymentMethod::CardTerminal, 10_000.0).unwrap();
    }
}
