//! Upgrade proration policy.

use chrono::{DateTime, Utc};

use shadowlink_core::config::billing::ProrationConfig;

/// Outcome of pricing a monthly-to-lifetime upgrade.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpgradeCharge {
    /// Collect this amount (cents) via a one-off charge.
    Charge(i64),
    /// The remaining period value already covers the lifetime price; flip
    /// the plan immediately without charging.
    FreeFlip,
}

/// Configurable proration rule for plan upgrades.
#[derive(Debug, Clone)]
pub struct ProrationPolicy {
    free_flip_when_covered: bool,
    minimum_charge_cents: i64,
}

impl ProrationPolicy {
    /// Build the policy from configuration.
    pub fn from_config(config: &ProrationConfig) -> Self {
        Self {
            free_flip_when_covered: config.free_flip_when_covered,
            minimum_charge_cents: config.minimum_charge_cents,
        }
    }

    /// Price an upgrade from a monthly period to the lifetime plan.
    ///
    /// The unused remainder of the current period is credited against the
    /// lifetime price: `charge = lifetime - monthly * remaining/period`.
    /// Outside a sane period (zero-length, or `now` outside it) no credit
    /// is given.
    pub fn upgrade_charge(
        &self,
        monthly_price_cents: i64,
        lifetime_price_cents: i64,
        period_start: DateTime<Utc>,
        period_end: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> UpgradeCharge {
        let period = (period_end - period_start).num_seconds();
        let remaining = (period_end - now).num_seconds();

        let remaining_value = if period > 0 && remaining > 0 {
            let remaining = remaining.min(period);
            monthly_price_cents * remaining / period
        } else {
            0
        };

        let difference = lifetime_price_cents - remaining_value;
        if difference <= self.minimum_charge_cents {
            if self.free_flip_when_covered {
                UpgradeCharge::FreeFlip
            } else {
                UpgradeCharge::Charge(self.minimum_charge_cents.max(0))
            }
        } else {
            UpgradeCharge::Charge(difference)
        }
    }
}

impl Default for ProrationPolicy {
    fn default() -> Self {
        Self::from_config(&ProrationConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn test_midway_upgrade_charges_difference() {
        let policy = ProrationPolicy::default();
        let start = Utc::now();
        let end = start + Duration::days(30);
        let now = start + Duration::days(15);

        // Half the monthly value (2000) remains; 12000 - 2000 = 10000.
        let charge = policy.upgrade_charge(4000, 12000, start, end, now);
        assert_eq!(charge, UpgradeCharge::Charge(10000));
    }

    #[test]
    fn test_covered_upgrade_is_free() {
        let policy = ProrationPolicy::default();
        let start = Utc::now();
        let end = start + Duration::days(30);

        // Remaining value (almost all of 20000) exceeds a cheap lifetime.
        let charge = policy.upgrade_charge(20000, 15000, start, end, start);
        assert_eq!(charge, UpgradeCharge::FreeFlip);
    }

    #[test]
    fn test_elapsed_period_gives_no_credit() {
        let policy = ProrationPolicy::default();
        let start = Utc::now() - Duration::days(60);
        let end = start + Duration::days(30);

        let charge = policy.upgrade_charge(4000, 12000, start, end, Utc::now());
        assert_eq!(charge, UpgradeCharge::Charge(12000));
    }

    #[test]
    fn test_minimum_charge_threshold() {
        let policy = ProrationPolicy::from_config(&ProrationConfig {
            free_flip_when_covered: true,
            minimum_charge_cents: 100,
        });
        let start = Utc::now();
        let end = start + Duration::days(30);

        // Difference of exactly 100 falls at the threshold: covered.
        let charge = policy.upgrade_charge(11900, 12000, start, end, start);
        assert_eq!(charge, UpgradeCharge::FreeFlip);
    }
}
