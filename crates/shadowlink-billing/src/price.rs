//! Cached provider price resolution.

use std::collections::HashMap;

use tokio::sync::RwLock;
use tracing::debug;

use shadowlink_core::result::AppResult;
use shadowlink_entity::entitlement::Plan;

use crate::oracle::BillingOracle;
use crate::types::PricingSpec;

/// Resolves plan prices to provider price references, creating them on the
/// provider when missing. Resolutions are cached per plan; prices change
/// rarely and only through this system.
#[derive(Debug)]
pub struct PriceResolver {
    oracle: BillingOracle,
    cache: RwLock<HashMap<Plan, String>>,
}

impl PriceResolver {
    /// Create a resolver over an oracle.
    pub fn new(oracle: BillingOracle) -> Self {
        Self {
            oracle,
            cache: RwLock::new(HashMap::new()),
        }
    }

    /// Resolve the provider price reference for a pricing spec.
    pub async fn resolve(&self, spec: &PricingSpec) -> AppResult<String> {
        {
            let cache = self.cache.read().await;
            if let Some(price_ref) = cache.get(&spec.plan) {
                return Ok(price_ref.clone());
            }
        }

        let price_ref = self.oracle.ensure_price(spec).await?;
        debug!(plan = %spec.plan, price = %price_ref, "Resolved provider price");

        let mut cache = self.cache.write().await;
        cache.insert(spec.plan, price_ref.clone());
        Ok(price_ref)
    }

    /// Drop all cached resolutions (e.g. after a price change).
    pub async fn invalidate(&self) {
        self.cache.write().await.clear();
    }
}
