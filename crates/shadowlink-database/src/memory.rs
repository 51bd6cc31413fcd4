//! In-memory store implementations using Tokio mutexes.
//!
//! Suitable for single-node development and tests. They uphold the same
//! guarantees as the PostgreSQL stores: unique `code_hash`/`session_ref`/
//! owner email, and atomic first-use device binding.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::Mutex;

use shadowlink_core::error::AppError;
use shadowlink_core::result::AppResult;
use shadowlink_core::types::id::{EntitlementId, OwnerId};
use shadowlink_entity::entitlement::{
    BillingGroup, Entitlement, EntitlementPatch, EntitlementStatus, NewEntitlement,
};
use shadowlink_entity::owner::{Owner, OwnerPatch};

use crate::store::{EntitlementStore, OwnerStore};

/// In-memory entitlement store.
#[derive(Debug, Clone, Default)]
pub struct MemoryEntitlementStore {
    records: Arc<Mutex<Vec<Entitlement>>>,
}

impl MemoryEntitlementStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a fully formed record, bypassing uniqueness bookkeeping.
    ///
    /// For seeding legacy rows (e.g. plaintext-keyed records) that the
    /// normal creation path can no longer produce.
    pub async fn insert_raw(&self, record: Entitlement) {
        self.records.lock().await.push(record);
    }

    /// Snapshot of all records, newest first.
    pub async fn all(&self) -> Vec<Entitlement> {
        let mut records = self.records.lock().await.clone();
        records.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        records
    }

    fn in_group(record: &Entitlement, group: &BillingGroup) -> bool {
        if let Some(ref sub) = group.subscription_ref {
            if record.subscription_ref.as_deref() == Some(sub.as_str()) {
                return true;
            }
        }
        if let Some(ref customer) = group.customer_ref {
            if record.customer_ref.as_deref() == Some(customer.as_str())
                && record.email == group.email
            {
                return true;
            }
        }
        false
    }

    fn apply_patch(record: &mut Entitlement, patch: EntitlementPatch, now: DateTime<Utc>) {
        if let Some(plan) = patch.plan {
            record.plan = plan;
        }
        if let Some(status) = patch.status {
            record.status = status;
        }
        if let Some(expires_at) = patch.expires_at {
            record.expires_at = expires_at;
        }
        if let Some(subscription_ref) = patch.subscription_ref {
            record.subscription_ref = subscription_ref;
        }
        if let Some(subscription_status) = patch.subscription_status {
            record.subscription_status = subscription_status;
        }
        if let Some(period_end) = patch.period_end {
            record.period_end = period_end;
        }
        record.updated_at = now;
    }
}

#[async_trait]
impl EntitlementStore for MemoryEntitlementStore {
    async fn create_if_absent(&self, new: NewEntitlement) -> AppResult<(Entitlement, bool)> {
        let mut records = self.records.lock().await;

        if let Some(ref session_ref) = new.session_ref {
            if let Some(existing) = records
                .iter()
                .find(|r| r.session_ref.as_deref() == Some(session_ref.as_str()))
            {
                return Ok((existing.clone(), false));
            }
        }

        if records
            .iter()
            .any(|r| r.code_hash.as_deref() == Some(new.code_hash.as_str()))
        {
            return Err(AppError::conflict("Duplicate activation code hash"));
        }

        let now = Utc::now();
        let record = Entitlement {
            id: EntitlementId::new(),
            email: new.email,
            plan: new.plan,
            code_hash: Some(new.code_hash),
            plain_code: new.plain_code,
            status: new.status,
            expires_at: new.expires_at,
            session_ref: new.session_ref,
            customer_ref: new.customer_ref,
            subscription_ref: new.subscription_ref,
            subscription_status: new.subscription_status,
            period_end: new.period_end,
            redeemed_device_id: None,
            redeemed_at: None,
            created_at: now,
            updated_at: now,
        };
        records.push(record.clone());
        Ok((record, true))
    }

    async fn find_by_id(&self, id: EntitlementId) -> AppResult<Option<Entitlement>> {
        let records = self.records.lock().await;
        Ok(records.iter().find(|r| r.id == id).cloned())
    }

    async fn find_by_code_hash(&self, code_hash: &str) -> AppResult<Option<Entitlement>> {
        let records = self.records.lock().await;
        Ok(records
            .iter()
            .find(|r| r.code_hash.as_deref() == Some(code_hash))
            .cloned())
    }

    async fn find_by_plain_code(&self, code: &str) -> AppResult<Option<Entitlement>> {
        let records = self.records.lock().await;
        Ok(records
            .iter()
            .find(|r| r.plain_code.as_deref() == Some(code))
            .cloned())
    }

    async fn find_by_session_ref(&self, session_ref: &str) -> AppResult<Option<Entitlement>> {
        let records = self.records.lock().await;
        Ok(records
            .iter()
            .find(|r| r.session_ref.as_deref() == Some(session_ref))
            .cloned())
    }

    async fn adopt_code_hash(&self, id: EntitlementId, code_hash: &str) -> AppResult<Entitlement> {
        let mut records = self.records.lock().await;
        let record = records
            .iter_mut()
            .find(|r| r.id == id)
            .ok_or_else(|| AppError::not_found("Entitlement not found"))?;
        record.code_hash = Some(code_hash.to_string());
        record.plain_code = None;
        record.updated_at = Utc::now();
        Ok(record.clone())
    }

    async fn find_group(&self, group: &BillingGroup) -> AppResult<Vec<Entitlement>> {
        let records = self.records.lock().await;
        let mut found: Vec<Entitlement> = records
            .iter()
            .filter(|r| Self::in_group(r, group))
            .cloned()
            .collect();
        found.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(found)
    }

    async fn find_active_for_email(&self, email: &str) -> AppResult<Vec<Entitlement>> {
        let records = self.records.lock().await;
        let mut found: Vec<Entitlement> = records
            .iter()
            .filter(|r| r.email == email && r.status == EntitlementStatus::Active)
            .cloned()
            .collect();
        found.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(found)
    }

    async fn apply(&self, id: EntitlementId, patch: EntitlementPatch) -> AppResult<Entitlement> {
        let mut records = self.records.lock().await;
        let record = records
            .iter_mut()
            .find(|r| r.id == id)
            .ok_or_else(|| AppError::not_found("Entitlement not found"))?;
        Self::apply_patch(record, patch, Utc::now());
        Ok(record.clone())
    }

    async fn bind_device(
        &self,
        id: EntitlementId,
        device_id: &str,
        at: DateTime<Utc>,
    ) -> AppResult<Entitlement> {
        let mut records = self.records.lock().await;
        let record = records
            .iter_mut()
            .find(|r| r.id == id)
            .ok_or_else(|| AppError::not_found("Entitlement not found"))?;
        if record.redeemed_device_id.is_none() {
            record.redeemed_device_id = Some(device_id.to_string());
            record.redeemed_at = Some(at);
            record.updated_at = at;
        }
        Ok(record.clone())
    }

    async fn delete_group(&self, group: &BillingGroup) -> AppResult<u64> {
        let mut records = self.records.lock().await;
        let before = records.len();
        records.retain(|r| !Self::in_group(r, group));
        Ok((before - records.len()) as u64)
    }
}

/// In-memory owner store.
#[derive(Debug, Clone, Default)]
pub struct MemoryOwnerStore {
    owners: Arc<Mutex<Vec<Owner>>>,
}

impl MemoryOwnerStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl OwnerStore for MemoryOwnerStore {
    async fn find_by_id(&self, id: OwnerId) -> AppResult<Option<Owner>> {
        let owners = self.owners.lock().await;
        Ok(owners.iter().find(|o| o.id == id).cloned())
    }

    async fn find_by_email(&self, email: &str) -> AppResult<Option<Owner>> {
        let owners = self.owners.lock().await;
        Ok(owners.iter().find(|o| o.email == email).cloned())
    }

    async fn find_by_customer_ref(&self, customer_ref: &str) -> AppResult<Option<Owner>> {
        let owners = self.owners.lock().await;
        Ok(owners
            .iter()
            .find(|o| o.customer_ref.as_deref() == Some(customer_ref))
            .cloned())
    }

    async fn find_by_subscription_ref(&self, subscription_ref: &str) -> AppResult<Option<Owner>> {
        let owners = self.owners.lock().await;
        Ok(owners
            .iter()
            .find(|o| o.subscription_ref.as_deref() == Some(subscription_ref))
            .cloned())
    }

    async fn create_if_absent(&self, email: &str) -> AppResult<Owner> {
        let mut owners = self.owners.lock().await;
        if let Some(existing) = owners.iter().find(|o| o.email == email) {
            return Ok(existing.clone());
        }
        let now = Utc::now();
        let owner = Owner {
            id: OwnerId::new(),
            email: email.to_string(),
            customer_ref: None,
            subscription_ref: None,
            subscription_status: None,
            plan: None,
            current_period_end: None,
            created_at: now,
            updated_at: now,
        };
        owners.push(owner.clone());
        Ok(owner)
    }

    async fn apply(&self, id: OwnerId, patch: OwnerPatch) -> AppResult<Owner> {
        let mut owners = self.owners.lock().await;
        let owner = owners
            .iter_mut()
            .find(|o| o.id == id)
            .ok_or_else(|| AppError::not_found("Owner not found"))?;
        if let Some(customer_ref) = patch.customer_ref {
            owner.customer_ref = customer_ref;
        }
        if let Some(subscription_ref) = patch.subscription_ref {
            owner.subscription_ref = subscription_ref;
        }
        if let Some(subscription_status) = patch.subscription_status {
            owner.subscription_status = subscription_status;
        }
        if let Some(plan) = patch.plan {
            owner.plan = plan;
        }
        if let Some(current_period_end) = patch.current_period_end {
            owner.current_period_end = current_period_end;
        }
        owner.updated_at = Utc::now();
        Ok(owner.clone())
    }
}
