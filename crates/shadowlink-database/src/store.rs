//! Store traits for entitlement and owner persistence.
//!
//! The verifier and lifecycle services depend on these traits rather than a
//! concrete database, so the same logic runs against PostgreSQL in
//! production and against the in-memory stores in tests. Implementations
//! must uphold the uniqueness guarantees (`code_hash`, `session_ref`,
//! owner `email`) and the atomicity of [`EntitlementStore::bind_device`].

use std::fmt;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use shadowlink_core::result::AppResult;
use shadowlink_core::types::id::{EntitlementId, OwnerId};
use shadowlink_entity::entitlement::{BillingGroup, Entitlement, EntitlementPatch, NewEntitlement};
use shadowlink_entity::owner::{Owner, OwnerPatch};

/// Persistence operations for entitlement records.
#[async_trait]
pub trait EntitlementStore: Send + Sync + fmt::Debug + 'static {
    /// Idempotent create keyed on `session_ref`.
    ///
    /// When a record already exists for the same session reference, it is
    /// returned unchanged with `false`; concurrent creation attempts for
    /// the same payment event collapse to one record (first writer wins).
    /// A duplicate `code_hash` is a `Conflict` error the caller retries
    /// with a fresh code.
    async fn create_if_absent(&self, new: NewEntitlement) -> AppResult<(Entitlement, bool)>;

    /// Find a record by primary key.
    async fn find_by_id(&self, id: EntitlementId) -> AppResult<Option<Entitlement>>;

    /// Find a record by its code digest.
    async fn find_by_code_hash(&self, code_hash: &str) -> AppResult<Option<Entitlement>>;

    /// Legacy lookup by plaintext code; exists only so pre-hash rows can be
    /// migrated in place on first encounter.
    async fn find_by_plain_code(&self, code: &str) -> AppResult<Option<Entitlement>>;

    /// Find the record created for a checkout session, if any.
    async fn find_by_session_ref(&self, session_ref: &str) -> AppResult<Option<Entitlement>>;

    /// Set the code digest on a legacy row and drop its plaintext code.
    async fn adopt_code_hash(&self, id: EntitlementId, code_hash: &str) -> AppResult<Entitlement>;

    /// All records belonging to a billing group (subscription match, or
    /// customer match + email). Cascades operate over exactly this set.
    async fn find_group(&self, group: &BillingGroup) -> AppResult<Vec<Entitlement>>;

    /// Active records for an email, newest first.
    async fn find_active_for_email(&self, email: &str) -> AppResult<Vec<Entitlement>>;

    /// Apply a targeted field patch and return the updated record.
    async fn apply(&self, id: EntitlementId, patch: EntitlementPatch) -> AppResult<Entitlement>;

    /// Bind a device to the record iff no device is bound yet.
    ///
    /// This must be an atomic compare-and-set at the store level; a plain
    /// read-then-write is not sufficient under concurrency. Returns the
    /// post-condition record, so the loser of a race observes the winner's
    /// binding rather than its own.
    async fn bind_device(
        &self,
        id: EntitlementId,
        device_id: &str,
        at: DateTime<Utc>,
    ) -> AppResult<Entitlement>;

    /// Delete every record in a billing group; returns how many went away.
    async fn delete_group(&self, group: &BillingGroup) -> AppResult<u64>;
}

/// Persistence operations for account owners.
#[async_trait]
pub trait OwnerStore: Send + Sync + fmt::Debug + 'static {
    /// Find an owner by primary key.
    async fn find_by_id(&self, id: OwnerId) -> AppResult<Option<Owner>>;

    /// Find an owner by normalized email.
    async fn find_by_email(&self, email: &str) -> AppResult<Option<Owner>>;

    /// Find the owner holding a billing customer reference.
    async fn find_by_customer_ref(&self, customer_ref: &str) -> AppResult<Option<Owner>>;

    /// Find the owner holding a billing subscription reference.
    async fn find_by_subscription_ref(&self, subscription_ref: &str) -> AppResult<Option<Owner>>;

    /// Create an owner for an email, or return the existing one.
    async fn create_if_absent(&self, email: &str) -> AppResult<Owner>;

    /// Apply a targeted field patch and return the updated owner.
    async fn apply(&self, id: OwnerId, patch: OwnerPatch) -> AppResult<Owner>;
}
