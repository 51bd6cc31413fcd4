//! Entitlement store implementation over PostgreSQL.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{PgPool, Postgres, QueryBuilder};

use shadowlink_core::error::{AppError, ErrorKind};
use shadowlink_core::result::AppResult;
use shadowlink_core::types::id::EntitlementId;
use shadowlink_entity::entitlement::{BillingGroup, Entitlement, EntitlementPatch, NewEntitlement};

use crate::store::EntitlementStore;

/// PostgreSQL-backed entitlement store.
///
/// Uniqueness of `code_hash` and `session_ref` is enforced by partial
/// unique indexes; device binding is a conditional `UPDATE` so that the
/// first-use-wins property holds without a cross-call transaction.
#[derive(Debug, Clone)]
pub struct PgEntitlementStore {
    pool: PgPool,
}

impl PgEntitlementStore {
    /// Create a new entitlement store over a connection pool.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    fn map_insert_error(e: sqlx::Error) -> AppError {
        if let sqlx::Error::Database(ref db) = e {
            if db.constraint() == Some("entitlements_code_hash_key") {
                return AppError::conflict("Duplicate activation code hash");
            }
        }
        AppError::with_source(ErrorKind::Database, "Failed to create entitlement", e)
    }
}

#[async_trait]
impl EntitlementStore for PgEntitlementStore {
    async fn create_if_absent(&self, new: NewEntitlement) -> AppResult<(Entitlement, bool)> {
        if let Some(ref session_ref) = new.session_ref {
            if let Some(existing) = self.find_by_session_ref(session_ref).await? {
                return Ok((existing, false));
            }
        }

        let inserted = sqlx::query_as::<_, Entitlement>(
            "INSERT INTO entitlements \
             (id, email, plan, code_hash, plain_code, status, expires_at, session_ref, \
              customer_ref, subscription_ref, subscription_status, period_end) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12) \
             ON CONFLICT (session_ref) WHERE session_ref IS NOT NULL DO NOTHING \
             RETURNING *",
        )
        .bind(EntitlementId::new())
        .bind(&new.email)
        .bind(new.plan)
        .bind(&new.code_hash)
        .bind(&new.plain_code)
        .bind(new.status)
        .bind(new.expires_at)
        .bind(&new.session_ref)
        .bind(&new.customer_ref)
        .bind(&new.subscription_ref)
        .bind(&new.subscription_status)
        .bind(new.period_end)
        .fetch_optional(&self.pool)
        .await
        .map_err(Self::map_insert_error)?;

        match inserted {
            Some(record) => Ok((record, true)),
            None => {
                // Lost the insert race; the first writer's record stands.
                let session_ref = new.session_ref.as_deref().ok_or_else(|| {
                    AppError::database("Insert returned no row without a session conflict")
                })?;
                self.find_by_session_ref(session_ref)
                    .await?
                    .map(|record| (record, false))
                    .ok_or_else(|| {
                        AppError::database("Conflicting entitlement vanished after insert race")
                    })
            }
        }
    }

    async fn find_by_id(&self, id: EntitlementId) -> AppResult<Option<Entitlement>> {
        sqlx::query_as::<_, Entitlement>("SELECT * FROM entitlements WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| {
                AppError::with_source(ErrorKind::Database, "Failed to find entitlement by id", e)
            })
    }

    async fn find_by_code_hash(&self, code_hash: &str) -> AppResult<Option<Entitlement>> {
        sqlx::query_as::<_, Entitlement>("SELECT * FROM entitlements WHERE code_hash = $1")
            .bind(code_hash)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| {
                AppError::with_source(ErrorKind::Database, "Failed to find entitlement by hash", e)
            })
    }

    async fn find_by_plain_code(&self, code: &str) -> AppResult<Option<Entitlement>> {
        sqlx::query_as::<_, Entitlement>("SELECT * FROM entitlements WHERE plain_code = $1")
            .bind(code)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| {
                AppError::with_source(ErrorKind::Database, "Failed to find entitlement by code", e)
            })
    }

    async fn find_by_session_ref(&self, session_ref: &str) -> AppResult<Option<Entitlement>> {
        sqlx::query_as::<_, Entitlement>("SELECT * FROM entitlements WHERE session_ref = $1")
            .bind(session_ref)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| {
                AppError::with_source(
                    ErrorKind::Database,
                    "Failed to find entitlement by session",
                    e,
                )
            })
    }

    async fn adopt_code_hash(&self, id: EntitlementId, code_hash: &str) -> AppResult<Entitlement> {
        sqlx::query_as::<_, Entitlement>(
            "UPDATE entitlements SET code_hash = $2, plain_code = NULL, updated_at = NOW() \
             WHERE id = $1 RETURNING *",
        )
        .bind(id)
        .bind(code_hash)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| AppError::with_source(ErrorKind::Database, "Failed to adopt code hash", e))
    }

    async fn find_group(&self, group: &BillingGroup) -> AppResult<Vec<Entitlement>> {
        sqlx::query_as::<_, Entitlement>(
            "SELECT * FROM entitlements \
             WHERE ($1::TEXT IS NOT NULL AND subscription_ref = $1) \
                OR ($2::TEXT IS NOT NULL AND customer_ref = $2 AND email = $3) \
             ORDER BY created_at DESC",
        )
        .bind(&group.subscription_ref)
        .bind(&group.customer_ref)
        .bind(&group.email)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| {
            AppError::with_source(ErrorKind::Database, "Failed to find entitlement group", e)
        })
    }

    async fn find_active_for_email(&self, email: &str) -> AppResult<Vec<Entitlement>> {
        sqlx::query_as::<_, Entitlement>(
            "SELECT * FROM entitlements WHERE email = $1 AND status = 'active' \
             ORDER BY created_at DESC",
        )
        .bind(email)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| {
            AppError::with_source(ErrorKind::Database, "Failed to find entitlements by email", e)
        })
    }

    async fn apply(&self, id: EntitlementId, patch: EntitlementPatch) -> AppResult<Entitlement> {
        if patch.is_empty() {
            return self
                .find_by_id(id)
                .await?
                .ok_or_else(|| AppError::not_found("Entitlement not found"));
        }

        let mut qb: QueryBuilder<Postgres> =
            QueryBuilder::new("UPDATE entitlements SET updated_at = NOW()");
        if let Some(plan) = patch.plan {
            qb.push(", plan = ").push_bind(plan);
        }
        if let Some(status) = patch.status {
            qb.push(", status = ").push_bind(status);
        }
        if let Some(expires_at) = patch.expires_at {
            qb.push(", expires_at = ").push_bind(expires_at);
        }
        if let Some(subscription_ref) = patch.subscription_ref {
            qb.push(", subscription_ref = ").push_bind(subscription_ref);
        }
        if let Some(subscription_status) = patch.subscription_status {
            qb.push(", subscription_status = ")
                .push_bind(subscription_status);
        }
        if let Some(period_end) = patch.period_end {
            qb.push(", period_end = ").push_bind(period_end);
        }
        qb.push(" WHERE id = ").push_bind(id);
        qb.push(" RETURNING *");

        qb.build_query_as::<Entitlement>()
            .fetch_one(&self.pool)
            .await
            .map_err(|e| {
                AppError::with_source(ErrorKind::Database, "Failed to patch entitlement", e)
            })
    }

    async fn bind_device(
        &self,
        id: EntitlementId,
        device_id: &str,
        at: DateTime<Utc>,
    ) -> AppResult<Entitlement> {
        let bound = sqlx::query_as::<_, Entitlement>(
            "UPDATE entitlements \
             SET redeemed_device_id = $2, redeemed_at = $3, updated_at = NOW() \
             WHERE id = $1 AND redeemed_device_id IS NULL \
             RETURNING *",
        )
        .bind(id)
        .bind(device_id)
        .bind(at)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| AppError::with_source(ErrorKind::Database, "Failed to bind device", e))?;

        match bound {
            Some(record) => Ok(record),
            // Another device won the race; surface its binding.
            None => self
                .find_by_id(id)
                .await?
                .ok_or_else(|| AppError::not_found("Entitlement not found during device binding")),
        }
    }

    async fn delete_group(&self, group: &BillingGroup) -> AppResult<u64> {
        let result = sqlx::query(
            "DELETE FROM entitlements \
             WHERE ($1::TEXT IS NOT NULL AND subscription_ref = $1) \
                OR ($2::TEXT IS NOT NULL AND customer_ref = $2 AND email = $3)",
        )
        .bind(&group.subscription_ref)
        .bind(&group.customer_ref)
        .bind(&group.email)
        .execute(&self.pool)
        .await
        .map_err(|e| {
            AppError::with_source(ErrorKind::Database, "Failed to delete entitlement group", e)
        })?;
        Ok(result.rows_affected())
    }
}
