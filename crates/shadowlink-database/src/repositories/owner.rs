//! Owner store implementation over PostgreSQL.

use async_trait::async_trait;
use sqlx::{PgPool, Postgres, QueryBuilder};

use shadowlink_core::error::{AppError, ErrorKind};
use shadowlink_core::result::AppResult;
use shadowlink_core::types::id::OwnerId;
use shadowlink_entity::owner::{Owner, OwnerPatch};

use crate::store::OwnerStore;

/// PostgreSQL-backed owner store.
#[derive(Debug, Clone)]
pub struct PgOwnerStore {
    pool: PgPool,
}

impl PgOwnerStore {
    /// Create a new owner store over a connection pool.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl OwnerStore for PgOwnerStore {
    async fn find_by_id(&self, id: OwnerId) -> AppResult<Option<Owner>> {
        sqlx::query_as::<_, Owner>("SELECT * FROM owners WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| AppError::with_source(ErrorKind::Database, "Failed to find owner", e))
    }

    async fn find_by_email(&self, email: &str) -> AppResult<Option<Owner>> {
        sqlx::query_as::<_, Owner>("SELECT * FROM owners WHERE email = $1")
            .bind(email)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| {
                AppError::with_source(ErrorKind::Database, "Failed to find owner by email", e)
            })
    }

    async fn find_by_customer_ref(&self, customer_ref: &str) -> AppResult<Option<Owner>> {
        sqlx::query_as::<_, Owner>("SELECT * FROM owners WHERE customer_ref = $1")
            .bind(customer_ref)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| {
                AppError::with_source(ErrorKind::Database, "Failed to find owner by customer", e)
            })
    }

    async fn find_by_subscription_ref(&self, subscription_ref: &str) -> AppResult<Option<Owner>> {
        sqlx::query_as::<_, Owner>("SELECT * FROM owners WHERE subscription_ref = $1")
            .bind(subscription_ref)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| {
                AppError::with_source(
                    ErrorKind::Database,
                    "Failed to find owner by subscription",
                    e,
                )
            })
    }

    async fn create_if_absent(&self, email: &str) -> AppResult<Owner> {
        let inserted = sqlx::query_as::<_, Owner>(
            "INSERT INTO owners (id, email) VALUES ($1, $2) \
             ON CONFLICT (email) DO NOTHING RETURNING *",
        )
        .bind(OwnerId::new())
        .bind(email)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| AppError::with_source(ErrorKind::Database, "Failed to create owner", e))?;

        match inserted {
            Some(owner) => Ok(owner),
            None => self
                .find_by_email(email)
                .await?
                .ok_or_else(|| AppError::database("Conflicting owner vanished after insert race")),
        }
    }

    async fn apply(&self, id: OwnerId, patch: OwnerPatch) -> AppResult<Owner> {
        if patch.is_empty() {
            return self
                .find_by_id(id)
                .await?
                .ok_or_else(|| AppError::not_found("Owner not found"));
        }

        let mut qb: QueryBuilder<Postgres> =
            QueryBuilder::new("UPDATE owners SET updated_at = NOW()");
        if let Some(customer_ref) = patch.customer_ref {
            qb.push(", customer_ref = ").push_bind(customer_ref);
        }
        if let Some(subscription_ref) = patch.subscription_ref {
            qb.push(", subscription_ref = ").push_bind(subscription_ref);
        }
        if let Some(subscription_status) = patch.subscription_status {
            qb.push(", subscription_status = ")
                .push_bind(subscription_status);
        }
        if let Some(plan) = patch.plan {
            qb.push(", plan = ").push_bind(plan);
        }
        if let Some(current_period_end) = patch.current_period_end {
            qb.push(", current_period_end = ")
                .push_bind(current_period_end);
        }
        qb.push(" WHERE id = ").push_bind(id);
        qb.push(" RETURNING *");

        qb.build_query_as::<Owner>()
            .fetch_one(&self.pool)
            .await
            .map_err(|e| AppError::with_source(ErrorKind::Database, "Failed to patch owner", e))
    }
}
