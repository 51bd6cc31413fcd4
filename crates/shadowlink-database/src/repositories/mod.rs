//! Concrete PostgreSQL store implementations.

pub mod entitlement;
pub mod owner;

pub use entitlement::PgEntitlementStore;
pub use owner::PgOwnerStore;
