//! Entitlement record entity: the persisted proof that an email/plan has
//! paid access, keyed by a hashed activation code.

pub mod group;
pub mod model;
pub mod plan;
pub mod status;

pub use group::BillingGroup;
pub use model::{Entitlement, EntitlementPatch, NewEntitlement};
pub use plan::Plan;
pub use status::EntitlementStatus;
