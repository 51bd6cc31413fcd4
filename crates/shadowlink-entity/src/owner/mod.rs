//! Account owner entity: the root from which entitlement records are
//! discovered when a lifecycle transition must cascade.

pub mod model;

pub use model::{Owner, OwnerPatch};
