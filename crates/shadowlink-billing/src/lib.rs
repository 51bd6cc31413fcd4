//! # shadowlink-billing
//!
//! Adapter over the external billing provider. The rest of the system never
//! touches provider-native payloads: this crate narrows them to the exact
//! fields the licensing core depends on, bounds every call with a timeout,
//! and ships both a real HTTP client and a scriptable in-memory mock behind
//! the same [`provider::BillingProvider`] seam.

pub mod http;
pub mod mock;
pub mod oracle;
pub mod price;
pub mod provider;
pub mod types;
pub mod webhook;

pub use oracle::BillingOracle;
pub use provider::BillingProvider;
