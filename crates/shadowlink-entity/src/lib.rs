//! # shadowlink-entity
//!
//! Domain entity models for the Shadow Link licensing backend. Every struct
//! in this crate represents a database table row or a domain value object.
//! All entities derive `Debug`, `Clone`, `Serialize`, `Deserialize`, and
//! database entities additionally derive `sqlx::FromRow`.

pub mod entitlement;
pub mod owner;
pub mod verdict;
