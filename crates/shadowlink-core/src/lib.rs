//! # shadowlink-core
//!
//! Core crate for the Shadow Link licensing backend. Contains configuration
//! schemas, typed identifiers, activation-code value types, and the unified
//! error system.
//!
//! This crate has **no** internal dependencies on other Shadow Link crates.

pub mod config;
pub mod error;
pub mod result;
pub mod types;

pub use error::AppError;
pub use result::AppResult;
