//! # Muster Common
//!
//! Shared types, errors, and defaults used across Muster components.
//!
//! ## Modules
//! - `types` - Core data structures (ContactPoint, Decision, BootstrapStatus, etc.)
//! - `error` - Common error types
//! - `constants` - Configuration defaults and route paths

pub mod constants;
pub mod error;
pub mod types;

pub use error::MusterError;
pub use types::*;
