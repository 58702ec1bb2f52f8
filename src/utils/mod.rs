//! Utility Modules
//!
//! Error handling and shared helpers.

pub mod error;
pub mod telemetry;

pub use error::{sanitize, AppError, AppResult, ErrorCategory};
