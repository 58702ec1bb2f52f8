//! Data Models
//!
//! Contains all data structures used throughout the application.

pub mod artifact;
pub mod events;
pub mod settings;

pub use artifact::*;
pub use events::*;
pub use settings::*;
