//! Codeforge Core
//!
//! Foundational types for the Codeforge workspace. This crate has no
//! dependency on the HTTP stack, the async runtime or the application crate.
//!
//! ## Module Organization
//!
//! - `error` - Core error types (`CoreError`, `CoreResult`)
//! - `json_recovery` - Repair cascade for approximately-JSON model output
//! - `proxy` - Outbound proxy settings
//! - `streaming` - Decoded stream delta events and the adapter trait

pub mod error;
pub mod json_recovery;
pub mod proxy;
pub mod streaming;

// ── Error Types ────────────────────────────────────────────────────────
pub use error::{CoreError, CoreResult};

// ── Output Recovery ────────────────────────────────────────────────────
pub use json_recovery::{
    extract_keyed_object, recover, repair_escapes, strip_code_fences, strip_reasoning,
    EscapeScanner, Recovered, ScanState,
};

// ── Proxy Types ────────────────────────────────────────────────────────
pub use proxy::{ProxyConfig, ProxyProtocol};

// ── Streaming Types ────────────────────────────────────────────────────
pub use streaming::{AdapterError, DeltaEvent, StreamAdapter};
