//! Provider-Specific Stream Adapters
//!
//! Each adapter handles the unique streaming format of its provider. The
//! completion gateway speaks the OpenAI-compatible SSE dialect.

pub mod openai;

pub use openai::OpenAIAdapter;
