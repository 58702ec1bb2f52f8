//! Integration Tests Module
//!
//! End-to-end coverage across the workspace: the OpenRouter transport
//! against a mock gateway, credential/model fallback, the phased pipeline
//! over a scripted transport, the client retry supervisor, and the chat and
//! prompt-enhancement replies.

// Shared fakes and fixtures
mod support;

// OpenRouter transport against a wiremock gateway
mod transport_test;

// Credential rotation and busy classification
mod fallback_test;

// Phased generation through the pipeline runner
mod pipeline_test;

// Client retry supervisor
mod supervisor_test;

// Streamed chat and prompt enhancement
mod assistant_test;
