//! LLMGate gateway library.
//!
//! Orchestrates the request path — validation, authentication,
//! authorization, PII screening, routing with cascade fallback, backend
//! invocation — and feeds one monitoring event per request into the
//! asynchronous event pipeline (processor → anomaly detector → storage →
//! alerts).

pub mod alerts;
pub mod anomaly;
pub mod audit;
pub mod backends;
pub mod config;
pub mod gateway;
pub mod idempotency;
pub mod pipeline;
pub mod processor;
pub mod registry;
pub mod router;
pub mod server;
pub mod validate;
