//! Admission Gateway
//!
//! The inbound HTTP surface: dynamic strategy webhooks, the OAuth callback
//! capture, and the REST command set, all behind the admission pipeline
//! (ban check, API-key validation, traffic and latency accounting).

pub mod handlers;
pub mod pipeline;
pub mod server;
pub mod types;

pub use pipeline::GatewayState;
pub use server::{build_router, AdmissionServer};
