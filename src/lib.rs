//! Algodesk Core Library
//!
//! This library provides the trust and session core of the Algodesk desktop
//! trading client: credential custody, local operator identity, broker
//! session lifetime, inbound admission, and the unified services layer.

pub mod admission;
pub mod config;
pub mod custodian;
pub mod domain;
pub mod identity;
pub mod infrastructure;
pub mod ipc;
pub mod persistence;
pub mod scheduler;
pub mod services;
pub mod vault;
