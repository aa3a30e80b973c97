//! Background task queue for SIM provisioning.
//!
//! Requests to change SIM state or labels are queued as tasks and executed
//! against the upstream provider by a single polling worker, with retries,
//! batch tracking, audit records and UI notifications. The module follows
//! hexagonal architecture:
//!
//! - Domain types in [`domain`]
//! - Port contracts in [`ports`]
//! - Adapter implementations in [`adapters`]
//! - Orchestration services in [`services`]

pub mod adapters;
pub mod domain;
pub mod ports;
pub mod services;

#[cfg(test)]
mod tests;
