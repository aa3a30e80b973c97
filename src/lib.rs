//! Simqueue: background task queue for SIM provisioning.
//!
//! User requests to change SIM state or labels are persisted as tasks and
//! executed asynchronously against the upstream provider by a single
//! polling worker. The queue retries transient failures with backoff,
//! completes hopeless ones without retry, tracks batch progress, and keeps
//! the local SIM mirror in step with the provider.
//!
//! # Architecture
//!
//! Simqueue follows hexagonal architecture principles:
//!
//! - **Domain**: Task lifecycle, retry policy and progress views
//! - **Ports**: Repository, provider, mirror, audit and event interfaces
//! - **Adapters**: In-memory, `PostgreSQL` and channel-backed implementations
//!
//! # Modules
//!
//! - [`queue`]: Task queue domain, services and adapters
//! - [`config`]: Environment-driven runtime configuration

pub mod config;
pub mod queue;
