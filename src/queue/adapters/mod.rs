//! Adapter implementations for queue ports.

pub mod channel;
pub mod memory;
pub mod postgres;
