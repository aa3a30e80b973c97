//! Step definitions for queue processing scenarios.

mod given;
mod provider;
mod then;
mod when;
pub mod world;
