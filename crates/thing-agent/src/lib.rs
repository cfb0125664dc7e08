//! Thing agent: library crate for the example device runtime.
//!
//! Re-exports all modules so external crates (e.g. `thing-e2e-tests`) can
//! drive the config handler and status publisher against a mock broker.

pub mod config;
pub mod handler;
pub mod status;
