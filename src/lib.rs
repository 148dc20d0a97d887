//! DICEBOT: dice-betting automation agent
//!
//! Library crate exposing all modules for use by integration tests
//! and the binary entry point.

pub mod config;
pub mod dashboard;
pub mod desktop;
pub mod engine;
pub mod storage;
pub mod strategy;
pub mod types;
pub mod vision;
