//! Core library for the pool-listener project.
//!
//! Watches DEX pool events, keeps a priced snapshot of every market it has
//! seen and hands two-pool arbitrage candidates to an executor.

pub mod arbitrage;
pub mod config;
pub mod dex;
pub mod errors;
pub mod execution;
pub mod models;
pub mod monitor;
pub mod multicall;
pub mod onboarding;
pub mod store;
pub mod utils;
