//! Configuration Module
//!
//! Handles configuration loading, validation, and session resolution.

pub mod manager;
pub mod types;

pub use manager::ConfigManager;
pub use types::*;
