// src/core/mod.rs
//! Configuration and persistence plumbing shared by the service and CLI.

pub mod config_manager;
pub mod database;

pub use config_manager::ConfigManager;
pub use database::Database;
