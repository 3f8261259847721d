//! Binary support for the Loops email provider: configuration, logging,
//! seeding and the run modes.

pub mod app;
pub mod config;
pub mod observability;
pub mod seed;

pub use app::{bind, prepare_store, run_all, run_manager, serve_webhook};
pub use config::{AppConfig, ConfigError};
