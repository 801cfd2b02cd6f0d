//! Environment-driven configuration for the serving core.

mod config;

pub use config::Config;
