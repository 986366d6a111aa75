//! eatly-entrypoint: container entrypoint for the eatly web service.
//!
//! Waits for postgres in production-like modes, applies migrations,
//! collects static assets and then execs the web server so it becomes the
//! container's main process.

pub mod commands;
pub mod config;
pub mod error;
pub mod logging;
pub mod startup;

pub use config::EntrypointConfig;
pub use error::{StartupError, exit_code_for};
