//! Prerendering server for single-page application bundles.
//!
//! Exposes the CLI, configuration and HTTP layers for integration testing.

pub mod cli;
pub mod config;
pub mod metrics;
pub mod server;

pub use config::Config;
pub use server::{build_router, ServeOptions, ServeState};
