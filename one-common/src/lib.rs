//! Shared primitives for the One bot services.
//!
//! This crate provides:
//! - Unified error type with HTTP status mapping
//! - Configuration loading (config file + environment overrides)
//! - Logging bootstrap with noise filtering

#![warn(clippy::all)]

pub mod config;
pub mod error;
pub mod logging;

pub use config::Config;
pub use error::{Error, Result, ResultExt};
