//! # Core Runtime Module
//!
//! Provides foundational runtime infrastructure for the authentication core:
//! - Logging and tracing infrastructure
//! - Configuration management
//!
//! ## Overview
//!
//! This crate contains the runtime utilities the other crates depend on. It
//! owns the OAuth settings, wires the host bridges into a validated
//! [`CoreConfig`](config::CoreConfig) and establishes the logging conventions
//! used throughout the system.

pub mod config;
pub mod error;
pub mod logging;

pub use config::{CoreConfig, CoreConfigBuilder, OAuthConfig};
pub use error::{Error, Result};
