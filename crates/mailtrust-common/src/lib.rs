//! MailTrust Common - Shared types and utilities
//!
//! This crate provides identifiers, status enums, configuration and the
//! error type shared across all MailTrust components.

pub mod config;
pub mod error;
pub mod types;

pub use config::Config;
pub use error::{Error, Result};
