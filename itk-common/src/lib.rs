//! # InfiniteTalk Common Library
//!
//! Shared code for the InfiniteTalk orchestration service and its tools:
//! - Bootstrap configuration (TOML file, environment, compiled defaults)
//! - Common error type
//! - Timestamp and identifier helpers

pub mod config;
pub mod error;
pub mod time;
pub mod uuid_utils;

pub use error::{Error, Result};
