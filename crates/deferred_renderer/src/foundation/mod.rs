//! Foundation module - Core utilities and types
//!
//! - Math types and projection helpers
//! - Logging utilities

pub mod logging;
pub mod math;
