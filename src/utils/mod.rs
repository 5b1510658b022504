//! Utils module - Utility functions and helpers

pub mod logging;
pub mod metrics;
pub mod sanitize;
pub mod string;
