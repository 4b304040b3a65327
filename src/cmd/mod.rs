//! Command-line entry points.

pub mod redact;
pub mod schema;
pub mod worker;
