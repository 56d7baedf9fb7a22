//! Shared utilities.

pub mod clock;
pub mod telemetry;

pub use self::clock::*;
pub use self::telemetry::*;
