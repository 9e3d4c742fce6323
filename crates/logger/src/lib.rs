//! Tracing setup shared by the Uppe binaries.

mod tracing;

pub use self::tracing::{LogFormat, init};
