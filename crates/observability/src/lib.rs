//! Tracing/logging setup shared by the binary and tests.

mod logging;

pub use logging::{init, LogConfig, LogFormat, LogFormatError};
