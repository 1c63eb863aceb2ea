//! Log subscriber setup and timing helpers.

mod logging;

pub use logging::{init_tracing, LogFormat, RunTimer, DEFAULT_FILTER};
