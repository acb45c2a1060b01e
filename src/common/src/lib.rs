pub mod cli;
pub mod config;

#[cfg(any(test, feature = "testing"))]
pub mod testing;

pub use config::{Configuration, LoggingConfig, ReceiverConfig, ResetPolicy};
