//! Configuration module

pub mod cli;
pub mod runtime;

pub use cli::{CliArgs, CliCommand};
pub use runtime::RuntimeConfig;
