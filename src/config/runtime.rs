//! Runtime configuration

use std::time::Duration;

use crate::config::{CliArgs, cli::CliCommand};

/// Runtime configuration derived from the command line
#[derive(Debug, Clone)]
pub struct RuntimeConfig {
    pub adapter: Option<String>,
    pub device_filter: Option<String>,
    pub scan_timeout: Duration,
    pub output: Option<String>,
    pub command: CliCommand,
}

impl From<CliArgs> for RuntimeConfig {
    fn from(args: CliArgs) -> Self {
        RuntimeConfig {
            adapter: args.adapter,
            device_filter: args.device.filter(|d| !d.trim().is_empty()),
            scan_timeout: Duration::from_secs(args.scan_timeout.max(1)),
            output: args.output,
            command: args.command,
        }
    }
}
