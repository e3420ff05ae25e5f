//! Command-line argument parsing

use clap::{Parser, Subcommand};

#[derive(Parser, Debug, Clone)]
#[clap(name = "sneak32-link", version, author)]
#[clap(about = "Host-side BLE client for the Sneak32 WiFi/BLE sniffer")]
pub struct CliArgs {
    /// Bluetooth adapter name (default adapter if omitted)
    #[clap(short, long)]
    pub adapter: Option<String>,

    /// Only select the device with this name or address
    #[clap(short, long)]
    pub device: Option<String>,

    /// Seconds to scan for a device before giving up
    #[clap(long, default_value = "10")]
    pub scan_timeout: u64,

    /// Write JSON results to this file instead of stdout
    #[clap(short, long)]
    pub output: Option<String>,

    #[clap(subcommand)]
    pub command: CliCommand,
}

#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum CliCommand {
    /// Connect and print firmware info, status, settings and MTU
    Info,
    /// Download the WiFi network list
    WifiNetworks,
    /// Download the WiFi client device list
    WifiDevices,
    /// Download the BLE device list
    BleDevices,
    /// Read the current device status
    Status,
    /// Print status updates until interrupted
    Watch,
    /// Read the device settings
    Settings,
    /// Replace the device settings with a JSON document
    SetSettings {
        /// Settings as JSON (same shape as `settings` prints)
        json: String,
    },
    /// Send a raw command string
    Command {
        /// Command text, e.g. "save_data"
        text: String,
    },
    /// Persist all collected data on the device
    Save,
    /// Erase all collected data on the device
    Clear,
    /// Restart the device
    Restart,
    /// Re-run MTU negotiation
    Mtu,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_defaults() {
        let args = CliArgs::try_parse_from(["sneak32-link", "status"]).unwrap();
        assert_eq!(args.scan_timeout, 10);
        assert_eq!(args.adapter, None);
        assert_eq!(args.command, CliCommand::Status);
    }

    #[test]
    fn test_parse_command_with_filters() {
        let args = CliArgs::try_parse_from([
            "sneak32-link",
            "--adapter",
            "hci1",
            "--device",
            "Sneak32",
            "command",
            "save_data",
        ])
        .unwrap();
        assert_eq!(args.adapter.as_deref(), Some("hci1"));
        assert_eq!(args.device.as_deref(), Some("Sneak32"));
        assert_eq!(
            args.command,
            CliCommand::Command {
                text: "save_data".into()
            }
        );
    }

    #[test]
    fn test_subcommand_required() {
        assert!(CliArgs::try_parse_from(["sneak32-link"]).is_err());
    }
}
