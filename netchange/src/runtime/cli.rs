use std::path::PathBuf;

use clap::Parser;
use serde::{Deserialize, Serialize};
use tracing::Level;

use crate::runtime::conf::conf_serde::level;

/// Command line arguments. Unset options do not override the config file.
#[derive(Parser, Debug, Serialize, Deserialize)]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Set the path to the configuration file (e.g., "netchange.yaml").
    #[arg(short, long, value_name = "FILE", env = "NETCHANGE_CONFIG_PATH")]
    #[serde(skip)]
    pub config: Option<PathBuf>,

    /// Set the application's log level (e.g., "debug", "warn").
    #[arg(short, long, value_name = "LEVEL", env = "NETCHANGE_LOG_LEVEL")]
    #[serde(
        with = "level::option",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub log_level: Option<Level>,

    /// Event classes to act on: link = 1, address = 2, route = 4 (e.g., 3 for link and address).
    #[arg(short = 'm', long, value_name = "MASK", env = "NETCHANGE_INTEREST_MASK")]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub interest_mask: Option<u8>,
}
