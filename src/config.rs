use std::{fs::read_to_string, net::SocketAddr};

use anyhow::{Context, Result};
use clap::Parser;
use serde::Deserialize;

pub const DEFAULT_CONFIG_PATH: &str = "./config.json";

#[derive(Deserialize, Debug)]
pub enum LogLevel {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

impl Default for LogLevel {
    fn default() -> Self {
        Self::Info
    }
}

impl LogLevel {
    pub fn as_level(&self) -> log::Level {
        match *self {
            Self::Error => log::Level::Error,
            Self::Warn => log::Level::Warn,
            Self::Info => log::Level::Info,
            Self::Debug => log::Level::Debug,
            Self::Trace => log::Level::Trace,
        }
    }
}

#[derive(Deserialize, Debug, Default)]
pub struct Log {
    /// log level
    ///
    /// An enum representing the available verbosity levels of the logger.
    #[serde(default)]
    pub level: LogLevel,
}

#[derive(Deserialize, Debug)]
#[serde(rename_all = "camelCase")]
pub struct Config {
    /// transporter listen address
    ///
    /// The address and port the relay binds. Both clients of a room dial
    /// this address from their side of the network.
    pub transporter_address: SocketAddr,

    #[serde(default)]
    pub log: Log,
}

#[derive(Parser)]
#[command(
    about = env!("CARGO_PKG_DESCRIPTION"),
    version = env!("CARGO_PKG_VERSION"),
)]
struct Cli {
    /// specify the configuration file path.
    #[arg(long, default_value = DEFAULT_CONFIG_PATH)]
    config: String,
}

impl Config {
    /// Read the JSON configuration from the path given on the command
    /// line. A missing or malformed file aborts startup.
    pub fn load() -> Result<Self> {
        let path = Cli::parse().config;
        let raw = read_to_string(&path)
            .with_context(|| format!("configuration file does not exist in this location: {path}"))?;
        serde_json::from_str(&raw).with_context(|| format!("invalid configuration file: {path}"))
    }
}
