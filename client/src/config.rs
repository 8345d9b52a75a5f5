use std::{fs::read_to_string, net::SocketAddr};

use anyhow::{Context, Result};
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
    #[serde(default)]
    pub level: LogLevel,
}

#[derive(Deserialize, Debug)]
#[serde(rename_all = "camelCase")]
pub struct Config {
    /// transporter address
    ///
    /// The relay this client dials. Owner and guest both connect outbound,
    /// so only this address has to be reachable across the network.
    pub transporter_address: String,

    /// local ADB server address
    ///
    /// The smart socket of the host ADB server, used by the owner role to
    /// reach the shared device.
    #[serde(default = "Config::adb_server_address")]
    pub adb_server_address: String,

    /// guest listen address
    ///
    /// Where the guest role impersonates the remote device; point
    /// `adb connect` at this address.
    #[serde(default = "Config::adb_listen_address")]
    pub adb_listen_address: SocketAddr,

    #[serde(default)]
    pub log: Log,
}

impl Config {
    fn adb_server_address() -> String {
        "127.0.0.1:5037".to_string()
    }

    fn adb_listen_address() -> SocketAddr {
        "127.0.0.1:5656".parse().unwrap()
    }

    /// Read the JSON configuration. A missing or malformed file aborts
    /// startup.
    pub fn load(path: &str) -> Result<Self> {
        let raw = read_to_string(path)
            .with_context(|| format!("configuration file does not exist in this location: {path}"))?;
        serde_json::from_str(&raw).with_context(|| format!("invalid configuration file: {path}"))
    }
}
