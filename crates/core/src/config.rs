//! JSON startup configuration (§6, §4.8).
//!
//! Read once at process startup by the CLI binary. All keys are optional;
//! missing keys take the defaults named here. Decoding errors are surfaced
//! as [`RtspError::Config`] so the caller can abort with a non-zero exit
//! code (§6 "Exit codes").

use std::fs::File;
use std::io::BufReader;
use std::path::Path;

use serde::Deserialize;

use crate::error::{Result, RtspError};

fn default_listen_address() -> String {
    "0.0.0.0".to_string()
}

fn default_listen_port() -> u16 {
    554
}

fn default_rtp_port_min() -> u16 {
    20000
}

fn default_rtp_port_max() -> u16 {
    30000
}

fn default_read_timeout_seconds() -> u64 {
    60
}

fn default_max_connections() -> usize {
    256
}

/// Server configuration, deserialized from a JSON document.
///
/// ```json
/// {
///   "listen_address": "0.0.0.0",
///   "listen_port": 554,
///   "rtp_port_min": 20000,
///   "rtp_port_max": 30000,
///   "read_timeout_seconds": 60,
///   "max_connections": 256
/// }
/// ```
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Config {
    #[serde(default = "default_listen_address")]
    pub listen_address: String,
    #[serde(default = "default_listen_port")]
    pub listen_port: u16,
    #[serde(default = "default_rtp_port_min")]
    pub rtp_port_min: u16,
    #[serde(default = "default_rtp_port_max")]
    pub rtp_port_max: u16,
    #[serde(default = "default_read_timeout_seconds")]
    pub read_timeout_seconds: u64,
    #[serde(default = "default_max_connections")]
    pub max_connections: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            listen_address: default_listen_address(),
            listen_port: default_listen_port(),
            rtp_port_min: default_rtp_port_min(),
            rtp_port_max: default_rtp_port_max(),
            read_timeout_seconds: default_read_timeout_seconds(),
            max_connections: default_max_connections(),
        }
    }
}

impl Config {
    /// Load configuration from a JSON file. Missing keys fall back to
    /// [`Config::default`] values.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let file = File::open(path)
            .map_err(|e| RtspError::Config(format!("cannot open {}: {e}", path.display())))?;
        let config: Config = serde_json::from_reader(BufReader::new(file))
            .map_err(|e| RtspError::Config(format!("cannot parse {}: {e}", path.display())))?;
        tracing::info!(path = %path.display(), "configuration loaded");
        Ok(config)
    }

    /// The `host:port` string this config resolves to for `TcpListener::bind`.
    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.listen_address, self.listen_port)
    }
}
