use std::collections::HashMap;
use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4};
use std::path::PathBuf;
use std::time::Duration;

use anyhow::Context;
use tracing::{debug, trace};

use crate::policy::{HealthyRange, Policy};
use crate::topics::Topics;
use crate::units::{MachineCatalog, MachineSpec};
use crate::util;

/// Storage backend configuration
#[derive(Debug, Clone, serde::Deserialize)]
#[serde(tag = "backend", rename_all = "lowercase")]
pub enum StorageConfig {
    /// In-memory storage (no persistence)
    #[serde(rename = "none")]
    None,

    /// SQLite database
    Sqlite {
        /// Path to the SQLite database file
        #[serde(default = "default_sqlite_path")]
        path: PathBuf,

        /// Retention period in days (records older than this are deleted)
        #[serde(default = "default_retention_days")]
        retention_days: u32,
    },
}

impl Default for StorageConfig {
    fn default() -> Self {
        StorageConfig::Sqlite {
            path: default_sqlite_path(),
            retention_days: default_retention_days(),
        }
    }
}

fn default_sqlite_path() -> PathBuf {
    PathBuf::from("./fleet.db")
}

fn default_retention_days() -> u32 {
    30
}

#[derive(Debug, Clone, serde::Deserialize)]
pub struct BrokerConfig {
    #[serde(default = "default_broker_host")]
    pub host: String,
    #[serde(default = "default_broker_port")]
    pub port: u16,
    #[serde(default = "default_keep_alive")]
    pub keep_alive_secs: u64,
    /// Client id prefix; the service name is appended
    pub client_id: Option<String>,
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            host: default_broker_host(),
            port: default_broker_port(),
            keep_alive_secs: default_keep_alive(),
            client_id: None,
        }
    }
}

fn default_broker_host() -> String {
    "localhost".to_string()
}

fn default_broker_port() -> u16 {
    1883
}

fn default_keep_alive() -> u64 {
    60
}

/// Local UDP channel carrying critical alerts from the alarm service to the gateway
#[derive(Debug, Clone, serde::Deserialize)]
pub struct SideChannelConfig {
    #[serde(default = "default_side_channel_addr")]
    pub bind: SocketAddr,
    #[serde(default = "default_side_channel_addr")]
    pub target: SocketAddr,
}

impl Default for SideChannelConfig {
    fn default() -> Self {
        Self {
            bind: default_side_channel_addr(),
            target: default_side_channel_addr(),
        }
    }
}

fn default_side_channel_addr() -> SocketAddr {
    SocketAddr::V4(SocketAddrV4::new(Ipv4Addr::LOCALHOST, 5005))
}

#[derive(Debug, Clone, Copy, serde::Deserialize)]
pub struct AlarmConfig {
    #[serde(default = "default_threshold_count")]
    pub threshold_count: usize,
    #[serde(default = "default_window_seconds")]
    pub window_seconds: u64,
    #[serde(default = "default_cooldown_seconds")]
    pub cooldown_seconds: u64,
}

impl AlarmConfig {
    pub fn window(&self) -> Duration {
        Duration::from_secs(self.window_seconds)
    }

    pub fn cooldown(&self) -> Duration {
        Duration::from_secs(self.cooldown_seconds)
    }
}

impl Default for AlarmConfig {
    fn default() -> Self {
        Self {
            threshold_count: default_threshold_count(),
            window_seconds: default_window_seconds(),
            cooldown_seconds: default_cooldown_seconds(),
        }
    }
}

fn default_threshold_count() -> usize {
    5
}

fn default_window_seconds() -> u64 {
    120
}

fn default_cooldown_seconds() -> u64 {
    120
}

#[derive(Debug, Clone, serde::Deserialize)]
pub struct Config {
    pub group_id: String,

    #[serde(default)]
    pub broker: BrokerConfig,

    #[serde(default)]
    pub side_channel: SideChannelConfig,

    /// Machine type code to machine spec
    #[serde(default)]
    pub machines: HashMap<String, MachineSpec>,

    /// Parameter name to healthy range, in canonical units
    #[serde(default)]
    pub healthy_ranges: HashMap<String, HealthyRange>,

    #[serde(default)]
    pub alarm: AlarmConfig,

    /// Storage configuration (optional - defaults to SQLite at `./fleet.db`)
    pub storage: Option<StorageConfig>,
}

impl Config {
    /// Environment variables win over the file
    pub fn apply_env_overrides(&mut self) {
        if let Some(host) = util::get_broker_host() {
            debug!("broker host overridden from environment: {host}");
            self.broker.host = host;
        }
        if let Some(port) = util::get_broker_port() {
            debug!("broker port overridden from environment: {port}");
            self.broker.port = port;
        }
        if let Some(group_id) = util::get_group_id() {
            debug!("group id overridden from environment: {group_id}");
            self.group_id = group_id;
        }
    }

    pub fn topics(&self) -> Topics {
        Topics::new(&self.group_id)
    }

    pub fn catalog(&self) -> anyhow::Result<MachineCatalog> {
        MachineCatalog::new(self.machines.clone()).context("invalid machine specs")
    }

    pub fn policy(&self) -> Policy {
        Policy::from_ranges(&self.healthy_ranges)
    }

    pub fn client_id(&self, service: &str) -> String {
        let prefix = self
            .broker
            .client_id
            .clone()
            .unwrap_or_else(|| format!("fleet-{}", self.group_id));
        format!("{prefix}-{service}")
    }
}

pub fn read_config_file(path: &str) -> anyhow::Result<Config> {
    let file_content =
        std::fs::read_to_string(path).with_context(|| format!("could not read {path}"))?;
    parse_config(&file_content)
}

pub fn parse_config(content: &str) -> anyhow::Result<Config> {
    let config: Config =
        serde_json::from_str(content).context("Invalid configuration file provided!")?;

    if config.group_id.trim().is_empty() {
        anyhow::bail!("group_id must not be empty");
    }
    if config.alarm.threshold_count == 0 {
        anyhow::bail!("alarm.threshold_count must be at least 1");
    }

    trace!("loaded config: {config:?}");
    Ok(config)
}
