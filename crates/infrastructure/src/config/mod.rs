//! Agent configuration: structs, parsing, and validation.

mod common;

pub use common::{ConfigError, LogFormat, LogLevel};

use std::path::Path;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::constants::{
    DEFAULT_BPF_FS_PATH, DEFAULT_METRICS_PORT, DEFAULT_TEMPLATE_DIR, DEFAULT_UPDATE_SOCKET,
};

// ── Top-level config ───────────────────────────────────────────────

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AgentConfig {
    #[serde(default)]
    pub agent: AgentSection,

    #[serde(default)]
    pub bpf: BpfSection,
}

impl AgentConfig {
    /// Load config from a YAML file.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_yaml(&content)
    }

    /// Parse config from a YAML string.
    pub fn from_yaml(yaml: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_yaml_ng::from_str(yaml)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate the config after deserialization.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.agent.update_socket.is_empty() {
            return Err(ConfigError::validation(
                "agent.update_socket",
                "socket path must not be empty",
            ));
        }
        if self.agent.resync_interval_secs == 0 {
            return Err(ConfigError::validation(
                "agent.resync_interval_secs",
                "interval must be at least one second",
            ));
        }
        if let Err(e) = Regex::new(&self.bpf.data_iface_pattern) {
            return Err(ConfigError::validation(
                "bpf.data_iface_pattern",
                e.to_string(),
            ));
        }
        if self.bpf.tunnel_iface.is_empty() {
            return Err(ConfigError::validation(
                "bpf.tunnel_iface",
                "tunnel interface must not be empty",
            ));
        }
        // Anything below the IPv4 minimum MTU is a typo.
        if self.bpf.nat_tunnel_mtu < 576 {
            return Err(ConfigError::validation(
                "bpf.nat_tunnel_mtu",
                format!("{} is below the IPv4 minimum", self.bpf.nat_tunnel_mtu),
            ));
        }
        Ok(())
    }

    /// The compiled data-interface pattern. `validate()` has already
    /// proven the pattern parses.
    pub fn data_iface_regex(&self) -> Result<Regex, ConfigError> {
        Regex::new(&self.bpf.data_iface_pattern)
            .map_err(|e| ConfigError::validation("bpf.data_iface_pattern", e.to_string()))
    }
}

// ── Agent section ──────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AgentSection {
    #[serde(default = "default_log_level")]
    pub log_level: LogLevel,

    #[serde(default = "default_log_format")]
    pub log_format: LogFormat,

    /// Unix socket the update feed listens on.
    #[serde(default = "default_update_socket")]
    pub update_socket: String,

    #[serde(default = "default_bind_address")]
    pub bind_address: String,

    #[serde(default = "default_metrics_port")]
    pub metrics_port: u16,

    /// How often reconciliation retries items left dirty by a failed
    /// apply.
    #[serde(default = "default_resync_interval")]
    pub resync_interval_secs: u64,
}

impl Default for AgentSection {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            log_format: default_log_format(),
            update_socket: default_update_socket(),
            bind_address: default_bind_address(),
            metrics_port: default_metrics_port(),
            resync_interval_secs: default_resync_interval(),
        }
    }
}

fn default_log_level() -> LogLevel {
    LogLevel::Info
}

fn default_log_format() -> LogFormat {
    LogFormat::Json
}

fn default_update_socket() -> String {
    DEFAULT_UPDATE_SOCKET.to_string()
}

fn default_bind_address() -> String {
    "0.0.0.0".to_string()
}

fn default_metrics_port() -> u16 {
    DEFAULT_METRICS_PORT
}

fn default_resync_interval() -> u64 {
    10
}

// ── BPF dataplane section ──────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct BpfSection {
    /// Host interfaces matching this pattern are programmed as data
    /// interfaces.
    #[serde(default = "default_data_iface_pattern")]
    pub data_iface_pattern: String,

    /// Interface carrying the IPIP/VXLAN tunnel.
    #[serde(default = "default_tunnel_iface")]
    pub tunnel_iface: String,

    /// Log level compiled into the BPF programs; empty means off.
    #[serde(default)]
    pub log_level: String,

    #[serde(default = "default_true")]
    pub fib_lookup_enabled: bool,

    /// Drop workload-to-host traffic instead of allowing it.
    #[serde(default)]
    pub ep_to_host_drop: bool,

    #[serde(default = "default_nat_tunnel_mtu")]
    pub nat_tunnel_mtu: u16,

    /// Override for the IANA VXLAN port.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vxlan_port: Option<u16>,

    /// Directory holding the BPF C template.
    #[serde(default = "default_template_dir")]
    pub template_dir: String,

    #[serde(default)]
    pub include_paths: Vec<String>,

    #[serde(default = "default_bpf_fs_path")]
    pub bpf_fs_path: String,

    /// Compile objects loadable by bpftool rather than iproute2 only.
    #[serde(default)]
    pub bpftool_loader: bool,
}

impl Default for BpfSection {
    fn default() -> Self {
        Self {
            data_iface_pattern: default_data_iface_pattern(),
            tunnel_iface: default_tunnel_iface(),
            log_level: String::new(),
            fib_lookup_enabled: true,
            ep_to_host_drop: false,
            nat_tunnel_mtu: default_nat_tunnel_mtu(),
            vxlan_port: None,
            template_dir: default_template_dir(),
            include_paths: Vec::new(),
            bpf_fs_path: default_bpf_fs_path(),
            bpftool_loader: false,
        }
    }
}

fn default_data_iface_pattern() -> String {
    "^(en.*|eth.*|tunl0$)".to_string()
}

fn default_tunnel_iface() -> String {
    "tunl0".to_string()
}

fn default_true() -> bool {
    true
}

fn default_nat_tunnel_mtu() -> u16 {
    1440
}

fn default_template_dir() -> String {
    DEFAULT_TEMPLATE_DIR.to_string()
}

fn default_bpf_fs_path() -> String {
    DEFAULT_BPF_FS_PATH.to_string()
}
