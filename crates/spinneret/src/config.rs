//! Configuration management for Spinneret.

use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::Path;

use arachne_common::constants::{
    DEFAULT_CIRCUIT_LIFETIME_SECS, DEFAULT_CONTROL_PORT, DEFAULT_ENTRY_GUARDS,
    DEFAULT_MAX_CIRCUITS, DEFAULT_MAX_REQUESTS_PER_CIRCUIT, DEFAULT_SOCKS_PORT,
    FALLBACK_USER_AGENTS,
};

/// Application configuration
#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    /// Tor daemon and pool configuration
    #[serde(default)]
    pub tor: TorConfig,

    /// User-agent pool for session fingerprints (falls back to a built-in
    /// pool when empty)
    #[serde(default)]
    pub user_agents: Vec<String>,

    /// Interval between stats log lines in the daemon (seconds)
    #[serde(default = "default_stats_interval")]
    pub stats_interval_secs: u64,
}

/// Tor-specific configuration
#[derive(Debug, Clone, Deserialize)]
pub struct TorConfig {
    /// SOCKS proxy port all sessions egress through
    #[serde(default = "default_socks_port")]
    pub socks_port: u16,

    /// Control port for circuit management
    #[serde(default = "default_control_port")]
    pub control_port: u16,

    /// Control-port password; cookie auth is negotiated when unset
    #[serde(default)]
    pub control_credential: Option<String>,

    /// Maximum circuits kept in the active pool
    #[serde(default = "default_max_circuits")]
    pub max_circuits: usize,

    /// Circuit lifetime before forced retirement (seconds)
    #[serde(default = "default_circuit_lifetime")]
    pub circuit_lifetime_secs: u64,

    /// Requests served per circuit before it is flagged degraded
    #[serde(default = "default_max_requests")]
    pub max_requests_per_circuit: u32,

    /// Entry guard count for a managed daemon
    #[serde(default = "default_entry_guards")]
    pub entry_guard_count: u32,
}

impl Default for TorConfig {
    fn default() -> Self {
        Self {
            socks_port: default_socks_port(),
            control_port: default_control_port(),
            control_credential: None,
            max_circuits: default_max_circuits(),
            circuit_lifetime_secs: default_circuit_lifetime(),
            max_requests_per_circuit: default_max_requests(),
            entry_guard_count: default_entry_guards(),
        }
    }
}

// Default value functions
fn default_socks_port() -> u16 { DEFAULT_SOCKS_PORT }
fn default_control_port() -> u16 { DEFAULT_CONTROL_PORT }
fn default_max_circuits() -> usize { DEFAULT_MAX_CIRCUITS }
fn default_circuit_lifetime() -> u64 { DEFAULT_CIRCUIT_LIFETIME_SECS }
fn default_max_requests() -> u32 { DEFAULT_MAX_REQUESTS_PER_CIRCUIT }
fn default_entry_guards() -> u32 { DEFAULT_ENTRY_GUARDS }
fn default_stats_interval() -> u64 { 30 }

impl AppConfig {
    /// Load configuration from file; callers apply CLI overrides on top
    pub fn load(config_path: &str) -> Result<Self> {
        if Path::new(config_path).exists() {
            let settings = config::Config::builder()
                .add_source(config::File::with_name(config_path))
                .build()
                .context("Failed to load config file")?;

            settings
                .try_deserialize()
                .context("Failed to parse config")
        } else {
            // Use defaults if config file doesn't exist
            tracing::warn!("Config file not found, using defaults");
            Ok(Self::default())
        }
    }

    /// User-agent pool, substituting the built-in set when none configured.
    pub fn user_agent_pool(&self) -> Vec<String> {
        if self.user_agents.is_empty() {
            FALLBACK_USER_AGENTS.iter().map(|s| s.to_string()).collect()
        } else {
            self.user_agents.clone()
        }
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            tor: TorConfig::default(),
            user_agents: Vec::new(),
            stats_interval_secs: default_stats_interval(),
        }
    }
}
