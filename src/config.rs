//! Runtime configuration for both server roles.
//!
//! Each role has a `serde` struct with defaults for every field. A TOML file may
//! supply any subset of fields; command-line flags are applied on top by `main`.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// How `VIEW -a` widens the default listing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ViewAllPolicy {
    /// Plain VIEW shows accessible files, `-a` shows every file in the catalog.
    #[default]
    BypassAcl,
    /// Plain VIEW shows owned files, `-a` adds files shared with the requester.
    OwnershipOnly,
}

impl std::str::FromStr for ViewAllPolicy {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "bypass_acl" | "bypass-acl" => Ok(ViewAllPolicy::BypassAcl),
            "ownership_only" | "ownership-only" => Ok(ViewAllPolicy::OwnershipOnly),
            other => Err(anyhow::anyhow!("unknown view-all policy: {}", other)),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NameServerConfig {
    pub bind: SocketAddr,
    pub view_all_policy: ViewAllPolicy,
    /// Upper bound for one NM -> SS control round trip.
    pub forward_timeout_ms: u64,
    /// Upper bound for an EXEC round trip. Must exceed the storage servers'
    /// `exec_timeout_ms`, or a slow script marks its SS unavailable.
    pub exec_forward_timeout_ms: u64,
}

impl Default for NameServerConfig {
    fn default() -> Self {
        Self {
            bind: SocketAddr::from(([0, 0, 0, 0], 8080)),
            view_all_policy: ViewAllPolicy::default(),
            forward_timeout_ms: 5000,
            exec_forward_timeout_ms: 15000,
        }
    }
}

impl NameServerConfig {
    pub fn forward_timeout(&self) -> Duration {
        Duration::from_millis(self.forward_timeout_ms)
    }

    pub fn exec_forward_timeout(&self) -> Duration {
        Duration::from_millis(self.exec_forward_timeout_ms.max(self.forward_timeout_ms))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageServerConfig {
    /// Name server address, as a `host:port` string so hostnames resolve at connect time.
    pub name_server: String,
    pub client_bind: SocketAddr,
    pub storage_dir: PathBuf,
    pub lock_lease_secs: u64,
    pub lock_sweep_interval_secs: u64,
    pub exec_timeout_ms: u64,
    pub exec_shell: PathBuf,
    pub exec_path: String,
    /// Pause between words of a STREAM response.
    pub stream_delay_ms: u64,
    pub register_attempts: usize,
}

impl Default for StorageServerConfig {
    fn default() -> Self {
        Self {
            name_server: "127.0.0.1:8080".to_string(),
            client_bind: SocketAddr::from(([0, 0, 0, 0], 9002)),
            storage_dir: PathBuf::from("./storage"),
            lock_lease_secs: 120,
            lock_sweep_interval_secs: 5,
            exec_timeout_ms: 5000,
            exec_shell: PathBuf::from("/bin/sh"),
            exec_path: "/usr/bin:/bin".to_string(),
            stream_delay_ms: 100,
            register_attempts: 5,
        }
    }
}

impl StorageServerConfig {
    pub fn lock_lease(&self) -> Duration {
        Duration::from_secs(self.lock_lease_secs)
    }

    pub fn lock_sweep_interval(&self) -> Duration {
        Duration::from_secs(self.lock_sweep_interval_secs.max(1))
    }

    pub fn exec_timeout(&self) -> Duration {
        Duration::from_millis(self.exec_timeout_ms)
    }

    pub fn stream_delay(&self) -> Duration {
        Duration::from_millis(self.stream_delay_ms)
    }
}

/// Loads a config of type `T` from a TOML file, or the defaults when no path is given.
pub fn load<T>(path: Option<&Path>) -> Result<T>
where
    T: Default + for<'de> Deserialize<'de>,
{
    let Some(path) = path else {
        return Ok(T::default());
    };

    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("reading config file {}", path.display()))?;
    let config = toml::from_str(&raw)
        .with_context(|| format!("parsing config file {}", path.display()))?;

    tracing::info!("Loaded configuration from {}", path.display());
    Ok(config)
}
