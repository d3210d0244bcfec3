use ipnet::Ipv4Net;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use thiserror::Error;

pub const DEFAULT_SOCKS_PORT: u16 = 1080;
pub const DEFAULT_TUN_DEV: &str = "tun0";
pub const DEFAULT_TUN_CIDR: &str = "10.0.0.2/24";

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SocksConfig {
  #[serde(default)]
  pub host: String,
  #[serde(default)]
  pub port: u16,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TunConfig {
  #[serde(default)]
  pub dev: String,
  #[serde(default)]
  pub cidr: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DnsConfig {
  #[serde(default)]
  pub nameserver: String,
}

/// Persisted operator configuration. Empty strings and a zero port mean "unset".
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NetworkConfig {
  #[serde(default)]
  pub socks: SocksConfig,
  #[serde(default)]
  pub tun: TunConfig,
  #[serde(default)]
  pub dns: DnsConfig,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigInvalid {
  #[error("socks port must be in range 1..65535")]
  Port,
  #[error("tun cidr {0:?} is not a valid IPv4 CIDR")]
  TunCidr(String),
  #[error("tun device name must not be empty")]
  TunDev,
  #[error("socks host {host:?}: {reason}")]
  SocksHost { host: String, reason: String },
}

impl NetworkConfig {
  /// Fills unset tun parameters. The port is left alone: its default depends
  /// on CLI flags and is chosen by the enable flow.
  pub fn with_defaults(mut self) -> Self {
    if self.tun.dev.trim().is_empty() {
      self.tun.dev = DEFAULT_TUN_DEV.to_string();
    }
    if self.tun.cidr.trim().is_empty() {
      self.tun.cidr = DEFAULT_TUN_CIDR.to_string();
    }
    self
  }

  pub fn validate(&self) -> Result<(), ConfigInvalid> {
    if self.socks.port == 0 {
      return Err(ConfigInvalid::Port);
    }
    if self.tun.dev.trim().is_empty() {
      return Err(ConfigInvalid::TunDev);
    }
    self
      .tun
      .cidr
      .trim()
      .parse::<Ipv4Net>()
      .map_err(|_| ConfigInvalid::TunCidr(self.tun.cidr.clone()))?;
    Ok(())
  }

  pub fn configured_host(&self) -> Option<&str> {
    let host = self.socks.host.trim();
    if host.is_empty() {
      None
    } else {
      Some(host)
    }
  }
}

/// The default route line seen before the tunnel took over.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RouteSnapshot(String);

impl RouteSnapshot {
  pub fn new(line: &str) -> Self {
    Self(line.trim().to_string())
  }

  pub fn line(&self) -> &str {
    &self.0
  }

  pub fn is_empty(&self) -> bool {
    self.0.is_empty()
  }
}

/// A started forwarder. `launcher_pid` belongs to the elevation wrapper and is
/// informational only; `worker_pid` is what gets persisted and signalled.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ForwarderHandle {
  pub launcher_pid: u32,
  pub worker_pid: u32,
  pub pid_file: PathBuf,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransitionState {
  Disabled,
  Enabled,
  /// Only one of tunnel route / live forwarder is present.
  Partial { tunnel_route: bool, forwarder: bool },
}

impl TransitionState {
  pub fn derive(tunnel_route: bool, forwarder: bool) -> Self {
    match (tunnel_route, forwarder) {
      (true, true) => TransitionState::Enabled,
      (false, false) => TransitionState::Disabled,
      (tunnel_route, forwarder) => TransitionState::Partial {
        tunnel_route,
        forwarder,
      },
    }
  }
}
