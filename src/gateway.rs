use crate::exec::{CommandError, Shell};
use ipnet::Ipv4Net;
use std::fs;
use std::net::Ipv4Addr;
use std::path::PathBuf;
use thiserror::Error;

pub const PRIMARY_INTERFACE: &str = "eth0";

#[derive(Debug, Error)]
pub enum GatewayError {
  #[error("read {iface} address: {source}")]
  Probe {
    iface: String,
    #[source]
    source: CommandError,
  },
  #[error("could not read {0} IPv4 CIDR")]
  NoAddress(String),
  #[error("parse interface cidr {0:?}")]
  BadCidr(String),
  #[error("address overflow: {base} + {step} leaves the IPv4 space")]
  Overflow { base: Ipv4Addr, step: u32 },
}

/// Local facts used when no route names the gateway.
pub trait GatewayProbe {
  /// `addr/prefix` of the primary physical interface.
  fn interface_cidr(&self) -> Result<String, GatewayError>;
  fn nameservers(&self) -> Vec<Ipv4Addr>;
}

/// Returns the IP following the first `via` token.
pub fn parse_via_ip(route_text: &str) -> Option<String> {
  let mut fields = route_text.split_whitespace();
  while let Some(field) = fields.next() {
    if field == "via" {
      return fields.next().map(str::to_string);
    }
  }
  None
}

/// Must run before the default route points at the tunnel: once it does, the
/// live route no longer names the upstream gateway.
pub fn resolve(
  current_route: &str,
  saved_snapshot: Option<&str>,
  configured_host: Option<&str>,
  probe: &dyn GatewayProbe,
) -> Result<String, GatewayError> {
  if let Some(gw) = parse_via_ip(current_route) {
    return Ok(gw);
  }
  if let Some(gw) = saved_snapshot.and_then(parse_via_ip) {
    return Ok(gw);
  }
  if let Some(host) = configured_host.filter(|host| !host.trim().is_empty()) {
    return Ok(host.to_string());
  }
  let cidr = probe.interface_cidr()?;
  infer_gateway(&cidr, &probe.nameservers()).map(|ip| ip.to_string())
}

/// Picks an in-subnet nameserver (it is usually the gateway itself), else the
/// first usable address of the network that is not our own.
pub fn infer_gateway(cidr: &str, nameservers: &[Ipv4Addr]) -> Result<Ipv4Addr, GatewayError> {
  let net: Ipv4Net = cidr
    .trim()
    .parse()
    .map_err(|_| GatewayError::BadCidr(cidr.trim().to_string()))?;
  let own = net.addr();
  let candidate = nameservers.iter().copied().find(|ns| {
    net.contains(ns) && *ns != own && *ns != net.network() && *ns != net.broadcast()
  });
  if let Some(ns) = candidate {
    return Ok(ns);
  }

  let first = increment(net.network(), 1)?;
  if first != own {
    return Ok(first);
  }
  increment(net.network(), 2)
}

pub fn increment(base: Ipv4Addr, step: u32) -> Result<Ipv4Addr, GatewayError> {
  u32::from(base)
    .checked_add(step)
    .map(Ipv4Addr::from)
    .ok_or(GatewayError::Overflow { base, step })
}

/// Reads the interface address with `ip` and nameservers from resolv.conf.
pub struct SystemProbe<'a> {
  shell: &'a Shell<'a>,
  iface: String,
  resolv_conf: PathBuf,
}

impl<'a> SystemProbe<'a> {
  pub fn new(shell: &'a Shell<'a>, iface: &str, resolv_conf: PathBuf) -> Self {
    Self {
      shell,
      iface: iface.to_string(),
      resolv_conf,
    }
  }
}

impl GatewayProbe for SystemProbe<'_> {
  fn interface_cidr(&self) -> Result<String, GatewayError> {
    let out = self
      .shell
      .capture("ip", &["-4", "-o", "addr", "show", "dev", self.iface.as_str()])
      .map_err(|source| GatewayError::Probe {
        iface: self.iface.clone(),
        source,
      })?;
    parse_inet_cidr(&out).ok_or_else(|| GatewayError::NoAddress(self.iface.clone()))
  }

  fn nameservers(&self) -> Vec<Ipv4Addr> {
    fs::read_to_string(&self.resolv_conf)
      .map(|content| parse_nameservers(&content))
      .unwrap_or_default()
  }
}

fn parse_inet_cidr(ip_addr_output: &str) -> Option<String> {
  let mut fields = ip_addr_output.split_whitespace();
  while let Some(field) = fields.next() {
    if field == "inet" {
      return fields.next().map(str::to_string);
    }
  }
  None
}

pub fn parse_nameservers(resolv_conf: &str) -> Vec<Ipv4Addr> {
  resolv_conf
    .lines()
    .filter_map(|line| {
      let mut fields = line.split_whitespace();
      match fields.next() {
        Some("nameserver") => fields.next()?.parse().ok(),
        _ => None,
      }
    })
    .collect()
}
