use crate::exec::{CommandError, Shell};
use crate::logging::log_warn;
use thiserror::Error;

const DEFAULT_MARKER: &str = "default";

#[derive(Debug, Error)]
pub enum RouteError {
  #[error("ip route show default failed: {0}")]
  Show(#[source] CommandError),
  #[error("ip link set {dev} up: {source}")]
  LinkUp {
    dev: String,
    #[source]
    source: CommandError,
  },
  #[error("ip route add default dev {dev}: {source} (host has no default route now; run disable to restore it)")]
  AddDefault {
    dev: String,
    #[source]
    source: CommandError,
  },
  #[error("invalid default route line: {0:?}")]
  InvalidSnapshot(String),
  #[error("restore default route: {0}")]
  Restore(#[source] CommandError),
}

/// First non-empty line of `ip route show default`, or an empty string.
pub fn default_route_line(shell: &Shell) -> Result<String, RouteError> {
  let out = shell
    .capture("ip", &["route", "show", "default"])
    .map_err(RouteError::Show)?;
  Ok(
    out
      .lines()
      .map(str::trim)
      .find(|line| !line.is_empty())
      .unwrap_or_default()
      .to_string(),
  )
}

/// True iff `line` is a default route whose outbound device is `tun_dev`.
pub fn is_tunnel_active(line: &str, tun_dev: &str) -> bool {
  let mut fields = line.split_whitespace();
  if fields.next() != Some(DEFAULT_MARKER) {
    return false;
  }
  while let Some(field) = fields.next() {
    if field == "dev" {
      return fields.next() == Some(tun_dev);
    }
  }
  false
}

pub fn transition_to_tunnel(shell: &Shell, tun_dev: &str, tun_cidr: &str) -> Result<(), RouteError> {
  // Both fail harmlessly when the device or address survives from an earlier run.
  let _ = shell.run_elevated("ip", &["tuntap", "add", "mode", "tun", "dev", tun_dev]);
  let _ = shell.run_elevated("ip", &["addr", "add", tun_cidr, "dev", tun_dev]);

  shell
    .run_elevated("ip", &["link", "set", tun_dev, "up"])
    .map_err(|source| RouteError::LinkUp {
      dev: tun_dev.to_string(),
      source,
    })?;

  if let Err(err) = shell.run_elevated("ip", &["route", "del", "default"]) {
    log_warn(&format!("ip route del default: {err}"));
  }
  shell
    .run_elevated("ip", &["route", "add", "default", "dev", tun_dev])
    .map_err(|source| RouteError::AddDefault {
      dev: tun_dev.to_string(),
      source,
    })
}

/// Reinstalls a saved default route. `replace` rather than `add` so it wins
/// over whatever default route is currently installed.
pub fn transition_to_physical(shell: &Shell, saved_line: &str) -> Result<(), RouteError> {
  let fields: Vec<&str> = saved_line.split_whitespace().collect();
  if fields.first() != Some(&DEFAULT_MARKER) {
    return Err(RouteError::InvalidSnapshot(saved_line.to_string()));
  }
  let mut args = vec!["route", "replace"];
  args.extend_from_slice(&fields);
  shell.run_elevated("ip", &args).map_err(RouteError::Restore)
}

pub fn teardown_tunnel(shell: &Shell, tun_dev: &str) {
  let _ = shell.run_elevated("ip", &["link", "set", tun_dev, "down"]);
  let _ = shell.run_elevated("ip", &["tuntap", "del", "mode", "tun", "dev", tun_dev]);
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::exec::Elevation;
  use crate::testing::FakeHost;

  #[test]
  fn detects_tunnel_default_route() {
    let cases = [
      ("default dev tun0 scope link", "tun0", true),
      ("default via 172.30.112.1 dev tun0 proto dhcp", "tun0", true),
      ("default dev eth0 scope link", "tun0", false),
      ("default dev tun01 scope link", "tun0", false),
      ("10.0.0.0/24 dev tun0 scope link", "tun0", false),
      ("default", "tun0", false),
      ("", "tun0", false),
    ];
    for (line, dev, want) in cases {
      assert_eq!(is_tunnel_active(line, dev), want, "{line:?} {dev}");
    }
  }

  #[test]
  fn reads_first_default_route_line() {
    let host = FakeHost::new();
    host.set_default_route("default via 172.20.0.1 dev eth0 proto kernel");
    let shell = Shell::new(&host, Elevation::Sudo);
    assert_eq!(
      default_route_line(&shell).unwrap(),
      "default via 172.20.0.1 dev eth0 proto kernel"
    );

    let empty = FakeHost::new();
    let shell = Shell::new(&empty, Elevation::Sudo);
    assert_eq!(default_route_line(&shell).unwrap(), "");
  }

  #[test]
  fn tunnel_transition_replaces_default_route() {
    let host = FakeHost::new();
    host.set_default_route("default via 172.20.0.1 dev eth0");
    let shell = Shell::new(&host, Elevation::Sudo);
    transition_to_tunnel(&shell, "tun0", "10.0.0.2/24").unwrap();
    assert_eq!(host.default_route().as_deref(), Some("default dev tun0"));
    assert!(host.has_device("tun0"));

    // Second run: device exists, address exists, still succeeds.
    transition_to_tunnel(&shell, "tun0", "10.0.0.2/24").unwrap();
    assert_eq!(host.default_route().as_deref(), Some("default dev tun0"));
  }

  #[test]
  fn tunnel_transition_without_prior_default_route() {
    let host = FakeHost::new();
    let shell = Shell::new(&host, Elevation::Root);
    transition_to_tunnel(&shell, "tun0", "10.0.0.2/24").unwrap();
    assert_eq!(host.default_route().as_deref(), Some("default dev tun0"));
  }

  #[test]
  fn link_up_failure_is_fatal() {
    let host = FakeHost::new();
    host.set_default_route("default via 172.20.0.1 dev eth0");
    host.fail_command("ip link set");
    let shell = Shell::new(&host, Elevation::Sudo);
    let err = transition_to_tunnel(&shell, "tun0", "10.0.0.2/24").unwrap_err();
    assert!(matches!(err, RouteError::LinkUp { .. }));
    // The physical route was not touched.
    assert_eq!(
      host.default_route().as_deref(),
      Some("default via 172.20.0.1 dev eth0")
    );
  }

  #[test]
  fn add_default_failure_is_fatal() {
    let host = FakeHost::new();
    host.set_default_route("default via 172.20.0.1 dev eth0");
    host.fail_command("ip route add");
    let shell = Shell::new(&host, Elevation::Sudo);
    let err = transition_to_tunnel(&shell, "tun0", "10.0.0.2/24").unwrap_err();
    assert!(matches!(err, RouteError::AddDefault { .. }));
  }

  #[test]
  fn physical_transition_uses_replace() {
    let host = FakeHost::new();
    host.set_default_route("default dev tun0");
    let shell = Shell::new(&host, Elevation::Sudo);
    transition_to_physical(&shell, "default via 172.20.0.1 dev eth0 proto kernel\n").unwrap();
    assert_eq!(
      host.default_route().as_deref(),
      Some("default via 172.20.0.1 dev eth0 proto kernel")
    );
    assert!(host
      .calls()
      .contains(&"sudo ip route replace default via 172.20.0.1 dev eth0 proto kernel".to_string()));
  }

  #[test]
  fn malformed_snapshot_is_rejected() {
    let host = FakeHost::new();
    let shell = Shell::new(&host, Elevation::Sudo);
    for line in ["", "via 172.20.0.1 dev eth0", "10.0.0.0/8 via 1.1.1.1"] {
      assert!(matches!(
        transition_to_physical(&shell, line),
        Err(RouteError::InvalidSnapshot(_))
      ));
    }
    assert!(host.calls().is_empty());
  }

  #[test]
  fn teardown_is_best_effort() {
    let host = FakeHost::new();
    let shell = Shell::new(&host, Elevation::Sudo);
    teardown_tunnel(&shell, "tun0");
    host.set_device("tun0");
    teardown_tunnel(&shell, "tun0");
    assert!(!host.has_device("tun0"));
  }
}
