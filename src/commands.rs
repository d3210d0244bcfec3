use crate::config;
use crate::error::{Error, Result};
use crate::exec::Shell;
use crate::forwarder::{BinaryLocator, PollSettings, Supervisor};
use crate::gateway::{self, SystemProbe};
use crate::logging::{log_step, log_warn};
use crate::models::{
  ConfigInvalid, ForwarderHandle, NetworkConfig, RouteSnapshot, TransitionState, DEFAULT_SOCKS_PORT,
};
use crate::platform::{ensure_linux, Platform};
use crate::procfs::ProcessTable;
use crate::prompt::{validate_host_or_ip, validate_ip, validate_port, Prompt};
use crate::routes;
use crate::storage::{self, Paths};
use crate::wsl;
use std::fmt::Display;
use std::path::PathBuf;

/// Everything an operation touches on the host.
pub struct Runtime<'a> {
  pub paths: Paths,
  pub shell: Shell<'a>,
  pub processes: &'a dyn ProcessTable,
  pub platform: &'a dyn Platform,
  pub prompt: &'a dyn Prompt,
  pub locator: BinaryLocator,
  pub poll: PollSettings,
  pub iface: String,
}

impl Runtime<'_> {
  fn supervisor(&self) -> Supervisor<'_> {
    Supervisor::new(
      &self.shell,
      self.processes,
      self.paths.pid_file.clone(),
      self.paths.forwarder_log.clone(),
    )
    .with_poll(self.poll)
  }
}

#[derive(Debug, Clone, Default)]
pub struct EnableOptions {
  pub socks_port: Option<u16>,
  pub force: bool,
  pub skip_deps: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EnableOutcome {
  /// Tunnel route and forwarder were both already in place.
  AlreadyEnabled,
  /// Routes were (re)installed but a forwarder was already running.
  AlreadyRunning,
  Started(ForwarderHandle),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DisableReport {
  pub route_restored: bool,
  pub restored_files: Vec<PathBuf>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusReport {
  pub state: TransitionState,
  pub route: String,
  pub socks: Option<String>,
  pub tun_dev: String,
}

/// Logs a failed non-critical step and carries on.
pub fn best_effort<T, E: Display>(what: &str, result: std::result::Result<T, E>) -> Option<T> {
  match result {
    Ok(value) => Some(value),
    Err(err) => {
      log_warn(&format!("{what}: {err}"));
      None
    }
  }
}

pub fn enable(rt: &Runtime, opts: &EnableOptions) -> Result<EnableOutcome> {
  ensure_linux()?;
  rt.paths.ensure_dirs()?;
  if opts.skip_deps {
    log_step("Skipping dependency check");
  } else {
    log_step(&format!("Checking dependencies ({})", rt.platform.name()));
    rt.platform.ensure_deps(&rt.shell)?;
  }

  let (cfg, exists) = config::load(&rt.paths.config_path)?;
  if !exists {
    log_step(&format!(
      "No config at {}; using defaults",
      rt.paths.config_path.display()
    ));
  }
  let mut cfg = cfg.with_defaults();
  let supervisor = rt.supervisor();

  let current = routes::default_route_line(&rt.shell)?;
  if !opts.force && routes::is_tunnel_active(&current, &cfg.tun.dev) && supervisor.is_running() {
    log_step(&format!(
      "Already enabled: default route is on {} and tun2socks is running",
      cfg.tun.dev
    ));
    return Ok(EnableOutcome::AlreadyEnabled);
  }

  if let Some(host) = cfg.configured_host() {
    validate_host_or_ip(host).map_err(|reason| ConfigInvalid::SocksHost {
      host: host.to_string(),
      reason,
    })?;
  }
  let saved = best_effort(
    "read saved default route",
    storage::read_route_snapshot(&rt.paths.default_route_file),
  )
  .flatten();
  let probe = SystemProbe::new(&rt.shell, &rt.iface, rt.paths.resolv_conf.clone());
  let gateway = gateway::resolve(
    &current,
    saved.as_ref().map(RouteSnapshot::line),
    cfg.configured_host(),
    &probe,
  )?;
  log_step(&format!("SOCKS gateway: {gateway}"));
  cfg.socks.host = gateway;

  // Never overwrite the pristine route with the tunnel route on a forced re-run.
  let snapshot = RouteSnapshot::new(&current);
  if !snapshot.is_empty() && !routes::is_tunnel_active(snapshot.line(), &cfg.tun.dev) {
    best_effort(
      "save default route",
      storage::write_route_snapshot(&rt.paths.default_route_file, &snapshot),
    );
  }

  cfg.socks.port = choose_port(rt.prompt, cfg.socks.port, opts)?;
  cfg.validate()?;
  config::save(&rt.paths.config_path, &cfg)?;
  log_step(&format!("Saved config: {}", rt.paths.config_path.display()));

  let binary = rt.locator.locate(&rt.shell)?;
  log_step(&format!("tun2socks: {}", binary.display()));
  rt.shell.authorize().map_err(Error::Privilege)?;

  if rt.platform.is_wsl() {
    configure_wsl_dns(rt, &mut cfg)?;
  }

  routes::transition_to_tunnel(&rt.shell, &cfg.tun.dev, &cfg.tun.cidr)?;
  log_step(&format!("Default route now on {}", cfg.tun.dev));

  if supervisor.is_running() {
    if !opts.force {
      log_step("tun2socks is already running");
      return Ok(EnableOutcome::AlreadyRunning);
    }
    log_step("tun2socks is running, restarting due to --force");
    best_effort("stop tun2socks", supervisor.stop());
  }

  let handle = match supervisor.start(&binary, &cfg) {
    Ok(handle) => handle,
    Err(err) => {
      log_warn("tunnel route is installed but tun2socks did not start; run `wslbridge disable` to restore the network");
      return Err(err.into());
    }
  };
  log_step(&format!(
    "tun2socks started (pid {}, launcher {}); log: {}",
    handle.worker_pid,
    handle.launcher_pid,
    supervisor.log_path().display()
  ));
  Ok(EnableOutcome::Started(handle))
}

fn choose_port(prompt: &dyn Prompt, configured: u16, opts: &EnableOptions) -> Result<u16> {
  if let Some(port) = opts.socks_port {
    return Ok(port);
  }
  if !opts.force {
    return Ok(if configured == 0 { DEFAULT_SOCKS_PORT } else { configured });
  }
  let current = if configured == 0 {
    String::new()
  } else {
    configured.to_string()
  };
  let answer = prompt.ask_string(
    "SOCKS port",
    &DEFAULT_SOCKS_PORT.to_string(),
    &current,
    Some(validate_port),
  )?;
  answer
    .trim()
    .parse()
    .map_err(|_| Error::from(ConfigInvalid::Port))
}

fn configure_wsl_dns(rt: &Runtime, cfg: &mut NetworkConfig) -> Result<()> {
  let dns = rt.prompt.ask_string(
    "DNS nameserver (WSL)",
    "",
    &cfg.dns.nameserver,
    Some(validate_ip),
  )?;
  cfg.dns.nameserver = dns.trim().to_string();

  wsl::configure_wsl_conf(&rt.shell, &rt.paths)?;
  wsl::write_resolv_conf(&rt.shell, &rt.paths, &cfg.dns.nameserver)?;
  config::save(&rt.paths.config_path, cfg)?;
  log_step("WSL DNS configured. NOTE: wsl.conf changes may require a WSL restart");
  Ok(())
}

pub fn disable(rt: &Runtime) -> Result<DisableReport> {
  let (cfg, _) = config::load(&rt.paths.config_path)?;
  let cfg = cfg.with_defaults();

  let route_restored = match storage::read_route_snapshot(&rt.paths.default_route_file)? {
    Some(snapshot) => {
      log_step("Restoring default route");
      routes::transition_to_physical(&rt.shell, snapshot.line())?;
      best_effort(
        "remove saved default route",
        storage::remove_route_snapshot(&rt.paths.default_route_file),
      );
      true
    }
    None => {
      log_step("Default route backup not found; skipping route restore");
      false
    }
  };

  log_step("Stopping tun2socks (if running)");
  rt.supervisor().stop()?;

  log_step(&format!("Removing {} (if present)", cfg.tun.dev));
  routes::teardown_tunnel(&rt.shell, &cfg.tun.dev);

  let restored_files = wsl::restore_system_files(&rt.shell, &rt.paths);
  if !restored_files.is_empty() {
    log_step("System files restored (may require a WSL restart)");
  }
  Ok(DisableReport {
    route_restored,
    restored_files,
  })
}

pub fn status(rt: &Runtime) -> Result<StatusReport> {
  let (cfg, _) = config::load(&rt.paths.config_path)?;
  let cfg = cfg.with_defaults();
  let route = routes::default_route_line(&rt.shell)?;
  let state = TransitionState::derive(
    routes::is_tunnel_active(&route, &cfg.tun.dev),
    rt.supervisor().is_running(),
  );
  let socks = cfg
    .configured_host()
    .filter(|_| cfg.socks.port != 0)
    .map(|host| format!("{host}:{}", cfg.socks.port));
  Ok(StatusReport {
    state,
    route,
    socks,
    tun_dev: cfg.tun.dev,
  })
}
