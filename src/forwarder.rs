use crate::exec::{find_executable, is_executable, CommandError, Shell};
use crate::logging::{log_step, log_warn};
use crate::models::{ForwarderHandle, NetworkConfig};
use crate::procfs::ProcessTable;
use std::env;
use std::ffi::OsString;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::thread;
use std::time::{Duration, Instant};
use thiserror::Error;

pub const BINARY_NAME: &str = "tun2socks";
const INSTALL_PACKAGE: &str = "github.com/xjasonlyu/tun2socks/v2@latest";
const TOOLCHAIN: &str = "go";

#[derive(Debug, Error)]
pub enum ForwarderError {
  #[error("{0} not found and go is not installed")]
  ToolchainMissing(String),
  #[error("failed to install {name}: {source}")]
  InstallFailed {
    name: String,
    #[source]
    source: CommandError,
  },
  #[error("{0} install finished but binary not found (check GOBIN / GOPATH)")]
  NotFoundAfterInstall(String),
  #[error("start {name}: {source}")]
  Launch {
    name: String,
    #[source]
    source: CommandError,
  },
  #[error("timed out after {waited:?} waiting for {name} pid (launcher {launcher_pid})")]
  WorkerNotFound {
    name: String,
    launcher_pid: u32,
    waited: Duration,
  },
  #[error("pid file {path}: {source}")]
  PidFile {
    path: PathBuf,
    #[source]
    source: io::Error,
  },
}

/// Finds the forwarder binary, installing it with the Go toolchain as a last resort.
pub struct BinaryLocator {
  name: String,
  search_path: Option<OsString>,
  fallback_dirs: Vec<PathBuf>,
}

impl BinaryLocator {
  pub fn new(name: &str, search_path: Option<OsString>, fallback_dirs: Vec<PathBuf>) -> Self {
    Self {
      name: name.to_string(),
      search_path,
      fallback_dirs,
    }
  }

  /// `PATH`, then `$GOBIN`, then `~/go/bin`.
  pub fn from_env() -> Self {
    let mut fallback_dirs = Vec::new();
    if let Some(gobin) = env::var_os("GOBIN").filter(|v| !v.is_empty()) {
      fallback_dirs.push(PathBuf::from(gobin));
    }
    if let Some(home) = dirs::home_dir() {
      fallback_dirs.push(home.join("go").join("bin"));
    }
    Self::new(BINARY_NAME, env::var_os("PATH"), fallback_dirs)
  }

  pub fn find(&self) -> Option<PathBuf> {
    self.find_in_search_path(&self.name).or_else(|| {
      self
        .fallback_dirs
        .iter()
        .map(|dir| dir.join(&self.name))
        .find(|candidate| is_executable(candidate))
    })
  }

  fn find_in_search_path(&self, name: &str) -> Option<PathBuf> {
    find_executable(self.search_path.as_deref(), name)
  }

  pub fn locate(&self, shell: &Shell) -> Result<PathBuf, ForwarderError> {
    if let Some(found) = self.find() {
      return Ok(found);
    }
    if self.find_in_search_path(TOOLCHAIN).is_none() {
      return Err(ForwarderError::ToolchainMissing(self.name.clone()));
    }
    log_step(&format!("{} not found; installing {INSTALL_PACKAGE}", self.name));
    shell
      .run(TOOLCHAIN, &["install", INSTALL_PACKAGE])
      .map_err(|source| ForwarderError::InstallFailed {
        name: self.name.clone(),
        source,
      })?;
    self
      .find()
      .ok_or_else(|| ForwarderError::NotFoundAfterInstall(self.name.clone()))
  }
}

#[derive(Debug, Clone, Copy)]
pub struct PollSettings {
  pub interval: Duration,
  pub timeout: Duration,
}

impl Default for PollSettings {
  fn default() -> Self {
    Self {
      interval: Duration::from_millis(100),
      timeout: Duration::from_secs(2),
    }
  }
}

#[derive(Debug, PartialEq, Eq)]
enum PidRecord {
  Missing,
  Empty,
  Invalid,
  Pid(u32),
}

/// Starts, tracks and stops the forwarder through its PID file.
pub struct Supervisor<'a> {
  shell: &'a Shell<'a>,
  processes: &'a dyn ProcessTable,
  name: String,
  pid_file: PathBuf,
  log_path: PathBuf,
  poll: PollSettings,
}

impl<'a> Supervisor<'a> {
  pub fn new(
    shell: &'a Shell<'a>,
    processes: &'a dyn ProcessTable,
    pid_file: PathBuf,
    log_path: PathBuf,
  ) -> Self {
    Self {
      shell,
      processes,
      name: BINARY_NAME.to_string(),
      pid_file,
      log_path,
      poll: PollSettings::default(),
    }
  }

  pub fn with_poll(mut self, poll: PollSettings) -> Self {
    self.poll = poll;
    self
  }

  pub fn log_path(&self) -> &Path {
    &self.log_path
  }

  /// Launches `nohup <binary>` elevated and waits for the real worker PID,
  /// which belongs to a descendant of the launcher, not the launcher itself.
  pub fn start(&self, binary: &Path, cfg: &NetworkConfig) -> Result<ForwarderHandle, ForwarderError> {
    let name = binary
      .file_name()
      .and_then(|s| s.to_str())
      .unwrap_or(&self.name)
      .to_string();
    let binary_arg = binary.to_string_lossy().to_string();
    let device = format!("tun://{}", cfg.tun.dev);
    let proxy = proxy_url(&cfg.socks.host, cfg.socks.port);
    let args = [
      binary_arg.as_str(),
      "-device",
      device.as_str(),
      "-proxy",
      proxy.as_str(),
      "-loglevel",
      "info",
    ];

    let launcher_pid = self
      .shell
      .spawn_elevated("nohup", &args, &self.log_path)
      .map_err(|source| ForwarderError::Launch {
        name: name.clone(),
        source,
      })?;

    let worker_pid = self
      .wait_for_worker(launcher_pid, &name)
      .ok_or_else(|| ForwarderError::WorkerNotFound {
        name: name.clone(),
        launcher_pid,
        waited: self.poll.timeout,
      })?;

    self.write_pid(worker_pid)?;
    Ok(ForwarderHandle {
      launcher_pid,
      worker_pid,
      pid_file: self.pid_file.clone(),
    })
  }

  fn wait_for_worker(&self, launcher_pid: u32, name: &str) -> Option<u32> {
    let deadline = Instant::now() + self.poll.timeout;
    loop {
      if let Some(pid) = self
        .processes
        .descendants_named(launcher_pid, name)
        .into_iter()
        .next()
      {
        return Some(pid);
      }
      if Instant::now() >= deadline {
        return None;
      }
      thread::sleep(self.poll.interval);
    }
  }

  fn write_pid(&self, pid: u32) -> Result<(), ForwarderError> {
    let pid_err = |source| ForwarderError::PidFile {
      path: self.pid_file.clone(),
      source,
    };
    if let Some(parent) = self.pid_file.parent() {
      fs::create_dir_all(parent).map_err(pid_err)?;
    }
    fs::write(&self.pid_file, format!("{pid}\n")).map_err(pid_err)
  }

  fn read_pid(&self) -> PidRecord {
    let content = match fs::read_to_string(&self.pid_file) {
      Ok(content) => content,
      Err(_) => return PidRecord::Missing,
    };
    let trimmed = content.trim();
    if trimmed.is_empty() {
      return PidRecord::Empty;
    }
    match trimmed.parse::<u32>() {
      Ok(pid) if pid > 0 => PidRecord::Pid(pid),
      _ => PidRecord::Invalid,
    }
  }

  /// Liveness of the tracked worker. Without a usable PID file any process
  /// with the forwarder's name counts, which is a weaker signal.
  pub fn is_running(&self) -> bool {
    match self.read_pid() {
      PidRecord::Pid(pid) => self.processes.is_alive(pid),
      PidRecord::Invalid => false,
      PidRecord::Missing | PidRecord::Empty => !self.processes.pids_named(&self.name).is_empty(),
    }
  }

  /// Best-effort termination; the PID file is removed even if the signal fails.
  pub fn stop(&self) -> Result<(), ForwarderError> {
    match self.read_pid() {
      PidRecord::Pid(pid) => {
        if let Err(err) = self.shell.run_elevated("kill", &[pid.to_string().as_str()]) {
          log_warn(&format!("kill {pid}: {err}"));
        }
      }
      PidRecord::Missing | PidRecord::Empty | PidRecord::Invalid => self.stop_by_name(),
    }
    match fs::remove_file(&self.pid_file) {
      Ok(()) => Ok(()),
      Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(()),
      Err(source) => Err(ForwarderError::PidFile {
        path: self.pid_file.clone(),
        source,
      }),
    }
  }

  fn stop_by_name(&self) {
    for pid in self.processes.pids_named(&self.name) {
      let _ = self.shell.run_elevated("kill", &[pid.to_string().as_str()]);
    }
  }
}

fn proxy_url(host: &str, port: u16) -> String {
  if host.contains(':') {
    format!("socks5://[{host}]:{port}")
  } else {
    format!("socks5://{host}:{port}")
  }
}
