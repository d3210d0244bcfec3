use crate::models::RouteSnapshot;
use std::fs;
use std::io;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use thiserror::Error;

const APP_DIR: &str = "wslbridge";
const CONFIG_FILE: &str = "config.toml";
const LOCAL_CONFIG_DIR: &str = ".values";
const LOCAL_CONFIG_FILE: &str = "values.local.toml";
const FORWARDER_LOG: &str = "/tmp/tun2socks.log";

#[derive(Debug, Error)]
pub enum StorageError {
  #[error("missing home directory")]
  MissingHomeDir,
  #[error("io error on {path}: {source}")]
  Io {
    path: PathBuf,
    #[source]
    source: io::Error,
  },
}

impl StorageError {
  fn io(path: &Path, source: io::Error) -> Self {
    StorageError::Io {
      path: path.to_path_buf(),
      source,
    }
  }
}

/// Every file the tool reads or writes.
#[derive(Debug, Clone)]
pub struct Paths {
  pub config_path: PathBuf,
  pub share_dir: PathBuf,
  pub state_dir: PathBuf,
  pub default_route_file: PathBuf,
  pub pid_file: PathBuf,
  pub log_path: PathBuf,
  pub forwarder_log: PathBuf,
  pub wsl_conf: PathBuf,
  pub wsl_conf_backup: PathBuf,
  pub resolv_conf: PathBuf,
  pub resolv_conf_backup: PathBuf,
}

impl Paths {
  pub fn default_paths() -> Result<Self, StorageError> {
    let home = dirs::home_dir().ok_or(StorageError::MissingHomeDir)?;
    Ok(Self::under_home(&home))
  }

  pub fn under_home(home: &Path) -> Self {
    let config_dir = home.join(".config").join(APP_DIR);
    let share_dir = home.join(".local").join("share").join(APP_DIR);
    let state_dir = home.join(".local").join("state").join(APP_DIR);
    Self {
      config_path: config_dir.join(CONFIG_FILE),
      share_dir,
      default_route_file: state_dir.join("default_route.txt"),
      pid_file: state_dir.join("tun2socks.pid"),
      log_path: state_dir.join("wslbridge.log"),
      forwarder_log: PathBuf::from(FORWARDER_LOG),
      wsl_conf: PathBuf::from("/etc/wsl.conf"),
      wsl_conf_backup: state_dir.join("wsl.conf.bak"),
      resolv_conf: PathBuf::from("/etc/resolv.conf"),
      resolv_conf_backup: state_dir.join("resolv.conf.bak"),
      state_dir,
    }
  }

  pub fn ensure_dirs(&self) -> Result<(), StorageError> {
    let mut dirs = vec![self.share_dir.as_path(), self.state_dir.as_path()];
    if let Some(parent) = self.config_path.parent() {
      dirs.push(parent);
    }
    for dir in dirs {
      fs::create_dir_all(dir).map_err(|e| StorageError::io(dir, e))?;
    }
    Ok(())
  }
}

pub fn read_route_snapshot(path: &Path) -> Result<Option<RouteSnapshot>, StorageError> {
  match fs::read_to_string(path) {
    Ok(content) => {
      let snapshot = RouteSnapshot::new(&content);
      if snapshot.is_empty() {
        Ok(None)
      } else {
        Ok(Some(snapshot))
      }
    }
    Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(None),
    Err(err) => Err(StorageError::io(path, err)),
  }
}

pub fn write_route_snapshot(path: &Path, snapshot: &RouteSnapshot) -> Result<(), StorageError> {
  if let Some(parent) = path.parent() {
    fs::create_dir_all(parent).map_err(|e| StorageError::io(parent, e))?;
  }
  fs::write(path, format!("{}\n", snapshot.line())).map_err(|e| StorageError::io(path, e))
}

pub fn remove_route_snapshot(path: &Path) -> Result<(), StorageError> {
  match fs::remove_file(path) {
    Ok(()) => Ok(()),
    Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(()),
    Err(err) => Err(StorageError::io(path, err)),
  }
}

pub fn set_private_permissions(path: &Path) -> io::Result<()> {
  let mut perms = fs::metadata(path)?.permissions();
  perms.set_mode(0o600);
  fs::set_permissions(path, perms)
}

/// Walks up from `start` to the first directory holding `.git` or
/// `Cargo.toml`; falls back to `start` itself.
pub fn find_project_root(start: &Path) -> PathBuf {
  let mut dir = start.to_path_buf();
  loop {
    if dir.join(".git").exists() || dir.join("Cargo.toml").exists() {
      return dir;
    }
    if !dir.pop() {
      return start.to_path_buf();
    }
  }
}

pub fn project_local_config_path(cwd: &Path) -> PathBuf {
  find_project_root(cwd)
    .join(LOCAL_CONFIG_DIR)
    .join(LOCAL_CONFIG_FILE)
}

/// Prefers `<project>/.values/values.local.toml` when it exists or when the
/// working directory is inside a checkout of this tool.
pub fn resolve_config_path(cwd: &Path, user_config: &Path) -> PathBuf {
  let local = project_local_config_path(cwd);
  if local.exists() {
    return local;
  }
  let is_own_checkout = local
    .parent()
    .and_then(Path::parent)
    .map(is_wslbridge_checkout)
    .unwrap_or(false);
  if is_own_checkout {
    local
  } else {
    user_config.to_path_buf()
  }
}

fn is_wslbridge_checkout(root: &Path) -> bool {
  let manifest = match fs::read_to_string(root.join("Cargo.toml")) {
    Ok(manifest) => manifest,
    Err(_) => return false,
  };
  let value: toml::Value = match toml::from_str(&manifest) {
    Ok(value) => value,
    Err(_) => return false,
  };
  value
    .get("package")
    .and_then(|package| package.get("name"))
    .and_then(toml::Value::as_str)
    == Some(APP_DIR)
}
