use crate::exec::{find_executable, CommandError, Shell};
use crate::logging::log_step;
use std::env;
use std::ffi::OsString;
use std::fs;
use std::path::PathBuf;
use thiserror::Error;

/// Command → package that provides it.
const REQUIRED: &[(&str, &str)] = &[
  ("curl", "curl"),
  ("dig", "dnsutils"),
  ("nc", "netcat-openbsd"),
  ("socat", "socat"),
  ("psql", "postgresql-client"),
  ("ip", "iproute2"),
  ("go", "golang-go"),
];

#[derive(Debug, Error)]
pub enum PlatformError {
  #[error("{0} is not supported (linux only)")]
  Unsupported(String),
  #[error("apt not found: expected ubuntu/debian")]
  AptMissing,
  #[error("install packages: {0}")]
  Install(#[source] CommandError),
}

pub fn ensure_linux() -> Result<(), PlatformError> {
  if cfg!(target_os = "linux") {
    Ok(())
  } else {
    Err(PlatformError::Unsupported(env::consts::OS.to_string()))
  }
}

pub fn is_wsl_kernel(proc_version: &str) -> bool {
  proc_version.to_ascii_lowercase().contains("microsoft")
}

pub trait Platform {
  fn name(&self) -> &str;
  fn ensure_deps(&self, shell: &Shell) -> Result<(), PlatformError>;
  fn is_wsl(&self) -> bool;
}

pub struct Ubuntu {
  search_path: Option<OsString>,
  proc_version: PathBuf,
}

impl Ubuntu {
  pub fn from_env() -> Self {
    Self {
      search_path: env::var_os("PATH"),
      proc_version: PathBuf::from("/proc/version"),
    }
  }

  fn missing_packages(&self) -> Vec<&'static str> {
    REQUIRED
      .iter()
      .filter(|(bin, _)| find_executable(self.search_path.as_deref(), bin).is_none())
      .map(|(_, pkg)| *pkg)
      .collect()
  }
}

impl Platform for Ubuntu {
  fn name(&self) -> &str {
    "ubuntu"
  }

  fn ensure_deps(&self, shell: &Shell) -> Result<(), PlatformError> {
    if find_executable(self.search_path.as_deref(), "apt").is_none() {
      return Err(PlatformError::AptMissing);
    }
    let packages = self.missing_packages();
    if packages.is_empty() {
      return Ok(());
    }
    log_step(&format!("Installing packages: {}", packages.join(" ")));
    shell
      .run_elevated("apt", &["update"])
      .map_err(PlatformError::Install)?;
    let mut args = vec!["install", "-y"];
    args.extend(packages);
    shell
      .run_elevated("apt", &args)
      .map_err(PlatformError::Install)
  }

  fn is_wsl(&self) -> bool {
    fs::read_to_string(&self.proc_version)
      .map(|version| is_wsl_kernel(&version))
      .unwrap_or(false)
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::exec::Elevation;
  use crate::testing::{make_executable, temp_dir, FakeHost};

  fn ubuntu_with(dir: &std::path::Path) -> Ubuntu {
    Ubuntu {
      search_path: Some(dir.as_os_str().to_os_string()),
      proc_version: dir.join("version"),
    }
  }

  #[test]
  fn detects_wsl_kernel() {
    assert!(is_wsl_kernel(
      "Linux version 5.15.153.1-microsoft-standard-WSL2 (root@1ff3b4b3a1d8)"
    ));
    assert!(is_wsl_kernel("Linux version 4.4.0-19041-Microsoft"));
    assert!(!is_wsl_kernel("Linux version 6.8.0-45-generic (buildd@lcy02)"));

    let dir = temp_dir("wsl-detect");
    let ubuntu = ubuntu_with(&dir);
    assert!(!ubuntu.is_wsl());
    fs::write(dir.join("version"), "Linux version 5.15.0-microsoft-standard").unwrap();
    assert!(ubuntu.is_wsl());
    assert_eq!(ubuntu.name(), "ubuntu");
  }

  #[test]
  fn requires_apt() {
    let dir = temp_dir("no-apt");
    let host = FakeHost::new();
    let shell = Shell::new(&host, Elevation::Sudo);
    assert!(matches!(
      ubuntu_with(&dir).ensure_deps(&shell),
      Err(PlatformError::AptMissing)
    ));
  }

  #[test]
  fn installs_only_missing_packages() {
    let dir = temp_dir("apt");
    for bin in ["apt", "curl", "dig", "nc", "socat", "psql"] {
      make_executable(&dir, bin);
    }
    let host = FakeHost::new();
    let shell = Shell::new(&host, Elevation::Sudo);
    ubuntu_with(&dir).ensure_deps(&shell).unwrap();
    assert_eq!(
      host.calls(),
      vec![
        "sudo apt update".to_string(),
        "sudo apt install -y iproute2 golang-go".to_string()
      ]
    );
  }

  #[test]
  fn nothing_to_install() {
    let dir = temp_dir("apt-complete");
    make_executable(&dir, "apt");
    for (bin, _) in REQUIRED {
      make_executable(&dir, bin);
    }
    let host = FakeHost::new();
    let shell = Shell::new(&host, Elevation::Sudo);
    ubuntu_with(&dir).ensure_deps(&shell).unwrap();
    assert!(host.calls().is_empty());
  }
}
