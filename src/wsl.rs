use crate::backup::{install_file, BackupError, BackupRecord};
use crate::exec::Shell;
use crate::logging::{log_step, log_warn};
use crate::storage::Paths;
use std::path::PathBuf;

pub const FALLBACK_NAMESERVER: &str = "8.8.8.8";

const WSL_CONF: &str = "[network]\ngenerateHosts = false\ngenerateResolvConf = false\n";

fn wsl_conf_record(paths: &Paths) -> BackupRecord {
  BackupRecord::new(&paths.wsl_conf, &paths.wsl_conf_backup)
}

fn resolv_conf_record(paths: &Paths) -> BackupRecord {
  BackupRecord::new(&paths.resolv_conf, &paths.resolv_conf_backup)
}

/// Stops WSL from regenerating resolv.conf on the next boot.
pub fn configure_wsl_conf(shell: &Shell, paths: &Paths) -> Result<(), BackupError> {
  let record = wsl_conf_record(paths);
  record.take()?;
  install_file(shell, WSL_CONF.as_bytes(), &record.source)?;
  log_step(&format!("Updated {}", record.source.display()));
  Ok(())
}

pub fn resolv_conf_content(nameserver: &str) -> String {
  let nameserver = nameserver.trim();
  if nameserver.is_empty() || nameserver == FALLBACK_NAMESERVER {
    return format!("nameserver {FALLBACK_NAMESERVER}\n");
  }
  format!("nameserver {nameserver}\nnameserver {FALLBACK_NAMESERVER}\n")
}

pub fn write_resolv_conf(shell: &Shell, paths: &Paths, nameserver: &str) -> Result<(), BackupError> {
  let record = resolv_conf_record(paths);
  record.take()?;
  install_file(shell, resolv_conf_content(nameserver).as_bytes(), &record.source)?;
  log_step(&format!("Updated {}", record.source.display()));
  Ok(())
}

/// Puts back every system file that has a backup. A failed restore is
/// reported and the next file is still attempted.
pub fn restore_system_files(shell: &Shell, paths: &Paths) -> Vec<PathBuf> {
  let mut restored = Vec::new();
  for record in [wsl_conf_record(paths), resolv_conf_record(paths)] {
    match record.restore(shell) {
      Ok(true) => {
        log_step(&format!("Restored {}", record.source.display()));
        restored.push(record.source);
      }
      Ok(false) => {}
      Err(err) => log_warn(&format!("restore {}: {err}", record.source.display())),
    }
  }
  restored
}
