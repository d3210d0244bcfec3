use crate::exec::{CommandError, Shell};
use crate::storage::set_private_permissions;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum BackupError {
  #[error("backup {path}: {source}")]
  Io {
    path: PathBuf,
    #[source]
    source: io::Error,
  },
  #[error("write {target}: {source}")]
  Install {
    target: PathBuf,
    #[source]
    source: CommandError,
  },
}

fn io_err(path: &Path) -> impl FnOnce(io::Error) -> BackupError + '_ {
  move |source| BackupError::Io {
    path: path.to_path_buf(),
    source,
  }
}

/// A system file and where its pre-tool original is kept.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackupRecord {
  pub source: PathBuf,
  pub backup: PathBuf,
}

impl BackupRecord {
  pub fn new(source: impl Into<PathBuf>, backup: impl Into<PathBuf>) -> Self {
    Self {
      source: source.into(),
      backup: backup.into(),
    }
  }

  pub fn take(&self) -> Result<(), BackupError> {
    backup_once(&self.source, &self.backup)
  }

  pub fn restore(&self, shell: &Shell) -> Result<bool, BackupError> {
    restore_if_present(shell, &self.backup, &self.source)
  }
}

/// Copies `source` to `backup` unless a backup already exists, so repeated
/// runs keep the original. A missing source is nothing to protect.
pub fn backup_once(source: &Path, backup: &Path) -> Result<(), BackupError> {
  match fs::symlink_metadata(backup) {
    Ok(_) => return Ok(()),
    Err(err) if err.kind() == io::ErrorKind::NotFound => {}
    Err(err) => return Err(io_err(backup)(err)),
  }

  let bytes = match fs::read(source) {
    Ok(bytes) => bytes,
    Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(()),
    Err(err) => return Err(io_err(source)(err)),
  };
  if let Some(parent) = backup.parent() {
    fs::create_dir_all(parent).map_err(io_err(parent))?;
  }
  fs::write(backup, bytes).map_err(io_err(backup))?;
  set_private_permissions(backup).map_err(io_err(backup))
}

/// Puts the backup back over `target`. Returns `Ok(false)` when there is no
/// backup to restore.
pub fn restore_if_present(shell: &Shell, backup: &Path, target: &Path) -> Result<bool, BackupError> {
  let bytes = match fs::read(backup) {
    Ok(bytes) => bytes,
    Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(false),
    Err(err) => return Err(io_err(backup)(err)),
  };
  install_file(shell, &bytes, target)?;
  Ok(true)
}

/// Writes `bytes` to a private temp file, then moves it over `target` with
/// elevation so readers never see a partial file.
pub fn install_file(shell: &Shell, bytes: &[u8], target: &Path) -> Result<(), BackupError> {
  let name = target
    .file_name()
    .and_then(|s| s.to_str())
    .unwrap_or("file");
  let tmp = std::env::temp_dir().join(format!("{name}.wslbridge-{}", Uuid::new_v4()));
  fs::write(&tmp, bytes).map_err(io_err(&tmp))?;

  let tmp_arg = tmp.to_string_lossy().to_string();
  let target_arg = target.to_string_lossy().to_string();
  let install_err = |source| BackupError::Install {
    target: target.to_path_buf(),
    source,
  };
  if let Err(err) = shell.run_elevated("mv", &[tmp_arg.as_str(), target_arg.as_str()]) {
    let _ = fs::remove_file(&tmp);
    return Err(install_err(err));
  }
  shell
    .run_elevated("chmod", &["644", target_arg.as_str()])
    .map_err(install_err)
}
