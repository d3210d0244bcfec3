use crate::models::NetworkConfig;
use crate::storage::set_private_permissions;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
  #[error("read {path}: {source}")]
  Read {
    path: PathBuf,
    #[source]
    source: io::Error,
  },
  #[error("write {path}: {source}")]
  Write {
    path: PathBuf,
    #[source]
    source: io::Error,
  },
  #[error("parse {path}: {source}")]
  Parse {
    path: PathBuf,
    #[source]
    source: toml::de::Error,
  },
  #[error("serialize config: {0}")]
  Serialize(#[from] toml::ser::Error),
}

/// Returns the stored config and whether the file existed. A missing file is
/// not an error.
pub fn load(path: &Path) -> Result<(NetworkConfig, bool), ConfigError> {
  let content = match fs::read_to_string(path) {
    Ok(content) => content,
    Err(err) if err.kind() == io::ErrorKind::NotFound => {
      return Ok((NetworkConfig::default(), false))
    }
    Err(source) => {
      return Err(ConfigError::Read {
        path: path.to_path_buf(),
        source,
      })
    }
  };
  let cfg = toml::from_str(&content).map_err(|source| ConfigError::Parse {
    path: path.to_path_buf(),
    source,
  })?;
  Ok((cfg, true))
}

pub fn save(path: &Path, cfg: &NetworkConfig) -> Result<(), ConfigError> {
  let write_err = |source| ConfigError::Write {
    path: path.to_path_buf(),
    source,
  };
  if let Some(parent) = path.parent() {
    fs::create_dir_all(parent).map_err(write_err)?;
  }
  let payload = toml::to_string_pretty(cfg)?;
  fs::write(path, payload).map_err(write_err)?;
  set_private_permissions(path).map_err(write_err)?;
  Ok(())
}
