use crate::backup::BackupError;
use crate::config::ConfigError;
use crate::exec::CommandError;
use crate::forwarder::ForwarderError;
use crate::gateway::GatewayError;
use crate::models::ConfigInvalid;
use crate::platform::PlatformError;
use crate::routes::RouteError;
use crate::storage::StorageError;
use std::io;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
  #[error(transparent)]
  Platform(#[from] PlatformError),
  #[error(transparent)]
  Storage(#[from] StorageError),
  #[error(transparent)]
  Config(#[from] ConfigError),
  #[error("invalid config: {0}")]
  InvalidConfig(#[from] ConfigInvalid),
  #[error("could not detect SOCKS gateway: {0}")]
  Gateway(#[from] GatewayError),
  #[error(transparent)]
  Route(#[from] RouteError),
  #[error(transparent)]
  Forwarder(#[from] ForwarderError),
  #[error(transparent)]
  Backup(#[from] BackupError),
  #[error("sudo auth failed: {0}")]
  Privilege(#[source] CommandError),
  #[error("prompt: {0}")]
  Prompt(#[from] io::Error),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
  Environment,
  Privilege,
  Discovery,
  Operation,
}

impl Error {
  pub fn kind(&self) -> ErrorKind {
    match self {
      Error::Platform(_) => ErrorKind::Environment,
      Error::Forwarder(
        ForwarderError::ToolchainMissing(_)
        | ForwarderError::InstallFailed { .. }
        | ForwarderError::NotFoundAfterInstall(_),
      ) => ErrorKind::Environment,
      Error::Forwarder(ForwarderError::WorkerNotFound { .. }) => ErrorKind::Discovery,
      Error::Gateway(_) => ErrorKind::Discovery,
      Error::Privilege(_) => ErrorKind::Privilege,
      _ => ErrorKind::Operation,
    }
  }

  /// Extra advice printed under the error by the CLI.
  pub fn hint(&self) -> Option<&'static str> {
    match self.kind() {
      ErrorKind::Discovery => Some("retry, or set socks.host in the config file"),
      ErrorKind::Privilege => Some("this command needs sudo rights"),
      ErrorKind::Environment | ErrorKind::Operation => None,
    }
  }
}

pub type Result<T> = std::result::Result<T, Error>;
