use std::fs::{self, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::OnceLock;
use time::format_description::well_known::Rfc3339;
use time::OffsetDateTime;

static LOG_PATH: OnceLock<PathBuf> = OnceLock::new();

pub fn init_logger(path: &Path) -> io::Result<()> {
  if let Some(parent) = path.parent() {
    fs::create_dir_all(parent)?;
  }
  let _ = LOG_PATH.set(path.to_path_buf());
  Ok(())
}

pub fn append_log(path: &Path, message: &str) -> io::Result<()> {
  let timestamp = OffsetDateTime::now_local()
    .unwrap_or_else(|_| OffsetDateTime::now_utc())
    .format(&Rfc3339)
    .unwrap_or_else(|_| "unknown-time".to_string());

  let mut file = OpenOptions::new().create(true).append(true).open(path)?;
  writeln!(file, "{} | {}", timestamp, message)?;
  Ok(())
}

fn record(message: &str) {
  if let Some(path) = LOG_PATH.get() {
    let _ = append_log(path, message);
  }
}

/// Progress line for the operator.
pub fn log_step(message: &str) {
  println!("{message}");
  record(message);
}

pub fn log_warn(message: &str) {
  eprintln!("warning: {message}");
  record(&format!("WARN {message}"));
}
