use std::env;
use std::ffi::OsStr;
use std::fs::{self, OpenOptions};
use std::io;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::process::{Command, ExitStatus, Stdio};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CommandError {
  #[error("{program} failed to start: {source}")]
  Spawn {
    program: String,
    #[source]
    source: io::Error,
  },
  #[error("{command} failed: {status}")]
  Failed { command: String, status: String },
  #[error("io error: {0}")]
  Io(#[from] io::Error),
}

/// Runs external programs on behalf of the core.
pub trait Runner {
  /// Runs to completion with the terminal attached.
  fn run(&self, program: &str, args: &[&str]) -> Result<(), CommandError>;
  /// Runs to completion and returns stdout as text.
  fn run_capture(&self, program: &str, args: &[&str]) -> Result<String, CommandError>;
  /// Starts without waiting, stdout and stderr appended to `log`. Returns the
  /// PID of the process that was spawned, which may be a wrapper.
  fn spawn_detached(&self, program: &str, args: &[&str], log: &Path) -> Result<u32, CommandError>;
}

pub struct SystemRunner;

impl Runner for SystemRunner {
  fn run(&self, program: &str, args: &[&str]) -> Result<(), CommandError> {
    let status = Command::new(program)
      .args(args)
      .stdin(Stdio::inherit())
      .stdout(Stdio::inherit())
      .stderr(Stdio::inherit())
      .status()
      .map_err(|source| spawn_error(program, source))?;
    check_status(program, args, status)
  }

  fn run_capture(&self, program: &str, args: &[&str]) -> Result<String, CommandError> {
    let output = Command::new(program)
      .args(args)
      .stdin(Stdio::inherit())
      .stderr(Stdio::inherit())
      .output()
      .map_err(|source| spawn_error(program, source))?;
    check_status(program, args, output.status)?;
    Ok(String::from_utf8_lossy(&output.stdout).to_string())
  }

  fn spawn_detached(&self, program: &str, args: &[&str], log: &Path) -> Result<u32, CommandError> {
    let stdout = OpenOptions::new()
      .create(true)
      .write(true)
      .truncate(true)
      .open(log)?;
    let stderr = stdout.try_clone()?;
    let child = Command::new(program)
      .args(args)
      .stdin(Stdio::null())
      .stdout(stdout)
      .stderr(stderr)
      .spawn()
      .map_err(|source| spawn_error(program, source))?;
    Ok(child.id())
  }
}

fn spawn_error(program: &str, source: io::Error) -> CommandError {
  CommandError::Spawn {
    program: program.to_string(),
    source,
  }
}

fn check_status(program: &str, args: &[&str], status: ExitStatus) -> Result<(), CommandError> {
  if status.success() {
    return Ok(());
  }
  Err(CommandError::Failed {
    command: render_command(program, args),
    status: status.to_string(),
  })
}

pub fn render_command(program: &str, args: &[&str]) -> String {
  let mut line = program.to_string();
  for arg in args {
    line.push(' ');
    line.push_str(arg);
  }
  line
}

/// A regular file with any execute bit set.
pub fn is_executable(path: &Path) -> bool {
  match fs::metadata(path) {
    Ok(meta) => meta.is_file() && meta.permissions().mode() & 0o111 != 0,
    Err(_) => false,
  }
}

/// Looks `name` up in a `PATH`-style list of directories.
pub fn find_executable(search_path: Option<&OsStr>, name: &str) -> Option<PathBuf> {
  env::split_paths(search_path?)
    .map(|dir| dir.join(name))
    .find(|candidate| is_executable(candidate))
}

/// How privileged commands are executed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Elevation {
  Sudo,
  Root,
}

impl Elevation {
  pub fn detect() -> Self {
    if unsafe { libc::geteuid() } == 0 {
      Elevation::Root
    } else {
      Elevation::Sudo
    }
  }
}

/// A runner paired with the elevation mode used for privileged steps.
pub struct Shell<'a> {
  runner: &'a dyn Runner,
  elevation: Elevation,
}

impl<'a> Shell<'a> {
  pub fn new(runner: &'a dyn Runner, elevation: Elevation) -> Self {
    Self { runner, elevation }
  }

  pub fn run(&self, program: &str, args: &[&str]) -> Result<(), CommandError> {
    self.runner.run(program, args)
  }

  pub fn capture(&self, program: &str, args: &[&str]) -> Result<String, CommandError> {
    self.runner.run_capture(program, args)
  }

  pub fn run_elevated(&self, program: &str, args: &[&str]) -> Result<(), CommandError> {
    match self.elevation {
      Elevation::Root => self.runner.run(program, args),
      Elevation::Sudo => self.runner.run("sudo", &with_program(program, args)),
    }
  }

  pub fn spawn_elevated(
    &self,
    program: &str,
    args: &[&str],
    log: &Path,
  ) -> Result<u32, CommandError> {
    match self.elevation {
      Elevation::Root => self.runner.spawn_detached(program, args, log),
      Elevation::Sudo => self
        .runner
        .spawn_detached("sudo", &with_program(program, args), log),
    }
  }

  /// Asks for sudo credentials once so later elevated steps run unattended.
  pub fn authorize(&self) -> Result<(), CommandError> {
    match self.elevation {
      Elevation::Root => Ok(()),
      Elevation::Sudo => self.runner.run("sudo", &["-v"]),
    }
  }
}

fn with_program<'s>(program: &'s str, args: &[&'s str]) -> Vec<&'s str> {
  let mut full = Vec::with_capacity(args.len() + 1);
  full.push(program);
  full.extend_from_slice(args);
  full
}
