//! In-memory host used by unit tests: a route table, tun devices and a
//! process tree behind the `Runner` and `ProcessTable` seams.

use crate::exec::{render_command, CommandError, Runner, Shell};
use crate::platform::{Platform, PlatformError};
use crate::procfs::{comm_matches, ProcessTable};
use std::cell::{Cell, RefCell};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use uuid::Uuid;

pub fn temp_dir(label: &str) -> PathBuf {
  let dir = std::env::temp_dir().join(format!("wslbridge-{label}-{}", Uuid::new_v4()));
  fs::create_dir_all(&dir).unwrap();
  dir
}

pub fn make_executable(dir: &Path, name: &str) -> PathBuf {
  let path = dir.join(name);
  fs::write(&path, "#!/bin/sh\nexit 0\n").unwrap();
  fs::set_permissions(&path, fs::Permissions::from_mode(0o755)).unwrap();
  path
}

struct FakeProcess {
  ppid: u32,
  name: String,
  alive: bool,
}

struct HostState {
  default_route: Option<String>,
  devices: HashSet<String>,
  interfaces: HashMap<String, String>,
  processes: BTreeMap<u32, FakeProcess>,
  next_pid: u32,
  calls: Vec<String>,
  spawned: Vec<String>,
  failing: Vec<String>,
  install_into: Option<PathBuf>,
  workers_never_appear: bool,
}

pub struct FakeHost {
  state: RefCell<HostState>,
}

fn failed(command: String) -> CommandError {
  CommandError::Failed {
    command,
    status: "exit status: 1".to_string(),
  }
}

impl FakeHost {
  pub fn new() -> Self {
    Self {
      state: RefCell::new(HostState {
        default_route: None,
        devices: HashSet::new(),
        interfaces: HashMap::new(),
        processes: BTreeMap::new(),
        next_pid: 1000,
        calls: Vec::new(),
        spawned: Vec::new(),
        failing: Vec::new(),
        install_into: None,
        workers_never_appear: false,
      }),
    }
  }

  pub fn set_default_route(&self, line: &str) {
    self.state.borrow_mut().default_route = Some(line.to_string());
  }

  pub fn default_route(&self) -> Option<String> {
    self.state.borrow().default_route.clone()
  }

  pub fn set_device(&self, dev: &str) {
    self.state.borrow_mut().devices.insert(dev.to_string());
  }

  pub fn has_device(&self, dev: &str) -> bool {
    self.state.borrow().devices.contains(dev)
  }

  pub fn set_interface(&self, iface: &str, cidr: &str) {
    self
      .state
      .borrow_mut()
      .interfaces
      .insert(iface.to_string(), cidr.to_string());
  }

  /// Makes every command starting with `prefix` fail. The prefix is matched
  /// against the command line without any `sudo`.
  pub fn fail_command(&self, prefix: &str) {
    self.state.borrow_mut().failing.push(prefix.to_string());
  }

  /// Commands passed to `run`, as typed.
  pub fn calls(&self) -> Vec<String> {
    self.state.borrow().calls.clone()
  }

  pub fn spawned(&self) -> Vec<String> {
    self.state.borrow().spawned.clone()
  }

  /// Where a `go install` drops the forwarder binary.
  pub fn install_into(&self, path: PathBuf) {
    self.state.borrow_mut().install_into = Some(path);
  }

  pub fn workers_never_appear(&self) {
    self.state.borrow_mut().workers_never_appear = true;
  }

  pub fn add_process(&self, ppid: u32, name: &str) -> u32 {
    let mut state = self.state.borrow_mut();
    let pid = state.next_pid;
    state.next_pid += 1;
    state.processes.insert(
      pid,
      FakeProcess {
        ppid,
        name: name.to_string(),
        alive: true,
      },
    );
    pid
  }

  fn ip(&self, args: &[&str], line: String) -> Result<(), CommandError> {
    let mut state = self.state.borrow_mut();
    match args {
      ["tuntap", "add", .., dev] => {
        if !state.devices.insert(dev.to_string()) {
          return Err(failed(line));
        }
      }
      ["tuntap", "del", .., dev] => {
        if !state.devices.remove(*dev) {
          return Err(failed(line));
        }
      }
      ["addr", "add", _, "dev", dev] | ["link", "set", dev, _] => {
        if !state.devices.contains(*dev) {
          return Err(failed(line));
        }
      }
      ["route", "del", "default"] => {
        if state.default_route.take().is_none() {
          return Err(failed(line));
        }
      }
      ["route", "add", "default", "dev", dev] => {
        if state.default_route.is_some() || !state.devices.contains(*dev) {
          return Err(failed(line));
        }
        state.default_route = Some(format!("default dev {dev}"));
      }
      ["route", "replace", rest @ ..] => {
        state.default_route = Some(rest.join(" "));
      }
      _ => {}
    }
    Ok(())
  }

  fn kill(&self, args: &[&str], line: String) -> Result<(), CommandError> {
    let pid: u32 = match args.last().and_then(|pid| pid.parse().ok()) {
      Some(pid) => pid,
      None => return Err(failed(line)),
    };
    let mut state = self.state.borrow_mut();
    match state.processes.get_mut(&pid) {
      Some(process) if process.alive => {
        process.alive = false;
        Ok(())
      }
      _ => Err(failed(line)),
    }
  }

  fn go_install(&self) -> Result<(), CommandError> {
    if let Some(path) = self.state.borrow().install_into.clone() {
      if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
      }
      fs::write(&path, "#!/bin/sh\n")?;
      fs::set_permissions(&path, fs::Permissions::from_mode(0o755))?;
    }
    Ok(())
  }
}

/// Splits off a leading `sudo`.
fn unwrap_sudo<'s>(program: &'s str, args: &'s [&'s str]) -> (&'s str, &'s [&'s str]) {
  match (program, args.split_first()) {
    ("sudo", Some((inner, rest))) => (inner, rest),
    _ => (program, args),
  }
}

impl Runner for FakeHost {
  fn run(&self, program: &str, args: &[&str]) -> Result<(), CommandError> {
    let line = render_command(program, args);
    self.state.borrow_mut().calls.push(line.clone());

    let (cmd, rest) = unwrap_sudo(program, args);
    let bare = render_command(cmd, rest);
    if self
      .state
      .borrow()
      .failing
      .iter()
      .any(|prefix| bare.starts_with(prefix.as_str()))
    {
      return Err(failed(line));
    }

    match cmd {
      "ip" => self.ip(rest, line),
      "kill" => self.kill(rest, line),
      "mv" => match rest {
        [from, to] => fs::rename(from, to).map_err(CommandError::Io),
        _ => Err(failed(line)),
      },
      "chmod" => match rest {
        [mode, path] => {
          let mode = u32::from_str_radix(mode, 8).map_err(|_| failed(line.clone()))?;
          fs::set_permissions(path, fs::Permissions::from_mode(mode)).map_err(CommandError::Io)
        }
        _ => Err(failed(line)),
      },
      "go" if rest.first() == Some(&"install") => self.go_install(),
      _ => Ok(()),
    }
  }

  fn run_capture(&self, program: &str, args: &[&str]) -> Result<String, CommandError> {
    let line = render_command(program, args);
    let state = self.state.borrow();
    match (program, args) {
      ("ip", ["route", "show", "default"]) => Ok(
        state
          .default_route
          .as_ref()
          .map(|route| format!("{route}\n"))
          .unwrap_or_default(),
      ),
      ("ip", ["-4", "-o", "addr", "show", "dev", iface]) => match state.interfaces.get(*iface) {
        Some(cidr) => Ok(format!(
          "2: {iface}    inet {cidr} brd 0.0.0.0 scope global {iface}\\       valid_lft forever preferred_lft forever\n"
        )),
        None => Err(failed(line)),
      },
      _ => Ok(String::new()),
    }
  }

  fn spawn_detached(&self, program: &str, args: &[&str], log: &Path) -> Result<u32, CommandError> {
    let _ = fs::write(log, "");
    self
      .state
      .borrow_mut()
      .spawned
      .push(render_command(program, args));

    let (cmd, rest) = unwrap_sudo(program, args);
    let binary = match (cmd, rest.first()) {
      ("nohup", Some(binary)) => Path::new(binary)
        .file_name()
        .and_then(|name| name.to_str())
        .unwrap_or(binary)
        .to_string(),
      _ => cmd.to_string(),
    };
    let never = self.state.borrow().workers_never_appear;

    if program == "sudo" {
      let launcher = self.add_process(1, "sudo");
      if !never {
        self.add_process(launcher, &binary);
      }
      Ok(launcher)
    } else if never {
      Ok(self.add_process(1, program))
    } else {
      // nohup execs the binary in place.
      Ok(self.add_process(1, &binary))
    }
  }
}

impl ProcessTable for FakeHost {
  fn descendants_named(&self, root: u32, name: &str) -> Vec<u32> {
    let state = self.state.borrow();
    let mut found = Vec::new();
    let mut stack = vec![root];
    while let Some(pid) = stack.pop() {
      if let Some(process) = state.processes.get(&pid) {
        if process.alive && comm_matches(&process.name, name) {
          found.push(pid);
        }
      }
      stack.extend(
        state
          .processes
          .iter()
          .filter(|(_, process)| process.ppid == pid)
          .map(|(child, _)| *child),
      );
    }
    found.sort_unstable();
    found
  }

  fn pids_named(&self, name: &str) -> Vec<u32> {
    self
      .state
      .borrow()
      .processes
      .iter()
      .filter(|(_, process)| process.alive && comm_matches(&process.name, name))
      .map(|(pid, _)| *pid)
      .collect()
  }

  fn is_alive(&self, pid: u32) -> bool {
    self
      .state
      .borrow()
      .processes
      .get(&pid)
      .map(|process| process.alive)
      .unwrap_or(false)
  }
}

#[derive(Default)]
pub struct FakePlatform {
  wsl: bool,
  deps_checked: Cell<bool>,
}

impl FakePlatform {
  pub fn wsl() -> Self {
    Self {
      wsl: true,
      ..Self::default()
    }
  }

  pub fn deps_checked(&self) -> bool {
    self.deps_checked.get()
  }
}

impl Platform for FakePlatform {
  fn name(&self) -> &str {
    "fake"
  }

  fn ensure_deps(&self, _shell: &Shell) -> Result<(), PlatformError> {
    self.deps_checked.set(true);
    Ok(())
  }

  fn is_wsl(&self) -> bool {
    self.wsl
  }
}
