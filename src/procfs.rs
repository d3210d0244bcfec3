use std::collections::{HashMap, HashSet};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

/// Kernel limit on `/proc/<pid>/comm`, excluding the trailing newline.
const COMM_MAX: usize = 15;

pub trait ProcessTable {
  /// Processes in the tree rooted at `root` (inclusive) whose command name is `name`.
  fn descendants_named(&self, root: u32, name: &str) -> Vec<u32>;
  /// Every process on the host whose command name is `name`.
  fn pids_named(&self, name: &str) -> Vec<u32>;
  /// Signal-0 liveness probe.
  fn is_alive(&self, pid: u32) -> bool;
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct ProcEntry {
  pid: u32,
  ppid: u32,
  comm: String,
}

pub struct ProcFs {
  root: PathBuf,
}

impl ProcFs {
  pub fn new() -> Self {
    Self::at("/proc")
  }

  pub fn at(root: impl Into<PathBuf>) -> Self {
    Self { root: root.into() }
  }

  fn entries(&self) -> io::Result<Vec<ProcEntry>> {
    let mut out = Vec::new();
    for entry in fs::read_dir(&self.root)? {
      let entry = match entry {
        Ok(entry) => entry,
        Err(_) => continue,
      };
      let file_name = entry.file_name();
      let pid = match file_name.to_str() {
        Some(name) if name.chars().all(|c| c.is_ascii_digit()) => name,
        _ => continue,
      };
      let pid: u32 = match pid.parse() {
        Ok(pid) => pid,
        Err(_) => continue,
      };
      // Processes can exit between read_dir and the reads below.
      if let Some(proc_entry) = read_entry(&entry.path(), pid) {
        out.push(proc_entry);
      }
    }
    Ok(out)
  }
}

impl Default for ProcFs {
  fn default() -> Self {
    Self::new()
  }
}

impl ProcessTable for ProcFs {
  fn descendants_named(&self, root: u32, name: &str) -> Vec<u32> {
    let entries = self.entries().unwrap_or_default();
    matching_subtree(&entries, root, name)
  }

  fn pids_named(&self, name: &str) -> Vec<u32> {
    let mut pids: Vec<u32> = self
      .entries()
      .unwrap_or_default()
      .into_iter()
      .filter(|entry| comm_matches(&entry.comm, name))
      .map(|entry| entry.pid)
      .collect();
    pids.sort_unstable();
    pids
  }

  fn is_alive(&self, pid: u32) -> bool {
    let pid = match libc::pid_t::try_from(pid) {
      Ok(pid) if pid > 0 => pid,
      _ => return false,
    };
    if unsafe { libc::kill(pid, 0) } == 0 {
      return true;
    }
    // The worker runs as root; an unprivileged caller gets EPERM for a live process.
    io::Error::last_os_error().raw_os_error() == Some(libc::EPERM)
  }
}

fn read_entry(dir: &Path, pid: u32) -> Option<ProcEntry> {
  let stat = fs::read_to_string(dir.join("stat")).ok()?;
  let ppid = parse_ppid(&stat)?;
  let comm = fs::read_to_string(dir.join("comm")).ok()?;
  Some(ProcEntry {
    pid,
    ppid,
    comm: comm.trim_end_matches('\n').to_string(),
  })
}

/// `comm` inside the parentheses may contain spaces or `)`, so the fields are
/// located after the last `)`: state, then ppid.
fn parse_ppid(stat: &str) -> Option<u32> {
  let rest = &stat[stat.rfind(')')? + 1..];
  let mut fields = rest.split_whitespace();
  fields.next()?;
  fields.next()?.parse().ok()
}

pub fn comm_matches(comm: &str, name: &str) -> bool {
  if comm == name {
    return true;
  }
  name.len() > COMM_MAX && name.is_char_boundary(COMM_MAX) && comm == &name[..COMM_MAX]
}

fn matching_subtree(entries: &[ProcEntry], root: u32, name: &str) -> Vec<u32> {
  let mut children: HashMap<u32, Vec<&ProcEntry>> = HashMap::new();
  for entry in entries {
    children.entry(entry.ppid).or_default().push(entry);
  }

  let mut found = Vec::new();
  let mut seen = HashSet::new();
  let mut stack = vec![root];
  if let Some(entry) = entries.iter().find(|entry| entry.pid == root) {
    if comm_matches(&entry.comm, name) {
      found.push(root);
    }
  }
  seen.insert(root);
  while let Some(pid) = stack.pop() {
    for child in children.get(&pid).map(Vec::as_slice).unwrap_or(&[]) {
      if !seen.insert(child.pid) {
        continue;
      }
      if comm_matches(&child.comm, name) {
        found.push(child.pid);
      }
      stack.push(child.pid);
    }
  }
  found.sort_unstable();
  found
}
