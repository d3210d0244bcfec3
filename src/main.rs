mod backup;
mod commands;
mod config;
mod error;
mod exec;
mod forwarder;
mod gateway;
mod logging;
mod models;
mod platform;
mod procfs;
mod prompt;
mod routes;
mod storage;
#[cfg(test)]
mod testing;
mod wsl;

use clap::{Parser, Subcommand};
use commands::{DisableReport, EnableOptions, EnableOutcome, Runtime, StatusReport};
use error::Result;
use exec::{Elevation, Shell, SystemRunner};
use forwarder::{BinaryLocator, PollSettings};
use logging::{init_logger, log_step, log_warn};
use models::TransitionState;
use platform::Ubuntu;
use procfs::ProcFs;
use prompt::Prompter;
use std::env;
use std::path::PathBuf;
use std::process::ExitCode;
use storage::{resolve_config_path, Paths};

/// Route all traffic of this machine through a SOCKS proxy via tun2socks
#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
struct Cli {
  #[command(subcommand)]
  command: Command,

  /// Config file (default: .values/values.local.toml in a checkout, else ~/.config/wslbridge/config.toml)
  #[arg(long, global = true)]
  config: Option<PathBuf>,

  /// Physical interface probed when no route names the gateway
  #[arg(long, global = true, default_value = gateway::PRIMARY_INTERFACE)]
  iface: String,
}

#[derive(Subcommand, Debug)]
enum Command {
  /// Point the default route at the tunnel and start tun2socks
  #[command(visible_alias = "init")]
  Enable {
    /// SOCKS port (overrides the config, skips the prompt)
    #[arg(long, value_parser = clap::value_parser!(u16).range(1..))]
    socks_port: Option<u16>,
    /// Re-run every step and ask for the port again
    #[arg(long)]
    force: bool,
    /// Do not check or install system packages
    #[arg(long)]
    skip_deps: bool,
  },
  /// Restore the saved default route and stop tun2socks
  #[command(visible_alias = "stop")]
  Disable,
  /// Show whether the tunnel is active
  Status,
}

fn main() -> ExitCode {
  let cli = Cli::parse();
  match run(cli) {
    Ok(()) => ExitCode::SUCCESS,
    Err(err) => {
      eprintln!("error: {err}");
      if let Some(hint) = err.hint() {
        eprintln!("hint: {hint}");
      }
      ExitCode::FAILURE
    }
  }
}

fn run(cli: Cli) -> Result<()> {
  let mut paths = Paths::default_paths()?;
  paths.config_path = match cli.config {
    Some(path) => path,
    None => {
      let cwd = env::current_dir().unwrap_or_else(|_| PathBuf::from("."));
      resolve_config_path(&cwd, &paths.config_path)
    }
  };
  if let Err(err) = init_logger(&paths.log_path) {
    log_warn(&format!("log file {}: {err}", paths.log_path.display()));
  }

  let runner = SystemRunner;
  let processes = ProcFs::new();
  let platform = Ubuntu::from_env();
  let prompt = Prompter::stdio();
  let rt = Runtime {
    paths,
    shell: Shell::new(&runner, Elevation::detect()),
    processes: &processes,
    platform: &platform,
    prompt: &prompt,
    locator: BinaryLocator::from_env(),
    poll: PollSettings::default(),
    iface: cli.iface,
  };

  match cli.command {
    Command::Enable {
      socks_port,
      force,
      skip_deps,
    } => {
      let opts = EnableOptions {
        socks_port,
        force,
        skip_deps,
      };
      if let EnableOutcome::Started(handle) = commands::enable(&rt, &opts)? {
        log_step(&format!(
          "wslbridge enabled (pid file {})",
          handle.pid_file.display()
        ));
      }
    }
    Command::Disable => print_disable(&commands::disable(&rt)?),
    Command::Status => print_status(&commands::status(&rt)?),
  }
  Ok(())
}

fn print_disable(report: &DisableReport) {
  if !report.route_restored && report.restored_files.is_empty() {
    log_step("wslbridge disabled (nothing to restore)");
  } else {
    log_step("wslbridge disabled");
  }
}

fn yes_no(value: bool) -> &'static str {
  if value {
    "yes"
  } else {
    "no"
  }
}

fn print_status(report: &StatusReport) {
  let state = match report.state {
    TransitionState::Enabled => "enabled".to_string(),
    TransitionState::Disabled => "disabled".to_string(),
    TransitionState::Partial {
      tunnel_route,
      forwarder,
    } => format!(
      "partial (route on {}: {}, tun2socks running: {}); run enable or disable",
      report.tun_dev,
      yes_no(tunnel_route),
      yes_no(forwarder)
    ),
  };
  println!("state:         {state}");
  if report.route.is_empty() {
    println!("default route: (none)");
  } else {
    println!("default route: {}", report.route);
  }
  println!(
    "socks:         {}",
    report.socks.as_deref().unwrap_or("(not configured)")
  );
}
