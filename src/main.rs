#![forbid(unsafe_code)]

//! `procgroups`: foreground supervisor for named process groups.
//!
//! Starts or resumes groups, waits for them until they finish or the
//! supervisor is asked to shut down, and inspects captured output and the
//! event log of previous runs.

use std::path::{Path, PathBuf};

use clap::{Parser, Subcommand, ValueEnum};
use serde::Deserialize;
use tracing::{info, warn};
use tracing_subscriber::{fmt, EnvFilter};

use procgroups::capture::OutputStream;
use procgroups::models::command::Command;
use procgroups::{AppError, GlobalConfig, Groups, Result};

/// Root used when neither `--config` nor `--root` is given.
const DEFAULT_ROOT: &str = ".procgroups";

#[derive(Debug, Copy, Clone, Eq, PartialEq, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

#[derive(Debug, Parser)]
#[command(name = "procgroups", about = "Supervise named groups of processes", version, long_about = None)]
struct Cli {
    /// Path to the TOML configuration file.
    #[arg(long, conflicts_with = "root")]
    config: Option<PathBuf>,

    /// Root directory for capture files and the database.
    #[arg(long)]
    root: Option<PathBuf>,

    /// Log output format (text or json).
    #[arg(long, value_enum, default_value_t = LogFormat::Text)]
    log_format: LogFormat,

    #[command(subcommand)]
    action: Action,
}

#[derive(Debug, Subcommand)]
enum Action {
    /// Start a single-command group and wait for it.
    Run {
        /// Group name.
        group: String,
        /// Environment assignment; replaces the inherited environment.
        #[arg(long = "env", value_name = "KEY=VALUE")]
        env: Vec<String>,
        /// Program and arguments.
        #[arg(last = true, required = true)]
        argv: Vec<String>,
    },

    /// Start a group described by a TOML file and wait for it.
    Up {
        /// Group name.
        group: String,
        /// File with one `[[commands]]` table per command.
        #[arg(long)]
        file: PathBuf,
    },

    /// Reopen groups left running by a previous supervisor and wait.
    Resume {
        /// Reopen only this group instead of every active one.
        group: Option<String>,
    },

    /// Print the captured output of a command.
    Logs {
        /// Command identity.
        command_id: String,
        /// `stdout` or `stderr` (or 1 / 2).
        #[arg(long, default_value = "stdout")]
        stream: String,
    },

    /// Print the event log of a group.
    History {
        /// Group name.
        group: String,
        /// Emit one JSON object per line.
        #[arg(long)]
        json: bool,
    },

    /// List every group ever recorded.
    Groups,
}

/// Command entry of a group file.
#[derive(Debug, Deserialize)]
struct CommandSpec {
    args: Vec<String>,
    #[serde(default)]
    env: Vec<String>,
    id: Option<String>,
}

#[derive(Debug, Deserialize)]
struct GroupFile {
    commands: Vec<CommandSpec>,
}

fn main() -> Result<()> {
    let args = Cli::parse();
    init_tracing(args.log_format)?;

    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(|err| AppError::Config(format!("failed to build tokio runtime: {err}")))?
        .block_on(run(args))
}

async fn run(args: Cli) -> Result<()> {
    let config = match (&args.config, &args.root) {
        (Some(path), _) => GlobalConfig::load_from_path(path)?,
        (None, Some(root)) => GlobalConfig::for_root(root),
        (None, None) => GlobalConfig::for_root(DEFAULT_ROOT),
    };
    let groups = Groups::connect(config).await?;

    match args.action {
        Action::Run { group, env, argv } => {
            let cmd = Command::new(argv, env)?;
            println!("{}", cmd.id());
            groups.create(&group, vec![cmd]).await?;
            supervise(&groups, &[group]).await
        }
        Action::Up { group, file } => {
            let cmds = load_group_file(&file)?;
            for cmd in &cmds {
                println!("{}", cmd.id());
            }
            groups.create(&group, cmds).await?;
            supervise(&groups, &[group]).await
        }
        Action::Resume { group } => {
            let names = if let Some(name) = group {
                groups.open(&name).await?;
                vec![name]
            } else {
                groups.recover().await?
            };
            if names.is_empty() {
                info!("no active groups to resume");
                return Ok(());
            }
            supervise(&groups, &names).await
        }
        Action::Logs { command_id, stream } => {
            let mut lines = groups.logs(&command_id, stream.parse::<OutputStream>()?).await?;
            while let Some(line) = lines.next_line().await? {
                println!("{line}");
            }
            Ok(())
        }
        Action::History { group, json } => {
            for entry in groups.events(&group).await? {
                if json {
                    let line = serde_json::to_string(&entry)
                        .map_err(|err| AppError::Io(format!("encoding event: {err}")))?;
                    println!("{line}");
                } else {
                    println!(
                        "{:>6}  {}  {:<16} {}",
                        entry.seq,
                        entry.recorded_at.to_rfc3339(),
                        entry.action.as_str(),
                        entry.command_id.as_deref().unwrap_or("-")
                    );
                }
            }
            Ok(())
        }
        Action::Groups => {
            for name in groups.known_groups().await? {
                println!("{name}");
            }
            Ok(())
        }
    }
}

fn load_group_file(path: &Path) -> Result<Vec<Command>> {
    let raw = std::fs::read_to_string(path)
        .map_err(|err| AppError::Config(format!("cannot read {}: {err}", path.display())))?;
    let file: GroupFile = toml::from_str(&raw)?;
    file.commands
        .into_iter()
        .map(|spec| match spec.id {
            Some(id) => Command::with_id(id, spec.args, spec.env),
            None => Command::new(spec.args, spec.env),
        })
        .collect()
}

/// Wait for `names` until they finish or a shutdown signal arrives, then
/// close them.
async fn supervise(groups: &Groups, names: &[String]) -> Result<()> {
    let outcome = tokio::select! {
        () = shutdown_signal() => {
            info!("shutdown signal received");
            Ok(())
        }
        result = wait_until_done(groups, names) => result,
    };

    for name in names {
        if let Err(err) = groups.close(name).await {
            warn!(group = name, %err, "failed to close group");
        }
    }
    outcome
}

async fn wait_until_done(groups: &Groups, names: &[String]) -> Result<()> {
    for name in names {
        loop {
            match groups.wait(name).await {
                Err(AppError::WaitTimeout(_)) => {}
                other => {
                    other?;
                    info!(group = name, "group finished");
                    break;
                }
            }
        }
    }
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = tokio::signal::ctrl_c();

    match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
        Ok(mut sigterm) => {
            tokio::select! {
                _ = ctrl_c => {}
                _ = sigterm.recv() => {}
            }
        }
        Err(err) => {
            warn!(%err, "failed to register SIGTERM handler, using ctrl-c only");
            let _ = ctrl_c.await;
        }
    }
}

fn init_tracing(log_format: LogFormat) -> Result<()> {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let subscriber = fmt()
        .with_env_filter(env_filter)
        .with_writer(std::io::stderr);

    match log_format {
        LogFormat::Text => subscriber
            .try_init()
            .map_err(|err| AppError::Config(format!("failed to init tracing: {err}")))?,
        LogFormat::Json => subscriber
            .json()
            .try_init()
            .map_err(|err| AppError::Config(format!("failed to init tracing: {err}")))?,
    }

    Ok(())
}
