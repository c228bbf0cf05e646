//! Mailytics CLI - per-mailbox full-text indexing

use std::path::PathBuf;

use anyhow::{Result, bail};
use clap::{Parser, Subcommand};
use mailytics::{Mailbox, MailboxFormat};
use tracing::warn;

mod commands;
mod logging;

use commands::{cmd_config, cmd_index, cmd_path, load_config};
use logging::init_logging;

#[derive(Parser)]
#[command(name = "mailytics")]
#[command(about = "Build one full-text index per mailbox")]
#[command(after_help = "\
QUICK START:
  mailytics index --owner bob --name Work --path ~/Mail/work.mbox
  mailytics index --mailbox bob:Home:maildir:~/Maildir --mailbox bob:Archive:mbox:/srv/archive
  mailytics path --owner bob --name 'Work/Inbox'
  mailytics config > ~/.config/mailytics/config.toml")]
struct Cli {
  /// Config file (default: ~/.config/mailytics/config.toml)
  #[arg(long, global = true, value_name = "FILE")]
  config: Option<PathBuf>,

  #[command(subcommand)]
  command: Commands,
}

#[derive(Subcommand)]
enum Commands {
  /// Index one or more mailboxes and wait for them to finish
  Index {
    /// Mailbox owner (with --name and --path)
    #[arg(long)]
    owner: Option<String>,
    /// Mailbox name
    #[arg(long)]
    name: Option<String>,
    /// Mailbox location (mbox file, directory of mbox files, or maildir root)
    #[arg(long)]
    path: Option<PathBuf>,
    /// Storage layout of --path
    #[arg(long, default_value = "mbox")]
    format: MailboxFormat,
    /// Additional mailbox as owner:name:format:path (repeatable)
    #[arg(long = "mailbox", value_name = "SPEC")]
    mailboxes: Vec<String>,
    /// Override the index location from config
    #[arg(long, value_name = "DIR")]
    location: Option<PathBuf>,
    /// Print the shutdown report as JSON
    #[arg(long)]
    json: bool,
  },
  /// Print the index directory for a mailbox
  Path {
    #[arg(long)]
    owner: String,
    #[arg(long)]
    name: String,
  },
  /// Print configuration as TOML
  Config {
    /// Show the effective configuration instead of the defaults
    #[arg(long)]
    effective: bool,
  },
}

#[tokio::main]
async fn main() -> Result<()> {
  let cli = Cli::parse();
  let (config, ignored) = load_config(cli.config.as_deref())?;

  let _guard = init_logging(&config.log);
  if let Some(e) = ignored {
    warn!(error = %e, "Ignoring user config, using defaults");
  }

  match cli.command {
    Commands::Index {
      owner,
      name,
      path,
      format,
      mailboxes,
      location,
      json,
    } => {
      let single = match (owner, name, path) {
        (Some(owner), Some(name), Some(path)) => Some(Mailbox::new(owner, name, format, path)),
        (None, None, None) => None,
        _ => bail!("--owner, --name and --path must be given together"),
      };
      cmd_index(config, single, &mailboxes, location, json).await
    }
    Commands::Path { owner, name } => cmd_path(&config, &owner, &name),
    Commands::Config { effective } => cmd_config(&config, effective),
  }
}
