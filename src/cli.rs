//! CLI interface for session-reflect

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use serde::Serialize;
use std::io::Read;
use std::path::PathBuf;
use tracing::debug;

use crate::config::{self, Config};
use crate::hooks::{self, HookEvent};
use crate::learning::signal::{SignalDraft, SignalStatus, SignalType, SignalUpdate};
use crate::learning::store::{SignalQuery, StatsFormat, StatsReport, DEFAULT_RETENTION_DAYS};
use crate::learning::writer::SignalWriter;
use crate::learning::SignalExtractor;
use crate::transcript::read_transcript;

#[derive(Parser)]
#[command(name = "session-reflect")]
#[command(about = "Capture learning signals from coding-assistant sessions", long_about = None)]
#[command(version)]
struct Cli {
    /// Signal store directory (default: ~/.claude/reflections)
    #[arg(long, global = true, env = "REFLECTIONS_DIR")]
    base_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a lifecycle hook with the host's JSON payload on stdin
    Hook {
        /// Hook to run (default: hook_event_name from the payload)
        #[arg(long, value_enum)]
        event: Option<HookEventArg>,
    },
    /// Extract signals from a transcript file
    Extract {
        /// Path to the transcript JSONL
        transcript: PathBuf,
        /// Session id recorded on the signals
        #[arg(short, long, default_value = "manual")]
        session: String,
        /// Print the candidates without storing them
        #[arg(long)]
        dry_run: bool,
    },
    /// Append a signal read as JSON from stdin
    Append,
    /// Show a signal by id
    Get {
        id: String,
    },
    /// List signals matching all given filters
    Query {
        #[arg(long)]
        status: Option<SignalStatus>,
        #[arg(long = "type")]
        signal_type: Option<SignalType>,
        #[arg(long)]
        session: Option<String>,
        /// Match signals carrying any of these tags
        #[arg(long = "tag")]
        tags: Vec<String>,
        /// Only signals at or after this ISO-8601 timestamp
        #[arg(long)]
        since: Option<String>,
    },
    /// Update mutable fields of a signal from a JSON object
    Update {
        id: String,
        /// e.g. '{"status": "analyzed", "category": "tooling"}'
        fields: String,
    },
    /// Remove old signals (promoted and confirmed are always kept)
    Archive {
        #[arg(long, default_value_t = DEFAULT_RETENTION_DAYS)]
        days: u32,
        /// Only archive signals in this status
        #[arg(long)]
        status: Option<SignalStatus>,
    },
    /// Show signal counts
    Stats {
        #[arg(long, value_enum, default_value_t = StatsFormatArg::Full)]
        format: StatsFormatArg,
    },
    /// Promote a signal into the learnings index
    Promote {
        id: String,
        /// Where the learning was written, e.g. ~/.claude/CLAUDE.md
        target: String,
        /// The learning as it should read in the index
        content: String,
    },
    /// Manage the configuration file
    Config {
        #[command(subcommand)]
        command: ConfigCommands,
    },
}

#[derive(Subcommand)]
enum ConfigCommands {
    /// Print the effective configuration
    Show,
    /// Write a default configuration file if none exists
    Init,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum HookEventArg {
    #[value(name = "PreCompact", alias = "pre-compact")]
    PreCompact,
    #[value(name = "SessionEnd", alias = "session-end")]
    SessionEnd,
}

impl From<HookEventArg> for HookEvent {
    fn from(arg: HookEventArg) -> Self {
        match arg {
            HookEventArg::PreCompact => HookEvent::PreCompact,
            HookEventArg::SessionEnd => HookEvent::SessionEnd,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum StatsFormatArg {
    Full,
    Statusline,
}

impl From<StatsFormatArg> for StatsFormat {
    fn from(arg: StatsFormatArg) -> Self {
        match arg {
            StatsFormatArg::Full => StatsFormat::Full,
            StatsFormatArg::Statusline => StatsFormat::StatusLine,
        }
    }
}

/// Run the CLI
pub async fn run() -> Result<()> {
    let cli = Cli::parse();
    // Hooks must not fail the host session over a broken config file
    let config = match cli.command {
        Commands::Hook { .. } => Config::load_or_default(),
        _ => Config::load()?,
    };
    let base_dir = cli.base_dir.as_deref();

    match cli.command {
        Commands::Hook { event } => {
            // An unreadable stdin is the same as an empty payload
            let raw = read_stdin().unwrap_or_default();
            let stored =
                hooks::run_hook_payload(&raw, event.map(HookEvent::from), &config, base_dir).await?;
            debug!("Hook stored {} signals", stored);
        }
        Commands::Extract { transcript, session, dry_run } => {
            let entries = read_transcript(&transcript, config.capture.max_transcript_entries);
            let drafts = SignalExtractor::new().extract(&entries, &session);
            if dry_run {
                print_json(&drafts)?;
            } else {
                let store = config.open_store(base_dir)?;
                let (writer, _handle) = SignalWriter::spawn(store);
                let mut stored = Vec::with_capacity(drafts.len());
                for draft in drafts {
                    stored.push(writer.append(draft).await?);
                }
                print_json(&stored)?;
            }
        }
        Commands::Append => {
            let raw = read_stdin()?;
            let draft: SignalDraft = serde_json::from_str(&raw).context("Invalid signal JSON on stdin")?;
            let store = config.open_store(base_dir)?;
            let (writer, _handle) = SignalWriter::spawn(store);
            print_json(&writer.append(draft).await?)?;
        }
        Commands::Get { id } => {
            let store = config.open_store(base_dir)?;
            print_json(&store.get(&id)?)?;
        }
        Commands::Query { status, signal_type, session, tags, since } => {
            let store = config.open_store(base_dir)?;
            let query = SignalQuery {
                status,
                signal_type,
                session_id: session,
                tags,
                since,
            };
            print_json(&store.query(&query)?)?;
        }
        Commands::Update { id, fields } => {
            let update: SignalUpdate = serde_json::from_str(&fields)
                .context("Update fields must be a JSON object of mutable signal fields")?;
            let store = config.open_store(base_dir)?;
            let (writer, _handle) = SignalWriter::spawn(store);
            print_json(&writer.update(&id, update).await?)?;
        }
        Commands::Archive { days, status } => {
            let store = config.open_store(base_dir)?;
            let (writer, _handle) = SignalWriter::spawn(store);
            let removed = writer.archive(days, status).await?;
            print_json(&serde_json::json!({ "archived": removed }))?;
        }
        Commands::Stats { format } => {
            let store = config.open_store(base_dir)?;
            match store.stats(format.into())? {
                StatsReport::StatusLine(line) => println!("{}", line),
                report @ StatsReport::Full(_) => print_json(&report)?,
            }
        }
        Commands::Promote { id, target, content } => {
            let store = config.open_store(base_dir)?;
            let (writer, _handle) = SignalWriter::spawn(store);
            print_json(&writer.promote(&id, &target, &content).await?)?;
        }
        Commands::Config { command } => match command {
            ConfigCommands::Show => {
                println!("# {}", config::config_path()?.display());
                println!("# store directory: {}", config.resolve_base_dir(base_dir)?.display());
                print!("{}", toml::to_string_pretty(&config).context("Failed to serialize config")?);
            }
            ConfigCommands::Init => {
                let path = config::config_path()?;
                if path.exists() {
                    println!("Config already exists at {}", path.display());
                } else {
                    Config::default().save_to(&path)?;
                    println!("Wrote default config to {}", path.display());
                }
            }
        },
    }

    Ok(())
}

fn read_stdin() -> Result<String> {
    let mut raw = String::new();
    std::io::stdin()
        .read_to_string(&mut raw)
        .context("Failed to read stdin")?;
    Ok(raw)
}

fn print_json<T: Serialize + ?Sized>(value: &T) -> Result<()> {
    let text = serde_json::to_string_pretty(value).context("Failed to serialize output")?;
    println!("{}", text);
    Ok(())
}
