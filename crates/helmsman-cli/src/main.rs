//! Helmsman CLI
//!
//! A thin front end over the helmsman library: loads configuration, builds
//! one context and runs a single operation on behalf of a caller.
//!
//! Usage:
//!   helmsman run "summarize README.md"      Ask the interactive session
//!   helmsman exec --continue "and now?"     One-shot prompt
//!   helmsman capture --lines 30             Show the session screen
//!   helmsman pull ~/notes.txt               Check a file out of the host

use std::path::PathBuf;

use anyhow::Context as _;
use clap::{Parser, Subcommand};
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

use helmsman::{Config, Helmsman, Outcome, SessionSelector};

/// Drive a long-running interactive assistant behind a sandbox policy
#[derive(Parser, Debug)]
#[command(name = "helmsman")]
#[command(about = "Policy-gated remote control of an interactive assistant session")]
struct Args {
    /// Path to a TOML config file
    #[arg(long, env = "HELMSMAN_CONFIG", global = true)]
    config: Option<PathBuf>,

    /// Caller id checked against the allow-list and written to the audit log
    #[arg(long, env = "HELMSMAN_CALLER", default_value = "local", global = true)]
    caller: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Send a command to the interactive session and print the reply
    Run {
        /// Command text; multiple words are joined with spaces
        #[arg(required = true, num_args = 1..)]
        text: Vec<String>,
    },
    /// Run a single non-interactive prompt
    Exec {
        /// Use this assistant session id instead of the pinned one
        #[arg(long, conflicts_with = "continue_last")]
        session: Option<String>,
        /// Continue the assistant's most recent conversation
        #[arg(long = "continue")]
        continue_last: bool,
        /// Prompt text; multiple words are joined with spaces
        #[arg(required = true, num_args = 1..)]
        text: Vec<String>,
    },
    /// Print the last lines of the session screen
    Capture {
        /// Number of lines
        #[arg(long)]
        lines: Option<usize>,
    },
    /// Start the interactive session if it is not running
    Start,
    /// Kill the interactive session
    Stop,
    /// Pin an assistant session id for one-shot prompts
    Pin {
        /// Session id
        session_id: String,
    },
    /// List the assistant's recently active sessions
    Sessions {
        /// Maximum number of sessions (1-20)
        #[arg(long, default_value_t = 10)]
        limit: usize,
        /// Only sessions updated within this many minutes
        #[arg(long, default_value_t = 60)]
        active_minutes: u64,
    },
    /// Check that a host file may be sent and print its canonical path
    Pull {
        /// File path, absolute, `~`-relative or relative to the workspace
        path: String,
    },
    /// Copy a local file into the workspace
    Push {
        /// Local file to upload
        source: PathBuf,
        /// Name to store it under, defaults to the source file name
        #[arg(long)]
        name: Option<String>,
    },
    /// Print the effective configuration as TOML
    Config,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Logs go to stderr so stdout only carries replies
    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(EnvFilter::from_default_env().add_directive(tracing::Level::INFO.into()))
        .init();

    let args = Args::parse();
    let config = Config::load(args.config.as_deref()).context("failed to load configuration")?;

    if let Command::Config = args.command {
        print!("{}", toml::to_string_pretty(&config)?);
        return Ok(());
    }

    let helmsman = Helmsman::from_config(config).context("failed to prepare directories")?;
    let caller = args.caller.as_str();

    let outcome = match args.command {
        Command::Run { text } => helmsman.coordinator().run(caller, &text.join(" ")).await,
        Command::Exec {
            session,
            continue_last,
            text,
        } => {
            let selector = match (session, continue_last) {
                (Some(id), _) => SessionSelector::Explicit(id),
                (None, true) => SessionSelector::Continue,
                (None, false) => SessionSelector::Auto,
            };
            helmsman
                .oneshot()
                .run(caller, &text.join(" "), selector)
                .await
        }
        Command::Capture { lines } => helmsman.coordinator().capture(caller, lines).await,
        Command::Start => helmsman.coordinator().start(caller).await,
        Command::Stop => helmsman.coordinator().stop(caller).await,
        Command::Pin { session_id } => helmsman.pin_session(caller, &session_id).await,
        Command::Sessions {
            limit,
            active_minutes,
        } => helmsman.list_sessions(caller, limit, active_minutes).await,
        Command::Pull { path } => helmsman.transfer().pull(caller, &path).await,
        Command::Push { source, name } => {
            let bytes = tokio::fs::read(&source)
                .await
                .with_context(|| format!("failed to read {}", source.display()))?;
            let name = match name {
                Some(name) => name,
                None => source
                    .file_name()
                    .map(|n| n.to_string_lossy().into_owned())
                    .context("source has no file name; pass --name")?,
            };
            helmsman.transfer().push(caller, &name, &bytes).await
        }
        Command::Config => return Ok(()),
    };

    match outcome {
        Outcome::Success { message, stale } => {
            if stale {
                eprintln!("helmsman: no new reply detected; output may be stale");
            }
            println!("{message}");
            Ok(())
        }
        Outcome::Failure(failure) => {
            eprintln!("helmsman: {failure}");
            std::process::exit(1);
        }
    }
}
