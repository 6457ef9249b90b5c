use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;

mod cli;

#[derive(Parser)]
#[command(name = "takopi")]
#[command(about = "Run coding-agent CLIs (codex, claude, pi) with resumable sessions")]
#[command(version)]
struct Cli {
    /// Path to the config file (defaults to ~/.takopi/takopi.toml)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a prompt and stream its progress (Ctrl-C cancels)
    Run {
        /// Engine to use (defaults to the configured default engine)
        #[arg(short, long)]
        engine: Option<String>,

        /// Resume line of an earlier run, e.g. "codex resume <id>"
        #[arg(short, long)]
        resume: Option<String>,

        /// Thread the run belongs to
        #[arg(short, long, default_value = "cli")]
        thread: String,

        /// The prompt
        #[arg(required = true, num_args = 1..)]
        prompt: Vec<String>,
    },

    /// List registered engines
    Engines,

    /// Check that engines are installed and usable
    Doctor {
        /// Only check this engine
        #[arg(short, long)]
        engine: Option<String>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    let log_level = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(log_level)),
        )
        .init();

    let config = takopi::config::Config::load(cli.config.as_deref())?;

    match cli.command {
        Commands::Run {
            engine,
            resume,
            thread,
            prompt,
        } => {
            let prompt = prompt.join(" ");
            let ok = cli::run::run_command(&config, engine, resume, thread, prompt).await?;
            if !ok {
                std::process::exit(1);
            }
        }
        Commands::Engines => {
            cli::engines::engines_command(&config)?;
        }
        Commands::Doctor { engine } => {
            if !cli::doctor::doctor_command(&config, engine.as_deref())? {
                std::process::exit(1);
            }
        }
    }

    Ok(())
}
