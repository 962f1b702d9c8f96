mod logging;
mod replay;

use std::path::PathBuf;

use agentwire_core::config::Config;
use agentwire_core::event::EventKind;
use clap::{Parser, Subcommand};

use crate::replay::{RecordingFormat, ReplayOptions};

#[derive(Parser)]
#[command(
    name = "agentwire",
    about = "Event assembly and conversation state tracking for LLM agents",
    version
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Config file path
    #[arg(short, long, global = true)]
    config: Option<String>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Replay a recorded raw event stream through an agent and print the bus traffic
    Replay {
        /// Recording file (JSON lines or SSE)
        file: PathBuf,

        /// Recording format (inferred from the extension when omitted)
        #[arg(long, value_enum)]
        format: Option<RecordingFormat>,

        /// User message that starts the replayed request
        #[arg(long, default_value = "replay")]
        prompt: String,

        /// Only print these event types (comma-separated)
        #[arg(long, value_delimiter = ',')]
        only: Vec<EventKind>,

        /// Print events as JSON lines
        #[arg(long)]
        json: bool,
    },

    /// Configuration management
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand)]
enum ConfigAction {
    /// Show current configuration
    Show,
    /// Check the configuration for problems
    Validate,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let config_path = cli.config.map(PathBuf::from).unwrap_or_else(Config::config_path);
    let config = Config::load(&config_path)?;

    logging::init(&config.logging(), cli.verbose)?;
    tracing::debug!(path = %config_path.display(), "Config loaded");

    match cli.command {
        Commands::Replay {
            file,
            format,
            prompt,
            only,
            json,
        } => {
            let options = ReplayOptions {
                format,
                prompt,
                only,
                json,
            };
            replay::run(&file, options, config).await?;
        }
        Commands::Config { action } => match action {
            ConfigAction::Show => {
                let json = serde_json::to_string_pretty(&config)?;
                println!("{json}");
            }
            ConfigAction::Validate => {
                let (warnings, errors) = config.validate();
                for warning in &warnings {
                    println!("warning: {warning}");
                }
                for error in &errors {
                    println!("error: {error}");
                }
                if !errors.is_empty() {
                    anyhow::bail!("{} config error(s) in {}", errors.len(), config_path.display());
                }
                println!("Config OK: {}", config_path.display());
            }
        },
    }

    Ok(())
}
