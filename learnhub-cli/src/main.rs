//! Main entry point for the LearnHub CLI.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use dotenv::dotenv;
use shared::config::Config;

mod commands;
mod logging;

/// LearnHub CLI
#[derive(Parser)]
#[command(name = "learnhub")]
#[command(about = "Command-line client for LearnHub live conversations, Q&A and notifications", long_about = None)]
struct Cli {
    /// Path to the configuration file (YAML, JSON or TOML)
    #[arg(long, short, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

/// Subcommands for the LearnHub CLI
#[derive(Subcommand)]
enum Commands {
    /// Follow live updates on one or more topics
    Follow(commands::follow::FollowArgs),

    /// Post a message to a conversation and wait for it to be confirmed
    Send(commands::mutate::SendArgs),

    /// Post an answer to a question and wait for it to be confirmed
    Answer(commands::mutate::AnswerArgs),

    /// Vote on a question or answer
    Vote(commands::mutate::VoteArgs),

    /// Add or remove a reaction
    React(commands::mutate::ReactArgs),

    /// Print older items of a topic
    History(commands::history::HistoryArgs),

    /// Generate shell completion scripts for the CLI
    Completion {
        /// The shell type for which to generate the completion script (e.g., bash, zsh, fish, powershell)
        #[arg(long, short)]
        shell: clap_complete::Shell,
    },

    /// Generate a configuration file
    Config {
        /// Format of the configuration file to generate (yaml, json or toml). Defaults to yaml.
        #[arg(long, short)]
        format: Option<String>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenv().ok();
    let cli = Cli::parse();

    let load = |path: Option<PathBuf>| -> Result<Config> {
        let config = Config::load_config(path).context("failed to load configuration")?;
        logging::initialize_tracing(&config);
        Ok(config)
    };

    match cli.command {
        Commands::Follow(args) => commands::follow::handle_follow(load(cli.config)?, args).await?,
        Commands::Send(args) => commands::mutate::handle_send(load(cli.config)?, args).await?,
        Commands::Answer(args) => commands::mutate::handle_answer(load(cli.config)?, args).await?,
        Commands::Vote(args) => commands::mutate::handle_vote(load(cli.config)?, args).await?,
        Commands::React(args) => commands::mutate::handle_react(load(cli.config)?, args).await?,
        Commands::History(args) => {
            commands::history::handle_history(load(cli.config)?, args).await?;
        }
        Commands::Completion { shell } => commands::completion::generate_completion(shell),
        Commands::Config { format } => {
            let format = format.unwrap_or_else(|| "yaml".to_string());
            commands::config::generate_config(&format)?;
        }
    }

    Ok(())
}
