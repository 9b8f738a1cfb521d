//! Command-line interface

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;

use crate::config::Config;

#[derive(Parser)]
#[command(name = "babelroom", version, about = "Real-time multilingual meeting hub")]
struct Cli {
    /// Path to a TOML configuration file
    #[arg(long, global = true, env = "BABELROOM_CONFIG")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the meeting server
    Serve {
        /// Override the bind address, e.g. 0.0.0.0:8080
        #[arg(long)]
        bind: Option<String>,
    },
    /// Re-index a stored transcript snapshot
    Index {
        /// Meeting id
        #[arg(long)]
        meeting: String,
        /// Snapshot language
        #[arg(long)]
        lang: String,
    },
}

pub async fn run() -> Result<()> {
    let cli = Cli::parse();
    let mut config = Config::load(cli.config.as_deref())?;

    match cli.command {
        Command::Serve { bind } => {
            if let Some(bind) = bind {
                config.server.bind = bind;
            }
            crate::server::start(config).await
        }
        Command::Index { meeting, lang } => {
            let state = crate::server::build_state(config).await?;
            let written = crate::rag::index_snapshot(
                &state.store,
                state.services.embedder.as_ref(),
                &meeting,
                &lang,
                state.config.rag.max_chunk_chars,
            )
            .await?;
            println!("indexed {} chunks for {} / {}", written, meeting, lang);
            Ok(())
        }
    }
}
