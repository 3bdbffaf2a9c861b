use anyhow::Result;
use clap::{Parser, Subcommand};

pub mod chat;
pub mod serve;

use crate::ai::chat::models::{DEFAULT_MAX_OUTPUT_TOKENS, DEFAULT_TEMPERATURE};
use crate::core::AppConfig;
use crate::gemini::Model;

#[derive(Subcommand)]
enum Command {
    /// Run the API server and web UI
    Serve {
        /// Set the server host address
        #[arg(long, default_value = "127.0.0.1")]
        host: String,

        /// Set the server port
        #[arg(long, default_value = "2222")]
        port: String,
    },
    /// Start a chat session in the terminal
    Chat {
        /// Gemini model to use. Defaults to QABOT_DEFAULT_MODEL or
        /// gemini-2.5-flash
        #[arg(long, value_enum)]
        model: Option<Model>,

        /// Max output tokens (64 to 2048)
        #[arg(long, default_value_t = DEFAULT_MAX_OUTPUT_TOKENS)]
        max_tokens: u32,

        /// Sampling temperature (0.0 to 1.0)
        #[arg(long, default_value_t = DEFAULT_TEMPERATURE)]
        temperature: f64,
    },
}

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    #[command(subcommand)]
    command: Option<Command>,
}

pub async fn run() -> Result<()> {
    let args = Cli::parse();

    // Handle each sub command
    match args.command {
        Some(Command::Serve { host, port }) => {
            let config = AppConfig::from_env()?;
            serve::run(host, port, config).await?;
        }
        Some(Command::Chat {
            model,
            max_tokens,
            temperature,
        }) => {
            let config = AppConfig::from_env()?;
            let model = model.unwrap_or(config.default_model);
            chat::run(config, model, max_tokens, temperature).await?;
        }
        None => {}
    }

    Ok(())
}
