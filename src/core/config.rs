use std::env;

use anyhow::{Context, Result, bail};

use crate::gemini::Model;

pub const DEFAULT_GEMINI_HOST: &str = "https://generativelanguage.googleapis.com";

#[derive(Clone, Debug)]
pub struct AppConfig {
    pub gemini_api_hostname: String,
    pub gemini_api_key: String,
    pub default_model: Model,
    // Only the most recent N turns are replayed to the model when set
    pub history_window: Option<usize>,
}

impl AppConfig {
    /// Load the config from the process environment, reading a `.env`
    /// file first if there is one. A missing API key is fatal.
    pub fn from_env() -> Result<Self> {
        if let Err(e) = dotenvy::dotenv()
            && !e.not_found()
        {
            return Err(e).context("Failed to load .env file");
        }
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Build the config from any key/value source. Split out from
    /// `from_env` so it can be tested without mutating the process
    /// environment.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let gemini_api_key = match lookup("GEMINI_API_KEY") {
            Some(key) if !key.trim().is_empty() => key,
            _ => bail!("GEMINI_API_KEY environment variable not set. Please set it to run qabot."),
        };
        let gemini_api_hostname =
            lookup("QABOT_GEMINI_HOST").unwrap_or_else(|| DEFAULT_GEMINI_HOST.to_string());
        let default_model = match lookup("QABOT_DEFAULT_MODEL") {
            Some(name) => name
                .parse::<Model>()
                .context("Invalid QABOT_DEFAULT_MODEL")?,
            None => Model::default(),
        };
        let history_window = match lookup("QABOT_HISTORY_WINDOW") {
            Some(n) => Some(
                n.parse::<usize>()
                    .with_context(|| format!("Invalid QABOT_HISTORY_WINDOW: {}", n))?,
            ),
            None => None,
        };

        Ok(Self {
            gemini_api_hostname,
            gemini_api_key,
            default_model,
            history_window,
        })
    }
}
