//! Configuration types for the chat client.
//!
//! This module provides CLI argument parsing via `arrrg` and resolves it,
//! together with an optional YAML file, into a [`ChatConfig`].

use arrrg_derive::CommandLine;
use utf8path::Path;

use crate::config::ClientConfig;
use crate::error::Result;

/// Command-line arguments for the yatri-chat tool.
#[derive(CommandLine, Debug, Default, PartialEq, Eq)]
pub struct ChatArgs {
    /// Backend root URL.
    #[arrrg(optional, "Backend URL (default: $YATRI_API_URL or http://localhost:5000)", "URL")]
    pub api_url: Option<String>,

    /// YAML client configuration.
    #[arrrg(optional, "YAML client configuration file", "FILE")]
    pub config: Option<String>,

    /// Where to persist the session between runs.
    #[arrrg(optional, "Persist the session to FILE", "FILE")]
    pub session_file: Option<String>,

    /// Disable ANSI colors and styles.
    #[arrrg(flag, "Disable ANSI colors/styles")]
    pub no_color: bool,
}

/// Resolved configuration for the chat client.
#[derive(Debug, Clone)]
pub struct ChatConfig {
    /// Settings for the sync engine.
    pub client: ClientConfig,

    /// Whether to use ANSI colors and styles in output.
    pub use_color: bool,
}

impl ChatConfig {
    /// Creates a configuration with default client settings and color on.
    pub fn new() -> Self {
        Self {
            client: ClientConfig::new(),
            use_color: true,
        }
    }

    /// Resolves command-line arguments.
    ///
    /// Values given on the command line take precedence over the file named by
    /// `--config`.
    pub fn from_args(args: ChatArgs) -> Result<Self> {
        let mut client = match &args.config {
            Some(path) => ClientConfig::from_file(&Path::from(path.as_str()))?,
            None => ClientConfig::new(),
        };
        if let Some(api_url) = args.api_url {
            client = client.with_api_url(api_url);
        }
        if args.session_file.is_some() {
            client = client.with_session_file(args.session_file);
        }
        client.validate()?;
        Ok(Self {
            client,
            use_color: !args.no_color,
        })
    }

    /// Disables ANSI color output.
    pub fn without_color(mut self) -> Self {
        self.use_color = false;
        self
    }
}

impl Default for ChatConfig {
    fn default() -> Self {
        Self::new()
    }
}
