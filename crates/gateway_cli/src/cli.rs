use std::path::PathBuf;

use clap::{ArgAction, Parser, Subcommand};
use gateway_client::ClientConfig;

use crate::exit::CliError;

/// Talk to an agent gateway: one authenticated command per invocation.
#[derive(Debug, Parser)]
#[command(name = "gatewayctl")]
#[command(version)]
#[command(about = "One-shot commands against an agent gateway", long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Config file [default: ~/.gatewayctl/gatewayctl.toml]
    #[arg(short, long, global = true, env = "GATEWAYCTL_CONFIG")]
    pub config: Option<PathBuf>,

    /// Gateway host
    #[arg(long, global = true)]
    pub host: Option<String>,

    /// Gateway port
    #[arg(long, global = true)]
    pub port: Option<u16>,

    /// Force wss://
    #[arg(long, global = true, conflicts_with = "no_tls")]
    pub tls: bool,

    /// Force ws://
    #[arg(long, global = true)]
    pub no_tls: bool,

    /// Shared gateway token, used when no device token is cached
    #[arg(long, global = true, env = "GATEWAYCTL_TOKEN", hide_env_values = true)]
    pub token: Option<String>,

    /// Directory holding the device identity and token cache
    #[arg(long, global = true)]
    pub state_dir: Option<PathBuf>,

    /// Per-call timeout in milliseconds
    #[arg(long, global = true)]
    pub timeout_ms: Option<u64>,

    /// More log output (-v info, -vv debug, -vvv trace)
    #[arg(short, long, global = true, action = ArgAction::Count)]
    pub verbose: u8,

    /// Log as JSON lines on stderr
    #[arg(long, global = true)]
    pub json_logs: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Clone, Subcommand)]
pub enum Command {
    /// Show gateway status
    Status,

    /// List chat sessions
    Sessions {
        /// Maximum number of sessions
        #[arg(long)]
        limit: Option<u64>,
    },

    /// Show the message history of a session
    History {
        /// Session key
        #[arg(short, long, default_value = "main")]
        session: String,

        /// Maximum number of messages
        #[arg(long)]
        limit: Option<u64>,
    },

    /// Send a chat message to the agent
    Send {
        /// Message text
        #[arg(required = true, trailing_var_arg = true)]
        message: Vec<String>,

        /// Session key
        #[arg(short, long, default_value = "main")]
        session: String,

        /// Idempotency key [default: random UUID]
        #[arg(long)]
        idempotency_key: Option<String>,

        /// Wait until the triggered run ends
        #[arg(short, long)]
        wait: bool,

        /// How long to wait for the run, in milliseconds
        #[arg(long, requires = "wait")]
        wait_timeout_ms: Option<u64>,
    },

    /// Call any gateway method with JSON params
    Call {
        /// Method name, e.g. `cron.list`
        method: String,

        /// Params as a JSON object
        #[arg(short, long, default_value = "{}")]
        params: String,
    },
}

impl Cli {
    /// Config file values with command-line overrides applied.
    pub fn resolve_config(&self) -> Result<ClientConfig, CliError> {
        let mut config =
            ClientConfig::load_or_default(self.config.as_deref()).map_err(CliError::Config)?;

        if let Some(host) = &self.host {
            config.gateway.host = host.clone();
        }
        if let Some(port) = self.port {
            config.gateway.port = port;
        }
        if self.tls {
            config.gateway.tls = Some(true);
        } else if self.no_tls {
            config.gateway.tls = Some(false);
        }
        if let Some(dir) = &self.state_dir {
            config.state.dir = Some(dir.clone());
        }
        if let Some(timeout_ms) = self.timeout_ms {
            config.timeouts.call_ms = timeout_ms;
        }
        match self.verbose {
            0 => {}
            1 => config.logging.level = "info".into(),
            2 => config.logging.level = "debug".into(),
            _ => config.logging.level = "trace".into(),
        }
        if self.json_logs {
            config.logging.json = true;
        }

        config.validate().map_err(CliError::Config)?;
        Ok(config)
    }

    /// `--token` (or `GATEWAYCTL_TOKEN`, which clap folds into it), then the
    /// config file.
    pub fn gateway_token(&self, config: &ClientConfig) -> Option<String> {
        resolve_token(self.token.as_deref(), config.gateway.token.as_deref())
    }
}

fn resolve_token(flag: Option<&str>, config: Option<&str>) -> Option<String> {
    [flag, config]
        .into_iter()
        .flatten()
        .map(str::trim)
        .find(|token| !token.is_empty())
        .map(String::from)
}
