//! Command-line and environment configuration.
//!
//! Every global flag can also be set from the environment:
//!
//! - `TELEGRAM_BOT_TOKEN` - Bot API token
//! - `TELEGRAM_CHAT_ID` - Target chat id or `@channel` username
//! - `GOOGLE_SHEET_ID` - Sheet to poll via its CSV export URL
//! - `SHEET_RELAY_SOURCE_URL` - Any CSV URL, instead of a sheet id
//! - `SHEET_RELAY_STATE_DIR` - Delivery store directory (default: `state`)
//! - `SHEET_RELAY_COLUMNS` - Comma-separated expected columns
//! - `SHEET_RELAY_IDENTITY` - Comma-separated identity column(s)
//! - `SHEET_RELAY_IDENTITY_MODE` - `field`, `first-non-empty` or `composite`

use std::fmt;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use clap::{Parser, Subcommand, ValueEnum};
use thiserror::Error;

use crate::channel::{DeliveryPolicy, MAX_CHUNK_CHARS, telegram};
use crate::resolve::IdentityRule;
use crate::scheduler::DEFAULT_POLL_INTERVAL_SECS;
use crate::source::google_sheets_export_url;

/// Columns of the lead-form sheet the relay was first built for.
pub const DEFAULT_COLUMNS: [&str; 6] = [
    "ismingiz?",
    "telefon_raqamingiz?",
    "номер_телефона",
    "xodimlar_soni?",
    "adset_name",
    "ad_name",
];

pub const DEFAULT_IDENTITY_COLUMN: &str = "telefon_raqamingiz?";

/// Invalid combination of settings.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("either --sheet-id or --source-url is required")]
    MissingSource,

    #[error("identity mode `field` takes exactly one column, got {0}")]
    FieldModeArity(usize),

    #[error("identity rule needs at least one column")]
    NoIdentityColumns,

    #[error("poll interval must be at least one second")]
    ZeroInterval,
}

/// Sheet-relay: delivers new spreadsheet rows to a Telegram chat.
#[derive(Debug, Parser)]
#[command(name = "sheet-relay")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Telegram bot token.
    #[arg(long, env = "TELEGRAM_BOT_TOKEN", hide_env_values = true)]
    pub bot_token: String,

    /// Target chat id or `@channel` username.
    #[arg(long, env = "TELEGRAM_CHAT_ID")]
    pub chat_id: String,

    /// Google Sheets document id, polled through its CSV export URL.
    #[arg(long, env = "GOOGLE_SHEET_ID")]
    pub sheet_id: Option<String>,

    /// CSV URL to poll. Takes precedence over `--sheet-id`.
    #[arg(long, env = "SHEET_RELAY_SOURCE_URL")]
    pub source_url: Option<String>,

    /// Directory holding the delivery store.
    #[arg(long, env = "SHEET_RELAY_STATE_DIR", default_value = "state")]
    pub state_dir: PathBuf,

    /// Keep delivery state in memory only. Restarts will redeliver rows.
    #[arg(long, env = "SHEET_RELAY_EPHEMERAL")]
    pub ephemeral: bool,

    /// Expected columns, in message order.
    #[arg(
        long,
        env = "SHEET_RELAY_COLUMNS",
        value_delimiter = ',',
        default_values = DEFAULT_COLUMNS
    )]
    pub columns: Vec<String>,

    /// Column(s) the record identity is derived from.
    #[arg(
        long,
        env = "SHEET_RELAY_IDENTITY",
        value_delimiter = ',',
        default_value = DEFAULT_IDENTITY_COLUMN
    )]
    pub identity: Vec<String>,

    /// How identity columns combine.
    #[arg(long, env = "SHEET_RELAY_IDENTITY_MODE", value_enum, default_value_t)]
    pub identity_mode: IdentityMode,

    /// Telegram Bot API base URL.
    #[arg(long, env = "TELEGRAM_API_BASE", default_value = telegram::DEFAULT_API_BASE)]
    pub api_base: String,

    /// Per-request timeout for source fetches and sends, in seconds.
    #[arg(long, default_value_t = 30)]
    pub request_timeout: u64,

    /// Minimum milliseconds between two records' sends.
    #[arg(long, default_value_t = 1000)]
    pub record_spacing_ms: u64,

    /// Transient retries per message chunk.
    #[arg(long, default_value_t = 3)]
    pub max_transient_retries: u32,

    /// Subcommand to execute.
    #[command(subcommand)]
    pub command: Commands,
}

/// CLI subcommands.
#[derive(Debug, Clone, PartialEq, Eq, Subcommand)]
pub enum Commands {
    /// Run a single cycle and exit.
    RunOnce,

    /// Poll continuously until interrupted.
    Watch {
        /// Seconds between polls.
        #[arg(default_value_t = DEFAULT_POLL_INTERVAL_SECS)]
        interval: u64,

        /// Serve `/health` and `/status` on this address.
        #[arg(long, env = "SHEET_RELAY_STATUS_ADDR")]
        status_addr: Option<SocketAddr>,
    },
}

/// How the identity columns are combined.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, ValueEnum)]
pub enum IdentityMode {
    /// A single column.
    #[default]
    Field,
    /// The first non-empty column, in order.
    FirstNonEmpty,
    /// All columns together.
    Composite,
}

/// Where delivery state lives.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreLocation {
    Directory(PathBuf),
    Memory,
}

/// Fully resolved relay settings.
#[derive(Clone)]
pub struct RelayConfig {
    pub source_url: String,
    pub bot_token: String,
    pub chat_id: String,
    pub api_base: String,
    pub store: StoreLocation,
    pub columns: Vec<String>,
    pub identity: IdentityRule,
    pub request_timeout: Duration,
    pub policy: DeliveryPolicy,
    pub max_chunk_chars: usize,
}

impl fmt::Debug for RelayConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RelayConfig")
            .field("source_url", &self.source_url)
            .field("chat_id", &self.chat_id)
            .field("api_base", &self.api_base)
            .field("store", &self.store)
            .field("columns", &self.columns)
            .field("identity", &self.identity)
            .field("request_timeout", &self.request_timeout)
            .field("policy", &self.policy)
            .finish_non_exhaustive()
    }
}

impl Cli {
    /// Get the effective configuration.
    pub fn config(&self) -> Result<RelayConfig, ConfigError> {
        let source_url = match (&self.source_url, &self.sheet_id) {
            (Some(url), _) => url.clone(),
            (None, Some(sheet_id)) => google_sheets_export_url(sheet_id),
            (None, None) => return Err(ConfigError::MissingSource),
        };

        let store = if self.ephemeral {
            StoreLocation::Memory
        } else {
            StoreLocation::Directory(self.state_dir.clone())
        };

        Ok(RelayConfig {
            source_url,
            bot_token: self.bot_token.clone(),
            chat_id: self.chat_id.clone(),
            api_base: self.api_base.clone(),
            store,
            columns: non_empty(&self.columns),
            identity: self.identity_rule()?,
            request_timeout: Duration::from_secs(self.request_timeout),
            policy: DeliveryPolicy {
                record_spacing: Duration::from_millis(self.record_spacing_ms),
                max_transient_retries: self.max_transient_retries,
                ..DeliveryPolicy::DEFAULT
            },
            max_chunk_chars: MAX_CHUNK_CHARS,
        })
    }

    fn identity_rule(&self) -> Result<IdentityRule, ConfigError> {
        let mut columns = non_empty(&self.identity);
        match self.identity_mode {
            _ if columns.is_empty() => Err(ConfigError::NoIdentityColumns),
            IdentityMode::Field if columns.len() != 1 => {
                Err(ConfigError::FieldModeArity(columns.len()))
            }
            IdentityMode::Field => Ok(IdentityRule::Field(columns.remove(0))),
            IdentityMode::FirstNonEmpty => Ok(IdentityRule::FirstNonEmpty(columns)),
            IdentityMode::Composite => Ok(IdentityRule::Composite(columns)),
        }
    }
}

impl Commands {
    /// Poll interval for `watch`.
    pub fn interval(&self) -> Result<Option<Duration>, ConfigError> {
        match self {
            Commands::RunOnce => Ok(None),
            Commands::Watch { interval: 0, .. } => Err(ConfigError::ZeroInterval),
            Commands::Watch { interval, .. } => Ok(Some(Duration::from_secs(*interval))),
        }
    }
}

fn non_empty(values: &[String]) -> Vec<String> {
    values
        .iter()
        .map(|v| v.trim())
        .filter(|v| !v.is_empty())
        .map(str::to_string)
        .collect()
}
