use std::collections::HashSet;
use std::ffi::OsString;

use clap::{parser::ValueSource, ArgMatches, CommandFactory, FromArgMatches, Parser};
use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error(transparent)]
    Args(#[from] clap::Error),
    #[error(transparent)]
    Layers(#[from] figment::Error),
    #[error("failed to capture command-line flags: {0}")]
    Flags(#[from] serde_json::Error),
}

/// Chatroom server
#[derive(Parser, Serialize, Deserialize, Clone, Debug)]
#[command(name = "chatroom-server", version, about = "Real-time chatroom server")]
pub struct Config {
    /// Port to listen on
    #[arg(long, env = "CHATROOM_PORT", default_value = "8000")]
    pub port: u16,

    /// Bind address
    #[arg(long, env = "CHATROOM_BIND_ADDRESS", default_value = "0.0.0.0")]
    pub bind_address: String,

    /// Path to TOML config file
    #[arg(long, default_value = "./chatroom.toml")]
    pub config: String,

    /// Enable structured JSON logging (for Docker/production)
    #[arg(long, env = "CHATROOM_JSON_LOGS")]
    pub json_logs: bool,

    /// Output a commented TOML config template and exit
    #[arg(long)]
    pub generate_config: bool,

    /// Data directory for persistent state (DB, keys)
    #[arg(long, env = "CHATROOM_DATA_DIR", default_value = "./data")]
    pub data_dir: String,

    /// Room id that admits every authenticated user
    #[arg(long, env = "CHATROOM_LOBBY_ROOM_ID", default_value = "lobby")]
    pub lobby_room_id: String,

    /// WebSocket tuning (loaded from [ws] section in TOML)
    #[arg(skip)]
    #[serde(default)]
    pub ws: WsConfig,
}

/// WebSocket liveness and message limits.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WsConfig {
    /// Seconds between server pings (default: 30)
    #[serde(default = "default_ping_interval")]
    pub ping_interval_secs: u64,

    /// Seconds to wait for a pong before closing (default: 10)
    #[serde(default = "default_pong_timeout")]
    pub pong_timeout_secs: u64,

    /// Longest chat message relayed, in characters (default: 4000)
    #[serde(default = "default_max_message_chars")]
    pub max_message_chars: usize,

    /// Outbound frames buffered per socket before the peer counts as dead (default: 256)
    #[serde(default = "default_send_queue_capacity")]
    pub send_queue_capacity: usize,
}

impl Default for WsConfig {
    fn default() -> Self {
        Self {
            ping_interval_secs: default_ping_interval(),
            pong_timeout_secs: default_pong_timeout(),
            max_message_chars: default_max_message_chars(),
            send_queue_capacity: default_send_queue_capacity(),
        }
    }
}

fn default_ping_interval() -> u64 {
    30
}

fn default_pong_timeout() -> u64 {
    10
}

fn default_max_message_chars() -> usize {
    4000
}

fn default_send_queue_capacity() -> usize {
    256
}

impl Default for Config {
    fn default() -> Self {
        Self {
            port: 8000,
            bind_address: "0.0.0.0".to_string(),
            config: "./chatroom.toml".to_string(),
            json_logs: false,
            generate_config: false,
            data_dir: "./data".to_string(),
            lobby_room_id: "lobby".to_string(),
            ws: WsConfig::default(),
        }
    }
}

impl Config {
    /// Load config with layered precedence:
    /// built-in defaults < TOML file < env vars (CHATROOM_*) < CLI args
    pub fn load() -> Result<Self, ConfigError> {
        Self::from_matches(Self::command().get_matches())
    }

    /// Same as [`Config::load`] with an explicit argv (first item is the binary name).
    pub fn load_from<I, T>(args: I) -> Result<Self, ConfigError>
    where
        I: IntoIterator<Item = T>,
        T: Into<OsString> + Clone,
    {
        Self::from_matches(Self::command().try_get_matches_from(args)?)
    }

    fn from_matches(matches: ArgMatches) -> Result<Self, ConfigError> {
        let cli = Self::from_arg_matches(&matches)?;
        let flags = command_line_flags(&cli, &matches)?;

        Ok(Figment::new()
            .merge(Serialized::defaults(Config::default()))
            .merge(Toml::file(&cli.config))
            .merge(Env::prefixed("CHATROOM_").split("__"))
            .merge(Serialized::defaults(flags))
            .extract()?)
    }
}

/// Only flags typed on the command line. clap fills in defaults and env
/// values too, which would otherwise mask the TOML file.
fn command_line_flags(cli: &Config, matches: &ArgMatches) -> Result<Map<String, Value>, ConfigError> {
    let ids: HashSet<String> = Config::command()
        .get_arguments()
        .map(|arg| arg.get_id().to_string())
        .collect();

    let Value::Object(all) = serde_json::to_value(cli)? else {
        return Ok(Map::new());
    };
    Ok(all
        .into_iter()
        .filter(|(key, _)| {
            ids.contains(key) && matches.value_source(key) == Some(ValueSource::CommandLine)
        })
        .collect())
}

/// Generate a commented TOML config template
pub fn generate_config_template() -> String {
    r#"# Chatroom Server Configuration
# Place this file at ./chatroom.toml or specify with --config <path>
# All settings can be overridden via environment variables (CHATROOM_PORT,
# CHATROOM_WS__PING_INTERVAL_SECS, etc.) or CLI flags (--port, etc.)

# Server port (default: 8000)
# port = 8000

# Bind address (default: 0.0.0.0 — all interfaces)
# bind_address = "0.0.0.0"

# Enable structured JSON logging for Docker/production
# json_logs = false

# Data directory for SQLite database and JWT signing key
# data_dir = "./data"

# Room id every authenticated user may join without membership
# lobby_room_id = "lobby"

# ---- WebSocket ----
# [ws]
# ping_interval_secs = 30
# pong_timeout_secs = 10
# max_message_chars = 4000
# send_queue_capacity = 256
"#
    .to_string()
}
