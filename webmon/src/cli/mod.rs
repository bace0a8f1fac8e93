//! CLIモジュール
//!
//! `webmon produce` / `webmon consume` の2つの動作モードを提供する。

/// consume サブコマンド
pub mod consume;
/// produce サブコマンド
pub mod produce;

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use webmon_common::config::{DEFAULT_ENVIRONMENT, ENVIRONMENT_VAR};

/// webmon - Website health monitoring pipeline
#[derive(Parser, Debug)]
#[command(name = "webmon")]
#[command(version, about, long_about = None)]
#[command(after_help = r#"ENVIRONMENT VARIABLES:
    WEBMON_CONFIG           Settings file (default: settings.yaml)
    WEBMON_ENV              Settings environment section (default: development)
    WEBMON_TARGETS          Target URLs, comma separated
    WEBMON_BODY_PATTERN     Regex evaluated against response bodies
    WEBMON_TOPIC            Topic for health events (default: health)
    WEBMON_BROKER__URL      Broker URL (default: nats://localhost:4222)
    WEBMON_STORE__DATABASE_URL  Database URL (postgres:// or sqlite:)
    WEBMON_INTERVAL_SECS    Repeat produce every N seconds (default: 0 = once)
    WEBMON_LOG_LEVEL        Log level (default: info)
    WEBMON_LOG_DIR          Also write daily rotated log files here

Any settings key can be overridden as WEBMON_<SECTION>__<KEY>.
Passwords are read from .secrets.yaml next to the settings file.
Both files may group keys under default/<environment>/global sections.
"#)]
pub struct Cli {
    /// Settings file
    #[arg(short, long, global = true, env = "WEBMON_CONFIG")]
    pub config: Option<PathBuf>,

    /// Settings environment (selects the matching section of the settings files)
    #[arg(
        short,
        long,
        global = true,
        env = ENVIRONMENT_VAR,
        default_value = DEFAULT_ENVIRONMENT
    )]
    pub env: String,

    /// Enable debug logging
    #[arg(long, global = true, default_value_t = false)]
    pub debug: bool,

    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Commands,
}

/// Available subcommands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Check every target once and publish the results
    Produce(produce::ProduceArgs),
    /// Persist published results until terminated
    Consume(consume::ConsumeArgs),
}
