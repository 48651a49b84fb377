use std::path::PathBuf;

use clap::{Args, Parser, Subcommand, ValueHint, builder::BoolishValueParser};

use crate::cache::PurgeInterval;

/// Command-line arguments for the Quire binary.
#[derive(Debug, Parser)]
#[command(name = "quire", version, about = "Quire page cache maintenance")]
pub struct CliArgs {
    /// Optional path to a configuration file.
    #[arg(
        long = "config-file",
        env = "QUIRE_CONFIG_FILE",
        value_name = "PATH",
        value_hint = ValueHint::FilePath,
        global = true
    )]
    pub config_file: Option<PathBuf>,

    #[command(flatten)]
    pub overrides: SettingsOverrides,

    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Debug, Subcommand, Clone)]
pub enum Command {
    /// Run the scheduled full purge until interrupted.
    Schedule,
    /// Delete cached pages.
    Purge(PurgeArgs),
    /// Print the URL of every cached page.
    List,
    /// Inspect or edit the persisted cache options.
    Config(ConfigArgs),
}

#[derive(Debug, Args, Clone)]
pub struct PurgeArgs {
    #[command(subcommand)]
    pub target: PurgeTarget,
}

#[derive(Debug, Subcommand, Clone)]
pub enum PurgeTarget {
    /// Delete every cached page.
    All,
    /// Delete the page for one URL and optionally its descendants.
    Url(PurgeUrlArgs),
}

#[derive(Debug, Args, Clone)]
pub struct PurgeUrlArgs {
    /// Full URL of the page, e.g. `https://example.com/blog/`.
    #[arg(value_name = "URL")]
    pub url: String,

    /// Directory levels below the page to purge as well.
    #[arg(long, default_value_t = 0, value_name = "LEVELS")]
    pub depth: usize,
}

#[derive(Debug, Args, Clone)]
pub struct ConfigArgs {
    #[command(subcommand)]
    pub command: ConfigCommand,
}

#[derive(Debug, Subcommand, Clone)]
pub enum ConfigCommand {
    /// Print the current options.
    Show,
    /// Change options; unspecified fields keep their value.
    Set(ConfigSetArgs),
    /// Overwrite the options file with defaults.
    Reset,
    /// Remove the options file.
    Remove,
}

#[derive(Debug, Args, Clone, Default)]
pub struct ConfigSetArgs {
    /// hourly, twicedaily, daily, weekly or monthly.
    #[arg(long = "purge-interval", value_name = "INTERVAL")]
    pub purge_interval: Option<PurgeInterval>,

    /// Replace the exception list; repeat for several URLs.
    #[arg(long = "exception-url", value_name = "URL", conflicts_with = "clear_exceptions")]
    pub exception_urls: Vec<String>,

    /// Empty the exception list.
    #[arg(long = "clear-exceptions", action = clap::ArgAction::SetTrue)]
    pub clear_exceptions: bool,
}

#[derive(Debug, Args, Default, Clone)]
pub struct SettingsOverrides {
    /// Override the base log level (trace|debug|info|warn|error).
    #[arg(long = "log-level", value_name = "LEVEL", global = true)]
    pub log_level: Option<String>,

    /// Toggle JSON logging.
    #[arg(
        long = "log-json",
        value_name = "BOOL",
        value_parser = BoolishValueParser::new(),
        global = true
    )]
    pub log_json: Option<bool>,

    /// Override the cache root directory.
    #[arg(
        long = "cache-root",
        value_name = "PATH",
        value_hint = ValueHint::DirPath,
        global = true
    )]
    pub cache_root: Option<PathBuf>,

    /// Override whether listed URLs use https.
    #[arg(
        long = "cache-default-https",
        value_name = "BOOL",
        value_parser = BoolishValueParser::new(),
        global = true
    )]
    pub default_https: Option<bool>,
}
