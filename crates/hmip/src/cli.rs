//! Clap derive structures for the `hmip` CLI.
//!
//! Defines the command tree, global flags, and shared types.

use clap::{Args, Parser, Subcommand, ValueEnum};

// ── Top-Level CLI ────────────────────────────────────────────────────

/// hmip -- pair with and watch a HomematicIP access point
#[derive(Debug, Parser)]
#[command(
    name = "hmip",
    version,
    about = "Pair with and watch a HomematicIP access point",
    long_about = "Operator tool for the HomematicIP cloud connector.\n\n\
        Pairs a client with an access point, prints its full state, and\n\
        follows the push event stream with every handler callback logged.",
    propagate_version = true,
    subcommand_required = true,
    arg_required_else_help = true
)]
pub struct Cli {
    #[command(flatten)]
    pub global: GlobalOpts,

    #[command(subcommand)]
    pub command: Command,
}

// ── Global Options ───────────────────────────────────────────────────

#[derive(Debug, Args)]
pub struct GlobalOpts {
    /// Access point profile to use
    #[arg(long, short = 'p', env = "HMIP_PROFILE", global = true)]
    pub profile: Option<String>,

    /// Access point id / SGTIN (overrides profile)
    #[arg(long, short = 'a', env = "HMIP_ACCESS_POINT", global = true)]
    pub access_point: Option<String>,

    /// Auth token (overrides profile)
    #[arg(long, env = "HMIP_AUTH_TOKEN", global = true, hide_env_values = true)]
    pub auth_token: Option<String>,

    /// Output format
    #[arg(
        long,
        short = 'o',
        env = "HMIP_OUTPUT",
        default_value = "text",
        global = true
    )]
    pub output: OutputFormat,

    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(long, short = 'v', action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Suppress non-error output
    #[arg(long, short = 'q', global = true)]
    pub quiet: bool,

    /// Request timeout in seconds (overrides profile)
    #[arg(long, env = "HMIP_TIMEOUT", global = true)]
    pub timeout: Option<u64>,
}

// ── Output Enum ──────────────────────────────────────────────────────

#[derive(Debug, Clone, ValueEnum)]
pub enum OutputFormat {
    /// Human-readable summary (default)
    Text,
    /// Pretty-printed JSON
    Json,
    /// Compact single-line JSON
    JsonCompact,
    /// Plain text, one value per line (scripting)
    Plain,
}

// ── Top-Level Command Enum ───────────────────────────────────────────

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Pair this client with an access point and store the auth token
    Pair(PairArgs),

    /// Bootstrap, then follow the event stream until interrupted
    #[command(alias = "w")]
    Watch(WatchArgs),

    /// Fetch the full state once and print a summary
    #[command(alias = "s")]
    State(StateArgs),

    /// Inspect the configuration
    Config(ConfigArgs),
}

// ── Pair ─────────────────────────────────────────────────────────────

#[derive(Debug, Args)]
pub struct PairArgs {
    /// Name shown for this client in the HomematicIP app
    #[arg(long)]
    pub device_name: Option<String>,

    /// Give up after this many acknowledgement polls (default: poll forever)
    #[arg(long)]
    pub max_polls: Option<u32>,

    /// Print the token instead of writing it to the config file
    #[arg(long)]
    pub no_save: bool,
}

// ── Watch ────────────────────────────────────────────────────────────

#[derive(Debug, Args)]
pub struct WatchArgs {
    /// Additional device type tags to bind (repeatable)
    #[arg(long = "type", short = 't', value_name = "TYPE")]
    pub types: Vec<String>,

    /// Re-fetch full state after each reconnect
    #[arg(long)]
    pub resync: bool,
}

// ── State ────────────────────────────────────────────────────────────

#[derive(Debug, Args)]
pub struct StateArgs {
    /// Include groups in the output
    #[arg(long, short = 'g')]
    pub groups: bool,
}

// ── Config ───────────────────────────────────────────────────────────

#[derive(Debug, Args)]
pub struct ConfigArgs {
    #[command(subcommand)]
    pub command: ConfigCommand,
}

#[derive(Debug, Subcommand)]
pub enum ConfigCommand {
    /// Print the config file location
    Path,

    /// Display the resolved configuration (secrets redacted)
    Show,

    /// List configured profiles
    Profiles,
}
