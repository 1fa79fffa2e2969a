//! Command dispatch: bridges CLI args -> connector -> output formatting.

pub mod config_cmd;
pub mod pair;
pub mod state;
pub mod watch;

use crate::cli::{Command, GlobalOpts};
use crate::config::Config;
use crate::error::CliError;

/// Dispatch a command that needs the access point.
pub async fn dispatch(cmd: Command, global: &GlobalOpts, config: &Config) -> Result<(), CliError> {
    match cmd {
        Command::Pair(args) => pair::handle(args, global, config).await,
        Command::Watch(args) => watch::handle(args, global, config).await,
        Command::State(args) => state::handle(args, global, config).await,
        Command::Config(args) => config_cmd::handle(&args, global, config),
    }
}
