//! Config subcommand handlers.

use serde::Serialize;

use crate::cli::{ConfigArgs, ConfigCommand, GlobalOpts};
use crate::config::{self, Config};
use crate::error::CliError;
use crate::output;

/// Profile view with secrets reduced to "set / not set".
#[derive(Serialize)]
struct ProfileView<'a> {
    name: &'a str,
    access_point: &'a str,
    auth_token: &'static str,
    pin: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    lookup_url: Option<&'a str>,
    timeout: u64,
    resync_on_reconnect: bool,
}

fn redacted(value: Option<&String>) -> &'static str {
    if value.is_some_and(|v| !v.is_empty()) {
        "<set>"
    } else {
        "<not set>"
    }
}

pub fn handle(args: &ConfigArgs, global: &GlobalOpts, cfg: &Config) -> Result<(), CliError> {
    match args.command {
        ConfigCommand::Path => {
            output::print_output(&config::config_path().display().to_string(), global.quiet);
            Ok(())
        }

        ConfigCommand::Profiles => {
            let default = cfg.default_profile.as_deref().unwrap_or("default");
            let names: Vec<&String> = cfg.profiles.keys().collect();
            let rendered = output::render_list(
                &global.output,
                &names,
                |name| {
                    let marker = if name.as_str() == default { "*" } else { " " };
                    format!("{marker} {name}")
                },
                |name| (*name).clone(),
            )?;
            output::print_output(&rendered, global.quiet);
            Ok(())
        }

        ConfigCommand::Show => {
            let name = config::active_profile_name(global, cfg);
            let profile = cfg.profiles.get(&name).ok_or_else(|| CliError::ProfileNotFound {
                name: name.clone(),
                available: config::available_profiles(cfg),
            })?;

            let token = profile
                .auth_token
                .clone()
                .or_else(|| profile.auth_token_env.as_ref().and_then(|v| std::env::var(v).ok()));
            let view = ProfileView {
                name: &name,
                access_point: &profile.access_point,
                auth_token: redacted(token.as_ref()),
                pin: redacted(profile.pin.as_ref()),
                lookup_url: profile.lookup_url.as_deref(),
                timeout: profile.timeout.unwrap_or(cfg.defaults.timeout),
                resync_on_reconnect: profile
                    .resync_on_reconnect
                    .unwrap_or(cfg.defaults.resync_on_reconnect),
            };
            let rendered = output::render_single(&global.output, &view, |v| {
                format!(
                    "profile:       {}\naccess point:  {}\nauth token:    {}\npin:           {}\ntimeout:       {}s\nresync:        {}",
                    v.name, v.access_point, v.auth_token, v.pin, v.timeout, v.resync_on_reconnect
                )
            })?;
            output::print_output(&rendered, global.quiet);
            Ok(())
        }
    }
}
