//! CLI configuration: thin wrapper around `hmip_config` shared types.
//!
//! Adds resolution that respects `GlobalOpts` flag overrides
//! (--access-point, --auth-token, --timeout).

use std::time::Duration;

use secrecy::SecretString;

use hmip_core::ConnectorConfig;

use crate::cli::GlobalOpts;
use crate::error::CliError;

pub use hmip_config::{Config, Profile, config_path, load_config};

/// A connector config plus the profile it came from.
pub struct Resolved {
    pub profile: String,
    pub connector: ConnectorConfig,
}

/// Resolve the active profile name from CLI flags and config.
pub fn active_profile_name(global: &GlobalOpts, config: &Config) -> String {
    global
        .profile
        .clone()
        .or_else(|| config.default_profile.clone())
        .unwrap_or_else(|| "default".into())
}

/// Translate config file + global flags into a `ConnectorConfig`.
///
/// CLI flag overrides take priority over profile values. Without a matching
/// profile, `--access-point` alone is enough.
pub fn resolve(global: &GlobalOpts, config: &Config) -> Result<Resolved, CliError> {
    let profile_name = active_profile_name(global, config);

    let mut profile = match (config.profiles.get(&profile_name), &global.access_point) {
        (Some(profile), _) => profile.clone(),
        (None, Some(_)) => Profile::default(),
        (None, None) => {
            return Err(CliError::ProfileNotFound {
                name: profile_name,
                available: available_profiles(config),
            });
        }
    };

    if let Some(access_point) = &global.access_point {
        profile.access_point.clone_from(access_point);
    }

    let mut connector = hmip_config::profile_to_connector_config(&profile, &config.defaults)?;
    if let Some(token) = global.auth_token.as_ref().filter(|t| !t.is_empty()) {
        connector.auth_token = Some(SecretString::from(token.clone()));
    }
    if let Some(seconds) = global.timeout {
        connector.timeout = Duration::from_secs(seconds);
    }

    Ok(Resolved {
        profile: profile_name,
        connector,
    })
}

/// Like [`resolve`], but the auth token must be present.
pub fn resolve_paired(global: &GlobalOpts, config: &Config) -> Result<Resolved, CliError> {
    let resolved = resolve(global, config)?;
    if resolved.connector.auth_token.is_none() {
        return Err(CliError::NotPaired {
            profile: resolved.profile,
        });
    }
    Ok(resolved)
}

pub fn available_profiles(config: &Config) -> String {
    if config.profiles.is_empty() {
        return "(none)".into();
    }
    config.profiles.keys().cloned().collect::<Vec<_>>().join(", ")
}
