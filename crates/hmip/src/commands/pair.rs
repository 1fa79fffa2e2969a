//! `hmip pair`: run the pairing handshake and persist the token.

use std::sync::Arc;

use secrecy::ExposeSecret;
use serde::Serialize;

use hmip_api::{PairingFlow, PairingState};

use crate::cli::{GlobalOpts, PairArgs};
use crate::config::{self, Config};
use crate::error::CliError;
use crate::output;

#[derive(Serialize)]
struct PairingSummary<'a> {
    profile: &'a str,
    access_point: &'a str,
    client_id: &'a str,
    device_id: &'a str,
    saved: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    auth_token: Option<&'a str>,
}

pub async fn handle(args: PairArgs, global: &GlobalOpts, config: &Config) -> Result<(), CliError> {
    let config::Resolved {
        profile,
        mut connector,
    } = config::resolve(global, config)?;

    if let Some(name) = args.device_name {
        connector.pairing.device_name = name;
    }
    if args.max_polls.is_some() {
        connector.pairing.max_polls = args.max_polls;
    }

    let client = Arc::new(connector.build_client()?);
    let flow = PairingFlow::new(client, connector.pairing.clone());

    let mut states = flow.subscribe();
    let quiet = global.quiet;
    let prompt = tokio::spawn(async move {
        while states.changed().await.is_ok() {
            let state = *states.borrow_and_update();
            tracing::info!(%state, "pairing state");
            if state == PairingState::WaitingForAck && !quiet {
                eprintln!("Press the blue button on the access point to confirm pairing...");
            }
            if state.is_terminal() {
                break;
            }
        }
    });

    let result = flow.run().await;
    prompt.abort();
    let outcome = result?;

    let saved = if args.no_save {
        false
    } else {
        let path = config::config_path();
        hmip_config::save_auth_token(
            &path,
            &profile,
            &outcome.access_point,
            &outcome.auth_token,
        )?;
        tracing::info!(path = %path.display(), profile = %profile, "auth token saved");
        true
    };

    let summary = PairingSummary {
        profile: &profile,
        access_point: &outcome.access_point,
        client_id: &outcome.client_id,
        device_id: &outcome.device_id,
        saved,
        auth_token: (!saved).then(|| outcome.auth_token.expose_secret()),
    };
    let rendered = output::render_single(&global.output, &summary, |s| {
        let mut text = format!(
            "Paired with {} (client {})",
            s.access_point, s.client_id
        );
        match s.auth_token {
            Some(token) => text.push_str(&format!("\nauth token: {token}")),
            None => text.push_str(&format!("\ntoken saved to profile '{}'", s.profile)),
        }
        text
    })?;
    output::print_output(&rendered, global.quiet);
    Ok(())
}
