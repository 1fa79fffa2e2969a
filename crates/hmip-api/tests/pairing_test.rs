// End-to-end pairing handshake against a wiremock access point.
#![allow(clippy::unwrap_used)]

use std::sync::Arc;
use std::time::Duration;

use secrecy::ExposeSecret;
use serde_json::json;
use wiremock::matchers::{body_partial_json, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use hmip_api::{
    AccessPointClient, AccessPointIdentity, ClientCharacteristics, Credentials, DispatcherConfig,
    PairingConfig, PairingError, PairingFlow, PairingState, TransportConfig,
};

const SERIAL: &str = "3014F711A000000000000001";
const DEVICE_ID: &str = "8c3f6ad1-2b53-4e2b-9a37-5f0f6c2d9e10";

async fn setup() -> (MockServer, Arc<AccessPointClient>) {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/getHost"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "urlREST": server.uri(),
            "urlWebSocket": "wss://ws.example.invalid",
        })))
        .mount(&server)
        .await;

    let dispatch = DispatcherConfig {
        min_spacing: Duration::ZERO,
        reservoir: 1000,
        reservoir_max: 1000,
        ..DispatcherConfig::default()
    };
    let client = AccessPointClient::new(
        AccessPointIdentity::new(SERIAL, ClientCharacteristics::default()),
        Credentials::default(),
        &TransportConfig::default(),
        dispatch,
    )
    .unwrap()
    .with_lookup_url(format!("{}/getHost", server.uri()).parse().unwrap());
    (server, Arc::new(client))
}

fn flow(client: Arc<AccessPointClient>, max_polls: Option<u32>) -> PairingFlow {
    let config = PairingConfig {
        poll_interval: Duration::from_millis(10),
        max_polls,
        device_name: "test bridge".into(),
    };
    PairingFlow::new(client, config).with_device_id(DEVICE_ID)
}

async fn mount_ok(server: &MockServer, route: &str, body: serde_json::Value) {
    Mock::given(method("POST"))
        .and(path(format!("/hmip/{route}")))
        .respond_with(ResponseTemplate::new(200).set_body_json(body))
        .mount(server)
        .await;
}

#[tokio::test]
async fn test_pairing_completes_after_acknowledgement() {
    let (server, client) = setup().await;

    Mock::given(method("POST"))
        .and(path("/hmip/auth/connectionRequest"))
        .and(body_partial_json(json!({
            "deviceId": DEVICE_ID,
            "deviceName": "test bridge",
            "sgtin": SERIAL
        })))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&server)
        .await;

    // Two "not yet" answers before the button press lands.
    Mock::given(method("POST"))
        .and(path("/hmip/auth/isRequestAcknowledged"))
        .respond_with(ResponseTemplate::new(400))
        .up_to_n_times(2)
        .with_priority(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/hmip/auth/isRequestAcknowledged"))
        .respond_with(ResponseTemplate::new(200))
        .mount(&server)
        .await;

    mount_ok(&server, "auth/requestAuthToken", json!({ "authToken": "TOKEN" })).await;
    Mock::given(method("POST"))
        .and(path("/hmip/auth/confirmAuthToken"))
        .and(body_partial_json(json!({ "deviceId": DEVICE_ID, "authToken": "TOKEN" })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "clientId": "client-1" })))
        .mount(&server)
        .await;

    let flow = flow(Arc::clone(&client), None);
    let states = flow.subscribe();
    let outcome = flow.run().await.unwrap();

    assert_eq!(outcome.access_point, SERIAL);
    assert_eq!(outcome.auth_token.expose_secret(), "TOKEN");
    assert_eq!(outcome.client_id, "client-1");
    assert_eq!(outcome.device_id, DEVICE_ID);
    assert_eq!(*states.borrow(), PairingState::TokenConfirmed);

    // The flow surfaces the token; it does not install it.
    assert!(!client.ready_for_use());

    let acks = server
        .received_requests()
        .await
        .unwrap()
        .iter()
        .filter(|r| r.url.path() == "/hmip/auth/isRequestAcknowledged")
        .count();
    assert_eq!(acks, 3);
}

#[tokio::test]
async fn test_missing_auth_token_fails_flow() {
    let (server, client) = setup().await;
    mount_ok(&server, "auth/connectionRequest", json!({})).await;
    mount_ok(&server, "auth/isRequestAcknowledged", json!({})).await;
    mount_ok(&server, "auth/requestAuthToken", json!({ "somethingElse": 1 })).await;

    let flow = flow(client, None);
    let err = flow.run().await.unwrap_err();
    assert!(
        matches!(
            err,
            PairingError::MissingField {
                step: "auth/requestAuthToken",
                field: "authToken"
            }
        ),
        "got {err:?}"
    );
    assert_eq!(flow.state(), PairingState::Failed);
}

#[tokio::test]
async fn test_missing_client_id_fails_flow() {
    let (server, client) = setup().await;
    mount_ok(&server, "auth/connectionRequest", json!({})).await;
    mount_ok(&server, "auth/isRequestAcknowledged", json!({})).await;
    mount_ok(&server, "auth/requestAuthToken", json!({ "authToken": "TOKEN" })).await;
    Mock::given(method("POST"))
        .and(path("/hmip/auth/confirmAuthToken"))
        .respond_with(ResponseTemplate::new(200))
        .mount(&server)
        .await;

    let err = flow(client, None).run().await.unwrap_err();
    assert!(matches!(err, PairingError::MissingField { field: "clientId", .. }));
}

#[tokio::test]
async fn test_rejected_connection_request() {
    let (server, client) = setup().await;
    Mock::given(method("POST"))
        .and(path("/hmip/auth/connectionRequest"))
        .respond_with(ResponseTemplate::new(403))
        .mount(&server)
        .await;

    let err = flow(client, None).run().await.unwrap_err();
    assert!(matches!(
        err,
        PairingError::Rejected {
            step: "auth/connectionRequest",
            status: 403
        }
    ));
}

#[tokio::test]
async fn test_bounded_polling_times_out() {
    let (server, client) = setup().await;
    mount_ok(&server, "auth/connectionRequest", json!({})).await;
    Mock::given(method("POST"))
        .and(path("/hmip/auth/isRequestAcknowledged"))
        .respond_with(ResponseTemplate::new(400))
        .mount(&server)
        .await;

    let flow = flow(client, Some(3));
    let err = flow.run().await.unwrap_err();
    assert!(matches!(err, PairingError::Timeout { polls: 3 }));
    assert_eq!(flow.state(), PairingState::Failed);
}

#[tokio::test]
async fn test_lookup_failure_aborts_before_handshake() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/getHost"))
        .respond_with(ResponseTemplate::new(500))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/hmip/auth/connectionRequest"))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&server)
        .await;

    let client = AccessPointClient::new(
        AccessPointIdentity::new(SERIAL, ClientCharacteristics::default()),
        Credentials::default(),
        &TransportConfig::default(),
        DispatcherConfig::default(),
    )
    .unwrap()
    .with_lookup_url(format!("{}/getHost", server.uri()).parse().unwrap());

    let err = flow(Arc::new(client), None).run().await.unwrap_err();
    assert!(matches!(err, PairingError::Lookup(_)));
}
