mod common;

use std::{collections::BTreeMap, time::Duration};

use common::{FakeReader, TestGateway};
use reader_gateway::{
    config::GatewayConfig,
    crypto::kdf::{derive_current_key, key_to_hex},
    domain::{
        models::{NewCard, NfcCard, ReaderId, UserId},
        ports::CardDirectory,
    },
    gateway::GatewayError,
    protocol::{ChangeKeys, EventType, ShowText},
};
use serde_json::json;

const STORED_KEY: &str = "3f4e8a1c0b9d2e7f6a5b4c3d2e1f0a9b";

async fn enroll_card(gateway: &TestGateway, uid: &str, user_id: UserId) -> NfcCard {
    CardDirectory::create(
        &gateway.store,
        NewCard {
            uid: uid.to_string(),
            user_id,
            keys: BTreeMap::from([(0, STORED_KEY.to_string())]),
        },
    )
    .await
    .unwrap()
}

/// Connects a reader that ends up in the no-resources state.
async fn idle_reader(gateway: &TestGateway) -> (FakeReader, ReaderId) {
    let mut reader = gateway.connect();
    let credentials = reader.register_and_authenticate().await;
    let text: ShowText = reader
        .expect(EventType::ShowText)
        .await
        .data
        .payload_as()
        .unwrap();
    assert_eq!(text, ShowText::new("No resources", "attached"));
    (reader, credentials.id)
}

#[tokio::test]
async fn test_bad_token_is_unauthorized() {
    let gateway = TestGateway::new();
    let mut reader = gateway.connect();
    let credentials = reader.register().await;

    reader.event(
        "AUTHENTICATE",
        json!({ "id": credentials.id, "token": "not-the-token" }),
    );
    let message = reader.expect(EventType::Unauthorized).await;
    assert_eq!(message.data.payload, json!({}));

    let status = gateway.manager.status(reader.id).unwrap();
    assert_eq!(status.reader_id, None);
    assert_eq!(status.state, "Initial");
}

#[tokio::test]
async fn test_malformed_frames_are_dropped() {
    let gateway = TestGateway::new();
    let mut reader = gateway.connect();

    reader.send_raw("not json");
    reader.send_raw(r#"{"event":"EVENT","data":{"type":"SELF_DESTRUCT"}}"#);
    reader.expect_silence().await;

    let credentials = reader.register_and_authenticate().await;
    gateway.wait_for_state(&reader, "NoResourcesAttached").await;
    assert_eq!(
        gateway.manager.status(reader.id).unwrap().reader_id,
        Some(credentials.id)
    );
}

#[tokio::test]
async fn test_tap_toggles_resource_usage() {
    let gateway = TestGateway::new();
    let mut reader = gateway.connect();
    let credentials = reader.register().await;

    let resource = gateway.store.add_resource("laser cutter");
    gateway
        .store
        .set_reader_resources(credentials.id, vec![resource.id])
        .unwrap();
    let user = gateway.store.add_user("ada");
    let card = enroll_card(&gateway, "04A1B2C3", user.id).await;

    reader.authenticate(&credentials).await;
    let prompt = reader.expect(EventType::EnableCardChecking).await;
    assert_eq!(prompt.data.payload["message"], "Tap to start");

    reader.event("NFC_TAP", json!({ "cardUID": "04A1B2C3" }));
    reader.expect(EventType::DisableCardChecking).await;
    reader.expect(EventType::ShowText).await;
    let challenge = reader.expect(EventType::Authenticate).await;
    assert_eq!(
        challenge.data.payload,
        json!({ "authenticationKey": STORED_KEY, "keyNumber": 0 })
    );

    reader.response("AUTHENTICATE", json!({ "authenticationSuccessful": true }));
    let result = reader.expect(EventType::DisplaySuccess).await;
    assert_eq!(result.data.payload["message"], "Resource started");
    let prompt = reader.skip_to(EventType::EnableCardChecking).await;
    assert_eq!(prompt.data.payload["message"], "Tap to stop");

    let sessions = gateway.store.sessions(resource.id);
    assert_eq!(sessions.len(), 1);
    assert!(sessions[0].is_active());
    assert_eq!(sessions[0].user_id, user.id);
    assert_eq!(
        sessions[0].start_notes.as_deref(),
        Some(
            format!(
                "-- by FabReader (ID: {}) with NFC Card (ID: {}) --",
                credentials.id, card.id
            )
            .as_str()
        )
    );

    reader.event("NFC_TAP", json!({ "cardUID": "04A1B2C3" }));
    reader.skip_to(EventType::Authenticate).await;
    reader.response("AUTHENTICATE", json!({ "authenticationSuccessful": true }));
    let result = reader.expect(EventType::DisplaySuccess).await;
    assert_eq!(result.data.payload["message"], "Resource stopped");

    let sessions = gateway.store.sessions(resource.id);
    assert_eq!(sessions.len(), 1);
    assert!(sessions.iter().all(|s| !s.is_active()));
}

#[tokio::test]
async fn test_unknown_card_shows_error_and_restarts() {
    let gateway = TestGateway::new();
    let mut reader = gateway.connect();
    let credentials = reader.register().await;
    let resource = gateway.store.add_resource("lathe");
    gateway
        .store
        .set_reader_resources(credentials.id, vec![resource.id])
        .unwrap();
    reader.authenticate(&credentials).await;
    reader.expect(EventType::EnableCardChecking).await;

    reader.event("NFC_TAP", json!({ "cardUID": "DEADBEEF" }));
    let error = reader.skip_to(EventType::DisplayError).await;
    assert_eq!(error.data.payload["message"], "Invalid card");

    reader.expect(EventType::DisableCardChecking).await;
    reader.expect(EventType::HideText).await;
    let prompt = reader.expect(EventType::EnableCardChecking).await;
    assert_eq!(prompt.data.payload["message"], "Tap to start");
    assert!(gateway.store.sessions(resource.id).is_empty());
}

#[tokio::test]
async fn test_enrollment_provisions_card() {
    let gateway = TestGateway::new();
    let (mut reader, reader_id) = idle_reader(&gateway).await;
    let user = gateway.store.add_user("grace");

    gateway
        .manager
        .start_enrollment(reader_id, user.id)
        .await
        .unwrap();
    reader.expect(EventType::HideText).await;
    let prompt = reader.expect(EventType::EnableCardChecking).await;
    assert_eq!(prompt.data.payload["message"], "Tap your NFC card to enroll");

    reader.event("NFC_TAP", json!({ "cardUID": "ABC123" }));
    reader.expect(EventType::DisableCardChecking).await;
    let change: ChangeKeys = reader
        .expect(EventType::ChangeKeys)
        .await
        .data
        .payload_as()
        .unwrap();
    let new_key = key_to_hex(&derive_current_key(0, "ABC123"));
    assert_eq!(change.authentication_key, "0".repeat(32));
    assert_eq!(change.keys, BTreeMap::from([(0, new_key.clone())]));

    reader.response(
        "CHANGE_KEYS",
        json!({ "successfulKeys": [0], "failedKeys": [] }),
    );
    let challenge = reader.expect(EventType::Authenticate).await;
    assert_eq!(
        challenge.data.payload,
        json!({ "authenticationKey": new_key, "keyNumber": 0 })
    );

    reader.response("AUTHENTICATE", json!({ "authenticationSuccessful": true }));
    let result = reader.expect(EventType::DisplaySuccess).await;
    assert_eq!(
        result.data.payload,
        json!({ "message": "Enrollment successful", "duration": 10000 })
    );
    reader.expect(EventType::ShowText).await;
    gateway.wait_for_state(&reader, "NoResourcesAttached").await;

    let card = gateway.store.find_by_uid("ABC123").await.unwrap().unwrap();
    assert_eq!(card.user_id, user.id);
    assert_eq!(card.master_key(), Some(new_key.as_str()));
}

#[tokio::test]
async fn test_failed_key_change_aborts_enrollment() {
    let gateway = TestGateway::new();
    let (mut reader, reader_id) = idle_reader(&gateway).await;
    let user = gateway.store.add_user("grace");

    gateway
        .manager
        .start_enrollment(reader_id, user.id)
        .await
        .unwrap();
    reader.event("NFC_TAP", json!({ "cardUID": "ABC123" }));
    reader.skip_to(EventType::ChangeKeys).await;

    reader.response(
        "CHANGE_KEYS",
        json!({ "successfulKeys": [], "failedKeys": [0] }),
    );
    let error = reader.expect(EventType::DisplayError).await;
    assert_eq!(error.data.payload["message"], "Enrollment failed");

    gateway.wait_for_state(&reader, "NoResourcesAttached").await;
    assert!(gateway.store.cards().is_empty());
}

#[tokio::test]
async fn test_reset_erases_matching_card_only() {
    let gateway = TestGateway::new();
    let (mut reader, reader_id) = idle_reader(&gateway).await;
    let user = gateway.store.add_user("grace");
    let card = enroll_card(&gateway, "XYZ", user.id).await;

    gateway
        .manager
        .start_reset(reader_id, user.id, card.id)
        .await
        .unwrap();
    reader.expect(EventType::HideText).await;
    let prompt = reader.expect(EventType::EnableCardChecking).await;
    assert_eq!(prompt.data.payload["message"], "Tap your NFC card to reset it");

    reader.event("NFC_TAP", json!({ "cardUID": "SOMETHING-ELSE" }));
    reader.expect_silence().await;

    reader.event("NFC_TAP", json!({ "cardUID": "XYZ" }));
    reader.expect(EventType::DisableCardChecking).await;
    let change = reader.expect(EventType::ChangeKeys).await;
    assert_eq!(
        change.data.payload,
        json!({ "authenticationKey": STORED_KEY, "keys": { "0": "0".repeat(32) } })
    );

    reader.response("CHANGE_KEYS", json!({ "successfulKeys": [0] }));
    let result = reader.expect(EventType::DisplaySuccess).await;
    assert_eq!(result.data.payload["message"], "Card erased");
    gateway.wait_for_state(&reader, "NoResourcesAttached").await;

    assert!(
        CardDirectory::find_by_id(&gateway.store, card.id)
            .await
            .unwrap()
            .is_none()
    );
}

#[tokio::test]
async fn test_forced_operations_report_lookup_errors() {
    let gateway = TestGateway::new();
    let manager = &gateway.manager;

    assert!(matches!(
        manager.start_enrollment(404, 1).await,
        Err(GatewayError::ReaderNotFound(404))
    ));
    assert!(matches!(
        manager.restart_reader(404).await,
        Err(GatewayError::ReaderNotFound(404))
    ));

    let (mut reader, reader_id) = idle_reader(&gateway).await;
    assert!(matches!(
        manager.start_enrollment(reader_id, 404).await,
        Err(GatewayError::UserNotFound(404))
    ));

    let user = gateway.store.add_user("grace");
    assert!(matches!(
        manager.start_reset(reader_id, user.id, 404).await,
        Err(GatewayError::CardNotFound(404))
    ));

    reader.close();
    reader.wait_closed().await;
    assert!(matches!(
        manager.start_enrollment(reader_id, user.id).await,
        Err(GatewayError::ReaderNotConnected(id)) if id == reader_id
    ));
    assert!(matches!(
        manager.restart_reader(reader_id).await,
        Err(GatewayError::ReaderNotConnected(_))
    ));
}

#[tokio::test]
async fn test_restart_requests_reauthentication() {
    let gateway = TestGateway::new();
    let (mut reader, reader_id) = idle_reader(&gateway).await;

    gateway.manager.restart_reader(reader_id).await.unwrap();
    reader.expect(EventType::HideText).await;
    let message = reader.expect(EventType::Reauthenticate).await;
    assert_eq!(message.data.payload, json!({}));

    let status = gateway.manager.status(reader.id).unwrap();
    assert_eq!(status.reader_id, None);
    assert_eq!(status.state, "Initial");

    let user = gateway.store.add_user("grace");
    assert!(matches!(
        gateway.manager.start_enrollment(reader_id, user.id).await,
        Err(GatewayError::ReaderNotConnected(_))
    ));

    let credentials = reader_gateway::protocol::ReaderCredentials {
        id: reader_id,
        token: String::new(),
    };
    reader.event("AUTHENTICATE", serde_json::to_value(&credentials).unwrap());
    reader.expect(EventType::Unauthorized).await;
}

#[tokio::test]
async fn test_selection_timeout_returns_to_selection() {
    let gateway = TestGateway::with_config(GatewayConfig {
        selection_timeout_secs: 1,
        ..Default::default()
    });
    let mut reader = gateway.connect();
    let credentials = reader.register().await;
    let first = gateway.store.add_resource("lathe");
    let second = gateway.store.add_resource("mill");
    gateway
        .store
        .set_reader_resources(credentials.id, vec![first.id, second.id])
        .unwrap();

    reader.authenticate(&credentials).await;
    let text: ShowText = reader
        .expect(EventType::ShowText)
        .await
        .data
        .payload_as()
        .unwrap();
    assert_eq!(text, ShowText::new("Select a resource", ">  <"));

    for digit in second.id.to_string().chars() {
        reader.event("KEY_PRESSED", json!({ "key": digit.to_string() }));
        reader.expect(EventType::ShowText).await;
    }
    reader.event("KEY_PRESSED", json!({ "key": "#" }));
    reader.expect(EventType::HideText).await;
    reader.expect(EventType::EnableCardChecking).await;
    gateway.wait_for_state(&reader, "WaitForNFCTap").await;

    reader.expect(EventType::DisableCardChecking).await;
    reader.expect(EventType::DisableCardChecking).await;
    reader.expect(EventType::HideText).await;
    let text: ShowText = reader
        .expect(EventType::ShowText)
        .await
        .data
        .payload_as()
        .unwrap();
    assert_eq!(text, ShowText::new("Select a resource", ">  <"));
    gateway
        .wait_for_state(&reader, "WaitForResourceSelection")
        .await;
}

#[tokio::test]
async fn test_heartbeats_keep_connection_open() {
    let gateway = TestGateway::with_config(GatewayConfig {
        heartbeat_timeout_secs: 1,
        ..Default::default()
    });
    let mut reader = gateway.connect();

    for _ in 0..6 {
        reader.heartbeat();
        tokio::time::sleep(Duration::from_millis(300)).await;
    }
    reader.expect_silence().await;
    assert_eq!(gateway.manager.status(reader.id).unwrap().state, "Initial");

    reader.wait_closed().await;
    assert!(gateway.manager.status(reader.id).is_none());
}

#[tokio::test]
async fn test_heartbeats_leave_bound_reader_untouched() {
    let gateway = TestGateway::with_config(GatewayConfig {
        heartbeat_timeout_secs: 1,
        ..Default::default()
    });
    let (mut reader, reader_id) = idle_reader(&gateway).await;
    gateway.wait_for_state(&reader, "NoResourcesAttached").await;

    for _ in 0..6 {
        reader.heartbeat();
        tokio::time::sleep(Duration::from_millis(300)).await;
        let status = gateway.manager.status(reader.id).unwrap();
        assert_eq!(status.reader_id, Some(reader_id));
        assert_eq!(status.state, "NoResourcesAttached");
    }
    reader.expect_silence().await;
}

#[tokio::test]
async fn test_malformed_frames_do_not_count_as_activity() {
    let gateway = TestGateway::with_config(GatewayConfig {
        heartbeat_timeout_secs: 1,
        ..Default::default()
    });
    let mut reader = gateway.connect();

    for _ in 0..3 {
        reader.send_raw("{}");
        tokio::time::sleep(Duration::from_millis(400)).await;
    }
    assert!(gateway.manager.status(reader.id).is_none());

    reader.wait_closed().await;
    assert_eq!(gateway.manager.connection_count(), 0);
}
