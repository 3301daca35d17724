mod common;

use std::time::Duration;

use futures_util::future::join_all;
use serde_json::json;

use common::{opened, qr, request, settle_for, Harness, BASE_DELAY};
use lh_sessions::credentials::{self, KeyBlob, KeyWrite};
use lh_sessions::{CredentialUpdate, KeyCategory, SessionEvent, SessionStatus, TransportEvent};

#[tokio::test(start_paused = true)]
async fn concurrent_starts_share_one_transport_open() {
    let h = Harness::new();
    h.connector.set_open_delay(Duration::from_millis(200));
    h.connector.set_default_script(vec![qr("qr-1")]);

    let outcomes = join_all((0..8).map(|_| h.manager.start_connection(request("42")))).await;

    assert_eq!(h.connector.open_count(), 1);
    assert!(outcomes.iter().all(|o| o == &outcomes[0]));
    assert_eq!(outcomes[0].status, SessionStatus::QrPending);
    assert!(!h.manager.is_connecting("42"));
}

#[tokio::test(start_paused = true)]
async fn start_on_connected_session_is_a_noop() {
    let h = Harness::new();
    h.connector.set_default_script(vec![opened()]);

    let first = h.manager.start_connection(request("7")).await;
    assert!(first.success);
    assert_eq!(first.status, SessionStatus::Connected);

    let second = h.manager.start_connection(request("7")).await;
    assert!(second.success);
    assert_eq!(second.status, SessionStatus::Connected);
    assert_eq!(h.connector.open_count(), 1);
    assert!(!h.connector.last_link("7").handle.is_ended());
}

#[tokio::test(start_paused = true)]
async fn pairing_scenario_from_qr_to_terminal_close() {
    let h = Harness::new();
    h.connector.push_script(vec![qr("2@abc,def")]);

    // No prior credentials: a QR is issued.
    let outcome = h.manager.start_connection(request("42")).await;
    assert!(outcome.success);
    assert_eq!(outcome.status, SessionStatus::QrPending);
    assert_eq!(outcome.qr.as_deref(), Some("2@abc,def"));
    assert_eq!(h.store.status("42"), Some(SessionStatus::QrPending));
    assert_eq!(h.store.row("42").unwrap().qr.as_deref(), Some("2@abc,def"));
    assert!(!h.connector.last_link("42").credentials.is_registered());

    // Scan completes.
    let first = h.connector.last_link("42");
    first.emit(opened()).await;
    settle_for(Duration::from_millis(10)).await;
    assert_eq!(h.manager.get("42").unwrap().status, SessionStatus::Connected);
    assert!(h.manager.get("42").unwrap().qr.is_none());
    assert_eq!(h.store.status("42"), Some(SessionStatus::Connected));
    assert!(h.store.row("42").unwrap().qr.is_none());

    // Transient close: exactly one restart, after the base delay.
    h.connector.push_script(vec![opened()]);
    first.close(Some(428), "connection closed").await;
    settle_for(Duration::from_millis(10)).await;
    assert!(h.manager.has_pending_restart("42"));
    assert_eq!(h.manager.retry_count("42"), 1);
    assert!(first.handle.is_ended());

    settle_for(BASE_DELAY).await;
    assert_eq!(h.connector.open_count(), 2);
    let second = h.connector.last_link("42");
    assert!(second.opened_at - first.opened_at >= BASE_DELAY);
    assert_eq!(h.manager.get("42").unwrap().status, SessionStatus::Connected);
    assert_eq!(h.manager.retry_count("42"), 0);

    // Terminal close: no restart, disconnected everywhere.
    second.close(Some(401), "logged out").await;
    settle_for(Duration::from_secs(120)).await;
    assert_eq!(h.connector.open_count(), 2);
    assert!(h.manager.get("42").is_none());
    assert!(!h.manager.has_pending_restart("42"));
    assert_eq!(h.store.status("42"), Some(SessionStatus::Disconnected));
}

#[tokio::test(start_paused = true)]
async fn fresh_pairing_is_persisted_before_start_resolves() {
    let h = Harness::new();
    let update = CredentialUpdate {
        credentials: Some(json!({ "registered": true, "me": { "id": "15550001111:3@s.whatsapp.net" } })),
        keys: vec![KeyWrite {
            category: KeyCategory::PreKey,
            id: "1".into(),
            value: Some(KeyBlob(vec![0xAB, 0xCD])),
        }],
    };
    h.connector.push_script(vec![
        TransportEvent::CredentialsChanged(update),
        TransportEvent::Opened { is_new_login: true },
    ]);

    let outcome = h.manager.start_connection(request("9")).await;
    assert_eq!(outcome.status, SessionStatus::Connected);

    let blob = h.store.row("9").unwrap().credentials.expect("credentials stored");
    let state = credentials::decode(&blob).unwrap();
    assert!(state.is_registered());
    assert_eq!(state.get_key(KeyCategory::PreKey, "1"), Some(&KeyBlob(vec![0xAB, 0xCD])));
}

#[tokio::test(start_paused = true)]
async fn corrupt_prior_blob_falls_back_to_fresh_identity() {
    let h = Harness::new();
    h.connector.push_script(vec![qr("qr")]);
    let mut req = request("5");
    req.prior_credentials = Some("{definitely not a blob".into());

    let outcome = h.manager.start_connection(req).await;
    assert_eq!(outcome.status, SessionStatus::QrPending);
    assert!(!h.connector.last_link("5").credentials.is_registered());
}

#[tokio::test(start_paused = true)]
async fn restart_uses_latest_persisted_credentials() {
    let h = Harness::new();
    h.connector.push_script(vec![opened()]);
    h.manager.start_connection(request("3")).await;

    let link = h.connector.last_link("3");
    let update = CredentialUpdate {
        credentials: Some(json!({ "registered": true, "rotation": 2 })),
        keys: Vec::new(),
    };
    link.emit(TransportEvent::CredentialsChanged(update)).await;
    settle_for(Duration::from_millis(10)).await;

    h.connector.push_script(vec![opened()]);
    link.close(Some(515), "restart required").await;
    settle_for(BASE_DELAY * 2).await;

    let restarted = h.connector.last_link("3");
    assert_eq!(h.connector.open_count(), 2);
    assert_eq!(restarted.credentials.credentials["rotation"], json!(2));
}

#[tokio::test(start_paused = true)]
async fn stub_messages_are_filtered_and_content_is_published() {
    let h = Harness::new();
    let mut events = h.manager.subscribe();
    h.connector.push_script(vec![opened()]);
    h.manager.start_connection(request("8")).await;

    let link = h.connector.last_link("8");
    link.emit(TransportEvent::MessageReceived {
        payload: Some(json!({ "key": { "id": "stub" } })),
        stub_code: Some(29),
        timestamp: None,
    })
    .await;
    link.emit(TransportEvent::MessageReceived {
        payload: None,
        stub_code: None,
        timestamp: None,
    })
    .await;
    link.emit(TransportEvent::MessageReceived {
        payload: Some(json!({ "conversation": "hello" })),
        stub_code: None,
        timestamp: Some(1_700_000_000),
    })
    .await;
    settle_for(Duration::from_millis(10)).await;

    let mut received = Vec::new();
    while let Ok(event) = events.try_recv() {
        if let SessionEvent::MessageReceived { payload, timestamp, owner_id, .. } = event {
            received.push((payload, timestamp, owner_id));
        }
    }
    assert_eq!(
        received,
        vec![(json!({ "conversation": "hello" }), 1_700_000_000, "company-1".to_string())]
    );
}

#[tokio::test(start_paused = true)]
async fn status_events_follow_transport_order() {
    let h = Harness::new();
    let mut events = h.manager.subscribe();
    h.connector.push_script(vec![qr("a"), qr("b"), opened()]);
    h.manager.start_connection(request("1")).await;
    settle_for(Duration::from_millis(10)).await;

    let mut seen = Vec::new();
    while let Ok(event) = events.try_recv() {
        match event {
            SessionEvent::StatusChanged { status, .. } => seen.push(status.to_string()),
            SessionEvent::QrGenerated { qr, .. } => seen.push(format!("qr:{qr}")),
            _ => {}
        }
    }
    assert_eq!(
        seen,
        vec![
            "CONNECTING",
            "qr:a",
            "QR_PENDING",
            "qr:b",
            "QR_PENDING",
            "CONNECTED"
        ]
    );
}

#[tokio::test(start_paused = true)]
async fn open_failure_is_reported_without_retry() {
    let h = Harness::new();
    h.connector.set_failing(true);

    let outcome = h.manager.start_connection(request("11")).await;
    assert!(!outcome.success);
    assert!(outcome.message.contains("bridge unavailable"));
    assert!(!h.manager.has_pending_restart("11"));
    assert!(!h.manager.is_connecting("11"));
}

#[tokio::test(start_paused = true)]
async fn silent_transport_times_out_and_is_torn_down() {
    let h = Harness::new();

    let outcome = h.manager.start_connection(request("12")).await;
    assert!(!outcome.success);
    assert!(outcome.message.contains("did not settle"));
    assert!(h.manager.get("12").is_none());
    assert!(h.connector.last_link("12").handle.is_ended());
}

#[tokio::test(start_paused = true)]
async fn credential_bursts_are_coalesced_into_the_latest_state() {
    let h = Harness::new();
    h.connector.push_script(vec![opened()]);
    h.manager.start_connection(request("11")).await;
    h.store.set_save_delay(Duration::from_millis(100));

    let link = h.connector.last_link("11");
    for rotation in 0..10 {
        let update = CredentialUpdate {
            credentials: Some(json!({ "registered": true, "rotation": rotation })),
            keys: Vec::new(),
        };
        link.emit(TransportEvent::CredentialsChanged(update)).await;
    }
    settle_for(Duration::from_secs(1)).await;

    assert_eq!(h.store.peak_saves_in_flight(), 1);
    assert!(h.store.save_count() < 10, "saves = {}", h.store.save_count());
    let blob = h.store.row("11").unwrap().credentials.expect("credentials stored");
    let state = credentials::decode(&blob).unwrap();
    assert_eq!(state.credentials["rotation"], json!(9));
}
