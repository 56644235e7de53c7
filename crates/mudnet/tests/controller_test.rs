//! Controller client against a RESTCONF double.

mod common;

use common::{FakeController, MUD_URL};
use mudnet::{ControllerClient, ControllerConfig, Error, MacAddr, resources};
use serde_json::json;
use std::time::Duration;
use tokio::time::Instant;

fn mac(s: &str) -> MacAddr {
    s.parse().unwrap()
}

/// Quarantine adds to the controller's set, unquarantine removes from it.
#[tokio::test]
async fn test_quarantine_round_trip() {
    let controller = FakeController::new();
    let client = controller.client().await;
    let h1 = mac("00:00:00:00:00:b1");

    client.quarantine(h1).await.expect("quarantine failed");
    assert_eq!(client.get_quarantine_macs().await.unwrap(), vec![h1]);

    client.unquarantine(h1).await.expect("unquarantine failed");
    assert!(client.get_quarantine_macs().await.unwrap().is_empty());
}

/// Quarantining a device twice leaves it quarantined once.
#[tokio::test]
async fn test_quarantine_is_idempotent() {
    let controller = FakeController::new();
    let client = controller.client().await;
    let h1 = mac("00:00:00:00:00:b1");

    client.quarantine(h1).await.unwrap();
    client.quarantine(h1).await.unwrap();

    let state = controller.state();
    assert_eq!(state.quarantined, vec!["00:00:00:00:00:b1"]);
    assert_eq!(state.puts, 1);
}

/// Concurrent quarantines of different devices must not overwrite each other.
#[tokio::test]
async fn test_concurrent_quarantines_keep_both() {
    let controller = FakeController::new();
    let client = controller.client().await;
    let h1 = mac("00:00:00:00:00:b1");
    let h2 = mac("00:00:00:00:00:b2");

    let (a, b) = tokio::join!(client.quarantine(h1), client.quarantine(h2));
    a.unwrap();
    b.unwrap();

    let mut macs = client.get_quarantine_macs().await.unwrap();
    macs.sort_by_key(|m| m.to_string());
    assert_eq!(macs, vec![h1, h2]);
}

/// Unquarantining a device that is not quarantined succeeds.
#[tokio::test]
async fn test_unquarantine_unknown_device() {
    let controller = FakeController::new();
    let client = controller.client().await;
    client
        .unquarantine(mac("00:00:00:00:00:99"))
        .await
        .expect("unquarantine of unknown device failed");
}

/// Uploading the same document twice leaves the same stored state.
#[tokio::test]
async fn test_upload_is_idempotent() {
    let controller = FakeController::new();
    let client = controller.client().await;
    let doc = json!({
        "mapping": {
            "mud-url": MUD_URL,
            "device-id": ["00:00:00:00:00:b1"]
        }
    });

    client
        .upload_configuration(resources::DEVICE_ASSOCIATION, &doc)
        .await
        .unwrap();
    client
        .upload_configuration(resources::DEVICE_ASSOCIATION, &doc)
        .await
        .unwrap();

    let state = controller.state();
    assert_eq!(state.config[resources::DEVICE_ASSOCIATION], doc);
    assert_eq!(state.config.len(), 1);
}

#[tokio::test]
async fn test_clear_rules() {
    let controller = FakeController::new();
    let client = controller.client().await;
    client.clear_rules().await.unwrap();
    assert_eq!(controller.state().clears, 1);
}

/// Wrong credentials surface the controller's status, without retrying.
#[tokio::test]
async fn test_bad_credentials() {
    let controller = FakeController::new();
    let base_url = controller.serve().await;
    let client = ControllerClient::new(ControllerConfig {
        password: "wrong".to_string(),
        ..ControllerConfig::for_address(&base_url)
    })
    .unwrap();

    let err = client.clear_rules().await.unwrap_err();
    assert!(matches!(err, Error::Request { status: 401, .. }), "{err}");
    assert_eq!(controller.state().clears, 0);
}

/// Empty answers keep the poll going until a report appears.
#[tokio::test]
async fn test_poll_waits_for_report() {
    let controller = FakeController::new();
    controller.state().empty_polls = 2;
    let client = controller.client().await;

    let report = client
        .poll_mud_report(
            &[],
            Duration::from_millis(10),
            Instant::now() + Duration::from_secs(10),
        )
        .await
        .expect("no report");

    assert_eq!(report.mud_url.as_deref(), Some(MUD_URL));
    assert_eq!(controller.state().polls, 3);
}

/// Connection failures while polling are retried until the report arrives.
#[tokio::test]
async fn test_poll_retries_transport_failures() {
    let controller = FakeController::new();
    controller.state().broken_polls = 2;
    let client = controller.client().await;

    let report = client
        .poll_mud_report(
            &[],
            Duration::from_millis(10),
            Instant::now() + Duration::from_secs(10),
        )
        .await
        .expect("no report after transport failures");

    assert_eq!(report.mud_url.as_deref(), Some(MUD_URL));
    assert_eq!(controller.state().polls, 3);
}

/// A response that is not JSON ends the poll at once instead of waiting out
/// the deadline.
#[tokio::test]
async fn test_poll_stops_on_malformed_response() {
    let controller = FakeController::new();
    controller.state().garbage_polls = true;
    let client = controller.client().await;

    let started = Instant::now();
    let err = client
        .poll_mud_report(
            &[],
            Duration::from_millis(10),
            started + Duration::from_secs(10),
        )
        .await
        .unwrap_err();

    assert!(matches!(err, Error::Protocol(_)), "{err}");
    assert!(err.to_string().contains("Service Unavailable"), "{err}");
    assert_eq!(controller.state().polls, 1);
    assert!(started.elapsed() < Duration::from_secs(5));
}

/// A report that never shows up fails at the deadline, not long after it.
#[tokio::test]
async fn test_poll_respects_deadline() {
    let controller = FakeController::new();
    controller.state().never_report = true;
    let client = controller.client().await;

    let started = Instant::now();
    let err = client
        .poll_mud_report(
            &[],
            Duration::from_millis(50),
            started + Duration::from_millis(400),
        )
        .await
        .unwrap_err();

    let elapsed = started.elapsed();
    assert!(matches!(err, Error::PropagationTimeout(_)), "{err}");
    assert!(elapsed >= Duration::from_millis(400), "{elapsed:?}");
    assert!(elapsed < Duration::from_secs(2), "{elapsed:?}");
    assert!(controller.state().polls >= 2);
}

/// Collection stops once the controller has nothing more for the URL.
#[tokio::test]
async fn test_collect_reports() {
    let controller = FakeController::new();
    let client = controller.client().await;

    let reports = client
        .collect_mud_reports(
            Duration::from_millis(10),
            Instant::now() + Duration::from_secs(10),
        )
        .await
        .unwrap();

    assert_eq!(reports.len(), 1);
    assert!(reports[0].has_report());
    assert_eq!(controller.state().polls, 2);
}
