//! Contract gate against a mock candidate engine

use httpmock::prelude::*;
use kiln_gate::{ContractCheck, ContractGate, EndpointProbe, GateError, Verdict};
use pretty_assertions::assert_eq;
use serde_json::json;
use std::time::Duration;

async fn healthy_candidate(server: &MockServer) {
    server
        .mock_async(|when, then| {
            when.method(GET).path("/health");
            then.status(200).json_body(json!({"status": "ok"}));
        })
        .await;
    server
        .mock_async(|when, then| {
            when.method(GET).path("/v1/version");
            then.status(200).json_body(json!({"engine": "candidate", "version": "2.1.0"}));
        })
        .await;
    server
        .mock_async(|when, then| {
            when.method(POST).path("/v1/generate");
            then.status(400).json_body(json!({"error": "text is required"}));
        })
        .await;
}

#[tokio::test]
async fn healthy_candidate_passes() {
    let server = MockServer::start_async().await;
    healthy_candidate(&server).await;
    server
        .mock_async(|when, then| {
            when.method(POST).path("/v1/chat");
            then.status(200).json_body(json!({"reply": ""}));
        })
        .await;

    let gate = ContractGate::new(server.base_url()).unwrap();
    let verdict = gate.verify().await;
    assert_eq!(verdict.verdict, Verdict::Pass, "failures: {:?}", verdict.failures);
    assert!(verdict.computed_at.is_some());
}

#[tokio::test]
async fn server_error_fails_and_validation_rejection_passes() {
    let server = MockServer::start_async().await;
    healthy_candidate(&server).await;
    server
        .mock_async(|when, then| {
            when.method(POST).path("/v1/chat");
            then.status(500).body("boom");
        })
        .await;

    let gate = ContractGate::new(server.base_url()).unwrap();
    let verdict = gate.verify().await;

    assert_eq!(verdict.verdict, Verdict::Fail);
    assert_eq!(verdict.failing_endpoints(), vec!["chat"]);
    assert!(verdict.failures[0].reason.contains("500"));
}

#[tokio::test]
async fn missing_field_and_missing_endpoint_are_listed() {
    let server = MockServer::start_async().await;
    server
        .mock_async(|when, then| {
            when.method(GET).path("/health");
            then.status(200).json_body(json!({"ok": true}));
        })
        .await;

    let gate = ContractGate::new(server.base_url())
        .unwrap()
        .with_battery(vec![
            EndpointProbe::get("health", "/health").must_succeed(["status"]),
            EndpointProbe::get("version", "/v1/version"),
        ])
        .unwrap();
    let verdict = gate.verify().await;

    assert_eq!(verdict.failing_endpoints(), vec!["health", "version"]);
    assert!(verdict.failures[0].reason.contains("`status`"));
    assert!(verdict.failures[1].reason.contains("404"));
}

#[tokio::test]
async fn verdict_is_cached_until_reset() {
    let server = MockServer::start_async().await;
    let health = server
        .mock_async(|when, then| {
            when.method(GET).path("/health");
            then.status(200).json_body(json!({"status": "ok"}));
        })
        .await;

    let gate = ContractGate::new(server.base_url())
        .unwrap()
        .with_battery(vec![EndpointProbe::get("health", "/health").must_succeed(["status"])])
        .unwrap();

    assert!(gate.cached().is_none());
    let (a, b) = tokio::join!(gate.verify(), gate.verify());
    assert_eq!(a, b);
    assert_eq!(gate.verify().await, a);
    assert_eq!(health.hits_async().await, 1);

    gate.reset();
    assert!(gate.cached().is_none());
    assert!(gate.verify().await.is_pass());
    assert_eq!(health.hits_async().await, 2);
}

#[tokio::test]
async fn reset_while_verifying_discards_the_verdict() {
    let server = MockServer::start_async().await;
    let health = server
        .mock_async(|when, then| {
            when.method(GET).path("/health");
            then.status(200)
                .json_body(json!({"status": "ok"}))
                .delay(Duration::from_millis(300));
        })
        .await;

    let gate = ContractGate::new(server.base_url())
        .unwrap()
        .with_battery(vec![EndpointProbe::get("health", "/health").must_succeed(["status"])])
        .unwrap();

    let (verdict, ()) = tokio::join!(gate.verify(), async {
        tokio::time::sleep(Duration::from_millis(50)).await;
        gate.reset();
    });
    assert!(verdict.is_pass());
    assert!(gate.cached().is_none());

    assert!(gate.verify().await.is_pass());
    assert!(gate.cached().is_some());
    assert_eq!(health.hits_async().await, 2);
}

#[tokio::test]
async fn unreachable_candidate_fails_every_probe() {
    let gate = ContractGate::new("http://127.0.0.1:9")
        .unwrap()
        .with_probe_timeout(Duration::from_secs(2));
    let verdict = gate.verify().await;
    assert_eq!(verdict.verdict, Verdict::Fail);
    assert_eq!(verdict.failures.len(), 4);
}

#[test]
fn empty_battery_is_rejected() {
    let error = ContractGate::new("http://localhost").unwrap().with_battery(Vec::new()).unwrap_err();
    assert_eq!(error, GateError::EmptyBattery);
}
