use secrecy::SecretString;
use vitals_client::sync::{HttpSyncSink, SyncPayload, SyncSink};
use vitals_client::{RawHealthDataset, VitalsError, WearableVitals};
use wiremock::matchers::{body_json, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn payload() -> SyncPayload {
    SyncPayload {
        user_id: "user-1".into(),
        email: "alice@example.com".into(),
        data: RawHealthDataset::new(),
        fitbit_metrics: WearableVitals {
            skin_temperature: Some("0.3".into()),
            breathing_rate: None,
            oxygen_saturation: Some("96.0".into()),
        },
    }
}

#[tokio::test]
async fn posts_json_with_bearer() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/health/sync"))
        .and(header("authorization", "Bearer id-token"))
        .and(body_json(serde_json::json!({
            "userId": "user-1",
            "email": "alice@example.com",
            "data": {},
            "fitbitMetrics": {
                "skinTemperature": "0.3",
                "breathingRate": null,
                "oxygenSaturation": "96.0"
            }
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({"ok": true})))
        .expect(1)
        .mount(&server)
        .await;

    let sink = HttpSyncSink::new(format!("{}/api/health/sync", server.uri()));
    sink.deliver(&payload(), &SecretString::new("id-token".into()))
        .await
        .unwrap();
}

#[tokio::test]
async fn non_success_is_upstream_error() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/sync"))
        .respond_with(
            ResponseTemplate::new(401)
                .set_body_json(serde_json::json!({"message": "token expired"})),
        )
        .mount(&server)
        .await;

    let sink = HttpSyncSink::new(format!("{}/sync", server.uri()));
    match sink
        .deliver(&payload(), &SecretString::new("stale".into()))
        .await
    {
        Err(VitalsError::Upstream { status, body }) => {
            assert_eq!(status, 401);
            assert!(body.contains("token expired"));
        }
        other => panic!("unexpected: {other:?}"),
    }
}
