//! End-to-end runs against a mocked platform API

#![allow(clippy::disallowed_methods)] // Test code - unwrap is acceptable

mod support;

use std::sync::Arc;

use common::time::FixedTimeProvider;
use serde_json::json;
use syncsrv::record;
use syncsrv::source::{HttpSource, HttpSourceConfig, TelemetrySource};
use syncsrv::timestamp::to_instant;
use syncsrv::{CollectWindow, CollectorConfig, EntityKind, EntitySyncer, FieldValue, TelemetryCollector};
use wiremock::matchers::{method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

const NOW_MS: i64 = 1_582_200_000_000;

async fn platform() -> MockServer {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/api/tenant/devices"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "data": [
                {
                    "id": {"entityType": "DEVICE", "id": "d1"},
                    "createdTime": 1582147000123_i64,
                    "additionalInfo": {"description": "roof unit"},
                    "tenantId": {"entityType": "TENANT", "id": "t1"},
                    "customerId": {"entityType": "CUSTOMER", "id": "c1"},
                    "name": "Therm-1",
                    "type": "thermometer",
                    "label": "Roof"
                },
                {
                    "id": {"entityType": "DEVICE", "id": "d2"},
                    "createdTime": 1582147000456_i64,
                    "additionalInfo": null,
                    "name": "Spare",
                    "type": "thermometer"
                }
            ],
            "hasNext": false
        })))
        .mount(&server)
        .await;

    Mock::given(method("GET"))
        .and(path("/api/plugins/telemetry/DEVICE/d1/keys/timeseries"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!(["temperature"])))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/api/plugins/telemetry/DEVICE/d2/keys/timeseries"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
        .mount(&server)
        .await;

    Mock::given(method("GET"))
        .and(path("/api/plugins/telemetry/DEVICE/d1/values/timeseries"))
        .and(query_param("keys", "temperature"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "temperature": [
                {"ts": 1582147684275_i64, "value": "NaN"},
                {"ts": 1582147744275_i64, "value": "21.75"}
            ]
        })))
        .mount(&server)
        .await;

    server
}

fn source(server: &MockServer) -> Arc<dyn TelemetrySource> {
    Arc::new(
        HttpSource::new(&HttpSourceConfig {
            base_url: server.uri(),
            token: Some("token".into()),
            ..Default::default()
        })
        .unwrap(),
    )
}

#[tokio::test]
async fn devices_are_mirrored() {
    let server = platform().await;
    let (client, reconciler) = support::mirror().await;
    let syncer = EntitySyncer::new(source(&server), Arc::clone(&reconciler));

    let report = syncer.sync(EntityKind::Device).await.unwrap();
    assert_eq!(report.inserted, 2);
    assert_eq!(support::count(&client, "devices").await, 2);

    let key = record! {"id" => "d1"};
    assert_eq!(
        reconciler.lookup("devices", "tenantId", &key).await.unwrap(),
        Some(FieldValue::from("t1"))
    );
    assert_eq!(
        reconciler
            .lookup("devices", "description", &key)
            .await
            .unwrap(),
        Some(FieldValue::from("roof unit"))
    );
    assert_eq!(
        reconciler
            .lookup("devices", "createdTime", &key)
            .await
            .unwrap(),
        Some(FieldValue::Timestamp(to_instant(1_582_147_000_123).unwrap()))
    );

    let again = syncer.sync(EntityKind::Device).await.unwrap();
    assert_eq!(again.unchanged, 2);
}

#[tokio::test]
async fn telemetry_is_collected_and_device_without_keys_skipped() {
    let server = platform().await;
    let (client, reconciler) = support::mirror().await;
    let mut config = CollectorConfig::default();
    config
        .ontology
        .insert("temperature".into(), "air_temperature".into());
    let collector = TelemetryCollector::new(
        source(&server),
        Arc::clone(&reconciler),
        Arc::new(FixedTimeProvider::new(NOW_MS)),
        config,
    );

    let report = collector
        .collect(CollectWindow::default(), &[])
        .await
        .unwrap();
    assert_eq!(report.inserted, 2);
    assert_eq!(report.skipped.len(), 1);
    assert_eq!(report.skipped[0].device_id, "d2");
    assert_eq!(support::count(&client, "telemetry").await, 2);

    let nan_key = record! {
        "device_id" => "d1",
        "ts_key" => "temperature",
        "ts" => to_instant(1_582_147_684_275).unwrap(),
    };
    assert_eq!(
        reconciler
            .lookup("telemetry", "value", &nan_key)
            .await
            .unwrap(),
        Some(FieldValue::Null)
    );
    assert_eq!(
        reconciler
            .lookup("telemetry", "ontology", &nan_key)
            .await
            .unwrap(),
        Some(FieldValue::from("air_temperature"))
    );

    let resumed = collector
        .resume_window(CollectWindow::default())
        .await
        .unwrap();
    assert_eq!(
        resumed,
        CollectWindow::Since(to_instant(NOW_MS).unwrap())
    );
}

#[tokio::test]
async fn unreachable_platform_fails_the_run() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(503))
        .mount(&server)
        .await;
    let (_client, reconciler) = support::mirror().await;
    let collector = TelemetryCollector::new(
        source(&server),
        reconciler,
        Arc::new(FixedTimeProvider::new(NOW_MS)),
        CollectorConfig::default(),
    );

    assert!(collector
        .collect(CollectWindow::default(), &[])
        .await
        .is_err());
}
