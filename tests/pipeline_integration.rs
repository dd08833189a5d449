//! End-to-end pipeline tests against a mocked GCP API surface

mod common;

use cloudsweep::error::{FailureKind, PipelineError};
use cloudsweep::metrics::Period;
use cloudsweep::pipeline::DiscoveryRequest;
use cloudsweep::resource::ResourceType;
use cloudsweep::store::{MemoryStore, Scope};
use common::*;
use serde_json::json;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use wiremock::matchers::{bearer_token, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn request(regions: &[&str]) -> DiscoveryRequest {
    DiscoveryRequest::new(PROJECT)
        .with_regions(regions.iter().map(|r| r.to_string()).collect())
        .with_period(Period::ThreeHours)
}

#[tokio::test]
async fn test_database_denial_in_one_region_is_isolated() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path(compute_aggregated_path()))
        .and(bearer_token(TOKEN))
        .respond_with(ResponseTemplate::new(200).set_body_json(aggregated_instances("us-east1-b", 5)))
        .mount(&server)
        .await;

    Mock::given(method("GET"))
        .and(path(format!("/v1/projects/{PROJECT}/instances")))
        .and(query_param("filter", "region:us-west1"))
        .respond_with(ResponseTemplate::new(403).set_body_json(json!({
            "error": {
                "code": 403,
                "message": "The caller does not have permission",
                "status": "PERMISSION_DENIED"
            }
        })))
        .mount(&server)
        .await;

    mount_empty_fallback(&server).await;

    let pipeline = pipeline(&server, Arc::new(MemoryStore::new()));
    let response = pipeline
        .run(ORG, &request(&["us-east1", "us-west1"]), &CancellationToken::new())
        .await
        .expect("invocation succeeds");

    assert!(response.success);
    assert_eq!(response.resources_found, 5);
    assert!(response
        .resources
        .iter()
        .all(|r| r.resource_type == ResourceType::ComputeInstance && r.region == "us-east1"));
    assert_eq!(
        response.permission_errors,
        vec!["us-west1/managed_database: Permission denied (403): The caller does not have permission"]
    );
    assert_eq!(response.failures.len(), 1);
    assert_eq!(response.failures[0].kind, FailureKind::AuthDenied);
    assert_eq!(response.regions_scanned, vec!["us-east1", "us-west1"]);
}

#[tokio::test]
async fn test_counter_metrics_are_summed_and_gauges_averaged() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path(compute_aggregated_path()))
        .respond_with(ResponseTemplate::new(200).set_body_json(aggregated_instances("us-east1-b", 1)))
        .mount(&server)
        .await;

    // Two series for the same bucket, split by a metric label
    Mock::given(method("GET"))
        .and(path(time_series_path()))
        .and(MetricQuery {
            metric_suffix: "instance/network/received_bytes_count",
            aligner: "ALIGN_SUM",
        })
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "timeSeries": [
                int_series("2026-10-17T10:05:00Z", 100),
                int_series("2026-10-17T10:05:00Z", 250)
            ]
        })))
        .mount(&server)
        .await;

    Mock::given(method("GET"))
        .and(path(time_series_path()))
        .and(MetricQuery {
            metric_suffix: "instance/cpu/utilization",
            aligner: "ALIGN_MEAN",
        })
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "timeSeries": [
                double_series("2026-10-17T10:05:00Z", 0.2),
                double_series("2026-10-17T10:05:00Z", 0.4)
            ]
        })))
        .mount(&server)
        .await;

    mount_empty_fallback(&server).await;

    let response = pipeline(&server, Arc::new(MemoryStore::new()))
        .run(ORG, &request(&["us-east1"]), &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(response.metrics_collected, 2);

    let bytes = response
        .metrics
        .iter()
        .find(|m| m.metric_name == "instance/network/received_bytes_count")
        .expect("bytes datapoint");
    assert_eq!(bytes.value, 350.0);
    assert_eq!(bytes.unit, "Bytes");
    assert_eq!(bytes.resource_id, "1000");

    let cpu = response
        .metrics
        .iter()
        .find(|m| m.metric_name == "instance/cpu/utilization")
        .expect("cpu datapoint");
    assert!((cpu.value - 0.3).abs() < 1e-9);
    assert_eq!(cpu.unit, "Ratio");
}

#[tokio::test]
async fn test_metric_query_uses_window_granularity() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path(compute_aggregated_path()))
        .respond_with(ResponseTemplate::new(200).set_body_json(aggregated_instances("us-east1-c", 1)))
        .mount(&server)
        .await;
    mount_empty_fallback(&server).await;

    let week = DiscoveryRequest::new(PROJECT)
        .with_regions(vec!["us-east1".to_string()])
        .with_period(Period::SevenDays);
    pipeline(&server, Arc::new(MemoryStore::new()))
        .run(ORG, &week, &CancellationToken::new())
        .await
        .unwrap();

    let requests = server.received_requests().await.unwrap();
    let metric_queries: Vec<_> = requests
        .iter()
        .filter(|r| r.url.path() == time_series_path())
        .collect();

    assert_eq!(metric_queries.len(), 5);
    for query in metric_queries {
        let alignment = query
            .url
            .query_pairs()
            .find(|(k, _)| k == "aggregation.alignmentPeriod")
            .map(|(_, v)| v.into_owned());
        assert_eq!(alignment.as_deref(), Some("3600s"));
        assert!(query
            .url
            .query_pairs()
            .any(|(k, v)| k == "filter" && v.contains("resource.labels.instance_id = \"1000\"")));
    }
}

#[tokio::test]
async fn test_failed_metric_fetch_yields_no_datapoints_but_keeps_others() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path(compute_aggregated_path()))
        .respond_with(ResponseTemplate::new(200).set_body_json(aggregated_instances("us-east1-b", 1)))
        .mount(&server)
        .await;

    Mock::given(method("GET"))
        .and(path(time_series_path()))
        .and(MetricQuery {
            metric_suffix: "instance/cpu/utilization",
            aligner: "ALIGN_MEAN",
        })
        .respond_with(ResponseTemplate::new(429).set_body_json(json!({
            "error": { "code": 429, "message": "Quota exceeded" }
        })))
        .mount(&server)
        .await;

    Mock::given(method("GET"))
        .and(path(time_series_path()))
        .and(MetricQuery {
            metric_suffix: "instance/disk/read_ops_count",
            aligner: "ALIGN_SUM",
        })
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "timeSeries": [int_series("2026-10-17T10:05:00Z", 7)]
        })))
        .mount(&server)
        .await;

    mount_empty_fallback(&server).await;

    let response = pipeline(&server, Arc::new(MemoryStore::new()))
        .run(ORG, &request(&["us-east1"]), &CancellationToken::new())
        .await
        .unwrap();

    assert!(response.success);
    assert!(response.permission_errors.is_empty());
    assert_eq!(response.metrics_collected, 1);
    assert_eq!(response.metrics[0].metric_name, "instance/disk/read_ops_count");
    assert_eq!(response.metrics[0].unit, "Count");
}

#[tokio::test]
async fn test_type_without_metric_config_yields_no_metrics_and_no_errors() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path(format!(
            "/v1/projects/{PROJECT}/locations/us-east1/gateways"
        )))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "gateways": [{
                "name": format!("projects/{PROJECT}/locations/us-east1/gateways/edge"),
                "displayName": "Edge gateway",
                "state": "ACTIVE",
                "defaultHostname": "edge-abc.uc.gateway.dev"
            }]
        })))
        .mount(&server)
        .await;
    mount_empty_fallback(&server).await;

    let response = pipeline(&server, Arc::new(MemoryStore::new()))
        .run(ORG, &request(&["us-east1"]), &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(response.resources_found, 1);
    assert_eq!(response.resources[0].resource_type, ResourceType::ApiGateway);
    assert_eq!(
        response.resources[0].resource_id,
        format!("projects/{PROJECT}/locations/us-east1/gateways/edge")
    );
    assert_eq!(response.resources[0].resource_name, "Edge gateway");
    assert_eq!(response.metrics_collected, 0);
    assert!(response.permission_errors.is_empty());
    assert_eq!(requests_to(&server, "timeSeries").await, 0);
}

#[tokio::test]
async fn test_list_pagination_is_drained() {
    let server = MockServer::start().await;
    let rules_path = format!("/compute/v1/projects/{PROJECT}/regions/us-east1/forwardingRules");

    Mock::given(method("GET"))
        .and(path(rules_path.clone()))
        .and(query_param("pageToken", "page-2"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "items": [{ "name": "lb-3", "IPAddress": "10.0.0.3" }]
        })))
        .with_priority(1)
        .expect(1)
        .mount(&server)
        .await;

    Mock::given(method("GET"))
        .and(path(rules_path))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "items": [{ "name": "lb-1" }, { "name": "lb-2" }],
            "nextPageToken": "page-2"
        })))
        .expect(1)
        .mount(&server)
        .await;

    mount_empty_fallback(&server).await;

    let response = pipeline(&server, Arc::new(MemoryStore::new()))
        .run(ORG, &request(&["us-east1"]), &CancellationToken::new())
        .await
        .unwrap();

    let mut names: Vec<&str> = response
        .resources
        .iter()
        .filter(|r| r.resource_type == ResourceType::LoadBalancer)
        .map(|r| r.resource_name.as_str())
        .collect();
    names.sort();
    assert_eq!(names, vec!["lb-1", "lb-2", "lb-3"]);
}

#[tokio::test]
async fn test_same_name_in_two_regions_stays_two_resources() {
    let server = MockServer::start().await;

    for (region, egress) in [("us-east1", 10), ("europe-west1", 20)] {
        Mock::given(method("GET"))
            .and(path(format!("/v2/projects/{PROJECT}/locations/{region}/functions")))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "functions": [{
                    "name": format!("projects/{PROJECT}/locations/{region}/functions/resize"),
                    "state": "ACTIVE"
                }]
            })))
            .mount(&server)
            .await;

        Mock::given(method("GET"))
            .and(path(time_series_path()))
            .and(MetricQuery {
                metric_suffix: "function/network_egress",
                aligner: "ALIGN_SUM",
            })
            .and(FilterContains(format!("resource.labels.region = \"{region}\"")))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "timeSeries": [int_series("2026-10-17T10:05:00Z", egress)]
            })))
            .expect(1)
            .mount(&server)
            .await;
    }
    mount_empty_fallback(&server).await;

    let store = Arc::new(MemoryStore::new());
    let response = pipeline(&server, store.clone())
        .run(ORG, &request(&["us-east1", "europe-west1"]), &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(response.resources_found, 2);
    assert_eq!(response.metrics_collected, 2);
    assert_eq!(store.resource_count().await, 2);

    let scope = Scope::new(ORG, PROJECT);
    for (region, egress) in [("us-east1", 10.0), ("europe-west1", 20.0)] {
        let id = format!("projects/{PROJECT}/locations/{region}/functions/resize");
        let stored = store
            .resource(&scope, &id, ResourceType::ServerlessFunction)
            .await
            .unwrap();
        assert_eq!(stored.resource.region, region);
        assert_eq!(stored.resource.resource_name, "resize");

        let series = store.series(&scope, &id, "function/network_egress").await;
        assert_eq!(series.len(), 1);
        assert_eq!(series[0].value, egress);
    }
}

#[tokio::test]
async fn test_rerun_is_idempotent() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path(compute_aggregated_path()))
        .respond_with(ResponseTemplate::new(200).set_body_json(aggregated_instances("us-east1-b", 3)))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path(time_series_path()))
        .and(MetricQuery {
            metric_suffix: "instance/network/sent_bytes_count",
            aligner: "ALIGN_SUM",
        })
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "timeSeries": [int_series("2026-10-17T10:05:00Z", 42)]
        })))
        .mount(&server)
        .await;
    mount_empty_fallback(&server).await;

    let store = Arc::new(MemoryStore::new());
    let pipeline = pipeline(&server, store.clone());
    let scope = Scope::new(ORG, PROJECT);

    let first = pipeline
        .run(ORG, &request(&["us-east1"]), &CancellationToken::new())
        .await
        .unwrap();
    let before = store
        .resource(&scope, "1000", ResourceType::ComputeInstance)
        .await
        .unwrap();

    let second = pipeline
        .run(ORG, &request(&["us-east1"]), &CancellationToken::new())
        .await
        .unwrap();
    let after = store
        .resource(&scope, "1000", ResourceType::ComputeInstance)
        .await
        .unwrap();

    assert_eq!(first.resources_found, 3);
    assert_eq!(second.resources_found, 3);
    assert_eq!(store.resource_count().await, 3);
    assert_eq!(store.datapoint_count().await, 3);
    assert_eq!(first.persistence.datapoints_written, 3);
    assert_eq!(second.persistence.datapoints_written, 0);
    assert_eq!(before.id, after.id);
    assert_eq!(before.created_at, after.created_at);
    assert!(after.updated_at >= before.updated_at);
}

#[tokio::test]
async fn test_denied_account_fails_before_any_discovery() {
    let server = MockServer::start().await;
    mount_empty_fallback(&server).await;

    let pipeline = pipeline_with(
        &server,
        Arc::new(DenyingResolver),
        Arc::new(MemoryStore::new()),
        settings(),
    );
    let err = pipeline
        .run(ORG, &request(&["us-east1", "us-west1"]), &CancellationToken::new())
        .await
        .unwrap_err();

    assert!(matches!(err, PipelineError::Credentials { .. }));
    assert!(server.received_requests().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_region_credential_outage_is_isolated() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path(compute_aggregated_path()))
        .respond_with(ResponseTemplate::new(200).set_body_json(aggregated_instances("us-east1-b", 2)))
        .mount(&server)
        .await;
    mount_empty_fallback(&server).await;

    let pipeline = pipeline_with(
        &server,
        Arc::new(RegionOutageResolver {
            broken_region: "europe-west1",
        }),
        Arc::new(MemoryStore::new()),
        settings(),
    );
    let response = pipeline
        .run(ORG, &request(&["us-east1", "europe-west1"]), &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(response.resources_found, 2);
    assert_eq!(response.regions_scanned, vec!["us-east1"]);
    assert_eq!(
        response.permission_errors,
        vec!["europe-west1/credentials: credentials unavailable: token service timed out"]
    );
}

#[tokio::test]
async fn test_credentials_resolved_once_per_region() {
    let server = MockServer::start().await;
    mount_empty_fallback(&server).await;

    let resolver = Arc::new(CountingResolver::default());
    let pipeline = pipeline_with(&server, resolver.clone(), Arc::new(MemoryStore::new()), settings());
    let response = pipeline
        .run(ORG, &request(&["us-east1", "europe-west1"]), &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(response.regions_scanned, vec!["us-east1", "europe-west1"]);
    assert_eq!(resolver.calls_for("us-east1"), 1);
    assert_eq!(resolver.calls_for("europe-west1"), 1);
}

#[tokio::test]
async fn test_default_region_used_when_none_requested() {
    let server = MockServer::start().await;
    mount_empty_fallback(&server).await;

    let response = pipeline(&server, Arc::new(MemoryStore::new()))
        .run(ORG, &DiscoveryRequest::new(PROJECT), &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(response.regions_scanned, vec!["us-east1"]);
    assert_eq!(response.resources_found, 0);
    assert!(requests_to(&server, "/locations/us-east1/").await > 0);
}

#[tokio::test]
async fn test_cancelled_invocation_makes_no_calls() {
    let server = MockServer::start().await;
    mount_empty_fallback(&server).await;

    let cancel = CancellationToken::new();
    cancel.cancel();

    let pipeline = pipeline(&server, Arc::new(MemoryStore::new()));
    let err = pipeline
        .run(ORG, &request(&["us-east1"]), &cancel)
        .await
        .unwrap_err();

    assert!(matches!(err, PipelineError::Cancelled));
    assert!(server.received_requests().await.unwrap().is_empty());
    assert!(pipeline.circuits().open_circuits().is_empty());
}

#[tokio::test]
async fn test_blank_account_is_rejected() {
    let server = MockServer::start().await;
    let err = pipeline(&server, Arc::new(MemoryStore::new()))
        .run(ORG, &DiscoveryRequest::new("  "), &CancellationToken::new())
        .await
        .unwrap_err();

    assert!(matches!(err, PipelineError::InvalidRequest(_)));
}
