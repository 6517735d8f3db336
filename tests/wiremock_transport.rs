//! Integration tests over the reqwest transport against a local mock server.

use integrations_google_cloud_lro::errors::AuthenticationError;
use integrations_google_cloud_lro::mocks::MockAuthProvider;
use integrations_google_cloud_lro::prelude::*;
use integrations_google_cloud_lro::resilience::RetryConfig;
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use wiremock::matchers::{body_json, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

async fn setup_mock_server() -> MockServer {
    MockServer::start().await
}

fn client_for(server: &MockServer, auth: Arc<MockAuthProvider>) -> Arc<CloudClient> {
    let endpoints = EndpointContext::builder()
        .endpoint_override("compute", format!("{}/compute/v1/", server.uri()))
        .timeout(Duration::from_secs(5))
        .build()
        .expect("Failed to build endpoint context");
    let config = ClientConfig::builder()
        .auth_provider_arc(auth)
        .endpoints(endpoints)
        .retry(RetryConfig {
            max_attempts: 3,
            initial_backoff: Duration::from_millis(10),
            max_backoff: Duration::from_millis(20),
            multiplier: 2.0,
        })
        .build()
        .expect("Failed to build config");
    Arc::new(CloudClient::new(config).expect("Failed to build client"))
}

fn quick_policy() -> PollPolicy {
    PollPolicy {
        initial_delay: Duration::from_millis(10),
        max_delay: Duration::from_millis(20),
        multiplier: 1.5,
        jitter: 0.1,
        ..Default::default()
    }
}

fn operation(server: &MockServer, name: &str, status: &str) -> Value {
    let base = format!("{}/compute/v1/projects/p/zones/z1", server.uri());
    json!({
        "kind": "compute#operation",
        "name": name,
        "status": status,
        "zone": base,
        "selfLink": format!("{base}/operations/{name}"),
        "targetLink": format!("{base}/instances/{name}-vm"),
    })
}

async fn submit_insert(client: Arc<CloudClient>, instance: String) -> CloudResult<SubmitOutcome<Value>> {
    let base = client.registry().collection("compute.instances")?.base_url().clone();
    let url = base
        .join("projects/p/zones/z1/instances")
        .map_err(|e| CloudError::configuration(e.to_string()))?;
    let body: Value = client
        .executor()
        .post_json(&url, &json!({"name": instance}), &CancellationToken::new())
        .await?;
    SubmitOutcome::from_json(body)
}

#[tokio::test]
async fn test_lro_end_to_end_over_http() {
    let server = setup_mock_server().await;
    let auth = Arc::new(MockAuthProvider::new("tok"));

    Mock::given(method("POST"))
        .and(path("/compute/v1/projects/p/zones/z1/instances"))
        .and(header("authorization", "Bearer tok-0"))
        .and(body_json(json!({"name": "vm-1"})))
        .respond_with(ResponseTemplate::new(200).set_body_json(operation(&server, "op-1", "PENDING")))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/compute/v1/projects/p/zones/z1/operations/op-1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(operation(&server, "op-1", "RUNNING")))
        .up_to_n_times(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/compute/v1/projects/p/zones/z1/operations/op-1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(operation(&server, "op-1", "DONE")))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/compute/v1/projects/p/zones/z1/instances/op-1-vm"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"name": "op-1-vm", "status": "RUNNING"})))
        .expect(1)
        .mount(&server)
        .await;

    let client = client_for(&server, auth);
    let reporter = Arc::new(RecordingReporter::new());
    let submit_client = client.clone();
    let fetch_client = client.clone();

    let result = client
        .lro()
        .run(
            LroRequest::new("Creating instance [vm-1]", move || {
                submit_insert(submit_client, "vm-1".to_string())
            })
            .fetch(move |operation| async move {
                fetch_client
                    .fetch_target(&operation, &CancellationToken::new())
                    .await
            })
            .policy(quick_policy())
            .progress(reporter.clone()),
        )
        .await;

    assert!(result.is_ok(), "unexpected error: {:?}", result.as_ref().err());
    let instance = result.unwrap().into_resource().unwrap();
    assert_eq!(instance["name"], "op-1-vm");
    assert_eq!(
        reporter.kinds(),
        vec![
            EventKind::Started,
            EventKind::Tick,
            EventKind::Tick,
            EventKind::Completed
        ]
    );
}

#[tokio::test]
async fn test_unauthorized_triggers_one_refresh() {
    let server = setup_mock_server().await;
    let auth = Arc::new(MockAuthProvider::new("tok"));

    Mock::given(method("GET"))
        .and(path("/compute/v1/projects/p/zones/z1/instances/vm-1"))
        .and(header("authorization", "Bearer tok-0"))
        .respond_with(ResponseTemplate::new(401).set_body_json(json!({
            "error": {"code": 401, "message": "token expired", "status": "UNAUTHENTICATED"}
        })))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/compute/v1/projects/p/zones/z1/instances/vm-1"))
        .and(header("authorization", "Bearer tok-1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"name": "vm-1"})))
        .mount(&server)
        .await;

    let client = client_for(&server, auth.clone());
    let url = client
        .parse("vm-1", "compute.instances", &ParamDefaults::new().project("p").zone("z1"))
        .unwrap()
        .url();

    let instance: Value = client
        .get_json(&url, &CancellationToken::new())
        .await
        .expect("request should succeed after refresh");

    assert_eq!(instance["name"], "vm-1");
    assert_eq!(auth.refresh_count(), 1);
}

#[tokio::test]
async fn test_second_unauthorized_is_rejected() {
    let server = setup_mock_server().await;
    let auth = Arc::new(MockAuthProvider::new("tok"));

    Mock::given(method("GET"))
        .and(path("/compute/v1/projects/p/zones/z1/instances/vm-1"))
        .respond_with(ResponseTemplate::new(401).set_body_json(json!({
            "error": {"code": 401, "message": "bad credentials", "status": "UNAUTHENTICATED"}
        })))
        .expect(2)
        .mount(&server)
        .await;

    let client = client_for(&server, auth.clone());
    let url = client
        .parse("vm-1", "compute.instances", &ParamDefaults::new().project("p").zone("z1"))
        .unwrap()
        .url();

    let err = client
        .get_json::<Value>(&url, &CancellationToken::new())
        .await
        .unwrap_err();

    assert!(matches!(
        err,
        CloudError::Authentication(AuthenticationError::Rejected(_))
    ));
    assert_eq!(auth.refresh_count(), 1);
}

#[tokio::test]
async fn test_service_unavailable_is_retried() {
    let server = setup_mock_server().await;

    Mock::given(method("GET"))
        .and(path("/compute/v1/projects/p/zones/z1/instances/vm-1"))
        .respond_with(ResponseTemplate::new(503))
        .up_to_n_times(2)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/compute/v1/projects/p/zones/z1/instances/vm-1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"name": "vm-1"})))
        .mount(&server)
        .await;

    let client = client_for(&server, Arc::new(MockAuthProvider::new("tok")));
    let url = client
        .parse("vm-1", "compute.instances", &ParamDefaults::new().project("p").zone("z1"))
        .unwrap()
        .url();

    let instance: Value = client
        .get_json(&url, &CancellationToken::new())
        .await
        .expect("third attempt should succeed");
    assert_eq!(instance["name"], "vm-1");
}

#[tokio::test]
async fn test_permanent_error_is_typed_and_not_retried() {
    let server = setup_mock_server().await;

    Mock::given(method("GET"))
        .and(path("/compute/v1/projects/p/zones/z1/instances/vm-1"))
        .respond_with(ResponseTemplate::new(403).set_body_json(json!({
            "error": {
                "code": 403,
                "message": "Required 'compute.instances.get' permission",
                "status": "PERMISSION_DENIED"
            }
        })))
        .expect(1)
        .mount(&server)
        .await;

    let client = client_for(&server, Arc::new(MockAuthProvider::new("tok")));
    let url = client
        .parse("vm-1", "compute.instances", &ParamDefaults::new().project("p").zone("z1"))
        .unwrap()
        .url();

    let err = client
        .get_json::<Value>(&url, &CancellationToken::new())
        .await
        .unwrap_err();

    match err {
        CloudError::Api(api) => {
            assert_eq!(api.http_status, 403);
            assert_eq!(api.service_code, "PERMISSION_DENIED");
            assert!(api.message.contains("compute.instances.get"));
        }
        other => panic!("expected API error, got {other:?}"),
    }
}

#[tokio::test]
async fn test_concurrent_operations_are_independent() {
    let server = setup_mock_server().await;

    for name in ["op-x", "op-y"] {
        Mock::given(method("GET"))
            .and(path(format!("/compute/v1/projects/p/zones/z1/operations/{name}")))
            .respond_with(ResponseTemplate::new(200).set_body_json(operation(&server, name, "RUNNING")))
            .up_to_n_times(if name == "op-x" { 1 } else { 3 })
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path(format!("/compute/v1/projects/p/zones/z1/operations/{name}")))
            .respond_with(ResponseTemplate::new(200).set_body_json(operation(&server, name, "DONE")))
            .mount(&server)
            .await;
    }

    let client = client_for(&server, Arc::new(MockAuthProvider::new("tok")));
    let driver = client.lro();
    let run = |name: &'static str, reporter: Arc<RecordingReporter>| {
        let handle = OperationHandle::from_json(operation(&server, name, "PENDING")).unwrap();
        driver.run(
            LroRequest::<Value>::new(format!("Updating [{name}]"), move || async move {
                Ok(SubmitOutcome::Operation(handle))
            })
            .policy(quick_policy())
            .progress(reporter),
        )
    };

    let reporter_x = Arc::new(RecordingReporter::new());
    let reporter_y = Arc::new(RecordingReporter::new());
    let (x, y) = futures::join!(run("op-x", reporter_x.clone()), run("op-y", reporter_y.clone()));

    assert_eq!(x.unwrap().into_operation().unwrap().name, "op-x");
    assert_eq!(y.unwrap().into_operation().unwrap().name, "op-y");

    let ticks = |reporter: &RecordingReporter| {
        reporter
            .kinds()
            .into_iter()
            .filter(|k| *k == EventKind::Tick)
            .count()
    };
    assert_eq!(ticks(&reporter_x), 2);
    assert_eq!(ticks(&reporter_y), 4);
    assert!(reporter_x
        .events()
        .iter()
        .all(|e| e.label == "Updating [op-x]"));
    assert!(reporter_y
        .events()
        .iter()
        .filter_map(|e| e.operation.as_ref())
        .all(|op| op.name == "op-y"));
}

#[tokio::test]
async fn test_batch_wait_over_mixed_scopes() {
    let server = setup_mock_server().await;
    let base = format!("{}/compute/v1/projects/p", server.uri());

    Mock::given(method("GET"))
        .and(path("/compute/v1/projects/p/zones/z1/operations/op-a"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"status": "RUNNING"})))
        .up_to_n_times(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/compute/v1/projects/p/zones/z1/operations/op-a"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"status": "DONE"})))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/compute/v1/projects/p/zones/z1/instances/vm-a"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"name": "vm-a"})))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/compute/v1/projects/p/regions/r1/operations/op-b"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "status": "DONE",
            "httpErrorStatusCode": 409,
            "error": {"errors": [{"code": "RESOURCE_IN_USE_BY_ANOTHER_RESOURCE", "message": "in use"}]},
            "warnings": [{"code": "REQUIRED_TOS_AGREEMENT", "message": "accept the terms"}]
        })))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/compute/v1/projects/p/global/operations/op-c"))
        .respond_with(ResponseTemplate::new(404).set_body_json(json!({
            "error": {"code": 404, "message": "not found", "status": "NOT_FOUND"}
        })))
        .expect(3)
        .mount(&server)
        .await;

    let client = client_for(&server, Arc::new(MockAuthProvider::new("tok")));
    let fetch_client = client.clone();
    let mut zonal = OperationHandle::new("op-a");
    zonal.zone = Some("z1".to_string());
    zonal.target_link = Some(format!("{base}/zones/z1/instances/vm-a"));
    let mut regional = OperationHandle::new("op-b");
    regional.region = Some("r1".to_string());
    let reporter = Arc::new(RecordingReporter::new());

    let outcome = client
        .lro()
        .wait_all(
            BatchRequest::new("Updating resources")
                .operation(zonal, ScopeHints::project("p"))
                .operation(regional, ScopeHints::project("p"))
                .operation(OperationHandle::new("op-c"), ScopeHints::project("p").global())
                .fetch(move |operation| {
                    let client = fetch_client.clone();
                    async move {
                        client
                            .fetch_target::<Value>(&operation, &CancellationToken::new())
                            .await
                    }
                })
                .policy(quick_policy())
                .progress(reporter.clone()),
        )
        .await
        .expect("batch wait should return its outcome");

    assert_eq!(outcome.results.len(), 1);
    assert_eq!(outcome.results[0].clone().into_resource().unwrap()["name"], "vm-a");
    assert_eq!(outcome.warnings, vec!["accept the terms".to_string()]);
    assert_eq!(outcome.errors.len(), 2);
    assert_eq!(outcome.errors[0].operation, "projects/p/regions/r1/operations/op-b");
    assert_eq!(outcome.errors[0].http_status, Some(409));
    assert!(outcome.errors[0].message.contains("RESOURCE_IN_USE_BY_ANOTHER_RESOURCE"));
    assert_eq!(outcome.errors[1].operation, "projects/p/global/operations/op-c");
    assert!(outcome.errors[1].message.contains("not found after 3 attempts"));
    assert_eq!(reporter.kinds().first(), Some(&EventKind::Started));
    assert_eq!(reporter.kinds().last(), Some(&EventKind::Failed));
}
