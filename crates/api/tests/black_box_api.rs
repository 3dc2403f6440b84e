use std::sync::Arc;
use std::time::Duration;

use reqwest::StatusCode;
use serde_json::{Value, json};

use ets_api::app::{AppServices, build_app, build_services_with};
use ets_infra::EtsConfig;
use ets_infra::delivery::RecordingDeliverer;

const TENANT: &str = "dev:acme";
const RR: &str = "idn:access-request-pre-approval";
const FF: &str = "idn:identity-created";

struct TestServer {
    base_url: String,
    services: Arc<AppServices>,
    deliverer: Arc<RecordingDeliverer>,
    handle: tokio::task::JoinHandle<()>,
}

impl TestServer {
    async fn spawn() -> Self {
        // Same router as prod, in-memory stack, recorded deliveries.
        let deliverer = Arc::new(RecordingDeliverer::new());
        let config = EtsConfig {
            callback_base_url: "https://ets.example.com".into(),
            ..EtsConfig::default()
        };
        let services = Arc::new(build_services_with(&config, deliverer.clone()).expect("failed to build services"));
        let app = build_app(services.clone());

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("failed to bind ephemeral port");
        let addr = listener.local_addr().unwrap();
        let base_url = format!("http://{}", addr);

        let handle = tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        Self {
            base_url,
            services,
            deliverer,
            handle,
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        self.handle.abort();
        self.services.shutdown();
    }
}

async fn subscribe(client: &reqwest::Client, srv: &TestServer, body: Value) -> reqwest::Response {
    client
        .post(srv.url("/trigger-subscriptions"))
        .header("X-Tenant-Id", TENANT)
        .json(&body)
        .send()
        .await
        .unwrap()
}

fn http_subscription(trigger: &str) -> Value {
    json!({
        "triggerId": trigger,
        "name": "hook",
        "type": "HTTP",
        "responseDeadline": 5,
        "config": { "url": "https://hooks.example.com/ets" }
    })
}

async fn status_eventually(client: &reqwest::Client, srv: &TestServer, id: &str, completed: bool) -> Value {
    // Status is written by a background worker; poll until it catches up.
    for _ in 0..200 {
        let res = client
            .get(srv.url(&format!("/trigger-invocations/status/{id}")))
            .header("X-Tenant-Id", TENANT)
            .send()
            .await
            .unwrap();
        if res.status() == StatusCode::OK {
            let body: Value = res.json().await.unwrap();
            if body["completed"].is_null() != completed {
                return body;
            }
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("status for {id} did not reach completed={completed}");
}

#[tokio::test]
async fn health_is_public() {
    let srv = TestServer::spawn().await;
    let res = reqwest::get(srv.url("/health")).await.unwrap();
    assert_eq!(res.status(), StatusCode::OK);
}

#[tokio::test]
async fn tenant_header_required_for_tenant_routes() {
    let srv = TestServer::spawn().await;
    let res = reqwest::Client::new().get(srv.url("/triggers")).send().await.unwrap();
    assert_eq!(res.status(), StatusCode::UNAUTHORIZED);
    let body: Value = res.json().await.unwrap();
    assert_eq!(body["error"], "unauthorized");
}

#[tokio::test]
async fn lists_built_in_triggers() {
    let srv = TestServer::spawn().await;
    let triggers: Vec<Value> = reqwest::Client::new()
        .get(srv.url("/triggers"))
        .header("X-Tenant-Id", TENANT)
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(triggers.len(), 3);
    assert!(triggers.iter().any(|t| t["id"] == RR && t["type"] == "REQUEST_RESPONSE"));
}

#[tokio::test]
async fn request_response_invocation_round_trip() {
    let srv = TestServer::spawn().await;
    let client = reqwest::Client::new();

    let res = subscribe(&client, &srv, http_subscription(RR)).await;
    assert_eq!(res.status(), StatusCode::CREATED);

    let invocations: Vec<Value> = client
        .post(srv.url("/trigger-invocations/start"))
        .header("X-Tenant-Id", TENANT)
        .header("X-Request-Id", "req-42")
        .json(&json!({
            "triggerId": RR,
            "input": { "accessRequestId": "ar-1", "requestedFor": "u1" }
        }))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(invocations.len(), 1);
    let id = invocations[0]["id"].as_str().unwrap().to_string();
    let secret = invocations[0]["secret"].as_str().unwrap().to_string();
    assert!(!secret.is_empty());

    status_eventually(&client, &srv, &id, false).await;

    let wrong = client
        .post(srv.url(&format!("/trigger-invocations/{id}/complete")))
        .header("X-Tenant-Id", TENANT)
        .json(&json!({ "secret": "not-it", "output": { "approved": true } }))
        .send()
        .await
        .unwrap();
    assert_eq!(wrong.status(), StatusCode::UNAUTHORIZED);

    let ok = client
        .post(srv.url(&format!("/trigger-invocations/{id}/complete")))
        .header("X-Tenant-Id", TENANT)
        .json(&json!({ "secret": secret, "output": { "approved": true } }))
        .send()
        .await
        .unwrap();
    assert_eq!(ok.status(), StatusCode::NO_CONTENT);

    let status = status_eventually(&client, &srv, &id, true).await;
    assert_eq!(status["completeInvocationInput"]["output"], json!({ "approved": true }));

    let again = client
        .post(srv.url(&format!("/trigger-invocations/{id}/complete")))
        .header("X-Tenant-Id", TENANT)
        .json(&json!({ "secret": secret, "output": { "approved": true } }))
        .send()
        .await
        .unwrap();
    assert_eq!(again.status(), StatusCode::NOT_FOUND);

    let requests = srv.deliverer.requests();
    assert_eq!(requests.len(), 1);
}

#[tokio::test]
async fn duplicate_request_response_subscription_conflicts() {
    let srv = TestServer::spawn().await;
    let client = reqwest::Client::new();

    assert_eq!(subscribe(&client, &srv, http_subscription(RR)).await.status(), StatusCode::CREATED);
    let res = subscribe(&client, &srv, http_subscription(RR)).await;
    assert_eq!(res.status(), StatusCode::CONFLICT);
    let body: Value = res.json().await.unwrap();
    assert_eq!(body["error"], "conflict");

    assert_eq!(subscribe(&client, &srv, http_subscription(FF)).await.status(), StatusCode::CREATED);
    assert_eq!(subscribe(&client, &srv, http_subscription(FF)).await.status(), StatusCode::CREATED);

    let list: Vec<Value> = client
        .get(srv.url("/trigger-subscriptions"))
        .query(&[("filters", format!("triggerId eq \"{FF}\""))])
        .header("X-Tenant-Id", TENANT)
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(list.len(), 2);
}

#[tokio::test]
async fn domain_event_reaches_fire_and_forget_subscription() {
    let srv = TestServer::spawn().await;
    let client = reqwest::Client::new();
    assert_eq!(subscribe(&client, &srv, http_subscription(FF)).await.status(), StatusCode::CREATED);

    let res = client
        .post(srv.url("/domain-events"))
        .header("X-Tenant-Id", TENANT)
        .json(&json!({
            "topic": "identity",
            "eventType": "IDENTITY_CREATED",
            "payload": { "identity": { "id": "2c91", "name": "ada" } }
        }))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::ACCEPTED);

    for _ in 0..200 {
        if !srv.deliverer.requests().is_empty() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    let requests = srv.deliverer.requests();
    assert_eq!(requests.len(), 1);
    assert_eq!(requests[0].trigger_id.as_str(), FF);
}

#[tokio::test]
async fn malformed_and_unknown_ids() {
    let srv = TestServer::spawn().await;
    let client = reqwest::Client::new();

    let bad = client
        .get(srv.url("/trigger-subscriptions/not-a-uuid"))
        .header("X-Tenant-Id", TENANT)
        .send()
        .await
        .unwrap();
    assert_eq!(bad.status(), StatusCode::BAD_REQUEST);

    let missing = client
        .post(srv.url("/trigger-invocations/0190f0a8-3c1e-7cc0-8000-000000000000/complete"))
        .header("X-Tenant-Id", TENANT)
        .json(&json!({ "secret": "s" }))
        .send()
        .await
        .unwrap();
    assert_eq!(missing.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn validate_filter_reports_match_and_rejects_garbage() {
    let srv = TestServer::spawn().await;
    let client = reqwest::Client::new();

    let ok: Value = client
        .post(srv.url("/trigger-subscriptions/validate-filter"))
        .header("X-Tenant-Id", TENANT)
        .json(&json!({ "filter": "$.identity.name", "input": { "identity": { "name": "ada" } } }))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(ok["isValid"], true);

    let bad = client
        .post(srv.url("/trigger-subscriptions/validate-filter"))
        .header("X-Tenant-Id", TENANT)
        .json(&json!({ "filter": "$.", "input": {} }))
        .send()
        .await
        .unwrap();
    assert_eq!(bad.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn active_invocations_listed_until_tenant_data_deleted() {
    let srv = TestServer::spawn().await;
    let client = reqwest::Client::new();
    assert_eq!(subscribe(&client, &srv, http_subscription(RR)).await.status(), StatusCode::CREATED);

    let started = client
        .post(srv.url("/trigger-invocations/start"))
        .header("X-Tenant-Id", TENANT)
        .json(&json!({
            "triggerId": RR,
            "input": { "accessRequestId": "ar-2", "requestedFor": "u2" }
        }))
        .send()
        .await
        .unwrap();
    assert_eq!(started.status(), StatusCode::OK);

    let active: Vec<Value> = client
        .get(srv.url("/active-invocations"))
        .header("X-Tenant-Id", TENANT)
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(active.len(), 1);
    assert_eq!(active[0]["triggerId"], RR);
    assert!(active[0].get("secret").is_none());

    let deleted: Value = client
        .delete(srv.url("/tenant-data"))
        .header("X-Tenant-Id", TENANT)
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(deleted["subscriptionsDeleted"], 1);

    let active: Vec<Value> = client
        .get(srv.url("/active-invocations"))
        .header("X-Tenant-Id", TENANT)
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert!(active.is_empty());
}

#[tokio::test]
async fn subscription_credentials_never_leave_the_service() {
    let srv = TestServer::spawn().await;
    let client = reqwest::Client::new();

    let mut body = http_subscription(FF);
    body["config"] = json!({
        "url": "https://hooks.example.com/ets",
        "httpAuthenticationType": "BASIC_AUTH",
        "basicAuthConfig": { "userName": "svc", "password": "hunter2" }
    });
    let res = subscribe(&client, &srv, body.clone()).await;
    assert_eq!(res.status(), StatusCode::CREATED);
    let created: Value = res.json().await.unwrap();
    assert_eq!(created["config"]["basicAuthConfig"], json!({ "userName": "svc" }));
    let id = created["id"].as_str().unwrap().to_string();

    let fetched: Value = client
        .get(srv.url(&format!("/trigger-subscriptions/{id}")))
        .header("X-Tenant-Id", TENANT)
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert!(fetched["config"]["basicAuthConfig"].get("password").is_none());

    let listed: Vec<Value> = client
        .get(srv.url("/trigger-subscriptions"))
        .header("X-Tenant-Id", TENANT)
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(listed.len(), 1);
    assert!(listed[0]["config"]["basicAuthConfig"].get("password").is_none());

    body["config"] = json!({
        "url": "https://hooks.example.com/ets",
        "httpAuthenticationType": "BEARER_TOKEN",
        "bearerTokenAuthConfig": { "bearerToken": "tok-1" }
    });
    let updated = client
        .put(srv.url(&format!("/trigger-subscriptions/{id}")))
        .header("X-Tenant-Id", TENANT)
        .json(&body)
        .send()
        .await
        .unwrap();
    assert_eq!(updated.status(), StatusCode::OK);
    let updated: Value = updated.json().await.unwrap();
    assert!(updated["config"]["bearerTokenAuthConfig"].get("bearerToken").is_none());
    assert!(!updated.to_string().contains("tok-1"));

    // Stored config keeps the credential for delivery.
    let tenant = ets_core::TenantId::new(TENANT).unwrap();
    let stored = srv
        .services
        .service
        .get_subscription(&tenant, id.parse().unwrap())
        .unwrap();
    assert_eq!(stored.config["bearerTokenAuthConfig"]["bearerToken"], "tok-1");
}

#[tokio::test]
async fn callback_without_invocation_id_is_accepted_and_ignored() {
    let srv = TestServer::spawn().await;
    let client = reqwest::Client::new();
    assert_eq!(subscribe(&client, &srv, http_subscription(RR)).await.status(), StatusCode::CREATED);

    let invocations: Vec<Value> = client
        .post(srv.url("/trigger-invocations/start"))
        .header("X-Tenant-Id", TENANT)
        .json(&json!({ "triggerId": RR, "input": { "accessRequestId": "ar-1" } }))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    let id = invocations[0]["id"].as_str().unwrap().to_string();
    let secret = invocations[0]["secret"].as_str().unwrap().to_string();
    status_eventually(&client, &srv, &id, false).await;

    let ignored = client
        .post(srv.url(&format!("/trigger-invocations/{id}/complete")))
        .header("X-Tenant-Id", TENANT)
        .json(&json!({
            "output": { "approved": true },
            "_metadata": { "triggerId": RR, "triggerType": "requestResponse" }
        }))
        .send()
        .await
        .unwrap();
    assert!(ignored.status().is_success());

    // Still outstanding: the echoed metadata with an id completes it.
    let completed = client
        .post(srv.url(&format!("/trigger-invocations/{id}/complete")))
        .header("X-Tenant-Id", TENANT)
        .json(&json!({
            "output": { "approved": true },
            "_metadata": { "invocationId": id, "secret": secret }
        }))
        .send()
        .await
        .unwrap();
    assert_eq!(completed.status(), StatusCode::NO_CONTENT);
    status_eventually(&client, &srv, &id, true).await;
}

#[tokio::test]
async fn metrics_snapshot_reports_started_invocations() {
    let srv = TestServer::spawn().await;
    let client = reqwest::Client::new();
    assert_eq!(subscribe(&client, &srv, http_subscription(FF)).await.status(), StatusCode::CREATED);

    let res = client
        .post(srv.url("/trigger-invocations/start"))
        .header("X-Tenant-Id", TENANT)
        .json(&json!({ "triggerId": FF, "input": { "identity": { "id": "2c91" } } }))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);

    let snapshot: Value = reqwest::get(srv.url("/metrics")).await.unwrap().json().await.unwrap();
    let started = snapshot["counters"]
        .as_array()
        .unwrap()
        .iter()
        .filter(|c| c["name"] == "ets_invocation_started" && c["labels"]["trigger_id"] == FF)
        .map(|c| c["value"].as_u64().unwrap())
        .sum::<u64>();
    assert!(started >= 1);
}
