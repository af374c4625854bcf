//! HTTP round trips against the admin API.
//!
//! The server runs in-process on a free port with the SQLite store and
//! collaborator fakes; requests go through `reqwest`.

use std::sync::Arc;

use serde_json::{json, Value};
use tempfile::TempDir;

use vector_sync::app::build_service_with;
use vector_sync::config::Config;
use vector_sync::migrate;
use vector_sync::server::run_server_with_service;
use vector_sync_core::collaborators::ProbeOutcome;
use vector_sync_core::testing::Fakes;

// ─── Helpers ────────────────────────────────────────────────────────

fn test_config_with_port(tmp: &TempDir, port: u16) -> Config {
    let db_path = tmp.path().join("vsync.sqlite");
    let config_content = format!(
        r#"
[db]
path = "{}"

[server]
bind = "127.0.0.1:{}"
"#,
        db_path.display(),
        port
    );
    toml::from_str(&config_content).unwrap()
}

fn find_free_port() -> u16 {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    listener.local_addr().unwrap().port()
}

async fn wait_for_server(port: u16) {
    let client = reqwest::Client::new();
    let url = format!("http://127.0.0.1:{}/health", port);
    for _ in 0..50 {
        tokio::time::sleep(std::time::Duration::from_millis(100)).await;
        if let Ok(resp) = client.get(&url).send().await {
            if resp.status().is_success() {
                return;
            }
        }
    }
    panic!("Server did not become ready within 5 seconds");
}

struct Server {
    _tmp: TempDir,
    base: String,
    fakes: Fakes,
    client: reqwest::Client,
}

async fn start(installations: &[i64]) -> Server {
    let tmp = TempDir::new().unwrap();
    let port = find_free_port();
    let cfg = test_config_with_port(&tmp, port);
    migrate::run_migrations(&cfg).await.unwrap();

    let fakes = Fakes::new(installations);
    let service = build_service_with(&cfg, fakes.collaborators())
        .await
        .unwrap();
    let server_cfg = Arc::new(cfg);
    tokio::spawn(async move {
        run_server_with_service(&server_cfg, service).await.unwrap();
    });
    wait_for_server(port).await;

    Server {
        _tmp: tmp,
        base: format!("http://127.0.0.1:{}", port),
        fakes,
        client: reqwest::Client::new(),
    }
}

impl Server {
    async fn call(&self, method: reqwest::Method, path: &str, body: Option<Value>) -> (u16, Value) {
        let mut req = self.client.request(method, format!("{}{}", self.base, path));
        if let Some(body) = body {
            req = req.json(&body);
        }
        let resp = req.send().await.unwrap();
        let status = resp.status().as_u16();
        (status, resp.json().await.unwrap())
    }

    async fn register_widgets(&self) -> String {
        self.fakes
            .probe
            .set(1, "acme/widgets", ProbeOutcome::Reachable);
        let (status, body) = self
            .call(
                reqwest::Method::POST,
                "/sources/repository",
                Some(json!({
                    "teamId": "team-1",
                    "owner": "acme",
                    "name": "widgets",
                    "installationId": 1,
                    "contentTypes": [
                        { "contentType": "blob", "enabled": true },
                        { "contentType": "pull_request", "enabled": false }
                    ],
                    "profileIds": [1]
                })),
            )
            .await;
        assert_eq!(status, 200, "register failed: {}", body);
        body["data"]["id"].as_str().unwrap().to_string()
    }
}

// ─── Tests ──────────────────────────────────────────────────────────

#[tokio::test]
async fn test_health() {
    let server = start(&[1]).await;
    let (status, body) = server
        .call(reqwest::Method::GET, "/health", None)
        .await;
    assert_eq!(status, 200);
    assert_eq!(body["status"], "ok");
}

#[tokio::test]
async fn test_register_ingest_report_round_trip() {
    let server = start(&[1]).await;
    let id = server.register_widgets().await;

    let (_, body) = server
        .call(reqwest::Method::GET, "/teams/team-1/sources", None)
        .await;
    assert_eq!(body["success"], true);
    let sources = body["data"].as_array().unwrap();
    assert_eq!(sources.len(), 1);
    assert_eq!(sources[0]["kind"], "repository");
    assert_eq!(sources[0]["owner"], "acme");
    assert_eq!(sources[0]["canManuallyIngest"], true);
    assert_eq!(sources[0]["statuses"][0]["status"], "idle");

    let (status, body) = server
        .call(reqwest::Method::POST, &format!("/sources/{}/ingest", id), None)
        .await;
    assert_eq!(status, 200);
    assert_eq!(body["data"]["started"], true);

    let (status, body) = server
        .call(reqwest::Method::POST, &format!("/sources/{}/ingest", id), None)
        .await;
    assert_eq!(status, 200);
    assert_eq!(body["data"]["started"], false);
    assert_eq!(body["data"]["reason"], "already-running");

    let (status, body) = server
        .call(
            reqwest::Method::POST,
            "/results",
            Some(json!({
                "sourceId": id,
                "contentType": "blob",
                "profileId": 1,
                "outcome": "failed",
                "errorCode": "NOT_FOUND"
            })),
        )
        .await;
    assert_eq!(status, 200);
    assert_eq!(body["data"]["applied"], true);

    let (_, body) = server
        .call(reqwest::Method::GET, &format!("/sources/{}", id), None)
        .await;
    let row = &body["data"]["statuses"][0];
    assert_eq!(row["status"], "failed");
    assert_eq!(row["errorCode"], "NOT_FOUND");
    assert!(row["retryAfter"].is_string());
    assert_eq!(body["data"]["canManuallyIngest"], false);
    assert_eq!(body["data"]["needsDiagnosis"], true);
}

#[tokio::test]
async fn test_jobs_are_listed_then_taken() {
    let server = start(&[1]).await;
    let id = server.register_widgets().await;

    let (_, body) = server
        .call(reqwest::Method::POST, &format!("/sources/{}/ingest", id), None)
        .await;
    assert_eq!(body["data"]["started"], true);

    let (status, body) = server
        .call(reqwest::Method::GET, "/jobs", None)
        .await;
    assert_eq!(status, 200);
    let pending = body["data"].as_array().unwrap().clone();
    assert_eq!(pending.len(), 1);
    assert_eq!(pending[0]["sourceId"], id.as_str());
    assert_eq!(pending[0]["contentType"], "blob");
    assert_eq!(pending[0]["trigger"], "manual");

    let (status, body) = server
        .call(reqwest::Method::POST, "/jobs/take?limit=5", None)
        .await;
    assert_eq!(status, 200);
    assert_eq!(body["data"].as_array().unwrap(), &pending);

    let (_, body) = server
        .call(reqwest::Method::POST, "/jobs/take", None)
        .await;
    assert!(body["data"].as_array().unwrap().is_empty());
}

#[tokio::test]
async fn test_errors_are_action_results() {
    let server = start(&[1]).await;
    let id = server.register_widgets().await;

    // Duplicate registration
    server
        .fakes
        .probe
        .set(1, "acme/widgets", ProbeOutcome::Reachable);
    let (status, body) = server
        .call(
            reqwest::Method::POST,
            "/sources/repository",
            Some(json!({
                "teamId": "team-1",
                "owner": "acme",
                "name": "widgets",
                "installationId": 1,
                "profileIds": [1]
            })),
        )
        .await;
    assert_eq!(status, 409);
    assert_eq!(body["success"], false);
    assert_eq!(body["code"], "duplicate_source");

    // Empty profile selection
    let (status, body) = server
        .call(
            reqwest::Method::PUT,
            &format!("/sources/{}/profiles", id),
            Some(json!({ "profileIds": [] })),
        )
        .await;
    assert_eq!(status, 400);
    assert_eq!(body["code"], "no_profile_selected");

    // Unknown source
    let (status, body) = server
        .call(reqwest::Method::GET, "/sources/does-not-exist", None)
        .await;
    assert_eq!(status, 404);
    assert_eq!(body["code"], "not_found");

    // Malformed body
    let (status, body) = server
        .call(
            reqwest::Method::POST,
            "/sources/repository",
            Some(json!({ "teamId": "team-1" })),
        )
        .await;
    assert_eq!(status, 400);
    assert_eq!(body["code"], "invalid_input");

    // Missing identity
    let (status, body) = server
        .call(
            reqwest::Method::GET,
            &format!("/sources/{}/diagnosis", id),
            None,
        )
        .await;
    assert_eq!(status, 400);
    assert_eq!(body["code"], "invalid_input");
}

#[tokio::test]
async fn test_diagnosis_and_fix() {
    let server = start(&[1, 2]).await;
    let id = server.register_widgets().await;

    server.fakes.probe.revoke_all();
    let (_, body) = server
        .call(
            reqwest::Method::GET,
            &format!("/sources/{}/diagnosis?identity=octocat", id),
            None,
        )
        .await;
    assert_eq!(
        body["data"],
        json!({ "canBeFixed": false, "reason": "no-installation" })
    );

    server
        .fakes
        .probe
        .set(2, "acme/widgets", ProbeOutcome::Reachable);
    let (_, body) = server
        .call(
            reqwest::Method::GET,
            &format!("/sources/{}/diagnosis?identity=octocat", id),
            None,
        )
        .await;
    assert_eq!(body["data"]["canBeFixed"], true);
    let scope = body["data"]["newScope"].clone();
    assert_eq!(scope["installationId"], 2);

    let (status, body) = server
        .call(
            reqwest::Method::POST,
            &format!("/sources/{}/diagnosis/fix", id),
            Some(scope),
        )
        .await;
    assert_eq!(status, 200);
    assert_eq!(body["data"]["installationId"], 2);
}

#[tokio::test]
async fn test_deregister_is_idempotent() {
    let server = start(&[1]).await;
    let id = server.register_widgets().await;

    for _ in 0..2 {
        let (status, body) = server
            .call(reqwest::Method::DELETE, &format!("/sources/{}", id), None)
            .await;
        assert_eq!(status, 200);
        assert_eq!(body, json!({ "success": true }));
    }

    let (_, body) = server
        .call(reqwest::Method::GET, "/teams/team-1/sources", None)
        .await;
    assert_eq!(body["data"], json!([]));
}
