use std::sync::Arc;

use reqwest::StatusCode;
use serde_json::{Value, json};

use ske_api::AppConfig;
use ske_api::app::{build_app, services::{AppServices, build_in_memory_services}};
use ske_core::EntityId;
use ske_events::{ENTITY_CREATED_TOPIC, MessageChannel};

struct TestServer {
    base_url: String,
    services: Arc<AppServices>,
    handle: tokio::task::JoinHandle<()>,
}

impl TestServer {
    async fn spawn() -> Self {
        Self::spawn_with(AppConfig::in_memory()).await
    }

    async fn spawn_with(config: AppConfig) -> Self {
        // Build app (same router as prod), but bind to an ephemeral port.
        let services = Arc::new(build_in_memory_services(&config));
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
            handle,
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    async fn create(&self, client: &reqwest::Client, title: &str) -> Value {
        let res = client
            .post(self.url("/entities"))
            .json(&json!({ "title": title }))
            .send()
            .await
            .unwrap();
        assert_eq!(res.status(), StatusCode::CREATED);
        res.json().await.unwrap()
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

async fn assert_error(res: reqwest::Response, status: StatusCode, code: &str) {
    assert_eq!(res.status(), status);
    let body: Value = res.json().await.unwrap();
    assert_eq!(body["error"], code, "unexpected body: {body}");
    assert!(body["message"].is_string());
}

#[tokio::test]
async fn health_is_ok() {
    let srv = TestServer::spawn().await;
    let res = reqwest::get(srv.url("/health")).await.unwrap();
    assert_eq!(res.status(), StatusCode::OK);
}

#[tokio::test]
async fn entity_lifecycle_draft_to_final_to_deleted() {
    let srv = TestServer::spawn().await;
    let client = reqwest::Client::new();

    // Create
    let created = srv.create(&client, "Draft").await;
    let id = created["id"].as_str().unwrap().to_string();
    assert_eq!(created["title"], "Draft");
    assert_eq!(created["created_at"], created["updated_at"]);
    assert!(id.parse::<EntityId>().is_ok());

    // Empty patch: title kept, updated_at advanced
    let res = client
        .patch(srv.url(&format!("/entities/{id}")))
        .json(&json!({}))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    let touched: Value = res.json().await.unwrap();
    assert_eq!(touched["title"], "Draft");
    assert_eq!(touched["created_at"], created["created_at"]);
    assert_ne!(touched["updated_at"], created["updated_at"]);

    // Rename
    let res = client
        .patch(srv.url(&format!("/entities/{id}")))
        .json(&json!({ "title": "Final" }))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    let renamed: Value = res.json().await.unwrap();
    assert_eq!(renamed["title"], "Final");

    // Get reflects the rename
    let fetched: Value = client
        .get(srv.url(&format!("/entities/{id}")))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(fetched, renamed);

    // Delete
    let res = client
        .delete(srv.url(&format!("/entities/{id}")))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::NO_CONTENT);

    // Gone
    let res = client.get(srv.url(&format!("/entities/{id}"))).send().await.unwrap();
    assert_error(res, StatusCode::NOT_FOUND, "not_found").await;

    // Deleting again reports not found
    let res = client
        .delete(srv.url(&format!("/entities/{id}")))
        .send()
        .await
        .unwrap();
    assert_error(res, StatusCode::NOT_FOUND, "not_found").await;
}

#[tokio::test]
async fn whitespace_title_is_created_verbatim() {
    let srv = TestServer::spawn().await;
    let client = reqwest::Client::new();

    let created = srv.create(&client, " ").await;
    assert_eq!(created["title"], " ");

    let id = created["id"].as_str().unwrap();
    let fetched: Value = client
        .get(srv.url(&format!("/entities/{id}")))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(fetched["title"], " ");
}

#[tokio::test]
async fn invalid_titles_are_rejected_and_nothing_changes() {
    let srv = TestServer::spawn().await;
    let client = reqwest::Client::new();

    for body in [json!({ "title": "" }), json!({})] {
        let res = client.post(srv.url("/entities")).json(&body).send().await.unwrap();
        assert_error(res, StatusCode::BAD_REQUEST, "validation_error").await;
    }
    let listed: Vec<Value> = client
        .get(srv.url("/entities"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert!(listed.is_empty());

    let created = srv.create(&client, "Keep me").await;
    let id = created["id"].as_str().unwrap();
    let res = client
        .patch(srv.url(&format!("/entities/{id}")))
        .json(&json!({ "title": "" }))
        .send()
        .await
        .unwrap();
    assert_error(res, StatusCode::BAD_REQUEST, "validation_error").await;

    let fetched: Value = client
        .get(srv.url(&format!("/entities/{id}")))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(fetched, created);
}

#[tokio::test]
async fn malformed_requests_get_typed_errors() {
    let srv = TestServer::spawn().await;
    let client = reqwest::Client::new();

    let res = client.get(srv.url("/entities/not-a-uuid")).send().await.unwrap();
    assert_error(res, StatusCode::BAD_REQUEST, "invalid_id").await;

    let res = client.delete(srv.url("/entities/123")).send().await.unwrap();
    assert_error(res, StatusCode::BAD_REQUEST, "invalid_id").await;

    let res = client
        .post(srv.url("/entities"))
        .header("content-type", "application/json")
        .body("{not json")
        .send()
        .await
        .unwrap();
    assert_error(res, StatusCode::BAD_REQUEST, "invalid_body").await;

    let res = client
        .patch(srv.url(&format!("/entities/{}", EntityId::new())))
        .json(&json!({ "title": "x" }))
        .send()
        .await
        .unwrap();
    assert_error(res, StatusCode::NOT_FOUND, "not_found").await;

    for query in ["limit=-1", "offset=-1", "limit=abc"] {
        let res = client
            .get(srv.url(&format!("/entities?{query}")))
            .send()
            .await
            .unwrap();
        assert_error(res, StatusCode::BAD_REQUEST, "invalid_pagination").await;
    }
}

#[tokio::test]
async fn list_is_most_recently_updated_first() {
    let srv = TestServer::spawn().await;
    let client = reqwest::Client::new();

    let a = srv.create(&client, "a").await;
    let b = srv.create(&client, "b").await;
    let c = srv.create(&client, "c").await;

    let page: Vec<Value> = client
        .get(srv.url("/entities?limit=2&offset=0"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(page, vec![c.clone(), b.clone()]);

    // Touching `a` moves it to the front.
    let a_id = a["id"].as_str().unwrap();
    let res = client
        .patch(srv.url(&format!("/entities/{a_id}")))
        .json(&json!({}))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);

    let all: Vec<Value> = client
        .get(srv.url("/entities"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    let titles: Vec<&str> = all.iter().map(|e| e["title"].as_str().unwrap()).collect();
    assert_eq!(titles, ["a", "c", "b"]);

    let rest: Vec<Value> = client
        .get(srv.url("/entities?limit=10&offset=2"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(rest.len(), 1);
    assert_eq!(rest[0]["title"], "b");
}

#[tokio::test]
async fn limit_is_capped_by_configuration() {
    let mut config = AppConfig::in_memory();
    config.pagination = ske_core::PaginationPolicy::new(1, 2).unwrap();
    let srv = TestServer::spawn_with(config).await;
    let client = reqwest::Client::new();

    for title in ["a", "b", "c"] {
        srv.create(&client, title).await;
    }

    let default_page: Vec<Value> = client.get(srv.url("/entities")).send().await.unwrap().json().await.unwrap();
    assert_eq!(default_page.len(), 1);

    let capped: Vec<Value> = client
        .get(srv.url("/entities?limit=50"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(capped.len(), 2);
}

async fn get_eventually(client: &reqwest::Client, srv: &TestServer, id: EntityId) -> Value {
    // Ingestion is asynchronous; poll briefly until the worker catches up.
    for _ in 0..100 {
        let res = client
            .get(srv.url(&format!("/entities/{id}")))
            .send()
            .await
            .unwrap();
        if res.status() == StatusCode::OK {
            return res.json().await.unwrap();
        }
        tokio::time::sleep(std::time::Duration::from_millis(10)).await;
    }
    panic!("entity did not appear within timeout");
}

#[tokio::test]
async fn ingested_messages_become_visible_over_rest() {
    let srv = TestServer::spawn().await;
    let client = reqwest::Client::new();
    let channel = srv.services.in_memory_channel().expect("in-memory channel");

    let id = EntityId::new();
    let message = serde_json::to_vec(&json!({
        "id": id,
        "title": "From queue",
        "created_at": "2020-01-01T00:00:00Z",
    }))
    .unwrap();

    // Delivered twice: one record, both acknowledged.
    channel.publish(ENTITY_CREATED_TOPIC, message.clone()).await.unwrap();
    channel.publish(ENTITY_CREATED_TOPIC, message).await.unwrap();
    channel.publish(ENTITY_CREATED_TOPIC, b"garbage".to_vec()).await.unwrap();

    let fetched = get_eventually(&client, &srv, id).await;
    assert_eq!(fetched["title"], "From queue");
    // Timestamps are owned by the service, not the message.
    assert_ne!(fetched["created_at"], "2020-01-01T00:00:00Z");

    for _ in 0..100 {
        if channel.pending_count() == 0 {
            break;
        }
        tokio::time::sleep(std::time::Duration::from_millis(10)).await;
    }
    assert_eq!(channel.pending_count(), 0);

    let all: Vec<Value> = client.get(srv.url("/entities")).send().await.unwrap().json().await.unwrap();
    assert_eq!(all.len(), 1);

    srv.services.shutdown().await;
}
