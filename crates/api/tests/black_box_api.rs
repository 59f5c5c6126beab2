use std::sync::Arc;

use reqwest::StatusCode;
use serde_json::{Value, json};
use uuid::Uuid;

use stockledger_api::app::{self, AppServices};
use stockledger_infra::EngineConfig;

struct TestServer {
    base_url: String,
    actor: String,
    client: reqwest::Client,
    handle: tokio::task::JoinHandle<()>,
}

impl TestServer {
    async fn spawn() -> Self {
        // Same router as prod, bound to an ephemeral port.
        let config = EngineConfig {
            lock_timeout_ms: 200,
            ..EngineConfig::default()
        };
        let services = Arc::new(AppServices::in_memory(config).expect("failed to build services"));
        let app = app::build_app(services);
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
            actor: Uuid::now_v7().to_string(),
            client: reqwest::Client::new(),
            handle,
        }
    }

    async fn get(&self, path: &str) -> (StatusCode, Value) {
        let res = self
            .client
            .get(format!("{}{}", self.base_url, path))
            .header("x-user-id", &self.actor)
            .send()
            .await
            .unwrap();
        let status = res.status();
        (status, res.json().await.unwrap_or(Value::Null))
    }

    async fn send(&self, method: reqwest::Method, path: &str, body: Value) -> (StatusCode, Value) {
        let res = self
            .client
            .request(method, format!("{}{}", self.base_url, path))
            .header("x-user-id", &self.actor)
            .json(&body)
            .send()
            .await
            .unwrap();
        let status = res.status();
        (status, res.json().await.unwrap_or(Value::Null))
    }

    async fn post(&self, path: &str, body: Value) -> (StatusCode, Value) {
        self.send(reqwest::Method::POST, path, body).await
    }

    async fn register(&self, sku: &str, min: u64, max: u64) -> String {
        let (status, item) = self
            .post(
                "/items",
                json!({
                    "sku": sku,
                    "name": format!("{sku} widget"),
                    "min_quantity": min,
                    "max_quantity": max,
                    "cost_price": 1000,
                    "selling_price": 1500,
                }),
            )
            .await;
        assert_eq!(status, StatusCode::CREATED, "{item}");
        item["product_id"].as_str().unwrap().to_string()
    }

    async fn process(&self, movement_type: &str, sub_type: &str, product_id: &str, qty: u64) -> (StatusCode, Value) {
        self.post(
            "/movements/process",
            json!({
                "movement_type": movement_type,
                "sub_type": sub_type,
                "lines": [{ "product_id": product_id, "quantity": qty }],
            }),
        )
        .await
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

#[tokio::test]
async fn health_is_public() {
    let server = TestServer::spawn().await;
    let res = reqwest::get(format!("{}/health", server.base_url)).await.unwrap();
    assert_eq!(res.status(), StatusCode::OK);
}

#[tokio::test]
async fn ledger_routes_require_an_actor() {
    let server = TestServer::spawn().await;

    let res = reqwest::get(format!("{}/items", server.base_url)).await.unwrap();
    assert_eq!(res.status(), StatusCode::BAD_REQUEST);
    let body: Value = res.json().await.unwrap();
    assert_eq!(body["error"], "missing_actor");

    let res = server
        .client
        .get(format!("{}/items", server.base_url))
        .header("x-user-id", "nobody")
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn receive_ship_and_reject_oversell() {
    let server = TestServer::spawn().await;
    let product = server.register("SKU-001", 10, 100).await;

    let (status, movement) = server.process("inbound", "purchase", &product, 50).await;
    assert_eq!(status, StatusCode::CREATED, "{movement}");
    assert_eq!(movement["status"], "completed");
    assert!(movement["receipt_number"].as_str().unwrap().starts_with("INB"));

    let (_, item) = server.get("/items/SKU-001").await;
    assert_eq!(item["quantity"], 50);
    assert_eq!(item["status"], "in_stock");

    let (status, _) = server.process("outbound", "sale", &product, 45).await;
    assert_eq!(status, StatusCode::CREATED);

    let (_, item) = server.get("/items/SKU-001").await;
    assert_eq!(item["quantity"], 5);
    assert_eq!(item["status"], "low_stock");

    let (_, alerts) = server.get("/alerts").await;
    let alerts = alerts.as_array().unwrap();
    assert_eq!(alerts.len(), 1);
    assert_eq!(alerts[0]["alert_type"], "low_stock");

    let (status, err) = server.process("outbound", "sale", &product, 10).await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(err["error"], "insufficient_stock");
    assert_eq!(err["requested"], 10);
    assert_eq!(err["available"], 5);

    let (_, item) = server.get("/items/SKU-001").await;
    assert_eq!(item["quantity"], 5);
}

#[tokio::test]
async fn staged_movement_workflow() {
    let server = TestServer::spawn().await;
    let product = server.register("SKU-STAGED", 1, 100).await;

    let (status, draft) = server
        .post(
            "/movements",
            json!({
                "movement_type": "inbound",
                "sub_type": "purchase",
                "lines": [{ "product_id": product, "quantity": 20 }],
            }),
        )
        .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(draft["status"], "draft");
    let id = draft["id"].as_str().unwrap().to_string();

    // completing a draft is an invalid transition
    let (status, err) = server.post(&format!("/movements/{id}/complete"), json!({})).await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(err["error"], "invalid_transition");

    for step in ["submit", "approve", "complete"] {
        let (status, body) = server.post(&format!("/movements/{id}/{step}"), json!({})).await;
        assert_eq!(status, StatusCode::OK, "{step}: {body}");
    }

    let (_, movement) = server.get(&format!("/movements/{id}")).await;
    assert_eq!(movement["status"], "completed");
    let (_, item) = server.get("/items/SKU-STAGED").await;
    assert_eq!(item["quantity"], 20);

    let (status, reversal) = server.post(&format!("/movements/{id}/reverse"), json!({})).await;
    assert_eq!(status, StatusCode::CREATED, "{reversal}");
    assert_eq!(reversal["status"], "draft");
    assert_eq!(reversal["movement_type"], "adjustment");
    let reversal_id = reversal["id"].as_str().unwrap().to_string();
    for step in ["submit", "approve", "complete"] {
        let (status, body) = server
            .post(&format!("/movements/{reversal_id}/{step}"), json!({}))
            .await;
        assert_eq!(status, StatusCode::OK, "{step}: {body}");
    }
    let (_, item) = server.get("/items/SKU-STAGED").await;
    assert_eq!(item["quantity"], 0);

    let (_, completed) = server.get("/movements?status=completed").await;
    assert_eq!(completed.as_array().unwrap().len(), 2);
}

#[tokio::test]
async fn stock_check_applies_discrepancy_on_approval() {
    let server = TestServer::spawn().await;
    let product = server.register("SKU-CHK", 2, 100).await;
    server.process("inbound", "purchase", &product, 10).await;

    let (status, check) = server.post("/checks", json!({ "kind": "skus", "skus": ["SKU-CHK"] })).await;
    assert_eq!(status, StatusCode::CREATED, "{check}");
    assert!(check["check_number"].as_str().unwrap().starts_with("SC"));
    let id = check["id"].as_str().unwrap().to_string();

    server.post(&format!("/checks/{id}/start"), json!({})).await;
    let (status, _) = server
        .post(
            &format!("/checks/{id}/counts"),
            json!({ "sku": "SKU-CHK", "actual_quantity": 7 }),
        )
        .await;
    assert_eq!(status, StatusCode::OK);

    // counting alone never touches stock
    let (_, item) = server.get("/items/SKU-CHK").await;
    assert_eq!(item["quantity"], 10);

    let (_, completed) = server.post(&format!("/checks/{id}/complete"), json!({})).await;
    assert_eq!(completed["discrepancy_items"], 1);

    let (status, approved) = server.post(&format!("/checks/{id}/approve"), json!({})).await;
    assert_eq!(status, StatusCode::OK, "{approved}");
    assert_eq!(approved["status"], "approved");
    assert!(approved["adjustment_movement_id"].is_string());

    let (_, item) = server.get("/items/SKU-CHK").await;
    assert_eq!(item["quantity"], 7);
}

#[tokio::test]
async fn unknown_records_are_not_found() {
    let server = TestServer::spawn().await;

    let (status, _) = server.get("/items/NOPE").await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, err) = server.get(&format!("/movements/{}", Uuid::now_v7())).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(err["error"], "not_found");

    let (status, _) = server
        .process("inbound", "purchase", &Uuid::now_v7().to_string(), 1)
        .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn duplicate_sku_conflicts() {
    let server = TestServer::spawn().await;
    server.register("SKU-DUP", 1, 10).await;

    let (status, err) = server
        .post(
            "/items",
            json!({
                "sku": "SKU-DUP",
                "min_quantity": 1,
                "max_quantity": 10,
                "cost_price": 1,
                "selling_price": 2,
            }),
        )
        .await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(err["error"], "conflict");
}

#[tokio::test]
async fn order_reservation_backorders_then_fulfills() {
    let server = TestServer::spawn().await;
    let product = server.register("SKU-ORD", 1, 100).await;
    server.process("inbound", "purchase", &product, 3).await;

    let (status, outcome) = server
        .post(
            "/orders/ORD-1/reserve",
            json!({ "lines": [{ "product_id": product, "quantity": 5 }] }),
        )
        .await;
    assert_eq!(status, StatusCode::ACCEPTED);
    assert_eq!(outcome["outcome"], "backorder");
    assert_eq!(outcome["shortages"][0]["available"], 3);

    let (status, outcome) = server
        .post(
            "/orders/ORD-2/reserve",
            json!({ "lines": [{ "product_id": product, "quantity": 2 }] }),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(outcome["outcome"], "fulfilled");

    // same order again: no second deduction
    let (_, again) = server
        .post(
            "/orders/ORD-2/reserve",
            json!({ "lines": [{ "product_id": product, "quantity": 2 }] }),
        )
        .await;
    assert_eq!(again["movement"]["id"], outcome["movement"]["id"]);

    let (_, item) = server.get("/items/SKU-ORD").await;
    assert_eq!(item["quantity"], 1);
}

#[tokio::test]
async fn notifications_are_sequenced() {
    let server = TestServer::spawn().await;
    let product = server.register("SKU-NTF", 1, 100).await;
    server.process("inbound", "purchase", &product, 5).await;

    let (_, all) = server.get("/notifications").await;
    let all = all.as_array().unwrap();
    assert!(!all.is_empty());

    let first = all[0]["sequence_number"].as_u64().unwrap();
    let (_, later) = server.get(&format!("/notifications?after={first}")).await;
    assert_eq!(later.as_array().unwrap().len(), all.len() - 1);
}
