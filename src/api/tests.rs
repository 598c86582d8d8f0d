//! HTTP API tests against a live server on an ephemeral port

use super::*;
use crate::config::AuthConfig;
use crate::session::hash_password;
use reqwest::StatusCode as Status;
use serde_json::json;

struct TestServer {
    base: String,
    client: reqwest::Client,
    token: String,
}

impl TestServer {
    async fn start() -> Self {
        let sessions = SessionStore::new(&AuthConfig {
            username: "admin".to_string(),
            password_sha256: Some(hash_password("secret")),
            session_ttl_secs: 600,
        })
        .unwrap();
        let state = Arc::new(AppState::new(Desk::new(["demo-simple"]), sessions));
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, create_router(state)).await.unwrap();
        });

        let base = format!("http://{}", addr);
        let client = reqwest::Client::new();
        let resp = client
            .post(format!("{}/auth/login", base))
            .json(&json!({ "username": "admin", "password": "secret" }))
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), Status::OK);
        let session: Value = resp.json().await.unwrap();
        let token = session["token"].as_str().unwrap().to_string();

        Self { base, client, token }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base, path)
    }

    async fn send(&self, req: reqwest::RequestBuilder) -> (Status, Value) {
        let resp = req.bearer_auth(&self.token).send().await.unwrap();
        let status = resp.status();
        let body = resp.json().await.unwrap_or(Value::Null);
        (status, body)
    }

    async fn post(&self, path: &str, body: Value) -> (Status, Value) {
        self.send(self.client.post(self.url(path)).json(&body)).await
    }

    async fn put(&self, path: &str, body: Value) -> (Status, Value) {
        self.send(self.client.put(self.url(path)).json(&body)).await
    }

    async fn get(&self, path: &str) -> (Status, Value) {
        self.send(self.client.get(self.url(path))).await
    }

    async fn delete(&self, path: &str) -> (Status, Value) {
        self.send(self.client.delete(self.url(path))).await
    }

    /// SIM gateway, funded connected testAccount
    async fn seed(&self) {
        let (status, _) = self
            .post(
                "/gateway",
                json!({ "id": "SIM", "type": "SIM", "subscribedInstruments": ["SIM-RB"] }),
            )
            .await;
        assert_eq!(status, Status::OK);
        let (status, _) = self
            .post("/account", json!({ "id": "testAccount", "boundMarketGateway": "SIM" }))
            .await;
        assert_eq!(status, Status::OK);
        let (status, _) = self
            .post("/account/deposit", json!({ "accountId": "testAccount", "amount": 50000 }))
            .await;
        assert_eq!(status, Status::OK);
        let (status, _) = self
            .post("/gateway/connection?gatewayId=testAccount", Value::Null)
            .await;
        assert_eq!(status, Status::OK);
    }
}

fn module_body() -> Value {
    json!({
        "name": "TESTM",
        "purpose": "LIVE",
        "strategyRef": "demo-simple",
        "operationIntervalSeconds": 600,
        "boundAccount": "testAccount",
        "allocatedCapital": 20000,
        "subscribedInstrument": "SIM-RB"
    })
}

#[tokio::test]
async fn test_health_needs_no_token() {
    let server = TestServer::start().await;
    let resp = server.client.get(server.url("/health")).send().await.unwrap();
    assert_eq!(resp.status(), Status::OK);
    assert_eq!(resp.text().await.unwrap(), "OK");
}

#[tokio::test]
async fn test_missing_or_bad_token_is_401() {
    let server = TestServer::start().await;

    let resp = server.client.get(server.url("/module")).send().await.unwrap();
    assert_eq!(resp.status(), Status::UNAUTHORIZED);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["error"], "UNAUTHORIZED");

    let resp = server
        .client
        .get(server.url("/module"))
        .bearer_auth("not-a-token")
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), Status::UNAUTHORIZED);
}

#[tokio::test]
async fn test_wrong_password_rejected() {
    let server = TestServer::start().await;
    let resp = server
        .client
        .post(server.url("/auth/login"))
        .json(&json!({ "username": "admin", "password": "guess" }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), Status::UNAUTHORIZED);
}

#[tokio::test]
async fn test_logout_invalidates_token() {
    let server = TestServer::start().await;
    let (status, body) = server.post("/auth/logout", Value::Null).await;
    assert_eq!(status, Status::OK);
    assert_eq!(body["loggedOut"], true);

    let (status, _) = server.get("/module").await;
    assert_eq!(status, Status::UNAUTHORIZED);
}

#[tokio::test]
async fn test_module_lifecycle_over_http() {
    let server = TestServer::start().await;
    server.seed().await;

    let (status, body) = server.post("/module", module_body()).await;
    assert_eq!(status, Status::OK);
    assert_eq!(body["state"], "DISABLED");

    let (status, body) = server.put("/module/enabled?name=TESTM&enabled=true", Value::Null).await;
    assert_eq!(status, Status::OK);
    assert_eq!(body["state"], "RUNNING");

    // running modules cannot go
    let (status, body) = server.delete("/module?name=TESTM").await;
    assert_eq!(status, Status::INTERNAL_SERVER_ERROR);
    assert_eq!(body["error"], "CONFLICT");

    let (status, body) = server.put("/module/toggle?name=TESTM", Value::Null).await;
    assert_eq!(status, Status::OK);
    assert_eq!(body["enabled"], false);

    let (status, _) = server.delete("/module?name=TESTM").await;
    assert_eq!(status, Status::OK);
    let (_, body) = server.get("/module").await;
    assert_eq!(body.as_array().unwrap().len(), 0);
}

#[tokio::test]
async fn test_delete_bound_account_returns_500() {
    let server = TestServer::start().await;
    server.seed().await;
    server.post("/module", module_body()).await;

    let (status, body) = server.delete("/gateway?gatewayId=testAccount").await;
    assert_eq!(status, Status::INTERNAL_SERVER_ERROR);
    assert!(body["message"].as_str().unwrap().contains("unbind first"));

    let (status, _) = server.delete("/gateway?gatewayId=SIM").await;
    assert_eq!(status, Status::INTERNAL_SERVER_ERROR);

    server.delete("/module?name=TESTM").await;
    let (status, _) = server.delete("/account?accountId=testAccount").await;
    assert_eq!(status, Status::OK);
    let (status, _) = server.delete("/gateway?gatewayId=SIM").await;
    assert_eq!(status, Status::OK);
}

#[tokio::test]
async fn test_fills_runtime_and_deal_records() {
    let server = TestServer::start().await;
    server.seed().await;
    server.post("/module", module_body()).await;

    let open = json!({ "instrument": "SIM-RB", "direction": "OPEN_LONG", "price": 3500, "volume": 1 });
    let (status, body) = server.post("/module/position?name=TESTM", open.clone()).await;
    assert_eq!(status, Status::OK);
    assert_eq!(body["position"]["netVolume"], 1);
    let (_, body) = server.post("/module/position?name=TESTM", open).await;
    assert_eq!(body["position"]["netVolume"], 2);

    let close = json!({ "instrument": "SIM-RB", "direction": "CLOSE_LONG", "price": 3520, "volume": 1 });
    let (_, body) = server.post("/module/position?name=TESTM", close.clone()).await;
    assert_eq!(body["position"]["netVolume"], 1);
    assert_eq!(body["deals"].as_array().unwrap().len(), 1);
    let (_, body) = server.post("/module/position?name=TESTM", close.clone()).await;
    assert!(body["position"].is_null());

    let (status, body) = server.post("/module/position?name=TESTM", close).await;
    assert_eq!(status, Status::BAD_REQUEST);
    assert_eq!(body["error"], "VALIDATION");

    let (status, body) = server.get("/module/rt/info?name=TESTM").await;
    assert_eq!(status, Status::OK);
    assert_eq!(body["positions"].as_array().unwrap().len(), 0);
    assert_eq!(body["accountRuntime"]["accDealVolume"], 2);

    let (status, body) = server.get("/module/deal/record?name=TESTM").await;
    assert_eq!(status, Status::OK);
    assert_eq!(body.as_array().unwrap().len(), 2);
}

#[tokio::test]
async fn test_update_with_reset_clears_positions() {
    let server = TestServer::start().await;
    server.seed().await;
    server.post("/module", module_body()).await;
    server
        .post(
            "/module/position?name=TESTM",
            json!({ "instrument": "SIM-RB", "direction": "OPEN_SHORT", "price": 3500, "volume": 3 }),
        )
        .await;

    let mut update = module_body();
    update["allocatedCapital"] = json!(30000);
    let (status, body) = server.put("/module?reset=true", update).await;
    assert_eq!(status, Status::OK);
    assert_eq!(body["name"], "TESTM");

    let (_, body) = server.get("/module/position?name=TESTM").await;
    assert_eq!(body.as_array().unwrap().len(), 0);
}

#[tokio::test]
async fn test_validation_and_not_found_codes() {
    let server = TestServer::start().await;
    server.seed().await;

    let mut missing = module_body();
    missing["strategyRef"] = json!("");
    let (status, _) = server.post("/module", missing).await;
    assert_eq!(status, Status::BAD_REQUEST);

    let (status, body) = server.get("/module/rt/info?name=ghost").await;
    assert_eq!(status, Status::NOT_FOUND);
    assert_eq!(body["error"], "NOT_FOUND");

    // query string without the required key
    let (status, _) = server.get("/module/rt/info").await;
    assert_eq!(status, Status::BAD_REQUEST);

    let (status, _) = server
        .post("/gateway", json!({ "id": "X", "type": "SIM_TRADE", "subscribedInstruments": ["A"] }))
        .await;
    assert_eq!(status, Status::BAD_REQUEST);
}

#[tokio::test]
async fn test_playback_gateway_and_strategy_listing() {
    let server = TestServer::start().await;
    let (status, body) = server
        .post(
            "/gateway",
            json!({
                "id": "PB",
                "type": "PLAYBACK",
                "subscribedInstruments": ["SIM-RB"],
                "playback": { "startDate": "2024-01-02", "endDate": "2024-01-05", "speed": "SPRINT" }
            }),
        )
        .await;
    assert_eq!(status, Status::OK);
    assert_eq!(body["settings"]["type"], "PLAYBACK");

    let (status, body) = server.post("/gateway/connection?gatewayId=PB", Value::Null).await;
    assert_eq!(status, Status::OK);
    assert_eq!(body["connectionState"], "CONNECTED");

    let (_, body) = server.get("/gateway").await;
    assert_eq!(body.as_array().unwrap().len(), 1);

    let (_, body) = server.get("/module/strategies").await;
    assert_eq!(body, json!(["demo-simple"]));
}

#[tokio::test]
async fn test_withdraw_over_balance() {
    let server = TestServer::start().await;
    server.seed().await;

    let (status, _) = server
        .post("/account/withdraw", json!({ "accountId": "testAccount", "amount": 60000 }))
        .await;
    assert_eq!(status, Status::BAD_REQUEST);

    let (status, body) = server
        .post("/account/withdraw", json!({ "accountId": "testAccount", "amount": 1000 }))
        .await;
    assert_eq!(status, Status::OK);
    assert_eq!(body["balance"], "49000");
}

#[tokio::test]
async fn test_subscription_then_instrument_switch() {
    let server = TestServer::start().await;
    server.seed().await;
    server.post("/module", module_body()).await;

    let (status, body) = server
        .post("/gateway/subscription?gatewayId=SIM", json!({ "instrument": "SIM-HC" }))
        .await;
    assert_eq!(status, Status::OK);
    assert_eq!(body["subscribedInstruments"], json!(["SIM-HC", "SIM-RB"]));

    let (status, _) = server
        .post("/gateway/subscription?gatewayId=SIM", json!({ "instrument": " " }))
        .await;
    assert_eq!(status, Status::BAD_REQUEST);
    let (status, _) = server
        .post("/gateway/subscription?gatewayId=GHOST", json!({ "instrument": "SIM-HC" }))
        .await;
    assert_eq!(status, Status::NOT_FOUND);

    server
        .post(
            "/module/position?name=TESTM",
            json!({ "instrument": "SIM-RB", "direction": "OPEN_LONG", "price": 3500, "volume": 1 }),
        )
        .await;
    let mut update = module_body();
    update["subscribedInstrument"] = json!("SIM-HC");
    let (status, body) = server.put("/module", update.clone()).await;
    assert_eq!(status, Status::INTERNAL_SERVER_ERROR);
    assert_eq!(body["error"], "CONFLICT");

    let (status, body) = server.put("/module?reset=true", update).await;
    assert_eq!(status, Status::OK);
    assert_eq!(body["subscribedInstrument"], "SIM-HC");
}

#[tokio::test]
async fn test_oversized_fill_is_400() {
    let server = TestServer::start().await;
    server.seed().await;
    server.post("/module", module_body()).await;

    let huge = json!({
        "instrument": "SIM-RB",
        "direction": "OPEN_LONG",
        "price": "79228162514264337593543950335",
        "volume": 1
    });
    let (status, _) = server.post("/module/position?name=TESTM", huge.clone()).await;
    assert_eq!(status, Status::OK);
    let (status, body) = server.post("/module/position?name=TESTM", huge).await;
    assert_eq!(status, Status::BAD_REQUEST);
    assert_eq!(body["error"], "VALIDATION");

    let (status, body) = server.get("/module/position?name=TESTM").await;
    assert_eq!(status, Status::OK);
    assert_eq!(body[0]["netVolume"], 1);
}
