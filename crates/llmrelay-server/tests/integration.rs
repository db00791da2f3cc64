//! End-to-end integration tests over a real TCP listener.

use std::sync::{Arc, RwLock};

use llmrelay_accounts::{Account, AccountKind, AccountStore, Distributor, TokenManager, UsageStore};
use llmrelay_config::AppConfig;
use llmrelay_providers::cache::{CacheConfig, PromptCacheSimulator};
use llmrelay_router::RouterState;
use llmrelay_server::server::ProxyServer;

/// Boot a real server bound to an ephemeral port and return its base URL
/// plus the server handle (dropped/shut down by the caller).
async fn boot_server(admin_token: Option<&str>) -> (String, ProxyServer) {
    let store = AccountStore::open_in_memory().unwrap();
    let router_state = RouterState {
        http: reqwest::Client::new(),
        store: store.clone(),
        distributor: Arc::new(Distributor::new(store.clone())),
        token_manager: Arc::new(TokenManager::new(store.clone())),
        usage: Arc::new(UsageStore::new(store).unwrap()),
        cache: Arc::new(PromptCacheSimulator::new(CacheConfig::default())),
        config: Arc::new(RwLock::new(AppConfig::default())),
    };
    let config = AppConfig { host: "127.0.0.1".into(), port: 0, ..AppConfig::default() };
    let server = ProxyServer::new(&config, router_state, admin_token.map(str::to_string));
    let (addr, _handle) = server.listen().await.unwrap();
    (format!("http://{addr}"), server)
}

#[tokio::test]
async fn health_reports_unhealthy_with_no_accounts() {
    let (base, server) = boot_server(None).await;
    let resp = reqwest::get(format!("{base}/health")).await.unwrap();
    assert_eq!(resp.status(), 200);
    let body: serde_json::Value = resp.json().await.unwrap();
    assert_eq!(body["status"], "unhealthy");
    assert_eq!(body["total_accounts"], 0);
    server.shutdown().shutdown();
}

#[tokio::test]
async fn health_reports_healthy_once_an_account_is_enabled() {
    let (base, server) = boot_server(None).await;
    server
        .store()
        .create(&Account {
            id: "acct_1".into(),
            label: "test".into(),
            kind: AccountKind::Amazonq,
            client_id: None,
            client_secret: None,
            refresh_token: None,
            access_token: None,
            other: serde_json::json!({}),
            last_refresh_time: None,
            last_refresh_status: None,
            enabled: true,
            weight: 50,
            rate_limit_per_hour: 20,
            created_at: "2026-01-01T00:00:00Z".into(),
            updated_at: "2026-01-01T00:00:00Z".into(),
        })
        .unwrap();

    let resp = reqwest::get(format!("{base}/health")).await.unwrap();
    let body: serde_json::Value = resp.json().await.unwrap();
    assert_eq!(body["status"], "healthy");
    assert_eq!(body["enabled_accounts"], 1);
    server.shutdown().shutdown();
}

#[tokio::test]
async fn models_endpoint_lists_configured_models() {
    let (base, server) = boot_server(None).await;

    let resp = reqwest::get(format!("{base}/v1/models")).await.unwrap();
    assert_eq!(resp.status(), 200);
    let body: serde_json::Value = resp.json().await.unwrap();
    assert_eq!(body["object"], "list");
    server.shutdown().shutdown();
}

#[tokio::test]
async fn messages_with_empty_pool_returns_503() {
    let (base, server) = boot_server(None).await;
    let client = reqwest::Client::new();
    let resp = client
        .post(format!("{base}/v1/messages"))
        .json(&serde_json::json!({
            "model": "claude-3-5-sonnet",
            "max_tokens": 100,
            "messages": [{"role": "user", "content": "hi"}],
            "stream": true,
        }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 503);
    let body: serde_json::Value = resp.json().await.unwrap();
    assert_eq!(body["error"]["type"], "permission_error");
    server.shutdown().shutdown();
}

#[tokio::test]
async fn admin_routes_require_session_token_when_configured() {
    let (base, server) = boot_server(Some("admin-secret")).await;
    let client = reqwest::Client::new();

    let unauthenticated = client.get(format!("{base}/v2/accounts")).send().await.unwrap();
    assert_eq!(unauthenticated.status(), 401);

    let authenticated = client
        .get(format!("{base}/v2/accounts"))
        .header("x-session-token", "admin-secret")
        .send()
        .await
        .unwrap();
    assert_eq!(authenticated.status(), 200);
    server.shutdown().shutdown();
}

#[tokio::test]
async fn admin_config_put_round_trips() {
    let (base, server) = boot_server(Some("admin-secret")).await;
    let client = reqwest::Client::new();

    let put = client
        .put(format!("{base}/v2/config"))
        .header("x-session-token", "admin-secret")
        .json(&serde_json::json!({
            "gemini_only_models": ["gemini-2.0-flash"],
            "amazonq_only_models": [],
            "supported_models": [],
            "model_mapping": {},
        }))
        .send()
        .await
        .unwrap();
    assert_eq!(put.status(), 200);

    let get = client
        .get(format!("{base}/v2/config"))
        .header("x-session-token", "admin-secret")
        .send()
        .await
        .unwrap();
    let body: serde_json::Value = get.json().await.unwrap();
    assert_eq!(body["gemini_only_models"], serde_json::json!(["gemini-2.0-flash"]));
    server.shutdown().shutdown();
}
