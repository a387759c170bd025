//! End-to-end pipeline scenarios driven through the `ApiClient` facade, with
//! the network and identity provider replaced by scripted doubles.

use std::sync::Arc;

use parking_lot::Mutex;
use serde_json::json;

use nutrio_api::auth::{CredentialStore, FileCredentialStore, PersistedCredentials};
use nutrio_api::escalate::SIGN_IN_MESSAGE;
use nutrio_api::request::RequestBody;
use nutrio_api::testkit::{ScriptedTransport, StubProvider, init_tracing};
use nutrio_api::{ApiClient, ApiConfig, Navigator};

struct Rig {
    provider: Arc<StubProvider>,
    transport: Arc<ScriptedTransport>,
    client: ApiClient,
}

fn rig() -> Rig {
    init_tracing();
    let provider = Arc::new(StubProvider::new());
    let transport = Arc::new(ScriptedTransport::new());
    let client = ApiClient::builder(ApiConfig::default().with_timezone("America/New_York"))
        .with_provider(provider.clone())
        .with_transport(transport.clone())
        .build();
    Rig {
        provider,
        transport,
        client,
    }
}

fn body_json(body: &RequestBody) -> Option<&serde_json::Value> {
    match body {
        RequestBody::Json(value) => Some(value),
        _ => None,
    }
}

#[tokio::test]
async fn registration_upgrades_guest_without_losing_the_account() {
    let rig = rig();
    rig.client.init().await;

    // first backend response assigns the account
    rig.transport.push_json(200, json!({"accountId": "acct-1"}));
    rig.client
        .post_json("v1/log", json!({"meal": "breakfast"}))
        .await
        .unwrap();
    assert!(rig.client.is_anonymous());
    assert_eq!(rig.client.account_id().as_deref(), Some("acct-1"));

    rig.client
        .register_with_email("eater@example.com", "hunter2")
        .await
        .unwrap();

    assert!(rig.client.is_authenticated());
    assert!(!rig.client.is_anonymous());
    assert_eq!(rig.provider.link_calls(), 1);
    // the account identifier survived the upgrade and still rides on requests
    assert_eq!(rig.client.account_id().as_deref(), Some("acct-1"));
    rig.client
        .post_json("v1/log", json!({"meal": "lunch"}))
        .await
        .unwrap();
    let seen = rig.transport.requests();
    let body = body_json(&seen.last().unwrap().body).unwrap();
    assert_eq!(body.get("accountId"), Some(&json!("acct-1")));
}

#[tokio::test]
async fn sign_out_clears_the_account_identifier() {
    let rig = rig();
    rig.client.init().await;

    rig.transport.push_json(200, json!({"accountId": "acct-1"}));
    rig.client.post_json("v1/log", json!({})).await.unwrap();
    assert_eq!(rig.client.account_id().as_deref(), Some("acct-1"));

    rig.client.sign_out();
    assert_eq!(rig.client.account_id(), None);

    // the next request runs on a fresh anonymous session with no identifier
    rig.client
        .post_json("v1/log", json!({"meal": "dinner"}))
        .await
        .unwrap();
    assert_eq!(rig.provider.anonymous_calls(), 2);
    let seen = rig.transport.requests();
    let body = body_json(&seen.last().unwrap().body).unwrap();
    assert_eq!(body.get("accountId"), None);
}

#[tokio::test]
async fn load_account_reconciles_and_publishes_the_stream() {
    let rig = rig();
    rig.client.init().await;

    let payload = json!({"accountId": "acct-2", "dailyGoal": 1800});
    rig.transport.push_json(200, payload.clone());

    let account = rig.client.load_account().await.unwrap();
    assert_eq!(account, Some(payload.clone()));
    assert_eq!(*rig.client.subscribe_account().borrow(), Some(payload));
    assert_eq!(rig.client.account_id().as_deref(), Some("acct-2"));
}

#[tokio::test]
async fn persisted_session_is_restored_at_startup() {
    init_tracing();
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("session.json");
    FileCredentialStore::new(&path)
        .save(&PersistedCredentials {
            refresh_token: "rt-persisted".into(),
            uid: "uid-1".into(),
            email: Some("eater@example.com".into()),
            account_id: Some("acct-7".into()),
        })
        .unwrap();

    let provider = Arc::new(StubProvider::new());
    let transport = Arc::new(ScriptedTransport::new());
    let client = ApiClient::builder(ApiConfig::default())
        .with_provider(provider.clone())
        .with_transport(transport.clone())
        .with_credentials_file(&path)
        .build();

    assert!(!client.ready());
    client.init().await;

    assert!(client.ready());
    assert!(client.is_authenticated());
    assert_eq!(provider.refresh_calls(), 1);
    assert_eq!(client.account_id().as_deref(), Some("acct-7"));

    // the restored identifier immediately rides on requests
    client.post_json("v1/log", json!({})).await.unwrap();
    let seen = transport.requests();
    let body = body_json(&seen.last().unwrap().body).unwrap();
    assert_eq!(body.get("accountId"), Some(&json!("acct-7")));
}

struct RouteNavigator {
    route: Mutex<Option<String>>,
}

impl Navigator for RouteNavigator {
    fn current_route(&self) -> Option<String> {
        self.route.lock().clone()
    }

    fn go_to_login(&self) {
        *self.route.lock() = Some("/login".to_owned());
    }
}

#[tokio::test]
async fn terminal_failure_redirects_and_remembers_the_route() {
    init_tracing();
    let provider = Arc::new(StubProvider::new());
    provider.set_unreachable(true);
    let transport = Arc::new(ScriptedTransport::new());
    let navigator = Arc::new(RouteNavigator {
        route: Mutex::new(Some("/diary/today".to_owned())),
    });
    let client = ApiClient::builder(ApiConfig::default())
        .with_provider(provider)
        .with_transport(transport.clone())
        .with_navigator(navigator.clone())
        .build();
    client.init().await;

    let err = client.get("v1/summary").await.unwrap_err();
    assert!(err.is_auth_failure());
    assert_eq!(transport.calls(), 0);

    assert_eq!(client.consume_notice().unwrap().message, SIGN_IN_MESSAGE);
    assert_eq!(navigator.route.lock().as_deref(), Some("/login"));
    assert_eq!(client.consume_last_attempted_route("/home"), "/diary/today");
    // read-once: a second consumption falls back to the default
    assert_eq!(client.consume_last_attempted_route("/home"), "/home");
}
