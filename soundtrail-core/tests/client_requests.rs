//! End-to-end client tests against a mock HTTP backend.

use std::sync::Arc;

use serde_json::json;
use url::Url;
use wiremock::matchers::{body_string_contains, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use soundtrail_core::{
    ApiClient, Domain, ErrorKind, MemoryStore, ProviderConfig, ProviderId, RequestOptions,
    SecretStore,
};

fn grant_body(access: &str, refresh: Option<&str>, expires_in: i64) -> serde_json::Value {
    let mut body = json!({
        "access_token": access,
        "expires_in": expires_in,
    });
    if let Some(refresh) = refresh {
        body["refresh_token"] = json!(refresh);
    }
    body
}

fn client_for(server: &MockServer, store: Arc<MemoryStore>) -> ApiClient {
    let base = Url::parse(&server.uri()).unwrap();
    ApiClient::new(base, store)
}

fn provider_config(server: &MockServer) -> ProviderConfig {
    ProviderConfig::new(
        "spotify",
        "Spotify",
        format!("{}/music/", server.uri()),
        format!("{}/music/token", server.uri()),
    )
    .with_revoke_url(format!("{}/music/revoke", server.uri()))
    .with_redirect_uri("soundtrail://callback")
    .with_scopes(vec!["user-library-read".to_string()])
}

#[tokio::test]
async fn login_then_get_attaches_bearer_token() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/auth/login"))
        .and(body_string_contains("me@example.com"))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(grant_body("tok-1", Some("ref-1"), 3600)),
        )
        .expect(1)
        .mount(&server)
        .await;

    Mock::given(method("GET"))
        .and(path("/pins"))
        .and(header("authorization", "Bearer tok-1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "pins": [] })))
        .expect(1)
        .mount(&server)
        .await;

    let client = client_for(&server, Arc::new(MemoryStore::new()));
    client.login("me@example.com", "hunter2").await.unwrap();
    assert!(client.is_authenticated());

    let envelope = client.get("pins", &[], RequestOptions::default()).await;
    assert!(envelope.success);
    assert_eq!(envelope.status, Some(200));
    assert_eq!(envelope.data, Some(json!({ "pins": [] })));
}

#[tokio::test]
async fn stale_token_refreshes_before_first_attempt() {
    let server = MockServer::start().await;

    // expires_in of 60s falls inside the expiry buffer, so the next
    // request must refresh first.
    Mock::given(method("POST"))
        .and(path("/auth/login"))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(grant_body("tok-old", Some("ref-1"), 60)),
        )
        .mount(&server)
        .await;

    Mock::given(method("POST"))
        .and(path("/auth/refresh"))
        .and(body_string_contains("ref-1"))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(grant_body("tok-new", Some("ref-2"), 3600)),
        )
        .expect(1)
        .mount(&server)
        .await;

    Mock::given(method("GET"))
        .and(path("/pins"))
        .and(header("authorization", "Bearer tok-new"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "pins": [] })))
        .expect(1)
        .mount(&server)
        .await;

    let client = client_for(&server, Arc::new(MemoryStore::new()));
    client.login("me@example.com", "hunter2").await.unwrap();

    let envelope = client.get("pins", &[], RequestOptions::default()).await;
    assert!(envelope.success);
}

#[tokio::test]
async fn refresh_without_new_refresh_token_keeps_old_one() {
    let server = MockServer::start().await;
    let store = Arc::new(MemoryStore::new());

    Mock::given(method("POST"))
        .and(path("/auth/login"))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(grant_body("tok-old", Some("ref-keep"), 60)),
        )
        .mount(&server)
        .await;

    // The refresh grant carries no refresh_token of its own.
    Mock::given(method("POST"))
        .and(path("/auth/refresh"))
        .respond_with(ResponseTemplate::new(200).set_body_json(grant_body("tok-new", None, 3600)))
        .expect(1)
        .mount(&server)
        .await;

    Mock::given(method("GET"))
        .and(path("/pins"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "pins": [] })))
        .mount(&server)
        .await;

    let client = client_for(&server, store.clone());
    client.login("me@example.com", "hunter2").await.unwrap();
    let envelope = client.get("pins", &[], RequestOptions::default()).await;
    assert!(envelope.success);

    let refresh = store
        .get("soundtrail/account/refresh_token")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(refresh.expose(), "ref-keep");
}

#[tokio::test]
async fn second_unauthorized_is_surfaced_not_looped() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/auth/login"))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(grant_body("tok-1", Some("ref-1"), 3600)),
        )
        .mount(&server)
        .await;

    // Refresh succeeds, but the resource keeps refusing: the client
    // must stop after exactly two dispatches.
    Mock::given(method("POST"))
        .and(path("/auth/refresh"))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(grant_body("tok-2", Some("ref-2"), 3600)),
        )
        .expect(1)
        .mount(&server)
        .await;

    Mock::given(method("GET"))
        .and(path("/pins"))
        .respond_with(ResponseTemplate::new(401))
        .expect(2)
        .mount(&server)
        .await;

    let client = client_for(&server, Arc::new(MemoryStore::new()));
    client.login("me@example.com", "hunter2").await.unwrap();

    let envelope = client.get("pins", &[], RequestOptions::default()).await;
    assert!(!envelope.success);
    assert_eq!(envelope.status, Some(401));
    assert_eq!(envelope.error, Some(ErrorKind::Unauthorized));
}

#[tokio::test]
async fn unauthorized_then_refresh_then_success() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/auth/login"))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(grant_body("tok-old", Some("ref-1"), 3600)),
        )
        .mount(&server)
        .await;

    Mock::given(method("POST"))
        .and(path("/auth/refresh"))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(grant_body("tok-new", Some("ref-2"), 3600)),
        )
        .expect(1)
        .mount(&server)
        .await;

    // Server-side invalidation: the old token 401s even though it has
    // not reached its local expiry.
    Mock::given(method("GET"))
        .and(path("/pins"))
        .and(header("authorization", "Bearer tok-old"))
        .respond_with(ResponseTemplate::new(401))
        .expect(1)
        .mount(&server)
        .await;

    Mock::given(method("GET"))
        .and(path("/pins"))
        .and(header("authorization", "Bearer tok-new"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "pins": [1, 2] })))
        .expect(1)
        .mount(&server)
        .await;

    let client = client_for(&server, Arc::new(MemoryStore::new()));
    client.login("me@example.com", "hunter2").await.unwrap();

    let envelope = client.get("pins", &[], RequestOptions::default()).await;
    assert!(envelope.success);
    assert_eq!(envelope.data, Some(json!({ "pins": [1, 2] })));
}

#[tokio::test]
async fn unauthenticated_required_request_skips_the_network() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/pins"))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&server)
        .await;

    let client = client_for(&server, Arc::new(MemoryStore::new()));
    let envelope = client.get("pins", &[], RequestOptions::default()).await;

    assert!(!envelope.success);
    assert_eq!(envelope.error, Some(ErrorKind::Unauthorized));
    assert!(server.received_requests().await.unwrap().is_empty());
}

#[tokio::test]
async fn anonymous_request_goes_out_without_token() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/charts"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "top": [] })))
        .expect(1)
        .mount(&server)
        .await;

    let client = client_for(&server, Arc::new(MemoryStore::new()));
    let envelope = client
        .get("charts", &[], RequestOptions::default().anonymous())
        .await;

    assert!(envelope.success);
    let requests = server.received_requests().await.unwrap();
    assert!(requests[0].headers.get("authorization").is_none());
}

#[tokio::test]
async fn provider_requests_route_to_provider_base() {
    let server = MockServer::start().await;
    let spotify = ProviderId::new("spotify");

    Mock::given(method("POST"))
        .and(path("/music/token"))
        .and(body_string_contains("grant_type=authorization_code"))
        .and(body_string_contains("code=abc123"))
        .and(body_string_contains("redirect_uri=soundtrail"))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(grant_body("sp-tok", Some("sp-ref"), 3600)),
        )
        .expect(1)
        .mount(&server)
        .await;

    Mock::given(method("GET"))
        .and(path("/music/player"))
        .and(header("authorization", "Bearer sp-tok"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "is_playing": true })))
        .expect(1)
        .mount(&server)
        .await;

    let client = client_for(&server, Arc::new(MemoryStore::new()))
        .with_provider(provider_config(&server), "client-id", None);

    client.connect(&spotify, "abc123").await.unwrap();

    let envelope = client
        .get(
            "player",
            &[],
            RequestOptions::for_domain(Domain::Provider(spotify.clone())),
        )
        .await;
    assert!(envelope.success);
    assert_eq!(envelope.data, Some(json!({ "is_playing": true })));
}

#[tokio::test]
async fn logout_clears_every_domain() {
    let server = MockServer::start().await;
    let store = Arc::new(MemoryStore::new());
    let spotify = ProviderId::new("spotify");

    Mock::given(method("POST"))
        .and(path("/auth/login"))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(grant_body("tok-1", Some("ref-1"), 3600)),
        )
        .mount(&server)
        .await;

    Mock::given(method("POST"))
        .and(path("/music/token"))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(grant_body("sp-tok", Some("sp-ref"), 3600)),
        )
        .mount(&server)
        .await;

    Mock::given(method("POST"))
        .and(path("/auth/logout"))
        .and(body_string_contains("ref-1"))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&server)
        .await;

    let client = client_for(&server, store.clone())
        .with_provider(provider_config(&server), "client-id", None);
    client.login("me@example.com", "hunter2").await.unwrap();
    client.connect(&spotify, "abc123").await.unwrap();

    assert!(!store.list_keys("soundtrail/").await.unwrap().is_empty());

    client.logout().await;

    assert!(store.list_keys("soundtrail/").await.unwrap().is_empty());
    assert!(!client.is_authenticated());
    assert_eq!(
        client.auth_state(&Domain::Provider(spotify)),
        Some(soundtrail_core::AuthState::Unauthenticated)
    );
}

#[tokio::test]
async fn logout_survives_failed_revocation() {
    let server = MockServer::start().await;
    let store = Arc::new(MemoryStore::new());

    Mock::given(method("POST"))
        .and(path("/auth/login"))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(grant_body("tok-1", Some("ref-1"), 3600)),
        )
        .mount(&server)
        .await;

    Mock::given(method("POST"))
        .and(path("/auth/logout"))
        .respond_with(ResponseTemplate::new(500))
        .mount(&server)
        .await;

    let client = client_for(&server, store.clone());
    client.login("me@example.com", "hunter2").await.unwrap();
    client.logout().await;

    assert!(store.list_keys("soundtrail/").await.unwrap().is_empty());
    assert!(!client.is_authenticated());
}

#[tokio::test]
async fn terminal_account_refresh_failure_logs_out_all_domains() {
    let server = MockServer::start().await;
    let store = Arc::new(MemoryStore::new());
    let spotify = ProviderId::new("spotify");

    // Account session is already stale at login time.
    Mock::given(method("POST"))
        .and(path("/auth/login"))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(grant_body("tok-old", Some("ref-bad"), 60)),
        )
        .mount(&server)
        .await;

    Mock::given(method("POST"))
        .and(path("/music/token"))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(grant_body("sp-tok", Some("sp-ref"), 3600)),
        )
        .mount(&server)
        .await;

    Mock::given(method("POST"))
        .and(path("/auth/refresh"))
        .respond_with(
            ResponseTemplate::new(400).set_body_json(json!({ "error": "invalid_grant" })),
        )
        .expect(1)
        .mount(&server)
        .await;

    let client = client_for(&server, store.clone())
        .with_provider(provider_config(&server), "client-id", None);
    client.login("me@example.com", "hunter2").await.unwrap();
    client.connect(&spotify, "abc123").await.unwrap();

    let envelope = client.get("pins", &[], RequestOptions::default()).await;
    assert!(!envelope.success);
    assert_eq!(envelope.error, Some(ErrorKind::Unauthorized));

    // The rejected account refresh wipes the provider session too.
    assert!(store.list_keys("soundtrail/").await.unwrap().is_empty());
    assert!(!client.is_authenticated());
}

#[tokio::test]
async fn disconnect_revokes_and_clears_only_that_provider() {
    let server = MockServer::start().await;
    let store = Arc::new(MemoryStore::new());
    let spotify = ProviderId::new("spotify");

    Mock::given(method("POST"))
        .and(path("/auth/login"))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(grant_body("tok-1", Some("ref-1"), 3600)),
        )
        .mount(&server)
        .await;

    Mock::given(method("POST"))
        .and(path("/music/token"))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(grant_body("sp-tok", Some("sp-ref"), 3600)),
        )
        .mount(&server)
        .await;

    Mock::given(method("POST"))
        .and(path("/music/revoke"))
        .and(body_string_contains("sp-ref"))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&server)
        .await;

    let client = client_for(&server, store.clone())
        .with_provider(provider_config(&server), "client-id", None);
    client.login("me@example.com", "hunter2").await.unwrap();
    client.connect(&spotify, "abc123").await.unwrap();

    client.disconnect(&spotify).await.unwrap();

    assert!(
        store
            .list_keys("soundtrail/provider/spotify")
            .await
            .unwrap()
            .is_empty()
    );
    assert!(!store.list_keys("soundtrail/account").await.unwrap().is_empty());
    assert!(client.is_authenticated());
}

#[tokio::test]
async fn restore_rehydrates_a_persisted_session() {
    let server = MockServer::start().await;
    let store = Arc::new(MemoryStore::new());

    Mock::given(method("POST"))
        .and(path("/auth/login"))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(grant_body("tok-1", Some("ref-1"), 3600)),
        )
        .mount(&server)
        .await;

    Mock::given(method("GET"))
        .and(path("/pins"))
        .and(header("authorization", "Bearer tok-1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "pins": [] })))
        .mount(&server)
        .await;

    {
        let client = client_for(&server, store.clone());
        client.login("me@example.com", "hunter2").await.unwrap();
    }

    // A fresh process: same store, new client.
    let client = client_for(&server, store);
    assert!(!client.is_authenticated());
    client.restore().await.unwrap();
    assert!(client.is_authenticated());

    let envelope = client.get("pins", &[], RequestOptions::default()).await;
    assert!(envelope.success);
}
