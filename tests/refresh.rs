//! Expired tokens: refresh, bounded retry and dynamic credentials

mod common;

use b24_client::api::auth::CredentialStore;
use b24_client::api::{
    BatchOptions, Credential, DynamicCredential, Error, InMemoryCredentialStore, MemorySink,
    OAuthConfig, Params, PlatformClient, RefreshError, RefreshOutcome, StoredCredential, SubCalls,
};
use serde_json::json;
use std::sync::Arc;
use wiremock::matchers::{body_string_contains, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn expired() -> ResponseTemplate {
    ResponseTemplate::new(401).set_body_json(json!({
        "error": "expired_token",
        "error_description": "The access token provided has expired.",
    }))
}

fn stored(server: &MockServer) -> StoredCredential {
    StoredCredential::new(7, common::domain(server), "old", "r1")
}

fn oauth_client(server: &MockServer) -> (PlatformClient, Arc<MemorySink>, Arc<InMemoryCredentialStore>) {
    let mut oauth = OAuthConfig::new("app.1", "secret");
    oauth.token_url = format!("{}/oauth/token/", server.uri());

    let store = Arc::new(InMemoryCredentialStore::with([stored(server)]));
    let sink = Arc::new(MemorySink::new());
    let client = PlatformClient::builder(common::config().oauth(oauth).build())
        .telemetry(sink.clone())
        .store(store.clone())
        .build()
        .unwrap();
    (client, sink, store)
}

async fn mount_token_endpoint(server: &MockServer, reply: ResponseTemplate, times: u64) {
    Mock::given(method("GET"))
        .and(path("/oauth/token/"))
        .and(query_param("grant_type", "refresh_token"))
        .and(query_param("client_id", "app.1"))
        .respond_with(reply)
        .expect(times)
        .mount(server)
        .await;
}

#[tokio::test]
async fn test_expired_token_is_refreshed_and_retried() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/rest/crm.deal.get.json"))
        .and(body_string_contains("auth=old"))
        .respond_with(expired())
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/rest/crm.deal.get.json"))
        .and(body_string_contains("auth=new"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"result": {"ID": "5"}})))
        .expect(1)
        .mount(&server)
        .await;
    mount_token_endpoint(
        &server,
        ResponseTemplate::new(200).set_body_json(json!({
            "access_token": "new",
            "refresh_token": "r2",
            "expires_in": 3600,
        })),
        1,
    )
    .await;

    let (client, sink, store) = oauth_client(&server);
    let mut credential = Credential::from(stored(&server));

    let response = client
        .call(&mut credential, "crm.deal.get", Params::new().with("id", 5))
        .await
        .unwrap();
    assert_eq!(response.result["ID"], "5");

    match &credential {
        Credential::Stored(stored) => {
            assert_eq!(stored.access_token, "new");
            assert_eq!(stored.refresh_token, "r2");
        }
        other => panic!("unexpected credential {:?}", other),
    }
    let persisted = store.get(7).await.unwrap().unwrap();
    assert_eq!(persisted.access_token, "new");
    assert_eq!(sink.count("token_refreshed"), 1);
}

#[tokio::test]
async fn test_retry_after_refresh_is_bounded() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/rest/crm.deal.get.json"))
        .respond_with(expired())
        .expect(2)
        .mount(&server)
        .await;
    mount_token_endpoint(
        &server,
        ResponseTemplate::new(200).set_body_json(json!({
            "access_token": "new",
            "refresh_token": "r2",
        })),
        1,
    )
    .await;

    let (client, _, _) = oauth_client(&server);
    let mut credential = Credential::from(stored(&server));

    let err = client
        .call(&mut credential, "crm.deal.get", Params::new())
        .await
        .unwrap_err();
    assert!(err.is_expired_token());
}

#[tokio::test]
async fn test_rejected_refresh_deactivates_credential() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/rest/crm.deal.get.json"))
        .respond_with(expired())
        .expect(1)
        .mount(&server)
        .await;
    mount_token_endpoint(
        &server,
        ResponseTemplate::new(400).set_body_json(json!({
            "error": "invalid_grant",
            "error_description": "Invalid refresh token",
        })),
        1,
    )
    .await;

    let (client, sink, store) = oauth_client(&server);
    let mut credential = Credential::from(stored(&server));

    let err = client
        .call(&mut credential, "crm.deal.get", Params::new())
        .await
        .unwrap_err();
    assert!(matches!(err, Error::ExpiredToken { .. }));

    let persisted = store.get(7).await.unwrap().unwrap();
    assert!(!persisted.is_active);
    assert_eq!(persisted.refresh_error, RefreshError::InvalidGrant);
    assert_eq!(sink.count("token_refresh_failed"), 1);
}

#[tokio::test]
async fn test_dynamic_credential_is_never_refreshed() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(expired())
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&server)
        .await;

    let (client, _, _) = oauth_client(&server);
    let mut credential = Credential::from(DynamicCredential::new(common::domain(&server), "token"));

    let err = client
        .call(&mut credential, "crm.deal.get", Params::new())
        .await
        .unwrap_err();
    assert!(err.is_expired_token());
    assert!(matches!(
        client.refresh(&mut credential, None).await,
        Err(Error::Usage(_))
    ));
}

#[tokio::test]
async fn test_batch_restarts_once_after_refresh() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/rest/batch.json"))
        .and(body_string_contains("auth=old"))
        .respond_with(expired())
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/rest/batch.json"))
        .and(body_string_contains("auth=new"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "result": {
                "result": {"a": {"ID": "1"}, "b": {"ID": "2"}},
                "result_error": [],
            }
        })))
        .expect(1)
        .mount(&server)
        .await;
    mount_token_endpoint(
        &server,
        ResponseTemplate::new(200).set_body_json(json!({
            "access_token": "new",
            "refresh_token": "r2",
        })),
        1,
    )
    .await;

    let (client, _, _) = oauth_client(&server);
    let mut credential = Credential::from(stored(&server));

    let calls = SubCalls::new()
        .named("a", "crm.deal.get", Params::new().with("id", 1))
        .named("b", "crm.deal.get", Params::new().with("id", 2));
    let results = client
        .batch(&mut credential, calls, &BatchOptions::default())
        .await
        .unwrap();

    assert_eq!(results.len(), 2);
    assert!(results.all_ok());
    assert_eq!(results.get("b").unwrap().result, Some(json!({"ID": "2"})));
}

#[tokio::test]
async fn test_refresh_all_skips_webhooks() {
    let server = MockServer::start().await;
    mount_token_endpoint(
        &server,
        ResponseTemplate::new(200).set_body_json(json!({
            "access_token": "new",
            "refresh_token": "r2",
        })),
        1,
    )
    .await;

    let mut oauth = OAuthConfig::new("app.1", "secret");
    oauth.token_url = format!("{}/oauth/token/", server.uri());
    let store = Arc::new(InMemoryCredentialStore::with([
        stored(&server),
        StoredCredential::webhook(8, common::domain(&server), common::HOOK),
    ]));
    let client = PlatformClient::builder(common::config().oauth(oauth).build())
        .store(store.clone())
        .build()
        .unwrap();

    // The webhook is not counted
    let (before, after) = client.refresh_all(None).await.unwrap();
    assert_eq!((before, after), (1, 1));
    assert_eq!(store.get(7).await.unwrap().unwrap().refresh_token, "r2");
}

#[tokio::test]
async fn test_token_reply_is_not_logged() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/rest/crm.deal.get.json"))
        .and(body_string_contains("auth=old"))
        .respond_with(expired())
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/rest/crm.deal.get.json"))
        .and(body_string_contains("auth=NEW_ACCESS_123"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"result": {"ID": "5"}})))
        .expect(1)
        .mount(&server)
        .await;
    mount_token_endpoint(
        &server,
        ResponseTemplate::new(200).set_body_json(json!({
            "access_token": "NEW_ACCESS_123",
            "refresh_token": "NEW_REFRESH_456",
            "expires_in": 3600,
        })),
        1,
    )
    .await;

    let (client, sink, _) = oauth_client(&server);
    let mut credential = Credential::from(stored(&server));
    client
        .call(&mut credential, "crm.deal.get", Params::new())
        .await
        .unwrap();

    let events = sink.events();
    assert!(events.iter().any(|e| e.tag == "bitrix_response" && e.text.contains("expires_in")));
    for event in &events {
        assert!(!event.text.contains("NEW_ACCESS_123"), "{}", event.text);
        assert!(!event.text.contains("NEW_REFRESH_456"), "{}", event.text);
        assert!(!event.text.contains("refresh_token=r1"), "{}", event.text);
    }
}

#[tokio::test]
async fn test_failed_refresh_reraises_expired_token() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(expired())
        .expect(2)
        .mount(&server)
        .await;

    // No OAuth application keys: the refresh itself cannot run
    let sink = Arc::new(MemorySink::new());
    let store = Arc::new(InMemoryCredentialStore::with([stored(&server)]));
    let client = PlatformClient::builder(common::config().build())
        .telemetry(sink.clone())
        .store(store.clone())
        .build()
        .unwrap();
    let mut credential = Credential::from(stored(&server));

    let err = client
        .call(&mut credential, "user.get", Params::new())
        .await
        .unwrap_err();
    assert!(matches!(err, Error::ExpiredToken { .. }), "{:?}", err);

    let err = client
        .batch(
            &mut credential,
            SubCalls::new().add("user.get", Params::new()),
            &BatchOptions::default(),
        )
        .await
        .unwrap_err();
    assert!(matches!(err, Error::ExpiredToken { .. }), "{:?}", err);

    assert_eq!(sink.count("token_refresh_failed"), 2);
    assert!(store.get(7).await.unwrap().unwrap().is_active);
}

async fn refresh_with(reply: ResponseTemplate) -> (RefreshOutcome, Credential, StoredCredential) {
    let server = MockServer::start().await;
    mount_token_endpoint(&server, reply, 1).await;

    let (client, _, store) = oauth_client(&server);
    let mut credential = Credential::from(stored(&server));
    let outcome = client.refresh(&mut credential, None).await.unwrap();
    let persisted = store.get(7).await.unwrap().unwrap();
    (outcome, credential, persisted)
}

fn assert_untouched(credential: &Credential, persisted: &StoredCredential) {
    match credential {
        Credential::Stored(stored) => {
            assert!(stored.is_active);
            assert_eq!(stored.refresh_error, RefreshError::None);
            assert_eq!(stored.access_token, "old");
            assert_eq!(stored.refresh_token, "r1");
        }
        other => panic!("unexpected credential {:?}", other),
    }
    assert!(persisted.is_active);
    assert_eq!(persisted.refresh_error, RefreshError::None);
    assert_eq!(persisted.access_token, "old");
}

#[tokio::test]
async fn test_refresh_server_error_leaves_credential() {
    let (outcome, credential, persisted) = refresh_with(
        ResponseTemplate::new(502).set_body_json(json!({"error": "invalid_grant"})),
    )
    .await;
    assert_eq!(outcome, RefreshOutcome::Unavailable);
    assert_untouched(&credential, &persisted);
}

#[tokio::test]
async fn test_refresh_non_json_reply_leaves_credential() {
    let (outcome, credential, persisted) =
        refresh_with(ResponseTemplate::new(400).set_body_string("<html>Bad Request</html>")).await;
    assert_eq!(outcome, RefreshOutcome::Unavailable);
    assert_untouched(&credential, &persisted);
}

#[tokio::test]
async fn test_refresh_on_deleted_portal_deactivates() {
    let (outcome, credential, persisted) = refresh_with(
        ResponseTemplate::new(404).set_body_string("<html><a href=\"/portal404/\">Portal not found</a></html>"),
    )
    .await;
    assert_eq!(outcome, RefreshOutcome::Rejected(RefreshError::DomainGone));

    match credential {
        Credential::Stored(stored) => {
            assert!(!stored.is_active);
            assert_eq!(stored.refresh_error, RefreshError::DomainGone);
        }
        other => panic!("unexpected credential {:?}", other),
    }
    assert!(!persisted.is_active);
    assert_eq!(persisted.refresh_error, RefreshError::DomainGone);
}
