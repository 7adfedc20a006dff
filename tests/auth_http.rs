mod common;

use serde_json::json;
use smartcart::auth::{AuthStore, HttpAuthApi, ProfileUpdate, Registration, Role};
use smartcart::error::AuthError;
use smartcart::storage::FileStore;
use std::sync::Arc;

fn user_token(name: &str) -> String {
    common::token(json!({
        "sub": 7,
        "email": "ada@example.com",
        "name": name,
        "role": "user",
        "exp": chrono::Utc::now().timestamp() + 3600,
    }))
}

#[tokio::test]
async fn login_persists_across_reloads() {
    let svc = common::MockService::new();
    *svc.login_token.lock().unwrap() = Some(user_token("Ada"));
    let base = common::spawn(svc.clone()).await;
    let dir = tempfile::tempdir().unwrap();

    let store = Arc::new(FileStore::open(dir.path()).unwrap());
    let api = Arc::new(HttpAuthApi::new(&base));
    let mut auth = AuthStore::load(store.clone(), api.clone());
    auth.login("ada@example.com", "secret", Role::User).await.unwrap();
    assert!(auth.is_authenticated());
    assert!(!auth.is_loading());

    let reloaded = AuthStore::load(Arc::new(FileStore::open(dir.path()).unwrap()), api);
    assert!(reloaded.is_authenticated());
    assert_eq!(reloaded.user().unwrap().id.as_deref(), Some("7"));
    assert_eq!(reloaded.user().unwrap().name.as_deref(), Some("Ada"));
}

#[tokio::test]
async fn rejected_login_keeps_service_message() {
    let svc = common::MockService::new();
    let base = common::spawn(svc).await;

    let mut auth = AuthStore::load(
        Arc::new(smartcart::storage::MemoryStore::new()),
        Arc::new(HttpAuthApi::new(&base)),
    );
    let err = auth.login("ada@example.com", "wrong", Role::User).await.unwrap_err();

    assert!(matches!(err, AuthError::Rejected(_)));
    assert_eq!(auth.error(), Some("Invalid email or password"));
    assert!(!auth.is_authenticated());
}

#[tokio::test]
async fn admin_login_with_user_token_is_refused() {
    let svc = common::MockService::new();
    *svc.login_token.lock().unwrap() = Some(user_token("Ada"));
    let base = common::spawn(svc).await;

    let mut auth = AuthStore::load(
        Arc::new(smartcart::storage::MemoryStore::new()),
        Arc::new(HttpAuthApi::new(&base)),
    );
    assert!(auth.login("ada@example.com", "secret", Role::Admin).await.is_err());
    assert_eq!(auth.error(), Some("Invalid admin credentials"));
}

#[tokio::test]
async fn register_update_and_refresh() {
    let svc = common::MockService::new();
    *svc.login_token.lock().unwrap() = Some(user_token("Ada"));
    let base = common::spawn(svc.clone()).await;

    let mut auth = AuthStore::load(
        Arc::new(smartcart::storage::MemoryStore::new()),
        Arc::new(HttpAuthApi::new(&base)),
    );
    auth.register(&Registration {
        name: "Ada".to_string(),
        email: "ada@example.com".to_string(),
        password: "secret".to_string(),
    })
    .await
    .unwrap();
    let first_token = auth.token().unwrap().to_string();

    auth.update_profile(&ProfileUpdate {
        name: Some("Ada L.".to_string()),
        email: None,
    })
    .await
    .unwrap();
    assert_eq!(auth.user().unwrap().name.as_deref(), Some("Ada L."));
    assert_eq!(
        svc.profile_auth.lock().unwrap().clone(),
        Some(format!("Bearer {}", first_token))
    );

    // No refresh token on the service side yet.
    assert!(!auth.refresh_token().await);
    assert_eq!(auth.token(), Some(first_token.as_str()));

    *svc.refresh_token.lock().unwrap() = Some(user_token("Ada Lovelace"));
    assert!(auth.refresh_token().await);
    assert_eq!(auth.user().unwrap().name.as_deref(), Some("Ada Lovelace"));
}
