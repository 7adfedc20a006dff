use async_trait::async_trait;
use base64::Engine as _;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use log::{info, warn};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::error::AuthError;
use crate::storage::{self, KeyValueStore};

/// Key the auth snapshot is persisted under
pub const AUTH_STORAGE_KEY: &str = "auth-storage";

/// Identity claims decoded from a token
///
/// Used for display and role checks only; the token signature is never
/// verified on this side.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct UserClaims {
    /// Subject identifier
    pub id: Option<String>,

    /// Email address
    pub email: Option<String>,

    /// Display name
    pub name: Option<String>,

    /// "user" or "admin"
    pub role: Option<String>,

    /// Expiry as seconds since the Unix epoch
    pub exp: Option<i64>,
}

impl UserClaims {
    pub fn is_admin(&self) -> bool {
        self.role.as_deref() == Some("admin")
    }

    /// Whether the claims carry an expiry that has passed
    pub fn is_expired(&self) -> bool {
        match self.exp {
            Some(exp) => exp <= chrono::Utc::now().timestamp(),
            None => false,
        }
    }
}

// JSON shape of claims; ids may be numbers and the subject may be named
// `sub`, `user_id` or `id`.
#[derive(Debug, Deserialize)]
struct WireClaims {
    #[serde(default)]
    sub: Option<serde_json::Value>,
    #[serde(default)]
    user_id: Option<serde_json::Value>,
    #[serde(default)]
    id: Option<serde_json::Value>,
    #[serde(default)]
    email: Option<String>,
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    role: Option<String>,
    #[serde(default)]
    exp: Option<i64>,
}

fn value_to_id(value: Option<serde_json::Value>) -> Option<String> {
    match value? {
        serde_json::Value::String(s) => Some(s),
        serde_json::Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

impl From<WireClaims> for UserClaims {
    fn from(wire: WireClaims) -> Self {
        UserClaims {
            id: value_to_id(wire.sub)
                .or_else(|| value_to_id(wire.user_id))
                .or_else(|| value_to_id(wire.id)),
            email: wire.email,
            name: wire.name,
            role: wire.role,
            exp: wire.exp,
        }
    }
}

/// Decode the claims segment of a JWT without verifying it
///
/// # Arguments
/// * `token` - A `header.payload.signature` token
///
/// # Returns
/// * `Result<UserClaims, AuthError>` - The decoded claims
///
/// # Errors
/// * Returns `InvalidToken` if the token does not have three segments, the
///   payload is not base64url, or the payload is not a JSON object
pub fn decode_token(token: &str) -> Result<UserClaims, AuthError> {
    let mut parts = token.split('.');
    let payload = match (parts.next(), parts.next(), parts.next(), parts.next()) {
        (Some(_), Some(payload), Some(_), None) => payload,
        _ => return Err(AuthError::InvalidToken("expected three segments".to_string())),
    };

    let bytes = URL_SAFE_NO_PAD
        .decode(payload.trim_end_matches('='))
        .map_err(|e| AuthError::InvalidToken(e.to_string()))?;
    let wire: WireClaims =
        serde_json::from_slice(&bytes).map_err(|e| AuthError::InvalidToken(e.to_string()))?;

    Ok(wire.into())
}

/// Role a login is attempted for
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    User,
    Admin,
}

/// Registration form data
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Registration {
    pub name: String,
    pub email: String,
    pub password: String,
}

/// Profile fields a user may change
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProfileUpdate {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
}

/// The external auth service
#[async_trait]
pub trait AuthApi: Send + Sync {
    /// Exchange credentials for a token
    async fn login(&self, email: &str, password: &str) -> Result<String, AuthError>;

    async fn register(&self, registration: &Registration) -> Result<String, AuthError>;

    /// Update the profile; returns the user as the service now sees it
    async fn update_profile(&self, token: &str, update: &ProfileUpdate) -> Result<UserClaims, AuthError>;

    /// Exchange a token for a fresh one
    async fn refresh(&self, token: &str) -> Result<String, AuthError>;
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    token: String,
}

#[derive(Debug, Deserialize)]
struct ProfileResponse {
    user: WireClaims,
}

#[derive(Debug, Deserialize)]
struct MessageBody {
    message: Option<String>,
}

#[derive(Debug, Serialize)]
struct LoginBody<'a> {
    email: &'a str,
    password: &'a str,
}

/// `AuthApi` over HTTP
#[derive(Debug, Clone)]
pub struct HttpAuthApi {
    client: reqwest::Client,
    base_url: String,
}

impl HttpAuthApi {
    pub fn new(base_url: &str) -> Self {
        HttpAuthApi {
            client: reqwest::Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    // Non-success responses become `Rejected` with the service's message
    // when it sent one.
    async fn check(response: reqwest::Response) -> Result<reqwest::Response, AuthError> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let body = response.text().await.unwrap_or_default();
        match serde_json::from_str::<MessageBody>(&body) {
            Ok(MessageBody { message: Some(message) }) => Err(AuthError::Rejected(message)),
            _ => Err(AuthError::Request(format!("status {}", status))),
        }
    }
}

#[async_trait]
impl AuthApi for HttpAuthApi {
    async fn login(&self, email: &str, password: &str) -> Result<String, AuthError> {
        let response = self
            .client
            .post(self.url("/auth/login"))
            .json(&LoginBody { email, password })
            .send()
            .await?;
        let body: TokenResponse = Self::check(response).await?.json().await?;
        Ok(body.token)
    }

    async fn register(&self, registration: &Registration) -> Result<String, AuthError> {
        let response = self
            .client
            .post(self.url("/auth/register"))
            .json(registration)
            .send()
            .await?;
        let body: TokenResponse = Self::check(response).await?.json().await?;
        Ok(body.token)
    }

    async fn update_profile(&self, token: &str, update: &ProfileUpdate) -> Result<UserClaims, AuthError> {
        let response = self
            .client
            .put(self.url("/user/profile"))
            .bearer_auth(token)
            .json(update)
            .send()
            .await?;
        let body: ProfileResponse = Self::check(response).await?.json().await?;
        Ok(body.user.into())
    }

    async fn refresh(&self, token: &str) -> Result<String, AuthError> {
        let response = self
            .client
            .post(self.url("/api/auth/refresh"))
            .bearer_auth(token)
            .send()
            .await?;
        let body: TokenResponse = Self::check(response).await?.json().await?;
        Ok(body.token)
    }
}

/// Persisted part of the auth state
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AuthSnapshot {
    pub token: Option<String>,
    pub user: Option<UserClaims>,
    pub is_authenticated: bool,
}

/// Auth state container
///
/// Loaded from the key-value store on construction and saved back after
/// every mutation.
pub struct AuthStore {
    snapshot: AuthSnapshot,
    is_loading: bool,
    error: Option<String>,
    store: Arc<dyn KeyValueStore>,
    api: Arc<dyn AuthApi>,
}

impl AuthStore {
    /// Build the store from whatever is persisted
    ///
    /// An unreadable snapshot is discarded with a warning.
    pub fn load(store: Arc<dyn KeyValueStore>, api: Arc<dyn AuthApi>) -> Self {
        let snapshot = match storage::load::<AuthSnapshot>(store.as_ref(), AUTH_STORAGE_KEY) {
            Ok(Some(snapshot)) => snapshot,
            Ok(None) => AuthSnapshot::default(),
            Err(e) => {
                warn!("Discarding unreadable auth state: {}", e);
                AuthSnapshot::default()
            }
        };

        AuthStore {
            snapshot,
            is_loading: false,
            error: None,
            store,
            api,
        }
    }

    pub fn token(&self) -> Option<&str> {
        self.snapshot.token.as_deref()
    }

    pub fn user(&self) -> Option<&UserClaims> {
        self.snapshot.user.as_ref()
    }

    pub fn is_authenticated(&self) -> bool {
        self.snapshot.is_authenticated
    }

    /// Authenticated and the token has not expired
    pub fn has_valid_session(&self) -> bool {
        self.snapshot.is_authenticated && !self.user().is_some_and(UserClaims::is_expired)
    }

    pub fn is_loading(&self) -> bool {
        self.is_loading
    }

    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    pub fn snapshot(&self) -> &AuthSnapshot {
        &self.snapshot
    }

    fn persist(&self) {
        if let Err(e) = storage::save(self.store.as_ref(), AUTH_STORAGE_KEY, &self.snapshot) {
            warn!("Failed to save auth state: {}", e);
        }
    }

    fn authenticate(&mut self, token: String, user: UserClaims) {
        self.snapshot = AuthSnapshot {
            token: Some(token),
            user: Some(user),
            is_authenticated: true,
        };
    }

    fn fail(&mut self, error: AuthError, default_message: &str) -> AuthError {
        let message = match &error {
            AuthError::Rejected(message) => message.clone(),
            _ => default_message.to_string(),
        };
        warn!("{}: {}", default_message, error);
        self.error = Some(message);
        self.is_loading = false;
        error
    }

    /// Replace the token; None signs out
    ///
    /// # Errors
    /// * Returns `InvalidToken` if the token cannot be decoded; state is unchanged
    pub fn set_token(&mut self, token: Option<&str>) -> Result<(), AuthError> {
        match token {
            Some(token) => {
                let user = decode_token(token)?;
                self.authenticate(token.to_string(), user);
            }
            None => self.snapshot = AuthSnapshot::default(),
        }
        self.persist();
        Ok(())
    }

    pub fn logout(&mut self) {
        self.snapshot = AuthSnapshot::default();
        self.persist();
        info!("Logged out successfully");
    }

    pub fn clear_error(&mut self) {
        self.error = None;
    }

    /// Log in for the given role
    ///
    /// # Arguments
    /// * `email` - Account email
    /// * `password` - Account password
    /// * `role` - The role the caller is logging in as
    ///
    /// # Errors
    /// * Returns the service's rejection, a transport error, an undecodable
    ///   token, or `Rejected` if the token's role does not match `role`
    ///
    /// # Examples
    /// ```no_run
    /// use smartcart::auth::{AuthStore, HttpAuthApi, Role};
    /// use smartcart::storage::MemoryStore;
    /// use std::sync::Arc;
    ///
    /// # async fn run() {
    /// let api = Arc::new(HttpAuthApi::new("http://localhost:5000"));
    /// let mut auth = AuthStore::load(Arc::new(MemoryStore::new()), api);
    ///
    /// match auth.login("ada@example.com", "secret", Role::User).await {
    ///     Ok(()) => println!("Signed in as {:?}", auth.user().and_then(|u| u.name.clone())),
    ///     Err(e) => eprintln!("Login failed: {}", e),
    /// }
    /// # }
    /// ```
    pub async fn login(&mut self, email: &str, password: &str, role: Role) -> Result<(), AuthError> {
        self.is_loading = true;
        self.error = None;

        let outcome = match self.api.login(email, password).await {
            Ok(token) => decode_token(&token).and_then(|user| {
                match (role, user.is_admin()) {
                    (Role::User, false) | (Role::Admin, true) => Ok((token, user)),
                    (Role::User, true) => Err(AuthError::Rejected("Invalid user credentials".to_string())),
                    (Role::Admin, false) => Err(AuthError::Rejected("Invalid admin credentials".to_string())),
                }
            }),
            Err(e) => Err(e),
        };

        match outcome {
            Ok((token, user)) => {
                self.authenticate(token, user);
                self.is_loading = false;
                self.persist();
                Ok(())
            }
            Err(e) => Err(self.fail(e, "Login failed")),
        }
    }

    pub async fn register(&mut self, registration: &Registration) -> Result<(), AuthError> {
        self.is_loading = true;
        self.error = None;

        let outcome = match self.api.register(registration).await {
            Ok(token) => decode_token(&token).map(|user| (token, user)),
            Err(e) => Err(e),
        };

        match outcome {
            Ok((token, user)) => {
                self.authenticate(token, user);
                self.is_loading = false;
                self.persist();
                info!("Registration successful");
                Ok(())
            }
            Err(e) => Err(self.fail(e, "Registration failed")),
        }
    }

    pub async fn update_profile(&mut self, update: &ProfileUpdate) -> Result<(), AuthError> {
        let Some(token) = self.snapshot.token.clone() else {
            return Err(self.fail(AuthError::NotAuthenticated, "Profile update failed"));
        };

        self.is_loading = true;
        self.error = None;

        match self.api.update_profile(&token, update).await {
            Ok(user) => {
                self.snapshot.user = Some(user);
                self.is_loading = false;
                self.persist();
                info!("Profile updated successfully");
                Ok(())
            }
            Err(e) => Err(self.fail(e, "Profile update failed")),
        }
    }

    /// One attempt to swap the token for a fresh one
    ///
    /// # Returns
    /// * `bool` - Whether a new token was obtained; state is untouched on failure
    pub async fn refresh_token(&mut self) -> bool {
        let Some(token) = self.snapshot.token.clone() else {
            return false;
        };

        let refreshed = match self.api.refresh(&token).await {
            Ok(token) => decode_token(&token).map(|user| (token, user)),
            Err(e) => Err(e),
        };

        match refreshed {
            Ok((token, user)) => {
                self.authenticate(token, user);
                self.persist();
                true
            }
            Err(e) => {
                warn!("Error refreshing token: {}", e);
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryStore;
    use base64::Engine as _;

    fn make_token(claims: serde_json::Value) -> String {
        let header = URL_SAFE_NO_PAD.encode(br#"{"alg":"HS256","typ":"JWT"}"#);
        let payload = URL_SAFE_NO_PAD.encode(claims.to_string());
        format!("{}.{}.signature", header, payload)
    }

    struct FakeApi {
        token: Result<String, String>,
    }

    #[async_trait]
    impl AuthApi for FakeApi {
        async fn login(&self, _email: &str, _password: &str) -> Result<String, AuthError> {
            self.token.clone().map_err(AuthError::Rejected)
        }

        async fn register(&self, _registration: &Registration) -> Result<String, AuthError> {
            self.token.clone().map_err(AuthError::Rejected)
        }

        async fn update_profile(&self, _token: &str, update: &ProfileUpdate) -> Result<UserClaims, AuthError> {
            Ok(UserClaims {
                name: update.name.clone(),
                ..UserClaims::default()
            })
        }

        async fn refresh(&self, _token: &str) -> Result<String, AuthError> {
            Err(AuthError::Request("status 401".to_string()))
        }
    }

    fn store_with(token: Result<String, String>) -> (Arc<MemoryStore>, AuthStore) {
        let kv = Arc::new(MemoryStore::new());
        let auth = AuthStore::load(kv.clone(), Arc::new(FakeApi { token }));
        (kv, auth)
    }

    #[test]
    fn decodes_claims_with_numeric_subject() {
        let token = make_token(serde_json::json!({"sub": 42, "email": "a@b.c", "role": "user"}));
        let claims = decode_token(&token).unwrap();
        assert_eq!(claims.id.as_deref(), Some("42"));
        assert_eq!(claims.email.as_deref(), Some("a@b.c"));
        assert!(!claims.is_admin());
    }

    #[test]
    fn rejects_malformed_tokens() {
        assert!(matches!(decode_token("admin-token"), Err(AuthError::InvalidToken(_))));
        assert!(matches!(decode_token("a.!!!.c"), Err(AuthError::InvalidToken(_))));
    }

    #[test]
    fn expiry_in_the_past_is_expired() {
        let claims = UserClaims {
            exp: Some(chrono::Utc::now().timestamp() - 10),
            ..UserClaims::default()
        };
        assert!(claims.is_expired());
        assert!(!UserClaims::default().is_expired());
    }

    #[tokio::test]
    async fn login_persists_and_reloads() {
        let token = make_token(serde_json::json!({"sub": "u1", "role": "user"}));
        let (kv, mut auth) = store_with(Ok(token.clone()));

        auth.login("u@x.io", "pw", Role::User).await.unwrap();
        assert!(auth.is_authenticated());
        assert!(!auth.is_loading());

        let reloaded = AuthStore::load(kv, Arc::new(FakeApi { token: Ok(token.clone()) }));
        assert!(reloaded.is_authenticated());
        assert_eq!(reloaded.token(), Some(token.as_str()));
        assert_eq!(reloaded.user().unwrap().id.as_deref(), Some("u1"));
    }

    #[tokio::test]
    async fn admin_token_cannot_log_in_as_user() {
        let token = make_token(serde_json::json!({"sub": "root", "role": "admin"}));
        let (_, mut auth) = store_with(Ok(token));

        assert!(auth.login("a@x.io", "pw", Role::User).await.is_err());
        assert_eq!(auth.error(), Some("Invalid user credentials"));
        assert!(!auth.is_authenticated());

        assert!(auth.login("a@x.io", "pw", Role::Admin).await.is_ok());
        assert!(auth.user().unwrap().is_admin());
    }

    #[tokio::test]
    async fn service_message_surfaces_as_error() {
        let (_, mut auth) = store_with(Err("Bad password".to_string()));
        assert!(auth.login("u@x.io", "nope", Role::User).await.is_err());
        assert_eq!(auth.error(), Some("Bad password"));

        auth.clear_error();
        assert!(auth.error().is_none());
    }

    #[tokio::test]
    async fn failed_refresh_keeps_state() {
        let token = make_token(serde_json::json!({"sub": "u1"}));
        let (_, mut auth) = store_with(Ok(token.clone()));
        auth.set_token(Some(&token)).unwrap();

        assert!(!auth.refresh_token().await);
        assert_eq!(auth.token(), Some(token.as_str()));
    }

    #[tokio::test]
    async fn profile_update_requires_login() {
        let (_, mut auth) = store_with(Ok(String::new()));
        let update = ProfileUpdate {
            name: Some("New".to_string()),
            email: None,
        };
        assert!(matches!(
            auth.update_profile(&update).await,
            Err(AuthError::NotAuthenticated)
        ));
        assert_eq!(auth.error(), Some("Profile update failed"));
    }

    #[test]
    fn logout_clears_persisted_state() {
        let token = make_token(serde_json::json!({"sub": "u1"}));
        let (kv, mut auth) = store_with(Ok(token.clone()));
        auth.set_token(Some(&token)).unwrap();
        auth.logout();

        let reloaded = AuthStore::load(kv, Arc::new(FakeApi { token: Ok(token) }));
        assert!(!reloaded.is_authenticated());
        assert!(reloaded.token().is_none());
    }
}
