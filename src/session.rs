use std::{
    collections::HashMap,
    fmt,
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
};

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use jsonwebtoken::{DecodingKey, Validation, decode};
use serde::{Deserialize, Serialize};
use tokio::sync::{RwLock, broadcast};
use uuid::Uuid;

use crate::{config::AppConfig, error::AuthError};

/// AuthUser
///
/// The identity behind a live session, as reported by the session provider.
/// Carries no role: authorization always goes through the profile store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthUser {
    pub id: Uuid,
    pub email: String,
}

/// Session
///
/// An authenticated session issued by the provider. Tokens are opaque to this crate.
#[derive(Clone)]
pub struct Session {
    pub access_token: String,
    pub refresh_token: String,
    pub expires_at: DateTime<Utc>,
    pub user: AuthUser,
}

impl Session {
    /// Seconds until the access token expires, floored at zero.
    pub fn expires_in(&self) -> i64 {
        (self.expires_at - Utc::now()).num_seconds().max(0)
    }
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("user", &self.user)
            .field("expires_at", &self.expires_at)
            .finish_non_exhaustive()
    }
}

/// Notifications published by a provider whenever the session it manages changes.
#[derive(Debug, Clone)]
pub enum SessionEvent {
    SignedIn(Session),
    TokenRefreshed(Session),
    SignedOut { user_id: Option<Uuid> },
}

/// SessionSubscription
///
/// A live registration on a provider's session-change stream. Dropping it unsubscribes.
pub struct SessionSubscription {
    rx: broadcast::Receiver<SessionEvent>,
}

impl SessionSubscription {
    /// Waits for the next event. Returns `None` once the provider is gone.
    pub async fn recv(&mut self) -> Option<SessionEvent> {
        loop {
            match self.rx.recv().await {
                Ok(event) => return Some(event),
                // Missed events are harmless: every event triggers a full re-check anyway.
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    tracing::warn!(skipped, "session subscriber lagged behind");
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }
}

/// Fan-out of session events shared by the provider implementations.
#[derive(Clone)]
pub struct SessionEvents {
    tx: broadcast::Sender<SessionEvent>,
}

impl Default for SessionEvents {
    fn default() -> Self {
        let (tx, _) = broadcast::channel(32);
        Self { tx }
    }
}

impl SessionEvents {
    pub fn emit(&self, event: SessionEvent) {
        // No subscribers is the normal server-side case.
        let _ = self.tx.send(event);
    }

    pub fn subscribe(&self) -> SessionSubscription {
        SessionSubscription {
            rx: self.tx.subscribe(),
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

/// SessionProvider
///
/// Contract of the hosted identity service. Everything here is a pass-through to the
/// platform; the crate never stores credentials itself.
#[async_trait]
pub trait SessionProvider: Send + Sync {
    /// Validates an access token. `Ok(None)` means "no valid session" (expired, revoked,
    /// malformed); `Err` is reserved for the provider being unreachable.
    async fn get_user(&self, access_token: &str) -> Result<Option<AuthUser>, AuthError>;

    /// Trades a refresh token for a fresh session. `Ok(None)` when the refresh token is
    /// no longer valid.
    async fn refresh(&self, refresh_token: &str) -> Result<Option<Session>, AuthError>;

    async fn sign_in(&self, email: &str, password: &str) -> Result<Session, AuthError>;

    /// Creates a new identity. Does not sign the user in.
    async fn sign_up(&self, email: &str, password: &str) -> Result<AuthUser, AuthError>;

    async fn sign_out(&self, access_token: &str) -> Result<(), AuthError>;

    /// Removes an identity. Used to compensate a sign-up whose profile write failed.
    async fn delete_user(&self, user_id: Uuid) -> Result<(), AuthError>;

    fn on_session_change(&self) -> SessionSubscription;
}

/// SessionProviderState
///
/// The concrete type used to share the provider across the application state.
pub type SessionProviderState = Arc<dyn SessionProvider>;

/// A session re-derived from stored tokens. `refreshed` is set when the access token was
/// stale and the refresh token had to be used, so callers can persist the new tokens.
#[derive(Debug, Clone)]
pub struct Restored {
    pub user: AuthUser,
    pub refreshed: Option<Session>,
}

/// restore_session
///
/// Shared by the cookie (server/edge) and client session sources: try the access token,
/// fall back to the refresh token.
pub async fn restore_session(
    provider: &dyn SessionProvider,
    access_token: Option<&str>,
    refresh_token: Option<&str>,
) -> Result<Option<Restored>, AuthError> {
    if let Some(token) = access_token {
        if let Some(user) = provider.get_user(token).await? {
            return Ok(Some(Restored {
                user,
                refreshed: None,
            }));
        }
    }

    if let Some(token) = refresh_token {
        if let Some(session) = provider.refresh(token).await? {
            tracing::debug!(user_id = %session.user.id, "session restored from refresh token");
            return Ok(Some(Restored {
                user: session.user.clone(),
                refreshed: Some(session),
            }));
        }
    }

    Ok(None)
}

// --- Supabase (GoTrue) implementation ---

/// Claims
///
/// Payload of a Supabase access token.
#[derive(Debug, Serialize, Deserialize)]
pub struct Claims {
    /// The provider's user id.
    pub sub: Uuid,
    pub email: Option<String>,
    /// Always "authenticated" for user sessions.
    pub aud: String,
    pub exp: usize,
    pub iat: usize,
}

pub const TOKEN_AUDIENCE: &str = "authenticated";

#[derive(Deserialize)]
struct GoTrueUser {
    id: Uuid,
    #[serde(default)]
    email: Option<String>,
}

#[derive(Deserialize)]
struct GoTrueToken {
    access_token: String,
    refresh_token: String,
    expires_in: i64,
    #[serde(default)]
    expires_at: Option<i64>,
    user: GoTrueUser,
}

/// The signup endpoint answers with a full session when e-mail confirmation is disabled,
/// and with the bare user otherwise.
#[derive(Deserialize)]
#[serde(untagged)]
enum GoTrueSignUp {
    WithSession(GoTrueToken),
    UserOnly(GoTrueUser),
}

#[derive(Deserialize, Default)]
struct GoTrueError {
    msg: Option<String>,
    message: Option<String>,
    error_description: Option<String>,
}

impl GoTrueError {
    fn into_message(self) -> String {
        self.msg
            .or(self.error_description)
            .or(self.message)
            .unwrap_or_else(|| "request rejected by auth service".to_string())
    }
}

impl GoTrueToken {
    fn into_session(self) -> Session {
        let expires_at = self
            .expires_at
            .and_then(|ts| DateTime::<Utc>::from_timestamp(ts, 0))
            .unwrap_or_else(|| Utc::now() + Duration::seconds(self.expires_in));
        Session {
            access_token: self.access_token,
            refresh_token: self.refresh_token,
            expires_at,
            user: AuthUser {
                id: self.user.id,
                email: self.user.email.unwrap_or_default(),
            },
        }
    }
}

/// SupabaseAuth
///
/// Talks to the project's GoTrue REST API with `reqwest`. Access tokens are pre-checked
/// locally against the project JWT secret; tokens that pass are confirmed with
/// `GET /user`, so a signed-out session stops resolving immediately.
pub struct SupabaseAuth {
    http: reqwest::Client,
    base_url: String,
    anon_key: String,
    service_key: Option<String>,
    decoding_key: DecodingKey,
    events: SessionEvents,
}

impl SupabaseAuth {
    pub fn new(config: &AppConfig) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: config.supabase_url.trim_end_matches('/').to_string(),
            anon_key: config.supabase_anon_key.clone(),
            service_key: config.supabase_service_key.clone(),
            decoding_key: DecodingKey::from_secret(config.jwt_secret.as_bytes()),
            events: SessionEvents::default(),
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}/auth/v1/{}", self.base_url, path)
    }

    fn decode_claims(&self, access_token: &str) -> Option<Claims> {
        let mut validation = Validation::default();
        validation.validate_exp = true;
        validation.set_audience(&[TOKEN_AUDIENCE]);

        match decode::<Claims>(access_token, &self.decoding_key, &validation) {
            Ok(data) => Some(data.claims),
            Err(e) => {
                tracing::debug!(error = %e, "access token rejected");
                None
            }
        }
    }

    /// Maps a non-success response into `Rejected` (4xx) or `Unavailable` (5xx).
    async fn failure(response: reqwest::Response) -> AuthError {
        let status = response.status();
        if status.is_server_error() {
            return AuthError::Unavailable(format!("auth service returned {status}"));
        }
        let body = response.json::<GoTrueError>().await.unwrap_or_default();
        AuthError::Rejected(body.into_message())
    }
}

#[async_trait]
impl SessionProvider for SupabaseAuth {
    async fn get_user(&self, access_token: &str) -> Result<Option<AuthUser>, AuthError> {
        // Forged or expired tokens never leave the process.
        if self.decode_claims(access_token).is_none() {
            return Ok(None);
        }

        // A well-formed token may still belong to a revoked session; only the auth
        // service knows.
        let response = self
            .http
            .get(self.url("user"))
            .header("apikey", &self.anon_key)
            .bearer_auth(access_token)
            .send()
            .await?;

        let status = response.status();
        if status.is_client_error() {
            tracing::debug!(%status, "auth service no longer recognises the session");
            return Ok(None);
        }
        if !status.is_success() {
            return Err(Self::failure(response).await);
        }

        let user = response.json::<GoTrueUser>().await?;
        Ok(Some(AuthUser {
            id: user.id,
            email: user.email.unwrap_or_default(),
        }))
    }

    async fn refresh(&self, refresh_token: &str) -> Result<Option<Session>, AuthError> {
        let response = self
            .http
            .post(self.url("token?grant_type=refresh_token"))
            .header("apikey", &self.anon_key)
            .json(&serde_json::json!({ "refresh_token": refresh_token }))
            .send()
            .await?;

        if response.status().is_client_error() {
            // Revoked or already-used refresh token.
            return Ok(None);
        }
        if !response.status().is_success() {
            return Err(Self::failure(response).await);
        }

        let session = response.json::<GoTrueToken>().await?.into_session();
        self.events.emit(SessionEvent::TokenRefreshed(session.clone()));
        Ok(Some(session))
    }

    async fn sign_in(&self, email: &str, password: &str) -> Result<Session, AuthError> {
        let response = self
            .http
            .post(self.url("token?grant_type=password"))
            .header("apikey", &self.anon_key)
            .json(&serde_json::json!({ "email": email, "password": password }))
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(Self::failure(response).await);
        }

        let session = response.json::<GoTrueToken>().await?.into_session();
        tracing::info!(user_id = %session.user.id, "user signed in");
        self.events.emit(SessionEvent::SignedIn(session.clone()));
        Ok(session)
    }

    async fn sign_up(&self, email: &str, password: &str) -> Result<AuthUser, AuthError> {
        let response = self
            .http
            .post(self.url("signup"))
            .header("apikey", &self.anon_key)
            .json(&serde_json::json!({ "email": email, "password": password }))
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(Self::failure(response).await);
        }

        let user = match response.json::<GoTrueSignUp>().await? {
            GoTrueSignUp::WithSession(token) => token.user,
            GoTrueSignUp::UserOnly(user) => user,
        };
        Ok(AuthUser {
            id: user.id,
            email: user.email.unwrap_or_else(|| email.to_string()),
        })
    }

    async fn sign_out(&self, access_token: &str) -> Result<(), AuthError> {
        let user_id = self.decode_claims(access_token).map(|claims| claims.sub);
        let response = self
            .http
            .post(self.url("logout"))
            .header("apikey", &self.anon_key)
            .bearer_auth(access_token)
            .send()
            .await?;

        // 401 means the session was already gone, which is what we wanted.
        let status = response.status();
        if !status.is_success() && status != reqwest::StatusCode::UNAUTHORIZED {
            return Err(Self::failure(response).await);
        }

        self.events.emit(SessionEvent::SignedOut { user_id });
        Ok(())
    }

    async fn delete_user(&self, user_id: Uuid) -> Result<(), AuthError> {
        let service_key = self
            .service_key
            .as_deref()
            .ok_or(AuthError::MissingServiceKey)?;

        let response = self
            .http
            .delete(self.url(&format!("admin/users/{user_id}")))
            .header("apikey", service_key)
            .bearer_auth(service_key)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(Self::failure(response).await);
        }
        Ok(())
    }

    fn on_session_change(&self) -> SessionSubscription {
        self.events.subscribe()
    }
}

// --- In-memory implementation ---

struct MemoryIdentity {
    id: Uuid,
    email: String,
    password: String,
}

struct MemorySessionRecord {
    user: AuthUser,
    expires_at: DateTime<Utc>,
    refresh_token: String,
}

#[derive(Default)]
struct MemoryAuthState {
    // Keyed by lower-cased email.
    identities: HashMap<String, MemoryIdentity>,
    // Keyed by access token.
    sessions: HashMap<String, MemorySessionRecord>,
    // Refresh token -> access token it was issued with.
    refresh_tokens: HashMap<String, String>,
}

/// MemorySessionProvider
///
/// A process-local provider with GoTrue-like behaviour (duplicate e-mails rejected,
/// rotating refresh tokens, six-character password minimum). Used for local runs without
/// a Supabase stack and throughout the test suite.
pub struct MemorySessionProvider {
    state: RwLock<MemoryAuthState>,
    events: SessionEvents,
    session_ttl: Duration,
    /// When set, every call fails as if the auth service were unreachable.
    unavailable: AtomicBool,
}

impl Default for MemorySessionProvider {
    fn default() -> Self {
        Self::new()
    }
}

impl MemorySessionProvider {
    pub fn new() -> Self {
        Self::with_session_ttl(Duration::hours(1))
    }

    /// Access tokens expire `ttl` after issue. A zero TTL yields tokens that are stale
    /// immediately, which forces every lookup through the refresh path.
    pub fn with_session_ttl(ttl: Duration) -> Self {
        Self {
            state: RwLock::new(MemoryAuthState::default()),
            events: SessionEvents::default(),
            session_ttl: ttl,
            unavailable: AtomicBool::new(false),
        }
    }

    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    pub async fn identity_count(&self) -> usize {
        self.state.read().await.identities.len()
    }

    pub fn subscriber_count(&self) -> usize {
        self.events.subscriber_count()
    }

    fn check_available(&self) -> Result<(), AuthError> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(AuthError::Unavailable("memory provider switched off".to_string()));
        }
        Ok(())
    }

    fn issue(&self, state: &mut MemoryAuthState, user: AuthUser) -> Session {
        let access_token = Uuid::new_v4().simple().to_string();
        let refresh_token = Uuid::new_v4().simple().to_string();
        let expires_at = Utc::now() + self.session_ttl;

        state.sessions.insert(
            access_token.clone(),
            MemorySessionRecord {
                user: user.clone(),
                expires_at,
                refresh_token: refresh_token.clone(),
            },
        );
        state
            .refresh_tokens
            .insert(refresh_token.clone(), access_token.clone());

        Session {
            access_token,
            refresh_token,
            expires_at,
            user,
        }
    }
}

#[async_trait]
impl SessionProvider for MemorySessionProvider {
    async fn get_user(&self, access_token: &str) -> Result<Option<AuthUser>, AuthError> {
        self.check_available()?;
        let state = self.state.read().await;
        Ok(state
            .sessions
            .get(access_token)
            .filter(|record| record.expires_at > Utc::now())
            .map(|record| record.user.clone()))
    }

    async fn refresh(&self, refresh_token: &str) -> Result<Option<Session>, AuthError> {
        self.check_available()?;
        let session = {
            let mut state = self.state.write().await;
            let Some(old_access) = state.refresh_tokens.remove(refresh_token) else {
                return Ok(None);
            };
            let Some(record) = state.sessions.remove(&old_access) else {
                return Ok(None);
            };
            self.issue(&mut state, record.user)
        };
        self.events.emit(SessionEvent::TokenRefreshed(session.clone()));
        Ok(Some(session))
    }

    async fn sign_in(&self, email: &str, password: &str) -> Result<Session, AuthError> {
        self.check_available()?;
        let session = {
            let mut state = self.state.write().await;
            let user = match state.identities.get(&email.to_lowercase()) {
                Some(identity) if identity.password == password => AuthUser {
                    id: identity.id,
                    email: identity.email.clone(),
                },
                _ => return Err(AuthError::Rejected("Invalid login credentials".to_string())),
            };
            self.issue(&mut state, user)
        };
        self.events.emit(SessionEvent::SignedIn(session.clone()));
        Ok(session)
    }

    async fn sign_up(&self, email: &str, password: &str) -> Result<AuthUser, AuthError> {
        self.check_available()?;
        if password.chars().count() < 6 {
            return Err(AuthError::Rejected(
                "Password should be at least 6 characters".to_string(),
            ));
        }

        let mut state = self.state.write().await;
        let key = email.to_lowercase();
        if state.identities.contains_key(&key) {
            return Err(AuthError::Rejected("User already registered".to_string()));
        }

        let identity = MemoryIdentity {
            id: Uuid::new_v4(),
            email: email.to_string(),
            password: password.to_string(),
        };
        let user = AuthUser {
            id: identity.id,
            email: identity.email.clone(),
        };
        state.identities.insert(key, identity);
        Ok(user)
    }

    async fn sign_out(&self, access_token: &str) -> Result<(), AuthError> {
        self.check_available()?;
        let user_id = {
            let mut state = self.state.write().await;
            let record = state.sessions.remove(access_token);
            if let Some(record) = &record {
                state.refresh_tokens.remove(&record.refresh_token);
            }
            record.map(|r| r.user.id)
        };
        self.events.emit(SessionEvent::SignedOut { user_id });
        Ok(())
    }

    async fn delete_user(&self, user_id: Uuid) -> Result<(), AuthError> {
        self.check_available()?;
        let mut state = self.state.write().await;
        state.identities.retain(|_, identity| identity.id != user_id);

        let revoked: Vec<String> = state
            .sessions
            .iter()
            .filter(|(_, record)| record.user.id == user_id)
            .map(|(token, _)| token.clone())
            .collect();
        for token in revoked {
            if let Some(record) = state.sessions.remove(&token) {
                state.refresh_tokens.remove(&record.refresh_token);
            }
        }
        Ok(())
    }

    fn on_session_change(&self) -> SessionSubscription {
        self.events.subscribe()
    }
}
