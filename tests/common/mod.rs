#![allow(dead_code)]

use std::sync::Arc;

use axum::{
    Router,
    body::Body,
    http::{Request, Response, header},
};
use chrono::Duration;
use dans_shop::{
    AppConfig, AppState, MemoryRepository, MemorySessionProvider, create_router,
    account,
    models::{Role, SignUpRequest, UserProfile},
    session::{Session, SessionProvider},
};

pub const PASSWORD: &str = "correct-horse";

/// In-memory application: both external collaborators replaced by the memory
/// implementations, handles kept so tests can inspect and sabotage them.
pub struct TestContext {
    pub repo: Arc<MemoryRepository>,
    pub sessions: Arc<MemorySessionProvider>,
    pub state: AppState,
}

impl TestContext {
    pub fn new() -> Self {
        Self::with_provider(MemorySessionProvider::new())
    }

    pub fn with_provider(provider: MemorySessionProvider) -> Self {
        let repo = Arc::new(MemoryRepository::new());
        let sessions = Arc::new(provider);
        let state = AppState::new(repo.clone(), sessions.clone(), AppConfig::default());
        Self {
            repo,
            sessions,
            state,
        }
    }

    /// Access tokens are stale as soon as they are issued; only refresh tokens work.
    pub fn with_expired_access_tokens() -> Self {
        Self::with_provider(MemorySessionProvider::with_session_ttl(Duration::zero()))
    }

    pub fn router(&self) -> Router {
        create_router(self.state.clone())
    }

    pub async fn register(&self, email: &str, role: Role) -> UserProfile {
        account::sign_up_user(
            self.sessions.as_ref(),
            self.repo.as_ref(),
            sign_up_request(email),
            role,
        )
        .await
        .expect("registration succeeds")
    }

    pub async fn sign_in(&self, email: &str) -> Session {
        self.sessions
            .sign_in(email, PASSWORD)
            .await
            .expect("sign in succeeds")
    }

    /// Registers `email` with `role` and returns a signed-in session for it.
    pub async fn signed_in(&self, email: &str, role: Role) -> Session {
        self.register(email, role).await;
        self.sign_in(email).await
    }
}

pub fn sign_up_request(email: &str) -> SignUpRequest {
    SignUpRequest {
        email: email.to_string(),
        password: PASSWORD.to_string(),
        first_name: "Test".to_string(),
        last_name: "User".to_string(),
        phone: None,
    }
}

pub fn cookie_header(session: &Session) -> String {
    format!(
        "sb-access-token={}; sb-refresh-token={}",
        session.access_token, session.refresh_token
    )
}

pub fn get(uri: &str, session: Option<&Session>) -> Request<Body> {
    let mut builder = Request::builder().uri(uri);
    if let Some(session) = session {
        builder = builder.header(header::COOKIE, cookie_header(session));
    }
    builder.body(Body::empty()).unwrap()
}

pub fn location<B>(response: &Response<B>) -> Option<&str> {
    response
        .headers()
        .get(header::LOCATION)
        .and_then(|v| v.to_str().ok())
}

/// Names of every cookie set by the response.
pub fn set_cookie_names<B>(response: &Response<B>) -> Vec<String> {
    response
        .headers()
        .get_all(header::SET_COOKIE)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .filter_map(|v| cookie::Cookie::parse(v.to_string()).ok())
        .map(|c| c.name().to_string())
        .collect()
}

pub async fn body_json(response: Response<Body>) -> serde_json::Value {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    serde_json::from_slice(&bytes).unwrap()
}
