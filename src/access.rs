use std::sync::Arc;

use async_trait::async_trait;
use axum::{
    extract::{Request, State},
    http::{HeaderMap, HeaderValue, header},
    middleware::Next,
    response::Response,
};
use cookie::{Cookie, SameSite, time::Duration as CookieDuration};
use tokio::sync::OnceCell;
use uuid::Uuid;

use crate::{
    AppState,
    models::UserProfile,
    repository::RepositoryState,
    session::{AuthUser, Restored, Session, SessionProviderState, restore_session},
};

pub const ACCESS_COOKIE: &str = "sb-access-token";
pub const REFRESH_COOKIE: &str = "sb-refresh-token";
const SESSION_COOKIE_MAX_AGE_DAYS: i64 = 30;

/// SessionSource
///
/// Anything that can answer "who is signed in right now". Implemented for request cookies
/// (server pages and the edge guard) and for the client-held session, so the role check
/// below is written exactly once.
#[async_trait]
pub trait SessionSource: Send + Sync {
    /// `None` when there is no usable session. Provider failures are logged by the
    /// implementation and also come back as `None`.
    async fn current_user(&self) -> Option<AuthUser>;
}

/// A signed-in actor together with the resolved role decision.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Actor {
    pub user: AuthUser,
    pub is_admin: bool,
}

/// RoleResolver
///
/// Decides whether the current actor holds the `admin` role. The profile store is read
/// on every call; nothing is cached between calls.
///
/// Every failure degrades to "not admin": a missing profile row, an unreachable store and
/// an absent session all answer `false`.
pub struct RoleResolver {
    profiles: RepositoryState,
}

impl RoleResolver {
    pub fn new(profiles: RepositoryState) -> Self {
        Self { profiles }
    }

    pub async fn is_admin<S: SessionSource + ?Sized>(&self, source: &S) -> bool {
        match source.current_user().await {
            Some(user) => self.is_admin_user(user.id).await,
            None => false,
        }
    }

    /// Same decision as `is_admin` but also hands back the user, so callers that need
    /// both do not fetch the session twice.
    pub async fn resolve<S: SessionSource + ?Sized>(&self, source: &S) -> Option<Actor> {
        let user = source.current_user().await?;
        let is_admin = self.is_admin_user(user.id).await;
        Some(Actor { user, is_admin })
    }

    pub async fn is_admin_user(&self, user_id: Uuid) -> bool {
        self.get_profile(user_id)
            .await
            .is_some_and(|profile| profile.is_admin())
    }

    /// get_profile
    ///
    /// Never propagates errors. A lookup failure and a missing row both yield `None`.
    pub async fn get_profile(&self, user_id: Uuid) -> Option<UserProfile> {
        match self.profiles.find_profile_by_user_id(user_id).await {
            Ok(Some(profile)) => Some(profile),
            Ok(None) => {
                tracing::warn!(%user_id, "no profile row for authenticated user");
                None
            }
            Err(e) => {
                tracing::error!(%user_id, error = %e, "profile lookup failed, treating as non-admin");
                None
            }
        }
    }
}

/// CookieSession
///
/// The session as carried by one HTTP request: the `sb-*` cookies, or an
/// `Authorization: Bearer` header for API clients. Resolution happens at most once per
/// request and the result lives only as long as the request.
pub struct CookieSession {
    provider: SessionProviderState,
    access_token: Option<String>,
    refresh_token: Option<String>,
    resolved: OnceCell<Option<Restored>>,
}

impl CookieSession {
    pub fn from_headers(provider: SessionProviderState, headers: &HeaderMap) -> Self {
        let mut access_token = None;
        let mut refresh_token = None;

        for value in headers.get_all(header::COOKIE) {
            let Ok(raw) = value.to_str() else { continue };
            for cookie in Cookie::split_parse(raw).flatten() {
                match cookie.name() {
                    ACCESS_COOKIE => access_token = Some(cookie.value().to_string()),
                    REFRESH_COOKIE => refresh_token = Some(cookie.value().to_string()),
                    _ => {}
                }
            }
        }

        if access_token.is_none() {
            access_token = headers
                .get(header::AUTHORIZATION)
                .and_then(|h| h.to_str().ok())
                .and_then(|h| h.strip_prefix("Bearer "))
                .map(str::to_string);
        }

        Self {
            provider,
            access_token: access_token.filter(|t| !t.is_empty()),
            refresh_token: refresh_token.filter(|t| !t.is_empty()),
            resolved: OnceCell::new(),
        }
    }

    pub fn access_token(&self) -> Option<&str> {
        self.access_token.as_deref()
    }

    async fn restored(&self) -> Option<&Restored> {
        self.resolved
            .get_or_init(|| async {
                match restore_session(
                    self.provider.as_ref(),
                    self.access_token.as_deref(),
                    self.refresh_token.as_deref(),
                )
                .await
                {
                    Ok(restored) => restored,
                    Err(e) => {
                        tracing::warn!(error = %e, "session provider failed, treating request as anonymous");
                        None
                    }
                }
            })
            .await
            .as_ref()
    }

    /// The new session if resolving this request had to spend the refresh token. Its
    /// tokens must be written back to the client.
    pub fn refreshed_session(&self) -> Option<&Session> {
        self.resolved
            .get()
            .and_then(Option::as_ref)
            .and_then(|restored| restored.refreshed.as_ref())
    }
}

#[async_trait]
impl SessionSource for CookieSession {
    async fn current_user(&self) -> Option<AuthUser> {
        self.restored().await.map(|restored| restored.user.clone())
    }
}

fn session_cookie(name: &'static str, value: String, secure: bool) -> Cookie<'static> {
    Cookie::build((name, value))
        .path("/")
        .http_only(true)
        .same_site(SameSite::Lax)
        .secure(secure)
        .max_age(CookieDuration::days(SESSION_COOKIE_MAX_AGE_DAYS))
        .build()
}

/// Cookies that persist `session` on the client.
pub fn session_cookies(session: &Session, secure: bool) -> [Cookie<'static>; 2] {
    [
        session_cookie(ACCESS_COOKIE, session.access_token.clone(), secure),
        session_cookie(REFRESH_COOKIE, session.refresh_token.clone(), secure),
    ]
}

/// Cookies that remove the session from the client.
pub fn cleared_cookies(secure: bool) -> [Cookie<'static>; 2] {
    [ACCESS_COOKIE, REFRESH_COOKIE].map(|name| {
        let mut cookie = session_cookie(name, String::new(), secure);
        cookie.make_removal();
        cookie
    })
}

/// Appends `Set-Cookie` headers for every cookie given.
pub fn append_cookies<'a>(headers: &mut HeaderMap, cookies: impl IntoIterator<Item = Cookie<'a>>) {
    for cookie in cookies {
        match HeaderValue::from_str(&cookie.to_string()) {
            Ok(value) => {
                headers.append(header::SET_COOKIE, value);
            }
            Err(e) => tracing::error!(error = %e, cookie = cookie.name(), "unencodable cookie"),
        }
    }
}

/// attach_session
///
/// Outermost session layer. Builds the request's `CookieSession`, shares it with the
/// edge guard and the extractors through request extensions, and writes refreshed tokens
/// back on the way out.
pub async fn attach_session(
    State(state): State<AppState>,
    mut request: Request,
    next: Next,
) -> Response {
    let session = Arc::new(CookieSession::from_headers(
        state.sessions.clone(),
        request.headers(),
    ));
    request.extensions_mut().insert(session.clone());

    let mut response = next.run(request).await;

    if let Some(refreshed) = session.refreshed_session() {
        tracing::debug!(user_id = %refreshed.user.id, "rewriting refreshed session cookies");
        append_cookies(
            response.headers_mut(),
            session_cookies(refreshed, state.config.secure_cookies()),
        );
    }
    response
}

/// The request's session: the one attached by `attach_session`, or a fresh one when the
/// layer is not installed (e.g. a router assembled in a test).
pub fn request_session(
    extensions: &axum::http::Extensions,
    headers: &HeaderMap,
    provider: &SessionProviderState,
) -> Arc<CookieSession> {
    extensions
        .get::<Arc<CookieSession>>()
        .cloned()
        .unwrap_or_else(|| Arc::new(CookieSession::from_headers(provider.clone(), headers)))
}
