use axum::{
    extract::{FromRef, FromRequestParts},
    http::request::Parts,
    response::{IntoResponse, Redirect, Response},
};

use std::{convert::Infallible, sync::Arc};

use crate::{
    AppState,
    access::{CookieSession, SessionSource, request_session},
    edge::{LOGIN_PATH, UNAUTHORIZED_REDIRECT},
    error::AppError,
    session::AuthUser,
};

/// CurrentUser Extractor
///
/// Resolves the signed-in user from the request's session cookies (or bearer token).
/// Used by customer pages; rejects with 401 when there is no valid session.
#[derive(Debug, Clone)]
pub struct CurrentUser(pub AuthUser);

impl<S> FromRequestParts<S> for CurrentUser
where
    S: Send + Sync,
    AppState: FromRef<S>,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let state = AppState::from_ref(state);
        let session = session_of(parts, &state);

        session
            .current_user()
            .await
            .map(CurrentUser)
            .ok_or(AppError::Unauthorized)
    }
}

/// AdminUser Extractor
///
/// The per-page server check behind every back-office handler. Runs the same role
/// resolution as the edge guard, against the same per-request session, and answers with a
/// redirect instead of an error body so browsers land on the login page.
#[derive(Debug, Clone)]
pub struct AdminUser(pub AuthUser);

/// Why a request was refused admin access.
#[derive(Debug)]
pub enum AdminRejection {
    NotSignedIn,
    NotAdmin,
}

impl IntoResponse for AdminRejection {
    fn into_response(self) -> Response {
        match self {
            AdminRejection::NotSignedIn => Redirect::to(LOGIN_PATH).into_response(),
            AdminRejection::NotAdmin => Redirect::to(UNAUTHORIZED_REDIRECT).into_response(),
        }
    }
}

impl<S> FromRequestParts<S> for AdminUser
where
    S: Send + Sync,
    AppState: FromRef<S>,
{
    type Rejection = AdminRejection;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let state = AppState::from_ref(state);
        let session = session_of(parts, &state);

        match state.resolver.resolve(session.as_ref()).await {
            None => Err(AdminRejection::NotSignedIn),
            Some(actor) if !actor.is_admin => {
                tracing::warn!(user_id = %actor.user.id, "non-admin reached an admin handler");
                Err(AdminRejection::NotAdmin)
            }
            Some(actor) => Ok(AdminUser(actor.user)),
        }
    }
}

/// RequestSession Extractor
///
/// Hands the raw per-request session to handlers that act on the tokens themselves
/// (sign-out). Never rejects.
pub struct RequestSession(pub Arc<CookieSession>);

impl<S> FromRequestParts<S> for RequestSession
where
    S: Send + Sync,
    AppState: FromRef<S>,
{
    type Rejection = Infallible;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let state = AppState::from_ref(state);
        Ok(RequestSession(session_of(parts, &state)))
    }
}

/// The request's session handle, shared with the edge guard when the session layer runs.
pub fn session_of(parts: &Parts, state: &AppState) -> Arc<CookieSession> {
    request_session(&parts.extensions, &parts.headers, &state.sessions)
}
