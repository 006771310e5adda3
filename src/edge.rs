use axum::{
    extract::{Request, State},
    middleware::Next,
    response::{IntoResponse, Redirect, Response},
};

use crate::{
    AppState,
    access::{Actor, request_session},
};

/// Root of the back office. Everything at or below it is gated.
pub const ADMIN_PREFIX: &str = "/admin";
pub const LOGIN_PATH: &str = "/admin/login";
/// Login path carrying the "you are signed in but not an admin" indicator.
pub const UNAUTHORIZED_REDIRECT: &str = "/admin/login?error=unauthorized";

/// True for `/admin` and `/admin/...`, but not for look-alikes such as `/administrator`.
pub fn is_guarded(path: &str) -> bool {
    path == ADMIN_PREFIX
        || path
            .strip_prefix(ADMIN_PREFIX)
            .is_some_and(|rest| rest.starts_with('/'))
}

/// Exact match: `/admin/login/` is not served, so it is guarded like any other page.
fn is_login(path: &str) -> bool {
    path == LOGIN_PATH
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EdgeDecision {
    Pass,
    RedirectToLogin,
    RedirectUnauthorized,
    RedirectToDashboard,
}

impl EdgeDecision {
    fn into_redirect(self) -> Option<Redirect> {
        match self {
            EdgeDecision::Pass => None,
            EdgeDecision::RedirectToLogin => Some(Redirect::to(LOGIN_PATH)),
            EdgeDecision::RedirectUnauthorized => Some(Redirect::to(UNAUTHORIZED_REDIRECT)),
            EdgeDecision::RedirectToDashboard => Some(Redirect::to(ADMIN_PREFIX)),
        }
    }
}

/// decide
///
/// The edge policy for a guarded path, given who (if anyone) is signed in.
///
/// - login page: admins are sent on to the dashboard, everyone else sees the form.
/// - any other admin page: anonymous visitors go to login, signed-in non-admins go to
///   login with the unauthorized indicator, admins pass.
pub fn decide(path: &str, actor: Option<&Actor>) -> EdgeDecision {
    match (is_login(path), actor) {
        (true, Some(actor)) if actor.is_admin => EdgeDecision::RedirectToDashboard,
        (true, _) => EdgeDecision::Pass,
        (false, None) => EdgeDecision::RedirectToLogin,
        (false, Some(actor)) if !actor.is_admin => EdgeDecision::RedirectUnauthorized,
        (false, Some(_)) => EdgeDecision::Pass,
    }
}

/// edge_guard
///
/// Request filter in front of every `/admin` route. Runs before any handler, so a denied
/// request never reaches page code. Cookie refresh side effects are handled by the
/// surrounding `attach_session` layer.
pub async fn edge_guard(State(state): State<AppState>, request: Request, next: Next) -> Response {
    let path = request.uri().path().to_owned();
    if !is_guarded(&path) {
        return next.run(request).await;
    }

    let session = request_session(request.extensions(), request.headers(), &state.sessions);
    let actor = state.resolver.resolve(session.as_ref()).await;
    let decision = decide(&path, actor.as_ref());

    match decision.into_redirect() {
        None => next.run(request).await,
        Some(redirect) => {
            tracing::info!(
                %path,
                user_id = ?actor.as_ref().map(|a| a.user.id),
                ?decision,
                "edge guard redirect"
            );
            redirect.into_response()
        }
    }
}
