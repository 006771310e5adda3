use crate::{AppState, handlers};
use axum::{Router, routing::get};

/// Authenticated Router Module
///
/// Customer pages. The router in `lib.rs` puts `require_session` in front of this module,
/// and the handlers take the `CurrentUser` extractor for the identity itself.
pub fn authenticated_routes() -> Router<AppState> {
    Router::<AppState>::new()
        // GET /account
        // Profile plus the orders and custom orders placed under the account's e-mail.
        .route("/account", get(handlers::get_account))
}
