use crate::{AppState, handlers};
use axum::{
    Router,
    routing::{get, post},
};

/// Public Router Module
///
/// Endpoints open to anonymous visitors. Nothing here reads or writes back-office data
/// except the custom-order submission, which only ever inserts a `pending` request.
pub fn public_routes() -> Router<AppState> {
    Router::new()
        // GET /health
        // Liveness check for the load balancer.
        .route("/health", get(handlers::health))
        // GET /products
        // The catalog, oldest first.
        .route("/products", get(handlers::list_products))
        .route("/products/{id}", get(handlers::get_product))
        // POST /custom-orders
        // Checkout-free request form. Validated, stored as pending.
        .route("/custom-orders", post(handlers::submit_custom_order))
        // Account flows. Sign-in and sign-out manage the sb-* session cookies.
        .route("/auth/sign-up", post(handlers::sign_up))
        .route("/auth/register-admin", post(handlers::register_admin))
        .route("/auth/sign-in", post(handlers::sign_in))
        .route("/auth/sign-out", post(handlers::sign_out))
}
