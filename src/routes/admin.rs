use crate::{AppState, handlers};
use axum::{
    Router,
    routing::{delete, get, put},
};

/// Admin Router Module
///
/// The back office. Every path here is at or below `/admin`, so the edge guard sees all
/// of them first. Apart from the login page, each handler also takes the `AdminUser`
/// extractor, which repeats the role check against the same request session.
pub fn admin_routes() -> Router<AppState> {
    Router::new()
        // GET|POST /admin/login
        // Open to anyone the edge guard lets through: anonymous visitors and non-admins.
        // A signed-in admin is redirected to the dashboard before reaching it.
        .route(
            "/admin/login",
            get(handlers::login_page).post(handlers::admin_login),
        )
        // GET /admin
        // Dashboard counters and the latest orders.
        .route("/admin", get(handlers::get_dashboard))
        .route(
            "/admin/products",
            get(handlers::list_admin_products).post(handlers::create_product),
        )
        .route(
            "/admin/products/{id}",
            put(handlers::update_product).delete(handlers::delete_product),
        )
        .route("/admin/orders", get(handlers::list_orders))
        .route("/admin/orders/{id}/status", put(handlers::update_order_status))
        .route("/admin/custom-orders", get(handlers::list_custom_orders))
        .route(
            "/admin/custom-orders/{id}/status",
            put(handlers::update_custom_order_status),
        )
        .route(
            "/admin/custom-orders/{id}",
            delete(handlers::delete_custom_order),
        )
}
