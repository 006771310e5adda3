use std::sync::Arc;

use axum::{
    Router,
    extract::{FromRef, Request},
    http::HeaderName,
    middleware::{self, Next},
    response::Response,
};
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

use tower::ServiceBuilder;
use tower_http::{
    cors::{Any, CorsLayer},
    request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer},
    trace::{DefaultOnResponse, TraceLayer},
};
use tracing::{Level, Span};

// --- Module Structure ---

pub mod access;
pub mod account;
pub mod auth;
pub mod client;
pub mod config;
pub mod edge;
pub mod error;
pub mod handlers;
pub mod models;
pub mod repository;
pub mod session;

pub mod routes;
use routes::{admin, authenticated, public};

// --- Public Re-exports ---

pub use access::{RoleResolver, SessionSource};
pub use config::AppConfig;
pub use error::{AppError, AuthError, StoreError};
pub use repository::{MemoryRepository, PostgresRepository, RepositoryState};
pub use session::{MemorySessionProvider, SessionProviderState, SupabaseAuth};

/// ApiDoc
///
/// OpenAPI document for every HTTP route, served at `/api-docs/openapi.json` and browsable
/// through Swagger UI.
#[derive(OpenApi)]
#[openapi(
    paths(
        handlers::health, handlers::list_products, handlers::get_product,
        handlers::submit_custom_order, handlers::sign_up, handlers::register_admin,
        handlers::sign_in, handlers::sign_out, handlers::get_account,
        handlers::login_page, handlers::admin_login, handlers::get_dashboard,
        handlers::list_admin_products, handlers::create_product, handlers::update_product,
        handlers::delete_product, handlers::list_orders, handlers::update_order_status,
        handlers::list_custom_orders, handlers::update_custom_order_status,
        handlers::delete_custom_order
    ),
    components(
        schemas(
            models::Role, models::UserProfile, models::Product, models::ProductInput,
            models::OrderStatus, models::Order, models::OrderStatusUpdate,
            models::CustomOrderStatus, models::CustomOrder, models::CreateCustomOrderRequest,
            models::CustomOrderStatusUpdate, models::SignUpRequest, models::SignInRequest,
            models::SignInResponse, models::LoginView, models::DashboardStats,
            models::AccountOverview,
        )
    ),
    tags(
        (name = "dans-shop", description = "Storefront and back-office API")
    )
)]
struct ApiDoc;

/// AppState
///
/// The single container of shared services. Cloned per request; every field is cheap to
/// clone.
#[derive(Clone)]
pub struct AppState {
    /// Profile store and shop tables.
    pub repo: RepositoryState,
    /// The hosted identity service.
    pub sessions: SessionProviderState,
    /// Shared by the edge guard, the extractors and the account flows.
    pub resolver: Arc<RoleResolver>,
    pub config: AppConfig,
}

impl AppState {
    pub fn new(repo: RepositoryState, sessions: SessionProviderState, config: AppConfig) -> Self {
        Self {
            resolver: Arc::new(RoleResolver::new(repo.clone())),
            repo,
            sessions,
            config,
        }
    }
}

// --- Axum FromRef Extractor Implementations ---

impl FromRef<AppState> for RepositoryState {
    fn from_ref(app_state: &AppState) -> RepositoryState {
        app_state.repo.clone()
    }
}

impl FromRef<AppState> for SessionProviderState {
    fn from_ref(app_state: &AppState) -> SessionProviderState {
        app_state.sessions.clone()
    }
}

impl FromRef<AppState> for AppConfig {
    fn from_ref(app_state: &AppState) -> AppConfig {
        app_state.config.clone()
    }
}

/// require_session
///
/// Route layer for the authenticated module: the `CurrentUser` extractor rejects with 401
/// before the handler runs.
async fn require_session(_user: auth::CurrentUser, request: Request, next: Next) -> Response {
    next.run(request).await
}

/// create_router
///
/// Assembles the routing tree and the middleware stack. From the outside in: CORS,
/// request id + tracing, the session layer (cookie parsing and refreshed-cookie write
/// back), the edge guard, then the routes.
pub fn create_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_methods(Any)
        .allow_origin(Any)
        .allow_headers(Any);

    let x_request_id = HeaderName::from_static("x-request-id");

    let base_router = Router::new()
        .merge(SwaggerUi::new("/swagger-ui").url("/api-docs/openapi.json", ApiDoc::openapi()))
        .merge(public::public_routes())
        .merge(
            authenticated::authenticated_routes()
                .route_layer(middleware::from_fn_with_state(state.clone(), require_session)),
        )
        .merge(admin::admin_routes())
        .fallback(|| async { AppError::NotFound })
        .with_state(state.clone());

    base_router
        // The edge guard inspects the full path, so it wraps the whole router rather than
        // a nested one. It also covers unmatched /admin paths.
        .layer(middleware::from_fn_with_state(state.clone(), edge::edge_guard))
        .layer(middleware::from_fn_with_state(state, access::attach_session))
        .layer(
            ServiceBuilder::new()
                .layer(SetRequestIdLayer::new(x_request_id.clone(), MakeRequestUuid))
                .layer(
                    TraceLayer::new_for_http()
                        .make_span_with(trace_span_logger)
                        .on_response(
                            DefaultOnResponse::new()
                                .level(Level::INFO)
                                .latency_unit(tower_http::LatencyUnit::Millis),
                        ),
                )
                .layer(PropagateRequestIdLayer::new(x_request_id)),
        )
        .layer(cors)
}

/// trace_span_logger
///
/// Span for one HTTP request, correlated by `x-request-id`.
fn trace_span_logger(request: &axum::http::Request<axum::body::Body>) -> Span {
    let request_id = request
        .headers()
        .get("x-request-id")
        .and_then(|value| value.to_str().ok())
        .unwrap_or("unknown");

    tracing::info_span!(
        "http_request",
        method = ?request.method(),
        uri = %request.uri().path(),
        req_id = %request_id,
    )
}
