use crate::{
    AppState,
    access::{append_cookies, cleared_cookies, session_cookies},
    account::{self, NOT_ADMIN_MESSAGE, SignInOutcome},
    auth::{AdminUser, CurrentUser, RequestSession},
    error::AppError,
    models::{
        AccountOverview, CreateCustomOrderRequest, CustomOrder, CustomOrderStatusUpdate,
        DashboardStats, LoginView, Order, OrderStatusUpdate, Product, ProductInput, Role,
        SignInRequest, SignInResponse, SignUpRequest, UserProfile,
    },
    repository::ProductOrder,
};
use axum::{
    Json,
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::Deserialize;
use uuid::Uuid;

/// LoginQuery
///
/// Query string of the admin login page. `error=unauthorized` is set by the guards when a
/// signed-in user without the admin role was bounced.
#[derive(Deserialize, utoipa::IntoParams)]
pub struct LoginQuery {
    pub error: Option<String>,
}

/// Builds the JSON sign-in answer and attaches session cookies when a session was issued.
fn sign_in_response(outcome: SignInOutcome, secure: bool) -> Response {
    let status = if outcome.response.success {
        StatusCode::OK
    } else {
        StatusCode::UNAUTHORIZED
    };
    let mut response = (status, Json(outcome.response)).into_response();
    if let Some(session) = &outcome.session {
        append_cookies(response.headers_mut(), session_cookies(session, secure));
    }
    response
}

// --- Public ---

#[utoipa::path(get, path = "/health", responses((status = 200, description = "Alive")))]
pub async fn health() -> &'static str {
    "ok"
}

/// list_products
///
/// [Public Route] The storefront catalog, oldest pieces first.
#[utoipa::path(
    get,
    path = "/products",
    responses((status = 200, description = "Catalog", body = [Product]))
)]
pub async fn list_products(State(state): State<AppState>) -> Result<Json<Vec<Product>>, AppError> {
    let products = state.repo.list_products(ProductOrder::OldestFirst).await?;
    Ok(Json(products))
}

#[utoipa::path(
    get,
    path = "/products/{id}",
    responses(
        (status = 200, description = "Product", body = Product),
        (status = 404, description = "Not Found")
    )
)]
pub async fn get_product(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<Product>, AppError> {
    state
        .repo
        .get_product(id)
        .await?
        .map(Json)
        .ok_or(AppError::NotFound)
}

/// submit_custom_order
///
/// [Public Route] Checkout-free request for a bespoke piece. Always stored as `pending`.
#[utoipa::path(
    post,
    path = "/custom-orders",
    request_body = CreateCustomOrderRequest,
    responses(
        (status = 201, description = "Submitted", body = CustomOrder),
        (status = 400, description = "Invalid Request")
    )
)]
pub async fn submit_custom_order(
    State(state): State<AppState>,
    Json(payload): Json<CreateCustomOrderRequest>,
) -> Result<(StatusCode, Json<CustomOrder>), AppError> {
    payload.validate().map_err(AppError::Validation)?;
    let order = state.repo.create_custom_order(payload).await?;
    tracing::info!(custom_order_id = %order.id, "custom order submitted");
    Ok((StatusCode::CREATED, Json(order)))
}

/// sign_up
///
/// [Public Route] Storefront registration. Creates the identity and a `customer` profile;
/// the new customer still has to sign in.
#[utoipa::path(
    post,
    path = "/auth/sign-up",
    request_body = SignUpRequest,
    responses(
        (status = 201, description = "Registered", body = UserProfile),
        (status = 400, description = "Registration Failed")
    )
)]
pub async fn sign_up(
    State(state): State<AppState>,
    Json(payload): Json<SignUpRequest>,
) -> Result<(StatusCode, Json<UserProfile>), AppError> {
    let profile = account::sign_up_user(
        state.sessions.as_ref(),
        state.repo.as_ref(),
        payload,
        Role::Customer,
    )
    .await?;
    Ok((StatusCode::CREATED, Json(profile)))
}

/// register_admin
///
/// [Public Route] Back-office registration, the counterpart of the registration form on the
/// admin login page. Creates a profile with role `admin`.
#[utoipa::path(
    post,
    path = "/auth/register-admin",
    request_body = SignUpRequest,
    responses(
        (status = 201, description = "Registered", body = UserProfile),
        (status = 400, description = "Registration Failed")
    )
)]
pub async fn register_admin(
    State(state): State<AppState>,
    Json(payload): Json<SignUpRequest>,
) -> Result<(StatusCode, Json<UserProfile>), AppError> {
    let profile = account::sign_up_user(
        state.sessions.as_ref(),
        state.repo.as_ref(),
        payload,
        Role::Admin,
    )
    .await?;
    Ok((StatusCode::CREATED, Json(profile)))
}

/// sign_in
///
/// [Public Route] Answers `{ success, isAdmin }` and sets the session cookies on success.
#[utoipa::path(
    post,
    path = "/auth/sign-in",
    request_body = SignInRequest,
    responses(
        (status = 200, description = "Signed In", body = SignInResponse),
        (status = 401, description = "Rejected", body = SignInResponse)
    )
)]
pub async fn sign_in(
    State(state): State<AppState>,
    Json(payload): Json<SignInRequest>,
) -> Result<Response, AppError> {
    let outcome = account::sign_in_user(
        state.sessions.as_ref(),
        &state.resolver,
        &payload.email,
        &payload.password,
    )
    .await?;
    Ok(sign_in_response(outcome, state.config.secure_cookies()))
}

/// sign_out
///
/// [Public Route] Revokes the provider session (if any) and clears the cookies.
#[utoipa::path(post, path = "/auth/sign-out", responses((status = 204, description = "Signed Out")))]
pub async fn sign_out(
    State(state): State<AppState>,
    RequestSession(session): RequestSession,
) -> Response {
    account::sign_out_user(state.sessions.as_ref(), session.access_token()).await;
    let mut response = StatusCode::NO_CONTENT.into_response();
    append_cookies(
        response.headers_mut(),
        cleared_cookies(state.config.secure_cookies()),
    );
    response
}

// --- Authenticated ---

/// get_account
///
/// [Authenticated Route] The customer's profile plus every order and custom order placed
/// under their e-mail address.
#[utoipa::path(
    get,
    path = "/account",
    responses(
        (status = 200, description = "Account", body = AccountOverview),
        (status = 401, description = "Not Signed In")
    )
)]
pub async fn get_account(
    CurrentUser(user): CurrentUser,
    State(state): State<AppState>,
) -> Result<Json<AccountOverview>, AppError> {
    let profile = state.resolver.get_profile(user.id).await;
    let email = profile
        .as_ref()
        .map(|p| p.email.clone())
        .unwrap_or(user.email);

    let orders = state.repo.orders_for_email(&email).await?;
    let custom_orders = state.repo.custom_orders_for_email(&email).await?;

    Ok(Json(AccountOverview {
        email,
        profile,
        orders,
        custom_orders,
    }))
}

// --- Admin login (edge-guarded, no role required) ---

#[utoipa::path(
    get,
    path = "/admin/login",
    params(LoginQuery),
    responses(
        (status = 200, description = "Login View", body = LoginView),
        (status = 303, description = "Already signed in as admin")
    )
)]
pub async fn login_page(Query(query): Query<LoginQuery>) -> Json<LoginView> {
    let message = (query.error.as_deref() == Some("unauthorized"))
        .then(|| NOT_ADMIN_MESSAGE.to_string());
    Json(LoginView { message })
}

/// admin_login
///
/// Back-office sign-in. Non-admin accounts are signed back out and told why.
#[utoipa::path(
    post,
    path = "/admin/login",
    request_body = SignInRequest,
    responses(
        (status = 200, description = "Signed In", body = SignInResponse),
        (status = 401, description = "Rejected", body = SignInResponse)
    )
)]
pub async fn admin_login(
    State(state): State<AppState>,
    Json(payload): Json<SignInRequest>,
) -> Result<Response, AppError> {
    let outcome = account::admin_sign_in(
        state.sessions.as_ref(),
        &state.resolver,
        &payload.email,
        &payload.password,
    )
    .await?;
    Ok(sign_in_response(outcome, state.config.secure_cookies()))
}

// --- Admin ---

/// get_dashboard
///
/// [Admin Route] Catalog/order counters and the five latest orders.
#[utoipa::path(
    get,
    path = "/admin",
    responses(
        (status = 200, description = "Dashboard", body = DashboardStats),
        (status = 303, description = "Redirect to login")
    )
)]
pub async fn get_dashboard(
    AdminUser(_admin): AdminUser,
    State(state): State<AppState>,
) -> Result<Json<DashboardStats>, AppError> {
    Ok(Json(state.repo.dashboard_stats().await?))
}

#[utoipa::path(
    get,
    path = "/admin/products",
    responses((status = 200, description = "All Products", body = [Product]))
)]
pub async fn list_admin_products(
    AdminUser(_admin): AdminUser,
    State(state): State<AppState>,
) -> Result<Json<Vec<Product>>, AppError> {
    let products = state.repo.list_products(ProductOrder::NewestFirst).await?;
    Ok(Json(products))
}

#[utoipa::path(
    post,
    path = "/admin/products",
    request_body = ProductInput,
    responses(
        (status = 201, description = "Created", body = Product),
        (status = 400, description = "Invalid Product")
    )
)]
pub async fn create_product(
    AdminUser(admin): AdminUser,
    State(state): State<AppState>,
    Json(payload): Json<ProductInput>,
) -> Result<(StatusCode, Json<Product>), AppError> {
    payload.validate().map_err(AppError::Validation)?;
    let product = state.repo.create_product(payload).await?;
    tracing::info!(admin_id = %admin.id, product_id = %product.id, "product created");
    Ok((StatusCode::CREATED, Json(product)))
}

#[utoipa::path(
    put,
    path = "/admin/products/{id}",
    request_body = ProductInput,
    responses(
        (status = 200, description = "Updated", body = Product),
        (status = 404, description = "Not Found")
    )
)]
pub async fn update_product(
    AdminUser(_admin): AdminUser,
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(payload): Json<ProductInput>,
) -> Result<Json<Product>, AppError> {
    payload.validate().map_err(AppError::Validation)?;
    state
        .repo
        .update_product(id, payload)
        .await?
        .map(Json)
        .ok_or(AppError::NotFound)
}

#[utoipa::path(
    delete,
    path = "/admin/products/{id}",
    responses(
        (status = 204, description = "Deleted"),
        (status = 404, description = "Not Found")
    )
)]
pub async fn delete_product(
    AdminUser(admin): AdminUser,
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<StatusCode, AppError> {
    if !state.repo.delete_product(id).await? {
        return Err(AppError::NotFound);
    }
    tracing::info!(admin_id = %admin.id, product_id = %id, "product deleted");
    Ok(StatusCode::NO_CONTENT)
}

#[utoipa::path(
    get,
    path = "/admin/orders",
    responses((status = 200, description = "Orders", body = [Order]))
)]
pub async fn list_orders(
    AdminUser(_admin): AdminUser,
    State(state): State<AppState>,
) -> Result<Json<Vec<Order>>, AppError> {
    Ok(Json(state.repo.list_orders().await?))
}

#[utoipa::path(
    put,
    path = "/admin/orders/{id}/status",
    request_body = OrderStatusUpdate,
    responses(
        (status = 200, description = "Updated", body = Order),
        (status = 404, description = "Not Found")
    )
)]
pub async fn update_order_status(
    AdminUser(_admin): AdminUser,
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(payload): Json<OrderStatusUpdate>,
) -> Result<Json<Order>, AppError> {
    state
        .repo
        .set_order_status(id, payload.status)
        .await?
        .map(Json)
        .ok_or(AppError::NotFound)
}

#[utoipa::path(
    get,
    path = "/admin/custom-orders",
    responses((status = 200, description = "Custom Orders", body = [CustomOrder]))
)]
pub async fn list_custom_orders(
    AdminUser(_admin): AdminUser,
    State(state): State<AppState>,
) -> Result<Json<Vec<CustomOrder>>, AppError> {
    Ok(Json(state.repo.list_custom_orders().await?))
}

#[utoipa::path(
    put,
    path = "/admin/custom-orders/{id}/status",
    request_body = CustomOrderStatusUpdate,
    responses(
        (status = 200, description = "Updated", body = CustomOrder),
        (status = 404, description = "Not Found")
    )
)]
pub async fn update_custom_order_status(
    AdminUser(_admin): AdminUser,
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(payload): Json<CustomOrderStatusUpdate>,
) -> Result<Json<CustomOrder>, AppError> {
    state
        .repo
        .set_custom_order_status(id, payload.status)
        .await?
        .map(Json)
        .ok_or(AppError::NotFound)
}

#[utoipa::path(
    delete,
    path = "/admin/custom-orders/{id}",
    responses(
        (status = 204, description = "Deleted"),
        (status = 404, description = "Not Found")
    )
)]
pub async fn delete_custom_order(
    AdminUser(admin): AdminUser,
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<StatusCode, AppError> {
    if !state.repo.delete_custom_order(id).await? {
        return Err(AppError::NotFound);
    }
    tracing::info!(admin_id = %admin.id, custom_order_id = %id, "custom order deleted");
    Ok(StatusCode::NO_CONTENT)
}
