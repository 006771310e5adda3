mod common;

use std::{
    collections::HashMap,
    sync::{
        Arc, Mutex,
        atomic::{AtomicBool, AtomicUsize, Ordering},
    },
    time::SystemTime,
};

use axum::{
    Json, Router,
    body::Body,
    extract::{Path, Query, State},
    http::{HeaderMap, Request, Response, StatusCode, header},
    response::IntoResponse,
    routing::{delete, get, post},
};
use dans_shop::{
    AppConfig, AppState, AuthError, MemoryRepository, SupabaseAuth, create_router,
    models::{ProfileUpsert, Role},
    repository::Repository,
    session::{Claims, SessionEvent, SessionProvider, TOKEN_AUDIENCE},
};
use jsonwebtoken::{EncodingKey, Header, encode};
use serde_json::{Value, json};
use tokio::net::TcpListener;
use tower::ServiceExt;
use uuid::Uuid;

const SERVICE_KEY: &str = "local-service-role-key";
const PASSWORD: &str = "correct-horse";

// --- Token helpers ---

fn now() -> usize {
    SystemTime::now()
        .duration_since(SystemTime::UNIX_EPOCH)
        .unwrap()
        .as_secs() as usize
}

fn token(secret: &str, sub: Uuid, aud: &str, exp: usize) -> String {
    let claims = Claims {
        sub,
        email: Some("owner@shop.test".to_string()),
        aud: aud.to_string(),
        exp,
        iat: now(),
    };
    encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(secret.as_bytes()),
    )
    .unwrap()
}

// --- Stand-in GoTrue server ---

/// Just enough of the GoTrue REST API to drive `SupabaseAuth`: password and refresh-token
/// grants, signup, logout, user lookup and admin deletion. Sessions live until logout.
#[derive(Default)]
struct FakeGoTrue {
    secret: String,
    // email -> (user id, password)
    users: Mutex<HashMap<String, (Uuid, String)>>,
    // access token -> (user id, email)
    sessions: Mutex<HashMap<String, (Uuid, String)>>,
    // refresh token -> access token
    refresh_tokens: Mutex<HashMap<String, String>>,
    deleted: Mutex<Vec<Uuid>>,
    user_lookups: AtomicUsize,
    down: AtomicBool,
}

type Fake = Arc<FakeGoTrue>;

impl FakeGoTrue {
    fn add_user(&self, email: &str, password: &str) -> Uuid {
        let id = Uuid::new_v4();
        self.users
            .lock()
            .unwrap()
            .insert(email.to_lowercase(), (id, password.to_string()));
        id
    }

    fn issue(&self, id: Uuid, email: &str) -> Value {
        // session_id keeps tokens minted within the same second distinct.
        let claims = json!({
            "sub": id,
            "email": email,
            "aud": TOKEN_AUDIENCE,
            "exp": now() + 3600,
            "iat": now(),
            "session_id": Uuid::new_v4(),
        });
        let access = encode(
            &Header::default(),
            &claims,
            &EncodingKey::from_secret(self.secret.as_bytes()),
        )
        .unwrap();
        let refresh = Uuid::new_v4().simple().to_string();

        self.sessions
            .lock()
            .unwrap()
            .insert(access.clone(), (id, email.to_string()));
        self.refresh_tokens
            .lock()
            .unwrap()
            .insert(refresh.clone(), access.clone());

        json!({
            "access_token": access,
            "token_type": "bearer",
            "expires_in": 3600,
            "refresh_token": refresh,
            "user": { "id": id, "email": email },
        })
    }

    fn is_down(&self) -> bool {
        self.down.load(Ordering::SeqCst)
    }

    fn deleted(&self) -> Vec<Uuid> {
        self.deleted.lock().unwrap().clone()
    }
}

fn unavailable() -> Response<Body> {
    (
        StatusCode::SERVICE_UNAVAILABLE,
        Json(json!({ "msg": "upstream unavailable" })),
    )
        .into_response()
}

fn bearer(headers: &HeaderMap) -> Option<String> {
    headers
        .get(header::AUTHORIZATION)?
        .to_str()
        .ok()?
        .strip_prefix("Bearer ")
        .map(str::to_string)
}

async fn fake_token(
    State(fake): State<Fake>,
    Query(query): Query<HashMap<String, String>>,
    Json(body): Json<Value>,
) -> Response<Body> {
    if fake.is_down() {
        return unavailable();
    }

    match query.get("grant_type").map(String::as_str) {
        Some("password") => {
            let email = body["email"].as_str().unwrap_or_default().to_lowercase();
            let password = body["password"].as_str().unwrap_or_default();
            let user = fake.users.lock().unwrap().get(&email).cloned();
            match user {
                Some((id, stored)) if stored == password => {
                    Json(fake.issue(id, &email)).into_response()
                }
                _ => (
                    StatusCode::BAD_REQUEST,
                    Json(json!({
                        "error": "invalid_grant",
                        "error_description": "Invalid login credentials",
                    })),
                )
                    .into_response(),
            }
        }
        Some("refresh_token") => {
            let refresh = body["refresh_token"].as_str().unwrap_or_default();
            let access = fake.refresh_tokens.lock().unwrap().remove(refresh);
            let user = access.and_then(|a| fake.sessions.lock().unwrap().remove(&a));
            match user {
                Some((id, email)) => Json(fake.issue(id, &email)).into_response(),
                None => (
                    StatusCode::BAD_REQUEST,
                    Json(json!({
                        "error": "invalid_grant",
                        "error_description": "Invalid Refresh Token: Refresh Token Not Found",
                    })),
                )
                    .into_response(),
            }
        }
        _ => StatusCode::BAD_REQUEST.into_response(),
    }
}

async fn fake_signup(State(fake): State<Fake>, Json(body): Json<Value>) -> Response<Body> {
    if fake.is_down() {
        return unavailable();
    }

    let email = body["email"].as_str().unwrap_or_default().to_lowercase();
    let password = body["password"].as_str().unwrap_or_default();
    if fake.users.lock().unwrap().contains_key(&email) {
        return (
            StatusCode::UNPROCESSABLE_ENTITY,
            Json(json!({ "code": 422, "msg": "User already registered" })),
        )
            .into_response();
    }

    let id = fake.add_user(&email, password);
    if email.starts_with("confirm") {
        // E-mail confirmation pending: the bare user, no session.
        Json(json!({
            "id": id,
            "email": email,
            "confirmation_sent_at": "2026-10-18T09:00:00Z",
        }))
        .into_response()
    } else {
        Json(fake.issue(id, &email)).into_response()
    }
}

async fn fake_user(State(fake): State<Fake>, headers: HeaderMap) -> Response<Body> {
    fake.user_lookups.fetch_add(1, Ordering::SeqCst);
    if fake.is_down() {
        return unavailable();
    }

    let session = bearer(&headers).and_then(|t| fake.sessions.lock().unwrap().get(&t).cloned());
    match session {
        Some((id, email)) => {
            Json(json!({ "id": id, "email": email, "aud": TOKEN_AUDIENCE })).into_response()
        }
        None => (
            StatusCode::FORBIDDEN,
            Json(json!({
                "code": 403,
                "error_code": "session_not_found",
                "msg": "Session from session_id claim in JWT does not exist",
            })),
        )
            .into_response(),
    }
}

async fn fake_logout(State(fake): State<Fake>, headers: HeaderMap) -> Response<Body> {
    let Some(access) = bearer(&headers) else {
        return StatusCode::UNAUTHORIZED.into_response();
    };
    if fake.sessions.lock().unwrap().remove(&access).is_none() {
        return (StatusCode::UNAUTHORIZED, Json(json!({ "msg": "invalid JWT" }))).into_response();
    }
    fake.refresh_tokens
        .lock()
        .unwrap()
        .retain(|_, issued_with| *issued_with != access);
    StatusCode::NO_CONTENT.into_response()
}

async fn fake_delete_user(
    State(fake): State<Fake>,
    Path(id): Path<Uuid>,
    headers: HeaderMap,
) -> Response<Body> {
    if bearer(&headers).as_deref() != Some(SERVICE_KEY) {
        return (
            StatusCode::UNAUTHORIZED,
            Json(json!({ "msg": "This endpoint requires a valid service role key" })),
        )
            .into_response();
    }
    fake.users.lock().unwrap().retain(|_, (uid, _)| *uid != id);
    fake.deleted.lock().unwrap().push(id);
    Json(json!({})).into_response()
}

/// Serves a fresh fake on an ephemeral port and returns it with a config pointing at it.
async fn spawn_gotrue() -> (Fake, AppConfig) {
    let mut config = AppConfig::default();
    let fake = Arc::new(FakeGoTrue {
        secret: config.jwt_secret.clone(),
        ..Default::default()
    });

    let router = Router::new()
        .route("/auth/v1/token", post(fake_token))
        .route("/auth/v1/signup", post(fake_signup))
        .route("/auth/v1/user", get(fake_user))
        .route("/auth/v1/logout", post(fake_logout))
        .route("/auth/v1/admin/users/{id}", delete(fake_delete_user))
        .with_state(fake.clone());

    let listener = TcpListener::bind("127.0.0.1:0")
        .await
        .expect("Failed to bind port");
    let port = listener.local_addr().unwrap().port();
    tokio::spawn(async move {
        axum::serve(listener, router).await.unwrap();
    });

    config.supabase_url = format!("http://127.0.0.1:{port}");
    config.supabase_service_key = Some(SERVICE_KEY.to_string());
    (fake, config)
}

// --- App helpers ---

struct ShopApp {
    router: Router,
    repo: Arc<MemoryRepository>,
}

impl ShopApp {
    fn new(config: &AppConfig) -> Self {
        let repo = Arc::new(MemoryRepository::new());
        let sessions = Arc::new(SupabaseAuth::new(config));
        let router = create_router(AppState::new(repo.clone(), sessions, config.clone()));
        Self { router, repo }
    }

    async fn grant_profile(&self, user_id: Uuid, email: &str, role: Role) {
        self.repo
            .upsert_profile(ProfileUpsert {
                user_id,
                email: email.to_string(),
                first_name: "Dan".to_string(),
                last_name: "Maker".to_string(),
                phone: None,
                role,
            })
            .await
            .unwrap();
    }

    async fn send(&self, request: Request<Body>) -> Response<Body> {
        self.router.clone().oneshot(request).await.unwrap()
    }
}

fn post_json(uri: &str, body: Value, cookies: Option<&str>) -> Request<Body> {
    let mut builder = Request::builder()
        .method("POST")
        .uri(uri)
        .header(header::CONTENT_TYPE, "application/json");
    if let Some(cookies) = cookies {
        builder = builder.header(header::COOKIE, cookies);
    }
    builder.body(Body::from(body.to_string())).unwrap()
}

fn get_with(uri: &str, name: header::HeaderName, value: String) -> Request<Body> {
    Request::builder()
        .uri(uri)
        .header(name, value)
        .body(Body::empty())
        .unwrap()
}

/// The response's Set-Cookie values as a Cookie request header.
fn cookies_from(response: &Response<Body>) -> String {
    response
        .headers()
        .get_all(header::SET_COOKIE)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .filter_map(|v| cookie::Cookie::parse(v.to_string()).ok())
        .map(|c| format!("{}={}", c.name(), c.value()))
        .collect::<Vec<_>>()
        .join("; ")
}

// --- Session liveness ---

#[tokio::test]
async fn test_signed_out_session_loses_admin_access() {
    let (fake, config) = spawn_gotrue().await;
    let app = ShopApp::new(&config);
    let id = fake.add_user("owner@shop.test", PASSWORD);
    app.grant_profile(id, "owner@shop.test", Role::Admin).await;

    let response = app
        .send(post_json(
            "/auth/sign-in",
            json!({ "email": "owner@shop.test", "password": PASSWORD }),
            None,
        ))
        .await;
    assert_eq!(response.status(), StatusCode::OK);
    let cookies = cookies_from(&response);

    let response = app
        .send(get_with("/admin", header::COOKIE, cookies.clone()))
        .await;
    assert_eq!(response.status(), StatusCode::OK);

    let response = app
        .send(post_json("/auth/sign-out", json!({}), Some(&cookies)))
        .await;
    assert_eq!(response.status(), StatusCode::NO_CONTENT);

    // Same, still unexpired tokens: the auth service no longer knows the session and the
    // refresh token went with it.
    let response = app.send(get_with("/admin", header::COOKIE, cookies)).await;
    assert_eq!(response.status(), StatusCode::SEE_OTHER);
    assert_eq!(common::location(&response), Some("/admin/login"));
}

#[tokio::test]
async fn test_auth_service_outage_is_treated_as_no_session() {
    let (fake, config) = spawn_gotrue().await;
    let app = ShopApp::new(&config);
    let auth = SupabaseAuth::new(&config);
    let id = fake.add_user("owner@shop.test", PASSWORD);
    app.grant_profile(id, "owner@shop.test", Role::Admin).await;
    let session = auth.sign_in("owner@shop.test", PASSWORD).await.unwrap();

    fake.down.store(true, Ordering::SeqCst);

    let result = auth.get_user(&session.access_token).await;
    assert!(matches!(result, Err(AuthError::Unavailable(_))));

    let response = app
        .send(get_with(
            "/admin",
            header::AUTHORIZATION,
            format!("Bearer {}", session.access_token),
        ))
        .await;
    assert_eq!(response.status(), StatusCode::SEE_OTHER);
    assert_eq!(common::location(&response), Some("/admin/login"));
}

#[tokio::test]
async fn test_unknown_session_is_rejected_by_auth_service() {
    let (fake, config) = spawn_gotrue().await;
    let auth = SupabaseAuth::new(&config);

    // Correctly signed, but never issued by the auth service.
    let minted = token(&config.jwt_secret, Uuid::new_v4(), TOKEN_AUDIENCE, now() + 3600);
    assert!(auth.get_user(&minted).await.unwrap().is_none());
    assert_eq!(fake.user_lookups.load(Ordering::SeqCst), 1);

    // Forged and expired tokens are turned away before any request is made.
    let forged = token("another-secret", Uuid::new_v4(), TOKEN_AUDIENCE, now() + 3600);
    let expired = token(&config.jwt_secret, Uuid::new_v4(), TOKEN_AUDIENCE, now() - 3600);
    assert!(auth.get_user(&forged).await.unwrap().is_none());
    assert!(auth.get_user(&expired).await.unwrap().is_none());
    assert_eq!(fake.user_lookups.load(Ordering::SeqCst), 1);
}

// --- Provider calls ---

#[tokio::test]
async fn test_sign_in_status_mapping() {
    let (fake, config) = spawn_gotrue().await;
    let auth = SupabaseAuth::new(&config);
    let id = fake.add_user("owner@shop.test", PASSWORD);

    let session = auth.sign_in("owner@shop.test", PASSWORD).await.unwrap();
    assert_eq!(session.user.id, id);
    assert_eq!(session.user.email, "owner@shop.test");
    assert!(session.expires_in() > 0);

    let user = auth.get_user(&session.access_token).await.unwrap();
    assert_eq!(user.map(|u| u.id), Some(id));

    let wrong = auth.sign_in("owner@shop.test", "nope-nope").await;
    match wrong {
        Err(AuthError::Rejected(message)) => assert_eq!(message, "Invalid login credentials"),
        other => panic!("expected rejection, got {other:?}"),
    }

    fake.down.store(true, Ordering::SeqCst);
    let down = auth.sign_in("owner@shop.test", PASSWORD).await;
    assert!(matches!(down, Err(AuthError::Unavailable(_))));
}

#[tokio::test]
async fn test_refresh_status_mapping() {
    let (fake, config) = spawn_gotrue().await;
    let auth = SupabaseAuth::new(&config);
    fake.add_user("owner@shop.test", PASSWORD);
    let session = auth.sign_in("owner@shop.test", PASSWORD).await.unwrap();

    let refreshed = auth
        .refresh(&session.refresh_token)
        .await
        .unwrap()
        .expect("refresh token is live");
    assert_eq!(refreshed.user.id, session.user.id);
    assert_ne!(refreshed.access_token, session.access_token);
    assert_ne!(refreshed.refresh_token, session.refresh_token);

    // Spent refresh tokens are a 4xx: no session, not an error.
    assert!(auth.refresh(&session.refresh_token).await.unwrap().is_none());

    fake.down.store(true, Ordering::SeqCst);
    let down = auth.refresh(&refreshed.refresh_token).await;
    assert!(matches!(down, Err(AuthError::Unavailable(_))));
}

#[tokio::test]
async fn test_sign_up_response_shapes() {
    let (fake, config) = spawn_gotrue().await;
    let auth = SupabaseAuth::new(&config);

    // Confirmation disabled: the answer carries a full session.
    let user = auth.sign_up("a@x.com", PASSWORD).await.unwrap();
    assert_eq!(user.email, "a@x.com");

    // Confirmation pending: only the user comes back.
    let pending = auth.sign_up("confirm-me@x.com", PASSWORD).await.unwrap();
    assert_eq!(pending.email, "confirm-me@x.com");
    assert_ne!(pending.id, user.id);

    let duplicate = auth.sign_up("a@x.com", PASSWORD).await;
    match duplicate {
        Err(AuthError::Rejected(message)) => assert_eq!(message, "User already registered"),
        other => panic!("expected rejection, got {other:?}"),
    }

    fake.down.store(true, Ordering::SeqCst);
    let down = auth.sign_up("b@x.com", PASSWORD).await;
    assert!(matches!(down, Err(AuthError::Unavailable(_))));
}

#[tokio::test]
async fn test_sign_out_accepts_already_ended_session() {
    let (fake, config) = spawn_gotrue().await;
    let auth = SupabaseAuth::new(&config);
    let id = fake.add_user("owner@shop.test", PASSWORD);
    let session = auth.sign_in("owner@shop.test", PASSWORD).await.unwrap();
    let mut events = auth.on_session_change();

    auth.sign_out(&session.access_token).await.unwrap();
    match events.recv().await {
        Some(SessionEvent::SignedOut { user_id }) => assert_eq!(user_id, Some(id)),
        other => panic!("expected sign-out event, got {other:?}"),
    }

    // The auth service answers 401 the second time round.
    auth.sign_out(&session.access_token).await.unwrap();
    assert!(auth.get_user(&session.access_token).await.unwrap().is_none());
}

#[tokio::test]
async fn test_delete_user_with_service_key() {
    let (fake, config) = spawn_gotrue().await;
    let auth = SupabaseAuth::new(&config);
    let id = fake.add_user("orphan@x.com", PASSWORD);

    auth.delete_user(id).await.unwrap();
    assert_eq!(fake.deleted(), vec![id]);

    let mut wrong_key = config.clone();
    wrong_key.supabase_service_key = Some("not-the-service-key".to_string());
    let result = SupabaseAuth::new(&wrong_key).delete_user(id).await;
    assert!(matches!(result, Err(AuthError::Rejected(_))));
}

#[tokio::test]
async fn test_delete_user_requires_service_key() {
    let config = AppConfig::default();
    let auth = SupabaseAuth::new(&config);

    let result = auth.delete_user(Uuid::new_v4()).await;
    assert!(matches!(result, Err(AuthError::MissingServiceKey)));
}

// --- Through the router ---

#[tokio::test]
async fn test_failed_profile_write_removes_identity_at_auth_service() {
    let (fake, config) = spawn_gotrue().await;
    let app = ShopApp::new(&config);
    let signup = json!({
        "email": "a@x.com",
        "password": PASSWORD,
        "first_name": "Ada",
        "last_name": "Lovelace",
        "phone": null,
    });

    app.repo.fail_profile_writes(true);
    let response = app.send(post_json("/auth/sign-up", signup.clone(), None)).await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(fake.deleted().len(), 1);
    assert!(!fake.users.lock().unwrap().contains_key("a@x.com"));

    app.repo.fail_profile_writes(false);
    let response = app.send(post_json("/auth/sign-up", signup, None)).await;
    assert_eq!(response.status(), StatusCode::CREATED);
    assert_eq!(app.repo.profile_count().await, 1);
}

#[tokio::test]
async fn test_bearer_token_reaches_admin_dashboard() {
    let (fake, config) = spawn_gotrue().await;
    let app = ShopApp::new(&config);
    let auth = SupabaseAuth::new(&config);
    let id = fake.add_user("owner@shop.test", PASSWORD);
    app.grant_profile(id, "owner@shop.test", Role::Admin).await;
    let session = auth.sign_in("owner@shop.test", PASSWORD).await.unwrap();

    let response = app
        .send(get_with(
            "/admin",
            header::AUTHORIZATION,
            format!("Bearer {}", session.access_token),
        ))
        .await;

    assert_eq!(response.status(), StatusCode::OK);
    let stats = common::body_json(response).await;
    assert_eq!(stats["total_products"], 0);
}

#[tokio::test]
async fn test_access_cookie_for_customer_is_bounced() {
    let (fake, config) = spawn_gotrue().await;
    let app = ShopApp::new(&config);
    let auth = SupabaseAuth::new(&config);
    let id = fake.add_user("a@x.com", PASSWORD);
    app.grant_profile(id, "a@x.com", Role::Customer).await;
    let session = auth.sign_in("a@x.com", PASSWORD).await.unwrap();

    let response = app
        .send(get_with(
            "/admin/orders",
            header::COOKIE,
            format!("sb-access-token={}", session.access_token),
        ))
        .await;

    assert_eq!(response.status(), StatusCode::SEE_OTHER);
    assert_eq!(
        common::location(&response),
        Some("/admin/login?error=unauthorized")
    );
}

#[tokio::test]
async fn test_expired_token_without_refresh_is_anonymous() {
    let (fake, config) = spawn_gotrue().await;
    let app = ShopApp::new(&config);
    let expired = token(&config.jwt_secret, Uuid::new_v4(), TOKEN_AUDIENCE, now() - 3600);

    let response = app
        .send(get_with(
            "/admin",
            header::COOKIE,
            format!("sb-access-token={expired}"),
        ))
        .await;

    assert_eq!(response.status(), StatusCode::SEE_OTHER);
    assert_eq!(common::location(&response), Some("/admin/login"));
    assert_eq!(fake.user_lookups.load(Ordering::SeqCst), 0);
}
