//! End-to-end HTTP behaviour: bearer middleware for the API and the
//! cookie-session login flow for the server-rendered client.

mod common;

use axum::{
    Json, Router,
    body::Body,
    http::{
        Request, StatusCode,
        header::{COOKIE, LOCATION, SET_COOKIE},
    },
    middleware::from_fn_with_state,
    routing::get,
};
use fittrack_auth::{
    AuthCore,
    web::{
        CurrentSession, CurrentUser, FlowState, RequiredRole, SessionState, attach_session,
        authenticate, require_role, session_router,
    },
};
use serde_json::json;
use tower::ServiceExt;
use url::Url;
use wiremock::{
    Mock, MockServer, ResponseTemplate,
    matchers::{method, path},
};

use common::{coach_claims, issuer, mount_jwks, now_unix, sign_token, test_config, token_path};

fn core_for(server: &MockServer) -> AuthCore {
    AuthCore::new(test_config(&server.uri())).expect("config wires")
}

async fn whoami(CurrentUser(user): CurrentUser) -> Json<serde_json::Value> {
    Json(json!({ "username": user.username }))
}

async fn coach_page(CurrentSession(session): CurrentSession) -> String {
    session.identity.username
}

/// `/api/admin` behind bearer authentication and an `admin` realm role.
fn api_router(core: &AuthCore) -> Router {
    Router::new()
        .route("/api/admin", get(whoami))
        .layer(from_fn_with_state(RequiredRole("admin"), require_role))
        .layer(from_fn_with_state(core.verifier.clone(), authenticate))
}

/// `/coach` behind the cookie session and a `coach` realm role, plus the
/// login/callback/logout routes.
fn ssr_router(core: &AuthCore) -> Router {
    let session_state = SessionState {
        store: core.store.clone(),
        secret: core.config.session.secret.clone(),
    };
    Router::new()
        .route("/coach", get(coach_page))
        .layer(from_fn_with_state(RequiredRole("coach"), require_role))
        .layer(from_fn_with_state(session_state, attach_session))
        .merge(session_router(FlowState {
            flow: core.flow.clone(),
            config: core.config.clone(),
        }))
}

async fn body_json(response: axum::response::Response) -> serde_json::Value {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .expect("body reads");
    serde_json::from_slice(&bytes).expect("body is json")
}

fn get_request(uri: &str) -> Request<Body> {
    Request::builder().uri(uri).body(Body::empty()).unwrap()
}

/// First `Set-Cookie` whose name matches, as a `name=value` pair suitable
/// for a `Cookie` request header.
fn set_cookie_pair(response: &axum::response::Response, name: &str) -> Option<String> {
    response
        .headers()
        .get_all(SET_COOKIE)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .find(|v| v.starts_with(&format!("{name}=")))
        .and_then(|v| v.split(';').next())
        .map(str::to_string)
}

fn location_url(response: &axum::response::Response) -> Url {
    let location = response
        .headers()
        .get(LOCATION)
        .and_then(|v| v.to_str().ok())
        .expect("redirect carries a location");
    Url::parse(location).expect("location is absolute")
}

// ── Bearer middleware ──

#[tokio::test]
async fn missing_authorization_header_is_401() {
    let server = MockServer::start().await;
    mount_jwks(&server, 0).await;
    let app = api_router(&core_for(&server));

    let response = app.oneshot(get_request("/api/admin")).await.unwrap();

    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    assert_eq!(body_json(response).await["error"], "unauthorized");
}

#[tokio::test]
async fn non_jwt_bearer_token_is_401_without_network() {
    let server = MockServer::start().await;
    mount_jwks(&server, 0).await;
    let app = api_router(&core_for(&server));

    let request = Request::builder()
        .uri("/api/admin")
        .header("authorization", "Bearer not-a-jwt")
        .body(Body::empty())
        .unwrap();
    let response = app.oneshot(request).await.unwrap();

    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn role_denial_is_403_naming_required_and_held_roles() {
    let server = MockServer::start().await;
    mount_jwks(&server, 1).await;
    let app = api_router(&core_for(&server));

    // Authenticated as a coach, but the route demands admin.
    let token = sign_token(&coach_claims(&issuer(&server.uri()), 300));
    let request = Request::builder()
        .uri("/api/admin")
        .header("authorization", format!("Bearer {token}"))
        .body(Body::empty())
        .unwrap();
    let response = app.oneshot(request).await.unwrap();

    assert_eq!(response.status(), StatusCode::FORBIDDEN);
    let body = body_json(response).await;
    assert_eq!(body["error"], "forbidden");
    assert_eq!(body["required"], "admin");
    let held: Vec<&str> = body["userRoles"]
        .as_array()
        .unwrap()
        .iter()
        .map(|v| v.as_str().unwrap())
        .collect();
    assert!(held.contains(&"coach"));
    assert!(!held.contains(&"admin"));
}

#[tokio::test]
async fn admin_token_reaches_admin_route() {
    let server = MockServer::start().await;
    mount_jwks(&server, 1).await;
    let app = api_router(&core_for(&server));

    let now = now_unix() as i64;
    let token = sign_token(&json!({
        "iss": issuer(&server.uri()),
        "sub": "user-admin-1",
        "preferred_username": "root",
        "exp": now + 300,
        "iat": now,
        "realm_access": { "roles": ["admin"] }
    }));
    let request = Request::builder()
        .uri("/api/admin")
        .header("authorization", format!("Bearer {token}"))
        .body(Body::empty())
        .unwrap();
    let response = app.oneshot(request).await.unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_json(response).await["username"], "root");
}

// ── Cookie-session flow ──

/// Drive `/login` and return `(login cookie pair, state)`.
async fn begin_login(app: &Router) -> (String, String) {
    let response = app.clone().oneshot(get_request("/login")).await.unwrap();
    assert_eq!(response.status(), StatusCode::SEE_OTHER);

    let login_cookie = set_cookie_pair(&response, "fittrack_login").expect("login cookie set");
    let authorize = location_url(&response);
    let state = authorize
        .query_pairs()
        .find(|(k, _)| k == "state")
        .map(|(_, v)| v.into_owned())
        .expect("authorize url carries a state");
    (login_cookie, state)
}

fn mount_token_success(server: &MockServer) -> Mock {
    Mock::given(method("POST")).and(path(token_path())).respond_with(
        ResponseTemplate::new(200).set_body_json(json!({
            "access_token": "opaque-access",
            "expires_in": 300,
            "refresh_token": "refresh-1",
            "id_token": sign_token(&coach_claims(&issuer(&server.uri()), 300)),
        })),
    )
}

#[tokio::test]
async fn login_callback_session_then_role_gated_page() {
    // GIVEN a provider honouring the code exchange
    let server = MockServer::start().await;
    mount_jwks(&server, 1).await;
    mount_token_success(&server).expect(1).mount(&server).await;
    let core = core_for(&server);
    let app = ssr_router(&core);

    // WHEN the browser completes login and callback
    let (login_cookie, state) = begin_login(&app).await;
    let callback = Request::builder()
        .uri(format!("/callback?state={state}&code=auth-code-1"))
        .header(COOKIE, &login_cookie)
        .body(Body::empty())
        .unwrap();
    let response = app.clone().oneshot(callback).await.unwrap();

    // THEN a session cookie is issued and the coach page opens
    assert_eq!(response.status(), StatusCode::SEE_OTHER);
    assert_eq!(
        response.headers().get(LOCATION).unwrap().to_str().unwrap(),
        "/"
    );
    let session_cookie =
        set_cookie_pair(&response, "fittrack_session").expect("session cookie set");

    let page = Request::builder()
        .uri("/coach")
        .header(COOKIE, &session_cookie)
        .body(Body::empty())
        .unwrap();
    let response = app.oneshot(page).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
    assert_eq!(&bytes[..], b"kasia");
}

#[tokio::test]
async fn forged_state_is_rejected_and_consumes_the_real_one() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path(token_path()))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({})))
        .expect(0)
        .mount(&server)
        .await;
    let core = core_for(&server);
    let app = ssr_router(&core);

    let (login_cookie, state) = begin_login(&app).await;

    // Attacker-chosen state on an otherwise well-formed callback.
    let forged = Request::builder()
        .uri("/callback?state=attacker-state&code=auth-code-1")
        .header(COOKIE, &login_cookie)
        .body(Body::empty())
        .unwrap();
    let response = app.clone().oneshot(forged).await.unwrap();
    assert_eq!(response.status(), StatusCode::FORBIDDEN);
    assert!(set_cookie_pair(&response, "fittrack_session").is_none());
    // The login cookie is expired: its state is burned and the key is dead.
    let cleared_login = response
        .headers()
        .get_all(SET_COOKIE)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .find(|v| v.starts_with("fittrack_login="))
        .expect("login cookie cleared");
    assert!(cleared_login.contains("Max-Age=0"));
    assert_eq!(body_json(response).await["error"], "state_mismatch");

    // The genuine state was consumed by the failed attempt.
    let replay = Request::builder()
        .uri(format!("/callback?state={state}&code=auth-code-1"))
        .header(COOKIE, &login_cookie)
        .body(Body::empty())
        .unwrap();
    let response = app.oneshot(replay).await.unwrap();
    assert_eq!(response.status(), StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn callback_without_login_cookie_is_403() {
    let server = MockServer::start().await;
    let app = ssr_router(&core_for(&server));

    let response = app
        .oneshot(get_request("/callback?state=whatever&code=auth-code-1"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn callback_missing_parameters_is_400() {
    let server = MockServer::start().await;
    let app = ssr_router(&core_for(&server));

    let (login_cookie, _state) = begin_login(&app).await;
    let request = Request::builder()
        .uri("/callback")
        .header(COOKIE, &login_cookie)
        .body(Body::empty())
        .unwrap();
    let response = app.oneshot(request).await.unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(body_json(response).await["error"], "invalid_callback");
}

#[tokio::test]
async fn provider_error_on_callback_is_surfaced_as_upstream_failure() {
    let server = MockServer::start().await;
    let app = ssr_router(&core_for(&server));

    let (login_cookie, _state) = begin_login(&app).await;
    let request = Request::builder()
        .uri("/callback?error=access_denied")
        .header(COOKIE, &login_cookie)
        .body(Body::empty())
        .unwrap();
    let response = app.oneshot(request).await.unwrap();

    assert_eq!(response.status(), StatusCode::BAD_GATEWAY);
}

#[tokio::test]
async fn logout_expires_the_cookie_and_kills_the_session() {
    let server = MockServer::start().await;
    mount_jwks(&server, 1).await;
    mount_token_success(&server).mount(&server).await;
    let core = core_for(&server);
    let app = ssr_router(&core);

    let (login_cookie, state) = begin_login(&app).await;
    let callback = Request::builder()
        .uri(format!("/callback?state={state}&code=auth-code-1"))
        .header(COOKIE, &login_cookie)
        .body(Body::empty())
        .unwrap();
    let response = app.clone().oneshot(callback).await.unwrap();
    let session_cookie =
        set_cookie_pair(&response, "fittrack_session").expect("session cookie set");

    let logout = Request::builder()
        .uri("/logout")
        .header(COOKIE, &session_cookie)
        .body(Body::empty())
        .unwrap();
    let response = app.clone().oneshot(logout).await.unwrap();

    assert_eq!(response.status(), StatusCode::SEE_OTHER);
    let end_session = location_url(&response);
    assert!(end_session.path().ends_with("/logout"));
    let cleared = response
        .headers()
        .get_all(SET_COOKIE)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .find(|v| v.starts_with("fittrack_session="))
        .expect("session cookie cleared");
    assert!(cleared.contains("Max-Age=0"));

    // The old cookie no longer opens the gated page.
    let page = Request::builder()
        .uri("/coach")
        .header(COOKIE, &session_cookie)
        .body(Body::empty())
        .unwrap();
    let response = app.oneshot(page).await.unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}
