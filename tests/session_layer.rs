use std::io;
use std::sync::{Arc, Mutex};

use axum::Router;
use axum::body::Body;
use axum::http::header::{COOKIE, LOCATION, SET_COOKIE};
use axum::http::{HeaderMap, Request, StatusCode};
use axum::middleware::from_fn_with_state;
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum_extra::extract::PrivateCookieJar;
use axum_extra::extract::cookie::{Cookie, Key};
use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use keycloak_session::middleware::{
    AccessToken, SessionAuthConfig, SessionState, auth_routes, require_role, require_session,
};
use keycloak_session::{AuthClient, Claim, KeycloakConfig, Principal, SessionRecord, SessionTicket};
use serde_json::json;
use time::{Duration, OffsetDateTime};
use tower::ServiceExt;
use tracing_subscriber::fmt::MakeWriter;
use url::Url;
use wiremock::matchers::{body_string_contains, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

const SESSION_COOKIE: &str = "keycloak.cookie";
const TOKEN_PATH: &str = "/realms/demo/protocol/openid-connect/token";

/// In-memory sink for `tracing` output of a single test.
#[derive(Clone, Default)]
struct LogCapture(Arc<Mutex<Vec<u8>>>);

impl LogCapture {
    fn subscriber(&self) -> impl tracing::Subscriber + Send + Sync + 'static {
        tracing_subscriber::fmt()
            .with_writer(self.clone())
            .with_ansi(false)
            .with_max_level(tracing::Level::DEBUG)
            .finish()
    }

    fn contents(&self) -> String {
        String::from_utf8_lossy(&self.0.lock().unwrap()).into_owned()
    }
}

impl io::Write for LogCapture {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl<'a> MakeWriter<'a> for LogCapture {
    type Writer = Self;

    fn make_writer(&'a self) -> Self::Writer {
        self.clone()
    }
}

fn cookie_key() -> Key {
    Key::from(&[7u8; 64])
}

fn app(keycloak: &str) -> Router {
    let config = KeycloakConfig::new(
        Url::parse(&format!("{keycloak}/realms/demo")).unwrap(),
        "web",
        Url::parse("http://app.local/auth/callback").unwrap(),
    )
    .unwrap();
    let state = SessionState::new(
        SessionAuthConfig::new(AuthClient::new(config))
            .with_cookie_key(cookie_key())
            .with_secure_cookies(false),
    );

    let protected = Router::new()
        .route("/index", get(index))
        .route("/admin", get(admin))
        .layer(from_fn_with_state(state.clone(), require_session));

    Router::new().merge(auth_routes(&state)).merge(protected)
}

async fn index(principal: Principal, AccessToken(token): AccessToken) -> String {
    format!("{}:{token}", principal.name().unwrap_or_default())
}

async fn admin(principal: Principal) -> Response {
    match require_role(&principal, "admin") {
        Ok(()) => "admin".into_response(),
        Err(e) => e.into_response(),
    }
}

fn claims(roles: &[&str]) -> Vec<Claim> {
    vec![
        Claim::new("sub", "user-1"),
        Claim::new("name", "Alice"),
        Claim::new("realm_access", json!({ "roles": roles }).to_string()),
    ]
}

fn ticket(issued_at: OffsetDateTime, token_lifetime: u64, roles: &[&str]) -> SessionTicket {
    let record = SessionRecord::new("access", Some("refresh".into()), Some(token_lifetime), issued_at);
    SessionTicket::issue(claims(roles), record, issued_at, Duration::minutes(60))
}

/// `name=value` pair as the browser would send it back.
fn encrypted_cookie(name: &str, value: String) -> String {
    let jar = PrivateCookieJar::new(cookie_key()).add(Cookie::new(name.to_string(), value));
    let response = jar.into_response();
    let set_cookie = response.headers()[SET_COOKIE].to_str().unwrap();
    set_cookie.split(';').next().unwrap().to_string()
}

fn session_cookie(ticket: &SessionTicket) -> String {
    encrypted_cookie(SESSION_COOKIE, ticket.encode().unwrap())
}

fn set_cookie(response: &Response, name: &str) -> Option<String> {
    response
        .headers()
        .get_all(SET_COOKIE)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .find(|v| v.starts_with(&format!("{name}=")))
        .map(str::to_string)
}

fn read_ticket(set_cookie: &str) -> SessionTicket {
    let pair = set_cookie.split(';').next().unwrap();
    let mut headers = HeaderMap::new();
    headers.insert(COOKIE, pair.parse().unwrap());
    let jar = PrivateCookieJar::from_headers(&headers, cookie_key());
    SessionTicket::decode(jar.get(SESSION_COOKIE).unwrap().value()).unwrap()
}

fn location(response: &Response) -> &str {
    response.headers()[LOCATION].to_str().unwrap()
}

async fn get_with_cookie(app: Router, uri: &str, cookie: Option<&str>) -> Response {
    let mut request = Request::builder().uri(uri);
    if let Some(cookie) = cookie {
        request = request.header(COOKIE, cookie);
    }
    app.oneshot(request.body(Body::empty()).unwrap()).await.unwrap()
}

async fn body_text(response: Response) -> String {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    String::from_utf8(bytes.to_vec()).unwrap()
}

fn unsigned_jwt(payload: serde_json::Value) -> String {
    let header = URL_SAFE_NO_PAD.encode(br#"{"alg":"RS256","typ":"JWT"}"#);
    let payload = URL_SAFE_NO_PAD.encode(payload.to_string());
    format!("{header}.{payload}.c2ln")
}

#[tokio::test]
async fn anonymous_request_is_challenged() {
    let response = get_with_cookie(app("http://127.0.0.1:9"), "/index?tab=1", None).await;

    assert_eq!(response.status(), StatusCode::SEE_OTHER);
    assert_eq!(location(&response), "/auth/login?return_to=%2Findex%3Ftab%3D1");
}

#[tokio::test]
async fn tampered_cookie_is_challenged() {
    let cookie = format!("{SESSION_COOKIE}=not-encrypted");
    let response = get_with_cookie(app("http://127.0.0.1:9"), "/index", Some(&cookie)).await;

    assert_eq!(response.status(), StatusCode::SEE_OTHER);
}

#[tokio::test]
async fn fresh_session_passes_without_reissuing() {
    let cookie = session_cookie(&ticket(OffsetDateTime::now_utc(), 3600, &[]));

    let response = get_with_cookie(app("http://127.0.0.1:9"), "/index", Some(&cookie)).await;

    assert_eq!(response.status(), StatusCode::OK);
    assert!(set_cookie(&response, SESSION_COOKIE).is_none());
    assert_eq!(body_text(response).await, "Alice:access");
}

#[tokio::test]
async fn realm_roles_gate_admin_route() {
    let now = OffsetDateTime::now_utc();
    let admin_cookie = session_cookie(&ticket(now, 3600, &["admin", "user"]));
    let user_cookie = session_cookie(&ticket(now, 3600, &["user"]));

    let allowed = get_with_cookie(app("http://127.0.0.1:9"), "/admin", Some(&admin_cookie)).await;
    let denied = get_with_cookie(app("http://127.0.0.1:9"), "/admin", Some(&user_cookie)).await;

    assert_eq!(allowed.status(), StatusCode::OK);
    assert_eq!(denied.status(), StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn near_expiry_session_is_refreshed_and_reissued() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path(TOKEN_PATH))
        .and(body_string_contains("refresh_token=refresh"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "access_token": "new-access",
            "refresh_token": "new-refresh",
            "expires_in": 300
        })))
        .expect(1)
        .mount(&server)
        .await;

    let cookie = session_cookie(&ticket(OffsetDateTime::now_utc(), 60, &[]));

    let response = get_with_cookie(app(&server.uri()), "/index", Some(&cookie)).await;

    assert_eq!(response.status(), StatusCode::OK);
    let reissued = set_cookie(&response, SESSION_COOKIE).expect("session cookie re-issued");
    let renewed = read_ticket(&reissued);
    assert_eq!(renewed.tokens.access_token, "new-access");
    assert_eq!(renewed.tokens.refresh_token, "new-refresh");
    assert_eq!(body_text(response).await, "Alice:new-access");
}

#[tokio::test]
async fn failed_refresh_signs_out() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path(TOKEN_PATH))
        .respond_with(ResponseTemplate::new(400).set_body_json(json!({
            "error": "invalid_grant",
            "error_description": "Session not active"
        })))
        .mount(&server)
        .await;

    let cookie = session_cookie(&ticket(OffsetDateTime::now_utc(), 60, &[]));
    let logs = LogCapture::default();

    let response = {
        let _guard = tracing::subscriber::set_default(logs.subscriber());
        get_with_cookie(app(&server.uri()), "/index", Some(&cookie)).await
    };

    assert_eq!(response.status(), StatusCode::SEE_OTHER);
    let target = location(&response).to_string();
    assert_eq!(target, "/auth/login?return_to=%2Findex");
    let removal = set_cookie(&response, SESSION_COOKIE).expect("session cookie removed");
    assert!(removal.contains("Max-Age=0"));

    // The cause reaches the log, never the browser.
    let body = body_text(response).await;
    for detail in ["invalid_grant", "Session not active"] {
        assert!(!target.contains(detail));
        assert!(!body.contains(detail));
    }
    let logged = logs.contents();
    assert!(logged.contains("ERROR"), "{logged}");
    assert!(logged.contains("kind=refresh_rejected"), "{logged}");
    assert!(logged.contains("invalid_grant"), "{logged}");
}

#[tokio::test]
async fn idle_session_past_window_is_signed_out() {
    let issued = OffsetDateTime::now_utc() - Duration::minutes(61);
    let cookie = session_cookie(&ticket(issued, 7200, &[]));

    let response = get_with_cookie(app("http://127.0.0.1:9"), "/index", Some(&cookie)).await;

    assert_eq!(response.status(), StatusCode::SEE_OTHER);
    assert!(set_cookie(&response, SESSION_COOKIE).is_some_and(|c| c.contains("Max-Age=0")));
}

#[tokio::test]
async fn window_slides_after_half_elapsed() {
    let issued = OffsetDateTime::now_utc() - Duration::minutes(40);
    let cookie = session_cookie(&ticket(issued, 7200, &[]));

    let response = get_with_cookie(app("http://127.0.0.1:9"), "/index", Some(&cookie)).await;

    assert_eq!(response.status(), StatusCode::OK);
    let reissued = set_cookie(&response, SESSION_COOKIE).expect("session cookie re-issued");
    let slid = read_ticket(&reissued);
    assert!(slid.issued_at > issued + Duration::minutes(39));
    assert_eq!(slid.expires_at - slid.issued_at, Duration::minutes(60));
    assert_eq!(slid.tokens.access_token, "access");
}

#[tokio::test]
async fn login_redirects_to_keycloak_with_pkce() {
    let response =
        get_with_cookie(app("http://keycloak.test"), "/auth/login?return_to=%2Fadmin", None).await;

    assert_eq!(response.status(), StatusCode::SEE_OTHER);
    let target = Url::parse(location(&response)).unwrap();
    assert_eq!(target.path(), "/realms/demo/protocol/openid-connect/auth");
    let query: Vec<(String, String)> = target.query_pairs().into_owned().collect();
    assert!(query.contains(&("code_challenge_method".into(), "S256".into())));
    assert!(query.contains(&("client_id".into(), "web".into())));
    assert!(set_cookie(&response, "keycloak.flow").is_some());
}

#[tokio::test]
async fn logout_clears_session() {
    let cookie = session_cookie(&ticket(OffsetDateTime::now_utc(), 3600, &[]));

    let response = get_with_cookie(app("http://127.0.0.1:9"), "/auth/logout", Some(&cookie)).await;

    assert_eq!(response.status(), StatusCode::SEE_OTHER);
    assert_eq!(location(&response), "/");
    assert!(set_cookie(&response, SESSION_COOKIE).is_some_and(|c| c.contains("Max-Age=0")));
}

#[tokio::test]
async fn callback_with_wrong_state_is_refused() {
    let login = get_with_cookie(app("http://keycloak.test"), "/auth/login", None).await;
    let flow = set_cookie(&login, "keycloak.flow").unwrap();
    let flow = flow.split(';').next().unwrap();

    let response = get_with_cookie(
        app("http://keycloak.test"),
        "/auth/callback?code=abc&state=forged",
        Some(flow),
    )
    .await;

    assert_eq!(response.status(), StatusCode::SEE_OTHER);
    assert_eq!(location(&response), "/?error=state_mismatch");
}

/// Values a browser carries from `/auth/login` to `/auth/callback`.
struct StartedLogin {
    state: String,
    nonce: String,
    flow_cookie: String,
}

async fn start_login(app: Router, uri: &str) -> StartedLogin {
    let login = get_with_cookie(app, uri, None).await;
    let target = Url::parse(location(&login)).unwrap();
    let param = |name: &str| {
        target
            .query_pairs()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.into_owned())
            .unwrap()
    };
    let flow = set_cookie(&login, "keycloak.flow").unwrap();
    StartedLogin {
        state: param("state"),
        nonce: param("nonce"),
        flow_cookie: flow.split(';').next().unwrap().to_string(),
    }
}

async fn mount_code_exchange(server: &MockServer, nonce: &str) {
    let id_token = unsigned_jwt(json!({
        "sub": "user-1",
        "name": "Alice",
        "nonce": nonce,
        "realm_access": { "roles": ["admin"] }
    }));
    Mock::given(method("POST"))
        .and(path(TOKEN_PATH))
        .and(body_string_contains("grant_type=authorization_code"))
        .and(body_string_contains("code=abc"))
        .and(body_string_contains("code_verifier="))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "access_token": "access",
            "refresh_token": "refresh",
            "id_token": id_token,
            "expires_in": 300
        })))
        .expect(1)
        .mount(server)
        .await;
}

async fn finish_login(app: Router, login: &StartedLogin) -> Response {
    get_with_cookie(
        app,
        &format!("/auth/callback?code=abc&state={}", login.state),
        Some(&login.flow_cookie),
    )
    .await
}

#[tokio::test]
async fn full_login_establishes_session() {
    let server = MockServer::start().await;
    let app = app(&server.uri());

    let login = start_login(app.clone(), "/auth/login?return_to=%2Fadmin").await;
    mount_code_exchange(&server, &login.nonce).await;

    let callback = finish_login(app.clone(), &login).await;

    assert_eq!(callback.status(), StatusCode::SEE_OTHER);
    assert_eq!(location(&callback), "/admin");
    let session = set_cookie(&callback, SESSION_COOKIE).expect("session cookie set");
    let ticket = read_ticket(&session);
    assert_eq!(ticket.tokens.refresh_token, "refresh");
    assert!(ticket.tokens.expires_at().is_some());

    let pair = session.split(';').next().unwrap();
    let admin = get_with_cookie(app, "/admin", Some(pair)).await;
    assert_eq!(admin.status(), StatusCode::OK);
}

#[tokio::test]
async fn return_to_with_control_characters_falls_back_to_default() {
    for return_to in ["%2F%09%2Fevil.example", "%2Fok%0A", "%2F%0D%0A%2Fevil.example"] {
        let server = MockServer::start().await;
        let app = app(&server.uri());

        let login = start_login(app.clone(), &format!("/auth/login?return_to={return_to}")).await;
        mount_code_exchange(&server, &login.nonce).await;

        let callback = finish_login(app, &login).await;

        assert_eq!(callback.status(), StatusCode::SEE_OTHER, "{return_to}");
        assert_eq!(location(&callback), "/", "{return_to}");
        assert!(set_cookie(&callback, SESSION_COOKIE).is_some());
    }
}

#[tokio::test]
async fn id_token_with_foreign_nonce_is_refused() {
    let server = MockServer::start().await;
    let app = app(&server.uri());

    let login = start_login(app.clone(), "/auth/login").await;
    mount_code_exchange(&server, "replayed-nonce").await;

    let callback = finish_login(app, &login).await;

    assert_eq!(callback.status(), StatusCode::SEE_OTHER);
    assert_eq!(location(&callback), "/?error=nonce_mismatch");
    assert!(set_cookie(&callback, SESSION_COOKIE).is_none());
}

#[tokio::test]
async fn provider_error_description_is_not_echoed() {
    let response = get_with_cookie(
        app("http://127.0.0.1:9"),
        "/auth/callback?error=access_denied&error_description=Account%20locked%20by%20admin",
        None,
    )
    .await;

    assert_eq!(response.status(), StatusCode::SEE_OTHER);
    assert_eq!(location(&response), "/?error=provider_error");
}
