use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use axum::{
    body::{to_bytes, Body},
    http::{
        header::{AUTHORIZATION, CONTENT_TYPE, COOKIE, SET_COOKIE},
        HeaderMap, Method, Request, StatusCode,
    },
    Router,
};
use serde_json::{json, Value};
use tempfile::TempDir;
use tower::ServiceExt;

use usergate::app::build_app;
use usergate::auth::UserRequirement;
use usergate::routes::{GroupOverrides, RouteGroup};
use usergate::users::model::{FieldSet, UserCreateRequest};
use usergate::users::{HookContext, HookEvent, Hooks};
use usergate::{Settings, UsersApi};

const SECRET: &str = "Yq3!vN8#pL2@wK7$zR5^tB1&mX9*cH4%";

fn settings(dir: &TempDir, extra: &[(&str, &str)]) -> Settings {
    let mut env: HashMap<String, String> = [
        ("DATABASE_DRIVER", "sqlite".to_string()),
        (
            "DATABASE_NAME",
            dir.path().join("users.db").to_string_lossy().into_owned(),
        ),
        ("USERGATE_JWT_SECRET", format!("{SECRET}jwt")),
        ("USERGATE_COOKIE_SECRET", format!("{SECRET}cookie")),
        ("USERGATE_RESET_PASSWORD_TOKEN_SECRET", format!("{SECRET}reset")),
        ("USERGATE_VERIFICATION_TOKEN_SECRET", format!("{SECRET}verify")),
    ]
    .into_iter()
    .map(|(k, v)| (k.to_string(), v))
    .collect();
    for (k, v) in extra {
        env.insert(k.to_string(), v.to_string());
    }
    Settings::from_source(|key| env.get(key).cloned()).expect("settings")
}

async fn setup_with(settings: Settings, hooks: Hooks) -> (UsersApi, Router) {
    let api = UsersApi::connect(settings, hooks).await.expect("connect");
    let app = build_app(&api);
    (api, app)
}

async fn setup(extra: &[(&str, &str)]) -> (TempDir, UsersApi, Router) {
    let dir = tempfile::tempdir().unwrap();
    let (api, app) = setup_with(settings(&dir, extra), Hooks::new()).await;
    (dir, api, app)
}

fn request(method: Method, uri: &str, body: Option<Value>, token: Option<&str>) -> Request<Body> {
    let mut builder = Request::builder().method(method).uri(uri);
    if let Some(token) = token {
        builder = builder.header(AUTHORIZATION, format!("Bearer {token}"));
    }
    match body {
        Some(body) => builder
            .header(CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    }
}

async fn send(app: &Router, req: Request<Body>) -> (StatusCode, HeaderMap, Value) {
    let res = app.clone().oneshot(req).await.unwrap();
    let status = res.status();
    let headers = res.headers().clone();
    let bytes = to_bytes(res.into_body(), usize::MAX).await.unwrap();
    let body = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap_or(Value::Null)
    };
    (status, headers, body)
}

async fn register(app: &Router, email: &str, password: &str) -> Value {
    let (status, _, body) = send(
        app,
        request(
            Method::POST,
            "/register",
            Some(json!({"email": email, "password": password})),
            None,
        ),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED, "{body}");
    body
}

async fn bearer_login(app: &Router, email: &str, password: &str) -> String {
    let (status, _, body) = send(
        app,
        request(
            Method::POST,
            "/auth/jwt/login",
            Some(json!({"email": email, "password": password})),
            None,
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK, "{body}");
    assert_eq!(body["token_type"], "bearer");
    body["access_token"].as_str().unwrap().to_string()
}

#[tokio::test]
async fn register_login_and_read_me() {
    let (_dir, _api, app) = setup(&[]).await;

    let created = register(&app, "a@example.com", "Str0ngPW!").await;
    assert_eq!(created["email"], "a@example.com");
    assert_eq!(created["is_verified"], false);
    assert_eq!(created["is_active"], true);
    assert!(created.get("hashed_password").is_none());

    let token = bearer_login(&app, "a@example.com", "Str0ngPW!").await;

    let (status, _, me) = send(&app, request(Method::GET, "/users/me", None, Some(&token))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(me["email"], "a@example.com");
    assert_eq!(me["is_verified"], false);
    assert_eq!(me["id"], created["id"]);

    let (status, _, body) = send(&app, request(Method::GET, "/users/me", None, None)).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["error"]["kind"], "Unauthenticated");
}

#[tokio::test]
async fn registration_errors() {
    let (_dir, _api, app) = setup(&[]).await;
    register(&app, "a@example.com", "Str0ngPW!").await;

    let (status, _, body) = send(
        &app,
        request(
            Method::POST,
            "/register",
            Some(json!({"email": "A@Example.com", "password": "Str0ngPW!"})),
            None,
        ),
    )
    .await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["error"]["kind"], "DuplicateEmail");

    let (status, _, body) = send(
        &app,
        request(
            Method::POST,
            "/register",
            Some(json!({"email": "not-an-email", "password": "short"})),
            None,
        ),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    let fields: Vec<&str> = body["error"]["fields"]
        .as_array()
        .unwrap()
        .iter()
        .map(|f| f["field"].as_str().unwrap())
        .collect();
    assert!(fields.contains(&"email"));
    assert!(fields.contains(&"password"));
}

fn raw_post(uri: &str, content_type: &str, body: &str) -> Request<Body> {
    Request::builder()
        .method(Method::POST)
        .uri(uri)
        .header(CONTENT_TYPE, content_type)
        .body(Body::from(body.to_string()))
        .unwrap()
}

fn assert_validation(status: StatusCode, body: &Value, field: &str) {
    assert_eq!(status, StatusCode::BAD_REQUEST, "{body}");
    assert_eq!(body["error"]["kind"], "ValidationError");
    assert_eq!(body["error"]["status"], 400);
    assert_eq!(body["error"]["fields"][0]["field"], field, "{body}");
    // serde's own wording stays out of the response
    let text = body.to_string();
    assert!(!text.contains("deserialize"), "{text}");
    assert!(!text.contains("line 1"), "{text}");
}

#[tokio::test]
async fn malformed_bodies_use_the_error_envelope() {
    let (_dir, _api, app) = setup(&[]).await;

    let (status, _, body) = send(
        &app,
        request(Method::POST, "/register", Some(json!({"email": "a@example.com"})), None),
    )
    .await;
    assert_validation(status, &body, "password");
    assert_eq!(body["error"]["fields"][0]["message"], "is required");

    let (status, _, body) = send(
        &app,
        request(
            Method::POST,
            "/register",
            Some(json!({"email": "a@example.com", "password": 5})),
            None,
        ),
    )
    .await;
    assert_validation(status, &body, "password");
    assert_eq!(body["error"]["fields"][0]["message"], "has the wrong type");

    let (status, _, body) = send(&app, raw_post("/register", "application/json", "not json")).await;
    assert_validation(status, &body, "body");

    let (status, _, body) = send(
        &app,
        raw_post("/auth/jwt/login", "text/plain", r#"{"email":"a@example.com","password":"x"}"#),
    )
    .await;
    assert_validation(status, &body, "body");

    let (status, _, body) = send(
        &app,
        request(Method::POST, "/reset-password", Some(json!({"password": "N3wPassw0rd"})), None),
    )
    .await;
    assert_validation(status, &body, "token");

    let (status, _, body) = send(
        &app,
        request(Method::POST, "/forgot-password", Some(json!({"email": 7})), None),
    )
    .await;
    assert_validation(status, &body, "email");
}

#[tokio::test]
async fn self_update_password_may_not_contain_the_email() {
    let (_dir, _api, app) = setup(&[]).await;
    register(&app, "alice@example.com", "Str0ngPW!").await;
    let token = bearer_login(&app, "alice@example.com", "Str0ngPW!").await;

    let (status, _, body) = send(
        &app,
        request(
            Method::PATCH,
            "/users/me",
            Some(json!({"password": "alice2024x"})),
            Some(&token),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"]["fields"][0]["field"], "password");
    bearer_login(&app, "alice@example.com", "Str0ngPW!").await;
}

#[tokio::test]
async fn public_registration_ignores_privileged_flags() {
    let (_dir, _api, app) = setup(&[]).await;
    let (status, _, body) = send(
        &app,
        request(
            Method::POST,
            "/register",
            Some(json!({
                "email": "sneaky@example.com",
                "password": "Str0ngPW!",
                "is_superuser": true,
                "is_verified": true
            })),
            None,
        ),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(body["is_superuser"], false);
    assert_eq!(body["is_verified"], false);
}

#[tokio::test]
async fn wrong_password_is_unauthorized() {
    let (_dir, _api, app) = setup(&[]).await;
    register(&app, "a@example.com", "Str0ngPW!").await;
    let (status, _, body) = send(
        &app,
        request(
            Method::POST,
            "/auth/jwt/login",
            Some(json!({"email": "a@example.com", "password": "Wr0ngPW!"})),
            None,
        ),
    )
    .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["error"]["kind"], "InvalidCredentials");
}

#[tokio::test]
async fn forgot_password_never_reveals_accounts() {
    let (_dir, _api, app) = setup(&[]).await;
    let (status, _, _) = send(
        &app,
        request(
            Method::POST,
            "/forgot-password",
            Some(json!({"email": "nobody@example.com"})),
            None,
        ),
    )
    .await;
    assert_eq!(status, StatusCode::ACCEPTED);

    let (status, _, body) = send(
        &app,
        request(
            Method::POST,
            "/reset-password",
            Some(json!({"token": "fabricated.token.value", "password": "N3wPassw0rd"})),
            None,
        ),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"]["kind"], "InvalidToken");
}

fn token_recorder(event: HookEvent) -> (Hooks, Arc<Mutex<Option<String>>>) {
    let slot = Arc::new(Mutex::new(None));
    let sink = slot.clone();
    let hooks = Hooks::new().on(event, move |_, ctx| {
        if let HookContext::RequestVerify { token } | HookContext::ForgotPassword { token } = ctx {
            *sink.lock().unwrap() = Some(token.clone());
        }
        Ok(())
    });
    (hooks, slot)
}

#[tokio::test]
async fn reset_password_over_http() {
    let dir = tempfile::tempdir().unwrap();
    let (hooks, slot) = token_recorder(HookEvent::AfterForgotPassword);
    let (_api, app) = setup_with(settings(&dir, &[]), hooks).await;
    register(&app, "r@example.com", "Str0ngPW!").await;

    let (status, _, _) = send(
        &app,
        request(
            Method::POST,
            "/forgot-password",
            Some(json!({"email": "r@example.com"})),
            None,
        ),
    )
    .await;
    assert_eq!(status, StatusCode::ACCEPTED);
    let token = slot.lock().unwrap().clone().expect("reset token handed to hook");

    let (status, _, _) = send(
        &app,
        request(
            Method::POST,
            "/reset-password",
            Some(json!({"token": token, "password": "N3wPassw0rd"})),
            None,
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    bearer_login(&app, "r@example.com", "N3wPassw0rd").await;
}

#[tokio::test]
async fn verification_over_http() {
    let dir = tempfile::tempdir().unwrap();
    let (hooks, slot) = token_recorder(HookEvent::AfterRequestVerify);
    let (_api, app) = setup_with(settings(&dir, &[]), hooks).await;
    register(&app, "v@example.com", "Str0ngPW!").await;

    let (status, _, _) = send(
        &app,
        request(
            Method::POST,
            "/request-verify-token",
            Some(json!({"email": "v@example.com"})),
            None,
        ),
    )
    .await;
    assert_eq!(status, StatusCode::ACCEPTED);
    let token = slot.lock().unwrap().clone().expect("verify token handed to hook");

    let verify = || {
        request(
            Method::POST,
            "/verify",
            Some(json!({"token": token.clone()})),
            None,
        )
    };
    let (status, _, body) = send(&app, verify()).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["is_verified"], true);

    let (status, _, body) = send(&app, verify()).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"]["kind"], "AlreadyVerified");
}

#[tokio::test]
async fn disabling_a_group_removes_its_paths() {
    let cases = [
        ("USERGATE_ENABLE_JWT", Method::POST, "/auth/jwt/login"),
        ("USERGATE_ENABLE_COOKIE", Method::POST, "/auth/cookie/login"),
        ("USERGATE_ENABLE_REGISTER", Method::POST, "/register"),
        ("USERGATE_ENABLE_RESET", Method::POST, "/forgot-password"),
        ("USERGATE_ENABLE_VERIFY", Method::POST, "/verify"),
        ("USERGATE_ENABLE_USERS", Method::GET, "/users/me"),
    ];
    for (flag, method, path) in cases {
        let (_dir, api, app) = setup(&[(flag, "false")]).await;
        assert!(!api.routes().contains(&method, path), "{path} still listed");
        let (status, _, _) = send(&app, request(method.clone(), path, None, None)).await;
        assert_eq!(status, StatusCode::NOT_FOUND, "{flag} left {path} mounted");

        let (status, _, _) = send(&app, request(Method::GET, "/health", None, None)).await;
        assert_eq!(status, StatusCode::OK);
    }
}

#[tokio::test]
async fn custom_prefix_moves_a_group() {
    let (_dir, _api, app) = setup(&[("USERGATE_USERS_PREFIX", "/accounts")]).await;
    register(&app, "p@example.com", "Str0ngPW!").await;
    let token = bearer_login(&app, "p@example.com", "Str0ngPW!").await;

    let (status, _, _) = send(&app, request(Method::GET, "/accounts/me", None, Some(&token))).await;
    assert_eq!(status, StatusCode::OK);
    let (status, _, _) = send(&app, request(Method::GET, "/users/me", None, Some(&token))).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn colliding_prefixes_abort_startup() {
    let dir = tempfile::tempdir().unwrap();
    let result = UsersApi::connect(
        settings(&dir, &[("USERGATE_COOKIE_PREFIX", "/auth/jwt")]),
        Hooks::new(),
    )
    .await;
    assert!(matches!(
        result,
        Err(usergate::AuthError::Configuration(
            usergate::ConfigError::DuplicatePath { .. }
        ))
    ));
}

#[tokio::test]
async fn cookie_login_and_logout() {
    let (_dir, _api, app) = setup(&[]).await;
    register(&app, "c@example.com", "Str0ngPW!").await;

    let (status, headers, _) = send(
        &app,
        request(
            Method::POST,
            "/auth/cookie/login",
            Some(json!({"email": "c@example.com", "password": "Str0ngPW!"})),
            None,
        ),
    )
    .await;
    assert_eq!(status, StatusCode::NO_CONTENT);
    let set_cookie = headers.get(SET_COOKIE).unwrap().to_str().unwrap().to_string();
    assert!(set_cookie.contains("HttpOnly"));
    let cookie = set_cookie.split(';').next().unwrap().to_string();

    let with_cookie = |method: Method, uri: &str| {
        Request::builder()
            .method(method)
            .uri(uri)
            .header(COOKIE, cookie.clone())
            .body(Body::empty())
            .unwrap()
    };

    let (status, _, me) = send(&app, with_cookie(Method::GET, "/users/me")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(me["email"], "c@example.com");

    let (status, headers, _) = send(&app, with_cookie(Method::POST, "/auth/cookie/logout")).await;
    assert_eq!(status, StatusCode::NO_CONTENT);
    assert!(headers
        .get(SET_COOKIE)
        .unwrap()
        .to_str()
        .unwrap()
        .contains("Max-Age=0"));

    let (status, _, _) = send(&app, request(Method::POST, "/auth/cookie/logout", None, None)).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn bearer_logout_and_refresh() {
    let (_dir, _api, app) = setup(&[]).await;
    register(&app, "b@example.com", "Str0ngPW!").await;
    let token = bearer_login(&app, "b@example.com", "Str0ngPW!").await;

    let (status, _, body) = send(
        &app,
        request(Method::POST, "/auth/jwt/refresh", None, Some(&token)),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    let fresh = body["access_token"].as_str().unwrap().to_string();
    let (status, _, _) = send(&app, request(Method::GET, "/users/me", None, Some(&fresh))).await;
    assert_eq!(status, StatusCode::OK);

    let (status, _, _) = send(&app, request(Method::POST, "/auth/jwt/refresh", None, None)).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let (status, _, _) = send(
        &app,
        request(Method::POST, "/auth/jwt/logout", None, Some(&token)),
    )
    .await;
    assert_eq!(status, StatusCode::NO_CONTENT);
    let (status, _, _) = send(&app, request(Method::POST, "/auth/jwt/logout", None, None)).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn superuser_routes() {
    let (_dir, api, app) = setup(&[]).await;
    let manager = api.manager();
    let root = UserCreateRequest {
        is_superuser: Some(true),
        ..UserCreateRequest::new("root@example.com", "Sup3rSecret")
    };
    manager
        .register(manager.schema().create(root, FieldSet::ALL).unwrap())
        .await
        .unwrap();
    let member = register(&app, "m@example.com", "Str0ngPW!").await;
    let member_id = member["id"].as_str().unwrap().to_string();
    let path = format!("/users/{member_id}");

    let admin_token = bearer_login(&app, "root@example.com", "Sup3rSecret").await;
    let member_token = bearer_login(&app, "m@example.com", "Str0ngPW!").await;

    let (status, _, body) = send(&app, request(Method::GET, &path, None, Some(&member_token))).await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(body["error"]["kind"], "Forbidden");

    let (status, _, body) = send(&app, request(Method::GET, &path, None, Some(&admin_token))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["email"], "m@example.com");

    let (status, _, body) = send(
        &app,
        request(
            Method::PATCH,
            &path,
            Some(json!({"is_verified": true})),
            Some(&admin_token),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["is_verified"], true);

    // self-service cannot grant privileges
    let (status, _, body) = send(
        &app,
        request(
            Method::PATCH,
            "/users/me",
            Some(json!({"is_superuser": true})),
            Some(&member_token),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["is_superuser"], false);

    let (status, _, body) = send(
        &app,
        request(Method::GET, "/users/not-a-uuid", None, Some(&admin_token)),
    )
    .await;
    assert_validation(status, &body, "id");

    let (status, _, _) = send(&app, request(Method::DELETE, &path, None, Some(&admin_token))).await;
    assert_eq!(status, StatusCode::NO_CONTENT);
    let (status, _, body) = send(&app, request(Method::GET, &path, None, Some(&admin_token))).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["error"]["kind"], "NotFound");

    // the deleted user's token no longer resolves
    let (status, _, _) = send(&app, request(Method::GET, "/users/me", None, Some(&member_token))).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn guarded_group_requires_the_configured_user() {
    let dir = tempfile::tempdir().unwrap();
    let mut settings = settings(&dir, &[]);
    settings.routes = settings.routes.clone().set(
        RouteGroup::Register,
        GroupOverrides {
            guard: Some(Some(UserRequirement::SUPERUSER)),
            ..Default::default()
        },
    );
    let (api, app) = setup_with(settings, Hooks::new()).await;

    let body = json!({"email": "new@example.com", "password": "Str0ngPW!"});
    let (status, _, _) = send(
        &app,
        request(Method::POST, "/register", Some(body.clone()), None),
    )
    .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let manager = api.manager();
    let root = UserCreateRequest {
        is_superuser: Some(true),
        ..UserCreateRequest::new("root@example.com", "Sup3rSecret")
    };
    manager
        .register(manager.schema().create(root, FieldSet::ALL).unwrap())
        .await
        .unwrap();
    let admin_token = bearer_login(&app, "root@example.com", "Sup3rSecret").await;

    let (status, _, _) = send(
        &app,
        request(Method::POST, "/register", Some(body), Some(&admin_token)),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
}

#[tokio::test]
async fn deactivated_user_is_locked_out() {
    let (_dir, api, app) = setup(&[]).await;
    register(&app, "i@example.com", "Str0ngPW!").await;
    let token = bearer_login(&app, "i@example.com", "Str0ngPW!").await;

    let manager = api.manager();
    let user = manager.get_by_email("i@example.com").await.unwrap();
    let deactivate = manager
        .schema()
        .update(
            usergate::users::model::UserUpdateRequest {
                is_active: Some(false),
                ..Default::default()
            },
            FieldSet::ALL,
        )
        .unwrap();
    manager.update(user.id, deactivate).await.unwrap();

    let (status, _, body) = send(&app, request(Method::GET, "/users/me", None, Some(&token))).await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(body["error"]["kind"], "Inactive");

    let (status, _, _) = send(
        &app,
        request(
            Method::POST,
            "/auth/jwt/login",
            Some(json!({"email": "i@example.com", "password": "Str0ngPW!"})),
            None,
        ),
    )
    .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}
