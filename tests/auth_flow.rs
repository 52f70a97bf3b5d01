#![cfg(feature = "web")]
use axum::{
    Router,
    body::{Body, to_bytes},
    http::{Request, StatusCode, header},
    response::Response,
};
use std::sync::Arc;
use tower::ServiceExt;
use wolfzy::app::{AppState, router};
use wolfzy::graph::GraphOptions;
use wolfzy::{MemoryUserStore, PasswordScheme, SalesCache, UserStore};

fn app_with(users: Arc<dyn UserStore>, scheme: PasswordScheme) -> Router {
    let state = AppState::new(
        users,
        scheme,
        SalesCache::new("does/not/exist.csv"),
        GraphOptions::default(),
    )
    .expect("templates compile");
    router(Arc::new(state))
}

fn form(uri: &str, username: &str, password: &str) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header(header::CONTENT_TYPE, "application/x-www-form-urlencoded")
        .body(Body::from(format!("username={username}&password={password}")))
        .expect("failed to build request")
}

async fn body_text(resp: Response) -> String {
    let body = to_bytes(resp.into_body(), usize::MAX)
        .await
        .expect("failed to read response body");
    String::from_utf8(body.to_vec()).expect("response body was not utf-8")
}

fn session_cookie(resp: &Response) -> String {
    let set_cookie = resp
        .headers()
        .get(header::SET_COOKIE)
        .expect("login sets a cookie")
        .to_str()
        .expect("cookie is ascii");
    set_cookie
        .split(';')
        .next()
        .expect("cookie has a name=value pair")
        .to_string()
}

#[tokio::test]
async fn signup_then_login_reaches_dashboard() {
    let app = app_with(Arc::new(MemoryUserStore::new()), PasswordScheme::Argon2);

    let resp = app
        .clone()
        .oneshot(form("/signup", "alice", "s3cret"))
        .await
        .expect("request failed");
    assert_eq!(resp.status(), StatusCode::OK);
    assert!(body_text(resp).await.contains("Signup successful! Please log in."));

    let resp = app
        .clone()
        .oneshot(form("/login", "alice", "s3cret"))
        .await
        .expect("request failed");
    assert_eq!(resp.status(), StatusCode::SEE_OTHER);
    assert_eq!(resp.headers()[header::LOCATION], "/dashboard");
    let cookie = session_cookie(&resp);
    assert!(cookie.starts_with("session="));

    let resp = app
        .clone()
        .oneshot(
            Request::builder()
                .uri("/dashboard")
                .header(header::COOKIE, &cookie)
                .body(Body::empty())
                .expect("failed to build request"),
        )
        .await
        .expect("request failed");
    assert_eq!(resp.status(), StatusCode::OK);
    let page = body_text(resp).await;
    assert!(page.contains("Welcome, alice!"));
    // The CSV path is missing, so the inline error replaces the charts
    assert!(page.contains("Error: CSV file not found. Please check the file path."));
}

#[tokio::test]
async fn duplicate_signup_is_rejected() {
    let app = app_with(Arc::new(MemoryUserStore::new()), PasswordScheme::LegacySha256);

    let first = app
        .clone()
        .oneshot(form("/signup", "bob", "one"))
        .await
        .expect("request failed");
    assert_eq!(first.status(), StatusCode::OK);

    let second = app
        .clone()
        .oneshot(form("/signup", "bob", "two"))
        .await
        .expect("request failed");
    assert_eq!(second.status(), StatusCode::CONFLICT);
    assert!(body_text(second).await.contains("Username already exists!"));

    // The original password still works
    let resp = app
        .clone()
        .oneshot(form("/login", "bob", "one"))
        .await
        .expect("request failed");
    assert_eq!(resp.status(), StatusCode::SEE_OTHER);
}

#[tokio::test]
async fn wrong_password_and_unknown_user_look_the_same() {
    let app = app_with(Arc::new(MemoryUserStore::new()), PasswordScheme::LegacySha256);
    app.clone()
        .oneshot(form("/signup", "carol", "right"))
        .await
        .expect("request failed");

    for (username, password) in [("carol", "wrong"), ("nobody", "right")] {
        let resp = app
            .clone()
            .oneshot(form("/login", username, password))
            .await
            .expect("request failed");
        assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
        assert!(resp.headers().get(header::SET_COOKIE).is_none());
        assert!(body_text(resp).await.contains("Invalid username or password."));
    }
}

#[tokio::test]
async fn logout_ends_the_session() {
    let app = app_with(Arc::new(MemoryUserStore::new()), PasswordScheme::LegacySha256);
    app.clone()
        .oneshot(form("/signup", "dave", "pw"))
        .await
        .expect("request failed");
    let resp = app
        .clone()
        .oneshot(form("/login", "dave", "pw"))
        .await
        .expect("request failed");
    let cookie = session_cookie(&resp);

    let resp = app
        .clone()
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/logout")
                .header(header::COOKIE, &cookie)
                .body(Body::empty())
                .expect("failed to build request"),
        )
        .await
        .expect("request failed");
    assert_eq!(resp.headers()[header::LOCATION], "/login");

    // The old cookie no longer opens the dashboard
    let resp = app
        .clone()
        .oneshot(
            Request::builder()
                .uri("/dashboard")
                .header(header::COOKIE, &cookie)
                .body(Body::empty())
                .expect("failed to build request"),
        )
        .await
        .expect("request failed");
    assert_eq!(resp.headers()[header::LOCATION], "/login");
}

#[tokio::test]
async fn anonymous_visitors_are_sent_to_login() {
    let app = app_with(Arc::new(MemoryUserStore::new()), PasswordScheme::LegacySha256);

    for uri in ["/", "/dashboard"] {
        let resp = app
            .clone()
            .oneshot(Request::builder().uri(uri).body(Body::empty()).expect("failed to build request"))
            .await
            .expect("request failed");
        assert_eq!(resp.status(), StatusCode::SEE_OTHER);
        assert_eq!(resp.headers()[header::LOCATION], "/login");
    }

    let resp = app
        .clone()
        .oneshot(Request::builder().uri("/login").body(Body::empty()).expect("failed to build request"))
        .await
        .expect("request failed");
    assert_eq!(resp.status(), StatusCode::OK);
    assert!(body_text(resp).await.contains("formaction=\"/signup\""));
}
