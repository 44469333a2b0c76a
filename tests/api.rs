use axum::body::Body;
use axum::http::{header, Request, StatusCode};
use axum::Router;
use chrono::{Duration, Utc};
use http_body_util::BodyExt;
use serde_json::{json, Value};
use tower::ServiceExt;
use uuid::Uuid;

use courseloom::auth;
use courseloom::config::AuthConfig;
use courseloom::models::{Role, User};
use courseloom::routes;
use courseloom::store::Store;
use courseloom::AppState;

fn test_app() -> (Router, Store) {
    let store = Store::in_memory();
    let auth = AuthConfig {
        access_secret: "access-secret-for-tests".into(),
        refresh_secret: "refresh-secret-for-tests".into(),
        access_ttl: Duration::hours(6),
        refresh_ttl: Duration::days(7),
        secure_cookies: false,
    };
    let app = routes::router(AppState {
        store: store.clone(),
        auth,
    });
    (app, store)
}

async fn seed_admin(store: &Store) -> User {
    let now = Utc::now();
    let admin = User {
        id: Uuid::new_v4(),
        name: "Admin".into(),
        email: "admin@example.com".into(),
        password_hash: auth::hash_password("admin-pass").unwrap(),
        role: Role::Admin,
        created_at: now,
        updated_at: now,
    };
    store.users.insert_user(&admin).await.unwrap();
    admin
}

struct TestResponse {
    status: StatusCode,
    body: Value,
    set_cookies: Vec<String>,
}

async fn send(
    app: &Router,
    method: &str,
    uri: &str,
    token: Option<&str>,
    cookie: Option<&str>,
    body: Option<Value>,
) -> TestResponse {
    let mut builder = Request::builder().method(method).uri(uri);
    if let Some(token) = token {
        builder = builder.header(header::AUTHORIZATION, format!("Bearer {token}"));
    }
    if let Some(cookie) = cookie {
        builder = builder.header(header::COOKIE, cookie);
    }
    let request = match body {
        Some(v) => builder
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(v.to_string()))
            .unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    };

    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let set_cookies = response
        .headers()
        .get_all(header::SET_COOKIE)
        .iter()
        .map(|v| v.to_str().unwrap().to_string())
        .collect();
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    let body = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap()
    };
    TestResponse {
        status,
        body,
        set_cookies,
    }
}

/// First `name=value` pair of the refresh cookie, for replaying in requests.
fn refresh_cookie_pair(set_cookies: &[String]) -> String {
    let raw = set_cookies
        .iter()
        .find(|c| c.starts_with("refresh_token="))
        .expect("refresh cookie set");
    raw.split(';').next().unwrap().to_string()
}

async fn signup(app: &Router, name: &str, email: &str) -> TestResponse {
    send(
        app,
        "POST",
        "/api/signup",
        None,
        None,
        Some(json!({ "name": name, "email": email, "password": "s3cret-pass" })),
    )
    .await
}

#[tokio::test]
async fn signup_issues_tokens_and_protected_cookie() {
    let (app, _) = test_app();
    let res = signup(&app, "Ada", "ada@example.com").await;
    assert_eq!(res.status, StatusCode::OK);
    assert!(res.body["token"].is_string());
    assert_eq!(res.body["user"]["role"], "student");
    assert!(res.body["user"].get("passwordHash").is_none());
    assert!(res.body["user"].get("password_hash").is_none());

    let cookie = res
        .set_cookies
        .iter()
        .find(|c| c.starts_with("refresh_token="))
        .expect("refresh cookie set");
    assert!(cookie.contains("HttpOnly"));
    assert!(cookie.contains("SameSite=Lax"));
    assert!(cookie.contains("Path=/api"));
    // not marked Secure outside production
    assert!(!cookie.contains("Secure"));
}

#[tokio::test]
async fn signup_rejects_duplicate_email_and_bad_input() {
    let (app, _) = test_app();
    assert_eq!(signup(&app, "Ada", "ada@example.com").await.status, StatusCode::OK);
    assert_eq!(
        signup(&app, "Imposter", "ada@example.com").await.status,
        StatusCode::BAD_REQUEST
    );

    let short_password = send(
        &app,
        "POST",
        "/api/signup",
        None,
        None,
        Some(json!({ "name": "Bob", "email": "bob@example.com", "password": "abc" })),
    )
    .await;
    assert_eq!(short_password.status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn login_rejects_bad_credentials() {
    let (app, _) = test_app();
    signup(&app, "Ada", "ada@example.com").await;

    let wrong = send(
        &app,
        "POST",
        "/api/login",
        None,
        None,
        Some(json!({ "email": "ada@example.com", "password": "wrong" })),
    )
    .await;
    assert_eq!(wrong.status, StatusCode::UNAUTHORIZED);

    let unknown = send(
        &app,
        "POST",
        "/api/login",
        None,
        None,
        Some(json!({ "email": "nobody@example.com", "password": "whatever" })),
    )
    .await;
    assert_eq!(unknown.status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn unauthorized_and_forbidden_are_distinct() {
    let (app, store) = test_app();
    seed_admin(&store).await;
    let student = signup(&app, "Ada", "ada@example.com").await;
    let student_token = student.body["token"].as_str().unwrap().to_string();

    // no token at all: 401, the silent-refresh trigger
    let anonymous = send(
        &app,
        "POST",
        "/api/courses",
        None,
        None,
        Some(json!({ "title": "Rust" })),
    )
    .await;
    assert_eq!(anonymous.status, StatusCode::UNAUTHORIZED);

    // valid identity, wrong role: 403, never refreshed
    let forbidden = send(
        &app,
        "POST",
        "/api/courses",
        Some(&student_token),
        None,
        Some(json!({ "title": "Rust" })),
    )
    .await;
    assert_eq!(forbidden.status, StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn progress_round_trip_and_rollups() {
    let (app, store) = test_app();
    seed_admin(&store).await;

    let admin_login = send(
        &app,
        "POST",
        "/api/login",
        None,
        None,
        Some(json!({ "email": "admin@example.com", "password": "admin-pass" })),
    )
    .await;
    assert_eq!(admin_login.status, StatusCode::OK);
    let admin_token = admin_login.body["token"].as_str().unwrap().to_string();

    let course = send(
        &app,
        "POST",
        "/api/courses",
        Some(&admin_token),
        None,
        Some(json!({ "title": "Rust from scratch" })),
    )
    .await;
    assert_eq!(course.status, StatusCode::CREATED);
    let course_id = course.body["id"].as_str().unwrap().to_string();

    let mut video_ids = Vec::new();
    for i in 0..2 {
        let lesson = send(
            &app,
            "POST",
            &format!("/api/courses/{course_id}/lessons"),
            Some(&admin_token),
            None,
            Some(json!({
                "title": format!("Lesson {i}"),
                "order": i,
                "videoUrl": format!("https://videos.example.com/{i}.mp4"),
                "videoDuration": 300,
            })),
        )
        .await;
        assert_eq!(lesson.status, StatusCode::CREATED);
        video_ids.push(
            lesson.body["lesson"]["video"]["id"]
                .as_str()
                .unwrap()
                .to_string(),
        );
    }

    let student = signup(&app, "Ada", "ada@example.com").await;
    let token = student.body["token"].as_str().unwrap().to_string();

    // duration first, completion later; the merge keeps both
    let first = send(
        &app,
        "PUT",
        &format!("/api/videos/{}/progress", video_ids[0]),
        Some(&token),
        None,
        Some(json!({ "watchedDuration": 30 })),
    )
    .await;
    assert_eq!(first.status, StatusCode::OK);
    assert_eq!(first.body["watchedDuration"], 30);
    assert_eq!(first.body["completed"], false);

    let second = send(
        &app,
        "PUT",
        &format!("/api/videos/{}/progress", video_ids[0]),
        Some(&token),
        None,
        Some(json!({ "completed": true })),
    )
    .await;
    assert_eq!(second.status, StatusCode::OK);
    assert_eq!(second.body["watchedDuration"], 30);
    assert_eq!(second.body["completed"], true);

    let fetched = send(
        &app,
        "GET",
        &format!("/api/videos/{}/progress", video_ids[0]),
        Some(&token),
        None,
        None,
    )
    .await;
    assert_eq!(fetched.body["watchedDuration"], 30);
    assert_eq!(fetched.body["completed"], true);

    // never-watched video reads as zero state, not 404
    let untouched = send(
        &app,
        "GET",
        &format!("/api/videos/{}/progress", video_ids[1]),
        Some(&token),
        None,
        None,
    )
    .await;
    assert_eq!(untouched.status, StatusCode::OK);
    assert_eq!(untouched.body["watchedDuration"], 0);
    assert_eq!(untouched.body["completed"], false);

    let rollup = send(
        &app,
        "GET",
        &format!("/api/courses/{course_id}/progress"),
        Some(&token),
        None,
        None,
    )
    .await;
    assert_eq!(rollup.status, StatusCode::OK);
    assert_eq!(rollup.body["totalLessons"], 2);
    assert_eq!(rollup.body["completedLessons"], 1);
    assert_eq!(rollup.body["watchedLessons"], 1);
    assert_eq!(rollup.body["percentageCompleted"], 50);

    // fleet report: admin only
    let denied = send(
        &app,
        "GET",
        "/api/admin/users-with-progress",
        Some(&token),
        None,
        None,
    )
    .await;
    assert_eq!(denied.status, StatusCode::FORBIDDEN);

    let report = send(
        &app,
        "GET",
        "/api/admin/users-with-progress",
        Some(&admin_token),
        None,
        None,
    )
    .await;
    assert_eq!(report.status, StatusCode::OK);
    let users = report.body["users"].as_array().unwrap();
    let ada = users
        .iter()
        .find(|u| u["email"] == "ada@example.com")
        .unwrap();
    assert_eq!(ada["overallPercentage"], 50);
    assert_eq!(ada["courses"][0]["totalLessons"], 2);
    assert_eq!(ada["courses"][0]["completedLessons"], 1);
}

#[tokio::test]
async fn progress_for_unknown_video_or_course_is_not_found() {
    let (app, _) = test_app();
    let student = signup(&app, "Ada", "ada@example.com").await;
    let token = student.body["token"].as_str().unwrap().to_string();

    let missing_video = send(
        &app,
        "PUT",
        &format!("/api/videos/{}/progress", Uuid::new_v4()),
        Some(&token),
        None,
        Some(json!({ "watchedDuration": 10 })),
    )
    .await;
    assert_eq!(missing_video.status, StatusCode::NOT_FOUND);

    let missing_course = send(
        &app,
        "GET",
        &format!("/api/courses/{}/progress", Uuid::new_v4()),
        Some(&token),
        None,
        None,
    )
    .await;
    assert_eq!(missing_course.status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn refresh_restores_a_session_from_the_cookie_alone() {
    let (app, _) = test_app();
    let res = signup(&app, "Ada", "ada@example.com").await;
    let cookie = refresh_cookie_pair(&res.set_cookies);

    let refreshed = send(&app, "POST", "/api/refresh", None, Some(&cookie), None).await;
    assert_eq!(refreshed.status, StatusCode::OK);
    assert!(refreshed.body["token"].is_string());
    assert_eq!(refreshed.body["user"]["email"], "ada@example.com");

    // the fresh access token works against protected routes
    let token = refreshed.body["token"].as_str().unwrap().to_string();
    let me = send(&app, "GET", "/api/me", Some(&token), None, None).await;
    assert_eq!(me.status, StatusCode::OK);
    assert_eq!(me.body["user"]["name"], "Ada");
}

#[tokio::test]
async fn refresh_rejects_missing_or_tampered_cookie() {
    let (app, _) = test_app();
    signup(&app, "Ada", "ada@example.com").await;

    let no_cookie = send(&app, "POST", "/api/refresh", None, None, None).await;
    assert_eq!(no_cookie.status, StatusCode::UNAUTHORIZED);

    let garbage = send(
        &app,
        "POST",
        "/api/refresh",
        None,
        Some("refresh_token=not-a-real-token"),
        None,
    )
    .await;
    assert_eq!(garbage.status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn logout_always_succeeds_and_clears_the_cookie() {
    let (app, _) = test_app();

    // no cookie at all
    let bare = send(&app, "POST", "/api/logout", None, None, None).await;
    assert_eq!(bare.status, StatusCode::OK);
    assert_eq!(bare.body["success"], true);
    let cleared = bare
        .set_cookies
        .iter()
        .find(|c| c.starts_with("refresh_token="))
        .expect("clearing cookie set");
    assert!(cleared.contains("Max-Age=0"));

    // undecodable cookie still logs out
    let garbage = send(
        &app,
        "POST",
        "/api/logout",
        None,
        Some("refresh_token=garbage"),
        None,
    )
    .await;
    assert_eq!(garbage.status, StatusCode::OK);
    assert_eq!(garbage.body["success"], true);

    // real session logs out too
    let res = signup(&app, "Ada", "ada@example.com").await;
    let cookie = refresh_cookie_pair(&res.set_cookies);
    let real = send(&app, "POST", "/api/logout", None, Some(&cookie), None).await;
    assert_eq!(real.status, StatusCode::OK);
}

#[tokio::test]
async fn catalog_round_trip() {
    let (app, store) = test_app();
    seed_admin(&store).await;
    let admin_login = send(
        &app,
        "POST",
        "/api/login",
        None,
        None,
        Some(json!({ "email": "admin@example.com", "password": "admin-pass" })),
    )
    .await;
    let admin_token = admin_login.body["token"].as_str().unwrap().to_string();

    let course = send(
        &app,
        "POST",
        "/api/courses",
        Some(&admin_token),
        None,
        Some(json!({ "title": "Rust", "description": "systems" })),
    )
    .await;
    let course_id = course.body["id"].as_str().unwrap().to_string();

    // lessons come back ordered by `order`, then id
    for (i, order) in [(0, 2), (1, 0), (2, 1)] {
        let res = send(
            &app,
            "POST",
            &format!("/api/courses/{course_id}/lessons"),
            Some(&admin_token),
            None,
            Some(json!({
                "title": format!("Lesson {i}"),
                "order": order,
                "videoUrl": format!("https://videos.example.com/{i}.mp4"),
            })),
        )
        .await;
        assert_eq!(res.status, StatusCode::CREATED);
    }

    let listing = send(
        &app,
        "GET",
        &format!("/api/courses/{course_id}/lessons"),
        None,
        None,
        None,
    )
    .await;
    assert_eq!(listing.status, StatusCode::OK);
    let orders: Vec<i64> = listing
        .body
        .as_array()
        .unwrap()
        .iter()
        .map(|l| l["order"].as_i64().unwrap())
        .collect();
    assert_eq!(orders, vec![0, 1, 2]);

    // unspecified duration defaults to 0 (unknown until probed)
    let detail = send(
        &app,
        "GET",
        &format!("/api/courses/{course_id}"),
        None,
        None,
        None,
    )
    .await;
    assert_eq!(detail.status, StatusCode::OK);
    assert_eq!(detail.body["lessons"][0]["video"]["duration"], 0);

    let missing = send(
        &app,
        "GET",
        &format!("/api/courses/{}", Uuid::new_v4()),
        None,
        None,
        None,
    )
    .await;
    assert_eq!(missing.status, StatusCode::NOT_FOUND);
}
