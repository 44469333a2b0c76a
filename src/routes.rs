use std::collections::HashMap;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::routing::{get, post, put};
use axum::{Json, Router};
use axum_extra::extract::cookie::{Cookie, CookieJar, SameSite};
use chrono::Utc;
use serde_json::json;
use uuid::Uuid;

use crate::auth::{self, AuthError};
use crate::config::AuthConfig;
use crate::error::ApiError;
use crate::extract::{AdminUser, AuthUser};
use crate::models::*;
use crate::progress::ProgressService;
use crate::AppState;

const REFRESH_COOKIE: &str = "refresh_token";

pub fn router(state: AppState) -> Router {
    Router::new()
        // session lifecycle
        .route("/api/signup", post(signup))
        .route("/api/login", post(login))
        .route("/api/refresh", post(refresh))
        .route("/api/logout", post(logout))
        .route("/api/me", get(me))
        // catalog
        .route("/api/courses", get(list_courses).post(create_course))
        .route(
            "/api/courses/:course_id",
            get(get_course).put(update_course).delete(delete_course),
        )
        .route(
            "/api/courses/:course_id/lessons",
            get(list_lessons).post(create_lesson),
        )
        .route(
            "/api/lessons/:lesson_id",
            put(update_lesson).delete(delete_lesson),
        )
        // progress
        .route(
            "/api/videos/:video_id/progress",
            get(get_video_progress).put(put_progress),
        )
        .route("/api/courses/:course_id/progress", get(get_course_progress))
        .route("/api/admin/users-with-progress", get(users_with_progress))
        .with_state(state)
}

// --- refresh cookie ---

/// The refresh token travels only in this cookie: HTTP-only so script can
/// never read it, SameSite=Lax, Secure in production, scoped to the API.
fn refresh_cookie(cfg: &AuthConfig, token: String) -> Cookie<'static> {
    let mut cookie = Cookie::new(REFRESH_COOKIE, token);
    cookie.set_path("/api");
    cookie.set_http_only(true);
    cookie.set_same_site(SameSite::Lax);
    cookie.set_secure(cfg.secure_cookies);
    cookie.set_max_age(time::Duration::seconds(cfg.refresh_ttl.num_seconds()));
    cookie
}

fn clear_refresh_cookie(cfg: &AuthConfig) -> Cookie<'static> {
    let mut cookie = Cookie::new(REFRESH_COOKIE, "");
    cookie.set_path("/api");
    cookie.set_http_only(true);
    cookie.set_same_site(SameSite::Lax);
    cookie.set_secure(cfg.secure_cookies);
    cookie.set_max_age(time::Duration::ZERO);
    cookie
}

// --- session handlers ---

async fn signup(
    State(state): State<AppState>,
    jar: CookieJar,
    Json(req): Json<SignupReq>,
) -> Result<(CookieJar, Json<AuthResponse>), ApiError> {
    if req.name.trim().is_empty() {
        return Err(ApiError::validation("Name is required"));
    }
    if !req.email.contains('@') {
        return Err(ApiError::validation("Valid email required"));
    }
    if req.password.len() < 6 {
        return Err(ApiError::validation("Password must be at least 6 chars"));
    }

    let email = req.email.trim().to_lowercase();
    if state.store.users.user_by_email(&email).await?.is_some() {
        return Err(ApiError::validation("Email already in use"));
    }

    let now = Utc::now();
    let user = User {
        id: Uuid::new_v4(),
        name: req.name.trim().to_string(),
        email,
        password_hash: auth::hash_password(&req.password)?,
        role: Role::Student,
        created_at: now,
        updated_at: now,
    };
    state.store.users.insert_user(&user).await?;
    tracing::info!(user_id = %user.id, "new signup");

    let tokens = auth::issue_session(&state.auth, &user)?;
    let jar = jar.add(refresh_cookie(&state.auth, tokens.refresh));
    Ok((
        jar,
        Json(AuthResponse {
            token: tokens.access,
            user: UserPublic::from(&user),
        }),
    ))
}

async fn login(
    State(state): State<AppState>,
    jar: CookieJar,
    Json(req): Json<LoginReq>,
) -> Result<(CookieJar, Json<AuthResponse>), ApiError> {
    let email = req.email.trim().to_lowercase();
    let user = state
        .store
        .users
        .user_by_email(&email)
        .await?
        .ok_or_else(|| ApiError::unauthorized("Invalid credentials"))?;
    if !auth::verify_password(&req.password, &user.password_hash)? {
        return Err(ApiError::unauthorized("Invalid credentials"));
    }

    let tokens = auth::issue_session(&state.auth, &user)?;
    let jar = jar.add(refresh_cookie(&state.auth, tokens.refresh));
    Ok((
        jar,
        Json(AuthResponse {
            token: tokens.access,
            user: UserPublic::from(&user),
        }),
    ))
}

/// Silent refresh. Reads the cookie, verifies it, re-reads the user and
/// returns a fresh access token. The refresh cookie is left as-is; it stays
/// valid until its own expiry.
async fn refresh(
    State(state): State<AppState>,
    jar: CookieJar,
) -> Result<Json<AuthResponse>, ApiError> {
    let token = jar
        .get(REFRESH_COOKIE)
        .map(|c| c.value().to_string())
        .ok_or_else(|| ApiError::unauthorized("No refresh token provided"))?;

    let (access, user) = auth::refresh_session(&state.auth, state.store.users.as_ref(), &token)
        .await
        .map_err(|e| match e {
            AuthError::Store(inner) => ApiError::Store(inner),
            _ => ApiError::unauthorized("Invalid or expired token"),
        })?;

    Ok(Json(AuthResponse {
        token: access,
        user: UserPublic::from(&user),
    }))
}

/// Logout never fails from the client's perspective: the cookie is cleared
/// unconditionally and the token is only decoded (not verified) so an
/// expired session still logs out cleanly.
async fn logout(
    State(state): State<AppState>,
    jar: CookieJar,
) -> (CookieJar, Json<serde_json::Value>) {
    let summary = auth::logout_summary(jar.get(REFRESH_COOKIE).map(|c| c.value()));
    match summary.user_id {
        Some(user_id) => {
            tracing::info!(%user_id, session_secs = ?summary.session_secs, "user logged out");
        }
        None => tracing::warn!("logout without a decodable refresh token"),
    }

    let jar = jar.add(clear_refresh_cookie(&state.auth));
    (
        jar,
        Json(json!({ "message": "Logged out successfully", "success": true })),
    )
}

async fn me(
    State(state): State<AppState>,
    AuthUser(principal): AuthUser,
) -> Result<Json<serde_json::Value>, ApiError> {
    let user = state
        .store
        .users
        .user_by_id(principal.user_id)
        .await?
        .ok_or_else(|| ApiError::not_found("User not found"))?;
    Ok(Json(json!({ "user": UserPublic::from(&user) })))
}

// --- catalog handlers ---

fn lesson_detail(lesson: &Lesson, videos: &HashMap<Uuid, Video>) -> Option<LessonDetail> {
    // a lesson whose video no longer resolves is skipped, not an error
    videos.get(&lesson.video_id).map(|video| LessonDetail {
        id: lesson.id,
        title: lesson.title.clone(),
        description: lesson.description.clone(),
        order: lesson.order,
        video: video.clone(),
    })
}

fn course_detail(course: &Course, lessons: &[Lesson], videos: &HashMap<Uuid, Video>) -> CourseDetail {
    CourseDetail {
        id: course.id,
        title: course.title.clone(),
        description: course.description.clone(),
        created_at: course.created_at,
        updated_at: course.updated_at,
        lessons: lessons
            .iter()
            .filter_map(|l| lesson_detail(l, videos))
            .collect(),
    }
}

async fn video_index(
    state: &AppState,
    lessons: &[Lesson],
) -> Result<HashMap<Uuid, Video>, ApiError> {
    let video_ids: Vec<Uuid> = lessons.iter().map(|l| l.video_id).collect();
    let videos = state.store.catalog.videos_by_ids(&video_ids).await?;
    Ok(videos.into_iter().map(|v| (v.id, v)).collect())
}

async fn list_courses(State(state): State<AppState>) -> Result<Json<Vec<CourseDetail>>, ApiError> {
    let courses = state.store.catalog.list_courses().await?;
    let lessons = state.store.catalog.all_lessons().await?;
    let videos = video_index(&state, &lessons).await?;

    let mut by_course: HashMap<Uuid, Vec<Lesson>> = HashMap::new();
    for lesson in lessons {
        by_course.entry(lesson.course_id).or_default().push(lesson);
    }

    let details = courses
        .iter()
        .map(|course| {
            let lessons = by_course.get(&course.id).map(Vec::as_slice).unwrap_or(&[]);
            course_detail(course, lessons, &videos)
        })
        .collect();
    Ok(Json(details))
}

async fn get_course(
    State(state): State<AppState>,
    Path(course_id): Path<Uuid>,
) -> Result<Json<CourseDetail>, ApiError> {
    let course = state
        .store
        .catalog
        .course_by_id(course_id)
        .await?
        .ok_or_else(|| ApiError::not_found("Course not found"))?;
    let lessons = state.store.catalog.lessons_for_course(course_id).await?;
    let videos = video_index(&state, &lessons).await?;
    Ok(Json(course_detail(&course, &lessons, &videos)))
}

async fn create_course(
    State(state): State<AppState>,
    AdminUser(_): AdminUser,
    Json(req): Json<CreateCourseReq>,
) -> Result<(StatusCode, Json<Course>), ApiError> {
    if req.title.trim().is_empty() {
        return Err(ApiError::validation("Title is required"));
    }
    let now = Utc::now();
    let course = Course {
        id: Uuid::new_v4(),
        title: req.title.trim().to_string(),
        description: req.description,
        created_at: now,
        updated_at: now,
    };
    state.store.catalog.insert_course(&course).await?;
    Ok((StatusCode::CREATED, Json(course)))
}

async fn update_course(
    State(state): State<AppState>,
    AdminUser(_): AdminUser,
    Path(course_id): Path<Uuid>,
    Json(req): Json<UpdateCourseReq>,
) -> Result<Json<Course>, ApiError> {
    let course = state
        .store
        .catalog
        .update_course(course_id, req.title, req.description)
        .await?
        .ok_or_else(|| ApiError::not_found("Course not found"))?;
    Ok(Json(course))
}

async fn delete_course(
    State(state): State<AppState>,
    AdminUser(_): AdminUser,
    Path(course_id): Path<Uuid>,
) -> Result<StatusCode, ApiError> {
    if !state.store.catalog.delete_course(course_id).await? {
        return Err(ApiError::not_found("Course not found"));
    }
    Ok(StatusCode::NO_CONTENT)
}

async fn list_lessons(
    State(state): State<AppState>,
    Path(course_id): Path<Uuid>,
) -> Result<Json<Vec<LessonDetail>>, ApiError> {
    let lessons = state.store.catalog.lessons_for_course(course_id).await?;
    let videos = video_index(&state, &lessons).await?;
    Ok(Json(
        lessons
            .iter()
            .filter_map(|l| lesson_detail(l, &videos))
            .collect(),
    ))
}

async fn create_lesson(
    State(state): State<AppState>,
    AdminUser(_): AdminUser,
    Path(course_id): Path<Uuid>,
    Json(req): Json<CreateLessonReq>,
) -> Result<(StatusCode, Json<serde_json::Value>), ApiError> {
    if req.title.trim().is_empty() {
        return Err(ApiError::validation("Lesson title is required"));
    }
    if req.order < 0 {
        return Err(ApiError::validation("order must be a non-negative integer"));
    }
    if req.video_url.trim().is_empty() {
        return Err(ApiError::validation("Video URL is required"));
    }
    let duration = req.video_duration.unwrap_or(0);
    if duration < 0 {
        return Err(ApiError::validation(
            "videoDuration must be a non-negative integer (seconds)",
        ));
    }
    if state.store.catalog.course_by_id(course_id).await?.is_none() {
        return Err(ApiError::not_found("Course not found"));
    }

    let now = Utc::now();
    let video = Video {
        id: Uuid::new_v4(),
        course_id,
        title: req.video_title.unwrap_or_else(|| req.title.clone()),
        url: req.video_url,
        duration,
        created_at: now,
        updated_at: now,
    };
    let lesson = Lesson {
        id: Uuid::new_v4(),
        course_id,
        video_id: video.id,
        title: req.title,
        description: req.description,
        order: req.order,
    };
    state.store.catalog.insert_lesson(&lesson, &video).await?;

    let detail = LessonDetail {
        id: lesson.id,
        title: lesson.title.clone(),
        description: lesson.description.clone(),
        order: lesson.order,
        video,
    };
    Ok((
        StatusCode::CREATED,
        Json(json!({ "message": "Lesson with video created successfully", "lesson": detail })),
    ))
}

async fn update_lesson(
    State(state): State<AppState>,
    AdminUser(_): AdminUser,
    Path(lesson_id): Path<Uuid>,
    Json(req): Json<UpdateLessonReq>,
) -> Result<Json<LessonDetail>, ApiError> {
    let mut lesson = state
        .store
        .catalog
        .lesson_by_id(lesson_id)
        .await?
        .ok_or_else(|| ApiError::not_found("Lesson not found"))?;
    let mut video = state
        .store
        .catalog
        .video_by_id(lesson.video_id)
        .await?
        .ok_or_else(|| ApiError::not_found("Video not found"))?;

    if let Some(title) = req.title {
        lesson.title = title;
    }
    if let Some(description) = req.description {
        lesson.description = Some(description);
    }
    if let Some(order) = req.order {
        if order < 0 {
            return Err(ApiError::validation("order must be a non-negative integer"));
        }
        lesson.order = order;
    }
    if let Some(video_title) = req.video_title {
        video.title = video_title;
    }
    if let Some(video_url) = req.video_url {
        video.url = video_url;
    }
    if let Some(duration) = req.video_duration {
        if duration < 0 {
            return Err(ApiError::validation(
                "videoDuration must be a non-negative integer (seconds)",
            ));
        }
        video.duration = duration;
    }

    state.store.catalog.update_lesson(&lesson, &video).await?;
    Ok(Json(LessonDetail {
        id: lesson.id,
        title: lesson.title,
        description: lesson.description,
        order: lesson.order,
        video,
    }))
}

async fn delete_lesson(
    State(state): State<AppState>,
    AdminUser(_): AdminUser,
    Path(lesson_id): Path<Uuid>,
) -> Result<Json<serde_json::Value>, ApiError> {
    if !state.store.catalog.delete_lesson(lesson_id).await? {
        return Err(ApiError::not_found("Lesson not found"));
    }
    Ok(Json(json!({ "message": "Lesson deleted successfully" })))
}

// --- progress handlers ---

async fn put_progress(
    State(state): State<AppState>,
    AuthUser(principal): AuthUser,
    Path(video_id): Path<Uuid>,
    Json(patch): Json<ProgressPatch>,
) -> Result<Json<Progress>, ApiError> {
    let record = ProgressService::new(state.store.clone())
        .record(principal.user_id, video_id, patch)
        .await?;
    Ok(Json(record))
}

async fn get_video_progress(
    State(state): State<AppState>,
    AuthUser(principal): AuthUser,
    Path(video_id): Path<Uuid>,
) -> Result<Json<VideoProgress>, ApiError> {
    let progress = ProgressService::new(state.store.clone())
        .video_progress(principal.user_id, video_id)
        .await?;
    Ok(Json(progress))
}

async fn get_course_progress(
    State(state): State<AppState>,
    AuthUser(principal): AuthUser,
    Path(course_id): Path<Uuid>,
) -> Result<Json<CourseProgress>, ApiError> {
    let rollup = ProgressService::new(state.store.clone())
        .course_progress(principal.user_id, course_id)
        .await?;
    Ok(Json(rollup))
}

async fn users_with_progress(
    State(state): State<AppState>,
    AdminUser(_): AdminUser,
) -> Result<Json<serde_json::Value>, ApiError> {
    let reports = ProgressService::new(state.store.clone())
        .all_users_progress()
        .await?;
    Ok(Json(json!({ "users": reports })))
}
