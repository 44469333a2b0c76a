use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Role attached to a user at creation time. Immutable through this API.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Student,
    Admin,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Student => "student",
            Role::Admin => "admin",
        }
    }
}

#[derive(Debug, thiserror::Error)]
#[error("unknown role: {0}")]
pub struct InvalidRole(String);

impl TryFrom<String> for Role {
    type Error = InvalidRole;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        match s.as_str() {
            "student" => Ok(Role::Student),
            "admin" => Ok(Role::Admin),
            _ => Err(InvalidRole(s)),
        }
    }
}

#[derive(sqlx::FromRow, Serialize, Deserialize, Debug, Clone)]
pub struct User {
    pub id: Uuid,
    pub name: String,
    pub email: String,
    #[serde(skip_serializing)]
    pub password_hash: String,
    #[sqlx(try_from = "String")]
    pub role: Role,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// User shape returned to clients; never carries the password hash.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct UserPublic {
    pub id: Uuid,
    pub name: String,
    pub email: String,
    pub role: Role,
}

impl From<&User> for UserPublic {
    fn from(u: &User) -> Self {
        Self {
            id: u.id,
            name: u.name.clone(),
            email: u.email.clone(),
            role: u.role,
        }
    }
}

#[derive(sqlx::FromRow, Serialize, Deserialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct Course {
    pub id: Uuid,
    pub title: String,
    pub description: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(sqlx::FromRow, Serialize, Deserialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct Lesson {
    pub id: Uuid,
    pub course_id: Uuid,
    pub video_id: Uuid,
    pub title: String,
    pub description: Option<String>,
    // `position` in the schema; `order` on the wire
    #[sqlx(rename = "position")]
    pub order: i32,
}

#[derive(sqlx::FromRow, Serialize, Deserialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct Video {
    pub id: Uuid,
    pub course_id: Uuid,
    pub title: String,
    pub url: String,
    pub duration: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// One user's watch state for one video. At most one row exists per
/// (user_id, video_id) pair; the store enforces it with a unique index.
#[derive(sqlx::FromRow, Serialize, Deserialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct Progress {
    pub id: Uuid,
    pub user_id: Uuid,
    pub video_id: Uuid,
    pub watched_duration: i64,
    pub completed: bool,
    pub updated_at: DateTime<Utc>,
}

/// Partial update reported by the player. Absent fields keep their stored
/// value; on first report they default to zero values.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, Default)]
#[serde(rename_all = "camelCase")]
pub struct ProgressPatch {
    pub watched_duration: Option<i64>,
    pub completed: Option<bool>,
}

/// Watch state for a single video, defaulted when no row exists yet.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, Default)]
#[serde(rename_all = "camelCase")]
pub struct VideoProgress {
    pub watched_duration: i64,
    pub completed: bool,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct CourseProgress {
    pub course_id: Uuid,
    pub total_lessons: usize,
    pub completed_lessons: usize,
    pub watched_lessons: usize,
    pub percentage_completed: u32,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct CourseProgressSummary {
    pub course_id: Uuid,
    pub title: String,
    pub total_lessons: usize,
    pub completed_lessons: usize,
    pub percentage_completed: u32,
}

/// Per-user rollup across the whole catalog. `overall_percentage` is
/// lesson-weighted: sums of completed and total lessons across courses,
/// not an average of per-course percentages.
#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct UserProgressReport {
    pub user_id: Uuid,
    pub name: String,
    pub email: String,
    pub role: Role,
    pub overall_percentage: u32,
    pub courses: Vec<CourseProgressSummary>,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct LessonDetail {
    pub id: Uuid,
    pub title: String,
    pub description: Option<String>,
    pub order: i32,
    pub video: Video,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct CourseDetail {
    pub id: Uuid,
    pub title: String,
    pub description: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub lessons: Vec<LessonDetail>,
}

// --- request bodies ---

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct SignupReq {
    pub name: String,
    pub email: String,
    pub password: String,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct LoginReq {
    pub email: String,
    pub password: String,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct CreateCourseReq {
    pub title: String,
    pub description: Option<String>,
}

#[derive(Serialize, Deserialize, Debug, Clone, Default)]
pub struct UpdateCourseReq {
    pub title: Option<String>,
    pub description: Option<String>,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct CreateLessonReq {
    pub title: String,
    pub description: Option<String>,
    pub order: i32,
    pub video_title: Option<String>,
    pub video_url: String,
    pub video_duration: Option<i64>,
}

#[derive(Serialize, Deserialize, Debug, Clone, Default)]
#[serde(rename_all = "camelCase")]
pub struct UpdateLessonReq {
    pub title: Option<String>,
    pub description: Option<String>,
    pub order: Option<i32>,
    pub video_title: Option<String>,
    pub video_url: Option<String>,
    pub video_duration: Option<i64>,
}

/// Login/signup/refresh response: access token in the body, refresh token
/// only ever in the HTTP-only cookie.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct AuthResponse {
    pub token: String,
    pub user: UserPublic,
}
