use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;
use uuid::Uuid;

use crate::db::Db;
use crate::models::{Course, Lesson, Progress, ProgressPatch, User, Video};

pub mod memory;
pub mod postgres;

/// Errors surfaced by storage adapters.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum StoreError {
    #[error("not found")]
    NotFound,

    #[error("conflict")]
    Conflict,

    #[error("connection error: {0}")]
    Connection(String),

    #[error("data error: {0}")]
    Data(String),
}

#[async_trait]
pub trait UserRepo: Send + Sync {
    /// Insert a new user. Fails with `StoreError::Conflict` when the email
    /// is already taken.
    async fn insert_user(&self, user: &User) -> Result<(), StoreError>;

    async fn user_by_id(&self, id: Uuid) -> Result<Option<User>, StoreError>;

    async fn user_by_email(&self, email: &str) -> Result<Option<User>, StoreError>;

    async fn list_users(&self) -> Result<Vec<User>, StoreError>;
}

#[async_trait]
pub trait CatalogRepo: Send + Sync {
    async fn insert_course(&self, course: &Course) -> Result<(), StoreError>;

    async fn course_by_id(&self, id: Uuid) -> Result<Option<Course>, StoreError>;

    async fn list_courses(&self) -> Result<Vec<Course>, StoreError>;

    /// Apply the supplied fields to an existing course; absent fields keep
    /// their stored value. Returns the updated row, `None` when missing.
    async fn update_course(
        &self,
        id: Uuid,
        title: Option<String>,
        description: Option<String>,
    ) -> Result<Option<Course>, StoreError>;

    /// Returns whether a row was removed. Lessons, videos and progress
    /// cascade at the store level.
    async fn delete_course(&self, id: Uuid) -> Result<bool, StoreError>;

    /// Persist a lesson together with its mandatory video, atomically.
    async fn insert_lesson(&self, lesson: &Lesson, video: &Video) -> Result<(), StoreError>;

    async fn lesson_by_id(&self, id: Uuid) -> Result<Option<Lesson>, StoreError>;

    /// Lessons of one course, ordered by (position, id) so iteration stays
    /// deterministic even when positions tie.
    async fn lessons_for_course(&self, course_id: Uuid) -> Result<Vec<Lesson>, StoreError>;

    /// Every lesson in the catalog, same ordering as `lessons_for_course`.
    async fn all_lessons(&self) -> Result<Vec<Lesson>, StoreError>;

    /// Persist updated lesson + video rows, atomically.
    async fn update_lesson(&self, lesson: &Lesson, video: &Video) -> Result<(), StoreError>;

    /// Remove a lesson and the video it owns. Returns whether it existed.
    async fn delete_lesson(&self, id: Uuid) -> Result<bool, StoreError>;

    async fn video_by_id(&self, id: Uuid) -> Result<Option<Video>, StoreError>;

    async fn videos_by_ids(&self, ids: &[Uuid]) -> Result<Vec<Video>, StoreError>;
}

#[async_trait]
pub trait ProgressRepo: Send + Sync {
    async fn find_by_user_and_video(
        &self,
        user_id: Uuid,
        video_id: Uuid,
    ) -> Result<Option<Progress>, StoreError>;

    /// Merge `patch` into the row keyed by (user_id, video_id), creating it
    /// with zero-value defaults when absent. Atomic with respect to the
    /// unique (user_id, video_id) constraint: concurrent calls for the same
    /// pair never produce a second row or a duplicate-key error.
    async fn upsert(
        &self,
        user_id: Uuid,
        video_id: Uuid,
        patch: ProgressPatch,
    ) -> Result<Progress, StoreError>;

    async fn find_by_user_and_video_set(
        &self,
        user_id: Uuid,
        video_ids: &[Uuid],
    ) -> Result<Vec<Progress>, StoreError>;

    async fn find_by_user_set_and_video_set(
        &self,
        user_ids: &[Uuid],
        video_ids: &[Uuid],
    ) -> Result<Vec<Progress>, StoreError>;
}

/// Aggregates the repositories behind trait objects so services take one
/// handle and tests can swap in the in-memory adapters.
#[derive(Clone)]
pub struct Store {
    pub users: Arc<dyn UserRepo>,
    pub catalog: Arc<dyn CatalogRepo>,
    pub progress: Arc<dyn ProgressRepo>,
}

impl Store {
    pub fn postgres(pool: Db) -> Self {
        let repo = postgres::PgStore::new(pool);
        Self {
            users: Arc::new(repo.clone()),
            catalog: Arc::new(repo.clone()),
            progress: Arc::new(repo),
        }
    }

    pub fn in_memory() -> Self {
        let repo = memory::MemoryStore::new();
        Self {
            users: Arc::new(repo.clone()),
            catalog: Arc::new(repo.clone()),
            progress: Arc::new(repo),
        }
    }
}
