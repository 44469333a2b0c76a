use async_trait::async_trait;
use uuid::Uuid;

use crate::db::Db;
use crate::models::{Course, Lesson, Progress, ProgressPatch, User, Video};
use crate::store::{CatalogRepo, ProgressRepo, StoreError, UserRepo};

/// sqlx-backed adapter implementing every repository port against one pool.
#[derive(Clone)]
pub struct PgStore {
    pool: Db,
}

impl PgStore {
    pub fn new(pool: Db) -> Self {
        Self { pool }
    }
}

fn map_err(e: sqlx::Error) -> StoreError {
    match e {
        sqlx::Error::Database(db) if db.is_unique_violation() => StoreError::Conflict,
        sqlx::Error::RowNotFound => StoreError::NotFound,
        other => StoreError::Connection(other.to_string()),
    }
}

const USER_COLS: &str = "id, name, email, password_hash, role, created_at, updated_at";
const VIDEO_COLS: &str = "id, course_id, title, url, duration, created_at, updated_at";
const LESSON_COLS: &str = "id, course_id, video_id, title, description, position";
const PROGRESS_COLS: &str = "id, user_id, video_id, watched_duration, completed, updated_at";

#[async_trait]
impl UserRepo for PgStore {
    async fn insert_user(&self, user: &User) -> Result<(), StoreError> {
        sqlx::query(
            r"
            INSERT INTO users (id, name, email, password_hash, role, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            ",
        )
        .bind(user.id)
        .bind(&user.name)
        .bind(&user.email)
        .bind(&user.password_hash)
        .bind(user.role.as_str())
        .bind(user.created_at)
        .bind(user.updated_at)
        .execute(&self.pool)
        .await
        .map_err(map_err)?;
        Ok(())
    }

    async fn user_by_id(&self, id: Uuid) -> Result<Option<User>, StoreError> {
        sqlx::query_as::<_, User>(&format!("SELECT {USER_COLS} FROM users WHERE id = $1"))
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(map_err)
    }

    async fn user_by_email(&self, email: &str) -> Result<Option<User>, StoreError> {
        sqlx::query_as::<_, User>(&format!("SELECT {USER_COLS} FROM users WHERE email = $1"))
            .bind(email)
            .fetch_optional(&self.pool)
            .await
            .map_err(map_err)
    }

    async fn list_users(&self) -> Result<Vec<User>, StoreError> {
        sqlx::query_as::<_, User>(&format!(
            "SELECT {USER_COLS} FROM users ORDER BY created_at, id"
        ))
        .fetch_all(&self.pool)
        .await
        .map_err(map_err)
    }
}

#[async_trait]
impl CatalogRepo for PgStore {
    async fn insert_course(&self, course: &Course) -> Result<(), StoreError> {
        sqlx::query(
            r"
            INSERT INTO courses (id, title, description, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5)
            ",
        )
        .bind(course.id)
        .bind(&course.title)
        .bind(&course.description)
        .bind(course.created_at)
        .bind(course.updated_at)
        .execute(&self.pool)
        .await
        .map_err(map_err)?;
        Ok(())
    }

    async fn course_by_id(&self, id: Uuid) -> Result<Option<Course>, StoreError> {
        sqlx::query_as::<_, Course>("SELECT * FROM courses WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(map_err)
    }

    async fn list_courses(&self) -> Result<Vec<Course>, StoreError> {
        sqlx::query_as::<_, Course>("SELECT * FROM courses ORDER BY created_at, id")
            .fetch_all(&self.pool)
            .await
            .map_err(map_err)
    }

    async fn update_course(
        &self,
        id: Uuid,
        title: Option<String>,
        description: Option<String>,
    ) -> Result<Option<Course>, StoreError> {
        sqlx::query_as::<_, Course>(
            r"
            UPDATE courses
            SET title = COALESCE($2, title),
                description = COALESCE($3, description),
                updated_at = now()
            WHERE id = $1
            RETURNING *
            ",
        )
        .bind(id)
        .bind(title)
        .bind(description)
        .fetch_optional(&self.pool)
        .await
        .map_err(map_err)
    }

    async fn delete_course(&self, id: Uuid) -> Result<bool, StoreError> {
        let res = sqlx::query("DELETE FROM courses WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(map_err)?;
        Ok(res.rows_affected() > 0)
    }

    async fn insert_lesson(&self, lesson: &Lesson, video: &Video) -> Result<(), StoreError> {
        let mut tx = self.pool.begin().await.map_err(map_err)?;
        sqlx::query(
            r"
            INSERT INTO videos (id, course_id, title, url, duration, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            ",
        )
        .bind(video.id)
        .bind(video.course_id)
        .bind(&video.title)
        .bind(&video.url)
        .bind(video.duration)
        .bind(video.created_at)
        .bind(video.updated_at)
        .execute(&mut *tx)
        .await
        .map_err(map_err)?;

        sqlx::query(
            r"
            INSERT INTO lessons (id, course_id, video_id, title, description, position)
            VALUES ($1, $2, $3, $4, $5, $6)
            ",
        )
        .bind(lesson.id)
        .bind(lesson.course_id)
        .bind(lesson.video_id)
        .bind(&lesson.title)
        .bind(&lesson.description)
        .bind(lesson.order)
        .execute(&mut *tx)
        .await
        .map_err(map_err)?;

        tx.commit().await.map_err(map_err)
    }

    async fn lesson_by_id(&self, id: Uuid) -> Result<Option<Lesson>, StoreError> {
        sqlx::query_as::<_, Lesson>(&format!("SELECT {LESSON_COLS} FROM lessons WHERE id = $1"))
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(map_err)
    }

    async fn lessons_for_course(&self, course_id: Uuid) -> Result<Vec<Lesson>, StoreError> {
        sqlx::query_as::<_, Lesson>(&format!(
            "SELECT {LESSON_COLS} FROM lessons WHERE course_id = $1 ORDER BY position, id"
        ))
        .bind(course_id)
        .fetch_all(&self.pool)
        .await
        .map_err(map_err)
    }

    async fn all_lessons(&self) -> Result<Vec<Lesson>, StoreError> {
        sqlx::query_as::<_, Lesson>(&format!(
            "SELECT {LESSON_COLS} FROM lessons ORDER BY position, id"
        ))
        .fetch_all(&self.pool)
        .await
        .map_err(map_err)
    }

    async fn update_lesson(&self, lesson: &Lesson, video: &Video) -> Result<(), StoreError> {
        let mut tx = self.pool.begin().await.map_err(map_err)?;
        sqlx::query(
            r"
            UPDATE lessons
            SET title = $2, description = $3, position = $4
            WHERE id = $1
            ",
        )
        .bind(lesson.id)
        .bind(&lesson.title)
        .bind(&lesson.description)
        .bind(lesson.order)
        .execute(&mut *tx)
        .await
        .map_err(map_err)?;

        sqlx::query(
            r"
            UPDATE videos
            SET title = $2, url = $3, duration = $4, updated_at = now()
            WHERE id = $1
            ",
        )
        .bind(video.id)
        .bind(&video.title)
        .bind(&video.url)
        .bind(video.duration)
        .execute(&mut *tx)
        .await
        .map_err(map_err)?;

        tx.commit().await.map_err(map_err)
    }

    async fn delete_lesson(&self, id: Uuid) -> Result<bool, StoreError> {
        // Removing the owned video cascades the lesson row and any progress.
        let res = sqlx::query(
            "DELETE FROM videos WHERE id = (SELECT video_id FROM lessons WHERE id = $1)",
        )
        .bind(id)
        .execute(&self.pool)
        .await
        .map_err(map_err)?;
        Ok(res.rows_affected() > 0)
    }

    async fn video_by_id(&self, id: Uuid) -> Result<Option<Video>, StoreError> {
        sqlx::query_as::<_, Video>(&format!("SELECT {VIDEO_COLS} FROM videos WHERE id = $1"))
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(map_err)
    }

    async fn videos_by_ids(&self, ids: &[Uuid]) -> Result<Vec<Video>, StoreError> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        sqlx::query_as::<_, Video>(&format!(
            "SELECT {VIDEO_COLS} FROM videos WHERE id = ANY($1)"
        ))
        .bind(ids)
        .fetch_all(&self.pool)
        .await
        .map_err(map_err)
    }
}

#[async_trait]
impl ProgressRepo for PgStore {
    async fn find_by_user_and_video(
        &self,
        user_id: Uuid,
        video_id: Uuid,
    ) -> Result<Option<Progress>, StoreError> {
        sqlx::query_as::<_, Progress>(&format!(
            "SELECT {PROGRESS_COLS} FROM progress WHERE user_id = $1 AND video_id = $2"
        ))
        .bind(user_id)
        .bind(video_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(map_err)
    }

    async fn upsert(
        &self,
        user_id: Uuid,
        video_id: Uuid,
        patch: ProgressPatch,
    ) -> Result<Progress, StoreError> {
        // The unique (user_id, video_id) index turns the insert race into an
        // update; absent patch fields keep the stored value.
        sqlx::query_as::<_, Progress>(&format!(
            r"
            INSERT INTO progress (id, user_id, video_id, watched_duration, completed, updated_at)
            VALUES ($1, $2, $3, COALESCE($4, 0), COALESCE($5, false), now())
            ON CONFLICT (user_id, video_id)
            DO UPDATE SET
                watched_duration = COALESCE($4, progress.watched_duration),
                completed = COALESCE($5, progress.completed),
                updated_at = now()
            RETURNING {PROGRESS_COLS}
            "
        ))
        .bind(Uuid::new_v4())
        .bind(user_id)
        .bind(video_id)
        .bind(patch.watched_duration)
        .bind(patch.completed)
        .fetch_one(&self.pool)
        .await
        .map_err(map_err)
    }

    async fn find_by_user_and_video_set(
        &self,
        user_id: Uuid,
        video_ids: &[Uuid],
    ) -> Result<Vec<Progress>, StoreError> {
        if video_ids.is_empty() {
            return Ok(Vec::new());
        }
        sqlx::query_as::<_, Progress>(&format!(
            "SELECT {PROGRESS_COLS} FROM progress WHERE user_id = $1 AND video_id = ANY($2)"
        ))
        .bind(user_id)
        .bind(video_ids)
        .fetch_all(&self.pool)
        .await
        .map_err(map_err)
    }

    async fn find_by_user_set_and_video_set(
        &self,
        user_ids: &[Uuid],
        video_ids: &[Uuid],
    ) -> Result<Vec<Progress>, StoreError> {
        if user_ids.is_empty() || video_ids.is_empty() {
            return Ok(Vec::new());
        }
        sqlx::query_as::<_, Progress>(&format!(
            "SELECT {PROGRESS_COLS} FROM progress WHERE user_id = ANY($1) AND video_id = ANY($2)"
        ))
        .bind(user_ids)
        .bind(video_ids)
        .fetch_all(&self.pool)
        .await
        .map_err(map_err)
    }
}
