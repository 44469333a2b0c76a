use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use chrono::Utc;
use uuid::Uuid;

use crate::models::{Course, Lesson, Progress, ProgressPatch, User, Video};
use crate::store::{CatalogRepo, ProgressRepo, StoreError, UserRepo};

/// In-memory adapter used by tests and local prototyping. Mirrors the
/// Postgres adapter's semantics, including the one-row-per-(user, video)
/// merge behavior of `upsert`.
#[derive(Clone, Default)]
pub struct MemoryStore {
    inner: Arc<Mutex<Inner>>,
}

#[derive(Default)]
struct Inner {
    users: HashMap<Uuid, User>,
    courses: HashMap<Uuid, Course>,
    lessons: HashMap<Uuid, Lesson>,
    videos: HashMap<Uuid, Video>,
    progress: HashMap<(Uuid, Uuid), Progress>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<MutexGuard<'_, Inner>, StoreError> {
        self.inner
            .lock()
            .map_err(|e| StoreError::Connection(e.to_string()))
    }
}

fn ordered_lessons<'a>(it: impl Iterator<Item = &'a Lesson>) -> Vec<Lesson> {
    let mut lessons: Vec<Lesson> = it.cloned().collect();
    lessons.sort_by_key(|l| (l.order, l.id));
    lessons
}

#[async_trait]
impl UserRepo for MemoryStore {
    async fn insert_user(&self, user: &User) -> Result<(), StoreError> {
        let mut inner = self.lock()?;
        if inner.users.values().any(|u| u.email == user.email) {
            return Err(StoreError::Conflict);
        }
        inner.users.insert(user.id, user.clone());
        Ok(())
    }

    async fn user_by_id(&self, id: Uuid) -> Result<Option<User>, StoreError> {
        Ok(self.lock()?.users.get(&id).cloned())
    }

    async fn user_by_email(&self, email: &str) -> Result<Option<User>, StoreError> {
        Ok(self.lock()?.users.values().find(|u| u.email == email).cloned())
    }

    async fn list_users(&self) -> Result<Vec<User>, StoreError> {
        let inner = self.lock()?;
        let mut users: Vec<User> = inner.users.values().cloned().collect();
        users.sort_by_key(|u| (u.created_at, u.id));
        Ok(users)
    }
}

#[async_trait]
impl CatalogRepo for MemoryStore {
    async fn insert_course(&self, course: &Course) -> Result<(), StoreError> {
        self.lock()?.courses.insert(course.id, course.clone());
        Ok(())
    }

    async fn course_by_id(&self, id: Uuid) -> Result<Option<Course>, StoreError> {
        Ok(self.lock()?.courses.get(&id).cloned())
    }

    async fn list_courses(&self) -> Result<Vec<Course>, StoreError> {
        let inner = self.lock()?;
        let mut courses: Vec<Course> = inner.courses.values().cloned().collect();
        courses.sort_by_key(|c| (c.created_at, c.id));
        Ok(courses)
    }

    async fn update_course(
        &self,
        id: Uuid,
        title: Option<String>,
        description: Option<String>,
    ) -> Result<Option<Course>, StoreError> {
        let mut inner = self.lock()?;
        let Some(course) = inner.courses.get_mut(&id) else {
            return Ok(None);
        };
        if let Some(title) = title {
            course.title = title;
        }
        if let Some(description) = description {
            course.description = Some(description);
        }
        course.updated_at = Utc::now();
        Ok(Some(course.clone()))
    }

    async fn delete_course(&self, id: Uuid) -> Result<bool, StoreError> {
        let mut inner = self.lock()?;
        if inner.courses.remove(&id).is_none() {
            return Ok(false);
        }
        inner.lessons.retain(|_, l| l.course_id != id);
        let gone: Vec<Uuid> = inner
            .videos
            .values()
            .filter(|v| v.course_id == id)
            .map(|v| v.id)
            .collect();
        inner.videos.retain(|_, v| v.course_id != id);
        inner.progress.retain(|(_, vid), _| !gone.contains(vid));
        Ok(true)
    }

    async fn insert_lesson(&self, lesson: &Lesson, video: &Video) -> Result<(), StoreError> {
        let mut inner = self.lock()?;
        inner.videos.insert(video.id, video.clone());
        inner.lessons.insert(lesson.id, lesson.clone());
        Ok(())
    }

    async fn lesson_by_id(&self, id: Uuid) -> Result<Option<Lesson>, StoreError> {
        Ok(self.lock()?.lessons.get(&id).cloned())
    }

    async fn lessons_for_course(&self, course_id: Uuid) -> Result<Vec<Lesson>, StoreError> {
        let inner = self.lock()?;
        Ok(ordered_lessons(
            inner.lessons.values().filter(|l| l.course_id == course_id),
        ))
    }

    async fn all_lessons(&self) -> Result<Vec<Lesson>, StoreError> {
        let inner = self.lock()?;
        Ok(ordered_lessons(inner.lessons.values()))
    }

    async fn update_lesson(&self, lesson: &Lesson, video: &Video) -> Result<(), StoreError> {
        let mut inner = self.lock()?;
        inner.lessons.insert(lesson.id, lesson.clone());
        inner.videos.insert(video.id, video.clone());
        Ok(())
    }

    async fn delete_lesson(&self, id: Uuid) -> Result<bool, StoreError> {
        let mut inner = self.lock()?;
        let Some(lesson) = inner.lessons.remove(&id) else {
            return Ok(false);
        };
        inner.videos.remove(&lesson.video_id);
        inner.progress.retain(|(_, vid), _| *vid != lesson.video_id);
        Ok(true)
    }

    async fn video_by_id(&self, id: Uuid) -> Result<Option<Video>, StoreError> {
        Ok(self.lock()?.videos.get(&id).cloned())
    }

    async fn videos_by_ids(&self, ids: &[Uuid]) -> Result<Vec<Video>, StoreError> {
        let inner = self.lock()?;
        Ok(ids.iter().filter_map(|id| inner.videos.get(id).cloned()).collect())
    }
}

#[async_trait]
impl ProgressRepo for MemoryStore {
    async fn find_by_user_and_video(
        &self,
        user_id: Uuid,
        video_id: Uuid,
    ) -> Result<Option<Progress>, StoreError> {
        Ok(self.lock()?.progress.get(&(user_id, video_id)).cloned())
    }

    async fn upsert(
        &self,
        user_id: Uuid,
        video_id: Uuid,
        patch: ProgressPatch,
    ) -> Result<Progress, StoreError> {
        let mut inner = self.lock()?;
        let row = inner
            .progress
            .entry((user_id, video_id))
            .or_insert_with(|| Progress {
                id: Uuid::new_v4(),
                user_id,
                video_id,
                watched_duration: 0,
                completed: false,
                updated_at: Utc::now(),
            });
        if let Some(watched) = patch.watched_duration {
            row.watched_duration = watched;
        }
        if let Some(completed) = patch.completed {
            row.completed = completed;
        }
        row.updated_at = Utc::now();
        Ok(row.clone())
    }

    async fn find_by_user_and_video_set(
        &self,
        user_id: Uuid,
        video_ids: &[Uuid],
    ) -> Result<Vec<Progress>, StoreError> {
        let inner = self.lock()?;
        Ok(video_ids
            .iter()
            .filter_map(|vid| inner.progress.get(&(user_id, *vid)).cloned())
            .collect())
    }

    async fn find_by_user_set_and_video_set(
        &self,
        user_ids: &[Uuid],
        video_ids: &[Uuid],
    ) -> Result<Vec<Progress>, StoreError> {
        let inner = self.lock()?;
        Ok(inner
            .progress
            .values()
            .filter(|p| user_ids.contains(&p.user_id) && video_ids.contains(&p.video_id))
            .cloned()
            .collect())
    }
}
