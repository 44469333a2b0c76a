//! Watch-progress recording and rollups. Percentages are always computed
//! from the progress rows on the fly; nothing derived is persisted.

use std::collections::HashMap;

use uuid::Uuid;

use crate::error::ApiError;
use crate::models::{
    CourseProgress, CourseProgressSummary, Progress, ProgressPatch, UserProgressReport,
    VideoProgress,
};
use crate::store::Store;

#[derive(Clone)]
pub struct ProgressService {
    store: Store,
}

/// Half-up rounding of completed/total as a whole percentage.
fn percentage(completed: usize, total: usize) -> u32 {
    if total == 0 {
        return 0;
    }
    (completed as f64 / total as f64 * 100.0).round() as u32
}

impl ProgressService {
    pub fn new(store: Store) -> Self {
        Self { store }
    }

    /// Record one player report for (user, video). Partial-merge semantics:
    /// only the supplied fields change, so duration updates and completion
    /// transitions can arrive independently and in any order. Last write
    /// wins on concurrent reports for the same pair.
    pub async fn record(
        &self,
        user_id: Uuid,
        video_id: Uuid,
        patch: ProgressPatch,
    ) -> Result<Progress, ApiError> {
        if patch.watched_duration.is_some_and(|d| d < 0) {
            return Err(ApiError::validation(
                "watchedDuration must be a non-negative integer (seconds)",
            ));
        }
        if self.store.catalog.video_by_id(video_id).await?.is_none() {
            return Err(ApiError::not_found("Video not found"));
        }
        Ok(self.store.progress.upsert(user_id, video_id, patch).await?)
    }

    /// Watch state for one video, defaulted to zero values when the user has
    /// never reported progress. "No progress yet" is not an error.
    pub async fn video_progress(
        &self,
        user_id: Uuid,
        video_id: Uuid,
    ) -> Result<VideoProgress, ApiError> {
        let row = self
            .store
            .progress
            .find_by_user_and_video(user_id, video_id)
            .await?;
        Ok(row
            .map(|p| VideoProgress {
                watched_duration: p.watched_duration,
                completed: p.completed,
            })
            .unwrap_or_default())
    }

    /// Rollup for one user over one course. A lesson only counts toward the
    /// numerators when its video has a progress row; every lesson counts
    /// toward the denominator. A missing course is NotFound, distinct from
    /// an existing course with no lessons.
    pub async fn course_progress(
        &self,
        user_id: Uuid,
        course_id: Uuid,
    ) -> Result<CourseProgress, ApiError> {
        if self.store.catalog.course_by_id(course_id).await?.is_none() {
            return Err(ApiError::not_found("Course not found"));
        }

        let lessons = self.store.catalog.lessons_for_course(course_id).await?;
        let total_lessons = lessons.len();
        let video_ids: Vec<Uuid> = lessons.iter().map(|l| l.video_id).collect();
        if video_ids.is_empty() {
            return Ok(CourseProgress {
                course_id,
                total_lessons,
                completed_lessons: 0,
                watched_lessons: 0,
                percentage_completed: 0,
            });
        }

        let rows = self
            .store
            .progress
            .find_by_user_and_video_set(user_id, &video_ids)
            .await?;
        let completed_lessons = rows.iter().filter(|p| p.completed).count();
        let watched_lessons = rows.iter().filter(|p| p.watched_duration > 0).count();

        Ok(CourseProgress {
            course_id,
            total_lessons,
            completed_lessons,
            watched_lessons,
            percentage_completed: percentage(completed_lessons, total_lessons),
        })
    }

    /// Rollup for every user over every course: two bulk catalog reads plus
    /// one bulk progress read, then pure in-memory grouping. Store round
    /// trips stay constant no matter how many users exist.
    ///
    /// `overall_percentage` is lesson-weighted: sums of completed and total
    /// lessons across courses, never an average of per-course percentages.
    pub async fn all_users_progress(&self) -> Result<Vec<UserProgressReport>, ApiError> {
        let users = self.store.users.list_users().await?;
        let courses = self.store.catalog.list_courses().await?;
        let lessons = self.store.catalog.all_lessons().await?;

        let mut lessons_by_course: HashMap<Uuid, Vec<Uuid>> = HashMap::new();
        for lesson in &lessons {
            lessons_by_course
                .entry(lesson.course_id)
                .or_default()
                .push(lesson.video_id);
        }

        let user_ids: Vec<Uuid> = users.iter().map(|u| u.id).collect();
        let video_ids: Vec<Uuid> = lessons.iter().map(|l| l.video_id).collect();
        let rows = if user_ids.is_empty() || video_ids.is_empty() {
            Vec::new()
        } else {
            self.store
                .progress
                .find_by_user_set_and_video_set(&user_ids, &video_ids)
                .await?
        };

        // two-level index: user -> video -> progress
        let mut by_user: HashMap<Uuid, HashMap<Uuid, Progress>> = HashMap::new();
        for p in rows {
            by_user.entry(p.user_id).or_default().insert(p.video_id, p);
        }

        let empty = HashMap::new();
        let reports = users
            .iter()
            .map(|user| {
                let user_progress = by_user.get(&user.id).unwrap_or(&empty);
                let mut completed_sum = 0usize;
                let mut total_sum = 0usize;
                let rollups: Vec<CourseProgressSummary> = courses
                    .iter()
                    .map(|course| {
                        let course_videos = lessons_by_course
                            .get(&course.id)
                            .map(Vec::as_slice)
                            .unwrap_or(&[]);
                        let total_lessons = course_videos.len();
                        let completed_lessons = course_videos
                            .iter()
                            .filter(|vid| user_progress.get(*vid).is_some_and(|p| p.completed))
                            .count();
                        completed_sum += completed_lessons;
                        total_sum += total_lessons;
                        CourseProgressSummary {
                            course_id: course.id,
                            title: course.title.clone(),
                            total_lessons,
                            completed_lessons,
                            percentage_completed: percentage(completed_lessons, total_lessons),
                        }
                    })
                    .collect();
                UserProgressReport {
                    user_id: user.id,
                    name: user.name.clone(),
                    email: user.email.clone(),
                    role: user.role,
                    overall_percentage: percentage(completed_sum, total_sum),
                    courses: rollups,
                }
            })
            .collect();
        Ok(reports)
    }
}
