use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use super::course::{NUMBER_OF_DURATIONS, NUMBER_OF_VIDEOS, course_key};
use super::lesson::{VIDEO_ARRANGEMENT_VERSION, lesson_key};
use super::{CourseLookup, LessonLookup, RepositoryContext, patch_actions, record_item};
use crate::consistency::{
    AggregateCounterMaintainer, CounterChange, CounterDelta, FailurePolicy, FailureResolution,
    OrderedListPositioner, Page, Pagination,
};
use crate::core::{DomainError, EntityKind, Item, ItemKey, Result, TableSchema, Value, from_item};
use crate::storage::{Condition, WriteOp};

const DURATION: &str = "durationInSec";

/// A video inside a lesson. `video_id` doubles as the position key: the
/// lesson's videos are listed in descending `video_id` order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Video {
    pub lesson_id: i64,
    pub video_id: i64,
    pub course_id: i64,
    pub title: String,
    #[serde(default)]
    pub duration_in_sec: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl Video {
    pub fn new(course_id: i64, lesson_id: i64, video_id: i64, title: &str, duration_in_sec: i64) -> Self {
        Self {
            lesson_id,
            video_id,
            course_id,
            title: title.to_string(),
            duration_in_sec,
            url: None,
            created_at: Utc::now(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VideoPatch {
    #[serde(skip)]
    pub course_id: i64,
    #[serde(skip)]
    pub lesson_id: i64,
    #[serde(skip)]
    pub video_id: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration_in_sec: Option<i64>,
}

/// Move a video between two neighbors (by their current positions).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PositionUpdate {
    pub course_id: i64,
    pub lesson_id: i64,
    pub video_id: i64,
    /// Position of the neighbor that should end up just below the video.
    pub upper: Option<i64>,
    /// Position of the neighbor that should end up just above the video.
    pub lower: Option<i64>,
    /// Arrangement version the caller's view of the list was read at.
    pub expected_version: i64,
}

pub fn video_key(lesson_id: i64, video_id: i64) -> ItemKey {
    ItemKey::new(lesson_id, video_id)
}

pub struct VideoRepository {
    ctx: RepositoryContext,
    courses: Arc<dyn CourseLookup>,
    lessons: Arc<dyn LessonLookup>,
    positioner: OrderedListPositioner,
}

impl VideoRepository {
    pub fn new(
        ctx: RepositoryContext,
        courses: Arc<dyn CourseLookup>,
        lessons: Arc<dyn LessonLookup>,
    ) -> Self {
        let positioner = OrderedListPositioner::new(
            TableSchema::new(&ctx.tables.video, "lessonId", "videoId"),
            &ctx.tables.lesson,
            VIDEO_ARRANGEMENT_VERSION,
        );
        Self {
            ctx,
            courses,
            lessons,
            positioner,
        }
    }

    fn table(&self) -> &str {
        &self.ctx.tables.video
    }

    /// Inserts the video and rolls its count and duration up to the lesson
    /// and the course. The lesson's arrangement version moves too.
    pub async fn save_if_not_exists_or_throw(&self, video: &Video) -> Result<()> {
        let item = record_item(video, None)?;
        let duration = video.duration_in_sec;
        let ops = vec![
            WriteOp::put(self.table(), item, Condition::NotExists),
            AggregateCounterMaintainer::increment(
                &self.ctx.tables.lesson,
                lesson_key(video.course_id, video.lesson_id),
                &[
                    CounterDelta::new(NUMBER_OF_VIDEOS, 1),
                    CounterDelta::new(NUMBER_OF_DURATIONS, duration),
                    CounterDelta::new(VIDEO_ARRANGEMENT_VERSION, 1),
                ],
            ),
            AggregateCounterMaintainer::increment(
                &self.ctx.tables.course,
                course_key(video.course_id),
                &[
                    CounterDelta::new(NUMBER_OF_VIDEOS, 1),
                    CounterDelta::new(NUMBER_OF_DURATIONS, duration),
                ],
            ),
        ];
        let policy = FailurePolicy::new()
            .on(0, DomainError::DuplicateKey(EntityKind::Video))
            .on(1, DomainError::NotFound(EntityKind::Lesson))
            .on(2, DomainError::NotFound(EntityKind::Course));
        self.ctx.coordinator.submit(ops, &policy).await?;
        info!(
            lesson_id = video.lesson_id,
            video_id = video.video_id,
            duration,
            "video created"
        );
        Ok(())
    }

    pub async fn find_by_id(&self, lesson_id: i64, video_id: i64) -> Result<Option<Video>> {
        let item = self.ctx.get(self.table(), &video_key(lesson_id, video_id)).await?;
        item.map(|item| from_item(&item).map_err(DomainError::from))
            .transpose()
    }

    pub async fn find_by_id_or_throw(&self, lesson_id: i64, video_id: i64) -> Result<Video> {
        self.find_by_id(lesson_id, video_id)
            .await?
            .ok_or(DomainError::NotFound(EntityKind::Video))
    }

    /// Videos of a lesson in list order.
    pub async fn find_many(&self, lesson_id: i64, pagination: &Pagination) -> Result<Page<Video>> {
        self.ctx
            .walker
            .walk(self.table(), lesson_id, pagination)
            .await?
            .into_records()
    }

    pub async fn save_if_exists_or_throw(&self, patch: &VideoPatch) -> Result<()> {
        if patch.duration_in_sec.is_some() {
            return self
                .ctx
                .retry
                .run("video.update", move || self.try_update_with_duration(patch))
                .await;
        }

        let actions = patch_actions(patch, &[])?;
        if actions.is_empty() {
            return Ok(());
        }
        self.ctx
            .coordinator
            .write(
                WriteOp::update(
                    self.table(),
                    video_key(patch.lesson_id, patch.video_id),
                    actions,
                    Condition::Exists,
                ),
                FailureResolution::Fail(DomainError::NotFound(EntityKind::Video)),
            )
            .await?;
        Ok(())
    }

    /// One round of a duration change: the new sums on the lesson and the
    /// course are computed from values read here, so every one of them is
    /// guarded.
    async fn try_update_with_duration(&self, patch: &VideoPatch) -> Result<()> {
        let key = video_key(patch.lesson_id, patch.video_id);
        let video = self
            .ctx
            .get(self.table(), &key)
            .await?
            .ok_or(DomainError::NotFound(EntityKind::Video))?;
        let lesson = self
            .lessons
            .find_lesson(patch.course_id, patch.lesson_id)
            .await?
            .ok_or(DomainError::NotFound(EntityKind::Lesson))?;
        let course = self
            .courses
            .find_course(patch.course_id)
            .await?
            .ok_or(DomainError::NotFound(EntityKind::Course))?;

        let old_duration = AggregateCounterMaintainer::read(&video, DURATION);
        let new_duration = patch.duration_in_sec.unwrap_or(old_duration);
        let delta = new_duration - old_duration;

        let actions = patch_actions(patch, &[])?;
        let ops = vec![
            WriteOp::update(
                self.table(),
                key,
                actions,
                Condition::exists_with(vec![(DURATION, Value::Integer(old_duration))]),
            ),
            AggregateCounterMaintainer::compare_and_set(
                &self.ctx.tables.lesson,
                lesson_key(patch.course_id, patch.lesson_id),
                &[CounterChange::new(NUMBER_OF_DURATIONS, lesson.number_of_durations, delta)],
            ),
            AggregateCounterMaintainer::compare_and_set(
                &self.ctx.tables.course,
                course_key(patch.course_id),
                &[CounterChange::new(NUMBER_OF_DURATIONS, course.number_of_durations, delta)],
            ),
        ];
        self.ctx.coordinator.submit(ops, &FailurePolicy::new()).await?;
        debug!(
            lesson_id = patch.lesson_id,
            video_id = patch.video_id,
            delta,
            "video duration changed"
        );
        Ok(())
    }

    /// Deletes the video and takes it out of the lesson's and the course's
    /// roll-ups. Absent video: nothing to do. Absent course: the lesson's
    /// roll-ups are still maintained. Absent lesson: the video is deleted on
    /// its own.
    pub async fn delete_if_exists_or_throw(&self, course_id: i64, lesson_id: i64, video_id: i64) -> Result<()> {
        self.ctx
            .retry
            .run("video.delete", move || self.try_delete(course_id, lesson_id, video_id))
            .await
    }

    async fn try_delete(&self, course_id: i64, lesson_id: i64, video_id: i64) -> Result<()> {
        let key = video_key(lesson_id, video_id);
        let Some(current) = self.ctx.get(self.table(), &key).await? else {
            debug!(lesson_id, video_id, "video already absent");
            return Ok(());
        };
        let duration = AggregateCounterMaintainer::read(&current, DURATION);

        let ops = vec![
            self.guarded_delete(&key, duration),
            self.lesson_removal(course_id, lesson_id, duration),
            AggregateCounterMaintainer::decrement(
                &self.ctx.tables.course,
                course_key(course_id),
                &[
                    CounterDelta::new(NUMBER_OF_VIDEOS, 1),
                    CounterDelta::new(NUMBER_OF_DURATIONS, duration),
                ],
            ),
        ];
        let policy = FailurePolicy::new()
            .on(1, DomainError::NotFound(EntityKind::Lesson))
            .on(2, DomainError::NotFound(EntityKind::Course));

        let lesson_gone = match self.ctx.coordinator.submit(ops, &policy).await {
            Ok(_) => return Ok(()),
            Err(DomainError::NotFound(EntityKind::Course)) => {
                debug!(lesson_id, video_id, "course absent, updating lesson roll-ups only");
                let ops = vec![
                    self.guarded_delete(&key, duration),
                    self.lesson_removal(course_id, lesson_id, duration),
                ];
                let policy = FailurePolicy::new().on(1, DomainError::NotFound(EntityKind::Lesson));
                match self.ctx.coordinator.submit(ops, &policy).await {
                    Ok(_) => return Ok(()),
                    Err(err) if err.is_not_found() => err,
                    Err(err) => return Err(err),
                }
            }
            Err(err) if err.is_not_found() => err,
            Err(err) => return Err(err),
        };

        debug!(lesson_id, video_id, error = %lesson_gone, "lesson absent, deleting video alone");
        self.ctx
            .coordinator
            .write(
                WriteOp::delete(self.table(), key, Condition::Exists),
                FailureResolution::Absorb,
            )
            .await?;
        Ok(())
    }

    fn guarded_delete(&self, key: &ItemKey, duration: i64) -> WriteOp {
        WriteOp::delete(
            self.table(),
            key.clone(),
            Condition::exists_with(vec![(DURATION, Value::Integer(duration))]),
        )
    }

    /// Lesson-side deltas for a video leaving the list.
    fn lesson_removal(&self, course_id: i64, lesson_id: i64, duration: i64) -> WriteOp {
        AggregateCounterMaintainer::increment(
            &self.ctx.tables.lesson,
            lesson_key(course_id, lesson_id),
            &[
                CounterDelta::new(NUMBER_OF_VIDEOS, -1),
                CounterDelta::new(NUMBER_OF_DURATIONS, -duration),
                CounterDelta::new(VIDEO_ARRANGEMENT_VERSION, 1),
            ],
        )
    }

    /// Moves a video between two neighbors and returns its new position.
    ///
    /// Fails with `Conflict` when the lesson was rearranged after the
    /// caller read it, when the video or a neighbor is gone, or when the
    /// video is named as its own neighbor. A move that lands on the current
    /// position writes nothing.
    pub async fn update_position(&self, update: &PositionUpdate) -> Result<i64> {
        self.ctx
            .retry
            .run("video.update_position", move || self.try_reposition(update))
            .await
    }

    async fn try_reposition(&self, update: &PositionUpdate) -> Result<i64> {
        let lesson = self
            .lessons
            .find_lesson(update.course_id, update.lesson_id)
            .await?
            .ok_or(DomainError::NotFound(EntityKind::Lesson))?;
        if lesson.video_arrangement_version != update.expected_version {
            return Err(DomainError::Conflict(format!(
                "lesson {} is at arrangement version {}, not {}",
                update.lesson_id, lesson.video_arrangement_version, update.expected_version
            )));
        }

        if [update.upper, update.lower].contains(&Some(update.video_id)) {
            return Err(DomainError::Conflict(format!(
                "video {} cannot be its own neighbor",
                update.video_id
            )));
        }

        let video = self.existing(update.lesson_id, update.video_id, "video").await?;
        for neighbor in [update.upper, update.lower].into_iter().flatten() {
            self.existing(update.lesson_id, neighbor, "neighbor").await?;
        }

        let position = OrderedListPositioner::compute_position(update.upper, update.lower)?;
        if position == update.video_id {
            debug!(lesson_id = update.lesson_id, position, "video already in place");
            return Ok(position);
        }
        let duration = AggregateCounterMaintainer::read(&video, DURATION);
        let ops = self.positioner.reorder(
            &video,
            position,
            lesson_key(update.course_id, update.lesson_id),
            lesson.video_arrangement_version,
            vec![(DURATION, Value::Integer(duration))],
        )?;
        let policy = self.positioner.reorder_policy().on(
            1,
            DomainError::Conflict(format!("position {} is already taken", position)),
        );
        self.ctx.coordinator.submit(ops, &policy).await?;

        info!(
            lesson_id = update.lesson_id,
            from = update.video_id,
            to = position,
            "video moved"
        );
        Ok(position)
    }

    async fn existing(&self, lesson_id: i64, position: i64, what: &str) -> Result<Item> {
        self.ctx
            .get(self.table(), &video_key(lesson_id, position))
            .await?
            .ok_or_else(|| {
                DomainError::Conflict(format!(
                    "{} at position {} of lesson {} is gone",
                    what, position, lesson_id
                ))
            })
    }
}
