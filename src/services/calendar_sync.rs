use std::collections::HashMap;
use std::sync::Arc;

use serde::Serialize;
use sqlx::SqlitePool;
use tracing::{debug, error, info, warn};

use crate::calendar::CalendarGateway;
use crate::calendar::dto::{Attendee, EventPayload, EventTime, ExtendedProperties};
use crate::db::repository;
use crate::error::AppError;
use crate::models::{Course, CourseFlags, Lesson, LessonAssignment};
use crate::services::gate::ResyncGate;

/// Per-item progress callback: (processed, total). Best-effort UI feedback.
pub type ProgressFn = dyn Fn(usize, usize) + Send + Sync;

#[derive(Debug, Default, Serialize)]
pub struct SyncStats {
    pub synced: usize,
    pub skipped: usize,
    pub failed: usize,
}

/// Pushes lessons flagged `calendar_outdated` to the external calendar.
/// Same gate contract as the board reconciler: concurrent triggers coalesce
/// into one extra pass.
pub struct CalendarSync {
    db: SqlitePool,
    calendar: Arc<dyn CalendarGateway>,
    gate: ResyncGate,
}

impl CalendarSync {
    pub fn new(db: SqlitePool, calendar: Arc<dyn CalendarGateway>) -> Self {
        Self {
            db,
            calendar,
            gate: ResyncGate::new(),
        }
    }

    pub fn trigger(self: &Arc<Self>) {
        let this = Arc::clone(self);
        tokio::spawn(async move {
            if let Err(e) = this.sync(None).await {
                error!("calendar sync failed: {}", e);
            }
        });
    }

    /// Runs a sync, or coalesces into the one already running (returning
    /// empty stats in that case). The stats describe the final pass.
    pub async fn sync(&self, progress: Option<&ProgressFn>) -> Result<SyncStats, AppError> {
        if !self.gate.try_begin() {
            debug!("calendar sync already running, rerun requested");
            return Ok(SyncStats::default());
        }
        loop {
            let result = self.run_once(progress).await;
            if let Err(e) = &result {
                warn!("calendar pass failed: {}", e);
            }
            if !self.gate.finish() {
                return result;
            }
        }
    }

    async fn run_once(&self, progress: Option<&ProgressFn>) -> Result<SyncStats, AppError> {
        let lessons = repository::fetch_outdated_lessons(&self.db).await?;
        let total = lessons.len();
        let mut stats = SyncStats::default();

        for (index, lesson) in lessons.into_iter().enumerate() {
            // A trigger during the pass means this pass is working from a
            // stale snapshot; stop and let the rerun pick up what is left.
            if self.gate.rerun_requested() {
                info!("calendar sync restart requested, aborting pass");
                break;
            }

            let Some(course) = repository::find_course(&self.db, lesson.course_id).await? else {
                warn!("lesson {} references missing course {}", lesson.id, lesson.course_id);
                stats.failed += 1;
                continue;
            };

            if CourseFlags::from_bits(course.flags).no_calendar {
                repository::set_lesson_outdated(&self.db, lesson.id, false).await?;
                stats.skipped += 1;
                if let Some(report) = progress {
                    report(index + 1, total);
                }
                continue;
            }

            let assignments = repository::fetch_lesson_assignments(&self.db, lesson.id).await?;
            let payload = build_event_payload(&lesson, &course, &assignments);

            match self
                .calendar
                .upsert_event(lesson.calendar_event_id.as_deref(), &payload)
                .await
            {
                Ok(event_id) => {
                    repository::set_lesson_event(&self.db, lesson.id, Some(&event_id), false)
                        .await?;
                    stats.synced += 1;
                }
                Err(e) => {
                    // Leave the dirty bit set; the next pass retries.
                    warn!("failed to sync lesson {} to calendar: {}", lesson.id, e);
                    stats.failed += 1;
                }
            }

            if let Some(report) = progress {
                report(index + 1, total);
            }
        }

        Ok(stats)
    }

    /// Removes the external event for a lesson, located by the shared
    /// `lessonId` property so a stale or missing local event id is harmless.
    /// The lesson is re-marked dirty: if it still exists, the next sync
    /// recreates its event (an instructor change funnels through here).
    pub async fn delete_event(&self, lesson_id: i64) -> Result<(), AppError> {
        if let Some(event_id) = self.calendar.find_event_by_lesson_id(lesson_id).await? {
            if let Err(e) = self.calendar.delete_event(&event_id).await {
                warn!("failed to delete calendar event for lesson {}: {}", lesson_id, e);
            }
        }
        // No-op if the lesson row is already gone.
        repository::set_lesson_event(&self.db, lesson_id, None, true).await?;
        Ok(())
    }

    pub fn trigger_delete(self: &Arc<Self>, lesson_id: i64) {
        let this = Arc::clone(self);
        tokio::spawn(async move {
            if let Err(e) = this.delete_event(lesson_id).await {
                error!("calendar event delete failed for lesson {}: {}", lesson_id, e);
            }
        });
    }
}

fn build_event_payload(
    lesson: &Lesson,
    course: &Course,
    assignments: &[LessonAssignment],
) -> EventPayload {
    let instructor_names = assignments
        .iter()
        .map(|a| a.name.as_str())
        .collect::<Vec<_>>()
        .join(" + ");
    let attendees = assignments
        .iter()
        .map(|a| Attendee {
            email: a.email.clone(),
        })
        .collect();
    let end = lesson.date + chrono::Duration::minutes(course.duration_minutes);

    let mut shared = HashMap::new();
    shared.insert("courseId".to_string(), course.id.to_string());
    shared.insert("lessonId".to_string(), lesson.id.to_string());
    shared.insert("module".to_string(), course.module.to_string());
    shared.insert("instructors".to_string(), instructor_names.clone());

    EventPayload {
        summary: format!(
            "M{} #{} {}, {}",
            course.module, course.id, instructor_names, lesson.abbrev
        ),
        description: lesson.description.clone(),
        start: EventTime {
            date_time: lesson.date.to_rfc3339(),
        },
        end: EventTime {
            date_time: end.to_rfc3339(),
        },
        attendees,
        extended_properties: ExtendedProperties { shared },
    }
}
