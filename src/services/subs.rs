use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use sqlx::SqlitePool;
use tracing::warn;

use crate::chat::{ChatGateway, format_timestamp};
use crate::db::repository;
use crate::error::AppError;
use crate::models::{AssignmentFlags, SubRequest};
use crate::services::board::BoardReconciler;

/// Lessons may carry at most two instructors at a time.
const MAX_LESSON_INSTRUCTORS: usize = 2;

/// Result of trying to fill a sub request. These are user outcomes, not
/// system errors; callers turn them into replies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ClaimOutcome {
    Filled,
    AlreadyFilled,
    NotFound,
    SelfClaim,
}

/// Owns the sub request lifecycle: creation, claiming, admin fills, and the
/// time-driven escalation pings.
pub struct SubService {
    db: SqlitePool,
    chat: Arc<dyn ChatGateway>,
    board: Arc<BoardReconciler>,
}

impl SubService {
    pub fn new(db: SqlitePool, chat: Arc<dyn ChatGateway>, board: Arc<BoardReconciler>) -> Self {
        Self { db, chat, board }
    }

    /// Opens a request for a lesson. Returns the new request id and whether
    /// the instructor already had an open request for the same lesson;
    /// duplicates are allowed, callers decide whether to warn about them.
    pub async fn request_sub(
        &self,
        lesson_id: i64,
        instructor_id: i64,
        reason: Option<String>,
    ) -> Result<(i64, bool), AppError> {
        if repository::find_lesson(&self.db, lesson_id).await?.is_none() {
            return Err(AppError::NotFound);
        }
        if repository::find_instructor(&self.db, instructor_id)
            .await?
            .is_none()
        {
            return Err(AppError::BadRequest(
                "Not a registered instructor".to_string(),
            ));
        }

        let duplicate =
            repository::has_open_sub_request(&self.db, lesson_id, instructor_id).await?;
        let id = repository::insert_sub_request(
            &self.db,
            lesson_id,
            instructor_id,
            reason.as_deref(),
            Utc::now(),
        )
        .await?;

        self.board.trigger();
        Ok((id, duplicate))
    }

    /// Claim by another instructor. Exactly one of several racing claims
    /// wins; the rest see `AlreadyFilled`.
    pub async fn claim_sub(
        &self,
        request_id: i64,
        instructor_id: i64,
        free_will: bool,
    ) -> Result<ClaimOutcome, AppError> {
        let Some(request) = repository::find_sub_request(&self.db, request_id).await? else {
            return Ok(ClaimOutcome::NotFound);
        };
        if repository::find_instructor(&self.db, instructor_id)
            .await?
            .is_none()
        {
            return Err(AppError::BadRequest(
                "Not a registered instructor".to_string(),
            ));
        }
        if request.instructor_id == instructor_id {
            return Ok(ClaimOutcome::SelfClaim);
        }
        self.fill(request, instructor_id, free_will).await
    }

    /// Administrative fill: the admin designates the filler, so the
    /// self-claim restriction does not apply.
    pub async fn admin_fill(
        &self,
        request_id: i64,
        instructor_id: i64,
        free_will: bool,
    ) -> Result<ClaimOutcome, AppError> {
        let Some(request) = repository::find_sub_request(&self.db, request_id).await? else {
            return Ok(ClaimOutcome::NotFound);
        };
        if repository::find_instructor(&self.db, instructor_id)
            .await?
            .is_none()
        {
            return Err(AppError::BadRequest(
                "Not a registered instructor".to_string(),
            ));
        }
        self.fill(request, instructor_id, free_will).await
    }

    async fn fill(
        &self,
        request: SubRequest,
        instructor_id: i64,
        free_will: bool,
    ) -> Result<ClaimOutcome, AppError> {
        // Atomic decision point: the conditional close is a single statement,
        // with no await between reading and writing the open flag. The loser
        // of a race sees zero affected rows here.
        let closed =
            repository::close_sub_request(&self.db, request.id, instructor_id, Utc::now()).await?;
        if !closed {
            return Ok(ClaimOutcome::AlreadyFilled);
        }

        repository::remove_lesson_instructor(&self.db, request.lesson_id, request.instructor_id)
            .await?;
        repository::add_lesson_instructor(
            &self.db,
            request.lesson_id,
            instructor_id,
            AssignmentFlags {
                is_sub: true,
                is_free_will: free_will,
            },
        )
        .await?;
        repository::set_lesson_outdated(&self.db, request.lesson_id, true).await?;

        self.board.trigger();
        let db = self.db.clone();
        let chat = Arc::clone(&self.chat);
        let request_id = request.id;
        tokio::spawn(async move {
            if let Err(e) = announce_filled(&db, chat.as_ref(), request_id, free_will).await {
                warn!("failed to announce filled sub request {}: {}", request_id, e);
            }
        });

        Ok(ClaimOutcome::Filled)
    }

    /// Adds an instructor to a lesson, holding the two-instructor cap.
    pub async fn assign_instructor(
        &self,
        lesson_id: i64,
        instructor_id: i64,
        flags: AssignmentFlags,
    ) -> Result<(), AppError> {
        if repository::find_lesson(&self.db, lesson_id).await?.is_none() {
            return Err(AppError::NotFound);
        }
        let assignments = repository::fetch_lesson_assignments(&self.db, lesson_id).await?;
        if assignments
            .iter()
            .any(|a| a.instructor_id == instructor_id)
        {
            return Err(AppError::Conflict(
                "Instructor is already assigned to this lesson".to_string(),
            ));
        }
        if assignments.len() >= MAX_LESSON_INSTRUCTORS {
            return Err(AppError::Conflict(
                "This lesson already has two instructors".to_string(),
            ));
        }

        repository::add_lesson_instructor(&self.db, lesson_id, instructor_id, flags).await?;
        repository::set_lesson_outdated(&self.db, lesson_id, true).await?;
        Ok(())
    }

    pub async fn unassign_instructor(
        &self,
        lesson_id: i64,
        instructor_id: i64,
    ) -> Result<(), AppError> {
        let removed =
            repository::remove_lesson_instructor(&self.db, lesson_id, instructor_id).await?;
        if !removed {
            return Err(AppError::NotFound);
        }
        repository::set_lesson_outdated(&self.db, lesson_id, true).await?;
        Ok(())
    }

    /// One escalation pass over every open request, driven by the interval
    /// scheduler. `now` is injected so thresholds are testable.
    ///
    /// Per request this sends at most one admin ping (inside 24h) and at
    /// most one all-staff ping (inside 1h) over its whole lifetime, ratcheted
    /// by `sent_notification`. Urgency dominates: a request first seen inside
    /// the final hour goes straight to the all-staff ping. Send failures are
    /// logged and the counter advances anyway, so a broken channel is tried
    /// at most once per threshold instead of every minute.
    pub async fn check_escalations(&self, now: DateTime<Utc>) -> Result<(), AppError> {
        let requests = repository::fetch_open_sub_requests(&self.db).await?;
        if requests.is_empty() {
            return Ok(());
        }

        let sub_channel =
            repository::get_config(&self.db, repository::CONFIG_SUB_CHANNEL).await?;
        let notify_channel =
            repository::get_config(&self.db, repository::CONFIG_SUB_NOTIFY_CHANNEL).await?;
        let admin_ping = match repository::get_config(&self.db, repository::CONFIG_ADMIN_ROLE)
            .await?
        {
            Some(role_id) => format!("<@&{}>", role_id),
            None => "@admins".to_string(),
        };
        let teaching_ping =
            match repository::get_config(&self.db, repository::CONFIG_TEACHING_ROLE).await? {
                Some(role_id) => format!("<@&{}>", role_id),
                None => "@everyone".to_string(),
            };

        for request in requests {
            let Some(lesson) = repository::find_lesson(&self.db, request.lesson_id).await? else {
                continue;
            };
            let Some(instructor) =
                repository::find_instructor(&self.db, request.instructor_id).await?
            else {
                continue;
            };

            let until_lesson = lesson.date - now;
            if until_lesson > Duration::hours(24) {
                continue;
            }

            if until_lesson < Duration::hours(1) {
                if request.sent_notification >= 2 {
                    continue;
                }
                if let Some(channel_id) = &sub_channel {
                    let content = format!(
                        "\u{203c}\u{fe0f} {} The sub request for #{} {} on {} by <@{}> is still open! Please help out if you can!",
                        teaching_ping,
                        lesson.course_id,
                        lesson.abbrev,
                        format_timestamp(lesson.date),
                        instructor.discord_id,
                    );
                    if let Err(e) = self.chat.send_message(channel_id, &content).await {
                        warn!("failed to escalate sub request {}: {}", request.id, e);
                    }
                }
                repository::raise_sent_notification(&self.db, request.id, 2).await?;
                continue;
            }

            if request.sent_notification >= 1 {
                continue;
            }
            if let Some(channel_id) = &notify_channel {
                let content = format!(
                    "\u{203c}\u{fe0f} {} The sub request for #{} {} on {} by <@{}> is still open! I will ping the teaching team 1 hour before the lesson, but it might be a good idea to start DMing people.",
                    admin_ping,
                    lesson.course_id,
                    lesson.abbrev,
                    format_timestamp(lesson.date),
                    instructor.discord_id,
                );
                if let Err(e) = self.chat.send_message(channel_id, &content).await {
                    warn!("failed to escalate sub request {}: {}", request.id, e);
                }
            }
            repository::raise_sent_notification(&self.db, request.id, 1).await?;
        }

        Ok(())
    }
}

/// Posts the strikethrough "request filled" line to the filled-sub channel.
/// A missing channel config quietly disables the announcement.
async fn announce_filled(
    db: &SqlitePool,
    chat: &dyn ChatGateway,
    request_id: i64,
    free_will: bool,
) -> Result<(), AppError> {
    let Some(channel_id) = repository::get_config(db, repository::CONFIG_FILLED_SUB_CHANNEL).await?
    else {
        return Ok(());
    };

    let Some(request) = repository::find_sub_request(db, request_id).await? else {
        return Ok(());
    };
    let Some(filled_by) = request.filled_by else {
        return Ok(());
    };
    let (Some(lesson), Some(instructor), Some(filler)) = (
        repository::find_lesson(db, request.lesson_id).await?,
        repository::find_instructor(db, request.instructor_id).await?,
        repository::find_instructor(db, filled_by).await?,
    ) else {
        return Ok(());
    };
    let Some(course) = repository::find_course(db, lesson.course_id).await? else {
        return Ok(());
    };

    let reason = request
        .reason
        .as_deref()
        .map(|r| format!(": {}", r))
        .unwrap_or_default();
    let star = if free_will { " \u{2605}" } else { "" };
    let content = format!(
        "~~{}, Live {}, M{}{} (sub for <@{}>{})~~ <@{}>{}",
        format_timestamp(lesson.date),
        lesson.course_id,
        course.module,
        lesson.abbrev,
        instructor.discord_id,
        reason,
        filler.discord_id,
        star,
    );

    chat.send_message(&channel_id, &content).await?;
    Ok(())
}
