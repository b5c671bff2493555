use std::sync::Arc;

use sqlx::SqlitePool;
use tracing::{debug, error, warn};

use crate::chat::{ChatGateway, format_timestamp};
use crate::db::repository;
use crate::error::AppError;
use crate::services::gate::ResyncGate;

/// Upper bounds for one board message; lines are greedily packed until the
/// next one would cross either limit.
const MAX_BOARD_CONTENT: usize = 4096;
const MAX_BOARD_ITEMS: usize = 75;

/// Maintains the pinned "open sub requests" board in the configured channel.
///
/// Every run regenerates the whole board from the open requests in the
/// store: stale messages are deleted best-effort, fresh ones posted and
/// pinned. The board is a projection, never a source of truth, so a crash
/// mid-run heals on the next run.
pub struct BoardReconciler {
    db: SqlitePool,
    chat: Arc<dyn ChatGateway>,
    gate: ResyncGate,
}

impl BoardReconciler {
    pub fn new(db: SqlitePool, chat: Arc<dyn ChatGateway>) -> Self {
        Self {
            db,
            chat,
            gate: ResyncGate::new(),
        }
    }

    /// Fire-and-forget refresh; failures are logged, never surfaced to the
    /// caller that made the request stale.
    pub fn trigger(self: &Arc<Self>) {
        let this = Arc::clone(self);
        tokio::spawn(async move {
            if let Err(e) = this.reconcile().await {
                error!("board reconciliation failed: {}", e);
            }
        });
    }

    /// Runs a reconciliation, or coalesces into the one already running.
    pub async fn reconcile(&self) -> Result<(), AppError> {
        if !self.gate.try_begin() {
            debug!("board reconciliation already running, rerun requested");
            return Ok(());
        }
        loop {
            let result = self.run_once().await;
            if let Err(e) = &result {
                warn!("board pass failed: {}", e);
            }
            if !self.gate.finish() {
                return result;
            }
        }
    }

    async fn run_once(&self) -> Result<(), AppError> {
        // No channel configured means no board is maintained. Not an error.
        let Some(channel_id) =
            repository::get_config(&self.db, repository::CONFIG_SUB_CHANNEL).await?
        else {
            return Ok(());
        };

        let stale = repository::fetch_board_messages(&self.db).await?;
        if !stale.is_empty() {
            match self.chat.delete_messages(&channel_id, &stale).await {
                Ok(deleted) => {
                    if deleted.len() < stale.len() {
                        warn!(
                            "only deleted {} of {} stale board messages",
                            deleted.len(),
                            stale.len()
                        );
                    }
                }
                Err(e) => warn!("failed to delete stale board messages: {}", e),
            }
            // Drop the whole stored set either way; anything left behind in
            // the channel is unreachable garbage, not state.
            repository::remove_board_messages(&self.db, &stale).await?;
        }

        let requests = repository::fetch_open_sub_requests(&self.db).await?;
        if requests.is_empty() {
            let message_id = self
                .chat
                .send_message(&channel_id, "There are currently no open sub requests.")
                .await?;
            repository::add_board_message(&self.db, &message_id).await?;
            return Ok(());
        }

        let mut lines = Vec::new();
        for request in &requests {
            let Some(lesson) = repository::find_lesson(&self.db, request.lesson_id).await? else {
                continue;
            };
            let Some(course) = repository::find_course(&self.db, lesson.course_id).await? else {
                continue;
            };
            let Some(instructor) =
                repository::find_instructor(&self.db, request.instructor_id).await?
            else {
                continue;
            };

            let reason = request
                .reason
                .as_deref()
                .map(|r| format!(": {}", r))
                .unwrap_or_default();
            lines.push(format!(
                "{}, Live {}, M{}{} (sub for <@{}>{})",
                format_timestamp(lesson.date),
                lesson.course_id,
                course.module,
                lesson.abbrev,
                instructor.discord_id,
                reason,
            ));
        }

        let mut content = String::new();
        let mut items = 0usize;
        for line in lines {
            if items >= MAX_BOARD_ITEMS || content.len() + line.len() > MAX_BOARD_CONTENT {
                self.flush_message(&channel_id, &content).await?;
                content.clear();
                items = 0;
            }
            content.push_str(&line);
            content.push_str("\n\n");
            items += 1;
        }
        if !content.is_empty() {
            self.flush_message(&channel_id, &content).await?;
        }

        Ok(())
    }

    async fn flush_message(&self, channel_id: &str, content: &str) -> Result<(), AppError> {
        // A single oversized line can trip the flush condition with nothing
        // buffered yet; the chat API rejects empty messages.
        let content = content.trim_end();
        if content.is_empty() {
            return Ok(());
        }
        let message_id = self.chat.send_message(channel_id, content).await?;
        if let Err(e) = self.chat.pin_message(channel_id, &message_id).await {
            warn!("failed to pin board message {}: {}", message_id, e);
        }
        repository::add_board_message(&self.db, &message_id).await?;
        Ok(())
    }
}
