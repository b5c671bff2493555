use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// A sub request is closed exactly once and never deleted; closed rows keep
/// the audit trail (who filled, when).
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct SubRequest {
    pub id: i64,
    pub lesson_id: i64,
    pub instructor_id: i64,
    pub is_open: bool,
    pub opened_at: DateTime<Utc>,
    pub reason: Option<String>,
    /// Escalation ratchet: 0 = none, 1 = admin channel pinged,
    /// 2 = teaching channel pinged. Monotonically non-decreasing.
    pub sent_notification: i64,
    pub filled_by: Option<i64>,
    pub filled_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewSubRequest {
    pub lesson_id: i64,
    pub instructor_id: i64,
    pub reason: Option<String>,
}
