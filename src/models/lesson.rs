use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Lesson {
    pub id: i64,
    pub course_id: i64,
    pub date: DateTime<Utc>,
    pub name: String,
    pub abbrev: String,
    pub description: String,
    pub calendar_event_id: Option<String>,
    /// Dirty bit: the external calendar event no longer matches this row.
    pub calendar_outdated: bool,
}

/// Named view over the lesson-instructor flags bitset.
/// Bit 0 = the instructor is a substitute, bit 1 = a free-will substitute.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct AssignmentFlags {
    pub is_sub: bool,
    pub is_free_will: bool,
}

impl AssignmentFlags {
    pub fn from_bits(bits: i64) -> Self {
        Self {
            is_sub: bits & 1 != 0,
            is_free_will: bits & 2 != 0,
        }
    }

    pub fn bits(self) -> i64 {
        (self.is_sub as i64) | ((self.is_free_will as i64) << 1)
    }
}

/// An instructor assignment joined with the instructor row.
#[derive(Debug, Clone, Serialize, FromRow)]
pub struct LessonAssignment {
    pub instructor_id: i64,
    pub discord_id: String,
    pub email: String,
    pub name: String,
    pub flags: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewLessonRequest {
    pub course_id: i64,
    pub date: DateTime<Utc>,
    pub name: String,
    pub abbrev: String,
    #[serde(default)]
    pub description: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpdateLessonRequest {
    pub date: Option<DateTime<Utc>>,
    pub name: Option<String>,
    pub abbrev: Option<String>,
    pub description: Option<String>,
}
