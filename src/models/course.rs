use serde::{Deserialize, Serialize};
use sqlx::FromRow;

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Course {
    pub id: i64,
    pub module: i64,
    /// Default lesson length in minutes, used for calendar event end times.
    pub duration_minutes: i64,
    pub flags: i64,
}

/// Named view over the course flags bitset. Bit 0 means the course is
/// excluded from calendar sync.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CourseFlags {
    pub no_calendar: bool,
}

impl CourseFlags {
    pub fn from_bits(bits: i64) -> Self {
        Self {
            no_calendar: bits & 1 != 0,
        }
    }

    pub fn bits(self) -> i64 {
        if self.no_calendar { 1 } else { 0 }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewCourseRequest {
    pub module: i64,
    pub duration_minutes: i64,
    #[serde(default)]
    pub no_calendar: bool,
    /// Default staffing for lessons created under this course.
    #[serde(default)]
    pub instructor_ids: Vec<i64>,
}
