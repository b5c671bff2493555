use chrono::{DateTime, Utc};
use sqlx::SqlitePool;

use crate::models::{
    AssignmentFlags, Course, Instructor, Lesson, LessonAssignment, NewInstructorRequest,
    NewLessonRequest, SubRequest, UpdateInstructorRequest, UpdateLessonRequest,
};

pub const CONFIG_SUB_CHANNEL: &str = "sub_channel_id";
pub const CONFIG_SUB_NOTIFY_CHANNEL: &str = "sub_notify_channel_id";
pub const CONFIG_FILLED_SUB_CHANNEL: &str = "filled_sub_channel_id";
pub const CONFIG_ADMIN_ROLE: &str = "admin_role_id";
pub const CONFIG_TEACHING_ROLE: &str = "teaching_role_id";
pub const CONFIG_CALENDAR_CREDENTIALS: &str = "calendar_credentials";

// ---------------------------------------------------------------------------
// Instructors

pub async fn insert_instructor(
    db: &SqlitePool,
    req: NewInstructorRequest,
) -> Result<Instructor, sqlx::Error> {
    let result = sqlx::query(
        "INSERT INTO instructors (discord_id, email, name) VALUES (?, ?, ?)",
    )
    .bind(&req.discord_id)
    .bind(&req.email)
    .bind(&req.name)
    .execute(db)
    .await?;

    Ok(Instructor {
        id: result.last_insert_rowid(),
        discord_id: req.discord_id,
        email: req.email,
        name: req.name,
    })
}

pub async fn fetch_instructors(db: &SqlitePool) -> Result<Vec<Instructor>, sqlx::Error> {
    sqlx::query_as::<_, Instructor>(
        "SELECT id, discord_id, email, name FROM instructors ORDER BY name",
    )
    .fetch_all(db)
    .await
}

pub async fn find_instructor(
    db: &SqlitePool,
    id: i64,
) -> Result<Option<Instructor>, sqlx::Error> {
    sqlx::query_as::<_, Instructor>(
        "SELECT id, discord_id, email, name FROM instructors WHERE id = ?",
    )
    .bind(id)
    .fetch_optional(db)
    .await
}

pub async fn find_instructor_by_discord_id(
    db: &SqlitePool,
    discord_id: &str,
) -> Result<Option<Instructor>, sqlx::Error> {
    sqlx::query_as::<_, Instructor>(
        "SELECT id, discord_id, email, name FROM instructors WHERE discord_id = ?",
    )
    .bind(discord_id)
    .fetch_optional(db)
    .await
}

pub async fn update_instructor(
    db: &SqlitePool,
    id: i64,
    req: UpdateInstructorRequest,
) -> Result<Option<Instructor>, sqlx::Error> {
    let mut current = match find_instructor(db, id).await? {
        Some(i) => i,
        None => return Ok(None),
    };

    if let Some(email) = req.email {
        current.email = email;
    }
    if let Some(name) = req.name {
        current.name = name;
    }

    sqlx::query("UPDATE instructors SET email = ?, name = ? WHERE id = ?")
        .bind(&current.email)
        .bind(&current.name)
        .bind(id)
        .execute(db)
        .await?;

    Ok(Some(current))
}

// ---------------------------------------------------------------------------
// Courses

pub async fn insert_course(
    db: &SqlitePool,
    module: i64,
    duration_minutes: i64,
    flags: i64,
) -> Result<Course, sqlx::Error> {
    let result = sqlx::query(
        "INSERT INTO courses (module, duration_minutes, flags) VALUES (?, ?, ?)",
    )
    .bind(module)
    .bind(duration_minutes)
    .bind(flags)
    .execute(db)
    .await?;

    Ok(Course {
        id: result.last_insert_rowid(),
        module,
        duration_minutes,
        flags,
    })
}

pub async fn fetch_courses(db: &SqlitePool) -> Result<Vec<Course>, sqlx::Error> {
    sqlx::query_as::<_, Course>(
        "SELECT id, module, duration_minutes, flags FROM courses ORDER BY id",
    )
    .fetch_all(db)
    .await
}

pub async fn find_course(db: &SqlitePool, id: i64) -> Result<Option<Course>, sqlx::Error> {
    sqlx::query_as::<_, Course>(
        "SELECT id, module, duration_minutes, flags FROM courses WHERE id = ?",
    )
    .bind(id)
    .fetch_optional(db)
    .await
}

pub async fn add_course_instructor(
    db: &SqlitePool,
    course_id: i64,
    instructor_id: i64,
) -> Result<(), sqlx::Error> {
    sqlx::query(
        "INSERT OR IGNORE INTO course_instructors (course_id, instructor_id) VALUES (?, ?)",
    )
    .bind(course_id)
    .bind(instructor_id)
    .execute(db)
    .await?;
    Ok(())
}

pub async fn fetch_course_instructors(
    db: &SqlitePool,
    course_id: i64,
) -> Result<Vec<Instructor>, sqlx::Error> {
    sqlx::query_as::<_, Instructor>(
        r#"
        SELECT i.id, i.discord_id, i.email, i.name
        FROM course_instructors ci
        JOIN instructors i ON i.id = ci.instructor_id
        WHERE ci.course_id = ?
        ORDER BY i.id
        "#,
    )
    .bind(course_id)
    .fetch_all(db)
    .await
}

// ---------------------------------------------------------------------------
// Lessons

pub async fn insert_lesson(
    db: &SqlitePool,
    req: NewLessonRequest,
) -> Result<Lesson, sqlx::Error> {
    let result = sqlx::query(
        r#"
        INSERT INTO lessons (course_id, date, name, abbrev, description, calendar_event_id, calendar_outdated)
        VALUES (?, ?, ?, ?, ?, NULL, 1)
        "#,
    )
    .bind(req.course_id)
    .bind(req.date)
    .bind(&req.name)
    .bind(&req.abbrev)
    .bind(&req.description)
    .execute(db)
    .await?;

    Ok(Lesson {
        id: result.last_insert_rowid(),
        course_id: req.course_id,
        date: req.date,
        name: req.name,
        abbrev: req.abbrev,
        description: req.description,
        calendar_event_id: None,
        calendar_outdated: true,
    })
}

pub async fn fetch_lessons(db: &SqlitePool) -> Result<Vec<Lesson>, sqlx::Error> {
    sqlx::query_as::<_, Lesson>(
        r#"
        SELECT id, course_id, date, name, abbrev, description, calendar_event_id, calendar_outdated
        FROM lessons
        ORDER BY date
        "#,
    )
    .fetch_all(db)
    .await
}

pub async fn find_lesson(db: &SqlitePool, id: i64) -> Result<Option<Lesson>, sqlx::Error> {
    sqlx::query_as::<_, Lesson>(
        r#"
        SELECT id, course_id, date, name, abbrev, description, calendar_event_id, calendar_outdated
        FROM lessons
        WHERE id = ?
        "#,
    )
    .bind(id)
    .fetch_optional(db)
    .await
}

/// Any edit to the scheduled date or descriptive fields makes the external
/// calendar event stale, so the dirty bit is set unconditionally.
pub async fn update_lesson(
    db: &SqlitePool,
    id: i64,
    req: UpdateLessonRequest,
) -> Result<Option<Lesson>, sqlx::Error> {
    let mut current = match find_lesson(db, id).await? {
        Some(l) => l,
        None => return Ok(None),
    };

    if let Some(date) = req.date {
        current.date = date;
    }
    if let Some(name) = req.name {
        current.name = name;
    }
    if let Some(abbrev) = req.abbrev {
        current.abbrev = abbrev;
    }
    if let Some(description) = req.description {
        current.description = description;
    }
    current.calendar_outdated = true;

    sqlx::query(
        r#"
        UPDATE lessons
        SET date = ?, name = ?, abbrev = ?, description = ?, calendar_outdated = 1
        WHERE id = ?
        "#,
    )
    .bind(current.date)
    .bind(&current.name)
    .bind(&current.abbrev)
    .bind(&current.description)
    .bind(id)
    .execute(db)
    .await?;

    Ok(Some(current))
}

/// Removes the lesson. Assignments go with it (FK cascade); open requests
/// pointing at the lesson are closed so they drop off the board.
pub async fn delete_lesson(db: &SqlitePool, id: i64) -> Result<bool, sqlx::Error> {
    sqlx::query("UPDATE sub_requests SET is_open = 0 WHERE lesson_id = ? AND is_open = 1")
        .bind(id)
        .execute(db)
        .await?;

    let result = sqlx::query("DELETE FROM lessons WHERE id = ?")
        .bind(id)
        .execute(db)
        .await?;

    Ok(result.rows_affected() > 0)
}

pub async fn fetch_outdated_lessons(db: &SqlitePool) -> Result<Vec<Lesson>, sqlx::Error> {
    sqlx::query_as::<_, Lesson>(
        r#"
        SELECT id, course_id, date, name, abbrev, description, calendar_event_id, calendar_outdated
        FROM lessons
        WHERE calendar_outdated = 1
        ORDER BY date
        "#,
    )
    .fetch_all(db)
    .await
}

pub async fn set_lesson_outdated(
    db: &SqlitePool,
    id: i64,
    outdated: bool,
) -> Result<(), sqlx::Error> {
    sqlx::query("UPDATE lessons SET calendar_outdated = ? WHERE id = ?")
        .bind(outdated)
        .bind(id)
        .execute(db)
        .await?;
    Ok(())
}

pub async fn set_lesson_event(
    db: &SqlitePool,
    id: i64,
    event_id: Option<&str>,
    outdated: bool,
) -> Result<(), sqlx::Error> {
    sqlx::query("UPDATE lessons SET calendar_event_id = ?, calendar_outdated = ? WHERE id = ?")
        .bind(event_id)
        .bind(outdated)
        .bind(id)
        .execute(db)
        .await?;
    Ok(())
}

// ---------------------------------------------------------------------------
// Lesson instructors

pub async fn fetch_lesson_assignments(
    db: &SqlitePool,
    lesson_id: i64,
) -> Result<Vec<LessonAssignment>, sqlx::Error> {
    sqlx::query_as::<_, LessonAssignment>(
        r#"
        SELECT li.instructor_id, i.discord_id, i.email, i.name, li.flags
        FROM lesson_instructors li
        JOIN instructors i ON i.id = li.instructor_id
        WHERE li.lesson_id = ?
        ORDER BY li.instructor_id
        "#,
    )
    .bind(lesson_id)
    .fetch_all(db)
    .await
}

pub async fn add_lesson_instructor(
    db: &SqlitePool,
    lesson_id: i64,
    instructor_id: i64,
    flags: AssignmentFlags,
) -> Result<(), sqlx::Error> {
    sqlx::query(
        "INSERT INTO lesson_instructors (lesson_id, instructor_id, flags) VALUES (?, ?, ?)",
    )
    .bind(lesson_id)
    .bind(instructor_id)
    .bind(flags.bits())
    .execute(db)
    .await?;
    Ok(())
}

pub async fn remove_lesson_instructor(
    db: &SqlitePool,
    lesson_id: i64,
    instructor_id: i64,
) -> Result<bool, sqlx::Error> {
    let result = sqlx::query(
        "DELETE FROM lesson_instructors WHERE lesson_id = ? AND instructor_id = ?",
    )
    .bind(lesson_id)
    .bind(instructor_id)
    .execute(db)
    .await?;
    Ok(result.rows_affected() > 0)
}

// ---------------------------------------------------------------------------
// Sub requests

pub async fn insert_sub_request(
    db: &SqlitePool,
    lesson_id: i64,
    instructor_id: i64,
    reason: Option<&str>,
    opened_at: DateTime<Utc>,
) -> Result<i64, sqlx::Error> {
    let result = sqlx::query(
        r#"
        INSERT INTO sub_requests (lesson_id, instructor_id, is_open, opened_at, reason, sent_notification)
        VALUES (?, ?, 1, ?, ?, 0)
        "#,
    )
    .bind(lesson_id)
    .bind(instructor_id)
    .bind(opened_at)
    .bind(reason)
    .execute(db)
    .await?;

    Ok(result.last_insert_rowid())
}

pub async fn find_sub_request(
    db: &SqlitePool,
    id: i64,
) -> Result<Option<SubRequest>, sqlx::Error> {
    sqlx::query_as::<_, SubRequest>(
        r#"
        SELECT id, lesson_id, instructor_id, is_open, opened_at, reason,
               sent_notification, filled_by, filled_at
        FROM sub_requests
        WHERE id = ?
        "#,
    )
    .bind(id)
    .fetch_optional(db)
    .await
}

pub async fn fetch_open_sub_requests(db: &SqlitePool) -> Result<Vec<SubRequest>, sqlx::Error> {
    sqlx::query_as::<_, SubRequest>(
        r#"
        SELECT id, lesson_id, instructor_id, is_open, opened_at, reason,
               sent_notification, filled_by, filled_at
        FROM sub_requests
        WHERE is_open = 1
        ORDER BY opened_at
        "#,
    )
    .fetch_all(db)
    .await
}

pub async fn fetch_sub_requests(db: &SqlitePool) -> Result<Vec<SubRequest>, sqlx::Error> {
    sqlx::query_as::<_, SubRequest>(
        r#"
        SELECT id, lesson_id, instructor_id, is_open, opened_at, reason,
               sent_notification, filled_by, filled_at
        FROM sub_requests
        ORDER BY opened_at
        "#,
    )
    .fetch_all(db)
    .await
}

pub async fn has_open_sub_request(
    db: &SqlitePool,
    lesson_id: i64,
    instructor_id: i64,
) -> Result<bool, sqlx::Error> {
    let row: Option<(i64,)> = sqlx::query_as(
        "SELECT id FROM sub_requests WHERE lesson_id = ? AND instructor_id = ? AND is_open = 1 LIMIT 1",
    )
    .bind(lesson_id)
    .bind(instructor_id)
    .fetch_optional(db)
    .await?;
    Ok(row.is_some())
}

/// Conditional close. The `is_open = 1` guard is the serialization point for
/// racing claims: whichever statement lands first wins, the other sees zero
/// affected rows and must report the request as already filled.
pub async fn close_sub_request(
    db: &SqlitePool,
    id: i64,
    filled_by: i64,
    filled_at: DateTime<Utc>,
) -> Result<bool, sqlx::Error> {
    let result = sqlx::query(
        r#"
        UPDATE sub_requests
        SET is_open = 0, filled_by = ?, filled_at = ?
        WHERE id = ? AND is_open = 1
        "#,
    )
    .bind(filled_by)
    .bind(filled_at)
    .bind(id)
    .execute(db)
    .await?;

    Ok(result.rows_affected() > 0)
}

/// The `<` guard keeps the escalation counter monotone even if two checks
/// interleave around the same threshold.
pub async fn raise_sent_notification(
    db: &SqlitePool,
    id: i64,
    level: i64,
) -> Result<(), sqlx::Error> {
    sqlx::query(
        "UPDATE sub_requests SET sent_notification = ? WHERE id = ? AND sent_notification < ?",
    )
    .bind(level)
    .bind(id)
    .bind(level)
    .execute(db)
    .await?;
    Ok(())
}

// ---------------------------------------------------------------------------
// Board messages

pub async fn fetch_board_messages(db: &SqlitePool) -> Result<Vec<String>, sqlx::Error> {
    let rows: Vec<(String,)> =
        sqlx::query_as("SELECT message_id FROM board_messages ORDER BY message_id")
            .fetch_all(db)
            .await?;
    Ok(rows.into_iter().map(|(id,)| id).collect())
}

pub async fn add_board_message(db: &SqlitePool, message_id: &str) -> Result<(), sqlx::Error> {
    sqlx::query("INSERT OR IGNORE INTO board_messages (message_id) VALUES (?)")
        .bind(message_id)
        .execute(db)
        .await?;
    Ok(())
}

pub async fn remove_board_messages(
    db: &SqlitePool,
    message_ids: &[String],
) -> Result<(), sqlx::Error> {
    for id in message_ids {
        sqlx::query("DELETE FROM board_messages WHERE message_id = ?")
            .bind(id)
            .execute(db)
            .await?;
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Config

pub async fn get_config(db: &SqlitePool, key: &str) -> Result<Option<String>, sqlx::Error> {
    let row: Option<(String,)> = sqlx::query_as("SELECT value FROM config WHERE key = ?")
        .bind(key)
        .fetch_optional(db)
        .await?;
    Ok(row.map(|(v,)| v))
}

pub async fn set_config(db: &SqlitePool, key: &str, value: &str) -> Result<(), sqlx::Error> {
    sqlx::query(
        "INSERT INTO config (key, value) VALUES (?, ?) ON CONFLICT(key) DO UPDATE SET value = excluded.value",
    )
    .bind(key)
    .bind(value)
    .execute(db)
    .await?;
    Ok(())
}
