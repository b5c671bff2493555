#![allow(dead_code)]

use std::collections::{HashMap, HashSet};
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::SqlitePool;
use sqlx::sqlite::SqlitePoolOptions;
use tokio::sync::Semaphore;

use subdesk::calendar::CalendarGateway;
use subdesk::calendar::dto::EventPayload;
use subdesk::chat::ChatGateway;
use subdesk::db::repository;
use subdesk::error::AppError;
use subdesk::models::{
    Course, Instructor, Lesson, NewInstructorRequest, NewLessonRequest,
};

/// One connection so every statement hits the same in-memory database.
pub async fn setup_db() -> SqlitePool {
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .connect("sqlite::memory:")
        .await
        .expect("Failed to create database");
    sqlx::migrate!("./migrations")
        .run(&pool)
        .await
        .expect("Failed to run migrations");
    pool
}

pub async fn create_instructor(db: &SqlitePool, discord_id: &str, name: &str) -> Instructor {
    repository::insert_instructor(
        db,
        NewInstructorRequest {
            discord_id: discord_id.to_string(),
            email: format!("{}@example.org", name.to_lowercase()),
            name: name.to_string(),
        },
    )
    .await
    .expect("Failed to insert instructor")
}

pub async fn create_course(db: &SqlitePool, module: i64, flags: i64) -> Course {
    repository::insert_course(db, module, 90, flags)
        .await
        .expect("Failed to insert course")
}

pub async fn create_lesson(db: &SqlitePool, course_id: i64, date: DateTime<Utc>) -> Lesson {
    repository::insert_lesson(
        db,
        NewLessonRequest {
            course_id,
            date,
            name: "Test lesson".to_string(),
            abbrev: "L1".to_string(),
            description: String::new(),
        },
    )
    .await
    .expect("Failed to insert lesson")
}

#[derive(Debug, Clone)]
pub struct SentMessage {
    pub channel_id: String,
    pub content: String,
    pub id: String,
}

/// Chat gateway double that records every call. `fail_sends` makes sends
/// error; `send_gate` holds each send until a permit is released, so tests
/// can trap a reconciliation mid-run.
pub struct MockChat {
    pub sent: Mutex<Vec<SentMessage>>,
    pub deleted: Mutex<Vec<String>>,
    pub pinned: Mutex<Vec<String>>,
    pub fail_sends: AtomicBool,
    send_gate: Option<Arc<Semaphore>>,
    next_id: AtomicU64,
}

impl MockChat {
    pub fn new() -> Self {
        Self {
            sent: Mutex::new(Vec::new()),
            deleted: Mutex::new(Vec::new()),
            pinned: Mutex::new(Vec::new()),
            fail_sends: AtomicBool::new(false),
            send_gate: None,
            next_id: AtomicU64::new(1),
        }
    }

    pub fn with_send_gate(gate: Arc<Semaphore>) -> Self {
        Self {
            send_gate: Some(gate),
            ..Self::new()
        }
    }

    pub fn sends_to(&self, channel_id: &str) -> Vec<SentMessage> {
        self.sent
            .lock()
            .unwrap()
            .iter()
            .filter(|m| m.channel_id == channel_id)
            .cloned()
            .collect()
    }

    pub fn send_count(&self) -> usize {
        self.sent.lock().unwrap().len()
    }

    pub fn deleted_ids(&self) -> Vec<String> {
        self.deleted.lock().unwrap().clone()
    }
}

#[async_trait]
impl ChatGateway for MockChat {
    async fn send_message(&self, channel_id: &str, content: &str) -> Result<String, AppError> {
        if let Some(gate) = &self.send_gate {
            gate.acquire().await.expect("send gate closed").forget();
        }
        if self.fail_sends.load(Ordering::SeqCst) {
            return Err(AppError::Gateway("send failed".to_string()));
        }
        let id = format!("m{}", self.next_id.fetch_add(1, Ordering::SeqCst));
        self.sent.lock().unwrap().push(SentMessage {
            channel_id: channel_id.to_string(),
            content: content.to_string(),
            id: id.clone(),
        });
        Ok(id)
    }

    async fn delete_messages(
        &self,
        _channel_id: &str,
        message_ids: &[String],
    ) -> Result<Vec<String>, AppError> {
        self.deleted
            .lock()
            .unwrap()
            .extend(message_ids.iter().cloned());
        Ok(message_ids.to_vec())
    }

    async fn pin_message(&self, _channel_id: &str, message_id: &str) -> Result<(), AppError> {
        self.pinned.lock().unwrap().push(message_id.to_string());
        Ok(())
    }
}

#[derive(Debug, Clone)]
pub struct UpsertCall {
    pub event_id: Option<String>,
    pub lesson_id: i64,
    pub summary: String,
}

/// Calendar gateway double. Upserts failing for specific lessons simulate
/// transient external errors; `upsert_gate` traps a sync pass mid-loop.
pub struct MockCalendar {
    pub upserts: Mutex<Vec<UpsertCall>>,
    pub deleted: Mutex<Vec<String>>,
    pub events_by_lesson: Mutex<HashMap<i64, String>>,
    pub fail_lesson_ids: Mutex<HashSet<i64>>,
    upsert_gate: Option<Arc<Semaphore>>,
    next_id: AtomicU64,
}

impl MockCalendar {
    pub fn new() -> Self {
        Self {
            upserts: Mutex::new(Vec::new()),
            deleted: Mutex::new(Vec::new()),
            events_by_lesson: Mutex::new(HashMap::new()),
            fail_lesson_ids: Mutex::new(HashSet::new()),
            upsert_gate: None,
            next_id: AtomicU64::new(1),
        }
    }

    pub fn with_upsert_gate(gate: Arc<Semaphore>) -> Self {
        Self {
            upsert_gate: Some(gate),
            ..Self::new()
        }
    }

    pub fn fail_lesson(&self, lesson_id: i64) {
        self.fail_lesson_ids.lock().unwrap().insert(lesson_id);
    }

    pub fn upsert_count(&self) -> usize {
        self.upserts.lock().unwrap().len()
    }
}

fn payload_lesson_id(payload: &EventPayload) -> i64 {
    payload
        .extended_properties
        .shared
        .get("lessonId")
        .and_then(|v| v.parse().ok())
        .expect("payload missing lessonId shared property")
}

#[async_trait]
impl CalendarGateway for MockCalendar {
    async fn upsert_event(
        &self,
        event_id: Option<&str>,
        payload: &EventPayload,
    ) -> Result<String, AppError> {
        if let Some(gate) = &self.upsert_gate {
            gate.acquire().await.expect("upsert gate closed").forget();
        }
        let lesson_id = payload_lesson_id(payload);
        if self.fail_lesson_ids.lock().unwrap().contains(&lesson_id) {
            return Err(AppError::Gateway("rate limited".to_string()));
        }
        let id = match event_id {
            Some(id) => id.to_string(),
            None => format!("ev{}", self.next_id.fetch_add(1, Ordering::SeqCst)),
        };
        self.upserts.lock().unwrap().push(UpsertCall {
            event_id: event_id.map(str::to_string),
            lesson_id,
            summary: payload.summary.clone(),
        });
        self.events_by_lesson
            .lock()
            .unwrap()
            .insert(lesson_id, id.clone());
        Ok(id)
    }

    async fn delete_event(&self, event_id: &str) -> Result<(), AppError> {
        self.deleted.lock().unwrap().push(event_id.to_string());
        Ok(())
    }

    async fn find_event_by_lesson_id(&self, lesson_id: i64) -> Result<Option<String>, AppError> {
        Ok(self
            .events_by_lesson
            .lock()
            .unwrap()
            .get(&lesson_id)
            .cloned())
    }
}
