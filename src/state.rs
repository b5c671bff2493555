use std::sync::Arc;

use sqlx::SqlitePool;

use crate::services::{BoardReconciler, CalendarSync, SubService};

#[derive(Clone)]
pub struct AppState {
    pub db: SqlitePool,
    pub subs: Arc<SubService>,
    pub board: Arc<BoardReconciler>,
    pub calendar_sync: Arc<CalendarSync>,
}
