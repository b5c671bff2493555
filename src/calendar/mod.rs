pub mod dto;

use std::env;

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;

use crate::error::AppError;
use dto::{EventListResponse, EventPayload, EventResource};

#[derive(Clone, Debug)]
pub struct CalendarConfig {
    pub calendar_id: String,
    pub access_token: String,
}

/// The credentials blob is stored opaquely in the config table by an
/// out-of-band authorization step; only the access token is read here.
#[derive(Debug, Deserialize)]
struct CredentialsBlob {
    access_token: String,
}

impl CalendarConfig {
    pub fn from_parts(credentials_json: &str) -> Result<Self, AppError> {
        let calendar_id =
            env::var("GOOGLE_CALENDAR_ID").unwrap_or_else(|_| "primary".to_string());
        let blob: CredentialsBlob = serde_json::from_str(credentials_json).map_err(|e| {
            AppError::BadRequest(format!("Invalid calendar credentials blob: {}", e))
        })?;
        Ok(Self {
            calendar_id,
            access_token: blob.access_token,
        })
    }
}

#[async_trait]
pub trait CalendarGateway: Send + Sync {
    /// Updates the event when an id is given, inserts otherwise. Returns the
    /// external event id either way.
    async fn upsert_event(
        &self,
        event_id: Option<&str>,
        payload: &EventPayload,
    ) -> Result<String, AppError>;

    async fn delete_event(&self, event_id: &str) -> Result<(), AppError>;

    /// Looks an event up by the shared `lessonId` property rather than the
    /// stored id, tolerating a missing or stale local reference.
    async fn find_event_by_lesson_id(&self, lesson_id: i64) -> Result<Option<String>, AppError>;
}

pub struct GoogleCalendarClient {
    client: Client,
    config: CalendarConfig,
}

impl GoogleCalendarClient {
    pub fn new(config: CalendarConfig) -> Result<Self, AppError> {
        let client = Client::builder()
            .build()
            .map_err(|e| AppError::Gateway(format!("Failed to build http client: {}", e)))?;
        Ok(Self { client, config })
    }

    fn events_url(&self) -> String {
        format!(
            "https://www.googleapis.com/calendar/v3/calendars/{}/events",
            self.config.calendar_id
        )
    }
}

#[async_trait]
impl CalendarGateway for GoogleCalendarClient {
    async fn upsert_event(
        &self,
        event_id: Option<&str>,
        payload: &EventPayload,
    ) -> Result<String, AppError> {
        let request = match event_id {
            Some(id) => self.client.put(format!("{}/{}", self.events_url(), id)),
            None => self.client.post(self.events_url()),
        };

        let response = request
            .bearer_auth(&self.config.access_token)
            .json(payload)
            .send()
            .await
            .map_err(|e| AppError::Gateway(format!("Calendar request failed: {}", e)))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(AppError::Gateway(format!(
                "Calendar API error {}: {}",
                status, body
            )));
        }

        let event: EventResource = response
            .json()
            .await
            .map_err(|e| AppError::Gateway(format!("Failed to parse calendar response: {}", e)))?;
        Ok(event.id)
    }

    async fn delete_event(&self, event_id: &str) -> Result<(), AppError> {
        let response = self
            .client
            .delete(format!("{}/{}", self.events_url(), event_id))
            .bearer_auth(&self.config.access_token)
            .send()
            .await
            .map_err(|e| AppError::Gateway(format!("Calendar delete failed: {}", e)))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(AppError::Gateway(format!(
                "Calendar API error {}: {}",
                status, body
            )));
        }

        Ok(())
    }

    async fn find_event_by_lesson_id(&self, lesson_id: i64) -> Result<Option<String>, AppError> {
        // lessonId is an integer, so the property filter needs no escaping
        // beyond the '=' inside the value.
        let url = format!(
            "{}?sharedExtendedProperty=lessonId%3D{}&maxResults=1&singleEvents=true",
            self.events_url(),
            lesson_id
        );
        let response = self
            .client
            .get(url)
            .bearer_auth(&self.config.access_token)
            .send()
            .await
            .map_err(|e| AppError::Gateway(format!("Calendar list failed: {}", e)))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(AppError::Gateway(format!(
                "Calendar API error {}: {}",
                status, body
            )));
        }

        let list: EventListResponse = response
            .json()
            .await
            .map_err(|e| AppError::Gateway(format!("Failed to parse calendar response: {}", e)))?;
        Ok(list.items.into_iter().next().map(|e| e.id))
    }
}

/// Used until calendar credentials are configured; sync passes complete
/// without external calls.
pub struct NoopCalendarGateway;

#[async_trait]
impl CalendarGateway for NoopCalendarGateway {
    async fn upsert_event(
        &self,
        event_id: Option<&str>,
        _payload: &EventPayload,
    ) -> Result<String, AppError> {
        Ok(event_id.unwrap_or("0").to_string())
    }

    async fn delete_event(&self, _event_id: &str) -> Result<(), AppError> {
        Ok(())
    }

    async fn find_event_by_lesson_id(&self, _lesson_id: i64) -> Result<Option<String>, AppError> {
        Ok(None)
    }
}
