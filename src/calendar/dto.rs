use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// Google Calendar event resource, reduced to the fields we write.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EventPayload {
    pub summary: String,
    pub description: String,
    pub start: EventTime,
    pub end: EventTime,
    pub attendees: Vec<Attendee>,
    pub extended_properties: ExtendedProperties,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EventTime {
    pub date_time: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct Attendee {
    pub email: String,
}

/// Shared properties carry the internal course/lesson ids so events can be
/// found again even when the locally stored event id is stale.
#[derive(Debug, Clone, Serialize)]
pub struct ExtendedProperties {
    pub shared: HashMap<String, String>,
}

#[derive(Debug, Deserialize)]
pub struct EventResource {
    pub id: String,
}

#[derive(Debug, Deserialize)]
pub struct EventListResponse {
    #[serde(default)]
    pub items: Vec<EventResource>,
}
