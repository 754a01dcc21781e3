//! Append-only domain event log
//!
//! Events are written through the same connection (and therefore the same
//! transaction) as the mutations they describe.

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection};
use serde::{Deserialize, Serialize};

use super::{Json, StoreError};
use crate::core::identity::{EntityId, EntityPrefix};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EventType {
    #[serde(rename = "request.created")]
    RequestCreated,
    #[serde(rename = "request.updated")]
    RequestUpdated,
    #[serde(rename = "request.spawned")]
    RequestSpawned,
    #[serde(rename = "item.created")]
    ItemCreated,
    #[serde(rename = "item.updated")]
    ItemUpdated,
    #[serde(rename = "item.moved")]
    ItemMoved,
    #[serde(rename = "batch.updated")]
    BatchUpdated,
}

impl EventType {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventType::RequestCreated => "request.created",
            EventType::RequestUpdated => "request.updated",
            EventType::RequestSpawned => "request.spawned",
            EventType::ItemCreated => "item.created",
            EventType::ItemUpdated => "item.updated",
            EventType::ItemMoved => "item.moved",
            EventType::BatchUpdated => "batch.updated",
        }
    }
}

impl std::fmt::Display for EventType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for EventType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "request.created" => Ok(EventType::RequestCreated),
            "request.updated" => Ok(EventType::RequestUpdated),
            "request.spawned" => Ok(EventType::RequestSpawned),
            "item.created" => Ok(EventType::ItemCreated),
            "item.updated" => Ok(EventType::ItemUpdated),
            "item.moved" => Ok(EventType::ItemMoved),
            "batch.updated" => Ok(EventType::BatchUpdated),
            _ => Err(format!("Unknown event type: {}", s)),
        }
    }
}

/// Entities an event refers to
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EventRefs {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub request_id: Option<EntityId>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub item_id: Option<EntityId>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bin_id: Option<EntityId>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub batch_id: Option<EntityId>,
}

impl EventRefs {
    pub fn request(id: &EntityId) -> Self {
        Self {
            request_id: Some(*id),
            ..Default::default()
        }
    }

    pub fn item(id: &EntityId) -> Self {
        Self {
            item_id: Some(*id),
            ..Default::default()
        }
    }

    pub fn batch(id: &EntityId) -> Self {
        Self {
            batch_id: Some(*id),
            ..Default::default()
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DomainEvent {
    pub id: EntityId,
    pub event_type: EventType,
    pub refs: EventRefs,
    pub data: serde_json::Value,
    pub created_at: DateTime<Utc>,
}

pub fn record(
    conn: &Connection,
    event_type: EventType,
    refs: EventRefs,
    data: serde_json::Value,
) -> Result<DomainEvent, StoreError> {
    let event = DomainEvent {
        id: EntityId::new(EntityPrefix::Evt),
        event_type,
        refs,
        data,
        created_at: Utc::now(),
    };
    conn.execute(
        r#"
INSERT INTO events (id, event_type, refs_json, data_json, created_at)
VALUES (?1, ?2, ?3, ?4, ?5)
"#,
        params![
            event.id,
            event.event_type.as_str(),
            Json(&event.refs),
            Json(&event.data),
            event.created_at,
        ],
    )?;
    Ok(event)
}

/// All events in append order
pub fn list(conn: &Connection) -> Result<Vec<DomainEvent>, StoreError> {
    let mut stmt = conn.prepare(
        "SELECT id, event_type, refs_json, data_json, created_at FROM events ORDER BY seq ASC",
    )?;
    let rows = stmt.query_map([], |row| {
        Ok((
            row.get::<_, EntityId>(0)?,
            row.get::<_, String>(1)?,
            row.get::<_, Json<EventRefs>>(2)?.0,
            row.get::<_, Json<serde_json::Value>>(3)?.0,
            row.get::<_, DateTime<Utc>>(4)?,
        ))
    })?;
    let mut events = Vec::new();
    for row in rows {
        let (id, event_type, refs, data, created_at) = row?;
        let event_type = event_type.parse().map_err(|e: String| {
            StoreError::from(rusqlite::Error::FromSqlConversionFailure(
                1,
                rusqlite::types::Type::Text,
                e.into(),
            ))
        })?;
        events.push(DomainEvent {
            id,
            event_type,
            refs,
            data,
            created_at,
        });
    }
    Ok(events)
}
