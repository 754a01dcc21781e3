//! Notification entity type - operator message triggered by assignment

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::core::entity::Entity;
use crate::core::identity::{EntityId, EntityPrefix};

/// A Notification entity
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Notification {
    pub id: EntityId,

    /// Operator the message is for
    pub user_id: String,

    /// Request that triggered the message
    pub request_id: EntityId,

    pub message: String,

    #[serde(default)]
    pub metadata: serde_json::Value,

    pub read: bool,

    /// Handed to the dispatcher after commit
    pub dispatched: bool,

    pub created_at: DateTime<Utc>,
}

impl Notification {
    pub fn new(
        user_id: impl Into<String>,
        request_id: EntityId,
        message: impl Into<String>,
        metadata: serde_json::Value,
    ) -> Self {
        Self {
            id: EntityId::new(EntityPrefix::Ntf),
            user_id: user_id.into(),
            request_id,
            message: message.into(),
            metadata,
            read: false,
            dispatched: false,
            created_at: Utc::now(),
        }
    }
}

impl Entity for Notification {
    const PREFIX: EntityPrefix = EntityPrefix::Ntf;
    const KIND: &'static str = "notification";

    fn id(&self) -> &EntityId {
        &self.id
    }

    fn created(&self) -> DateTime<Utc> {
        self.created_at
    }
}
