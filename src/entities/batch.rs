//! Production batch entity type - groups related requests

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::core::entity::Entity;
use crate::core::identity::{EntityId, EntityPrefix};
use crate::entities::request::RequestStatus;

/// Aggregate progress of a batch
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BatchStatus {
    #[default]
    Pending,
    InProgress,
    Completed,
}

impl BatchStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            BatchStatus::Pending => "PENDING",
            BatchStatus::InProgress => "IN_PROGRESS",
            BatchStatus::Completed => "COMPLETED",
        }
    }

    /// Derive batch status from its member requests
    ///
    /// Empty batches and batches whose members are all pending stay PENDING;
    /// once every member is terminal the batch is COMPLETED.
    pub fn aggregate<I>(statuses: I) -> BatchStatus
    where
        I: IntoIterator<Item = RequestStatus>,
    {
        let mut any = false;
        let mut all_pending = true;
        let mut all_terminal = true;
        for status in statuses {
            any = true;
            all_pending &= status == RequestStatus::Pending;
            all_terminal &= status.is_terminal();
        }
        if !any || all_pending {
            BatchStatus::Pending
        } else if all_terminal {
            BatchStatus::Completed
        } else {
            BatchStatus::InProgress
        }
    }
}

impl std::fmt::Display for BatchStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for BatchStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_uppercase().replace('-', "_").as_str() {
            "PENDING" => Ok(BatchStatus::Pending),
            "IN_PROGRESS" => Ok(BatchStatus::InProgress),
            "COMPLETED" => Ok(BatchStatus::Completed),
            _ => Err(format!("Unknown batch status: {}", s)),
        }
    }
}

/// A ProductionBatch entity
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProductionBatch {
    /// Unique identifier
    pub id: EntityId,

    pub sku: String,

    /// Planned number of units
    pub quantity: u32,

    pub status: BatchStatus,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ProductionBatch {
    pub fn new(sku: impl Into<String>, quantity: u32) -> Self {
        let now = Utc::now();
        Self {
            id: EntityId::new(EntityPrefix::Batch),
            sku: sku.into(),
            quantity,
            status: BatchStatus::Pending,
            created_at: now,
            updated_at: now,
        }
    }
}

impl Entity for ProductionBatch {
    const PREFIX: EntityPrefix = EntityPrefix::Batch;
    const KIND: &'static str = "batch";

    fn id(&self) -> &EntityId {
        &self.id
    }

    fn created(&self) -> DateTime<Utc> {
        self.created_at
    }
}
