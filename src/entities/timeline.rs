//! Timeline entry entity type - immutable audit record of a request step

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::core::entity::Entity;
use crate::core::identity::{EntityId, EntityPrefix};
use crate::entities::request::{Action, RequestStatus};

/// Well-known step names recorded by the workflow engine
pub mod steps {
    pub const CREATED: &str = "CREATED";
    pub const ASSIGNED: &str = "ASSIGNED";
    pub const STARTED: &str = "STARTED";
    pub const ITEM_VALIDATED: &str = "ITEM_VALIDATED";
    pub const DEFECTS_RECORDED: &str = "DEFECTS_RECORDED";
    pub const MEASUREMENTS_RECORDED: &str = "MEASUREMENTS_RECORDED";
    pub const COMPLETED: &str = "COMPLETED";
    pub const FAILED: &str = "FAILED";
}

/// Step name an action records on success
pub fn step_for_action(action: Action) -> &'static str {
    match action {
        Action::Assign => steps::ASSIGNED,
        Action::Start => steps::STARTED,
        Action::Complete => steps::COMPLETED,
        Action::Fail => steps::FAILED,
        Action::ValidateItem => steps::ITEM_VALIDATED,
        Action::RecordDefects => steps::DEFECTS_RECORDED,
        Action::RecordMeasurements => steps::MEASUREMENTS_RECORDED,
    }
}

/// A TimelineEntry entity
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimelineEntry {
    pub id: EntityId,

    pub request_id: EntityId,

    /// Step name (see [`steps`])
    pub step: String,

    /// Request status once the step was applied
    pub status: RequestStatus,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub operator: Option<String>,

    /// Snapshot of step data
    #[serde(default)]
    pub metadata: serde_json::Value,

    pub created_at: DateTime<Utc>,
}

/// Data for an entry that has not been written yet
#[derive(Debug, Clone)]
pub struct NewTimelineEntry {
    pub step: String,
    pub status: RequestStatus,
    pub operator: Option<String>,
    pub metadata: serde_json::Value,
}

impl NewTimelineEntry {
    pub fn new(step: &str, status: RequestStatus, operator: Option<&str>) -> Self {
        Self {
            step: step.to_string(),
            status,
            operator: operator.map(str::to_string),
            metadata: serde_json::Value::Null,
        }
    }

    pub fn with_metadata(mut self, metadata: serde_json::Value) -> Self {
        self.metadata = metadata;
        self
    }
}

impl Entity for TimelineEntry {
    const PREFIX: EntityPrefix = EntityPrefix::Tl;
    const KIND: &'static str = "timeline entry";

    fn id(&self) -> &EntityId {
        &self.id
    }

    fn created(&self) -> DateTime<Utc> {
        self.created_at
    }
}
