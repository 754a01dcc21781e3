//! Request entity type - a unit of pipeline work

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::core::entity::Entity;
use crate::core::identity::{EntityId, EntityPrefix};
use crate::core::metadata::RequestMetadata;
use crate::entities::item::ItemStage;

/// Pipeline stage a request represents
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RequestType {
    Pattern,
    Cutting,
    Sew,
    Wash,
    Qc,
    Finishing,
    Packing,
    Move,
    Recovery,
}

impl RequestType {
    pub const ALL: [RequestType; 9] = [
        RequestType::Pattern,
        RequestType::Cutting,
        RequestType::Sew,
        RequestType::Wash,
        RequestType::Qc,
        RequestType::Finishing,
        RequestType::Packing,
        RequestType::Move,
        RequestType::Recovery,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            RequestType::Pattern => "PATTERN",
            RequestType::Cutting => "CUTTING",
            RequestType::Sew => "SEW",
            RequestType::Wash => "WASH",
            RequestType::Qc => "QC",
            RequestType::Finishing => "FINISHING",
            RequestType::Packing => "PACKING",
            RequestType::Move => "MOVE",
            RequestType::Recovery => "RECOVERY",
        }
    }

    /// Coarse item stage while a request of this type is active
    ///
    /// MOVE relocates an item without changing its stage.
    pub fn item_stage(&self) -> Option<ItemStage> {
        match self {
            RequestType::Pattern | RequestType::Cutting | RequestType::Sew => {
                Some(ItemStage::Production)
            }
            RequestType::Wash => Some(ItemStage::Wash),
            RequestType::Qc => Some(ItemStage::Qc),
            RequestType::Finishing => Some(ItemStage::Finishing),
            RequestType::Packing => Some(ItemStage::Packing),
            RequestType::Recovery => Some(ItemStage::Recovery),
            RequestType::Move => None,
        }
    }

    /// Whether `complete` demands an explicit `start` first
    pub fn requires_start(&self) -> bool {
        matches!(self, RequestType::Wash | RequestType::Qc)
    }

    /// Stages that act on one physical garment
    pub fn requires_item(&self) -> bool {
        matches!(
            self,
            RequestType::Wash
                | RequestType::Qc
                | RequestType::Finishing
                | RequestType::Packing
                | RequestType::Move
                | RequestType::Recovery
        )
    }
}

impl std::fmt::Display for RequestType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for RequestType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_uppercase().as_str() {
            "PATTERN" => Ok(RequestType::Pattern),
            "CUTTING" => Ok(RequestType::Cutting),
            "SEW" => Ok(RequestType::Sew),
            "WASH" => Ok(RequestType::Wash),
            "QC" => Ok(RequestType::Qc),
            "FINISHING" => Ok(RequestType::Finishing),
            "PACKING" => Ok(RequestType::Packing),
            "MOVE" => Ok(RequestType::Move),
            "RECOVERY" => Ok(RequestType::Recovery),
            _ => Err(format!("Unknown request type: {}", s)),
        }
    }
}

/// Request lifecycle status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RequestStatus {
    #[default]
    Pending,
    InProgress,
    Completed,
    Failed,
}

impl RequestStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RequestStatus::Pending => "PENDING",
            RequestStatus::InProgress => "IN_PROGRESS",
            RequestStatus::Completed => "COMPLETED",
            RequestStatus::Failed => "FAILED",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, RequestStatus::Completed | RequestStatus::Failed)
    }

    pub fn is_active(&self) -> bool {
        !self.is_terminal()
    }
}

impl std::fmt::Display for RequestStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for RequestStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_uppercase().replace('-', "_").as_str() {
            "PENDING" => Ok(RequestStatus::Pending),
            "IN_PROGRESS" => Ok(RequestStatus::InProgress),
            "COMPLETED" => Ok(RequestStatus::Completed),
            "FAILED" => Ok(RequestStatus::Failed),
            _ => Err(format!("Unknown request status: {}", s)),
        }
    }
}

/// Named action a caller can apply to a request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Action {
    Assign,
    Start,
    Complete,
    Fail,
    ValidateItem,
    RecordDefects,
    RecordMeasurements,
}

impl Action {
    pub fn as_str(&self) -> &'static str {
        match self {
            Action::Assign => "assign",
            Action::Start => "start",
            Action::Complete => "complete",
            Action::Fail => "fail",
            Action::ValidateItem => "validate_item",
            Action::RecordDefects => "record_defects",
            Action::RecordMeasurements => "record_measurements",
        }
    }
}

impl std::fmt::Display for Action {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Action {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().replace('-', "_").as_str() {
            "assign" => Ok(Action::Assign),
            "start" => Ok(Action::Start),
            "complete" => Ok(Action::Complete),
            "fail" => Ok(Action::Fail),
            "validate_item" => Ok(Action::ValidateItem),
            "record_defects" => Ok(Action::RecordDefects),
            "record_measurements" => Ok(Action::RecordMeasurements),
            _ => Err(format!("Unknown action: {}", s)),
        }
    }
}

/// A Request entity
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Request {
    /// Unique identifier
    pub id: EntityId,

    /// Pipeline stage
    #[serde(rename = "type")]
    pub request_type: RequestType,

    /// Lifecycle status
    pub status: RequestStatus,

    /// Operator responsible for the work
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub assigned_to: Option<String>,

    /// Garment this request acts on (batch-level requests have none)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub item_id: Option<EntityId>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub order_id: Option<EntityId>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub batch_id: Option<EntityId>,

    /// Stage-specific payload accumulated across actions
    pub metadata: RequestMetadata,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Request {
    /// A fresh PENDING request with no relations
    pub fn new(request_type: RequestType, metadata: RequestMetadata) -> Self {
        let now = Utc::now();
        Self {
            id: EntityId::new(EntityPrefix::Req),
            request_type,
            status: RequestStatus::Pending,
            assigned_to: None,
            item_id: None,
            order_id: None,
            batch_id: None,
            metadata,
            created_at: now,
            updated_at: now,
        }
    }
}

impl Entity for Request {
    const PREFIX: EntityPrefix = EntityPrefix::Req;
    const KIND: &'static str = "request";

    fn id(&self) -> &EntityId {
        &self.id
    }

    fn created(&self) -> DateTime<Utc> {
        self.created_at
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_type_parse_and_display() {
        for t in RequestType::ALL {
            assert_eq!(t.as_str().parse::<RequestType>().unwrap(), t);
        }
        assert_eq!("qc".parse::<RequestType>().unwrap(), RequestType::Qc);
        assert!("DYE".parse::<RequestType>().is_err());
    }

    #[test]
    fn test_status_terminality() {
        assert!(!RequestStatus::Pending.is_terminal());
        assert!(!RequestStatus::InProgress.is_terminal());
        assert!(RequestStatus::Completed.is_terminal());
        assert!(RequestStatus::Failed.is_terminal());
        assert_eq!(
            "in-progress".parse::<RequestStatus>().unwrap(),
            RequestStatus::InProgress
        );
    }

    #[test]
    fn test_action_parse() {
        assert_eq!(
            "validate-item".parse::<Action>().unwrap(),
            Action::ValidateItem
        );
        assert_eq!("COMPLETE".parse::<Action>().unwrap(), Action::Complete);
        assert!("approve".parse::<Action>().is_err());
    }

    #[test]
    fn test_move_keeps_item_stage() {
        assert_eq!(RequestType::Move.item_stage(), None);
        assert_eq!(RequestType::Sew.item_stage(), Some(ItemStage::Production));
        assert!(RequestType::Wash.requires_start());
        assert!(!RequestType::Cutting.requires_start());
    }
}
