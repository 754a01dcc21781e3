//! Inventory item entity type - a physical garment unit

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::core::entity::Entity;
use crate::core::identity::{EntityId, EntityPrefix};
use crate::core::sku::Sku;

/// Coarse stage of an item (`status1`)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ItemStage {
    Production,
    Stock,
    Wash,
    Qc,
    Finishing,
    Packing,
    Recovery,
}

impl ItemStage {
    pub fn as_str(&self) -> &'static str {
        match self {
            ItemStage::Production => "PRODUCTION",
            ItemStage::Stock => "STOCK",
            ItemStage::Wash => "WASH",
            ItemStage::Qc => "QC",
            ItemStage::Finishing => "FINISHING",
            ItemStage::Packing => "PACKING",
            ItemStage::Recovery => "RECOVERY",
        }
    }
}

impl std::fmt::Display for ItemStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for ItemStage {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_uppercase().as_str() {
            "PRODUCTION" => Ok(ItemStage::Production),
            "STOCK" => Ok(ItemStage::Stock),
            "WASH" => Ok(ItemStage::Wash),
            "QC" => Ok(ItemStage::Qc),
            "FINISHING" => Ok(ItemStage::Finishing),
            "PACKING" => Ok(ItemStage::Packing),
            "RECOVERY" => Ok(ItemStage::Recovery),
            _ => Err(format!("Unknown item stage: {}", s)),
        }
    }
}

/// Fine-grained item sub-status (`status2`)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ItemSubStatus {
    Pending,
    InProgress,
    Validated,
    Completed,
    Defective,
    Available,
    Scrapped,
    /// The stage's request failed; the item rests until a new request picks it up
    Failed,
}

impl ItemSubStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ItemSubStatus::Pending => "PENDING",
            ItemSubStatus::InProgress => "IN_PROGRESS",
            ItemSubStatus::Validated => "VALIDATED",
            ItemSubStatus::Completed => "COMPLETED",
            ItemSubStatus::Defective => "DEFECTIVE",
            ItemSubStatus::Available => "AVAILABLE",
            ItemSubStatus::Scrapped => "SCRAPPED",
            ItemSubStatus::Failed => "FAILED",
        }
    }
}

impl std::fmt::Display for ItemSubStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for ItemSubStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_uppercase().replace('-', "_").as_str() {
            "PENDING" => Ok(ItemSubStatus::Pending),
            "IN_PROGRESS" => Ok(ItemSubStatus::InProgress),
            "VALIDATED" => Ok(ItemSubStatus::Validated),
            "COMPLETED" => Ok(ItemSubStatus::Completed),
            "DEFECTIVE" => Ok(ItemSubStatus::Defective),
            "AVAILABLE" => Ok(ItemSubStatus::Available),
            "SCRAPPED" => Ok(ItemSubStatus::Scrapped),
            "FAILED" => Ok(ItemSubStatus::Failed),
            _ => Err(format!("Unknown item sub-status: {}", s)),
        }
    }
}

/// An InventoryItem entity
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InventoryItem {
    /// Unique identifier
    pub id: EntityId,

    pub sku: Sku,

    /// Coarse stage
    pub status1: ItemStage,

    /// Fine-grained sub-status
    pub status2: ItemSubStatus,

    /// Bin the item currently occupies
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bin_id: Option<EntityId>,

    /// External identifier printed on the garment tag
    pub qr_code: String,

    /// Free-form attributes
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub metadata: BTreeMap<String, serde_json::Value>,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl InventoryItem {
    /// A new item at intake, not yet placed in a bin
    pub fn new(sku: Sku, qr_code: impl Into<String>, status1: ItemStage, status2: ItemSubStatus) -> Self {
        let now = Utc::now();
        Self {
            id: EntityId::new(EntityPrefix::Item),
            sku,
            status1,
            status2,
            bin_id: None,
            qr_code: qr_code.into(),
            metadata: BTreeMap::new(),
            created_at: now,
            updated_at: now,
        }
    }

    pub fn status_pair(&self) -> (ItemStage, ItemSubStatus) {
        (self.status1, self.status2)
    }
}

impl Entity for InventoryItem {
    const PREFIX: EntityPrefix = EntityPrefix::Item;
    const KIND: &'static str = "item";

    fn id(&self) -> &EntityId {
        &self.id
    }

    fn created(&self) -> DateTime<Utc> {
        self.created_at
    }
}
