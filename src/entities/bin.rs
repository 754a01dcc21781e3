//! Bin entity type - a capacity-bounded physical storage location

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::core::entity::Entity;
use crate::core::identity::{EntityId, EntityPrefix};

/// A Bin entity
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Bin {
    /// Unique identifier
    pub id: EntityId,

    /// Floor label (e.g. "WASH-STAGING", "A-01-03")
    pub code: String,

    pub capacity: u32,

    pub current_count: u32,

    /// Only items with exactly this SKU may be placed here
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sku_restriction: Option<String>,

    pub active: bool,

    pub created_at: DateTime<Utc>,
}

impl Bin {
    pub fn new(code: impl Into<String>, capacity: u32) -> Self {
        Self {
            id: EntityId::new(EntityPrefix::Bin),
            code: code.into(),
            capacity,
            current_count: 0,
            sku_restriction: None,
            active: true,
            created_at: Utc::now(),
        }
    }

    pub fn has_room(&self) -> bool {
        self.current_count < self.capacity
    }

    pub fn free_slots(&self) -> u32 {
        self.capacity.saturating_sub(self.current_count)
    }
}

impl Entity for Bin {
    const PREFIX: EntityPrefix = EntityPrefix::Bin;
    const KIND: &'static str = "bin";

    fn id(&self) -> &EntityId {
        &self.id
    }

    fn created(&self) -> DateTime<Utc> {
        self.created_at
    }
}
