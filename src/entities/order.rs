//! Order entity type - customer order that drives pipeline requests

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::core::entity::Entity;
use crate::core::identity::{EntityId, EntityPrefix};

/// An Order entity
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Order {
    pub id: EntityId,

    /// External order number (unique)
    pub order_number: String,

    pub created_at: DateTime<Utc>,
}

impl Order {
    pub fn new(order_number: impl Into<String>) -> Self {
        Self {
            id: EntityId::new(EntityPrefix::Ord),
            order_number: order_number.into(),
            created_at: Utc::now(),
        }
    }
}

impl Entity for Order {
    const PREFIX: EntityPrefix = EntityPrefix::Ord;
    const KIND: &'static str = "order";

    fn id(&self) -> &EntityId {
        &self.id
    }

    fn created(&self) -> DateTime<Utc> {
        self.created_at
    }
}
