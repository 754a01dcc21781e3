//! Entity trait - common interface for all persisted entity types

use chrono::{DateTime, Utc};
use serde::{de::DeserializeOwned, Serialize};

use crate::core::identity::{EntityId, EntityPrefix};

/// Common trait for all loomline entities
pub trait Entity: Serialize + DeserializeOwned {
    /// The entity type prefix (e.g., REQ, ITEM)
    const PREFIX: EntityPrefix;

    /// Human-readable entity kind used in error messages
    const KIND: &'static str;

    /// Get the entity's unique ID
    fn id(&self) -> &EntityId;

    /// Get the creation timestamp
    fn created(&self) -> DateTime<Utc>;
}

/// Mint a fresh id for an entity type
pub fn new_id<E: Entity>() -> EntityId {
    EntityId::new(E::PREFIX)
}
