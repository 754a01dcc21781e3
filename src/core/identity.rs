//! Entity identity - prefixed ULIDs and idempotency keys
//!
//! Every persisted entity carries an id of the form `PREFIX-<ULID>`
//! (e.g. `REQ-01HQ3K5ZP8T9V7X2M4N6B0C1D2`). ULIDs sort by creation time,
//! which keeps listings stable without a separate sequence column.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;
use ulid::Ulid;

/// Entity type prefixes
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum EntityPrefix {
    Req,
    Item,
    Bin,
    Batch,
    Ord,
    Ntf,
    Evt,
    Tl,
}

impl EntityPrefix {
    pub fn as_str(&self) -> &'static str {
        match self {
            EntityPrefix::Req => "REQ",
            EntityPrefix::Item => "ITEM",
            EntityPrefix::Bin => "BIN",
            EntityPrefix::Batch => "BATCH",
            EntityPrefix::Ord => "ORD",
            EntityPrefix::Ntf => "NTF",
            EntityPrefix::Evt => "EVT",
            EntityPrefix::Tl => "TL",
        }
    }
}

impl fmt::Display for EntityPrefix {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EntityPrefix {
    type Err = IdParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_uppercase().as_str() {
            "REQ" => Ok(EntityPrefix::Req),
            "ITEM" => Ok(EntityPrefix::Item),
            "BIN" => Ok(EntityPrefix::Bin),
            "BATCH" => Ok(EntityPrefix::Batch),
            "ORD" => Ok(EntityPrefix::Ord),
            "NTF" => Ok(EntityPrefix::Ntf),
            "EVT" => Ok(EntityPrefix::Evt),
            "TL" => Ok(EntityPrefix::Tl),
            _ => Err(IdParseError::UnknownPrefix(s.to_string())),
        }
    }
}

/// Errors from parsing an entity id
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum IdParseError {
    #[error("entity id '{0}' is missing the PREFIX- part")]
    MissingPrefix(String),

    #[error("unknown entity prefix '{0}'")]
    UnknownPrefix(String),

    #[error("invalid ULID in entity id '{0}'")]
    InvalidUlid(String),

    #[error("expected a {expected} id, got '{actual}'")]
    WrongPrefix {
        expected: EntityPrefix,
        actual: String,
    },
}

/// A unique entity identifier: prefix plus ULID
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct EntityId {
    prefix: EntityPrefix,
    ulid: Ulid,
}

impl EntityId {
    /// Generate a fresh id for the given entity type
    pub fn new(prefix: EntityPrefix) -> Self {
        Self {
            prefix,
            ulid: Ulid::new(),
        }
    }

    pub fn prefix(&self) -> EntityPrefix {
        self.prefix
    }

    pub fn ulid(&self) -> Ulid {
        self.ulid
    }

    /// Parse an id and require a specific prefix
    pub fn parse_as(s: &str, expected: EntityPrefix) -> Result<Self, IdParseError> {
        let id: EntityId = s.parse()?;
        if id.prefix != expected {
            return Err(IdParseError::WrongPrefix {
                expected,
                actual: s.to_string(),
            });
        }
        Ok(id)
    }
}

impl fmt::Display for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.prefix, self.ulid)
    }
}

impl FromStr for EntityId {
    type Err = IdParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (prefix, rest) = s
            .trim()
            .split_once('-')
            .ok_or_else(|| IdParseError::MissingPrefix(s.to_string()))?;
        let prefix: EntityPrefix = prefix.parse()?;
        let ulid = Ulid::from_string(rest).map_err(|_| IdParseError::InvalidUlid(s.to_string()))?;
        Ok(Self { prefix, ulid })
    }
}

impl Serialize for EntityId {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for EntityId {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

/// Key guaranteeing at-most-one creation per caller intent
///
/// Either supplied verbatim by the caller (e.g. an upstream order line id),
/// or derived as a SHA-256 content hash over the parts of the intent.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct IdempotencyKey(String);

impl IdempotencyKey {
    /// Wrap a caller-supplied key; blank keys are rejected
    pub fn new(key: impl Into<String>) -> Option<Self> {
        let key = key.into();
        let trimmed = key.trim();
        if trimmed.is_empty() {
            None
        } else {
            Some(Self(trimmed.to_string()))
        }
    }

    /// Derive a key from the parts of a creation intent
    pub fn derive<I, S>(parts: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut hasher = Sha256::new();
        for part in parts {
            hasher.update(part.as_ref().as_bytes());
            // unit separator keeps ["ab", "c"] distinct from ["a", "bc"]
            hasher.update([0x1f]);
        }
        Self(format!("sha256:{:x}", hasher.finalize()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for IdempotencyKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_id_roundtrip_through_string() {
        let id = EntityId::new(EntityPrefix::Req);
        let text = id.to_string();
        assert!(text.starts_with("REQ-"));
        assert_eq!(text.parse::<EntityId>().unwrap(), id);
    }

    #[test]
    fn test_id_rejects_bad_input() {
        assert_eq!(
            "NOPREFIX".parse::<EntityId>(),
            Err(IdParseError::MissingPrefix("NOPREFIX".to_string()))
        );
        assert!(matches!(
            "FOO-01HQ3K5ZP8T9V7X2M4N6B0C1D2".parse::<EntityId>(),
            Err(IdParseError::UnknownPrefix(_))
        ));
        assert!(matches!(
            "REQ-not-a-ulid".parse::<EntityId>(),
            Err(IdParseError::InvalidUlid(_))
        ));
    }

    #[test]
    fn test_parse_as_checks_prefix() {
        let bin = EntityId::new(EntityPrefix::Bin).to_string();
        assert!(EntityId::parse_as(&bin, EntityPrefix::Bin).is_ok());
        assert!(matches!(
            EntityId::parse_as(&bin, EntityPrefix::Item),
            Err(IdParseError::WrongPrefix { .. })
        ));
    }

    #[test]
    fn test_prefix_is_case_insensitive() {
        let id = format!("item-{}", EntityId::new(EntityPrefix::Item).ulid());
        assert_eq!(id.parse::<EntityId>().unwrap().prefix(), EntityPrefix::Item);
    }

    #[test]
    fn test_derived_keys_are_stable_and_separated() {
        let a = IdempotencyKey::derive(["CUTTING", "ORD-1"]);
        let b = IdempotencyKey::derive(["CUTTING", "ORD-1"]);
        let c = IdempotencyKey::derive(["CUTTINGORD-1"]);
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert!(a.as_str().starts_with("sha256:"));
    }

    #[test]
    fn test_blank_key_rejected() {
        assert!(IdempotencyKey::new("   ").is_none());
        assert_eq!(IdempotencyKey::new(" k1 ").unwrap().as_str(), "k1");
    }

    #[test]
    fn test_ids_order_by_prefix_then_ulid() {
        let later: EntityId = "REQ-01HQ3K5ZP8T9V7X2M4N6B0C1D3".parse().unwrap();
        let earlier: EntityId = "REQ-01HQ3K5ZP8T9V7X2M4N6B0C1D2".parse().unwrap();
        let item: EntityId = "ITEM-01HQ3K5ZP8T9V7X2M4N6B0C1D1".parse().unwrap();

        let sorted: std::collections::BTreeSet<_> = [later, item, earlier].into_iter().collect();
        assert_eq!(sorted.into_iter().collect::<Vec<_>>(), vec![earlier, later, item]);
    }
}
