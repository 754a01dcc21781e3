//! Structured SKU codes
//!
//! A garment SKU has five dash-separated segments:
//! `style-waist-shape-length-wash`, e.g. `JN01-32-SLIM-34-RAW`.
//! Washing rewrites only the final segment.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Errors from parsing a SKU
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SkuError {
    #[error("SKU '{sku}' must have 5 segments (style-waist-shape-length-wash), found {found}")]
    SegmentCount { sku: String, found: usize },

    #[error("SKU '{sku}' has an empty {segment} segment")]
    EmptySegment { sku: String, segment: &'static str },

    #[error("wash code '{0}' must be a single non-empty segment")]
    InvalidWashCode(String),
}

const SEGMENTS: [&str; 5] = ["style", "waist", "shape", "length", "wash"];

/// A parsed garment SKU
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Sku {
    pub style: String,
    pub waist: String,
    pub shape: String,
    pub length: String,
    pub wash: String,
}

impl Sku {
    /// Return a copy of this SKU with the wash segment replaced
    pub fn with_wash(&self, wash_code: &str) -> Result<Sku, SkuError> {
        let code = wash_code.trim();
        if code.is_empty() || code.contains('-') {
            return Err(SkuError::InvalidWashCode(wash_code.to_string()));
        }
        Ok(Sku {
            wash: code.to_uppercase(),
            ..self.clone()
        })
    }
}

impl fmt::Display for Sku {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}-{}-{}-{}-{}",
            self.style, self.waist, self.shape, self.length, self.wash
        )
    }
}

impl FromStr for Sku {
    type Err = SkuError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let upper = s.trim().to_uppercase();
        let parts: Vec<&str> = upper.split('-').collect();
        if parts.len() != SEGMENTS.len() {
            return Err(SkuError::SegmentCount {
                sku: s.to_string(),
                found: parts.len(),
            });
        }
        for (part, name) in parts.iter().zip(SEGMENTS) {
            if part.is_empty() {
                return Err(SkuError::EmptySegment {
                    sku: s.to_string(),
                    segment: name,
                });
            }
        }
        Ok(Sku {
            style: parts[0].to_string(),
            waist: parts[1].to_string(),
            shape: parts[2].to_string(),
            length: parts[3].to_string(),
            wash: parts[4].to_string(),
        })
    }
}

impl Serialize for Sku {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for Sku {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}
