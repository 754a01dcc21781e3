//! SQLite serialization for typed columns
//!
//! Implements ToSql and FromSql for ids, SKUs and status enums (stored as
//! their display text) and for JSON payload columns via [`Json`].

use rusqlite::types::{FromSql, FromSqlError, FromSqlResult, ToSql, ToSqlOutput, ValueRef};
use serde::{de::DeserializeOwned, Serialize};
use std::fmt::Display;
use std::str::FromStr;

use crate::core::identity::EntityId;
use crate::core::sku::Sku;
use crate::entities::batch::BatchStatus;
use crate::entities::item::{ItemStage, ItemSubStatus};
use crate::entities::request::{RequestStatus, RequestType};

fn parse_text<T>(value: ValueRef<'_>) -> FromSqlResult<T>
where
    T: FromStr,
    T::Err: Display,
{
    let s = value.as_str()?;
    s.parse().map_err(|e: T::Err| {
        FromSqlError::Other(Box::new(std::io::Error::new(
            std::io::ErrorKind::InvalidData,
            e.to_string(),
        )))
    })
}

macro_rules! text_column {
    ($($ty:ty),* $(,)?) => {
        $(
            impl ToSql for $ty {
                fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
                    Ok(ToSqlOutput::from(self.to_string()))
                }
            }

            impl FromSql for $ty {
                fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
                    parse_text(value)
                }
            }
        )*
    };
}

// =========================================================================
// Ids and codes
// =========================================================================

text_column!(EntityId, Sku);

// =========================================================================
// Status enums
// =========================================================================

text_column!(RequestType, RequestStatus, ItemStage, ItemSubStatus, BatchStatus);

// =========================================================================
// JSON columns
// =========================================================================

/// Wrapper storing any serde type as a JSON text column
#[derive(Debug, Clone, PartialEq)]
pub struct Json<T>(pub T);

impl<T: Serialize> ToSql for Json<T> {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        let text = serde_json::to_string(&self.0)
            .map_err(|e| rusqlite::Error::ToSqlConversionFailure(Box::new(e)))?;
        Ok(ToSqlOutput::from(text))
    }
}

impl<T: DeserializeOwned> FromSql for Json<T> {
    fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
        let s = value.as_str()?;
        serde_json::from_str(s)
            .map(Json)
            .map_err(|e| FromSqlError::Other(Box::new(e)))
    }
}
