//! Bin rows and capacity accounting
//!
//! `occupy` and `release` are conditional updates: the capacity check and
//! the increment happen in one statement, so a slot can never be handed out
//! twice even if a caller skipped validation.

use rusqlite::{params, Connection, OptionalExtension, Row};

use super::StoreError;
use crate::core::identity::{EntityId, EntityPrefix};
use crate::entities::bin::Bin;

const COLUMNS: &str = "id, code, capacity, current_count, sku_restriction, active, created_at";

fn from_row(row: &Row<'_>) -> rusqlite::Result<Bin> {
    Ok(Bin {
        id: row.get("id")?,
        code: row.get("code")?,
        capacity: row.get("capacity")?,
        current_count: row.get("current_count")?,
        sku_restriction: row.get("sku_restriction")?,
        active: row.get("active")?,
        created_at: row.get("created_at")?,
    })
}

pub fn insert(conn: &Connection, bin: &Bin) -> Result<(), StoreError> {
    conn.execute(
        r#"
INSERT INTO bins (id, code, capacity, current_count, sku_restriction, active, created_at)
VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
"#,
        params![
            bin.id,
            bin.code,
            bin.capacity,
            bin.current_count,
            bin.sku_restriction,
            bin.active,
            bin.created_at,
        ],
    )?;
    Ok(())
}

pub fn get(conn: &Connection, id: &EntityId) -> Result<Option<Bin>, StoreError> {
    let sql = format!("SELECT {COLUMNS} FROM bins WHERE id = ?1");
    Ok(conn.query_row(&sql, params![id], from_row).optional()?)
}

pub fn find_by_code(conn: &Connection, code: &str) -> Result<Option<Bin>, StoreError> {
    let sql = format!("SELECT {COLUMNS} FROM bins WHERE code = ?1");
    Ok(conn.query_row(&sql, params![code], from_row).optional()?)
}

/// Look a bin up by full id (`BIN-...`) or by floor code
pub fn resolve(conn: &Connection, key: &str) -> Result<Option<Bin>, StoreError> {
    match EntityId::parse_as(key, EntityPrefix::Bin) {
        Ok(id) => get(conn, &id),
        Err(_) => find_by_code(conn, key),
    }
}

pub fn list(conn: &Connection) -> Result<Vec<Bin>, StoreError> {
    let sql = format!("SELECT {COLUMNS} FROM bins ORDER BY code ASC");
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt.query_map([], from_row)?;
    let mut bins = Vec::new();
    for row in rows {
        bins.push(row?);
    }
    Ok(bins)
}

/// Take one slot; returns false when the bin is full, inactive or missing
pub fn occupy(conn: &Connection, id: &EntityId) -> Result<bool, StoreError> {
    let changed = conn.execute(
        r#"
UPDATE bins SET current_count = current_count + 1
WHERE id = ?1 AND active = 1 AND current_count < capacity
"#,
        params![id],
    )?;
    Ok(changed == 1)
}

/// Free one slot; returns false if the bin was already empty or missing
pub fn release(conn: &Connection, id: &EntityId) -> Result<bool, StoreError> {
    let changed = conn.execute(
        "UPDATE bins SET current_count = current_count - 1 WHERE id = ?1 AND current_count > 0",
        params![id],
    )?;
    Ok(changed == 1)
}

pub fn set_active(conn: &Connection, id: &EntityId, active: bool) -> Result<bool, StoreError> {
    let changed = conn.execute(
        "UPDATE bins SET active = ?2 WHERE id = ?1",
        params![id, active],
    )?;
    Ok(changed == 1)
}
