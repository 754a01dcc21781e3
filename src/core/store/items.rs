//! Inventory item rows

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};

use super::{Json, StoreError};
use crate::core::identity::EntityId;
use crate::core::sku::Sku;
use crate::entities::item::{InventoryItem, ItemStage, ItemSubStatus};

const COLUMNS: &str =
    "id, sku, status1, status2, bin_id, qr_code, metadata_json, created_at, updated_at";

fn from_row(row: &Row<'_>) -> rusqlite::Result<InventoryItem> {
    Ok(InventoryItem {
        id: row.get("id")?,
        sku: row.get("sku")?,
        status1: row.get("status1")?,
        status2: row.get("status2")?,
        bin_id: row.get("bin_id")?,
        qr_code: row.get("qr_code")?,
        metadata: row.get::<_, Json<_>>("metadata_json")?.0,
        created_at: row.get("created_at")?,
        updated_at: row.get("updated_at")?,
    })
}

pub fn insert(conn: &Connection, item: &InventoryItem) -> Result<(), StoreError> {
    conn.execute(
        r#"
INSERT INTO items (id, sku, status1, status2, bin_id, qr_code, metadata_json, created_at, updated_at)
VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
"#,
        params![
            item.id,
            item.sku,
            item.status1,
            item.status2,
            item.bin_id,
            item.qr_code,
            Json(&item.metadata),
            item.created_at,
            item.updated_at,
        ],
    )?;
    Ok(())
}

pub fn get(conn: &Connection, id: &EntityId) -> Result<Option<InventoryItem>, StoreError> {
    let sql = format!("SELECT {COLUMNS} FROM items WHERE id = ?1");
    Ok(conn.query_row(&sql, params![id], from_row).optional()?)
}

pub fn find_by_qr(conn: &Connection, qr_code: &str) -> Result<Option<InventoryItem>, StoreError> {
    let sql = format!("SELECT {COLUMNS} FROM items WHERE qr_code = ?1");
    Ok(conn.query_row(&sql, params![qr_code], from_row).optional()?)
}

pub fn list(conn: &Connection) -> Result<Vec<InventoryItem>, StoreError> {
    let sql = format!("SELECT {COLUMNS} FROM items ORDER BY id ASC");
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt.query_map([], from_row)?;
    let mut items = Vec::new();
    for row in rows {
        items.push(row?);
    }
    Ok(items)
}

pub fn update_status(
    conn: &Connection,
    id: &EntityId,
    status1: ItemStage,
    status2: ItemSubStatus,
    now: DateTime<Utc>,
) -> Result<(), StoreError> {
    conn.execute(
        "UPDATE items SET status1 = ?2, status2 = ?3, updated_at = ?4 WHERE id = ?1",
        params![id, status1, status2, now],
    )?;
    Ok(())
}

pub fn set_bin(
    conn: &Connection,
    id: &EntityId,
    bin_id: Option<&EntityId>,
    now: DateTime<Utc>,
) -> Result<(), StoreError> {
    conn.execute(
        "UPDATE items SET bin_id = ?2, updated_at = ?3 WHERE id = ?1",
        params![id, bin_id, now],
    )?;
    Ok(())
}

pub fn set_sku(
    conn: &Connection,
    id: &EntityId,
    sku: &Sku,
    now: DateTime<Utc>,
) -> Result<(), StoreError> {
    conn.execute(
        "UPDATE items SET sku = ?2, updated_at = ?3 WHERE id = ?1",
        params![id, sku, now],
    )?;
    Ok(())
}
