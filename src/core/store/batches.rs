//! Production batch rows

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};

use super::StoreError;
use crate::core::identity::EntityId;
use crate::entities::batch::{BatchStatus, ProductionBatch};
use crate::entities::request::RequestStatus;

fn from_row(row: &Row<'_>) -> rusqlite::Result<ProductionBatch> {
    Ok(ProductionBatch {
        id: row.get("id")?,
        sku: row.get("sku")?,
        quantity: row.get("quantity")?,
        status: row.get("status")?,
        created_at: row.get("created_at")?,
        updated_at: row.get("updated_at")?,
    })
}

pub fn insert(conn: &Connection, batch: &ProductionBatch) -> Result<(), StoreError> {
    conn.execute(
        r#"
INSERT INTO batches (id, sku, quantity, status, created_at, updated_at)
VALUES (?1, ?2, ?3, ?4, ?5, ?6)
"#,
        params![
            batch.id,
            batch.sku,
            batch.quantity,
            batch.status,
            batch.created_at,
            batch.updated_at,
        ],
    )?;
    Ok(())
}

pub fn get(conn: &Connection, id: &EntityId) -> Result<Option<ProductionBatch>, StoreError> {
    Ok(conn
        .query_row(
            "SELECT id, sku, quantity, status, created_at, updated_at FROM batches WHERE id = ?1",
            params![id],
            from_row,
        )
        .optional()?)
}

/// Statuses of every request in a batch
pub fn member_statuses(
    conn: &Connection,
    batch_id: &EntityId,
) -> Result<Vec<RequestStatus>, StoreError> {
    let mut stmt = conn.prepare("SELECT status FROM requests WHERE batch_id = ?1")?;
    let rows = stmt.query_map(params![batch_id], |row| row.get::<_, RequestStatus>(0))?;
    let mut statuses = Vec::new();
    for row in rows {
        statuses.push(row?);
    }
    Ok(statuses)
}

pub fn update_status(
    conn: &Connection,
    id: &EntityId,
    status: BatchStatus,
    now: DateTime<Utc>,
) -> Result<(), StoreError> {
    conn.execute(
        "UPDATE batches SET status = ?2, updated_at = ?3 WHERE id = ?1",
        params![id, status, now],
    )?;
    Ok(())
}
