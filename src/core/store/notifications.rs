//! Notification outbox rows

use rusqlite::{params, Connection, OptionalExtension, Row};

use super::{Json, StoreError};
use crate::core::identity::EntityId;
use crate::entities::notification::Notification;

const COLUMNS: &str =
    "id, user_id, request_id, message, metadata_json, read, dispatched, created_at";

fn from_row(row: &Row<'_>) -> rusqlite::Result<Notification> {
    Ok(Notification {
        id: row.get("id")?,
        user_id: row.get("user_id")?,
        request_id: row.get("request_id")?,
        message: row.get("message")?,
        metadata: row.get::<_, Json<_>>("metadata_json")?.0,
        read: row.get("read")?,
        dispatched: row.get("dispatched")?,
        created_at: row.get("created_at")?,
    })
}

pub fn insert(conn: &Connection, notification: &Notification) -> Result<(), StoreError> {
    conn.execute(
        r#"
INSERT INTO notifications (id, user_id, request_id, message, metadata_json, read, dispatched, created_at)
VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
"#,
        params![
            notification.id,
            notification.user_id,
            notification.request_id,
            notification.message,
            Json(&notification.metadata),
            notification.read,
            notification.dispatched,
            notification.created_at,
        ],
    )?;
    Ok(())
}

pub fn get(conn: &Connection, id: &EntityId) -> Result<Option<Notification>, StoreError> {
    let sql = format!("SELECT {COLUMNS} FROM notifications WHERE id = ?1");
    Ok(conn.query_row(&sql, params![id], from_row).optional()?)
}

pub fn list_for_user(
    conn: &Connection,
    user_id: &str,
    unread_only: bool,
) -> Result<Vec<Notification>, StoreError> {
    let sql = format!(
        "SELECT {COLUMNS} FROM notifications WHERE user_id = ?1 AND (?2 = 0 OR read = 0) ORDER BY seq ASC"
    );
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt.query_map(params![user_id, unread_only], from_row)?;
    let mut notifications = Vec::new();
    for row in rows {
        notifications.push(row?);
    }
    Ok(notifications)
}

/// Notifications written but never handed to a dispatcher
pub fn list_undispatched(conn: &Connection) -> Result<Vec<Notification>, StoreError> {
    let sql = format!("SELECT {COLUMNS} FROM notifications WHERE dispatched = 0 ORDER BY seq ASC");
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt.query_map([], from_row)?;
    let mut notifications = Vec::new();
    for row in rows {
        notifications.push(row?);
    }
    Ok(notifications)
}

pub fn mark_read(conn: &Connection, id: &EntityId) -> Result<bool, StoreError> {
    let changed = conn.execute(
        "UPDATE notifications SET read = 1 WHERE id = ?1",
        params![id],
    )?;
    Ok(changed == 1)
}

pub fn mark_dispatched(conn: &Connection, id: &EntityId) -> Result<bool, StoreError> {
    let changed = conn.execute(
        "UPDATE notifications SET dispatched = 1 WHERE id = ?1",
        params![id],
    )?;
    Ok(changed == 1)
}
