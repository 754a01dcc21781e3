//! Order rows

use rusqlite::{params, Connection, OptionalExtension};

use super::StoreError;
use crate::core::identity::EntityId;
use crate::entities::order::Order;

pub fn insert(conn: &Connection, order: &Order) -> Result<(), StoreError> {
    conn.execute(
        "INSERT INTO orders (id, order_number, created_at) VALUES (?1, ?2, ?3)",
        params![order.id, order.order_number, order.created_at],
    )?;
    Ok(())
}

pub fn get(conn: &Connection, id: &EntityId) -> Result<Option<Order>, StoreError> {
    Ok(conn
        .query_row(
            "SELECT id, order_number, created_at FROM orders WHERE id = ?1",
            params![id],
            |row| {
                Ok(Order {
                    id: row.get(0)?,
                    order_number: row.get(1)?,
                    created_at: row.get(2)?,
                })
            },
        )
        .optional()?)
}
