//! Request repository - CRUD and queries over request rows
//!
//! This layer holds no business rules. Once a workflow starts, the engine is
//! the only writer that should touch a request's status or metadata; the
//! repository itself does not enforce that.

use chrono::{DateTime, Utc};
use rusqlite::types::Value;
use rusqlite::{params, params_from_iter, Connection, OptionalExtension, Row};
use serde::Serialize;

use crate::core::error::WorkflowError;
use crate::core::identity::{EntityId, IdempotencyKey};
use crate::core::metadata::StageMetadata;
use crate::core::store::{batches, items, orders, Json, StoreError};
use crate::core::timeline::TimelineRecorder;
use crate::entities::batch::ProductionBatch;
use crate::entities::item::InventoryItem;
use crate::entities::order::Order;
use crate::entities::request::{Request, RequestStatus, RequestType};
use crate::entities::timeline::TimelineEntry;

const COLUMNS: &str = "id, request_type, status, assigned_to, item_id, order_id, batch_id, metadata_json, created_at, updated_at";

fn from_row(row: &Row<'_>) -> rusqlite::Result<Request> {
    Ok(Request {
        id: row.get("id")?,
        request_type: row.get("request_type")?,
        status: row.get("status")?,
        assigned_to: row.get("assigned_to")?,
        item_id: row.get("item_id")?,
        order_id: row.get("order_id")?,
        batch_id: row.get("batch_id")?,
        metadata: row.get::<_, Json<_>>("metadata_json")?.0,
        created_at: row.get("created_at")?,
        updated_at: row.get("updated_at")?,
    })
}

/// Filter for listing requests; unset fields match everything
#[derive(Debug, Clone, Default)]
pub struct RequestFilter {
    pub request_type: Option<RequestType>,
    pub status: Option<RequestStatus>,
    pub assigned_to: Option<String>,
    pub item_id: Option<EntityId>,
    pub batch_id: Option<EntityId>,
    pub limit: Option<usize>,
}

/// A request together with its eagerly loaded relations
#[derive(Debug, Clone, Serialize)]
pub struct RequestDetails {
    pub request: Request,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub item: Option<InventoryItem>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub order: Option<Order>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub batch: Option<ProductionBatch>,
    pub timeline: Vec<TimelineEntry>,
}

/// Partial update applied by [`RequestRepository::update`]
#[derive(Debug, Clone, Default)]
pub struct RequestUpdate {
    pub status: Option<RequestStatus>,
    pub assigned_to: Option<String>,
    /// Merged into the stored metadata using the stage's merge rules
    pub metadata: Option<StageMetadata>,
}

pub struct RequestRepository<'c> {
    conn: &'c Connection,
}

impl<'c> RequestRepository<'c> {
    pub fn new(conn: &'c Connection) -> Self {
        Self { conn }
    }

    pub fn create(&self, request: &Request) -> Result<(), StoreError> {
        self.conn.execute(
            r#"
INSERT INTO requests (id, request_type, status, assigned_to, item_id, order_id, batch_id, metadata_json, created_at, updated_at)
VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)
"#,
            params![
                request.id,
                request.request_type,
                request.status,
                request.assigned_to,
                request.item_id,
                request.order_id,
                request.batch_id,
                Json(&request.metadata),
                request.created_at,
                request.updated_at,
            ],
        )?;
        Ok(())
    }

    pub fn find_by_id(&self, id: &EntityId) -> Result<Option<Request>, StoreError> {
        let sql = format!("SELECT {COLUMNS} FROM requests WHERE id = ?1");
        Ok(self.conn.query_row(&sql, params![id], from_row).optional()?)
    }

    /// Load a request with its item, order, batch and timeline
    pub fn find_details(&self, id: &EntityId) -> Result<Option<RequestDetails>, StoreError> {
        let Some(request) = self.find_by_id(id)? else {
            return Ok(None);
        };
        let item = match &request.item_id {
            Some(item_id) => items::get(self.conn, item_id)?,
            None => None,
        };
        let order = match &request.order_id {
            Some(order_id) => orders::get(self.conn, order_id)?,
            None => None,
        };
        let batch = match &request.batch_id {
            Some(batch_id) => batches::get(self.conn, batch_id)?,
            None => None,
        };
        let timeline = TimelineRecorder::new(self.conn).entries(&request.id)?;
        Ok(Some(RequestDetails {
            request,
            item,
            order,
            batch,
            timeline,
        }))
    }

    pub fn find_many(&self, filter: &RequestFilter) -> Result<Vec<Request>, StoreError> {
        let mut clauses: Vec<&str> = Vec::new();
        let mut values: Vec<Value> = Vec::new();

        if let Some(t) = filter.request_type {
            clauses.push("request_type = ?");
            values.push(Value::Text(t.to_string()));
        }
        if let Some(s) = filter.status {
            clauses.push("status = ?");
            values.push(Value::Text(s.to_string()));
        }
        if let Some(ref assignee) = filter.assigned_to {
            clauses.push("assigned_to = ?");
            values.push(Value::Text(assignee.clone()));
        }
        if let Some(item_id) = filter.item_id {
            clauses.push("item_id = ?");
            values.push(Value::Text(item_id.to_string()));
        }
        if let Some(batch_id) = filter.batch_id {
            clauses.push("batch_id = ?");
            values.push(Value::Text(batch_id.to_string()));
        }

        let mut sql = format!("SELECT {COLUMNS} FROM requests");
        if !clauses.is_empty() {
            sql.push_str(" WHERE ");
            sql.push_str(&clauses.join(" AND "));
        }
        sql.push_str(" ORDER BY created_at ASC, id ASC");
        if let Some(limit) = filter.limit {
            sql.push_str(&format!(" LIMIT {}", limit));
        }

        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt.query_map(params_from_iter(values.iter()), from_row)?;
        let mut requests = Vec::new();
        for row in rows {
            requests.push(row?);
        }
        Ok(requests)
    }

    /// Active (PENDING or IN_PROGRESS) requests of one type for an item
    pub fn active_for_item(
        &self,
        item_id: &EntityId,
        request_type: RequestType,
    ) -> Result<Vec<Request>, StoreError> {
        let sql = format!(
            "SELECT {COLUMNS} FROM requests WHERE item_id = ?1 AND request_type = ?2 AND status IN ('PENDING', 'IN_PROGRESS') ORDER BY created_at ASC"
        );
        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt.query_map(params![item_id, request_type], from_row)?;
        let mut requests = Vec::new();
        for row in rows {
            requests.push(row?);
        }
        Ok(requests)
    }

    /// Apply a partial update, merging metadata with the stage rules
    pub fn update(
        &self,
        id: &EntityId,
        update: RequestUpdate,
        now: DateTime<Utc>,
    ) -> Result<Request, WorkflowError> {
        let mut request = self
            .find_by_id(id)?
            .ok_or_else(|| WorkflowError::not_found("request", id))?;
        if let Some(status) = update.status {
            request.status = status;
        }
        if let Some(assignee) = update.assigned_to {
            request.assigned_to = Some(assignee);
        }
        if let Some(patch) = update.metadata {
            request.metadata.stage.merge(patch)?;
        }
        request.updated_at = now;
        self.save(&request)?;
        Ok(request)
    }

    /// Write status, assignee, item link and metadata unconditionally
    pub fn save(&self, request: &Request) -> Result<(), StoreError> {
        self.conn.execute(
            r#"
UPDATE requests SET status = ?2, assigned_to = ?3, metadata_json = ?4, updated_at = ?5, item_id = ?6
WHERE id = ?1
"#,
            params![
                request.id,
                request.status,
                request.assigned_to,
                Json(&request.metadata),
                request.updated_at,
                request.item_id,
            ],
        )?;
        Ok(())
    }

    /// Write only if the stored status still equals `expected`
    ///
    /// Returns false when another writer got there first.
    pub fn save_if_status(
        &self,
        request: &Request,
        expected: RequestStatus,
    ) -> Result<bool, StoreError> {
        let changed = self.conn.execute(
            r#"
UPDATE requests SET status = ?2, assigned_to = ?3, metadata_json = ?4, updated_at = ?5, item_id = ?6
WHERE id = ?1 AND status = ?7
"#,
            params![
                request.id,
                request.status,
                request.assigned_to,
                Json(&request.metadata),
                request.updated_at,
                request.item_id,
                expected,
            ],
        )?;
        Ok(changed == 1)
    }

    pub fn find_by_idempotency_key(
        &self,
        key: &IdempotencyKey,
    ) -> Result<Option<Request>, StoreError> {
        let request_id: Option<EntityId> = self
            .conn
            .query_row(
                "SELECT request_id FROM idempotency_keys WHERE key = ?1",
                params![key.as_str()],
                |row| row.get(0),
            )
            .optional()?;
        match request_id {
            Some(id) => self.find_by_id(&id),
            None => Ok(None),
        }
    }

    pub fn remember_idempotency_key(
        &self,
        key: &IdempotencyKey,
        request_id: &EntityId,
        now: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        self.conn.execute(
            "INSERT INTO idempotency_keys (key, request_id, created_at) VALUES (?1, ?2, ?3)",
            params![key.as_str(), request_id, now],
        )?;
        Ok(())
    }
}
