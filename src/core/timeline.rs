//! Timeline recorder - append-only audit trail per request
//!
//! Entries are immutable once written (the schema rejects UPDATE and DELETE
//! on the table). Insertion order defines the authoritative step history,
//! which `is_transition_allowed` checks against a named-step graph for
//! pipelines that use sub-steps beyond the basic status enum.

use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension, Row};
use std::collections::HashMap;

use crate::core::error::WorkflowError;
use crate::core::identity::{EntityId, EntityPrefix};
use crate::core::store::{Json, StoreError};
use crate::entities::timeline::{steps, NewTimelineEntry, TimelineEntry};

/// Allowed next steps keyed by the last recorded step
pub type StepGraph = HashMap<String, Vec<String>>;

const COLUMNS: &str = "id, request_id, step, status, operator, metadata_json, created_at";

fn from_row(row: &Row<'_>) -> rusqlite::Result<TimelineEntry> {
    Ok(TimelineEntry {
        id: row.get("id")?,
        request_id: row.get("request_id")?,
        step: row.get("step")?,
        status: row.get("status")?,
        operator: row.get("operator")?,
        metadata: row.get::<_, Json<_>>("metadata_json")?.0,
        created_at: row.get("created_at")?,
    })
}

/// Pure step-graph check
///
/// With no history only a move out of `CREATED` is allowed; otherwise the
/// last recorded step must list `to_step` as a successor.
pub fn step_allowed(last_step: Option<&str>, from_step: &str, to_step: &str, allowed: &StepGraph) -> bool {
    match last_step {
        None => from_step == steps::CREATED,
        Some(last) => allowed
            .get(last)
            .is_some_and(|next| next.iter().any(|s| s == to_step)),
    }
}

pub struct TimelineRecorder<'c> {
    conn: &'c Connection,
}

impl<'c> TimelineRecorder<'c> {
    pub fn new(conn: &'c Connection) -> Self {
        Self { conn }
    }

    /// Append an entry; fails with NotFound if the request does not exist
    pub fn append(
        &self,
        request_id: &EntityId,
        entry: NewTimelineEntry,
    ) -> Result<TimelineEntry, WorkflowError> {
        let exists: Option<i64> = self
            .conn
            .query_row(
                "SELECT 1 FROM requests WHERE id = ?1",
                params![request_id],
                |row| row.get(0),
            )
            .optional()?;
        if exists.is_none() {
            return Err(WorkflowError::not_found("request", request_id));
        }

        let written = TimelineEntry {
            id: EntityId::new(EntityPrefix::Tl),
            request_id: *request_id,
            step: entry.step,
            status: entry.status,
            operator: entry.operator,
            metadata: entry.metadata,
            created_at: Utc::now(),
        };
        self.conn.execute(
            r#"
INSERT INTO timeline (id, request_id, step, status, operator, metadata_json, created_at)
VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
"#,
            params![
                written.id,
                written.request_id,
                written.step,
                written.status,
                written.operator,
                Json(&written.metadata),
                written.created_at,
            ],
        )?;
        Ok(written)
    }

    /// All entries for a request, oldest first
    pub fn entries(&self, request_id: &EntityId) -> Result<Vec<TimelineEntry>, StoreError> {
        let sql = format!("SELECT {COLUMNS} FROM timeline WHERE request_id = ?1 ORDER BY seq ASC");
        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt.query_map(params![request_id], from_row)?;
        let mut entries = Vec::new();
        for row in rows {
            entries.push(row?);
        }
        Ok(entries)
    }

    pub fn last_step(&self, request_id: &EntityId) -> Result<Option<TimelineEntry>, StoreError> {
        let sql = format!(
            "SELECT {COLUMNS} FROM timeline WHERE request_id = ?1 ORDER BY seq DESC LIMIT 1"
        );
        Ok(self
            .conn
            .query_row(&sql, params![request_id], from_row)
            .optional()?)
    }

    /// Advisory check against a named-step graph
    pub fn is_transition_allowed(
        &self,
        request_id: &EntityId,
        from_step: &str,
        to_step: &str,
        allowed: &StepGraph,
    ) -> Result<bool, StoreError> {
        let last = self.last_step(request_id)?;
        Ok(step_allowed(
            last.as_ref().map(|e| e.step.as_str()),
            from_step,
            to_step,
            allowed,
        ))
    }
}
