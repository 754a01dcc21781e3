//! Notification dispatch seam
//!
//! Notification rows are written inside the workflow transaction. After the
//! commit the engine hands each one to a [`NotificationDispatcher`]; a failed
//! hand-off leaves the row undispatched so it can be retried later.

use serde_json::Value;
use thiserror::Error;

#[derive(Debug, Error)]
#[error("notification dispatch failed: {0}")]
pub struct DispatchError(pub String);

/// Delivers operator notifications to an external channel
pub trait NotificationDispatcher: Send + Sync {
    fn enqueue(&self, user_id: &str, message: &str, metadata: &Value) -> Result<(), DispatchError>;
}

/// Writes notifications to the log; the inbox itself lives in the store
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingDispatcher;

impl NotificationDispatcher for TracingDispatcher {
    fn enqueue(&self, user_id: &str, message: &str, _metadata: &Value) -> Result<(), DispatchError> {
        tracing::info!(user = user_id, "{}", message);
        Ok(())
    }
}
