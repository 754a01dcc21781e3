//! Shared helper functions for CLI commands

use miette::{miette, IntoDiagnostic, Result};
use serde_json::Value;
use std::io::{self, BufRead, IsTerminal};

use crate::cli::GlobalOpts;
use crate::core::identity::EntityId;
use crate::core::project::Project;
use crate::core::workflow::{Actor, WorkflowEngine};

/// Open the engine for the project containing the current directory
pub fn open_engine() -> Result<WorkflowEngine> {
    let project = Project::discover()?;
    let config = project.config()?;
    let store = project.open_store(&config)?;
    Ok(WorkflowEngine::new(store, &config))
}

/// The operator named by `--actor` or `LOOM_ACTOR`
pub fn require_actor(global: &GlobalOpts) -> Result<Actor> {
    let id = global
        .actor
        .as_deref()
        .ok_or_else(|| miette!("no actor given; pass --actor or set LOOM_ACTOR"))?;
    Ok(Actor::new(id)?)
}

pub fn parse_id(s: &str) -> Result<EntityId> {
    s.trim().parse::<EntityId>().into_diagnostic()
}

/// Parse an inline JSON argument; `@path` reads it from a file
pub fn parse_json_arg(arg: Option<&str>) -> Result<Value> {
    let Some(raw) = arg else {
        return Ok(Value::Null);
    };
    let text = match raw.strip_prefix('@') {
        Some(path) => std::fs::read_to_string(path).into_diagnostic()?,
        None => raw.to_string(),
    };
    serde_json::from_str(&text).map_err(|e| miette!("invalid JSON: {}", e))
}

/// Format an EntityId for display, truncating if too long
///
/// IDs longer than 16 characters are truncated to 13 chars with "..." suffix.
pub fn format_short_id(id: &EntityId) -> String {
    let s = id.to_string();
    if s.len() > 16 {
        format!("{}...", &s[..13])
    } else {
        s
    }
}

/// Truncate a string to max_len, adding "..." if truncated
pub fn truncate_str(s: &str, max_len: usize) -> String {
    if s.chars().count() <= max_len {
        s.to_string()
    } else {
        let kept: String = s.chars().take(max_len.saturating_sub(3)).collect();
        format!("{}...", kept)
    }
}

/// Read entity IDs from stdin if it is piped
///
/// Enables pipelines like:
/// ```bash
/// loom request list --type cutting -o id | loom request batch start
/// ```
pub fn read_ids_from_stdin() -> Option<Vec<String>> {
    let stdin = io::stdin();
    if stdin.is_terminal() {
        return None;
    }

    let ids: Vec<String> = stdin
        .lock()
        .lines()
        .map_while(|line| line.ok())
        .map(|line| line.trim().to_string())
        .filter(|line| !line.is_empty())
        .collect();

    if ids.is_empty() {
        None
    } else {
        Some(ids)
    }
}
