//! Loomline: request lifecycle and workflow engine for garment manufacturing
//!
//! Tracks production requests (pattern, cutting, sew, wash, QC, finishing,
//! packing, move, recovery) through a validated state machine backed by a
//! transactional SQLite store.

pub mod cli;
pub mod core;
pub mod entities;
