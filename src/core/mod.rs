//! Core module - fundamental types, the store and the workflow engine

pub mod config;
pub mod entity;
pub mod error;
pub mod identity;
pub mod metadata;
pub mod notify;
pub mod payload;
pub mod project;
pub mod repository;
pub mod sku;
pub mod store;
pub mod timeline;
pub mod validators;
pub mod workflow;

pub use config::Config;
pub use entity::Entity;
pub use error::{ErrorKind, FailureCode, WorkflowError};
pub use identity::{EntityId, EntityPrefix, IdParseError, IdempotencyKey};
pub use notify::{DispatchError, NotificationDispatcher, TracingDispatcher};
pub use project::{Project, ProjectError};
pub use repository::{RequestDetails, RequestFilter, RequestRepository};
pub use sku::Sku;
pub use store::{Store, StoreError, StoreOptions};
pub use timeline::TimelineRecorder;
pub use validators::{StepValidator, ValidatorRegistry};
pub use workflow::{Actor, BatchOutcome, NewRequest, Outcome, SideEffect, WorkflowEngine};
