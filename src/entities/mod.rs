//! Entity type definitions

pub mod batch;
pub mod bin;
pub mod item;
pub mod notification;
pub mod order;
pub mod request;
pub mod timeline;

pub use batch::{BatchStatus, ProductionBatch};
pub use bin::Bin;
pub use item::{InventoryItem, ItemStage, ItemSubStatus};
pub use notification::Notification;
pub use order::Order;
pub use request::{Action, Request, RequestStatus, RequestType};
pub use timeline::TimelineEntry;
