//! Workflow engine - the request state machine
//!
//! Every public mutation runs inside one IMMEDIATE store transaction:
//! load the request, check the action against its status, parse the typed
//! payload, run the registered validators, then write the request, item,
//! bin, spawned requests, timeline, events and notification rows together.
//! Any error drops the transaction, so callers see full success or nothing.
//!
//! Notification rows are handed to the [`NotificationDispatcher`] only after
//! commit. A failed hand-off is logged and reported as a side effect; it
//! never undoes the transition.

use chrono::{DateTime, Utc};
use rusqlite::Connection;
use serde::Serialize;
use serde_json::{json, Value};
use std::collections::HashSet;
use std::fmt;
use tracing::{debug, info, warn};

use crate::core::config::{Config, WorkflowSettings};
use crate::core::error::{FailureCode, WorkflowError};
use crate::core::identity::{EntityId, IdempotencyKey};
use crate::core::metadata::{
    CuttingMetadata, FinishingMetadata, ItemValidation, Merge, MoveMetadata, PackingMetadata,
    QcMetadata, RecoveryMetadata, RequestMetadata, Resolution, SewMetadata, SkuLine,
    StageMetadata, Stamps, WashMetadata,
};
use crate::core::notify::{NotificationDispatcher, TracingDispatcher};
use crate::core::payload::ActionPayload;
use crate::core::repository::{RequestDetails, RequestFilter, RequestRepository};
use crate::core::sku::Sku;
use crate::core::store::{
    batches, bins, events, items, notifications, orders, EventRefs, EventType, Store,
};
use crate::core::timeline::TimelineRecorder;
use crate::core::validators::{
    validate_bin_for, validate_destination, validate_item_scan, ValidationContext,
    ValidatorRegistry,
};
use crate::entities::batch::{BatchStatus, ProductionBatch};
use crate::entities::bin::Bin;
use crate::entities::item::{InventoryItem, ItemStage, ItemSubStatus};
use crate::entities::notification::Notification;
use crate::entities::order::Order;
use crate::entities::request::{Action, Request, RequestStatus, RequestType};
use crate::entities::timeline::{step_for_action, steps, NewTimelineEntry, TimelineEntry};

const ACTIONS: [Action; 7] = [
    Action::Assign,
    Action::Start,
    Action::Complete,
    Action::Fail,
    Action::ValidateItem,
    Action::RecordDefects,
    Action::RecordMeasurements,
];

/// Operator identity passed explicitly into every mutating call
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Actor(String);

impl Actor {
    pub fn new(id: impl Into<String>) -> Result<Self, WorkflowError> {
        let id = id.into();
        let trimmed = id.trim();
        if trimmed.is_empty() {
            return Err(WorkflowError::validation("actor must not be empty"));
        }
        Ok(Self(trimmed.to_string()))
    }

    pub fn id(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Actor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Something the engine did besides updating the request itself
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SideEffect {
    RequestCreated {
        request_id: EntityId,
        request_type: RequestType,
    },
    RequestSpawned {
        request_id: EntityId,
        request_type: RequestType,
        parent_id: EntityId,
    },
    ItemCreated {
        item_id: EntityId,
        qr_code: String,
    },
    ItemUpdated {
        item_id: EntityId,
        status1: ItemStage,
        status2: ItemSubStatus,
    },
    ItemMoved {
        item_id: EntityId,
        from_bin_id: Option<EntityId>,
        to_bin_id: Option<EntityId>,
    },
    SkuRewritten {
        item_id: EntityId,
        from: String,
        to: String,
    },
    TimelineAppended {
        request_id: EntityId,
        step: String,
    },
    BatchUpdated {
        batch_id: EntityId,
        status: BatchStatus,
    },
    NotificationQueued {
        notification_id: EntityId,
        user_id: String,
    },
    NotificationSent {
        notification_id: EntityId,
    },
    NotificationFailed {
        notification_id: EntityId,
        error: String,
    },
}

/// Result of a single create or transition
#[derive(Debug, Clone, Serialize)]
pub struct Outcome {
    pub request: Request,
    pub side_effects: Vec<SideEffect>,
}

impl Outcome {
    /// Ids of downstream requests created by this call
    pub fn spawned(&self) -> Vec<EntityId> {
        spawned_ids(&self.side_effects)
    }
}

/// Result of an all-or-nothing batch transition
#[derive(Debug, Clone, Serialize)]
pub struct BatchOutcome {
    pub requests: Vec<Request>,
    pub side_effects: Vec<SideEffect>,
}

impl BatchOutcome {
    pub fn spawned(&self) -> Vec<EntityId> {
        spawned_ids(&self.side_effects)
    }
}

fn spawned_ids(side_effects: &[SideEffect]) -> Vec<EntityId> {
    side_effects
        .iter()
        .filter_map(|fx| match fx {
            SideEffect::RequestSpawned { request_id, .. } => Some(*request_id),
            _ => None,
        })
        .collect()
}

/// Caller input for `create_request`
#[derive(Debug, Clone)]
pub struct NewRequest {
    pub request_type: RequestType,
    pub item_id: Option<EntityId>,
    pub order_id: Option<EntityId>,
    pub batch_id: Option<EntityId>,
    pub assigned_to: Option<String>,
    /// Stage metadata as JSON; `null` for none
    pub metadata: Value,
    pub idempotency_key: Option<IdempotencyKey>,
}

impl NewRequest {
    pub fn new(request_type: RequestType) -> Self {
        Self {
            request_type,
            item_id: None,
            order_id: None,
            batch_id: None,
            assigned_to: None,
            metadata: Value::Null,
            idempotency_key: None,
        }
    }

    /// Content hash of this creation intent
    pub fn intent_key(&self) -> IdempotencyKey {
        let opt = |id: &Option<EntityId>| id.map(|id| id.to_string()).unwrap_or_default();
        IdempotencyKey::derive([
            self.request_type.to_string(),
            opt(&self.item_id),
            opt(&self.order_id),
            opt(&self.batch_id),
            self.assigned_to.clone().unwrap_or_default(),
            self.metadata.to_string(),
        ])
    }
}

/// Where an action stands for a given status
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Guard {
    Allowed,
    Unsupported,
    AlreadyProcessed,
    Invalid,
}

fn guard(request_type: RequestType, status: RequestStatus, action: Action) -> Guard {
    if status.is_terminal() {
        let repeated = action == Action::Complete
            || (action == Action::Fail && status == RequestStatus::Failed);
        return if repeated {
            Guard::AlreadyProcessed
        } else {
            Guard::Invalid
        };
    }
    let supported = match action {
        Action::ValidateItem => request_type == RequestType::Wash,
        Action::RecordDefects | Action::RecordMeasurements => request_type == RequestType::Qc,
        _ => true,
    };
    if !supported {
        return Guard::Unsupported;
    }
    let allowed = match action {
        Action::Assign | Action::Fail => true,
        Action::Start | Action::ValidateItem => status == RequestStatus::Pending,
        Action::RecordDefects | Action::RecordMeasurements => status == RequestStatus::InProgress,
        Action::Complete => status == RequestStatus::InProgress || !request_type.requires_start(),
    };
    if allowed {
        Guard::Allowed
    } else {
        Guard::Invalid
    }
}

/// Check an action against the request's type and current status
pub fn check_action(request: &Request, action: Action) -> Result<(), WorkflowError> {
    match guard(request.request_type, request.status, action) {
        Guard::Allowed => Ok(()),
        Guard::Unsupported => Err(WorkflowError::validation(format!(
            "action {} is not defined for {} requests",
            action, request.request_type
        ))),
        Guard::AlreadyProcessed => Err(WorkflowError::AlreadyProcessed {
            request_id: request.id,
            status: request.status,
        }),
        Guard::Invalid => Err(WorkflowError::InvalidTransition {
            request_id: request.id,
            status: request.status,
            action,
        }),
    }
}

/// Actions that would pass the state check right now
pub fn allowed_actions(request_type: RequestType, status: RequestStatus) -> Vec<Action> {
    ACTIONS
        .into_iter()
        .filter(|a| guard(request_type, status, *a) == Guard::Allowed)
        .collect()
}

/// Side effects and post-commit notifications gathered during one call
#[derive(Default)]
struct Effects {
    side_effects: Vec<SideEffect>,
    outbox: Vec<Notification>,
}

impl Effects {
    fn push(&mut self, fx: SideEffect) {
        self.side_effects.push(fx);
    }
}

pub struct WorkflowEngine {
    store: Store,
    settings: WorkflowSettings,
    dispatch_enabled: bool,
    validators: ValidatorRegistry,
    dispatcher: Box<dyn NotificationDispatcher>,
}

impl WorkflowEngine {
    pub fn new(store: Store, config: &Config) -> Self {
        Self {
            store,
            settings: config.workflow.clone(),
            dispatch_enabled: config.notifications.enabled,
            validators: ValidatorRegistry::defaults(&config.workflow),
            dispatcher: Box::new(TracingDispatcher),
        }
    }

    pub fn with_dispatcher(mut self, dispatcher: impl NotificationDispatcher + 'static) -> Self {
        self.dispatcher = Box::new(dispatcher);
        self
    }

    pub fn with_validators(mut self, validators: ValidatorRegistry) -> Self {
        self.validators = validators;
        self
    }

    pub fn store(&self) -> &Store {
        &self.store
    }

    pub fn settings(&self) -> &WorkflowSettings {
        &self.settings
    }

    // =========================================================================
    // Requests
    // =========================================================================

    /// Create a PENDING request
    ///
    /// With an idempotency key that was already used, the request created the
    /// first time is returned and nothing is written.
    pub fn create_request(
        &self,
        new: NewRequest,
        actor: Option<&Actor>,
    ) -> Result<Outcome, WorkflowError> {
        let tx = self.store.begin()?;
        let repo = RequestRepository::new(&tx);

        if let Some(key) = &new.idempotency_key {
            if let Some(existing) = repo.find_by_idempotency_key(key)? {
                debug!(request = %existing.id, key = %key, "create replayed by idempotency key");
                return Ok(Outcome {
                    request: existing,
                    side_effects: Vec::new(),
                });
            }
        }

        let stage = StageMetadata::from_value(new.request_type, &new.metadata)?;
        match &stage {
            StageMetadata::Pattern(p) if !p.skus.is_empty() => {
                check_sku_lines(&p.skus, self.settings.max_fan_out_units)?;
            }
            StageMetadata::Cutting(c) if !c.skus.is_empty() => {
                check_sku_lines(&c.skus, self.settings.max_fan_out_units)?;
            }
            _ => {}
        }
        if new.request_type.requires_item() && new.item_id.is_none() {
            return Err(WorkflowError::validation(format!(
                "{} requests need an item",
                new.request_type
            )));
        }
        if let Some(assignee) = &new.assigned_to {
            if assignee.trim().is_empty() {
                return Err(WorkflowError::validation("assigned_to must not be empty"));
            }
        }
        if let Some(id) = &new.item_id {
            items::get(&tx, id)?.ok_or_else(|| WorkflowError::not_found("item", id))?;
        }
        if let Some(id) = &new.order_id {
            orders::get(&tx, id)?.ok_or_else(|| WorkflowError::not_found("order", id))?;
        }
        if let Some(id) = &new.batch_id {
            batches::get(&tx, id)?.ok_or_else(|| WorkflowError::not_found("batch", id))?;
        }

        let now = Utc::now();
        let mut request = Request::new(new.request_type, RequestMetadata::new(stage));
        request.item_id = new.item_id;
        request.order_id = new.order_id;
        request.batch_id = new.batch_id;
        request.assigned_to = new.assigned_to.map(|a| a.trim().to_string());

        let mut fx = Effects::default();
        insert_request(&tx, &request, actor, None, &mut fx)?;
        if let (Some(item_id), Some(stage)) = (&request.item_id, request.request_type.item_stage()) {
            set_item_status(&tx, item_id, stage, ItemSubStatus::Pending, now, &mut fx)?;
        }
        if let Some(batch_id) = &request.batch_id {
            refresh_batch(&tx, batch_id, now, &mut fx)?;
        }
        if let Some(key) = &new.idempotency_key {
            repo.remember_idempotency_key(key, &request.id, now)?;
        }
        tx.commit()?;

        info!(request = %request.id, request_type = %request.request_type, "request created");
        let mut side_effects = fx.side_effects;
        self.dispatch(fx.outbox, &mut side_effects);
        Ok(Outcome {
            request,
            side_effects,
        })
    }

    /// Apply one action to one request
    #[tracing::instrument(skip(self, actor, payload), fields(actor = %actor))]
    pub fn transition(
        &self,
        request_id: &EntityId,
        action: Action,
        actor: &Actor,
        payload: &Value,
    ) -> Result<Outcome, WorkflowError> {
        let tx = self.store.begin()?;
        let mut fx = Effects::default();
        let request = self.apply(&tx, request_id, action, actor, payload, &mut fx)?;
        tx.commit()?;

        info!(request = %request.id, status = %request.status, "transition committed");
        let mut side_effects = fx.side_effects;
        self.dispatch(fx.outbox, &mut side_effects);
        Ok(Outcome {
            request,
            side_effects,
        })
    }

    /// Apply the same action to several requests, all or nothing
    ///
    /// The first request that fails its state check or validators aborts the
    /// whole batch; e.g. starting N cuttings fails unless all N are PENDING.
    #[tracing::instrument(skip(self, request_ids, actor, payload), fields(count = request_ids.len(), actor = %actor))]
    pub fn batch_transition(
        &self,
        request_ids: &[EntityId],
        action: Action,
        actor: &Actor,
        payload: &Value,
    ) -> Result<BatchOutcome, WorkflowError> {
        if request_ids.is_empty() {
            return Err(WorkflowError::validation(
                "batch transition needs at least one request",
            ));
        }
        let mut seen = HashSet::new();
        for id in request_ids {
            if !seen.insert(id) {
                return Err(WorkflowError::validation(format!(
                    "request {} is listed more than once",
                    id
                )));
            }
        }

        let tx = self.store.begin()?;
        let mut fx = Effects::default();
        let mut requests = Vec::with_capacity(request_ids.len());
        for id in request_ids {
            requests.push(self.apply(&tx, id, action, actor, payload, &mut fx)?);
        }
        tx.commit()?;

        info!(count = requests.len(), %action, "batch transition committed");
        let mut side_effects = fx.side_effects;
        self.dispatch(fx.outbox, &mut side_effects);
        Ok(BatchOutcome {
            requests,
            side_effects,
        })
    }

    /// Request with its item, order, batch and timeline
    pub fn get_request(&self, request_id: &EntityId) -> Result<RequestDetails, WorkflowError> {
        RequestRepository::new(self.store.conn())
            .find_details(request_id)?
            .ok_or_else(|| WorkflowError::not_found("request", request_id))
    }

    pub fn list_requests(&self, filter: &RequestFilter) -> Result<Vec<Request>, WorkflowError> {
        Ok(RequestRepository::new(self.store.conn()).find_many(filter)?)
    }

    pub fn timeline(&self, request_id: &EntityId) -> Result<Vec<TimelineEntry>, WorkflowError> {
        let conn = self.store.conn();
        if RequestRepository::new(conn).find_by_id(request_id)?.is_none() {
            return Err(WorkflowError::not_found("request", request_id));
        }
        Ok(TimelineRecorder::new(conn).entries(request_id)?)
    }

    // =========================================================================
    // Floor data: bins, items, orders, batches
    // =========================================================================

    pub fn add_bin(&self, bin: Bin) -> Result<Bin, WorkflowError> {
        if bin.code.trim().is_empty() {
            return Err(WorkflowError::validation("bin code must not be empty"));
        }
        if bin.current_count > bin.capacity {
            return Err(WorkflowError::validation(format!(
                "bin {} count {} exceeds capacity {}",
                bin.code, bin.current_count, bin.capacity
            )));
        }
        let tx = self.store.begin()?;
        if bins::find_by_code(&tx, &bin.code)?.is_some() {
            return Err(WorkflowError::validation(format!(
                "bin code {} is already in use",
                bin.code
            )));
        }
        bins::insert(&tx, &bin)?;
        tx.commit()?;
        info!(bin = %bin.id, code = %bin.code, "bin added");
        Ok(bin)
    }

    /// Take a bin out of service or bring it back; occupancy is untouched
    pub fn set_bin_active(&self, key: &str, active: bool) -> Result<Bin, WorkflowError> {
        let tx = self.store.begin()?;
        let mut bin = bins::resolve(&tx, key)?.ok_or_else(|| WorkflowError::not_found("bin", key))?;
        bins::set_active(&tx, &bin.id, active)?;
        tx.commit()?;
        bin.active = active;
        info!(bin = %bin.id, active, "bin status changed");
        Ok(bin)
    }

    pub fn list_bins(&self) -> Result<Vec<Bin>, WorkflowError> {
        Ok(bins::list(self.store.conn())?)
    }

    /// Intake a garment as available stock, optionally placing it in a bin
    pub fn register_item(
        &self,
        sku: Sku,
        qr_code: &str,
        bin_key: Option<&str>,
    ) -> Result<InventoryItem, WorkflowError> {
        let qr_code = qr_code.trim();
        if qr_code.is_empty() {
            return Err(WorkflowError::validation("qr_code must not be empty"));
        }
        let tx = self.store.begin()?;
        if let Some(existing) = items::find_by_qr(&tx, qr_code)? {
            return Err(WorkflowError::validation(format!(
                "qr_code {} already belongs to {}",
                qr_code, existing.id
            )));
        }

        let mut item = InventoryItem::new(sku, qr_code, ItemStage::Stock, ItemSubStatus::Available);
        if let Some(key) = bin_key {
            let bin = validate_destination(&tx, key, &item.sku, None)?;
            if !bins::occupy(&tx, &bin.id)? {
                return Err(bin_full(&bin));
            }
            item.bin_id = Some(bin.id);
        }
        items::insert(&tx, &item)?;
        events::record(
            &tx,
            EventType::ItemCreated,
            EventRefs {
                item_id: Some(item.id),
                bin_id: item.bin_id,
                ..Default::default()
            },
            json!({"sku": item.sku, "qr_code": item.qr_code}),
        )?;
        tx.commit()?;
        info!(item = %item.id, sku = %item.sku, "item registered");
        Ok(item)
    }

    /// Look an item up by id or QR code
    pub fn get_item(&self, key: &str) -> Result<InventoryItem, WorkflowError> {
        let conn = self.store.conn();
        let found = match key.parse::<EntityId>() {
            Ok(id) => items::get(conn, &id)?,
            Err(_) => items::find_by_qr(conn, key)?,
        };
        found.ok_or_else(|| WorkflowError::not_found("item", key))
    }

    pub fn add_order(&self, order_number: &str) -> Result<Order, WorkflowError> {
        let order_number = order_number.trim();
        if order_number.is_empty() {
            return Err(WorkflowError::validation("order number must not be empty"));
        }
        let order = Order::new(order_number);
        let tx = self.store.begin()?;
        orders::insert(&tx, &order)?;
        tx.commit()?;
        Ok(order)
    }

    pub fn add_batch(&self, sku: &str, quantity: u32) -> Result<ProductionBatch, WorkflowError> {
        if sku.trim().is_empty() {
            return Err(WorkflowError::validation("batch sku must not be empty"));
        }
        if quantity == 0 {
            return Err(WorkflowError::validation("batch quantity must be positive"));
        }
        let batch = ProductionBatch::new(sku.trim(), quantity);
        let tx = self.store.begin()?;
        batches::insert(&tx, &batch)?;
        tx.commit()?;
        Ok(batch)
    }

    pub fn get_batch(&self, batch_id: &EntityId) -> Result<ProductionBatch, WorkflowError> {
        batches::get(self.store.conn(), batch_id)?
            .ok_or_else(|| WorkflowError::not_found("batch", batch_id))
    }

    // =========================================================================
    // Notifications
    // =========================================================================

    pub fn notifications_for(
        &self,
        user_id: &str,
        unread_only: bool,
    ) -> Result<Vec<Notification>, WorkflowError> {
        Ok(notifications::list_for_user(
            self.store.conn(),
            user_id,
            unread_only,
        )?)
    }

    pub fn mark_notification_read(&self, notification_id: &EntityId) -> Result<(), WorkflowError> {
        if !notifications::mark_read(self.store.conn(), notification_id)? {
            return Err(WorkflowError::not_found("notification", notification_id));
        }
        Ok(())
    }

    /// Retry every notification that was never handed off
    pub fn dispatch_pending(&self) -> Result<Vec<SideEffect>, WorkflowError> {
        let pending = notifications::list_undispatched(self.store.conn())?;
        let mut side_effects = Vec::new();
        self.dispatch(pending, &mut side_effects);
        Ok(side_effects)
    }

    fn dispatch(&self, outbox: Vec<Notification>, side_effects: &mut Vec<SideEffect>) {
        if !self.dispatch_enabled {
            return;
        }
        for n in outbox {
            match self.dispatcher.enqueue(&n.user_id, &n.message, &n.metadata) {
                Ok(()) => {
                    if let Err(e) = notifications::mark_dispatched(self.store.conn(), &n.id) {
                        warn!(notification = %n.id, error = %e, "could not mark notification dispatched");
                    }
                    side_effects.push(SideEffect::NotificationSent {
                        notification_id: n.id,
                    });
                }
                Err(e) => {
                    warn!(notification = %n.id, user = %n.user_id, error = %e, "notification dispatch failed");
                    side_effects.push(SideEffect::NotificationFailed {
                        notification_id: n.id,
                        error: e.to_string(),
                    });
                }
            }
        }
    }

    // =========================================================================
    // Transition internals
    // =========================================================================

    fn apply(
        &self,
        conn: &Connection,
        request_id: &EntityId,
        action: Action,
        actor: &Actor,
        raw: &Value,
        fx: &mut Effects,
    ) -> Result<Request, WorkflowError> {
        let repo = RequestRepository::new(conn);
        let request = repo
            .find_by_id(request_id)?
            .ok_or_else(|| WorkflowError::not_found("request", request_id))?;
        check_action(&request, action)?;
        let payload = ActionPayload::parse(request.request_type, action, raw)?;
        self.check_step_graph(conn, &request, action)?;

        let item = match &request.item_id {
            Some(id) => Some(items::get(conn, id)?.ok_or_else(|| WorkflowError::not_found("item", id))?),
            None => None,
        };
        let placed_sku = match (&item, action, request.request_type) {
            (Some(item), Action::Complete, RequestType::Wash) => {
                Some(item.sku.with_wash(&wash_code(&request, &payload)?)?)
            }
            (Some(item), _, _) => Some(item.sku.clone()),
            (None, _, _) => None,
        };
        let ctx = ValidationContext {
            conn,
            request: &request,
            item: item.as_ref(),
            payload: &payload,
            settings: &self.settings,
            placed_sku: placed_sku.as_ref(),
        };
        self.validators.run(request.request_type, action, &ctx)?;

        let now = Utc::now();
        let mut updated = request.clone();
        updated.updated_at = now;

        match &payload {
            ActionPayload::Assign(p) => {
                let assignee = p.assigned_to.trim().to_string();
                notify_assignee(conn, &assignee, &request, fx)?;
                updated.assigned_to = Some(assignee);
            }
            ActionPayload::Start(_) => {
                check_nothing_in_progress(conn, &request)?;
                updated.status = RequestStatus::InProgress;
                updated.metadata.stamps.merge(Stamps {
                    started_at: Some(now),
                    started_by: Some(actor.id().to_string()),
                    ..Default::default()
                });
                if let (Some(item), Some(stage)) = (&item, request.request_type.item_stage()) {
                    set_item_status(conn, &item.id, stage, ItemSubStatus::InProgress, now, fx)?;
                }
            }
            ActionPayload::Fail(p) => {
                updated.status = RequestStatus::Failed;
                updated.metadata.stamps.merge(Stamps {
                    failed_at: Some(now),
                    failure_reason: Some(p.reason.trim().to_string()),
                    ..Default::default()
                });
                if let (Some(item), Some(stage)) = (&item, request.request_type.item_stage()) {
                    if item.status1 == stage {
                        set_item_status(conn, &item.id, stage, ItemSubStatus::Failed, now, fx)?;
                    }
                }
            }
            ActionPayload::ValidateItem(p) => {
                let item = require_item(item.as_ref(), &request)?;
                updated.metadata.stage.merge(StageMetadata::Wash(WashMetadata {
                    item_validation: Some(ItemValidation {
                        validated_at: now,
                        validated_by: actor.id().to_string(),
                        qr_code: p.qr_code.clone(),
                    }),
                    ..Default::default()
                }))?;
                set_item_status(conn, &item.id, ItemStage::Wash, ItemSubStatus::Validated, now, fx)?;
            }
            ActionPayload::RecordDefects(p) => {
                updated.metadata.stage.merge(StageMetadata::Qc(QcMetadata {
                    defects: p.defects.clone(),
                    ..Default::default()
                }))?;
            }
            ActionPayload::RecordMeasurements(p) => {
                updated.metadata.stage.merge(StageMetadata::Qc(QcMetadata {
                    measurements: p.measurements.clone(),
                    visual_inspection: p.visual_inspection.clone(),
                    ..Default::default()
                }))?;
            }
            _ => self.complete(conn, &mut updated, item.as_ref(), &payload, actor, now, fx)?,
        }

        if !repo.save_if_status(&updated, request.status)? {
            let current = repo
                .find_by_id(&request.id)?
                .map(|r| r.status)
                .unwrap_or(request.status);
            return Err(WorkflowError::AlreadyProcessed {
                request_id: request.id,
                status: current,
            });
        }

        let step = step_for_action(action);
        TimelineRecorder::new(conn).append(
            &updated.id,
            NewTimelineEntry::new(step, updated.status, Some(actor.id())).with_metadata(raw.clone()),
        )?;
        fx.push(SideEffect::TimelineAppended {
            request_id: updated.id,
            step: step.to_string(),
        });
        events::record(
            conn,
            EventType::RequestUpdated,
            refs_for(&updated),
            json!({"action": action, "from": request.status, "to": updated.status}),
        )?;
        if let Some(batch_id) = &updated.batch_id {
            refresh_batch(conn, batch_id, now, fx)?;
        }
        debug!(request = %updated.id, %action, from = %request.status, to = %updated.status, "transition applied");
        Ok(updated)
    }

    /// Enforce a configured named-step graph for the request's type
    fn check_step_graph(
        &self,
        conn: &Connection,
        request: &Request,
        action: Action,
    ) -> Result<(), WorkflowError> {
        let Some(graph) = self.settings.step_graphs.get(&request.request_type) else {
            return Ok(());
        };
        let recorder = TimelineRecorder::new(conn);
        let from = recorder
            .last_step(&request.id)?
            .map(|e| e.step)
            .unwrap_or_else(|| steps::CREATED.to_string());
        let to = step_for_action(action);
        if recorder.is_transition_allowed(&request.id, &from, to, graph)? {
            Ok(())
        } else {
            debug!(request = %request.id, from = %from, to, "step graph rejected transition");
            Err(WorkflowError::InvalidTransition {
                request_id: request.id,
                status: request.status,
                action,
            })
        }
    }

    /// Per-type completion effects
    #[allow(clippy::too_many_arguments)]
    fn complete(
        &self,
        conn: &Connection,
        updated: &mut Request,
        item: Option<&InventoryItem>,
        payload: &ActionPayload,
        actor: &Actor,
        now: DateTime<Utc>,
        fx: &mut Effects,
    ) -> Result<(), WorkflowError> {
        let mut stamps = Stamps {
            completed_at: Some(now),
            completed_by: Some(actor.id().to_string()),
            ..Default::default()
        };
        if updated.status == RequestStatus::Pending {
            stamps.started_at = Some(now);
            stamps.started_by = Some(actor.id().to_string());
        }
        updated.metadata.stamps.merge(stamps);
        updated.status = RequestStatus::Completed;
        let parent_id = updated.id;

        match (updated.request_type, payload) {
            (RequestType::Pattern, _) => {
                let lines = match &updated.metadata.stage {
                    StageMetadata::Pattern(p) => p.skus.clone(),
                    _ => Vec::new(),
                };
                check_sku_lines(&lines, self.settings.max_fan_out_units)?;
                let cutting = StageMetadata::Cutting(CuttingMetadata {
                    skus: lines,
                    pattern_request_id: Some(parent_id),
                    units_cut: None,
                });
                spawn(conn, updated, RequestType::Cutting, None, cutting, actor, fx)?;
            }
            (RequestType::Cutting, _) => self.fan_out_sew(conn, updated, actor, fx)?,
            (RequestType::Sew, ActionPayload::CompleteSew(p)) => {
                let item = match item {
                    Some(item) => {
                        if let Some(qr) = &p.qr_code {
                            validate_item_scan(item, qr)?;
                        }
                        item.clone()
                    }
                    None => mint_item(conn, updated, p.qr_code.as_deref(), fx)?,
                };
                updated.item_id = Some(item.id);
                set_item_status(conn, &item.id, ItemStage::Wash, ItemSubStatus::Pending, now, fx)?;
                let wash = StageMetadata::empty(RequestType::Wash);
                spawn(conn, updated, RequestType::Wash, Some(item.id), wash, actor, fx)?;
            }
            (RequestType::Wash, _) => {
                let item = require_item(item, updated)?;
                let code = wash_code(updated, payload)?;
                let key = self.settings.wash_staging_bin.as_deref().ok_or_else(|| {
                    WorkflowError::precondition(
                        FailureCode::BinNotFound,
                        "no wash staging bin configured (workflow.wash_staging_bin)",
                    )
                })?;
                let bin = validate_bin_for(conn, key, item.bin_id.as_ref())?;
                let washed = item.sku.with_wash(&code)?;

                relocate(conn, item, &bin, now, fx)?;
                items::set_sku(conn, &item.id, &washed, now)?;
                fx.push(SideEffect::SkuRewritten {
                    item_id: item.id,
                    from: item.sku.to_string(),
                    to: washed.to_string(),
                });
                updated.metadata.stage.merge(StageMetadata::Wash(WashMetadata {
                    wash_code: Some(code),
                    previous_sku: Some(item.sku.to_string()),
                    staging_bin_id: Some(bin.id),
                    ..Default::default()
                }))?;
                set_item_status(conn, &item.id, ItemStage::Qc, ItemSubStatus::Pending, now, fx)?;
                let qc = StageMetadata::Qc(QcMetadata {
                    source_request_id: Some(parent_id),
                    ..Default::default()
                });
                spawn(conn, updated, RequestType::Qc, Some(item.id), qc, actor, fx)?;
            }
            (RequestType::Qc, ActionPayload::CompleteQc(p)) => {
                let item = require_item(item, updated)?;
                updated.metadata.stage.merge(StageMetadata::Qc(QcMetadata {
                    measurements: p.measurements.clone(),
                    defects: p.defects.clone(),
                    visual_inspection: p.visual_inspection.clone(),
                    passed: p.passed,
                    notes: p.notes.clone(),
                    ..Default::default()
                }))?;
                let (passed, defects) = match &updated.metadata.stage {
                    StageMetadata::Qc(qc) => (qc.passed, qc.defects.clone()),
                    _ => (None, Vec::new()),
                };
                let passed = passed
                    .ok_or_else(|| WorkflowError::validation("passed is required to complete QC"))?;

                if passed {
                    set_item_status(conn, &item.id, ItemStage::Finishing, ItemSubStatus::Pending, now, fx)?;
                    let finishing = StageMetadata::Finishing(FinishingMetadata {
                        qc_request_id: Some(parent_id),
                        notes: None,
                    });
                    spawn(conn, updated, RequestType::Finishing, Some(item.id), finishing, actor, fx)?;
                } else {
                    updated.status = RequestStatus::Failed;
                    updated.metadata.stamps.merge(Stamps {
                        failed_at: Some(now),
                        failure_reason: Some(format!("QC failed with {} defect(s)", defects.len())),
                        ..Default::default()
                    });
                    set_item_status(conn, &item.id, ItemStage::Recovery, ItemSubStatus::Defective, now, fx)?;
                    let recovery = StageMetadata::Recovery(RecoveryMetadata {
                        qc_request_id: Some(parent_id),
                        defects,
                        ..Default::default()
                    });
                    spawn(conn, updated, RequestType::Recovery, Some(item.id), recovery, actor, fx)?;
                }
            }
            (RequestType::Finishing, _) => {
                let item = require_item(item, updated)?;
                if let ActionPayload::CompleteNotes(p) = payload {
                    updated.metadata.stage.merge(StageMetadata::Finishing(FinishingMetadata {
                        notes: p.notes.clone(),
                        ..Default::default()
                    }))?;
                }
                set_item_status(conn, &item.id, ItemStage::Packing, ItemSubStatus::Pending, now, fx)?;
                spawn(
                    conn,
                    updated,
                    RequestType::Packing,
                    Some(item.id),
                    StageMetadata::empty(RequestType::Packing),
                    actor,
                    fx,
                )?;
            }
            (RequestType::Packing, ActionPayload::CompletePacking(p)) => {
                let item = require_item(item, updated)?;
                let bin = validate_destination(conn, &p.bin_id, &item.sku, item.bin_id.as_ref())?;
                relocate(conn, item, &bin, now, fx)?;
                updated.metadata.stage.merge(StageMetadata::Packing(PackingMetadata {
                    bin_id: Some(bin.id),
                    package_ref: p.package_ref.clone(),
                }))?;
                set_item_status(conn, &item.id, ItemStage::Stock, ItemSubStatus::Available, now, fx)?;
            }
            (RequestType::Move, ActionPayload::CompleteMove(p)) => {
                let item = require_item(item, updated)?;
                let stored = match &updated.metadata.stage {
                    StageMetadata::Move(m) => m.to_bin_id.map(|id| id.to_string()),
                    _ => None,
                };
                let key = p
                    .to_bin_id
                    .clone()
                    .or(stored)
                    .ok_or_else(|| WorkflowError::validation("to_bin_id is required"))?;
                let bin = validate_destination(conn, &key, &item.sku, item.bin_id.as_ref())?;
                relocate(conn, item, &bin, now, fx)?;
                updated.metadata.stage.merge(StageMetadata::Move(MoveMetadata {
                    from_bin_id: item.bin_id,
                    to_bin_id: Some(bin.id),
                    reason: p.reason.clone(),
                }))?;
            }
            (RequestType::Recovery, ActionPayload::CompleteRecovery(p)) => {
                let item = require_item(item, updated)?;
                updated.metadata.stage.merge(StageMetadata::Recovery(RecoveryMetadata {
                    resolution: Some(p.resolution),
                    notes: p.notes.clone(),
                    ..Default::default()
                }))?;
                match p.resolution {
                    Resolution::Rework => {
                        set_item_status(conn, &item.id, ItemStage::Qc, ItemSubStatus::Pending, now, fx)?;
                        let qc = StageMetadata::Qc(QcMetadata {
                            source_request_id: Some(parent_id),
                            ..Default::default()
                        });
                        spawn(conn, updated, RequestType::Qc, Some(item.id), qc, actor, fx)?;
                    }
                    Resolution::Scrap => {
                        if let Some(bin_id) = &item.bin_id {
                            bins::release(conn, bin_id)?;
                            items::set_bin(conn, &item.id, None, now)?;
                            fx.push(SideEffect::ItemMoved {
                                item_id: item.id,
                                from_bin_id: Some(*bin_id),
                                to_bin_id: None,
                            });
                        }
                        set_item_status(conn, &item.id, ItemStage::Recovery, ItemSubStatus::Scrapped, now, fx)?;
                    }
                }
            }
            (request_type, _) => {
                return Err(WorkflowError::validation(format!(
                    "payload does not match a {} completion",
                    request_type
                )))
            }
        }
        Ok(())
    }

    /// One SEW request per cut unit, numbered 1..=N across all lines
    fn fan_out_sew(
        &self,
        conn: &Connection,
        cutting: &mut Request,
        actor: &Actor,
        fx: &mut Effects,
    ) -> Result<(), WorkflowError> {
        let lines = match &cutting.metadata.stage {
            StageMetadata::Cutting(c) => c.skus.clone(),
            _ => Vec::new(),
        };
        let total = check_sku_lines(&lines, self.settings.max_fan_out_units)?;

        if let Some(batch_id) = &cutting.batch_id {
            if self.settings.strict_quantity_reconciliation {
                let batch = batches::get(conn, batch_id)?
                    .ok_or_else(|| WorkflowError::not_found("batch", batch_id))?;
                if batch.quantity != total {
                    return Err(WorkflowError::precondition(
                        FailureCode::QuantityMismatch,
                        format!(
                            "cutting {} yields {} units but batch {} expects {}",
                            cutting.id, total, batch.id, batch.quantity
                        ),
                    ));
                }
            }
        }

        cutting.metadata.stage.merge(StageMetadata::Cutting(CuttingMetadata {
            units_cut: Some(total),
            ..Default::default()
        }))?;

        let mut unit_number = 0;
        for line in &lines {
            for _ in 0..line.quantity {
                unit_number += 1;
                let sew = StageMetadata::Sew(SewMetadata {
                    cutting_request_id: Some(cutting.id),
                    sku: Some(line.sku.clone()),
                    unit_number: Some(unit_number),
                    total_units: Some(total),
                });
                spawn(conn, cutting, RequestType::Sew, None, sew, actor, fx)?;
            }
        }
        debug!(request = %cutting.id, units = total, "cutting fan-out");
        Ok(())
    }
}

// =============================================================================
// Helpers shared by create and transition
// =============================================================================

fn refs_for(request: &Request) -> EventRefs {
    EventRefs {
        request_id: Some(request.id),
        item_id: request.item_id,
        bin_id: None,
        batch_id: request.batch_id,
    }
}

fn bin_full(bin: &Bin) -> WorkflowError {
    WorkflowError::precondition(
        FailureCode::BinFull,
        format!("bin {} has no free slot", bin.code),
    )
}

fn require_item<'a>(
    item: Option<&'a InventoryItem>,
    request: &Request,
) -> Result<&'a InventoryItem, WorkflowError> {
    item.ok_or_else(|| {
        WorkflowError::precondition(
            FailureCode::PreconditionFailed,
            format!("request {} has no item", request.id),
        )
    })
}

fn wash_code(request: &Request, payload: &ActionPayload) -> Result<String, WorkflowError> {
    payload
        .wash_code()
        .map(str::to_string)
        .or_else(|| match &request.metadata.stage {
            StageMetadata::Wash(w) => w.wash_code.clone(),
            _ => None,
        })
        .ok_or_else(|| WorkflowError::validation("wash_code is required to complete a wash"))
}

/// Validate a cutting plan and return its unit total
fn check_sku_lines(lines: &[SkuLine], max_units: u32) -> Result<u32, WorkflowError> {
    if lines.is_empty() {
        return Err(WorkflowError::validation("at least one sku line is required"));
    }
    let mut total: u32 = 0;
    for line in lines {
        if line.sku.trim().is_empty() {
            return Err(WorkflowError::validation("sku line has an empty sku"));
        }
        if line.quantity == 0 {
            return Err(WorkflowError::validation(format!(
                "sku line {} has zero quantity",
                line.sku
            )));
        }
        total = total
            .checked_add(line.quantity)
            .filter(|total| *total <= max_units)
            .ok_or_else(|| {
                WorkflowError::validation(format!(
                    "sku lines exceed {} units (workflow.max_fan_out_units)",
                    max_units
                ))
            })?;
    }
    Ok(total)
}

/// A second same-type request may exist for the item, but only one runs
fn check_nothing_in_progress(conn: &Connection, request: &Request) -> Result<(), WorkflowError> {
    let Some(item_id) = &request.item_id else {
        return Ok(());
    };
    let active = RequestRepository::new(conn).active_for_item(item_id, request.request_type)?;
    if let Some(other) = active
        .iter()
        .find(|r| r.id != request.id && r.status == RequestStatus::InProgress)
    {
        return Err(WorkflowError::precondition(
            FailureCode::ActiveRequestExists,
            format!(
                "item {} already has {} request {} in progress",
                item_id, request.request_type, other.id
            ),
        ));
    }
    Ok(())
}

/// Insert a new request with its CREATED entry, event and assignment notice
fn insert_request(
    conn: &Connection,
    request: &Request,
    actor: Option<&Actor>,
    parent: Option<&Request>,
    fx: &mut Effects,
) -> Result<(), WorkflowError> {
    let repo = RequestRepository::new(conn);
    if let Some(item_id) = &request.item_id {
        if let Some(active) = repo.active_for_item(item_id, request.request_type)?.first() {
            return Err(WorkflowError::precondition(
                FailureCode::ActiveRequestExists,
                format!(
                    "item {} already has active {} request {}",
                    item_id, request.request_type, active.id
                ),
            ));
        }
    }
    repo.create(request)?;

    let snapshot = match parent {
        Some(p) => json!({"spawned_by": p.id}),
        None => Value::Null,
    };
    TimelineRecorder::new(conn).append(
        &request.id,
        NewTimelineEntry::new(steps::CREATED, request.status, actor.map(Actor::id))
            .with_metadata(snapshot),
    )?;
    fx.push(SideEffect::TimelineAppended {
        request_id: request.id,
        step: steps::CREATED.to_string(),
    });

    match parent {
        Some(parent) => {
            events::record(
                conn,
                EventType::RequestSpawned,
                refs_for(request),
                json!({"type": request.request_type, "parent_id": parent.id}),
            )?;
            fx.push(SideEffect::RequestSpawned {
                request_id: request.id,
                request_type: request.request_type,
                parent_id: parent.id,
            });
            debug!(request = %request.id, parent = %parent.id, request_type = %request.request_type, "spawned downstream request");
        }
        None => {
            events::record(
                conn,
                EventType::RequestCreated,
                refs_for(request),
                json!({"type": request.request_type}),
            )?;
            fx.push(SideEffect::RequestCreated {
                request_id: request.id,
                request_type: request.request_type,
            });
        }
    }

    if let Some(assignee) = &request.assigned_to {
        notify_assignee(conn, assignee, request, fx)?;
    }
    Ok(())
}

/// Create a downstream request inheriting the parent's order and batch
fn spawn(
    conn: &Connection,
    parent: &Request,
    request_type: RequestType,
    item_id: Option<EntityId>,
    stage: StageMetadata,
    actor: &Actor,
    fx: &mut Effects,
) -> Result<Request, WorkflowError> {
    let mut request = Request::new(request_type, RequestMetadata::new(stage));
    request.item_id = item_id;
    request.order_id = parent.order_id;
    request.batch_id = parent.batch_id;
    insert_request(conn, &request, Some(actor), Some(parent), fx)?;
    Ok(request)
}

/// Register the garment a SEW request produced
fn mint_item(
    conn: &Connection,
    sew: &Request,
    qr_code: Option<&str>,
    fx: &mut Effects,
) -> Result<InventoryItem, WorkflowError> {
    let qr_code = qr_code
        .map(str::trim)
        .filter(|qr| !qr.is_empty())
        .ok_or_else(|| WorkflowError::validation("qr_code is required to register the sewn item"))?;
    let sku_text = match &sew.metadata.stage {
        StageMetadata::Sew(s) => s.sku.clone(),
        _ => None,
    }
    .ok_or_else(|| WorkflowError::validation(format!("sew request {} has no sku", sew.id)))?;
    let sku: Sku = sku_text.parse()?;

    if let Some(existing) = items::find_by_qr(conn, qr_code)? {
        return Err(WorkflowError::precondition(
            FailureCode::ItemMismatch,
            format!("qr_code {} already belongs to {}", qr_code, existing.id),
        ));
    }
    let item = InventoryItem::new(sku, qr_code, ItemStage::Production, ItemSubStatus::Completed);
    items::insert(conn, &item)?;
    events::record(
        conn,
        EventType::ItemCreated,
        EventRefs {
            request_id: Some(sew.id),
            item_id: Some(item.id),
            ..Default::default()
        },
        json!({"sku": item.sku, "qr_code": item.qr_code}),
    )?;
    fx.push(SideEffect::ItemCreated {
        item_id: item.id,
        qr_code: item.qr_code.clone(),
    });
    Ok(item)
}

fn set_item_status(
    conn: &Connection,
    item_id: &EntityId,
    status1: ItemStage,
    status2: ItemSubStatus,
    now: DateTime<Utc>,
    fx: &mut Effects,
) -> Result<(), WorkflowError> {
    items::update_status(conn, item_id, status1, status2, now)?;
    events::record(
        conn,
        EventType::ItemUpdated,
        EventRefs::item(item_id),
        json!({"status1": status1, "status2": status2}),
    )?;
    fx.push(SideEffect::ItemUpdated {
        item_id: *item_id,
        status1,
        status2,
    });
    Ok(())
}

/// Move an item into `bin`, taking the slot before freeing the old one
fn relocate(
    conn: &Connection,
    item: &InventoryItem,
    bin: &Bin,
    now: DateTime<Utc>,
    fx: &mut Effects,
) -> Result<(), WorkflowError> {
    if item.bin_id == Some(bin.id) {
        return Ok(());
    }
    if !bins::occupy(conn, &bin.id)? {
        return Err(bin_full(bin));
    }
    if let Some(old) = &item.bin_id {
        bins::release(conn, old)?;
    }
    items::set_bin(conn, &item.id, Some(&bin.id), now)?;
    events::record(
        conn,
        EventType::ItemMoved,
        EventRefs {
            item_id: Some(item.id),
            bin_id: Some(bin.id),
            ..Default::default()
        },
        json!({"from": item.bin_id, "to": bin.id}),
    )?;
    fx.push(SideEffect::ItemMoved {
        item_id: item.id,
        from_bin_id: item.bin_id,
        to_bin_id: Some(bin.id),
    });
    Ok(())
}

/// Recompute a batch's aggregate status from its member requests
fn refresh_batch(
    conn: &Connection,
    batch_id: &EntityId,
    now: DateTime<Utc>,
    fx: &mut Effects,
) -> Result<(), WorkflowError> {
    let batch = batches::get(conn, batch_id)?
        .ok_or_else(|| WorkflowError::not_found("batch", batch_id))?;
    let status = BatchStatus::aggregate(batches::member_statuses(conn, batch_id)?);
    if status != batch.status {
        batches::update_status(conn, batch_id, status, now)?;
        events::record(
            conn,
            EventType::BatchUpdated,
            EventRefs::batch(batch_id),
            json!({"from": batch.status, "to": status}),
        )?;
        fx.push(SideEffect::BatchUpdated {
            batch_id: *batch_id,
            status,
        });
    }
    Ok(())
}

fn notify_assignee(
    conn: &Connection,
    user_id: &str,
    request: &Request,
    fx: &mut Effects,
) -> Result<(), WorkflowError> {
    let notification = Notification::new(
        user_id,
        request.id,
        format!("{} request {} was assigned to you", request.request_type, request.id),
        json!({"request_type": request.request_type, "item_id": request.item_id}),
    );
    notifications::insert(conn, &notification)?;
    fx.push(SideEffect::NotificationQueued {
        notification_id: notification.id,
        user_id: notification.user_id.clone(),
    });
    fx.outbox.push(notification);
    Ok(())
}
