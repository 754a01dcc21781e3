//! Step validators - gates that run before a transition is applied
//!
//! Validators read through the caller's transaction and never write. The
//! engine runs the ordered list registered for `(request type, action)` and
//! stops at the first failure, returning that error unchanged.

use rusqlite::Connection;
use std::collections::HashMap;

use crate::core::config::WorkflowSettings;
use crate::core::error::{FailureCode, WorkflowError};
use crate::core::identity::EntityId;
use crate::core::metadata::StageMetadata;
use crate::core::payload::ActionPayload;
use crate::core::sku::Sku;
use crate::core::store::bins;
use crate::entities::bin::Bin;
use crate::entities::item::InventoryItem;
use crate::entities::request::{Action, Request, RequestType};

/// Everything a validator may look at
pub struct ValidationContext<'a> {
    pub conn: &'a Connection,
    pub request: &'a Request,
    pub item: Option<&'a InventoryItem>,
    pub payload: &'a ActionPayload,
    pub settings: &'a WorkflowSettings,
    /// SKU the item will carry once the action applies (post-wash for WASH)
    pub placed_sku: Option<&'a Sku>,
}

impl ValidationContext<'_> {
    fn require_item(&self) -> Result<&InventoryItem, WorkflowError> {
        self.item.ok_or_else(|| {
            WorkflowError::precondition(
                FailureCode::PreconditionFailed,
                format!("request {} has no item", self.request.id),
            )
        })
    }
}

pub trait StepValidator: Send + Sync {
    fn name(&self) -> &'static str;
    fn validate(&self, ctx: &ValidationContext<'_>) -> Result<(), WorkflowError>;
}

/// Bin must exist, be active and have a free slot
pub fn validate_bin_assignment(conn: &Connection, key: &str) -> Result<Bin, WorkflowError> {
    validate_bin_for(conn, key, None)
}

/// Like [`validate_bin_assignment`], but the bin an item already sits in
/// needs no free slot to keep it
pub fn validate_bin_for(
    conn: &Connection,
    key: &str,
    current_bin: Option<&EntityId>,
) -> Result<Bin, WorkflowError> {
    let bin = bins::resolve(conn, key)?.ok_or_else(|| {
        WorkflowError::precondition(FailureCode::BinNotFound, format!("bin {} does not exist", key))
    })?;
    if !bin.active {
        return Err(WorkflowError::precondition(
            FailureCode::BinInactive,
            format!("bin {} is inactive", bin.code),
        ));
    }
    if current_bin != Some(&bin.id) && !bin.has_room() {
        return Err(WorkflowError::precondition(
            FailureCode::BinFull,
            format!("bin {} is full ({}/{})", bin.code, bin.current_count, bin.capacity),
        ));
    }
    Ok(bin)
}

/// Scanned QR code must equal the item's recorded code
pub fn validate_item_scan(item: &InventoryItem, scanned: &str) -> Result<(), WorkflowError> {
    if item.qr_code != scanned {
        return Err(WorkflowError::precondition(
            FailureCode::ItemMismatch,
            format!("scanned {} but request item is {}", scanned, item.qr_code),
        ));
    }
    Ok(())
}

/// Bin assignment plus the bin's SKU restriction
pub fn validate_destination(
    conn: &Connection,
    key: &str,
    sku: &Sku,
    current_bin: Option<&EntityId>,
) -> Result<Bin, WorkflowError> {
    let bin = validate_bin_for(conn, key, current_bin)?;
    check_sku_restriction(&bin, sku)?;
    Ok(bin)
}

fn check_sku_restriction(bin: &Bin, sku: &Sku) -> Result<(), WorkflowError> {
    match &bin.sku_restriction {
        Some(restriction) if *restriction != sku.to_string() => {
            Err(WorkflowError::precondition(
                FailureCode::SkuMismatch,
                format!("bin {} only accepts {}, item is {}", bin.code, restriction, sku),
            ))
        }
        _ => Ok(()),
    }
}

/// Where [`BinAssignment`] reads its bin from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinSource {
    /// `workflow.wash_staging_bin`
    StagingBin,
    /// The payload's bin field
    Payload,
}

pub struct BinAssignment {
    pub source: BinSource,
}

impl StepValidator for BinAssignment {
    fn name(&self) -> &'static str {
        "bin_assignment"
    }

    fn validate(&self, ctx: &ValidationContext<'_>) -> Result<(), WorkflowError> {
        let key = match self.source {
            BinSource::StagingBin => ctx.settings.wash_staging_bin.as_deref().ok_or_else(|| {
                WorkflowError::precondition(
                    FailureCode::BinNotFound,
                    "no wash staging bin configured (workflow.wash_staging_bin)",
                )
            })?,
            BinSource::Payload => ctx
                .payload
                .bin_key()
                .ok_or_else(|| WorkflowError::validation("bin_id is required"))?,
        };
        let current = ctx.item.and_then(|item| item.bin_id.as_ref());
        let bin = validate_bin_for(ctx.conn, key, current)?;
        if let Some(sku) = ctx.placed_sku {
            check_sku_restriction(&bin, sku)?;
        }
        Ok(())
    }
}

pub struct ItemScan;

impl StepValidator for ItemScan {
    fn name(&self) -> &'static str {
        "item_scan"
    }

    fn validate(&self, ctx: &ValidationContext<'_>) -> Result<(), WorkflowError> {
        let item = ctx.require_item()?;
        let scanned = ctx
            .payload
            .qr_code()
            .ok_or_else(|| WorkflowError::validation("qr_code is required"))?;
        validate_item_scan(item, scanned)
    }
}

/// MOVE destination: payload `to_bin_id`, else the one stored at creation
pub struct Destination;

impl StepValidator for Destination {
    fn name(&self) -> &'static str {
        "destination"
    }

    fn validate(&self, ctx: &ValidationContext<'_>) -> Result<(), WorkflowError> {
        let item = ctx.require_item()?;
        let stored = match &ctx.request.metadata.stage {
            StageMetadata::Move(m) => m.to_bin_id.map(|id| id.to_string()),
            _ => None,
        };
        let key = ctx
            .payload
            .bin_key()
            .map(str::to_string)
            .or(stored)
            .ok_or_else(|| WorkflowError::validation("to_bin_id is required"))?;

        if let Some(current) = item.bin_id {
            if let Some(bin) = bins::resolve(ctx.conn, &key)? {
                if bin.id == current {
                    return Err(WorkflowError::precondition(
                        FailureCode::PreconditionFailed,
                        format!("item {} is already in bin {}", item.id, bin.code),
                    ));
                }
            }
        }
        validate_destination(ctx.conn, &key, &item.sku, item.bin_id.as_ref())?;
        Ok(())
    }
}

/// Stage-specific boolean checks
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Precondition {
    /// WASH cannot start before the garment was scanned
    ItemValidated,
    /// A failing QC needs at least one defect, recorded or supplied
    DefectsOnFailure,
    /// SEW completion needs a linked item or a QR code to mint one
    ItemOrQrSupplied,
}

impl StepValidator for Precondition {
    fn name(&self) -> &'static str {
        match self {
            Precondition::ItemValidated => "item_validated",
            Precondition::DefectsOnFailure => "defects_on_failure",
            Precondition::ItemOrQrSupplied => "item_or_qr_supplied",
        }
    }

    fn validate(&self, ctx: &ValidationContext<'_>) -> Result<(), WorkflowError> {
        let ok = match self {
            Precondition::ItemValidated => matches!(
                &ctx.request.metadata.stage,
                StageMetadata::Wash(w) if w.item_validation.is_some()
            ),
            Precondition::DefectsOnFailure => {
                let (recorded, stored_passed) = match &ctx.request.metadata.stage {
                    StageMetadata::Qc(qc) => (qc.defects.len(), qc.passed),
                    _ => (0, None),
                };
                let passed = ctx.payload.passed().or(stored_passed);
                passed != Some(false) || recorded + ctx.payload.defects().len() > 0
            }
            Precondition::ItemOrQrSupplied => {
                ctx.request.item_id.is_some() || ctx.payload.qr_code().is_some()
            }
        };
        if ok {
            Ok(())
        } else {
            let message = match self {
                Precondition::ItemValidated => "item must be validated (scanned) before wash starts",
                Precondition::DefectsOnFailure => "a failed QC must record at least one defect",
                Precondition::ItemOrQrSupplied => "qr_code is required to register the sewn item",
            };
            Err(WorkflowError::precondition(FailureCode::PreconditionFailed, message))
        }
    }
}

/// Ordered validators per `(request type, action)`
#[derive(Default)]
pub struct ValidatorRegistry {
    validators: HashMap<(RequestType, Action), Vec<Box<dyn StepValidator>>>,
}

impl ValidatorRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// The standard gates for the garment pipeline
    pub fn defaults(settings: &WorkflowSettings) -> Self {
        let mut registry = Self::new();
        registry.register(RequestType::Wash, Action::ValidateItem, ItemScan);
        registry.register(RequestType::Wash, Action::Start, Precondition::ItemValidated);
        registry.register(
            RequestType::Wash,
            Action::Complete,
            BinAssignment {
                source: BinSource::StagingBin,
            },
        );
        registry.register(RequestType::Qc, Action::Complete, Precondition::DefectsOnFailure);
        registry.register(RequestType::Sew, Action::Complete, Precondition::ItemOrQrSupplied);
        registry.register(
            RequestType::Packing,
            Action::Complete,
            BinAssignment {
                source: BinSource::Payload,
            },
        );
        if settings.require_scan_on_move {
            registry.register(RequestType::Move, Action::Complete, ItemScan);
        }
        registry.register(RequestType::Move, Action::Complete, Destination);
        registry
    }

    /// Append a validator; it runs after those already registered
    pub fn register(
        &mut self,
        request_type: RequestType,
        action: Action,
        validator: impl StepValidator + 'static,
    ) {
        self.validators
            .entry((request_type, action))
            .or_default()
            .push(Box::new(validator));
    }

    pub fn names(&self, request_type: RequestType, action: Action) -> Vec<&'static str> {
        self.validators
            .get(&(request_type, action))
            .map(|list| list.iter().map(|v| v.name()).collect())
            .unwrap_or_default()
    }

    /// Run in order, stopping at the first failure
    pub fn run(
        &self,
        request_type: RequestType,
        action: Action,
        ctx: &ValidationContext<'_>,
    ) -> Result<(), WorkflowError> {
        let Some(list) = self.validators.get(&(request_type, action)) else {
            return Ok(());
        };
        for validator in list {
            tracing::debug!(validator = validator.name(), request = %ctx.request.id, "running validator");
            validator.validate(ctx)?;
        }
        Ok(())
    }
}
