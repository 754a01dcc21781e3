//! Typed action payloads
//!
//! Every `(request type, action)` pair deserializes its JSON payload into one
//! struct with `deny_unknown_fields`, so a misspelled key is rejected instead
//! of silently ignored. `null` is treated as an empty object.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::core::error::WorkflowError;
use crate::core::metadata::{Defect, Measurement, Resolution, VisualInspection};
use crate::entities::request::{Action, RequestType};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AssignPayload {
    pub assigned_to: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct StartPayload {}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FailPayload {
    pub reason: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ValidateItemPayload {
    pub qr_code: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RecordDefectsPayload {
    pub defects: Vec<Defect>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RecordMeasurementsPayload {
    pub measurements: Vec<Measurement>,
    pub visual_inspection: Option<VisualInspection>,
}

/// PATTERN, CUTTING and FINISHING completion
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct NotesPayload {
    pub notes: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct CompleteSewPayload {
    /// QR label of the garment being minted
    pub qr_code: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct CompleteWashPayload {
    pub wash_code: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct CompleteQcPayload {
    pub passed: Option<bool>,
    pub defects: Vec<Defect>,
    pub measurements: Vec<Measurement>,
    pub visual_inspection: Option<VisualInspection>,
    pub notes: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CompletePackingPayload {
    /// Bin id or code
    pub bin_id: String,
    #[serde(default)]
    pub package_ref: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct CompleteMovePayload {
    pub qr_code: Option<String>,
    /// Bin id or code; falls back to the destination stored on the request
    pub to_bin_id: Option<String>,
    pub reason: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CompleteRecoveryPayload {
    pub resolution: Resolution,
    #[serde(default)]
    pub notes: Option<String>,
}

/// Parsed payload for one action
#[derive(Debug, Clone, PartialEq)]
pub enum ActionPayload {
    Assign(AssignPayload),
    Start(StartPayload),
    Fail(FailPayload),
    ValidateItem(ValidateItemPayload),
    RecordDefects(RecordDefectsPayload),
    RecordMeasurements(RecordMeasurementsPayload),
    CompleteNotes(NotesPayload),
    CompleteSew(CompleteSewPayload),
    CompleteWash(CompleteWashPayload),
    CompleteQc(CompleteQcPayload),
    CompletePacking(CompletePackingPayload),
    CompleteMove(CompleteMovePayload),
    CompleteRecovery(CompleteRecoveryPayload),
}

fn parse<T: DeserializeOwned>(action: Action, value: &Value) -> Result<T, WorkflowError> {
    let value = if value.is_null() {
        Value::Object(Default::default())
    } else {
        value.clone()
    };
    serde_json::from_value(value)
        .map_err(|e| WorkflowError::validation(format!("invalid {} payload: {}", action, e)))
}

fn non_empty(field: &str, value: &str) -> Result<(), WorkflowError> {
    if value.trim().is_empty() {
        return Err(WorkflowError::validation(format!("{} must not be empty", field)));
    }
    Ok(())
}

impl ActionPayload {
    /// Parse and sanity-check a payload for an action on a request type
    ///
    /// Callers check that the action applies to the type beforehand; an
    /// unsupported pairing is still reported as a validation error here.
    pub fn parse(
        request_type: RequestType,
        action: Action,
        value: &Value,
    ) -> Result<Self, WorkflowError> {
        let payload = match action {
            Action::Assign => {
                let p: AssignPayload = parse(action, value)?;
                non_empty("assigned_to", &p.assigned_to)?;
                ActionPayload::Assign(p)
            }
            Action::Start => ActionPayload::Start(parse(action, value)?),
            Action::Fail => {
                let p: FailPayload = parse(action, value)?;
                non_empty("reason", &p.reason)?;
                ActionPayload::Fail(p)
            }
            Action::ValidateItem => {
                let p: ValidateItemPayload = parse(action, value)?;
                non_empty("qr_code", &p.qr_code)?;
                ActionPayload::ValidateItem(p)
            }
            Action::RecordDefects => {
                let p: RecordDefectsPayload = parse(action, value)?;
                if p.defects.is_empty() {
                    return Err(WorkflowError::validation("defects must not be empty"));
                }
                ActionPayload::RecordDefects(p)
            }
            Action::RecordMeasurements => {
                let p: RecordMeasurementsPayload = parse(action, value)?;
                if p.measurements.is_empty() && p.visual_inspection.is_none() {
                    return Err(WorkflowError::validation(
                        "measurements or visual_inspection is required",
                    ));
                }
                ActionPayload::RecordMeasurements(p)
            }
            Action::Complete => match request_type {
                RequestType::Pattern | RequestType::Cutting | RequestType::Finishing => {
                    ActionPayload::CompleteNotes(parse(action, value)?)
                }
                RequestType::Sew => ActionPayload::CompleteSew(parse(action, value)?),
                RequestType::Wash => ActionPayload::CompleteWash(parse(action, value)?),
                RequestType::Qc => ActionPayload::CompleteQc(parse(action, value)?),
                RequestType::Packing => {
                    let p: CompletePackingPayload = parse(action, value)?;
                    non_empty("bin_id", &p.bin_id)?;
                    ActionPayload::CompletePacking(p)
                }
                RequestType::Move => ActionPayload::CompleteMove(parse(action, value)?),
                RequestType::Recovery => ActionPayload::CompleteRecovery(parse(action, value)?),
            },
        };
        Ok(payload)
    }

    /// QR code the operator scanned, if this payload carries one
    pub fn qr_code(&self) -> Option<&str> {
        match self {
            ActionPayload::ValidateItem(p) => Some(p.qr_code.as_str()),
            ActionPayload::CompleteSew(p) => p.qr_code.as_deref(),
            ActionPayload::CompleteMove(p) => p.qr_code.as_deref(),
            _ => None,
        }
    }

    /// Target bin named in the payload (id or code)
    pub fn bin_key(&self) -> Option<&str> {
        match self {
            ActionPayload::CompletePacking(p) => Some(p.bin_id.as_str()),
            ActionPayload::CompleteMove(p) => p.to_bin_id.as_deref(),
            _ => None,
        }
    }

    pub fn passed(&self) -> Option<bool> {
        match self {
            ActionPayload::CompleteQc(p) => p.passed,
            _ => None,
        }
    }

    pub fn defects(&self) -> &[Defect] {
        match self {
            ActionPayload::CompleteQc(p) => &p.defects,
            ActionPayload::RecordDefects(p) => &p.defects,
            _ => &[],
        }
    }

    pub fn wash_code(&self) -> Option<&str> {
        match self {
            ActionPayload::CompleteWash(p) => p.wash_code.as_deref(),
            _ => None,
        }
    }
}
