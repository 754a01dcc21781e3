//! Typed per-stage request metadata
//!
//! Each request carries a [`RequestMetadata`]: write-once lifecycle
//! [`Stamps`] plus a [`StageMetadata`] tagged by request type. Every stage
//! struct implements [`Merge`] and documents which fields are overwritten and
//! which accumulate, so a later action can never silently drop what an
//! earlier one recorded.
//!
//! Shared rules:
//! - scalar `Option` fields are overwritten only when the patch carries `Some`
//! - history lists (defects, measurements) are appended
//! - nested objects (wash `item_validation`, QC `visual_inspection`) replace
//!   the previous object wholesale

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::core::identity::EntityId;
use crate::entities::request::RequestType;

/// Errors from building or merging metadata
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MetadataError {
    #[error("cannot merge {patch} metadata into a {target} request")]
    StageMismatch {
        target: RequestType,
        patch: RequestType,
    },

    #[error("invalid {stage} metadata: {message}")]
    Invalid { stage: RequestType, message: String },
}

/// Field-wise merge of a later patch into existing data
pub trait Merge {
    fn merge(&mut self, patch: Self);
}

fn overwrite<T>(slot: &mut Option<T>, patch: Option<T>) {
    if patch.is_some() {
        *slot = patch;
    }
}

fn write_once<T>(slot: &mut Option<T>, patch: Option<T>) {
    if slot.is_none() {
        *slot = patch;
    }
}

/// Lifecycle timestamps; each is set at most once
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Stamps {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub started_by: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed_by: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failed_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failure_reason: Option<String>,
}

impl Merge for Stamps {
    fn merge(&mut self, patch: Self) {
        write_once(&mut self.started_at, patch.started_at);
        write_once(&mut self.started_by, patch.started_by);
        write_once(&mut self.completed_at, patch.completed_at);
        write_once(&mut self.completed_by, patch.completed_by);
        write_once(&mut self.failed_at, patch.failed_at);
        write_once(&mut self.failure_reason, patch.failure_reason);
    }
}

/// One planned SKU line and its unit count
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SkuLine {
    pub sku: String,
    pub quantity: u32,
}

/// A recorded defect
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Defect {
    pub code: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub severity: Option<String>,
}

/// A single QC measurement
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Measurement {
    pub name: String,
    pub value: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub unit: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct VisualInspection {
    pub passed: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
}

/// Proof that the physical garment was scanned before washing
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ItemValidation {
    pub validated_at: DateTime<Utc>,
    pub validated_by: String,
    pub qr_code: String,
}

/// How a defective garment leaves recovery
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Resolution {
    Rework,
    Scrap,
}

/// PATTERN: `skus` is a plan and is replaced by a non-empty patch
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PatternMetadata {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pattern_ref: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub skus: Vec<SkuLine>,
}

impl Merge for PatternMetadata {
    fn merge(&mut self, patch: Self) {
        overwrite(&mut self.pattern_ref, patch.pattern_ref);
        if !patch.skus.is_empty() {
            self.skus = patch.skus;
        }
    }
}

/// CUTTING: `skus` is a plan and is replaced by a non-empty patch
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct CuttingMetadata {
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub skus: Vec<SkuLine>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pattern_request_id: Option<EntityId>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub units_cut: Option<u32>,
}

impl CuttingMetadata {
    /// `None` when the line quantities overflow a `u32`
    pub fn total_units(&self) -> Option<u32> {
        self.skus
            .iter()
            .try_fold(0u32, |total, line| total.checked_add(line.quantity))
    }
}

impl Merge for CuttingMetadata {
    fn merge(&mut self, patch: Self) {
        if !patch.skus.is_empty() {
            self.skus = patch.skus;
        }
        overwrite(&mut self.pattern_request_id, patch.pattern_request_id);
        overwrite(&mut self.units_cut, patch.units_cut);
    }
}

/// SEW: all scalar, overwrite-on-some
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SewMetadata {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cutting_request_id: Option<EntityId>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sku: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub unit_number: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub total_units: Option<u32>,
}

impl Merge for SewMetadata {
    fn merge(&mut self, patch: Self) {
        overwrite(&mut self.cutting_request_id, patch.cutting_request_id);
        overwrite(&mut self.sku, patch.sku);
        overwrite(&mut self.unit_number, patch.unit_number);
        overwrite(&mut self.total_units, patch.total_units);
    }
}

/// WASH: `item_validation` is replaced wholesale
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct WashMetadata {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub wash_type: Option<String>,
    /// Code written into the SKU wash segment on completion
    #[serde(skip_serializing_if = "Option::is_none")]
    pub wash_code: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub item_validation: Option<ItemValidation>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub previous_sku: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub staging_bin_id: Option<EntityId>,
}

impl Merge for WashMetadata {
    fn merge(&mut self, patch: Self) {
        overwrite(&mut self.wash_type, patch.wash_type);
        overwrite(&mut self.wash_code, patch.wash_code);
        overwrite(&mut self.temperature, patch.temperature);
        overwrite(&mut self.item_validation, patch.item_validation);
        overwrite(&mut self.previous_sku, patch.previous_sku);
        overwrite(&mut self.staging_bin_id, patch.staging_bin_id);
    }
}

/// QC: `measurements` and `defects` accumulate; `visual_inspection` is replaced
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct QcMetadata {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source_request_id: Option<EntityId>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub measurements: Vec<Measurement>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub defects: Vec<Defect>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub visual_inspection: Option<VisualInspection>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub passed: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
}

impl Merge for QcMetadata {
    fn merge(&mut self, patch: Self) {
        overwrite(&mut self.source_request_id, patch.source_request_id);
        self.measurements.extend(patch.measurements);
        self.defects.extend(patch.defects);
        overwrite(&mut self.visual_inspection, patch.visual_inspection);
        overwrite(&mut self.passed, patch.passed);
        overwrite(&mut self.notes, patch.notes);
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct FinishingMetadata {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub qc_request_id: Option<EntityId>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
}

impl Merge for FinishingMetadata {
    fn merge(&mut self, patch: Self) {
        overwrite(&mut self.qc_request_id, patch.qc_request_id);
        overwrite(&mut self.notes, patch.notes);
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PackingMetadata {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bin_id: Option<EntityId>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub package_ref: Option<String>,
}

impl Merge for PackingMetadata {
    fn merge(&mut self, patch: Self) {
        overwrite(&mut self.bin_id, patch.bin_id);
        overwrite(&mut self.package_ref, patch.package_ref);
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct MoveMetadata {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub from_bin_id: Option<EntityId>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub to_bin_id: Option<EntityId>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

impl Merge for MoveMetadata {
    fn merge(&mut self, patch: Self) {
        overwrite(&mut self.from_bin_id, patch.from_bin_id);
        overwrite(&mut self.to_bin_id, patch.to_bin_id);
        overwrite(&mut self.reason, patch.reason);
    }
}

/// RECOVERY: `defects` accumulate
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RecoveryMetadata {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub qc_request_id: Option<EntityId>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub defects: Vec<Defect>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resolution: Option<Resolution>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
}

impl Merge for RecoveryMetadata {
    fn merge(&mut self, patch: Self) {
        overwrite(&mut self.qc_request_id, patch.qc_request_id);
        self.defects.extend(patch.defects);
        overwrite(&mut self.resolution, patch.resolution);
        overwrite(&mut self.notes, patch.notes);
    }
}

/// Stage payload, tagged by request type
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "stage", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum StageMetadata {
    Pattern(PatternMetadata),
    Cutting(CuttingMetadata),
    Sew(SewMetadata),
    Wash(WashMetadata),
    Qc(QcMetadata),
    Finishing(FinishingMetadata),
    Packing(PackingMetadata),
    Move(MoveMetadata),
    Recovery(RecoveryMetadata),
}

impl StageMetadata {
    /// Empty metadata for a request type
    pub fn empty(request_type: RequestType) -> Self {
        match request_type {
            RequestType::Pattern => StageMetadata::Pattern(Default::default()),
            RequestType::Cutting => StageMetadata::Cutting(Default::default()),
            RequestType::Sew => StageMetadata::Sew(Default::default()),
            RequestType::Wash => StageMetadata::Wash(Default::default()),
            RequestType::Qc => StageMetadata::Qc(Default::default()),
            RequestType::Finishing => StageMetadata::Finishing(Default::default()),
            RequestType::Packing => StageMetadata::Packing(Default::default()),
            RequestType::Move => StageMetadata::Move(Default::default()),
            RequestType::Recovery => StageMetadata::Recovery(Default::default()),
        }
    }

    pub fn request_type(&self) -> RequestType {
        match self {
            StageMetadata::Pattern(_) => RequestType::Pattern,
            StageMetadata::Cutting(_) => RequestType::Cutting,
            StageMetadata::Sew(_) => RequestType::Sew,
            StageMetadata::Wash(_) => RequestType::Wash,
            StageMetadata::Qc(_) => RequestType::Qc,
            StageMetadata::Finishing(_) => RequestType::Finishing,
            StageMetadata::Packing(_) => RequestType::Packing,
            StageMetadata::Move(_) => RequestType::Move,
            StageMetadata::Recovery(_) => RequestType::Recovery,
        }
    }

    /// Parse caller-supplied JSON for a given request type
    ///
    /// Accepts `null`, an untagged object of the stage's fields, or an object
    /// tagged with a matching `stage`.
    pub fn from_value(
        request_type: RequestType,
        value: &serde_json::Value,
    ) -> Result<Self, MetadataError> {
        let invalid = |e: serde_json::Error| MetadataError::Invalid {
            stage: request_type,
            message: e.to_string(),
        };

        if value.is_null() {
            return Ok(Self::empty(request_type));
        }
        if value.get("stage").is_some() {
            let parsed: StageMetadata = serde_json::from_value(value.clone()).map_err(invalid)?;
            if parsed.request_type() != request_type {
                return Err(MetadataError::StageMismatch {
                    target: request_type,
                    patch: parsed.request_type(),
                });
            }
            return Ok(parsed);
        }

        let v = value.clone();
        Ok(match request_type {
            RequestType::Pattern => StageMetadata::Pattern(serde_json::from_value(v).map_err(invalid)?),
            RequestType::Cutting => StageMetadata::Cutting(serde_json::from_value(v).map_err(invalid)?),
            RequestType::Sew => StageMetadata::Sew(serde_json::from_value(v).map_err(invalid)?),
            RequestType::Wash => StageMetadata::Wash(serde_json::from_value(v).map_err(invalid)?),
            RequestType::Qc => StageMetadata::Qc(serde_json::from_value(v).map_err(invalid)?),
            RequestType::Finishing => {
                StageMetadata::Finishing(serde_json::from_value(v).map_err(invalid)?)
            }
            RequestType::Packing => StageMetadata::Packing(serde_json::from_value(v).map_err(invalid)?),
            RequestType::Move => StageMetadata::Move(serde_json::from_value(v).map_err(invalid)?),
            RequestType::Recovery => {
                StageMetadata::Recovery(serde_json::from_value(v).map_err(invalid)?)
            }
        })
    }

    /// Merge a patch of the same stage; a different stage is an error
    pub fn merge(&mut self, patch: StageMetadata) -> Result<(), MetadataError> {
        match (self, patch) {
            (StageMetadata::Pattern(a), StageMetadata::Pattern(b)) => a.merge(b),
            (StageMetadata::Cutting(a), StageMetadata::Cutting(b)) => a.merge(b),
            (StageMetadata::Sew(a), StageMetadata::Sew(b)) => a.merge(b),
            (StageMetadata::Wash(a), StageMetadata::Wash(b)) => a.merge(b),
            (StageMetadata::Qc(a), StageMetadata::Qc(b)) => a.merge(b),
            (StageMetadata::Finishing(a), StageMetadata::Finishing(b)) => a.merge(b),
            (StageMetadata::Packing(a), StageMetadata::Packing(b)) => a.merge(b),
            (StageMetadata::Move(a), StageMetadata::Move(b)) => a.merge(b),
            (StageMetadata::Recovery(a), StageMetadata::Recovery(b)) => a.merge(b),
            (target, patch) => {
                return Err(MetadataError::StageMismatch {
                    target: target.request_type(),
                    patch: patch.request_type(),
                })
            }
        }
        Ok(())
    }
}

/// Full metadata stored on a request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RequestMetadata {
    #[serde(default)]
    pub stamps: Stamps,
    pub stage: StageMetadata,
}

impl RequestMetadata {
    pub fn new(stage: StageMetadata) -> Self {
        Self {
            stamps: Stamps::default(),
            stage,
        }
    }

    pub fn empty(request_type: RequestType) -> Self {
        Self::new(StageMetadata::empty(request_type))
    }

    /// Merge stamps (write-once) and stage data (per-stage rules)
    pub fn merge(&mut self, patch: RequestMetadata) -> Result<(), MetadataError> {
        self.stage.merge(patch.stage)?;
        self.stamps.merge(patch.stamps);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn defect(code: &str) -> Defect {
        Defect {
            code: code.to_string(),
            description: None,
            severity: None,
        }
    }

    #[test]
    fn test_qc_lists_accumulate() {
        let mut qc = QcMetadata {
            defects: vec![defect("STAIN")],
            ..Default::default()
        };
        qc.merge(QcMetadata {
            defects: vec![defect("SEAM")],
            notes: Some("second pass".to_string()),
            ..Default::default()
        });
        assert_eq!(qc.defects.len(), 2);
        assert_eq!(qc.notes.as_deref(), Some("second pass"));
    }

    #[test]
    fn test_nested_object_is_replaced() {
        let mut qc = QcMetadata {
            visual_inspection: Some(VisualInspection {
                passed: false,
                notes: Some("loose thread".to_string()),
            }),
            ..Default::default()
        };
        qc.merge(QcMetadata {
            visual_inspection: Some(VisualInspection {
                passed: true,
                notes: None,
            }),
            ..Default::default()
        });
        let vi = qc.visual_inspection.unwrap();
        assert!(vi.passed);
        assert_eq!(vi.notes, None);
    }

    #[test]
    fn test_none_does_not_erase() {
        let mut wash = WashMetadata {
            wash_type: Some("stone".to_string()),
            ..Default::default()
        };
        wash.merge(WashMetadata::default());
        assert_eq!(wash.wash_type.as_deref(), Some("stone"));
    }

    #[test]
    fn test_stamps_are_write_once() {
        let first = Utc::now();
        let mut stamps = Stamps {
            started_at: Some(first),
            ..Default::default()
        };
        stamps.merge(Stamps {
            started_at: Some(first + chrono::Duration::seconds(5)),
            completed_by: Some("op1".to_string()),
            ..Default::default()
        });
        assert_eq!(stamps.started_at, Some(first));
        assert_eq!(stamps.completed_by.as_deref(), Some("op1"));
    }

    #[test]
    fn test_stage_mismatch_rejected() {
        let mut meta = StageMetadata::empty(RequestType::Wash);
        let err = meta
            .merge(StageMetadata::empty(RequestType::Qc))
            .unwrap_err();
        assert_eq!(
            err,
            MetadataError::StageMismatch {
                target: RequestType::Wash,
                patch: RequestType::Qc
            }
        );
    }

    #[test]
    fn test_total_units_overflow_is_none() {
        let cutting = CuttingMetadata {
            skus: vec![
                SkuLine { sku: "A".to_string(), quantity: u32::MAX },
                SkuLine { sku: "B".to_string(), quantity: 1 },
            ],
            ..Default::default()
        };
        assert_eq!(cutting.total_units(), None);
    }

    #[test]
    fn test_from_value_untagged_and_tagged() {
        let untagged = StageMetadata::from_value(
            RequestType::Cutting,
            &json!({"skus": [{"sku": "A", "quantity": 2}]}),
        )
        .unwrap();
        match &untagged {
            StageMetadata::Cutting(c) => assert_eq!(c.total_units(), Some(2)),
            other => panic!("unexpected {:?}", other),
        }

        let tagged = StageMetadata::from_value(
            RequestType::Wash,
            &json!({"stage": "WASH", "wash_type": "enzyme"}),
        )
        .unwrap();
        assert_eq!(tagged.request_type(), RequestType::Wash);

        assert!(matches!(
            StageMetadata::from_value(RequestType::Wash, &json!({"stage": "QC"})),
            Err(MetadataError::StageMismatch { .. })
        ));
    }

    #[test]
    fn test_unknown_fields_rejected() {
        assert!(matches!(
            StageMetadata::from_value(RequestType::Move, &json!({"to_bin": "x"})),
            Err(MetadataError::Invalid { .. })
        ));
    }

    #[test]
    fn test_null_is_empty() {
        assert_eq!(
            StageMetadata::from_value(RequestType::Qc, &serde_json::Value::Null).unwrap(),
            StageMetadata::empty(RequestType::Qc)
        );
    }

    #[test]
    fn test_request_metadata_serializes_with_stage_tag() {
        let meta = RequestMetadata::empty(RequestType::Sew);
        let value = serde_json::to_value(&meta).unwrap();
        assert_eq!(value["stage"]["stage"], json!("SEW"));
    }
}
