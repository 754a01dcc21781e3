//! Workflow engine tests: atomicity, state machine, fan-out, QC branch, bins

mod common;

use common::{denim_item, op, setup_engine, test_config, STAGING};
use loomline::core::error::{ErrorKind, FailureCode, WorkflowError};
use loomline::core::identity::{EntityId, IdempotencyKey};
use loomline::core::metadata::StageMetadata;
use loomline::core::notify::{DispatchError, NotificationDispatcher, TracingDispatcher};
use loomline::core::repository::{RequestFilter, RequestRepository};
use loomline::core::store::{bins, events, items, notifications, EventType, Store, StoreOptions};
use loomline::core::validators::{StepValidator, ValidationContext, ValidatorRegistry};
use loomline::core::workflow::{NewRequest, SideEffect, WorkflowEngine};
use loomline::entities::bin::Bin;
use loomline::entities::item::{InventoryItem, ItemStage, ItemSubStatus};
use loomline::entities::request::{Action, Request, RequestStatus, RequestType};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::{Arc, Barrier};
use std::thread;
use tempfile::TempDir;

// ============================================================================
// Helpers
// ============================================================================

#[derive(Debug, PartialEq)]
struct Snapshot {
    requests: Vec<Request>,
    items: Vec<InventoryItem>,
    bins: Vec<Bin>,
    timeline_rows: i64,
    notification_rows: i64,
}

fn snapshot(engine: &WorkflowEngine) -> Snapshot {
    let conn = engine.store().conn();
    let count = |table: &str| -> i64 {
        conn.query_row(&format!("SELECT COUNT(*) FROM {table}"), [], |row| row.get(0))
            .unwrap()
    };
    Snapshot {
        requests: RequestRepository::new(conn)
            .find_many(&RequestFilter::default())
            .unwrap(),
        items: items::list(conn).unwrap(),
        bins: bins::list(conn).unwrap(),
        timeline_rows: count("timeline"),
        notification_rows: count("notifications"),
    }
}

fn create(engine: &WorkflowEngine, request_type: RequestType, item: Option<EntityId>, metadata: Value) -> Request {
    let mut new = NewRequest::new(request_type);
    new.item_id = item;
    new.metadata = metadata;
    engine.create_request(new, Some(&op("planner"))).unwrap().request
}

fn act(engine: &WorkflowEngine, id: &EntityId, action: Action, payload: Value) -> Result<Request, WorkflowError> {
    engine
        .transition(id, action, &op("op1"), &payload)
        .map(|outcome| outcome.request)
}

fn list(engine: &WorkflowEngine, request_type: RequestType) -> Vec<Request> {
    engine
        .list_requests(&RequestFilter {
            request_type: Some(request_type),
            ..Default::default()
        })
        .unwrap()
}

fn item(engine: &WorkflowEngine, id: &EntityId) -> InventoryItem {
    engine.get_item(&id.to_string()).unwrap()
}

fn bin(engine: &WorkflowEngine, code: &str) -> Bin {
    bins::find_by_code(engine.store().conn(), code).unwrap().unwrap()
}

fn assert_code(err: &WorkflowError, code: FailureCode) {
    assert_eq!(err.failure_code(), Some(code), "unexpected error: {err}");
}

/// Run an item through WASH; returns the spawned QC request
fn wash(engine: &WorkflowEngine, item: &InventoryItem) -> Request {
    let wash = create(engine, RequestType::Wash, Some(item.id), Value::Null);
    act(engine, &wash.id, Action::ValidateItem, json!({"qr_code": item.qr_code})).unwrap();
    act(engine, &wash.id, Action::Start, Value::Null).unwrap();
    let outcome = engine
        .transition(&wash.id, Action::Complete, &op("op1"), &json!({"wash_code": "stone"}))
        .unwrap();
    let spawned = outcome.spawned();
    assert_eq!(spawned.len(), 1);
    engine.get_request(&spawned[0]).unwrap().request
}

// ============================================================================
// Fan-out
// ============================================================================

#[test]
fn test_cutting_completion_spawns_one_sew_per_unit() {
    let engine = setup_engine();
    let cutting = create(
        &engine,
        RequestType::Cutting,
        None,
        json!({"skus": [{"sku": "A", "quantity": 2}]}),
    );

    let done = act(&engine, &cutting.id, Action::Complete, json!({})).unwrap();
    assert_eq!(done.status, RequestStatus::Completed);

    let mut sews: Vec<_> = list(&engine, RequestType::Sew)
        .into_iter()
        .map(|r| match r.metadata.stage {
            StageMetadata::Sew(s) => s,
            other => panic!("unexpected stage {other:?}"),
        })
        .collect();
    sews.sort_by_key(|s| s.unit_number);
    assert_eq!(sews.len(), 2);
    assert_eq!(sews[0].unit_number, Some(1));
    assert_eq!(sews[1].unit_number, Some(2));
    for sew in &sews {
        assert_eq!(sew.cutting_request_id, Some(cutting.id));
        assert_eq!(sew.total_units, Some(2));
        assert_eq!(sew.sku.as_deref(), Some("A"));
    }
}

#[test]
fn test_fan_out_numbers_units_across_lines() {
    let engine = setup_engine();
    let cutting = create(
        &engine,
        RequestType::Cutting,
        None,
        json!({"skus": [{"sku": "A", "quantity": 2}, {"sku": "B", "quantity": 3}]}),
    );
    let outcome = engine
        .transition(&cutting.id, Action::Complete, &op("op1"), &Value::Null)
        .unwrap();
    assert_eq!(outcome.spawned().len(), 5);
    match &outcome.request.metadata.stage {
        StageMetadata::Cutting(c) => assert_eq!(c.units_cut, Some(5)),
        other => panic!("unexpected stage {other:?}"),
    }

    let mut numbers: Vec<(u32, String)> = list(&engine, RequestType::Sew)
        .into_iter()
        .filter_map(|r| match r.metadata.stage {
            StageMetadata::Sew(s) => Some((s.unit_number?, s.sku?)),
            _ => None,
        })
        .collect();
    numbers.sort();
    assert_eq!(
        numbers,
        vec![
            (1, "A".to_string()),
            (2, "A".to_string()),
            (3, "B".to_string()),
            (4, "B".to_string()),
            (5, "B".to_string()),
        ]
    );
}

#[test]
fn test_pattern_completion_spawns_cutting_with_lines() {
    let engine = setup_engine();
    let pattern = create(
        &engine,
        RequestType::Pattern,
        None,
        json!({"pattern_ref": "P-77", "skus": [{"sku": "A", "quantity": 4}]}),
    );
    act(&engine, &pattern.id, Action::Complete, Value::Null).unwrap();

    let cuttings = list(&engine, RequestType::Cutting);
    assert_eq!(cuttings.len(), 1);
    match &cuttings[0].metadata.stage {
        StageMetadata::Cutting(c) => {
            assert_eq!(c.pattern_request_id, Some(pattern.id));
            assert_eq!(c.total_units(), Some(4));
        }
        other => panic!("unexpected stage {other:?}"),
    }
}

#[test]
fn test_quantity_reconciliation_against_batch() {
    let engine = setup_engine();
    let batch = engine.add_batch("A", 3).unwrap();
    let mut new = NewRequest::new(RequestType::Cutting);
    new.batch_id = Some(batch.id);
    new.metadata = json!({"skus": [{"sku": "A", "quantity": 2}]});
    let cutting = engine.create_request(new, None).unwrap().request;

    let before = snapshot(&engine);
    let err = act(&engine, &cutting.id, Action::Complete, Value::Null).unwrap_err();
    assert_code(&err, FailureCode::QuantityMismatch);
    assert_eq!(snapshot(&engine), before);

    let mut loose = test_config();
    loose.workflow.strict_quantity_reconciliation = false;
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("loose.db");
    let engine = WorkflowEngine::new(Store::open(&path, &StoreOptions::default()).unwrap(), &loose);
    let batch = engine.add_batch("A", 3).unwrap();
    let mut new = NewRequest::new(RequestType::Cutting);
    new.batch_id = Some(batch.id);
    new.metadata = json!({"skus": [{"sku": "A", "quantity": 2}]});
    let cutting = engine.create_request(new, None).unwrap().request;
    let outcome = engine
        .transition(&cutting.id, Action::Complete, &op("op1"), &Value::Null)
        .unwrap();
    assert_eq!(outcome.spawned().len(), 2);
    for sew in list(&engine, RequestType::Sew) {
        assert_eq!(sew.batch_id, Some(batch.id));
    }
}

#[test]
fn test_oversized_cutting_plan_is_rejected() {
    let engine = setup_engine();
    for skus in [
        json!([{"sku": "A", "quantity": u32::MAX}, {"sku": "B", "quantity": 2}]),
        json!([{"sku": "A", "quantity": 10_001}]),
    ] {
        let mut new = NewRequest::new(RequestType::Cutting);
        new.metadata = json!({ "skus": skus });
        let err = engine.create_request(new, None).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Validation, "{err}");
    }
    assert!(list(&engine, RequestType::Cutting).is_empty());
}

#[test]
fn test_fan_out_ceiling_is_checked_at_completion() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("loom.db");
    let planner = WorkflowEngine::new(Store::open(&path, &StoreOptions::default()).unwrap(), &test_config());
    let cutting = create(
        &planner,
        RequestType::Cutting,
        None,
        json!({"skus": [{"sku": "A", "quantity": 2}, {"sku": "B", "quantity": 2}]}),
    );

    let mut tight = test_config();
    tight.workflow.max_fan_out_units = 3;
    let floor = WorkflowEngine::new(Store::open(&path, &StoreOptions::default()).unwrap(), &tight);
    let before = snapshot(&floor);
    let err = act(&floor, &cutting.id, Action::Complete, Value::Null).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Validation);
    assert_eq!(snapshot(&floor), before);
    assert!(list(&floor, RequestType::Sew).is_empty());

    let outcome = planner
        .transition(&cutting.id, Action::Complete, &op("op1"), &Value::Null)
        .unwrap();
    assert_eq!(outcome.spawned().len(), 4);
}

#[test]
fn test_sew_completion_mints_item_and_spawns_wash() {
    let engine = setup_engine();
    let cutting = create(
        &engine,
        RequestType::Cutting,
        None,
        json!({"skus": [{"sku": "JN01-32-SLIM-34-RAW", "quantity": 1}]}),
    );
    act(&engine, &cutting.id, Action::Complete, Value::Null).unwrap();
    let sew = list(&engine, RequestType::Sew).remove(0);

    let err = act(&engine, &sew.id, Action::Complete, Value::Null).unwrap_err();
    assert_code(&err, FailureCode::PreconditionFailed);

    let outcome = engine
        .transition(&sew.id, Action::Complete, &op("op1"), &json!({"qr_code": "QR-100"}))
        .unwrap();
    let item_id = outcome.request.item_id.expect("sew request linked to its item");
    let minted = item(&engine, &item_id);
    assert_eq!(minted.qr_code, "QR-100");
    assert_eq!((minted.status1, minted.status2), (ItemStage::Wash, ItemSubStatus::Pending));

    let washes = list(&engine, RequestType::Wash);
    assert_eq!(washes.len(), 1);
    assert_eq!(washes[0].item_id, Some(item_id));
    assert!(outcome
        .side_effects
        .iter()
        .any(|fx| matches!(fx, SideEffect::ItemCreated { .. })));
}

// ============================================================================
// WASH
// ============================================================================

#[test]
fn test_wash_requires_validation_before_start() {
    let engine = setup_engine();
    let garment = denim_item(&engine, "QR-1", Some("A-01"));
    let wash = create(&engine, RequestType::Wash, Some(garment.id), Value::Null);

    let err = act(&engine, &wash.id, Action::Start, Value::Null).unwrap_err();
    assert_code(&err, FailureCode::PreconditionFailed);

    let err = act(&engine, &wash.id, Action::ValidateItem, json!({"qr_code": "QR-2"})).unwrap_err();
    assert_code(&err, FailureCode::ItemMismatch);

    act(&engine, &wash.id, Action::ValidateItem, json!({"qr_code": "QR-1"})).unwrap();
    assert_eq!(item(&engine, &garment.id).status2, ItemSubStatus::Validated);
    let started = act(&engine, &wash.id, Action::Start, Value::Null).unwrap();
    assert_eq!(started.status, RequestStatus::InProgress);
    assert!(started.metadata.stamps.started_at.is_some());
}

#[test]
fn test_wash_completion_relocates_and_rewrites_sku() {
    let engine = setup_engine();
    let garment = denim_item(&engine, "QR-1", Some("A-01"));
    let qc = wash(&engine, &garment);

    let washed = item(&engine, &garment.id);
    assert_eq!(washed.sku.to_string(), "JN01-32-SLIM-34-STONE");
    assert_eq!(washed.bin_id, Some(bin(&engine, STAGING).id));
    assert_eq!((washed.status1, washed.status2), (ItemStage::Qc, ItemSubStatus::Pending));
    assert_eq!(bin(&engine, STAGING).current_count, 1);
    assert_eq!(bin(&engine, "A-01").current_count, 0);

    assert_eq!(qc.request_type, RequestType::Qc);
    let wash_request = list(&engine, RequestType::Wash).remove(0);
    match &wash_request.metadata.stage {
        StageMetadata::Wash(w) => {
            assert_eq!(w.previous_sku.as_deref(), Some("JN01-32-SLIM-34-RAW"));
            assert_eq!(w.wash_code.as_deref(), Some("stone"));
            assert!(w.item_validation.is_some());
        }
        other => panic!("unexpected stage {other:?}"),
    }
    match &qc.metadata.stage {
        StageMetadata::Qc(q) => assert_eq!(q.source_request_id, Some(wash_request.id)),
        other => panic!("unexpected stage {other:?}"),
    }
}

#[test]
fn test_wash_into_full_staging_bin_rolls_back() {
    let engine = WorkflowEngine::new(Store::open_in_memory().unwrap(), &test_config());
    engine.add_bin(Bin::new(STAGING, 1)).unwrap();
    engine.add_bin(Bin::new("A-01", 5)).unwrap();
    denim_item(&engine, "QR-0", Some(STAGING));
    let garment = denim_item(&engine, "QR-1", Some("A-01"));

    let wash = create(&engine, RequestType::Wash, Some(garment.id), Value::Null);
    act(&engine, &wash.id, Action::ValidateItem, json!({"qr_code": "QR-1"})).unwrap();
    act(&engine, &wash.id, Action::Start, Value::Null).unwrap();

    let before = snapshot(&engine);
    let err = act(&engine, &wash.id, Action::Complete, json!({"wash_code": "STONE"})).unwrap_err();
    assert_code(&err, FailureCode::BinFull);
    assert_eq!(snapshot(&engine), before);
}

// ============================================================================
// QC branch
// ============================================================================

#[test]
fn test_qc_pass_spawns_finishing() {
    let engine = setup_engine();
    let garment = denim_item(&engine, "QR-1", None);
    let qc = wash(&engine, &garment);

    let err = act(&engine, &qc.id, Action::Complete, json!({"passed": true})).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidTransition);

    act(&engine, &qc.id, Action::Start, Value::Null).unwrap();
    act(
        &engine,
        &qc.id,
        Action::RecordMeasurements,
        json!({"measurements": [{"name": "inseam", "value": 34.0, "unit": "in"}]}),
    )
    .unwrap();
    let done = act(&engine, &qc.id, Action::Complete, json!({"passed": true})).unwrap();
    assert_eq!(done.status, RequestStatus::Completed);

    let finishing = list(&engine, RequestType::Finishing);
    assert_eq!(finishing.len(), 1);
    assert_eq!(finishing[0].item_id, Some(garment.id));
    assert!(list(&engine, RequestType::Recovery).is_empty());
    let after = item(&engine, &garment.id);
    assert_eq!((after.status1, after.status2), (ItemStage::Finishing, ItemSubStatus::Pending));
}

#[test]
fn test_qc_fail_spawns_recovery_with_defects() {
    let engine = setup_engine();
    let garment = denim_item(&engine, "QR-1", None);
    let qc = wash(&engine, &garment);
    act(&engine, &qc.id, Action::Start, Value::Null).unwrap();
    act(
        &engine,
        &qc.id,
        Action::RecordDefects,
        json!({"defects": [{"code": "STAIN", "severity": "minor"}]}),
    )
    .unwrap();

    let failed = act(
        &engine,
        &qc.id,
        Action::Complete,
        json!({"passed": false, "defects": [{"code": "SEAM"}]}),
    )
    .unwrap();
    assert_eq!(failed.status, RequestStatus::Failed);
    assert!(failed.metadata.stamps.failed_at.is_some());

    assert!(list(&engine, RequestType::Finishing).is_empty());
    let recoveries = list(&engine, RequestType::Recovery);
    assert_eq!(recoveries.len(), 1);
    match &recoveries[0].metadata.stage {
        StageMetadata::Recovery(r) => {
            let codes: Vec<_> = r.defects.iter().map(|d| d.code.as_str()).collect();
            assert_eq!(codes, vec!["STAIN", "SEAM"]);
            assert_eq!(r.qc_request_id, Some(qc.id));
        }
        other => panic!("unexpected stage {other:?}"),
    }
    let after = item(&engine, &garment.id);
    assert_eq!((after.status1, after.status2), (ItemStage::Recovery, ItemSubStatus::Defective));
}

#[test]
fn test_qc_fail_without_defects_is_rejected() {
    let engine = setup_engine();
    let garment = denim_item(&engine, "QR-1", None);
    let qc = wash(&engine, &garment);
    act(&engine, &qc.id, Action::Start, Value::Null).unwrap();

    let before = snapshot(&engine);
    let err = act(&engine, &qc.id, Action::Complete, json!({"passed": false})).unwrap_err();
    assert_code(&err, FailureCode::PreconditionFailed);
    assert_eq!(snapshot(&engine), before);
}

#[test]
fn test_recovery_rework_and_scrap() {
    let engine = setup_engine();
    let fail_qc = |garment: &InventoryItem| -> Request {
        let qc = wash(&engine, garment);
        act(&engine, &qc.id, Action::Start, Value::Null).unwrap();
        act(
            &engine,
            &qc.id,
            Action::Complete,
            json!({"passed": false, "defects": [{"code": "TEAR"}]}),
        )
        .unwrap();
        list(&engine, RequestType::Recovery)
            .into_iter()
            .find(|r| r.item_id == Some(garment.id))
            .unwrap()
    };

    let reworked = denim_item(&engine, "QR-1", None);
    let recovery = fail_qc(&reworked);
    act(&engine, &recovery.id, Action::Complete, json!({"resolution": "rework"})).unwrap();
    let after = item(&engine, &reworked.id);
    assert_eq!((after.status1, after.status2), (ItemStage::Qc, ItemSubStatus::Pending));
    let open_qc: Vec<_> = list(&engine, RequestType::Qc)
        .into_iter()
        .filter(|r| r.item_id == Some(reworked.id) && r.status == RequestStatus::Pending)
        .collect();
    assert_eq!(open_qc.len(), 1);

    let scrapped = denim_item(&engine, "QR-2", None);
    let recovery = fail_qc(&scrapped);
    let staging_before = bin(&engine, STAGING).current_count;
    act(&engine, &recovery.id, Action::Complete, json!({"resolution": "scrap"})).unwrap();
    let after = item(&engine, &scrapped.id);
    assert_eq!((after.status1, after.status2), (ItemStage::Recovery, ItemSubStatus::Scrapped));
    assert_eq!(after.bin_id, None);
    assert_eq!(bin(&engine, STAGING).current_count, staging_before - 1);
}

// ============================================================================
// Downstream stages and bins
// ============================================================================

#[test]
fn test_finishing_and_packing_put_item_in_stock() {
    let engine = setup_engine();
    let garment = denim_item(&engine, "QR-1", None);
    let qc = wash(&engine, &garment);
    act(&engine, &qc.id, Action::Start, Value::Null).unwrap();
    act(&engine, &qc.id, Action::Complete, json!({"passed": true})).unwrap();

    let finishing = list(&engine, RequestType::Finishing).remove(0);
    act(&engine, &finishing.id, Action::Complete, json!({"notes": "pressed"})).unwrap();
    let packing = list(&engine, RequestType::Packing).remove(0);

    let mut restricted = Bin::new("B-RAW", 5);
    restricted.sku_restriction = Some("JN01-32-SLIM-34-RAW".to_string());
    engine.add_bin(restricted).unwrap();
    let err = act(&engine, &packing.id, Action::Complete, json!({"bin_id": "B-RAW"})).unwrap_err();
    assert_code(&err, FailureCode::SkuMismatch);

    let done = act(
        &engine,
        &packing.id,
        Action::Complete,
        json!({"bin_id": "A-01", "package_ref": "PKG-9"}),
    )
    .unwrap();
    assert_eq!(done.status, RequestStatus::Completed);
    let after = item(&engine, &garment.id);
    assert_eq!((after.status1, after.status2), (ItemStage::Stock, ItemSubStatus::Available));
    assert_eq!(after.bin_id, Some(bin(&engine, "A-01").id));
    assert_eq!(bin(&engine, STAGING).current_count, 0);
}

#[test]
fn test_packing_into_a_full_bin_the_item_already_holds() {
    let engine = setup_engine();
    let garment = denim_item(&engine, "QR-1", None);
    let qc = wash(&engine, &garment);
    for n in 2..=10 {
        denim_item(&engine, &format!("QR-{n}"), Some(STAGING));
    }
    let staging = bin(&engine, STAGING);
    assert_eq!(staging.current_count, staging.capacity);

    act(&engine, &qc.id, Action::Start, Value::Null).unwrap();
    act(&engine, &qc.id, Action::Complete, json!({"passed": true})).unwrap();
    let finishing = list(&engine, RequestType::Finishing).remove(0);
    act(&engine, &finishing.id, Action::Complete, Value::Null).unwrap();
    let packing = list(&engine, RequestType::Packing).remove(0);

    let done = act(&engine, &packing.id, Action::Complete, json!({"bin_id": STAGING})).unwrap();
    assert_eq!(done.status, RequestStatus::Completed);
    let after = item(&engine, &garment.id);
    assert_eq!(after.bin_id, Some(staging.id));
    assert_eq!(after.status_pair(), (ItemStage::Stock, ItemSubStatus::Available));
    assert_eq!(bin(&engine, STAGING).current_count, staging.capacity);
}

#[test]
fn test_move_into_full_bin_fails_and_changes_nothing() {
    let engine = setup_engine();
    engine.add_bin(Bin::new("B1", 1)).unwrap();
    denim_item(&engine, "QR-0", Some("B1"));
    let garment = denim_item(&engine, "QR-1", Some("A-01"));
    let b1 = bin(&engine, "B1");
    assert_eq!(b1.current_count, 1);

    let mv = create(&engine, RequestType::Move, Some(garment.id), json!({"to_bin_id": b1.id}));
    let before = snapshot(&engine);
    let err = act(&engine, &mv.id, Action::Complete, json!({"qr_code": "QR-1"})).unwrap_err();
    assert_code(&err, FailureCode::BinFull);
    assert_eq!(snapshot(&engine), before);
    assert_eq!(bin(&engine, "B1"), b1);
}

#[test]
fn test_move_checks_scan_and_relocates() {
    let engine = setup_engine();
    engine.add_bin(Bin::new("B2", 3)).unwrap();
    let garment = denim_item(&engine, "QR-1", Some("A-01"));
    let mv = create(&engine, RequestType::Move, Some(garment.id), Value::Null);

    let err = act(&engine, &mv.id, Action::Complete, json!({"qr_code": "QR-X", "to_bin_id": "B2"})).unwrap_err();
    assert_code(&err, FailureCode::ItemMismatch);
    let err = act(&engine, &mv.id, Action::Complete, json!({"qr_code": "QR-1", "to_bin_id": "A-01"})).unwrap_err();
    assert_code(&err, FailureCode::PreconditionFailed);

    let done = act(
        &engine,
        &mv.id,
        Action::Complete,
        json!({"qr_code": "QR-1", "to_bin_id": "B2", "reason": "rebalance"}),
    )
    .unwrap();
    match &done.metadata.stage {
        StageMetadata::Move(m) => {
            assert_eq!(m.from_bin_id, Some(bin(&engine, "A-01").id));
            assert_eq!(m.to_bin_id, Some(bin(&engine, "B2").id));
        }
        other => panic!("unexpected stage {other:?}"),
    }
    assert_eq!(bin(&engine, "A-01").current_count, 0);
    assert_eq!(bin(&engine, "B2").current_count, 1);
    let after = item(&engine, &garment.id);
    assert_eq!((after.status1, after.status2), (ItemStage::Stock, ItemSubStatus::Available));
}

#[test]
fn test_inactive_bin_is_rejected() {
    let engine = setup_engine();
    engine.add_bin(Bin::new("B3", 3)).unwrap();
    engine.set_bin_active("B3", false).unwrap();
    let garment = denim_item(&engine, "QR-1", Some("A-01"));
    let mv = create(&engine, RequestType::Move, Some(garment.id), Value::Null);
    let err = act(&engine, &mv.id, Action::Complete, json!({"qr_code": "QR-1", "to_bin_id": "B3"})).unwrap_err();
    assert_code(&err, FailureCode::BinInactive);
}

// ============================================================================
// State machine and atomicity
// ============================================================================

#[test]
fn test_terminal_status_is_final() {
    let engine = setup_engine();
    let cutting = create(
        &engine,
        RequestType::Cutting,
        None,
        json!({"skus": [{"sku": "A", "quantity": 1}]}),
    );
    act(&engine, &cutting.id, Action::Complete, Value::Null).unwrap();
    let before = snapshot(&engine);

    let err = act(&engine, &cutting.id, Action::Complete, Value::Null).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::AlreadyProcessed);
    for (action, payload) in [
        (Action::Start, Value::Null),
        (Action::Fail, json!({"reason": "late"})),
        (Action::Assign, json!({"assigned_to": "op2"})),
    ] {
        let err = act(&engine, &cutting.id, action, payload).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidTransition, "{action}");
    }
    assert_eq!(snapshot(&engine), before);
}

#[test]
fn test_failed_request_rejects_further_actions() {
    let engine = setup_engine();
    let garment = denim_item(&engine, "QR-1", None);
    let wash = create(&engine, RequestType::Wash, Some(garment.id), Value::Null);
    let failed = act(&engine, &wash.id, Action::Fail, json!({"reason": "machine down"})).unwrap();
    assert_eq!(failed.status, RequestStatus::Failed);
    assert_eq!(failed.metadata.stamps.failure_reason.as_deref(), Some("machine down"));

    let err = act(&engine, &wash.id, Action::Fail, json!({"reason": "again"})).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::AlreadyProcessed);
    let err = act(&engine, &wash.id, Action::ValidateItem, json!({"qr_code": "QR-1"})).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidTransition);
    // never entered WASH, so the item keeps its stock status
    let after = item(&engine, &garment.id);
    assert_eq!(after.status_pair(), (ItemStage::Stock, ItemSubStatus::Available));
}

#[test]
fn test_failing_a_started_wash_rests_the_item() {
    let engine = setup_engine();
    let garment = denim_item(&engine, "QR-1", None);
    let wash = create(&engine, RequestType::Wash, Some(garment.id), Value::Null);
    act(&engine, &wash.id, Action::ValidateItem, json!({"qr_code": "QR-1"})).unwrap();
    act(&engine, &wash.id, Action::Start, Value::Null).unwrap();
    assert_eq!(
        item(&engine, &garment.id).status_pair(),
        (ItemStage::Wash, ItemSubStatus::InProgress)
    );

    let outcome = engine
        .transition(&wash.id, Action::Fail, &op("op1"), &json!({"reason": "machine down"}))
        .unwrap();
    assert_eq!(outcome.request.status, RequestStatus::Failed);
    assert!(outcome.side_effects.iter().any(|fx| matches!(
        fx,
        SideEffect::ItemUpdated { status2: ItemSubStatus::Failed, .. }
    )));
    assert_eq!(
        item(&engine, &garment.id).status_pair(),
        (ItemStage::Wash, ItemSubStatus::Failed)
    );

    let retry = create(&engine, RequestType::Wash, Some(garment.id), Value::Null);
    assert_eq!(retry.status, RequestStatus::Pending);
}

#[test]
fn test_spawn_conflict_rolls_back_the_whole_transition() {
    let engine = setup_engine();
    let garment = denim_item(&engine, "QR-1", None);
    let qc = wash(&engine, &garment);
    act(&engine, &qc.id, Action::Start, Value::Null).unwrap();
    // A FINISHING request already open for the item blocks the spawn
    create(&engine, RequestType::Finishing, Some(garment.id), Value::Null);

    let before = snapshot(&engine);
    let err = act(&engine, &qc.id, Action::Complete, json!({"passed": true})).unwrap_err();
    assert_code(&err, FailureCode::ActiveRequestExists);
    assert_eq!(snapshot(&engine), before);
}

#[test]
fn test_invalid_payload_is_a_validation_error() {
    let engine = setup_engine();
    let garment = denim_item(&engine, "QR-1", None);
    let qc = wash(&engine, &garment);
    act(&engine, &qc.id, Action::Start, Value::Null).unwrap();

    let err = act(&engine, &qc.id, Action::Complete, json!({"passed": "yes"})).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Validation);
    let err = act(&engine, &qc.id, Action::Complete, json!({"verdict": true})).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Validation);
    let err = act(&engine, &qc.id, Action::Complete, json!({})).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Validation);
    let err = act(&engine, &qc.id, Action::ValidateItem, json!({"qr_code": "QR-1"})).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Validation);
}

#[test]
fn test_unknown_request_is_not_found() {
    let engine = setup_engine();
    let missing: EntityId = "REQ-01ARZ3NDEKTSV4RRFFQ69G5FAV".parse().unwrap();
    let err = act(&engine, &missing, Action::Start, Value::Null).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NotFound);
    assert_eq!(engine.get_request(&missing).unwrap_err().kind(), ErrorKind::NotFound);
    assert_eq!(engine.timeline(&missing).unwrap_err().kind(), ErrorKind::NotFound);
}

#[test]
fn test_second_active_request_for_item_is_rejected() {
    let engine = setup_engine();
    let garment = denim_item(&engine, "QR-1", None);
    create(&engine, RequestType::Wash, Some(garment.id), Value::Null);
    let mut again = NewRequest::new(RequestType::Wash);
    again.item_id = Some(garment.id);
    let err = engine.create_request(again, None).unwrap_err();
    assert_code(&err, FailureCode::ActiveRequestExists);
}

#[test]
fn test_item_bound_types_require_an_item() {
    let engine = setup_engine();
    let err = engine
        .create_request(NewRequest::new(RequestType::Qc), None)
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Validation);
}

// ============================================================================
// Batch transitions
// ============================================================================

#[test]
fn test_batch_start_is_all_or_nothing() {
    let engine = setup_engine();
    let lines = json!({"skus": [{"sku": "A", "quantity": 1}]});
    let ids: Vec<EntityId> = (0..3)
        .map(|_| create(&engine, RequestType::Cutting, None, lines.clone()).id)
        .collect();
    act(&engine, &ids[1], Action::Start, Value::Null).unwrap();

    let before = snapshot(&engine);
    let err = engine
        .batch_transition(&ids, Action::Start, &op("op1"), &Value::Null)
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidTransition);
    assert_eq!(snapshot(&engine), before);

    let pending = [ids[0], ids[2]];
    let outcome = engine
        .batch_transition(&pending, Action::Start, &op("op1"), &Value::Null)
        .unwrap();
    assert!(outcome
        .requests
        .iter()
        .all(|r| r.status == RequestStatus::InProgress));
}

#[test]
fn test_batch_rejects_duplicates_and_empty() {
    let engine = setup_engine();
    let cutting = create(&engine, RequestType::Cutting, None, Value::Null);
    let err = engine
        .batch_transition(&[], Action::Start, &op("op1"), &Value::Null)
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Validation);
    let err = engine
        .batch_transition(&[cutting.id, cutting.id], Action::Start, &op("op1"), &Value::Null)
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Validation);
}

// ============================================================================
// Idempotency, timeline, events
// ============================================================================

#[test]
fn test_idempotency_key_creates_at_most_once() {
    let engine = setup_engine();
    let key = IdempotencyKey::new("order-42-cutting").unwrap();
    let mut new = NewRequest::new(RequestType::Cutting);
    new.metadata = json!({"skus": [{"sku": "A", "quantity": 1}]});
    new.idempotency_key = Some(key);

    let first = engine.create_request(new.clone(), None).unwrap();
    let second = engine.create_request(new.clone(), None).unwrap();
    assert_eq!(first.request.id, second.request.id);
    assert!(second.side_effects.is_empty());
    assert_eq!(list(&engine, RequestType::Cutting).len(), 1);

    new.idempotency_key = Some(new.intent_key());
    let third = engine.create_request(new.clone(), None).unwrap();
    assert_ne!(third.request.id, first.request.id);
    assert_eq!(engine.create_request(new, None).unwrap().request.id, third.request.id);
}

#[test]
fn test_timeline_records_every_step_in_order() {
    let engine = setup_engine();
    let garment = denim_item(&engine, "QR-1", None);
    let qc = wash(&engine, &garment);
    let wash_request = list(&engine, RequestType::Wash).remove(0);

    let steps: Vec<String> = engine
        .timeline(&wash_request.id)
        .unwrap()
        .into_iter()
        .map(|e| e.step)
        .collect();
    assert_eq!(steps, ["CREATED", "ITEM_VALIDATED", "STARTED", "COMPLETED"]);

    let details = engine.get_request(&qc.id).unwrap();
    assert_eq!(details.item.map(|i| i.id), Some(garment.id));
    assert_eq!(details.timeline.len(), 1);
    assert_eq!(details.timeline[0].metadata["spawned_by"], json!(wash_request.id));

    let spawned = events::list(engine.store().conn())
        .unwrap()
        .into_iter()
        .filter(|e| e.event_type == EventType::RequestSpawned)
        .count();
    assert_eq!(spawned, 1);
}

#[test]
fn test_configured_step_graph_is_enforced() {
    let mut config = test_config();
    let mut graph = HashMap::new();
    graph.insert("CREATED".to_string(), vec!["STARTED".to_string()]);
    graph.insert("STARTED".to_string(), vec!["COMPLETED".to_string()]);
    config.workflow.step_graphs.insert(RequestType::Pattern, graph);
    let engine = WorkflowEngine::new(Store::open_in_memory().unwrap(), &config);

    let pattern = create(
        &engine,
        RequestType::Pattern,
        None,
        json!({"skus": [{"sku": "A", "quantity": 1}]}),
    );
    let err = act(&engine, &pattern.id, Action::Complete, Value::Null).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidTransition);
    let err = act(&engine, &pattern.id, Action::Assign, json!({"assigned_to": "op2"})).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidTransition);

    act(&engine, &pattern.id, Action::Start, Value::Null).unwrap();
    let done = act(&engine, &pattern.id, Action::Complete, Value::Null).unwrap();
    assert_eq!(done.status, RequestStatus::Completed);
}

#[test]
fn test_default_cutting_graph_allows_reassignment() {
    let engine = setup_engine();
    let cutting = create(&engine, RequestType::Cutting, None, json!({"skus": [{"sku": "A", "quantity": 1}]}));
    act(&engine, &cutting.id, Action::Assign, json!({"assigned_to": "op2"})).unwrap();
    act(&engine, &cutting.id, Action::Start, Value::Null).unwrap();
    let reassigned = act(&engine, &cutting.id, Action::Assign, json!({"assigned_to": "op3"})).unwrap();
    assert_eq!(reassigned.assigned_to.as_deref(), Some("op3"));
    assert_eq!(engine.notifications_for("op3", true).unwrap().len(), 1);
    act(&engine, &cutting.id, Action::Complete, Value::Null).unwrap();
}

struct RequireAssignee;

impl StepValidator for RequireAssignee {
    fn name(&self) -> &'static str {
        "require_assignee"
    }

    fn validate(&self, ctx: &ValidationContext<'_>) -> Result<(), WorkflowError> {
        match &ctx.request.assigned_to {
            Some(_) => Ok(()),
            None => Err(WorkflowError::precondition(
                FailureCode::PreconditionFailed,
                format!("request {} has no assignee", ctx.request.id),
            )),
        }
    }
}

#[test]
fn test_custom_validator_gates_completion() {
    let config = test_config();
    let mut validators = ValidatorRegistry::defaults(&config.workflow);
    validators.register(RequestType::Cutting, Action::Complete, RequireAssignee);
    assert_eq!(
        validators.names(RequestType::Cutting, Action::Complete).last(),
        Some(&"require_assignee")
    );
    let engine = WorkflowEngine::new(Store::open_in_memory().unwrap(), &config).with_validators(validators);

    let cutting = create(&engine, RequestType::Cutting, None, json!({"skus": [{"sku": "A", "quantity": 1}]}));
    let before = snapshot(&engine);
    let err = act(&engine, &cutting.id, Action::Complete, Value::Null).unwrap_err();
    assert_code(&err, FailureCode::PreconditionFailed);
    assert_eq!(snapshot(&engine), before);

    act(&engine, &cutting.id, Action::Assign, json!({"assigned_to": "op2"})).unwrap();
    let done = act(&engine, &cutting.id, Action::Complete, Value::Null).unwrap();
    assert_eq!(done.status, RequestStatus::Completed);
}

// ============================================================================
// Notifications
// ============================================================================

struct Unreachable;

impl NotificationDispatcher for Unreachable {
    fn enqueue(&self, _user_id: &str, _message: &str, _metadata: &Value) -> Result<(), DispatchError> {
        Err(DispatchError("gateway unreachable".to_string()))
    }
}

#[test]
fn test_failed_dispatch_keeps_the_transition() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("loom.db");
    let engine = WorkflowEngine::new(Store::open(&path, &StoreOptions::default()).unwrap(), &test_config())
        .with_dispatcher(Unreachable);

    let cutting = create(&engine, RequestType::Cutting, None, Value::Null);
    let outcome = engine
        .transition(&cutting.id, Action::Assign, &op("lead"), &json!({"assigned_to": "op7"}))
        .unwrap();
    assert_eq!(outcome.request.assigned_to.as_deref(), Some("op7"));
    assert!(outcome
        .side_effects
        .iter()
        .any(|fx| matches!(fx, SideEffect::NotificationFailed { .. })));

    let inbox = engine.notifications_for("op7", true).unwrap();
    assert_eq!(inbox.len(), 1);
    assert!(!inbox[0].dispatched);

    let retry = WorkflowEngine::new(Store::open(&path, &StoreOptions::default()).unwrap(), &test_config())
        .with_dispatcher(TracingDispatcher);
    let effects = retry.dispatch_pending().unwrap();
    assert!(matches!(effects.as_slice(), [SideEffect::NotificationSent { .. }]));
    assert!(notifications::list_undispatched(retry.store().conn()).unwrap().is_empty());

    retry.mark_notification_read(&inbox[0].id).unwrap();
    assert!(retry.notifications_for("op7", true).unwrap().is_empty());
}

// ============================================================================
// Concurrency
// ============================================================================

#[test]
fn test_racing_moves_for_last_slot() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("loom.db");
    let open = || WorkflowEngine::new(Store::open(&path, &StoreOptions::default()).unwrap(), &test_config());

    let setup = open();
    setup.add_bin(Bin::new("A-01", 5)).unwrap();
    setup.add_bin(Bin::new("LAST", 1)).unwrap();
    let moves: Vec<(EntityId, String)> = ["QR-1", "QR-2"]
        .iter()
        .map(|qr| {
            let garment = denim_item(&setup, qr, Some("A-01"));
            let mv = create(&setup, RequestType::Move, Some(garment.id), Value::Null);
            (mv.id, qr.to_string())
        })
        .collect();

    let barrier = Arc::new(Barrier::new(moves.len()));
    let handles: Vec<_> = moves
        .into_iter()
        .map(|(id, qr)| {
            let engine = open();
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || {
                barrier.wait();
                engine
                    .transition(&id, Action::Complete, &op("op1"), &json!({"qr_code": qr, "to_bin_id": "LAST"}))
                    .map(|_| ())
            })
        })
        .collect();
    let results: Vec<Result<(), WorkflowError>> =
        handles.into_iter().map(|h| h.join().unwrap()).collect();

    assert_eq!(results.iter().filter(|r| r.is_ok()).count(), 1);
    let err = results.into_iter().find_map(Result::err).unwrap();
    assert_code(&err, FailureCode::BinFull);

    let last = bin(&setup, "LAST");
    assert_eq!(last.current_count, 1);
    assert!(last.current_count <= last.capacity);
    assert_eq!(bin(&setup, "A-01").current_count, 1);
}
