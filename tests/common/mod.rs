//! Shared test helpers for integration tests

#![allow(dead_code)]

use assert_cmd::cargo;
use assert_cmd::Command;
use loomline::core::config::Config;
use loomline::core::store::Store;
use loomline::core::workflow::{Actor, WorkflowEngine};
use loomline::core::Sku;
use loomline::entities::bin::Bin;
use loomline::entities::item::InventoryItem;
use std::fs;
use tempfile::TempDir;

pub const STAGING: &str = "WASH-STAGING";
pub const DENIM_SKU: &str = "JN01-32-SLIM-34-RAW";

/// Helper to get a loom command
pub fn loom() -> Command {
    let mut cmd = Command::new(cargo::cargo_bin!("loom"));
    cmd.env_remove("LOOM_ACTOR").env_remove("LOOM_LOG");
    cmd
}

/// Helper to create a test project in a temp directory
pub fn setup_test_project() -> TempDir {
    let tmp = TempDir::new().unwrap();
    loom().current_dir(tmp.path()).arg("init").assert().success();
    tmp
}

/// Overwrite the project config
pub fn write_config(tmp: &TempDir, yaml: &str) {
    fs::write(tmp.path().join(".loom/config.yaml"), yaml).unwrap();
}

/// Run a loom command with `-o id` and return the first line of stdout
pub fn loom_id(tmp: &TempDir, args: &[&str]) -> String {
    let output = loom()
        .current_dir(tmp.path())
        .args(args)
        .args(["-o", "id"])
        .output()
        .unwrap();
    assert!(
        output.status.success(),
        "command {:?} failed: {}",
        args,
        String::from_utf8_lossy(&output.stderr)
    );
    String::from_utf8_lossy(&output.stdout)
        .lines()
        .next()
        .unwrap_or_default()
        .trim()
        .to_string()
}

/// Config with a wash staging bin configured
pub fn test_config() -> Config {
    let mut config = Config::default();
    config.workflow.wash_staging_bin = Some(STAGING.to_string());
    config
}

/// In-memory engine with a staging bin and one shelf bin `A-01`
pub fn setup_engine() -> WorkflowEngine {
    let engine = WorkflowEngine::new(Store::open_in_memory().unwrap(), &test_config());
    engine.add_bin(Bin::new(STAGING, 10)).unwrap();
    engine.add_bin(Bin::new("A-01", 5)).unwrap();
    engine
}

pub fn op(name: &str) -> Actor {
    Actor::new(name).unwrap()
}

pub fn denim_item(engine: &WorkflowEngine, qr: &str, bin: Option<&str>) -> InventoryItem {
    let sku: Sku = DENIM_SKU.parse().unwrap();
    engine.register_item(sku, qr, bin).unwrap()
}
