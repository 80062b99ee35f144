mod common;

use common::{page_png, strip_xml, FakeOmr, Reply, THREE_STAVES};
use pretty_assertions::assert_eq;
use staffsplit_core::{export_diagnostics, ConversionResultRef, Pipeline};
use staffsplit_ports::settings::PipelineSettings;
use std::fs;
use std::sync::Arc;

fn read_json(path: &std::path::Path) -> serde_json::Value {
    let data = fs::read(path).expect("read");
    serde_json::from_slice(&data).expect("json")
}

#[test]
fn successful_conversion_writes_report() {
    let dir = tempfile::tempdir().expect("tempdir");
    let engine = Arc::new(FakeOmr::new(vec![
        Reply::Logged(strip_xml(None, 2), "work/strip-0/engine.log".into()),
        Reply::Fail,
        Reply::Xml(strip_xml(None, 1)),
    ]));
    let settings = PipelineSettings::default();
    let pipeline = Pipeline::new(engine, settings.clone());
    let outcome = pipeline.convert(&page_png(&THREE_STAVES)).expect("convert");

    let out = dir.path().join("bundle");
    export_diagnostics(&out, &settings, Some(ConversionResultRef::Done(&outcome.report)))
        .expect("export");

    let version = read_json(&out.join("app_version.json"));
    assert_eq!(version["name"], "StaffSplit");
    assert!(out.join("platform.json").exists());

    let saved: PipelineSettings =
        serde_json::from_slice(&fs::read(out.join("settings.json")).expect("read"))
            .expect("settings");
    assert_eq!(saved, settings);

    let report = read_json(&out.join("report.json"));
    assert_eq!(report["engine"], "fake");
    assert_eq!(report["measure_count"], 3);
    assert_eq!(report["dropped_strips"][0]["strip_index"], 1);
    assert_eq!(report["strips"].as_array().map(|s| s.len()), Some(3));
    assert_eq!(report["engine_logs"][0]["strip_index"], 0);
    assert_eq!(report["engine_logs"][0]["path"], "work/strip-0/engine.log");
}

#[test]
fn failed_conversion_writes_failure() {
    let dir = tempfile::tempdir().expect("tempdir");
    let engine = Arc::new(FakeOmr::new(vec![Reply::Fail; 3]));
    let settings = PipelineSettings::default();
    let pipeline = Pipeline::new(engine, settings.clone());
    let err = pipeline
        .convert(&page_png(&THREE_STAVES))
        .expect_err("all failed");

    export_diagnostics(dir.path(), &settings, Some(ConversionResultRef::Failed(&err)))
        .expect("export");

    let failure = read_json(&dir.path().join("failure.json"));
    assert_eq!(failure["stage"], "merging");
    assert_eq!(failure["failed_strips"], serde_json::json!([0, 1, 2]));
    assert!(!dir.path().join("report.json").exists());
}
