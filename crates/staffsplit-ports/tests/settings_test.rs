use pretty_assertions::assert_eq;
use staffsplit_ports::{EngineKind, FailureTolerance, Fraction01, PipelineSettings};

#[test]
fn empty_json_yields_defaults() {
    let settings: PipelineSettings = serde_json::from_str("{}").expect("parse");
    let defaults = PipelineSettings::default();
    assert_eq!(settings.strip_timeout_ms, 120_000);
    assert_eq!(settings.engine, EngineKind::Audiveris);
    assert_eq!(settings.failure_tolerance, FailureTolerance::AllButTotal);
    assert_eq!(settings.segmentation, defaults.segmentation);
    assert_eq!(settings.preprocess, defaults.preprocess);
    assert!(settings.worker_limit >= 1);
}

#[test]
fn partial_nested_settings_keep_other_defaults() {
    let json = r#"{
        "engine": "oemer",
        "failure_tolerance": { "mode": "max_fraction", "value": 0.25 },
        "segmentation": { "margin_spacings": 2.0 }
    }"#;
    let settings: PipelineSettings = serde_json::from_str(json).expect("parse");
    assert_eq!(settings.engine, EngineKind::Oemer);
    assert_eq!(
        settings.failure_tolerance,
        FailureTolerance::MaxFraction(Fraction01::new(0.25))
    );
    assert_eq!(settings.segmentation.margin_spacings, 2.0);
    assert_eq!(settings.segmentation.lines_per_staff, 5);
}

#[test]
fn out_of_range_fraction_is_clamped_on_load() {
    let json = r#"{ "failure_tolerance": { "mode": "max_fraction", "value": 1.5 } }"#;
    let settings: PipelineSettings = serde_json::from_str(json).expect("parse");
    assert_eq!(
        settings.failure_tolerance,
        FailureTolerance::MaxFraction(Fraction01(1.0))
    );

    let negative: Fraction01 = serde_json::from_str("-0.5").expect("parse");
    assert_eq!(negative.get(), 0.0);
}

#[test]
fn default_tolerance_only_fails_when_everything_failed() {
    let policy = FailureTolerance::AllButTotal;
    assert!(!policy.is_exceeded(0, 3));
    assert!(!policy.is_exceeded(2, 3));
    assert!(policy.is_exceeded(3, 3));
}

#[test]
fn strict_tolerance_fails_on_any_failure() {
    let policy = FailureTolerance::Strict;
    assert!(!policy.is_exceeded(0, 4));
    assert!(policy.is_exceeded(1, 4));
}

#[test]
fn fraction_tolerance_compares_against_limit() {
    let policy = FailureTolerance::MaxFraction(Fraction01::new(0.5));
    assert!(!policy.is_exceeded(1, 4));
    assert!(!policy.is_exceeded(2, 4));
    assert!(policy.is_exceeded(3, 4));
    assert!(policy.is_exceeded(1, 1));
}

#[test]
fn fraction_is_clamped() {
    assert_eq!(Fraction01::new(1.7).get(), 1.0);
    assert_eq!(Fraction01::new(-0.2).get(), 0.0);
    assert_eq!(Fraction01::new(f32::NAN).get(), 0.0);
}
