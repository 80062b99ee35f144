use pretty_assertions::assert_eq;
use staffsplit_domain_score::{
    merge, quality_score, repair_measure_durations, Measure, MeasureElement, Note, PartialScore,
    Pitch, RecognizedStrip, Step, TimeSignature,
};

fn pitched(duration: u32) -> MeasureElement {
    MeasureElement::Note(Note::pitched(
        Pitch {
            step: Step::E,
            alter: 0,
            octave: 4,
        },
        duration,
    ))
}

fn score_with(elements: Vec<MeasureElement>) -> staffsplit_domain_score::MergedScore {
    let measure = Measure {
        divisions: Some(1),
        time: Some(TimeSignature::new(4, 4)),
        elements,
        ..Measure::default()
    };
    merge(&[PartialScore::Recognized(RecognizedStrip {
        strip_index: 0,
        part_name: None,
        measures: vec![measure],
    })])
    .expect("merge")
}

fn durations(score: &staffsplit_domain_score::MergedScore) -> Vec<(u32, bool)> {
    score.measures[0]
        .notes()
        .map(|n| (n.duration, n.is_rest()))
        .collect()
}

#[test]
fn underfull_measure_gets_trailing_rest() {
    let mut score = score_with(vec![pitched(1), pitched(1)]);
    assert_eq!(repair_measure_durations(&mut score), 1);
    assert_eq!(durations(&score), vec![(1, false), (1, false), (2, true)]);
}

#[test]
fn overfull_measure_shortens_last_note() {
    let mut score = score_with(vec![pitched(2), pitched(3)]);
    assert_eq!(repair_measure_durations(&mut score), 1);
    assert_eq!(durations(&score), vec![(2, false), (2, false)]);
}

#[test]
fn complete_and_multi_voice_measures_are_untouched() {
    let mut full = score_with(vec![pitched(2), pitched(2)]);
    assert_eq!(repair_measure_durations(&mut full), 0);

    let mut voices = score_with(vec![pitched(1), MeasureElement::Backup(1), pitched(1)]);
    assert_eq!(repair_measure_durations(&mut voices), 0);
}

#[test]
fn quality_rewards_dense_pitched_measures() {
    let sparse = score_with(vec![pitched(4)]);
    let dense = score_with(vec![pitched(1), pitched(1), pitched(1), pitched(1), pitched(1)]);
    assert!(quality_score(&dense) > quality_score(&sparse));
    assert!(quality_score(&dense) <= 100.0);
}
