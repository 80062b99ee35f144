use crate::model::{MeasureElement, MergedMeasure, MergedScore, Note};
use tracing::debug;

/// Bring each measure's total duration in line with its time signature.
///
/// Underfull measures get a trailing rest; overfull measures have their last
/// sounding note shortened (never below 1). Measures with multiple voices
/// (backup/forward), a mid-measure attribute change or an empty body are
/// left alone. Returns how many
/// measures changed.
pub fn repair_measure_durations(score: &mut MergedScore) -> usize {
    let mut repaired = 0;
    for measure in &mut score.measures {
        if repair_measure(measure) {
            repaired += 1;
        }
    }
    repaired
}

fn repair_measure(measure: &mut MergedMeasure) -> bool {
    let skipped = measure.elements.iter().any(|e| {
        matches!(
            e,
            MeasureElement::Backup(_) | MeasureElement::Forward(_) | MeasureElement::Attributes(_)
        )
    });
    if skipped {
        return false;
    }
    let Some(expected) = measure.time.measure_duration(measure.divisions) else {
        return false;
    };

    let actual: u32 = measure
        .notes()
        .filter(|n| n.advances())
        .map(|n| n.duration)
        .sum();
    if actual == 0 || actual == expected {
        return false;
    }

    if actual < expected {
        let missing = expected - actual;
        let mut rest = Note::rest(missing);
        rest.voice = measure
            .notes()
            .find(|n| n.advances())
            .and_then(|n| n.voice.clone());
        measure.elements.push(MeasureElement::Note(rest));
        debug!(measure = measure.number, missing, "padded underfull measure");
        return true;
    }

    let excess = actual - expected;
    let last = measure.elements.iter_mut().rev().find_map(|e| match e {
        MeasureElement::Note(note) if note.advances() => Some(note),
        _ => None,
    });
    match last {
        Some(note) => {
            let before = note.duration;
            note.duration = before.saturating_sub(excess).max(1);
            debug!(measure = measure.number, before, after = note.duration, "trimmed overfull measure");
            note.duration != before
        }
        None => false,
    }
}
