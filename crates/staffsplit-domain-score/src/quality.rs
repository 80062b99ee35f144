use crate::model::{MergedScore, NoteContent};

/// Rough 0..=100 plausibility score for a recognized score.
///
/// Rewards having measures, notes, several notes per measure, pitched notes
/// and non-zero durations. Used for diagnostics only.
pub fn quality_score(score: &MergedScore) -> f32 {
    let measure_count = score.measures.len();
    let notes: Vec<_> = score.measures.iter().flat_map(|m| m.notes()).collect();
    let note_count = notes.len();

    let mut total = 0.0f32;
    if measure_count > 0 {
        total += 10.0; // one part is always emitted
    }
    if measure_count >= 2 {
        total += 15.0;
    }
    if note_count >= 5 {
        total += 15.0;
    }
    if measure_count > 0 {
        let per_measure = note_count as f32 / measure_count as f32;
        if per_measure >= 2.0 {
            total += 30.0;
        } else if per_measure >= 1.0 {
            total += 15.0;
        }
    }
    if notes
        .iter()
        .any(|n| matches!(n.content, NoteContent::Pitched(_)))
    {
        total += 10.0;
    }
    if notes.iter().any(|n| n.duration > 0) {
        total += 10.0;
    }
    if measure_count > 0 {
        total += 10.0; // time signature is always resolved
    }

    total.min(100.0)
}
