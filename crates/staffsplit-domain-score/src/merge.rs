use crate::model::{MergedMeasure, MergedScore, PartialScore, ResolvedAttributes};
use staffsplit_ports::types::StripIndex;
use tracing::{debug, info, warn};

pub const DEFAULT_PART_NAME: &str = "Music";

#[derive(thiserror::Error, Debug, PartialEq, Eq)]
pub enum MergeError {
    #[error("no partial scores to merge")]
    Empty,
    #[error("partial scores contain unrecovered strip failures: {0:?}")]
    UnrecoveredStrips(Vec<StripIndex>),
}

/// Concatenate strip results in the given order into one score.
///
/// Measures are renumbered from 1; key, time, divisions and clefs carry
/// forward across strip boundaries until a measure declares a new value.
/// Everything else in a measure is carried over unchanged. When no strip
/// yields a measure the score gets one empty measure with default attributes.
pub fn merge(partials: &[PartialScore]) -> Result<MergedScore, MergeError> {
    if partials.is_empty() {
        return Err(MergeError::Empty);
    }

    let failed: Vec<StripIndex> = partials
        .iter()
        .filter(|p| p.is_failed())
        .map(|p| p.strip_index())
        .collect();
    if !failed.is_empty() {
        return Err(MergeError::UnrecoveredStrips(failed));
    }

    let mut part_name = None;
    let mut state = ResolvedAttributes::default();
    let mut measures = Vec::new();

    for partial in partials {
        let PartialScore::Recognized(strip) = partial else {
            continue;
        };
        if part_name.is_none() {
            part_name = strip.part_name.clone().filter(|n| !n.trim().is_empty());
        }

        for (offset, measure) in strip.measures.iter().enumerate() {
            state.apply_measure(measure);
            measures.push(MergedMeasure {
                number: measures.len() as u32 + 1,
                strip_index: strip.strip_index,
                starts_system: offset == 0,
                divisions: state.divisions,
                key: state.key.clone(),
                time: state.time.clone(),
                clefs: state.clefs.clone(),
                staves: state.staves,
                attribute_extras: measure.attribute_extras.clone(),
                source_attributes: measure.source_attributes.clone(),
                elements: measure.elements.clone(),
            });
            state.apply_changes(&measure.elements);
        }
        debug!(
            strip_index = strip.strip_index,
            measures = strip.measures.len(),
            "strip appended"
        );
    }

    if measures.is_empty() {
        warn!(strips = partials.len(), "no measures recognized, writing an empty score");
        measures.push(empty_measure(partials[0].strip_index(), &state));
    }

    info!(
        strips = partials.len(),
        measures = measures.len(),
        "partial scores merged"
    );
    Ok(MergedScore {
        part_name: part_name.unwrap_or_else(|| DEFAULT_PART_NAME.to_string()),
        measures,
    })
}

fn empty_measure(strip_index: StripIndex, state: &ResolvedAttributes) -> MergedMeasure {
    MergedMeasure {
        number: 1,
        strip_index,
        starts_system: true,
        divisions: state.divisions,
        key: state.key.clone(),
        time: state.time.clone(),
        clefs: state.clefs.clone(),
        staves: state.staves,
        attribute_extras: Vec::new(),
        source_attributes: Vec::new(),
        elements: Vec::new(),
    }
}
