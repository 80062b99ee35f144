use serde::{Deserialize, Serialize};
use staffsplit_ports::types::StripIndex;
use std::fmt;

pub type Divisions = u32; // MusicXML duration units per quarter note

pub const MIN_FIFTHS: i8 = -7;
pub const MAX_FIFTHS: i8 = 7;

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct KeySignature {
    pub fifths: i8,
    pub mode: Option<String>,
}

impl KeySignature {
    pub fn new(fifths: i8, mode: Option<String>) -> Self {
        Self {
            fifths: fifths.clamp(MIN_FIFTHS, MAX_FIFTHS),
            mode,
        }
    }

    /// No sharps, no flats.
    pub fn neutral() -> Self {
        Self {
            fifths: 0,
            mode: None,
        }
    }
}

impl Default for KeySignature {
    fn default() -> Self {
        Self::neutral()
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TimeSignature {
    pub beats: u32,
    pub beat_type: u32,
    pub symbol: Option<String>,
}

impl TimeSignature {
    pub fn new(beats: u32, beat_type: u32) -> Self {
        Self {
            beats,
            beat_type,
            symbol: None,
        }
    }

    /// Measure length in duration units for the given divisions.
    pub fn measure_duration(&self, divisions: Divisions) -> Option<u32> {
        if self.beats == 0 || self.beat_type == 0 {
            return None;
        }
        let total = u64::from(divisions) * 4 * u64::from(self.beats);
        if total % u64::from(self.beat_type) != 0 {
            return None;
        }
        u32::try_from(total / u64::from(self.beat_type)).ok()
    }
}

impl Default for TimeSignature {
    fn default() -> Self {
        Self::new(4, 4)
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Clef {
    pub number: Option<u8>,
    pub sign: String,
    pub line: Option<u8>,
    pub octave_change: Option<i8>,
}

impl Clef {
    pub fn treble() -> Self {
        Self {
            number: None,
            sign: "G".to_string(),
            line: Some(2),
            octave_change: None,
        }
    }

    pub fn staff(&self) -> u8 {
        self.number.unwrap_or(1)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Step {
    C,
    D,
    E,
    F,
    G,
    A,
    B,
}

impl Step {
    pub fn parse(text: &str) -> Option<Self> {
        match text.trim() {
            "C" => Some(Step::C),
            "D" => Some(Step::D),
            "E" => Some(Step::E),
            "F" => Some(Step::F),
            "G" => Some(Step::G),
            "A" => Some(Step::A),
            "B" => Some(Step::B),
            _ => None,
        }
    }
}

impl fmt::Display for Step {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Step::C => "C",
            Step::D => "D",
            Step::E => "E",
            Step::F => "F",
            Step::G => "G",
            Step::A => "A",
            Step::B => "B",
        };
        write!(f, "{}", name)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Pitch {
    pub step: Step,
    pub alter: i8,
    pub octave: i8,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum NoteContent {
    Pitched(Pitch),
    Unpitched,
    Rest,
}

/// An element copied verbatim from engine output and written back unchanged.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RawElement {
    pub name: String,
    pub xml: String,
}

impl RawElement {
    pub fn new(name: impl Into<String>, xml: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            xml: xml.into(),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Note {
    pub content: NoteContent,
    pub chord: bool,
    pub grace: bool,
    pub duration: u32,
    pub voice: Option<String>,
    pub note_type: Option<String>,
    pub dots: u8,
    pub staff: Option<u8>,
    pub tie_start: bool,
    pub tie_stop: bool,
    /// Children the model does not interpret (accidental, beam, lyric, ...).
    pub extras: Vec<RawElement>,
}

impl Note {
    pub fn rest(duration: u32) -> Self {
        Self {
            content: NoteContent::Rest,
            chord: false,
            grace: false,
            duration,
            voice: None,
            note_type: None,
            dots: 0,
            staff: None,
            tie_start: false,
            tie_stop: false,
            extras: Vec::new(),
        }
    }

    pub fn pitched(pitch: Pitch, duration: u32) -> Self {
        Self {
            content: NoteContent::Pitched(pitch),
            ..Self::rest(duration)
        }
    }

    pub fn is_rest(&self) -> bool {
        matches!(self.content, NoteContent::Rest)
    }

    /// Whether this note moves the measure cursor forward.
    pub fn advances(&self) -> bool {
        !self.chord && !self.grace
    }

    pub fn extra(&self, name: &str) -> Option<&RawElement> {
        self.extras.iter().find(|e| e.name == name)
    }
}

/// An `<attributes>` block appearing after the first note of a measure.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttributeChange {
    pub divisions: Option<Divisions>,
    pub key: Option<KeySignature>,
    pub time: Option<TimeSignature>,
    pub staves: Option<u8>,
    pub clefs: Vec<Clef>,
    pub extras: Vec<RawElement>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum MeasureElement {
    Note(Note),
    Backup(u32),
    Forward(u32),
    Attributes(AttributeChange),
    /// direction, barline, harmony and anything else kept in document order.
    Other(RawElement),
}

/// A measure as recognized inside a single strip.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Measure {
    /// Number the engine assigned; only meaningful within its strip.
    pub source_number: Option<String>,
    pub divisions: Option<Divisions>,
    pub key: Option<KeySignature>,
    pub time: Option<TimeSignature>,
    pub clefs: Vec<Clef>,
    pub staves: Option<u8>,
    /// Attribute children other than divisions, key, time, staves and clef.
    pub attribute_extras: Vec<RawElement>,
    /// `<measure>` attributes other than `number` (implicit, width, ...).
    pub source_attributes: Vec<(String, String)>,
    pub elements: Vec<MeasureElement>,
}

impl Measure {
    pub fn notes(&self) -> impl Iterator<Item = &Note> {
        self.elements.iter().filter_map(|e| match e {
            MeasureElement::Note(note) => Some(note),
            _ => None,
        })
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FailureKind {
    Encode,
    Engine,
    Timeout,
    Parse,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct StripFailure {
    pub strip_index: StripIndex,
    pub kind: FailureKind,
    pub detail: String,
}

impl fmt::Display for StripFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "strip {} ({:?}): {}",
            self.strip_index, self.kind, self.detail
        )
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecognizedStrip {
    pub strip_index: StripIndex,
    pub part_name: Option<String>,
    pub measures: Vec<Measure>,
}

/// One strip's recognition outcome.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum PartialScore {
    Recognized(RecognizedStrip),
    Failed(StripFailure),
}

impl PartialScore {
    pub fn strip_index(&self) -> StripIndex {
        match self {
            PartialScore::Recognized(strip) => strip.strip_index,
            PartialScore::Failed(failure) => failure.strip_index,
        }
    }

    pub fn is_failed(&self) -> bool {
        matches!(self, PartialScore::Failed(_))
    }

    /// An empty success standing in for a dropped strip.
    pub fn empty(strip_index: StripIndex) -> Self {
        PartialScore::Recognized(RecognizedStrip {
            strip_index,
            part_name: None,
            measures: Vec::new(),
        })
    }
}

/// A measure after merging: globally numbered, with every attribute resolved.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct MergedMeasure {
    pub number: u32,
    pub strip_index: StripIndex,
    pub starts_system: bool,
    pub divisions: Divisions,
    pub key: KeySignature,
    pub time: TimeSignature,
    pub clefs: Vec<Clef>,
    pub staves: u8,
    pub attribute_extras: Vec<RawElement>,
    pub source_attributes: Vec<(String, String)>,
    pub elements: Vec<MeasureElement>,
}

impl MergedMeasure {
    pub fn notes(&self) -> impl Iterator<Item = &Note> {
        self.elements.iter().filter_map(|e| match e {
            MeasureElement::Note(note) => Some(note),
            _ => None,
        })
    }
}

/// Attributes in effect at a point in the measure sequence.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ResolvedAttributes {
    pub divisions: Divisions,
    pub key: KeySignature,
    pub time: TimeSignature,
    pub clefs: Vec<Clef>,
    pub staves: u8,
}

impl Default for ResolvedAttributes {
    fn default() -> Self {
        Self {
            divisions: 1,
            key: KeySignature::neutral(),
            time: TimeSignature::default(),
            clefs: vec![Clef::treble()],
            staves: 1,
        }
    }
}

impl ResolvedAttributes {
    /// State at the start of a merged measure.
    pub fn at_start(measure: &MergedMeasure) -> Self {
        Self {
            divisions: measure.divisions,
            key: measure.key.clone(),
            time: measure.time.clone(),
            clefs: measure.clefs.clone(),
            staves: measure.staves,
        }
    }

    /// State after the last mid-measure change of a merged measure.
    pub fn at_end(measure: &MergedMeasure) -> Self {
        let mut state = Self::at_start(measure);
        state.apply_changes(&measure.elements);
        state
    }

    /// Fold a measure's opening declarations over the carried state.
    pub fn apply_measure(&mut self, measure: &Measure) {
        self.apply_parts(
            measure.divisions,
            measure.key.as_ref(),
            measure.time.as_ref(),
            measure.staves,
            &measure.clefs,
        );
    }

    pub fn apply_changes(&mut self, elements: &[MeasureElement]) {
        for element in elements {
            if let MeasureElement::Attributes(change) = element {
                self.apply_parts(
                    change.divisions,
                    change.key.as_ref(),
                    change.time.as_ref(),
                    change.staves,
                    &change.clefs,
                );
            }
        }
    }

    fn apply_parts(
        &mut self,
        divisions: Option<Divisions>,
        key: Option<&KeySignature>,
        time: Option<&TimeSignature>,
        staves: Option<u8>,
        clefs: &[Clef],
    ) {
        if let Some(divisions) = divisions {
            self.divisions = divisions;
        }
        if let Some(key) = key {
            self.key = key.clone();
        }
        if let Some(time) = time {
            self.time = time.clone();
        }
        if let Some(staves) = staves {
            self.staves = staves;
        }
        for clef in clefs {
            match self.clefs.iter_mut().find(|c| c.staff() == clef.staff()) {
                Some(existing) => *existing = clef.clone(),
                None => self.clefs.push(clef.clone()),
            }
        }
        self.clefs.sort_by_key(|c| c.staff());
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct MergedScore {
    pub part_name: String,
    pub measures: Vec<MergedMeasure>,
}
