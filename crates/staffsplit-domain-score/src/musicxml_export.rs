// MusicXML 3.1 partwise writer for merged scores

use crate::model::{
    Clef, Divisions, KeySignature, MeasureElement, MergedMeasure, MergedScore, Note, NoteContent,
    RawElement, ResolvedAttributes, TimeSignature,
};

const PART_ID: &str = "P1";

pub fn export_musicxml_bytes(score: &MergedScore) -> Vec<u8> {
    export_musicxml(score).into_bytes()
}

pub fn export_musicxml(score: &MergedScore) -> String {
    let mut writer = MusicXmlWriter::new();
    writer.header(&score.part_name);

    let mut previous: Option<&MergedMeasure> = None;
    for measure in &score.measures {
        writer.measure(measure, previous);
        previous = Some(measure);
    }

    writer.footer();
    writer.finish()
}

/// Indented string builder; one element per line.
struct MusicXmlWriter {
    buffer: String,
    depth: usize,
}

impl MusicXmlWriter {
    fn new() -> Self {
        Self {
            buffer: String::new(),
            depth: 0,
        }
    }

    fn finish(self) -> String {
        self.buffer
    }

    fn line(&mut self, text: &str) {
        for _ in 0..self.depth {
            self.buffer.push_str("  ");
        }
        self.buffer.push_str(text);
        self.buffer.push('\n');
    }

    fn open(&mut self, tag: &str) {
        self.line(&format!("<{}>", tag));
        self.depth += 1;
    }

    fn close(&mut self, name: &str) {
        self.depth = self.depth.saturating_sub(1);
        self.line(&format!("</{}>", name));
    }

    fn leaf(&mut self, name: &str, value: impl std::fmt::Display) {
        let text = escape_text(&value.to_string());
        self.line(&format!("<{name}>{text}</{name}>"));
    }

    fn header(&mut self, part_name: &str) {
        self.line(r#"<?xml version="1.0" encoding="UTF-8" standalone="no"?>"#);
        self.line(r#"<!DOCTYPE score-partwise PUBLIC "-//Recordare//DTD MusicXML 3.1 Partwise//EN" "http://www.musicxml.org/dtds/partwise.dtd">"#);
        self.open(r#"score-partwise version="3.1""#);
        self.open("part-list");
        self.open(&format!(r#"score-part id="{}""#, PART_ID));
        self.leaf("part-name", part_name);
        self.close("score-part");
        self.close("part-list");
        self.open(&format!(r#"part id="{}""#, PART_ID));
    }

    fn footer(&mut self) {
        self.close("part");
        self.close("score-partwise");
    }

    fn raw(&mut self, element: &RawElement) {
        self.line(element.xml.trim());
    }

    fn measure(&mut self, measure: &MergedMeasure, previous: Option<&MergedMeasure>) {
        let mut tag = format!(r#"measure number="{}""#, measure.number);
        for (name, value) in &measure.source_attributes {
            tag.push_str(&format!(r#" {}="{}""#, name, escape_attr(value)));
        }
        self.open(&tag);
        if measure.starts_system && previous.is_some() {
            self.line(r#"<print new-system="yes"/>"#);
        }
        self.opening_attributes(measure, previous);
        for element in &measure.elements {
            match element {
                MeasureElement::Note(note) => self.note(note),
                MeasureElement::Backup(duration) => {
                    self.open("backup");
                    self.leaf("duration", duration);
                    self.close("backup");
                }
                MeasureElement::Forward(duration) => {
                    self.open("forward");
                    self.leaf("duration", duration);
                    self.close("forward");
                }
                MeasureElement::Attributes(change) => {
                    let declared = Declared {
                        divisions: change.divisions,
                        key: change.key.as_ref(),
                        time: change.time.as_ref(),
                        staves: change.staves,
                        clefs: &change.clefs,
                        numbered_clefs: change.clefs.iter().any(|c| c.number.is_some()),
                        extras: &change.extras,
                    };
                    self.attributes(&declared);
                }
                MeasureElement::Other(raw) => self.raw(raw),
            }
        }
        self.close("measure");
    }

    /// Declares only what changed since the end of the previous measure;
    /// the first measure declares everything.
    fn opening_attributes(&mut self, measure: &MergedMeasure, previous: Option<&MergedMeasure>) {
        let (divisions, key, time, staves, clefs) = match previous.map(ResolvedAttributes::at_end) {
            Some(before) => (
                before.divisions != measure.divisions,
                before.key != measure.key,
                before.time != measure.time,
                before.staves != measure.staves,
                before.clefs != measure.clefs,
            ),
            None => (true, true, true, measure.staves != 1, true),
        };
        let declared = Declared {
            divisions: divisions.then_some(measure.divisions),
            key: key.then_some(&measure.key),
            time: time.then_some(&measure.time),
            staves: staves.then_some(measure.staves),
            clefs: if clefs { &measure.clefs[..] } else { &[] },
            numbered_clefs: measure.staves > 1,
            extras: &measure.attribute_extras,
        };
        self.attributes(&declared);
    }

    fn attributes(&mut self, declared: &Declared) {
        if declared.is_empty() {
            return;
        }
        self.open("attributes");
        for slot in 0..=ATTRIBUTE_SLOTS {
            match slot {
                2 => {
                    if let Some(divisions) = declared.divisions {
                        self.leaf("divisions", divisions);
                    }
                }
                3 => {
                    if let Some(key) = declared.key {
                        self.key(key);
                    }
                }
                4 => {
                    if let Some(time) = declared.time {
                        self.time(time);
                    }
                }
                5 => {
                    if let Some(staves) = declared.staves {
                        self.leaf("staves", staves);
                    }
                }
                8 => {
                    for clef in declared.clefs {
                        self.clef(clef, declared.numbered_clefs);
                    }
                }
                _ => {}
            }
            for extra in declared.extras {
                if attribute_slot(&extra.name) == slot {
                    self.raw(extra);
                }
            }
        }
        self.close("attributes");
    }

    fn key(&mut self, key: &KeySignature) {
        self.open("key");
        self.leaf("fifths", key.fifths);
        if let Some(mode) = &key.mode {
            self.leaf("mode", mode);
        }
        self.close("key");
    }

    fn time(&mut self, time: &TimeSignature) {
        match &time.symbol {
            Some(symbol) => self.open(&format!(r#"time symbol="{}""#, escape_attr(symbol))),
            None => self.open("time"),
        }
        self.leaf("beats", time.beats);
        self.leaf("beat-type", time.beat_type);
        self.close("time");
    }

    fn clef(&mut self, clef: &Clef, numbered: bool) {
        if numbered {
            self.open(&format!(r#"clef number="{}""#, clef.staff()));
        } else {
            self.open("clef");
        }
        self.leaf("sign", &clef.sign);
        if let Some(line) = clef.line {
            self.leaf("line", line);
        }
        if let Some(change) = clef.octave_change {
            self.leaf("clef-octave-change", change);
        }
        self.close("clef");
    }

    /// Writes interpreted fields and kept children interleaved in schema order.
    fn note(&mut self, note: &Note) {
        self.open("note");
        for slot in 0..=NOTE_SLOTS {
            self.synthesized(note, slot);
            for extra in &note.extras {
                if note_slot(&extra.name) == slot {
                    self.raw(extra);
                }
            }
        }
        self.close("note");
    }

    fn synthesized(&mut self, note: &Note, slot: u8) {
        match slot {
            0 if note.grace && note.extra("grace").is_none() => self.line("<grace/>"),
            2 if note.chord => self.line("<chord/>"),
            3 => match &note.content {
                NoteContent::Pitched(pitch) => {
                    self.open("pitch");
                    self.leaf("step", pitch.step);
                    if pitch.alter != 0 {
                        self.leaf("alter", pitch.alter);
                    }
                    self.leaf("octave", pitch.octave);
                    self.close("pitch");
                }
                NoteContent::Unpitched if note.extra("unpitched").is_none() => {
                    self.line("<unpitched/>")
                }
                NoteContent::Rest if note.extra("rest").is_none() => self.line("<rest/>"),
                _ => {}
            },
            4 if !note.grace => self.leaf("duration", note.duration),
            5 => {
                if note.tie_stop {
                    self.line(r#"<tie type="stop"/>"#);
                }
                if note.tie_start {
                    self.line(r#"<tie type="start"/>"#);
                }
            }
            9 => {
                if let Some(voice) = &note.voice {
                    self.leaf("voice", voice);
                }
            }
            10 => {
                if let Some(note_type) = &note.note_type {
                    self.leaf("type", note_type);
                }
            }
            11 => {
                for _ in 0..note.dots {
                    self.line("<dot/>");
                }
            }
            17 => {
                if let Some(staff) = note.staff {
                    self.leaf("staff", staff);
                }
            }
            19 if (note.tie_start || note.tie_stop) && note.extra("notations").is_none() => {
                self.open("notations");
                if note.tie_stop {
                    self.line(r#"<tied type="stop"/>"#);
                }
                if note.tie_start {
                    self.line(r#"<tied type="start"/>"#);
                }
                self.close("notations");
            }
            _ => {}
        }
    }
}

/// Attribute content for one `<attributes>` block.
struct Declared<'a> {
    divisions: Option<Divisions>,
    key: Option<&'a KeySignature>,
    time: Option<&'a TimeSignature>,
    staves: Option<u8>,
    clefs: &'a [Clef],
    numbered_clefs: bool,
    extras: &'a [RawElement],
}

impl Declared<'_> {
    fn is_empty(&self) -> bool {
        self.divisions.is_none()
            && self.key.is_none()
            && self.time.is_none()
            && self.staves.is_none()
            && self.clefs.is_empty()
            && self.extras.is_empty()
    }
}

const NOTE_SLOTS: u8 = 23;
const ATTRIBUTE_SLOTS: u8 = 13;

/// Position of a `<note>` child in the MusicXML content model.
fn note_slot(name: &str) -> u8 {
    match name {
        "grace" => 0,
        "cue" => 1,
        "chord" => 2,
        "pitch" | "unpitched" | "rest" => 3,
        "duration" => 4,
        "tie" => 5,
        "instrument" => 6,
        "footnote" => 7,
        "level" => 8,
        "voice" => 9,
        "type" => 10,
        "dot" => 11,
        "accidental" => 12,
        "time-modification" => 13,
        "stem" => 14,
        "notehead" => 15,
        "notehead-text" => 16,
        "staff" => 17,
        "beam" => 18,
        "notations" => 19,
        "lyric" => 20,
        "play" => 21,
        "listen" => 22,
        _ => NOTE_SLOTS,
    }
}

/// Position of an `<attributes>` child in the MusicXML content model.
fn attribute_slot(name: &str) -> u8 {
    match name {
        "footnote" => 0,
        "level" => 1,
        "divisions" => 2,
        "key" => 3,
        "time" => 4,
        "staves" => 5,
        "part-symbol" => 6,
        "instruments" => 7,
        "clef" => 8,
        "staff-details" => 9,
        "transpose" | "for-part" => 10,
        "directive" => 11,
        "measure-style" => 12,
        _ => ATTRIBUTE_SLOTS,
    }
}

fn escape_text(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for ch in text.chars() {
        match ch {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            _ => out.push(ch),
        }
    }
    out
}

fn escape_attr(text: &str) -> String {
    escape_text(text).replace('"', "&quot;")
}
