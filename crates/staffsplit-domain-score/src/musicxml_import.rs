use crate::model::{
    AttributeChange, Clef, KeySignature, Measure, MeasureElement, Note, NoteContent, Pitch,
    RawElement, RecognizedStrip, Step, TimeSignature, MAX_FIFTHS, MIN_FIFTHS,
};
use roxmltree::{Document, Node, ParsingOptions};
use staffsplit_ports::omr::MusicXmlPayload;
use staffsplit_ports::types::StripIndex;
use std::io::Read;
use tracing::{debug, warn};
use zip::ZipArchive;

#[derive(thiserror::Error, Debug)]
pub enum MusicXmlImportError {
    #[error("io error: {0}")]
    Io(String),
    #[error("parse error: {0}")]
    Parse(String),
    #[error("unsupported feature: {0}")]
    Unsupported(String),
}

pub fn import_partial_payload(
    payload: &MusicXmlPayload,
    strip_index: StripIndex,
) -> Result<RecognizedStrip, MusicXmlImportError> {
    match payload {
        MusicXmlPayload::Plain(xml) => import_partial_str(xml, strip_index),
        MusicXmlPayload::Compressed(data) => {
            let xml = read_mxl_bytes(data)?;
            import_partial_str(&xml, strip_index)
        }
    }
}

/// Read the measures of the first part of an engine-produced MusicXML document.
pub fn import_partial_str(
    xml: &str,
    strip_index: StripIndex,
) -> Result<RecognizedStrip, MusicXmlImportError> {
    let options = ParsingOptions {
        allow_dtd: true,
        ..ParsingOptions::default()
    };
    let doc = Document::parse_with_options(xml, options)
        .map_err(|e| MusicXmlImportError::Parse(e.to_string()))?;

    let root = doc.root_element();
    if root.has_tag_name("score-timewise") {
        return Err(MusicXmlImportError::Unsupported(
            "timewise MusicXML".to_string(),
        ));
    }

    let mut parts = root
        .children()
        .filter(|node| node.is_element() && node.has_tag_name("part"));
    let part = parts
        .next()
        .ok_or_else(|| MusicXmlImportError::Parse("document has no part".to_string()))?;
    let extra_parts = parts.count();
    if extra_parts > 0 {
        warn!(strip_index, extra_parts, "ignoring additional parts");
    }

    let part_name = part.attribute("id").and_then(|id| {
        doc.descendants()
            .filter(|node| node.has_tag_name("score-part"))
            .find(|node| node.attribute("id") == Some(id))
            .and_then(|node| child_text(&node, "part-name"))
            .map(|text| text.to_string())
    });

    let measures: Vec<Measure> = part
        .children()
        .filter(|node| node.is_element() && node.has_tag_name("measure"))
        .map(|node| parse_measure(&node, xml, strip_index))
        .collect();

    debug!(strip_index, measures = measures.len(), "partial MusicXML imported");
    Ok(RecognizedStrip {
        strip_index,
        part_name,
        measures,
    })
}

fn parse_measure(measure: &Node, xml: &str, strip_index: StripIndex) -> Measure {
    let mut parsed = Measure {
        source_number: measure.attribute("number").map(|n| n.to_string()),
        source_attributes: measure
            .attributes()
            .filter(|attr| attr.name() != "number")
            .map(|attr| (attr.name().to_string(), attr.value().to_string()))
            .collect(),
        ..Measure::default()
    };
    // Attribute blocks before the first note/backup/forward open the measure.
    let mut opened = false;

    for element in measure.children().filter(|node| node.is_element()) {
        match element.tag_name().name() {
            "attributes" => {
                let change = parse_attributes(&element, xml, strip_index);
                if opened {
                    parsed.elements.push(MeasureElement::Attributes(change));
                } else {
                    absorb_opening(&mut parsed, change);
                }
            }
            "note" => {
                opened = true;
                if let Some(note) = parse_note(&element, xml) {
                    parsed.elements.push(MeasureElement::Note(note));
                }
            }
            "backup" => {
                opened = true;
                parsed
                    .elements
                    .push(MeasureElement::Backup(duration_of(&element)));
            }
            "forward" => {
                opened = true;
                parsed
                    .elements
                    .push(MeasureElement::Forward(duration_of(&element)));
            }
            // Strip layout; the writer emits its own system breaks.
            "print" => {}
            name => parsed
                .elements
                .push(MeasureElement::Other(raw_element(name, &element, xml))),
        }
    }
    parsed
}

fn absorb_opening(measure: &mut Measure, change: AttributeChange) {
    if change.divisions.is_some() {
        measure.divisions = change.divisions;
    }
    if change.key.is_some() {
        measure.key = change.key;
    }
    if change.time.is_some() {
        measure.time = change.time;
    }
    if change.staves.is_some() {
        measure.staves = change.staves;
    }
    measure.clefs.extend(change.clefs);
    measure.attribute_extras.extend(change.extras);
}

fn parse_attributes(attributes: &Node, xml: &str, strip_index: StripIndex) -> AttributeChange {
    let mut change = AttributeChange::default();

    for child in attributes.children().filter(|node| node.is_element()) {
        match child.tag_name().name() {
            "divisions" => {
                if let Some(divisions) = child.text().and_then(|t| t.trim().parse::<u32>().ok()) {
                    change.divisions = Some(divisions.max(1));
                }
            }
            "key" => {
                change.key = parse_key(&child);
                if change.key.is_none() {
                    warn!(strip_index, "dropping key signature without usable fifths");
                }
            }
            "time" => {
                let beats = child_text(&child, "beats").and_then(parse_beats);
                let beat_type = child_text(&child, "beat-type").and_then(|t| t.trim().parse::<u32>().ok());
                if let (Some(beats), Some(beat_type)) = (beats, beat_type) {
                    if beats > 0 && beat_type > 0 {
                        change.time = Some(TimeSignature {
                            beats,
                            beat_type,
                            symbol: child.attribute("symbol").map(|s| s.to_string()),
                        });
                    }
                }
            }
            "clef" => {
                if let Some(clef) = parse_clef(&child) {
                    change.clefs.push(clef);
                }
            }
            "staves" => {
                if let Some(staves) = child.text().and_then(|t| t.trim().parse::<u8>().ok()) {
                    change.staves = Some(staves.max(1));
                }
            }
            name => change.extras.push(raw_element(name, &child, xml)),
        }
    }
    change
}

/// Out-of-range fifths are clamped; a missing or non-numeric value drops the key.
fn parse_key(key: &Node) -> Option<KeySignature> {
    let fifths = child_text(key, "fifths")?.trim().parse::<i32>().ok()?;
    let fifths = fifths.clamp(i32::from(MIN_FIFTHS), i32::from(MAX_FIFTHS)) as i8;
    let mode = child_text(key, "mode")
        .map(|t| t.trim().to_string())
        .filter(|t| !t.is_empty());
    Some(KeySignature::new(fifths, mode))
}

fn parse_clef(clef: &Node) -> Option<Clef> {
    let sign = child_text(clef, "sign")?.trim().to_string();
    if sign.is_empty() {
        return None;
    }
    Some(Clef {
        number: clef.attribute("number").and_then(|n| n.trim().parse::<u8>().ok()),
        sign,
        line: child_text(clef, "line").and_then(|t| t.trim().parse::<u8>().ok()),
        octave_change: child_text(clef, "clef-octave-change").and_then(|t| t.trim().parse::<i8>().ok()),
    })
}

fn parse_note(node: &Node, xml: &str) -> Option<Note> {
    let content = if has_child(node, "rest") {
        NoteContent::Rest
    } else if has_child(node, "unpitched") {
        NoteContent::Unpitched
    } else {
        NoteContent::Pitched(parse_pitch(node)?)
    };

    let (tie_start, tie_stop) = parse_ties(node);
    Some(Note {
        content,
        chord: has_child(node, "chord"),
        grace: has_child(node, "grace"),
        duration: duration_of(node),
        voice: child_text(node, "voice").map(|t| t.trim().to_string()),
        note_type: child_text(node, "type").map(|t| t.trim().to_string()),
        dots: node
            .children()
            .filter(|child| child.has_tag_name("dot"))
            .count()
            .min(u8::MAX as usize) as u8,
        staff: child_text(node, "staff").and_then(|t| t.trim().parse::<u8>().ok()),
        tie_start,
        tie_stop,
        extras: note_extras(node, xml),
    })
}

/// Note children kept verbatim: everything the model does not interpret,
/// plus interpreted children whose attributes or content it cannot rebuild.
fn note_extras(node: &Node, xml: &str) -> Vec<RawElement> {
    let keep_notations = node
        .children()
        .any(|child| child.has_tag_name("notations") && !holds_only_ties(&child));

    node.children()
        .filter(|child| child.is_element())
        .filter(|child| match child.tag_name().name() {
            "chord" | "pitch" | "duration" | "tie" | "voice" | "type" | "dot" | "staff" => false,
            "grace" | "rest" | "unpitched" => {
                child.attributes().len() > 0 || child.children().any(|n| n.is_element())
            }
            "notations" => keep_notations,
            _ => true,
        })
        .map(|child| raw_element(child.tag_name().name(), &child, xml))
        .collect()
}

fn holds_only_ties(notations: &Node) -> bool {
    notations.attributes().len() == 0
        && notations
            .children()
            .filter(|n| n.is_element())
            .all(|n| n.has_tag_name("tied"))
}

fn raw_element(name: &str, node: &Node, xml: &str) -> RawElement {
    RawElement::new(name, &xml[node.range()])
}

fn parse_pitch(node: &Node) -> Option<Pitch> {
    let pitch = node.children().find(|child| child.has_tag_name("pitch"))?;
    let step = child_text(&pitch, "step").and_then(Step::parse)?;
    let octave = child_text(&pitch, "octave").and_then(|t| t.trim().parse::<i8>().ok())?;
    // Microtonal alters are rounded to the nearest semitone.
    let alter = child_text(&pitch, "alter")
        .and_then(|t| t.trim().parse::<f32>().ok())
        .map(|a| a.round().clamp(-3.0, 3.0) as i8)
        .unwrap_or(0);
    Some(Pitch {
        step,
        alter,
        octave,
    })
}

fn parse_ties(node: &Node) -> (bool, bool) {
    let mut tie_start = false;
    let mut tie_stop = false;

    for child in node.children().filter(|n| n.is_element()) {
        if child.has_tag_name("tie") {
            match child.attribute("type").unwrap_or("").trim() {
                "start" => tie_start = true,
                "stop" => tie_stop = true,
                _ => {}
            }
        }
        if child.has_tag_name("notations") {
            for tied in child
                .descendants()
                .filter(|n| n.is_element() && n.has_tag_name("tied"))
            {
                match tied.attribute("type").unwrap_or("").trim() {
                    "start" => tie_start = true,
                    "stop" => tie_stop = true,
                    _ => {}
                }
            }
        }
    }

    (tie_start, tie_stop)
}

fn parse_beats(text: &str) -> Option<u32> {
    let text = text.trim();
    if text.is_empty() {
        return None;
    }
    if !text.contains('+') {
        return text.parse::<u32>().ok();
    }
    let mut sum = 0u32;
    let mut any = false;
    for part in text.split('+') {
        let part = part.trim();
        if part.is_empty() {
            continue;
        }
        if let Ok(value) = part.parse::<u32>() {
            sum = sum.saturating_add(value);
            any = true;
        }
    }
    any.then_some(sum)
}

fn duration_of(node: &Node) -> u32 {
    child_text(node, "duration")
        .and_then(|t| t.trim().parse::<u32>().ok())
        .unwrap_or(0)
}

fn child_text<'a>(node: &Node<'a, '_>, name: &str) -> Option<&'a str> {
    node.children()
        .find(|child| child.is_element() && child.has_tag_name(name))
        .and_then(|child| child.text())
}

fn has_child(node: &Node, name: &str) -> bool {
    node.children()
        .any(|child| child.is_element() && child.has_tag_name(name))
}

/// Extract the root MusicXML file from a compressed `.mxl` archive.
pub fn read_mxl_bytes(data: &[u8]) -> Result<String, MusicXmlImportError> {
    let mut archive = ZipArchive::new(std::io::Cursor::new(data))
        .map_err(|e| MusicXmlImportError::Parse(e.to_string()))?;

    let container_xml = if let Ok(mut container) = archive.by_name("META-INF/container.xml") {
        let mut xml = String::new();
        container
            .read_to_string(&mut xml)
            .map_err(|e| MusicXmlImportError::Io(e.to_string()))?;
        Some(xml)
    } else {
        None
    };

    if let Some(container_xml) = container_xml {
        if let Ok(doc) = Document::parse(&container_xml) {
            if let Some(full_path) = doc
                .descendants()
                .find(|node| node.has_tag_name("rootfile"))
                .and_then(|node| node.attribute("full-path"))
            {
                if let Ok(mut rootfile) = archive.by_name(full_path) {
                    let mut xml = String::new();
                    rootfile
                        .read_to_string(&mut xml)
                        .map_err(|e| MusicXmlImportError::Io(e.to_string()))?;
                    return Ok(xml);
                }
            }
        }
    }

    for idx in 0..archive.len() {
        let mut file = archive
            .by_index(idx)
            .map_err(|e| MusicXmlImportError::Parse(e.to_string()))?;
        let name = file.name().to_string();
        let is_xml = name.ends_with(".xml") || name.ends_with(".musicxml");
        if is_xml && !name.starts_with("META-INF/") {
            let mut xml = String::new();
            file.read_to_string(&mut xml)
                .map_err(|e| MusicXmlImportError::Io(e.to_string()))?;
            return Ok(xml);
        }
    }

    Err(MusicXmlImportError::Unsupported(
        "mxl archive missing MusicXML payload".to_string(),
    ))
}
