use pretty_assertions::assert_eq;
use staffsplit_domain_score::{
    import_partial_payload, import_partial_str, KeySignature, MeasureElement, MusicXmlImportError,
    NoteContent, Pitch, RawElement, Step, TimeSignature,
};
use staffsplit_ports::omr::MusicXmlPayload;

const STRIP: &str = r#"<?xml version="1.0" encoding="UTF-8" standalone="no"?>
<!DOCTYPE score-partwise PUBLIC "-//Recordare//DTD MusicXML 3.1 Partwise//EN" "http://www.musicxml.org/dtds/partwise.dtd">
<score-partwise version="3.1">
  <part-list>
    <score-part id="P1"><part-name>Piano</part-name></score-part>
  </part-list>
  <part id="P1">
    <measure number="7">
      <attributes>
        <divisions>2</divisions>
        <key><fifths>1</fifths><mode>major</mode></key>
        <time><beats>3</beats><beat-type>4</beat-type></time>
        <clef><sign>F</sign><line>4</line></clef>
      </attributes>
      <note>
        <pitch><step>F</step><alter>1</alter><octave>3</octave></pitch>
        <duration>2</duration>
        <tie type="start"/>
        <voice>1</voice>
        <type>quarter</type>
      </note>
      <note>
        <chord/>
        <pitch><step>A</step><octave>3</octave></pitch>
        <duration>2</duration>
        <voice>1</voice>
        <type>quarter</type>
      </note>
      <note>
        <rest/>
        <duration>3</duration>
        <voice>1</voice>
        <type>quarter</type>
        <dot/>
      </note>
      <backup><duration>5</duration></backup>
      <forward><duration>1</duration></forward>
    </measure>
    <measure number="8">
      <note>
        <pitch><step>F</step><alter>1</alter><octave>3</octave></pitch>
        <duration>6</duration>
        <notations><tied type="stop"/></notations>
      </note>
    </measure>
  </part>
</score-partwise>
"#;

#[test]
fn imports_measures_and_attributes() {
    let strip = import_partial_str(STRIP, 2).expect("import ok");
    assert_eq!(strip.strip_index, 2);
    assert_eq!(strip.part_name.as_deref(), Some("Piano"));
    assert_eq!(strip.measures.len(), 2);

    let first = &strip.measures[0];
    assert_eq!(first.source_number.as_deref(), Some("7"));
    assert_eq!(first.divisions, Some(2));
    assert_eq!(first.key, Some(KeySignature::new(1, Some("major".to_string()))));
    assert_eq!(first.time, Some(TimeSignature::new(3, 4)));
    assert_eq!(first.clefs.len(), 1);
    assert_eq!(first.clefs[0].sign, "F");
    assert_eq!(first.clefs[0].line, Some(4));
    assert_eq!(first.elements.len(), 5);

    let second = &strip.measures[1];
    assert_eq!(second.key, None);
    assert_eq!(second.time, None);
}

#[test]
fn imports_note_details() {
    let strip = import_partial_str(STRIP, 0).expect("import ok");
    let elements = &strip.measures[0].elements;

    let MeasureElement::Note(first) = &elements[0] else {
        panic!("expected note");
    };
    assert_eq!(
        first.content,
        NoteContent::Pitched(Pitch {
            step: Step::F,
            alter: 1,
            octave: 3
        })
    );
    assert!(first.tie_start);
    assert_eq!(first.voice.as_deref(), Some("1"));

    let MeasureElement::Note(chord) = &elements[1] else {
        panic!("expected note");
    };
    assert!(chord.chord);

    let MeasureElement::Note(rest) = &elements[2] else {
        panic!("expected note");
    };
    assert!(rest.is_rest());
    assert_eq!(rest.dots, 1);

    assert_eq!(elements[3], MeasureElement::Backup(5));
    assert_eq!(elements[4], MeasureElement::Forward(1));

    let MeasureElement::Note(tied) = &strip.measures[1].elements[0] else {
        panic!("expected note");
    };
    assert!(tied.tie_stop);
}

#[test]
fn out_of_range_fifths_are_clamped() {
    let xml = r#"<score-partwise><part id="P1"><measure number="1">
        <attributes><key><fifths>11</fifths></key></attributes>
    </measure><measure number="2">
        <attributes><key><fifths>-9</fifths></key></attributes>
    </measure></part></score-partwise>"#;
    let strip = import_partial_str(xml, 0).expect("import ok");
    assert_eq!(strip.measures[0].key.as_ref().map(|k| k.fifths), Some(7));
    assert_eq!(strip.measures[1].key.as_ref().map(|k| k.fifths), Some(-7));
}

#[test]
fn unusable_fifths_drop_the_key() {
    let xml = r#"<score-partwise><part id="P1"><measure number="1">
        <attributes><key><fifths>sharp</fifths></key></attributes>
    </measure><measure number="2">
        <attributes><key><mode>major</mode></key></attributes>
    </measure></part></score-partwise>"#;
    let strip = import_partial_str(xml, 0).expect("import ok");
    assert_eq!(strip.measures[0].key, None);
    assert_eq!(strip.measures[1].key, None);
}

#[test]
fn additive_beats_are_summed() {
    let xml = r#"<score-partwise><part id="P1"><measure number="1">
        <attributes><time><beats>3+2</beats><beat-type>8</beat-type></time></attributes>
    </measure></part></score-partwise>"#;
    let strip = import_partial_str(xml, 0).expect("import ok");
    assert_eq!(strip.measures[0].time, Some(TimeSignature::new(5, 8)));
}

#[test]
fn document_without_part_is_rejected() {
    let err = import_partial_str("<score-partwise/>", 0).unwrap_err();
    assert!(matches!(err, MusicXmlImportError::Parse(_)));
}

#[test]
fn malformed_xml_is_rejected() {
    let err = import_partial_str("<score-partwise><part>", 0).unwrap_err();
    assert!(matches!(err, MusicXmlImportError::Parse(_)));
}

#[test]
fn plain_payload_is_imported() {
    let payload = MusicXmlPayload::Plain(STRIP.to_string());
    let strip = import_partial_payload(&payload, 4).expect("import ok");
    assert_eq!(strip.strip_index, 4);
    assert_eq!(strip.measures.len(), 2);
}

#[test]
fn corrupt_archive_is_rejected() {
    let payload = MusicXmlPayload::Compressed(b"PK\x03\x04 not really a zip".to_vec());
    assert!(import_partial_payload(&payload, 0).is_err());
}

#[test]
fn uninterpreted_children_are_kept_verbatim() {
    let xml = r#"<score-partwise><part id="P1"><measure number="1" width="180">
        <attributes><divisions>1</divisions><transpose><chromatic>-2</chromatic></transpose></attributes>
        <print new-system="yes"/>
        <direction><sound tempo="96"/></direction>
        <note><grace slash="yes"/><pitch><step>D</step><octave>5</octave></pitch>
          <accidental>natural</accidental>
          <notations><tied type="start"/><fermata/></notations></note>
        <note><rest measure="yes"/><duration>4</duration></note>
    </measure></part></score-partwise>"#;
    let strip = import_partial_str(xml, 0).expect("import ok");
    let measure = &strip.measures[0];

    assert_eq!(
        measure.source_attributes,
        vec![("width".to_string(), "180".to_string())]
    );
    assert_eq!(
        measure.attribute_extras,
        vec![RawElement::new(
            "transpose",
            "<transpose><chromatic>-2</chromatic></transpose>"
        )]
    );
    assert_eq!(measure.elements.len(), 3);
    assert_eq!(
        measure.elements[0],
        MeasureElement::Other(RawElement::new(
            "direction",
            r#"<direction><sound tempo="96"/></direction>"#
        ))
    );

    let MeasureElement::Note(grace) = &measure.elements[1] else {
        panic!("expected note");
    };
    assert!(grace.grace);
    assert!(grace.tie_start);
    let names: Vec<&str> = grace.extras.iter().map(|e| e.name.as_str()).collect();
    assert_eq!(names, vec!["grace", "accidental", "notations"]);

    let MeasureElement::Note(rest) = &measure.elements[2] else {
        panic!("expected note");
    };
    assert_eq!(
        rest.extra("rest").map(|e| e.xml.as_str()),
        Some(r#"<rest measure="yes"/>"#)
    );
}
