//! MusicXML parser: converts MusicXML XML into the Score data model.

use roxmltree::{Document, Node};

use crate::error::{Result, ScoreError};
use crate::model::*;

/// Parse a MusicXML XML string into a Score.
pub fn parse_musicxml(xml: &str) -> Result<Score> {
    // MusicXML files include a DOCTYPE declaration, so we must allow DTDs
    let options = roxmltree::ParsingOptions {
        allow_dtd: true,
        ..Default::default()
    };
    let doc = Document::parse_with_options(xml, options)?;
    let root = doc.root_element();

    // Verify this is a score-partwise document
    if root.tag_name().name() != "score-partwise" {
        return Err(ScoreError::UnsupportedRoot(
            root.tag_name().name().to_string(),
        ));
    }

    let mut score = Score::new();
    score.version = root.attribute("version").map(String::from);

    // Parse top-level elements
    for child in root.children().filter(|n| n.is_element()) {
        match child.tag_name().name() {
            "work" => parse_work(&child, &mut score),
            "movement-title" => {
                if score.title.is_none() {
                    score.title = text_of(&child);
                }
            }
            "identification" => parse_identification(&child, &mut score),
            "part-list" => parse_part_list(&child, &mut score),
            "part" => parse_part(&child, &mut score),
            _ => {}
        }
    }

    log::debug!(
        "parsed MusicXML: {} parts, {} measures",
        score.parts.len(),
        score.measure_count()
    );
    Ok(score)
}

// ─── Header ──────────────────────────────────────────────────────────

fn parse_work(node: &Node, score: &mut Score) {
    for child in node.children().filter(|n| n.is_element()) {
        if child.tag_name().name() == "work-title" {
            score.title = text_of(&child);
        }
    }
}

fn parse_identification(node: &Node, score: &mut Score) {
    for child in node.children().filter(|n| n.is_element()) {
        match child.tag_name().name() {
            "creator" if child.attribute("type") == Some("composer") => {
                score.composer = text_of(&child);
            }
            "encoding" => {
                for enc in child.children().filter(|n| n.is_element()) {
                    if enc.tag_name().name() == "software" {
                        score.software = text_of(&enc);
                    }
                }
            }
            _ => {}
        }
    }
}

// ─── Part List ───────────────────────────────────────────────────────

fn parse_part_list(node: &Node, score: &mut Score) {
    for child in node.children().filter(|n| n.is_element()) {
        if child.tag_name().name() == "score-part" {
            score.parts.push(parse_score_part(&child));
        }
    }
}

fn parse_score_part(node: &Node) -> Part {
    let mut part = Part {
        id: node.attribute("id").unwrap_or("").to_string(),
        ..Default::default()
    };

    for sp_child in node.children().filter(|n| n.is_element()) {
        match sp_child.tag_name().name() {
            "part-name" => {
                part.name = sp_child.text().unwrap_or("").trim().to_string();
            }
            "part-abbreviation" => {
                part.abbreviation = text_of(&sp_child);
            }
            "score-instrument" => {
                let mut instrument = ScoreInstrument {
                    id: sp_child.attribute("id").unwrap_or("").to_string(),
                    ..Default::default()
                };
                for si in sp_child.children().filter(|n| n.is_element()) {
                    if si.tag_name().name() == "instrument-name" {
                        instrument.name = si.text().unwrap_or("").trim().to_string();
                    }
                }
                part.instruments.push(instrument);
            }
            "midi-instrument" => {
                let mut channel = None;
                let mut program = None;
                let mut unpitched = None;
                for midi in sp_child.children().filter(|n| n.is_element()) {
                    match midi.tag_name().name() {
                        "midi-channel" => channel = parse_i32(&midi),
                        "midi-program" => program = parse_i32(&midi),
                        "midi-unpitched" => unpitched = parse_i32(&midi),
                        _ => {}
                    }
                }
                if part.midi_channel.is_none() {
                    part.midi_channel = channel;
                }
                if part.midi_program.is_none() {
                    part.midi_program = program;
                }
                if let Some(id) = sp_child.attribute("id") {
                    if let Some(inst) = part.instruments.iter_mut().find(|i| i.id == id) {
                        inst.midi_channel = channel;
                        inst.midi_program = program;
                        inst.midi_unpitched = unpitched;
                    }
                }
            }
            _ => {}
        }
    }

    part
}

// ─── Part (measures) ─────────────────────────────────────────────────

fn parse_part(node: &Node, score: &mut Score) {
    let part_id = node.attribute("id").unwrap_or("").to_string();

    // Find the matching part from the part-list
    let part = match score.parts.iter_mut().find(|p| p.id == part_id) {
        Some(p) => p,
        None => {
            log::warn!("part '{part_id}' is not declared in the part-list, skipped");
            return;
        }
    };

    for child in node.children().filter(|n| n.is_element()) {
        if child.tag_name().name() == "measure" {
            part.measures.push(parse_measure(&child));
        }
    }
}

// ─── Measure ─────────────────────────────────────────────────────────

fn parse_measure(node: &Node) -> Measure {
    let number = node
        .attribute("number")
        .and_then(|n| n.parse::<i32>().ok())
        .unwrap_or(0);
    let implicit = node.attribute("implicit") == Some("yes");

    let mut measure = Measure {
        number,
        implicit,
        elements: Vec::new(),
    };

    for child in node.children().filter(|n| n.is_element()) {
        let element = match child.tag_name().name() {
            "attributes" => MeasureElement::Attributes(parse_attributes(&child)),
            "note" => MeasureElement::Note(parse_note(&child)),
            "direction" => MeasureElement::Direction(parse_direction(&child)),
            "sound" => {
                // <sound> can appear directly in <measure> (not inside <direction>)
                MeasureElement::Direction(Direction {
                    sound: Some(parse_sound(&child)),
                    ..Default::default()
                })
            }
            "backup" => MeasureElement::Backup(child_i32(&child, "duration").unwrap_or(0)),
            "forward" => MeasureElement::Forward(Forward {
                duration: child_i32(&child, "duration").unwrap_or(0),
                voice: child_i32(&child, "voice"),
                staff: child_i32(&child, "staff"),
            }),
            _ => continue,
        };
        measure.elements.push(element);
    }

    measure
}

// ─── Attributes ──────────────────────────────────────────────────────

fn parse_attributes(node: &Node) -> Attributes {
    let mut attrs = Attributes::default();

    for child in node.children().filter(|n| n.is_element()) {
        match child.tag_name().name() {
            "divisions" => attrs.divisions = parse_i32(&child),
            "key" => attrs.key = Some(parse_key(&child)),
            "time" => attrs.time = Some(parse_time(&child)),
            "staves" => attrs.staves = parse_i32(&child),
            "clef" => attrs.clefs.push(parse_clef(&child)),
            "transpose" => attrs.transpose = Some(parse_transpose(&child)),
            _ => {}
        }
    }

    attrs
}

fn parse_key(node: &Node) -> Key {
    let mut key = Key {
        fifths: 0,
        mode: None,
    };
    for child in node.children().filter(|n| n.is_element()) {
        match child.tag_name().name() {
            "fifths" => key.fifths = parse_i32(&child).unwrap_or(0).clamp(-7, 7),
            "mode" => key.mode = text_of(&child),
            _ => {}
        }
    }
    key
}

fn parse_time(node: &Node) -> TimeSignature {
    let mut ts = TimeSignature {
        beats: 4,
        beat_type: 4,
    };
    for child in node.children().filter(|n| n.is_element()) {
        match child.tag_name().name() {
            // Composite beats ("3+2") are summed
            "beats" => {
                ts.beats = child
                    .text()
                    .map(|t| t.split('+').filter_map(|p| p.trim().parse::<i32>().ok()).sum())
                    .filter(|b: &i32| *b > 0)
                    .unwrap_or(4)
            }
            "beat-type" => ts.beat_type = parse_i32(&child).filter(|b| *b > 0).unwrap_or(4),
            _ => {}
        }
    }
    ts
}

fn parse_clef(node: &Node) -> Clef {
    let number = node
        .attribute("number")
        .and_then(|n| n.parse::<i32>().ok())
        .unwrap_or(1);
    let mut clef = Clef {
        number,
        sign: "G".to_string(),
        line: None,
        octave_change: None,
    };
    for child in node.children().filter(|n| n.is_element()) {
        match child.tag_name().name() {
            "sign" => {
                clef.sign = child.text().unwrap_or("G").trim().to_string();
            }
            "line" => clef.line = parse_i32(&child),
            "clef-octave-change" => clef.octave_change = parse_i32(&child),
            _ => {}
        }
    }
    clef
}

fn parse_transpose(node: &Node) -> Transpose {
    let mut t = Transpose::default();
    for child in node.children().filter(|n| n.is_element()) {
        match child.tag_name().name() {
            "diatonic" => t.diatonic = parse_i32(&child).unwrap_or(0),
            "chromatic" => t.chromatic = parse_i32(&child).unwrap_or(0),
            "octave-change" => t.octave_change = parse_i32(&child),
            _ => {}
        }
    }
    t
}

// ─── Note ────────────────────────────────────────────────────────────

fn parse_note(node: &Node) -> Note {
    let mut note = Note::default();

    for child in node.children().filter(|n| n.is_element()) {
        match child.tag_name().name() {
            "pitch" => note.pitch = Some(parse_pitch(&child)),
            "unpitched" => {
                note.unpitched = Some(Unpitched {
                    display_step: child_text(&child, "display-step"),
                    display_octave: child_i32(&child, "display-octave"),
                });
            }
            "instrument" => note.instrument = child.attribute("id").map(String::from),
            "duration" => note.duration = parse_i32(&child).unwrap_or(0),
            "voice" => note.voice = parse_i32(&child),
            "staff" => note.staff = parse_i32(&child),
            "type" => note.note_type = text_of(&child),
            "stem" => note.stem = text_of(&child),
            "rest" => {
                note.rest = true;
                if child.attribute("measure") == Some("yes") {
                    note.measure_rest = true;
                }
            }
            "grace" => {
                note.grace = Some(Grace {
                    slash: child.attribute("slash") == Some("yes"),
                });
            }
            "chord" => note.chord = true,
            "dot" => note.dots += 1,
            "accidental" => note.accidental = text_of(&child),
            "tie" => match child.attribute("type") {
                Some("start") => note.tie_start = true,
                Some("stop") => note.tie_stop = true,
                _ => {}
            },
            "notations" => parse_notations(&child, &mut note),
            _ => {}
        }
    }

    note
}

fn parse_notations(node: &Node, note: &mut Note) {
    for nc in node.children().filter(|n| n.is_element()) {
        match nc.tag_name().name() {
            // <tied> mirrors <tie>; honour it when <tie> was omitted
            "tied" => match nc.attribute("type") {
                Some("start") => note.tie_start = true,
                Some("stop") => note.tie_stop = true,
                _ => {}
            },
            "slur" => {
                let slur_type = nc.attribute("type").unwrap_or("").to_string();
                let number = nc
                    .attribute("number")
                    .and_then(|n| n.parse().ok())
                    .unwrap_or(1);
                let placement = nc.attribute("placement").map(String::from);
                note.slurs.push(SlurEvent {
                    slur_type,
                    number,
                    placement,
                });
            }
            "articulations" => {
                for a in nc.children().filter(|n| n.is_element()) {
                    if let Some(art) = Articulation::from_xml_name(a.tag_name().name()) {
                        note.articulations.push(art);
                    }
                }
            }
            "ornaments" => {
                for o in nc.children().filter(|n| n.is_element()) {
                    if o.tag_name().name() == "accidental-mark" {
                        if let Some(value) = text_of(&o) {
                            note.accidental_marks.push(AccidentalMark {
                                value,
                                placement: o.attribute("placement").map(String::from),
                            });
                        }
                    } else if let Some(orn) = Ornament::from_xml_name(o.tag_name().name()) {
                        note.ornaments.push(orn);
                    }
                }
            }
            "fermata" => note.fermata = true,
            _ => {}
        }
    }
}

fn parse_pitch(node: &Node) -> Pitch {
    let mut pitch = Pitch {
        step: "C".to_string(),
        octave: 4,
        alter: None,
    };
    for child in node.children().filter(|n| n.is_element()) {
        match child.tag_name().name() {
            "step" => {
                pitch.step = child.text().unwrap_or("C").trim().to_string();
            }
            "octave" => pitch.octave = parse_i32(&child).unwrap_or(4),
            "alter" => pitch.alter = parse_f64(&child),
            _ => {}
        }
    }
    pitch
}

// ─── Direction ───────────────────────────────────────────────────────

fn parse_direction(node: &Node) -> Direction {
    let mut dir = Direction {
        placement: node.attribute("placement").map(String::from),
        ..Default::default()
    };

    for child in node.children().filter(|n| n.is_element()) {
        match child.tag_name().name() {
            "direction-type" => {
                for dt_child in child.children().filter(|n| n.is_element()) {
                    match dt_child.tag_name().name() {
                        "metronome" => {
                            dir.metronome = parse_metronome(&dt_child);
                        }
                        "words" => dir.words = text_of(&dt_child),
                        "dynamics" => {
                            dir.dynamics = dt_child
                                .children()
                                .find(|n| n.is_element())
                                .map(|n| n.tag_name().name().to_string());
                        }
                        "wedge" => {
                            let wedge_type = match dt_child.attribute("type") {
                                Some("crescendo") => Some(WedgeType::Crescendo),
                                Some("diminuendo") => Some(WedgeType::Diminuendo),
                                Some("stop") => Some(WedgeType::Stop),
                                Some("continue") => Some(WedgeType::Continue),
                                _ => None,
                            };
                            dir.wedge = wedge_type.map(|wedge_type| Wedge {
                                wedge_type,
                                number: dt_child
                                    .attribute("number")
                                    .and_then(|n| n.parse().ok())
                                    .unwrap_or(1),
                            });
                        }
                        "pedal" => {
                            dir.pedal = match dt_child.attribute("type") {
                                Some("start") => Some(PedalType::Start),
                                Some("stop") => Some(PedalType::Stop),
                                Some("change") => Some(PedalType::Change),
                                Some("continue") => Some(PedalType::Continue),
                                _ => None,
                            };
                        }
                        _ => {}
                    }
                }
            }
            "offset" => dir.offset = parse_i32(&child),
            "voice" => dir.voice = parse_i32(&child),
            "staff" => dir.staff = parse_i32(&child),
            "sound" => dir.sound = Some(parse_sound(&child)),
            _ => {}
        }
    }

    dir
}

fn parse_sound(node: &Node) -> Sound {
    Sound {
        tempo: node.attribute("tempo").and_then(|t| t.parse::<f64>().ok()),
        dynamics: node.attribute("dynamics").and_then(|t| t.parse::<f64>().ok()),
        damper_pedal: node.attribute("damper-pedal").map(|v| v == "yes"),
    }
}

fn parse_metronome(node: &Node) -> Option<MetronomeMark> {
    let mut beat_unit = "quarter".to_string();
    let mut per_minute = None;
    let mut dotted = false;

    for child in node.children().filter(|n| n.is_element()) {
        match child.tag_name().name() {
            "beat-unit" => {
                beat_unit = child.text().unwrap_or("quarter").trim().to_string();
            }
            "beat-unit-dot" => {
                dotted = true;
            }
            "per-minute" => {
                per_minute = parse_f64(&child);
            }
            _ => {}
        }
    }

    per_minute.map(|per_minute| MetronomeMark {
        beat_unit,
        dotted,
        per_minute,
    })
}

// ─── Helpers ─────────────────────────────────────────────────────────

fn text_of(node: &Node) -> Option<String> {
    node.text()
        .map(|t| t.trim().to_string())
        .filter(|t| !t.is_empty())
}

fn child_text(node: &Node, name: &str) -> Option<String> {
    node.children()
        .find(|n| n.is_element() && n.tag_name().name() == name)
        .and_then(|n| text_of(&n))
}

fn child_i32(node: &Node, name: &str) -> Option<i32> {
    child_text(node, name)?.parse().ok()
}

fn parse_i32(node: &Node) -> Option<i32> {
    node.text()?.trim().parse().ok()
}

fn parse_f64(node: &Node) -> Option<f64> {
    node.text()?.trim().parse().ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<!DOCTYPE score-partwise PUBLIC "-//Recordare//DTD MusicXML 3.1 Partwise//EN" "http://www.musicxml.org/dtds/partwise.dtd">
<score-partwise version="3.1">
  <work><work-title>Study</work-title></work>
  <part-list>
    <score-part id="P1">
      <part-name>Flute</part-name>
      <score-instrument id="P1-I1"><instrument-name>Flute</instrument-name></score-instrument>
      <midi-instrument id="P1-I1"><midi-channel>2</midi-channel><midi-program>74</midi-program></midi-instrument>
    </score-part>
  </part-list>
  <part id="P1">
    <measure number="1">
      <attributes>
        <divisions>2</divisions>
        <key><fifths>-1</fifths><mode>major</mode></key>
        <time><beats>3+2</beats><beat-type>8</beat-type></time>
      </attributes>
      <direction placement="above">
        <direction-type><metronome><beat-unit>quarter</beat-unit><per-minute>96</per-minute></metronome></direction-type>
        <direction-type><wedge type="crescendo" number="2"/></direction-type>
        <offset>1</offset>
        <sound tempo="96"/>
      </direction>
      <note>
        <grace slash="yes"/>
        <pitch><step>D</step><octave>5</octave></pitch>
        <voice>1</voice><type>16th</type>
      </note>
      <note>
        <pitch><step>B</step><alter>-1</alter><octave>4</octave></pitch>
        <duration>3</duration><voice>1</voice><type>quarter</type><dot/>
        <tie type="start"/>
        <notations>
          <tied type="start"/>
          <slur type="start" number="1"/>
          <articulations><accent/><staccato/></articulations>
          <ornaments><trill-mark/><accidental-mark placement="above">natural</accidental-mark></ornaments>
          <fermata/>
        </notations>
      </note>
      <backup><duration>3</duration></backup>
      <forward><duration>1</duration><voice>2</voice></forward>
    </measure>
  </part>
</score-partwise>"#;

    #[test]
    fn parses_part_list_and_instruments() {
        let score = parse_musicxml(SAMPLE).unwrap();
        assert_eq!(score.title.as_deref(), Some("Study"));
        let part = &score.parts[0];
        assert_eq!(part.name, "Flute");
        assert_eq!(part.midi_channel, Some(2));
        assert_eq!(part.midi_program, Some(74));
        assert_eq!(part.instruments[0].midi_program, Some(74));
    }

    #[test]
    fn keeps_measure_elements_in_document_order() {
        let score = parse_musicxml(SAMPLE).unwrap();
        let kinds: Vec<&str> = score.parts[0].measures[0]
            .elements
            .iter()
            .map(|e| match e {
                MeasureElement::Attributes(_) => "attributes",
                MeasureElement::Direction(_) => "direction",
                MeasureElement::Note(_) => "note",
                MeasureElement::Backup(_) => "backup",
                MeasureElement::Forward(_) => "forward",
            })
            .collect();
        assert_eq!(kinds, vec!["attributes", "direction", "note", "note", "backup", "forward"]);
    }

    #[test]
    fn parses_note_notations() {
        let score = parse_musicxml(SAMPLE).unwrap();
        let measure = &score.parts[0].measures[0];
        let notes: Vec<&Note> = measure.notes().collect();
        assert_eq!(notes[0].grace, Some(Grace { slash: true }));
        let n = notes[1];
        assert_eq!(n.pitch.as_ref().unwrap().to_midi(), 70);
        assert_eq!(n.dots, 1);
        assert!(n.tie_start && !n.tie_stop);
        assert_eq!(n.articulations, vec![Articulation::Accent, Articulation::Staccato]);
        assert_eq!(n.ornaments, vec![Ornament::TrillMark]);
        assert_eq!(n.accidental_marks[0].value, "natural");
        assert!(n.fermata);
        assert_eq!(n.slurs[0].slur_type, "start");
    }

    #[test]
    fn parses_directions_and_attributes() {
        let score = parse_musicxml(SAMPLE).unwrap();
        let measure = &score.parts[0].measures[0];
        let attrs = measure.attributes().unwrap();
        assert_eq!(attrs.time, Some(TimeSignature { beats: 5, beat_type: 8 }));
        assert_eq!(attrs.key.as_ref().unwrap().fifths, -1);
        let dir = measure.directions().next().unwrap();
        assert_eq!(dir.metronome.as_ref().unwrap().per_minute, 96.0);
        assert_eq!(dir.wedge, Some(Wedge { wedge_type: WedgeType::Crescendo, number: 2 }));
        assert_eq!(dir.offset, Some(1));
        assert_eq!(dir.sound.as_ref().unwrap().tempo, Some(96.0));
    }

    #[test]
    fn rejects_timewise_scores() {
        let err = parse_musicxml("<score-timewise/>").unwrap_err();
        assert!(matches!(err, ScoreError::UnsupportedRoot(ref r) if r == "score-timewise"));
    }
}
