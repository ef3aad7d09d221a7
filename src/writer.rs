//! MusicXML writer: serializes a [`Score`] as `score-partwise` 3.1 text.
//!
//! Children are written in the order the MusicXML schema requires, so the
//! output validates and reads back through [`crate::parser`] unchanged.

use crate::model::*;

/// Output switches.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WriterOptions {
    /// Indent nested elements
    pub pretty: bool,
    /// Write each note's `comment` as an XML comment ahead of it
    pub debug_metadata: bool,
}

impl Default for WriterOptions {
    fn default() -> Self {
        Self {
            pretty: true,
            debug_metadata: false,
        }
    }
}

const XML_DECLARATION: &str = r#"<?xml version="1.0" encoding="UTF-8" standalone="no"?>"#;
const DOCTYPE: &str = r#"<!DOCTYPE score-partwise PUBLIC "-//Recordare//DTD MusicXML 3.1 Partwise//EN" "http://www.musicxml.org/dtds/partwise.dtd">"#;

/// Serialize a score as MusicXML text.
pub fn write_musicxml(score: &Score, options: &WriterOptions) -> String {
    let mut xml = XmlBuilder::new(options.pretty);
    xml.raw(XML_DECLARATION);
    xml.raw(DOCTYPE);
    xml.open("score-partwise", &[("version", "3.1")]);

    if let Some(ref title) = score.title {
        xml.open("work", &[]);
        xml.leaf("work-title", title);
        xml.close("work");
    }
    write_identification(&mut xml, score);
    write_part_list(&mut xml, score);

    for part in &score.parts {
        xml.open("part", &[("id", part.id.as_str())]);
        for measure in &part.measures {
            write_measure(&mut xml, measure, options);
        }
        xml.close("part");
    }

    xml.close("score-partwise");
    xml.build()
}

// ═══════════════════════════════════════════════════════════════════════
// XmlBuilder
// ═══════════════════════════════════════════════════════════════════════

struct XmlBuilder {
    out: String,
    depth: usize,
    pretty: bool,
}

impl XmlBuilder {
    fn new(pretty: bool) -> Self {
        Self {
            out: String::new(),
            depth: 0,
            pretty,
        }
    }

    fn build(self) -> String {
        self.out
    }

    fn line(&mut self, text: &str) {
        if self.pretty {
            for _ in 0..self.depth {
                self.out.push_str("  ");
            }
        }
        self.out.push_str(text);
        if self.pretty {
            self.out.push('\n');
        }
    }

    fn raw(&mut self, text: &str) {
        self.line(text);
    }

    fn start_tag(name: &str, attrs: &[(&str, &str)], empty: bool) -> String {
        let mut tag = format!("<{name}");
        for (key, value) in attrs {
            tag.push_str(&format!(r#" {key}="{}""#, escape(value)));
        }
        tag.push_str(if empty { "/>" } else { ">" });
        tag
    }

    fn open(&mut self, name: &str, attrs: &[(&str, &str)]) {
        let tag = Self::start_tag(name, attrs, false);
        self.line(&tag);
        self.depth += 1;
    }

    fn close(&mut self, name: &str) {
        self.depth = self.depth.saturating_sub(1);
        self.line(&format!("</{name}>"));
    }

    fn empty(&mut self, name: &str, attrs: &[(&str, &str)]) {
        let tag = Self::start_tag(name, attrs, true);
        self.line(&tag);
    }

    fn leaf(&mut self, name: &str, text: &str) {
        self.line(&format!("<{name}>{}</{name}>", escape(text)));
    }

    fn leaf_num(&mut self, name: &str, value: impl std::fmt::Display) {
        self.line(&format!("<{name}>{value}</{name}>"));
    }

    fn comment(&mut self, text: &str) {
        self.line(&format!("<!-- {} -->", text.replace("--", "- -")));
    }
}

fn escape(text: &str) -> String {
    text.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}

/// `120.0` → "120", `88.888` → "88.89".
fn fmt_number(value: f64) -> String {
    if value.fract() == 0.0 {
        format!("{}", value as i64)
    } else {
        let s = format!("{value:.2}");
        s.trim_end_matches('0').trim_end_matches('.').to_string()
    }
}

// ─── Header ──────────────────────────────────────────────────────────

fn write_identification(xml: &mut XmlBuilder, score: &Score) {
    if score.composer.is_none() && score.software.is_none() {
        return;
    }
    xml.open("identification", &[]);
    if let Some(ref composer) = score.composer {
        xml.line(&format!(
            r#"<creator type="composer">{}</creator>"#,
            escape(composer)
        ));
    }
    if let Some(ref software) = score.software {
        xml.open("encoding", &[]);
        xml.leaf("software", software);
        xml.close("encoding");
    }
    xml.close("identification");
}

fn write_part_list(xml: &mut XmlBuilder, score: &Score) {
    xml.open("part-list", &[]);
    for part in &score.parts {
        xml.open("score-part", &[("id", part.id.as_str())]);
        xml.leaf("part-name", &part.name);
        if let Some(ref abbr) = part.abbreviation {
            xml.leaf("part-abbreviation", abbr);
        }

        if part.instruments.is_empty() {
            if part.midi_channel.is_some() || part.midi_program.is_some() {
                let id = format!("{}-I1", part.id);
                xml.open("score-instrument", &[("id", id.as_str())]);
                xml.leaf("instrument-name", &part.name);
                xml.close("score-instrument");
                write_midi_instrument(xml, &id, part.midi_channel, part.midi_program, None);
            }
        } else {
            for inst in &part.instruments {
                xml.open("score-instrument", &[("id", inst.id.as_str())]);
                xml.leaf("instrument-name", &inst.name);
                xml.close("score-instrument");
            }
            for inst in &part.instruments {
                write_midi_instrument(
                    xml,
                    &inst.id,
                    inst.midi_channel,
                    inst.midi_program,
                    inst.midi_unpitched,
                );
            }
        }
        xml.close("score-part");
    }
    xml.close("part-list");
}

fn write_midi_instrument(
    xml: &mut XmlBuilder,
    id: &str,
    channel: Option<i32>,
    program: Option<i32>,
    unpitched: Option<i32>,
) {
    xml.open("midi-instrument", &[("id", id)]);
    if let Some(ch) = channel {
        xml.leaf_num("midi-channel", ch);
    }
    if let Some(p) = program {
        xml.leaf_num("midi-program", p);
    }
    if let Some(u) = unpitched {
        xml.leaf_num("midi-unpitched", u);
    }
    xml.close("midi-instrument");
}

// ─── Measure ─────────────────────────────────────────────────────────

fn write_measure(xml: &mut XmlBuilder, measure: &Measure, options: &WriterOptions) {
    let number = measure.number.to_string();
    if measure.implicit {
        xml.open("measure", &[("number", number.as_str()), ("implicit", "yes")]);
    } else {
        xml.open("measure", &[("number", number.as_str())]);
    }

    for element in &measure.elements {
        match element {
            MeasureElement::Attributes(attrs) => write_attributes(xml, attrs),
            MeasureElement::Direction(dir) => write_direction(xml, dir),
            MeasureElement::Note(note) => write_note(xml, note, options),
            MeasureElement::Backup(duration) => {
                xml.open("backup", &[]);
                xml.leaf_num("duration", duration);
                xml.close("backup");
            }
            MeasureElement::Forward(fwd) => {
                xml.open("forward", &[]);
                xml.leaf_num("duration", fwd.duration);
                if let Some(v) = fwd.voice {
                    xml.leaf_num("voice", v);
                }
                if let Some(s) = fwd.staff {
                    xml.leaf_num("staff", s);
                }
                xml.close("forward");
            }
        }
    }

    xml.close("measure");
}

fn write_attributes(xml: &mut XmlBuilder, attrs: &Attributes) {
    xml.open("attributes", &[]);
    if let Some(d) = attrs.divisions {
        xml.leaf_num("divisions", d);
    }
    if let Some(ref key) = attrs.key {
        xml.open("key", &[]);
        xml.leaf_num("fifths", key.fifths);
        if let Some(ref mode) = key.mode {
            xml.leaf("mode", mode);
        }
        xml.close("key");
    }
    if let Some(time) = attrs.time {
        xml.open("time", &[]);
        xml.leaf_num("beats", time.beats);
        xml.leaf_num("beat-type", time.beat_type);
        xml.close("time");
    }
    if let Some(staves) = attrs.staves {
        xml.leaf_num("staves", staves);
    }
    for clef in &attrs.clefs {
        let number = clef.number.to_string();
        xml.open("clef", &[("number", number.as_str())]);
        xml.leaf("sign", &clef.sign);
        if let Some(line) = clef.line {
            xml.leaf_num("line", line);
        }
        if let Some(oc) = clef.octave_change {
            xml.leaf_num("clef-octave-change", oc);
        }
        xml.close("clef");
    }
    if let Some(ref t) = attrs.transpose {
        xml.open("transpose", &[]);
        xml.leaf_num("diatonic", t.diatonic);
        xml.leaf_num("chromatic", t.chromatic);
        if let Some(oc) = t.octave_change {
            xml.leaf_num("octave-change", oc);
        }
        xml.close("transpose");
    }
    xml.close("attributes");
}

// ─── Direction ───────────────────────────────────────────────────────

fn write_sound(xml: &mut XmlBuilder, sound: &Sound) {
    let tempo = sound.tempo.map(fmt_number);
    let dynamics = sound.dynamics.map(fmt_number);
    let mut attrs: Vec<(&str, &str)> = Vec::new();
    if let Some(ref t) = tempo {
        attrs.push(("tempo", t.as_str()));
    }
    if let Some(ref d) = dynamics {
        attrs.push(("dynamics", d.as_str()));
    }
    if let Some(pedal) = sound.damper_pedal {
        attrs.push(("damper-pedal", if pedal { "yes" } else { "no" }));
    }
    xml.empty("sound", &attrs);
}

fn write_direction(xml: &mut XmlBuilder, dir: &Direction) {
    let has_type = dir.metronome.is_some()
        || dir.dynamics.is_some()
        || dir.wedge.is_some()
        || dir.pedal.is_some()
        || dir.words.is_some();

    // A bare <sound> stays a measure-level <sound>
    if !has_type && dir.placement.is_none() && dir.offset.is_none() && dir.voice.is_none() && dir.staff.is_none() {
        if let Some(ref sound) = dir.sound {
            write_sound(xml, sound);
        }
        return;
    }

    match dir.placement {
        Some(ref placement) => xml.open("direction", &[("placement", placement.as_str())]),
        None => xml.open("direction", &[]),
    }

    if let Some(ref m) = dir.metronome {
        xml.open("direction-type", &[]);
        xml.open("metronome", &[]);
        xml.leaf("beat-unit", &m.beat_unit);
        if m.dotted {
            xml.empty("beat-unit-dot", &[]);
        }
        xml.leaf("per-minute", &fmt_number(m.per_minute));
        xml.close("metronome");
        xml.close("direction-type");
    }
    if let Some(ref mark) = dir.dynamics {
        xml.open("direction-type", &[]);
        xml.open("dynamics", &[]);
        xml.empty(mark, &[]);
        xml.close("dynamics");
        xml.close("direction-type");
    }
    if let Some(wedge) = dir.wedge {
        let kind = match wedge.wedge_type {
            WedgeType::Crescendo => "crescendo",
            WedgeType::Diminuendo => "diminuendo",
            WedgeType::Stop => "stop",
            WedgeType::Continue => "continue",
        };
        let number = wedge.number.to_string();
        xml.open("direction-type", &[]);
        xml.empty("wedge", &[("type", kind), ("number", number.as_str())]);
        xml.close("direction-type");
    }
    if let Some(pedal) = dir.pedal {
        let kind = match pedal {
            PedalType::Start => "start",
            PedalType::Stop => "stop",
            PedalType::Change => "change",
            PedalType::Continue => "continue",
        };
        xml.open("direction-type", &[]);
        xml.empty("pedal", &[("type", kind)]);
        xml.close("direction-type");
    }
    if let Some(ref words) = dir.words {
        xml.open("direction-type", &[]);
        xml.leaf("words", words);
        xml.close("direction-type");
    }
    if !has_type {
        // direction-type is mandatory
        xml.open("direction-type", &[]);
        xml.empty("words", &[]);
        xml.close("direction-type");
    }

    if let Some(offset) = dir.offset {
        xml.leaf_num("offset", offset);
    }
    if let Some(v) = dir.voice {
        xml.leaf_num("voice", v);
    }
    if let Some(s) = dir.staff {
        xml.leaf_num("staff", s);
    }
    if let Some(ref sound) = dir.sound {
        write_sound(xml, sound);
    }
    xml.close("direction");
}

// ─── Note ────────────────────────────────────────────────────────────

fn write_note(xml: &mut XmlBuilder, note: &Note, options: &WriterOptions) {
    if options.debug_metadata {
        if let Some(ref comment) = note.comment {
            xml.comment(comment);
        }
    }

    xml.open("note", &[]);
    if let Some(grace) = note.grace {
        if grace.slash {
            xml.empty("grace", &[("slash", "yes")]);
        } else {
            xml.empty("grace", &[]);
        }
    }
    if note.chord {
        xml.empty("chord", &[]);
    }

    if note.rest {
        if note.measure_rest {
            xml.empty("rest", &[("measure", "yes")]);
        } else {
            xml.empty("rest", &[]);
        }
    } else if let Some(ref pitch) = note.pitch {
        xml.open("pitch", &[]);
        xml.leaf("step", &pitch.step);
        if let Some(alter) = pitch.alter {
            xml.leaf("alter", &fmt_number(alter));
        }
        xml.leaf_num("octave", pitch.octave);
        xml.close("pitch");
    } else if let Some(ref u) = note.unpitched {
        if u.display_step.is_none() && u.display_octave.is_none() {
            xml.empty("unpitched", &[]);
        } else {
            xml.open("unpitched", &[]);
            if let Some(ref step) = u.display_step {
                xml.leaf("display-step", step);
            }
            if let Some(octave) = u.display_octave {
                xml.leaf_num("display-octave", octave);
            }
            xml.close("unpitched");
        }
    }

    if note.grace.is_none() {
        xml.leaf_num("duration", note.duration);
    }
    if note.tie_stop {
        xml.empty("tie", &[("type", "stop")]);
    }
    if note.tie_start {
        xml.empty("tie", &[("type", "start")]);
    }
    if let Some(ref id) = note.instrument {
        xml.empty("instrument", &[("id", id.as_str())]);
    }
    if let Some(v) = note.voice {
        xml.leaf_num("voice", v);
    }
    if let Some(ref t) = note.note_type {
        xml.leaf("type", t);
    }
    for _ in 0..note.dots {
        xml.empty("dot", &[]);
    }
    if let Some(ref acc) = note.accidental {
        xml.leaf("accidental", acc);
    }
    if let Some(ref stem) = note.stem {
        xml.leaf("stem", stem);
    }
    if let Some(s) = note.staff {
        xml.leaf_num("staff", s);
    }
    write_notations(xml, note);
    xml.close("note");
}

fn write_notations(xml: &mut XmlBuilder, note: &Note) {
    let has_notations = note.tie_start
        || note.tie_stop
        || !note.slurs.is_empty()
        || !note.articulations.is_empty()
        || !note.ornaments.is_empty()
        || !note.accidental_marks.is_empty()
        || note.fermata;
    if !has_notations {
        return;
    }

    xml.open("notations", &[]);
    if note.tie_stop {
        xml.empty("tied", &[("type", "stop")]);
    }
    if note.tie_start {
        xml.empty("tied", &[("type", "start")]);
    }
    for slur in &note.slurs {
        let number = slur.number.to_string();
        let mut attrs = vec![("type", slur.slur_type.as_str()), ("number", number.as_str())];
        if let Some(ref placement) = slur.placement {
            attrs.push(("placement", placement.as_str()));
        }
        xml.empty("slur", &attrs);
    }
    if !note.articulations.is_empty() {
        xml.open("articulations", &[]);
        for art in &note.articulations {
            xml.empty(art.xml_name(), &[]);
        }
        xml.close("articulations");
    }
    if !note.ornaments.is_empty() || !note.accidental_marks.is_empty() {
        xml.open("ornaments", &[]);
        for orn in &note.ornaments {
            xml.empty(orn.xml_name(), &[]);
        }
        for mark in &note.accidental_marks {
            match mark.placement {
                Some(ref placement) => xml.line(&format!(
                    r#"<accidental-mark placement="{}">{}</accidental-mark>"#,
                    escape(placement),
                    escape(&mark.value)
                )),
                None => xml.leaf("accidental-mark", &mark.value),
            }
        }
        xml.close("ornaments");
    }
    if note.fermata {
        xml.empty("fermata", &[]);
    }
    xml.close("notations");
}
