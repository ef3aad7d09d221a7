//! General MIDI percussion tables.
//!
//! Import uses the key map to place channel-10 notes on a percussion staff;
//! export uses the name table to recover a sound from an instrument name
//! when a score gives no `<midi-unpitched>`.

/// One General MIDI percussion sound and where it sits on the staff.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DrumSound {
    pub pitch: u8,
    pub name: &'static str,
    pub display_step: &'static str,
    pub display_octave: i32,
}

const fn sound(pitch: u8, name: &'static str, display_step: &'static str, display_octave: i32) -> DrumSound {
    DrumSound {
        pitch,
        name,
        display_step,
        display_octave,
    }
}

/// GM key map, notes 35–81.
const GM_DRUMS: [DrumSound; 47] = [
    sound(35, "Acoustic Bass Drum", "E", 4),
    sound(36, "Bass Drum 1", "F", 4),
    sound(37, "Side Stick", "C", 5),
    sound(38, "Acoustic Snare", "C", 5),
    sound(39, "Hand Clap", "B", 4),
    sound(40, "Electric Snare", "C", 5),
    sound(41, "Low Floor Tom", "G", 4),
    sound(42, "Closed Hi-Hat", "G", 5),
    sound(43, "High Floor Tom", "A", 4),
    sound(44, "Pedal Hi-Hat", "D", 4),
    sound(45, "Low Tom", "B", 4),
    sound(46, "Open Hi-Hat", "G", 5),
    sound(47, "Low-Mid Tom", "D", 5),
    sound(48, "Hi-Mid Tom", "D", 5),
    sound(49, "Crash Cymbal 1", "A", 5),
    sound(50, "High Tom", "E", 5),
    sound(51, "Ride Cymbal 1", "F", 5),
    sound(52, "Chinese Cymbal", "B", 5),
    sound(53, "Ride Bell", "F", 5),
    sound(54, "Tambourine", "E", 5),
    sound(55, "Splash Cymbal", "B", 5),
    sound(56, "Cowbell", "E", 5),
    sound(57, "Crash Cymbal 2", "B", 5),
    sound(58, "Vibraslap", "C", 4),
    sound(59, "Ride Cymbal 2", "D", 6),
    sound(60, "Hi Bongo", "E", 5),
    sound(61, "Low Bongo", "D", 5),
    sound(62, "Mute Hi Conga", "C", 5),
    sound(63, "Open Hi Conga", "B", 4),
    sound(64, "Low Conga", "A", 4),
    sound(65, "High Timbale", "F", 5),
    sound(66, "Low Timbale", "E", 5),
    sound(67, "High Agogo", "G", 5),
    sound(68, "Low Agogo", "F", 5),
    sound(69, "Cabasa", "A", 5),
    sound(70, "Maracas", "G", 5),
    sound(71, "Short Whistle", "F", 5),
    sound(72, "Long Whistle", "E", 5),
    sound(73, "Short Guiro", "D", 5),
    sound(74, "Long Guiro", "C", 5),
    sound(75, "Claves", "B", 4),
    sound(76, "Hi Wood Block", "A", 4),
    sound(77, "Low Wood Block", "G", 4),
    sound(78, "Mute Cuica", "F", 4),
    sound(79, "Open Cuica", "E", 4),
    sound(80, "Mute Triangle", "D", 4),
    sound(81, "Open Triangle", "A", 5),
];

/// Instrument-name keywords in match order; the first hit wins, so the
/// specific names sit above the generic ones.
const DRUM_NAMES: [(&str, u8); 38] = [
    ("kick", 36),
    ("bass drum", 36),
    ("side stick", 37),
    ("rimshot", 37),
    ("rim", 37),
    ("snare", 38),
    ("clap", 39),
    ("closed hi", 42),
    ("pedal hi", 44),
    ("open hi", 46),
    ("hi-hat", 42),
    ("hihat", 42),
    ("hi hat", 42),
    ("floor tom", 41),
    ("low-mid tom", 47),
    ("hi-mid tom", 48),
    ("high tom", 50),
    ("low tom", 45),
    ("tom", 45),
    ("crash", 49),
    ("ride bell", 53),
    ("ride", 51),
    ("china", 52),
    ("chinese", 52),
    ("splash", 55),
    ("tambourine", 54),
    ("cowbell", 56),
    ("bongo", 60),
    ("conga", 63),
    ("timbale", 65),
    ("agogo", 67),
    ("cabasa", 69),
    ("maracas", 70),
    ("whistle", 72),
    ("guiro", 74),
    ("claves", 75),
    ("wood block", 76),
    ("triangle", 81),
];

/// Look up a GM percussion sound by note number.
pub fn gm_drum(pitch: u8) -> Option<&'static DrumSound> {
    GM_DRUMS.iter().find(|d| d.pitch == pitch)
}

/// Match an instrument name against the keyword table, case-insensitively.
pub fn drum_from_name(name: &str) -> Option<u8> {
    let lower = name.to_lowercase();
    DRUM_NAMES
        .iter()
        .find(|(keyword, _)| lower.contains(keyword))
        .map(|&(_, pitch)| pitch)
}
