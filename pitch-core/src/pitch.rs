//! # Pitch Mapping Module
//!
//! Converts a calibrated frequency to a musical pitch reading: MIDI
//! number, note name, octave, and cents deviation. Equal temperament
//! with A4 = MIDI 69 = 440 Hz throughout; sharps are used for the five
//! accidentals (A#, never Bb).

use crate::PitchReading;
use once_cell::sync::Lazy;

/// The twelve note names of an octave, starting at C, sharps convention.
/// Indexed by `midi mod 12`, which maps MIDI 69 to "A".
pub const NOTE_NAMES: [&str; 12] = [
    "C", "C#", "D", "D#", "E", "F", "F#", "G", "G#", "A", "A#", "B",
];

/// One entry of the precomputed MIDI note table.
#[derive(Debug, Clone, Copy)]
pub struct MidiNote {
    pub name: &'static str,
    pub octave: i32,
    /// Equal-temperament frequency in Hz.
    pub frequency_hz: f32,
}

/// Statically computed table of all 128 MIDI notes (C-1 to G9).
///
/// The table is computed once at startup. Frequencies follow
/// `f = 440 * 2^((midi - 69) / 12)`; octaves change at C, so MIDI 60 is
/// C4 and MIDI 69 is A4.
static MIDI_NOTES: Lazy<Vec<MidiNote>> = Lazy::new(|| {
    (0..128)
        .map(|midi: i32| MidiNote {
            name: NOTE_NAMES[(midi % 12) as usize],
            octave: midi / 12 - 1,
            frequency_hz: 440.0 * 2.0_f32.powf((midi - 69) as f32 / 12.0),
        })
        .collect()
});

/// Looks up a MIDI note in the precomputed table.
pub fn midi_note(midi: i32) -> MidiNote {
    MIDI_NOTES[midi.clamp(0, 127) as usize]
}

/// Maps a calibrated frequency to the nearest note.
///
/// Returns `None` for non-positive or non-finite input; the silence path
/// upstream short-circuits before the mapper, so `None` here only guards
/// against misuse.
pub fn map_frequency(freq_hz: f32) -> Option<PitchReading> {
    if !freq_hz.is_finite() || freq_hz <= 0.0 {
        return None;
    }

    // MIDI number from frequency: midi = 69 + 12 * log2(f / 440)
    let midi_float = 69.0 + 12.0 * (freq_hz / 440.0).log2();
    let midi_int = (midi_float.round() as i32).clamp(0, 127);
    let note = midi_note(midi_int);

    // Cents difference from the nearest equal-tempered note. Rounding
    // keeps this in [-50, 50) except at the clamped ends of the range.
    let cents = (midi_float - midi_int as f32) * 100.0;

    Some(PitchReading {
        frequency_hz: freq_hz,
        midi_float,
        midi_int,
        note_name: note.name.to_string(),
        octave: note.octave,
        cents,
    })
}
