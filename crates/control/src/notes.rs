//! Note names to motor frequencies
//!
//! Scientific pitch notation, equal temperament, A4 = 440 Hz. The motor
//! sings at the frequency it is driven with, so playing a note means
//! setting the frequency.

/// Name used for a rest
pub const REST: &str = "-";

const A4_HZ: f64 = 440.0;
const A4_MIDI: i32 = 69;

/// Frequency of `name` in whole Hz, or `None` if it is not a note
///
/// Accepts `C4`, `F#3`, `Bb2`, `c-1`. A rest (`-`) is 0 Hz.
pub fn note_frequency(name: &str) -> Option<u32> {
    let name = name.trim();
    if name == REST {
        return Some(0);
    }

    let midi = midi_number(name)?;
    let hz = A4_HZ * 2f64.powf(f64::from(midi - A4_MIDI) / 12.0);
    Some(hz.round() as u32)
}

/// MIDI note number of `name` (C4 = 60)
pub fn midi_number(name: &str) -> Option<i32> {
    let mut chars = name.chars();
    let pitch_class = match chars.next()?.to_ascii_uppercase() {
        'C' => 0,
        'D' => 2,
        'E' => 4,
        'F' => 5,
        'G' => 7,
        'A' => 9,
        'B' => 11,
        _ => return None,
    };

    let rest = chars.as_str();
    let (accidental, octave) = match rest.chars().next() {
        Some('#') => (1, &rest[1..]),
        Some('b') => (-1, &rest[1..]),
        _ => (0, rest),
    };

    let octave: i32 = octave.parse().ok()?;
    if !(-1..=9).contains(&octave) {
        return None;
    }

    Some((octave + 1) * 12 + pitch_class + accidental)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reference_pitches() {
        assert_eq!(note_frequency("A4"), Some(440));
        assert_eq!(note_frequency("A5"), Some(880));
        assert_eq!(note_frequency("A3"), Some(220));
        assert_eq!(note_frequency("C4"), Some(262));
    }

    #[test]
    fn test_accidentals() {
        assert_eq!(note_frequency("C#4"), Some(277));
        assert_eq!(note_frequency("Db4"), Some(277));
        assert_eq!(note_frequency("Bb3"), note_frequency("A#3"));
    }

    #[test]
    fn test_rest_is_silent() {
        assert_eq!(note_frequency(REST), Some(0));
    }

    #[test]
    fn test_not_notes() {
        assert_eq!(note_frequency(""), None);
        assert_eq!(note_frequency("H2"), None);
        assert_eq!(note_frequency("A"), None);
        assert_eq!(note_frequency("A10"), None);
    }

    #[test]
    fn test_midi_numbers() {
        assert_eq!(midi_number("C4"), Some(60));
        assert_eq!(midi_number("C-1"), Some(0));
        assert_eq!(midi_number("G9"), Some(127));
    }
}
