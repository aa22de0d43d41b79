//! Chord, key and scale controls and their mapping to per-voice pitch ratios.

use crate::utils::semitones_to_ratio;

// -------------------------------------------------------------------------------------------------

/// Maximum number of simultaneously active harmonizer voices.
pub const MAX_VOICES: usize = 4;

/// Allowed pitch ratio bounds for a single voice. Ratios outside this range are clamped:
/// extreme ratios are allowed to sound degraded, but never unstable.
pub const MIN_VOICE_RATIO: f32 = 0.25;
pub const MAX_VOICE_RATIO: f32 = 4.0;

// -------------------------------------------------------------------------------------------------

/// Chord selection for the harmonizer's voice stack.
///
/// Each selector maps to a fixed set of semitone offsets relative to the input pitch,
/// one per voice. [`ChordSelector::Custom`] is the bypass/passthrough state: it yields a
/// single voice at the manual interval offset, which defaults to unison.
#[derive(
    Clone,
    Copy,
    Debug,
    PartialEq,
    Eq,
    strum::EnumString,
    strum::Display,
    strum::VariantNames,
    strum::EnumIter,
)]
#[repr(u8)]
pub enum ChordSelector {
    /// Single voice at the manual interval offset (unison bypass by default).
    Custom,
    /// Octave up and down around the input pitch.
    Octaves,
    /// Root, fifth and octave.
    PowerChord,
    Major,
    Minor,
    Sus2,
    Sus4,
    Major7,
    Minor7,
    Dominant7,
}

impl ChordSelector {
    /// The chord's semitone offsets, ordered by voice.
    pub fn intervals(&self) -> &'static [i32] {
        match self {
            Self::Custom => &[0],
            Self::Octaves => &[0, 12, -12],
            Self::PowerChord => &[0, 7, 12],
            Self::Major => &[0, 4, 7, 12],
            Self::Minor => &[0, 3, 7, 12],
            Self::Sus2 => &[0, 2, 7, 12],
            Self::Sus4 => &[0, 5, 7, 12],
            Self::Major7 => &[0, 4, 7, 11],
            Self::Minor7 => &[0, 3, 7, 10],
            Self::Dominant7 => &[0, 4, 7, 10],
        }
    }
}

// -------------------------------------------------------------------------------------------------

/// Root key for scale quantization.
#[derive(
    Clone,
    Copy,
    Debug,
    PartialEq,
    Eq,
    strum::EnumString,
    strum::Display,
    strum::VariantNames,
    strum::EnumIter,
)]
#[repr(u8)]
pub enum Key {
    C = 0,
    #[strum(serialize = "C#")]
    CSharp = 1,
    D = 2,
    #[strum(serialize = "D#")]
    DSharp = 3,
    E = 4,
    F = 5,
    #[strum(serialize = "F#")]
    FSharp = 6,
    G = 7,
    #[strum(serialize = "G#")]
    GSharp = 8,
    A = 9,
    #[strum(serialize = "A#")]
    ASharp = 10,
    B = 11,
}

impl Key {
    /// Pitch class of the key's root (0..12).
    #[inline]
    pub fn pitch_class(&self) -> u8 {
        *self as u8
    }
}

// -------------------------------------------------------------------------------------------------

/// Scale selection for quantizing voice offsets.
#[derive(
    Clone,
    Copy,
    Debug,
    PartialEq,
    Eq,
    strum::EnumString,
    strum::Display,
    strum::VariantNames,
    strum::EnumIter,
)]
#[repr(u8)]
pub enum Scale {
    Chromatic,
    Major,
    NaturalMinor,
    HarmonicMinor,
    Dorian,
    Phrygian,
    Lydian,
    Mixolydian,
    MajorPentatonic,
    MinorPentatonic,
    Blues,
}

impl Scale {
    /// The scale's pitch classes as a 12 bit mask, relative to the scale root
    /// (bit N set = N semitones above the root are in scale).
    pub fn mask(&self) -> u16 {
        fn bits(semitones: &[u8]) -> u16 {
            let mut mask = 0;
            for &s in semitones {
                mask |= 1 << s;
            }
            mask
        }
        match self {
            Self::Chromatic => 0b1111_1111_1111,
            Self::Major => bits(&[0, 2, 4, 5, 7, 9, 11]),
            Self::NaturalMinor => bits(&[0, 2, 3, 5, 7, 8, 10]),
            Self::HarmonicMinor => bits(&[0, 2, 3, 5, 7, 8, 11]),
            Self::Dorian => bits(&[0, 2, 3, 5, 7, 9, 10]),
            Self::Phrygian => bits(&[0, 1, 3, 5, 7, 8, 10]),
            Self::Lydian => bits(&[0, 2, 4, 6, 7, 9, 11]),
            Self::Mixolydian => bits(&[0, 2, 4, 5, 7, 9, 10]),
            Self::MajorPentatonic => bits(&[0, 2, 4, 7, 9]),
            Self::MinorPentatonic => bits(&[0, 3, 5, 7, 10]),
            Self::Blues => bits(&[0, 3, 5, 6, 7, 10]),
        }
    }

    /// Test if the given semitone offset (interpreted as a pitch class relative to the
    /// given key's root) is part of the scale.
    pub fn contains(&self, key: Key, semitones: i32) -> bool {
        let pitch_class = semitones.rem_euclid(12) as u8;
        let degree = (pitch_class + 12 - key.pitch_class()) % 12;
        self.mask() & (1 << degree) != 0
    }
}

// -------------------------------------------------------------------------------------------------

/// Snap a semitone offset to the nearest offset that lies in the given key/scale.
///
/// Ties are broken towards the smaller absolute shift; on exact ties the lower
/// semitone wins. Chromatic scales pass all offsets through unchanged.
pub fn quantize_to_scale(semitones: i32, key: Key, scale: Scale) -> i32 {
    if scale.contains(key, semitones) {
        return semitones;
    }
    for shift in 1..=6 {
        if scale.contains(key, semitones - shift) {
            return semitones - shift;
        }
        if scale.contains(key, semitones + shift) {
            return semitones + shift;
        }
    }
    // unreachable for any non-empty scale mask
    semitones
}

// -------------------------------------------------------------------------------------------------

/// The per-voice ratio set produced by [`map_voices`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct VoiceRatios {
    ratios: [f32; MAX_VOICES],
    count: usize,
}

impl VoiceRatios {
    /// A single unison voice, the engine's bypass state.
    pub fn unison() -> Self {
        let mut ratios = [1.0; MAX_VOICES];
        ratios[0] = 1.0;
        Self { ratios, count: 1 }
    }

    /// The active voice ratios.
    #[inline]
    pub fn as_slice(&self) -> &[f32] {
        &self.ratios[..self.count]
    }

    /// Number of active voices.
    #[inline]
    pub fn count(&self) -> usize {
        self.count
    }
}

// -------------------------------------------------------------------------------------------------

/// Map the musical control set to an ordered set of per-voice pitch ratios.
///
/// This is a pure function of its inputs and is only re-evaluated on control changes,
/// never per sample. `interval` transposes all chord offsets and is the single voice's
/// offset for [`ChordSelector::Custom`]. When `quantize` is set, each offset is snapped
/// to the nearest in-scale semitone. `voice_limit` caps the number of voices taken from
/// the chord's interval table.
pub fn map_voices(
    chord: ChordSelector,
    key: Key,
    scale: Scale,
    quantize: bool,
    interval: f32,
    voice_limit: usize,
) -> VoiceRatios {
    let intervals = chord.intervals();
    let count = intervals.len().min(voice_limit.clamp(1, MAX_VOICES));

    let mut ratios = [1.0; MAX_VOICES];
    for (voice, &chord_offset) in intervals.iter().take(count).enumerate() {
        let mut offset = chord_offset as f32 + interval;
        if quantize {
            offset = quantize_to_scale(offset.round() as i32, key, scale) as f32;
        }
        ratios[voice] = semitones_to_ratio(offset).clamp(MIN_VOICE_RATIO, MAX_VOICE_RATIO);
    }
    VoiceRatios { ratios, count }
}

// -------------------------------------------------------------------------------------------------
