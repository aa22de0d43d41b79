//! Small DSP helpers shared by the engine and the test harness.

pub mod buffer;
pub mod smoothed;

// -------------------------------------------------------------------------------------------------

const MINUS_INF_IN_DB: f32 = -200.0f32;

// -------------------------------------------------------------------------------------------------

/// Convert a linear gain factor to decibels.
pub fn linear_to_db(value: f32) -> f32 {
    const LIN_TO_DB_FACTOR: f32 = 8.685_889_6; // 20 / ln(10)
    if value == 1.0 {
        return 0.0; // avoid rounding errors at exactly 0 dB
    } else if value > 1e-12f32 {
        return value.ln() * LIN_TO_DB_FACTOR;
    }
    MINUS_INF_IN_DB
}

// -------------------------------------------------------------------------------------------------

/// Convert a decibel value to a linear gain factor.
pub fn db_to_linear(value: f32) -> f32 {
    const DB_TO_LIN_FACTOR: f32 = 0.115_129_255; // ln(10) / 20
    if value == 0.0f32 {
        return 1.0f32; // avoid rounding errors at exactly 0 dB
    } else if value > MINUS_INF_IN_DB {
        return (value * DB_TO_LIN_FACTOR).exp();
    }
    0.0f32
}

// -------------------------------------------------------------------------------------------------

/// Equal-power (left, right) gain factors for a panning position in range `-1..=1`.
pub fn panning_factors(panning: f32) -> (f32, f32) {
    debug_assert!((-1.0..=1.0).contains(&panning), "Invalid panning position");
    const PI_OVER_4: f32 = std::f32::consts::FRAC_PI_4;
    let angle = (panning + 1.0) * PI_OVER_4;
    (angle.cos(), angle.sin())
}

// -------------------------------------------------------------------------------------------------

/// Convert a semitone offset to a playback speed/pitch ratio.
pub fn semitones_to_ratio(semitones: f32) -> f32 {
    2.0f32.powf(semitones / 12.0)
}

/// Convert a pitch ratio to a semitone offset.
pub fn ratio_to_semitones(ratio: f32) -> f32 {
    debug_assert!(ratio > 0.0, "Invalid pitch ratio");
    12.0 * ratio.log2()
}

// -------------------------------------------------------------------------------------------------
