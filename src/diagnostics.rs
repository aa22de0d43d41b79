//! Offline signal analysis helpers.
//!
//! These are quality measurement tools for tests and debugging: they run on plain
//! sample buffers, are free to allocate and are never called from real-time code.

// -------------------------------------------------------------------------------------------------

/// Window size for click and dropout scanning, in samples.
const SCAN_WINDOW: usize = 64;

// -------------------------------------------------------------------------------------------------

/// Root mean square level of the given buffer.
pub fn rms(samples: &[f32]) -> f32 {
    if samples.is_empty() {
        return 0.0;
    }
    let sum = samples.iter().map(|&s| s as f64 * s as f64).sum::<f64>();
    (sum / samples.len() as f64).sqrt() as f32
}

/// Number of NaN or infinite samples in the given buffer.
pub fn non_finite_count(samples: &[f32]) -> usize {
    samples.iter().filter(|s| !s.is_finite()).count()
}

// -------------------------------------------------------------------------------------------------

/// Normalized signal power at a single frequency, measured with the Goertzel algorithm.
///
/// For a full-scale sine at the probed frequency this returns ~0.25 (amplitude² / 4),
/// for unrelated frequencies it returns values near zero. Use ratios between probed
/// frequencies rather than absolute values.
pub fn goertzel_power(samples: &[f32], sample_rate: u32, frequency: f32) -> f32 {
    if samples.is_empty() {
        return 0.0;
    }
    let omega = 2.0 * std::f64::consts::PI * frequency as f64 / sample_rate as f64;
    let coeff = 2.0 * omega.cos();
    let mut s_prev = 0.0_f64;
    let mut s_prev2 = 0.0_f64;
    for &sample in samples {
        let s = sample as f64 + coeff * s_prev - s_prev2;
        s_prev2 = s_prev;
        s_prev = s;
    }
    let power = s_prev * s_prev + s_prev2 * s_prev2 - coeff * s_prev * s_prev2;
    let norm = samples.len() as f64 * samples.len() as f64;
    (power / norm) as f32
}

// -------------------------------------------------------------------------------------------------

/// Measure the fundamental frequency of the given buffer via normalized autocorrelation.
///
/// Searches fundamentals in `min_hz..=max_hz` and returns `None` when the signal shows
/// no clear periodicity in that range.
pub fn measure_fundamental(
    samples: &[f32],
    sample_rate: u32,
    min_hz: f32,
    max_hz: f32,
) -> Option<f32> {
    let min_lag = (sample_rate as f32 / max_hz).floor() as usize;
    let max_lag = (sample_rate as f32 / min_hz).ceil() as usize;
    if min_lag < 1 || samples.len() < 2 * max_lag {
        return None;
    }
    let summation_len = samples.len() - max_lag;

    let energy = |start: usize| -> f64 {
        samples[start..start + summation_len]
            .iter()
            .map(|&s| s as f64 * s as f64)
            .sum()
    };
    let base_energy = energy(0);
    if base_energy <= 0.0 {
        return None;
    }

    let mut correlation = vec![0.0_f32; max_lag + 1];
    for lag in min_lag..=max_lag {
        let mut product = 0.0_f64;
        for i in 0..summation_len {
            product += samples[i] as f64 * samples[i + lag] as f64;
        }
        let norm = (base_energy * energy(lag)).sqrt();
        correlation[lag] = if norm > 0.0 { (product / norm) as f32 } else { 0.0 };
    }

    let mut best_lag = 0;
    let mut best_value = 0.0_f32;
    for (lag, &value) in correlation.iter().enumerate().skip(min_lag) {
        if value > best_value {
            best_value = value;
            best_lag = lag;
        }
    }
    if best_value < 0.5 || best_lag == 0 {
        return None;
    }

    // subharmonic lags correlate as well as the true period, so prefer the smallest
    // lag whose local peak comes close to the global maximum
    let mut chosen_lag = best_lag;
    for lag in (min_lag + 1)..max_lag {
        let value = correlation[lag];
        if value >= 0.85 * best_value
            && value > correlation[lag - 1]
            && value >= correlation[lag + 1]
        {
            chosen_lag = lag;
            break;
        }
    }

    // refine the peak with parabolic interpolation
    let mut lag = chosen_lag as f32;
    if chosen_lag > min_lag && chosen_lag < max_lag {
        let left = correlation[chosen_lag - 1];
        let center = correlation[chosen_lag];
        let right = correlation[chosen_lag + 1];
        let denom = left - 2.0 * center + right;
        if denom.abs() > f32::EPSILON {
            lag += (0.5 * (left - right) / denom).clamp(-0.5, 0.5);
        }
    }
    Some(sample_rate as f32 / lag)
}

// -------------------------------------------------------------------------------------------------

/// Count click-like discontinuities: short windows whose energy spikes far above both
/// of their neighbor windows.
pub fn count_clicks(samples: &[f32]) -> usize {
    let energies = window_energies(samples);
    if energies.len() < 3 {
        return 0;
    }
    const SPIKE_FACTOR: f64 = 10.0;
    const ENERGY_FLOOR: f64 = 1e-6;
    energies
        .windows(3)
        .filter(|w| w[1] > SPIKE_FACTOR * (0.5 * (w[0] + w[2])) + ENERGY_FLOOR)
        .count()
}

/// Count dropout-like gaps: short windows which fall near-silent while both of their
/// neighbor windows carry signal.
pub fn count_dropouts(samples: &[f32]) -> usize {
    let energies = window_energies(samples);
    if energies.len() < 3 {
        return 0;
    }
    const SILENT: f64 = 1e-8;
    const AUDIBLE: f64 = 1e-4;
    energies
        .windows(3)
        .filter(|w| w[1] < SILENT && w[0] > AUDIBLE && w[2] > AUDIBLE)
        .count()
}

fn window_energies(samples: &[f32]) -> Vec<f64> {
    samples
        .chunks_exact(SCAN_WINDOW)
        .map(|window| {
            window.iter().map(|&s| s as f64 * s as f64).sum::<f64>() / SCAN_WINDOW as f64
        })
        .collect()
}

// -------------------------------------------------------------------------------------------------

/// Find the lag in `0..=max_lag` at which `signal` best matches `reference`, comparing
/// `signal[lag..]` against `reference[..]`.
///
/// Returns the best lag and its normalized correlation in `-1.0..=1.0`.
pub fn correlation_peak(reference: &[f32], signal: &[f32], max_lag: usize) -> (usize, f32) {
    let mut best_lag = 0;
    let mut best_value = -1.0_f32;
    for lag in 0..=max_lag {
        if lag >= signal.len() {
            break;
        }
        let len = reference.len().min(signal.len() - lag);
        if len == 0 {
            break;
        }
        let mut product = 0.0_f64;
        let mut ref_energy = 0.0_f64;
        let mut sig_energy = 0.0_f64;
        for i in 0..len {
            let a = reference[i] as f64;
            let b = signal[lag + i] as f64;
            product += a * b;
            ref_energy += a * a;
            sig_energy += b * b;
        }
        let norm = (ref_energy * sig_energy).sqrt();
        let value = if norm > 0.0 {
            (product / norm) as f32
        } else {
            0.0
        };
        if value > best_value {
            best_value = value;
            best_lag = lag;
        }
    }
    (best_lag, best_value)
}

// -------------------------------------------------------------------------------------------------
