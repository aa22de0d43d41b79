use super::{
    default_period_samples, max_period_samples, min_period_samples, Epoch, EpochStore,
    InputHistory, VOICED_CONFIDENCE_THRESHOLD,
};

// -------------------------------------------------------------------------------------------------

/// Samples between two pitch analysis frames.
const ANALYSIS_HOP: usize = 256;

/// Mean square level below which input counts as silent and produces no epochs.
const SILENCE_THRESHOLD: f64 = 1e-8;

/// Confidence assigned to fallback epochs in unvoiced input.
const UNVOICED_CONFIDENCE: f32 = 0.1;

/// A candidate correlation peak must reach this fraction of the global maximum to win
/// the lowest-lag preference. Suppresses octave errors, where multiples of the true
/// period correlate almost as well as the period itself.
const OCTAVE_PEAK_THRESHOLD: f32 = 0.85;

// -------------------------------------------------------------------------------------------------

/// Detects pitch pulse positions (epochs) in the input stream.
///
/// Analysis runs on fixed hops over a trailing window of two maximum pitch periods.
/// Each frame measures the local pitch period via normalized cross-correlation, then
/// marks one epoch per period, snapped to the local waveform maximum so that grains
/// cut at epochs stay phase coherent with each other.
///
/// Unvoiced but audible input gets evenly spaced fallback epochs at a fixed rate, so
/// the synthesizer can keep producing output through consonants and breath noise.
/// Silent input produces no epochs at all.
#[derive(Debug, Clone)]
pub struct EpochDetector {
    min_period: usize,
    max_period: usize,
    default_period: f32,
    window_len: usize,
    /// End position of the next analysis window.
    next_analysis_pos: u64,
    /// Position of the last placed (or skipped over) epoch.
    last_epoch_pos: f64,
    // preallocated analysis scratch
    window: Vec<f32>,
    energy_prefix: Vec<f64>,
    correlation: Vec<f32>,
}

impl EpochDetector {
    pub fn new(sample_rate: u32) -> Self {
        let min_period = min_period_samples(sample_rate);
        let max_period = max_period_samples(sample_rate);
        let window_len = 2 * max_period;
        Self {
            min_period,
            max_period,
            default_period: default_period_samples(sample_rate),
            window_len,
            next_analysis_pos: window_len as u64,
            last_epoch_pos: 0.0,
            window: vec![0.0; window_len],
            energy_prefix: vec![0.0; window_len + 1],
            correlation: vec![0.0; max_period + 1],
        }
    }

    /// Run all analysis frames which fit into the written input history, appending newly
    /// detected epochs to the store.
    pub fn process(&mut self, history: &InputHistory, store: &mut EpochStore) {
        while self.next_analysis_pos <= history.write_pos() {
            self.analyze_frame(history, store);
            self.next_analysis_pos += ANALYSIS_HOP as u64;
        }
    }

    /// Restart analysis at stream position 0.
    pub fn reset(&mut self) {
        self.next_analysis_pos = self.window_len as u64;
        self.last_epoch_pos = 0.0;
    }

    fn analyze_frame(&mut self, history: &InputHistory, store: &mut EpochStore) {
        let window_len = self.window_len;
        let window_start = self.next_analysis_pos - window_len as u64;
        for (i, sample) in self.window.iter_mut().enumerate() {
            *sample = history.sample(window_start + i as u64);
        }

        // epochs may only be placed where a full grain extraction context already exists
        let limit = self.next_analysis_pos - self.max_period as u64;

        let mean_square = self
            .window
            .iter()
            .map(|&s| s as f64 * s as f64)
            .sum::<f64>()
            / window_len as f64;
        if mean_square < SILENCE_THRESHOLD {
            // skip over silence without backfilling epochs when the signal returns
            self.last_epoch_pos = self.last_epoch_pos.max(limit as f64);
            return;
        }

        match self.measure_period() {
            Some((period, confidence)) => {
                self.place_voiced_epochs(history, store, period, confidence, limit);
            }
            None => {
                self.place_fallback_epochs(store, limit);
            }
        }
    }

    /// Measure the pitch period of the current analysis window via normalized
    /// cross-correlation. Returns the fractional period in samples and the detection
    /// confidence, or `None` for unvoiced input.
    fn measure_period(&mut self) -> Option<(f32, f32)> {
        let window = &self.window;
        let window_len = self.window_len;
        let min_lag = self.min_period;
        let max_lag = self.max_period;

        self.energy_prefix[0] = 0.0;
        for (i, &sample) in window.iter().enumerate() {
            self.energy_prefix[i + 1] = self.energy_prefix[i] + sample as f64 * sample as f64;
        }

        // correlate the most recent L samples against earlier copies of themselves,
        // with an equal summation length for every lag
        let summation_len = window_len - max_lag;
        let recent_start = window_len - summation_len;
        let recent_energy =
            self.energy_prefix[window_len] - self.energy_prefix[recent_start];

        let mut best_lag = 0;
        let mut best_value = 0.0_f32;
        for lag in min_lag..=max_lag {
            let shifted_start = recent_start - lag;
            let mut product = 0.0_f64;
            for i in 0..summation_len {
                product +=
                    window[recent_start + i] as f64 * window[shifted_start + i] as f64;
            }
            let shifted_energy = self.energy_prefix[shifted_start + summation_len]
                - self.energy_prefix[shifted_start];
            let norm = (recent_energy * shifted_energy).sqrt();
            let value = if norm > 0.0 {
                (product / norm) as f32
            } else {
                0.0
            };
            self.correlation[lag] = value;
            if value > best_value {
                best_value = value;
                best_lag = lag;
            }
        }

        if best_value < VOICED_CONFIDENCE_THRESHOLD || best_lag == 0 {
            return None;
        }

        // prefer the smallest lag whose local peak comes close to the global maximum,
        // which picks the true period over its octave multiples
        let mut chosen_lag = best_lag;
        for lag in (min_lag + 1)..max_lag {
            let value = self.correlation[lag];
            if value >= OCTAVE_PEAK_THRESHOLD * best_value
                && value > self.correlation[lag - 1]
                && value >= self.correlation[lag + 1]
            {
                chosen_lag = lag;
                break;
            }
        }

        // parabolic interpolation around the chosen peak for a fractional period
        let (period, peak_value) = if chosen_lag > min_lag && chosen_lag < max_lag {
            let left = self.correlation[chosen_lag - 1];
            let center = self.correlation[chosen_lag];
            let right = self.correlation[chosen_lag + 1];
            let denom = left - 2.0 * center + right;
            if denom.abs() > f32::EPSILON {
                let delta = (0.5 * (left - right) / denom).clamp(-0.5, 0.5);
                (
                    chosen_lag as f32 + delta,
                    center - 0.25 * (left - right) * delta,
                )
            } else {
                (chosen_lag as f32, center)
            }
        } else {
            (chosen_lag as f32, self.correlation[chosen_lag])
        };

        let confidence = peak_value.clamp(0.0, 1.0);
        if confidence < VOICED_CONFIDENCE_THRESHOLD {
            return None;
        }
        Some((
            period.clamp(self.min_period as f32, self.max_period as f32),
            confidence,
        ))
    }

    /// Place one epoch per measured period up to the placement limit, each snapped to
    /// the local waveform maximum.
    fn place_voiced_epochs(
        &mut self,
        history: &InputHistory,
        store: &mut EpochStore,
        period: f32,
        confidence: f32,
        limit: u64,
    ) {
        let min_spacing = (self.min_period / 2).max(1) as u64;
        loop {
            let predicted = self.last_epoch_pos + period as f64;
            if predicted > limit as f64 {
                break;
            }
            let radius = (period as f64 / 4.0).max(1.0);
            let search_start = ((predicted - radius).floor().max(0.0)) as u64;
            let search_end = ((predicted + radius) as u64).min(limit);
            let lower_bound = store
                .latest()
                .map(|e| e.position + min_spacing)
                .unwrap_or(0);
            let search_start = search_start.max(lower_bound);
            if search_start > search_end {
                // can't keep positions monotonic here, resync to the prediction
                self.last_epoch_pos = predicted;
                continue;
            }
            let mut best_pos = search_start;
            let mut best_value = history.sample(search_start);
            for pos in search_start + 1..=search_end {
                let value = history.sample(pos);
                if value > best_value {
                    best_value = value;
                    best_pos = pos;
                }
            }
            store.append(Epoch {
                position: best_pos,
                period,
                confidence,
            });
            self.last_epoch_pos = best_pos as f64;
        }
    }

    /// Place evenly spaced low confidence epochs for unvoiced but audible input.
    fn place_fallback_epochs(&mut self, store: &mut EpochStore, limit: u64) {
        loop {
            let predicted = self.last_epoch_pos + self.default_period as f64;
            if predicted > limit as f64 {
                break;
            }
            let mut position = predicted.round() as u64;
            if let Some(latest) = store.latest() {
                position = position.max(latest.position + 1);
            }
            if position > limit {
                self.last_epoch_pos = predicted;
                continue;
            }
            store.append(Epoch {
                position,
                period: self.default_period,
                confidence: UNVOICED_CONFIDENCE,
            });
            self.last_epoch_pos = position as f64;
        }
    }
}

// -------------------------------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use rand::{rngs::SmallRng, Rng, SeedableRng};

    use super::*;

    const SAMPLE_RATE: u32 = 44100;

    fn run_detector(input: &[f32]) -> (EpochDetector, EpochStore) {
        let mut history = InputHistory::new(input.len() + 8 * max_period_samples(SAMPLE_RATE));
        let mut detector = EpochDetector::new(SAMPLE_RATE);
        let mut store = EpochStore::new();
        for block in input.chunks(512) {
            history.write(block);
            detector.process(&history, &mut store);
        }
        (detector, store)
    }

    #[test]
    fn detects_sine_period() {
        let frequency = 220.0;
        let input = (0..SAMPLE_RATE as usize)
            .map(|i| {
                (i as f32 / SAMPLE_RATE as f32 * frequency * 2.0 * std::f32::consts::PI).sin()
                    * 0.5
            })
            .collect::<Vec<_>>();
        let (_, store) = run_detector(&input);

        assert!(store.len() > 50);
        let expected_period = SAMPLE_RATE as f32 / frequency;
        let latest = store.latest().unwrap();
        assert!(
            (latest.period - expected_period).abs() / expected_period < 0.02,
            "period {} vs expected {}",
            latest.period,
            expected_period
        );
        assert!(latest.confidence > 0.9);

        // epoch spacing matches the period and positions sit near waveform peaks
        let mut positions = Vec::new();
        for target in (40000..42000).step_by(100) {
            let epoch = store.nearest(target).unwrap();
            if positions.last() != Some(&epoch.position) {
                positions.push(epoch.position);
            }
        }
        for pair in positions.windows(2) {
            let spacing = (pair[1] - pair[0]) as f32;
            assert!(
                (spacing - expected_period).abs() < 2.0,
                "spacing {} vs period {}",
                spacing,
                expected_period
            );
        }
    }

    #[test]
    fn silence_produces_no_epochs() {
        let input = vec![0.0; SAMPLE_RATE as usize / 2];
        let (_, store) = run_detector(&input);
        assert!(store.is_empty());
    }

    #[test]
    fn noise_produces_fallback_epochs() {
        let mut rng = SmallRng::seed_from_u64(12345);
        let input = (0..SAMPLE_RATE as usize / 2)
            .map(|_| rng.random_range(-0.25..0.25))
            .collect::<Vec<_>>();
        let (_, store) = run_detector(&input);

        assert!(!store.is_empty());
        let latest = store.latest().unwrap();
        // fallback epochs are unvoiced and evenly spaced at the default rate
        assert!(latest.confidence < VOICED_CONFIDENCE_THRESHOLD);
        assert_eq!(latest.period, default_period_samples(SAMPLE_RATE));
    }

    #[test]
    fn epoch_positions_are_strictly_increasing() {
        let input = (0..SAMPLE_RATE as usize / 2)
            .map(|i| {
                let t = i as f32 / SAMPLE_RATE as f32;
                // sweep from 150 to 300 Hz
                (2.0 * std::f32::consts::PI * (150.0 * t + 75.0 * t * t)).sin() * 0.5
            })
            .collect::<Vec<_>>();
        let (_, store) = run_detector(&input);

        assert!(store.len() > 10);
        let mut last = store.nearest(0).unwrap().position;
        for target in (0..SAMPLE_RATE as u64 / 2).step_by(50) {
            let position = store.nearest(target).unwrap().position;
            assert!(position >= last);
            last = position;
        }
    }
}
