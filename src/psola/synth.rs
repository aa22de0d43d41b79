use super::{
    default_period_samples, hann_window, latency_samples, max_period_samples,
    min_period_samples, EpochStore, InputHistory, OverlapAddBuffer,
    VOICED_CONFIDENCE_THRESHOLD,
};

// -------------------------------------------------------------------------------------------------

/// Maximum distance between a grain's target position and its source epoch, in maximum
/// pitch periods. Larger gaps (after signal dropouts or resets) synthesize silence
/// instead of smearing a stale epoch across the gap.
const MAX_EPOCH_GAP_PERIODS: f64 = 8.0;

// -------------------------------------------------------------------------------------------------

/// Synthesizes one pitch-shifted voice by overlap-adding windowed grains cut at epochs.
///
/// The voice walks an output phase along the output stream, one grain spacing at a time.
/// For each grain it picks the epoch nearest to the corresponding input position, cuts a
/// two period Hann windowed grain around it and accumulates it into the output rings.
/// Spacing grains at `period / ratio` while keeping their content shifts the pitch:
///
/// - with formant preservation the grain is copied as-is, so the spectral envelope of
///   the input is kept and only the pulse rate changes,
/// - without it the grain is resampled by the ratio, which shifts envelope and pitch
///   together and exactly scales the carrier frequency.
///
/// The pitch ratio is latched per grain: in-flight grains always complete at the ratio
/// they were spawned with, so ratio changes can never tear a window apart.
#[derive(Debug, Clone)]
pub struct GrainSynthesizer {
    min_period: f32,
    max_period: f32,
    default_period: f64,
    latency: f64,
    max_grain_half: f64,
    // control state, updated at block rate
    ratio: f32,
    left_gain: f32,
    right_gain: f32,
    formant_preserve: bool,
    active: bool,
    // absolute output stream position of the next grain center
    out_phase: f64,
}

impl GrainSynthesizer {
    pub fn new(sample_rate: u32) -> Self {
        let max_period = max_period_samples(sample_rate);
        Self {
            min_period: min_period_samples(sample_rate) as f32,
            max_period: max_period as f32,
            default_period: default_period_samples(sample_rate) as f64,
            latency: latency_samples(sample_rate) as f64,
            max_grain_half: 2.0 * max_period as f64,
            ratio: 1.0,
            left_gain: 1.0,
            right_gain: 1.0,
            formant_preserve: true,
            active: false,
            out_phase: 0.0,
        }
    }

    #[inline]
    pub fn is_active(&self) -> bool {
        self.active
    }

    #[inline]
    pub fn ratio(&self) -> f32 {
        self.ratio
    }

    /// Set the voice's pitch ratio. Applied to grains spawned from now on.
    pub fn set_ratio(&mut self, ratio: f32) {
        self.ratio = ratio;
    }

    /// Set the voice's stereo output gains.
    pub fn set_gains(&mut self, left_gain: f32, right_gain: f32) {
        self.left_gain = left_gain;
        self.right_gain = right_gain;
    }

    /// Toggle between formant preserving and resampling grain synthesis.
    pub fn set_formant_preserve(&mut self, formant_preserve: bool) {
        self.formant_preserve = formant_preserve;
    }

    /// Activate the voice, starting grain synthesis at the given output position.
    pub fn activate(&mut self, position: f64) {
        if !self.active {
            self.active = true;
            self.out_phase = position;
        }
    }

    /// Deactivate the voice. Grains already accumulated into the output rings play out.
    pub fn deactivate(&mut self) {
        self.active = false;
    }

    /// Synthesize grains for one output block, accumulating into the stereo output rings.
    ///
    /// Grains are spawned ahead of the block end so that every output sample of the
    /// block has full window coverage from both of its overlapping grains.
    pub fn process(
        &mut self,
        history: &InputHistory,
        store: &EpochStore,
        left: &mut OverlapAddBuffer,
        right: &mut OverlapAddBuffer,
        block_start: u64,
        block_len: usize,
    ) {
        if !self.active {
            return;
        }
        // a reactivated or starved voice never spawns grains into already drained output
        self.out_phase = self.out_phase.max(block_start as f64);

        let horizon = (block_start + block_len as u64) as f64 + 2.0 * self.max_period as f64;
        while self.out_phase < horizon {
            let target = self.out_phase - self.latency;
            if target < 0.0 {
                self.advance_silent();
                continue;
            }
            let Some(epoch) = store.nearest(target as u64).copied() else {
                self.advance_silent();
                continue;
            };
            let gap = (epoch.position as f64 - target).abs();
            if gap > MAX_EPOCH_GAP_PERIODS * self.max_period as f64 {
                self.advance_silent();
                continue;
            }

            // unvoiced input has no meaningful pitch to shift, pass it through instead
            let ratio = if epoch.confidence < VOICED_CONFIDENCE_THRESHOLD {
                1.0
            } else {
                self.ratio
            };
            let period = epoch.period.clamp(self.min_period, self.max_period) as f64;
            let spacing = period / ratio as f64;
            let (half_width, increment) = if self.formant_preserve {
                (period, 1.0)
            } else {
                (period / ratio as f64, ratio as f64)
            };
            let half_width = half_width.min(self.max_grain_half);
            // Hann overlap-add at spacing `s` with half width `h` has DC gain `h / s`
            let compensation = (spacing / half_width) as f32;

            let first = (self.out_phase - half_width).ceil() as i64;
            let last = (self.out_phase + half_width).floor() as i64;
            for n in first..=last {
                let t = n as f64 - self.out_phase;
                let window_phase = (t + half_width) / (2.0 * half_width);
                let window = hann_window(window_phase);
                if window <= 0.0 {
                    continue;
                }
                let source = epoch.position as f64 + t * increment;
                let sample = history.sample_interpolated(source);
                let value = window * sample * compensation;
                let position = n.max(0) as u64;
                left.add(position, value * self.left_gain);
                right.add(position, value * self.right_gain);
            }

            self.out_phase += spacing;
        }
    }

    /// Deactivate and restart the output phase at stream position 0.
    pub fn reset(&mut self) {
        self.active = false;
        self.out_phase = 0.0;
    }

    #[inline]
    fn advance_silent(&mut self) {
        self.out_phase += self.default_period;
    }
}

// -------------------------------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::super::Epoch;
    use super::*;

    const SAMPLE_RATE: u32 = 44100;
    const BLOCK_LEN: usize = 512;

    // 220.5 Hz: period is exactly 200 samples
    const PERIOD: usize = 200;

    fn sine(position: f64) -> f32 {
        (2.0 * std::f64::consts::PI * position / PERIOD as f64).sin() as f32 * 0.5
    }

    /// Render `blocks` output blocks from a sine input with manually placed epochs.
    fn render(synth: &mut GrainSynthesizer, blocks: usize) -> Vec<f32> {
        let max_period = max_period_samples(SAMPLE_RATE);
        let mut history = InputHistory::new(BLOCK_LEN + 8 * max_period);
        let mut store = EpochStore::new();
        let mut left = OverlapAddBuffer::new(BLOCK_LEN + 6 * max_period);
        let mut right = OverlapAddBuffer::new(BLOCK_LEN + 6 * max_period);

        let mut output = Vec::new();
        let mut next_epoch = PERIOD as u64 / 4; // sine maximum
        for block in 0..blocks {
            let block_start = (block * BLOCK_LEN) as u64;
            let input = (0..BLOCK_LEN)
                .map(|i| sine((block_start + i as u64) as f64))
                .collect::<Vec<_>>();
            history.write(&input);
            // place perfect epochs at the sine's maxima, a full period behind the input
            while next_epoch + PERIOD as u64 <= history.write_pos() {
                store.append(Epoch {
                    position: next_epoch,
                    period: PERIOD as f32,
                    confidence: 1.0,
                });
                next_epoch += PERIOD as u64;
            }
            synth.process(&history, &store, &mut left, &mut right, block_start, BLOCK_LEN);
            let mut block_out = vec![0.0; BLOCK_LEN];
            left.drain(block_start, &mut block_out);
            let mut right_out = vec![0.0; BLOCK_LEN];
            right.drain(block_start, &mut right_out);
            output.extend_from_slice(&block_out);
        }
        output
    }

    fn zero_crossing_frequency(samples: &[f32]) -> f32 {
        let crossings = samples
            .windows(2)
            .filter(|pair| pair[0] < 0.0 && pair[1] >= 0.0)
            .count();
        crossings as f32 * SAMPLE_RATE as f32 / samples.len() as f32
    }

    #[test]
    fn inactive_voice_is_silent() {
        let mut synth = GrainSynthesizer::new(SAMPLE_RATE);
        let output = render(&mut synth, 8);
        assert!(output.iter().all(|&s| s == 0.0));
    }

    #[test]
    fn unison_reconstructs_delayed_input() {
        let mut synth = GrainSynthesizer::new(SAMPLE_RATE);
        synth.set_ratio(1.0);
        synth.activate(0.0);
        let output = render(&mut synth, 100);

        // reconstruction is delayed by the latency plus a constant sub-period offset,
        // so search for the best matching lag around the nominal latency
        let latency = latency_samples(SAMPLE_RATE);
        let start = 4 * latency;
        let end = output.len() - 1;
        let mut best_correlation = -1.0_f64;
        let mut best_gain = 0.0_f64;
        for lag in latency.saturating_sub(PERIOD)..=latency + PERIOD {
            let mut dot = 0.0_f64;
            let mut out_energy = 0.0_f64;
            let mut in_energy = 0.0_f64;
            for n in start..end {
                let expected = sine((n - lag) as f64);
                dot += output[n] as f64 * expected as f64;
                out_energy += output[n] as f64 * output[n] as f64;
                in_energy += expected as f64 * expected as f64;
            }
            let correlation = dot / (out_energy.sqrt() * in_energy.sqrt());
            if correlation > best_correlation {
                best_correlation = correlation;
                best_gain = (out_energy / in_energy).sqrt();
            }
        }
        assert!(
            best_correlation > 0.95,
            "unison output should track the delayed input, correlation {}",
            best_correlation
        );
        // and the level matches within 3 dB
        assert!((0.7..1.42).contains(&best_gain), "unison gain {}", best_gain);
    }

    #[test]
    fn resampled_grains_scale_the_carrier() {
        let ratio = 2.0_f32.powf(7.0 / 12.0); // up a fifth
        let mut synth = GrainSynthesizer::new(SAMPLE_RATE);
        synth.set_ratio(ratio);
        synth.set_formant_preserve(false);
        synth.activate(0.0);
        let output = render(&mut synth, 100);

        let start = 4 * latency_samples(SAMPLE_RATE);
        let measured = zero_crossing_frequency(&output[start..]);
        let expected = SAMPLE_RATE as f32 / PERIOD as f32 * ratio;
        assert!(
            (measured - expected).abs() / expected < 0.02,
            "measured {} Hz vs expected {} Hz",
            measured,
            expected
        );
    }

    #[test]
    fn formant_preserving_grains_shift_the_pulse_rate() {
        let ratio = 1.5_f32;
        let mut synth = GrainSynthesizer::new(SAMPLE_RATE);
        synth.set_ratio(ratio);
        synth.set_formant_preserve(true);
        synth.activate(0.0);
        let output = render(&mut synth, 100);

        let start = 4 * latency_samples(SAMPLE_RATE);
        let analysis = &output[start..];
        // output is audible and bounded
        let rms = (analysis.iter().map(|&s| s as f64 * s as f64).sum::<f64>()
            / analysis.len() as f64)
            .sqrt();
        assert!(rms > 0.02, "rms {}", rms);
        assert!(analysis.iter().all(|s| s.is_finite()));
        // pulses repeat at the shifted rate
        let measured = zero_crossing_frequency(analysis);
        let expected = SAMPLE_RATE as f32 / PERIOD as f32 * ratio;
        assert!(
            (measured - expected).abs() / expected < 0.05,
            "measured {} Hz vs expected {} Hz",
            measured,
            expected
        );
    }

    #[test]
    fn empty_store_synthesizes_silence() {
        let mut synth = GrainSynthesizer::new(SAMPLE_RATE);
        synth.activate(0.0);

        let max_period = max_period_samples(SAMPLE_RATE);
        let history = InputHistory::new(BLOCK_LEN + 8 * max_period);
        let store = EpochStore::new();
        let mut left = OverlapAddBuffer::new(BLOCK_LEN + 6 * max_period);
        let mut right = OverlapAddBuffer::new(BLOCK_LEN + 6 * max_period);

        for block in 0..32u64 {
            let block_start = block * BLOCK_LEN as u64;
            synth.process(&history, &store, &mut left, &mut right, block_start, BLOCK_LEN);
            let mut output = vec![0.0; BLOCK_LEN];
            left.drain(block_start, &mut output);
            assert!(output.iter().all(|&s| s == 0.0));
            let mut output = vec![0.0; BLOCK_LEN];
            right.drain(block_start, &mut output);
            assert!(output.iter().all(|&s| s == 0.0));
        }
    }
}
