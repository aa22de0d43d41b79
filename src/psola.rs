//! Pitch-synchronous overlap-add building blocks: epoch detection, epoch storage and
//! grain synthesis, plus the ring buffers that connect them.
//!
//! All positions in this module are absolute sample positions on a monotonically growing
//! mono stream, counted from engine start (or the last reset). Keeping positions absolute
//! instead of buffer-relative avoids a whole class of wrap-around bugs: ring indexing
//! happens in exactly one place per buffer type.

use std::sync::LazyLock;

use assume::assume;

pub mod detector;
pub mod store;
pub mod synth;

pub use detector::EpochDetector;
pub use store::EpochStore;
pub use synth::GrainSynthesizer;

// -------------------------------------------------------------------------------------------------

/// Lowest fundamental frequency the epoch detector tracks.
pub const MIN_FUNDAMENTAL_HZ: f32 = 60.0;
/// Highest fundamental frequency the epoch detector tracks.
pub const MAX_FUNDAMENTAL_HZ: f32 = 800.0;
/// Fundamental assumed for unvoiced or silent input, where no pitch can be measured.
pub const DEFAULT_FUNDAMENTAL_HZ: f32 = 200.0;

/// Longest trackable pitch period in samples (at [`MIN_FUNDAMENTAL_HZ`]).
pub fn max_period_samples(sample_rate: u32) -> usize {
    (sample_rate as f32 / MIN_FUNDAMENTAL_HZ).ceil() as usize
}

/// Shortest trackable pitch period in samples (at [`MAX_FUNDAMENTAL_HZ`]).
pub fn min_period_samples(sample_rate: u32) -> usize {
    (sample_rate as f32 / MAX_FUNDAMENTAL_HZ).floor() as usize
}

/// Grain spacing used when the input carries no usable pitch.
pub fn default_period_samples(sample_rate: u32) -> f32 {
    sample_rate as f32 / DEFAULT_FUNDAMENTAL_HZ
}

/// Engine latency in samples: grains are synthesized this far behind the input so that
/// a full analysis window and grain extraction context is always available.
pub fn latency_samples(sample_rate: u32) -> usize {
    3 * max_period_samples(sample_rate)
}

/// Detection confidence at or above which input counts as voiced. Epochs below this
/// threshold are synthesized without pitch shifting.
pub const VOICED_CONFIDENCE_THRESHOLD: f32 = 0.4;

// -------------------------------------------------------------------------------------------------

/// A single detected pitch pulse in the input stream.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Epoch {
    /// Absolute input stream position of the pulse.
    pub position: u64,
    /// Local pitch period in samples at this pulse.
    pub period: f32,
    /// Detection confidence in `0.0..=1.0`. Low values mark unvoiced fallback epochs.
    pub confidence: f32,
}

// -------------------------------------------------------------------------------------------------

const HANN_TABLE_SIZE: usize = 4096;

static HANN_TABLE: LazyLock<Vec<f32>> = LazyLock::new(|| {
    let mut table = Vec::with_capacity(HANN_TABLE_SIZE + 1);
    for i in 0..=HANN_TABLE_SIZE {
        let phase = i as f64 / HANN_TABLE_SIZE as f64;
        table.push((0.5 - 0.5 * (2.0 * std::f64::consts::PI * phase).cos()) as f32);
    }
    table
});

/// Table driven Hann window lookup with linear interpolation.
///
/// `phase` is the normalized window position in `0.0..=1.0`. Out of range phases return 0,
/// and so do both exact endpoints, where the window is zero valued anyway. Treating
/// `phase == 1.0` as out of range keeps the interpolation read strictly inside the table.
#[inline]
pub fn hann_window(phase: f64) -> f32 {
    if phase <= 0.0 || phase >= 1.0 {
        return 0.0;
    }
    let table = &*HANN_TABLE;
    let pos = phase * HANN_TABLE_SIZE as f64;
    let index = pos as usize;
    let frac = (pos - index as f64) as f32;
    assume!(unsafe: index + 1 < table.len());
    table[index] + (table[index + 1] - table[index]) * frac
}

// -------------------------------------------------------------------------------------------------

/// Mono ring buffer over the input stream, indexed by absolute stream position.
///
/// The buffer is sized so that the epoch detector's analysis window and the synthesizer's
/// grain extraction range always stay within the retained history. Old samples are
/// silently overwritten.
#[derive(Debug, Clone)]
pub struct InputHistory {
    buffer: Vec<f32>,
    mask: usize,
    write_pos: u64,
}

impl InputHistory {
    /// Create a history buffer which retains at least `min_capacity` samples.
    pub fn new(min_capacity: usize) -> Self {
        let capacity = min_capacity.next_power_of_two();
        Self {
            buffer: vec![0.0; capacity],
            mask: capacity - 1,
            write_pos: 0,
        }
    }

    /// Absolute position one past the most recently written sample.
    #[inline]
    pub fn write_pos(&self) -> u64 {
        self.write_pos
    }

    /// Append a block of mono samples.
    pub fn write(&mut self, samples: &[f32]) {
        for &sample in samples {
            self.buffer[(self.write_pos & self.mask as u64) as usize] = sample;
            self.write_pos += 1;
        }
    }

    /// Fetch the sample at an absolute integer position. Positions outside the written
    /// stream return silence.
    #[inline]
    pub fn sample(&self, position: u64) -> f32 {
        if position >= self.write_pos
            || self.write_pos - position > self.buffer.len() as u64
        {
            return 0.0;
        }
        let buffer = &self.buffer;
        let index = (position & self.mask as u64) as usize;
        assume!(unsafe: index < buffer.len());
        buffer[index]
    }

    /// Fetch an interpolated sample at a fractional absolute position, using 4 point
    /// Catmull-Rom interpolation.
    #[inline]
    pub fn sample_interpolated(&self, position: f64) -> f32 {
        if position < 1.0 {
            return 0.0;
        }
        let base = position as u64;
        let frac = (position - base as f64) as f32;
        let s0 = self.sample(base - 1);
        let s1 = self.sample(base);
        let s2 = self.sample(base + 1);
        let s3 = self.sample(base + 2);
        let c0 = s1;
        let c1 = 0.5 * (s2 - s0);
        let c2 = s0 - 2.5 * s1 + 2.0 * s2 - 0.5 * s3;
        let c3 = 0.5 * (s3 - s0) + 1.5 * (s1 - s2);
        ((c3 * frac + c2) * frac + c1) * frac + c0
    }

    /// Clear all contents and restart the stream at position 0.
    pub fn reset(&mut self) {
        self.buffer.fill(0.0);
        self.write_pos = 0;
    }
}

// -------------------------------------------------------------------------------------------------

/// Output accumulation ring for overlap-added grains, indexed by absolute output position.
///
/// Grains write ahead of the drain position, possibly several pitch periods into the
/// future. `drained_until` guards the ring against stale writes: positions which already
/// have been drained are dropped instead of aliasing into future ring content.
#[derive(Debug, Clone)]
pub struct OverlapAddBuffer {
    buffer: Vec<f32>,
    mask: usize,
    drained_until: u64,
}

impl OverlapAddBuffer {
    /// Create an accumulator which can hold at least `min_capacity` undrained samples.
    pub fn new(min_capacity: usize) -> Self {
        let capacity = min_capacity.next_power_of_two();
        Self {
            buffer: vec![0.0; capacity],
            mask: capacity - 1,
            drained_until: 0,
        }
    }

    /// Absolute position up to which the buffer has been drained.
    #[inline]
    pub fn drained_until(&self) -> u64 {
        self.drained_until
    }

    /// Accumulate a sample at an absolute output position. Writes behind the drain
    /// position are dropped.
    #[inline]
    pub fn add(&mut self, position: u64, value: f32) {
        if position < self.drained_until {
            return;
        }
        debug_assert!(
            position - self.drained_until < self.buffer.len() as u64,
            "overlap-add write beyond ring capacity"
        );
        let buffer = &mut self.buffer;
        let index = (position & self.mask as u64) as usize;
        assume!(unsafe: index < buffer.len());
        buffer[index] += value;
    }

    /// Move accumulated samples for `output.len()` positions starting at `start` into
    /// `output`, zeroing the drained slots for reuse.
    ///
    /// Drained samples are scrubbed: non-finite values are replaced with silence and
    /// the remaining values are clamped to a sane range, so a numerical accident in a
    /// single grain can never take down the whole output stream.
    pub fn drain(&mut self, start: u64, output: &mut [f32]) {
        debug_assert!(start == self.drained_until, "non-contiguous drain");
        for (offset, out) in output.iter_mut().enumerate() {
            let index = ((start + offset as u64) & self.mask as u64) as usize;
            let value = self.buffer[index];
            self.buffer[index] = 0.0;
            *out = if value.is_finite() {
                value.clamp(-4.0, 4.0)
            } else {
                0.0
            };
        }
        self.drained_until = start + output.len() as u64;
    }

    /// Clear all contents and restart the stream at position 0.
    pub fn reset(&mut self) {
        self.buffer.fill(0.0);
        self.drained_until = 0;
    }
}

// -------------------------------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hann_window_shape() {
        // exact endpoints are zero and must not read past the table end
        assert_eq!(hann_window(0.0), 0.0);
        assert_eq!(hann_window(1.0), 0.0);
        // phases just inside the last table cell interpolate without panicking
        let last_cell = (HANN_TABLE_SIZE as f64 - 0.5) / HANN_TABLE_SIZE as f64;
        assert!(hann_window(last_cell) > 0.0);
        assert!(hann_window(last_cell) < 1e-5);
        assert!((hann_window(0.5) - 1.0).abs() < 1e-4);
        assert!((hann_window(0.25) - 0.5).abs() < 1e-3);
        // complementary halves sum to one, which is what makes 2x overlap-add gain-neutral
        for i in 0..100 {
            let phase = i as f64 / 100.0 * 0.5;
            let sum = hann_window(phase) + hann_window(phase + 0.5);
            assert!((sum - 1.0).abs() < 1e-3);
        }
        assert_eq!(hann_window(-0.1), 0.0);
        assert_eq!(hann_window(1.1), 0.0);
    }

    #[test]
    fn input_history_positions() {
        let mut history = InputHistory::new(16);
        history.write(&[1.0, 2.0, 3.0, 4.0]);
        assert_eq!(history.write_pos(), 4);
        assert_eq!(history.sample(0), 1.0);
        assert_eq!(history.sample(3), 4.0);
        // unwritten and expired positions are silent
        assert_eq!(history.sample(4), 0.0);
        history.write(&vec![0.5; 16]);
        assert_eq!(history.sample(0), 0.0);
        assert_eq!(history.sample(19), 0.5);
    }

    #[test]
    fn input_history_interpolation() {
        let mut history = InputHistory::new(64);
        // Catmull-Rom reproduces linear ramps exactly
        let ramp = (0..32).map(|i| i as f32 * 0.25).collect::<Vec<_>>();
        history.write(&ramp);
        for i in 4..28 {
            let pos = i as f64 + 0.5;
            let expected = (i as f32 + 0.5) * 0.25;
            assert!((history.sample_interpolated(pos) - expected).abs() < 1e-5);
        }
        // integer positions match direct fetches
        assert_eq!(history.sample_interpolated(10.0), history.sample(10));
    }

    #[test]
    fn overlap_add_drain() {
        let mut buffer = OverlapAddBuffer::new(32);
        buffer.add(2, 0.5);
        buffer.add(2, 0.25);
        buffer.add(10, 1.0);
        let mut output = [0.0; 8];
        buffer.drain(0, &mut output);
        assert_eq!(output[2], 0.75);
        assert_eq!(output[0], 0.0);
        assert_eq!(buffer.drained_until(), 8);
        // drained slots are zeroed and ready for reuse
        let mut output = [0.0; 8];
        buffer.drain(8, &mut output);
        assert_eq!(output[2], 1.0);
        // stale writes behind the drain position are dropped
        buffer.add(3, 123.0);
        let mut output = [0.0; 8];
        buffer.drain(16, &mut output);
        assert_eq!(output, [0.0; 8]);
    }

    #[test]
    fn overlap_add_scrubbing() {
        let mut buffer = OverlapAddBuffer::new(16);
        buffer.add(0, f32::NAN);
        buffer.add(1, 100.0);
        buffer.add(2, -100.0);
        let mut output = [0.0; 4];
        buffer.drain(0, &mut output);
        assert_eq!(output[0], 0.0);
        assert_eq!(output[1], 4.0);
        assert_eq!(output[2], -4.0);
    }
}
