use std::{any::Any, sync::Arc};

use crossbeam_queue::ArrayQueue;
use four_cc::FourCC;
use rand::{rngs::SmallRng, Rng, SeedableRng};

use crate::{
    chord::{map_voices, ChordSelector, Key, Scale, VoiceRatios, MAX_VOICES},
    engine::{Engine, EngineMessage, EngineMessagePayload},
    parameter::{
        BooleanParameter, BooleanParameterValue, EnumParameter, EnumParameterValue,
        FloatParameter, FloatParameterValue, IntegerParameter, IntegerParameterValue,
        ParameterValueUpdate, SmoothedParameterValue,
    },
    psola::{
        latency_samples, max_period_samples, EpochDetector, EpochStore, GrainSynthesizer,
        InputHistory, OverlapAddBuffer,
    },
    utils::{
        buffer::{clear_buffer, interleaved_to_mono},
        panning_factors,
    },
    ClonableParameter, Error,
};

// -------------------------------------------------------------------------------------------------

pub const CHORD_PARAMETER: FourCC = FourCC(*b"chrd");
pub const KEY_PARAMETER: FourCC = FourCC(*b"key ");
pub const SCALE_PARAMETER: FourCC = FourCC(*b"scal");
pub const QUANTIZE_PARAMETER: FourCC = FourCC(*b"qntz");
pub const VOICES_PARAMETER: FourCC = FourCC(*b"vcnt");
pub const INTERVAL_PARAMETER: FourCC = FourCC(*b"intv");
pub const MIX_PARAMETER: FourCC = FourCC(*b"mix ");
pub const HUMANIZE_PARAMETER: FourCC = FourCC(*b"hmnz");
pub const FORMANT_PARAMETER: FourCC = FourCC(*b"frmt");
pub const SPREAD_PARAMETER: FourCC = FourCC(*b"sprd");

// -------------------------------------------------------------------------------------------------

/// Sample rate assumed before [`HarmonizerEngine::initialize`] got called.
const DEFAULT_SAMPLE_RATE: u32 = 44100;

/// Capacity of the controller's parameter update queue.
const UPDATE_QUEUE_SIZE: usize = 1024;

/// Maximum detune depth of the humanize random walk in cents.
const HUMANIZE_DETUNE_CENTS: f32 = 25.0;

/// Per block step bound of the humanize detune random walk.
const HUMANIZE_WALK_STEP: f32 = 0.02;

/// Per voice activation delay at full humanize depth, in seconds.
const HUMANIZE_TIMING_SPREAD: f64 = 0.0025;

/// Static stereo positions per voice, scaled by the spread parameter. The lead voice
/// stays centered, harmony voices fan out alternating left and right.
const VOICE_PAN_POSITIONS: [f32; MAX_VOICES] = [0.0, -0.75, 0.75, -0.375];

// -------------------------------------------------------------------------------------------------

/// Messages for the [`HarmonizerEngine`], which are applied in the DSP real-time thread.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum HarmonizerMessage {
    /// Clear all internal audio state (history, epochs, voices and delay lines) while
    /// keeping the current parameter values. After a reset the engine behaves exactly as
    /// if it just got initialized.
    Reset,
}

impl EngineMessage for HarmonizerMessage {
    fn engine_name(&self) -> &'static str {
        HarmonizerEngine::NAME
    }
    fn payload(&self) -> &dyn Any {
        self
    }
}

// -------------------------------------------------------------------------------------------------

/// Clonable, thread-safe handle to schedule parameter changes for a [`HarmonizerEngine`]
/// from non real-time threads (e.g. UIs).
///
/// Updates are queued lock-free and get applied by the engine at the start of its next
/// process call. When the queue runs full, updates are rejected with a
/// [`Error::SendError`] instead of blocking.
#[derive(Debug, Clone)]
pub struct HarmonizerController {
    updates: Arc<ArrayQueue<(FourCC, ParameterValueUpdate)>>,
}

impl HarmonizerController {
    /// Schedule a raw or normalized update for the given parameter.
    pub fn set_parameter(&self, id: FourCC, update: ParameterValueUpdate) -> Result<(), Error> {
        self.updates
            .push((id, update))
            .map_err(|_| Error::SendError(format!("Parameter update queue is full (id: '{id}')")))
    }

    pub fn set_chord(&self, chord: ChordSelector) -> Result<(), Error> {
        self.set_parameter(CHORD_PARAMETER, ParameterValueUpdate::Raw(Box::new(chord)))
    }

    pub fn set_key(&self, key: Key) -> Result<(), Error> {
        self.set_parameter(KEY_PARAMETER, ParameterValueUpdate::Raw(Box::new(key)))
    }

    pub fn set_scale(&self, scale: Scale) -> Result<(), Error> {
        self.set_parameter(SCALE_PARAMETER, ParameterValueUpdate::Raw(Box::new(scale)))
    }

    pub fn set_quantize(&self, quantize: bool) -> Result<(), Error> {
        self.set_parameter(
            QUANTIZE_PARAMETER,
            ParameterValueUpdate::Raw(Box::new(quantize)),
        )
    }

    pub fn set_voice_count(&self, voices: i32) -> Result<(), Error> {
        self.set_parameter(VOICES_PARAMETER, ParameterValueUpdate::Raw(Box::new(voices)))
    }

    pub fn set_interval(&self, semitones: f32) -> Result<(), Error> {
        self.set_parameter(
            INTERVAL_PARAMETER,
            ParameterValueUpdate::Raw(Box::new(semitones)),
        )
    }

    pub fn set_mix(&self, mix: f32) -> Result<(), Error> {
        self.set_parameter(MIX_PARAMETER, ParameterValueUpdate::Raw(Box::new(mix)))
    }

    pub fn set_humanize(&self, humanize: f32) -> Result<(), Error> {
        self.set_parameter(
            HUMANIZE_PARAMETER,
            ParameterValueUpdate::Raw(Box::new(humanize)),
        )
    }

    pub fn set_formant_preserve(&self, formant_preserve: bool) -> Result<(), Error> {
        self.set_parameter(
            FORMANT_PARAMETER,
            ParameterValueUpdate::Raw(Box::new(formant_preserve)),
        )
    }

    pub fn set_spread(&self, spread: f32) -> Result<(), Error> {
        self.set_parameter(SPREAD_PARAMETER, ParameterValueUpdate::Raw(Box::new(spread)))
    }
}

// -------------------------------------------------------------------------------------------------

/// A real-time multi-voice pitch-shifting harmonizer.
///
/// The engine tracks pitch pulse positions (epochs) in the incoming audio and
/// re-synthesizes up to [`MAX_VOICES`] pitch-shifted copies of the input via
/// pitch-synchronous overlap-add, mixed with the latency-compensated dry signal.
/// Voice pitches follow a selectable chord, optionally quantized to a key and scale.
///
/// Input is downmixed to mono for analysis and synthesis. Stereo width comes from
/// panning the individual voices via the spread parameter.
///
/// The amount of pitch shifting applied per grain never changes while a grain plays
/// out, so parameter changes are always click-free.
pub struct HarmonizerEngine {
    // parameters
    chord: EnumParameterValue<ChordSelector>,
    key: EnumParameterValue<Key>,
    scale: EnumParameterValue<Scale>,
    quantize: BooleanParameterValue,
    voices_limit: IntegerParameterValue,
    interval: FloatParameterValue,
    mix: SmoothedParameterValue,
    humanize: FloatParameterValue,
    formant_preserve: BooleanParameterValue,
    spread: FloatParameterValue,
    /// Set when a parameter changed which affects the voice ratio mapping.
    voicing_dirty: bool,
    voice_ratios: VoiceRatios,

    // audio configuration
    sample_rate: u32,
    channel_count: usize,
    max_frames: usize,
    latency: usize,
    initialized: bool,

    // dsp state
    history: InputHistory,
    detector: EpochDetector,
    store: EpochStore,
    voices: Vec<GrainSynthesizer>,
    wet_left: OverlapAddBuffer,
    wet_right: OverlapAddBuffer,
    dry_delay: [Vec<f32>; 2],
    mono_scratch: Vec<f32>,
    wet_left_scratch: Vec<f32>,
    wet_right_scratch: Vec<f32>,
    /// Absolute stream position of the next process block.
    block_pos: u64,

    // humanize state
    rng_seed: u64,
    rng: SmallRng,
    detune_walk: [f32; MAX_VOICES],

    // pending parameter updates from controllers
    updates: Arc<ArrayQueue<(FourCC, ParameterValueUpdate)>>,
}

impl HarmonizerEngine {
    pub const NAME: &'static str = "harmonizer";

    pub fn new() -> Self {
        let rng_seed = rand::rng().random::<u64>();
        Self {
            chord: EnumParameterValue::from_description(EnumParameter::new(
                CHORD_PARAMETER,
                "Chord",
                ChordSelector::Custom,
            )),
            key: EnumParameterValue::from_description(EnumParameter::new(
                KEY_PARAMETER,
                "Key",
                Key::C,
            )),
            scale: EnumParameterValue::from_description(EnumParameter::new(
                SCALE_PARAMETER,
                "Scale",
                Scale::Chromatic,
            )),
            quantize: BooleanParameterValue::from_description(BooleanParameter::new(
                QUANTIZE_PARAMETER,
                "Quantize",
                false,
            )),
            voices_limit: IntegerParameterValue::from_description(IntegerParameter::new(
                VOICES_PARAMETER,
                "Voices",
                1..=MAX_VOICES as i32,
                MAX_VOICES as i32,
            )),
            interval: FloatParameterValue::from_description(
                FloatParameter::new(INTERVAL_PARAMETER, "Interval", -24.0..=24.0, 0.0)
                    .with_unit("semi"),
            ),
            mix: SmoothedParameterValue::from_description(
                FloatParameter::new(MIX_PARAMETER, "Mix", 0.0..=1.0, 1.0).with_unit("%"),
            ),
            humanize: FloatParameterValue::from_description(FloatParameter::new(
                HUMANIZE_PARAMETER,
                "Humanize",
                0.0..=1.0,
                0.0,
            )),
            formant_preserve: BooleanParameterValue::from_description(BooleanParameter::new(
                FORMANT_PARAMETER,
                "Formant Preserve",
                false,
            )),
            spread: FloatParameterValue::from_description(FloatParameter::new(
                SPREAD_PARAMETER,
                "Stereo Spread",
                0.0..=1.0,
                0.0,
            )),
            voicing_dirty: true,
            voice_ratios: VoiceRatios::unison(),
            sample_rate: DEFAULT_SAMPLE_RATE,
            channel_count: 2,
            max_frames: 0,
            latency: 0,
            initialized: false,
            history: InputHistory::new(1),
            detector: EpochDetector::new(DEFAULT_SAMPLE_RATE),
            store: EpochStore::new(),
            voices: Vec::new(),
            wet_left: OverlapAddBuffer::new(1),
            wet_right: OverlapAddBuffer::new(1),
            dry_delay: [Vec::new(), Vec::new()],
            mono_scratch: Vec::new(),
            wet_left_scratch: Vec::new(),
            wet_right_scratch: Vec::new(),
            block_pos: 0,
            rng_seed,
            rng: SmallRng::seed_from_u64(rng_seed),
            detune_walk: [0.0; MAX_VOICES],
            updates: Arc::new(ArrayQueue::new(UPDATE_QUEUE_SIZE)),
        }
    }

    /// Create a new controller handle for this engine.
    ///
    /// Controllers can be cloned and moved freely across threads and stay connected to
    /// the engine's parameter update queue.
    pub fn controller(&self) -> HarmonizerController {
        HarmonizerController {
            updates: Arc::clone(&self.updates),
        }
    }

    /// Clear all internal audio state while keeping the current parameter values.
    ///
    /// The humanize random walk is reseeded with the engine's initial seed, so
    /// processing the same input twice around a reset produces identical output.
    fn reset_stream(&mut self) {
        self.history.reset();
        self.detector.reset();
        self.store.clear();
        for voice in &mut self.voices {
            voice.reset();
        }
        self.wet_left.reset();
        self.wet_right.reset();
        for ring in &mut self.dry_delay {
            ring.fill(0.0);
        }
        self.block_pos = 0;
        self.rng = SmallRng::seed_from_u64(self.rng_seed);
        self.detune_walk = [0.0; MAX_VOICES];
        // snap the mix smoother to its target to avoid a ramp from stale state
        self.mix.init_value_clamped(self.mix.target_value());
    }

    /// Re-evaluate per-voice ratios, gains and activation at control rate.
    fn update_voices(&mut self, block_start: u64) {
        if self.voicing_dirty {
            self.voice_ratios = map_voices(
                *self.chord.value(),
                *self.key.value(),
                *self.scale.value(),
                self.quantize.value(),
                self.interval.value(),
                self.voices_limit.value() as usize,
            );
            self.voicing_dirty = false;
        }
        let active_count = self.voice_ratios.count();
        let humanize = self.humanize.value();
        let spread = self.spread.value();
        let formant_preserve = self.formant_preserve.value();
        // equal power normalization over the active voice stack
        let voice_gain = 1.0 / (active_count as f32).sqrt();

        for (index, voice) in self.voices.iter_mut().enumerate() {
            if index >= active_count {
                if voice.is_active() {
                    voice.deactivate();
                }
                continue;
            }
            if !voice.is_active() {
                // slightly stagger voice onsets when humanized
                let onset_delay =
                    index as f64 * HUMANIZE_TIMING_SPREAD * humanize as f64 * self.sample_rate as f64;
                voice.activate(block_start as f64 + onset_delay);
            }
            // slow detune drift per voice, bounded random walk
            let step = self.rng.random_range(-HUMANIZE_WALK_STEP..=HUMANIZE_WALK_STEP);
            self.detune_walk[index] = (self.detune_walk[index] + step).clamp(-1.0, 1.0);
            let detune_cents = self.detune_walk[index] * HUMANIZE_DETUNE_CENTS * humanize;
            let ratio =
                self.voice_ratios.as_slice()[index] * 2.0_f32.powf(detune_cents / 1200.0);
            voice.set_ratio(ratio);
            voice.set_formant_preserve(formant_preserve);
            if self.channel_count == 1 {
                voice.set_gains(voice_gain, voice_gain);
            } else {
                let (left, right) = panning_factors(VOICE_PAN_POSITIONS[index] * spread);
                // scaled so a centered voice keeps unity gain per channel
                let center_norm = std::f32::consts::SQRT_2;
                voice.set_gains(
                    left * center_norm * voice_gain,
                    right * center_norm * voice_gain,
                );
            }
        }
    }

    fn process_block(&mut self, output: &mut [f32], frames: usize) {
        let block_start = self.block_pos;
        let channel_count = self.channel_count;

        // analysis input: mono downmix of the interleaved block
        let mono = &mut self.mono_scratch[..frames];
        interleaved_to_mono(output, channel_count, mono);
        self.history.write(mono);

        // feed the dry path delay lines
        let delay_mask = self.dry_delay[0].len() - 1;
        for (channel, ring) in self.dry_delay.iter_mut().take(channel_count).enumerate() {
            for frame in 0..frames {
                let position = (block_start + frame as u64) as usize & delay_mask;
                ring[position] = output[frame * channel_count + channel];
            }
        }

        self.detector.process(&self.history, &mut self.store);
        self.update_voices(block_start);

        for voice in &mut self.voices {
            voice.process(
                &self.history,
                &self.store,
                &mut self.wet_left,
                &mut self.wet_right,
                block_start,
                frames,
            );
        }

        let wet_left = &mut self.wet_left_scratch[..frames];
        self.wet_left.drain(block_start, wet_left);
        let wet_right = &mut self.wet_right_scratch[..frames];
        self.wet_right.drain(block_start, wet_right);

        // blend the latency-compensated dry path with the synthesized voices
        let latency = self.latency as u64;
        for frame in 0..frames {
            let mix = self.mix.next_value();
            let stream_pos = block_start + frame as u64;
            for channel in 0..channel_count {
                let dry = if stream_pos >= latency {
                    self.dry_delay[channel][(stream_pos - latency) as usize & delay_mask]
                } else {
                    0.0
                };
                let wet = if channel_count == 2 && channel == 1 {
                    wet_right[frame]
                } else {
                    wet_left[frame]
                };
                output[frame * channel_count + channel] = dry + (wet - dry) * mix;
            }
        }

        self.block_pos += frames as u64;
    }
}

impl Default for HarmonizerEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl Engine for HarmonizerEngine {
    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn parameters(&self) -> Vec<&dyn ClonableParameter> {
        vec![
            self.chord.description(),
            self.key.description(),
            self.scale.description(),
            self.quantize.description(),
            self.voices_limit.description(),
            self.interval.description(),
            self.mix.description(),
            self.humanize.description(),
            self.formant_preserve.description(),
            self.spread.description(),
        ]
    }

    fn initialize(
        &mut self,
        sample_rate: u32,
        channel_count: usize,
        max_frames: usize,
    ) -> Result<(), Error> {
        if !(1..=2).contains(&channel_count) {
            return Err(Error::UnsupportedChannelLayout(channel_count));
        }
        if !(8000..=192_000).contains(&sample_rate) {
            return Err(Error::UnsupportedSampleRate(sample_rate));
        }
        if max_frames == 0 {
            return Err(Error::ParameterError(
                "Invalid max frame count".to_string(),
            ));
        }
        self.sample_rate = sample_rate;
        self.channel_count = channel_count;
        self.max_frames = max_frames;
        self.latency = latency_samples(sample_rate);

        let max_period = max_period_samples(sample_rate);
        self.history = InputHistory::new(max_frames + 16 * max_period);
        self.detector = EpochDetector::new(sample_rate);
        self.store = EpochStore::new();
        self.voices = (0..MAX_VOICES)
            .map(|_| GrainSynthesizer::new(sample_rate))
            .collect();
        self.wet_left = OverlapAddBuffer::new(max_frames + 6 * max_period);
        self.wet_right = OverlapAddBuffer::new(max_frames + 6 * max_period);
        let delay_len = (self.latency + max_frames + 1).next_power_of_two();
        self.dry_delay = [vec![0.0; delay_len], vec![0.0; delay_len]];
        self.mono_scratch = vec![0.0; max_frames];
        self.wet_left_scratch = vec![0.0; max_frames];
        self.wet_right_scratch = vec![0.0; max_frames];

        self.mix.set_sample_rate(sample_rate);
        self.voicing_dirty = true;
        self.initialized = true;
        self.reset_stream();
        Ok(())
    }

    fn process(&mut self, output: &mut [f32]) {
        if !self.initialized {
            clear_buffer(output);
            return;
        }
        // apply queued controller updates before touching audio
        while let Some((id, update)) = self.updates.pop() {
            if let Err(err) = self.process_parameter_update(id, &update) {
                log::warn!("{}: {}", self.name(), err);
            }
        }
        let frames = (output.len() / self.channel_count).min(self.max_frames);
        debug_assert!(
            frames * self.channel_count == output.len(),
            "unexpected process buffer layout"
        );
        #[cfg(feature = "assert-allocs")]
        assert_no_alloc::assert_no_alloc(|| self.process_block(output, frames));
        #[cfg(not(feature = "assert-allocs"))]
        self.process_block(output, frames);
    }

    fn latency(&self) -> usize {
        if self.initialized {
            self.latency
        } else {
            0
        }
    }

    fn process_parameter_update(
        &mut self,
        id: FourCC,
        value: &ParameterValueUpdate,
    ) -> Result<(), Error> {
        match id {
            CHORD_PARAMETER => {
                self.chord.apply_update(value);
                self.voicing_dirty = true;
            }
            KEY_PARAMETER => {
                self.key.apply_update(value);
                self.voicing_dirty = true;
            }
            SCALE_PARAMETER => {
                self.scale.apply_update(value);
                self.voicing_dirty = true;
            }
            QUANTIZE_PARAMETER => {
                self.quantize.apply_update(value);
                self.voicing_dirty = true;
            }
            VOICES_PARAMETER => {
                self.voices_limit.apply_update(value);
                self.voicing_dirty = true;
            }
            INTERVAL_PARAMETER => {
                self.interval.apply_update(value);
                self.voicing_dirty = true;
            }
            MIX_PARAMETER => self.mix.apply_update(value),
            HUMANIZE_PARAMETER => self.humanize.apply_update(value),
            FORMANT_PARAMETER => self.formant_preserve.apply_update(value),
            SPREAD_PARAMETER => self.spread.apply_update(value),
            _ => {
                return Err(Error::ParameterError(format!(
                    "{}: Unknown parameter id '{}'",
                    self.name(),
                    id
                )))
            }
        }
        Ok(())
    }

    fn process_message(&mut self, message: &EngineMessagePayload) -> Result<(), Error> {
        if let Some(message) = message.payload().downcast_ref::<HarmonizerMessage>() {
            match message {
                HarmonizerMessage::Reset => self.reset_stream(),
            }
            Ok(())
        } else {
            Err(Error::ParameterError(format!(
                "{}: Received unexpected message payload.",
                self.name()
            )))
        }
    }
}

// -------------------------------------------------------------------------------------------------
