//! End to end tests, driving the harmonizer engine the way an audio host would.

use choral::{
    diagnostics, utils, ChordSelector, Engine, HarmonizerEngine, HarmonizerMessage,
    ParameterValueUpdate, CHORD_PARAMETER, FORMANT_PARAMETER, HUMANIZE_PARAMETER,
    INTERVAL_PARAMETER, KEY_PARAMETER, MIX_PARAMETER, QUANTIZE_PARAMETER, SCALE_PARAMETER,
    SPREAD_PARAMETER, VOICES_PARAMETER,
};
use rand::{rngs::SmallRng, Rng, SeedableRng};

// -------------------------------------------------------------------------------------------------

const SAMPLE_RATE: u32 = 44100;
const BLOCK_LEN: usize = 512;

/// Analysis span: skip the first half second of warm-up, analyze the following second.
const SETTLE: usize = SAMPLE_RATE as usize / 2;
const ANALYSIS_LEN: usize = SAMPLE_RATE as usize;

fn sine(frequency: f32, length: usize, amplitude: f32) -> Vec<f32> {
    (0..length)
        .map(|i| {
            (2.0 * std::f32::consts::PI * frequency * i as f32 / SAMPLE_RATE as f32).sin()
                * amplitude
        })
        .collect()
}

fn new_engine() -> HarmonizerEngine {
    let mut engine = HarmonizerEngine::new();
    engine
        .initialize(SAMPLE_RATE, 2, BLOCK_LEN)
        .expect("engine initialization failed");
    engine
}

/// Feed a mono signal through the engine as duplicated stereo and return the left
/// output channel.
fn process_mono(engine: &mut HarmonizerEngine, input: &[f32]) -> Vec<f32> {
    let mut left = Vec::with_capacity(input.len());
    let mut channel = Vec::with_capacity(BLOCK_LEN);
    for block in input.chunks(BLOCK_LEN) {
        let mut buffer = Vec::with_capacity(block.len() * 2);
        for &sample in block {
            buffer.push(sample);
            buffer.push(sample);
        }
        engine.process(&mut buffer);
        utils::buffer::interleaved_to_channel(&buffer, 2, 0, &mut channel);
        left.extend_from_slice(&channel);
    }
    left
}

fn analysis_span(output: &[f32]) -> &[f32] {
    &output[SETTLE..SETTLE + ANALYSIS_LEN]
}

// -------------------------------------------------------------------------------------------------

#[test]
fn bypass_passes_input_through() {
    let mut engine = new_engine();
    // defaults: Custom chord, unison interval, full wet mix

    let input = sine(220.0, 2 * SAMPLE_RATE as usize, utils::db_to_linear(-6.0));
    let output = process_mono(&mut engine, &input);
    let analysis = analysis_span(&output);

    let fundamental =
        diagnostics::measure_fundamental(analysis, SAMPLE_RATE, 60.0, 800.0).unwrap();
    assert!(
        (fundamental - 220.0).abs() / 220.0 < 0.02,
        "bypass fundamental {} Hz",
        fundamental
    );

    let input_rms = diagnostics::rms(analysis_span(&input));
    let output_rms = diagnostics::rms(analysis);
    let gain_db = utils::linear_to_db(output_rms / input_rms);
    assert!(gain_db.abs() < 3.0, "bypass gain {} dB", gain_db);

    assert_eq!(diagnostics::count_clicks(analysis), 0);
    assert_eq!(diagnostics::non_finite_count(&output), 0);

    // the output is the input, delayed by the reported latency give or take a
    // sub-period synthesis offset
    let latency = engine.latency();
    let period = (SAMPLE_RATE as f32 / 220.0) as usize;
    let (lag, correlation) = diagnostics::correlation_peak(
        &input[SETTLE..SETTLE + ANALYSIS_LEN],
        &output[SETTLE..],
        latency + 2 * period,
    );
    assert!(correlation > 0.9, "bypass correlation {}", correlation);
    assert!(
        lag >= latency.saturating_sub(period) && lag <= latency + period,
        "bypass lag {} vs latency {}",
        lag,
        latency
    );
}

#[test]
fn interval_shifts_the_fundamental() {
    let mut engine = new_engine();
    let controller = engine.controller();
    controller.set_interval(7.0).unwrap();
    controller.set_formant_preserve(false).unwrap();

    let input = sine(220.0, 2 * SAMPLE_RATE as usize, 0.5);
    let output = process_mono(&mut engine, &input);
    let analysis = analysis_span(&output);

    let expected = 220.0 * 2.0_f32.powf(7.0 / 12.0);
    let fundamental =
        diagnostics::measure_fundamental(analysis, SAMPLE_RATE, 60.0, 800.0).unwrap();
    assert!(
        (fundamental - expected).abs() / expected < 0.02,
        "shifted fundamental {} Hz vs expected {} Hz",
        fundamental,
        expected
    );
    assert_eq!(diagnostics::non_finite_count(&output), 0);
}

#[test]
fn octave_down_tracks_cleanly() {
    let mut engine = new_engine();
    let controller = engine.controller();
    controller.set_interval(-12.0).unwrap();
    controller.set_formant_preserve(false).unwrap();

    let input = sine(220.0, 2 * SAMPLE_RATE as usize, 0.5);
    let output = process_mono(&mut engine, &input);
    let analysis = analysis_span(&output);

    let fundamental =
        diagnostics::measure_fundamental(analysis, SAMPLE_RATE, 60.0, 800.0).unwrap();
    let cents = 100.0 * utils::ratio_to_semitones(fundamental / 110.0);
    assert!(cents.abs() < 50.0, "octave down off by {} cents", cents);

    assert_eq!(diagnostics::count_dropouts(analysis), 0);
    let input_rms = diagnostics::rms(analysis_span(&input));
    let output_rms = diagnostics::rms(analysis);
    let gain_db = utils::linear_to_db(output_rms / input_rms);
    assert!(gain_db.abs() < 3.0, "octave down gain {} dB", gain_db);
}

#[test]
fn chord_stacks_harmony_voices() {
    let mut engine = new_engine();
    let controller = engine.controller();
    controller.set_chord(ChordSelector::Major).unwrap();
    controller.set_voice_count(3).unwrap();
    controller.set_formant_preserve(false).unwrap();

    let input = sine(440.0, 2 * SAMPLE_RATE as usize, 0.5);
    let output = process_mono(&mut engine, &input);
    let analysis = analysis_span(&output);

    let chord_freqs = [
        440.0,
        440.0 * 2.0_f32.powf(4.0 / 12.0), // major third
        440.0 * 2.0_f32.powf(7.0 / 12.0), // fifth
    ];
    let control_freqs = [470.0, 590.0, 700.0];

    let min_chord_power = chord_freqs
        .iter()
        .map(|&f| diagnostics::goertzel_power(analysis, SAMPLE_RATE, f))
        .fold(f32::MAX, f32::min);
    let max_control_power = control_freqs
        .iter()
        .map(|&f| diagnostics::goertzel_power(analysis, SAMPLE_RATE, f))
        .fold(0.0_f32, f32::max);
    assert!(
        min_chord_power > 10.0 * max_control_power,
        "chord tones ({}) should stand out over controls ({})",
        min_chord_power,
        max_control_power
    );
    assert_eq!(diagnostics::non_finite_count(&output), 0);
}

#[test]
fn reset_reproduces_identical_output() {
    let mut engine = new_engine();
    engine
        .process_parameter_update(CHORD_PARAMETER, &ParameterValueUpdate::Normalized(0.4))
        .unwrap();
    engine
        .process_parameter_update(
            HUMANIZE_PARAMETER,
            &ParameterValueUpdate::Raw(Box::new(0.3_f32)),
        )
        .unwrap();

    let input = sine(220.0, SAMPLE_RATE as usize, 0.5);
    let first = process_mono(&mut engine, &input);
    engine
        .process_message(&HarmonizerMessage::Reset)
        .unwrap();
    let second = process_mono(&mut engine, &input);

    // parameters survive the reset and the humanize random walk is reseeded,
    // so both runs must match bit for bit
    assert_eq!(first, second);
}

#[test]
fn survives_random_parameter_fuzzing() {
    let mut engine = new_engine();
    let mut rng = SmallRng::seed_from_u64(0xC0FFEE);

    let parameter_ids = [
        CHORD_PARAMETER,
        KEY_PARAMETER,
        SCALE_PARAMETER,
        QUANTIZE_PARAMETER,
        VOICES_PARAMETER,
        INTERVAL_PARAMETER,
        MIX_PARAMETER,
        HUMANIZE_PARAMETER,
        FORMANT_PARAMETER,
        SPREAD_PARAMETER,
    ];

    let mut output = Vec::new();
    let mut phase = 0.0_f32;
    for _ in 0..1000 {
        for _ in 0..rng.random_range(0..4) {
            let id = parameter_ids[rng.random_range(0..parameter_ids.len())];
            let update = ParameterValueUpdate::Normalized(rng.random_range(0.0..=1.0));
            engine.process_parameter_update(id, &update).unwrap();
        }
        let mut buffer = Vec::with_capacity(BLOCK_LEN * 2);
        for _ in 0..BLOCK_LEN {
            let sample = phase.sin() * 0.5;
            phase += 2.0 * std::f32::consts::PI * 220.0 / SAMPLE_RATE as f32;
            buffer.push(sample);
            buffer.push(sample);
        }
        engine.process(&mut buffer);
        output.extend(buffer.iter().step_by(2));
    }

    assert_eq!(diagnostics::non_finite_count(&output), 0);
    assert!(output.iter().all(|s| s.abs() <= 5.0));
    // parameter changes latch per grain and the mix is smoothed, so even wild
    // automation stays essentially click-free
    assert!(
        diagnostics::count_clicks(&output) < 100,
        "clicks: {}",
        diagnostics::count_clicks(&output)
    );
}

#[test]
fn silence_in_silence_out() {
    let mut engine = new_engine();
    let input = vec![0.0; SAMPLE_RATE as usize];
    let output = process_mono(&mut engine, &input);
    assert!(output.iter().all(|&s| s == 0.0));
}
