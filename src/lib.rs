#![doc = include_str!("../README.md")]

// private mods (will be partly re-exported)
mod chord;
mod engine;
mod error;
mod psola;

// public, flat re-exports
pub use error::Error;

pub use engine::{
    harmonizer::{
        HarmonizerController, HarmonizerEngine, HarmonizerMessage, CHORD_PARAMETER,
        FORMANT_PARAMETER, HUMANIZE_PARAMETER, INTERVAL_PARAMETER, KEY_PARAMETER, MIX_PARAMETER,
        QUANTIZE_PARAMETER, SCALE_PARAMETER, SPREAD_PARAMETER, VOICES_PARAMETER,
    },
    Engine, EngineMessage, EngineMessagePayload,
};

pub use chord::{
    map_voices, quantize_to_scale, ChordSelector, Key, Scale, VoiceRatios, MAX_VOICES,
};

pub use psola::{
    Epoch, EpochDetector, EpochStore, GrainSynthesizer, InputHistory, OverlapAddBuffer,
};

pub use parameter::{ClonableParameter, Parameter, ParameterType, ParameterValueUpdate};

// public mods
pub mod diagnostics;
pub mod parameter;
pub mod utils;
