use std::any::Any;

use four_cc::FourCC;

use crate::{parameter::ParameterValueUpdate, ClonableParameter, Error};

// -------------------------------------------------------------------------------------------------

pub mod harmonizer;

// -------------------------------------------------------------------------------------------------

/// Carries [`Engine`] specific payloads, which can't or should not be expressed as
/// [`Parameter`](crate::Parameter) changes.
///
/// This trait is implemented by message enums specific to each engine. It provides a way to
/// identify the target engine and access the message payload as a `dyn Any`, which can then be
/// downcast to the concrete message type within the engine's `process_message` implementation.
///
/// Messages are always applied in the engine's DSP real-time thread.
pub trait EngineMessage: Any + Send + Sync {
    /// The static name of the target engine for this message.
    ///
    /// This should match the `name()` of the target `Engine` implementation. It can be used
    /// by hosts to prevent sending messages to the wrong engine type.
    fn engine_name(&self) -> &'static str;

    /// Returns the message payload as a `dyn Any` reference.
    ///
    /// This allows the engine to downcast the payload to its specific message enum type.
    fn payload(&self) -> &dyn Any;
}

// -------------------------------------------------------------------------------------------------

/// Type used in [`Engine::process_message`] to receive messages.
///
/// It allows for dynamic dispatch to different message types.
pub type EngineMessagePayload = dyn EngineMessage;

// -------------------------------------------------------------------------------------------------

/// Engines process audio buffers in `f32` format and can be `Send` and `Sync`ed across
/// threads. Buffers are processed in-place in the audio real-time thread.
///
/// After an engine got handed to an audio thread, its parameters can only be changed by
/// sending parameter value updates or custom messages, which then get applied in the
/// real-time thread via [`Engine::process_parameter_update`] and [`Engine::process_message`].
/// This ensures that the actual processing state can not be mutated outside of the audio
/// thread.
///
/// Non real-time thread clients, such as UIs, can query info about an engine's parameter set
/// via [`Engine::parameters`] after creating the engine.
///
/// NB: all `process_XXX` functions are called in realtime audio threads, so they must not
/// block! All other functions are called in the main thread to initialize the engine.
pub trait Engine: Send + Sync + 'static {
    /// A unique, static name for the engine.
    ///
    /// This name is used to associate `EngineMessage`s with their target engine type,
    /// preventing mis-typed messages from being processed. It can also be used for logging
    /// or in UIs.
    fn name(&self) -> &'static str;

    /// Returns a list of parameter descriptors for this engine.
    ///
    /// This can be used by UIs or automation systems to query available parameters. This
    /// method may only be called on non-real-time threads, usually right after creating a
    /// new engine instance.
    fn parameters(&self) -> Vec<&dyn ClonableParameter>;

    /// Initializes the engine with the audio output's properties.
    ///
    /// This method must be called once before the engine is used. It runs on a non-real-time
    /// thread, so it's safe to perform allocations (e.g. for delay or history buffers) or
    /// other setup tasks here.
    fn initialize(
        &mut self,
        sample_rate: u32,
        channel_count: usize,
        max_frames: usize,
    ) -> Result<(), Error>;

    /// Processes an interleaved audio buffer in-place.
    ///
    /// This method is called repeatedly on the real-time audio thread. To avoid audio
    /// glitches, it must not block, allocate memory, or perform other time-consuming
    /// operations.
    fn process(&mut self, output: &mut [f32]);

    /// Returns the engine's processing delay in sample frames.
    ///
    /// Hosts can use this for delay compensation. The value is valid after
    /// [`Engine::initialize`] and stays constant until the engine is re-initialized.
    fn latency(&self) -> usize {
        0
    }

    /// Handles a parameter update in the real-time thread.
    ///
    /// The implementation should match on the `id` and update its internal state accordingly
    /// by using the `value` which can be a raw or normalized value.
    ///
    /// Like `process`, this method must not block, allocate memory, or do other
    /// time-consuming tasks.
    fn process_parameter_update(
        &mut self,
        id: FourCC,
        value: &ParameterValueUpdate,
    ) -> Result<(), Error>;

    /// Handles optional engine specific messages in the real-time thread. This can be used
    /// to pass payloads to the engine, which can or should not be expressed as a trivial
    /// parameter change.
    ///
    /// The implementation should downcast the `message` payload to its specific message enum
    /// type and update its internal state accordingly.
    ///
    /// Like `process`, this method must not block, allocate memory, or do other
    /// time-consuming tasks.
    fn process_message(&mut self, _message: &EngineMessagePayload) -> Result<(), Error> {
        Err(Error::ParameterError(format!(
            "{}: Received unexpected message payload.",
            self.name()
        )))
    }
}
