//! Global bus effects, fed by the mixer's effect send buses.

pub mod chorus;
pub mod reverb;

// -------------------------------------------------------------------------------------------------

/// A send effect of the mixing bus: processes a mono send bus and adds its wet stereo output to
/// the bus' dry output.
///
/// Effects get processed in the audio thread once per block, so `process` must not block or
/// allocate. Buffers passed to `process` always have the same length, which never exceeds the
/// block size the effect was created with.
pub trait BusEffect: Send + 'static {
    /// A static name for the effect, used in logs.
    fn name(&self) -> &'static str;

    /// Process the mono send `input` and add the wet output to `left` and `right`.
    fn process(&mut self, input: &[f32], left: &mut [f32], right: &mut [f32]);

    /// True when the last processed block was skipped because the input was silent and the
    /// effect had no tail left. The next non-silent input gets processed immediately.
    fn is_silent(&self) -> bool;

    /// Clear all delay lines and internal state.
    fn reset(&mut self);
}
