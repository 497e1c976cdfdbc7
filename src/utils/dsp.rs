//! Common, shared DSP tools for voices and bus effects.

pub mod biquad;
pub mod delay;
pub mod envelope;
pub mod fft;
pub mod lfo;
