#![doc = include_str!("../README.md")]
#![cfg_attr(all(doc, docsrs), feature(doc_auto_cfg))]

// private mods (will be partly re-exported)
mod effect;
mod error;
mod mixer;
mod options;
mod output;
mod performer;
mod soundbank;
mod synth;
mod voice;

// public, flat re-exports
pub use error::Error;

pub use options::{MixerOptions, PcmLineOptions, SynthOptions};

pub use performer::{
    defaults::default_connections,
    ids,
    sample::{LoopMode, SampleLoop, SampleOscillator},
    ConnectionBlock, ConnectionSet, Destination, Direction, Identifier, Oscillator,
    OscillatorStream, Performer, Polarity, Shape, Source, Transform,
};

pub use voice::{graph::CompiledPerformer, Voice, VoiceStage};

pub use synth::{
    channel::{cc, rpn, Channel, ChannelControls},
    EventScheduler, ScheduledEvent, SynthEvent, Synthesizer, CHANNEL_COUNT,
};

pub use soundbank::{emergency_soundbank, Instrument, Patch, Soundbank};

pub use mixer::{
    buffers::{BusBuffers, MixBuffers},
    pcm::{PcmLine, PcmWriter},
    LineHandle, Mixer, MixerLine,
};

pub use output::{pusher::AudioPusher, stream::MixerStream, AudioSink, SampleFormat, SinkFormat};

#[cfg(feature = "cpal-output")]
pub use output::cpal::{AudioHostId, CpalSink};
#[cfg(feature = "wav-output")]
pub use output::wav::WavSink;

pub use utils::resampler::ResamplerKind;

// public mods
pub mod utils;

pub mod effects {
    //! Global bus effects: the reverb on effect bus 1 and the chorus on effect bus 2.

    pub use super::effect::{
        chorus::ChorusEffect,
        reverb::{ReverbEffect, ReverbParameters, ReverbPreset},
        BusEffect,
    };
}
