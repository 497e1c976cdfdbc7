use crate::{
    effect::reverb::ReverbPreset,
    utils::{db_to_linear, resampler::ResamplerKind},
    Error,
};

// -------------------------------------------------------------------------------------------------

/// Options for a [`Synthesizer`](crate::Synthesizer).
#[derive(Debug, Clone, Copy)]
pub struct SynthOptions {
    /// By default 64. Max number of simultaneously playing voices. When all voices are busy,
    /// new notes steal existing voices.
    pub polyphony: usize,

    /// By default [`ResamplerKind::Linear`]. Interpolation kernel voices use to resample their
    /// oscillators.
    pub resampler: ResamplerKind,

    /// By default 256. Max number of events which can be scheduled for the next block.
    pub event_queue_capacity: usize,
}

impl Default for SynthOptions {
    fn default() -> Self {
        Self {
            polyphony: 64,
            resampler: ResamplerKind::default(),
            event_queue_capacity: 256,
        }
    }
}

impl SynthOptions {
    const MAX_POLYPHONY: usize = 1024;

    pub fn polyphony(mut self, polyphony: usize) -> Self {
        self.polyphony = polyphony;
        self
    }

    pub fn resampler(mut self, resampler: ResamplerKind) -> Self {
        self.resampler = resampler;
        self
    }

    pub fn event_queue_capacity(mut self, capacity: usize) -> Self {
        self.event_queue_capacity = capacity;
        self
    }

    /// Validate all parameters. Returns Error::ParameterError on errors.
    pub fn validate(&self) -> Result<(), Error> {
        if self.polyphony == 0 || self.polyphony > Self::MAX_POLYPHONY {
            return Err(Error::ParameterError(format!(
                "synth options 'polyphony' must be in range 1..={}, but is '{}'",
                Self::MAX_POLYPHONY,
                self.polyphony
            )));
        }
        if self.event_queue_capacity == 0 {
            return Err(Error::ParameterError(
                "synth options 'event_queue_capacity' must be > 0".to_owned(),
            ));
        }
        Ok(())
    }
}

// -------------------------------------------------------------------------------------------------

/// Options for a [`Mixer`](crate::Mixer).
#[derive(Debug, Clone, Copy)]
pub struct MixerOptions {
    /// By default 44100. Output sample rate in Hz.
    pub sample_rate: u32,

    /// By default 2. Output channel count: 1 (mono) or 2 (stereo).
    pub channel_count: usize,

    /// By default 256. Number of frames the mixer renders at once.
    pub block_size: usize,

    /// By default 147. Rate in Hz at which voice envelopes, LFOs, filters and gains get
    /// updated. Updates happen at block boundaries, so the effective rate is quantized to the
    /// block size.
    pub control_rate: f64,

    /// By default [`ReverbPreset::MediumHall`].
    pub reverb_preset: ReverbPreset,

    /// By default false. When true, use the cheaper, lighter reverb network.
    pub reverb_light: bool,

    /// By default true. When false, the chorus send bus is discarded.
    pub chorus: bool,

    /// By default 1.0. Linear master output volume.
    pub volume: f32,
}

impl Default for MixerOptions {
    fn default() -> Self {
        Self {
            sample_rate: 44100,
            channel_count: 2,
            block_size: 256,
            control_rate: 147.0,
            reverb_preset: ReverbPreset::default(),
            reverb_light: false,
            chorus: true,
            volume: 1.0,
        }
    }
}

impl MixerOptions {
    const MAX_BLOCK_SIZE: usize = 8192;

    pub fn sample_rate(mut self, sample_rate: u32) -> Self {
        self.sample_rate = sample_rate;
        self
    }

    pub fn channel_count(mut self, channel_count: usize) -> Self {
        self.channel_count = channel_count;
        self
    }

    pub fn block_size(mut self, block_size: usize) -> Self {
        self.block_size = block_size;
        self
    }

    pub fn control_rate(mut self, control_rate: f64) -> Self {
        self.control_rate = control_rate;
        self
    }

    pub fn reverb_preset(mut self, preset: ReverbPreset) -> Self {
        self.reverb_preset = preset;
        self
    }

    pub fn reverb_light(mut self, light: bool) -> Self {
        self.reverb_light = light;
        self
    }

    pub fn chorus(mut self, enabled: bool) -> Self {
        self.chorus = enabled;
        self
    }

    pub fn volume(mut self, volume: f32) -> Self {
        self.volume = volume;
        self
    }
    pub fn volume_db(mut self, volume_db: f32) -> Self {
        self.volume = db_to_linear(volume_db);
        self
    }

    /// Number of frames between two control ticks: the control rate's period rounded to whole
    /// blocks.
    pub fn control_interval(&self) -> usize {
        let period = self.sample_rate as f64 / self.control_rate;
        let blocks = (period / self.block_size as f64).round().max(1.0) as usize;
        blocks * self.block_size
    }

    /// Validate all parameters. Returns Error::ParameterError on errors.
    pub fn validate(&self) -> Result<(), Error> {
        if !(8000..=384000).contains(&self.sample_rate) {
            return Err(Error::ParameterError(format!(
                "mixer options 'sample_rate' must be in range 8000..=384000, but is '{}'",
                self.sample_rate
            )));
        }
        if !(1..=2).contains(&self.channel_count) {
            return Err(Error::ParameterError(format!(
                "mixer options 'channel_count' must be 1 or 2, but is '{}'",
                self.channel_count
            )));
        }
        if self.block_size == 0 || self.block_size > Self::MAX_BLOCK_SIZE {
            return Err(Error::ParameterError(format!(
                "mixer options 'block_size' must be in range 1..={}, but is '{}'",
                Self::MAX_BLOCK_SIZE,
                self.block_size
            )));
        }
        if !(self.control_rate > 0.0 && self.control_rate.is_finite()) {
            return Err(Error::ParameterError(format!(
                "mixer options 'control_rate' value is '{}'",
                self.control_rate
            )));
        }
        if self.volume < 0.0 || self.volume.is_nan() {
            return Err(Error::ParameterError(format!(
                "mixer options 'volume' value is '{}'",
                self.volume
            )));
        }
        Ok(())
    }
}

// -------------------------------------------------------------------------------------------------

/// Options for a [`PcmLine`](crate::PcmLine).
#[derive(Debug, Clone, Copy)]
pub struct PcmLineOptions {
    /// By default 44100. Sample rate of the written PCM data. Gets resampled when it differs
    /// from the mixer's rate.
    pub sample_rate: u32,

    /// By default 2. Channel count of the written, interleaved PCM data: 1 or 2.
    pub channel_count: usize,

    /// By default 8192. Capacity of the line's ring buffer in frames. Writers block while
    /// the buffer is full.
    pub buffer_frames: usize,

    /// By default [`ResamplerKind::Linear`].
    pub resampler: ResamplerKind,

    /// By default 1.0. Linear line volume.
    pub volume: f32,

    /// By default 0.0. Panning in range -1..=1.
    pub pan: f32,
}

impl Default for PcmLineOptions {
    fn default() -> Self {
        Self {
            sample_rate: 44100,
            channel_count: 2,
            buffer_frames: 8192,
            resampler: ResamplerKind::default(),
            volume: 1.0,
            pan: 0.0,
        }
    }
}

impl PcmLineOptions {
    pub fn sample_rate(mut self, sample_rate: u32) -> Self {
        self.sample_rate = sample_rate;
        self
    }

    pub fn channel_count(mut self, channel_count: usize) -> Self {
        self.channel_count = channel_count;
        self
    }

    pub fn buffer_frames(mut self, frames: usize) -> Self {
        self.buffer_frames = frames;
        self
    }

    pub fn resampler(mut self, resampler: ResamplerKind) -> Self {
        self.resampler = resampler;
        self
    }

    pub fn volume(mut self, volume: f32) -> Self {
        self.volume = volume;
        self
    }

    pub fn pan(mut self, pan: f32) -> Self {
        self.pan = pan;
        self
    }

    /// Validate all parameters. Returns Error::ParameterError on errors.
    pub fn validate(&self) -> Result<(), Error> {
        if self.sample_rate == 0 {
            return Err(Error::ParameterError(
                "pcm line options 'sample_rate' must be > 0".to_owned(),
            ));
        }
        if !(1..=2).contains(&self.channel_count) {
            return Err(Error::ParameterError(format!(
                "pcm line options 'channel_count' must be 1 or 2, but is '{}'",
                self.channel_count
            )));
        }
        if self.buffer_frames == 0 {
            return Err(Error::ParameterError(
                "pcm line options 'buffer_frames' must be > 0".to_owned(),
            ));
        }
        if !(-1.0..=1.0).contains(&self.pan) {
            return Err(Error::ParameterError(format!(
                "pcm line options 'pan' must be in range -1..=1, but is '{}'",
                self.pan
            )));
        }
        if self.volume < 0.0 || self.volume.is_nan() {
            return Err(Error::ParameterError(format!(
                "pcm line options 'volume' value is '{}'",
                self.volume
            )));
        }
        Ok(())
    }
}

// -------------------------------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        assert!(SynthOptions::default().validate().is_ok());
        assert!(MixerOptions::default().validate().is_ok());
        assert!(PcmLineOptions::default().validate().is_ok());
    }

    #[test]
    fn invalid_options() {
        assert!(SynthOptions::default().polyphony(0).validate().is_err());
        assert!(MixerOptions::default().channel_count(6).validate().is_err());
        assert!(MixerOptions::default().block_size(0).validate().is_err());
        assert!(MixerOptions::default().control_rate(0.0).validate().is_err());
        assert!(MixerOptions::default().volume(f32::NAN).validate().is_err());
        assert!(PcmLineOptions::default().pan(2.0).validate().is_err());
        assert!(PcmLineOptions::default().channel_count(0).validate().is_err());
    }

    #[test]
    fn control_interval_is_block_aligned() {
        // 300 frames per tick round to one block
        assert_eq!(MixerOptions::default().control_interval(), 256);
        let options = MixerOptions::default().block_size(64);
        assert_eq!(options.control_interval(), 320);
        let options = MixerOptions::default().block_size(1024);
        assert_eq!(options.control_interval(), 1024);
    }
}
