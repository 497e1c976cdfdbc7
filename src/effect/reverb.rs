use std::f32::consts::PI;

use strum::{Display, EnumIter, EnumString};

use crate::{
    effect::BusEffect,
    utils::{
        buffer::{add_buffers, clear_buffer, is_silent},
        dsp::delay::{AllpassFilter, CombFilter, DelayLine},
    },
};

// -------------------------------------------------------------------------------------------------

/// Comb filter lengths in frames at 44100 Hz.
const COMB_LENGTHS: [usize; 8] = [1116, 1188, 1277, 1356, 1422, 1491, 1557, 1617];
/// Allpass filter lengths in frames at 44100 Hz.
const ALLPASS_LENGTHS: [usize; 4] = [556, 441, 341, 225];
/// Right channel delay line offset in frames at 44100 Hz.
const STEREO_SPREAD: usize = 23;
const ALLPASS_FEEDBACK: f32 = 0.5;

/// Scales a preset's gain into the comb network input gain.
const INPUT_GAIN_SCALE: f32 = 0.005;
/// Makeup gain for the light network, which sums fewer combs per channel.
const LIGHT_OUTPUT_GAIN: f32 = 1.6;
/// Peak output level below which a reverb with silent input counts as silent.
const TAIL_THRESHOLD: f32 = 1.0e-8;

const MAX_PRE_DELAY: f32 = 0.1;

// -------------------------------------------------------------------------------------------------

/// Room presets of the [`ReverbEffect`].
#[derive(Default, Clone, Copy, PartialEq, Eq, Debug, Display, EnumIter, EnumString)]
pub enum ReverbPreset {
    SmallRoom,
    MediumRoom,
    LargeRoom,
    #[default]
    MediumHall,
    LargeHall,
    Plate,
}

/// Parameters a [`ReverbPreset`] maps to.
#[derive(Clone, Copy, PartialEq, Debug)]
pub struct ReverbParameters {
    /// Room size, mapped to the comb filters' feedback.
    pub room_size: f32,
    /// Cutoff of the damping lowpass in the comb feedback paths in Hz.
    pub damping: f32,
    /// Pre delay in seconds.
    pub pre_delay: f32,
    /// Input gain.
    pub gain: f32,
}

impl ReverbPreset {
    pub fn parameters(&self) -> ReverbParameters {
        let (room_size, damping, pre_delay, gain) = match self {
            Self::SmallRoom => (1.1, 5000.0, 0.0, 4.0),
            Self::MediumRoom => (1.3, 5000.0, 0.0, 3.0),
            Self::LargeRoom => (1.5, 5000.0, 0.0, 2.0),
            Self::MediumHall => (1.8, 24000.0, 0.02, 1.5),
            Self::LargeHall => (1.8, 24000.0, 0.03, 1.5),
            Self::Plate => (1.3, 2500.0, 0.0, 6.0),
        };
        ReverbParameters {
            room_size,
            damping,
            pre_delay,
            gain,
        }
    }
}

// -------------------------------------------------------------------------------------------------

/// Stereo comb/allpass reverb (Schroeder-Moorer network) on the mixer's reverb send bus.
///
/// Each channel runs 8 parallel damped comb filters followed by 4 serial allpass filters. The
/// right channel's delay lines are slightly longer, which decorrelates the channels. In light
/// mode, 3 combs feed each channel, the remaining 2 combs feed a shared mid signal, and only the
/// mid signal passes the allpass chain.
pub struct ReverbEffect {
    sample_rate: u32,
    preset: ReverbPreset,
    light: bool,
    input_gain: f32,
    pre_delay: DelayLine,
    pre_delay_frames: f32,
    combs_left: Vec<CombFilter>,
    combs_right: Vec<CombFilter>,
    allpasses_left: Vec<AllpassFilter>,
    allpasses_right: Vec<AllpassFilter>,
    input: Vec<f32>,
    wet_left: Vec<f32>,
    wet_right: Vec<f32>,
    mid: Vec<f32>,
    /// Frames the longest path through the network takes.
    latency: usize,
    silent_input_frames: usize,
    silent: bool,
}

impl ReverbEffect {
    pub const EFFECT_NAME: &str = "ReverbEffect";

    /// Create a new reverb for the given sample rate, processing at most `max_frames` per call.
    pub fn new(sample_rate: u32, max_frames: usize, preset: ReverbPreset, light: bool) -> Self {
        let scale = |length: usize| {
            ((length as f64 * sample_rate as f64 / 44100.0).round() as usize).max(1)
        };
        let spread = scale(STEREO_SPREAD);
        let combs_left = COMB_LENGTHS
            .iter()
            .map(|length| CombFilter::new(scale(*length)))
            .collect();
        let combs_right = COMB_LENGTHS
            .iter()
            .map(|length| CombFilter::new(scale(*length) + spread))
            .collect();
        let allpasses_left = ALLPASS_LENGTHS
            .iter()
            .map(|length| AllpassFilter::new(scale(*length), ALLPASS_FEEDBACK))
            .collect();
        let allpasses_right = ALLPASS_LENGTHS
            .iter()
            .map(|length| AllpassFilter::new(scale(*length) + spread, ALLPASS_FEEDBACK))
            .collect();
        let max_pre_delay = (MAX_PRE_DELAY * sample_rate as f32).ceil() as usize;
        let latency = max_pre_delay
            + scale(COMB_LENGTHS[COMB_LENGTHS.len() - 1])
            + ALLPASS_LENGTHS.iter().map(|length| scale(*length)).sum::<usize>()
            + spread * (ALLPASS_LENGTHS.len() + 1);
        let mut reverb = Self {
            sample_rate,
            preset,
            light,
            input_gain: 0.0,
            pre_delay: DelayLine::new(max_pre_delay),
            pre_delay_frames: 0.0,
            combs_left,
            combs_right,
            allpasses_left,
            allpasses_right,
            input: vec![0.0; max_frames],
            wet_left: vec![0.0; max_frames],
            wet_right: vec![0.0; max_frames],
            mid: vec![0.0; max_frames],
            latency,
            silent_input_frames: 0,
            silent: true,
        };
        reverb.set_preset(preset);
        reverb
    }

    pub fn preset(&self) -> ReverbPreset {
        self.preset
    }

    pub fn is_light(&self) -> bool {
        self.light
    }

    /// Apply a new room preset. Delay line contents are kept.
    pub fn set_preset(&mut self, preset: ReverbPreset) {
        self.preset = preset;
        let parameters = preset.parameters();
        let feedback = (1.0 - 0.17 / parameters.room_size).clamp(0.0, 0.98);
        let damp = Self::damping_coefficient(parameters.damping, self.sample_rate);
        for comb in self.combs_left.iter_mut().chain(self.combs_right.iter_mut()) {
            comb.set_feedback(feedback);
            comb.set_damp(damp);
        }
        self.input_gain = parameters.gain * INPUT_GAIN_SCALE;
        self.pre_delay_frames = (parameters.pre_delay.clamp(0.0, MAX_PRE_DELAY)
            * self.sample_rate as f32)
            .min(self.pre_delay.max_delay() as f32);
    }

    /// One pole lowpass coefficient for the given cutoff in Hz.
    fn damping_coefficient(cutoff: f32, sample_rate: u32) -> f32 {
        let nyquist = sample_rate as f32 / 2.0;
        let x = 2.0 * PI * cutoff.clamp(1.0, nyquist) / sample_rate as f32;
        let cx = 2.0 - x.cos();
        (cx - (cx * cx - 1.0).sqrt()).clamp(0.0, 1.0)
    }

    fn flush(&mut self) {
        self.pre_delay.flush();
        for comb in self.combs_left.iter_mut().chain(self.combs_right.iter_mut()) {
            comb.flush();
        }
        for allpass in self
            .allpasses_left
            .iter_mut()
            .chain(self.allpasses_right.iter_mut())
        {
            allpass.flush();
        }
    }

    fn process_full(&mut self, frames: usize) {
        let input = &self.input[..frames];
        let wet_left = &mut self.wet_left[..frames];
        let wet_right = &mut self.wet_right[..frames];
        for comb in &mut self.combs_left {
            comb.process_add(input, wet_left);
        }
        for comb in &mut self.combs_right {
            comb.process_add(input, wet_right);
        }
        for allpass in &mut self.allpasses_left {
            allpass.process(wet_left);
        }
        for allpass in &mut self.allpasses_right {
            allpass.process(wet_right);
        }
    }

    fn process_light(&mut self, frames: usize) {
        let input = &self.input[..frames];
        let wet_left = &mut self.wet_left[..frames];
        let wet_right = &mut self.wet_right[..frames];
        let mid = &mut self.mid[..frames];
        clear_buffer(mid);
        for comb in &mut self.combs_left[..3] {
            comb.process_add(input, wet_left);
        }
        for comb in &mut self.combs_right[3..6] {
            comb.process_add(input, wet_right);
        }
        for comb in &mut self.combs_left[6..] {
            comb.process_add(input, mid);
        }
        // mid/side: only the mid signal passes the allpasses
        for ((m, l), r) in mid.iter_mut().zip(wet_left.iter_mut()).zip(wet_right.iter()) {
            let side = (*l - *r) * 0.5;
            *m += (*l + *r) * 0.5;
            *l = side;
        }
        for allpass in &mut self.allpasses_left {
            allpass.process(mid);
        }
        for ((m, l), r) in mid.iter().zip(wet_left.iter_mut()).zip(wet_right.iter_mut()) {
            let side = *l;
            *l = (*m + side) * LIGHT_OUTPUT_GAIN;
            *r = (*m - side) * LIGHT_OUTPUT_GAIN;
        }
    }
}

impl BusEffect for ReverbEffect {
    fn name(&self) -> &'static str {
        Self::EFFECT_NAME
    }

    fn process(&mut self, input: &[f32], left: &mut [f32], right: &mut [f32]) {
        let frames = input.len().min(self.input.len());
        let input_silent = is_silent(&input[..frames]);
        if input_silent && self.silent {
            return;
        }

        if self.pre_delay_frames >= 1.0 {
            for (i, o) in input[..frames].iter().zip(&mut self.input[..frames]) {
                *o = self
                    .pre_delay
                    .process_sample(*i * self.input_gain, 0.0, self.pre_delay_frames);
            }
        } else {
            for (i, o) in input[..frames].iter().zip(&mut self.input[..frames]) {
                *o = *i * self.input_gain;
            }
        }
        clear_buffer(&mut self.wet_left[..frames]);
        clear_buffer(&mut self.wet_right[..frames]);
        if self.light {
            self.process_light(frames);
        } else {
            self.process_full(frames);
        }

        let peak = self.wet_left[..frames]
            .iter()
            .chain(&self.wet_right[..frames])
            .fold(0.0f32, |peak, v| peak.max(v.abs()));
        if input_silent {
            self.silent_input_frames += frames;
        } else {
            self.silent_input_frames = 0;
        }
        // signals still travelling through the delay lines may not have reached the output
        if self.silent_input_frames >= self.latency && peak < TAIL_THRESHOLD {
            // tail faded out: clear remaining denormals and stop processing
            self.silent = true;
            self.flush();
            return;
        }
        self.silent = false;
        add_buffers(&mut left[..frames], &self.wet_left[..frames]);
        add_buffers(&mut right[..frames], &self.wet_right[..frames]);
    }

    fn is_silent(&self) -> bool {
        self.silent
    }

    fn reset(&mut self) {
        self.flush();
        self.silent_input_frames = 0;
        self.silent = true;
    }
}

// -------------------------------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use strum::IntoEnumIterator;

    use super::*;

    const BLOCK: usize = 2048;

    fn process(reverb: &mut ReverbEffect, input: &[f32]) -> (Vec<f32>, Vec<f32>) {
        let mut left = vec![0.0; input.len()];
        let mut right = vec![0.0; input.len()];
        reverb.process(input, &mut left, &mut right);
        (left, right)
    }

    fn impulse() -> Vec<f32> {
        let mut input = vec![0.0; BLOCK];
        input[0] = 1.0;
        input
    }

    #[test]
    fn silence_recovery() {
        let mut reverb = ReverbEffect::new(44100, BLOCK, ReverbPreset::SmallRoom, false);
        let mut fresh = ReverbEffect::new(44100, BLOCK, ReverbPreset::SmallRoom, false);
        let silence = vec![0.0; BLOCK];
        for _ in 0..8 {
            let (left, right) = process(&mut reverb, &silence);
            assert!(is_silent(&left) && is_silent(&right));
            assert!(reverb.is_silent());
        }
        let (left, right) = process(&mut reverb, &impulse());
        assert!(!reverb.is_silent());
        assert!(!is_silent(&left) && !is_silent(&right));
        // no difference to a reverb which never skipped processing
        let (fresh_left, fresh_right) = process(&mut fresh, &impulse());
        assert_eq!(left, fresh_left);
        assert_eq!(right, fresh_right);
    }

    #[test]
    fn tail_decays_to_silence() {
        let mut reverb = ReverbEffect::new(44100, BLOCK, ReverbPreset::SmallRoom, true);
        process(&mut reverb, &impulse());
        let silence = vec![0.0; BLOCK];
        let mut blocks = 0;
        while !reverb.is_silent() {
            process(&mut reverb, &silence);
            blocks += 1;
            assert!(blocks < 2000, "reverb tail never ends");
        }
        assert!(blocks > 1);
    }

    #[test]
    fn small_blocks_keep_the_tail() {
        let mut reverb = ReverbEffect::new(44100, 64, ReverbPreset::SmallRoom, false);
        let mut input = vec![0.0; 64];
        input[0] = 1.0;
        process(&mut reverb, &input);
        let silence = vec![0.0; 64];
        // the first echo leaves the combs after more than 1000 frames
        let mut heard = false;
        for _ in 0..40 {
            let (left, _) = process(&mut reverb, &silence);
            heard |= !is_silent(&left);
        }
        assert!(heard);
    }

    #[test]
    fn presets_are_stable() {
        for light in [false, true] {
            for preset in ReverbPreset::iter() {
                let mut reverb = ReverbEffect::new(48000, BLOCK, preset, light);
                let (left, right) = process(&mut reverb, &impulse());
                let mut peak = left
                    .iter()
                    .chain(&right)
                    .fold(0.0f32, |peak, v| peak.max(v.abs()));
                for _ in 0..50 {
                    let (left, right) = process(&mut reverb, &vec![0.0; BLOCK]);
                    for v in left.iter().chain(&right) {
                        assert!(v.is_finite());
                        peak = peak.max(v.abs());
                    }
                }
                assert!(peak > 0.0 && peak < 1.0, "{preset} {light}: {peak}");
            }
        }
    }

    #[test]
    fn damping_coefficients() {
        let bright = ReverbEffect::damping_coefficient(24000.0, 44100);
        let dark = ReverbEffect::damping_coefficient(2500.0, 44100);
        assert!(bright < dark);
        assert!((0.0..=1.0).contains(&bright) && (0.0..=1.0).contains(&dark));
    }
}
