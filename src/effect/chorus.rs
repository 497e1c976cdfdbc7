use std::f64::consts::PI;

use crate::{
    effect::BusEffect,
    utils::{
        buffer::{is_silent, SILENCE_THRESHOLD},
        dsp::delay::DelayLine,
    },
};

// -------------------------------------------------------------------------------------------------

// Simple sine wave oscillator, modulating the chorus delay times
#[derive(Debug, Default, Clone)]
struct SineWave {
    phase: f64,
    phase_inc: f64,
}

impl SineWave {
    fn set_rate(&mut self, rate: f64, sample_rate: u32) {
        self.phase_inc = 2.0 * PI * rate / sample_rate as f64;
    }

    fn set_phase(&mut self, phase: f64) {
        self.phase = phase;
    }

    // Advances phase and returns new value
    fn move_and_get(&mut self) -> f64 {
        let value = self.phase.sin();
        self.phase += self.phase_inc;
        if self.phase >= 2.0 * PI {
            self.phase -= 2.0 * PI;
        }
        value
    }
}

// -------------------------------------------------------------------------------------------------

/// Stereo chorus on the mixer's chorus send bus.
///
/// The mono send feeds two delay lines whose delay times get modulated by phase shifted sine
/// LFOs. Only the wet signal is produced. Part of it can be sent into the reverb.
pub struct ChorusEffect {
    sample_rate: u32,
    rate: f64,
    phase_offset: f64,
    delay: f64,
    depth: f64,
    feedback: f32,
    reverb_send: f32,
    left_osc: SineWave,
    right_osc: SineWave,
    delay_left: DelayLine,
    delay_right: DelayLine,
    latency: usize,
    silent_input_frames: usize,
    silent: bool,
}

impl ChorusEffect {
    pub const EFFECT_NAME: &str = "ChorusEffect";

    const DEFAULT_RATE: f64 = 0.8;
    const DEFAULT_DELAY_MS: f64 = 12.0;
    const DEFAULT_DEPTH_MS: f64 = 3.0;
    const DEFAULT_FEEDBACK: f32 = 0.2;
    const DEFAULT_REVERB_SEND: f32 = 0.3;
    const MAX_DELAY_MS: f64 = 50.0;

    pub fn new(sample_rate: u32) -> Self {
        let max_delay_frames = (Self::MAX_DELAY_MS * sample_rate as f64 / 1000.0).ceil() as usize;
        let mut chorus = Self {
            sample_rate,
            rate: Self::DEFAULT_RATE,
            phase_offset: PI / 2.0,
            delay: 0.0,
            depth: 0.0,
            feedback: Self::DEFAULT_FEEDBACK,
            reverb_send: Self::DEFAULT_REVERB_SEND,
            left_osc: SineWave::default(),
            right_osc: SineWave::default(),
            delay_left: DelayLine::new(max_delay_frames),
            delay_right: DelayLine::new(max_delay_frames),
            latency: max_delay_frames,
            silent_input_frames: 0,
            silent: true,
        };
        chorus.set_delay(Self::DEFAULT_DELAY_MS, Self::DEFAULT_DEPTH_MS);
        chorus.reset_lfos();
        chorus
    }

    /// Set the base delay and the modulation depth in milliseconds.
    pub fn set_delay(&mut self, delay_ms: f64, depth_ms: f64) {
        let max = Self::MAX_DELAY_MS;
        let depth = depth_ms.clamp(0.0, max / 2.0);
        let delay = delay_ms.clamp(depth, max - depth);
        let frames_per_ms = self.sample_rate as f64 / 1000.0;
        self.delay = delay * frames_per_ms;
        self.depth = depth * frames_per_ms;
    }

    /// Set the LFO rate in Hz.
    pub fn set_rate(&mut self, rate: f64) {
        self.rate = rate.clamp(0.01, 10.0);
        self.left_osc.set_rate(self.rate, self.sample_rate);
        self.right_osc.set_rate(self.rate, self.sample_rate);
    }

    /// Amount of the wet signal which gets sent into the reverb.
    pub fn reverb_send(&self) -> f32 {
        self.reverb_send
    }
    pub fn set_reverb_send(&mut self, send: f32) {
        self.reverb_send = send.clamp(0.0, 1.0);
    }

    fn reset_lfos(&mut self) {
        self.set_rate(self.rate);
        self.left_osc.set_phase(0.0);
        self.right_osc.set_phase(self.phase_offset);
    }

    /// Process the mono send `input`, add the wet signal to `left` and `right` and the reverb
    /// send part of it to `reverb_input`.
    pub fn process_with_send(
        &mut self,
        input: &[f32],
        left: &mut [f32],
        right: &mut [f32],
        reverb_input: &mut [f32],
    ) {
        self.run(input, left, right, Some(reverb_input));
    }

    fn run(
        &mut self,
        input: &[f32],
        left: &mut [f32],
        right: &mut [f32],
        mut reverb_input: Option<&mut [f32]>,
    ) {
        let input_silent = is_silent(input);
        if input_silent && self.silent {
            return;
        }
        if input_silent {
            self.silent_input_frames += input.len();
        } else {
            self.silent_input_frames = 0;
        }

        let mut peak = 0.0f32;
        let frames = input.iter().zip(left.iter_mut()).zip(right.iter_mut());
        for (frame, ((i, l), r)) in frames.enumerate() {
            let left_delay = self.delay + self.depth * self.left_osc.move_and_get();
            let right_delay = self.delay + self.depth * self.right_osc.move_and_get();
            let wet_left = self
                .delay_left
                .process_sample(*i, self.feedback, left_delay as f32);
            let wet_right = self
                .delay_right
                .process_sample(*i, self.feedback, right_delay as f32);
            *l += wet_left;
            *r += wet_right;
            if let Some(send) = reverb_input
                .as_deref_mut()
                .and_then(|buffer| buffer.get_mut(frame))
            {
                *send += (wet_left + wet_right) * 0.5 * self.reverb_send;
            }
            peak = peak.max(wet_left.abs()).max(wet_right.abs());
        }

        if self.silent_input_frames >= self.latency && peak < SILENCE_THRESHOLD {
            self.silent = true;
            self.delay_left.flush();
            self.delay_right.flush();
        } else {
            self.silent = false;
        }
    }
}

impl BusEffect for ChorusEffect {
    fn name(&self) -> &'static str {
        Self::EFFECT_NAME
    }

    fn process(&mut self, input: &[f32], left: &mut [f32], right: &mut [f32]) {
        self.run(input, left, right, None);
    }

    fn is_silent(&self) -> bool {
        self.silent
    }

    fn reset(&mut self) {
        self.delay_left.flush();
        self.delay_right.flush();
        self.reset_lfos();
        self.silent_input_frames = 0;
        self.silent = true;
    }
}

// -------------------------------------------------------------------------------------------------
