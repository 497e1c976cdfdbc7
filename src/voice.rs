//! A single sounding note: oscillator stream, filters, envelopes, LFOs and the live connection
//! graph state of the performer it plays.

use std::{f64::consts::FRAC_PI_2, sync::Arc};

use crate::{
    mixer::buffers::MixBuffers,
    performer::{defaults::FILTER_OPEN_CUTOFF, Oscillator},
    synth::channel::{Channel, ChannelControls},
    utils::{
        centibels_to_linear, cents_to_hz, cents_to_ratio,
        dsp::{
            biquad::{BiquadFilter, FilterType},
            envelope::{EnvelopeGenerator, EnvelopeParameters},
            lfo::Lfo,
        },
        resampler::{ResampledStream, ResamplerKind},
    },
};

// -------------------------------------------------------------------------------------------------

pub mod graph;

use graph::{
    CellId, CompiledPerformer, EgCell, GraphState, LfoCell, Trigger, EG_COUNT, LFO_COUNT,
};

// -------------------------------------------------------------------------------------------------

/// Voice gains in centibels below this are silent.
const MIN_GAIN: f64 = -1440.0;
/// Max voice gain in centibels.
const MAX_GAIN: f64 = 240.0;

// -------------------------------------------------------------------------------------------------

/// Lifecycle stage of a [`Voice`].
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub enum VoiceStage {
    /// Never used or freed.
    #[default]
    Idle,
    /// Initialized by a note on, not yet rendered.
    Started,
    /// Rendering, gate open.
    Active,
    /// Note off received while the sustain or sostenuto pedal holds the note.
    Held,
    /// Note off applied, envelopes release.
    Releasing,
    /// Forced fast release (stealing, exclusive class, all sound off).
    Shutdown,
    /// Finished, waiting to be reused.
    Stopped,
}

/// Everything needed to start a note on a voice. Voices which get stolen keep this until their
/// next control tick.
#[derive(Clone)]
pub struct NoteOn {
    pub performer: Arc<CompiledPerformer>,
    pub oscillator: Arc<dyn Oscillator>,
    pub channel: u8,
    pub key: u8,
    pub velocity: u8,
    /// Increasing note id, used to find the oldest voices.
    pub note_id: u64,
    /// Onset offset in frames within the next rendered block.
    pub delay: usize,
    /// Key to glide from with portamento.
    pub glide_from: Option<u8>,
}

/// Per bus output gains of a voice.
#[derive(Debug, Default, Clone, Copy, PartialEq)]
struct OutputGains {
    left: f64,
    right: f64,
    reverb: f64,
    chorus: f64,
}

impl OutputGains {
    fn lerp(&self, other: &Self, t: f64) -> Self {
        Self {
            left: self.left + (other.left - self.left) * t,
            right: self.right + (other.right - self.right) * t,
            reverb: self.reverb + (other.reverb - self.reverb) * t,
            chorus: self.chorus + (other.chorus - self.chorus) * t,
        }
    }
}

/// Gain ramp from the gains of the last control tick to the current ones.
#[derive(Debug, Default, Clone, Copy)]
struct GainRamp {
    from: OutputGains,
    to: OutputGains,
    position: usize,
    length: usize,
}

impl GainRamp {
    fn jump(&mut self, gains: OutputGains) {
        self.from = gains;
        self.to = gains;
        self.position = 0;
        self.length = 0;
    }

    fn start(&mut self, gains: OutputGains, length: usize) {
        self.from = self.current();
        self.to = gains;
        self.position = 0;
        self.length = length;
    }

    fn current(&self) -> OutputGains {
        self.at(0)
    }

    /// Gains `offset` frames after the current ramp position.
    fn at(&self, offset: usize) -> OutputGains {
        if self.position + offset >= self.length {
            self.to
        } else {
            let t = (self.position + offset) as f64 / self.length as f64;
            self.from.lerp(&self.to, t)
        }
    }

    fn advance(&mut self, frames: usize) {
        self.position = (self.position + frames).min(self.length);
    }
}

// -------------------------------------------------------------------------------------------------

/// One sounding note.
///
/// Voices run at two rates: [`Self::control_tick`] advances envelopes and LFOs and recalculates
/// pitch, filter and gains, [`Self::render`] pulls audio blocks from the oscillator and mixes
/// them into the bus, ramping gains between the values of the last two control ticks.
pub struct Voice {
    sample_rate: u32,
    resampler: ResamplerKind,
    stage: VoiceStage,
    performer: Option<Arc<CompiledPerformer>>,
    stream: Option<ResampledStream>,
    state: GraphState,
    envelopes: [EnvelopeGenerator; EG_COUNT],
    lfos: [Lfo; LFO_COUNT],
    filters: [BiquadFilter; 2],
    filter_open: bool,
    channel: u8,
    key: u8,
    velocity: u8,
    note_id: u64,
    release_id: u64,
    sostenuto_latched: bool,
    pending: Option<NoteOn>,
    pending_release: Option<u64>,
    stolen: bool,
    delay: usize,
    glide: Option<(f64, f64)>,
    attenuation: f64,
    root_pitch: f64,
    rate_ratio: f64,
    pitch: f64,
    mono: bool,
    gains: GainRamp,
    buffer: Vec<Vec<f32>>,
}

impl Voice {
    pub fn new(sample_rate: u32, block_size: usize, resampler: ResamplerKind) -> Self {
        Self {
            sample_rate,
            resampler,
            stage: VoiceStage::Idle,
            performer: None,
            stream: None,
            state: GraphState::with_capacity(128),
            envelopes: Default::default(),
            lfos: [Lfo::new(), Lfo::new()],
            filters: [BiquadFilter::new(sample_rate), BiquadFilter::new(sample_rate)],
            filter_open: true,
            channel: 0,
            key: 0,
            velocity: 0,
            note_id: 0,
            release_id: 0,
            sostenuto_latched: false,
            pending: None,
            pending_release: None,
            stolen: false,
            delay: 0,
            glide: None,
            attenuation: 0.0,
            root_pitch: 6000.0,
            rate_ratio: 1.0,
            pitch: 1.0,
            mono: true,
            gains: GainRamp::default(),
            buffer: vec![vec![0.0; block_size]; 2],
        }
    }

    pub fn stage(&self) -> VoiceStage {
        self.stage
    }
    pub fn channel(&self) -> u8 {
        self.channel
    }
    /// Channel of the deferred note on, if any, else of the current note.
    pub fn target_channel(&self) -> u8 {
        self.pending
            .as_ref()
            .map_or(self.channel, |note| note.channel)
    }
    pub fn key(&self) -> u8 {
        self.key
    }
    pub fn velocity(&self) -> u8 {
        self.velocity
    }
    pub fn note_id(&self) -> u64 {
        self.note_id
    }
    /// Ordering id of the voice's release, 0 when not released.
    pub fn release_id(&self) -> u64 {
        self.release_id
    }
    pub fn performer(&self) -> Option<&Arc<CompiledPerformer>> {
        self.performer.as_ref()
    }
    /// Current value of one of the voice's cells.
    pub fn cell(&self, cell: CellId) -> f64 {
        self.state.cell(cell)
    }

    /// True when the voice neither plays nor waits for a deferred note on.
    pub fn is_free(&self) -> bool {
        self.pending.is_none() && matches!(self.stage, VoiceStage::Idle | VoiceStage::Stopped)
    }
    /// True when the voice plays a note (in any stage) and has no deferred note on.
    pub fn is_playing(&self) -> bool {
        self.pending.is_none() && !self.stolen && !self.is_free()
    }
    /// True when the voice got stolen and waits for its deferred note on.
    pub fn is_stolen(&self) -> bool {
        self.pending.is_some()
    }
    /// True while the key is down or held by a pedal.
    pub fn is_sounding(&self) -> bool {
        self.is_playing()
            && matches!(
                self.stage,
                VoiceStage::Started | VoiceStage::Active | VoiceStage::Held
            )
    }

    // ---------------------------------------------------------------------------------------------

    /// Start a note immediately: open the oscillator stream, reset modulators and filters and
    /// evaluate all connections once.
    pub fn note_on(&mut self, note: NoteOn, channel: &Channel) {
        self.pending = None;
        self.pending_release = None;
        self.stolen = false;
        let stream = match note.oscillator.open(self.sample_rate) {
            Ok(stream) => stream,
            Err(err) => {
                log::warn!("Failed to open oscillator for key {}: {err}", note.key);
                self.stop();
                return;
            }
        };
        let channel_count = stream.channel_count().max(1);
        if self.buffer.len() < channel_count {
            let frames = self.buffer[0].len();
            self.buffer.resize(channel_count, vec![0.0; frames]);
        }
        self.stream = Some(ResampledStream::new(stream, self.resampler));
        self.mono = channel_count == 1;
        self.attenuation = note.oscillator.attenuation();
        self.root_pitch = note.oscillator.root_pitch();
        self.rate_ratio = note.oscillator.sample_rate() as f64 / self.sample_rate as f64;

        self.channel = note.channel;
        self.key = note.key;
        self.velocity = note.velocity;
        self.note_id = note.note_id;
        self.release_id = 0;
        self.delay = note.delay;
        self.sostenuto_latched = false;
        for envelope in &mut self.envelopes {
            envelope.reset();
        }
        for lfo in &mut self.lfos {
            lfo.reset();
        }
        for filter in &mut self.filters {
            filter.reset();
        }
        self.filter_open = true;

        let graph = &note.performer.graph();
        let start_key = note.glide_from.unwrap_or(note.key) as f64;
        self.glide = note
            .glide_from
            .map(|from| (from as f64, note.key as f64));
        self.state.set_input(
            CellId::KEYNUMBER,
            if graph.forces_keynumber() {
                0.0
            } else {
                start_key / 128.0
            },
        );
        self.state.set_input(
            CellId::VELOCITY,
            if graph.forces_velocity() {
                0.0
            } else {
                note.velocity as f64 / 128.0
            },
        );
        self.state.set_input(CellId::ON, 1.0);
        for instance in 0..EG_COUNT {
            self.state.set_input(CellId::eg(instance, EgCell::Output), 0.0);
        }
        for instance in 0..LFO_COUNT {
            self.state.set_input(CellId::lfo(instance, LfoCell::Output), 0.5);
        }
        graph.evaluate_all(&mut self.state, channel.controls(), self.key);
        self.performer = Some(note.performer);

        // establish envelope levels before the first block
        self.tick_modulators(0.0);
        self.update(Trigger::Control, channel.controls());
        self.update_outputs();
        self.gains.jump(self.target_gains());
        self.stage = VoiceStage::Started;
    }

    /// Steal the voice for a new note: fade out the current note within the next block and
    /// apply the note on at the next control tick.
    pub fn steal(&mut self, note: NoteOn) {
        if self.is_free() {
            // nothing to fade out
            self.stop();
        } else {
            self.stolen = true;
        }
        self.pending = Some(note);
    }

    /// True when the voice plays, or is about to play, the given key.
    pub fn plays(&self, channel: u8, key: u8) -> bool {
        match &self.pending {
            Some(note) => note.channel == channel && note.key == key,
            None => self.is_sounding() && self.channel == channel && self.key == key,
        }
    }

    /// Release the note, or hold it when a pedal is down. Releases of deferred notes apply
    /// right after their note on.
    pub fn note_off(&mut self, channel: &Channel, release_id: u64) {
        if self.pending.is_some() {
            self.pending_release = Some(release_id);
            return;
        }
        if !self.is_sounding() {
            return;
        }
        if channel.sustain() || (channel.sostenuto() && self.sostenuto_latched) {
            self.stage = VoiceStage::Held;
            return;
        }
        self.release(channel.controls(), release_id);
    }

    /// Release a note held by the sustain pedal.
    pub fn sustain_released(&mut self, channel: &Channel, release_id: u64) {
        if self.is_playing()
            && self.stage == VoiceStage::Held
            && !(channel.sostenuto() && self.sostenuto_latched)
        {
            self.release(channel.controls(), release_id);
        }
    }

    /// Latch the note when the sostenuto pedal gets pressed while it's sounding.
    pub fn sostenuto_pressed(&mut self) {
        if self.is_playing() && matches!(self.stage, VoiceStage::Started | VoiceStage::Active) {
            self.sostenuto_latched = true;
        }
    }

    /// Unlatch the note and release it when it no longer is held.
    pub fn sostenuto_released(&mut self, channel: &Channel, release_id: u64) {
        let latched = std::mem::take(&mut self.sostenuto_latched);
        if latched && self.is_playing() && self.stage == VoiceStage::Held && !channel.sustain() {
            self.release(channel.controls(), release_id);
        }
    }

    fn release(&mut self, controls: &ChannelControls, release_id: u64) {
        self.stage = VoiceStage::Releasing;
        self.release_id = release_id;
        self.state.set_input(CellId::ON, 0.0);
        self.update(Trigger::Gate, controls);
        if let Some(stream) = &mut self.stream {
            stream.note_off();
        }
    }

    /// Forced fast release.
    pub fn shutdown(&mut self, controls: &ChannelControls) {
        if !self.is_playing() || self.stage == VoiceStage::Shutdown {
            return;
        }
        self.stage = VoiceStage::Shutdown;
        self.state.set_input(CellId::ON, -1.0);
        self.update(Trigger::Gate, controls);
    }

    /// Stop immediately without any release.
    pub fn stop(&mut self) {
        self.stage = VoiceStage::Stopped;
        self.stream = None;
        self.performer = None;
        self.stolen = false;
        self.glide = None;
    }

    // ---------------------------------------------------------------------------------------------

    pub fn controller_change(&mut self, number: u8, controls: &ChannelControls) {
        self.update(Trigger::Controller(number), controls);
    }
    pub fn rpn_change(&mut self, number: u16, controls: &ChannelControls) {
        self.update(Trigger::Rpn(number), controls);
    }
    pub fn nrpn_change(&mut self, number: u16, controls: &ChannelControls) {
        self.update(Trigger::Nrpn(number), controls);
    }
    pub fn pitch_bend(&mut self, controls: &ChannelControls) {
        self.update(Trigger::PitchBend, controls);
    }
    pub fn channel_pressure(&mut self, controls: &ChannelControls) {
        self.update(Trigger::ChannelPressure, controls);
    }
    pub fn poly_pressure(&mut self, controls: &ChannelControls) {
        self.update(Trigger::PolyPressure, controls);
    }

    /// Re-evaluate all connections, e.g. after a controller reset.
    pub fn refresh(&mut self, controls: &ChannelControls) {
        if let Some(performer) = &self.performer {
            performer
                .graph()
                .evaluate_all(&mut self.state, controls, self.key);
        }
    }

    fn update(&mut self, trigger: Trigger, controls: &ChannelControls) {
        if let Some(performer) = &self.performer {
            performer
                .graph()
                .update(trigger, &mut self.state, controls, self.key);
        }
    }

    // ---------------------------------------------------------------------------------------------

    /// Advance the voice by one control tick of `interval` frames: apply a deferred note on,
    /// or run envelopes, LFOs and portamento and recalculate pitch, filter and output gains.
    pub fn control_tick(&mut self, channel: &Channel, interval: usize) {
        if self.stolen {
            // the old note did not fade out yet
            return;
        }
        if let Some(note) = self.pending.take() {
            let release = self.pending_release.take();
            self.note_on(note, channel);
            if let Some(release_id) = release {
                self.note_off(channel, release_id);
            }
            return;
        }
        if !self.is_playing() {
            return;
        }
        let time_step = interval as f64 / self.sample_rate as f64;
        self.tick_modulators(time_step);
        self.update(Trigger::Control, channel.controls());
        self.tick_glide(channel, time_step);
        self.update_outputs();
        self.gains.start(self.target_gains(), interval);

        if self.envelopes[0].is_finished() {
            self.stop();
        }
    }

    fn tick_modulators(&mut self, time_step: f64) {
        for instance in 0..EG_COUNT {
            let cell = |c| self.state.cell(CellId::eg(instance, c));
            let parameters = EnvelopeParameters {
                delay: cell(EgCell::Delay),
                attack: cell(EgCell::Attack),
                hold: cell(EgCell::Hold),
                decay: cell(EgCell::Decay),
                sustain: cell(EgCell::Sustain),
                release: cell(EgCell::Release),
                shutdown: cell(EgCell::Shutdown),
                gate: cell(EgCell::On),
            };
            let level = self.envelopes[instance].tick(&parameters, time_step);
            self.state
                .set_input(CellId::eg(instance, EgCell::Output), level);
        }
        for instance in 0..LFO_COUNT {
            let delay = self.state.cell(CellId::lfo(instance, LfoCell::Delay));
            let frequency = self.state.cell(CellId::lfo(instance, LfoCell::Freq));
            let output = self.lfos[instance].tick(delay, frequency, time_step);
            self.state
                .set_input(CellId::lfo(instance, LfoCell::Output), output);
        }
    }

    fn tick_glide(&mut self, channel: &Channel, time_step: f64) {
        let Some((current, target)) = self.glide else {
            return;
        };
        let step = channel.portamento_rate() * time_step;
        let next = if (target - current).abs() <= step {
            target
        } else {
            current + step * (target - current).signum()
        };
        self.glide = (next != target).then_some((next, target));
        let forced = self
            .performer
            .as_ref()
            .is_some_and(|performer| performer.graph().forces_keynumber());
        if !forced {
            self.state.set_input(CellId::KEYNUMBER, next / 128.0);
            self.update(Trigger::Keys, channel.controls());
        }
    }

    /// Recalculate playback pitch and filter parameters from the current cell values.
    fn update_outputs(&mut self) {
        let pitch = self.state.cell(CellId::OSC_PITCH);
        self.pitch = cents_to_ratio(pitch - self.root_pitch) * self.rate_ratio;

        let filter_type = FilterType::from_index(self.state.cell(CellId::FILTER_TYPE).round() as i32);
        let cutoff = self.state.cell(CellId::FILTER_FREQ);
        let open = cutoff >= FILTER_OPEN_CUTOFF
            && matches!(
                filter_type,
                FilterType::LowPass6 | FilterType::LowPass12 | FilterType::LowPass24
            );
        if !open {
            if self.filter_open {
                // re-engaged: start from a clean state without a ramp
                for filter in &mut self.filters {
                    filter.reset();
                }
            }
            let resonance_db = self.state.cell(CellId::FILTER_Q) / 10.0;
            for filter in &mut self.filters {
                filter.set_parameters(filter_type, cents_to_hz(cutoff), resonance_db);
            }
        }
        self.filter_open = open;
    }

    fn target_gains(&self) -> OutputGains {
        let gain = self.state.cell(CellId::GAIN) - self.attenuation;
        let amplitude = if gain <= MIN_GAIN {
            0.0
        } else {
            centibels_to_linear(gain.min(MAX_GAIN))
        };

        let pan = (0.5 + self.state.cell(CellId::PAN) / 1000.0).clamp(0.0, 1.0);
        let (mut left, mut right) = if self.mono {
            if pan == 0.5 {
                (std::f64::consts::FRAC_1_SQRT_2, std::f64::consts::FRAC_1_SQRT_2)
            } else {
                ((pan * FRAC_PI_2).cos(), (pan * FRAC_PI_2).sin())
            }
        } else {
            // stereo sources: pan acts as balance
            ((2.0 * (1.0 - pan)).min(1.0), (2.0 * pan).min(1.0))
        };
        let balance = (0.5 + self.state.cell(CellId::BALANCE) / 1000.0).clamp(0.0, 1.0);
        if balance > 0.5 {
            left *= (1.0 - balance) * 2.0;
        } else if balance < 0.5 {
            right *= balance * 2.0;
        }
        let reverb = (self.state.cell(CellId::REVERB) / 1000.0).clamp(0.0, 1.0);
        let chorus = (self.state.cell(CellId::CHORUS) / 1000.0).clamp(0.0, 1.0);
        OutputGains {
            left: left * amplitude,
            right: right * amplitude,
            reverb: reverb * amplitude,
            chorus: chorus * amplitude,
        }
    }

    // ---------------------------------------------------------------------------------------------

    /// Render one block and mix it into the bus buffers.
    pub fn render(&mut self, buffers: &mut MixBuffers) {
        let frames = buffers.frames();
        if self.stolen {
            self.render_fade_out(buffers, frames);
            return;
        }
        if !self.is_playing() {
            return;
        }
        let Some(stream) = &mut self.stream else {
            return;
        };
        let delay = std::mem::take(&mut self.delay).min(frames);
        let length = frames - delay;
        let channel_count = stream.channel_count();
        stream.read(&mut self.buffer[..channel_count], 0, length, self.pitch);
        let finished = stream.is_finished();
        if !self.filter_open {
            for (buffer, filter) in self.buffer.iter_mut().zip(&mut self.filters) {
                filter.process(&mut buffer[..length]);
            }
        }
        self.mix(buffers, delay, length);
        if self.stage == VoiceStage::Started {
            self.stage = VoiceStage::Active;
        }
        if finished {
            self.stop();
        }
    }

    /// Mix `length` rendered frames into the bus at the given onset delay.
    fn mix(&mut self, buffers: &mut MixBuffers, delay: usize, length: usize) {
        let target = buffers.target(delay);
        let range = delay..delay + length;
        let from = self.gains.current();
        let to = self.gains.at(length);
        let step = 1.0 / length.max(1) as f64;
        let gains_at = |frame: usize| from.lerp(&to, (frame + 1) as f64 * step);
        if self.mono {
            let input = &self.buffer[0][..length];
            let constant_pan = from.left == from.right && to.left == to.right;
            if constant_pan {
                for (frame, (sample, out)) in
                    input.iter().zip(&mut target.mono[range.clone()]).enumerate()
                {
                    *out += sample * gains_at(frame).left as f32;
                }
            } else {
                for (frame, ((sample, left), right)) in input
                    .iter()
                    .zip(&mut target.left[range.clone()])
                    .zip(&mut target.right[range.clone()])
                    .enumerate()
                {
                    let gains = gains_at(frame);
                    *left += sample * gains.left as f32;
                    *right += sample * gains.right as f32;
                }
            }
            for (frame, ((sample, reverb), chorus)) in input
                .iter()
                .zip(&mut target.effect1[range.clone()])
                .zip(&mut target.effect2[range.clone()])
                .enumerate()
            {
                let gains = gains_at(frame);
                *reverb += sample * gains.reverb as f32;
                *chorus += sample * gains.chorus as f32;
            }
        } else {
            let (first, second) = self.buffer.split_at(1);
            let input_left = &first[0][..length];
            let input_right = &second[0][..length];
            for (frame, (((l, r), out_left), out_right)) in input_left
                .iter()
                .zip(input_right)
                .zip(&mut target.left[range.clone()])
                .zip(&mut target.right[range.clone()])
                .enumerate()
            {
                let gains = gains_at(frame);
                *out_left += l * gains.left as f32;
                *out_right += r * gains.right as f32;
            }
            for (frame, (((l, r), reverb), chorus)) in input_left
                .iter()
                .zip(input_right)
                .zip(&mut target.effect1[range.clone()])
                .zip(&mut target.effect2[range])
                .enumerate()
            {
                let gains = gains_at(frame);
                let sum = (l + r) * 0.5;
                *reverb += sum * gains.reverb as f32;
                *chorus += sum * gains.chorus as f32;
            }
        }
        self.gains.advance(length);
    }

    /// Fade out a stolen voice within one block, then stay silent until the deferred note on.
    fn render_fade_out(&mut self, buffers: &mut MixBuffers, frames: usize) {
        self.stolen = false;
        if self.stream.is_none() || self.stage == VoiceStage::Stopped {
            return;
        }
        let fade_from = self.gains.current();
        if let Some(stream) = &mut self.stream {
            let channel_count = stream.channel_count();
            stream.read(&mut self.buffer[..channel_count], 0, frames, self.pitch);
        }
        if !self.filter_open {
            for (buffer, filter) in self.buffer.iter_mut().zip(&mut self.filters) {
                filter.process(&mut buffer[..frames]);
            }
        }
        self.gains.from = fade_from;
        self.gains.to = OutputGains::default();
        self.gains.position = 0;
        self.gains.length = frames;
        self.mix(buffers, 0, frames);
        // the old note is done: release its resources
        self.stage = VoiceStage::Stopped;
        self.stream = None;
        self.performer = None;
        self.glide = None;
    }
}

// -------------------------------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        performer::{ids, ConnectionBlock, Performer, SampleOscillator},
        voice::graph::CompiledPerformer,
    };

    const SAMPLE_RATE: u32 = 44100;
    const BLOCK: usize = 64;

    fn sine_performer(amplitude: f32) -> Arc<CompiledPerformer> {
        let data = (0..SAMPLE_RATE as usize)
            .map(|i| amplitude * (i as f32 * 440.0 * std::f32::consts::TAU / 44100.0).sin())
            .collect::<Vec<_>>();
        let oscillator = SampleOscillator::new(Arc::new(vec![data]), SAMPLE_RATE, 69.0);
        let performer = Performer::new("sine")
            .oscillator(Arc::new(oscillator))
            .connection(ConnectionBlock::constant(-3000.0, ids::eg_param("release", 0)));
        Arc::new(CompiledPerformer::new(performer))
    }

    fn note(performer: &Arc<CompiledPerformer>, key: u8, note_id: u64) -> NoteOn {
        NoteOn {
            performer: Arc::clone(performer),
            oscillator: Arc::clone(&performer.oscillators()[0]),
            channel: 0,
            key,
            velocity: 127,
            note_id,
            delay: 0,
            glide_from: None,
        }
    }

    fn render(voice: &mut Voice, channel: &Channel) -> MixBuffers {
        let mut buffers = MixBuffers::new(BLOCK);
        voice.control_tick(channel, BLOCK);
        voice.render(&mut buffers);
        buffers.merge_delayed();
        buffers
    }

    fn peak(buffers: &MixBuffers) -> f32 {
        let bus = &buffers.main;
        bus.left
            .iter()
            .chain(&bus.right)
            .chain(&bus.mono)
            .fold(0.0f32, |max, v| max.max(v.abs()))
    }

    #[test]
    fn note_on_plays_at_pitch() {
        let performer = sine_performer(0.5);
        let channel = Channel::new(0);
        let mut voice = Voice::new(SAMPLE_RATE, BLOCK, ResamplerKind::Linear);
        voice.note_on(note(&performer, 69, 1), &channel);
        assert_eq!(voice.stage(), VoiceStage::Started);
        assert!((voice.pitch - 1.0).abs() < 1e-9);
        let buffers = render(&mut voice, &channel);
        assert_eq!(voice.stage(), VoiceStage::Active);
        assert!(peak(&buffers) > 0.1);

        voice.note_on(note(&performer, 81, 2), &channel);
        assert!((voice.pitch - 2.0).abs() < 1e-9);
    }

    #[test]
    fn note_off_releases_and_stops() {
        let performer = sine_performer(0.5);
        let channel = Channel::new(0);
        let mut voice = Voice::new(SAMPLE_RATE, BLOCK, ResamplerKind::Cubic);
        voice.note_on(note(&performer, 60, 1), &channel);
        render(&mut voice, &channel);
        voice.note_off(&channel, 1);
        assert_eq!(voice.stage(), VoiceStage::Releasing);
        assert_eq!(voice.cell(CellId::eg(0, EgCell::On)), 0.0);
        let mut ticks = 0;
        while !voice.is_free() {
            render(&mut voice, &channel);
            ticks += 1;
            assert!(ticks < 10000);
        }
        assert!(ticks > 10);
    }

    #[test]
    fn sustain_holds_notes() {
        let performer = sine_performer(0.5);
        let mut channel = Channel::new(0);
        let mut voice = Voice::new(SAMPLE_RATE, BLOCK, ResamplerKind::Linear);
        voice.note_on(note(&performer, 60, 1), &channel);
        channel.controller_change(64, 127);
        voice.note_off(&channel, 1);
        assert_eq!(voice.stage(), VoiceStage::Held);
        channel.controller_change(64, 0);
        voice.sustain_released(&channel, 2);
        assert_eq!(voice.stage(), VoiceStage::Releasing);
        assert_eq!(voice.release_id(), 2);
    }

    #[test]
    fn shutdown_is_faster_than_release() {
        let performer = sine_performer(0.5);
        let channel = Channel::new(0);
        let mut voice = Voice::new(SAMPLE_RATE, BLOCK, ResamplerKind::Linear);
        voice.note_on(note(&performer, 60, 1), &channel);
        render(&mut voice, &channel);
        voice.shutdown(channel.controls());
        assert_eq!(voice.stage(), VoiceStage::Shutdown);
        assert_eq!(voice.cell(CellId::eg(0, EgCell::On)), -1.0);
        let mut ticks = 0;
        while !voice.is_free() {
            render(&mut voice, &channel);
            ticks += 1;
        }
        // -7000 timecents are ~17 ms, which are less than 20 blocks
        assert!(ticks < 20);
    }

    #[test]
    fn stolen_voice_fades_then_restarts() {
        let performer = sine_performer(0.5);
        let channel = Channel::new(0);
        let mut voice = Voice::new(SAMPLE_RATE, BLOCK, ResamplerKind::Linear);
        voice.note_on(note(&performer, 60, 1), &channel);
        render(&mut voice, &channel);

        voice.steal(note(&performer, 72, 2));
        assert!(voice.is_stolen());
        // fade out block: ends at zero gain
        let mut buffers = MixBuffers::new(BLOCK);
        voice.render(&mut buffers);
        let last = buffers.main.mono[BLOCK - 1].abs();
        assert!(last < 0.01);
        // silence until the next control tick
        let mut buffers = MixBuffers::new(BLOCK);
        voice.render(&mut buffers);
        assert_eq!(peak(&buffers), 0.0);
        // deferred note on applies at the control tick
        let buffers = render(&mut voice, &channel);
        assert!(!voice.is_stolen());
        assert_eq!(voice.key(), 72);
        assert_eq!(voice.note_id(), 2);
        assert!(peak(&buffers) > 0.1);
    }

    #[test]
    fn sub_block_onset_renders_delayed() {
        let performer = sine_performer(0.5);
        let channel = Channel::new(0);
        let mut voice = Voice::new(SAMPLE_RATE, BLOCK, ResamplerKind::Linear);
        let mut delayed_note = note(&performer, 69, 1);
        delayed_note.delay = 40;
        voice.note_on(delayed_note, &channel);
        let mut buffers = MixBuffers::new(BLOCK);
        voice.render(&mut buffers);
        assert!(buffers.main.is_silent());
        assert!(buffers.delayed.mono[..40].iter().all(|v| *v == 0.0));
        assert!(buffers.delayed.mono[41..].iter().any(|v| *v != 0.0));
    }

    #[test]
    fn portamento_glides_to_target() {
        let performer = sine_performer(0.5);
        let mut channel = Channel::new(0);
        channel.controller_change(5, 0);
        let mut voice = Voice::new(SAMPLE_RATE, BLOCK, ResamplerKind::Linear);
        let mut glide_note = note(&performer, 72, 1);
        glide_note.glide_from = Some(60);
        voice.note_on(glide_note, &channel);
        assert!((voice.cell(CellId::OSC_PITCH) - 6000.0).abs() < 1e-6);
        let mut last = voice.cell(CellId::OSC_PITCH);
        for _ in 0..200 {
            render(&mut voice, &channel);
            let pitch = voice.cell(CellId::OSC_PITCH);
            assert!(pitch >= last);
            last = pitch;
        }
        assert!((last - 7200.0).abs() < 1e-6);
    }
}
