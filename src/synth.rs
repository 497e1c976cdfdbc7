//! MIDI control plane of the engine: channels, the voice pool and voice stealing.

use std::sync::Arc;

use crossbeam_queue::ArrayQueue;

use crate::{
    mixer::{buffers::MixBuffers, MixerLine},
    options::SynthOptions,
    soundbank::{emergency_soundbank, Instrument, Patch, Soundbank},
    voice::{graph::Trigger, NoteOn, Voice, VoiceStage},
    Error,
};

// -------------------------------------------------------------------------------------------------

pub mod channel;

use channel::{Channel, ChannelCommand};

// -------------------------------------------------------------------------------------------------

/// Number of MIDI channels of a synthesizer.
pub const CHANNEL_COUNT: usize = 16;

// -------------------------------------------------------------------------------------------------

/// MIDI channel messages, as applied by the [`Synthesizer`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SynthEvent {
    NoteOn { channel: u8, key: u8, velocity: u8 },
    NoteOff { channel: u8, key: u8 },
    Controller { channel: u8, number: u8, value: u8 },
    ProgramChange { channel: u8, program: u8 },
    /// 14 bit pitch bend value, 8192 is the center.
    PitchBend { channel: u8, value: u16 },
    ChannelPressure { channel: u8, value: u8 },
    PolyPressure { channel: u8, key: u8, value: u8 },
}

/// A [`SynthEvent`] with a frame offset into the next rendered block.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScheduledEvent {
    pub offset: usize,
    pub event: SynthEvent,
}

/// Cloneable handle to schedule events into a synthesizer without locking the mixer.
///
/// Events get applied at the start of the synthesizer's next block. Note ons start at their
/// frame offset within that block, all other events apply at the block start.
#[derive(Clone)]
pub struct EventScheduler {
    queue: Arc<ArrayQueue<ScheduledEvent>>,
}

impl EventScheduler {
    /// Queue an event. Fails when the queue is full.
    pub fn schedule(&self, offset: usize, event: SynthEvent) -> Result<(), Error> {
        self.queue
            .push(ScheduledEvent { offset, event })
            .map_err(|_event| Error::SendError("Synth event queue is full".to_string()))
    }
}

// -------------------------------------------------------------------------------------------------

/// A polyphonic synthesizer with 16 MIDI channels, playing instruments of a [`Soundbank`].
///
/// All voices render into the mixing bus this synthesizer is opened in as a [`MixerLine`], but
/// the synthesizer can also be driven manually via its `MixerLine` impl. When all voices are
/// busy, new notes steal voices in this order: free voices, voices which shut down, releasing
/// voices with the oldest release, voices held by pedals, then the oldest playing voice. Ties
/// pick the lowest voice index.
pub struct Synthesizer {
    sample_rate: u32,
    block_size: usize,
    soundbank: Arc<Soundbank>,
    channels: Vec<Channel>,
    instruments: Vec<Option<Arc<Instrument>>>,
    voices: Vec<Voice>,
    events: Arc<ArrayQueue<ScheduledEvent>>,
    note_counter: u64,
    release_counter: u64,
}

impl Synthesizer {
    /// Create a new synthesizer which plays the emergency soundbank.
    pub fn new(sample_rate: u32, block_size: usize, options: SynthOptions) -> Result<Self, Error> {
        Self::with_soundbank(sample_rate, block_size, options, emergency_soundbank())
    }

    /// Create a new synthesizer which plays the given soundbank.
    pub fn with_soundbank(
        sample_rate: u32,
        block_size: usize,
        options: SynthOptions,
        soundbank: Arc<Soundbank>,
    ) -> Result<Self, Error> {
        options.validate()?;
        if sample_rate == 0 || block_size == 0 {
            return Err(Error::ParameterError(format!(
                "synth sample rate and block size must be > 0, but are '{sample_rate}' and '{block_size}'"
            )));
        }
        let voices = (0..options.polyphony)
            .map(|_| Voice::new(sample_rate, block_size, options.resampler))
            .collect();
        let channels = (0..CHANNEL_COUNT as u8).map(Channel::new).collect();
        let mut synth = Self {
            sample_rate,
            block_size,
            soundbank,
            channels,
            instruments: vec![None; CHANNEL_COUNT],
            voices,
            events: Arc::new(ArrayQueue::new(options.event_queue_capacity)),
            note_counter: 0,
            release_counter: 0,
        };
        for channel in 0..CHANNEL_COUNT {
            synth.select_instrument(channel);
        }
        log::info!(
            "Created synthesizer with {} voices, playing soundbank '{}'",
            synth.voices.len(),
            synth.soundbank.name()
        );
        Ok(synth)
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn block_size(&self) -> usize {
        self.block_size
    }

    pub fn soundbank(&self) -> &Arc<Soundbank> {
        &self.soundbank
    }

    /// Replace the soundbank. Playing voices get shut down and all channels select their
    /// programs from the new soundbank.
    pub fn load_soundbank(&mut self, soundbank: Arc<Soundbank>) {
        self.all_sound_off();
        self.soundbank = soundbank;
        for channel in 0..CHANNEL_COUNT {
            self.select_instrument(channel);
        }
        log::info!("Loaded soundbank '{}'", self.soundbank.name());
    }

    pub fn channel(&self, channel: u8) -> &Channel {
        &self.channels[channel as usize % CHANNEL_COUNT]
    }

    /// Instrument which is selected on the given channel.
    pub fn instrument(&self, channel: u8) -> Option<&Arc<Instrument>> {
        self.instruments[channel as usize % CHANNEL_COUNT].as_ref()
    }

    pub fn voices(&self) -> &[Voice] {
        &self.voices
    }

    /// Number of voices which play or are about to play a note.
    pub fn active_voice_count(&self) -> usize {
        self.voices.iter().filter(|voice| !voice.is_free()).count()
    }

    /// A handle to schedule events from other threads.
    pub fn scheduler(&self) -> EventScheduler {
        EventScheduler {
            queue: Arc::clone(&self.events),
        }
    }

    /// Schedule an event for the next block. See [`EventScheduler`].
    pub fn schedule(&self, offset: usize, event: SynthEvent) -> Result<(), Error> {
        self.scheduler().schedule(offset, event)
    }

    // ---------------------------------------------------------------------------------------------

    /// Apply an event immediately.
    pub fn handle_event(&mut self, event: SynthEvent) {
        self.apply_event(event, 0);
    }

    fn apply_event(&mut self, event: SynthEvent, delay: usize) {
        match event {
            SynthEvent::NoteOn {
                channel,
                key,
                velocity,
            } => self.start_note(channel, key, velocity, delay),
            SynthEvent::NoteOff { channel, key } => self.note_off(channel, key),
            SynthEvent::Controller {
                channel,
                number,
                value,
            } => self.controller(channel, number, value),
            SynthEvent::ProgramChange { channel, program } => {
                self.program_change(channel, program)
            }
            SynthEvent::PitchBend { channel, value } => self.pitch_bend(channel, value),
            SynthEvent::ChannelPressure { channel, value } => {
                self.channel_pressure(channel, value)
            }
            SynthEvent::PolyPressure {
                channel,
                key,
                value,
            } => self.poly_pressure(channel, key, value),
        }
    }

    /// Start a note. A velocity of 0 releases the note instead.
    pub fn note_on(&mut self, channel: u8, key: u8, velocity: u8) {
        self.start_note(channel, key, velocity, 0);
    }

    /// Release all voices which play the given key.
    pub fn note_off(&mut self, channel: u8, key: u8) {
        let index = channel as usize % CHANNEL_COUNT;
        let channel = &self.channels[index];
        self.release_counter += 1;
        for voice in &mut self.voices {
            if voice.plays(index as u8, key & 127) {
                voice.note_off(channel, self.release_counter);
            }
        }
    }

    pub fn controller(&mut self, channel: u8, number: u8, value: u8) {
        let index = channel as usize % CHANNEL_COUNT;
        let change = self.channels[index].controller_change(number, value);
        let channel = &self.channels[index];
        let controls = channel.controls();
        if let Some(trigger) = change.trigger {
            for voice in channel_voices(&mut self.voices, index) {
                match trigger {
                    Trigger::Controller(number) => voice.controller_change(number, controls),
                    Trigger::Rpn(number) => voice.rpn_change(number, controls),
                    Trigger::Nrpn(number) => voice.nrpn_change(number, controls),
                    _ => {}
                }
            }
        }
        let Some(command) = change.command else {
            return;
        };
        log::debug!("Channel {index}: {command:?}");
        self.release_counter += 1;
        let release_id = self.release_counter;
        for voice in channel_voices(&mut self.voices, index) {
            match command {
                ChannelCommand::SustainReleased => voice.sustain_released(channel, release_id),
                ChannelCommand::SostenutoPressed => voice.sostenuto_pressed(),
                ChannelCommand::SostenutoReleased => voice.sostenuto_released(channel, release_id),
                ChannelCommand::AllSoundOff => voice.shutdown(controls),
                ChannelCommand::AllNotesOff => voice.note_off(channel, release_id),
                ChannelCommand::ResetAllControllers => voice.refresh(controls),
            }
        }
    }

    pub fn program_change(&mut self, channel: u8, program: u8) {
        let index = channel as usize % CHANNEL_COUNT;
        self.channels[index].set_program(program);
        self.select_instrument(index);
    }

    /// Set the 14 bit pitch bend value of a channel.
    pub fn pitch_bend(&mut self, channel: u8, value: u16) {
        let index = channel as usize % CHANNEL_COUNT;
        self.channels[index]
            .controls_mut()
            .set_pitch_bend(value.min(0x3FFF));
        let controls = self.channels[index].controls();
        for voice in channel_voices(&mut self.voices, index) {
            voice.pitch_bend(controls);
        }
    }

    pub fn channel_pressure(&mut self, channel: u8, value: u8) {
        let index = channel as usize % CHANNEL_COUNT;
        self.channels[index]
            .controls_mut()
            .set_channel_pressure(value & 127);
        let controls = self.channels[index].controls();
        for voice in channel_voices(&mut self.voices, index) {
            voice.channel_pressure(controls);
        }
    }

    pub fn poly_pressure(&mut self, channel: u8, key: u8, value: u8) {
        let index = channel as usize % CHANNEL_COUNT;
        let key = key & 127;
        self.channels[index]
            .controls_mut()
            .set_poly_pressure(key, value & 127);
        let controls = self.channels[index].controls();
        for voice in channel_voices(&mut self.voices, index) {
            if voice.key() == key {
                voice.poly_pressure(controls);
            }
        }
    }

    /// Shut down all voices on all channels.
    pub fn all_sound_off(&mut self) {
        for channel in 0..CHANNEL_COUNT as u8 {
            self.controller(channel, channel::cc::ALL_SOUND_OFF, 0);
        }
    }

    /// Stop all voices immediately, drop all scheduled events and reset all channels to their
    /// initial state.
    pub fn reset(&mut self) {
        while self.events.pop().is_some() {}
        for voice in &mut self.voices {
            voice.stop();
        }
        for index in 0..CHANNEL_COUNT {
            self.channels[index].reset();
            self.select_instrument(index);
        }
    }

    // ---------------------------------------------------------------------------------------------

    fn select_instrument(&mut self, index: usize) {
        let channel = &self.channels[index];
        let patch = Patch {
            bank: channel.bank(),
            program: channel.program(),
            percussion: channel.is_percussion(),
        };
        let instrument = self.soundbank.instrument(patch).cloned();
        match &instrument {
            Some(instrument) if instrument.patch() != patch => log::debug!(
                "Channel {index}: no instrument at patch {patch}, using '{}' ({})",
                instrument.name(),
                instrument.patch()
            ),
            None => log::warn!("Channel {index}: no instrument for patch {patch}"),
            _ => {}
        }
        self.instruments[index] = instrument;
    }

    fn start_note(&mut self, channel: u8, key: u8, velocity: u8, delay: usize) {
        let index = channel as usize % CHANNEL_COUNT;
        let (key, velocity) = (key & 127, velocity & 127);
        if velocity == 0 {
            self.note_off(index as u8, key);
            return;
        }
        let Some(instrument) = self.instruments[index].clone() else {
            return;
        };
        let glide_from = self.channels[index].take_glide_origin(key);
        let delay = delay.min(self.block_size - 1);
        for performer in instrument.performers_for(key, velocity) {
            let class = performer.performer().exclusive_class_id();
            if class != 0 {
                let non_exclusive = performer.performer().is_self_non_exclusive();
                let controls = self.channels[index].controls();
                for voice in self.voices.iter_mut() {
                    let Some(playing) = voice.performer() else {
                        continue;
                    };
                    if voice.is_playing()
                        && voice.channel() as usize == index
                        && playing.performer().exclusive_class_id() == class
                        && !(non_exclusive && Arc::ptr_eq(playing, performer))
                    {
                        voice.shutdown(controls);
                    }
                }
            }
            for oscillator in performer.oscillators() {
                self.note_counter += 1;
                let note = NoteOn {
                    performer: Arc::clone(performer),
                    oscillator: Arc::clone(oscillator),
                    channel: index as u8,
                    key,
                    velocity,
                    note_id: self.note_counter,
                    delay,
                    glide_from,
                };
                self.allocate(note);
            }
        }
    }

    fn allocate(&mut self, note: NoteOn) {
        let channel = &self.channels[note.channel as usize];
        if let Some(voice) = self.voices.iter_mut().find(|voice| voice.is_free()) {
            voice.note_on(note, channel);
            return;
        }
        let victim = self
            .voices
            .iter()
            .enumerate()
            .min_by_key(|(index, voice)| {
                let (rank, age) = Self::steal_rank(voice);
                (rank, age, *index)
            })
            .map(|(index, _)| index);
        if let Some(victim) = victim {
            log::debug!(
                "Stealing voice {victim} (key {}) for key {}",
                self.voices[victim].key(),
                note.key
            );
            self.voices[victim].steal(note);
        }
    }

    /// Stealing order of a busy voice: lower ranks get stolen first, then older ones.
    fn steal_rank(voice: &Voice) -> (u8, u64) {
        if voice.is_stolen() {
            // already waits for a note: stealing it would drop that note
            return (4, voice.note_id());
        }
        match voice.stage() {
            VoiceStage::Shutdown => (0, voice.note_id()),
            VoiceStage::Releasing => (1, voice.release_id()),
            VoiceStage::Held => (2, voice.note_id()),
            _ => (3, voice.note_id()),
        }
    }

    fn process_events(&mut self) {
        while let Some(ScheduledEvent { offset, event }) = self.events.pop() {
            self.apply_event(event, offset);
        }
    }
}

impl MixerLine for Synthesizer {
    fn name(&self) -> &'static str {
        "Synthesizer"
    }

    fn control_tick(&mut self, interval: usize) {
        for voice in &mut self.voices {
            let channel = &self.channels[voice.target_channel() as usize];
            voice.control_tick(channel, interval);
        }
    }

    fn render(&mut self, buffers: &mut MixBuffers) {
        self.process_events();
        for voice in &mut self.voices {
            voice.render(buffers);
        }
    }
}

// -------------------------------------------------------------------------------------------------

/// Voices which play a note on the given channel.
fn channel_voices(voices: &mut [Voice], index: usize) -> impl Iterator<Item = &mut Voice> {
    voices
        .iter_mut()
        .filter(move |voice| voice.is_playing() && voice.channel() as usize == index)
}

// -------------------------------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::performer::{ids, ConnectionBlock, Performer, SampleOscillator};

    const SAMPLE_RATE: u32 = 44100;
    const BLOCK: usize = 64;

    fn sine(amplitude: f32) -> Arc<SampleOscillator> {
        let data = (0..SAMPLE_RATE as usize)
            .map(|i| amplitude * (i as f32 * 440.0 * std::f32::consts::TAU / 44100.0).sin())
            .collect::<Vec<_>>();
        Arc::new(SampleOscillator::new(Arc::new(vec![data]), SAMPLE_RATE, 69.0))
    }

    fn test_soundbank() -> Arc<Soundbank> {
        let mut soundbank = Soundbank::new("test");
        soundbank.add(Instrument::new(
            "sine",
            Patch::new(0, 0),
            vec![Performer::new("sine")
                .oscillator(sine(0.5))
                .connection(ConnectionBlock::constant(-3000.0, ids::eg_param("release", 0)))],
        ));
        soundbank.add(Instrument::new(
            "hats",
            Patch::percussion(0, 0),
            vec![
                Performer::new("closed")
                    .keys(42..=42)
                    .exclusive_class(1)
                    .oscillator(sine(0.5)),
                Performer::new("open")
                    .keys(46..=46)
                    .exclusive_class(1)
                    .oscillator(sine(0.5)),
            ],
        ));
        Arc::new(soundbank)
    }

    fn synth(polyphony: usize) -> Synthesizer {
        let options = SynthOptions::default().polyphony(polyphony);
        Synthesizer::with_soundbank(SAMPLE_RATE, BLOCK, options, test_soundbank()).unwrap()
    }

    fn run(synth: &mut Synthesizer, tick: bool) -> MixBuffers {
        let mut buffers = MixBuffers::new(BLOCK);
        if tick {
            synth.control_tick(BLOCK);
        }
        synth.render(&mut buffers);
        buffers.merge_delayed();
        buffers
    }

    fn samples(buffers: &MixBuffers) -> impl Iterator<Item = f32> + '_ {
        let bus = &buffers.main;
        bus.left.iter().chain(&bus.right).chain(&bus.mono).copied()
    }

    fn peak(buffers: &MixBuffers) -> f32 {
        samples(buffers).fold(0.0f32, |max, v| max.max(v.abs()))
    }

    #[test]
    fn notes_play_and_release() {
        let mut synth = synth(8);
        synth.note_on(0, 60, 100);
        synth.note_on(0, 64, 100);
        assert_eq!(synth.active_voice_count(), 2);
        assert!(peak(&run(&mut synth, true)) > 0.01);

        synth.note_off(0, 60);
        synth.note_on(0, 64, 0);
        let mut blocks = 0;
        while synth.active_voice_count() > 0 {
            run(&mut synth, true);
            blocks += 1;
            assert!(blocks < 10000);
        }
        assert!(peak(&run(&mut synth, true)) == 0.0);
    }

    #[test]
    fn sustain_pedal_holds_notes() {
        let mut synth = synth(8);
        synth.controller(0, channel::cc::SUSTAIN, 127);
        synth.note_on(0, 60, 100);
        synth.note_off(0, 60);
        assert_eq!(synth.voices()[0].stage(), VoiceStage::Held);
        synth.controller(0, channel::cc::SUSTAIN, 0);
        assert_eq!(synth.voices()[0].stage(), VoiceStage::Releasing);
    }

    #[test]
    fn stealing_never_renders_partial_voices() {
        let mut synth = synth(2);
        synth.note_on(0, 60, 100);
        run(&mut synth, true);
        synth.note_on(0, 62, 100);
        run(&mut synth, true);
        synth.note_off(0, 60);
        run(&mut synth, true);

        // the released voice is the preferred victim
        synth.note_on(0, 67, 100);
        let victim = synth
            .voices()
            .iter()
            .position(|voice| voice.is_stolen())
            .expect("no voice got stolen");
        assert_eq!(synth.voices()[victim].key(), 60);

        // the victim's tail fades out, ending silent, and nothing non finite ever shows up
        let buffers = run(&mut synth, false);
        assert!(samples(&buffers).all(f32::is_finite));
        assert!(!synth.voices()[victim].is_playing());
        let buffers = run(&mut synth, false);
        assert!(samples(&buffers).all(f32::is_finite));

        // the deferred note starts at the next tick
        run(&mut synth, true);
        assert!(!synth.voices()[victim].is_stolen());
        assert_eq!(synth.voices()[victim].key(), 67);
        assert_eq!(synth.voices()[victim].stage(), VoiceStage::Active);
    }

    #[test]
    fn stealing_order_is_deterministic() {
        let mut synth = synth(3);
        synth.note_on(0, 60, 100);
        synth.note_on(0, 62, 100);
        synth.note_on(0, 64, 100);
        // all voices active: the oldest note gets stolen
        synth.note_on(0, 65, 100);
        assert!(synth.voices()[0].is_stolen());
        // stolen voices come last, so the next oldest follows
        synth.note_on(0, 67, 100);
        assert!(synth.voices()[1].is_stolen());
    }

    #[test]
    fn exclusive_class_cuts_voices() {
        let mut synth = synth(8);
        synth.note_on(channel::Channel::PERCUSSION, 46, 100);
        run(&mut synth, true);
        synth.note_on(channel::Channel::PERCUSSION, 42, 100);
        assert_eq!(synth.voices()[0].key(), 46);
        assert_eq!(synth.voices()[0].stage(), VoiceStage::Shutdown);
        assert_eq!(synth.voices()[1].key(), 42);
        assert_eq!(synth.voices()[1].stage(), VoiceStage::Started);
        // other channels are unaffected
        synth.note_on(0, 46, 100);
        assert_eq!(synth.voices()[1].stage(), VoiceStage::Started);
    }

    #[test]
    fn scheduled_note_starts_within_block() -> Result<(), Box<dyn std::error::Error>> {
        let mut synth = synth(4);
        let scheduler = synth.scheduler();
        scheduler.schedule(
            32,
            SynthEvent::NoteOn {
                channel: 0,
                key: 69,
                velocity: 127,
            },
        )?;
        let buffers = run(&mut synth, false);
        let bus = &buffers.main;
        let first_sound = (0..BLOCK)
            .find(|frame| bus.mono[*frame] != 0.0 || bus.left[*frame] != 0.0)
            .ok_or("no sound")?;
        assert!(first_sound >= 32);
        Ok(())
    }

    #[test]
    fn full_event_queue_fails() {
        let options = SynthOptions::default().event_queue_capacity(1);
        let synth =
            Synthesizer::with_soundbank(SAMPLE_RATE, BLOCK, options, test_soundbank()).unwrap();
        let event = SynthEvent::ProgramChange {
            channel: 0,
            program: 0,
        };
        assert!(synth.schedule(0, event).is_ok());
        assert!(matches!(synth.schedule(0, event), Err(Error::SendError(_))));
    }

    #[test]
    fn program_changes_select_instruments() {
        let mut synth = synth(4);
        assert_eq!(synth.instrument(0).map(|i| i.name()), Some("sine"));
        assert_eq!(
            synth.instrument(channel::Channel::PERCUSSION).map(|i| i.name()),
            Some("hats")
        );
        // falls back to the nearest program
        synth.program_change(0, 40);
        assert_eq!(synth.instrument(0).map(|i| i.name()), Some("sine"));
        assert_eq!(synth.channel(0).program(), 40);
    }

    #[test]
    fn reset_stops_everything() {
        let mut synth = synth(4);
        synth.note_on(0, 60, 100);
        synth.controller(0, channel::cc::MODULATION, 100);
        synth.reset();
        assert_eq!(synth.active_voice_count(), 0);
        assert_eq!(
            synth.channel(0).controls().controller(channel::cc::MODULATION),
            0.0
        );
    }
}
