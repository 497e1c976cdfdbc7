//! The mixing bus: sums all open lines into dry and effect buses, drives the control rate
//! and the global chorus and reverb, and produces interleaved output blocks.

use std::sync::{
    atomic::{AtomicBool, AtomicU32, Ordering},
    Arc, Mutex, MutexGuard, Weak,
};

use crate::{
    effect::{chorus::ChorusEffect, reverb::ReverbEffect, reverb::ReverbPreset, BusEffect},
    options::{MixerOptions, PcmLineOptions, SynthOptions},
    synth::Synthesizer,
    utils::{
        buffer::{add_buffers, scale_buffer, stereo_to_interleaved},
        unique_usize_id,
    },
    Error,
};

// -------------------------------------------------------------------------------------------------

pub mod buffers;
pub mod pcm;

use buffers::MixBuffers;
use pcm::{PcmLine, PcmWriter};

// -------------------------------------------------------------------------------------------------

/// A sound source of the [`Mixer`], such as a [`Synthesizer`] or a [`PcmLine`].
///
/// Lines get called from the thread which renders the mixer, with the line's own lock held.
pub trait MixerLine: Send + 'static {
    /// A static name for the line, used in logs.
    fn name(&self) -> &'static str;

    /// Advance control rate state by `interval` frames. Called before rendering the first
    /// block of each control period.
    fn control_tick(&mut self, interval: usize);

    /// Add one block of audio to the given bus buffers.
    fn render(&mut self, buffers: &mut MixBuffers);
}

type SharedLine = Arc<Mutex<dyn MixerLine>>;

// -------------------------------------------------------------------------------------------------

/// Mixer internal struct to keep track of open lines.
struct OpenLine {
    id: usize,
    name: &'static str,
    closed: Arc<AtomicBool>,
    line: SharedLine,
}

/// Buses, effects and the control rate counter. Only locked while rendering a block or while
/// changing effect settings.
struct RenderState {
    buffers: MixBuffers,
    chorus: ChorusEffect,
    reverb: ReverbEffect,
    control_interval: usize,
    frames_until_tick: usize,
    // lines of the block which is being rendered
    snapshot: Vec<SharedLine>,
}

impl RenderState {
    fn new(options: MixerOptions) -> Self {
        Self {
            buffers: MixBuffers::new(options.block_size),
            chorus: ChorusEffect::new(options.sample_rate),
            reverb: ReverbEffect::new(
                options.sample_rate,
                options.block_size,
                options.reverb_preset,
                options.reverb_light,
            ),
            control_interval: options.control_interval(),
            frames_until_tick: 0,
            snapshot: Vec::with_capacity(16),
        }
    }
}

// -------------------------------------------------------------------------------------------------

/// The mixing bus of the engine.
///
/// Lines get opened in the mixer and then are rendered together in blocks of
/// [`MixerOptions::block_size`] frames, either by an audio pusher which writes into an
/// [`AudioSink`](crate::AudioSink), or pulled via a [`MixerStream`](crate::MixerStream).
///
/// The set of open lines is guarded by the mixer lock, which a render pass only holds while
/// taking a snapshot of the lines. Each line has its own lock, held while it renders or while
/// accessed via [`LineHandle::with`], so control calls never wait for other lines or effects.
///
/// The mixer is cheap to clone: all clones share the same lines and state.
#[derive(Clone)]
pub struct Mixer {
    options: MixerOptions,
    lines: Arc<Mutex<Vec<OpenLine>>>,
    state: Arc<Mutex<RenderState>>,
    volume: Arc<AtomicU32>,
}

impl Mixer {
    /// Create a new mixer with the given options.
    pub fn new(options: MixerOptions) -> Result<Self, Error> {
        options.validate()?;
        log::info!(
            "Creating mixer: {} Hz, {} channels, {} frames per block, control tick every {} frames",
            options.sample_rate,
            options.channel_count,
            options.block_size,
            options.control_interval()
        );
        Ok(Self {
            options,
            lines: Arc::new(Mutex::new(Vec::with_capacity(16))),
            state: Arc::new(Mutex::new(RenderState::new(options))),
            volume: Arc::new(AtomicU32::new(options.volume.to_bits())),
        })
    }

    pub fn options(&self) -> &MixerOptions {
        &self.options
    }

    /// Number of samples in one rendered, interleaved output block.
    pub fn block_samples(&self) -> usize {
        self.options.block_size * self.options.channel_count
    }

    /// Open a new line in the mixer. It will be rendered starting with the next block.
    pub fn open_line<L: MixerLine>(&self, line: L) -> LineHandle<L> {
        let id = unique_usize_id();
        let name = line.name();
        let closed = Arc::new(AtomicBool::new(false));
        let line = Arc::new(Mutex::new(line));
        let handle = LineHandle {
            id,
            closed: Arc::clone(&closed),
            line: Arc::downgrade(&line),
        };
        log::debug!("Opening mixer line #{id} ({name})");
        self.lock_lines().push(OpenLine {
            id,
            name,
            closed,
            line,
        });
        handle
    }

    /// Create a new [`Synthesizer`] which plays the emergency soundbank at the mixer's rate and
    /// block size, and open it.
    pub fn open_synthesizer(&self, options: SynthOptions) -> Result<LineHandle<Synthesizer>, Error> {
        let synth = Synthesizer::new(self.options.sample_rate, self.options.block_size, options)?;
        Ok(self.open_line(synth))
    }

    /// Create a new [`PcmLine`] and open it. Returns the line's handle and the writer which
    /// feeds it.
    pub fn open_pcm_line(
        &self,
        options: PcmLineOptions,
    ) -> Result<(LineHandle<PcmLine>, PcmWriter), Error> {
        let (line, writer) = PcmLine::new(self.options.sample_rate, self.options.block_size, options)?;
        Ok((self.open_line(line), writer))
    }

    /// Number of open lines.
    pub fn line_count(&self) -> usize {
        self.lock_lines()
            .iter()
            .filter(|open| !open.closed.load(Ordering::Relaxed))
            .count()
    }

    /// Linear master volume.
    pub fn volume(&self) -> f32 {
        f32::from_bits(self.volume.load(Ordering::Relaxed))
    }
    pub fn set_volume(&self, volume: f32) {
        self.volume
            .store(volume.max(0.0).to_bits(), Ordering::Relaxed);
    }

    pub fn reverb_preset(&self) -> ReverbPreset {
        self.lock_state().reverb.preset()
    }
    pub fn set_reverb_preset(&self, preset: ReverbPreset) {
        self.lock_state().reverb.set_preset(preset);
    }

    /// Clear reverb and chorus tails.
    pub fn reset_effects(&self) {
        let mut state = self.lock_state();
        state.reverb.reset();
        state.chorus.reset();
    }

    /// Render the next block into `output`, interleaved with the mixer's channel count.
    ///
    /// `output` must hold exactly [`Self::block_samples`] samples.
    pub fn render(&self, output: &mut [f32]) -> Result<(), Error> {
        if output.len() != self.block_samples() {
            return Err(Error::ParameterError(format!(
                "mixer render buffer must hold {} samples, but holds {}",
                self.block_samples(),
                output.len()
            )));
        }
        let mut state = self.lock_state();
        let state = &mut *state;
        self.snapshot_lines(&mut state.snapshot);

        state.buffers.clear();
        let control_tick = state.frames_until_tick == 0;
        if control_tick {
            state.frames_until_tick = state.control_interval;
        }
        state.frames_until_tick = state
            .frames_until_tick
            .saturating_sub(self.options.block_size);

        for line in &state.snapshot {
            let mut line = line.lock().unwrap();
            if control_tick {
                line.control_tick(state.control_interval);
            }
            line.render(&mut state.buffers);
        }
        state.snapshot.clear();
        state.buffers.merge_delayed();

        let bus = &mut state.buffers.main;
        let (chorus, reverb) = (&mut state.chorus, &mut state.reverb);
        let chorus_enabled = self.options.chorus;
        let volume = self.volume();
        let channel_count = self.options.channel_count;
        assert_no_alloc(|| {
            if chorus_enabled {
                chorus.process_with_send(
                    &bus.effect2,
                    &mut bus.left,
                    &mut bus.right,
                    &mut bus.effect1,
                );
            }
            reverb.process(&bus.effect1, &mut bus.left, &mut bus.right);
            add_buffers(&mut bus.left, &bus.mono);
            add_buffers(&mut bus.right, &bus.mono);
            if volume != 1.0 {
                scale_buffer(&mut bus.left, volume);
                scale_buffer(&mut bus.right, volume);
            }
            stereo_to_interleaved(&bus.left, &bus.right, output, channel_count);
        });
        Ok(())
    }

    /// Drop closed lines and copy the remaining ones into `snapshot`.
    fn snapshot_lines(&self, snapshot: &mut Vec<SharedLine>) {
        let mut lines = self.lock_lines();
        lines.retain(|open| {
            let closed = open.closed.load(Ordering::Relaxed);
            if closed {
                log::debug!("Removing closed mixer line #{} ({})", open.id, open.name);
            }
            !closed
        });
        snapshot.extend(lines.iter().map(|open| Arc::clone(&open.line)));
    }

    fn lock_lines(&self) -> MutexGuard<'_, Vec<OpenLine>> {
        self.lines.lock().unwrap()
    }

    fn lock_state(&self) -> MutexGuard<'_, RenderState> {
        self.state.lock().unwrap()
    }
}

// -------------------------------------------------------------------------------------------------

/// Handle to a line which got opened in a [`Mixer`].
///
/// Line state is accessed with the line's lock held via [`Self::with`]. Closing a handle removes
/// the line from the mixer at the start of the next rendered block.
pub struct LineHandle<L: MixerLine> {
    id: usize,
    closed: Arc<AtomicBool>,
    line: Weak<Mutex<L>>,
}

impl<L: MixerLine> Clone for LineHandle<L> {
    fn clone(&self) -> Self {
        Self {
            id: self.id,
            closed: Arc::clone(&self.closed),
            line: Weak::clone(&self.line),
        }
    }
}

impl<L: MixerLine> LineHandle<L> {
    /// Unique id of the line.
    pub fn id(&self) -> usize {
        self.id
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Relaxed)
    }

    /// Run `func` with the line, holding the line's lock. Fails when the line got closed.
    pub fn with<R, F: FnOnce(&mut L) -> R>(&self, func: F) -> Result<R, Error> {
        if self.is_closed() {
            return Err(Error::LineNotFoundError(self.id));
        }
        let line = self
            .line
            .upgrade()
            .ok_or(Error::LineNotFoundError(self.id))?;
        let mut line = line.lock().unwrap();
        Ok(func(&mut *line))
    }

    /// Mark the line as closed. It stops rendering with the next block.
    pub fn close(&self) {
        if !self.closed.swap(true, Ordering::Relaxed) {
            log::debug!("Closing mixer line #{}", self.id);
        }
    }
}

// -------------------------------------------------------------------------------------------------

fn assert_no_alloc<T, F: FnOnce() -> T>(func: F) -> T {
    #[cfg(feature = "assert-allocs")]
    return assert_no_alloc::assert_no_alloc::<T, F>(func);

    #[cfg(not(feature = "assert-allocs"))]
    return func();
}

// -------------------------------------------------------------------------------------------------
