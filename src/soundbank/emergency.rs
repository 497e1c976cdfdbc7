//! A small General MIDI sound set, generated from scratch with the FFT.
//!
//! Used as fallback when no soundbank got loaded. Tonal sounds are built by placing gaussian
//! peaks at harmonic positions into a spectrum, randomizing the phases and transforming it into
//! a single, seamlessly looping period. Drums are shaped noise and decaying low frequency bodies.

use std::{
    f64::consts::PI,
    sync::{Arc, LazyLock},
};

use rand::{rngs::SmallRng, Rng, SeedableRng};
use strum::{EnumIter, IntoEnumIterator};

use super::{Instrument, Patch, Soundbank};
use crate::{
    performer::{
        defaults::FILTER_OPEN_CUTOFF, ids, ConnectionBlock, LoopMode, Oscillator, Performer,
        SampleLoop, SampleOscillator, Source,
    },
    utils::dsp::fft::{Fft, FftDirection},
    voice::graph::CompiledPerformer,
    Error,
};

// -------------------------------------------------------------------------------------------------

const SAMPLE_RATE: u32 = 44100;
/// Frames before and after the loop of tonal samples.
const LOOP_GUARD: usize = 256;
/// Spectrum size of tonal sounds.
const TONAL_FFT_SIZE: usize = 32768;
/// Spectrum size of most drum sounds.
const DRUM_FFT_SIZE: usize = 16384;
const PHASE_SEED: u64 = 3049912;

/// General MIDI instrument families, eight programs each.
const FAMILIES: [&str; 16] = [
    "Piano",
    "Chromatic Percussion",
    "Organ",
    "Guitar",
    "Bass",
    "Strings",
    "Ensemble",
    "Brass",
    "Reed",
    "Pipe",
    "Synth Lead",
    "Synth Pad",
    "Synth Effects",
    "Ethnic",
    "Percussive",
    "Sound Effects",
];

static EMERGENCY_SOUNDBANK: LazyLock<Arc<Soundbank>> = LazyLock::new(|| {
    log::info!("Generating emergency soundbank...");
    match create_soundbank() {
        Ok(soundbank) => Arc::new(soundbank),
        Err(err) => {
            log::error!("Failed to generate emergency soundbank: {err}");
            Arc::new(Soundbank::new("Emergency GM sound set"))
        }
    }
});

/// The generated fallback sound set: all 128 melodic programs in bank 0, mapped onto a handful
/// of generated sounds, and a standard drum kit. Generated once on first use.
pub fn emergency_soundbank() -> Arc<Soundbank> {
    Arc::clone(&EMERGENCY_SOUNDBANK)
}

fn create_soundbank() -> Result<Soundbank, Error> {
    let mut soundbank = Soundbank::new("Emergency GM sound set");

    let kit = Drum::iter()
        .map(|drum| drum.performer())
        .collect::<Result<Vec<_>, Error>>()?;
    let mut drums = Vec::new();
    for key in 0..=127 {
        if let Some(drum) = Drum::for_key(key) {
            let performer = kit[drum as usize].clone().keys(key..=key);
            drums.push(Arc::new(CompiledPerformer::new(performer)));
        }
    }
    soundbank.add(Instrument::from_compiled(
        "Standard Kit",
        Patch::percussion(0, 0),
        drums,
    ));

    let sounds = Sound::iter()
        .map(|sound| sound.performer().map(|p| Arc::new(CompiledPerformer::new(p))))
        .collect::<Result<Vec<_>, Error>>()?;
    for program in 0..=127u8 {
        let name = format!(
            "{} {}",
            FAMILIES[program as usize / 8],
            program as usize % 8 + 1
        );
        let sound = Sound::for_program(program);
        soundbank.add(Instrument::from_compiled(
            name,
            Patch::new(0, program),
            vec![Arc::clone(&sounds[sound as usize])],
        ));
    }
    Ok(soundbank)
}

// -------------------------------------------------------------------------------------------------

/// Interleaved complex spectrum.
struct Spectrum {
    data: Vec<f64>,
}

impl Spectrum {
    fn new(size: usize) -> Self {
        Self {
            data: vec![0.0; 2 * size],
        }
    }

    fn size(&self) -> usize {
        self.data.len() / 2
    }

    /// Add a gaussian peak at (fractional) bin `mean` to the real parts of the positive
    /// frequency bins.
    fn add_peak(&mut self, mean: f64, width: f64, amplitude: f64) {
        let bins = self.size() / 2;
        let scale = amplitude / (width * (2.0 * PI).sqrt());
        // the peak is negligible beyond 10 widths
        let first = (mean - 10.0 * width).floor().max(0.0) as usize;
        let last = ((mean + 10.0 * width).ceil().max(0.0) as usize + 1).min(bins);
        for bin in first..last {
            let x = (bin as f64 - mean) / width;
            self.data[2 * bin] += scale * (-0.5 * x * x).exp();
        }
    }

    /// Set the real parts of the positive frequency bins.
    fn set_magnitudes<F: FnMut(usize) -> f64>(&mut self, mut magnitude: F) {
        let bins = self.size() / 2;
        for (bin, value) in self.data.chunks_exact_mut(2).take(bins).enumerate() {
            value[0] = magnitude(bin);
        }
    }

    /// Treat the real parts as magnitudes and give them random phases.
    fn randomize_phases(&mut self, rng: &mut SmallRng) {
        for value in self.data.chunks_exact_mut(2) {
            let phase = rng.random::<f64>() * 2.0 * PI;
            let magnitude = value[0];
            value[0] = phase.sin() * magnitude;
            value[1] = phase.cos() * magnitude;
        }
    }

    /// Inverse transform and return the real part, normalized to the given peak.
    fn into_signal(mut self, peak: f64) -> Result<Vec<f64>, Error> {
        let fft = Fft::new(self.size(), FftDirection::Inverse)?;
        fft.transform(&mut self.data)?;
        let mut signal = self.data.iter().step_by(2).copied().collect::<Vec<_>>();
        normalize(&mut signal, peak);
        Ok(signal)
    }
}

fn normalize(signal: &mut [f64], peak: f64) {
    let max = signal.iter().fold(0.0f64, |max, v| max.max(v.abs()));
    if max > 0.0 {
        let gain = peak / max;
        signal.iter_mut().for_each(|v| *v *= gain);
    }
}

fn fade_in(signal: &mut [f64], frames: usize) {
    for (frame, value) in signal.iter_mut().take(frames).enumerate() {
        *value *= frame as f64 / frames as f64;
    }
}

fn to_planar(signal: Vec<f64>) -> Arc<Vec<Vec<f32>>> {
    Arc::new(vec![signal.into_iter().map(|v| v as f32).collect()])
}

/// A forward looping sample from a spectrum whose fundamental sits at bin `base`.
fn tonal_sample(
    mut spectrum: Spectrum,
    base: f64,
    fade_in_frames: usize,
    rng: &mut SmallRng,
) -> Result<SampleOscillator, Error> {
    let size = spectrum.size();
    spectrum.randomize_phases(rng);
    let period = spectrum.into_signal(0.9)?;
    // the signal is exactly one period: extend it so the loop has guard frames on both sides
    let mut signal = period
        .iter()
        .cycle()
        .take(size + 2 * LOOP_GUARD)
        .copied()
        .collect::<Vec<_>>();
    fade_in(&mut signal, fade_in_frames);
    let frequency = base / size as f64 * SAMPLE_RATE as f64;
    let root_key = 69.0 + 12.0 * (frequency / 440.0).log2();
    Ok(
        SampleOscillator::new(to_planar(signal), SAMPLE_RATE, root_key).with_loop(SampleLoop {
            start: LOOP_GUARD,
            length: size,
            mode: LoopMode::Forward,
        }),
    )
}

/// Low body of a drum: gaussian peaks with random phases, fading out linearly.
fn drum_body(peaks: &[(f64, f64)], peak: f64, rng: &mut SmallRng) -> Result<Vec<f64>, Error> {
    let mut spectrum = Spectrum::new(DRUM_FFT_SIZE);
    for (mean, width) in peaks {
        spectrum.add_peak(*mean, *width, 1.0);
    }
    spectrum.randomize_phases(rng);
    let mut signal = spectrum.into_signal(peak)?;
    let length = signal.len() as f64;
    for (frame, value) in signal.iter_mut().enumerate() {
        *value *= 1.0 - frame as f64 / length;
    }
    Ok(signal)
}

/// Noise with the given spectral envelope, decaying exponentially by `decay` per frame.
fn drum_noise<F: Fn(usize) -> f64>(
    size: usize,
    envelope: F,
    decay: f64,
    rng: &mut SmallRng,
) -> Result<Vec<f64>, Error> {
    let mut spectrum = Spectrum::new(size);
    let mut amplitudes = SmallRng::seed_from_u64(rng.random());
    spectrum.set_magnitudes(|bin| envelope(bin) * (0.5 + amplitudes.random::<f64>()));
    spectrum.randomize_phases(rng);
    let mut signal = spectrum.into_signal(0.9)?;
    let mut gain = 1.0;
    for value in &mut signal {
        *value *= gain;
        gain *= decay;
    }
    Ok(signal)
}

/// Flat up to bin `flat_end`, then falling linearly to zero at `end`.
fn band(bin: usize, flat_end: usize, end: usize) -> f64 {
    if bin < flat_end {
        1.0
    } else if bin < end {
        1.0 - (bin - flat_end) as f64 / (end - flat_end) as f64
    } else {
        0.0
    }
}

/// Bright band with boosted low end, as used for snares, toms and sticks.
fn stick_envelope(floor: usize, boost_bins: usize) -> impl Fn(usize) -> f64 {
    move |bin| {
        if bin < floor {
            return 0.0;
        }
        let mut value = band(bin, 2048, 4096);
        if bin < boost_bins {
            let g = 1.0 - bin as f64 / boost_bins as f64;
            value *= 1.0 + 20.0 * g * g;
        }
        value
    }
}

// -------------------------------------------------------------------------------------------------

/// Envelope, filter and gain settings of a generated sound.
#[derive(Debug, Clone, Copy)]
struct Voicing {
    /// Volume envelope times in timecents, sustain level in per mille.
    attack: f64,
    decay: f64,
    sustain: f64,
    release: f64,
    /// Modulation envelope times and its amount on the filter cutoff in cents.
    mod_attack: f64,
    mod_release: f64,
    mod_to_cutoff: f64,
    /// Filter cutoff in absolute cents.
    cutoff: f64,
    /// Gain in centibels.
    gain: f64,
}

impl Default for Voicing {
    fn default() -> Self {
        Self {
            attack: -12000.0,
            decay: -12000.0,
            sustain: 1000.0,
            release: -12000.0,
            mod_attack: -12000.0,
            mod_release: -12000.0,
            mod_to_cutoff: 0.0,
            cutoff: FILTER_OPEN_CUTOFF,
            gain: 0.0,
        }
    }
}

impl Voicing {
    fn connections(&self) -> Vec<ConnectionBlock> {
        let mut blocks = vec![
            ConnectionBlock::constant(self.attack, ids::eg_param("attack", 0)),
            ConnectionBlock::constant(self.decay, ids::eg_param("decay", 0)),
            ConnectionBlock::constant(self.sustain.clamp(0.0, 1000.0), ids::eg_param("sustain", 0)),
            ConnectionBlock::constant(self.release, ids::eg_param("release", 0)),
        ];
        if self.mod_to_cutoff != 0.0 {
            blocks.extend([
                ConnectionBlock::constant(self.mod_attack, ids::eg_param("attack", 1)),
                ConnectionBlock::constant(self.mod_release, ids::eg_param("release", 1)),
                ConnectionBlock::new(Source::new(ids::eg(1)), self.mod_to_cutoff, ids::FILTER_FREQ),
            ]);
        }
        if self.cutoff < FILTER_OPEN_CUTOFF || self.mod_to_cutoff != 0.0 {
            blocks.push(ConnectionBlock::constant(self.cutoff, ids::FILTER_FREQ));
        }
        if self.gain != 0.0 {
            blocks.push(ConnectionBlock::constant(self.gain, ids::MIXER_GAIN));
        }
        blocks
    }
}

/// Connections which make all keys play the oscillator at its root pitch.
fn fixed_pitch(oscillator: &dyn Oscillator) -> [ConnectionBlock; 2] {
    [
        ConnectionBlock::new(Source::new(ids::NOTEON_KEYNUMBER), 0.0, ids::OSC_PITCH),
        ConnectionBlock::constant(oscillator.root_pitch(), ids::OSC_PITCH),
    ]
}

// -------------------------------------------------------------------------------------------------

/// Generated melodic sounds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, EnumIter)]
enum Sound {
    Piano,
    ElectricPiano,
    Organ,
    Strings,
    Bass,
    Flute,
    Brass,
}

impl Sound {
    fn for_program(program: u8) -> Self {
        match program {
            0..=3 => Self::Piano,
            4..=15 => Self::ElectricPiano,
            16..=23 => Self::Organ,
            24..=31 => Self::ElectricPiano,
            32..=39 => Self::Bass,
            40..=55 => Self::Strings,
            56..=71 => Self::Brass,
            72..=79 => Self::Flute,
            80..=87 => Self::Organ,
            88..=103 => Self::Strings,
            104..=119 => Self::ElectricPiano,
            _ => Self::Strings,
        }
    }

    fn performer(self) -> Result<Performer, Error> {
        let mut rng = SmallRng::seed_from_u64(302030201 + self as u64);
        let (name, oscillator, voicing) = match self {
            Self::Piano => {
                let base = 200.0;
                let mut amplitudes = decaying_amplitudes(30, 0.2, 0.001, 15);
                amplitudes[0] *= 2.0;
                amplitudes[4] *= 2.0;
                amplitudes[12] *= 0.9;
                amplitudes[13] *= 0.7;
                amplitudes[14..].iter_mut().for_each(|a| *a *= 0.5);
                let mut spectrum = Spectrum::new(TONAL_FFT_SIZE);
                for (i, amplitude) in amplitudes.iter().enumerate() {
                    // upper partials are wider and slightly stretched
                    let (width, amplitude) = if i > 10 {
                        (5.0, amplitude * 10.0)
                    } else {
                        (0.2, *amplitude)
                    };
                    let stretch = i.saturating_sub(5) as f64 * 7.0;
                    spectrum.add_peak(base * (i + 1) as f64 + stretch, width, amplitude);
                }
                let voicing = Voicing {
                    attack: -7000.0,
                    decay: 4000.0,
                    sustain: 0.0,
                    release: 0.0,
                    mod_attack: -6000.0,
                    mod_release: 12000.0,
                    mod_to_cutoff: -5500.0,
                    cutoff: 18000.0,
                    ..Voicing::default()
                };
                ("Grand Piano", tonal_sample(spectrum, base, 200, &mut rng)?, voicing)
            }
            Self::ElectricPiano => {
                let base = 200.0;
                let mut spectrum = Spectrum::new(TONAL_FFT_SIZE);
                for (i, amplitude) in decaying_amplitudes(40, 0.2, 0.0001, 40).iter().enumerate() {
                    let detune = 1.0 + (rng.random::<f64>() * 2.0 - 1.0) * 0.0001;
                    spectrum.add_peak(base * (i + 1) as f64 * detune, 0.05, *amplitude);
                }
                let voicing = Voicing {
                    decay: 4000.0,
                    sustain: 0.0,
                    release: 0.0,
                    mod_attack: 1200.0,
                    mod_release: 12000.0,
                    mod_to_cutoff: -9000.0,
                    cutoff: 16000.0,
                    ..Voicing::default()
                };
                ("Electric Piano", tonal_sample(spectrum, base, 10, &mut rng)?, voicing)
            }
            Self::Organ => {
                let base = 15.0;
                let mut spectrum = Spectrum::new(4096);
                for (i, amplitude) in decaying_amplitudes(12, 0.2, 0.001, 40).iter().enumerate() {
                    let amplitude = amplitude * (0.5 + 3.0 * rng.random::<f64>());
                    spectrum.add_peak(base * (i + 1) as f64, 0.01, amplitude);
                }
                let voicing = Voicing {
                    attack: -6000.0,
                    decay: 4000.0,
                    release: -1000.0,
                    cutoff: 9500.0,
                    ..Voicing::default()
                };
                ("Organ", tonal_sample(spectrum, base, 10, &mut rng)?, voicing)
            }
            Self::Strings => {
                let base = 200.0;
                let mut spectrum = Spectrum::new(TONAL_FFT_SIZE);
                for (i, amplitude) in decaying_amplitudes(40, 0.2, 0.001, 40).iter().enumerate() {
                    let width = 2.0 + 78.0 * (i as f64 / 40.0);
                    spectrum.add_peak(base * (i + 1) as f64, width, *amplitude);
                }
                let voicing = Voicing {
                    attack: -5000.0,
                    decay: 4000.0,
                    release: 1000.0,
                    cutoff: 9500.0,
                    ..Voicing::default()
                };
                ("Strings", tonal_sample(spectrum, base, 10, &mut rng)?, voicing)
            }
            Self::Bass => {
                let base = 200.0;
                let mut amplitudes = decaying_amplitudes(25, 0.2, 0.02, 25);
                amplitudes[0] *= 8.0;
                amplitudes[1] *= 4.0;
                amplitudes[3] *= 8.0;
                amplitudes[5] *= 8.0;
                let mut spectrum = Spectrum::new(TONAL_FFT_SIZE);
                for (i, amplitude) in amplitudes.iter().enumerate() {
                    spectrum.add_peak(base * (i + 1) as f64, 0.05, *amplitude);
                }
                let voicing = Voicing {
                    decay: 4000.0,
                    sustain: 0.0,
                    release: 0.0,
                    mod_attack: -3000.0,
                    mod_release: 12000.0,
                    mod_to_cutoff: -5000.0,
                    cutoff: 11000.0,
                    gain: 40.0,
                    ..Voicing::default()
                };
                ("Bass", tonal_sample(spectrum, base, 10, &mut rng)?, voicing)
            }
            Self::Flute => {
                let base = 120.0;
                // (harmonic, width, amplitude)
                const PEAKS: [(f64, f64, f64); 17] = [
                    (1.0, 0.001, 0.5),
                    (2.0, 0.001, 0.5),
                    (3.0, 0.001, 0.5),
                    (4.0, 0.01, 0.5),
                    (5.0, 0.001, 0.05),
                    (6.0, 0.001, 0.06),
                    (7.0, 0.001, 0.04),
                    (8.0, 0.005, 0.06),
                    (9.0, 0.005, 0.06),
                    (10.0, 0.01, 0.1),
                    (11.0, 0.08, 0.7),
                    (12.0, 0.08, 0.6),
                    (13.0, 0.08, 0.6),
                    (14.0, 0.08, 0.6),
                    (15.0, 0.08, 0.5),
                    (16.0, 0.08, 0.5),
                    (17.0, 0.08, 0.2),
                ];
                const BREATH: [(f64, f64, f64); 3] =
                    [(4.0, 100.0, 120.0), (6.0, 100.0, 40.0), (8.0, 100.0, 80.0)];
                let mut spectrum = Spectrum::new(TONAL_FFT_SIZE);
                for (harmonic, width, amplitude) in PEAKS.iter().chain(&BREATH) {
                    spectrum.add_peak(base * harmonic, *width, *amplitude);
                }
                for harmonic in 1..=17 {
                    let width = match harmonic {
                        1..=5 => 10.0,
                        6..=9 => 20.0,
                        _ => 30.0,
                    };
                    let amplitude = match harmonic {
                        6..=8 | 11 | 12 => 9.0,
                        15 | 16 => 7.0,
                        17 => 6.0,
                        _ => 8.0,
                    };
                    spectrum.add_peak(base * harmonic as f64, width, amplitude);
                }
                let voicing = Voicing {
                    attack: -6000.0,
                    decay: 4000.0,
                    release: -1000.0,
                    cutoff: 9500.0,
                    ..Voicing::default()
                };
                ("Flute", tonal_sample(spectrum, base, 10, &mut rng)?, voicing)
            }
            Self::Brass => {
                let base = 120.0;
                let mut amplitudes = decaying_amplitudes(30, 0.5, 0.005, 30);
                amplitudes[0] *= 0.8;
                amplitudes[1] *= 0.9;
                let mut spectrum = Spectrum::new(TONAL_FFT_SIZE);
                for (i, amplitude) in amplitudes.iter().enumerate() {
                    let width = 5.0 + 6.0 * i as f64;
                    spectrum.add_peak(base * (i + 1) as f64, 0.1 * width, amplitude * width);
                }
                spectrum.add_peak(base * 6.0, 300.0, 2.0);
                let voicing = Voicing {
                    attack: -9200.0,
                    decay: 4000.0,
                    release: -1000.0,
                    mod_attack: -3000.0,
                    mod_release: 12000.0,
                    mod_to_cutoff: 5000.0,
                    cutoff: 4500.0,
                    ..Voicing::default()
                };
                ("Brass", tonal_sample(spectrum, base, 10, &mut rng)?, voicing)
            }
        };
        Ok(Performer::new(name)
            .oscillator(Arc::new(oscillator))
            .connections(voicing.connections()))
    }
}

/// `count` amplitudes falling exponentially from `start`, reaching `end` after `steps` steps.
fn decaying_amplitudes(count: usize, start: f64, end: f64, steps: usize) -> Vec<f64> {
    let step = (end / start).powf(1.0 / steps as f64);
    std::iter::successors(Some(start), |a| Some(a * step))
        .take(count)
        .collect()
}

// -------------------------------------------------------------------------------------------------

/// Generated drum sounds of the standard kit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, EnumIter)]
enum Drum {
    BassDrum,
    SnareDrum,
    Tom,
    ClosedHiHat,
    OpenHiHat,
    CrashCymbal,
    SideStick,
}

impl Drum {
    /// Exclusive class of the hi-hats: an open hi-hat gets choked by a closed one.
    const HI_HAT_CLASS: u32 = 1;

    fn for_key(key: u8) -> Option<Self> {
        match key {
            35 | 36 => Some(Self::BassDrum),
            38 | 40 => Some(Self::SnareDrum),
            41 | 43 | 45 | 47 | 48 | 50 => Some(Self::Tom),
            42 | 44 => Some(Self::ClosedHiHat),
            46 => Some(Self::OpenHiHat),
            49 | 51 | 52 | 55 | 57 | 59 => Some(Self::CrashCymbal),
            37 | 39 | 53 | 54 | 56 | 58 | 60..=81 => Some(Self::SideStick),
            _ => None,
        }
    }

    fn performer(self) -> Result<Performer, Error> {
        let mut rng = SmallRng::seed_from_u64(PHASE_SEED + self as u64);
        let one_shot = Voicing {
            release: 12000.0,
            ..Voicing::default()
        };
        let (name, oscillator, voicing, class) = match self {
            Self::BassDrum => {
                let mut body = drum_body(&[(10.0, 2.0), (17.2, 2.0)], 0.9, &mut rng)?;
                let click = drum_noise(
                    4096,
                    |bin| {
                        if bin < 5 {
                            0.0
                        } else if bin < 256 {
                            10.0 * bin as f64 / 256.0
                        } else {
                            4.0 * band(bin, 512, 1024)
                        }
                    },
                    0.999,
                    &mut rng,
                )?;
                body.iter_mut().zip(&click).for_each(|(b, c)| *b += c * 0.5);
                fade_in(&mut body, 5);
                let voicing = Voicing {
                    gain: 40.0,
                    ..one_shot
                };
                ("Bass Drum", drum_sample(body, 60.0), voicing, 0)
            }
            Self::SnareDrum => {
                let mut body = drum_body(&[(24.0, 0.5)], 0.5, &mut rng)?;
                let rattle =
                    drum_noise(DRUM_FFT_SIZE, stick_envelope(12, 150), 0.9998, &mut rng)?;
                body.iter_mut().zip(&rattle).for_each(|(b, r)| *b += r);
                fade_in(&mut body, 5);
                let voicing = Voicing {
                    gain: 40.0,
                    ..one_shot
                };
                ("Snare Drum", drum_sample(body, 60.0), voicing, 0)
            }
            Self::Tom => {
                let mut body = drum_body(&[(30.0, 0.5)], 0.8, &mut rng)?;
                let attack =
                    drum_noise(DRUM_FFT_SIZE, stick_envelope(15, 100), 0.9996, &mut rng)?;
                body.iter_mut().zip(&attack).for_each(|(b, a)| *b += a * 0.5);
                fade_in(&mut body, 5);
                normalize(&mut body, 0.99);
                let voicing = Voicing {
                    gain: 40.0,
                    ..one_shot
                };
                // toms are tuned: keys follow the pitch
                ("Tom", drum_sample(body, 50.0), voicing, 0)
            }
            Self::ClosedHiHat => {
                let mut noise = drum_noise(
                    DRUM_FFT_SIZE,
                    |bin| {
                        if bin < 1024 {
                            0.2 + 0.8 * bin as f64 / 1024.0
                        } else {
                            band(bin, 2048, 4096)
                        }
                    },
                    0.9996,
                    &mut rng,
                )?;
                fade_in(&mut noise, 5);
                (
                    "Closed Hi-Hat",
                    drum_sample(noise, 60.0),
                    one_shot,
                    Self::HI_HAT_CLASS,
                )
            }
            Self::OpenHiHat => {
                let oscillator = cymbal_sample(4096, &mut rng)?;
                let voicing = Voicing {
                    decay: 1500.0,
                    sustain: 0.0,
                    release: 1500.0,
                    ..Voicing::default()
                };
                ("Open Hi-Hat", oscillator, voicing, Self::HI_HAT_CLASS)
            }
            Self::CrashCymbal => {
                let oscillator = cymbal_sample(512, &mut rng)?;
                let voicing = Voicing {
                    decay: 1800.0,
                    sustain: 0.0,
                    release: 1800.0,
                    ..Voicing::default()
                };
                ("Crash Cymbal", oscillator, voicing, 0)
            }
            Self::SideStick => {
                let mut noise =
                    drum_noise(DRUM_FFT_SIZE, stick_envelope(15, 100), 0.9996, &mut rng)?;
                fade_in(&mut noise, 10);
                let voicing = Voicing {
                    gain: 20.0,
                    ..one_shot
                };
                ("Side Stick", drum_sample(noise, 60.0), voicing, 0)
            }
        };
        let mut performer = Performer::new(name)
            .exclusive_class(class)
            .connections(voicing.connections());
        if self != Self::Tom {
            performer = performer.connections(fixed_pitch(&oscillator));
        }
        Ok(performer.oscillator(Arc::new(oscillator)))
    }
}

/// One shot drum sample.
fn drum_sample(signal: Vec<f64>, root_key: f64) -> SampleOscillator {
    SampleOscillator::new(to_planar(signal), SAMPLE_RATE, root_key)
}

/// Looped metallic noise with magnitudes rising up to bin `ramp_bins`.
fn cymbal_sample(ramp_bins: usize, rng: &mut SmallRng) -> Result<SampleOscillator, Error> {
    let mut spectrum = Spectrum::new(DRUM_FFT_SIZE);
    let mut amplitudes = SmallRng::seed_from_u64(rng.random());
    spectrum.set_magnitudes(|bin| {
        if bin < ramp_bins {
            bin as f64 / ramp_bins as f64
        } else {
            2.0 * (amplitudes.random::<f64>() - 0.5)
        }
    });
    tonal_sample(spectrum, 1000.0, 5, rng)
}

// -------------------------------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::performer::ids;

    #[test]
    fn tonal_samples_loop_one_period() -> Result<(), Box<dyn std::error::Error>> {
        let mut spectrum = Spectrum::new(1024);
        spectrum.add_peak(8.0, 0.5, 1.0);
        let mut rng = SmallRng::seed_from_u64(1);
        let oscillator = tonal_sample(spectrum, 8.0, 10, &mut rng)?;
        assert_eq!(oscillator.frame_count(), 1024 + 2 * LOOP_GUARD);
        let sample_loop = oscillator.sample_loop().ok_or("missing loop")?;
        assert_eq!((sample_loop.start, sample_loop.length), (LOOP_GUARD, 1024));
        assert_eq!(sample_loop.mode, LoopMode::Forward);
        // bin 8 of 1024 at 44.1 kHz is ~344.5 Hz
        let expected_root = 69.0 + 12.0 * (8.0 / 1024.0 * 44100.0 / 440.0f64).log2();
        assert!((oscillator.root_pitch() - expected_root * 100.0).abs() < 1e-9);

        // read the sample's data through a stream: loop end continues seamlessly
        let mut stream = oscillator.open(44100)?;
        let mut output = vec![vec![0.0; 1024 + 2 * LOOP_GUARD]];
        let frames = output[0].len();
        assert_eq!(stream.read(&mut output, 0, frames), frames);
        let data = &output[0];
        for frame in LOOP_GUARD..LOOP_GUARD + 64 {
            assert_eq!(data[frame], data[frame + 1024]);
        }
        let peak = data.iter().fold(0.0f32, |max, v| max.max(v.abs()));
        assert!((peak - 0.9).abs() < 1e-4);
        Ok(())
    }

    #[test]
    fn amplitudes_decay_exponentially() {
        let amplitudes = decaying_amplitudes(5, 1.0, 0.01, 2);
        assert_eq!(amplitudes.len(), 5);
        assert!((amplitudes[2] - 0.01).abs() < 1e-12);
        assert!((amplitudes[4] - 0.0001).abs() < 1e-12);
    }

    #[test]
    fn soundbank_covers_general_midi() {
        let soundbank = emergency_soundbank();
        // 128 melodic programs and one kit
        assert_eq!(soundbank.instruments().len(), 129);
        for program in 0..=127 {
            let instrument = soundbank
                .instrument(Patch::new(0, program))
                .expect("missing program");
            assert_eq!(instrument.patch(), Patch::new(0, program));
            assert_eq!(instrument.performers_for(60, 100).count(), 1);
            assert_eq!(instrument.dropped_connections(), 0);
        }

        let kit = soundbank
            .instrument(Patch::percussion(0, 0))
            .expect("missing kit");
        assert_eq!(kit.performers_for(35, 100).count(), 1);
        assert_eq!(kit.performers_for(20, 100).count(), 0);
        let class = |key| {
            kit.performers_for(key, 100)
                .map(|p| p.performer().exclusive_class_id())
                .next()
        };
        assert_eq!(class(42), Some(Drum::HI_HAT_CLASS));
        assert_eq!(class(46), Some(Drum::HI_HAT_CLASS));
        assert_eq!(class(38), Some(0));
    }

    #[test]
    fn drums_play_at_fixed_pitch() {
        let soundbank = emergency_soundbank();
        let kit = soundbank
            .instrument(Patch::percussion(0, 0))
            .expect("missing kit");
        let snare = kit.performers_for(38, 100).next().expect("missing snare");
        let connections = snare.performer().merged_connections();
        let key_to_pitch = connections
            .iter()
            .find(|block| {
                block.destination().identifier == ids::OSC_PITCH
                    && block
                        .sources()
                        .first()
                        .is_some_and(|source| source.identifier == ids::NOTEON_KEYNUMBER)
            })
            .map(|block| block.scale());
        assert_eq!(key_to_pitch, Some(0.0));

        let tom = kit.performers_for(45, 100).next().expect("missing tom");
        assert_eq!(tom.oscillators()[0].root_pitch(), 5000.0);
    }
}
