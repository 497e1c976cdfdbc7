//! Delay-attack-hold-decay-sustain-release envelope, running at control rate.

use crate::utils::timecents_to_seconds;

// -------------------------------------------------------------------------------------------------

/// Current processing stage in a [`EnvelopeGenerator`].
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum EnvelopeStage {
    #[default]
    /// Before the gate opened.
    Off,
    Delay,
    Attack,
    Hold,
    Decay,
    Sustain,
    Release,
    /// Forced fast release.
    Shutdown,
    /// After release or shutdown finished (zero level).
    End,
}

// -------------------------------------------------------------------------------------------------

/// Envelope parameters, as read from a voice's envelope cells. Times are in timecents, the
/// sustain level is in per-mille of full level. The `gate` value opens the envelope when
/// >= 0.5, releases it below 0.5 and shuts it down below -0.5.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EnvelopeParameters {
    pub delay: f64,
    pub attack: f64,
    pub hold: f64,
    pub decay: f64,
    pub sustain: f64,
    pub release: f64,
    pub shutdown: f64,
    pub gate: f64,
}

impl Default for EnvelopeParameters {
    fn default() -> Self {
        Self {
            delay: -12000.0,
            attack: -12000.0,
            hold: -12000.0,
            decay: -12000.0,
            sustain: 1000.0,
            release: -12000.0,
            shutdown: -7000.0,
            gate: 0.0,
        }
    }
}

// -------------------------------------------------------------------------------------------------

/// Level range in dB the envelope's output covers: a level of 0 is -96 dB, 1 is 0 dB.
const LEVEL_RANGE_DB: f64 = 96.0;

/// DAHDSR envelope generator, advanced once per control tick.
///
/// The output level is linear in decibels: decay, release and shutdown ramps are linear in the
/// level domain (exponential in amplitude), while the attack ramps linearly in amplitude.
#[derive(Debug, Clone, Default)]
pub struct EnvelopeGenerator {
    stage: EnvelopeStage,
    stage_time: f64,
    level: f64,
}

impl EnvelopeGenerator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn stage(&self) -> EnvelopeStage {
        self.stage
    }

    /// Current output level in range 0..=1.
    pub fn level(&self) -> f64 {
        self.level
    }

    /// True when the envelope finished its release or shutdown stage.
    pub fn is_finished(&self) -> bool {
        self.stage == EnvelopeStage::End
    }

    /// Reset to the initial state: the next tick with an open gate starts the delay stage.
    pub fn reset(&mut self) {
        self.stage = EnvelopeStage::Off;
        self.stage_time = 0.0;
        self.level = 0.0;
    }

    /// Advance the envelope by `time_step` seconds and return the new output level.
    pub fn tick(&mut self, parameters: &EnvelopeParameters, time_step: f64) -> f64 {
        // gate transitions
        if parameters.gate < -0.5 {
            if self.stage < EnvelopeStage::Shutdown {
                self.enter(EnvelopeStage::Shutdown);
            }
        } else if parameters.gate < 0.5 {
            if self.stage > EnvelopeStage::Off && self.stage < EnvelopeStage::Release {
                self.enter(EnvelopeStage::Release);
            }
        } else if self.stage == EnvelopeStage::Off {
            self.enter(EnvelopeStage::Delay);
        }

        let sustain = (parameters.sustain / 1000.0).clamp(0.0, 1.0);
        let mut remaining = time_step;
        // run through all stages which complete within this step
        loop {
            match self.stage {
                EnvelopeStage::Off | EnvelopeStage::End => {
                    self.level = 0.0;
                    break;
                }
                EnvelopeStage::Delay => {
                    let duration = timecents_to_seconds(parameters.delay);
                    if !self.advance(duration, &mut remaining) {
                        self.level = 0.0;
                        break;
                    }
                    self.enter(EnvelopeStage::Attack);
                }
                EnvelopeStage::Attack => {
                    let duration = timecents_to_seconds(parameters.attack);
                    if !self.advance(duration, &mut remaining) {
                        let amplitude = self.stage_time / duration;
                        self.level = Self::amplitude_to_level(amplitude);
                        break;
                    }
                    self.level = 1.0;
                    self.enter(EnvelopeStage::Hold);
                }
                EnvelopeStage::Hold => {
                    let duration = timecents_to_seconds(parameters.hold);
                    if !self.advance(duration, &mut remaining) {
                        self.level = 1.0;
                        break;
                    }
                    self.enter(EnvelopeStage::Decay);
                }
                EnvelopeStage::Decay => {
                    let duration = timecents_to_seconds(parameters.decay);
                    self.level = Self::ramp_down(self.level, duration, remaining);
                    if self.level <= sustain {
                        self.level = sustain;
                        self.enter(EnvelopeStage::Sustain);
                    }
                    break;
                }
                EnvelopeStage::Sustain => {
                    self.level = sustain;
                    break;
                }
                EnvelopeStage::Release | EnvelopeStage::Shutdown => {
                    let duration = if self.stage == EnvelopeStage::Release {
                        timecents_to_seconds(parameters.release)
                    } else {
                        // never slower than an ordinary release
                        timecents_to_seconds(parameters.shutdown.min(parameters.release))
                    };
                    self.level = Self::ramp_down(self.level, duration, remaining);
                    if self.level <= 0.0 {
                        self.level = 0.0;
                        self.enter(EnvelopeStage::End);
                    }
                    break;
                }
            }
        }
        self.level
    }

    fn enter(&mut self, stage: EnvelopeStage) {
        self.stage = stage;
        self.stage_time = 0.0;
    }

    /// Advance stage time within a timed stage. Returns true when the stage's duration
    /// elapsed, consuming the used part of the remaining time step.
    fn advance(&mut self, duration: f64, remaining: &mut f64) -> bool {
        let left = duration - self.stage_time;
        if left <= *remaining {
            *remaining -= left.max(0.0);
            true
        } else {
            self.stage_time += *remaining;
            *remaining = 0.0;
            false
        }
    }

    /// Full scale (1 to 0) ramps take `duration` seconds.
    fn ramp_down(level: f64, duration: f64, time_step: f64) -> f64 {
        if duration <= 0.0 {
            0.0
        } else {
            level - time_step / duration
        }
    }

    fn amplitude_to_level(amplitude: f64) -> f64 {
        if amplitude <= 0.0 {
            return 0.0;
        }
        (1.0 + 20.0 * amplitude.log10() / LEVEL_RANGE_DB).clamp(0.0, 1.0)
    }
}

// -------------------------------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::utils::assert_eq_with_epsilon;

    const TICK: f64 = 1.0 / 100.0;

    fn parameters() -> EnvelopeParameters {
        EnvelopeParameters {
            delay: -12000.0,
            attack: -1200.0, // 0.5 sec
            hold: -12000.0,
            decay: 0.0, // 1 sec
            sustain: 500.0,
            release: -1200.0, // 0.5 sec
            shutdown: -4800.0,
            gate: 1.0,
        }
    }

    #[test]
    fn runs_through_all_stages() {
        let mut env = EnvelopeGenerator::new();
        let mut params = parameters();
        assert_eq!(env.stage(), EnvelopeStage::Off);

        env.tick(&params, TICK);
        assert_eq!(env.stage(), EnvelopeStage::Attack);
        let mut last = env.level();
        for _ in 0..48 {
            let level = env.tick(&params, TICK);
            assert!(level >= last);
            last = level;
        }
        for _ in 0..4 {
            env.tick(&params, TICK);
        }
        assert!(matches!(
            env.stage(),
            EnvelopeStage::Hold | EnvelopeStage::Decay
        ));
        for _ in 0..100 {
            env.tick(&params, TICK);
        }
        assert_eq!(env.stage(), EnvelopeStage::Sustain);
        assert_eq_with_epsilon!(env.level(), 0.5, 1e-9);

        params.gate = 0.0;
        env.tick(&params, TICK);
        assert_eq!(env.stage(), EnvelopeStage::Release);
        for _ in 0..30 {
            env.tick(&params, TICK);
        }
        assert!(env.is_finished());
        assert_eq!(env.level(), 0.0);
    }

    #[test]
    fn shutdown_is_faster_than_release() {
        let mut params = parameters();
        params.attack = -12000.0;
        params.decay = -12000.0;
        params.sustain = 1000.0;

        let mut released = EnvelopeGenerator::new();
        let mut shut_down = EnvelopeGenerator::new();
        released.tick(&params, TICK);
        shut_down.tick(&params, TICK);
        assert_eq!(released.level(), 1.0);

        let mut release_params = params;
        release_params.gate = 0.0;
        let mut shutdown_params = params;
        shutdown_params.gate = -1.0;

        let mut release_ticks = 0;
        while !released.is_finished() {
            released.tick(&release_params, TICK);
            release_ticks += 1;
        }
        let mut shutdown_ticks = 0;
        while !shut_down.is_finished() {
            shut_down.tick(&shutdown_params, TICK);
            shutdown_ticks += 1;
        }
        assert!(shutdown_ticks < release_ticks);
    }

    #[test]
    fn closed_gate_keeps_envelope_off() {
        let mut env = EnvelopeGenerator::new();
        let params = EnvelopeParameters::default();
        assert_eq!(env.tick(&params, TICK), 0.0);
        assert_eq!(env.stage(), EnvelopeStage::Off);
    }
}
