//! Instruments and soundbanks: named sets of performers, selected by MIDI bank and program.

use std::{fmt, sync::Arc};

use crate::{performer::Performer, voice::graph::CompiledPerformer};

// -------------------------------------------------------------------------------------------------

pub mod emergency;

pub use emergency::emergency_soundbank;

// -------------------------------------------------------------------------------------------------

/// Bank and program number of an instrument. Percussion instruments live in a separate
/// address space and get selected by the percussion channel only.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Patch {
    pub bank: u16,
    pub program: u8,
    pub percussion: bool,
}

impl Patch {
    pub fn new(bank: u16, program: u8) -> Self {
        Self {
            bank,
            program: program & 127,
            percussion: false,
        }
    }

    pub fn percussion(bank: u16, program: u8) -> Self {
        Self {
            bank,
            program: program & 127,
            percussion: true,
        }
    }
}

impl fmt::Display for Patch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.percussion {
            write!(f, "percussion {}:{}", self.bank, self.program)
        } else {
            write!(f, "{}:{}", self.bank, self.program)
        }
    }
}

// -------------------------------------------------------------------------------------------------

/// A playable instrument: a patch and the performers (zones) which get triggered by its notes.
pub struct Instrument {
    name: String,
    patch: Patch,
    performers: Vec<Arc<CompiledPerformer>>,
}

impl Instrument {
    /// Create a new instrument, compiling the given performers for playback.
    pub fn new<S: Into<String>>(name: S, patch: Patch, performers: Vec<Performer>) -> Self {
        let performers = performers
            .into_iter()
            .map(|performer| Arc::new(CompiledPerformer::new(performer)))
            .collect();
        Self::from_compiled(name, patch, performers)
    }

    /// Create a new instrument from already compiled performers, which may be shared with
    /// other instruments.
    pub fn from_compiled<S: Into<String>>(
        name: S,
        patch: Patch,
        performers: Vec<Arc<CompiledPerformer>>,
    ) -> Self {
        let instrument = Self {
            name: name.into(),
            patch,
            performers,
        };
        let dropped_connections = instrument.dropped_connections();
        let dropped_oscillators = instrument.dropped_oscillators();
        if dropped_connections > 0 || dropped_oscillators > 0 {
            log::warn!(
                "Instrument '{}' ({}): dropped {} connections and {} oscillators",
                instrument.name,
                instrument.patch,
                dropped_connections,
                dropped_oscillators
            );
        }
        instrument
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn patch(&self) -> Patch {
        self.patch
    }

    pub fn performers(&self) -> &[Arc<CompiledPerformer>] {
        &self.performers
    }

    /// Performers which play the given key and velocity, in declaration order.
    pub fn performers_for(
        &self,
        key: u8,
        velocity: u8,
    ) -> impl Iterator<Item = &Arc<CompiledPerformer>> {
        self.performers
            .iter()
            .filter(move |performer| performer.performer().matches(key, velocity))
    }

    /// Number of connections that got dropped while compiling the performers.
    pub fn dropped_connections(&self) -> usize {
        self.performers
            .iter()
            .map(|performer| performer.graph().dropped_connections())
            .sum()
    }

    /// Number of unusable oscillators that got dropped while compiling the performers.
    pub fn dropped_oscillators(&self) -> usize {
        self.performers
            .iter()
            .map(|performer| performer.dropped_oscillators())
            .sum()
    }
}

impl fmt::Debug for Instrument {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Instrument")
            .field("name", &self.name)
            .field("patch", &self.patch)
            .field("performers", &self.performers.len())
            .finish()
    }
}

// -------------------------------------------------------------------------------------------------

/// A named collection of instruments.
#[derive(Debug, Default)]
pub struct Soundbank {
    name: String,
    instruments: Vec<Arc<Instrument>>,
}

impl Soundbank {
    pub fn new<S: Into<String>>(name: S) -> Self {
        Self {
            name: name.into(),
            instruments: Vec::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn instruments(&self) -> &[Arc<Instrument>] {
        &self.instruments
    }

    /// Add an instrument. An existing instrument with the same patch gets replaced.
    pub fn add(&mut self, instrument: Instrument) {
        let instrument = Arc::new(instrument);
        if let Some(existing) = self
            .instruments
            .iter_mut()
            .find(|existing| existing.patch() == instrument.patch())
        {
            log::debug!(
                "Replacing instrument '{}' with '{}' at patch {}",
                existing.name(),
                instrument.name(),
                instrument.patch()
            );
            *existing = instrument;
        } else {
            self.instruments.push(instrument);
        }
    }

    /// Find the instrument for the given patch. When there's no exact match, falls back to the
    /// same program in bank 0, then to the nearest program of the same kind (melodic or
    /// percussion), then to any instrument.
    pub fn instrument(&self, patch: Patch) -> Option<&Arc<Instrument>> {
        let same_kind = |instrument: &&Arc<Instrument>| {
            instrument.patch().percussion == patch.percussion
        };
        self.instruments
            .iter()
            .find(|instrument| instrument.patch() == patch)
            .or_else(|| {
                let fallback = Patch { bank: 0, ..patch };
                self.instruments
                    .iter()
                    .find(|instrument| instrument.patch() == fallback)
            })
            .or_else(|| {
                self.instruments.iter().filter(same_kind).min_by_key(|instrument| {
                    let instrument_patch = instrument.patch();
                    (
                        instrument_patch.program.abs_diff(patch.program),
                        instrument_patch.bank != 0,
                        instrument_patch.bank,
                    )
                })
            })
            .or_else(|| self.instruments.first())
    }
}

// -------------------------------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::performer::{ids, ConnectionBlock, SampleOscillator};

    fn performer(name: &str, keys: std::ops::RangeInclusive<u8>) -> Performer {
        let oscillator = SampleOscillator::new(Arc::new(vec![vec![0.5; 64]]), 44100, 60.0);
        Performer::new(name)
            .keys(keys)
            .oscillator(Arc::new(oscillator))
    }

    fn instrument(name: &str, patch: Patch) -> Instrument {
        Instrument::new(name, patch, vec![performer(name, 0..=127)])
    }

    #[test]
    fn performers_by_key() {
        let instrument = Instrument::new(
            "split",
            Patch::new(0, 0),
            vec![
                performer("low", 0..=59),
                performer("high", 60..=127),
                performer("all", 0..=127),
            ],
        );
        let names = |key| {
            instrument
                .performers_for(key, 100)
                .map(|p| p.performer().name().to_string())
                .collect::<Vec<_>>()
        };
        assert_eq!(names(40), ["low", "all"]);
        assert_eq!(names(72), ["high", "all"]);
    }

    #[test]
    fn dropped_data_is_counted() {
        let broken = SampleOscillator::new(Arc::new(vec![]), 44100, 60.0);
        let instrument = Instrument::new(
            "broken",
            Patch::new(0, 0),
            vec![performer("zone", 0..=127)
                .oscillator(Arc::new(broken))
                .connection(ConnectionBlock::constant(
                    1.0,
                    crate::performer::Identifier::new("nowhere", None, 0),
                ))
                .connection(ConnectionBlock::constant(-100.0, ids::MIXER_GAIN))],
        );
        assert_eq!(instrument.dropped_oscillators(), 1);
        assert_eq!(instrument.dropped_connections(), 1);
        // the rest still plays
        assert_eq!(instrument.performers_for(60, 64).count(), 1);
        assert_eq!(instrument.performers()[0].oscillators().len(), 1);
    }

    #[test]
    fn patch_lookup_falls_back() {
        let mut soundbank = Soundbank::new("test");
        soundbank.add(instrument("piano", Patch::new(0, 0)));
        soundbank.add(instrument("organ", Patch::new(0, 16)));
        soundbank.add(instrument("bright organ", Patch::new(8, 16)));
        soundbank.add(instrument("kit", Patch::percussion(0, 0)));

        let name = |soundbank: &Soundbank, patch| {
            soundbank.instrument(patch).map(|i| i.name().to_string())
        };
        assert_eq!(name(&soundbank, Patch::new(8, 16)).as_deref(), Some("bright organ"));
        assert_eq!(name(&soundbank, Patch::new(3, 16)).as_deref(), Some("organ"));
        assert_eq!(name(&soundbank, Patch::new(0, 14)).as_deref(), Some("organ"));
        assert_eq!(name(&soundbank, Patch::new(0, 5)).as_deref(), Some("piano"));
        assert_eq!(name(&soundbank, Patch::percussion(0, 40)).as_deref(), Some("kit"));

        soundbank.add(instrument("grand piano", Patch::new(0, 0)));
        assert_eq!(soundbank.instruments().len(), 4);
        assert_eq!(name(&soundbank, Patch::new(0, 0)).as_deref(), Some("grand piano"));

        assert!(Soundbank::new("empty").instrument(Patch::new(0, 0)).is_none());
    }
}
