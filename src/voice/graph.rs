//! Compiled, index based form of a performer's connection set, and the per voice state it
//! evaluates into.
//!
//! Identifiers get resolved once at compile time into typed cell indices and source references,
//! and connections get sorted into trigger buckets, so events only re-evaluate the connections
//! that actually depend on them.

use std::{collections::HashMap, fmt, sync::Arc};

use crate::{
    performer::{objects, ConnectionSet, Identifier, Oscillator, Performer, Transform},
    synth::channel::ChannelControls,
};

// -------------------------------------------------------------------------------------------------

/// Number of envelope generators per voice.
pub const EG_COUNT: usize = 2;
/// Number of LFOs per voice.
pub const LFO_COUNT: usize = 2;

const EG_BASE: u8 = 12;
const EG_CELLS: u8 = 9;
const LFO_BASE: u8 = EG_BASE + EG_CELLS * EG_COUNT as u8;
const LFO_CELLS: u8 = 3;

/// Total number of value cells in a voice.
pub const CELL_COUNT: usize = (LFO_BASE + LFO_CELLS * LFO_COUNT as u8) as usize;

/// Envelope generator cells.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EgCell {
    Output = 0,
    On,
    Delay,
    Attack,
    Hold,
    Decay,
    Sustain,
    Release,
    Shutdown,
}

/// LFO cells.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LfoCell {
    Output = 0,
    Delay,
    Freq,
}

/// Typed index of a value cell in a voice.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct CellId(u8);

impl CellId {
    pub const KEYNUMBER: Self = Self(0);
    pub const VELOCITY: Self = Self(1);
    pub const ON: Self = Self(2);
    pub const OSC_PITCH: Self = Self(3);
    pub const FILTER_TYPE: Self = Self(4);
    pub const FILTER_FREQ: Self = Self(5);
    pub const FILTER_Q: Self = Self(6);
    pub const GAIN: Self = Self(7);
    pub const PAN: Self = Self(8);
    pub const BALANCE: Self = Self(9);
    pub const REVERB: Self = Self(10);
    pub const CHORUS: Self = Self(11);

    pub const fn eg(instance: usize, cell: EgCell) -> Self {
        Self(EG_BASE + instance as u8 * EG_CELLS + cell as u8)
    }

    pub const fn lfo(instance: usize, cell: LfoCell) -> Self {
        Self(LFO_BASE + instance as u8 * LFO_CELLS + cell as u8)
    }

    #[inline]
    pub const fn index(self) -> usize {
        self.0 as usize
    }

    /// Input cells are written by the voice, never by connections.
    fn is_input(self) -> bool {
        matches!(self, Self::ON)
            || (0..EG_COUNT).any(|i| self == Self::eg(i, EgCell::Output))
            || (0..LFO_COUNT).any(|i| self == Self::lfo(i, LfoCell::Output))
    }
}

/// Resolved connection source.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SourceRef {
    Cell(CellId),
    Controller(u8),
    Rpn(u16),
    Nrpn(u16),
    PitchBend,
    ChannelPressure,
    PolyPressure,
}

impl SourceRef {
    #[inline]
    fn value(self, cells: &[f64; CELL_COUNT], controls: &ChannelControls, key: u8) -> f64 {
        match self {
            Self::Cell(cell) => cells[cell.index()],
            Self::Controller(number) => controls.controller(number),
            Self::Rpn(number) => controls.rpn(number),
            Self::Nrpn(number) => controls.nrpn(number),
            Self::PitchBend => controls.pitch_bend(),
            Self::ChannelPressure => controls.channel_pressure(),
            Self::PolyPressure => controls.poly_pressure(key),
        }
    }
}

fn parse_number<T: std::str::FromStr>(variable: Option<&str>) -> Option<T> {
    variable.and_then(|v| v.parse().ok())
}

fn eg_cell(variable: Option<&str>) -> Option<EgCell> {
    Some(match variable {
        None | Some("output") => EgCell::Output,
        Some("on") => EgCell::On,
        Some("delay") => EgCell::Delay,
        Some("attack") => EgCell::Attack,
        Some("hold") => EgCell::Hold,
        Some("decay") => EgCell::Decay,
        Some("sustain") => EgCell::Sustain,
        Some("release") => EgCell::Release,
        Some("shutdown") => EgCell::Shutdown,
        _ => return None,
    })
}

fn lfo_cell(variable: Option<&str>) -> Option<LfoCell> {
    Some(match variable {
        None | Some("output") => LfoCell::Output,
        Some("delay") => LfoCell::Delay,
        Some("freq") => LfoCell::Freq,
        _ => return None,
    })
}

/// Resolve an identifier to a voice cell.
pub fn resolve_cell(identifier: &Identifier) -> Option<CellId> {
    let variable = identifier.variable();
    let instance = identifier.instance() as usize;
    match identifier.object() {
        objects::NOTEON => match variable {
            Some("keynumber") => Some(CellId::KEYNUMBER),
            Some("velocity") => Some(CellId::VELOCITY),
            Some("on") => Some(CellId::ON),
            _ => None,
        },
        objects::OSC => match variable {
            Some("pitch") => Some(CellId::OSC_PITCH),
            _ => None,
        },
        objects::FILTER => match variable {
            Some("type") => Some(CellId::FILTER_TYPE),
            Some("freq") => Some(CellId::FILTER_FREQ),
            Some("q") => Some(CellId::FILTER_Q),
            _ => None,
        },
        objects::MIXER => match variable {
            Some("gain") => Some(CellId::GAIN),
            Some("pan") => Some(CellId::PAN),
            Some("balance") => Some(CellId::BALANCE),
            Some("reverb") => Some(CellId::REVERB),
            Some("chorus") => Some(CellId::CHORUS),
            _ => None,
        },
        objects::EG if instance < EG_COUNT => {
            eg_cell(variable).map(|cell| CellId::eg(instance, cell))
        }
        objects::LFO if instance < LFO_COUNT => {
            lfo_cell(variable).map(|cell| CellId::lfo(instance, cell))
        }
        _ => None,
    }
}

/// Resolve a source identifier. Sources may be MIDI values or any voice cell.
pub fn resolve_source(identifier: &Identifier) -> Option<SourceRef> {
    let variable = identifier.variable();
    match identifier.object() {
        objects::MIDI => match variable {
            Some("pitch") => Some(SourceRef::PitchBend),
            Some("channel_pressure") => Some(SourceRef::ChannelPressure),
            Some("poly_pressure") => Some(SourceRef::PolyPressure),
            _ => None,
        },
        objects::MIDI_CC => parse_number::<u8>(variable)
            .filter(|number| *number < 128)
            .map(SourceRef::Controller),
        objects::MIDI_RPN => parse_number(variable).map(SourceRef::Rpn),
        objects::MIDI_NRPN => parse_number(variable).map(SourceRef::Nrpn),
        _ => resolve_cell(identifier).map(SourceRef::Cell),
    }
}

/// Resolve a destination identifier. Input cells can't be connection destinations.
pub fn resolve_destination(identifier: &Identifier) -> Option<CellId> {
    resolve_cell(identifier).filter(|cell| !cell.is_input())
}

// -------------------------------------------------------------------------------------------------

/// Events which re-evaluate a subset of a voice's connections.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Trigger {
    /// The note on gate changed (note off, shutdown).
    Gate,
    /// The key number or velocity input changed (portamento).
    Keys,
    /// A control tick: envelopes and LFOs advanced.
    Control,
    Controller(u8),
    Rpn(u16),
    Nrpn(u16),
    PitchBend,
    ChannelPressure,
    PolyPressure,
}

#[derive(Clone, Debug)]
struct CompiledSource {
    source: SourceRef,
    transform: Option<Transform>,
}

#[derive(Clone, Debug)]
struct CompiledConnection {
    sources: Vec<CompiledSource>,
    scale: f64,
    destination: CellId,
    transform: Option<Transform>,
}

impl CompiledConnection {
    fn reads(&self, source: SourceRef) -> bool {
        self.sources.iter().any(|compiled| compiled.source == source)
    }

    #[inline]
    fn value(&self, cells: &[f64; CELL_COUNT], controls: &ChannelControls, key: u8) -> f64 {
        let mut value = self.scale;
        for source in &self.sources {
            let mut input = source.source.value(cells, controls, key);
            if let Some(transform) = &source.transform {
                input = transform.apply(input);
            }
            value *= input;
            if value == 0.0 {
                break;
            }
        }
        if let Some(transform) = &self.transform {
            value = transform.apply(value);
        }
        value
    }
}

/// Order connections so that connections reading a destination cell come after all connections
/// writing it. Keeps the given order otherwise. Cycles get broken in the given order.
fn dependency_order(connections: Vec<CompiledConnection>) -> Vec<CompiledConnection> {
    let count = connections.len();
    let mut pending = connections.into_iter().map(Some).collect::<Vec<_>>();
    let mut ordered = Vec::with_capacity(count);
    for _ in 0..count {
        let waits = |index: usize, connection: &CompiledConnection| {
            pending.iter().enumerate().any(|(other, writer)| {
                other != index
                    && writer
                        .as_ref()
                        .is_some_and(|writer| connection.reads(SourceRef::Cell(writer.destination)))
            })
        };
        let ready = (0..count).find(|index| {
            pending[*index]
                .as_ref()
                .is_some_and(|connection| !waits(*index, connection))
        });
        let next = ready.or_else(|| (0..count).find(|index| pending[*index].is_some()));
        if let Some(connection) = next.and_then(|index| pending[index].take()) {
            ordered.push(connection);
        }
    }
    ordered
}

/// Live values of a voice's cells plus the last contribution of every connection.
///
/// Invariant: every destination cell equals the sum of the last contributions of the connections
/// targeting it. Input cells (gate, envelope and LFO outputs, non forced key and velocity) are
/// written by the voice.
#[derive(Clone, Debug)]
pub struct GraphState {
    cells: [f64; CELL_COUNT],
    last: Vec<f64>,
}

impl Default for GraphState {
    fn default() -> Self {
        Self::new()
    }
}

impl GraphState {
    pub fn new() -> Self {
        Self {
            cells: [0.0; CELL_COUNT],
            last: Vec::new(),
        }
    }

    /// Preallocate contribution slots for graphs with up to `connections` connections.
    pub fn with_capacity(connections: usize) -> Self {
        Self {
            cells: [0.0; CELL_COUNT],
            last: Vec::with_capacity(connections),
        }
    }

    #[inline]
    pub fn cell(&self, cell: CellId) -> f64 {
        self.cells[cell.index()]
    }

    /// Set an input cell. Call [`ConnectionGraph::update`] afterwards to propagate the change.
    #[inline]
    pub fn set_input(&mut self, cell: CellId, value: f64) {
        self.cells[cell.index()] = value;
    }

    pub fn cells(&self) -> &[f64; CELL_COUNT] {
        &self.cells
    }
}

/// A performer's merged connection set, compiled for evaluation in voices.
#[derive(Clone, Debug, Default)]
pub struct ConnectionGraph {
    connections: Vec<CompiledConnection>,
    destinations: Vec<CellId>,
    gate: Vec<usize>,
    keys: Vec<usize>,
    control: Vec<usize>,
    controllers: Vec<Vec<usize>>,
    rpn: HashMap<u16, Vec<usize>>,
    nrpn: HashMap<u16, Vec<usize>>,
    pitch_bend: Vec<usize>,
    channel_pressure: Vec<usize>,
    poly_pressure: Vec<usize>,
    forced_keynumber: bool,
    forced_velocity: bool,
    dropped: usize,
}

impl ConnectionGraph {
    /// Compile a connection set. Connections with unresolvable endpoints are dropped.
    pub fn compile(set: &ConnectionSet) -> Self {
        let mut graph = Self {
            controllers: vec![Vec::new(); 128],
            ..Self::default()
        };

        // connections which force key or velocity go first
        let (noteon, others): (Vec<_>, Vec<_>) = set
            .iter()
            .partition(|block| block.destination().identifier.object() == objects::NOTEON);

        let mut compiled = Vec::with_capacity(set.len());
        for block in noteon.into_iter().chain(others) {
            let destination = &block.destination().identifier;
            let Some(cell) = resolve_destination(destination) else {
                log::warn!("Dropping connection with unknown destination '{destination}'");
                graph.dropped += 1;
                continue;
            };
            let mut sources = Vec::with_capacity(block.sources().len());
            for source in block.sources() {
                match resolve_source(&source.identifier) {
                    Some(resolved) => sources.push(CompiledSource {
                        source: resolved,
                        transform: (!source.transform.is_unnecessary())
                            .then_some(source.transform),
                    }),
                    None => {
                        log::warn!(
                            "Dropping connection with unknown source '{}'",
                            source.identifier
                        );
                        break;
                    }
                }
            }
            if sources.len() != block.sources().len() {
                graph.dropped += 1;
                continue;
            }
            let transform = block.destination().transform;
            compiled.push(CompiledConnection {
                sources,
                scale: block.scale(),
                destination: cell,
                transform: (!transform.is_unnecessary()).then_some(transform),
            });
        }
        for connection in dependency_order(compiled) {
            graph.push(connection);
        }
        graph.add_dependents();
        graph
    }

    /// Compile the performer's connections merged over the default connections.
    pub fn from_performer(performer: &Performer) -> Self {
        Self::compile(&performer.merged_connections())
    }

    fn push(&mut self, connection: CompiledConnection) {
        let index = self.connections.len();
        if connection.destination == CellId::KEYNUMBER {
            self.forced_keynumber = true;
        } else if connection.destination == CellId::VELOCITY {
            self.forced_velocity = true;
        }
        if !self.destinations.contains(&connection.destination) {
            self.destinations.push(connection.destination);
        }
        fn add(bucket: &mut Vec<usize>, index: usize) {
            if bucket.last() != Some(&index) {
                bucket.push(index);
            }
        }
        for source in &connection.sources {
            match source.source {
                SourceRef::Cell(CellId::ON) => add(&mut self.gate, index),
                SourceRef::Cell(CellId::KEYNUMBER | CellId::VELOCITY) => {
                    add(&mut self.keys, index)
                }
                SourceRef::Cell(_) => add(&mut self.control, index),
                SourceRef::Controller(number) => {
                    add(&mut self.controllers[number as usize], index)
                }
                SourceRef::Rpn(number) => add(self.rpn.entry(number).or_default(), index),
                SourceRef::Nrpn(number) => add(self.nrpn.entry(number).or_default(), index),
                SourceRef::PitchBend => add(&mut self.pitch_bend, index),
                SourceRef::ChannelPressure => add(&mut self.channel_pressure, index),
                SourceRef::PolyPressure => add(&mut self.poly_pressure, index),
            }
        }
        self.connections.push(connection);
    }

    /// Extend every bucket with the connections which read cells the bucket writes, so that
    /// e.g. a controller driving the forced key number also updates everything reading the key.
    fn add_dependents(&mut self) {
        let connections = &self.connections;
        let extend = |bucket: &mut Vec<usize>| {
            let mut next = 0;
            while next < bucket.len() {
                let written = SourceRef::Cell(connections[bucket[next]].destination);
                for (index, connection) in connections.iter().enumerate() {
                    if connection.reads(written) && !bucket.contains(&index) {
                        bucket.push(index);
                    }
                }
                next += 1;
            }
            // connections are in dependency order
            bucket.sort_unstable();
        };
        extend(&mut self.gate);
        extend(&mut self.keys);
        extend(&mut self.control);
        self.controllers.iter_mut().for_each(&extend);
        self.rpn.values_mut().for_each(&extend);
        self.nrpn.values_mut().for_each(&extend);
        extend(&mut self.pitch_bend);
        extend(&mut self.channel_pressure);
        extend(&mut self.poly_pressure);
    }

    /// Number of compiled connections.
    pub fn len(&self) -> usize {
        self.connections.len()
    }
    pub fn is_empty(&self) -> bool {
        self.connections.is_empty()
    }

    /// Number of connections dropped at compile time because of unresolvable endpoints.
    pub fn dropped_connections(&self) -> usize {
        self.dropped
    }

    /// True when connections set the key number instead of the played key.
    pub fn forces_keynumber(&self) -> bool {
        self.forced_keynumber
    }
    /// True when connections set the velocity instead of the played velocity.
    pub fn forces_velocity(&self) -> bool {
        self.forced_velocity
    }

    /// Reset all destination cells and contributions, then evaluate every connection once.
    /// Input cells must be set before.
    pub fn evaluate_all(&self, state: &mut GraphState, controls: &ChannelControls, key: u8) {
        for cell in &self.destinations {
            state.cells[cell.index()] = 0.0;
        }
        state.last.clear();
        state.last.resize(self.connections.len(), 0.0);
        for index in 0..self.connections.len() {
            self.evaluate(index, state, controls, key);
        }
    }

    /// Re-evaluate the connections depending on the given trigger.
    pub fn update(
        &self,
        trigger: Trigger,
        state: &mut GraphState,
        controls: &ChannelControls,
        key: u8,
    ) {
        let bucket = match trigger {
            Trigger::Gate => &self.gate,
            Trigger::Keys => &self.keys,
            Trigger::Control => &self.control,
            Trigger::Controller(number) => match self.controllers.get(number as usize) {
                Some(bucket) => bucket,
                None => return,
            },
            Trigger::Rpn(number) => match self.rpn.get(&number) {
                Some(bucket) => bucket,
                None => return,
            },
            Trigger::Nrpn(number) => match self.nrpn.get(&number) {
                Some(bucket) => bucket,
                None => return,
            },
            Trigger::PitchBend => &self.pitch_bend,
            Trigger::ChannelPressure => &self.channel_pressure,
            Trigger::PolyPressure => &self.poly_pressure,
        };
        for index in bucket {
            self.evaluate(*index, state, controls, key);
        }
    }

    /// Number of connections the given trigger re-evaluates.
    pub fn bucket_len(&self, trigger: Trigger) -> usize {
        match trigger {
            Trigger::Gate => self.gate.len(),
            Trigger::Keys => self.keys.len(),
            Trigger::Control => self.control.len(),
            Trigger::Controller(number) => {
                self.controllers.get(number as usize).map_or(0, Vec::len)
            }
            Trigger::Rpn(number) => self.rpn.get(&number).map_or(0, Vec::len),
            Trigger::Nrpn(number) => self.nrpn.get(&number).map_or(0, Vec::len),
            Trigger::PitchBend => self.pitch_bend.len(),
            Trigger::ChannelPressure => self.channel_pressure.len(),
            Trigger::PolyPressure => self.poly_pressure.len(),
        }
    }

    #[inline]
    fn evaluate(&self, index: usize, state: &mut GraphState, controls: &ChannelControls, key: u8) {
        let connection = &self.connections[index];
        let value = connection.value(&state.cells, controls, key);
        let last = &mut state.last[index];
        state.cells[connection.destination.index()] += value - *last;
        *last = value;
    }
}

// -------------------------------------------------------------------------------------------------

/// A performer prepared for playback: its compiled connection graph and its usable oscillators.
/// Shared by all voices playing the performer.
pub struct CompiledPerformer {
    performer: Performer,
    graph: ConnectionGraph,
    oscillators: Vec<Arc<dyn Oscillator>>,
    dropped_oscillators: usize,
}

impl CompiledPerformer {
    pub fn new(performer: Performer) -> Self {
        let graph = ConnectionGraph::from_performer(&performer);
        let mut dropped_oscillators = 0;
        let oscillators = performer
            .oscillator_list()
            .iter()
            .filter(|oscillator| {
                let usable = oscillator.channel_count() > 0 && oscillator.sample_rate() > 0;
                if !usable {
                    log::warn!(
                        "Dropping unusable oscillator of performer '{}'",
                        performer.name()
                    );
                    dropped_oscillators += 1;
                }
                usable
            })
            .cloned()
            .collect();
        Self {
            performer,
            graph,
            oscillators,
            dropped_oscillators,
        }
    }

    pub fn performer(&self) -> &Performer {
        &self.performer
    }
    pub fn graph(&self) -> &ConnectionGraph {
        &self.graph
    }
    pub fn oscillators(&self) -> &[Arc<dyn Oscillator>] {
        &self.oscillators
    }
    /// Number of oscillators without channels or sample rate which got dropped.
    pub fn dropped_oscillators(&self) -> usize {
        self.dropped_oscillators
    }
}

impl fmt::Debug for CompiledPerformer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CompiledPerformer")
            .field("name", &self.performer.name())
            .field("connections", &self.graph.len())
            .field("oscillators", &self.oscillators.len())
            .finish()
    }
}

// -------------------------------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::performer::{ids, ConnectionBlock, Source};

    fn test_graph() -> ConnectionGraph {
        let performer = Performer::new("test")
            .connection(ConnectionBlock::with_control(
                Source::new(ids::eg(1)),
                Source::new(Identifier::controller(74)),
                2400.0,
                ids::FILTER_FREQ,
            ))
            .connection(ConnectionBlock::new(
                Source::new(Identifier::nrpn(300)),
                -200.0,
                ids::MIXER_GAIN,
            ))
            .connection(ConnectionBlock::constant(7200.0, ids::FILTER_FREQ))
            .connection(ConnectionBlock::constant(
                1.0,
                Identifier::new("unknown", None, 0),
            ))
            .connection(ConnectionBlock::new(
                Source::new(Identifier::new("unknown", Some("source"), 0)),
                1.0,
                ids::MIXER_GAIN,
            ));
        ConnectionGraph::from_performer(&performer)
    }

    fn seed(state: &mut GraphState, key: u8, velocity: u8, eg1: f64, lfo0: f64) {
        state.set_input(CellId::KEYNUMBER, key as f64 / 128.0);
        state.set_input(CellId::VELOCITY, velocity as f64 / 128.0);
        state.set_input(CellId::ON, 1.0);
        state.set_input(CellId::eg(0, EgCell::Output), 1.0);
        state.set_input(CellId::eg(1, EgCell::Output), eg1);
        state.set_input(CellId::lfo(0, LfoCell::Output), lfo0);
    }

    #[test]
    fn unresolvable_connections_are_dropped() {
        let graph = test_graph();
        assert_eq!(graph.dropped_connections(), 2);
        assert!(!graph.forces_keynumber());
        assert_eq!(graph.bucket_len(Trigger::Controller(74)), 2);
        assert_eq!(graph.bucket_len(Trigger::Nrpn(300)), 1);
        assert_eq!(graph.bucket_len(Trigger::Nrpn(301)), 0);
    }

    fn controlled_key_graph() -> ConnectionGraph {
        let performer = Performer::new("controlled key")
            .connection(ConnectionBlock::new(
                Source::new(Identifier::controller(20)),
                1.0,
                ids::NOTEON_KEYNUMBER,
            ))
            .connection(ConnectionBlock::new(
                Source::new(ids::NOTEON_KEYNUMBER),
                -960.0,
                ids::MIXER_GAIN,
            ));
        ConnectionGraph::from_performer(&performer)
    }

    #[test]
    fn incremental_updates_match_full_evaluation() {
        for graph in [test_graph(), controlled_key_graph()] {
            let mut controls = ChannelControls::default();
            let mut incremental = GraphState::new();
            seed(&mut incremental, 60, 100, 0.0, 0.5);
            graph.evaluate_all(&mut incremental, &controls, 60);

            let events: [(Trigger, fn(&mut ChannelControls)); 9] = [
                (Trigger::Controller(7), |c| c.set_controller(7, 64)),
                (Trigger::Controller(74), |c| c.set_controller(74, 127)),
                (Trigger::Controller(20), |c| c.set_controller(20, 127)),
                (Trigger::Controller(1), |c| c.set_controller(1, 100)),
                (Trigger::PitchBend, |c| c.set_pitch_bend(12000)),
                (Trigger::Rpn(0), |c| c.set_rpn(0, 12 << 7)),
                (Trigger::Nrpn(300), |c| c.set_nrpn(300, 4000)),
                (Trigger::ChannelPressure, |c| c.set_channel_pressure(90)),
                (Trigger::PolyPressure, |c| c.set_poly_pressure(60, 50)),
            ];
            for (step, (trigger, change)) in events.iter().enumerate() {
                change(&mut controls);
                graph.update(*trigger, &mut incremental, &controls, 60);
                // envelope and LFO move on every other step
                if step % 2 == 1 {
                    let eg1 = step as f64 / 10.0;
                    let lfo0 = 1.0 - step as f64 / 10.0;
                    incremental.set_input(CellId::eg(1, EgCell::Output), eg1);
                    incremental.set_input(CellId::lfo(0, LfoCell::Output), lfo0);
                    graph.update(Trigger::Control, &mut incremental, &controls, 60);
                }
            }
            incremental.set_input(CellId::ON, 0.0);
            graph.update(Trigger::Gate, &mut incremental, &controls, 60);

            let mut full = incremental.clone();
            graph.evaluate_all(&mut full, &controls, 60);
            for (a, b) in incremental.cells().iter().zip(full.cells()) {
                assert!((a - b).abs() < 1e-9, "{a} != {b}");
            }
            // sanity check some values
            assert_eq!(full.cell(CellId::eg(0, EgCell::On)), 0.0);
            assert!(full.cell(CellId::OSC_PITCH) > 6000.0);
        }
    }

    #[test]
    fn controllers_driving_the_key_update_its_readers() {
        let graph = controlled_key_graph();
        assert!(graph.forces_keynumber());
        // the key's readers follow the controller
        assert!(graph.bucket_len(Trigger::Controller(20)) > 1);

        let mut controls = ChannelControls::default();
        let mut state = GraphState::new();
        seed(&mut state, 60, 100, 0.0, 0.5);
        graph.evaluate_all(&mut state, &controls, 60);
        let low_pitch = state.cell(CellId::OSC_PITCH);

        controls.set_controller(20, 127);
        graph.update(Trigger::Controller(20), &mut state, &controls, 60);
        assert!((state.cell(CellId::KEYNUMBER) - 127.0 / 128.0).abs() < 1e-9);
        assert!(state.cell(CellId::OSC_PITCH) > low_pitch + 12000.0);

        let mut full = state.clone();
        graph.evaluate_all(&mut full, &controls, 60);
        assert!((state.cell(CellId::OSC_PITCH) - full.cell(CellId::OSC_PITCH)).abs() < 1e-9);
        assert!((state.cell(CellId::GAIN) - full.cell(CellId::GAIN)).abs() < 1e-9);
    }

    #[test]
    fn forced_key_connections_come_first() {
        let performer = Performer::new("forced").connection(ConnectionBlock::constant(
            36.0 / 128.0,
            ids::NOTEON_KEYNUMBER,
        ));
        let graph = ConnectionGraph::from_performer(&performer);
        assert!(graph.forces_keynumber());
        let mut state = GraphState::new();
        // forced key: seed is zero
        state.set_input(CellId::VELOCITY, 0.5);
        state.set_input(CellId::ON, 1.0);
        state.set_input(CellId::lfo(0, LfoCell::Output), 0.5);
        graph.evaluate_all(&mut state, &ChannelControls::default(), 60);
        assert!((state.cell(CellId::OSC_PITCH) - 3600.0).abs() < 1e-6);
    }

    #[test]
    fn cell_layout() {
        assert_eq!(CELL_COUNT, 36);
        assert_eq!(CellId::eg(1, EgCell::Shutdown).index(), 29);
        assert_eq!(CellId::lfo(1, LfoCell::Freq).index(), 35);
        assert_eq!(resolve_destination(&ids::eg(0)), None);
        assert_eq!(
            resolve_destination(&ids::eg_param("release", 1)),
            Some(CellId::eg(1, EgCell::Release))
        );
        assert_eq!(resolve_source(&Identifier::controller(127)), Some(SourceRef::Controller(127)));
        assert_eq!(resolve_source(&Identifier::with_names("midi_cc", Some("128"), 0)), None);
    }
}
