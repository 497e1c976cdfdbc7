//! Format independent instrument zone description: key and velocity ranges, oscillators and the
//! modulation connections between sources and destinations.

use std::{borrow::Cow, collections::HashMap, fmt, ops::RangeInclusive, sync::Arc};

use crate::Error;

// -------------------------------------------------------------------------------------------------

pub mod defaults;
pub mod sample;

pub use sample::{LoopMode, SampleLoop, SampleOscillator, SampleStream};

// -------------------------------------------------------------------------------------------------

/// Names a connection source or destination endpoint: an object such as `midi_cc` or `eg`, an
/// optional variable within the object and an instance number (e.g. the envelope index).
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Identifier {
    object: Cow<'static, str>,
    variable: Option<Cow<'static, str>>,
    instance: u32,
}

impl Identifier {
    pub const fn new(object: &'static str, variable: Option<&'static str>, instance: u32) -> Self {
        let variable = match variable {
            Some(variable) => Some(Cow::Borrowed(variable)),
            None => None,
        };
        Self {
            object: Cow::Borrowed(object),
            variable,
            instance,
        }
    }

    /// Create an identifier with dynamic object or variable names.
    pub fn with_names<O, V>(object: O, variable: Option<V>, instance: u32) -> Self
    where
        O: Into<Cow<'static, str>>,
        V: Into<Cow<'static, str>>,
    {
        Self {
            object: object.into(),
            variable: variable.map(Into::into),
            instance,
        }
    }

    /// Identifier of a MIDI controller value.
    pub fn controller(number: u8) -> Self {
        Self::with_names(objects::MIDI_CC, Some(number.to_string()), 0)
    }
    /// Identifier of a registered parameter value.
    pub fn rpn(number: u16) -> Self {
        Self::with_names(objects::MIDI_RPN, Some(number.to_string()), 0)
    }
    /// Identifier of a non-registered parameter value.
    pub fn nrpn(number: u16) -> Self {
        Self::with_names(objects::MIDI_NRPN, Some(number.to_string()), 0)
    }

    pub fn object(&self) -> &str {
        &self.object
    }
    pub fn variable(&self) -> Option<&str> {
        self.variable.as_deref()
    }
    pub fn instance(&self) -> u32 {
        self.instance
    }
}

impl fmt::Display for Identifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.object)?;
        if let Some(variable) = &self.variable {
            write!(f, ".{variable}")?;
        }
        if self.instance != 0 {
            write!(f, "#{}", self.instance)?;
        }
        Ok(())
    }
}

/// Well known identifier objects and variables the voice understands.
pub mod objects {
    pub const NOTEON: &str = "noteon";
    pub const MIDI: &str = "midi";
    pub const MIDI_CC: &str = "midi_cc";
    pub const MIDI_RPN: &str = "midi_rpn";
    pub const MIDI_NRPN: &str = "midi_nrpn";
    pub const EG: &str = "eg";
    pub const LFO: &str = "lfo";
    pub const OSC: &str = "osc";
    pub const FILTER: &str = "filter";
    pub const MIXER: &str = "mixer";
}

/// Frequently used identifiers.
pub mod ids {
    use super::{objects::*, Identifier};

    pub const NOTEON_KEYNUMBER: Identifier = Identifier::new(NOTEON, Some("keynumber"), 0);
    pub const NOTEON_VELOCITY: Identifier = Identifier::new(NOTEON, Some("velocity"), 0);
    pub const NOTEON_ON: Identifier = Identifier::new(NOTEON, Some("on"), 0);

    pub const MIDI_PITCH: Identifier = Identifier::new(MIDI, Some("pitch"), 0);
    pub const MIDI_CHANNEL_PRESSURE: Identifier =
        Identifier::new(MIDI, Some("channel_pressure"), 0);
    pub const MIDI_POLY_PRESSURE: Identifier = Identifier::new(MIDI, Some("poly_pressure"), 0);

    pub const OSC_PITCH: Identifier = Identifier::new(OSC, Some("pitch"), 0);

    pub const FILTER_TYPE: Identifier = Identifier::new(FILTER, Some("type"), 0);
    pub const FILTER_FREQ: Identifier = Identifier::new(FILTER, Some("freq"), 0);
    pub const FILTER_Q: Identifier = Identifier::new(FILTER, Some("q"), 0);

    pub const MIXER_GAIN: Identifier = Identifier::new(MIXER, Some("gain"), 0);
    pub const MIXER_PAN: Identifier = Identifier::new(MIXER, Some("pan"), 0);
    pub const MIXER_BALANCE: Identifier = Identifier::new(MIXER, Some("balance"), 0);
    pub const MIXER_REVERB: Identifier = Identifier::new(MIXER, Some("reverb"), 0);
    pub const MIXER_CHORUS: Identifier = Identifier::new(MIXER, Some("chorus"), 0);

    /// Output level of the envelope generator with the given instance.
    pub const fn eg(instance: u32) -> Identifier {
        Identifier::new(EG, None, instance)
    }
    /// A parameter of the envelope generator with the given instance.
    pub const fn eg_param(variable: &'static str, instance: u32) -> Identifier {
        Identifier::new(EG, Some(variable), instance)
    }
    /// Output of the LFO with the given instance.
    pub const fn lfo(instance: u32) -> Identifier {
        Identifier::new(LFO, None, instance)
    }
    /// A parameter of the LFO with the given instance.
    pub const fn lfo_param(variable: &'static str, instance: u32) -> Identifier {
        Identifier::new(LFO, Some(variable), instance)
    }
}

// -------------------------------------------------------------------------------------------------

/// Mapping direction of a [`Transform::Standard`].
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    #[default]
    MinToMax,
    MaxToMin,
}

/// Output polarity of a [`Transform::Standard`].
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub enum Polarity {
    #[default]
    Unipolar,
    Bipolar,
}

/// Curve shape of a [`Transform::Standard`].
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub enum Shape {
    #[default]
    Linear,
    Concave,
    Convex,
    Switch,
    Absolute,
}

/// Maps normalized source values (0..=1) to a modulation amount.
#[derive(Clone, Copy)]
pub enum Transform {
    Standard {
        direction: Direction,
        polarity: Polarity,
        shape: Shape,
    },
    Custom(fn(f64) -> f64),
}

impl Default for Transform {
    fn default() -> Self {
        Self::LINEAR
    }
}

impl fmt::Debug for Transform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Standard {
                direction,
                polarity,
                shape,
            } => write!(f, "Standard({direction:?}, {polarity:?}, {shape:?})"),
            Self::Custom(_) => write!(f, "Custom"),
        }
    }
}

impl Transform {
    /// Linear, unipolar, min to max: the identity.
    pub const LINEAR: Self = Self::standard(Direction::MinToMax, Polarity::Unipolar, Shape::Linear);

    pub const fn standard(direction: Direction, polarity: Polarity, shape: Shape) -> Self {
        Self::Standard {
            direction,
            polarity,
            shape,
        }
    }

    /// True when the transform maps every value to itself and thus may be skipped.
    pub fn is_unnecessary(&self) -> bool {
        matches!(
            self,
            Self::Standard {
                direction: Direction::MinToMax,
                polarity: Polarity::Unipolar,
                shape: Shape::Linear,
            }
        )
    }

    #[inline]
    pub fn apply(&self, value: f64) -> f64 {
        match *self {
            Self::Custom(function) => function(value),
            Self::Standard {
                direction,
                polarity,
                shape,
            } => {
                let mut value = value;
                if direction == Direction::MaxToMin {
                    value = 1.0 - value;
                }
                if polarity == Polarity::Bipolar {
                    value = value * 2.0 - 1.0;
                }
                const CURVE: f64 = (5.0 / 12.0) / std::f64::consts::LN_10;
                match shape {
                    Shape::Linear => value,
                    Shape::Concave => {
                        let magnitude = (-CURVE * (1.0 - value.abs()).ln()).clamp(0.0, 1.0);
                        value.signum() * magnitude
                    }
                    Shape::Convex => {
                        let magnitude = (1.0 + CURVE * value.abs().ln()).clamp(0.0, 1.0);
                        value.signum() * magnitude
                    }
                    Shape::Switch => match polarity {
                        Polarity::Bipolar => {
                            if value > 0.0 {
                                1.0
                            } else {
                                -1.0
                            }
                        }
                        Polarity::Unipolar => {
                            if value > 0.5 {
                                1.0
                            } else {
                                0.0
                            }
                        }
                    },
                    Shape::Absolute => value.abs(),
                }
            }
        }
    }
}

// -------------------------------------------------------------------------------------------------

/// A connection input: an endpoint and the transform its value passes through.
#[derive(Clone, Debug)]
pub struct Source {
    pub identifier: Identifier,
    pub transform: Transform,
}

impl Source {
    pub fn new(identifier: Identifier) -> Self {
        Self {
            identifier,
            transform: Transform::LINEAR,
        }
    }

    pub fn with_transform(identifier: Identifier, transform: Transform) -> Self {
        Self {
            identifier,
            transform,
        }
    }
}

/// A connection's accumulation point.
#[derive(Clone, Debug)]
pub struct Destination {
    pub identifier: Identifier,
    pub transform: Transform,
}

impl Destination {
    pub fn new(identifier: Identifier) -> Self {
        Self {
            identifier,
            transform: Transform::LINEAR,
        }
    }
}

impl From<Identifier> for Destination {
    fn from(identifier: Identifier) -> Self {
        Self::new(identifier)
    }
}

// -------------------------------------------------------------------------------------------------

/// A weighted, transformed link from up to two sources to one destination. The second source
/// multiplies the first one. Without sources the block contributes its scale as a constant.
#[derive(Clone, Debug)]
pub struct ConnectionBlock {
    sources: Vec<Source>,
    scale: f64,
    destination: Destination,
}

impl ConnectionBlock {
    /// Max number of sources a single connection may use.
    pub const MAX_SOURCES: usize = 2;

    /// A constant contribution.
    pub fn constant(scale: f64, destination: impl Into<Destination>) -> Self {
        Self {
            sources: Vec::new(),
            scale,
            destination: destination.into(),
        }
    }

    pub fn new(source: Source, scale: f64, destination: impl Into<Destination>) -> Self {
        Self {
            sources: vec![source],
            scale,
            destination: destination.into(),
        }
    }

    /// A connection whose `source` is scaled by a `control` source, e.g. an LFO whose depth is
    /// controlled by the modulation wheel.
    pub fn with_control(
        source: Source,
        control: Source,
        scale: f64,
        destination: impl Into<Destination>,
    ) -> Self {
        Self {
            sources: vec![source, control],
            scale,
            destination: destination.into(),
        }
    }

    pub fn sources(&self) -> &[Source] {
        &self.sources
    }
    pub fn scale(&self) -> f64 {
        self.scale
    }
    pub fn destination(&self) -> &Destination {
        &self.destination
    }

    /// Deduplication key: sorted source identifiers and the destination identifier.
    pub fn key(&self) -> ConnectionKey {
        let mut sources = self
            .sources
            .iter()
            .map(|source| source.identifier.clone())
            .collect::<Vec<_>>();
        sources.sort();
        ConnectionKey {
            sources,
            destination: self.destination.identifier.clone(),
        }
    }
}

/// Identity of a connection within a [`ConnectionSet`].
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct ConnectionKey {
    sources: Vec<Identifier>,
    destination: Identifier,
}

// -------------------------------------------------------------------------------------------------

/// Ordered, deduplicated collection of connection blocks. Inserting a block with the key of an
/// existing one replaces the existing block in place.
#[derive(Clone, Debug, Default)]
pub struct ConnectionSet {
    blocks: Vec<ConnectionBlock>,
    index: HashMap<ConnectionKey, usize>,
}

impl ConnectionSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, block: ConnectionBlock) {
        let key = block.key();
        if let Some(index) = self.index.get(&key) {
            self.blocks[*index] = block;
        } else {
            self.index.insert(key, self.blocks.len());
            self.blocks.push(block);
        }
    }

    pub fn extend<I: IntoIterator<Item = ConnectionBlock>>(&mut self, blocks: I) {
        for block in blocks {
            self.insert(block);
        }
    }

    pub fn get(&self, key: &ConnectionKey) -> Option<&ConnectionBlock> {
        self.index.get(key).map(|index| &self.blocks[*index])
    }

    pub fn len(&self) -> usize {
        self.blocks.len()
    }
    pub fn is_empty(&self) -> bool {
        self.blocks.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &ConnectionBlock> {
        self.blocks.iter()
    }

    pub fn into_blocks(self) -> Vec<ConnectionBlock> {
        self.blocks
    }
}

impl FromIterator<ConnectionBlock> for ConnectionSet {
    fn from_iter<T: IntoIterator<Item = ConnectionBlock>>(iter: T) -> Self {
        let mut set = Self::new();
        set.extend(iter);
        set
    }
}

// -------------------------------------------------------------------------------------------------

/// Playback position and length of a sample stream, as produced by an [`Oscillator`].
pub trait OscillatorStream: Send {
    fn channel_count(&self) -> usize;

    /// Read up to `frames` frames into `output[channel][offset..]`. Returns the number of
    /// frames read, which is less than `frames` only at the end of the stream.
    fn read(&mut self, output: &mut [Vec<f32>], offset: usize, frames: usize) -> usize;

    /// Note off notification: release loops end here.
    fn note_off(&mut self);

    /// Remember the current position. See [`Self::reset`].
    fn mark(&mut self);
    /// Rewind to the last marked position, or to the start when there is no mark.
    fn reset(&mut self);
}

/// A sound source of a performer, openable as a stream of sample frames.
pub trait Oscillator: Send + Sync {
    /// Number of channels the opened streams produce.
    fn channel_count(&self) -> usize;
    /// Attenuation in centibels, applied to the voice gain.
    fn attenuation(&self) -> f64;
    /// Native sample rate of the opened streams.
    fn sample_rate(&self) -> u32;
    /// Pitch in absolute cents at which the stream plays at its native rate.
    fn root_pitch(&self) -> f64;
    /// Loop points and mode, if the oscillator loops.
    fn sample_loop(&self) -> Option<SampleLoop>;

    /// Open a new stream for a voice rendering at the given output sample rate.
    fn open(&self, output_sample_rate: u32) -> Result<Box<dyn OscillatorStream>, Error>;
}

// -------------------------------------------------------------------------------------------------

/// An instrument zone: key and velocity range, oscillators and modulation connections.
///
/// Soundbank loaders produce performers; voices consume them. Connections are merged with the
/// engine's default connections when the performer gets compiled for playback, with the
/// performer's own connections winning on key collisions.
#[derive(Clone)]
pub struct Performer {
    name: String,
    keys: RangeInclusive<u8>,
    velocities: RangeInclusive<u8>,
    exclusive_class: u32,
    self_non_exclusive: bool,
    default_connections: bool,
    oscillators: Vec<Arc<dyn Oscillator>>,
    connections: ConnectionSet,
}

impl Default for Performer {
    fn default() -> Self {
        Self {
            name: String::new(),
            keys: 0..=127,
            velocities: 0..=127,
            exclusive_class: 0,
            self_non_exclusive: false,
            default_connections: true,
            oscillators: Vec::new(),
            connections: ConnectionSet::new(),
        }
    }
}

impl fmt::Debug for Performer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Performer")
            .field("name", &self.name)
            .field("keys", &self.keys)
            .field("velocities", &self.velocities)
            .field("exclusive_class", &self.exclusive_class)
            .field("oscillators", &self.oscillators.len())
            .field("connections", &self.connections.len())
            .finish()
    }
}

impl Performer {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    pub fn keys(mut self, keys: RangeInclusive<u8>) -> Self {
        self.keys = keys;
        self
    }
    pub fn velocities(mut self, velocities: RangeInclusive<u8>) -> Self {
        self.velocities = velocities;
        self
    }
    /// Voices with the same non zero class on the same channel cut off each other.
    pub fn exclusive_class(mut self, class: u32) -> Self {
        self.exclusive_class = class;
        self
    }
    /// When set, voices of this performer don't cut off each other via the exclusive class.
    pub fn self_non_exclusive(mut self, value: bool) -> Self {
        self.self_non_exclusive = value;
        self
    }
    /// When false, the engine's default connections are not merged in.
    pub fn default_connections(mut self, enabled: bool) -> Self {
        self.default_connections = enabled;
        self
    }
    pub fn oscillator(mut self, oscillator: Arc<dyn Oscillator>) -> Self {
        self.oscillators.push(oscillator);
        self
    }
    pub fn connection(mut self, block: ConnectionBlock) -> Self {
        self.connections.insert(block);
        self
    }
    pub fn connections<I: IntoIterator<Item = ConnectionBlock>>(mut self, blocks: I) -> Self {
        self.connections.extend(blocks);
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }
    pub fn key_range(&self) -> &RangeInclusive<u8> {
        &self.keys
    }
    pub fn velocity_range(&self) -> &RangeInclusive<u8> {
        &self.velocities
    }
    pub fn exclusive_class_id(&self) -> u32 {
        self.exclusive_class
    }
    pub fn is_self_non_exclusive(&self) -> bool {
        self.self_non_exclusive
    }
    pub fn uses_default_connections(&self) -> bool {
        self.default_connections
    }
    pub fn oscillator_list(&self) -> &[Arc<dyn Oscillator>] {
        &self.oscillators
    }
    pub fn connection_set(&self) -> &ConnectionSet {
        &self.connections
    }

    /// True when the performer plays the given key and velocity.
    pub fn matches(&self, key: u8, velocity: u8) -> bool {
        self.keys.contains(&key) && self.velocities.contains(&velocity)
    }

    /// The performer's connections merged over the default connections.
    pub fn merged_connections(&self) -> ConnectionSet {
        let mut merged = ConnectionSet::new();
        if self.default_connections {
            merged.extend(defaults::default_connections().iter().cloned());
        }
        merged.extend(self.connections.iter().cloned());
        merged
    }
}

// -------------------------------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::utils::assert_eq_with_epsilon;

    #[test]
    fn standard_transforms() {
        let bipolar = Transform::standard(Direction::MinToMax, Polarity::Bipolar, Shape::Linear);
        assert_eq!(bipolar.apply(0.0), -1.0);
        assert_eq!(bipolar.apply(0.5), 0.0);
        assert_eq!(bipolar.apply(1.0), 1.0);

        let inverted = Transform::standard(Direction::MaxToMin, Polarity::Unipolar, Shape::Linear);
        assert_eq!(inverted.apply(0.25), 0.75);

        let concave = Transform::standard(Direction::MinToMax, Polarity::Unipolar, Shape::Concave);
        assert_eq!(concave.apply(1.0), 1.0);
        assert_eq!(concave.apply(0.0), 0.0);
        assert!(concave.apply(0.5) < 0.5);

        let convex = Transform::standard(Direction::MinToMax, Polarity::Unipolar, Shape::Convex);
        assert_eq!(convex.apply(0.0), 0.0);
        assert_eq!(convex.apply(1.0), 1.0);
        assert!(convex.apply(0.5) > 0.5);

        let switch = Transform::standard(Direction::MinToMax, Polarity::Unipolar, Shape::Switch);
        assert_eq!(switch.apply(0.4), 0.0);
        assert_eq!(switch.apply(0.6), 1.0);
        let switch = Transform::standard(Direction::MinToMax, Polarity::Bipolar, Shape::Switch);
        assert_eq!(switch.apply(0.4), -1.0);

        let absolute = Transform::standard(Direction::MinToMax, Polarity::Bipolar, Shape::Absolute);
        assert_eq_with_epsilon!(absolute.apply(0.25), 0.5, 1e-12);

        assert!(Transform::LINEAR.is_unnecessary());
        assert!(!bipolar.is_unnecessary());
        assert!(!Transform::Custom(|v| v).is_unnecessary());
    }

    #[test]
    fn later_connections_replace_earlier_ones() {
        let mut set = ConnectionSet::new();
        let mod_wheel = Source::new(Identifier::controller(1));
        let lfo = Source::new(ids::lfo(0));
        set.insert(ConnectionBlock::with_control(
            lfo.clone(),
            mod_wheel.clone(),
            50.0,
            ids::OSC_PITCH,
        ));
        set.insert(ConnectionBlock::constant(100.0, ids::MIXER_GAIN));
        // same key with swapped source order
        set.insert(ConnectionBlock::with_control(
            mod_wheel,
            lfo,
            75.0,
            ids::OSC_PITCH,
        ));
        set.insert(ConnectionBlock::constant(-100.0, ids::MIXER_GAIN));
        assert_eq!(set.len(), 2);
        let blocks = set.into_blocks();
        assert_eq!(blocks[0].scale(), 75.0);
        assert_eq!(blocks[1].scale(), -100.0);
    }

    #[test]
    fn performer_overrides_defaults() {
        let performer = Performer::new("test").connection(ConnectionBlock::constant(
            -6000.0,
            ids::eg_param("attack", 0),
        ));
        let merged = performer.merged_connections();
        let attack = merged
            .get(&ConnectionBlock::constant(0.0, ids::eg_param("attack", 0)).key())
            .unwrap();
        assert_eq!(attack.scale(), -6000.0);
        assert_eq!(merged.len(), defaults::default_connections().len());

        let bare = Performer::new("bare").default_connections(false);
        assert!(bare.merged_connections().is_empty());
    }

    #[test]
    fn identifiers() {
        assert_eq!(Identifier::controller(7).to_string(), "midi_cc.7");
        assert_eq!(ids::eg(1).to_string(), "eg#1");
        assert_eq!(
            Identifier::controller(7),
            Identifier::with_names("midi_cc", Some("7"), 0)
        );
    }
}
