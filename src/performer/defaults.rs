//! Engine default connections, merged into every performer which doesn't opt out.

use std::sync::LazyLock;

use super::{
    ids, ConnectionBlock, Direction, Identifier, Polarity, Shape, Source, Transform,
};

// -------------------------------------------------------------------------------------------------

/// LFO frequency of about 5 Hz in absolute cents.
pub const DEFAULT_LFO_FREQUENCY: f64 = -851.3179423647273;
/// Filter cutoff in absolute cents at and above which the voice filter is bypassed.
pub const FILTER_OPEN_CUTOFF: f64 = 13500.0;

static DEFAULT_CONNECTIONS: LazyLock<Vec<ConnectionBlock>> = LazyLock::new(build_defaults);

/// The process-wide default connection table. Built once, never mutated.
pub fn default_connections() -> &'static [ConnectionBlock] {
    &DEFAULT_CONNECTIONS
}

// -------------------------------------------------------------------------------------------------

const UNIPOLAR: Transform = Transform::LINEAR;
const BIPOLAR: Transform =
    Transform::standard(Direction::MinToMax, Polarity::Bipolar, Shape::Linear);
const INVERTED: Transform =
    Transform::standard(Direction::MaxToMin, Polarity::Unipolar, Shape::Linear);
const INVERTED_CONCAVE: Transform =
    Transform::standard(Direction::MaxToMin, Polarity::Unipolar, Shape::Concave);

/// Pitch bend range in cents from the RPN 0 value (semitones in MSB, cents in LSB).
fn pitch_bend_range(value: f64) -> f64 {
    let value = (value * 16384.0) as i32;
    let (msb, lsb) = (value >> 7, value & 127);
    msb as f64 * 100.0 + lsb as f64
}

/// Fine tuning in cents (+-100) from the RPN 1 value.
fn fine_tuning(value: f64) -> f64 {
    let value = (value * 16384.0) as i32;
    (value - 8192) as f64 / 81.92
}

/// Coarse tuning in cents (+-64 semitones) from the RPN 2 value.
fn coarse_tuning(value: f64) -> f64 {
    let value = (value * 16384.0) as i32;
    ((value >> 7) - 64) as f64 * 100.0
}

fn cc(number: u8, transform: Transform) -> Source {
    Source::with_transform(Identifier::controller(number), transform)
}

fn build_defaults() -> Vec<ConnectionBlock> {
    let mut blocks = Vec::with_capacity(64);

    // gates
    for instance in 0..2 {
        blocks.push(ConnectionBlock::new(
            Source::new(ids::NOTEON_ON),
            1.0,
            ids::eg_param("on", instance),
        ));
    }

    // gain
    blocks.push(ConnectionBlock::new(
        Source::with_transform(ids::eg(0), INVERTED),
        -960.0,
        ids::MIXER_GAIN,
    ));
    blocks.push(ConnectionBlock::new(
        Source::with_transform(ids::NOTEON_VELOCITY, INVERTED_CONCAVE),
        -960.0,
        ids::MIXER_GAIN,
    ));
    blocks.push(ConnectionBlock::new(cc(7, INVERTED_CONCAVE), -960.0, ids::MIXER_GAIN));
    blocks.push(ConnectionBlock::new(cc(11, INVERTED_CONCAVE), -960.0, ids::MIXER_GAIN));

    // pitch
    blocks.push(ConnectionBlock::new(
        Source::new(ids::NOTEON_KEYNUMBER),
        12800.0,
        ids::OSC_PITCH,
    ));
    blocks.push(ConnectionBlock::with_control(
        Source::with_transform(ids::MIDI_PITCH, BIPOLAR),
        Source::with_transform(Identifier::rpn(0), Transform::Custom(pitch_bend_range)),
        1.0,
        ids::OSC_PITCH,
    ));
    blocks.push(ConnectionBlock::new(
        Source::with_transform(Identifier::rpn(1), Transform::Custom(fine_tuning)),
        1.0,
        ids::OSC_PITCH,
    ));
    blocks.push(ConnectionBlock::new(
        Source::with_transform(Identifier::rpn(2), Transform::Custom(coarse_tuning)),
        1.0,
        ids::OSC_PITCH,
    ));

    // vibrato: modulation wheel, pressure and vibrato depth scale LFO 0
    let vibrato = Source::with_transform(ids::lfo(0), BIPOLAR);
    blocks.push(ConnectionBlock::with_control(
        vibrato.clone(),
        cc(1, UNIPOLAR),
        50.0,
        ids::OSC_PITCH,
    ));
    blocks.push(ConnectionBlock::with_control(
        vibrato.clone(),
        Source::new(ids::MIDI_CHANNEL_PRESSURE),
        50.0,
        ids::OSC_PITCH,
    ));
    blocks.push(ConnectionBlock::with_control(
        vibrato.clone(),
        Source::new(ids::MIDI_POLY_PRESSURE),
        50.0,
        ids::OSC_PITCH,
    ));
    blocks.push(ConnectionBlock::with_control(
        vibrato,
        cc(77, UNIPOLAR),
        50.0,
        ids::OSC_PITCH,
    ));
    blocks.push(ConnectionBlock::new(cc(76, BIPOLAR), 2400.0, ids::lfo_param("freq", 0)));
    blocks.push(ConnectionBlock::new(cc(78, BIPOLAR), 2400.0, ids::lfo_param("delay", 0)));

    // mixer
    blocks.push(ConnectionBlock::new(cc(10, BIPOLAR), 500.0, ids::MIXER_PAN));
    blocks.push(ConnectionBlock::new(cc(8, BIPOLAR), 500.0, ids::MIXER_BALANCE));
    blocks.push(ConnectionBlock::new(cc(91, UNIPOLAR), 1000.0, ids::MIXER_REVERB));
    blocks.push(ConnectionBlock::new(cc(93, UNIPOLAR), 1000.0, ids::MIXER_CHORUS));

    // filter and envelope offsets (sound controllers)
    blocks.push(ConnectionBlock::new(cc(71, BIPOLAR), 200.0, ids::FILTER_Q));
    blocks.push(ConnectionBlock::new(cc(74, BIPOLAR), 9600.0, ids::FILTER_FREQ));
    blocks.push(ConnectionBlock::new(cc(72, BIPOLAR), 7200.0, ids::eg_param("release", 0)));
    blocks.push(ConnectionBlock::new(cc(73, BIPOLAR), 7200.0, ids::eg_param("attack", 0)));
    blocks.push(ConnectionBlock::new(cc(75, BIPOLAR), 7200.0, ids::eg_param("decay", 0)));

    // constants
    for instance in 0..2 {
        for variable in ["delay", "attack", "hold", "decay", "release"] {
            blocks.push(ConnectionBlock::constant(-12000.0, ids::eg_param(variable, instance)));
        }
        blocks.push(ConnectionBlock::constant(1000.0, ids::eg_param("sustain", instance)));
        blocks.push(ConnectionBlock::constant(-7000.0, ids::eg_param("shutdown", instance)));
        blocks.push(ConnectionBlock::constant(-12000.0, ids::lfo_param("delay", instance)));
        blocks.push(ConnectionBlock::constant(
            DEFAULT_LFO_FREQUENCY,
            ids::lfo_param("freq", instance),
        ));
    }
    // 12 dB lowpass
    blocks.push(ConnectionBlock::constant(1.0, ids::FILTER_TYPE));
    blocks.push(ConnectionBlock::constant(FILTER_OPEN_CUTOFF, ids::FILTER_FREQ));
    blocks.push(ConnectionBlock::constant(0.0, ids::FILTER_Q));

    blocks
}

// -------------------------------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use std::collections::HashSet;

    use super::*;

    #[test]
    fn defaults_have_unique_keys() {
        let blocks = default_connections();
        let keys = blocks.iter().map(|b| b.key()).collect::<HashSet<_>>();
        assert_eq!(keys.len(), blocks.len());
    }

    #[test]
    fn rpn_transforms() {
        // default bend range: 2 semitones
        assert_eq!(pitch_bend_range(256.0 / 16384.0), 200.0);
        assert_eq!(fine_tuning(0.5), 0.0);
        assert_eq!(coarse_tuning(0.5), 0.0);
        assert_eq!(coarse_tuning(65.0 * 128.0 / 16384.0), 100.0);
    }
}
