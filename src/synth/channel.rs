//! MIDI channel state: controller values, registered parameters, pedals and portamento.

use std::collections::HashMap;

use crate::voice::graph::Trigger;

// -------------------------------------------------------------------------------------------------

/// Registered parameter numbers the engine understands.
pub mod rpn {
    pub const PITCH_BEND_RANGE: u16 = 0;
    pub const FINE_TUNING: u16 = 1;
    pub const COARSE_TUNING: u16 = 2;
    /// Deselects any parameter (MSB and LSB 127).
    pub const NULL: u16 = 0x3FFF;
}

/// Controller numbers with special meaning.
pub mod cc {
    pub const BANK_SELECT: u8 = 0;
    pub const MODULATION: u8 = 1;
    pub const PORTAMENTO_TIME: u8 = 5;
    pub const DATA_ENTRY: u8 = 6;
    pub const VOLUME: u8 = 7;
    pub const BALANCE: u8 = 8;
    pub const PAN: u8 = 10;
    pub const EXPRESSION: u8 = 11;
    pub const BANK_SELECT_LSB: u8 = 32;
    pub const DATA_ENTRY_LSB: u8 = 38;
    pub const SUSTAIN: u8 = 64;
    pub const PORTAMENTO: u8 = 65;
    pub const SOSTENUTO: u8 = 66;
    pub const SOFT: u8 = 67;
    pub const VIBRATO_DEPTH: u8 = 77;
    pub const PORTAMENTO_CONTROL: u8 = 84;
    pub const REVERB: u8 = 91;
    pub const CHORUS: u8 = 93;
    pub const DATA_INCREMENT: u8 = 96;
    pub const DATA_DECREMENT: u8 = 97;
    pub const NRPN_LSB: u8 = 98;
    pub const NRPN_MSB: u8 = 99;
    pub const RPN_LSB: u8 = 100;
    pub const RPN_MSB: u8 = 101;
    pub const ALL_SOUND_OFF: u8 = 120;
    pub const RESET_ALL_CONTROLLERS: u8 = 121;
    pub const ALL_NOTES_OFF: u8 = 123;
    pub const OMNI_OFF: u8 = 124;
    pub const POLY_ON: u8 = 127;
}

// -------------------------------------------------------------------------------------------------

/// Normalized MIDI values of a channel, as read by voice connections.
///
/// Controllers and pressures are normalized as `value / 128`, 14 bit values (pitch bend,
/// registered parameters) as `value / 16384`.
#[derive(Clone, Debug)]
pub struct ChannelControls {
    controllers: [f64; 128],
    rpn: HashMap<u16, f64>,
    nrpn: HashMap<u16, f64>,
    pitch_bend: f64,
    channel_pressure: f64,
    poly_pressure: [f64; 128],
}

impl Default for ChannelControls {
    fn default() -> Self {
        let mut controllers = [0.0; 128];
        for (number, value) in [
            (cc::VOLUME, 100),
            (cc::BALANCE, 64),
            (cc::PAN, 64),
            (cc::EXPRESSION, 127),
            (cc::REVERB, 40),
        ] {
            controllers[number as usize] = value as f64 / 128.0;
        }
        // sound controllers, except the vibrato depth which scales the vibrato
        for number in 70..=79 {
            if number != cc::VIBRATO_DEPTH {
                controllers[number as usize] = 64.0 / 128.0;
            }
        }
        Self {
            controllers,
            rpn: HashMap::new(),
            nrpn: HashMap::new(),
            pitch_bend: 0.5,
            channel_pressure: 0.0,
            poly_pressure: [0.0; 128],
        }
    }
}

impl ChannelControls {
    #[inline]
    pub fn controller(&self, number: u8) -> f64 {
        self.controllers[number as usize & 127]
    }
    #[inline]
    pub fn rpn(&self, number: u16) -> f64 {
        match self.rpn.get(&number) {
            Some(value) => *value,
            None => match number {
                rpn::PITCH_BEND_RANGE => 256.0 / 16384.0,
                rpn::FINE_TUNING | rpn::COARSE_TUNING => 0.5,
                _ => 0.0,
            },
        }
    }
    #[inline]
    pub fn nrpn(&self, number: u16) -> f64 {
        self.nrpn.get(&number).copied().unwrap_or(0.0)
    }
    #[inline]
    pub fn pitch_bend(&self) -> f64 {
        self.pitch_bend
    }
    #[inline]
    pub fn channel_pressure(&self) -> f64 {
        self.channel_pressure
    }
    #[inline]
    pub fn poly_pressure(&self, key: u8) -> f64 {
        self.poly_pressure[key as usize & 127]
    }

    pub fn set_controller(&mut self, number: u8, value: u8) {
        self.controllers[number as usize & 127] = (value & 127) as f64 / 128.0;
    }
    /// Set the 14 bit pitch bend value (8192 = center).
    pub fn set_pitch_bend(&mut self, value: u16) {
        self.pitch_bend = (value & 0x3FFF) as f64 / 16384.0;
    }
    pub fn set_rpn(&mut self, number: u16, value: u16) {
        self.rpn.insert(number, (value & 0x3FFF) as f64 / 16384.0);
    }
    pub fn set_nrpn(&mut self, number: u16, value: u16) {
        self.nrpn.insert(number, (value & 0x3FFF) as f64 / 16384.0);
    }
    pub fn set_channel_pressure(&mut self, value: u8) {
        self.channel_pressure = (value & 127) as f64 / 128.0;
    }
    pub fn set_poly_pressure(&mut self, key: u8, value: u8) {
        self.poly_pressure[key as usize & 127] = (value & 127) as f64 / 128.0;
    }

    /// Raw 14 bit value of a registered or non-registered parameter.
    fn parameter_value(&self, parameter: Parameter) -> u16 {
        let value = match parameter {
            Parameter::Rpn(number) => self.rpn(number),
            Parameter::Nrpn(number) => self.nrpn(number),
        };
        (value * 16384.0).round() as u16
    }

    fn set_parameter_value(&mut self, parameter: Parameter, value: u16) {
        match parameter {
            Parameter::Rpn(number) => self.set_rpn(number, value),
            Parameter::Nrpn(number) => self.set_nrpn(number, value),
        }
    }

    /// Reset controllers as recommended for "reset all controllers" messages. Volume, pan,
    /// effect sends and parameter values are kept.
    fn reset_controllers(&mut self) {
        self.pitch_bend = 0.5;
        self.channel_pressure = 0.0;
        self.poly_pressure = [0.0; 128];
        self.controllers[cc::MODULATION as usize] = 0.0;
        self.controllers[cc::EXPRESSION as usize] = 127.0 / 128.0;
        for number in cc::SUSTAIN..=cc::SOFT {
            self.controllers[number as usize] = 0.0;
        }
    }
}

// -------------------------------------------------------------------------------------------------

/// Selected registered or non-registered parameter for data entry.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Parameter {
    Rpn(u16),
    Nrpn(u16),
}

/// Channel wide actions a controller change asks the synthesizer to perform on voices.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ChannelCommand {
    SustainReleased,
    SostenutoPressed,
    SostenutoReleased,
    AllSoundOff,
    AllNotesOff,
    ResetAllControllers,
}

/// Result of a controller change: connections to re-evaluate and/or a channel command.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ControlChange {
    pub trigger: Option<Trigger>,
    pub command: Option<ChannelCommand>,
}

/// State of a single MIDI channel.
#[derive(Clone, Debug)]
pub struct Channel {
    index: u8,
    controls: ChannelControls,
    program: u8,
    bank: u16,
    rpn_select: u16,
    nrpn_select: u16,
    selected: Option<Parameter>,
    sustain: bool,
    sostenuto: bool,
    portamento: bool,
    portamento_control_key: Option<u8>,
    last_key: Option<u8>,
}

impl Channel {
    /// Index of the percussion channel (MIDI channel 10).
    pub const PERCUSSION: u8 = 9;

    pub fn new(index: u8) -> Self {
        Self {
            index,
            controls: ChannelControls::default(),
            program: 0,
            bank: 0,
            rpn_select: rpn::NULL,
            nrpn_select: rpn::NULL,
            selected: None,
            sustain: false,
            sostenuto: false,
            portamento: false,
            portamento_control_key: None,
            last_key: None,
        }
    }

    pub fn index(&self) -> u8 {
        self.index
    }
    pub fn controls(&self) -> &ChannelControls {
        &self.controls
    }
    pub fn controls_mut(&mut self) -> &mut ChannelControls {
        &mut self.controls
    }
    pub fn program(&self) -> u8 {
        self.program
    }
    pub fn bank(&self) -> u16 {
        self.bank
    }
    pub fn is_percussion(&self) -> bool {
        self.index == Self::PERCUSSION
    }
    pub fn sustain(&self) -> bool {
        self.sustain
    }
    pub fn sostenuto(&self) -> bool {
        self.sostenuto
    }

    pub fn set_program(&mut self, program: u8) {
        self.program = program & 127;
    }

    /// Portamento glide rate in semitones per second, derived from the portamento time
    /// controller.
    pub fn portamento_rate(&self) -> f64 {
        let time = self.controls.controller(cc::PORTAMENTO_TIME) * 128.0;
        200.0 / (1.0 + time)
    }

    /// Key a new note on this channel should glide from, if any. Consumes a pending
    /// portamento control key.
    pub fn take_glide_origin(&mut self, key: u8) -> Option<u8> {
        let origin = self
            .portamento_control_key
            .take()
            .or(if self.portamento { self.last_key } else { None });
        self.last_key = Some(key);
        origin.filter(|origin| *origin != key)
    }

    /// Apply a controller change and return what needs to happen on the channel's voices.
    pub fn controller_change(&mut self, number: u8, value: u8) -> ControlChange {
        let number = number & 127;
        let value = value & 127;
        let mut change = ControlChange::default();
        match number {
            cc::BANK_SELECT => {
                self.bank = (self.bank & 0x7F) | ((value as u16) << 7);
            }
            cc::BANK_SELECT_LSB => {
                self.bank = (self.bank & !0x7F) | value as u16;
            }
            cc::RPN_MSB | cc::RPN_LSB => {
                self.rpn_select = Self::select(self.rpn_select, number == cc::RPN_MSB, value);
                self.selected = (self.rpn_select != rpn::NULL).then_some(Parameter::Rpn(self.rpn_select));
            }
            cc::NRPN_MSB | cc::NRPN_LSB => {
                self.nrpn_select = Self::select(self.nrpn_select, number == cc::NRPN_MSB, value);
                self.selected =
                    (self.nrpn_select != rpn::NULL).then_some(Parameter::Nrpn(self.nrpn_select));
            }
            cc::DATA_ENTRY | cc::DATA_ENTRY_LSB | cc::DATA_INCREMENT | cc::DATA_DECREMENT => {
                if let Some(parameter) = self.selected {
                    let current = self.controls.parameter_value(parameter);
                    let new_value = match number {
                        cc::DATA_ENTRY => ((value as u16) << 7) | (current & 0x7F),
                        cc::DATA_ENTRY_LSB => (current & !0x7F) | value as u16,
                        cc::DATA_INCREMENT => current.saturating_add(1 << 7).min(0x3FFF),
                        _ => current.saturating_sub(1 << 7),
                    };
                    self.controls.set_parameter_value(parameter, new_value);
                    change.trigger = Some(match parameter {
                        Parameter::Rpn(number) => Trigger::Rpn(number),
                        Parameter::Nrpn(number) => Trigger::Nrpn(number),
                    });
                }
            }
            cc::SUSTAIN => {
                let pressed = value >= 64;
                if self.sustain && !pressed {
                    change.command = Some(ChannelCommand::SustainReleased);
                }
                self.sustain = pressed;
            }
            cc::SOSTENUTO => {
                let pressed = value >= 64;
                if pressed != self.sostenuto {
                    change.command = Some(if pressed {
                        ChannelCommand::SostenutoPressed
                    } else {
                        ChannelCommand::SostenutoReleased
                    });
                }
                self.sostenuto = pressed;
            }
            cc::PORTAMENTO => {
                self.portamento = value >= 64;
            }
            cc::PORTAMENTO_CONTROL => {
                self.portamento_control_key = Some(value);
            }
            cc::ALL_SOUND_OFF => {
                change.command = Some(ChannelCommand::AllSoundOff);
                return change;
            }
            cc::RESET_ALL_CONTROLLERS => {
                self.controls.reset_controllers();
                self.sustain = false;
                self.sostenuto = false;
                self.portamento = false;
                self.selected = None;
                self.rpn_select = rpn::NULL;
                self.nrpn_select = rpn::NULL;
                change.command = Some(ChannelCommand::ResetAllControllers);
                return change;
            }
            cc::ALL_NOTES_OFF..=cc::POLY_ON => {
                change.command = Some(ChannelCommand::AllNotesOff);
                return change;
            }
            _ => {}
        }
        self.controls.set_controller(number, value);
        if change.trigger.is_none() {
            change.trigger = Some(Trigger::Controller(number));
        }
        change
    }

    /// Reset the channel to its power on state.
    pub fn reset(&mut self) {
        *self = Self::new(self.index);
    }

    fn select(current: u16, msb: bool, value: u8) -> u16 {
        if msb {
            (current & 0x7F) | ((value as u16) << 7)
        } else {
            (current & !0x7F) | value as u16
        }
    }
}

// -------------------------------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rpn_data_entry() {
        let mut channel = Channel::new(0);
        assert_eq!(channel.controls().rpn(rpn::PITCH_BEND_RANGE), 256.0 / 16384.0);
        channel.controller_change(cc::RPN_MSB, 0);
        channel.controller_change(cc::RPN_LSB, 0);
        let change = channel.controller_change(cc::DATA_ENTRY, 12);
        assert_eq!(change.trigger, Some(Trigger::Rpn(0)));
        assert_eq!(channel.controls().rpn(0), (12 << 7) as f64 / 16384.0);
        channel.controller_change(cc::DATA_INCREMENT, 0);
        assert_eq!(channel.controls().rpn(0), (13 << 7) as f64 / 16384.0);

        // null selection ignores data entry
        channel.controller_change(cc::RPN_MSB, 127);
        channel.controller_change(cc::RPN_LSB, 127);
        let change = channel.controller_change(cc::DATA_ENTRY, 1);
        assert_eq!(change.trigger, Some(Trigger::Controller(cc::DATA_ENTRY)));
        assert_eq!(channel.controls().rpn(0), (13 << 7) as f64 / 16384.0);
    }

    #[test]
    fn nrpn_data_entry() {
        let mut channel = Channel::new(0);
        channel.controller_change(cc::NRPN_MSB, 1);
        channel.controller_change(cc::NRPN_LSB, 8);
        let change = channel.controller_change(cc::DATA_ENTRY, 100);
        assert_eq!(change.trigger, Some(Trigger::Nrpn(136)));
        assert_eq!(channel.controls().nrpn(136), (100 << 7) as f64 / 16384.0);
    }

    #[test]
    fn pedals_and_resets() {
        let mut channel = Channel::new(0);
        assert_eq!(channel.controller_change(cc::SUSTAIN, 127).command, None);
        assert!(channel.sustain());
        assert_eq!(
            channel.controller_change(cc::SUSTAIN, 0).command,
            Some(ChannelCommand::SustainReleased)
        );
        assert_eq!(
            channel.controller_change(cc::SOSTENUTO, 100).command,
            Some(ChannelCommand::SostenutoPressed)
        );
        channel.controller_change(cc::MODULATION, 90);
        channel.controls_mut().set_pitch_bend(0);
        let change = channel.controller_change(cc::RESET_ALL_CONTROLLERS, 0);
        assert_eq!(change.command, Some(ChannelCommand::ResetAllControllers));
        assert_eq!(channel.controls().controller(cc::MODULATION), 0.0);
        assert_eq!(channel.controls().pitch_bend(), 0.5);
        assert!(!channel.sostenuto());
        assert_eq!(
            channel.controller_change(cc::ALL_NOTES_OFF, 0).command,
            Some(ChannelCommand::AllNotesOff)
        );
    }

    #[test]
    fn portamento_origin() {
        let mut channel = Channel::new(0);
        assert_eq!(channel.take_glide_origin(60), None);
        channel.controller_change(cc::PORTAMENTO, 127);
        assert_eq!(channel.take_glide_origin(64), Some(60));
        channel.controller_change(cc::PORTAMENTO, 0);
        channel.controller_change(cc::PORTAMENTO_CONTROL, 48);
        assert_eq!(channel.take_glide_origin(67), Some(48));
        assert_eq!(channel.take_glide_origin(69), None);
    }
}
