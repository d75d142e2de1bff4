//! Cyton ASCII command set used for impedance checks.
//!
//! Channel settings: `x (CH, POWER_DOWN, GAIN, INPUT, BIAS, SRB2, SRB1) X`
//! Lead-off:         `z (CH, P, N) Z`
//! Defaults:         `d`
use std::fmt;
use serde::{Deserialize, Serialize};
/// Counts-to-volts reference of the ADS1299 (volts).
pub const ADS1299_VREF: f64 = 4.5;
/// Cyton firmware terminates every command response with this marker.
pub const RESPONSE_TERMINATOR: &str = "$$$";
/// PGA gain codes 0..6.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Gain {
    X1,
    X2,
    X4,
    X6,
    X8,
    X12,
    X24,
}
impl Gain {
    pub fn code(self) -> u8 {
        match self {
            Gain::X1 => 0,
            Gain::X2 => 1,
            Gain::X4 => 2,
            Gain::X6 => 3,
            Gain::X8 => 4,
            Gain::X12 => 5,
            Gain::X24 => 6,
        }
    }
    pub fn factor(self) -> f64 {
        match self {
            Gain::X1 => 1.0,
            Gain::X2 => 2.0,
            Gain::X4 => 4.0,
            Gain::X6 => 6.0,
            Gain::X8 => 8.0,
            Gain::X12 => 12.0,
            Gain::X24 => 24.0,
        }
    }
    /// Microvolts per ADC count at this gain.
    pub fn microvolts_per_count(self) -> f64 {
        ADS1299_VREF / self.factor() / ((1u32 << 23) - 1) as f64 * 1.0e6
    }
    /// Input range (µV) before the ADC rails.
    pub fn full_scale_microvolts(self) -> f64 {
        ADS1299_VREF / self.factor() * 1.0e6
    }
}
/// Channel input multiplexer setting.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum InputType {
    Normal,
    Shorted,
    BiasMeas,
    Mvdd,
    Temp,
    TestSig,
    BiasDrp,
    BiasDrn,
}
impl InputType {
    pub fn code(self) -> u8 {
        self as u8
    }
}
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelSettings {
    pub power_down: bool,
    pub gain: Gain,
    pub input: InputType,
    pub bias: bool,
    pub srb2: bool,
    pub srb1: bool,
}
impl ChannelSettings {
    /// Power-on streaming configuration of a Cyton channel.
    pub const STREAM_DEFAULT: ChannelSettings = ChannelSettings {
        power_down: false,
        gain: Gain::X24,
        input: InputType::Normal,
        bias: true,
        srb2: true,
        srb1: false,
    };
    /// Configuration the OpenBCI GUI applies while measuring impedance.
    pub const IMPEDANCE: ChannelSettings = ChannelSettings {
        power_down: false,
        gain: Gain::X1,
        input: InputType::Normal,
        bias: true,
        srb2: false,
        srb1: false,
    };
}
/// Which input of the differential pair receives the drive current.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum LeadOffSide {
    P,
    #[default]
    N,
}
/// Register-write commands understood by the board.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BoardCommand {
    ChannelSettings {
        channel: u8,
        settings: ChannelSettings,
    },
    LeadOff {
        channel: u8,
        p: bool,
        n: bool,
    },
    ResetDefaults,
    StartStream,
    StopStream,
    SoftReset,
}
impl BoardCommand {
    pub fn lead_off_on(channel: u8, side: LeadOffSide) -> Self {
        BoardCommand::LeadOff {
            channel,
            p: side == LeadOffSide::P,
            n: side == LeadOffSide::N,
        }
    }
    pub fn lead_off_off(channel: u8) -> Self {
        BoardCommand::LeadOff {
            channel,
            p: false,
            n: false,
        }
    }
    /// Channel this command targets, if any.
    pub fn channel(&self) -> Option<u8> {
        match self {
            BoardCommand::ChannelSettings { channel, .. } | BoardCommand::LeadOff { channel, .. } => {
                Some(*channel)
            }
            _ => None,
        }
    }
    /// True for a lead-off command that enables drive on either input.
    pub fn enables_lead_off(&self) -> bool {
        matches!(self, BoardCommand::LeadOff { p, n, .. } if *p || *n)
    }
    /// Whether the firmware answers this command with a `$$$`-terminated line.
    pub fn expects_response(&self) -> bool {
        !matches!(self, BoardCommand::StartStream | BoardCommand::StopStream)
    }
    pub fn to_ascii(&self) -> String {
        match self {
            BoardCommand::ChannelSettings { channel, settings } => format!(
                "x{}{}{}{}{}{}{}X",
                channel_char(*channel),
                flag(settings.power_down),
                settings.gain.code(),
                settings.input.code(),
                flag(settings.bias),
                flag(settings.srb2),
                flag(settings.srb1)
            ),
            BoardCommand::LeadOff { channel, p, n } => {
                format!("z{}{}{}Z", channel_char(*channel), flag(*p), flag(*n))
            }
            BoardCommand::ResetDefaults => "d".to_owned(),
            BoardCommand::StartStream => "b".to_owned(),
            BoardCommand::StopStream => "s".to_owned(),
            BoardCommand::SoftReset => "v".to_owned(),
        }
    }
}
impl fmt::Display for BoardCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_ascii())
    }
}
/// Channels 1-8 are addressed by digit, Daisy channels 9-16 by `QWERTYUI`.
fn channel_char(channel: u8) -> char {
    const DAISY: [char; 8] = ['Q', 'W', 'E', 'R', 'T', 'Y', 'U', 'I'];
    match channel {
        1..=8 => (b'0' + channel) as char,
        9..=16 => DAISY[(channel - 9) as usize],
        _ => '?',
    }
}
fn flag(on: bool) -> char {
    if on {
        '1'
    } else {
        '0'
    }
}
/// Firmware acknowledgments start with `Failure` when a command is refused.
pub fn is_failure_response(response: &str) -> bool {
    response.trim_start().starts_with("Failure")
}
