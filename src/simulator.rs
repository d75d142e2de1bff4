//! Synthetic Cyton used for dry runs and tests.
//!
//! Each channel has an electrode impedance. While lead-off drive is enabled on
//! a channel its trace carries a sine whose peak is `I * (Z + R_series)`, on
//! top of a DC offset and uniform noise, so the full pipeline should read the
//! configured impedance back.
use std::collections::HashMap;
use std::f64::consts::PI;
use std::time::Duration;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use crate::cyton::{self, BoardCommand, ChannelSettings};
use crate::drivers::resistance_detection::{LEAD_OFF_DRIVE_AMPS, SERIES_RESISTOR_OHMS};
use crate::drivers::source::{BoardLink, SampleFrame};
use crate::drivers::ImpedanceError;
/// Frequency of the ADS1299 AC lead-off excitation used by OpenBCI.
pub const LEAD_OFF_FREQ_HZ: f64 = 31.25;
/// Injected misbehaviour for one channel.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum Fault {
    /// Channel settings and lead-off enable are answered with `Failure: ...`.
    RejectCommands,
    /// Channel settings and lead-off enable never get an answer.
    NoResponse,
    /// Lead-off drive cannot be switched off except by a full reset.
    StuckDrive,
    /// Streaming stalls while this channel is driven.
    StallStream,
    /// The stream ends after this many frames while this channel is driven.
    ShortStream(usize),
}
type CommandHook = Box<dyn FnMut(&BoardCommand) + Send>;
pub struct SimulatedBoard {
    sample_rate_hz: f64,
    electrodes_ohms: Vec<Option<f64>>,
    settings: Vec<ChannelSettings>,
    lead_off: Vec<bool>,
    dc_offset_uv: f64,
    noise_uv: f64,
    mains_uv: f64,
    realtime: bool,
    rng: StdRng,
    streaming: bool,
    tick: u64,
    frames_this_stream: usize,
    faults: HashMap<u8, Fault>,
    fail_reset: bool,
    hook: Option<CommandHook>,
    command_log: Vec<BoardCommand>,
    max_driven: usize,
}
impl SimulatedBoard {
    /// Cyton-like board (250 Hz) with every electrode at `impedance_ohms`.
    pub fn cyton(channel_count: usize, impedance_ohms: f64) -> Self {
        Self {
            sample_rate_hz: 250.0,
            electrodes_ohms: vec![Some(impedance_ohms); channel_count],
            settings: vec![ChannelSettings::STREAM_DEFAULT; channel_count],
            lead_off: vec![false; channel_count],
            dc_offset_uv: 20_000.0,
            noise_uv: 1.0,
            mains_uv: 0.0,
            realtime: false,
            rng: StdRng::seed_from_u64(0x0B_C1),
            streaming: false,
            tick: 0,
            frames_this_stream: 0,
            faults: HashMap::new(),
            fail_reset: false,
            hook: None,
            command_log: Vec::new(),
            max_driven: 0,
        }
    }
    pub fn with_sample_rate(mut self, sample_rate_hz: f64) -> Self {
        self.sample_rate_hz = sample_rate_hz;
        self
    }
    /// Sets one electrode; `None` models a detached lead.
    pub fn with_electrode(mut self, channel: u8, impedance_ohms: Option<f64>) -> Self {
        if let Some(slot) = usize::from(channel).checked_sub(1).and_then(|i| self.electrodes_ohms.get_mut(i)) {
            *slot = impedance_ohms;
        }
        self
    }
    pub fn with_noise(mut self, noise_uv: f64) -> Self {
        self.noise_uv = noise_uv;
        self
    }
    pub fn with_mains(mut self, mains_uv: f64) -> Self {
        self.mains_uv = mains_uv;
        self
    }
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.rng = StdRng::seed_from_u64(seed);
        self
    }
    /// Paces frames at the sample rate instead of returning them instantly.
    pub fn with_realtime(mut self, realtime: bool) -> Self {
        self.realtime = realtime;
        self
    }
    pub fn with_fault(mut self, channel: u8, fault: Fault) -> Self {
        self.faults.insert(channel, fault);
        self
    }
    pub fn with_failing_reset(mut self) -> Self {
        self.fail_reset = true;
        self
    }
    /// Runs `hook` after every command the board accepts or rejects.
    pub fn with_command_hook(mut self, hook: impl FnMut(&BoardCommand) + Send + 'static) -> Self {
        self.hook = Some(Box::new(hook));
        self
    }
    pub fn command_log(&self) -> &[BoardCommand] {
        &self.command_log
    }
    /// Highest number of channels that were driven at the same time.
    pub fn max_simultaneous_drive(&self) -> usize {
        self.max_driven
    }
    pub fn driven_channels(&self) -> Vec<u8> {
        self.lead_off
            .iter()
            .enumerate()
            .filter(|(_, on)| **on)
            .map(|(i, _)| i as u8 + 1)
            .collect()
    }
    pub fn channel_settings(&self, channel: u8) -> Option<ChannelSettings> {
        self.settings.get(usize::from(channel).checked_sub(1)?).copied()
    }
    fn driven_fault(&self) -> Option<Fault> {
        self.driven_channels()
            .into_iter()
            .find_map(|ch| self.faults.get(&ch).copied())
    }
    fn apply(&mut self, command: &BoardCommand) -> String {
        match *command {
            BoardCommand::ChannelSettings { channel, settings } => {
                if let Some(slot) = usize::from(channel).checked_sub(1).and_then(|i| self.settings.get_mut(i)) {
                    *slot = settings;
                }
                format!("Success: Channel set for {channel}{}", cyton::RESPONSE_TERMINATOR)
            }
            BoardCommand::LeadOff { channel, p, n } => {
                if let Some(slot) = usize::from(channel).checked_sub(1).and_then(|i| self.lead_off.get_mut(i)) {
                    *slot = p || n;
                }
                format!("Success: Lead off set for {channel}{}", cyton::RESPONSE_TERMINATOR)
            }
            BoardCommand::ResetDefaults => {
                self.settings.fill(ChannelSettings::STREAM_DEFAULT);
                self.lead_off.fill(false);
                format!("updating channel settings to default{}", cyton::RESPONSE_TERMINATOR)
            }
            BoardCommand::SoftReset => format!(
                "OpenBCI V3 8-16 channel\nOn Board ADS1299 Device ID: 0x3E\n{}",
                cyton::RESPONSE_TERMINATOR
            ),
            BoardCommand::StartStream | BoardCommand::StopStream => String::new(),
        }
    }
    fn channel_voltage(&mut self, index: usize, t: f64) -> f64 {
        let gain = self.settings[index].gain;
        let rail = gain.full_scale_microvolts();
        let mut v = self.dc_offset_uv;
        if self.noise_uv > 0.0 {
            v += self.rng.gen_range(-self.noise_uv..=self.noise_uv);
        }
        v += self.mains_uv * (2.0 * PI * 60.0 * t).sin();
        if self.lead_off[index] {
            match self.electrodes_ohms[index] {
                Some(z) => {
                    let peak_uv = LEAD_OFF_DRIVE_AMPS * (z + SERIES_RESISTOR_OHMS) * 1.0e6;
                    v += peak_uv * (2.0 * PI * LEAD_OFF_FREQ_HZ * t).sin();
                }
                // Detached lead: the drive current pushes the input into the rail.
                None => v = rail,
            }
        }
        v.clamp(-rail, rail)
    }
}
impl BoardLink for SimulatedBoard {
    fn sample_rate_hz(&self) -> f64 {
        self.sample_rate_hz
    }
    fn channel_count(&self) -> usize {
        self.electrodes_ohms.len()
    }
    fn write_register(&mut self, command: &BoardCommand, timeout: Duration) -> Result<String, ImpedanceError> {
        self.command_log.push(*command);
        let fault = command.channel().and_then(|ch| self.faults.get(&ch).copied());
        let configures = matches!(command, BoardCommand::ChannelSettings { .. }) || command.enables_lead_off();
        let releases_drive = matches!(command, BoardCommand::LeadOff { channel, .. }
            if !command.enables_lead_off() && self.driven_channels().contains(channel));
        let result = match (fault, command) {
            (_, BoardCommand::ResetDefaults) if self.fail_reset => Err(ImpedanceError::Timeout(timeout)),
            (Some(Fault::RejectCommands), _) if configures => Err(ImpedanceError::BoardCommand {
                command: command.to_ascii(),
                response: format!("Failure: invalid channel command{}", cyton::RESPONSE_TERMINATOR),
            }),
            (Some(Fault::NoResponse), _) if configures => Err(ImpedanceError::Timeout(timeout)),
            (Some(Fault::StuckDrive), _) if releases_drive => Err(ImpedanceError::BoardCommand {
                command: command.to_ascii(),
                response: format!("Failure: lead off not changed{}", cyton::RESPONSE_TERMINATOR),
            }),
            _ => {
                let response = self.apply(command);
                self.max_driven = self.max_driven.max(self.driven_channels().len());
                Ok(response)
            }
        };
        if let Some(hook) = self.hook.as_mut() {
            hook(command);
        }
        result
    }
    fn start_stream(&mut self) -> Result<(), ImpedanceError> {
        self.command_log.push(BoardCommand::StartStream);
        self.streaming = true;
        self.frames_this_stream = 0;
        Ok(())
    }
    fn next_frame(&mut self, timeout: Duration) -> Result<Option<SampleFrame>, ImpedanceError> {
        if !self.streaming {
            return Err(ImpedanceError::Transport("stream not started".into()));
        }
        match self.driven_fault() {
            Some(Fault::StallStream) => return Err(ImpedanceError::Timeout(timeout)),
            Some(Fault::ShortStream(limit)) if self.frames_this_stream >= limit => return Ok(None),
            _ => {}
        }
        if self.realtime {
            std::thread::sleep(Duration::from_secs_f64(1.0 / self.sample_rate_hz));
        }
        let t = self.tick as f64 / self.sample_rate_hz;
        let microvolts = (0..self.channel_count())
            .map(|i| self.channel_voltage(i, t))
            .collect();
        let frame = SampleFrame {
            sample_index: (self.tick % 256) as u32,
            microvolts,
        };
        self.tick += 1;
        self.frames_this_stream += 1;
        Ok(Some(frame))
    }
    fn stop_stream(&mut self) -> Result<(), ImpedanceError> {
        self.command_log.push(BoardCommand::StopStream);
        self.streaming = false;
        Ok(())
    }
}
#[cfg(test)]
mod tests {
    use super::*;
    use crate::cyton::LeadOffSide;
    const T: Duration = Duration::from_millis(100);
    #[test]
    fn drive_tone_appears_only_when_enabled() {
        let mut board = SimulatedBoard::cyton(2, 10_000.0).with_noise(0.0);
        board.start_stream().unwrap();
        let quiet = board.next_frame(T).unwrap().unwrap();
        assert_eq!(quiet.microvolts[0], 20_000.0);
        board.write_register(&BoardCommand::lead_off_on(1, LeadOffSide::N), T).unwrap();
        let peak = (0..8)
            .map(|_| board.next_frame(T).unwrap().unwrap().microvolts[0] - 20_000.0)
            .fold(0.0f64, |acc, v| acc.max(v.abs()));
        assert!(peak > 50.0);
        assert_eq!(board.driven_channels(), vec![1]);
    }
    #[test]
    fn reset_clears_drive_and_settings() {
        let mut board = SimulatedBoard::cyton(4, 5_000.0);
        board
            .write_register(
                &BoardCommand::ChannelSettings {
                    channel: 2,
                    settings: ChannelSettings::IMPEDANCE,
                },
                T,
            )
            .unwrap();
        board.write_register(&BoardCommand::lead_off_on(2, LeadOffSide::N), T).unwrap();
        board.write_register(&BoardCommand::ResetDefaults, T).unwrap();
        assert!(board.driven_channels().is_empty());
        assert_eq!(board.channel_settings(2), Some(ChannelSettings::STREAM_DEFAULT));
    }
    #[test]
    fn faults_surface_as_errors() {
        let mut board = SimulatedBoard::cyton(3, 5_000.0)
            .with_fault(2, Fault::RejectCommands)
            .with_fault(3, Fault::NoResponse);
        assert!(matches!(
            board.write_register(&BoardCommand::lead_off_on(2, LeadOffSide::N), T),
            Err(ImpedanceError::BoardCommand { .. })
        ));
        assert!(matches!(
            board.write_register(&BoardCommand::lead_off_on(3, LeadOffSide::N), T),
            Err(ImpedanceError::Timeout(_))
        ));
        // Switching drive off is still accepted.
        assert!(board.write_register(&BoardCommand::lead_off_off(2), T).is_ok());
        assert_eq!(board.command_log().len(), 3);
    }
    #[test]
    fn stuck_drive_only_clears_on_reset() {
        let mut board = SimulatedBoard::cyton(2, 5_000.0).with_fault(1, Fault::StuckDrive);
        board.write_register(&BoardCommand::lead_off_on(1, LeadOffSide::N), T).unwrap();
        assert!(board.write_register(&BoardCommand::lead_off_off(1), T).is_err());
        assert_eq!(board.driven_channels(), vec![1]);
        board.write_register(&BoardCommand::ResetDefaults, T).unwrap();
        assert!(board.write_register(&BoardCommand::lead_off_off(1), T).is_ok());
        assert!(board.driven_channels().is_empty());
    }
    #[test]
    fn channel_zero_is_ignored() {
        let mut board = SimulatedBoard::cyton(2, 5_000.0).with_electrode(0, None);
        board.write_register(&BoardCommand::lead_off_on(0, LeadOffSide::N), T).unwrap();
        board
            .write_register(
                &BoardCommand::ChannelSettings {
                    channel: 0,
                    settings: ChannelSettings::IMPEDANCE,
                },
                T,
            )
            .unwrap();
        assert!(board.driven_channels().is_empty());
        assert_eq!(board.channel_settings(0), None);
        assert_eq!(board.channel_settings(1), Some(ChannelSettings::STREAM_DEFAULT));
    }
    #[test]
    fn same_seed_gives_same_noise() {
        let frames = |seed| {
            let mut board = SimulatedBoard::cyton(1, 5_000.0).with_noise(3.0).with_seed(seed);
            board.start_stream().unwrap();
            (0..16)
                .map(|_| board.next_frame(T).unwrap().unwrap().microvolts[0])
                .collect::<Vec<_>>()
        };
        assert_eq!(frames(7), frames(7));
        assert_ne!(frames(7), frames(8));
    }
    #[test]
    fn custom_sample_rate_is_reported() {
        let board = SimulatedBoard::cyton(1, 5_000.0).with_sample_rate(500.0);
        assert_eq!(board.sample_rate_hz(), 500.0);
    }
    #[test]
    fn frames_require_stream() {
        let mut board = SimulatedBoard::cyton(1, 5_000.0);
        assert!(board.next_frame(T).is_err());
    }
}
