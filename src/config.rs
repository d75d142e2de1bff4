use std::path::Path;
use std::time::Duration;
use anyhow::Context;
use serde::{Deserialize, Serialize};
use crate::cyton::LeadOffSide;
use crate::drivers::filter::Passband;
use crate::drivers::resistance_detection::{DriveCircuit, LEAD_OFF_DRIVE_AMPS, SERIES_RESISTOR_OHMS};
use crate::drivers::ImpedanceError;
/// Largest board supported (Cyton + Daisy).
pub const MAX_CHANNELS: usize = 16;
/// Immutable parameters of one impedance run.
///
/// Durations are in seconds so the struct maps directly onto a JSON file.
/// Call [`MeasurementConfig::validate`] (or load through
/// [`MeasurementConfig::from_json_file`]) before handing it to the sequencer.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MeasurementConfig {
    pub port: String,
    pub channel_count: usize,
    pub drive_current_amps: f64,
    pub series_resistance_ohms: f64,
    pub settle_secs: f64,
    pub acquisition_secs: f64,
    pub rms_window_secs: f64,
    pub passband_low_hz: f64,
    pub passband_high_hz: f64,
    /// Upper bound on every single board interaction.
    pub command_timeout_secs: f64,
    pub lead_off_side: LeadOffSide,
    /// Raw readings at or beyond this magnitude (µV) count as saturated.
    pub rail_microvolts: f64,
}
impl Default for MeasurementConfig {
    fn default() -> Self {
        Self {
            port: String::from("/dev/ttyUSB0"),
            channel_count: 8,
            drive_current_amps: LEAD_OFF_DRIVE_AMPS,
            series_resistance_ohms: SERIES_RESISTOR_OHMS,
            settle_secs: 2.0,
            acquisition_secs: 2.0,
            rms_window_secs: 1.0,
            passband_low_hz: 5.0,
            passband_high_hz: 50.0,
            command_timeout_secs: 3.0,
            lead_off_side: LeadOffSide::N,
            // ADS1299 full scale at gain x1
            rail_microvolts: 4_500_000.0,
        }
    }
}
impl MeasurementConfig {
    pub fn for_port(port: impl Into<String>) -> Self {
        Self {
            port: port.into(),
            ..Self::default()
        }
    }
    pub fn from_json_file(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config {}", path.display()))?;
        let config: Self = serde_json::from_str(&text)
            .with_context(|| format!("failed to parse config {}", path.display()))?;
        config.validate()?;
        Ok(config)
    }
    pub fn with_channel_count(mut self, channel_count: usize) -> Self {
        self.channel_count = channel_count;
        self
    }
    pub fn with_settle(mut self, settle: Duration) -> Self {
        self.settle_secs = settle.as_secs_f64();
        self
    }
    pub fn with_acquisition(mut self, acquisition: Duration) -> Self {
        self.acquisition_secs = acquisition.as_secs_f64();
        self
    }
    pub fn with_rms_window(mut self, window: Duration) -> Self {
        self.rms_window_secs = window.as_secs_f64();
        self
    }
    pub fn with_command_timeout(mut self, timeout: Duration) -> Self {
        self.command_timeout_secs = timeout.as_secs_f64();
        self
    }
    pub fn with_passband(mut self, low_hz: f64, high_hz: f64) -> Self {
        self.passband_low_hz = low_hz;
        self.passband_high_hz = high_hz;
        self
    }
    pub fn with_lead_off_side(mut self, side: LeadOffSide) -> Self {
        self.lead_off_side = side;
        self
    }
    pub fn validate(&self) -> Result<(), ImpedanceError> {
        let invalid = |msg: String| Err(ImpedanceError::InvalidConfig(msg));
        if self.port.trim().is_empty() {
            return invalid("port identifier is empty".into());
        }
        if self.channel_count == 0 || self.channel_count > MAX_CHANNELS {
            return invalid(format!(
                "channel count must be 1..={MAX_CHANNELS}, got {}",
                self.channel_count
            ));
        }
        for (name, value) in [
            ("drive current", self.drive_current_amps),
            ("acquisition duration", self.acquisition_secs),
            ("RMS window", self.rms_window_secs),
            ("command timeout", self.command_timeout_secs),
            ("rail level", self.rail_microvolts),
        ] {
            if !value.is_finite() || value <= 0.0 {
                return invalid(format!("{name} must be positive, got {value}"));
            }
        }
        if !self.settle_secs.is_finite() || self.settle_secs < 0.0 {
            return invalid(format!("settle duration must be >= 0, got {}", self.settle_secs));
        }
        if !self.series_resistance_ohms.is_finite() || self.series_resistance_ohms < 0.0 {
            return invalid(format!(
                "series resistance must be >= 0, got {}",
                self.series_resistance_ohms
            ));
        }
        if !(self.passband_low_hz > 0.0 && self.passband_low_hz < self.passband_high_hz) {
            return invalid(format!(
                "passband must satisfy 0 < low < high, got {}-{} Hz",
                self.passband_low_hz, self.passband_high_hz
            ));
        }
        if self.acquisition_secs < self.rms_window_secs {
            log::warn!(
                "acquisition ({:.2} s) is shorter than the RMS window ({:.2} s); every channel will fail",
                self.acquisition_secs,
                self.rms_window_secs
            );
        }
        Ok(())
    }
    pub fn passband(&self) -> Passband {
        Passband::new(self.passband_low_hz, self.passband_high_hz)
    }
    pub fn circuit(&self) -> DriveCircuit {
        DriveCircuit {
            drive_amps: self.drive_current_amps,
            series_ohms: self.series_resistance_ohms,
        }
    }
    pub fn settle(&self) -> Duration {
        Duration::from_secs_f64(self.settle_secs)
    }
    pub fn command_timeout(&self) -> Duration {
        Duration::from_secs_f64(self.command_timeout_secs)
    }
    /// Channel identifiers in measurement order.
    pub fn channels(&self) -> impl Iterator<Item = u8> {
        1..=self.channel_count as u8
    }
}
#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    #[test]
    fn defaults_are_valid() {
        let config = MeasurementConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.channels().collect::<Vec<_>>(), (1..=8).collect::<Vec<u8>>());
    }
    #[test]
    fn rejects_inverted_passband() {
        let config = MeasurementConfig::default().with_passband(50.0, 5.0);
        assert!(matches!(config.validate(), Err(ImpedanceError::InvalidConfig(_))));
    }
    #[test]
    fn rejects_bad_channel_count() {
        assert!(MeasurementConfig::default().with_channel_count(0).validate().is_err());
        assert!(MeasurementConfig::default().with_channel_count(17).validate().is_err());
        assert!(MeasurementConfig::default().with_channel_count(16).validate().is_ok());
    }
    #[test]
    fn rejects_empty_port() {
        assert!(MeasurementConfig::for_port("  ").validate().is_err());
    }
    #[test]
    fn short_acquisition_is_accepted() {
        let config = MeasurementConfig::default()
            .with_acquisition(Duration::from_millis(500))
            .with_rms_window(Duration::from_secs(1));
        assert!(config.validate().is_ok());
    }
    #[test]
    fn loads_partial_json() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"{{ "port": "COM3", "acquisition_secs": 6.0, "lead_off_side": "P" }}"#
        )
        .unwrap();
        let config = MeasurementConfig::from_json_file(file.path()).unwrap();
        assert_eq!(config.port, "COM3");
        assert_eq!(config.acquisition_secs, 6.0);
        assert_eq!(config.lead_off_side, LeadOffSide::P);
        assert_eq!(config.channel_count, 8);
    }
    #[test]
    fn invalid_json_config_is_rejected() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"{{ "channel_count": 0 }}"#).unwrap();
        assert!(MeasurementConfig::from_json_file(file.path()).is_err());
    }
}
