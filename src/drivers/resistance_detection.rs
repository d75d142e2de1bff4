//! Cyton impedance from the RMS voltage measured under lead-off drive.
//!
//! The ADS1299 pushes a known AC current through the electrode, so the peak
//! voltage across electrode + series resistor is `sqrt(2) * Vrms`:
//!
//! `impedance = sqrt(2) * Vrms / lead_off_drive_amps - series_resistor_ohms`
//!
//! The result is never clamped. A value below zero means the reading is
//! smaller than the on-board series resistor (open lead or no drive) and is
//! flagged by the caller.
/// Series resistor used on the Cyton board (ohms).
pub const SERIES_RESISTOR_OHMS: f64 = 2200.0;
/// Lead-off drive current configured on Cyton (amps).
pub const LEAD_OFF_DRIVE_AMPS: f64 = 6.0e-9;
/// Drive current and series resistance of the measurement circuit.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct DriveCircuit {
    pub drive_amps: f64,
    pub series_ohms: f64,
}
impl Default for DriveCircuit {
    fn default() -> Self {
        Self {
            drive_amps: LEAD_OFF_DRIVE_AMPS,
            series_ohms: SERIES_RESISTOR_OHMS,
        }
    }
}
impl DriveCircuit {
    /// Impedance (ohms) for an RMS voltage given in volts.
    pub fn impedance_ohms(&self, vrms_volts: f64) -> f64 {
        (2.0_f64.sqrt() * vrms_volts) / self.drive_amps - self.series_ohms
    }
    /// Smallest RMS voltage that still maps to a non-negative impedance.
    pub fn zero_impedance_vrms(&self) -> f64 {
        self.series_ohms * self.drive_amps / 2.0_f64.sqrt()
    }
}
/// Impedance (ohms) with the stock Cyton constants.
pub fn cyton_impedance_from_vrms(vrms_volts: f64) -> f64 {
    DriveCircuit::default().impedance_ohms(vrms_volts)
}
pub fn microvolts_to_volts(microvolts: f64) -> f64 {
    microvolts * 1.0e-6
}
