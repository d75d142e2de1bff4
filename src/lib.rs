//! Electrode impedance check for OpenBCI Cyton boards.
//!
//! Each channel is measured in turn: the ADS1299 lead-off current source drives
//! the electrode, the resulting 31.25 Hz voltage is band-passed, its RMS over
//! the trailing window is taken and converted to ohms. Registers are restored
//! to defaults once the run ends, however it ends.
pub mod config;
pub mod cyton;
pub mod drivers;
pub mod engine;
pub mod openbci;
pub mod presenter;
pub mod serial;
pub mod simulator;
pub mod types;

pub use config::MeasurementConfig;
pub use drivers::{BoardHandle, BoardLink, CancelToken, ImpedanceError};
pub use engine::{check_impedance, ChannelPhase, ImpedanceSequencer};
pub use types::{ChannelOutcome, FailureReason, ImpedanceResult, MeasurementReport};
