// src/drivers/mod.rs
// 声明同级目录下的子模块文件
pub mod buffer;
pub mod error;
pub mod fft;
pub mod filter;
pub mod resistance_detection;
pub mod rms;
pub mod source;
// 公开导出常用类型，方便外部调用
pub use buffer::{AcquiredSignal, SampleBuffer};
pub use error::ImpedanceError;
pub use fft::{dominant_frequency, SpectralPeak};
pub use filter::{bandpass, BandpassFilter, Passband};
pub use resistance_detection::{cyton_impedance_from_vrms, DriveCircuit};
pub use rms::{rms_of_tail, window_len};
pub use source::{AcquisitionWindow, BoardHandle, BoardLink, CancelToken, RunClaim, SampleFrame};
