use std::time::{Duration, Instant};
use crate::drivers::ImpedanceError;
/// Raw samples (µV) captured for one channel's acquisition window.
///
/// Append-only while acquiring; `freeze` turns it into an immutable
/// `AcquiredSignal`.
pub struct SampleBuffer {
    channel: u8,
    sample_rate_hz: f64,
    started_at: Instant,
    samples: Vec<f64>,
    capacity: usize,
}
impl SampleBuffer {
    pub fn with_duration(channel: u8, sample_rate_hz: f64, seconds: f64) -> Result<Self, ImpedanceError> {
        if sample_rate_hz <= 0.0 {
            return Err(ImpedanceError::InvalidConfig(format!(
                "sample rate must be greater than zero, got {sample_rate_hz}"
            )));
        }
        let capacity = (sample_rate_hz * seconds).round().max(0.0) as usize;
        Ok(Self {
            channel,
            sample_rate_hz,
            started_at: Instant::now(),
            samples: Vec::with_capacity(capacity),
            capacity,
        })
    }
    pub fn channel(&self) -> u8 {
        self.channel
    }
    /// Nominal number of samples in the window.
    pub fn capacity(&self) -> usize {
        self.capacity
    }
    pub fn len(&self) -> usize {
        self.samples.len()
    }
    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }
    pub fn is_full(&self) -> bool {
        self.samples.len() >= self.capacity
    }
    /// Appends one sample; samples past the nominal window are dropped.
    pub fn push(&mut self, value: f64) -> bool {
        if self.is_full() {
            return false;
        }
        self.samples.push(value);
        true
    }
    pub fn freeze(self) -> AcquiredSignal {
        AcquiredSignal {
            channel: self.channel,
            sample_rate_hz: self.sample_rate_hz,
            started_at: self.started_at,
            samples: self.samples.into_boxed_slice(),
        }
    }
}
/// Immutable result of an acquisition window.
#[derive(Clone, Debug)]
pub struct AcquiredSignal {
    channel: u8,
    sample_rate_hz: f64,
    started_at: Instant,
    samples: Box<[f64]>,
}
impl AcquiredSignal {
    pub fn channel(&self) -> u8 {
        self.channel
    }
    pub fn sample_rate_hz(&self) -> f64 {
        self.sample_rate_hz
    }
    pub fn samples(&self) -> &[f64] {
        &self.samples
    }
    pub fn duration(&self) -> Duration {
        Duration::from_secs_f64(self.samples.len() as f64 / self.sample_rate_hz)
    }
    /// Timestamp of sample `index`, relative to the start of the window.
    pub fn time_of(&self, index: usize) -> Option<Instant> {
        (index < self.samples.len())
            .then(|| self.started_at + Duration::from_secs_f64(index as f64 / self.sample_rate_hz))
    }
    /// Largest absolute raw value, used for rail detection.
    pub fn peak_abs(&self) -> f64 {
        self.samples.iter().fold(0.0f64, |acc, v| acc.max(v.abs()))
    }
}
