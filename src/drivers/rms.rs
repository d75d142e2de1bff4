use crate::drivers::ImpedanceError;
/// Number of samples covering `seconds` at `sample_rate_hz`.
pub fn window_len(sample_rate_hz: f64, seconds: f64) -> usize {
    (sample_rate_hz * seconds).round().max(0.0) as usize
}
/// Root-mean-square of the last `window` samples.
///
/// Only the tail is used so the filter's start-up transient stays out of the
/// estimate. Fails with `InsufficientSamples` when the buffer is shorter than
/// the window (or the window is empty).
pub fn rms_of_tail(samples: &[f64], window: usize) -> Result<f64, ImpedanceError> {
    if window == 0 || samples.len() < window {
        return Err(ImpedanceError::InsufficientSamples {
            needed: window.max(1),
            available: samples.len(),
        });
    }
    let tail = &samples[samples.len() - window..];
    let sum_sq: f64 = tail.iter().map(|v| v * v).sum();
    Ok((sum_sq / window as f64).sqrt())
}
