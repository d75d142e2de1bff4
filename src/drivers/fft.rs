use rustfft::{num_complex::Complex64, FftPlanner};
use crate::drivers::filter::Passband;
/// Strongest spectral line of one channel's acquisition.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct SpectralPeak {
    pub frequency_hz: f64,
    pub magnitude: f64,
}
/// Finds the dominant frequency inside `band`.
///
/// Used as a sanity check that the energy we measure is the lead-off drive
/// tone and not mains or motion.
pub fn dominant_frequency(samples: &[f64], sample_rate_hz: f64, band: Passband) -> Option<SpectralPeak> {
    let fft_size = samples.len();
    if fft_size < 4 || sample_rate_hz <= 0.0 {
        return None;
    }
    let mut planner = FftPlanner::<f64>::new();
    let fft = planner.plan_fft_forward(fft_size);
    let mean = samples.iter().sum::<f64>() / fft_size as f64;
    let mut buffer: Vec<Complex64> = samples
        .iter()
        .map(|&v| Complex64::new(v - mean, 0.0))
        .collect();
    fft.process(&mut buffer);
    let bin_hz = sample_rate_hz / fft_size as f64;
    buffer
        .iter()
        .take(fft_size / 2)
        .enumerate()
        .map(|(k, c)| SpectralPeak {
            frequency_hz: k as f64 * bin_hz,
            magnitude: c.norm() / fft_size as f64,
        })
        .filter(|peak| band.contains(peak.frequency_hz))
        .max_by(|a, b| a.magnitude.total_cmp(&b.magnitude))
}
