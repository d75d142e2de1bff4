//! Causal Butterworth band-pass used ahead of the RMS estimate.
//!
//! The pass band is built from a 4th-order high-pass at the low edge cascaded
//! with a 4th-order low-pass at the high edge. Each order-4 stage is two RBJ
//! biquads with the Butterworth pole Q values, so the cascade has the same
//! magnitude response as the `iirfilter(4, band, 'band')` design used by the
//! OpenBCI tooling, applied forward only.
use std::f64::consts::PI;
/// Q of the two biquads that make up a 4th-order Butterworth section.
const BUTTERWORTH_Q4: [f64; 2] = [0.541_196_100_146_197, 1.306_562_964_876_376_7];
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Passband {
    pub low_hz: f64,
    pub high_hz: f64,
}
impl Passband {
    pub fn new(low_hz: f64, high_hz: f64) -> Self {
        Self { low_hz, high_hz }
    }
    pub fn contains(&self, freq_hz: f64) -> bool {
        freq_hz >= self.low_hz && freq_hz <= self.high_hz
    }
}
impl Default for Passband {
    fn default() -> Self {
        Self::new(5.0, 50.0)
    }
}
#[derive(Clone, Copy, Debug)]
struct BiquadCoeffs {
    b0: f64,
    b1: f64,
    b2: f64,
    a1: f64,
    a2: f64,
}
#[derive(Clone, Copy, Debug, Default)]
struct BiquadState {
    z1: f64,
    z2: f64,
}
#[derive(Clone, Copy, Debug)]
struct BiquadFilter {
    coeffs: BiquadCoeffs,
    state: BiquadState,
}
impl BiquadFilter {
    fn new(coeffs: BiquadCoeffs) -> Self {
        Self {
            coeffs,
            state: BiquadState::default(),
        }
    }
    fn process(&mut self, input: f64) -> f64 {
        // Transposed direct form II
        let y = self.coeffs.b0 * input + self.state.z1;
        self.state.z1 = self.coeffs.b1 * input - self.coeffs.a1 * y + self.state.z2;
        self.state.z2 = self.coeffs.b2 * input - self.coeffs.a2 * y;
        y
    }
}
/// Coefficients plus delay line for one channel's pass.
///
/// Build a new one for every channel; a `BandpassFilter` is never reset and
/// reused so no signal history crosses channels.
#[derive(Debug)]
pub struct BandpassFilter {
    sections: Vec<BiquadFilter>,
    band: Passband,
}
impl BandpassFilter {
    pub fn new(sample_rate_hz: f64, band: Passband) -> Self {
        let nyquist = sample_rate_hz * 0.5;
        let (low, high) = band_edges(band.low_hz, band.high_hz, nyquist);
        if low != band.low_hz || high != band.high_hz {
            log::warn!(
                "passband {:.2}-{:.2} Hz clamped to {:.2}-{:.2} Hz (fs = {:.1} Hz)",
                band.low_hz,
                band.high_hz,
                low,
                high,
                sample_rate_hz
            );
        }
        let mut sections = Vec::with_capacity(4);
        for q in BUTTERWORTH_Q4 {
            sections.push(BiquadFilter::new(highpass(low, sample_rate_hz, q)));
        }
        for q in BUTTERWORTH_Q4 {
            sections.push(BiquadFilter::new(lowpass(high, sample_rate_hz, q)));
        }
        Self {
            sections,
            band: Passband::new(low, high),
        }
    }
    /// Effective band after clamping to the sample rate.
    pub fn band(&self) -> Passband {
        self.band
    }
    pub fn process_sample(&mut self, mut value: f64) -> f64 {
        for section in &mut self.sections {
            value = section.process(value);
        }
        value
    }
    /// Filters a whole acquisition, consuming the filter.
    pub fn apply(mut self, samples: &[f64]) -> Vec<f64> {
        samples.iter().map(|&x| self.process_sample(x)).collect()
    }
}
/// One-shot helper: fresh filter state, same-length output.
pub fn bandpass(samples: &[f64], sample_rate_hz: f64, band: Passband) -> Vec<f64> {
    BandpassFilter::new(sample_rate_hz, band).apply(samples)
}
fn nyquist_clamp(freq_hz: f64, nyquist: f64) -> f64 {
    freq_hz.clamp(0.01, nyquist * 0.99)
}
fn band_edges(low_hz: f64, high_hz: f64, nyquist: f64) -> (f64, f64) {
    let low = nyquist_clamp(low_hz.min(high_hz), nyquist);
    let high = nyquist_clamp(low_hz.max(high_hz), nyquist);
    (low, high)
}
fn lowpass(freq_hz: f64, sample_rate_hz: f64, q: f64) -> BiquadCoeffs {
    let w0 = 2.0 * PI * freq_hz / sample_rate_hz;
    let alpha = w0.sin() / (2.0 * q);
    let cos_w0 = w0.cos();
    let b0 = (1.0 - cos_w0) * 0.5;
    let b1 = 1.0 - cos_w0;
    let b2 = b0;
    let a0 = 1.0 + alpha;
    let a1 = -2.0 * cos_w0;
    let a2 = 1.0 - alpha;
    normalize(b0, b1, b2, a0, a1, a2)
}
fn highpass(freq_hz: f64, sample_rate_hz: f64, q: f64) -> BiquadCoeffs {
    let w0 = 2.0 * PI * freq_hz / sample_rate_hz;
    let alpha = w0.sin() / (2.0 * q);
    let cos_w0 = w0.cos();
    let b0 = (1.0 + cos_w0) * 0.5;
    let b1 = -(1.0 + cos_w0);
    let b2 = b0;
    let a0 = 1.0 + alpha;
    let a1 = -2.0 * cos_w0;
    let a2 = 1.0 - alpha;
    normalize(b0, b1, b2, a0, a1, a2)
}
fn normalize(b0: f64, b1: f64, b2: f64, a0: f64, a1: f64, a2: f64) -> BiquadCoeffs {
    let a0_inv = 1.0 / a0;
    BiquadCoeffs {
        b0: b0 * a0_inv,
        b1: b1 * a0_inv,
        b2: b2 * a0_inv,
        a1: a1 * a0_inv,
        a2: a2 * a0_inv,
    }
}
#[cfg(test)]
mod tests {
    use super::*;
    use crate::drivers::rms::rms_of_tail;
    fn tone(freq_hz: f64, amplitude: f64, fs: f64, seconds: f64) -> Vec<f64> {
        let n = (fs * seconds).round() as usize;
        (0..n)
            .map(|i| amplitude * (2.0 * PI * freq_hz * i as f64 / fs).sin())
            .collect()
    }
    fn tail_rms(samples: &[f64], fs: f64) -> f64 {
        let filtered = bandpass(samples, fs, Passband::default());
        rms_of_tail(&filtered, fs as usize).unwrap()
    }
    #[test]
    fn output_has_same_length() {
        let x = tone(20.0, 10.0, 250.0, 2.0);
        assert_eq!(bandpass(&x, 250.0, Passband::default()).len(), x.len());
    }
    #[test]
    fn in_band_tone_keeps_its_rms() {
        let fs = 250.0;
        let amplitude = 50.0;
        let injected = amplitude / 2f64.sqrt();
        let measured = tail_rms(&tone(20.0, amplitude, fs, 2.0), fs);
        assert!(
            ((measured - injected) / injected).abs() < 0.02,
            "measured {measured}, injected {injected}"
        );
    }
    #[test]
    fn in_band_tone_survives_dc_offset() {
        let fs = 250.0;
        let amplitude = 50.0;
        let injected = amplitude / 2f64.sqrt();
        let x: Vec<f64> = tone(31.25, amplitude, fs, 2.0)
            .into_iter()
            .map(|v| v + 25_000.0)
            .collect();
        let measured = tail_rms(&x, fs);
        assert!(((measured - injected) / injected).abs() < 0.02);
    }
    #[test]
    fn low_frequency_tone_is_rejected() {
        let fs = 250.0;
        let injected = 100.0 / 2f64.sqrt();
        let measured = tail_rms(&tone(1.0, 100.0, fs, 2.0), fs);
        assert!(measured < 0.05 * injected, "1 Hz leaked: {measured}");
    }
    #[test]
    fn high_frequency_tone_is_rejected() {
        // 200 Hz needs a sample rate above 400 Hz to be representable.
        let fs = 1000.0;
        let injected = 100.0 / 2f64.sqrt();
        let measured = tail_rms(&tone(200.0, 100.0, fs, 2.0), fs);
        assert!(measured < 0.05 * injected, "200 Hz leaked: {measured}");
    }
    #[test]
    fn band_is_clamped_below_nyquist() {
        let filter = BandpassFilter::new(80.0, Passband::new(5.0, 50.0));
        assert!(filter.band().high_hz < 40.0);
        assert_eq!(filter.band().low_hz, 5.0);
    }
    #[test]
    fn output_depends_only_on_past_input() {
        let fs = 250.0;
        let mut a = tone(20.0, 10.0, fs, 1.0);
        let b = a.clone();
        let cut = a.len() / 2;
        for v in a.iter_mut().skip(cut) {
            *v = 0.0;
        }
        let fa = bandpass(&a, fs, Passband::default());
        let fb = bandpass(&b, fs, Passband::default());
        assert_eq!(&fa[..cut], &fb[..cut]);
    }
}
