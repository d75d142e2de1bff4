// src/presenter.rs
use crate::types::{ImpedanceResult, MeasurementReport};

const ANSI_GREEN: &str = "\x1b[32m";
const ANSI_YELLOW: &str = "\x1b[33m";
const ANSI_RED: &str = "\x1b[31m";
const ANSI_GRAY: &str = "\x1b[90m";
const ANSI_RESET: &str = "\x1b[0m";

// 阻抗阈值 (kΩ)，沿用 OpenBCI GUI 的分级
pub const GOOD_MAX_KOHMS: f64 = 750.0;
pub const FAIR_MAX_KOHMS: f64 = 2500.0;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Quality {
    Good,
    Fair,
    Poor,
    Invalid,
}

impl Quality {
    pub fn of(result: &ImpedanceResult) -> Self {
        match result.impedance_kohms() {
            Some(k) if result.valid && k <= GOOD_MAX_KOHMS => Quality::Good,
            Some(k) if result.valid && k <= FAIR_MAX_KOHMS => Quality::Fair,
            Some(_) if result.valid => Quality::Poor,
            _ => Quality::Invalid,
        }
    }

    fn ansi(self) -> &'static str {
        match self {
            Quality::Good => ANSI_GREEN,
            Quality::Fair => ANSI_YELLOW,
            Quality::Poor => ANSI_RED,
            Quality::Invalid => ANSI_GRAY,
        }
    }
}

/// Plain one-line description of a channel result.
pub fn summary_text(result: &ImpedanceResult) -> String {
    let label = format!("CH{}({})", result.channel, result.cable_color());
    match (result.failure(), result.impedance_kohms()) {
        (Some(reason), _) => format!("{label}: -- ({reason})"),
        (None, Some(k)) if result.saturated => format!("{label}: {k:.2} kΩ (railed)"),
        (None, Some(k)) if !result.valid => format!("{label}: {k:.2} kΩ (invalid)"),
        (None, Some(k)) => format!("{label}: {k:.2} kΩ"),
        (None, None) => format!("{label}: --"),
    }
}

/// [`summary_text`] wrapped in the colour of its quality class.
pub fn summary_line(result: &ImpedanceResult) -> String {
    let quality = Quality::of(result);
    format!("{}{}{}", quality.ansi(), summary_text(result), ANSI_RESET)
}

pub fn render_summary(report: &MeasurementReport) -> String {
    let mut out = format!(
        "Impedance check: {}/{} channels valid{}\n",
        report.valid_count(),
        report.results.len(),
        if report.cancelled { " (cancelled)" } else { "" }
    );
    for result in &report.results {
        out.push_str(&summary_line(result));
        out.push('\n');
    }
    out
}
