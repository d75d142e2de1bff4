// src/types.rs
use std::fmt;
use serde::Serialize;
use crate::drivers::ImpedanceError;

// 电极线缆颜色 (Cyton 1-8)
pub const CABLE_COLORS: [&str; 8] = ["gray", "purple", "blue", "green", "yellow", "orange", "red", "brown"];

pub fn cable_color(channel: u8) -> &'static str {
    match channel {
        1..=8 => CABLE_COLORS[usize::from(channel - 1)],
        _ => "black",
    }
}

// 单通道失败原因
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub enum FailureReason {
    BoardCommandError,
    Timeout,
    InsufficientSamples,
    Transport,
    Cancelled,
    // 前一通道的导联脱落电流未能关闭，本通道未测
    Aborted,
}

impl FailureReason {
    pub fn from_error(err: &ImpedanceError) -> Self {
        match err {
            ImpedanceError::BoardCommand { .. } => FailureReason::BoardCommandError,
            ImpedanceError::Timeout(_) => FailureReason::Timeout,
            ImpedanceError::InsufficientSamples { .. } => FailureReason::InsufficientSamples,
            ImpedanceError::Cancelled => FailureReason::Cancelled,
            ImpedanceError::DeviceBusy
            | ImpedanceError::InvalidConfig(_)
            | ImpedanceError::ResetFailed(_)
            | ImpedanceError::Transport(_) => FailureReason::Transport,
        }
    }
}

impl fmt::Display for FailureReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            FailureReason::BoardCommandError => "board error",
            FailureReason::Timeout => "timeout",
            FailureReason::InsufficientSamples => "insufficient samples",
            FailureReason::Transport => "transport error",
            FailureReason::Cancelled => "cancelled",
            FailureReason::Aborted => "aborted",
        };
        f.write_str(text)
    }
}

// 通道终态
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub enum ChannelOutcome {
    Done,
    Failed(FailureReason),
}

// 单通道测量结果
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct ImpedanceResult {
    pub channel: u8,
    /// `None` when the channel never produced a number.
    pub impedance_ohms: Option<f64>,
    pub valid: bool,
    pub outcome: ChannelOutcome,
    pub vrms_microvolts: Option<f64>,
    pub saturated: bool,
    pub peak_frequency_hz: Option<f64>,
}

impl ImpedanceResult {
    pub fn failed(channel: u8, reason: FailureReason) -> Self {
        Self {
            channel,
            impedance_ohms: None,
            valid: false,
            outcome: ChannelOutcome::Failed(reason),
            vrms_microvolts: None,
            saturated: false,
            peak_frequency_hz: None,
        }
    }

    pub fn impedance_kohms(&self) -> Option<f64> {
        self.impedance_ohms.map(|z| z / 1000.0)
    }

    pub fn cable_color(&self) -> &'static str {
        cable_color(self.channel)
    }

    pub fn failure(&self) -> Option<FailureReason> {
        match self.outcome {
            ChannelOutcome::Failed(reason) => Some(reason),
            ChannelOutcome::Done => None,
        }
    }
}

// 整次测量输出
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct MeasurementReport {
    pub results: Vec<ImpedanceResult>,
    pub cancelled: bool,
}

impl MeasurementReport {
    pub fn get(&self, channel: u8) -> Option<&ImpedanceResult> {
        self.results.iter().find(|r| r.channel == channel)
    }

    pub fn valid_count(&self) -> usize {
        self.results.iter().filter(|r| r.valid).count()
    }
}
