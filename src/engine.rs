// src/engine.rs
use crate::config::MeasurementConfig;
use crate::cyton::{self, BoardCommand, ChannelSettings};
use crate::drivers::buffer::{AcquiredSignal, SampleBuffer};
use crate::drivers::fft::{dominant_frequency, SpectralPeak};
use crate::drivers::filter::BandpassFilter;
use crate::drivers::resistance_detection::microvolts_to_volts;
use crate::drivers::rms::{rms_of_tail, window_len};
use crate::drivers::source::{AcquisitionWindow, BoardHandle, BoardLink, CancelToken};
use crate::drivers::ImpedanceError;
use crate::types::*;

/// Where a channel is in its measurement pass.
///
/// Each non-terminal phase names the work still to be done; `step` performs
/// it and returns the next phase. `Failed` is reachable from every
/// non-terminal phase.
#[derive(Debug)]
pub enum ChannelPhase {
    Idle,
    ConfiguringGain,
    LeadOffEnabled,
    Settling,
    Acquiring,
    Filtering(AcquiredSignal),
    ComputingRms {
        signal: AcquiredSignal,
        filtered: Vec<f64>,
    },
    ComputingImpedance {
        vrms_uv: f64,
        saturated: bool,
        peak: Option<SpectralPeak>,
    },
    LeadOffDisabled(ImpedanceResult),
    Done(ImpedanceResult),
    Failed(FailureReason),
}

impl ChannelPhase {
    pub fn name(&self) -> &'static str {
        match self {
            ChannelPhase::Idle => "Idle",
            ChannelPhase::ConfiguringGain => "ConfiguringGain",
            ChannelPhase::LeadOffEnabled => "LeadOffEnabled",
            ChannelPhase::Settling => "Settling",
            ChannelPhase::Acquiring => "Acquiring",
            ChannelPhase::Filtering(_) => "Filtering",
            ChannelPhase::ComputingRms { .. } => "ComputingRms",
            ChannelPhase::ComputingImpedance { .. } => "ComputingImpedance",
            ChannelPhase::LeadOffDisabled(_) => "LeadOffDisabled",
            ChannelPhase::Done(_) => "Done",
            ChannelPhase::Failed(_) => "Failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, ChannelPhase::Done(_) | ChannelPhase::Failed(_))
    }
}

// 整次测量期间的板卡侧状态
struct RunState {
    // 当前正在施加导联脱落电流的通道 (最多一个)
    driven: Option<u8>,
    settings: Vec<ChannelSettings>,
    saved: Vec<Option<ChannelSettings>>,
}

impl RunState {
    fn new(channel_count: usize) -> Self {
        Self {
            driven: None,
            settings: vec![ChannelSettings::STREAM_DEFAULT; channel_count],
            saved: vec![None; channel_count],
        }
    }

    fn enter_impedance_mode(&mut self, channel: u8) -> ChannelSettings {
        let idx = usize::from(channel - 1);
        self.saved[idx] = Some(self.settings[idx]);
        self.settings[idx] = ChannelSettings::IMPEDANCE;
        self.settings[idx]
    }

    fn restore(&mut self, channel: u8) -> ChannelSettings {
        let idx = usize::from(channel - 1);
        self.settings[idx] = self.saved[idx].take().unwrap_or(ChannelSettings::STREAM_DEFAULT);
        self.settings[idx]
    }
}

/// Runs the per-channel impedance state machine over a board connection.
pub struct ImpedanceSequencer<'c> {
    config: &'c MeasurementConfig,
    cancel: CancelToken,
}

impl<'c> ImpedanceSequencer<'c> {
    pub fn new(config: &'c MeasurementConfig, cancel: CancelToken) -> Self {
        Self { config, cancel }
    }

    /// Measures every configured channel in ascending order, then resets the
    /// board registers exactly once.
    ///
    /// Per-channel problems end up in the report. Only a busy connection, an
    /// invalid config or a failed register reset are returned as errors.
    pub fn run<B: BoardLink>(&self, handle: &BoardHandle<B>) -> Result<MeasurementReport, ImpedanceError> {
        self.config.validate()?;
        let mut claim = handle.claim()?;
        let link = claim.link();
        if self.config.channel_count > link.channel_count() {
            return Err(ImpedanceError::InvalidConfig(format!(
                "{} channels requested, board has {}",
                self.config.channel_count,
                link.channel_count()
            )));
        }
        log::info!(
            "impedance check on {} ({} channels, fs = {:.0} Hz)",
            self.config.port,
            self.config.channel_count,
            link.sample_rate_hz()
        );

        let report = self.measure_all(link);

        // 无论成功、失败还是取消，都只在这里复位一次
        self.reset_registers(link).map_err(|err| {
            log::error!("register reset failed: {err}");
            ImpedanceError::ResetFailed(Box::new(err))
        })?;
        log::info!(
            "impedance check finished: {}/{} channels valid{}",
            report.valid_count(),
            report.results.len(),
            if report.cancelled { " (cancelled)" } else { "" }
        );
        Ok(report)
    }

    fn measure_all<B: BoardLink>(&self, link: &mut B) -> MeasurementReport {
        let mut state = RunState::new(self.config.channel_count);
        let mut results = Vec::with_capacity(self.config.channel_count);
        for channel in self.config.channels() {
            if let Some(stuck) = state.driven {
                log::warn!("ch{channel} skipped: lead-off drive still active on ch{stuck}");
                results.push(ImpedanceResult::failed(channel, FailureReason::Aborted));
                continue;
            }
            if self.cancel.is_cancelled() {
                results.push(ImpedanceResult::failed(channel, FailureReason::Cancelled));
                continue;
            }
            results.push(self.measure_channel(link, &mut state, channel));
        }
        MeasurementReport {
            results,
            cancelled: self.cancel.is_cancelled(),
        }
    }

    fn measure_channel<B: BoardLink>(&self, link: &mut B, state: &mut RunState, channel: u8) -> ImpedanceResult {
        let mut phase = ChannelPhase::Idle;
        loop {
            match phase {
                ChannelPhase::Done(result) => {
                    log::info!(
                        "ch{channel}({}): {:.2} kΩ{}",
                        cable_color(channel),
                        result.impedance_kohms().unwrap_or(f64::NAN),
                        if result.valid { "" } else { " (invalid)" }
                    );
                    return result;
                }
                ChannelPhase::Failed(reason) => return ImpedanceResult::failed(channel, reason),
                _ => {}
            }
            let from = phase.name();
            phase = match self.step(link, state, channel, phase) {
                Ok(next) => next,
                Err(err) => {
                    log::warn!("ch{channel} failed during {from}: {err}");
                    self.release_drive(link, state, channel);
                    ChannelPhase::Failed(FailureReason::from_error(&err))
                }
            };
            log::debug!("ch{channel}: {from} -> {}", phase.name());
        }
    }

    fn step<B: BoardLink>(
        &self,
        link: &mut B,
        state: &mut RunState,
        channel: u8,
        phase: ChannelPhase,
    ) -> Result<ChannelPhase, ImpedanceError> {
        match phase {
            ChannelPhase::Idle => self.begin(link),
            ChannelPhase::ConfiguringGain => {
                let settings = state.enter_impedance_mode(channel);
                self.send(link, &BoardCommand::ChannelSettings { channel, settings })?;
                Ok(ChannelPhase::LeadOffEnabled)
            }
            ChannelPhase::LeadOffEnabled => {
                if let Some(other) = state.driven {
                    return Err(ImpedanceError::Transport(format!(
                        "refusing to drive ch{channel} while ch{other} is driven"
                    )));
                }
                // 先记为驱动中：命令超时后板卡可能已生效
                state.driven = Some(channel);
                self.send(link, &BoardCommand::lead_off_on(channel, self.config.lead_off_side))?;
                Ok(ChannelPhase::Settling)
            }
            ChannelPhase::Settling => {
                self.cancel.sleep(self.config.settle())?;
                Ok(ChannelPhase::Acquiring)
            }
            ChannelPhase::Acquiring => Ok(ChannelPhase::Filtering(self.acquire(link, channel)?)),
            ChannelPhase::Filtering(signal) => {
                let filter = BandpassFilter::new(signal.sample_rate_hz(), self.config.passband());
                let filtered = filter.apply(signal.samples());
                Ok(ChannelPhase::ComputingRms { signal, filtered })
            }
            ChannelPhase::ComputingRms { signal, filtered } => {
                let window = window_len(signal.sample_rate_hz(), self.config.rms_window_secs);
                let vrms_uv = rms_of_tail(&filtered, window)?;
                let peak = dominant_frequency(
                    &filtered[filtered.len() - window..],
                    signal.sample_rate_hz(),
                    self.config.passband(),
                );
                if let Some(peak) = peak {
                    log::debug!("ch{channel} dominant in-band frequency {:.1} Hz", peak.frequency_hz);
                }
                let saturated = signal.peak_abs() >= self.config.rail_microvolts;
                Ok(ChannelPhase::ComputingImpedance {
                    vrms_uv,
                    saturated,
                    peak,
                })
            }
            ChannelPhase::ComputingImpedance {
                vrms_uv,
                saturated,
                peak,
            } => {
                let z = self.config.circuit().impedance_ohms(microvolts_to_volts(vrms_uv));
                let valid = z.is_finite() && z >= 0.0 && !saturated;
                if saturated {
                    log::warn!("ch{channel} saturated; lead probably detached");
                } else if z < 0.0 {
                    log::warn!("ch{channel} reads below the series resistor ({z:.0} Ω)");
                }
                Ok(ChannelPhase::LeadOffDisabled(ImpedanceResult {
                    channel,
                    impedance_ohms: Some(z),
                    valid,
                    outcome: ChannelOutcome::Done,
                    vrms_microvolts: Some(vrms_uv),
                    saturated,
                    peak_frequency_hz: peak.map(|p| p.frequency_hz),
                }))
            }
            ChannelPhase::LeadOffDisabled(result) => {
                self.disable_drive(link, state, channel)?;
                Ok(ChannelPhase::Done(result))
            }
            ChannelPhase::Done(_) | ChannelPhase::Failed(_) => Ok(phase),
        }
    }

    fn begin<B: BoardLink>(&self, link: &B) -> Result<ChannelPhase, ImpedanceError> {
        let fs = link.sample_rate_hz();
        let needed = window_len(fs, self.config.rms_window_secs);
        let available = window_len(fs, self.config.acquisition_secs);
        // 采集窗口短于 RMS 窗口时不必驱动电极
        if needed == 0 || available < needed {
            return Err(ImpedanceError::InsufficientSamples { needed: needed.max(1), available });
        }
        Ok(ChannelPhase::ConfiguringGain)
    }

    fn acquire<B: BoardLink>(&self, link: &mut B, channel: u8) -> Result<AcquiredSignal, ImpedanceError> {
        let fs = link.sample_rate_hz();
        let mut buffer = SampleBuffer::with_duration(channel, fs, self.config.acquisition_secs)?;
        link.start_stream()?;
        let collected = {
            let window = AcquisitionWindow::new(
                link,
                channel,
                buffer.capacity(),
                self.config.command_timeout(),
                &self.cancel,
            );
            window
                .map(|sample| sample.map(|value| buffer.push(value)))
                .collect::<Result<Vec<_>, _>>()
        };
        let stopped = link.stop_stream();
        collected?;
        stopped?;
        // 采集窗口必须完整
        if !buffer.is_full() {
            log::warn!(
                "ch{channel} stream ended early: {}/{} samples",
                buffer.len(),
                buffer.capacity()
            );
            return Err(ImpedanceError::InsufficientSamples {
                needed: buffer.capacity(),
                available: buffer.len(),
            });
        }
        Ok(buffer.freeze())
    }

    fn disable_drive<B: BoardLink>(&self, link: &mut B, state: &mut RunState, channel: u8) -> Result<(), ImpedanceError> {
        let settings = state.restore(channel);
        self.send(link, &BoardCommand::ChannelSettings { channel, settings })?;
        self.send(link, &BoardCommand::lead_off_off(channel))?;
        state.driven = None;
        Ok(())
    }

    // 失败路径上的尽力关闭
    fn release_drive<B: BoardLink>(&self, link: &mut B, state: &mut RunState, channel: u8) {
        if state.driven != Some(channel) {
            // 通道设置可能已改为阻抗模式，恢复记录即可，复位时统一写回
            state.restore(channel);
            return;
        }
        if let Err(err) = self.disable_drive(link, state, channel) {
            log::error!("ch{channel} lead-off drive could not be switched off: {err}");
        }
    }

    fn reset_registers<B: BoardLink>(&self, link: &mut B) -> Result<(), ImpedanceError> {
        log::info!("restoring default channel settings");
        let mut first_err = None;
        let commands = std::iter::once(BoardCommand::ResetDefaults)
            .chain(self.config.channels().map(BoardCommand::lead_off_off));
        // 每条命令都要发出，只保留第一个错误
        for command in commands {
            if let Err(err) = self.send(link, &command) {
                log::error!("reset command {command} failed: {err}");
                first_err.get_or_insert(err);
            }
        }
        match first_err {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    fn send<B: BoardLink>(&self, link: &mut B, command: &BoardCommand) -> Result<String, ImpedanceError> {
        let response = link.write_register(command, self.config.command_timeout())?;
        log::debug!("cmd {command} -> {}", response.trim_end_matches(cyton::RESPONSE_TERMINATOR).trim());
        if cyton::is_failure_response(&response) {
            return Err(ImpedanceError::BoardCommand {
                command: command.to_ascii(),
                response,
            });
        }
        Ok(response)
    }
}

/// Convenience wrapper: one full run with a fresh cancel token.
pub fn check_impedance<B: BoardLink>(
    config: &MeasurementConfig,
    handle: &BoardHandle<B>,
) -> Result<MeasurementReport, ImpedanceError> {
    ImpedanceSequencer::new(config, CancelToken::new()).run(handle)
}
