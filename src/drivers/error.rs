use std::time::Duration;
use thiserror::Error;
#[derive(Debug, Error)]
pub enum ImpedanceError {
    #[error("board rejected command `{command}`: {response}")]
    BoardCommand { command: String, response: String },
    #[error("no response from board within {0:?}")]
    Timeout(Duration),
    #[error("insufficient samples for RMS window: needed {needed}, got {available}")]
    InsufficientSamples { needed: usize, available: usize },
    #[error("a measurement run is already active on this board connection")]
    DeviceBusy,
    #[error("invalid measurement config: {0}")]
    InvalidConfig(String),
    #[error("register reset failed, board may still be driving lead-off current: {0}")]
    ResetFailed(Box<ImpedanceError>),
    #[error("board transport error: {0}")]
    Transport(String),
    #[error("measurement cancelled")]
    Cancelled,
}
// 超时由各调用点带上真实时限返回，这里只做传输错误
impl From<std::io::Error> for ImpedanceError {
    fn from(value: std::io::Error) -> Self {
        ImpedanceError::Transport(value.to_string())
    }
}
impl From<serialport::Error> for ImpedanceError {
    fn from(value: serialport::Error) -> Self {
        ImpedanceError::Transport(value.to_string())
    }
}
impl From<anyhow::Error> for ImpedanceError {
    fn from(value: anyhow::Error) -> Self {
        ImpedanceError::Transport(format!("{value:#}"))
    }
}
#[cfg(test)]
mod tests {
    use super::*;
    #[test]
    fn io_timeout_is_a_transport_error() {
        let err: ImpedanceError = std::io::Error::new(std::io::ErrorKind::TimedOut, "read timed out").into();
        assert!(matches!(err, ImpedanceError::Transport(_)));
        assert_eq!(err.to_string(), "board transport error: read timed out");
    }
    #[test]
    fn timeout_message_carries_the_limit() {
        let err = ImpedanceError::Timeout(Duration::from_millis(50));
        assert_eq!(err.to_string(), "no response from board within 50ms");
    }
}
