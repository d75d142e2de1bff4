//! Direct serial link to a Cyton dongle.
//!
//! Decodes the 33-byte binary stream packets itself, so no BrainFlow install is
//! needed. Only the 8-channel Cyton is supported here; use the BrainFlow link for
//! the Daisy module.
use std::io::{Read, Write};
use std::time::{Duration, Instant};
use crate::cyton::{BoardCommand, ChannelSettings, Gain, RESPONSE_TERMINATOR};
use crate::drivers::source::{BoardLink, SampleFrame};
use crate::drivers::ImpedanceError;
pub const CYTON_BAUD: u32 = 115_200;
pub const CYTON_SAMPLE_RATE_HZ: f64 = 250.0;
pub const CYTON_CHANNELS: usize = 8;
const PACKET_LEN: usize = 33;
const PACKET_HEADER: u8 = 0xA0;
const READ_TIMEOUT: Duration = Duration::from_millis(20);
const STOP_DRAIN: Duration = Duration::from_millis(100);
/// Re-synchronising splitter for the Cyton binary stream.
#[derive(Debug, Default)]
pub struct PacketAssembler {
    buf: Vec<u8>,
}
impl PacketAssembler {
    pub fn new() -> Self {
        Self::default()
    }
    pub fn push(&mut self, bytes: &[u8]) {
        self.buf.extend_from_slice(bytes);
    }
    pub fn clear(&mut self) {
        self.buf.clear();
    }
    /// Next complete packet, skipping any bytes that do not frame one.
    pub fn next_packet(&mut self) -> Option<[u8; PACKET_LEN]> {
        loop {
            let start = match self.buf.iter().position(|&b| b == PACKET_HEADER) {
                Some(pos) => pos,
                None => {
                    self.buf.clear();
                    return None;
                }
            };
            self.buf.drain(..start);
            if self.buf.len() < PACKET_LEN {
                return None;
            }
            if !(0xC0..=0xCF).contains(&self.buf[PACKET_LEN - 1]) {
                // 0xA0 inside payload data, not a header
                self.buf.drain(..1);
                continue;
            }
            let mut packet = [0u8; PACKET_LEN];
            packet.copy_from_slice(&self.buf[..PACKET_LEN]);
            self.buf.drain(..PACKET_LEN);
            return Some(packet);
        }
    }
}
fn interpret_24bit(bytes: &[u8]) -> i32 {
    let raw = (i32::from(bytes[0]) << 16) | (i32::from(bytes[1]) << 8) | i32::from(bytes[2]);
    if raw & 0x80_0000 != 0 {
        raw - 0x100_0000
    } else {
        raw
    }
}
/// Scales one stream packet to µV using the gains currently programmed.
pub fn decode_packet(packet: &[u8; PACKET_LEN], gains: &[Gain; CYTON_CHANNELS]) -> SampleFrame {
    let microvolts = gains
        .iter()
        .enumerate()
        .map(|(i, gain)| {
            let offset = 2 + i * 3;
            f64::from(interpret_24bit(&packet[offset..offset + 3])) * gain.microvolts_per_count()
        })
        .collect();
    SampleFrame {
        sample_index: u32::from(packet[1]),
        microvolts,
    }
}
/// Cyton board reached over its USB dongle.
pub struct SerialCyton {
    port: Box<dyn serialport::SerialPort>,
    port_name: String,
    assembler: PacketAssembler,
    gains: [Gain; CYTON_CHANNELS],
    streaming: bool,
}
impl SerialCyton {
    /// Opens `port_name` and soft-resets the board, waiting for its banner.
    pub fn connect(port_name: &str, timeout: Duration) -> Result<Self, ImpedanceError> {
        let port = serialport::new(port_name, CYTON_BAUD)
            .timeout(READ_TIMEOUT)
            .open()?;
        let mut board = Self {
            port,
            port_name: port_name.to_string(),
            assembler: PacketAssembler::new(),
            gains: [ChannelSettings::STREAM_DEFAULT.gain; CYTON_CHANNELS],
            streaming: false,
        };
        let banner = board.write_register(&BoardCommand::SoftReset, timeout)?;
        log::info!("connected to {port_name}: {}", banner.lines().next().unwrap_or("").trim());
        if banner.contains("Daisy") {
            log::warn!("Daisy module detected; the serial link only measures channels 1-{CYTON_CHANNELS}");
        }
        Ok(board)
    }
    pub fn port_name(&self) -> &str {
        &self.port_name
    }
    /// All serial ports the OS reports.
    pub fn list_ports() -> Vec<String> {
        serialport::available_ports()
            .map(|ports| ports.into_iter().map(|p| p.port_name).collect())
            .unwrap_or_default()
    }
    fn send_ascii(&mut self, text: &str) -> Result<(), ImpedanceError> {
        self.port.write_all(text.as_bytes())?;
        self.port.flush()?;
        Ok(())
    }
    fn read_response(&mut self, timeout: Duration) -> Result<String, ImpedanceError> {
        let deadline = Instant::now() + timeout;
        let mut response = Vec::new();
        let mut chunk = [0u8; 256];
        loop {
            if let Some(pos) = response
                .windows(RESPONSE_TERMINATOR.len())
                .position(|w| w == RESPONSE_TERMINATOR.as_bytes())
            {
                response.truncate(pos + RESPONSE_TERMINATOR.len());
                return Ok(String::from_utf8_lossy(&response).into_owned());
            }
            if Instant::now() >= deadline {
                return Err(ImpedanceError::Timeout(timeout));
            }
            match self.port.read(&mut chunk) {
                Ok(n) => response.extend_from_slice(&chunk[..n]),
                Err(e) if e.kind() == std::io::ErrorKind::TimedOut => {}
                Err(e) => return Err(e.into()),
            }
        }
    }
    fn track_gain(&mut self, command: &BoardCommand) {
        match command {
            BoardCommand::ChannelSettings { channel, settings } => {
                if let Some(slot) = usize::from(*channel)
                    .checked_sub(1)
                    .and_then(|i| self.gains.get_mut(i))
                {
                    *slot = settings.gain;
                }
            }
            BoardCommand::ResetDefaults | BoardCommand::SoftReset => {
                self.gains = [ChannelSettings::STREAM_DEFAULT.gain; CYTON_CHANNELS];
            }
            _ => {}
        }
    }
}
impl BoardLink for SerialCyton {
    fn sample_rate_hz(&self) -> f64 {
        CYTON_SAMPLE_RATE_HZ
    }
    fn channel_count(&self) -> usize {
        CYTON_CHANNELS
    }
    fn write_register(&mut self, command: &BoardCommand, timeout: Duration) -> Result<String, ImpedanceError> {
        if self.streaming {
            return Err(ImpedanceError::Transport(format!(
                "cannot send `{command}` while streaming"
            )));
        }
        self.port.clear(serialport::ClearBuffer::Input)?;
        self.send_ascii(&command.to_ascii())?;
        let response = if command.expects_response() {
            self.read_response(timeout)?
        } else {
            String::new()
        };
        self.track_gain(command);
        Ok(response)
    }
    fn start_stream(&mut self) -> Result<(), ImpedanceError> {
        self.assembler.clear();
        self.port.clear(serialport::ClearBuffer::Input)?;
        self.send_ascii(&BoardCommand::StartStream.to_ascii())?;
        self.streaming = true;
        Ok(())
    }
    fn next_frame(&mut self, timeout: Duration) -> Result<Option<SampleFrame>, ImpedanceError> {
        if !self.streaming {
            return Ok(None);
        }
        let deadline = Instant::now() + timeout;
        let mut chunk = [0u8; 512];
        loop {
            if let Some(packet) = self.assembler.next_packet() {
                return Ok(Some(decode_packet(&packet, &self.gains)));
            }
            if Instant::now() >= deadline {
                return Err(ImpedanceError::Timeout(timeout));
            }
            match self.port.read(&mut chunk) {
                Ok(n) => self.assembler.push(&chunk[..n]),
                Err(e) if e.kind() == std::io::ErrorKind::TimedOut => {}
                Err(e) => return Err(e.into()),
            }
        }
    }
    fn stop_stream(&mut self) -> Result<(), ImpedanceError> {
        self.send_ascii(&BoardCommand::StopStream.to_ascii())?;
        self.streaming = false;
        // packets already in flight
        std::thread::sleep(STOP_DRAIN);
        self.port.clear(serialport::ClearBuffer::Input)?;
        self.assembler.clear();
        Ok(())
    }
}
