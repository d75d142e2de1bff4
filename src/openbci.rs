use anyhow::{anyhow, Context, Result};
use libloading::Library;
use once_cell::sync::OnceCell;
use serde::Serialize;
use std::collections::VecDeque;
use std::ffi::{CStr, CString};
use std::os::raw::{c_char, c_double, c_int};
use std::time::{Duration, Instant};
use crate::cyton::BoardCommand;
use crate::drivers::source::{BoardLink, SampleFrame};
use crate::drivers::ImpedanceError;
const PRESET_DEFAULT: c_int = 0;
const STREAM_RINGBUF_PACKETS: c_int = 450_000;
const CONFIG_RESPONSE_BYTES: usize = 8192;
const POLL_INTERVAL: Duration = Duration::from_millis(5);
#[cfg(target_os = "windows")]
const BOARD_CONTROLLER_LIB: &str = "BoardController.dll";
#[cfg(target_os = "macos")]
const BOARD_CONTROLLER_LIB: &str = "libBoardController.dylib";
#[cfg(not(any(target_os = "windows", target_os = "macos")))]
const BOARD_CONTROLLER_LIB: &str = "libBoardController.so";
/// BrainFlow board ids we know how to drive.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BrainFlowBoardId {
    Cyton,
    CytonDaisy,
}
impl BrainFlowBoardId {
    fn raw(self) -> c_int {
        match self {
            BrainFlowBoardId::Cyton => 0,
            BrainFlowBoardId::CytonDaisy => 2,
        }
    }
}
#[derive(Serialize)]
struct BrainFlowInputParams {
    serial_port: String,
    mac_address: String,
    ip_address: String,
    ip_address_aux: String,
    ip_address_anc: String,
    ip_port: i32,
    ip_port_aux: i32,
    ip_port_anc: i32,
    ip_protocol: i32,
    other_info: String,
    timeout: i32,
    serial_number: String,
    file: String,
    file_aux: String,
    file_anc: String,
    master_board: i32,
}
impl BrainFlowInputParams {
    fn for_serial(port: &str, timeout: Duration) -> Self {
        Self {
            serial_port: port.to_string(),
            mac_address: String::new(),
            ip_address: String::new(),
            ip_address_aux: String::new(),
            ip_address_anc: String::new(),
            ip_port: 0,
            ip_port_aux: 0,
            ip_port_anc: 0,
            ip_protocol: 0,
            other_info: String::new(),
            timeout: timeout.as_secs().max(1) as i32,
            serial_number: String::new(),
            file: String::new(),
            file_aux: String::new(),
            file_anc: String::new(),
            master_board: -100, // NO_BOARD
        }
    }
}
struct BrainFlowApi {
    #[allow(dead_code)]
    lib: Library,
    prepare_session: unsafe extern "C" fn(c_int, *const c_char) -> c_int,
    start_stream: unsafe extern "C" fn(c_int, *const c_char, c_int, *const c_char) -> c_int,
    stop_stream: unsafe extern "C" fn(c_int, *const c_char) -> c_int,
    release_session: unsafe extern "C" fn(c_int, *const c_char) -> c_int,
    get_sampling_rate: unsafe extern "C" fn(c_int, c_int, *mut c_int) -> c_int,
    get_num_rows: unsafe extern "C" fn(c_int, c_int, *mut c_int) -> c_int,
    get_eeg_channels: unsafe extern "C" fn(c_int, c_int, *mut c_int, *mut c_int) -> c_int,
    get_board_data_count: unsafe extern "C" fn(c_int, *mut c_int, c_int, *const c_char) -> c_int,
    get_board_data: unsafe extern "C" fn(c_int, c_int, *mut c_double, c_int, *const c_char) -> c_int,
    config_board: unsafe extern "C" fn(*const c_char, *mut c_char, *mut c_int, c_int, *const c_char) -> c_int,
}
impl BrainFlowApi {
    fn load() -> Result<Self> {
        let lib = unsafe { Library::new(BOARD_CONTROLLER_LIB) }
            .with_context(|| format!("{BOARD_CONTROLLER_LIB} not found in library search path"))?;
        // Safety: we assume BrainFlow C API signatures from the official package.
        unsafe {
            Ok(Self {
                prepare_session: *lib.get(b"prepare_session\0")?,
                start_stream: *lib.get(b"start_stream\0")?,
                stop_stream: *lib.get(b"stop_stream\0")?,
                release_session: *lib.get(b"release_session\0")?,
                get_sampling_rate: *lib.get(b"get_sampling_rate\0")?,
                get_num_rows: *lib.get(b"get_num_rows\0")?,
                get_eeg_channels: *lib.get(b"get_eeg_channels\0")?,
                get_board_data_count: *lib.get(b"get_board_data_count\0")?,
                get_board_data: *lib.get(b"get_board_data\0")?,
                config_board: *lib.get(b"config_board\0")?,
                lib,
            })
        }
    }
    fn instance() -> Result<&'static BrainFlowApi> {
        static API: OnceCell<BrainFlowApi> = OnceCell::new();
        API.get_or_try_init(Self::load)
    }
    fn check(code: c_int, ctx: &str) -> Result<()> {
        if code == 0 {
            Ok(())
        } else {
            Err(anyhow!("{ctx} failed (BrainFlow code {code})"))
        }
    }
    fn prepare(&self, board_id: c_int, input: &CString) -> Result<()> {
        Self::check(
            unsafe { (self.prepare_session)(board_id, input.as_ptr()) },
            "prepare_session",
        )
    }
    fn start_stream(&self, board_id: c_int, input: &CString) -> Result<()> {
        Self::check(
            unsafe {
                (self.start_stream)(
                    STREAM_RINGBUF_PACKETS,
                    std::ptr::null(),
                    board_id,
                    input.as_ptr(),
                )
            },
            "start_stream",
        )
    }
    fn stop_stream(&self, board_id: c_int, input: &CString) -> Result<()> {
        Self::check(
            unsafe { (self.stop_stream)(board_id, input.as_ptr()) },
            "stop_stream",
        )
    }
    fn release(&self, board_id: c_int, input: &CString) -> Result<()> {
        Self::check(
            unsafe { (self.release_session)(board_id, input.as_ptr()) },
            "release_session",
        )
    }
    fn sampling_rate(&self, board_id: c_int) -> Result<c_int> {
        let mut rate: c_int = 0;
        Self::check(
            unsafe { (self.get_sampling_rate)(board_id, PRESET_DEFAULT, &mut rate as *mut c_int) },
            "get_sampling_rate",
        )?;
        Ok(rate)
    }
    fn num_rows(&self, board_id: c_int) -> Result<c_int> {
        let mut rows: c_int = 0;
        Self::check(
            unsafe { (self.get_num_rows)(board_id, PRESET_DEFAULT, &mut rows as *mut c_int) },
            "get_num_rows",
        )?;
        Ok(rows)
    }
    fn eeg_channels(&self, board_id: c_int, max_channels: usize) -> Result<Vec<c_int>> {
        let mut out_len: c_int = 0;
        let mut buf = vec![0 as c_int; max_channels.max(32)];
        Self::check(
            unsafe {
                (self.get_eeg_channels)(
                    board_id,
                    PRESET_DEFAULT,
                    buf.as_mut_ptr(),
                    &mut out_len as *mut c_int,
                )
            },
            "get_eeg_channels",
        )?;
        buf.truncate(out_len.max(0) as usize);
        Ok(buf)
    }
    fn data_count(&self, board_id: c_int, input: &CString) -> Result<usize> {
        let mut count: c_int = 0;
        Self::check(
            unsafe {
                (self.get_board_data_count)(
                    PRESET_DEFAULT,
                    &mut count as *mut c_int,
                    board_id,
                    input.as_ptr(),
                )
            },
            "get_board_data_count",
        )?;
        Ok(count.max(0) as usize)
    }
    /// Pops `count` samples; the buffer is `num_rows` rows of `count` values.
    fn board_data(&self, board_id: c_int, num_rows: usize, input: &CString, count: usize) -> Result<Vec<f64>> {
        let mut buf = vec![0.0f64; num_rows * count];
        Self::check(
            unsafe {
                (self.get_board_data)(
                    count as c_int,
                    PRESET_DEFAULT,
                    buf.as_mut_ptr(),
                    board_id,
                    input.as_ptr(),
                )
            },
            "get_board_data",
        )?;
        Ok(buf)
    }
    fn config(&self, board_id: c_int, input: &CString, command: &str) -> Result<String> {
        let config = CString::new(command).context("board command contains a NUL byte")?;
        let mut response = vec![0u8; CONFIG_RESPONSE_BYTES];
        let mut len: c_int = 0;
        Self::check(
            unsafe {
                (self.config_board)(
                    config.as_ptr(),
                    response.as_mut_ptr() as *mut c_char,
                    &mut len as *mut c_int,
                    board_id,
                    input.as_ptr(),
                )
            },
            "config_board",
        )?;
        let len = (len.max(0) as usize).min(CONFIG_RESPONSE_BYTES - 1);
        response[len] = 0;
        // Cyton responses are ASCII; anything else is kept lossy rather than failing the command.
        let text = CStr::from_bytes_until_nul(&response)
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_default();
        Ok(text)
    }
}
/// BrainFlow-backed Cyton session.
///
/// Uses the `BoardController` shared library so the binary dongle stream is
/// decoded and scaled to µV by BrainFlow itself.
pub struct BrainFlowBoard {
    port_name: String,
    board_id: c_int,
    api: &'static BrainFlowApi,
    input_json: CString,
    eeg_channels: Vec<c_int>,
    num_rows: usize,
    sample_rate_hz: f64,
    pending: VecDeque<SampleFrame>,
    is_streaming: bool,
    released: bool,
}
impl BrainFlowBoard {
    /// Loads BrainFlow and prepares a session on `port_name`.
    pub fn connect(port_name: &str, board: BrainFlowBoardId, timeout: Duration) -> Result<Self> {
        let api = BrainFlowApi::instance()?;
        let board_id = board.raw();
        let params = BrainFlowInputParams::for_serial(port_name, timeout);
        let json = serde_json::to_string(&params)?;
        let input_json =
            CString::new(json).context("failed to encode BrainFlow input params to C string")?;
        api.prepare(board_id, &input_json)
            .with_context(|| format!("could not open {port_name}"))?;
        let sample_rate_hz = api.sampling_rate(board_id)? as f64;
        let num_rows = api.num_rows(board_id)? as usize;
        let eeg_channels = api.eeg_channels(board_id, num_rows)?;
        log::info!(
            "BrainFlow session on {port_name}: {} EEG channels at {sample_rate_hz} Hz",
            eeg_channels.len()
        );
        Ok(Self {
            port_name: port_name.to_string(),
            board_id,
            api,
            input_json,
            eeg_channels,
            num_rows,
            sample_rate_hz,
            pending: VecDeque::new(),
            is_streaming: false,
            released: false,
        })
    }
    pub fn port_name(&self) -> &str {
        &self.port_name
    }
    fn pull_pending(&mut self) -> Result<()> {
        let available = self.api.data_count(self.board_id, &self.input_json)?;
        if available == 0 {
            return Ok(());
        }
        let buf = self
            .api
            .board_data(self.board_id, self.num_rows, &self.input_json, available)?;
        for i in 0..available {
            let microvolts = self
                .eeg_channels
                .iter()
                .map(|&row| buf.get(row as usize * available + i).copied().unwrap_or(f64::NAN))
                .collect();
            // Row 0 is the package counter on Cyton boards.
            let sample_index = buf.get(i).copied().unwrap_or_default() as u32;
            self.pending.push_back(SampleFrame {
                sample_index,
                microvolts,
            });
        }
        Ok(())
    }
    fn release(&mut self) -> Result<()> {
        if !self.released {
            if self.is_streaming {
                self.api.stop_stream(self.board_id, &self.input_json)?;
                self.is_streaming = false;
            }
            self.api.release(self.board_id, &self.input_json)?;
            self.released = true;
        }
        Ok(())
    }
}
impl BoardLink for BrainFlowBoard {
    fn sample_rate_hz(&self) -> f64 {
        self.sample_rate_hz
    }
    fn channel_count(&self) -> usize {
        self.eeg_channels.len()
    }
    fn write_register(&mut self, command: &BoardCommand, timeout: Duration) -> Result<String, ImpedanceError> {
        let started = Instant::now();
        let response = self
            .api
            .config(self.board_id, &self.input_json, &command.to_ascii())
            .map_err(|err| ImpedanceError::BoardCommand {
                command: command.to_ascii(),
                response: format!("{err:#}"),
            })?;
        // config_board blocks inside BrainFlow; a late answer still counts as a timeout.
        if started.elapsed() > timeout {
            return Err(ImpedanceError::Timeout(timeout));
        }
        Ok(response)
    }
    fn start_stream(&mut self) -> Result<(), ImpedanceError> {
        if !self.is_streaming {
            self.api.start_stream(self.board_id, &self.input_json)?;
            self.is_streaming = true;
        }
        self.pending.clear();
        Ok(())
    }
    fn next_frame(&mut self, timeout: Duration) -> Result<Option<SampleFrame>, ImpedanceError> {
        if !self.is_streaming {
            return Err(ImpedanceError::Transport("stream not started".into()));
        }
        let deadline = Instant::now() + timeout;
        loop {
            if let Some(frame) = self.pending.pop_front() {
                return Ok(Some(frame));
            }
            self.pull_pending()?;
            if !self.pending.is_empty() {
                continue;
            }
            if Instant::now() >= deadline {
                return Err(ImpedanceError::Timeout(timeout));
            }
            std::thread::sleep(POLL_INTERVAL);
        }
    }
    fn stop_stream(&mut self) -> Result<(), ImpedanceError> {
        if self.is_streaming {
            self.api.stop_stream(self.board_id, &self.input_json)?;
            self.is_streaming = false;
        }
        self.pending.clear();
        Ok(())
    }
}
impl Drop for BrainFlowBoard {
    fn drop(&mut self) {
        if let Err(err) = self.release() {
            log::warn!("BrainFlow release on {} failed: {err:#}", self.port_name);
        }
    }
}
