use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};
use crate::cyton::BoardCommand;
use crate::drivers::ImpedanceError;
/// One streamed sample for all EEG channels (µV), index 0 = channel 1.
#[derive(Clone, Debug, PartialEq)]
pub struct SampleFrame {
    pub sample_index: u32,
    pub microvolts: Vec<f64>,
}
/// Request/response link to the acquisition board.
///
/// Every call blocks until the board answers or `timeout` expires.
pub trait BoardLink: Send {
    fn sample_rate_hz(&self) -> f64;
    fn channel_count(&self) -> usize;
    /// Sends one register-write command and returns the board's acknowledgment.
    fn write_register(&mut self, command: &BoardCommand, timeout: Duration) -> Result<String, ImpedanceError>;
    fn start_stream(&mut self) -> Result<(), ImpedanceError>;
    /// Next streamed frame, `Ok(None)` once the stream has ended.
    fn next_frame(&mut self, timeout: Duration) -> Result<Option<SampleFrame>, ImpedanceError>;
    fn stop_stream(&mut self) -> Result<(), ImpedanceError>;
}
impl<B: BoardLink + ?Sized> BoardLink for Box<B> {
    fn sample_rate_hz(&self) -> f64 {
        (**self).sample_rate_hz()
    }
    fn channel_count(&self) -> usize {
        (**self).channel_count()
    }
    fn write_register(&mut self, command: &BoardCommand, timeout: Duration) -> Result<String, ImpedanceError> {
        (**self).write_register(command, timeout)
    }
    fn start_stream(&mut self) -> Result<(), ImpedanceError> {
        (**self).start_stream()
    }
    fn next_frame(&mut self, timeout: Duration) -> Result<Option<SampleFrame>, ImpedanceError> {
        (**self).next_frame(timeout)
    }
    fn stop_stream(&mut self) -> Result<(), ImpedanceError> {
        (**self).stop_stream()
    }
}
/// Shared cancel flag, cloned into signal handlers.
#[derive(Clone, Debug, Default)]
pub struct CancelToken(Arc<AtomicBool>);
impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }
    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }
    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
    /// Sleeps for `duration` in short slices, returning early on cancel.
    pub fn sleep(&self, duration: Duration) -> Result<(), ImpedanceError> {
        let deadline = Instant::now() + duration;
        loop {
            if self.is_cancelled() {
                return Err(ImpedanceError::Cancelled);
            }
            let now = Instant::now();
            if now >= deadline {
                return Ok(());
            }
            std::thread::sleep((deadline - now).min(Duration::from_millis(20)));
        }
    }
}
struct SharedBoard<B> {
    busy: AtomicBool,
    link: Mutex<B>,
}
/// Exclusive handle to one board connection.
///
/// Clones refer to the same connection; at most one measurement run can hold
/// it at a time.
pub struct BoardHandle<B> {
    inner: Arc<SharedBoard<B>>,
}
impl<B> Clone for BoardHandle<B> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}
impl<B: BoardLink> BoardHandle<B> {
    pub fn new(link: B) -> Self {
        Self {
            inner: Arc::new(SharedBoard {
                busy: AtomicBool::new(false),
                link: Mutex::new(link),
            }),
        }
    }
    /// Marks the connection busy for the lifetime of the returned claim.
    pub fn claim(&self) -> Result<RunClaim<'_, B>, ImpedanceError> {
        self.inner
            .busy
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .map_err(|_| ImpedanceError::DeviceBusy)?;
        let link = match self.inner.link.lock() {
            Ok(guard) => guard,
            Err(poisoned) => {
                log::warn!("board link mutex poisoned by an earlier panic; continuing");
                poisoned.into_inner()
            }
        };
        Ok(RunClaim {
            busy: &self.inner.busy,
            link,
        })
    }
    pub fn is_busy(&self) -> bool {
        self.inner.busy.load(Ordering::Acquire)
    }
    /// Read access to the link between runs.
    pub fn inspect<R>(&self, f: impl FnOnce(&B) -> R) -> Result<R, ImpedanceError> {
        let claim = self.claim()?;
        Ok(f(&claim.link))
    }
}
/// Exclusive access to the board for one run; releases the busy flag on drop.
pub struct RunClaim<'a, B> {
    busy: &'a AtomicBool,
    link: MutexGuard<'a, B>,
}
impl<B> RunClaim<'_, B> {
    pub fn link(&mut self) -> &mut B {
        &mut self.link
    }
}
impl<B> Drop for RunClaim<'_, B> {
    fn drop(&mut self) {
        self.busy.store(false, Ordering::Release);
    }
}
/// Bounded, non-restartable stream of one channel's samples.
///
/// Yields exactly `expected` samples unless the board stalls for longer than
/// `timeout`, the stream ends, or the run is cancelled.
pub struct AcquisitionWindow<'a, B: BoardLink> {
    link: &'a mut B,
    channel_index: usize,
    expected: usize,
    taken: usize,
    timeout: Duration,
    cancel: &'a CancelToken,
    finished: bool,
}
impl<'a, B: BoardLink> AcquisitionWindow<'a, B> {
    pub fn new(
        link: &'a mut B,
        channel: u8,
        expected: usize,
        timeout: Duration,
        cancel: &'a CancelToken,
    ) -> Self {
        Self {
            link,
            channel_index: usize::from(channel.saturating_sub(1)),
            expected,
            taken: 0,
            timeout,
            cancel,
            finished: false,
        }
    }
}
impl<B: BoardLink> Iterator for AcquisitionWindow<'_, B> {
    type Item = Result<f64, ImpedanceError>;
    fn next(&mut self) -> Option<Self::Item> {
        if self.finished || self.taken >= self.expected {
            return None;
        }
        if self.cancel.is_cancelled() {
            self.finished = true;
            return Some(Err(ImpedanceError::Cancelled));
        }
        match self.link.next_frame(self.timeout) {
            Ok(Some(frame)) => match frame.microvolts.get(self.channel_index) {
                Some(&value) => {
                    self.taken += 1;
                    Some(Ok(value))
                }
                None => {
                    self.finished = true;
                    Some(Err(ImpedanceError::Transport(format!(
                        "frame carries {} channels, channel {} missing",
                        frame.microvolts.len(),
                        self.channel_index + 1
                    ))))
                }
            },
            // A stream that ends early simply leaves the window short.
            Ok(None) => {
                self.finished = true;
                None
            }
            Err(ImpedanceError::Timeout(_)) => {
                self.finished = true;
                Some(Err(ImpedanceError::Timeout(self.timeout)))
            }
            Err(err) => {
                self.finished = true;
                Some(Err(err))
            }
        }
    }
    fn size_hint(&self) -> (usize, Option<usize>) {
        (0, Some(self.expected - self.taken))
    }
}
