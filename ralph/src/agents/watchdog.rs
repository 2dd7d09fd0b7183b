//! Advisory liveness monitor for one agent invocation.
//!
//! The watchdog never kills the agent. It notices that output has stopped for
//! longer than the timeout and fires its callback once per start/stop cycle.
//! `record_output` runs on the output-reading thread while the polling loop
//! runs on its own thread; both go through one mutex.

use std::sync::mpsc::{self, RecvTimeoutError, Sender};
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use tracing::{debug, warn};

/// Upper bound on how often silence is evaluated.
pub const MAX_CHECK_INTERVAL: Duration = Duration::from_secs(5);

/// Invoked with the measured silence when the watchdog fires.
pub type WatchdogCallback = Box<dyn FnMut(Duration) + Send>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WatchdogResult {
    pub triggered: bool,
    /// Silence at the moment of triggering, or at `stop` if it never fired.
    pub silence: Duration,
    pub message: String,
}

impl WatchdogResult {
    pub fn disabled() -> Self {
        Self {
            triggered: false,
            silence: Duration::ZERO,
            message: "watchdog disabled".to_string(),
        }
    }
}

#[derive(Debug)]
struct Shared {
    last_output: Instant,
    triggered: bool,
    silence_at_trigger: Duration,
}

struct Worker {
    stop_tx: Sender<()>,
    handle: JoinHandle<Option<WatchdogCallback>>,
}

pub struct Watchdog {
    timeout: Option<Duration>,
    check_interval: Duration,
    shared: Arc<Mutex<Shared>>,
    callback: Option<WatchdogCallback>,
    worker: Option<Worker>,
}

/// `min(5s, timeout / 4)`, so short timeouts are still caught promptly.
pub fn check_interval_for(timeout: Duration) -> Duration {
    MAX_CHECK_INTERVAL.min(timeout / 4)
}

impl Watchdog {
    /// A zero `timeout` disables the watchdog entirely.
    pub fn new(
        timeout: Duration,
        check_interval: Duration,
        callback: Option<WatchdogCallback>,
    ) -> Self {
        Self {
            timeout: (!timeout.is_zero()).then_some(timeout),
            check_interval: check_interval.max(Duration::from_millis(1)),
            shared: Arc::new(Mutex::new(Shared {
                last_output: Instant::now(),
                triggered: false,
                silence_at_trigger: Duration::ZERO,
            })),
            callback,
            worker: None,
        }
    }

    /// Timeout in whole seconds as stored in run state; `<= 0` disables.
    pub fn from_secs(timeout_secs: i64, callback: Option<WatchdogCallback>) -> Self {
        let timeout = Duration::from_secs(timeout_secs.max(0) as u64);
        Self::new(timeout, check_interval_for(timeout), callback)
    }

    pub fn is_enabled(&self) -> bool {
        self.timeout.is_some()
    }

    pub fn is_running(&self) -> bool {
        self.worker.is_some()
    }

    /// Reset the silence clock.
    pub fn record_output(&self) {
        lock(&self.shared).last_output = Instant::now();
    }

    /// Time since the last recorded output.
    pub fn silence(&self) -> Duration {
        lock(&self.shared).last_output.elapsed()
    }

    /// Begin polling. No-op when disabled or already running.
    pub fn start(&mut self) {
        let Some(timeout) = self.timeout else {
            return;
        };
        if self.worker.is_some() {
            return;
        }
        {
            let mut shared = lock(&self.shared);
            shared.last_output = Instant::now();
            shared.triggered = false;
            shared.silence_at_trigger = Duration::ZERO;
        }

        let (stop_tx, stop_rx) = mpsc::channel::<()>();
        let shared = Arc::clone(&self.shared);
        let interval = self.check_interval;
        let mut callback = self.callback.take();
        debug!(timeout_ms = timeout.as_millis() as u64, interval_ms = interval.as_millis() as u64, "watchdog started");

        let handle = thread::spawn(move || {
            loop {
                match stop_rx.recv_timeout(interval) {
                    Err(RecvTimeoutError::Timeout) => {}
                    Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
                }
                let fired = {
                    let mut state = lock(&shared);
                    let silence = state.last_output.elapsed();
                    if silence > timeout && !state.triggered {
                        state.triggered = true;
                        state.silence_at_trigger = silence;
                        Some(silence)
                    } else {
                        None
                    }
                };
                if let Some(silence) = fired {
                    warn!(silence_secs = silence.as_secs(), "agent output silent past watchdog timeout");
                    if let Some(callback) = callback.as_mut() {
                        callback(silence);
                    }
                }
            }
            callback
        });
        self.worker = Some(Worker { stop_tx, handle });
    }

    /// Stop polling (bounded wait) and report the final state.
    pub fn stop(&mut self) -> WatchdogResult {
        let Some(timeout) = self.timeout else {
            return WatchdogResult::disabled();
        };
        if let Some(worker) = self.worker.take() {
            // A send error only means the loop already exited.
            let _ = worker.stop_tx.send(());
            let deadline = Instant::now() + self.check_interval + Duration::from_secs(1);
            while !worker.handle.is_finished() && Instant::now() < deadline {
                thread::sleep(Duration::from_millis(5));
            }
            if worker.handle.is_finished() {
                match worker.handle.join() {
                    Ok(callback) => self.callback = callback,
                    Err(_) => warn!("watchdog thread panicked"),
                }
            } else {
                warn!("watchdog thread did not exit in time; detaching");
            }
        }

        let state = lock(&self.shared);
        if state.triggered {
            WatchdogResult {
                triggered: true,
                silence: state.silence_at_trigger,
                message: format!(
                    "agent was silent for {}s (timeout {}s)",
                    state.silence_at_trigger.as_secs(),
                    timeout.as_secs()
                ),
            }
        } else {
            WatchdogResult {
                triggered: false,
                silence: state.last_output.elapsed(),
                message: "agent output stayed within the watchdog timeout".to_string(),
            }
        }
    }
}

impl Drop for Watchdog {
    fn drop(&mut self) {
        if let Some(worker) = self.worker.take() {
            let _ = worker.stop_tx.send(());
        }
    }
}

fn lock(shared: &Mutex<Shared>) -> MutexGuard<'_, Shared> {
    shared.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}
