//! Debounced background flushing on a dedicated worker thread.
//!
//! Requests travel to the worker over a channel. The worker keeps at most one
//! deadline: a request while idle arms it, a request while pending refreshes
//! it, and a request that arrives while a flush runs is picked up from the
//! channel afterwards and starts another flush straight away, since the
//! running flush may have checkpointed before that request's commit.
//! Refreshing never pushes the deadline past `max_delay` after the first
//! request of a burst.

use crate::error::{CoreError, CoreResult};
use crate::flush::pipeline::{FlushReport, FlushTarget};
use crate::stats::FlushStats;
use parking_lot::{Condvar, Mutex};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant, SystemTime};
use tracing::{debug, error, info, warn};

/// Where the scheduler is in its cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlushPhase {
    /// Nothing wanted.
    Idle,
    /// A flush will start at `deadline`.
    Pending {
        /// Monotonic start time.
        deadline: Instant,
    },
    /// A flush sequence is executing.
    Running,
}

/// Observable scheduler state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FlushStatus {
    /// Current phase.
    pub phase: FlushPhase,
    /// Failures since the last successful flush.
    pub consecutive_failures: u32,
    /// Message of the most recent failure, cleared on success.
    pub last_error: Option<String>,
    /// Set once consecutive failures reach the warning threshold; cleared on
    /// the next success.
    pub persistent_warning: bool,
    /// When the last successful flush finished.
    pub last_success: Option<SystemTime>,
    /// Write sequence of the last successful flush.
    pub last_write_seq: Option<u64>,
}

impl FlushStatus {
    fn new() -> Self {
        Self {
            phase: FlushPhase::Idle,
            consecutive_failures: 0,
            last_error: None,
            persistent_warning: false,
            last_success: None,
            last_write_seq: None,
        }
    }
}

/// Scheduler tuning.
#[derive(Debug, Clone, Copy)]
pub struct SchedulerConfig {
    /// Upper bound on debounce postponement, from the first request of a burst.
    pub max_delay: Duration,
    /// Consecutive failures that raise the persistent warning.
    pub failure_warning_threshold: u32,
}

enum Command {
    Request(Duration),
    Force(Sender<CoreResult<FlushReport>>),
    Shutdown,
}

struct Shared {
    status: Mutex<SharedState>,
    changed: Condvar,
}

struct SharedState {
    status: FlushStatus,
    // Commands sent but not yet taken off the channel by the worker.
    queued: usize,
}

impl Shared {
    fn is_idle(state: &SharedState) -> bool {
        state.queued == 0 && state.status.phase == FlushPhase::Idle
    }
}

/// Debounced flush scheduler owning one background worker thread.
pub struct FlushScheduler {
    sender: Mutex<Option<Sender<Command>>>,
    shared: Arc<Shared>,
    worker: Mutex<Option<JoinHandle<()>>>,
    stats: Arc<FlushStats>,
}

impl FlushScheduler {
    /// Starts the worker thread for `target`.
    ///
    /// # Errors
    ///
    /// Returns an error if the thread cannot be spawned.
    pub fn start(
        target: Arc<dyn FlushTarget>,
        config: SchedulerConfig,
        stats: Arc<FlushStats>,
    ) -> CoreResult<Self> {
        let (sender, receiver) = mpsc::channel();
        let shared = Arc::new(Shared {
            status: Mutex::new(SharedState {
                status: FlushStatus::new(),
                queued: 0,
            }),
            changed: Condvar::new(),
        });

        let worker = Worker {
            target,
            config,
            shared: Arc::clone(&shared),
            stats: Arc::clone(&stats),
            receiver,
            deadline: None,
            burst_started: None,
            waiters: Vec::new(),
        };
        let handle = thread::Builder::new()
            .name("sealdb-flush".to_string())
            .spawn(move || worker.run())
            .map_err(|e| CoreError::flush(format!("failed to spawn flush worker: {e}")))?;

        Ok(Self {
            sender: Mutex::new(Some(sender)),
            shared,
            worker: Mutex::new(Some(handle)),
            stats,
        })
    }

    /// Asks for a flush no earlier than `delay` from now.
    ///
    /// Coalesces with any pending request. While a flush is running the
    /// delay is ignored and another flush runs as soon as it finishes. A
    /// no-op after shutdown.
    pub fn request(&self, delay: Duration) {
        self.stats.record_request();
        let delay = if self.shared.status.lock().status.phase == FlushPhase::Running {
            Duration::ZERO
        } else {
            delay
        };
        if self.send(Command::Request(delay)).is_err() {
            debug!("flush requested after scheduler shutdown");
        }
    }

    /// Runs a flush now and waits for it.
    ///
    /// If a flush is already running, waits for it and then runs another, so
    /// the result covers every commit made before this call.
    ///
    /// # Errors
    ///
    /// Returns the flush failure, or [`CoreError::DatabaseClosed`] if the
    /// worker has stopped.
    pub fn force_flush_blocking(&self) -> CoreResult<FlushReport> {
        let (reply, result) = mpsc::channel();
        self.send(Command::Force(reply))?;
        result.recv().map_err(|_| CoreError::DatabaseClosed)?
    }

    /// Returns true if a flush is queued, pending or running.
    #[must_use]
    pub fn is_busy(&self) -> bool {
        !Shared::is_idle(&self.shared.status.lock())
    }

    /// Blocks until no flush is queued, pending or running, or `timeout`
    /// elapses. Returns true if the scheduler went idle.
    pub fn wait_idle(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut state = self.shared.status.lock();
        while !Shared::is_idle(&state) {
            if self
                .shared
                .changed
                .wait_until(&mut state, deadline)
                .timed_out()
            {
                return Shared::is_idle(&state);
            }
        }
        true
    }

    /// Returns the current status.
    #[must_use]
    pub fn status(&self) -> FlushStatus {
        self.shared.status.lock().status.clone()
    }

    /// Returns the shared counters.
    #[must_use]
    pub fn stats(&self) -> &Arc<FlushStats> {
        &self.stats
    }

    /// Stops the worker without running any pending flush and joins it.
    ///
    /// Idempotent.
    pub fn shutdown(&self) {
        if let Some(sender) = self.sender.lock().take() {
            self.shared.status.lock().queued += 1;
            let _ = sender.send(Command::Shutdown);
        }
        if let Some(handle) = self.worker.lock().take() {
            if handle.join().is_err() {
                error!("flush worker panicked");
            }
        }
        self.shared.status.lock().queued = 0;
    }

    fn send(&self, command: Command) -> CoreResult<()> {
        let sender = self.sender.lock();
        let sender = sender.as_ref().ok_or(CoreError::DatabaseClosed)?;
        self.shared.status.lock().queued += 1;
        sender.send(command).map_err(|_| {
            let mut state = self.shared.status.lock();
            state.queued = state.queued.saturating_sub(1);
            CoreError::DatabaseClosed
        })
    }
}

impl Drop for FlushScheduler {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl std::fmt::Debug for FlushScheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FlushScheduler")
            .field("status", &self.status())
            .finish_non_exhaustive()
    }
}

struct Worker {
    target: Arc<dyn FlushTarget>,
    config: SchedulerConfig,
    shared: Arc<Shared>,
    stats: Arc<FlushStats>,
    receiver: Receiver<Command>,
    deadline: Option<Instant>,
    burst_started: Option<Instant>,
    waiters: Vec<Sender<CoreResult<FlushReport>>>,
}

impl Worker {
    fn run(mut self) {
        debug!("flush worker started");
        loop {
            let received = match self.deadline {
                None => self.receiver.recv().map_err(|_| RecvTimeoutError::Disconnected),
                Some(deadline) => self
                    .receiver
                    .recv_timeout(deadline.saturating_duration_since(Instant::now())),
            };

            // Dequeue after the phase update so waiters never see a false idle.
            let got_command = received.is_ok();
            let keep_running = match received {
                Ok(Command::Request(delay)) => {
                    self.arm(delay);
                    true
                }
                Ok(Command::Force(reply)) => {
                    self.waiters.push(reply);
                    self.arm_now();
                    true
                }
                Ok(Command::Shutdown) | Err(RecvTimeoutError::Disconnected) => false,
                Err(RecvTimeoutError::Timeout) => true,
            };
            if got_command {
                self.dequeued();
            }
            if !keep_running {
                break;
            }

            if self.deadline.is_some_and(|d| d <= Instant::now()) {
                self.execute();
            }
        }

        if self.deadline.is_some() {
            warn!("flush worker stopped with a flush pending");
        }
        self.set_phase(FlushPhase::Idle);
        debug!("flush worker stopped");
    }

    fn arm(&mut self, delay: Duration) {
        let now = Instant::now();
        let wanted = now + delay;
        let deadline = match (self.deadline, self.burst_started) {
            (Some(_), Some(first)) => {
                self.stats.record_coalesced();
                wanted.min(first + self.config.max_delay)
            }
            _ => {
                self.burst_started = Some(now);
                wanted.min(now + self.config.max_delay)
            }
        };
        self.deadline = Some(deadline);
        self.set_phase(FlushPhase::Pending { deadline });
    }

    fn arm_now(&mut self) {
        if self.deadline.is_some() {
            self.stats.record_coalesced();
        }
        let now = Instant::now();
        self.burst_started.get_or_insert(now);
        self.deadline = Some(now);
        self.set_phase(FlushPhase::Pending { deadline: now });
    }

    fn execute(&mut self) {
        self.deadline = None;
        self.burst_started = None;
        self.set_phase(FlushPhase::Running);
        self.stats.record_start();

        let result = self.target.flush();

        {
            let mut state = self.shared.status.lock();
            let status = &mut state.status;
            match &result {
                Ok(report) => {
                    self.stats
                        .record_success(report.bytes, report.checkpointed_frames);
                    if status.persistent_warning {
                        info!("flush recovered after {} failures", status.consecutive_failures);
                    }
                    status.consecutive_failures = 0;
                    status.last_error = None;
                    status.persistent_warning = false;
                    status.last_success = Some(SystemTime::now());
                    status.last_write_seq = Some(report.write_seq);
                }
                Err(e) => {
                    self.stats.record_failure();
                    status.consecutive_failures = status.consecutive_failures.saturating_add(1);
                    status.last_error = Some(e.to_string());
                    if status.consecutive_failures >= self.config.failure_warning_threshold {
                        status.persistent_warning = true;
                        error!(
                            failures = status.consecutive_failures,
                            error = %e,
                            "encrypted file is not being updated"
                        );
                    } else {
                        warn!(
                            failures = status.consecutive_failures,
                            error = %e,
                            "flush failed, will retry on next request"
                        );
                    }
                }
            }
            status.phase = FlushPhase::Idle;
        }
        self.shared.changed.notify_all();

        for waiter in self.waiters.drain(..) {
            let _ = waiter.send(clone_result(&result));
        }
    }

    fn dequeued(&self) {
        let mut state = self.shared.status.lock();
        state.queued = state.queued.saturating_sub(1);
        drop(state);
        self.shared.changed.notify_all();
    }

    fn set_phase(&self, phase: FlushPhase) {
        self.shared.status.lock().status.phase = phase;
        self.shared.changed.notify_all();
    }
}

fn clone_result(result: &CoreResult<FlushReport>) -> CoreResult<FlushReport> {
    match result {
        Ok(report) => Ok(*report),
        Err(e) => Err(CoreError::flush(e.to_string())),
    }
}
