//! Cancelable loop threads.
//!
//! A `LoopThread` runs a `LoopTask` on its own OS thread, either once or
//! repeatedly at a target interval. Cancellation is cooperative: `stop`
//! raises a flag that the loop checks while waiting between iterations and
//! at the top of each iteration. A `main_loop` call that is already running
//! is never interrupted.
//!
//! Timing is best effort. The interval is measured from the start of one
//! iteration to the start of the next; an iteration that overruns is followed
//! immediately by the next one, without catch-up and without skipping.

use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle, ThreadId};
use std::time::{Duration, Instant};

use crossbeam_channel::{bounded, Receiver, RecvTimeoutError, Sender};

use crate::error::{GdciError, GdciResult, UsageError};

/// The step a `LoopThread` runs, with optional setup and teardown hooks.
pub trait LoopTask: Send + 'static {
    /// Called once on the loop thread before the first iteration.
    fn before_loop(&mut self) {}

    /// One iteration.
    fn main_loop(&mut self);

    /// Called once on the loop thread after the last iteration.
    fn after_loop(&mut self) {}
}

/// Loop timing configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoopConfig {
    /// Target time between the starts of consecutive iterations.
    pub loop_interval: Duration,
    /// How long each inter-iteration wait lasts. Bounds how quickly `stop`
    /// is noticed. Defaults to a tenth of `loop_interval`.
    pub sleep_delay: Option<Duration>,
    /// Run `main_loop` repeatedly (`true`) or exactly once (`false`).
    pub do_loop: bool,
}

impl Default for LoopConfig {
    fn default() -> Self {
        Self {
            loop_interval: Duration::from_secs(1),
            sleep_delay: None,
            do_loop: true,
        }
    }
}

impl LoopConfig {
    /// Loop with the given interval.
    #[must_use]
    pub fn every(loop_interval: Duration) -> Self {
        Self {
            loop_interval,
            ..Self::default()
        }
    }

    /// Run the step exactly once.
    #[must_use]
    pub fn once() -> Self {
        Self {
            do_loop: false,
            ..Self::default()
        }
    }

    /// Builder: override the wait granularity.
    #[must_use]
    pub fn with_sleep_delay(mut self, sleep_delay: Duration) -> Self {
        self.sleep_delay = Some(sleep_delay);
        self
    }

    /// The effective wait granularity.
    #[must_use]
    pub fn effective_sleep_delay(&self) -> Duration {
        self.sleep_delay.unwrap_or(self.loop_interval / 10)
    }
}

/// Lifecycle of a loop thread.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopState {
    /// Constructed, `start` not yet called.
    NotStarted,
    /// Running hooks or iterations.
    Running,
    /// Cancellation requested, not yet finished.
    Stopping,
    /// Thread has finished (including `after_loop`).
    Terminated,
}

impl LoopState {
    const fn as_u8(self) -> u8 {
        match self {
            Self::NotStarted => 0,
            Self::Running => 1,
            Self::Stopping => 2,
            Self::Terminated => 3,
        }
    }

    const fn from_u8(v: u8) -> Self {
        match v {
            0 => Self::NotStarted,
            1 => Self::Running,
            2 => Self::Stopping,
            _ => Self::Terminated,
        }
    }
}

#[derive(Debug)]
struct Control {
    name: String,
    cancelled: AtomicBool,
    state: AtomicU8,
    // Wakes the inter-iteration wait early on stop.
    wake_tx: Sender<()>,
    wake_rx: Receiver<()>,
    // Disconnects when the loop thread exits, releasing every waiter.
    done_rx: Receiver<()>,
    thread_id: std::sync::OnceLock<ThreadId>,
}

impl Control {
    fn state(&self) -> LoopState {
        LoopState::from_u8(self.state.load(Ordering::Acquire))
    }

    fn set_state(&self, state: LoopState) {
        self.state.store(state.as_u8(), Ordering::Release);
    }

    fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Acquire)
    }

    fn cancel(&self) {
        if self.cancelled.swap(true, Ordering::AcqRel) {
            return;
        }
        // Only a running loop moves to Stopping; a concurrent exit wins.
        let _ = self.state.compare_exchange(
            LoopState::Running.as_u8(),
            LoopState::Stopping.as_u8(),
            Ordering::AcqRel,
            Ordering::Acquire,
        );
        // A full channel already holds a wake-up.
        let _ = self.wake_tx.try_send(());
    }

    fn wait_terminated(&self) -> GdciResult<()> {
        if self.thread_id.get() == Some(&thread::current().id()) {
            return Err(UsageError::SelfJoin {
                name: self.name.clone(),
            }
            .into());
        }
        if self.state() == LoopState::NotStarted {
            return Ok(());
        }
        // Only ever disconnects; nobody sends on the done channel.
        let _ = self.done_rx.recv();
        Ok(())
    }

    fn wait_terminated_timeout(&self, timeout: Duration) -> bool {
        match self.done_rx.recv_timeout(timeout) {
            Err(RecvTimeoutError::Disconnected) => true,
            Ok(()) | Err(RecvTimeoutError::Timeout) => false,
        }
    }

    // Waits until the next iteration is due or cancellation is requested.
    // Returns false when cancelled. `None` is a deadline past the end of
    // time, so only cancellation ends the wait.
    fn wait_until(&self, due: Option<Instant>, sleep_delay: Duration) -> bool {
        loop {
            if self.is_cancelled() {
                return false;
            }
            let step = match due {
                Some(due) => {
                    let now = Instant::now();
                    if now >= due {
                        return true;
                    }
                    sleep_delay.min(due - now)
                }
                None => sleep_delay,
            };
            let _ = self.wake_rx.recv_timeout(step);
        }
    }
}

/// Cloneable handle for stopping or awaiting a loop from other threads.
#[derive(Debug, Clone)]
pub struct LoopHandle {
    control: Arc<Control>,
}

impl LoopHandle {
    /// Thread name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.control.name
    }

    /// Current lifecycle state.
    #[must_use]
    pub fn state(&self) -> LoopState {
        self.control.state()
    }

    /// True once `stop` has been requested.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.control.is_cancelled()
    }

    /// Request cancellation; with `blocking`, also wait for termination.
    pub fn stop(&self, blocking: bool) -> GdciResult<()> {
        self.control.cancel();
        if blocking {
            self.control.wait_terminated()?;
        }
        Ok(())
    }

    /// Wait up to `timeout` for termination. Returns true if terminated.
    #[must_use]
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        self.control.wait_terminated_timeout(timeout)
    }
}

/// A `LoopTask` bound to its own thread.
///
/// # Examples
///
/// ```
/// use gdci::thread::{LoopConfig, LoopTask, LoopThread};
///
/// struct Tick(u32);
///
/// impl LoopTask for Tick {
///     fn main_loop(&mut self) {
///         self.0 += 1;
///     }
/// }
///
/// let mut looper = LoopThread::new("tick", Tick(0), LoopConfig::once());
/// looper.start().unwrap();
/// let task = looper.join().unwrap();
/// assert_eq!(task.0, 1);
/// ```
#[derive(Debug)]
pub struct LoopThread<T: LoopTask> {
    config: LoopConfig,
    control: Arc<Control>,
    task: Option<T>,
    done_tx: Option<Sender<()>>,
    join: Option<JoinHandle<T>>,
}

impl<T: LoopTask> LoopThread<T> {
    /// Prepare a loop; nothing runs until `start`.
    pub fn new(name: impl Into<String>, task: T, config: LoopConfig) -> Self {
        let (wake_tx, wake_rx) = bounded::<()>(1);
        let (done_tx, done_rx) = bounded::<()>(1);
        let control = Arc::new(Control {
            name: name.into(),
            cancelled: AtomicBool::new(false),
            state: AtomicU8::new(LoopState::NotStarted.as_u8()),
            wake_tx,
            wake_rx,
            done_rx,
            thread_id: std::sync::OnceLock::new(),
        });
        Self {
            config,
            control,
            task: Some(task),
            done_tx: Some(done_tx),
            join: None,
        }
    }

    /// Thread name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.control.name
    }

    /// Timing settings.
    #[must_use]
    pub const fn config(&self) -> &LoopConfig {
        &self.config
    }

    /// Current lifecycle state.
    #[must_use]
    pub fn state(&self) -> LoopState {
        self.control.state()
    }

    /// True while the thread has been started and not yet terminated.
    #[must_use]
    pub fn is_running(&self) -> bool {
        matches!(self.state(), LoopState::Running | LoopState::Stopping)
    }

    /// True once the thread has exited.
    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.join.as_ref().is_some_and(JoinHandle::is_finished)
    }

    /// Cloneable handle for stopping or awaiting from elsewhere.
    #[must_use]
    pub fn handle(&self) -> LoopHandle {
        LoopHandle {
            control: Arc::clone(&self.control),
        }
    }

    /// Spawn the loop thread.
    pub fn start(&mut self) -> GdciResult<()> {
        let (Some(task), Some(done_tx)) = (self.task.take(), self.done_tx.take()) else {
            return Err(UsageError::AlreadyStarted {
                name: self.control.name.clone(),
            }
            .into());
        };

        let control = Arc::clone(&self.control);
        let config = self.config.clone();
        control.set_state(LoopState::Running);
        let spawned = thread::Builder::new()
            .name(control.name.clone())
            .spawn(move || run(task, &config, &control, done_tx));

        match spawned {
            Ok(handle) => {
                self.join = Some(handle);
                Ok(())
            }
            Err(source) => {
                self.control.set_state(LoopState::Terminated);
                Err(GdciError::Spawn {
                    name: self.control.name.clone(),
                    source,
                })
            }
        }
    }

    /// Request cancellation; with `blocking`, also wait for termination.
    pub fn stop(&self, blocking: bool) -> GdciResult<()> {
        self.handle().stop(blocking)
    }

    /// Wait for the thread to finish and take the task back.
    pub fn join(&mut self) -> GdciResult<T> {
        if let Some(task) = self.task.take() {
            return Ok(task);
        }
        let Some(handle) = self.join.take() else {
            return Err(GdciError::invariant(format!(
                "loop thread '{}' was already joined",
                self.control.name
            )));
        };
        if self.control.thread_id.get() == Some(&thread::current().id()) {
            self.join = Some(handle);
            return Err(UsageError::SelfJoin {
                name: self.control.name.clone(),
            }
            .into());
        }
        handle.join().map_err(|_| GdciError::Panicked {
            name: self.control.name.clone(),
        })
    }

    /// `stop(true)` followed by `join`.
    pub fn stop_and_join(&mut self) -> GdciResult<T> {
        self.stop(true)?;
        self.join()
    }
}

struct TerminateOnExit<'a> {
    control: &'a Control,
    _done_tx: Sender<()>,
}

impl Drop for TerminateOnExit<'_> {
    // Runs on normal exit and on unwind, so waiters never hang.
    fn drop(&mut self) {
        self.control.set_state(LoopState::Terminated);
    }
}

fn run<T: LoopTask>(mut task: T, config: &LoopConfig, control: &Control, done_tx: Sender<()>) -> T {
    let _ = control.thread_id.set(thread::current().id());
    let _exit = TerminateOnExit {
        control,
        _done_tx: done_tx,
    };

    task.before_loop();

    if config.do_loop {
        let sleep_delay = config.effective_sleep_delay();
        let mut last_run: Option<Instant> = None;
        loop {
            if let Some(last) = last_run {
                if !control.wait_until(last.checked_add(config.loop_interval), sleep_delay) {
                    break;
                }
            }
            if control.is_cancelled() {
                break;
            }
            // Marked before the step so its runtime counts toward the interval.
            last_run = Some(Instant::now());
            task.main_loop();
        }
    } else {
        task.main_loop();
    }

    task.after_loop();
    task
}
