//! The action manager and its dispatcher loop.

use std::cell::RefCell;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use std::thread;
use std::time::{Duration, Instant};

use chrono::Utc;

use crate::error::{GdciError, GdciResult, UsageError};
use crate::observable::{ObservableId, ObservableRef};
use crate::rwlock::ReadWriteLock;
use crate::state::{State, StateCollection};
use crate::thread::{LoopConfig, LoopHandle, LoopState, LoopTask, LoopThread};

use super::action::{panic_message, ActionInstanceId, ActionRunner, ActionSet, Firing};
use super::tables::{QueuedFiring, Tables, TrackedAction, Transition};

#[allow(missing_docs)]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActionManagerConfig {
    /// Time between queue drains.
    pub drain_interval: Duration,
    /// Wait granularity of the dispatcher loop. Defaults to a tenth of
    /// `drain_interval`.
    pub sleep_delay: Option<Duration>,
    /// Name of the dispatcher thread.
    pub thread_name: String,
}

impl Default for ActionManagerConfig {
    fn default() -> Self {
        Self {
            drain_interval: Duration::from_millis(100),
            sleep_delay: None,
            thread_name: "gdci-dispatcher".to_string(),
        }
    }
}

impl ActionManagerConfig {
    fn loop_config(&self) -> LoopConfig {
        LoopConfig {
            loop_interval: self.drain_interval,
            sleep_delay: self.sleep_delay,
            do_loop: true,
        }
    }
}

#[derive(Default)]
struct DispatcherSlot {
    handle: Option<LoopHandle>,
    runner: Option<LoopThread<DispatchLoop>>,
}

thread_local! {
    // Manager whose action is running on this thread.
    static ACTION_OWNER: RefCell<Option<Weak<Shared>>> = const { RefCell::new(None) };
}

struct Shared {
    config: ActionManagerConfig,
    tables: ReadWriteLock<Tables>,
    dispatcher: Mutex<DispatcherSlot>,
    dispatched: AtomicU64,
    dropped_firings: AtomicU64,
}

impl Drop for Shared {
    fn drop(&mut self) {
        let slot = match self.dispatcher.get_mut() {
            Ok(slot) => slot,
            Err(poisoned) => poisoned.into_inner(),
        };
        if let Some(handle) = &slot.handle {
            let _ = handle.stop(false);
        }
    }
}

/// Registry of transition-triggered actions and the loop that fires them.
///
/// Cloning is cheap; every clone refers to the same registry, queue and
/// dispatcher thread.
///
/// # Examples
///
/// ```
/// use std::sync::Arc;
///
/// use gdci::{Action, ActionKind, ActionManager, ActionManagerConfig, BoxError, State, Ternary};
/// use gdci::observable::{DynObservable, ObservableId, ObservableRef};
///
/// struct Probe(ObservableId);
///
/// impl DynObservable for Probe {
///     fn id(&self) -> ObservableId { self.0 }
///     fn name(&self) -> &str { "probe" }
///     fn current_state(&self) -> Arc<State> { Arc::new(State::default()) }
/// }
///
/// struct Log;
///
/// impl Action for Log {
///     fn perform_action(&mut self) -> Result<(), BoxError> {
///         Ok(())
///     }
/// }
///
/// let manager = ActionManager::new(ActionManagerConfig::default());
/// let probe: ObservableRef = Arc::new(Probe(ObservableId::new()));
/// let off = State::new(Ternary::False, Ternary::False);
/// let on = State::new(Ternary::False, Ternary::True);
///
/// manager.associate(ActionKind::new("log", |_| Ok(Log)), probe.id(), &off, &on);
/// assert_eq!(manager.check_state_change(&probe, &off, &on), 1);
/// assert_eq!(manager.check_state_change(&probe, &on, &off), 0);
/// assert_eq!(manager.queued(), 1);
/// ```
#[derive(Clone)]
pub struct ActionManager {
    shared: Arc<Shared>,
}

impl ActionManager {
    /// Create a stopped manager with empty tables.
    #[must_use]
    pub fn new(config: ActionManagerConfig) -> Self {
        Self {
            shared: Arc::new(Shared {
                config,
                tables: ReadWriteLock::new(Tables::default()),
                dispatcher: Mutex::new(DispatcherSlot::default()),
                dispatched: AtomicU64::new(0),
                dropped_firings: AtomicU64::new(0),
            }),
        }
    }

    /// Settings the manager was created with.
    #[must_use]
    pub fn config(&self) -> &ActionManagerConfig {
        &self.shared.config
    }

    fn lock_slot(&self) -> GdciResult<MutexGuard<'_, DispatcherSlot>> {
        self.shared.dispatcher.lock().map_err(|_| GdciError::Poisoned {
            context: "dispatcher slot",
        })
    }

    /// Start the dispatcher thread. A manager starts at most once.
    pub fn start(&self) -> GdciResult<()> {
        let mut slot = self.lock_slot()?;
        if slot.handle.is_some() {
            return Err(UsageError::AlreadyStarted {
                name: self.shared.config.thread_name.clone(),
            }
            .into());
        }

        let task = DispatchLoop {
            shared: Arc::downgrade(&self.shared),
            runners: Vec::new(),
        };
        let mut runner = LoopThread::new(self.shared.config.thread_name.clone(), task, self.shared.config.loop_config());
        runner.start()?;
        slot.handle = Some(runner.handle());
        slot.runner = Some(runner);

        tracing::info!(
            thread = %self.shared.config.thread_name,
            drain_interval_ms = self.shared.config.drain_interval.as_millis(),
            "action manager started"
        );
        Ok(())
    }

    /// Stop the dispatcher.
    ///
    /// The dispatcher drains whatever is still queued and waits for every
    /// in-flight action before it exits; `blocking` waits for that too.
    /// Firings reported after the final drain are dropped.
    ///
    /// # Errors
    ///
    /// A blocking stop from one of this manager's own actions requests
    /// cancellation and returns `UsageError::SelfJoin`, since the dispatcher
    /// waits for that action before it exits.
    pub fn stop(&self, blocking: bool) -> GdciResult<()> {
        if blocking && self.on_own_action_thread() {
            let handle = self.lock_slot()?.handle.clone();
            if let Some(handle) = handle {
                handle.stop(false)?;
            }
            return Err(UsageError::SelfJoin {
                name: self.shared.config.thread_name.clone(),
            }
            .into());
        }

        let (handle, runner) = {
            let mut slot = self.lock_slot()?;
            let runner = if blocking { slot.runner.take() } else { None };
            (slot.handle.clone(), runner)
        };
        let Some(handle) = handle else {
            return Ok(());
        };

        handle.stop(false)?;
        if let Some(mut runner) = runner {
            if let Err(err) = runner.stop_and_join() {
                if matches!(err, GdciError::Usage(UsageError::SelfJoin { .. })) {
                    self.lock_slot()?.runner = Some(runner);
                }
                return Err(err);
            }
        } else if blocking {
            // Another caller already took the runner to join it.
            handle.stop(true)?;
        }

        tracing::info!(thread = %self.shared.config.thread_name, blocking, "action manager stopped");
        Ok(())
    }

    /// Mark the current thread as running one of this manager's actions.
    pub(crate) fn enter_action_thread(&self) {
        let owner = Arc::downgrade(&self.shared);
        ACTION_OWNER.with(|slot| *slot.borrow_mut() = Some(owner));
    }

    fn on_own_action_thread(&self) -> bool {
        ACTION_OWNER.with(|slot| {
            slot.borrow()
                .as_ref()
                .is_some_and(|owner| std::ptr::eq(owner.as_ptr(), Arc::as_ptr(&self.shared)))
        })
    }

    /// True between `start` and dispatcher termination.
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.lock_slot()
            .ok()
            .and_then(|slot| slot.handle.as_ref().map(LoopHandle::state))
            .is_some_and(|state| state != LoopState::Terminated)
    }

    /// Fire `actions` whenever `observable` moves from any of
    /// `initial_states` to any of `final_states`.
    pub fn associate(
        &self,
        actions: impl Into<ActionSet>,
        observable: ObservableId,
        initial_states: impl Into<StateCollection>,
        final_states: impl Into<StateCollection>,
    ) {
        let actions = actions.into();
        if actions.is_empty() {
            return;
        }
        let initial_states = initial_states.into();
        let final_states = final_states.into();

        let touched = self
            .shared
            .tables
            .write()
            .associate(&actions, Transition::expand(observable, &initial_states, &final_states));

        tracing::debug!(
            observable = %observable,
            actions = %actions.names(),
            transitions = touched,
            "actions associated"
        );
    }

    /// Undo `associate`.
    ///
    /// Every covered transition must be registered with at least one of
    /// `actions`; otherwise nothing changes and a lookup error is returned.
    pub fn disassociate(
        &self,
        actions: impl Into<ActionSet>,
        observable: ObservableId,
        initial_states: impl Into<StateCollection>,
        final_states: impl Into<StateCollection>,
    ) -> GdciResult<()> {
        let actions = actions.into();
        let initial_states = initial_states.into();
        let final_states = final_states.into();
        let keys: Vec<Transition> = Transition::expand(observable, &initial_states, &final_states).collect();

        let removed = self.shared.tables.write().disassociate(&actions, &keys)?;

        tracing::debug!(
            observable = %observable,
            actions = %actions.names(),
            transitions = removed,
            "actions disassociated"
        );
        Ok(())
    }

    /// Queue every action registered for this transition. Returns how many
    /// firings were queued.
    ///
    /// Once the dispatcher has made its final drain, matching firings are
    /// counted in `dropped_firings` instead and nothing is queued.
    pub fn check_state_change(&self, observable: &ObservableRef, initial_state: &State, final_state: &State) -> usize {
        let key = Transition::new(observable.id(), initial_state.primary(), final_state.primary());

        if !self.shared.tables.read().has_actions(&key) {
            return 0;
        }

        // The mapping may have changed between the two locks.
        let mut tables = self.shared.tables.write();
        if tables.is_closed() {
            let dropped = tables.registered_count(&key);
            drop(tables);
            self.shared
                .dropped_firings
                .fetch_add(u64::try_from(dropped).unwrap_or(u64::MAX), Ordering::Relaxed);
            tracing::warn!(observable = %key.observable, transition = %key, dropped, "dispatcher stopped, firings dropped");
            return 0;
        }
        let enqueued = tables.enqueue_matching(key, observable, initial_state, final_state);
        drop(tables);

        if enqueued > 0 {
            tracing::debug!(observable = %key.observable, transition = %key, enqueued, "firings queued");
        }
        enqueued
    }

    /// Untrack a finished action. Called by the action's own thread.
    pub fn action_completed(&self, instance: ActionInstanceId) -> GdciResult<()> {
        let Some(tracked) = self.shared.tables.write().untrack(instance) else {
            let err = GdciError::invariant(format!("completion reported for untracked action instance {instance}"));
            tracing::error!(instance = %instance, error = %err, "untracked action completed");
            return Err(err);
        };

        let elapsed_ms = (Utc::now() - tracked.started_at).num_milliseconds();
        tracing::debug!(
            instance = %instance,
            action = %tracked.action,
            transition = %tracked.transition,
            elapsed_ms,
            "action completed"
        );
        Ok(())
    }

    /// Firings waiting for the next drain.
    #[must_use]
    pub fn queued(&self) -> usize {
        self.shared.tables.read().queued()
    }

    /// Actions started and not yet completed.
    #[must_use]
    pub fn in_flight(&self) -> usize {
        self.shared.tables.read().in_flight()
    }

    /// Nothing queued, being dispatched or running.
    #[must_use]
    pub fn is_idle(&self) -> bool {
        let tables = self.shared.tables.read();
        tables.queued() == 0 && tables.dispatching() == 0 && tables.in_flight() == 0
    }

    /// Poll until idle or `timeout` elapses. Returns true if idle.
    #[must_use]
    pub fn wait_idle(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        loop {
            if self.is_idle() {
                return true;
            }
            if Instant::now() >= deadline {
                return false;
            }
            thread::sleep(Duration::from_millis(5));
        }
    }

    /// Names of the kinds registered for one transition.
    #[must_use]
    pub fn registered_actions(&self, observable: ObservableId, initial_state: &State, final_state: &State) -> Vec<String> {
        let key = Transition::new(observable, initial_state.primary(), final_state.primary());
        self.shared.tables.read().registered(&key)
    }

    /// Number of registered transition keys.
    #[must_use]
    pub fn registered_transitions(&self) -> usize {
        self.shared.tables.read().mapping_len()
    }

    /// Actions started since creation.
    #[must_use]
    pub fn dispatched(&self) -> u64 {
        self.shared.dispatched.load(Ordering::Relaxed)
    }

    /// Firings dropped because the action could not be built or started, or
    /// because the dispatcher had already stopped.
    #[must_use]
    pub fn dropped_firings(&self) -> u64 {
        self.shared.dropped_firings.load(Ordering::Relaxed)
    }
}

impl fmt::Debug for ActionManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ActionManager")
            .field("config", &self.shared.config)
            .field("dispatched", &self.dispatched())
            .field("dropped_firings", &self.dropped_firings())
            .finish_non_exhaustive()
    }
}

struct DispatchLoop {
    shared: Weak<Shared>,
    runners: Vec<LoopThread<ActionRunner>>,
}

impl DispatchLoop {
    fn manager(&self) -> Option<ActionManager> {
        self.shared.upgrade().map(|shared| ActionManager { shared })
    }

    fn reap(&mut self) {
        self.runners.retain_mut(|runner| {
            if !runner.is_finished() {
                return true;
            }
            if let Err(err) = runner.join() {
                tracing::error!(thread = %runner.name(), error = %err, "action thread failed");
            }
            false
        });
    }

    fn drain(&mut self, manager: &ActionManager, last: bool) {
        let firings = {
            let mut tables = manager.shared.tables.write();
            if last {
                tables.close_and_drain()
            } else {
                tables.drain_queue()
            }
        };
        for queued in firings {
            self.fire(manager, queued);
        }
    }

    fn fire(&mut self, manager: &ActionManager, queued: QueuedFiring) {
        let instance = ActionInstanceId::new();
        let name = queued.kind.name().to_string();
        let transition = queued.transition;
        let firing = Firing {
            instance,
            action: name.clone(),
            observable: queued.observable,
            initial: queued.initial,
            final_state: queued.final_state,
            enqueued_at: queued.enqueued_at,
            fired_at: Utc::now(),
        };

        let kind = &queued.kind;
        let built = panic::catch_unwind(AssertUnwindSafe(|| kind.instantiate(firing)))
            .unwrap_or_else(|payload| Err(panic_message(payload.as_ref()).into()));
        let mut action = match built {
            Ok(action) => action,
            Err(err) => {
                manager.shared.tables.write().abandon();
                Self::drop_firing(manager, &name, &transition, "instantiation failed", &*err);
                return;
            }
        };
        let set_up = panic::catch_unwind(AssertUnwindSafe(|| action.setup()))
            .unwrap_or_else(|payload| Err(panic_message(payload.as_ref()).into()));
        if let Err(err) = set_up {
            manager.shared.tables.write().abandon();
            Self::drop_firing(manager, &name, &transition, "setup failed", &*err);
            return;
        }

        // Tracked before start so a fast completion always finds its entry.
        manager.shared.tables.write().track(
            instance,
            TrackedAction {
                transition,
                action: name.clone(),
                started_at: Utc::now(),
            },
        );

        let mut runner = LoopThread::new(
            format!("gdci-action-{instance}"),
            ActionRunner {
                instance,
                name: name.clone(),
                action,
                manager: manager.clone(),
            },
            LoopConfig::once(),
        );
        if let Err(err) = runner.start() {
            manager.shared.tables.write().untrack(instance);
            Self::drop_firing(manager, &name, &transition, "start failed", &err);
            return;
        }

        manager.shared.dispatched.fetch_add(1, Ordering::Relaxed);
        tracing::debug!(instance = %instance, action = %name, transition = %transition, "action fired");
        self.runners.push(runner);
    }

    fn drop_firing(
        manager: &ActionManager,
        action: &str,
        transition: &Transition,
        reason: &'static str,
        err: &(dyn std::error::Error + 'static),
    ) {
        manager.shared.dropped_firings.fetch_add(1, Ordering::Relaxed);
        tracing::error!(action, transition = %transition, reason, error = %err, "firing dropped");
    }
}

impl LoopTask for DispatchLoop {
    fn main_loop(&mut self) {
        self.reap();
        if let Some(manager) = self.manager() {
            self.drain(&manager, false);
        }
    }

    fn after_loop(&mut self) {
        if let Some(manager) = self.manager() {
            self.drain(&manager, true);
        }
        for mut runner in self.runners.drain(..) {
            if let Err(err) = runner.join() {
                tracing::error!(thread = %runner.name(), error = %err, "action thread failed");
            }
        }
    }
}
