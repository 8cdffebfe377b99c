//! Observables and observers.
//!
//! An `Observable` caches the last state its sensor reported and, on every
//! check, compares the new reading with that cache. A change in the primary
//! pair is a transition: both states are frozen as copies and reported to
//! the `ActionManager`. An `Observer` polls an observable on its own loop
//! thread; event-driven code calls `check_observation` directly instead.

/// Sensor trait and readings.
pub mod observation;
/// Polling loop around an observable.
pub mod observer;

use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard};

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::dispatch::{ActionManager, ActionSet};
use crate::error::{GdciError, GdciResult};
use crate::state::{State, StateCollection, Ternary};

pub use observation::{Observation, Sensor};
pub use observer::Observer;

/// Unique identifier for an observable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ObservableId(Uuid);

impl ObservableId {
    /// Create a new random observable id.
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Wrap an existing UUID.
    #[must_use]
    pub const fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }
}

impl Default for ObservableId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ObservableId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// The view of an observable that the dispatcher and actions get.
pub trait DynObservable: Send + Sync + 'static {
    #[allow(missing_docs)]
    fn id(&self) -> ObservableId;

    #[allow(missing_docs)]
    fn name(&self) -> &str;

    /// The cached state as of the last check.
    fn current_state(&self) -> Arc<State>;
}

/// Shared handle to any observable.
pub type ObservableRef = Arc<dyn DynObservable>;

/// A sensor with its cached state, wired to a dispatcher.
pub struct Observable<S: Sensor> {
    id: ObservableId,
    name: String,
    // Held for the whole check so transitions are reported in order.
    sensor: Mutex<S>,
    current: Mutex<Arc<State>>,
    manager: ActionManager,
}

impl<S: Sensor> Observable<S> {
    /// Wrap `sensor`. The initial state is (undefined, undefined).
    pub fn new(name: impl Into<String>, sensor: S, manager: &ActionManager) -> Arc<Self> {
        Arc::new(Self {
            id: ObservableId::new(),
            name: name.into(),
            sensor: Mutex::new(sensor),
            current: Mutex::new(Arc::new(State::default())),
            manager: manager.clone(),
        })
    }

    /// Identity used as the dispatch key.
    #[must_use]
    pub const fn id(&self) -> ObservableId {
        self.id
    }

    /// Human-readable name, used in logs and thread names.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The manager this observable reports transitions to.
    #[must_use]
    pub fn manager(&self) -> &ActionManager {
        &self.manager
    }

    /// Run `f` with exclusive access to the sensor.
    pub fn with_sensor<R>(&self, f: impl FnOnce(&mut S) -> R) -> GdciResult<R> {
        let mut sensor = self.lock_sensor()?;
        Ok(f(&mut sensor))
    }

    fn lock_sensor(&self) -> GdciResult<MutexGuard<'_, S>> {
        self.sensor.lock().map_err(|_| GdciError::Poisoned {
            context: "observable sensor",
        })
    }

    fn lock_current(&self) -> GdciResult<MutexGuard<'_, Arc<State>>> {
        self.current.lock().map_err(|_| GdciError::Poisoned {
            context: "observable state",
        })
    }

    /// The cached state.
    pub fn current_state(&self) -> GdciResult<Arc<State>> {
        Ok(Arc::clone(&*self.lock_current()?))
    }

    /// Observe and report a transition if the primary state changed.
    ///
    /// A sensor error yields (false, previous result). An unchanged primary
    /// state merges the new attributes into the cached state in place and
    /// reports nothing. Returns the cached state after the check.
    pub fn check_observation(self: &Arc<Self>) -> GdciResult<Arc<State>> {
        let mut sensor = self.lock_sensor()?;

        let (operating, result, attributes) = match sensor.get_observation() {
            Ok(observation) => {
                let (result, attributes) = observation.into_parts(&self.name)?;
                (Ternary::True, result, attributes)
            }
            Err(err) => {
                let previous = self.lock_current()?.result();
                tracing::warn!(observable = %self.id, name = %self.name, error = %err, "observation failed");
                (Ternary::False, previous, Default::default())
            }
        };

        let mut current = self.lock_current()?;
        if current.operating() == operating && current.result() == result {
            current.merge_secondary(attributes);
            return Ok(Arc::clone(&current));
        }

        let new_state = State::new(operating, result).with_secondary(attributes);

        // Frozen copies; the cached state keeps collecting attributes.
        let initial = current.copy();
        let final_state = new_state.copy();
        *current = Arc::new(new_state);
        let now_current = Arc::clone(&current);
        drop(current);

        tracing::debug!(
            observable = %self.id,
            name = %self.name,
            initial = %initial,
            final_state = %final_state,
            "state transition"
        );

        let handle: ObservableRef = Arc::clone(self) as ObservableRef;
        self.manager.check_state_change(&handle, &initial, &final_state);

        drop(sensor);
        Ok(now_current)
    }

    /// Fire `actions` when this observable moves from any of
    /// `initial_states` to any of `final_states`.
    pub fn register_action(
        &self,
        actions: impl Into<ActionSet>,
        initial_states: impl Into<StateCollection>,
        final_states: impl Into<StateCollection>,
    ) {
        self.manager.associate(actions, self.id, initial_states, final_states);
    }

    /// Undo `register_action` for the given transitions.
    pub fn unregister_action(
        &self,
        actions: impl Into<ActionSet>,
        initial_states: impl Into<StateCollection>,
        final_states: impl Into<StateCollection>,
    ) -> GdciResult<()> {
        self.manager.disassociate(actions, self.id, initial_states, final_states)
    }
}

impl<S: Sensor> DynObservable for Observable<S> {
    fn id(&self) -> ObservableId {
        self.id
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn current_state(&self) -> Arc<State> {
        match self.current.lock() {
            Ok(current) => Arc::clone(&current),
            Err(poisoned) => Arc::clone(&poisoned.into_inner()),
        }
    }
}

impl<S: Sensor> fmt::Debug for Observable<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Observable")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("current", &DynObservable::current_state(self))
            .finish_non_exhaustive()
    }
}
