//! Dispatcher bookkeeping: registrations, in-flight actions and the queue.
//!
//! `Tables` has no locking of its own; the manager keeps it behind a single
//! `ReadWriteLock` so every method runs inside one critical section.

use std::collections::{BTreeSet, HashMap, VecDeque};
use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Utc};

use crate::error::LookupError;
use crate::observable::{ObservableId, ObservableRef};
use crate::state::{PrimaryState, State, StateCollection};

use super::action::{ActionInstanceId, ActionKind, ActionSet};

/// The dispatch key: one observable moving between two primary states.
#[allow(missing_docs)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Transition {
    pub observable: ObservableId,
    pub initial: PrimaryState,
    pub final_state: PrimaryState,
}

impl Transition {
    #[allow(missing_docs)]
    #[must_use]
    pub const fn new(observable: ObservableId, initial: PrimaryState, final_state: PrimaryState) -> Self {
        Self {
            observable,
            initial,
            final_state,
        }
    }

    /// Every key covered by a registration over two collections.
    pub fn expand<'a>(
        observable: ObservableId,
        initial_states: &'a StateCollection,
        final_states: &'a StateCollection,
    ) -> impl Iterator<Item = Self> + 'a {
        initial_states
            .pairs(final_states)
            .map(move |(initial, final_state)| Self::new(observable, initial, final_state))
    }
}

impl fmt::Display for Transition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {} -> {}", self.observable, self.initial, self.final_state)
    }
}

#[derive(Debug, Clone)]
pub(crate) struct TrackedAction {
    pub(crate) transition: Transition,
    pub(crate) action: String,
    pub(crate) started_at: DateTime<Utc>,
}

pub(crate) struct QueuedFiring {
    pub(crate) transition: Transition,
    pub(crate) kind: ActionKind,
    pub(crate) observable: ObservableRef,
    pub(crate) initial: State,
    pub(crate) final_state: State,
    pub(crate) enqueued_at: DateTime<Utc>,
}

#[derive(Default)]
pub(crate) struct Tables {
    action_mapping: HashMap<Transition, BTreeSet<ActionKind>>,
    thread_mapping: HashMap<ActionInstanceId, TrackedAction>,
    queue: VecDeque<QueuedFiring>,
    // Drained but not yet tracked or dropped.
    dispatching: usize,
    // Set by the final drain; nothing is queued afterwards.
    closed: bool,
}

impl Tables {
    /// Union `actions` into every key. Returns the number of keys touched.
    pub(crate) fn associate(&mut self, actions: &ActionSet, keys: impl IntoIterator<Item = Transition>) -> usize {
        let mut touched = 0;
        for key in keys {
            self.action_mapping
                .entry(key)
                .or_default()
                .extend(actions.kinds().iter().cloned());
            touched += 1;
        }
        touched
    }

    /// Remove `actions` from every key, or change nothing.
    ///
    /// Each key must be registered and share at least one kind with
    /// `actions`. Keys whose set becomes empty are pruned.
    pub(crate) fn disassociate(&mut self, actions: &ActionSet, keys: &[Transition]) -> Result<usize, LookupError> {
        for key in keys {
            let Some(registered) = self.action_mapping.get(key) else {
                return Err(LookupError::TransitionNotRegistered {
                    observable: key.observable,
                    initial: key.initial,
                    final_state: key.final_state,
                });
            };
            if registered.is_disjoint(actions.kinds()) {
                return Err(LookupError::ActionNotRegistered {
                    observable: key.observable,
                    initial: key.initial,
                    final_state: key.final_state,
                    actions: actions.names(),
                });
            }
        }

        for key in keys {
            if let Some(registered) = self.action_mapping.get_mut(key) {
                registered.retain(|kind| !actions.kinds().contains(kind));
                if registered.is_empty() {
                    self.action_mapping.remove(key);
                }
            }
        }
        Ok(keys.len())
    }

    pub(crate) fn has_actions(&self, key: &Transition) -> bool {
        self.action_mapping.get(key).is_some_and(|kinds| !kinds.is_empty())
    }

    pub(crate) fn registered(&self, key: &Transition) -> Vec<String> {
        self.action_mapping
            .get(key)
            .map(|kinds| kinds.iter().map(|k| k.name().to_string()).collect())
            .unwrap_or_default()
    }

    pub(crate) fn registered_count(&self, key: &Transition) -> usize {
        self.action_mapping.get(key).map_or(0, BTreeSet::len)
    }

    pub(crate) fn mapping_len(&self) -> usize {
        self.action_mapping.len()
    }

    /// Queue one firing per kind registered on `key`, in kind-name order.
    pub(crate) fn enqueue_matching(
        &mut self,
        key: Transition,
        observable: &ObservableRef,
        initial: &State,
        final_state: &State,
    ) -> usize {
        let Some(kinds) = self.action_mapping.get(&key) else {
            return 0;
        };
        let enqueued_at = Utc::now();
        for kind in kinds {
            self.queue.push_back(QueuedFiring {
                transition: key,
                kind: kind.clone(),
                observable: Arc::clone(observable),
                initial: initial.copy(),
                final_state: final_state.copy(),
                enqueued_at,
            });
        }
        kinds.len()
    }

    pub(crate) fn drain_queue(&mut self) -> Vec<QueuedFiring> {
        let drained: Vec<QueuedFiring> = self.queue.drain(..).collect();
        self.dispatching += drained.len();
        drained
    }

    /// Drain for the last time and refuse every later firing.
    pub(crate) fn close_and_drain(&mut self) -> Vec<QueuedFiring> {
        self.closed = true;
        self.drain_queue()
    }

    pub(crate) fn is_closed(&self) -> bool {
        self.closed
    }

    /// A drained firing was dropped before it could be tracked.
    pub(crate) fn abandon(&mut self) {
        self.dispatching = self.dispatching.saturating_sub(1);
    }

    pub(crate) fn dispatching(&self) -> usize {
        self.dispatching
    }

    pub(crate) fn queued(&self) -> usize {
        self.queue.len()
    }

    /// Track a drained firing as in flight.
    pub(crate) fn track(&mut self, instance: ActionInstanceId, tracked: TrackedAction) {
        self.dispatching = self.dispatching.saturating_sub(1);
        self.thread_mapping.insert(instance, tracked);
    }

    pub(crate) fn untrack(&mut self, instance: ActionInstanceId) -> Option<TrackedAction> {
        self.thread_mapping.remove(&instance)
    }

    pub(crate) fn in_flight(&self) -> usize {
        self.thread_mapping.len()
    }
}
