//! Transition-triggered action dispatch.
//!
//! The `ActionManager` maps `(observable, initial, final)` transitions to
//! action kinds. Observables report transitions through
//! `check_state_change`, which queues one firing per registered kind. The
//! dispatcher thread drains the queue at a fixed interval and runs every
//! firing as its own action thread, tracking it until the action reports
//! completion.
//!
//! All tables live behind one `ReadWriteLock`. Lookups take the read side
//! and anything that mutates re-checks under the write side.

/// Action trait, kinds and firing context.
pub mod action;
mod manager;
mod tables;

pub use action::{Action, ActionInstanceId, ActionKind, ActionSet, Firing, FromFiring};
pub use manager::{ActionManager, ActionManagerConfig};
pub use tables::Transition;

#[cfg(test)]
mod tests {
    use super::*;

    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    use serde_json::json;

    use crate::error::{BoxError, GdciError, GdciResult, UsageError};
    use crate::observable::{DynObservable, ObservableId, ObservableRef};
    use crate::state::{Axis, State, StateCollection, Ternary};

    struct Probe(ObservableId);

    impl DynObservable for Probe {
        fn id(&self) -> ObservableId {
            self.0
        }

        fn name(&self) -> &str {
            "probe"
        }

        fn current_state(&self) -> Arc<State> {
            Arc::new(State::default())
        }
    }

    fn probe() -> ObservableRef {
        Arc::new(Probe(ObservableId::new()))
    }

    fn fast_manager() -> ActionManager {
        ActionManager::new(ActionManagerConfig {
            drain_interval: Duration::from_millis(10),
            ..ActionManagerConfig::default()
        })
    }

    struct Counted(Arc<AtomicUsize>);

    impl Action for Counted {
        fn perform_action(&mut self) -> Result<(), BoxError> {
            self.0.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    fn counted(name: &'static str, count: &Arc<AtomicUsize>) -> ActionKind {
        let count = Arc::clone(count);
        ActionKind::new(name, move |_| Ok(Counted(Arc::clone(&count))))
    }

    #[test]
    fn unmatched_transition_queues_nothing() {
        let manager = fast_manager();
        let obs = probe();
        let count = Arc::new(AtomicUsize::new(0));
        manager.associate(
            counted("a", &count),
            obs.id(),
            StateCollection::all(),
            StateCollection::expand(Axis::Any, Ternary::True),
        );
        let n = manager.check_state_change(
            &obs,
            &State::new(Ternary::True, Ternary::True),
            &State::new(Ternary::True, Ternary::False),
        );
        assert_eq!(n, 0);
        assert_eq!(manager.queued(), 0);
    }

    #[test]
    fn other_observables_do_not_match() {
        let manager = fast_manager();
        let registered = probe();
        let bystander = probe();
        let count = Arc::new(AtomicUsize::new(0));
        let off = State::new(Ternary::True, Ternary::False);
        let on = State::new(Ternary::True, Ternary::True);
        manager.associate(counted("a", &count), registered.id(), &off, &on);
        assert_eq!(manager.check_state_change(&bystander, &off, &on), 0);
        assert_eq!(manager.check_state_change(&registered, &off, &on), 1);
    }

    #[test]
    fn empty_action_set_is_a_no_op() {
        let manager = fast_manager();
        manager.associate(ActionSet::new(), ObservableId::new(), StateCollection::all(), StateCollection::all());
        assert_eq!(manager.registered_transitions(), 0);
    }

    #[test]
    fn firings_queue_in_name_order() {
        let manager = fast_manager();
        let obs = probe();
        let order = Arc::new(Mutex::new(Vec::new()));
        let kinds: Vec<ActionKind> = ["c", "a", "b"]
            .into_iter()
            .map(|name| {
                let order = Arc::clone(&order);
                ActionKind::new(name, move |firing: Firing| {
                    order.lock().map_err(|e| e.to_string())?.push(firing.action);
                    Ok(Counted(Arc::new(AtomicUsize::new(0))))
                })
            })
            .collect();
        let off = State::new(Ternary::False, Ternary::False);
        let on = State::new(Ternary::False, Ternary::True);
        manager.associate(kinds, obs.id(), &off, &on);
        assert_eq!(manager.registered_actions(obs.id(), &off, &on), vec!["a", "b", "c"]);
        assert_eq!(manager.check_state_change(&obs, &off, &on), 3);

        manager.start().unwrap();
        assert!(manager.wait_idle(Duration::from_secs(2)));
        manager.stop(true).unwrap();
        assert_eq!(*order.lock().unwrap(), vec!["a", "b", "c"]);
        assert_eq!(manager.dispatched(), 3);
    }

    #[test]
    fn firing_sees_frozen_states() {
        let manager = fast_manager();
        let obs = probe();
        let seen = Arc::new(Mutex::new(None));
        let sink = Arc::clone(&seen);
        let kind = ActionKind::new("inspect", move |firing: Firing| {
            *sink.lock().map_err(|e| e.to_string())? = firing.final_state.get_secondary("reading");
            Ok(Counted(Arc::new(AtomicUsize::new(0))))
        });
        let off = State::new(Ternary::True, Ternary::False);
        let on = State::new(Ternary::True, Ternary::True);
        on.set_secondary("reading", json!(1));
        manager.associate(kind, obs.id(), &off, &on);
        manager.check_state_change(&obs, &off, &on);
        on.set_secondary("reading", json!(2));

        manager.start().unwrap();
        assert!(manager.wait_idle(Duration::from_secs(2)));
        manager.stop(true).unwrap();
        assert_eq!(*seen.lock().unwrap(), Some(json!(1)));
    }

    #[test]
    fn blocking_stop_drains_the_queue() {
        let manager = ActionManager::new(ActionManagerConfig {
            drain_interval: Duration::from_secs(30),
            sleep_delay: Some(Duration::from_millis(10)),
            ..ActionManagerConfig::default()
        });
        let obs = probe();
        let count = Arc::new(AtomicUsize::new(0));
        let off = State::new(Ternary::True, Ternary::False);
        let on = State::new(Ternary::True, Ternary::True);
        manager.associate(counted("a", &count), obs.id(), &off, &on);

        manager.start().unwrap();
        // The first drain has already run; these wait for the next one.
        std::thread::sleep(Duration::from_millis(50));
        manager.check_state_change(&obs, &off, &on);
        manager.check_state_change(&obs, &off, &on);
        manager.stop(true).unwrap();

        assert_eq!(count.load(Ordering::SeqCst), 2);
        assert!(manager.is_idle());
        assert!(!manager.is_running());
    }

    #[test]
    fn firings_after_stop_are_dropped_not_queued() {
        let manager = fast_manager();
        let obs = probe();
        let count = Arc::new(AtomicUsize::new(0));
        let off = State::new(Ternary::True, Ternary::False);
        let on = State::new(Ternary::True, Ternary::True);
        manager.associate([counted("a", &count), counted("b", &count)], obs.id(), &off, &on);

        manager.start().unwrap();
        manager.stop(true).unwrap();
        for _ in 0..500 {
            assert_eq!(manager.check_state_change(&obs, &off, &on), 0);
        }

        assert_eq!(manager.queued(), 0);
        assert!(manager.is_idle());
        assert_eq!(manager.dropped_firings(), 1000);
        assert_eq!(manager.dispatched(), 0);
        assert_eq!(count.load(Ordering::SeqCst), 0);
        // Unmatched transitions are not drops.
        manager.check_state_change(&obs, &on, &off);
        assert_eq!(manager.dropped_firings(), 1000);
    }

    struct StopsManager {
        manager: Option<ActionManager>,
        outcome: crossbeam_channel::Sender<GdciResult<()>>,
    }

    impl Action for StopsManager {
        fn perform_action(&mut self) -> Result<(), BoxError> {
            if let Some(manager) = self.manager.take() {
                let _ = self.outcome.send(manager.stop(true));
            }
            Ok(())
        }
    }

    #[test]
    fn blocking_stop_from_own_action_is_rejected() {
        let manager = fast_manager();
        let obs = probe();
        // Taken by the first firing so the registry does not own the manager.
        let handoff = Arc::new(Mutex::new(Some(manager.clone())));
        let (tx, rx) = crossbeam_channel::bounded(1);
        let kind = ActionKind::new("stops-manager", move |_| {
            Ok(StopsManager {
                manager: handoff.lock().map_err(|e| e.to_string())?.take(),
                outcome: tx.clone(),
            })
        });
        let off = State::new(Ternary::True, Ternary::False);
        let on = State::new(Ternary::True, Ternary::True);
        manager.associate(kind, obs.id(), &off, &on);
        manager.check_state_change(&obs, &off, &on);

        manager.start().unwrap();
        let outcome = rx.recv_timeout(Duration::from_secs(3)).unwrap();
        assert!(matches!(outcome, Err(GdciError::Usage(UsageError::SelfJoin { .. }))));

        // Cancellation was still requested; the dispatcher exits after the action.
        manager.stop(true).unwrap();
        assert!(!manager.is_running());
        assert_eq!(manager.in_flight(), 0);
        assert_eq!(manager.dispatched(), 1);
    }

    #[test]
    fn action_of_another_manager_may_block_on_stop() {
        let outer = fast_manager();
        let inner = fast_manager();
        inner.start().unwrap();
        let obs = probe();
        let handoff = Arc::new(Mutex::new(Some(inner.clone())));
        let (tx, rx) = crossbeam_channel::bounded(1);
        let kind = ActionKind::new("stops-other", move |_| {
            Ok(StopsManager {
                manager: handoff.lock().map_err(|e| e.to_string())?.take(),
                outcome: tx.clone(),
            })
        });
        let off = State::new(Ternary::True, Ternary::False);
        let on = State::new(Ternary::True, Ternary::True);
        outer.associate(kind, obs.id(), &off, &on);
        outer.check_state_change(&obs, &off, &on);

        outer.start().unwrap();
        let outcome = rx.recv_timeout(Duration::from_secs(3)).unwrap();
        assert!(outcome.is_ok());
        assert!(!inner.is_running());
        outer.stop(true).unwrap();
    }

    #[test]
    fn second_start_is_rejected() {
        let manager = fast_manager();
        manager.start().unwrap();
        assert!(manager.is_running());
        assert!(manager.start().unwrap_err().is_usage());
        manager.stop(true).unwrap();
    }

    #[test]
    fn stop_without_start_is_a_no_op() {
        let manager = fast_manager();
        manager.stop(true).unwrap();
        assert!(!manager.is_running());
    }
}
