#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use gdci::{Action, ActionKind, ActionManager, ActionManagerConfig, BoxError, DynObservable, ObservableId, ObservableRef, State};

/// Stand-in observable for driving the dispatcher directly.
pub struct Probe {
    id: ObservableId,
}

impl DynObservable for Probe {
    fn id(&self) -> ObservableId {
        self.id
    }

    fn name(&self) -> &str {
        "probe"
    }

    fn current_state(&self) -> Arc<State> {
        Arc::new(State::default())
    }
}

pub fn probe() -> ObservableRef {
    Arc::new(Probe { id: ObservableId::new() })
}

pub fn manager(drain_interval: Duration) -> ActionManager {
    ActionManager::new(ActionManagerConfig {
        drain_interval,
        ..ActionManagerConfig::default()
    })
}

/// Counts its runs; optionally sleeps to stay in flight.
pub struct Counting {
    runs: Arc<AtomicUsize>,
    hold: Duration,
}

impl Action for Counting {
    fn perform_action(&mut self) -> Result<(), BoxError> {
        std::thread::sleep(self.hold);
        self.runs.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

pub fn counting(name: &'static str, runs: &Arc<AtomicUsize>, hold: Duration) -> ActionKind {
    let runs = Arc::clone(runs);
    ActionKind::new(name, move |_| {
        Ok(Counting {
            runs: Arc::clone(&runs),
            hold,
        })
    })
}

/// Poll `done` every 10ms for up to `timeout`.
pub fn eventually(timeout: Duration, mut done: impl FnMut() -> bool) -> bool {
    let deadline = std::time::Instant::now() + timeout;
    while std::time::Instant::now() < deadline {
        if done() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(10));
    }
    done()
}
