//! Polling driver for an observable.

use std::sync::Arc;
use std::time::Duration;

use crate::error::GdciResult;
use crate::thread::{LoopConfig, LoopHandle, LoopTask, LoopThread};

use super::{Observable, Sensor};

struct ObserverLoop<S: Sensor> {
    observable: Arc<Observable<S>>,
}

impl<S: Sensor> LoopTask for ObserverLoop<S> {
    fn before_loop(&mut self) {
        if let Err(err) = self.observable.with_sensor(Sensor::before_loop) {
            tracing::error!(observable = %self.observable.id(), error = %err, "sensor setup failed");
        }
    }

    fn main_loop(&mut self) {
        // The loop keeps running; a bad reading only affects this iteration.
        if let Err(err) = self.observable.check_observation() {
            tracing::error!(
                observable = %self.observable.id(),
                name = %self.observable.name(),
                error = %err,
                "observation check failed"
            );
        }
    }

    fn after_loop(&mut self) {
        if let Err(err) = self.observable.with_sensor(Sensor::after_loop) {
            tracing::error!(observable = %self.observable.id(), error = %err, "sensor teardown failed");
        }
    }
}

/// Checks an observable on its own thread at a fixed interval.
///
/// # Examples
///
/// ```
/// use std::time::Duration;
///
/// use gdci::{ActionManager, ActionManagerConfig, BoxError, LoopConfig, Observable, Observation, Observer, Sensor};
///
/// struct AlwaysOn;
///
/// impl Sensor for AlwaysOn {
///     fn get_observation(&mut self) -> Result<Observation, BoxError> {
///         Ok(true.into())
///     }
/// }
///
/// let manager = ActionManager::new(ActionManagerConfig::default());
/// let observable = Observable::new("always-on", AlwaysOn, &manager);
/// let mut observer = Observer::new(observable, LoopConfig::every(Duration::from_millis(10)));
/// observer.start().unwrap();
/// while !observer.observable().current_state().unwrap().result().is_true() {
///     std::thread::sleep(Duration::from_millis(1));
/// }
/// observer.stop(true).unwrap();
/// ```
pub struct Observer<S: Sensor> {
    observable: Arc<Observable<S>>,
    runner: LoopThread<ObserverLoop<S>>,
}

impl<S: Sensor> Observer<S> {
    /// Poll `observable` with the given loop settings.
    pub fn new(observable: Arc<Observable<S>>, config: LoopConfig) -> Self {
        let name = format!("gdci-observer-{}", observable.name());
        let runner = LoopThread::new(
            name,
            ObserverLoop {
                observable: Arc::clone(&observable),
            },
            config,
        );
        Self { observable, runner }
    }

    /// Poll every `interval` with default wait granularity.
    pub fn every(observable: Arc<Observable<S>>, interval: Duration) -> Self {
        Self::new(observable, LoopConfig::every(interval))
    }

    /// The polled observable.
    #[must_use]
    pub fn observable(&self) -> &Arc<Observable<S>> {
        &self.observable
    }

    /// Handle for stopping or awaiting the polling thread.
    #[must_use]
    pub fn handle(&self) -> LoopHandle {
        self.runner.handle()
    }

    /// True while the polling thread is alive.
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.runner.is_running()
    }

    /// Spawn the polling thread.
    pub fn start(&mut self) -> GdciResult<()> {
        self.runner.start()?;
        tracing::info!(
            observable = %self.observable.id(),
            name = %self.observable.name(),
            interval_ms = self.runner.config().loop_interval.as_millis(),
            "observer started"
        );
        Ok(())
    }

    /// Stop polling; with `blocking`, wait for the thread to finish.
    pub fn stop(&self, blocking: bool) -> GdciResult<()> {
        self.runner.stop(blocking)?;
        tracing::info!(observable = %self.observable.id(), blocking, "observer stopped");
        Ok(())
    }

    /// Wait for the polling thread to exit.
    pub fn join(&mut self) -> GdciResult<()> {
        self.runner.join().map(drop)
    }
}
