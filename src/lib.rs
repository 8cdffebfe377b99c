//! # GDCI - Generic Data Collection Infrastructure
//!
//! GDCI decouples the things that sense state from the things that react to
//! state changes. Observables report three-valued `(operating, result)`
//! states; an `ActionManager` maps transitions between those states to
//! actions and runs every fired action on its own thread.
//!
//! ## Core Concepts
//!
//! - **State**: a primary `(operating, result)` pair plus secondary attributes
//! - **StateCollection**: a set of states, usually built with wildcard expansion
//! - **Observable**: a sensor with a cached state that detects transitions
//! - **Observer**: a loop thread polling an observable
//! - **ActionManager**: the dispatcher from transitions to actions
//!
//! ## Usage
//!
//! ```rust
//! use gdci::{
//!     Action, ActionKind, ActionManager, ActionManagerConfig, Axis, BoxError, Firing, FromFiring,
//!     LoopConfig, Observable, Observation, Observer, Sensor, StateCollection, Ternary,
//! };
//!
//! struct DoorSensor;
//!
//! impl Sensor for DoorSensor {
//!     fn get_observation(&mut self) -> Result<Observation, BoxError> {
//!         Ok(true.into())
//!     }
//! }
//!
//! struct Notify(Firing);
//!
//! impl FromFiring for Notify {
//!     fn from_firing(firing: Firing) -> Result<Self, BoxError> {
//!         Ok(Self(firing))
//!     }
//! }
//!
//! impl Action for Notify {
//!     fn perform_action(&mut self) -> Result<(), BoxError> {
//!         assert!(self.0.final_state.result().is_true());
//!         Ok(())
//!     }
//! }
//!
//! let manager = ActionManager::new(ActionManagerConfig::default());
//! manager.start()?;
//!
//! let door = Observable::new("door", DoorSensor, &manager);
//! door.register_action(
//!     ActionKind::of::<Notify>(),
//!     StateCollection::all(),
//!     StateCollection::expand(Axis::Any, Ternary::True),
//! );
//!
//! // A single check; `LoopConfig::every` polls instead.
//! let mut observer = Observer::new(door, LoopConfig::once());
//! observer.start()?;
//! observer.join()?;
//!
//! // Drains the queue and waits for running actions.
//! manager.stop(true)?;
//! assert_eq!(manager.dispatched(), 1);
//! # Ok::<(), gdci::GdciError>(())
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod dispatch;
pub mod error;
pub mod observable;
pub mod rwlock;
pub mod state;
pub mod thread;

pub use dispatch::{Action, ActionInstanceId, ActionKind, ActionManager, ActionManagerConfig, ActionSet, Firing, FromFiring};
pub use error::{BoxError, GdciError, GdciResult, LookupError, UsageError};
pub use observable::{DynObservable, Observable, ObservableId, ObservableRef, Observation, Observer, Sensor};
pub use rwlock::ReadWriteLock;
pub use state::{Attributes, Axis, PrimaryState, State, StateCollection, StateSnapshot, Ternary};
pub use thread::{LoopConfig, LoopHandle, LoopState, LoopTask, LoopThread};
