//! Actions and the context they are fired with.

use std::any::Any;
use std::borrow::Cow;
use std::cmp::Ordering;
use std::collections::BTreeSet;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::BoxError;
use crate::observable::ObservableRef;
use crate::state::State;
use crate::thread::LoopTask;

use super::ActionManager;

/// Unique identifier for one fired action.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ActionInstanceId(Uuid);

impl ActionInstanceId {
    /// Create a new random instance id.
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for ActionInstanceId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ActionInstanceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Everything an action knows about the transition that fired it.
///
/// `initial` and `final_state` are copies taken when the transition was
/// detected; later observations do not change them.
#[allow(missing_docs)]
#[derive(Clone)]
pub struct Firing {
    pub instance: ActionInstanceId,
    /// Name of the `ActionKind` being fired.
    pub action: String,
    pub observable: ObservableRef,
    pub initial: State,
    pub final_state: State,
    pub enqueued_at: DateTime<Utc>,
    pub fired_at: DateTime<Utc>,
}

impl fmt::Debug for Firing {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Firing")
            .field("instance", &self.instance)
            .field("action", &self.action)
            .field("observable", &self.observable.id())
            .field("initial", &self.initial)
            .field("final_state", &self.final_state)
            .field("enqueued_at", &self.enqueued_at)
            .field("fired_at", &self.fired_at)
            .finish()
    }
}

/// A reaction to a state transition. One instance is built per firing and
/// runs once on its own thread.
pub trait Action: Send + 'static {
    /// Runs on the dispatcher thread before the action thread starts. Keep it
    /// cheap; an error drops the firing.
    fn setup(&mut self) -> Result<(), BoxError> {
        Ok(())
    }

    /// The reaction itself.
    fn perform_action(&mut self) -> Result<(), BoxError>;

    /// Runs after `perform_action`, even when it failed or panicked.
    fn cleanup(&mut self) {}
}

/// Construction of an action from its firing, for `ActionKind::of`.
pub trait FromFiring: Sized {
    #[allow(missing_docs)]
    fn from_firing(firing: Firing) -> Result<Self, BoxError>;
}

type Factory = dyn Fn(Firing) -> Result<Box<dyn Action>, BoxError> + Send + Sync;

/// A named action factory. Kinds compare by name.
///
/// # Examples
///
/// ```
/// use gdci::{Action, ActionKind, BoxError};
///
/// struct Alarm;
///
/// impl Action for Alarm {
///     fn perform_action(&mut self) -> Result<(), BoxError> {
///         Ok(())
///     }
/// }
///
/// let a = ActionKind::new("alarm", |_firing| Ok(Alarm));
/// let b = ActionKind::new("alarm", |_firing| Ok(Alarm));
/// assert_eq!(a, b);
/// assert_eq!(a.name(), "alarm");
/// ```
#[derive(Clone)]
pub struct ActionKind {
    name: Cow<'static, str>,
    factory: Arc<Factory>,
}

impl ActionKind {
    /// A kind built by `factory` for every firing.
    pub fn new<A, F>(name: impl Into<Cow<'static, str>>, factory: F) -> Self
    where
        A: Action,
        F: Fn(Firing) -> Result<A, BoxError> + Send + Sync + 'static,
    {
        Self {
            name: name.into(),
            factory: Arc::new(move |firing| factory(firing).map(|a| Box::new(a) as Box<dyn Action>)),
        }
    }

    /// A kind named after `A`, built through `FromFiring`.
    #[must_use]
    pub fn of<A: Action + FromFiring>() -> Self {
        Self::new(std::any::type_name::<A>(), A::from_firing)
    }

    /// Kind name; also its identity.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    pub(crate) fn instantiate(&self, firing: Firing) -> Result<Box<dyn Action>, BoxError> {
        (self.factory)(firing)
    }
}

impl PartialEq for ActionKind {
    fn eq(&self, other: &Self) -> bool {
        self.name == other.name
    }
}

impl Eq for ActionKind {}

impl PartialOrd for ActionKind {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for ActionKind {
    fn cmp(&self, other: &Self) -> Ordering {
        self.name.cmp(&other.name)
    }
}

impl Hash for ActionKind {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.name.hash(state);
    }
}

impl fmt::Debug for ActionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("ActionKind").field(&self.name).finish()
    }
}

impl fmt::Display for ActionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name)
    }
}

/// One or more action kinds, as accepted by registration calls.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ActionSet(BTreeSet<ActionKind>);

impl ActionSet {
    /// An empty set.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// True when no kinds are in the set.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Number of distinct kinds.
    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Kinds in name order.
    pub fn iter(&self) -> impl Iterator<Item = &ActionKind> {
        self.0.iter()
    }

    pub(crate) fn kinds(&self) -> &BTreeSet<ActionKind> {
        &self.0
    }

    /// Comma-separated kind names.
    #[must_use]
    pub fn names(&self) -> String {
        self.0.iter().map(ActionKind::name).collect::<Vec<_>>().join(", ")
    }
}

impl From<ActionKind> for ActionSet {
    fn from(kind: ActionKind) -> Self {
        Self(BTreeSet::from([kind]))
    }
}

impl From<&ActionKind> for ActionSet {
    fn from(kind: &ActionKind) -> Self {
        Self::from(kind.clone())
    }
}

impl From<Vec<ActionKind>> for ActionSet {
    fn from(kinds: Vec<ActionKind>) -> Self {
        kinds.into_iter().collect()
    }
}

impl<const N: usize> From<[ActionKind; N]> for ActionSet {
    fn from(kinds: [ActionKind; N]) -> Self {
        kinds.into_iter().collect()
    }
}

impl FromIterator<ActionKind> for ActionSet {
    fn from_iter<I: IntoIterator<Item = ActionKind>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

/// Runs one action on its own loop thread and reports completion.
pub(crate) struct ActionRunner {
    pub(crate) instance: ActionInstanceId,
    pub(crate) name: String,
    pub(crate) action: Box<dyn Action>,
    pub(crate) manager: ActionManager,
}

pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> &str {
    if let Some(s) = payload.downcast_ref::<&'static str>() {
        s
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s
    } else {
        "non-string panic payload"
    }
}

impl LoopTask for ActionRunner {
    fn before_loop(&mut self) {
        self.manager.enter_action_thread();
    }

    fn main_loop(&mut self) {
        let action = &mut self.action;
        match panic::catch_unwind(AssertUnwindSafe(|| action.perform_action())) {
            Ok(Ok(())) => {
                tracing::debug!(instance = %self.instance, action = %self.name, "action finished");
            }
            Ok(Err(err)) => {
                tracing::error!(instance = %self.instance, action = %self.name, error = %err, "action failed");
            }
            Err(payload) => {
                tracing::error!(
                    instance = %self.instance,
                    action = %self.name,
                    panic = panic_message(payload.as_ref()),
                    "action panicked"
                );
            }
        }
    }

    fn after_loop(&mut self) {
        let action = &mut self.action;
        if let Err(payload) = panic::catch_unwind(AssertUnwindSafe(|| action.cleanup())) {
            tracing::error!(
                instance = %self.instance,
                action = %self.name,
                panic = panic_message(payload.as_ref()),
                "action cleanup panicked"
            );
        }
        if let Err(err) = self.manager.action_completed(self.instance) {
            tracing::error!(instance = %self.instance, action = %self.name, error = %err, "completion report rejected");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Noop;

    impl Action for Noop {
        fn perform_action(&mut self) -> Result<(), BoxError> {
            Ok(())
        }
    }

    impl FromFiring for Noop {
        fn from_firing(_firing: Firing) -> Result<Self, BoxError> {
            Ok(Self)
        }
    }

    #[test]
    fn kinds_compare_by_name() {
        let a = ActionKind::new("a", |_| Ok(Noop));
        let a2 = ActionKind::new("a", |_| Err::<Noop, _>("never".into()));
        let b = ActionKind::new("b", |_| Ok(Noop));
        assert_eq!(a, a2);
        assert_ne!(a, b);
        assert!(a < b);
    }

    #[test]
    fn kind_of_uses_type_name() {
        let kind = ActionKind::of::<Noop>();
        assert!(kind.name().ends_with("Noop"));
        assert_eq!(kind, ActionKind::of::<Noop>());
    }

    #[test]
    fn action_set_deduplicates_and_orders() {
        let set: ActionSet = vec![
            ActionKind::new("zeta", |_| Ok(Noop)),
            ActionKind::new("alpha", |_| Ok(Noop)),
            ActionKind::new("zeta", |_| Ok(Noop)),
        ]
        .into();
        assert_eq!(set.len(), 2);
        assert_eq!(set.names(), "alpha, zeta");
    }

    #[test]
    fn panic_payloads_are_readable() {
        let payload = panic::catch_unwind(|| panic!("boom")).unwrap_err();
        assert_eq!(panic_message(payload.as_ref()), "boom");
        let payload = panic::catch_unwind(|| panic!("code {}", 7)).unwrap_err();
        assert_eq!(panic_message(payload.as_ref()), "code 7");
    }
}
