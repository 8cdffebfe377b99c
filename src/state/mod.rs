//! Observable state.
//!
//! A `State` is a primary `(operating, result)` pair plus any number of
//! secondary attributes. Only the primary pair takes part in equality,
//! hashing and transition matching; secondary attributes ride along so
//! actions can inspect what the observable saw.
//!
//! `operating` is false when something went wrong while observing (for
//! example the network dropped), which invalidates `result`. The meaning of
//! `result` depends on the observable.

/// State filters and wildcard expansion.
pub mod collection;
/// Three-valued truth.
pub mod ternary;

use std::collections::BTreeMap;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::ops::BitOr;
use std::sync::{Mutex, PoisonError};

use serde::{Deserialize, Serialize};

pub use collection::StateCollection;
pub use ternary::{Axis, Ternary};

/// Secondary attributes, keyed by name.
pub type Attributes = BTreeMap<String, serde_json::Value>;

/// The `(operating, result)` pair used as a dispatch key.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PrimaryState {
    /// Whether the observation itself succeeded.
    pub operating: Ternary,
    /// What was observed.
    pub result: Ternary,
}

impl PrimaryState {
    /// Build a primary pair.
    #[must_use]
    pub const fn new(operating: Ternary, result: Ternary) -> Self {
        Self { operating, result }
    }
}

impl fmt::Display for PrimaryState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({},{})", self.operating, self.result)
    }
}

impl<O: Into<Ternary>, R: Into<Ternary>> From<(O, R)> for PrimaryState {
    fn from((operating, result): (O, R)) -> Self {
        Self::new(operating.into(), result.into())
    }
}

/// Secondary attribute storage with its own lock.
///
/// Each call is atomic on its own; a sequence of calls is not.
#[derive(Default)]
struct AttributeStore {
    inner: Mutex<Attributes>,
}

impl AttributeStore {
    fn new(attributes: Attributes) -> Self {
        Self {
            inner: Mutex::new(attributes),
        }
    }

    // A panic while holding the lock can only interrupt a single map
    // operation, so the map is still usable.
    fn with<R>(&self, f: impl FnOnce(&mut Attributes) -> R) -> R {
        let mut guard = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        f(&mut guard)
    }

    fn snapshot(&self) -> Attributes {
        self.with(|attrs| attrs.clone())
    }
}

impl Clone for AttributeStore {
    fn clone(&self) -> Self {
        Self::new(self.snapshot())
    }
}

/// A snapshot of the primary pair and secondary attributes.
#[allow(missing_docs)]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StateSnapshot {
    pub operating: Ternary,
    pub result: Ternary,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub attributes: Attributes,
}

/// Primary state plus thread-safe secondary attributes.
///
/// # Examples
///
/// ```
/// use gdci::{State, Ternary};
///
/// let a = State::new(Ternary::True, Ternary::False);
/// let b = State::new(Ternary::True, Ternary::False);
/// b.set_secondary("reading", 42.into());
/// assert_eq!(a, b);
///
/// let c = b.copy();
/// c.set_secondary("reading", 7.into());
/// assert_eq!(b.get_secondary("reading"), Some(42.into()));
/// ```
#[derive(Clone, Default)]
pub struct State {
    primary: PrimaryState,
    attributes: AttributeStore,
}

impl State {
    /// A single concrete state with no secondary attributes.
    #[must_use]
    pub fn new(operating: Ternary, result: Ternary) -> Self {
        Self::from_primary(PrimaryState::new(operating, result))
    }

    /// A state for the given primary pair.
    #[must_use]
    pub fn from_primary(primary: PrimaryState) -> Self {
        Self {
            primary,
            attributes: AttributeStore::default(),
        }
    }

    /// Builder: replace the secondary attributes.
    #[must_use]
    pub fn with_secondary(self, attributes: Attributes) -> Self {
        Self {
            primary: self.primary,
            attributes: AttributeStore::new(attributes),
        }
    }

    #[allow(missing_docs)]
    #[must_use]
    pub const fn operating(&self) -> Ternary {
        self.primary.operating
    }

    #[allow(missing_docs)]
    #[must_use]
    pub const fn result(&self) -> Ternary {
        self.primary.result
    }

    /// The hashable primary pair.
    #[must_use]
    pub const fn primary(&self) -> PrimaryState {
        self.primary
    }

    /// An independent copy: same primary pair, attributes snapshotted under
    /// this state's lock into fresh storage.
    #[must_use]
    pub fn copy(&self) -> Self {
        self.clone()
    }

    /// Set one secondary attribute, replacing any previous value.
    pub fn set_secondary(&self, name: impl Into<String>, value: serde_json::Value) {
        let name = name.into();
        self.attributes.with(|attrs| attrs.insert(name, value));
    }

    /// A copy of one secondary attribute.
    #[must_use]
    pub fn get_secondary(&self, name: &str) -> Option<serde_json::Value> {
        self.attributes.with(|attrs| attrs.get(name).cloned())
    }

    /// Remove one secondary attribute and return its value.
    pub fn remove_secondary(&self, name: &str) -> Option<serde_json::Value> {
        self.attributes.with(|attrs| attrs.remove(name))
    }

    /// Insert every entry of `attributes`, overwriting existing names.
    pub fn merge_secondary(&self, attributes: Attributes) {
        if attributes.is_empty() {
            return;
        }
        self.attributes.with(|attrs| attrs.extend(attributes));
    }

    /// All secondary attributes at this instant.
    #[must_use]
    pub fn secondary_attributes(&self) -> Attributes {
        self.attributes.snapshot()
    }

    /// An owned, serializable view of the state.
    #[must_use]
    pub fn snapshot(&self) -> StateSnapshot {
        StateSnapshot {
            operating: self.primary.operating,
            result: self.primary.result,
            attributes: self.attributes.snapshot(),
        }
    }

    /// Union with a state or a collection.
    #[must_use]
    pub fn union(&self, other: impl Into<StateCollection>) -> StateCollection {
        StateCollection::from(self).union(&other.into())
    }
}

impl PartialEq for State {
    fn eq(&self, other: &Self) -> bool {
        self.primary == other.primary
    }
}

impl Eq for State {}

impl Hash for State {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.primary.hash(state);
    }
}

impl PartialEq<PrimaryState> for State {
    fn eq(&self, other: &PrimaryState) -> bool {
        self.primary == *other
    }
}

impl fmt::Debug for State {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("State")
            .field("operating", &self.primary.operating)
            .field("result", &self.primary.result)
            .field("attributes", &self.attributes.snapshot())
            .finish()
    }
}

impl fmt::Display for State {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.primary.fmt(f)
    }
}

impl From<PrimaryState> for State {
    fn from(primary: PrimaryState) -> Self {
        Self::from_primary(primary)
    }
}

impl From<StateSnapshot> for State {
    fn from(snapshot: StateSnapshot) -> Self {
        Self::new(snapshot.operating, snapshot.result).with_secondary(snapshot.attributes)
    }
}

impl<T: Into<StateCollection>> BitOr<T> for &State {
    type Output = StateCollection;

    fn bitor(self, rhs: T) -> StateCollection {
        self.union(rhs)
    }
}

impl<T: Into<StateCollection>> BitOr<T> for State {
    type Output = StateCollection;

    fn bitor(self, rhs: T) -> StateCollection {
        self.union(rhs)
    }
}
