//! Sets of states, compared by primary value.
//!
//! Collections are how registrations express "any of these states". The
//! usual way to build one is `StateCollection::expand`, which turns wildcard
//! axes into every concrete combination.

use std::collections::BTreeSet;
use std::ops::BitOr;

use crate::error::UsageError;

use super::{Axis, PrimaryState, State};

/// A value-equality set of states.
///
/// # Examples
///
/// ```
/// use gdci::{Axis, State, StateCollection, Ternary};
///
/// // "any prior status, but only a true result"
/// let filter = StateCollection::expand(Axis::Any, Ternary::True);
/// assert_eq!(filter.len(), 3);
/// assert!(filter.contains(&State::new(Ternary::Undefined, Ternary::True)));
/// assert!(!filter.contains(&State::new(Ternary::True, Ternary::False)));
///
/// assert_eq!(StateCollection::expand(Axis::Any, Axis::Any).len(), 9);
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct StateCollection {
    members: BTreeSet<PrimaryState>,
}

impl StateCollection {
    /// An empty collection.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Cross product of both axes; each `Axis::Any` contributes all three
    /// values.
    #[must_use]
    pub fn expand(operating: impl Into<Axis>, result: impl Into<Axis>) -> Self {
        let operating = operating.into();
        let result = result.into();
        let mut members = BTreeSet::new();
        for &op in operating.values() {
            for &res in result.values() {
                members.insert(PrimaryState::new(op, res));
            }
        }
        Self { members }
    }

    /// Every one of the nine primary states.
    #[must_use]
    pub fn all() -> Self {
        Self::expand(Axis::Any, Axis::Any)
    }

    /// Add one primary state. Returns false if already present.
    pub fn insert(&mut self, state: impl Into<PrimaryState>) -> bool {
        self.members.insert(state.into())
    }

    /// Membership by primary pair; attributes are ignored.
    #[must_use]
    pub fn contains(&self, state: &State) -> bool {
        self.members.contains(&state.primary())
    }

    /// Membership of a primary pair.
    #[must_use]
    pub fn contains_primary(&self, primary: PrimaryState) -> bool {
        self.members.contains(&primary)
    }

    /// Number of member states.
    #[must_use]
    pub fn len(&self) -> usize {
        self.members.len()
    }

    /// True for the empty collection.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    /// Members in ascending primary order.
    pub fn iter(&self) -> impl Iterator<Item = PrimaryState> + '_ {
        self.members.iter().copied()
    }

    /// Members as fresh states without secondary attributes.
    pub fn states(&self) -> impl Iterator<Item = State> + '_ {
        self.iter().map(State::from_primary)
    }

    /// Members of either collection.
    #[must_use]
    pub fn union(&self, other: &Self) -> Self {
        Self {
            members: self.members.union(&other.members).copied().collect(),
        }
    }

    /// Every member is also in `other`.
    #[must_use]
    pub fn is_subset(&self, other: &Self) -> bool {
        self.members.is_subset(&other.members)
    }

    /// Every member of `other` is also in `self`.
    #[must_use]
    pub fn is_superset(&self, other: &Self) -> bool {
        self.members.is_superset(&other.members)
    }

    /// Subset and smaller.
    #[must_use]
    pub fn is_strict_subset(&self, other: &Self) -> bool {
        self.len() < other.len() && self.is_subset(other)
    }

    /// Superset and larger.
    #[must_use]
    pub fn is_strict_superset(&self, other: &Self) -> bool {
        other.is_strict_subset(self)
    }

    /// Cartesian product of two collections as `(initial, final)` pairs.
    pub fn pairs<'a>(&'a self, finals: &'a Self) -> impl Iterator<Item = (PrimaryState, PrimaryState)> + 'a {
        self.iter().flat_map(move |initial| finals.iter().map(move |f| (initial, f)))
    }
}

impl From<State> for StateCollection {
    fn from(state: State) -> Self {
        Self::from(state.primary())
    }
}

impl From<&State> for StateCollection {
    fn from(state: &State) -> Self {
        Self::from(state.primary())
    }
}

impl From<PrimaryState> for StateCollection {
    fn from(primary: PrimaryState) -> Self {
        Self {
            members: BTreeSet::from([primary]),
        }
    }
}

impl From<&StateCollection> for StateCollection {
    fn from(collection: &StateCollection) -> Self {
        collection.clone()
    }
}

impl From<Vec<State>> for StateCollection {
    fn from(states: Vec<State>) -> Self {
        states.into_iter().collect()
    }
}

impl FromIterator<State> for StateCollection {
    fn from_iter<I: IntoIterator<Item = State>>(iter: I) -> Self {
        Self {
            members: iter.into_iter().map(|s| s.primary()).collect(),
        }
    }
}

impl FromIterator<PrimaryState> for StateCollection {
    fn from_iter<I: IntoIterator<Item = PrimaryState>>(iter: I) -> Self {
        Self {
            members: iter.into_iter().collect(),
        }
    }
}

impl Extend<PrimaryState> for StateCollection {
    fn extend<I: IntoIterator<Item = PrimaryState>>(&mut self, iter: I) {
        self.members.extend(iter);
    }
}

impl TryFrom<&StateCollection> for State {
    type Error = UsageError;

    fn try_from(collection: &StateCollection) -> Result<Self, UsageError> {
        let mut iter = collection.iter();
        match (iter.next(), iter.next()) {
            (Some(only), None) => Ok(State::from_primary(only)),
            _ => Err(UsageError::NotSingular { len: collection.len() }),
        }
    }
}

impl TryFrom<StateCollection> for State {
    type Error = UsageError;

    fn try_from(collection: StateCollection) -> Result<Self, UsageError> {
        State::try_from(&collection)
    }
}

impl<T: Into<StateCollection>> BitOr<T> for StateCollection {
    type Output = StateCollection;

    fn bitor(self, rhs: T) -> StateCollection {
        self.union(&rhs.into())
    }
}

impl<T: Into<StateCollection>> BitOr<T> for &StateCollection {
    type Output = StateCollection;

    fn bitor(self, rhs: T) -> StateCollection {
        self.union(&rhs.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use crate::state::Ternary;

    fn s(op: Ternary, res: Ternary) -> State {
        State::new(op, res)
    }

    #[test]
    fn concrete_axes_yield_one_member() {
        let single = StateCollection::expand(Ternary::True, Ternary::False);
        assert_eq!(single.len(), 1);
        assert_eq!(State::try_from(&single).unwrap(), s(Ternary::True, Ternary::False));
    }

    #[test]
    fn wildcard_operating_keeps_result() {
        let filter = StateCollection::expand(Axis::Any, Ternary::True);
        assert_eq!(filter.len(), 3);
        for op in Ternary::ALL {
            for res in Ternary::ALL {
                assert_eq!(filter.contains(&s(op, res)), res == Ternary::True);
            }
        }
    }

    #[test]
    fn wildcard_result_keeps_operating() {
        let filter = StateCollection::expand(Ternary::Undefined, Axis::Any);
        assert_eq!(filter.len(), 3);
        for op in Ternary::ALL {
            for res in Ternary::ALL {
                assert_eq!(filter.contains(&s(op, res)), op == Ternary::Undefined);
            }
        }
    }

    #[test]
    fn double_wildcard_is_everything() {
        let all = StateCollection::all();
        assert_eq!(all.len(), 9);
        for op in Ternary::ALL {
            for res in Ternary::ALL {
                assert!(all.contains(&s(op, res)));
            }
        }
    }

    #[test]
    fn subset_and_superset_comparisons() {
        let any_true = StateCollection::expand(Axis::Any, Ternary::True);
        let undefined_any = StateCollection::expand(Ternary::Undefined, Axis::Any);
        let combined = &any_true | &undefined_any;

        assert_eq!(combined.len(), 5);
        assert!(any_true.is_subset(&combined));
        assert!(undefined_any.is_strict_subset(&combined));
        assert!(combined.is_strict_superset(&any_true));
        assert!(combined.is_superset(&undefined_any));
        assert_ne!(any_true, combined);
        assert!(!combined.is_strict_subset(&combined));
    }

    #[test]
    fn construction_paths_agree() {
        let state = s(Ternary::True, Ternary::True);
        let a = StateCollection::from(&state);
        let b = StateCollection::from(&a);
        let c: StateCollection = vec![state.copy()].into();
        let d: StateCollection = std::iter::once(state.primary()).collect();
        assert_eq!(a, b);
        assert_eq!(b, c);
        assert_eq!(c, d);
    }

    #[test]
    fn non_singular_collection_is_rejected() {
        let err = State::try_from(StateCollection::expand(Axis::Any, Ternary::False)).unwrap_err();
        assert_eq!(err, UsageError::NotSingular { len: 3 });
        let err = State::try_from(StateCollection::new()).unwrap_err();
        assert_eq!(err, UsageError::NotSingular { len: 0 });
    }

    #[test]
    fn pairs_are_the_cross_product() {
        let initial = StateCollection::expand(Axis::Any, Ternary::False);
        let finals = StateCollection::expand(Ternary::True, Axis::Any);
        let pairs: Vec<_> = initial.pairs(&finals).collect();
        assert_eq!(pairs.len(), 9);
        assert!(pairs.contains(&(
            PrimaryState::new(Ternary::Undefined, Ternary::False),
            PrimaryState::new(Ternary::True, Ternary::Undefined)
        )));
    }
}
