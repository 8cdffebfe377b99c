//! Three-valued truth and the registration axis selector.

use std::fmt;

use serde::{Deserialize, Serialize};

/// A truth value that may be unknown.
///
/// Serialises as JSON `true`, `false` or `null`.
///
/// # Examples
///
/// ```
/// use gdci::Ternary;
///
/// assert_eq!(Ternary::from(true), Ternary::True);
/// assert_eq!(Ternary::from(None::<bool>), Ternary::Undefined);
/// assert_eq!(Ternary::Undefined.as_bool(), None);
/// ```
#[allow(missing_docs)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(from = "Option<bool>", into = "Option<bool>")]
pub enum Ternary {
    True,
    False,
    #[default]
    Undefined,
}

impl Ternary {
    /// All three values, in expansion order.
    pub const ALL: [Self; 3] = [Self::True, Self::False, Self::Undefined];

    #[allow(missing_docs)]
    pub const fn as_bool(self) -> Option<bool> {
        match self {
            Self::True => Some(true),
            Self::False => Some(false),
            Self::Undefined => None,
        }
    }

    /// `True`.
    pub const fn is_true(self) -> bool {
        matches!(self, Self::True)
    }

    /// `False`.
    pub const fn is_false(self) -> bool {
        matches!(self, Self::False)
    }

    /// `Undefined`.
    pub const fn is_undefined(self) -> bool {
        matches!(self, Self::Undefined)
    }
}

impl From<bool> for Ternary {
    fn from(value: bool) -> Self {
        if value {
            Self::True
        } else {
            Self::False
        }
    }
}

impl From<Option<bool>> for Ternary {
    fn from(value: Option<bool>) -> Self {
        value.map_or(Self::Undefined, Self::from)
    }
}

impl From<Ternary> for Option<bool> {
    fn from(value: Ternary) -> Self {
        value.as_bool()
    }
}

impl fmt::Display for Ternary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::True => f.write_str("true"),
            Self::False => f.write_str("false"),
            Self::Undefined => f.write_str("undefined"),
        }
    }
}

/// One axis of a state filter: a concrete value or the wildcard.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Axis {
    /// Exactly this value.
    Is(Ternary),
    /// Any of the three values.
    Any,
}

impl Axis {
    /// The concrete values this axis stands for.
    #[must_use]
    pub fn values(self) -> &'static [Ternary] {
        match self {
            Self::Is(Ternary::True) => &[Ternary::True],
            Self::Is(Ternary::False) => &[Ternary::False],
            Self::Is(Ternary::Undefined) => &[Ternary::Undefined],
            Self::Any => &Ternary::ALL,
        }
    }

    /// True for `Any`.
    pub const fn is_wildcard(self) -> bool {
        matches!(self, Self::Any)
    }
}

impl From<Ternary> for Axis {
    fn from(value: Ternary) -> Self {
        Self::Is(value)
    }
}

impl From<bool> for Axis {
    fn from(value: bool) -> Self {
        Self::Is(value.into())
    }
}

impl From<Option<bool>> for Axis {
    fn from(value: Option<bool>) -> Self {
        Self::Is(value.into())
    }
}
