use {
    crate::weight::Weight,
    std::fmt::{Debug, Display, Formatter, Result as FmtResult},
};

/// Sentinel for "no transition" in [StateData] chain links.
pub(crate) const NO_TRANSITION: i32 = -1;

/// One transition of an automaton: an optional element distribution (absent
/// for an ε-transition), a weight, a destination state, and a group tag
/// (`0` means ungrouped).
///
/// `destination_state` is a weak back-reference: it may point at any state of
/// the same automaton, including the transition's own source, so arbitrary
/// cycles are representable without ownership hazards.
#[derive(Clone, Debug, PartialEq)]
pub struct Transition<D> {
    pub element_distribution: Option<D>,
    pub weight: Weight,
    pub destination_state: u32,
    pub group: u32,
}

impl<D> Transition<D> {
    /// True if this transition consumes no element.
    #[inline]
    pub fn is_epsilon(&self) -> bool {
        self.element_distribution.is_none()
    }
}

impl<D: Debug> Display for Transition<D> {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        match &self.element_distribution {
            None => write!(f, "-> {} ({}, \u{3b5})", self.destination_state, self.weight),
            Some(distribution) => {
                write!(f, "-> {} ({}, {distribution:?})", self.destination_state, self.weight)
            }
        }
    }
}

/// Per-state record: the state's transition bounds and its end weight.
///
/// Inside a [crate::automaton::Builder] the bounds are the head and tail of a
/// singly-linked chain through the transition pool (`-1` when the state has
/// no transitions). After finalization they delimit the half-open range
/// `[first_transition, last_transition)` of the flat transition array.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct StateData {
    pub first_transition: i32,
    pub last_transition: i32,
    pub end_weight: Weight,
}

impl StateData {
    pub(crate) fn new() -> Self {
        StateData {
            first_transition: NO_TRANSITION,
            last_transition: NO_TRANSITION,
            end_weight: Weight::ZERO,
        }
    }

    /// True if a path may terminate in this state with nonzero weight.
    #[inline]
    pub fn can_end(&self) -> bool {
        !self.end_weight.is_zero()
    }
}

impl Default for StateData {
    fn default() -> Self {
        Self::new()
    }
}
