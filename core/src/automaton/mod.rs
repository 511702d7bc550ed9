//! The automaton core: the immutable representation, the mutating builder,
//! simplification passes, and weighted powerset determinization.
//!
//! Callers construct through a [Builder], [Builder::finalize] into an
//! [Automaton], optionally [Automaton::try_determinize] (which feeds a fresh
//! builder and simplification pass internally), and read the result through
//! the flat state/transition layout.

mod builder;
mod determinize;
mod immutable;
mod simplification;
mod transition;

pub use builder::{Builder, StateBuilder, TransitionIterator, MAX_STATES};
pub use determinize::{
    DeterminizableDistribution, WeightedState, WeightedStateSet, WeightedStateSetBuilder, DEFAULT_LOG_EPS,
};
pub use immutable::{Automaton, DeterminizationState, StateCollection, StateRef};
pub use transition::{StateData, Transition};
