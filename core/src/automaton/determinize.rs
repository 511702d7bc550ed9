//! Weighted powerset determinization.

use {
    crate::{
        automaton::{
            builder::{Builder, MAX_STATES},
            immutable::{Automaton, DeterminizationState},
            transition::Transition,
        },
        distribution::ElementDistribution,
        weight::Weight,
    },
    log::{debug, trace},
    std::{
        cmp::min,
        collections::{HashMap, VecDeque},
        hash::{Hash, Hasher},
    },
};

/// Default log threshold below which destination weights are dropped by the
/// determinization sweep.
pub const DEFAULT_LOG_EPS: f64 = -35.0;

/// Log-value tolerance for weighted state set equality.
const WEIGHT_LOG_TOLERANCE: f64 = 1e-6;

/// One member of a [WeightedStateSet].
#[derive(Clone, Copy, Debug)]
pub struct WeightedState {
    pub index: u32,
    pub weight: Weight,
}

/// An ordered, deduplicated set of weighted source states identifying one
/// state of a determinized automaton.
///
/// After construction through [WeightedStateSetBuilder], indices strictly
/// increase and weights are normalized so the maximum weight is one.
///
/// Equality compares index sequences exactly and weights with a log-value
/// tolerance; hashing folds each index with the high 32 bits of the log
/// value's IEEE-754 representation, so near-equal weights collide while
/// grossly unequal ones do not.
#[derive(Clone, Debug)]
pub struct WeightedStateSet {
    states: Vec<WeightedState>,
}

impl WeightedStateSet {
    /// The set holding a single state with weight one.
    pub fn singleton(index: u32) -> Self {
        WeightedStateSet {
            states: vec![WeightedState { index, weight: Weight::ONE }],
        }
    }

    pub fn states(&self) -> &[WeightedState] {
        &self.states
    }

    pub fn len(&self) -> usize {
        self.states.len()
    }

    pub fn is_empty(&self) -> bool {
        self.states.is_empty()
    }
}

fn log_values_close(a: Weight, b: Weight) -> bool {
    let (log_a, log_b) = (a.log_value(), b.log_value());
    log_a == log_b || (log_a - log_b).abs() <= WEIGHT_LOG_TOLERANCE
}

impl PartialEq for WeightedStateSet {
    fn eq(&self, other: &Self) -> bool {
        self.states.len() == other.states.len()
            && self
                .states
                .iter()
                .zip(other.states.iter())
                .all(|(a, b)| a.index == b.index && log_values_close(a.weight, b.weight))
    }
}

impl Eq for WeightedStateSet {}

impl Hash for WeightedStateSet {
    fn hash<H: Hasher>(&self, hasher: &mut H) {
        for state in &self.states {
            hasher.write_u32(state.index);
            hasher.write_u32((state.weight.log_value().to_bits() >> 32) as u32);
        }
    }
}

/// Accumulates weighted states, then produces a normalized
/// [WeightedStateSet].
#[derive(Debug, Default)]
pub struct WeightedStateSetBuilder {
    states: Vec<WeightedState>,
}

impl WeightedStateSetBuilder {
    pub fn add(&mut self, index: u32, weight: Weight) {
        self.states.push(WeightedState { index, weight });
    }

    /// Sorts by index, merges duplicate indices by summing their weights,
    /// and divides every weight by the maximum. Returns the set and the
    /// normalizer (the pre-normalization maximum, one for an empty set).
    pub fn get(mut self) -> (WeightedStateSet, Weight) {
        self.states.sort_by_key(|state| state.index);

        let mut merged: Vec<WeightedState> = Vec::with_capacity(self.states.len());
        for state in self.states {
            match merged.last_mut() {
                Some(last) if last.index == state.index => last.weight = last.weight.sum(state.weight),
                _ => merged.push(state),
            }
        }

        let mut normalizer = Weight::ZERO;
        for state in &merged {
            if state.weight > normalizer {
                normalizer = state.weight;
            }
        }

        if normalizer.is_zero() {
            return (WeightedStateSet { states: merged }, Weight::ONE);
        }

        let scale = Weight::from_log_value(-normalizer.log_value());
        for state in &mut merged {
            state.weight = state.weight.product(scale);
        }

        (WeightedStateSet { states: merged }, normalizer)
    }
}

/// Element distributions that can drive determinization.
///
/// Given a weighted set of source states, the hook synthesizes a list of
/// disjoint outgoing distributions with their transition weights and weighted
/// destination sets. The automaton is guaranteed ε-free when the hook is
/// invoked; destination weights below `log_eps` must be dropped.
pub trait DeterminizableDistribution: ElementDistribution {
    fn outgoing_transitions_for_set(
        automaton: &Automaton<Self>,
        source_set: &WeightedStateSet,
        log_eps: f64,
    ) -> Vec<(Self, Weight, WeightedStateSet)>;
}

impl<D: DeterminizableDistribution> Automaton<D> {
    /// [Automaton::try_determinize_with_eps] with [DEFAULT_LOG_EPS].
    pub fn try_determinize(&mut self) -> bool {
        self.try_determinize_with_eps(DEFAULT_LOG_EPS)
    }

    /// Attempts to replace this automaton with a deterministic equivalent
    /// via weighted powerset construction. Best-effort: returns `false` and
    /// leaves the automaton observably unchanged when determinization is
    /// refused or aborted.
    ///
    /// Determinization is refused when the automaton uses transition groups
    /// (the automaton is then marked [DeterminizationState::IsNonDeterminizable],
    /// since group information cannot be preserved) and when it is not
    /// ε-free (the caller must run an ε-removal pass first). Construction
    /// aborts when the output would exceed `min(3 * num_states, MAX_STATES)`
    /// states.
    ///
    /// `log_eps` is the log threshold below which per-destination weights
    /// are dropped by the distribution-specific sweep.
    pub fn try_determinize_with_eps(&mut self, log_eps: f64) -> bool {
        match self.determinization_state {
            DeterminizationState::IsDeterminized => return true,
            DeterminizationState::IsNonDeterminizable => return false,
            DeterminizationState::Unknown => {}
        }

        if self.uses_groups() {
            debug!("refusing to determinize: the automaton uses transition groups");
            self.determinization_state = DeterminizationState::IsNonDeterminizable;
            return false;
        }

        if !self.is_epsilon_free {
            debug!("refusing to determinize: the automaton has \u{3b5}-transitions");
            return false;
        }

        let max_output_states = min(3 * self.num_states(), MAX_STATES);

        let mut builder: Builder<D> = Builder::zero();
        builder
            .state(0)
            .set_end_weight(self.states[self.start_state_index as usize].end_weight);

        let start_set = WeightedStateSet::singleton(self.start_state_index);
        let mut set_to_state: HashMap<WeightedStateSet, u32> = HashMap::new();
        set_to_state.insert(start_set.clone(), 0);

        let mut work_list = VecDeque::new();
        work_list.push_back((start_set, 0u32));

        while let Some((source_set, source_state)) = work_list.pop_front() {
            trace!(
                "expanding a set of {} source states into output state {source_state}",
                source_set.len()
            );

            for (distribution, weight, destination_set) in self.outgoing_for_set(&source_set, log_eps) {
                let destination_state = match set_to_state.get(&destination_set) {
                    Some(&state) => state,
                    None => {
                        if builder.num_states() >= max_output_states {
                            debug!("determinization aborted: more than {max_output_states} output states");
                            return false;
                        }

                        let end_weight = destination_set.states().iter().fold(Weight::ZERO, |acc, member| {
                            acc.sum(member.weight.product(self.states[member.index as usize].end_weight))
                        });

                        let state = match builder.add_state() {
                            Ok(mut state_builder) => {
                                state_builder.set_end_weight(end_weight);
                                state_builder.index()
                            }
                            Err(error) => {
                                debug!("determinization aborted: {error}");
                                return false;
                            }
                        };

                        set_to_state.insert(destination_set.clone(), state);
                        work_list.push_back((destination_set, state));
                        state
                    }
                };

                builder.state(source_state).add_transition(Transition {
                    element_distribution: Some(distribution),
                    weight,
                    destination_state,
                    group: 0,
                });
            }
        }

        builder.merge_parallel_transitions();
        let mut result = match builder.finalize() {
            Ok(result) => result,
            Err(error) => {
                debug!("determinization aborted: {error}");
                return false;
            }
        };

        result.determinization_state = DeterminizationState::IsDeterminized;
        debug!(
            "determinized {} states into {} states",
            self.num_states(),
            result.num_states()
        );
        self.reseat(result);

        true
    }

    /// Fast path for a singleton set whose sole source state fans out to one
    /// destination; every other shape defers to the distribution-specific
    /// sweep.
    fn outgoing_for_set(&self, source_set: &WeightedStateSet, log_eps: f64) -> Vec<(D, Weight, WeightedStateSet)> {
        if source_set.len() == 1 {
            let source = source_set.states()[0];
            let transitions = self.state_transitions(source.index);

            let single_destination = transitions
                .first()
                .map(|first| first.destination_state)
                .filter(|&destination| {
                    transitions.iter().all(|transition| transition.destination_state == destination)
                });

            if transitions.is_empty() {
                return Vec::new();
            }

            if let Some(destination) = single_destination {
                let destination_set = WeightedStateSet::singleton(destination);
                return transitions
                    .iter()
                    .map(|transition| {
                        (
                            transition.element_distribution.clone().unwrap(),
                            transition.weight.product(source.weight),
                            destination_set.clone(),
                        )
                    })
                    .collect();
            }
        }

        D::outgoing_transitions_for_set(self, source_set, log_eps)
    }
}

#[cfg(test)]
mod tests {
    use {
        super::{WeightedStateSet, WeightedStateSetBuilder},
        crate::weight::Weight,
        pretty_assertions::assert_eq,
        std::collections::HashMap,
    };

    #[test_log::test]
    fn builder_sorts_merges_and_normalizes() {
        let mut builder = WeightedStateSetBuilder::default();
        builder.add(5, Weight::from_value(2.0));
        builder.add(1, Weight::from_value(4.0));
        builder.add(5, Weight::from_value(2.0));

        let (set, normalizer) = builder.get();

        // Indices strictly increase, duplicates were summed, the maximum
        // member weight is one, and the normalizer is the pre-normalization
        // maximum.
        let indices: Vec<u32> = set.states().iter().map(|member| member.index).collect();
        assert_eq!(indices, vec![1, 5]);
        assert!((normalizer.log_value() - 4.0f64.ln()).abs() < 1e-12);
        for member in set.states() {
            assert!(member.weight.log_value().abs() < 1e-12);
            assert!(member.weight.log_value() <= 0.0);
        }
    }

    #[test_log::test]
    fn empty_builder_yields_empty_set() {
        let (set, normalizer) = WeightedStateSetBuilder::default().get();
        assert!(set.is_empty());
        assert_eq!(normalizer, Weight::ONE);
    }

    #[test_log::test]
    fn equality_tolerates_tiny_log_differences() {
        let make = |log_weight: f64| {
            let mut builder = WeightedStateSetBuilder::default();
            builder.add(0, Weight::ONE);
            builder.add(3, Weight::from_log_value(log_weight));
            builder.get().0
        };

        let a = make(-1.1);
        let b = make(-1.1 + 1e-7);
        let c = make(-1.5);

        assert_eq!(a, b);
        assert_ne!(a, c);

        // Near-equal sets must land in the same hash bucket.
        let mut map: HashMap<WeightedStateSet, u32> = HashMap::new();
        map.insert(a, 7);
        assert_eq!(map.get(&make(-1.1 + 1e-7)), Some(&7));
    }

    #[test_log::test]
    fn equality_requires_identical_indices() {
        let singleton_a = WeightedStateSet::singleton(1);
        let singleton_b = WeightedStateSet::singleton(2);
        assert_ne!(singleton_a, singleton_b);
        assert_eq!(singleton_a, WeightedStateSet::singleton(1));
    }
}
