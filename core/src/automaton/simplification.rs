//! Simplification passes over a [Builder]: merging parallel transitions and
//! pruning states that cannot reach a sufficiently weighty end state.

use {
    crate::{
        automaton::{
            builder::Builder,
            transition::NO_TRANSITION,
        },
        distribution::ElementDistribution,
    },
    bitvec::prelude::*,
    log::debug,
    std::collections::{HashMap, VecDeque},
};

impl<D: ElementDistribution> Builder<D> {
    /// Merges parallel transitions: within each state, live transitions
    /// sharing a destination and group collapse into one whose weight is the
    /// sum of the members and whose element distribution is their normalized
    /// weighted union. ε-transitions merge only with ε-transitions.
    ///
    /// The merged transition keeps the pool index (and chain position) of the
    /// group's first member.
    pub fn merge_parallel_transitions(&mut self) {
        for state_index in 0..self.states.len() {
            let mut first_for_key: HashMap<(u32, u32, bool), i32> = HashMap::new();

            let mut cursor = self.states[state_index].first_transition;
            while cursor != NO_TRANSITION {
                let next = self.transitions[cursor as usize].next;

                if !self.transitions[cursor as usize].removed {
                    let key = {
                        let transition = &self.transitions[cursor as usize].transition;
                        (transition.destination_state, transition.group, transition.is_epsilon())
                    };

                    match first_for_key.get(&key) {
                        None => {
                            first_for_key.insert(key, cursor);
                        }
                        Some(&target) => {
                            let (weight, element_distribution) = {
                                let earlier = &self.transitions[target as usize].transition;
                                let later = &self.transitions[cursor as usize].transition;
                                let distribution = match (&earlier.element_distribution, &later.element_distribution) {
                                    (Some(d1), Some(d2)) => {
                                        Some(D::weighted_sum(earlier.weight, d1, later.weight, d2))
                                    }
                                    _ => None,
                                };
                                (earlier.weight.sum(later.weight), distribution)
                            };

                            let merged = &mut self.transitions[target as usize].transition;
                            merged.weight = weight;
                            merged.element_distribution = element_distribution;

                            self.transitions[cursor as usize].removed = true;
                            self.removed_count += 1;
                        }
                    }
                }

                cursor = next;
            }
        }
    }

    /// Removes every state that cannot reach (transitively, through live
    /// transitions) some state whose log end weight exceeds `threshold`.
    /// Returns the number of removed states; if the start state itself is
    /// removed the builder is reset to [Builder::zero].
    pub fn prune_states_with_log_end_weight_less_than(&mut self, threshold: f64) -> usize {
        let state_count = self.states.len();

        // Reverse adjacency over live transitions.
        let mut incoming: Vec<Vec<u32>> = vec![Vec::new(); state_count];
        for state_index in 0..state_count {
            let mut cursor = self.states[state_index].first_transition;
            while cursor != NO_TRANSITION {
                let cell = &self.transitions[cursor as usize];
                if !cell.removed {
                    incoming[cell.transition.destination_state as usize].push(state_index as u32);
                }
                cursor = cell.next;
            }
        }

        let mut can_reach = bitvec![0; state_count];
        let mut work_list = VecDeque::new();
        for (state_index, state) in self.states.iter().enumerate() {
            if state.end_weight.log_value() > threshold {
                can_reach.set(state_index, true);
                work_list.push_back(state_index as u32);
            }
        }

        while let Some(state_index) = work_list.pop_front() {
            for &source in &incoming[state_index as usize] {
                if !can_reach[source as usize] {
                    can_reach.set(source as usize, true);
                    work_list.push_back(source);
                }
            }
        }

        let removed = self.remove_states(&can_reach, false);
        if removed > 0 {
            debug!("pruned {removed} states that cannot reach log end weight above {threshold}");
        }

        removed
    }
}

#[cfg(test)]
mod tests {
    use {
        crate::{
            automaton::{builder::Builder, transition::Transition},
            discrete_char::DiscreteChar,
            distribution::ElementDistribution,
            weight::Weight,
        },
        pretty_assertions::assert_eq,
    };

    fn transition(
        distribution: Option<DiscreteChar>,
        weight: Weight,
        destination: u32,
        group: u32,
    ) -> Transition<DiscreteChar> {
        Transition {
            element_distribution: distribution,
            weight,
            destination_state: destination,
            group,
        }
    }

    #[test_log::test]
    fn parallel_transitions_merge_weights_and_distributions() {
        let mut builder = Builder::<DiscreteChar>::zero();
        builder.add_states(1).unwrap();
        builder.add_transition(
            0,
            transition(Some(DiscreteChar::point('a' as u16)), Weight::from_value(1.0), 1, 0),
        );
        builder.add_transition(
            0,
            transition(Some(DiscreteChar::point('b' as u16)), Weight::from_value(3.0), 1, 0),
        );
        builder.state(1).set_end_weight(Weight::ONE);

        builder.merge_parallel_transitions();
        assert_eq!(builder.transitions_count(), 1);

        let automaton = builder.finalize().unwrap();
        let merged = &automaton.transitions()[0];
        assert!((merged.weight.log_value() - 4.0f64.ln()).abs() < 1e-12);

        let distribution = merged.element_distribution.as_ref().unwrap();
        assert!((distribution.probability('a' as u16).value() - 0.25).abs() < 1e-12);
        assert!((distribution.probability('b' as u16).value() - 0.75).abs() < 1e-12);

        // The weighted language is unchanged.
        assert!((automaton.log_value(&['a' as u16]) - 1.0f64.ln()).abs() < 1e-9);
        assert!((automaton.log_value(&['b' as u16]) - 3.0f64.ln()).abs() < 1e-9);
    }

    #[test_log::test]
    fn epsilon_merges_only_with_epsilon() {
        let mut builder = Builder::<DiscreteChar>::zero();
        builder.add_states(1).unwrap();
        builder.add_transition(0, transition(None, Weight::from_value(0.5), 1, 0));
        builder.add_transition(
            0,
            transition(Some(DiscreteChar::point('a' as u16)), Weight::ONE, 1, 0),
        );
        builder.add_transition(0, transition(None, Weight::from_value(0.25), 1, 0));

        builder.merge_parallel_transitions();

        assert_eq!(builder.transitions_count(), 2);
        let automaton = builder.finalize().unwrap();
        let epsilon = automaton
            .transitions()
            .iter()
            .find(|transition| transition.is_epsilon())
            .unwrap();
        assert!((epsilon.weight.log_value() - 0.75f64.ln()).abs() < 1e-12);
    }

    #[test_log::test]
    fn different_groups_stay_apart() {
        let mut builder = Builder::<DiscreteChar>::zero();
        builder.add_states(1).unwrap();
        builder.add_transition(
            0,
            transition(Some(DiscreteChar::point('a' as u16)), Weight::ONE, 1, 1),
        );
        builder.add_transition(
            0,
            transition(Some(DiscreteChar::point('a' as u16)), Weight::ONE, 1, 2),
        );

        builder.merge_parallel_transitions();
        assert_eq!(builder.transitions_count(), 2);
    }

    #[test_log::test]
    fn different_destinations_stay_apart() {
        let mut builder = Builder::<DiscreteChar>::zero();
        builder.add_states(2).unwrap();
        builder.add_transition(
            0,
            transition(Some(DiscreteChar::point('a' as u16)), Weight::ONE, 1, 0),
        );
        builder.add_transition(
            0,
            transition(Some(DiscreteChar::point('a' as u16)), Weight::ONE, 2, 0),
        );

        builder.merge_parallel_transitions();
        assert_eq!(builder.transitions_count(), 2);
    }

    #[test_log::test]
    fn pruning_drops_unproductive_branches() {
        // 0 -a-> 1(end 1.0), 0 -b-> 2 -c-> 3(end e^-50): the b-branch only
        // reaches an end weight below the threshold.
        let mut builder = Builder::<DiscreteChar>::zero();
        builder.add_states(3).unwrap();
        builder.add_transition(
            0,
            transition(Some(DiscreteChar::point('a' as u16)), Weight::ONE, 1, 0),
        );
        builder.add_transition(
            0,
            transition(Some(DiscreteChar::point('b' as u16)), Weight::ONE, 2, 0),
        );
        builder.add_transition(
            2,
            transition(Some(DiscreteChar::point('c' as u16)), Weight::ONE, 3, 0),
        );
        builder.state(1).set_end_weight(Weight::ONE);
        builder.state(3).set_end_weight(Weight::from_log_value(-50.0));

        let removed = builder.prune_states_with_log_end_weight_less_than(-35.0);

        assert_eq!(removed, 2);
        assert_eq!(builder.num_states(), 2);
        let automaton = builder.finalize().unwrap();
        assert_eq!(automaton.log_value(&['a' as u16]), 0.0);
        assert_eq!(automaton.log_value(&['b' as u16, 'c' as u16]), f64::NEG_INFINITY);
    }

    #[test_log::test]
    fn pruning_everything_resets_to_zero() {
        let mut builder = Builder::<DiscreteChar>::constant_on(Weight::from_log_value(-80.0), &['a' as u16]).unwrap();
        let removed = builder.prune_states_with_log_end_weight_less_than(-35.0);

        assert_eq!(removed, 2);
        assert_eq!(builder.num_states(), 1);
        assert!(builder.finalize().unwrap().is_zero());
    }
}
