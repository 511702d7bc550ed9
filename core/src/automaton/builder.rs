use {
    crate::{
        automaton::{
            immutable::Automaton,
            transition::{StateData, Transition, NO_TRANSITION},
        },
        distribution::ElementDistribution,
        error::AutomatonError,
        weight::Weight,
    },
    bitvec::prelude::*,
    log::debug,
};

/// The largest number of states a builder will hold.
pub const MAX_STATES: usize = 50_000;

/// One cell of the builder's transition pool: the transition itself, the pool
/// index of the next transition of the same source state (`-1` terminates the
/// chain), and a tombstone flag.
///
/// Removal is logical, so transition indices stay stable until finalization.
#[derive(Clone, Debug)]
pub(crate) struct LinkedTransition<D> {
    pub transition: Transition<D>,
    pub next: i32,
    pub removed: bool,
}

/// The mutable construction surface for automata.
///
/// A builder owns an append-only state vector and a pool of
/// [LinkedTransition] cells forming one singly-linked chain per state.
/// Mutation happens through [StateBuilder] handles obtained from
/// [Builder::add_state] or [Builder::state]; [Builder::finalize] compacts the
/// live transitions into a fresh [Automaton], after which the builder remains
/// usable.
///
/// A builder always contains at least one state.
#[derive(Clone, Debug)]
pub struct Builder<D> {
    pub(crate) states: Vec<StateData>,
    pub(crate) transitions: Vec<LinkedTransition<D>>,
    pub(crate) removed_count: usize,
    pub(crate) start_state_index: u32,
}

impl<D: ElementDistribution> Builder<D> {
    /// A builder for the zero automaton: one transition-less state with a
    /// zero end weight, which is also the start state.
    pub fn zero() -> Self {
        Builder {
            states: vec![StateData::new()],
            transitions: Vec::new(),
            removed_count: 0,
            start_state_index: 0,
        }
    }

    /// A builder holding a deep copy of the given automaton, preserving both
    /// state and transition indices.
    pub fn from_automaton(automaton: &Automaton<D>) -> Self {
        let mut builder = Builder {
            states: Vec::with_capacity(automaton.num_states()),
            transitions: Vec::with_capacity(automaton.transitions().len()),
            removed_count: 0,
            start_state_index: automaton.start_state_index(),
        };

        for state in &automaton.states {
            builder.states.push(StateData {
                first_transition: NO_TRANSITION,
                last_transition: NO_TRANSITION,
                end_weight: state.end_weight,
            });
        }

        for state_index in 0..automaton.num_states() as u32 {
            for transition in automaton.state_transitions(state_index) {
                builder.add_transition(state_index, transition.clone());
            }
        }

        builder
    }

    /// A builder for the automaton that accepts exactly `sequence` with the
    /// given accumulated weight.
    ///
    /// # Errors
    /// Returns [AutomatonError::TooLarge] if the sequence needs more than
    /// [MAX_STATES] states.
    pub fn constant_on(weight: Weight, sequence: &[D::Element]) -> Result<Self, AutomatonError> {
        let mut builder = Self::zero();
        builder
            .state(0)
            .add_transitions_for_sequence(sequence, None)?
            .set_end_weight(weight);
        Ok(builder)
    }

    /// The number of states.
    #[inline]
    pub fn num_states(&self) -> usize {
        self.states.len()
    }

    /// The number of live (non-tombstoned) transitions.
    #[inline]
    pub fn transitions_count(&self) -> usize {
        self.transitions.len() - self.removed_count
    }

    #[inline]
    pub fn start_state_index(&self) -> u32 {
        self.start_state_index
    }

    /// Sets the start state. The index must stay below the state count by
    /// finalization time; no adjustment is performed by mutating operations
    /// other than [Builder::remove_states].
    pub fn set_start_state_index(&mut self, index: u32) {
        self.start_state_index = index;
    }

    /// The data record of the given state.
    pub fn state_data(&self, index: u32) -> &StateData {
        &self.states[index as usize]
    }

    /// Appends a new state with a zero end weight and returns its builder.
    ///
    /// # Errors
    /// Returns [AutomatonError::TooLarge] if the builder already holds
    /// [MAX_STATES] states.
    pub fn add_state(&mut self) -> Result<StateBuilder<'_, D>, AutomatonError> {
        let index = self.add_state_index()?;
        Ok(StateBuilder { builder: self, index })
    }

    /// Appends `count` new states, returning the index of the first.
    ///
    /// # Errors
    /// Returns [AutomatonError::TooLarge] if the result would exceed
    /// [MAX_STATES] states.
    pub fn add_states(&mut self, count: usize) -> Result<u32, AutomatonError> {
        if self.states.len() + count > MAX_STATES {
            return Err(AutomatonError::TooLarge(self.states.len() + count, MAX_STATES));
        }

        let first = self.states.len() as u32;
        self.states.extend((0..count).map(|_| StateData::new()));
        Ok(first)
    }

    /// Copies every state and transition of `other` into this builder,
    /// rebasing transition destinations by the current state count. Returns
    /// the index the copy starts at.
    ///
    /// # Errors
    /// Returns [AutomatonError::TooLarge] if the result would exceed
    /// [MAX_STATES] states.
    pub fn add_states_from(&mut self, other: &Automaton<D>) -> Result<u32, AutomatonError> {
        if self.states.len() + other.num_states() > MAX_STATES {
            return Err(AutomatonError::TooLarge(self.states.len() + other.num_states(), MAX_STATES));
        }

        let base = self.states.len() as u32;
        for state in &other.states {
            self.states.push(StateData {
                first_transition: NO_TRANSITION,
                last_transition: NO_TRANSITION,
                end_weight: state.end_weight,
            });
        }

        for state_index in 0..other.num_states() as u32 {
            for transition in other.state_transitions(state_index) {
                let mut rebased = transition.clone();
                rebased.destination_state += base;
                self.add_transition(base + state_index, rebased);
            }
        }

        Ok(base)
    }

    /// A mutation handle for an existing state.
    ///
    /// # Panics
    /// Panics if the index is out of range.
    pub fn state(&mut self, index: u32) -> StateBuilder<'_, D> {
        assert!(
            (index as usize) < self.states.len(),
            "state index {index} is not below the state count {}",
            self.states.len()
        );
        StateBuilder { builder: self, index }
    }

    /// Removes the state at `index`. All of its outgoing transitions and
    /// every transition pointing at it are tombstoned; destinations above the
    /// index are renumbered down by one.
    ///
    /// The start state index is *not* adjusted; the caller must keep it
    /// valid. All transition iterators are invalidated.
    ///
    /// # Panics
    /// Panics if the index is out of range or this is the only state.
    pub fn remove_state(&mut self, index: u32) {
        let removed_index = index as usize;
        assert!(removed_index < self.states.len());
        assert!(self.states.len() > 1, "a builder must keep at least one state");

        let mut cursor = self.states[removed_index].first_transition;
        while cursor != NO_TRANSITION {
            let cell = &mut self.transitions[cursor as usize];
            if !cell.removed {
                cell.removed = true;
                self.removed_count += 1;
            }
            cursor = cell.next;
        }

        self.states.remove(removed_index);

        for cell in &mut self.transitions {
            if cell.removed {
                continue;
            }

            let destination = cell.transition.destination_state;
            if destination == index {
                cell.removed = true;
                self.removed_count += 1;
            } else if destination > index {
                cell.transition.destination_state = destination - 1;
            }
        }
    }

    /// Bulk removal driven by a per-state label vector: every state whose
    /// label equals `remove_label` is removed, the survivors are compacted in
    /// place, and transition destinations are renumbered (or tombstoned when
    /// they point at a removed state). The start index is remapped; if the
    /// start state itself is removed, the builder is reset to
    /// [Builder::zero]. Returns the number of removed states.
    ///
    /// # Panics
    /// Panics if the label vector length differs from the state count.
    pub fn remove_states(&mut self, labels: &BitSlice, remove_label: bool) -> usize {
        assert_eq!(labels.len(), self.states.len(), "one label per state is required");

        let mut old_to_new = vec![NO_TRANSITION; self.states.len()];
        let mut kept = 0usize;
        for (old_index, slot) in old_to_new.iter_mut().enumerate() {
            if labels[old_index] != remove_label {
                *slot = kept as i32;
                kept += 1;
            }
        }

        let removed = self.states.len() - kept;
        if removed == 0 {
            return 0;
        }

        match old_to_new[self.start_state_index as usize] {
            NO_TRANSITION => {
                *self = Self::zero();
                return removed;
            }
            new_start => self.start_state_index = new_start as u32,
        }

        for (old_index, &new_index) in old_to_new.iter().enumerate() {
            if new_index != NO_TRANSITION {
                let data = self.states[old_index];
                self.states[new_index as usize] = data;
            }
        }
        self.states.truncate(kept);

        for cell in &mut self.transitions {
            if cell.removed {
                continue;
            }

            match old_to_new[cell.transition.destination_state as usize] {
                NO_TRANSITION => {
                    cell.removed = true;
                    self.removed_count += 1;
                }
                new_destination => cell.transition.destination_state = new_destination as u32,
            }
        }

        removed
    }

    /// Concatenation: appends a copy of `other` and connects every
    /// pre-existing end state to its start.
    ///
    /// With `avoid_epsilon`, and when either every pre-existing end state has
    /// no outgoing transitions or `other`'s start has no incoming
    /// transitions, the appended start state is fused away: its outgoing
    /// transitions are copied onto every former end state (non-self-loop
    /// weights scaled by that state's end weight, self-loops redirected), end
    /// weights are multiplied through, and the appended start is removed.
    /// Otherwise each former end state gets an ε-transition of its end weight
    /// to the appended start and its end weight is cleared.
    ///
    /// A nonzero `group` relabels every copied transition.
    ///
    /// # Errors
    /// Returns [AutomatonError::TooLarge] if the result would exceed
    /// [MAX_STATES] states.
    pub fn append(&mut self, other: &Automaton<D>, group: u32, avoid_epsilon: bool) -> Result<(), AutomatonError> {
        let end_states: Vec<u32> = (0..self.states.len() as u32)
            .filter(|&index| self.states[index as usize].can_end())
            .collect();

        let first_copied_transition = self.transitions.len();
        let base = self.add_states_from(other)?;

        if group != 0 {
            for cell in &mut self.transitions[first_copied_transition..] {
                cell.transition.group = group;
            }
        }

        let other_start = base + other.start_state_index();

        let ends_have_no_transitions = end_states
            .iter()
            .all(|&index| !self.has_live_transitions(index));
        let start_has_incoming = other
            .transitions()
            .iter()
            .any(|transition| transition.destination_state == other.start_state_index());

        if avoid_epsilon && (ends_have_no_transitions || !start_has_incoming) {
            let absorbed_end_weight = self.states[other_start as usize].end_weight;
            let outgoing = self.live_transitions(other_start);

            for &end_state in &end_states {
                let end_weight = self.states[end_state as usize].end_weight;
                for transition in &outgoing {
                    let mut copy = transition.clone();
                    if copy.destination_state == other_start {
                        copy.destination_state = end_state;
                    } else {
                        copy.weight = copy.weight.product(end_weight);
                    }
                    self.add_transition(end_state, copy);
                }

                self.states[end_state as usize].end_weight = end_weight.product(absorbed_end_weight);
            }

            self.remove_state(other_start);
        } else {
            for &end_state in &end_states {
                let end_weight = self.states[end_state as usize].end_weight;
                self.add_transition(
                    end_state,
                    Transition {
                        element_distribution: None,
                        weight: end_weight,
                        destination_state: other_start,
                        group,
                    },
                );
                self.states[end_state as usize].end_weight = Weight::ZERO;
            }
        }

        Ok(())
    }

    /// Compacts the live transitions into a fresh immutable automaton: each
    /// state's chain is walked in order, tombstones are skipped, and the
    /// surviving transitions land in one contiguous run of the flat array.
    /// The output is ε-free iff no live transition is an ε-transition.
    ///
    /// The builder is left untouched and remains usable.
    ///
    /// # Errors
    /// Returns [AutomatonError::InvalidStart] if the start state index is out
    /// of range.
    pub fn finalize(&self) -> Result<Automaton<D>, AutomatonError> {
        if (self.start_state_index as usize) >= self.states.len() {
            return Err(AutomatonError::InvalidStart(self.start_state_index, self.states.len()));
        }

        let mut out_states = Vec::with_capacity(self.states.len());
        let mut out_transitions = Vec::with_capacity(self.transitions_count());
        let mut is_epsilon_free = true;

        for state in &self.states {
            let first = out_transitions.len() as i32;
            let mut cursor = state.first_transition;
            while cursor != NO_TRANSITION {
                let cell = &self.transitions[cursor as usize];
                if !cell.removed {
                    if cell.transition.is_epsilon() {
                        is_epsilon_free = false;
                    }
                    out_transitions.push(cell.transition.clone());
                }
                cursor = cell.next;
            }

            out_states.push(StateData {
                first_transition: first,
                last_transition: out_transitions.len() as i32,
                end_weight: state.end_weight,
            });
        }

        debug!(
            "finalized automaton with {} states and {} transitions",
            out_states.len(),
            out_transitions.len()
        );

        Ok(Automaton::new(
            out_states,
            out_transitions,
            self.start_state_index,
            is_epsilon_free,
        ))
    }

    fn add_state_index(&mut self) -> Result<u32, AutomatonError> {
        if self.states.len() >= MAX_STATES {
            return Err(AutomatonError::TooLarge(self.states.len() + 1, MAX_STATES));
        }

        let index = self.states.len() as u32;
        self.states.push(StateData::new());
        Ok(index)
    }

    /// Appends a transition cell to the pool and links it at the tail of the
    /// source state's chain. Returns the pool index of the new cell.
    pub(crate) fn add_transition(&mut self, source: u32, transition: Transition<D>) -> i32 {
        debug_assert!((source as usize) < self.states.len());
        debug_assert!((transition.destination_state as usize) < self.states.len());

        let index = self.transitions.len() as i32;
        self.transitions.push(LinkedTransition {
            transition,
            next: NO_TRANSITION,
            removed: false,
        });

        let tail = self.states[source as usize].last_transition;
        if tail == NO_TRANSITION {
            self.states[source as usize].first_transition = index;
        } else {
            self.transitions[tail as usize].next = index;
        }
        self.states[source as usize].last_transition = index;

        index
    }

    pub(crate) fn has_live_transitions(&self, state_index: u32) -> bool {
        let mut cursor = self.states[state_index as usize].first_transition;
        while cursor != NO_TRANSITION {
            let cell = &self.transitions[cursor as usize];
            if !cell.removed {
                return true;
            }
            cursor = cell.next;
        }

        false
    }

    fn live_transitions(&self, state_index: u32) -> Vec<Transition<D>> {
        let mut result = Vec::new();
        let mut cursor = self.states[state_index as usize].first_transition;
        while cursor != NO_TRANSITION {
            let cell = &self.transitions[cursor as usize];
            if !cell.removed {
                result.push(cell.transition.clone());
            }
            cursor = cell.next;
        }

        result
    }
}

/// A mutation handle for one builder state.
pub struct StateBuilder<'a, D: ElementDistribution> {
    builder: &'a mut Builder<D>,
    index: u32,
}

impl<'a, D: ElementDistribution> StateBuilder<'a, D> {
    #[inline]
    pub fn index(&self) -> u32 {
        self.index
    }

    pub fn end_weight(&self) -> Weight {
        self.builder.states[self.index as usize].end_weight
    }

    pub fn set_end_weight(&mut self, weight: Weight) -> &mut Self {
        self.builder.states[self.index as usize].end_weight = weight;
        self
    }

    /// Adds an explicit transition record out of this state and returns the
    /// destination state's builder.
    ///
    /// # Panics
    /// Panics (in debug builds) if the destination is out of range.
    pub fn add_transition(self, transition: Transition<D>) -> StateBuilder<'a, D> {
        let destination = transition.destination_state;
        self.builder.add_transition(self.index, transition);
        StateBuilder {
            builder: self.builder,
            index: destination,
        }
    }

    /// Adds a transition with the given distribution and weight. A `None`
    /// destination allocates a fresh state. Returns the destination state's
    /// builder.
    ///
    /// # Errors
    /// Returns [AutomatonError::TooLarge] if a fresh state cannot be
    /// allocated.
    pub fn add_transition_to(
        self,
        element_distribution: Option<D>,
        weight: Weight,
        destination: Option<u32>,
        group: u32,
    ) -> Result<StateBuilder<'a, D>, AutomatonError> {
        let destination_state = match destination {
            Some(index) => index,
            None => self.builder.add_state_index()?,
        };

        Ok(self.add_transition(Transition {
            element_distribution,
            weight,
            destination_state,
            group,
        }))
    }

    /// Adds a transition on a point mass at `element`.
    pub fn add_element_transition(
        self,
        element: D::Element,
        weight: Weight,
        destination: Option<u32>,
    ) -> Result<StateBuilder<'a, D>, AutomatonError> {
        self.add_transition_to(Some(D::point(element)), weight, destination, 0)
    }

    /// Adds an ε-transition.
    pub fn add_epsilon_transition(
        self,
        weight: Weight,
        destination: Option<u32>,
    ) -> Result<StateBuilder<'a, D>, AutomatonError> {
        self.add_transition_to(None, weight, destination, 0)
    }

    /// Adds a transition from this state back to itself.
    pub fn add_self_transition(&mut self, element_distribution: Option<D>, weight: Weight) -> &mut Self {
        let index = self.index;
        self.builder.add_transition(
            index,
            Transition {
                element_distribution,
                weight,
                destination_state: index,
                group: 0,
            },
        );
        self
    }

    /// Strings weight-one point transitions for the given sequence, branching
    /// a fresh state per element; the final element lands on
    /// `final_destination` when given. Returns the builder of the last state
    /// reached (this state for an empty sequence).
    pub fn add_transitions_for_sequence(
        self,
        sequence: &[D::Element],
        final_destination: Option<u32>,
    ) -> Result<StateBuilder<'a, D>, AutomatonError> {
        let mut current = self;
        for (position, element) in sequence.iter().enumerate() {
            let destination = if position + 1 == sequence.len() {
                final_destination
            } else {
                None
            };
            current = current.add_element_transition(*element, Weight::ONE, destination)?;
        }

        Ok(current)
    }

    /// An iterator over this state's live transitions.
    pub fn transition_iterator(self) -> TransitionIterator<'a, D> {
        TransitionIterator {
            state_index: self.index,
            current: NO_TRANSITION,
            started: false,
            builder: self.builder,
        }
    }
}

/// Walks one state's transition chain, skipping tombstones.
///
/// The iterator supports reading the current transition, replacing it in
/// place, and marking it removed. Transitions added to the same state during
/// iteration are appended at the chain tail and will be visited.
pub struct TransitionIterator<'a, D: ElementDistribution> {
    builder: &'a mut Builder<D>,
    state_index: u32,
    current: i32,
    started: bool,
}

impl<'a, D: ElementDistribution> TransitionIterator<'a, D> {
    /// Advances to the next live transition; returns `false` once the chain
    /// is exhausted.
    pub fn advance(&mut self) -> bool {
        let mut cursor = if self.started {
            if self.current == NO_TRANSITION {
                return false;
            }
            self.builder.transitions[self.current as usize].next
        } else {
            self.started = true;
            self.builder.states[self.state_index as usize].first_transition
        };

        while cursor != NO_TRANSITION && self.builder.transitions[cursor as usize].removed {
            cursor = self.builder.transitions[cursor as usize].next;
        }

        self.current = cursor;
        cursor != NO_TRANSITION
    }

    /// The transition at the current position.
    ///
    /// # Panics
    /// Panics if the iterator is not positioned on a transition.
    pub fn value(&self) -> &Transition<D> {
        assert!(self.positioned(), "iterator is not positioned on a transition");
        &self.builder.transitions[self.current as usize].transition
    }

    /// Replaces the transition at the current position in place, keeping its
    /// pool index.
    pub fn replace(&mut self, transition: Transition<D>) {
        assert!(self.positioned(), "iterator is not positioned on a transition");
        debug_assert!((transition.destination_state as usize) < self.builder.states.len());
        self.builder.transitions[self.current as usize].transition = transition;
    }

    /// Marks the transition at the current position as removed.
    pub fn mark_removed(&mut self) {
        assert!(self.positioned(), "iterator is not positioned on a transition");
        let cell = &mut self.builder.transitions[self.current as usize];
        debug_assert!(!cell.removed, "transition is already removed");
        cell.removed = true;
        self.builder.removed_count += 1;
    }

    fn positioned(&self) -> bool {
        self.started && self.current != NO_TRANSITION
    }
}

#[cfg(test)]
mod tests {
    use {
        super::{Builder, MAX_STATES},
        crate::{
            automaton::transition::Transition,
            discrete_char::DiscreteChar,
            distribution::ElementDistribution,
            error::AutomatonError,
            weight::Weight,
        },
        bitvec::prelude::*,
        pretty_assertions::assert_eq,
    };

    fn point_transition(element: char, weight: Weight, destination: u32) -> Transition<DiscreteChar> {
        Transition {
            element_distribution: Some(DiscreteChar::point(element as u16)),
            weight,
            destination_state: destination,
            group: 0,
        }
    }

    #[test_log::test]
    fn zero_has_one_inert_state() {
        let builder = Builder::<DiscreteChar>::zero();
        assert_eq!(builder.num_states(), 1);
        assert_eq!(builder.transitions_count(), 0);
        assert_eq!(builder.start_state_index(), 0);
        assert!(!builder.state_data(0).can_end());
    }

    #[test_log::test]
    fn add_state_fails_past_max() {
        let mut builder = Builder::<DiscreteChar>::zero();
        builder.add_states(MAX_STATES - 1).unwrap();
        assert_eq!(builder.num_states(), MAX_STATES);
        assert!(matches!(builder.add_state(), Err(AutomatonError::TooLarge(_, _))));
        assert!(matches!(builder.add_states(1), Err(AutomatonError::TooLarge(_, _))));
    }

    #[test_log::test]
    fn transition_indices_are_stable_under_add() {
        let mut builder = Builder::<DiscreteChar>::zero();
        builder.add_states(2).unwrap();

        let first = builder.add_transition(0, point_transition('a', Weight::ONE, 1));
        let second = builder.add_transition(1, point_transition('b', Weight::ONE, 2));
        let third = builder.add_transition(0, point_transition('c', Weight::ONE, 2));

        assert_eq!((first, second, third), (0, 1, 2));

        // The chain of state 0 visits its transitions in insertion order even
        // though another state's transition was pooled in between.
        let mut iterator = builder.state(0).transition_iterator();
        assert!(iterator.advance());
        assert_eq!(iterator.value().destination_state, 1);
        assert!(iterator.advance());
        assert_eq!(iterator.value().destination_state, 2);
        assert!(!iterator.advance());
    }

    #[test_log::test]
    fn iterator_replaces_and_removes_in_place() {
        let mut builder = Builder::<DiscreteChar>::zero();
        builder.add_states(2).unwrap();
        builder.add_transition(0, point_transition('a', Weight::ONE, 1));
        builder.add_transition(0, point_transition('b', Weight::ONE, 2));

        let mut iterator = builder.state(0).transition_iterator();
        assert!(iterator.advance());
        iterator.replace(point_transition('x', Weight::from_value(0.5), 1));
        assert!(iterator.advance());
        iterator.mark_removed();
        assert!(!iterator.advance());

        assert_eq!(builder.transitions_count(), 1);

        let automaton = builder.finalize().unwrap();
        assert_eq!(automaton.transitions().len(), 1);
        assert_eq!(automaton.transitions()[0].destination_state, 1);
        assert_eq!(automaton.transitions()[0].weight, Weight::from_value(0.5));
    }

    #[test_log::test]
    fn finalize_compacts_live_transitions_in_order() {
        let mut builder = Builder::<DiscreteChar>::zero();
        builder.add_states(2).unwrap();
        builder.add_transition(1, point_transition('c', Weight::ONE, 2));
        builder.add_transition(0, point_transition('a', Weight::ONE, 1));
        builder.add_transition(0, point_transition('b', Weight::ONE, 2));

        let mut iterator = builder.state(1).transition_iterator();
        assert!(iterator.advance());
        iterator.mark_removed();

        let automaton = builder.finalize().unwrap();

        // States index their transitions as contiguous half-open ranges, in
        // chain order, with tombstones gone.
        assert_eq!(automaton.states().len(), 3);
        let state0 = automaton.states().get(0).unwrap();
        let targets: Vec<u32> = state0.transitions().iter().map(|t| t.destination_state).collect();
        assert_eq!(targets, vec![1, 2]);
        assert!(automaton.states().get(1).unwrap().transitions().is_empty());
        assert_eq!(automaton.transitions().len(), 2);
        assert!(automaton.is_epsilon_free());
        automaton.check_consistency().unwrap();
    }

    #[test_log::test]
    fn finalize_rejects_invalid_start() {
        let mut builder = Builder::<DiscreteChar>::zero();
        builder.set_start_state_index(7);
        assert!(matches!(builder.finalize(), Err(AutomatonError::InvalidStart(7, 1))));
    }

    #[test_log::test]
    fn remove_state_renumbers_destinations() {
        let mut builder = Builder::<DiscreteChar>::zero();
        builder.add_states(2).unwrap();
        builder.add_transition(0, point_transition('a', Weight::ONE, 1));
        builder.add_transition(0, point_transition('b', Weight::ONE, 2));
        builder.add_transition(1, point_transition('c', Weight::ONE, 2));

        builder.remove_state(1);

        assert_eq!(builder.num_states(), 2);
        // The transition into the removed state and the removed state's own
        // outgoing transition are tombstoned; the destination above the
        // removed index slid down by one.
        assert_eq!(builder.transitions_count(), 1);
        let automaton = builder.finalize().unwrap();
        assert_eq!(automaton.transitions().len(), 1);
        assert_eq!(automaton.transitions()[0].destination_state, 1);
    }

    #[test_log::test]
    fn remove_states_compacts_and_remaps_start() {
        let mut builder = Builder::<DiscreteChar>::zero();
        builder.add_states(3).unwrap();
        builder.add_transition(0, point_transition('a', Weight::ONE, 1));
        builder.add_transition(0, point_transition('b', Weight::ONE, 2));
        builder.add_transition(2, point_transition('c', Weight::ONE, 3));
        builder.state(2).set_end_weight(Weight::ONE);
        builder.set_start_state_index(2);

        // Labels: [keep, remove, keep, remove].
        let labels = bitvec![0, 1, 0, 1];
        let removed = builder.remove_states(&labels, true);

        assert_eq!(removed, 2);
        assert_eq!(builder.num_states(), 2);
        assert_eq!(builder.start_state_index(), 1);
        assert!(builder.state_data(1).can_end());

        // Transitions into removed states are tombstoned, the survivor is
        // renumbered: old state 2 became state 1.
        assert_eq!(builder.transitions_count(), 1);
        let automaton = builder.finalize().unwrap();
        assert_eq!(automaton.transitions().len(), 1);
        assert_eq!(automaton.transitions()[0].destination_state, 1);
    }

    #[test_log::test]
    fn remove_states_resets_when_start_dies() {
        let mut builder = Builder::<DiscreteChar>::zero();
        builder.add_states(1).unwrap();
        builder.state(1).set_end_weight(Weight::ONE);

        let labels = bitvec![1, 0];
        let removed = builder.remove_states(&labels, true);

        assert_eq!(removed, 1);
        assert_eq!(builder.num_states(), 1);
        assert_eq!(builder.start_state_index(), 0);
        assert_eq!(builder.transitions_count(), 0);
        assert!(!builder.state_data(0).can_end());
    }

    #[test_log::test]
    fn remove_states_with_nothing_to_remove() {
        let mut builder = Builder::<DiscreteChar>::zero();
        builder.add_states(1).unwrap();
        let labels = bitvec![0, 0];
        assert_eq!(builder.remove_states(&labels, true), 0);
        assert_eq!(builder.num_states(), 2);
    }

    #[test_log::test]
    fn append_bridges_with_epsilon() {
        // A: 0 -a-> 1(end=One). B accepts [b].
        let mut builder = Builder::<DiscreteChar>::zero();
        builder
            .state(0)
            .add_element_transition('a' as u16, Weight::ONE, None)
            .unwrap()
            .set_end_weight(Weight::ONE);

        let appended = Builder::<DiscreteChar>::constant_on(Weight::ONE, &['b' as u16])
            .unwrap()
            .finalize()
            .unwrap();
        builder.append(&appended, 0, false).unwrap();

        // One ε-edge out of the former end state carries its end weight.
        let automaton = builder.finalize().unwrap();
        assert!(!automaton.is_epsilon_free());
        let epsilon_edges: Vec<_> = automaton
            .transitions()
            .iter()
            .filter(|transition| transition.is_epsilon())
            .collect();
        assert_eq!(epsilon_edges.len(), 1);
        assert_eq!(epsilon_edges[0].weight, Weight::ONE);
        assert!(!automaton.states().get(1).unwrap().can_end());

        assert_eq!(automaton.log_value(&['a' as u16, 'b' as u16]), 0.0);
        assert_eq!(automaton.log_value(&['a' as u16]), f64::NEG_INFINITY);
    }

    #[test_log::test]
    fn append_fuses_start_without_epsilon() {
        // A: two states, state 0 ends with weight One and has no transitions.
        let mut builder = Builder::<DiscreteChar>::zero();
        builder.add_states(1).unwrap();
        builder.state(0).set_end_weight(Weight::ONE);

        let appended = Builder::<DiscreteChar>::constant_on(Weight::ONE, &['b' as u16])
            .unwrap()
            .finalize()
            .unwrap();
        builder.append(&appended, 0, true).unwrap();

        // The appended start was absorbed: one fewer state than the sum.
        assert_eq!(builder.num_states(), 3);
        let automaton = builder.finalize().unwrap();
        assert!(automaton.is_epsilon_free());
        assert_eq!(automaton.log_value(&['b' as u16]), 0.0);
        assert_eq!(automaton.log_value(&[]), f64::NEG_INFINITY);
    }

    #[test_log::test]
    fn append_fusion_matches_epsilon_bridge() {
        let weight = Weight::from_value(0.5);
        let sequence = ['a' as u16, 'b' as u16];
        let suffix = ['c' as u16, 'd' as u16];
        let full: Vec<u16> = sequence.iter().chain(suffix.iter()).copied().collect();

        let appended = Builder::<DiscreteChar>::constant_on(Weight::from_value(0.25), &suffix)
            .unwrap()
            .finalize()
            .unwrap();

        let mut fused = Builder::<DiscreteChar>::constant_on(weight, &sequence).unwrap();
        fused.append(&appended, 0, true).unwrap();
        let fused = fused.finalize().unwrap();

        let mut bridged = Builder::<DiscreteChar>::constant_on(weight, &sequence).unwrap();
        bridged.append(&appended, 0, false).unwrap();
        let bridged = bridged.finalize().unwrap();

        assert!((fused.log_value(&full) - bridged.log_value(&full)).abs() < 1e-12);
        assert_eq!(fused.log_value(&sequence), f64::NEG_INFINITY);
        assert_eq!(bridged.log_value(&sequence), f64::NEG_INFINITY);
        assert_eq!(fused.num_states(), bridged.num_states() - 1);
    }

    #[test_log::test]
    fn append_relabels_groups() {
        let mut builder = Builder::<DiscreteChar>::zero();
        builder.state(0).set_end_weight(Weight::ONE);

        let appended = Builder::<DiscreteChar>::constant_on(Weight::ONE, &['b' as u16])
            .unwrap()
            .finalize()
            .unwrap();
        builder.append(&appended, 7, false).unwrap();

        let automaton = builder.finalize().unwrap();
        assert!(automaton.transitions().iter().all(|transition| transition.group == 7));
        assert!(automaton.uses_groups());
    }

    #[test_log::test]
    fn from_automaton_round_trips() {
        let mut builder = Builder::<DiscreteChar>::zero();
        builder
            .state(0)
            .add_element_transition('a' as u16, Weight::from_value(0.5), None)
            .unwrap()
            .add_epsilon_transition(Weight::from_value(0.25), Some(0))
            .unwrap();
        builder.state(1).set_end_weight(Weight::from_value(2.0));

        let original = builder.finalize().unwrap();
        let copied = Builder::from_automaton(&original).finalize().unwrap();

        assert_eq!(copied.states, original.states);
        assert_eq!(copied.transitions, original.transitions);
        assert_eq!(copied.start_state_index, original.start_state_index);
        assert_eq!(copied.is_epsilon_free, original.is_epsilon_free);
    }

    #[test_log::test]
    fn self_transitions_loop() {
        let mut builder = Builder::<DiscreteChar>::zero();
        builder
            .state(0)
            .add_self_transition(Some(DiscreteChar::point('a' as u16)), Weight::from_value(0.5))
            .set_end_weight(Weight::ONE);

        let automaton = builder.finalize().unwrap();
        assert_eq!(automaton.log_value(&[]), 0.0);
        assert!((automaton.log_value(&['a' as u16]) - 0.5f64.ln()).abs() < 1e-12);
        assert!((automaton.log_value(&['a' as u16, 'a' as u16]) - 0.25f64.ln()).abs() < 1e-12);
    }

    #[test_log::test]
    fn sequence_transitions_can_close_a_loop() {
        let mut builder = Builder::<DiscreteChar>::zero();
        builder
            .state(0)
            .add_transitions_for_sequence(&['a' as u16, 'b' as u16], Some(0))
            .unwrap()
            .set_end_weight(Weight::ONE);

        let automaton = builder.finalize().unwrap();
        assert_eq!(automaton.num_states(), 2);
        assert_eq!(automaton.log_value(&[]), 0.0);
        let ab = ['a' as u16, 'b' as u16];
        assert_eq!(automaton.log_value(&ab), 0.0);
        let abab: Vec<u16> = ab.iter().chain(ab.iter()).copied().collect();
        assert_eq!(automaton.log_value(&abab), 0.0);
        assert_eq!(automaton.log_value(&ab[..1]), f64::NEG_INFINITY);
    }
}
