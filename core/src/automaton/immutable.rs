use {
    crate::{
        automaton::transition::{StateData, Transition},
        distribution::ElementDistribution,
        error::AutomatonError,
        weight::Weight,
    },
    bitvec::prelude::*,
    std::{collections::VecDeque, mem::swap},
};

/// What is known about an automaton's determinism.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum DeterminizationState {
    /// No determinization attempt has been recorded.
    Unknown,

    /// The automaton is the output of a successful determinization.
    IsDeterminized,

    /// Determinization was attempted and refused; further attempts are
    /// pointless (e.g. the automaton uses transition groups).
    IsNonDeterminizable,
}

/// A finalized automaton: parallel arrays of [StateData] and [Transition],
/// a start state, and an ε-freeness flag.
///
/// For each state, `[first_transition, last_transition)` indexes contiguous
/// transitions in the flat transition array; this is the only layout exposed
/// to readers. Instances are read-only after finalization and may be shared
/// by reference across threads; the mutation surface lives on
/// [crate::automaton::Builder].
#[derive(Clone, Debug)]
pub struct Automaton<D> {
    pub(crate) states: Vec<StateData>,
    pub(crate) transitions: Vec<Transition<D>>,
    pub(crate) start_state_index: u32,
    pub(crate) is_epsilon_free: bool,
    pub(crate) determinization_state: DeterminizationState,
    prune_threshold: Option<f64>,
    log_value_override: Option<f64>,
}

impl<D: ElementDistribution> Automaton<D> {
    pub(crate) fn new(
        states: Vec<StateData>,
        transitions: Vec<Transition<D>>,
        start_state_index: u32,
        is_epsilon_free: bool,
    ) -> Self {
        Automaton {
            states,
            transitions,
            start_state_index,
            is_epsilon_free,
            determinization_state: DeterminizationState::Unknown,
            prune_threshold: None,
            log_value_override: None,
        }
    }

    /// The states of this automaton.
    pub fn states(&self) -> StateCollection<'_, D> {
        StateCollection { automaton: self }
    }

    /// The number of states.
    #[inline]
    pub fn num_states(&self) -> usize {
        self.states.len()
    }

    /// The flat transition array. Use [StateRef::transitions] for the
    /// transitions of a single state.
    pub fn transitions(&self) -> &[Transition<D>] {
        &self.transitions
    }

    /// The state a run starts in.
    #[inline]
    pub fn start_state_index(&self) -> u32 {
        self.start_state_index
    }

    /// True if no transition is an ε-transition.
    #[inline]
    pub fn is_epsilon_free(&self) -> bool {
        self.is_epsilon_free
    }

    #[inline]
    pub fn determinization_state(&self) -> DeterminizationState {
        self.determinization_state
    }

    /// True if any transition carries a nonzero group tag.
    pub fn uses_groups(&self) -> bool {
        self.transitions.iter().any(|transition| transition.group != 0)
    }

    /// If set, states whose end weight falls below this log threshold are
    /// dropped by simplification passes run on this automaton's builders.
    pub fn prune_threshold(&self) -> Option<f64> {
        self.prune_threshold
    }

    pub fn set_prune_threshold(&mut self, threshold: Option<f64>) {
        self.prune_threshold = threshold;
    }

    /// If set, [Automaton::log_value] reports this value for every accepted
    /// sequence instead of the computed magnitude.
    pub fn log_value_override(&self) -> Option<f64> {
        self.log_value_override
    }

    pub fn set_log_value_override(&mut self, log_value: Option<f64>) {
        self.log_value_override = log_value;
    }

    /// Verifies the structural invariants of the flat layout: the start index
    /// is in range, every state's transition range lies inside the transition
    /// array, and every destination is a valid state index.
    ///
    /// # Errors
    /// Returns [AutomatonError::IndicesOutOfRange] describing the first
    /// violation found.
    pub fn check_consistency(&self) -> Result<(), AutomatonError> {
        let state_count = self.states.len();
        let transition_count = self.transitions.len();

        if (self.start_state_index as usize) >= state_count {
            return Err(AutomatonError::IndicesOutOfRange(format!(
                "start state {} is not below the state count {state_count}",
                self.start_state_index
            )));
        }

        for (index, state) in self.states.iter().enumerate() {
            if state.first_transition < 0
                || state.last_transition < state.first_transition
                || state.last_transition as usize > transition_count
            {
                return Err(AutomatonError::IndicesOutOfRange(format!(
                    "state {index} has transition range [{}, {}) outside the transition array of length {transition_count}",
                    state.first_transition, state.last_transition
                )));
            }
        }

        for (index, transition) in self.transitions.iter().enumerate() {
            if (transition.destination_state as usize) >= state_count {
                return Err(AutomatonError::IndicesOutOfRange(format!(
                    "transition {index} points at state {} which is not below the state count {state_count}",
                    transition.destination_state
                )));
            }
        }

        Ok(())
    }

    /// True if no state with nonzero end weight is reachable from the start
    /// state, i.e. the automaton assigns zero weight to every sequence.
    pub fn is_zero(&self) -> bool {
        let mut seen = bitvec![0; self.states.len()];
        let mut work_list = VecDeque::new();
        seen.set(self.start_state_index as usize, true);
        work_list.push_back(self.start_state_index);

        while let Some(state_index) = work_list.pop_front() {
            if self.states[state_index as usize].can_end() {
                return false;
            }

            for transition in self.state_transitions(state_index) {
                let dest = transition.destination_state as usize;
                if !seen[dest] {
                    seen.set(dest, true);
                    work_list.push_back(transition.destination_state);
                }
            }
        }

        true
    }

    /// The log of the total weight this automaton assigns to the given
    /// sequence: the sum over all accepting paths of the product of
    /// transition weights, element probabilities, and the final state's end
    /// weight.
    ///
    /// ε-transitions are folded in by relaxation bounded by the state count
    /// per input position; ε-cycles whose total weight reaches one are
    /// outside the supported domain and yield an underestimate.
    ///
    /// If a log value override is set, every accepted sequence reports the
    /// override and every rejected sequence reports `-∞`.
    pub fn log_value(&self, sequence: &[D::Element]) -> f64 {
        let mut forward = vec![Weight::ZERO; self.states.len()];
        forward[self.start_state_index as usize] = Weight::ONE;
        self.propagate_epsilon(&mut forward);

        for element in sequence {
            let mut next = vec![Weight::ZERO; self.states.len()];
            for (state_index, &mass) in forward.iter().enumerate() {
                if mass.is_zero() {
                    continue;
                }

                for transition in self.state_transitions(state_index as u32) {
                    if let Some(distribution) = &transition.element_distribution {
                        let dest = transition.destination_state as usize;
                        let step = mass.product(transition.weight).product(distribution.probability(*element));
                        next[dest] = next[dest].sum(step);
                    }
                }
            }

            forward = next;
            self.propagate_epsilon(&mut forward);
        }

        let mut result = Weight::ZERO;
        for (state_index, &mass) in forward.iter().enumerate() {
            result = result.sum(mass.product(self.states[state_index].end_weight));
        }

        match self.log_value_override {
            Some(log_value) if !result.is_zero() => log_value,
            Some(_) => f64::NEG_INFINITY,
            None => result.log_value(),
        }
    }

    /// Propagates mass along ε-transitions: after the call, each state's
    /// entry includes the mass of every ε-path of length up to the state
    /// count ending there.
    fn propagate_epsilon(&self, mass: &mut [Weight]) {
        if self.is_epsilon_free {
            return;
        }

        let mut frontier: Vec<Weight> = mass.to_vec();
        for _ in 0..self.states.len() {
            let mut reached = vec![Weight::ZERO; mass.len()];
            let mut any = false;

            for (state_index, &source_mass) in frontier.iter().enumerate() {
                if source_mass.is_zero() {
                    continue;
                }

                for transition in self.state_transitions(state_index as u32) {
                    if transition.is_epsilon() {
                        let dest = transition.destination_state as usize;
                        reached[dest] = reached[dest].sum(source_mass.product(transition.weight));
                        any = true;
                    }
                }
            }

            if !any {
                break;
            }

            for (entry, &addition) in mass.iter_mut().zip(reached.iter()) {
                *entry = entry.sum(addition);
            }

            frontier = reached;
        }
    }

    /// The transitions leaving the given state.
    pub(crate) fn state_transitions(&self, state_index: u32) -> &[Transition<D>] {
        let state = &self.states[state_index as usize];
        &self.transitions[state.first_transition as usize..state.last_transition as usize]
    }

    /// Installs new backing arrays, replacing the old ones in one step. Used
    /// by the determinizer so that its output can be seated without aliasing
    /// the arrays it was computed from.
    pub(crate) fn reseat(&mut self, mut other: Automaton<D>) {
        swap(&mut self.states, &mut other.states);
        swap(&mut self.transitions, &mut other.transitions);
        self.start_state_index = other.start_state_index;
        self.is_epsilon_free = other.is_epsilon_free;
        self.determinization_state = other.determinization_state;
    }
}

/// Read-only view over an automaton's states.
pub struct StateCollection<'a, D> {
    automaton: &'a Automaton<D>,
}

impl<D> Clone for StateCollection<'_, D> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<D> Copy for StateCollection<'_, D> {}

impl<'a, D: ElementDistribution> StateCollection<'a, D> {
    pub fn len(&self) -> usize {
        self.automaton.states.len()
    }

    pub fn is_empty(&self) -> bool {
        self.automaton.states.is_empty()
    }

    pub fn get(&self, index: u32) -> Option<StateRef<'a, D>> {
        if (index as usize) < self.automaton.states.len() {
            Some(StateRef { automaton: self.automaton, index })
        } else {
            None
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = StateRef<'a, D>> + '_ {
        let automaton = self.automaton;
        (0..automaton.states.len() as u32).map(move |index| StateRef { automaton, index })
    }
}

/// Read-only view of one state.
pub struct StateRef<'a, D> {
    automaton: &'a Automaton<D>,
    index: u32,
}

impl<D> Clone for StateRef<'_, D> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<D> Copy for StateRef<'_, D> {}

impl<'a, D: ElementDistribution> StateRef<'a, D> {
    #[inline]
    pub fn index(&self) -> u32 {
        self.index
    }

    pub fn data(&self) -> &'a StateData {
        &self.automaton.states[self.index as usize]
    }

    pub fn end_weight(&self) -> Weight {
        self.data().end_weight
    }

    pub fn can_end(&self) -> bool {
        self.data().can_end()
    }

    /// The transitions leaving this state, in finalization order.
    pub fn transitions(&self) -> &'a [Transition<D>] {
        self.automaton.state_transitions(self.index)
    }
}
