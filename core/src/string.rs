//! The string automaton: the automaton core specialized to [DiscreteChar]
//! elements, with range-sweep determinization and binary serialization.

use {
    crate::{
        automaton::{
            Automaton, DeterminizableDistribution, StateData, Transition, WeightedStateSet,
            WeightedStateSetBuilder,
        },
        discrete_char::{DiscreteChar, CHAR_UNIVERSE_END},
        error::{AutomatonError, BoxResult},
        io::{WireReadExt, WireWriteExt},
        weight::Weight,
    },
    once_cell::sync::Lazy,
    std::{
        collections::{HashMap, HashSet},
        io::{Read, Result as IoResult, Write},
    },
};

/// A weighted finite-state automaton over characters.
pub type StringAutomaton = Automaton<DiscreteChar>;

/// One sub-range of the element space contributed by a transition's
/// distribution, with the per-element weight carried across the sweep.
#[derive(Clone, Copy, Debug)]
struct Segment {
    start: u32,
    end: u32,
    destination: u32,
    weight: Weight,
}

/// Value identity of a [Segment], usable as a hash key. Two segments with
/// identical bounds, destination, and weight bits collapse to one entry of
/// the active set.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
struct SegmentKey {
    start: u32,
    end: u32,
    destination: u32,
    weight_bits: u64,
}

impl Segment {
    fn key(&self) -> SegmentKey {
        SegmentKey {
            start: self.start,
            end: self.end,
            destination: self.destination,
            weight_bits: self.weight.log_value().to_bits(),
        }
    }
}

/// A segment bound: the start of a segment, or one past its end.
#[derive(Clone, Copy, Debug)]
struct SegmentEvent {
    position: u32,
    is_start: bool,
    segment: Segment,
}

fn push_segment(events: &mut Vec<SegmentEvent>, segment: Segment) {
    events.push(SegmentEvent {
        position: segment.start,
        is_start: true,
        segment,
    });
    events.push(SegmentEvent {
        position: segment.end,
        is_start: false,
        segment,
    });
}

/// Expands every transition leaving the weighted source set into segment
/// events: one weighted segment per explicit range with nonzero probability,
/// plus segments covering the gaps (and the tail of the element space) when
/// the distribution's common value is nonzero.
fn collect_segment_events(automaton: &StringAutomaton, source_set: &WeightedStateSet) -> Vec<SegmentEvent> {
    let mut events = Vec::new();

    for member in source_set.states() {
        for transition in automaton.state_transitions(member.index) {
            let distribution = transition.element_distribution.as_ref().unwrap();
            let base_weight = transition.weight.product(member.weight);
            let common = distribution.probability_outside_ranges();
            let mut common_start = 0u32;

            for range in distribution.ranges() {
                if range.start > common_start && !common.is_zero() {
                    push_segment(
                        &mut events,
                        Segment {
                            start: common_start,
                            end: range.start,
                            destination: transition.destination_state,
                            weight: common.product(base_weight),
                        },
                    );
                }

                if !range.probability.is_zero() {
                    push_segment(
                        &mut events,
                        Segment {
                            start: range.start,
                            end: range.end,
                            destination: transition.destination_state,
                            weight: range.probability.product(base_weight),
                        },
                    );
                }

                common_start = range.end;
            }

            if !common.is_zero() && common_start < CHAR_UNIVERSE_END {
                push_segment(
                    &mut events,
                    Segment {
                        start: common_start,
                        end: CHAR_UNIVERSE_END,
                        destination: transition.destination_state,
                        weight: common.product(base_weight),
                    },
                );
            }
        }
    }

    events
}

impl DeterminizableDistribution for DiscreteChar {
    /// Line sweep over segment bounds. Bounds are sorted by coordinate with
    /// starts before ends, so that at a boundary the segments opening there
    /// are active before the segments closing there are retired; between two
    /// bounds, one outgoing transition is emitted over the covered character
    /// range, uniform on that range, targeting the normalized weighted set of
    /// active destinations.
    fn outgoing_transitions_for_set(
        automaton: &StringAutomaton,
        source_set: &WeightedStateSet,
        log_eps: f64,
    ) -> Vec<(Self, Weight, WeightedStateSet)> {
        let mut events = collect_segment_events(automaton, source_set);
        events.sort_by(|a, b| a.position.cmp(&b.position).then(b.is_start.cmp(&a.is_start)));

        let mut result = Vec::new();
        let mut current_start = 0u32;
        let mut total_count = 0usize;
        let mut total_weight = Weight::ZERO;
        let mut per_destination: HashMap<u32, (usize, Weight)> = HashMap::new();
        let mut active: HashSet<SegmentKey> = HashSet::new();

        for event in &events {
            let position = event.position;

            if position > current_start && total_count > 0 && total_weight.log_value() > log_eps {
                let scale = Weight::from_log_value(-total_weight.log_value());
                let mut destination_builder = WeightedStateSetBuilder::default();
                for (&destination, &(_, weight)) in &per_destination {
                    if weight.log_value() > log_eps {
                        destination_builder.add(destination, weight.product(scale));
                    }
                }

                let (destination_set, normalizer) = destination_builder.get();
                if !destination_set.is_empty() {
                    let span = Weight::from_value((position - current_start) as f64);
                    result.push((
                        DiscreteChar::in_range(current_start, position),
                        span.product(total_weight).product(normalizer),
                        destination_set,
                    ));
                }
            }

            let segment = event.segment;
            if event.is_start {
                active.insert(segment.key());
                total_count += 1;
                total_weight = total_weight.sum(segment.weight);
                let entry = per_destination.entry(segment.destination).or_insert((0, Weight::ZERO));
                entry.0 += 1;
                entry.1 = entry.1.sum(segment.weight);
            } else {
                active.remove(&segment.key());

                if segment.weight.is_infinity() {
                    // Precise subtraction is not available in log space with
                    // infinities; rebuild the sums from the active segments.
                    // Identical duplicate segments were collapsed by the
                    // active set and count as one here.
                    total_count = active.len();
                    total_weight = Weight::ZERO;
                    let mut destination_count = 0usize;
                    let mut destination_weight = Weight::ZERO;
                    for key in &active {
                        let weight = Weight::from_log_value(f64::from_bits(key.weight_bits));
                        total_weight = total_weight.sum(weight);
                        if key.destination == segment.destination {
                            destination_count += 1;
                            destination_weight = destination_weight.sum(weight);
                        }
                    }

                    if destination_count == 0 {
                        per_destination.remove(&segment.destination);
                    } else {
                        per_destination.insert(segment.destination, (destination_count, destination_weight));
                    }
                } else {
                    total_count -= 1;
                    total_weight = total_weight.absolute_difference(segment.weight);
                    if let Some(entry) = per_destination.get_mut(&segment.destination) {
                        entry.0 -= 1;
                        if entry.0 == 0 {
                            per_destination.remove(&segment.destination);
                        } else {
                            entry.1 = entry.1.absolute_difference(segment.weight);
                        }
                    }
                }
            }

            current_start = position;
        }

        result
    }
}

static FORMAT_VERSION_HASH: Lazy<f64> = Lazy::new(|| format_version_hash("wfsa.string-automaton", 1));

/// FNV-1a over the format tag and version, folded into the unit interval so
/// the hash survives a round trip through an `f64` field exactly.
fn format_version_hash(tag: &str, version: u32) -> f64 {
    let mut hash: u64 = 0xcbf2_9ce4_8422_2325;
    for byte in tag.bytes().chain(version.to_le_bytes()) {
        hash ^= byte as u64;
        hash = hash.wrapping_mul(0x0000_0100_0000_01b3);
    }

    (hash >> 11) as f64 / (1u64 << 53) as f64
}

impl Automaton<DiscreteChar> {
    /// Serializes this automaton: the format version hash, the state array,
    /// the transition array, the start state index, and the ε-freeness flag.
    /// Primitives are written in host byte order (see [crate::io]).
    pub fn write<W: Write + ?Sized>(&self, writer: &mut W) -> IoResult<()> {
        writer.write_f64(*FORMAT_VERSION_HASH)?;

        writer.write_i32(self.states.len() as i32)?;
        for state in &self.states {
            writer.write_i32(state.first_transition)?;
            writer.write_i32(state.last_transition)?;
            writer.write_f64(state.end_weight.log_value())?;
        }

        writer.write_i32(self.transitions.len() as i32)?;
        for transition in &self.transitions {
            match &transition.element_distribution {
                Some(distribution) => {
                    writer.write_u8(1)?;
                    distribution.write(writer)?;
                }
                None => writer.write_u8(0)?,
            }
            writer.write_f64(transition.weight.log_value())?;
            writer.write_i32(transition.destination_state as i32)?;
            writer.write_i32(transition.group as i32)?;
        }

        writer.write_i32(self.start_state_index as i32)?;
        writer.write_u8(self.is_epsilon_free as u8)
    }

    /// Reads an automaton previously written with [Automaton::write] and
    /// checks its structural consistency. Exact inverse of `write` for
    /// well-formed input.
    ///
    /// # Errors
    /// Returns [AutomatonError::UnsupportedFormatVersion] for a foreign
    /// version hash, [AutomatonError::CorruptData] or
    /// [AutomatonError::IndicesOutOfRange] for structurally invalid data, or
    /// the underlying I/O error.
    pub fn read<R: Read + ?Sized>(reader: &mut R) -> BoxResult<Self> {
        let version = reader.read_f64()?;
        if version.to_bits() != FORMAT_VERSION_HASH.to_bits() {
            return Err(AutomatonError::UnsupportedFormatVersion(version, *FORMAT_VERSION_HASH).into());
        }

        let state_count = reader.read_i32()?;
        if state_count <= 0 {
            return Err(AutomatonError::CorruptData(format!("non-positive state count {state_count}")).into());
        }

        let mut states = Vec::with_capacity(state_count as usize);
        for _ in 0..state_count {
            let first_transition = reader.read_i32()?;
            let last_transition = reader.read_i32()?;
            let end_weight = Weight::from_log_value(reader.read_f64()?);
            states.push(StateData {
                first_transition,
                last_transition,
                end_weight,
            });
        }

        let transition_count = reader.read_i32()?;
        if transition_count < 0 {
            return Err(
                AutomatonError::CorruptData(format!("negative transition count {transition_count}")).into(),
            );
        }

        let mut transitions = Vec::with_capacity(transition_count as usize);
        for _ in 0..transition_count {
            let element_distribution = match reader.read_u8()? {
                0 => None,
                1 => Some(DiscreteChar::read(reader)?),
                marker => {
                    return Err(
                        AutomatonError::CorruptData(format!("invalid distribution marker {marker}")).into(),
                    )
                }
            };

            let weight = Weight::from_log_value(reader.read_f64()?);
            let destination_state = reader.read_i32()?;
            let group = reader.read_i32()?;
            if destination_state < 0 || group < 0 {
                return Err(AutomatonError::CorruptData(format!(
                    "negative destination {destination_state} or group {group}"
                ))
                .into());
            }

            transitions.push(Transition {
                element_distribution,
                weight,
                destination_state: destination_state as u32,
                group: group as u32,
            });
        }

        let start_state_index = reader.read_i32()?;
        if start_state_index < 0 {
            return Err(
                AutomatonError::CorruptData(format!("negative start state {start_state_index}")).into(),
            );
        }

        let is_epsilon_free = match reader.read_u8()? {
            0 => false,
            1 => true,
            marker => {
                return Err(AutomatonError::CorruptData(format!("invalid \u{3b5}-freeness marker {marker}")).into())
            }
        };

        let automaton = Automaton::new(states, transitions, start_state_index as u32, is_epsilon_free);
        automaton.check_consistency()?;
        Ok(automaton)
    }
}
