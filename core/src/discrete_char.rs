use {
    crate::{
        distribution::ElementDistribution,
        error::{AutomatonError, BoxResult},
        io::{WireReadExt, WireWriteExt},
        weight::Weight,
    },
    std::io::{Read, Result as IoResult, Write},
};

/// One past the largest element a [DiscreteChar] can assign probability to.
/// The element space is `[0, CHAR_UNIVERSE_END)`.
pub const CHAR_UNIVERSE_END: u32 = 65_536;

/// A half-open character range `[start, end)` carrying a probability shared by
/// every element in the range.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct CharRange {
    pub start: u32,
    pub end: u32,
    pub probability: Weight,
}

/// A distribution over characters, represented as a union of weighted
/// half-open ranges plus a "common value": the probability of every element
/// not covered by any range.
///
/// The ranges are disjoint, ascending, and end-exclusive; this invariant is
/// maintained by every constructor and relied upon by the determinization
/// sweep.
#[derive(Clone, Debug, PartialEq)]
pub struct DiscreteChar {
    ranges: Vec<CharRange>,
    common_value: Weight,
}

impl DiscreteChar {
    /// The uniform distribution over the whole element space.
    pub fn uniform() -> Self {
        DiscreteChar {
            ranges: Vec::new(),
            common_value: Weight::from_value(1.0 / CHAR_UNIVERSE_END as f64),
        }
    }

    /// The uniform distribution over the half-open range `[start, end)`.
    ///
    /// # Panics
    /// Panics if the range is empty or extends past the element space.
    pub fn in_range(start: u32, end: u32) -> Self {
        assert!(start < end, "empty character range [{start}, {end})");
        assert!(end <= CHAR_UNIVERSE_END, "character range end {end} is past the element space");

        DiscreteChar {
            ranges: vec![CharRange {
                start,
                end,
                probability: Weight::from_value(1.0 / (end - start) as f64),
            }],
            common_value: Weight::ZERO,
        }
    }

    /// A distribution with the given ranges and common value.
    ///
    /// # Panics
    /// Panics if the ranges are not disjoint, ascending, and within the
    /// element space.
    pub fn with_ranges(ranges: Vec<CharRange>, common_value: Weight) -> Self {
        let mut previous_end = 0;
        for range in &ranges {
            assert!(
                range.start >= previous_end && range.start < range.end && range.end <= CHAR_UNIVERSE_END,
                "invalid character range [{}, {}) after {previous_end}",
                range.start,
                range.end
            );
            previous_end = range.end;
        }

        DiscreteChar { ranges, common_value }
    }

    /// The ranges of this distribution: finite, end-exclusive, disjoint, and
    /// ascending.
    pub fn ranges(&self) -> &[CharRange] {
        &self.ranges
    }

    /// The probability of every element not covered by [DiscreteChar::ranges].
    pub fn probability_outside_ranges(&self) -> Weight {
        self.common_value
    }

    /// Writes this distribution: a count of ranges, the range triples, and the
    /// common value. Primitives are host byte order (see [crate::io]).
    pub fn write<W: Write + ?Sized>(&self, writer: &mut W) -> IoResult<()> {
        writer.write_i32(self.ranges.len() as i32)?;
        for range in &self.ranges {
            writer.write_i32(range.start as i32)?;
            writer.write_i32(range.end as i32)?;
            writer.write_f64(range.probability.log_value())?;
        }

        writer.write_f64(self.common_value.log_value())
    }

    /// Reads a distribution previously written with [DiscreteChar::write].
    ///
    /// # Errors
    /// Returns [AutomatonError::CorruptData] if the range list is negative,
    /// descending, overlapping, or outside the element space, or an underlying
    /// I/O error if the reader fails.
    pub fn read<R: Read + ?Sized>(reader: &mut R) -> BoxResult<Self> {
        let range_count = reader.read_i32()?;
        if range_count < 0 {
            return Err(AutomatonError::CorruptData(format!("negative range count {range_count}")).into());
        }

        let mut ranges = Vec::with_capacity(range_count as usize);
        let mut previous_end = 0u32;
        for _ in 0..range_count {
            let start = reader.read_i32()?;
            let end = reader.read_i32()?;
            let probability = Weight::from_log_value(reader.read_f64()?);

            if start < previous_end as i32 || end <= start || end > CHAR_UNIVERSE_END as i32 {
                return Err(AutomatonError::CorruptData(format!(
                    "invalid character range [{start}, {end}) after {previous_end}"
                ))
                .into());
            }

            previous_end = end as u32;
            ranges.push(CharRange {
                start: start as u32,
                end: end as u32,
                probability,
            });
        }

        let common_value = Weight::from_log_value(reader.read_f64()?);
        Ok(DiscreteChar { ranges, common_value })
    }

    /// Collects the range endpoints of both distributions, ascending and
    /// deduplicated. Between two consecutive endpoints (and outside all of
    /// them) both step functions are constant.
    fn merged_boundaries(d1: &DiscreteChar, d2: &DiscreteChar) -> Vec<u32> {
        let mut bounds = Vec::with_capacity(2 * (d1.ranges.len() + d2.ranges.len()));
        for range in d1.ranges.iter().chain(d2.ranges.iter()) {
            bounds.push(range.start);
            bounds.push(range.end);
        }

        bounds.sort_unstable();
        bounds.dedup();
        bounds
    }
}

impl ElementDistribution for DiscreteChar {
    type Element = u16;

    fn point(element: u16) -> Self {
        DiscreteChar {
            ranges: vec![CharRange {
                start: element as u32,
                end: element as u32 + 1,
                probability: Weight::ONE,
            }],
            common_value: Weight::ZERO,
        }
    }

    fn probability(&self, element: u16) -> Weight {
        let element = element as u32;
        let index = self.ranges.partition_point(|range| range.end <= element);
        match self.ranges.get(index) {
            Some(range) if range.start <= element => range.probability,
            _ => self.common_value,
        }
    }

    fn weighted_sum(weight1: Weight, d1: &Self, weight2: Weight, d2: &Self) -> Self {
        if weight1.is_zero() {
            return d2.clone();
        }

        if weight2.is_zero() {
            return d1.clone();
        }

        let total = weight1.sum(weight2);
        let scale1 = Weight::from_log_value(weight1.log_value() - total.log_value());
        let scale2 = Weight::from_log_value(weight2.log_value() - total.log_value());

        let mix = |p1: Weight, p2: Weight| scale1.product(p1).sum(scale2.product(p2));
        let common_value = mix(d1.common_value, d2.common_value);

        let mut ranges: Vec<CharRange> = Vec::new();
        let bounds = Self::merged_boundaries(d1, d2);
        for pair in bounds.windows(2) {
            let (start, end) = (pair[0], pair[1]);
            let probability = mix(d1.probability(start as u16), d2.probability(start as u16));
            if probability == common_value {
                continue;
            }

            match ranges.last_mut() {
                Some(last) if last.end == start && last.probability == probability => last.end = end,
                _ => ranges.push(CharRange { start, end, probability }),
            }
        }

        DiscreteChar { ranges, common_value }
    }
}
