use {
    crate::error::AutomatonError,
    std::{
        cmp::Ordering,
        fmt::{Display, Formatter, Result as FmtResult},
    },
};

/// A non-negative real number stored as its natural logarithm.
///
/// Zero is represented by a log value of negative infinity. Products become
/// log additions and sums become log-sum-exp, so very small probabilities can
/// be multiplied along long paths without underflow.
///
/// Equality is exact on the log value; ordering compares log values.
#[derive(Clone, Copy, Debug)]
pub struct Weight(f64);

impl Weight {
    /// The weight representing zero.
    pub const ZERO: Weight = Weight(f64::NEG_INFINITY);

    /// The weight representing one.
    pub const ONE: Weight = Weight(0.0);

    /// The weight representing positive infinity.
    pub const INFINITY: Weight = Weight(f64::INFINITY);

    /// Creates a weight from a non-negative value.
    pub fn from_value(value: f64) -> Self {
        debug_assert!(value >= 0.0, "weight values must be non-negative, got {value}");
        Weight(value.ln())
    }

    /// Creates a weight from the natural logarithm of its value.
    #[inline]
    pub fn from_log_value(log_value: f64) -> Self {
        Weight(log_value)
    }

    /// The natural logarithm of this weight's value.
    #[inline]
    pub fn log_value(self) -> f64 {
        self.0
    }

    /// The value of this weight. Underflows to `0.0` for very small weights;
    /// prefer [Weight::log_value] in computations.
    #[inline]
    pub fn value(self) -> f64 {
        self.0.exp()
    }

    #[inline]
    pub fn is_zero(self) -> bool {
        self.0 == f64::NEG_INFINITY
    }

    #[inline]
    pub fn is_one(self) -> bool {
        self.0 == 0.0
    }

    #[inline]
    pub fn is_infinity(self) -> bool {
        self.0 == f64::INFINITY
    }

    /// The product of two weights. If either operand is zero the result is
    /// zero, even if the other is infinite.
    pub fn product(self, other: Weight) -> Weight {
        if self.is_zero() || other.is_zero() {
            Weight::ZERO
        } else {
            Weight(self.0 + other.0)
        }
    }

    /// The sum of two weights, computed as log-sum-exp of the log values.
    pub fn sum(self, other: Weight) -> Weight {
        if self.is_zero() {
            return other;
        }

        if other.is_zero() {
            return self;
        }

        let (hi, lo) = if self.0 >= other.0 { (self.0, other.0) } else { (other.0, self.0) };
        if hi == f64::INFINITY {
            return Weight::INFINITY;
        }

        Weight(hi + (lo - hi).exp().ln_1p())
    }

    /// The multiplicative inverse of this weight.
    ///
    /// # Errors
    /// Returns [AutomatonError::DomainError] if this weight is zero.
    pub fn inverse(self) -> Result<Weight, AutomatonError> {
        if self.is_zero() {
            Err(AutomatonError::DomainError("inverse of zero weight".to_string()))
        } else {
            Ok(Weight(-self.0))
        }
    }

    /// The absolute difference of two weights, with log value
    /// `log |exp(log a) - exp(log b)|`.
    ///
    /// Loses precision when the operands are nearly equal. When both operands
    /// are infinite the result is zero, a documented loss: precise subtraction
    /// is not available in log space with infinities.
    pub fn absolute_difference(self, other: Weight) -> Weight {
        if self.is_infinity() && other.is_infinity() {
            return Weight::ZERO;
        }

        if self.0 == other.0 {
            return Weight::ZERO;
        }

        let (hi, lo) = if self.0 >= other.0 { (self.0, other.0) } else { (other.0, self.0) };
        if hi == f64::INFINITY {
            return Weight::INFINITY;
        }

        // log(e^hi - e^lo) = hi + log(1 - e^(lo - hi))
        Weight(hi + (-((lo - hi).exp())).ln_1p())
    }
}

impl PartialEq for Weight {
    fn eq(&self, other: &Self) -> bool {
        self.0 == other.0
    }
}

impl PartialOrd for Weight {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        self.0.partial_cmp(&other.0)
    }
}

impl Display for Weight {
    fn fmt(&self, f: &mut Formatter) -> FmtResult {
        if self.is_zero() {
            write!(f, "0")
        } else {
            write!(f, "exp({})", self.0)
        }
    }
}
