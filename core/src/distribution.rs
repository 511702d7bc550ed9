use {
    crate::weight::Weight,
    std::fmt::Debug,
};

/// A distribution over the elements an automaton transition can consume.
///
/// The automaton core is generic over this trait: transitions carry an
/// optional element distribution (absent for ε-transitions), and merging
/// parallel transitions requires forming the normalized weighted union of two
/// distributions. Concrete distributions with range structure (see
/// [crate::DiscreteChar]) additionally plug into determinization through
/// [crate::automaton::DeterminizableDistribution].
pub trait ElementDistribution: Clone + Debug {
    /// The element type this distribution assigns probability to.
    type Element: Copy + Debug + PartialEq;

    /// A point mass on the given element.
    fn point(element: Self::Element) -> Self;

    /// The probability of the given element.
    fn probability(&self, element: Self::Element) -> Weight;

    /// The normalized weighted union of two distributions: the distribution
    /// assigning each element probability
    /// `(w1 * d1(e) + w2 * d2(e)) / (w1 + w2)`.
    ///
    /// If one of the weights is zero, returns the other distribution.
    fn weighted_sum(weight1: Weight, d1: &Self, weight2: Weight, d2: &Self) -> Self;
}
