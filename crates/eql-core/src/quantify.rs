//! # Result Quantifier
//!
//! Cardinality expectations enforced on a result stream.
//!
//! - `AtMost(n)` fails as soon as result `n + 1` appears, without pulling
//!   anything further
//! - `AtLeast(n)` can only fail once the stream is exhausted
//! - `Exactly(n)` and `Range` apply both bounds
//! - [`the`] is `Exactly(1)` that fails immediately on the second result

use crate::EqlError;

/// A cardinality expectation on a result stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResultQuantificationConstraint {
    AtLeast(usize),
    AtMost(usize),
    Exactly(usize),
    Range { at_least: usize, at_most: usize },
}

impl ResultQuantificationConstraint {
    /// A validated range constraint.
    pub fn range(at_least: usize, at_most: usize) -> Result<Self, EqlError> {
        let constraint = Self::Range { at_least, at_most };
        constraint.validate()?;
        Ok(constraint)
    }

    /// Build a constraint from optional bounds.
    ///
    /// Returns `Ok(None)` when neither bound is given.
    pub fn from_bounds(
        at_least: Option<usize>,
        at_most: Option<usize>,
    ) -> Result<Option<Self>, EqlError> {
        match (at_least, at_most) {
            (None, None) => Ok(None),
            (Some(lo), None) => Ok(Some(Self::AtLeast(lo))),
            (None, Some(hi)) => Ok(Some(Self::AtMost(hi))),
            (Some(lo), Some(hi)) if lo == hi => Ok(Some(Self::Exactly(lo))),
            (Some(lo), Some(hi)) => Self::range(lo, hi).map(Some),
        }
    }

    /// Check that the bounds are consistent.
    pub fn validate(&self) -> Result<(), EqlError> {
        match self {
            Self::Range { at_least, at_most } if at_most < at_least => {
                Err(EqlError::InvalidCardinality(format!(
                    "at_most ({}) is smaller than at_least ({})",
                    at_most, at_least
                )))
            }
            _ => Ok(()),
        }
    }

    /// Lower bound, if any.
    #[must_use]
    pub fn at_least(&self) -> Option<usize> {
        match self {
            Self::AtLeast(n) | Self::Exactly(n) => Some(*n),
            Self::Range { at_least, .. } => Some(*at_least),
            Self::AtMost(_) => None,
        }
    }

    /// Upper bound, if any.
    #[must_use]
    pub fn at_most(&self) -> Option<usize> {
        match self {
            Self::AtMost(n) | Self::Exactly(n) => Some(*n),
            Self::Range { at_most, .. } => Some(*at_most),
            Self::AtLeast(_) => None,
        }
    }
}

/// Iterator adapter enforcing a [`ResultQuantificationConstraint`].
///
/// Yields the inner results unchanged until a bound is violated, then
/// yields the violation once and fuses.
#[derive(Debug)]
pub struct Quantified<I> {
    inner: I,
    constraint: Option<ResultQuantificationConstraint>,
    seen: usize,
    done: bool,
}

impl<I, T> Iterator for Quantified<I>
where
    I: Iterator<Item = Result<T, EqlError>>,
{
    type Item = Result<T, EqlError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        match self.inner.next() {
            Some(Ok(item)) => {
                self.seen += 1;
                let limit = self.constraint.and_then(|c| c.at_most());
                match limit {
                    Some(expected) if self.seen > expected => {
                        self.done = true;
                        Some(Err(EqlError::GreaterThanExpectedSolutions { expected }))
                    }
                    _ => Some(Ok(item)),
                }
            }
            Some(Err(e)) => {
                self.done = true;
                Some(Err(e))
            }
            None => {
                self.done = true;
                let minimum = self.constraint.and_then(|c| c.at_least());
                match minimum {
                    Some(expected) if self.seen < expected => {
                        Some(Err(EqlError::LessThanExpectedSolutions {
                            expected,
                            found: self.seen,
                        }))
                    }
                    _ => None,
                }
            }
        }
    }
}

/// Pass a result stream through unchanged (fusing after the first error).
pub fn an<I, T>(results: I) -> Quantified<I::IntoIter>
where
    I: IntoIterator<Item = Result<T, EqlError>>,
{
    Quantified {
        inner: results.into_iter(),
        constraint: None,
        seen: 0,
        done: false,
    }
}

/// Enforce a cardinality constraint on a result stream.
pub fn an_with<I, T>(
    results: I,
    constraint: ResultQuantificationConstraint,
) -> Result<Quantified<I::IntoIter>, EqlError>
where
    I: IntoIterator<Item = Result<T, EqlError>>,
{
    constraint.validate()?;
    Ok(Quantified {
        inner: results.into_iter(),
        constraint: Some(constraint),
        seen: 0,
        done: false,
    })
}

/// Exactly one result.
///
/// Fails with `MultipleSolutionsFound` as soon as a second result appears
/// (nothing further is pulled) and with `NoSolutionFound` when empty.
pub fn the<I, T>(results: I) -> Result<T, EqlError>
where
    I: IntoIterator<Item = Result<T, EqlError>>,
{
    let mut results = results.into_iter();
    let first = results.next().ok_or(EqlError::NoSolutionFound)??;
    match results.next() {
        None => Ok(first),
        Some(Ok(_)) => Err(EqlError::MultipleSolutionsFound),
        Some(Err(e)) => Err(e),
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;

    /// Stream of `n` results counting how many were pulled.
    fn counted(n: usize, pulled: &Cell<usize>) -> impl Iterator<Item = Result<usize, EqlError>> + '_ {
        (0..n).map(move |i| {
            pulled.set(pulled.get() + 1);
            Ok(i)
        })
    }

    #[test]
    fn at_most_fails_on_extra_result_without_pulling_more() {
        let pulled = Cell::new(0);
        let mut stream = an_with(
            counted(5, &pulled),
            ResultQuantificationConstraint::AtMost(1),
        )
        .expect("valid");
        assert!(matches!(stream.next(), Some(Ok(0))));
        assert!(matches!(
            stream.next(),
            Some(Err(EqlError::GreaterThanExpectedSolutions { expected: 1 }))
        ));
        assert!(stream.next().is_none());
        assert_eq!(pulled.get(), 2);
    }

    #[test]
    fn at_least_fails_only_after_exhaustion() {
        let pulled = Cell::new(0);
        let results: Vec<_> = an_with(
            counted(2, &pulled),
            ResultQuantificationConstraint::AtLeast(3),
        )
        .expect("valid")
        .collect();
        assert_eq!(results.len(), 3);
        assert!(results[0].is_ok() && results[1].is_ok());
        assert!(matches!(
            results[2],
            Err(EqlError::LessThanExpectedSolutions {
                expected: 3,
                found: 2
            })
        ));
    }

    #[test]
    fn exactly_applies_both_bounds() {
        let pulled = Cell::new(0);
        let ok: Result<Vec<_>, _> =
            an_with(counted(2, &pulled), ResultQuantificationConstraint::Exactly(2))
                .expect("valid")
                .collect();
        assert_eq!(ok.expect("exactly two"), vec![0, 1]);

        let too_many: Result<Vec<_>, _> =
            an_with(counted(3, &pulled), ResultQuantificationConstraint::Exactly(2))
                .expect("valid")
                .collect();
        assert!(too_many.is_err());
    }

    #[test]
    fn range_is_validated() {
        assert!(matches!(
            ResultQuantificationConstraint::range(3, 1),
            Err(EqlError::InvalidCardinality(_))
        ));
        assert!(an_with(
            Vec::<Result<u8, EqlError>>::new(),
            ResultQuantificationConstraint::Range {
                at_least: 2,
                at_most: 0
            }
        )
        .is_err());
        assert_eq!(
            ResultQuantificationConstraint::from_bounds(Some(2), Some(2)).expect("valid"),
            Some(ResultQuantificationConstraint::Exactly(2))
        );
    }

    #[test]
    fn the_stops_at_second_result() {
        let pulled = Cell::new(0);
        assert!(matches!(
            the(counted(10, &pulled)),
            Err(EqlError::MultipleSolutionsFound)
        ));
        assert_eq!(pulled.get(), 2);

        assert!(matches!(
            the(Vec::<Result<u8, EqlError>>::new()),
            Err(EqlError::NoSolutionFound)
        ));
        assert_eq!(the(vec![Ok::<_, EqlError>(7)]).expect("single"), 7);
    }

    #[test]
    fn an_fuses_after_error() {
        let items = vec![Ok(1), Err(EqlError::NoSolutionFound), Ok(2)];
        let collected: Vec<_> = an(items).collect();
        assert_eq!(collected.len(), 2);
    }
}
