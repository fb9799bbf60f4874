use mirage_core::{LabeledSet, MirageError, Result};

/// Split off the first `holdout` samples.
///
/// Returns `(seed, rest)`: the seed is the adversary's initial substitute set,
/// the rest stays unseen until evaluation. Both halves must be non-empty.
pub fn holdout_split(set: &LabeledSet, holdout: usize) -> Result<(LabeledSet, LabeledSet)> {
    if holdout == 0 || holdout >= set.len() {
        return Err(MirageError::InvalidConfig(format!(
            "holdout must be in 1..{}, got {}",
            set.len(),
            holdout
        )));
    }
    set.split_at(holdout)
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::Array2;

    fn set(n: usize) -> LabeledSet {
        let inputs = Array2::from_shape_fn((n, 2), |(i, j)| (i * 2 + j) as f32);
        LabeledSet::new(inputs, (0..n).map(|i| i % 2).collect()).unwrap()
    }

    #[test]
    fn test_split_keeps_order() {
        let (seed, rest) = holdout_split(&set(5), 2).unwrap();
        assert_eq!(seed.len(), 2);
        assert_eq!(rest.len(), 3);
        assert_eq!(seed.inputs()[[1, 0]], 2.0);
        assert_eq!(rest.inputs()[[0, 0]], 4.0);
        assert_eq!(rest.labels(), &[0, 1, 0]);
    }

    #[test]
    fn test_split_bounds() {
        assert!(holdout_split(&set(5), 0).is_err());
        assert!(holdout_split(&set(5), 5).is_err());
        assert!(holdout_split(&set(5), 4).is_ok());
    }
}
