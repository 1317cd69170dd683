//! Deterministic variant bucketing
//!
//! A subject's bucket is `sha256(subject_id + experiment_id)` read as a
//! fraction in `[0, 1)`. The allocation is walked in declaration order and
//! the first variant whose cumulative share exceeds the bucket wins.

use crate::types::ExperimentId;
use indexmap::IndexMap;
use sha2::{Digest, Sha256};

/// Bucket of `subject_id` in `experiment_id`, in `[0, 1)`
#[must_use]
pub fn bucket(subject_id: &str, experiment_id: &ExperimentId) -> f64 {
    let mut hasher = Sha256::new();
    hasher.update(subject_id.as_bytes());
    hasher.update(experiment_id.to_string().as_bytes());
    let digest = hasher.finalize();

    let mut prefix = [0u8; 8];
    prefix.copy_from_slice(&digest[..8]);
    // Top 53 bits fit an f64 mantissa exactly, keeping the result below 1.
    let bits = u64::from_be_bytes(prefix) >> 11;
    bits as f64 / (1u64 << 53) as f64
}

/// Variant for a bucket value under `allocation` (percentages)
///
/// Falls back to the last variant with a positive share when rounding
/// leaves the bucket past the final boundary.
#[must_use]
pub fn pick_variant(h: f64, allocation: &IndexMap<String, f64>) -> Option<&str> {
    let point = h * 100.0;
    let mut cumulative = 0.0;
    for (variant, share) in allocation {
        if *share <= 0.0 {
            continue;
        }
        cumulative += share;
        if point < cumulative {
            return Some(variant.as_str());
        }
    }
    allocation
        .iter()
        .rev()
        .find(|(_, share)| **share > 0.0)
        .map(|(variant, _)| variant.as_str())
}

/// Variant for a subject
#[must_use]
pub fn assign<'a>(
    subject_id: &str,
    experiment_id: &ExperimentId,
    allocation: &'a IndexMap<String, f64>,
) -> Option<&'a str> {
    pick_variant(bucket(subject_id, experiment_id), allocation)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn split(pairs: &[(&str, f64)]) -> IndexMap<String, f64> {
        pairs.iter().map(|(k, v)| ((*k).to_string(), *v)).collect()
    }

    #[test]
    fn boundaries_walk_in_order() {
        let alloc = split(&[("a", 20.0), ("b", 30.0), ("c", 50.0)]);
        assert_eq!(pick_variant(0.0, &alloc), Some("a"));
        assert_eq!(pick_variant(0.1999, &alloc), Some("a"));
        assert_eq!(pick_variant(0.2, &alloc), Some("b"));
        assert_eq!(pick_variant(0.4999, &alloc), Some("b"));
        assert_eq!(pick_variant(0.5, &alloc), Some("c"));
        assert_eq!(pick_variant(0.9999, &alloc), Some("c"));
    }

    #[test]
    fn zero_share_never_chosen() {
        let alloc = split(&[("control", 100.0), ("treatment", 0.0)]);
        let id = ExperimentId::new();
        for i in 0..1_000 {
            assert_eq!(assign(&format!("user-{i}"), &id, &alloc), Some("control"));
        }
    }

    #[test]
    fn shortfall_falls_back_to_last_positive() {
        let alloc = split(&[("a", 49.95), ("b", 49.95), ("c", 0.0)]);
        assert_eq!(pick_variant(0.9995, &alloc), Some("b"));
    }

    #[test]
    fn even_split_is_balanced() {
        let alloc = split(&[("A", 50.0), ("B", 50.0)]);
        let id = ExperimentId::new();
        let a = (0..10_000)
            .filter(|i| assign(&format!("subject-{i}"), &id, &alloc) == Some("A"))
            .count();
        assert!((4_500..=5_500).contains(&a), "A got {a} of 10000");
    }

    proptest! {
        #[test]
        fn bucket_is_stable_and_in_range(subject in "[a-zA-Z0-9_-]{1,32}") {
            let id = ExperimentId::new();
            let first = bucket(&subject, &id);
            prop_assert!((0.0..1.0).contains(&first));
            prop_assert_eq!(first, bucket(&subject, &id));
        }

        #[test]
        fn assignment_is_a_declared_variant(subject in "[a-z0-9]{1,16}", share in 1.0f64..99.0) {
            let alloc = split(&[("x", share), ("y", 100.0 - share)]);
            let id = ExperimentId::new();
            let variant = assign(&subject, &id, &alloc);
            prop_assert!(matches!(variant, Some("x") | Some("y")));
        }
    }
}
