//! Majority check over the observed cluster members.

/// Returns true when `alive` is a strict majority of `total`.
///
/// An empty cluster never has quorum. Membership counts are eventually
/// consistent, so `alive` may briefly exceed a stale `total`; that is
/// treated as quorum present rather than an error.
pub fn has_quorum(alive: usize, total: usize) -> bool {
    if total == 0 {
        return false;
    }
    alive >= total || alive > total / 2
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_majority_boundaries() {
        assert!(has_quorum(3, 5));
        assert!(!has_quorum(2, 5));
        assert!(!has_quorum(0, 0));
        assert!(has_quorum(1, 1));
        assert!(!has_quorum(2, 4));
        assert!(has_quorum(3, 4));
        assert!(!has_quorum(1, 2));
    }

    #[test]
    fn test_stale_total() {
        assert!(has_quorum(4, 3));
        assert!(!has_quorum(1, 0));
    }

    proptest! {
        #[test]
        fn quorum_is_strict_majority(total in 1usize..1000, alive in 0usize..1000) {
            let expected = alive > total || alive * 2 > total;
            prop_assert_eq!(has_quorum(alive, total), expected);
        }

        #[test]
        fn quorum_is_monotonic_in_alive(total in 0usize..500, alive in 0usize..500) {
            if has_quorum(alive, total) {
                prop_assert!(has_quorum(alive + 1, total));
            }
        }
    }
}
