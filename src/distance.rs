/// Edit distance between two query texts.
///
/// Plain Levenshtein distance over Unicode scalar values: insertions, deletions
/// and substitutions each cost one. No normalization is applied, so case and
/// whitespace differences count.
pub fn distance(a: &str, b: &str) -> usize {
    if a == b {
        return 0;
    }
    strsim::levenshtein(a, b)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_distance_basic() {
        assert_eq!(distance("SELECT 1", "SELECT 2"), 1);
        assert_eq!(distance("kitten", "sitting"), 3);
    }

    #[test]
    fn test_distance_empty() {
        assert_eq!(distance("", ""), 0);
        assert_eq!(distance("", "SELECT"), 6);
        assert_eq!(distance("SELECT", ""), 6);
    }

    #[test]
    fn test_distance_is_case_and_whitespace_sensitive() {
        assert_eq!(distance("select 1", "SELECT 1"), 6);
        assert_eq!(distance("SELECT  1", "SELECT 1"), 1);
        assert_eq!(distance("SELECT 1\n", "SELECT 1"), 1);
    }

    #[test]
    fn test_distance_counts_characters_not_bytes() {
        assert_eq!(distance("SELECT 'ä'", "SELECT 'a'"), 1);
        assert_eq!(distance("-- 日本", "-- 日付"), 1);
    }

    proptest! {
        #[test]
        fn reflexive(s in ".{0,64}") {
            prop_assert_eq!(distance(&s, &s), 0);
        }

        #[test]
        fn symmetric(a in ".{0,48}", b in ".{0,48}") {
            prop_assert_eq!(distance(&a, &b), distance(&b, &a));
        }

        #[test]
        fn bounded_by_longer_length(a in ".{0,48}", b in ".{0,48}") {
            let d = distance(&a, &b);
            let (la, lb) = (a.chars().count(), b.chars().count());
            prop_assert!(d <= la.max(lb));
            prop_assert!(d >= la.abs_diff(lb));
        }
    }
}
