//! Property-based tests for score combination.

use hacore_types::{Score, INFINITY};
use proptest::prelude::*;

fn finite() -> impl Strategy<Value = Score> {
    (-(INFINITY - 1)..INFINITY).prop_map(Score::new)
}

proptest! {
    #[test]
    fn test_pos_infinity_outranks_finite(a in finite()) {
        prop_assert_eq!(Score::POS_INFINITY.extreme(a), Score::POS_INFINITY);
        prop_assert_eq!(a.extreme(Score::POS_INFINITY), Score::POS_INFINITY);
    }

    #[test]
    fn test_neg_infinity_always_forbids(a in finite(), b in finite()) {
        let combined = a.extreme(b).extreme(Score::NEG_INFINITY);
        prop_assert!(combined.is_forbidden());
        prop_assert!(Score::POS_INFINITY.extreme(a).extreme(Score::NEG_INFINITY).is_forbidden());
    }

    #[test]
    fn test_extreme_is_commutative(a in finite(), b in finite()) {
        prop_assert_eq!(a.extreme(b), b.extreme(a));
    }

    #[test]
    fn test_extreme_picks_one_input(a in finite(), b in finite()) {
        let e = a.extreme(b);
        prop_assert!(e == a || e == b);
        prop_assert!(e.value().abs() >= a.value().abs().min(b.value().abs()));
    }

    #[test]
    fn test_infinity_not_summed(a in finite()) {
        prop_assert_eq!(Score::POS_INFINITY.saturating_add(a), Score::POS_INFINITY);
        prop_assert_eq!(Score::NEG_INFINITY.saturating_add(a), Score::NEG_INFINITY);
    }

    #[test]
    fn test_display_parse_round_trip(v in -200_000i64..200_000) {
        let score = Score::new(v);
        prop_assert_eq!(score.to_string().parse::<Score>().unwrap(), score);
    }
}
