//! Aggregation functions

use std::collections::BTreeMap;
use std::sync::Arc;

/// Computes a parent's status from the current status of each child.
///
/// The map is never empty when the tree calls it. Returning `Err` leaves the
/// parent unchanged and reports the reason to the writer.
pub type AggregationFn<K, V> = Arc<dyn Fn(&BTreeMap<K, V>) -> Result<V, String> + Send + Sync>;

/// Most frequent child status; ties go to the smallest value in `V`'s order.
pub fn majority<K, V>(children: &BTreeMap<K, V>) -> Result<V, String>
where
    V: Ord + Clone,
{
    let mut counts: BTreeMap<&V, usize> = BTreeMap::new();
    for value in children.values() {
        *counts.entry(value).or_default() += 1;
    }

    let mut best: Option<(&V, usize)> = None;
    for (value, count) in counts {
        // ascending iteration: only a strictly higher count displaces the
        // current best, so the smallest tied value wins
        if best.map_or(true, |(_, best_count)| count > best_count) {
            best = Some((value, count));
        }
    }

    best.map(|(value, _)| value.clone())
        .ok_or_else(|| "no child statuses to aggregate".to_string())
}

pub fn default_aggregator<K, V>() -> AggregationFn<K, V>
where
    K: 'static,
    V: Ord + Clone + 'static,
{
    Arc::new(|children: &BTreeMap<K, V>| majority(children))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::ChargingStatus;
    use proptest::prelude::*;

    fn children(values: &[ChargingStatus]) -> BTreeMap<usize, ChargingStatus> {
        values.iter().copied().enumerate().collect()
    }

    #[test]
    fn picks_most_frequent() {
        let map = children(&[
            ChargingStatus::Charging,
            ChargingStatus::Available,
            ChargingStatus::Charging,
        ]);
        assert_eq!(majority(&map), Ok(ChargingStatus::Charging));
    }

    #[test]
    fn tie_goes_to_smallest() {
        let map = children(&[ChargingStatus::Charging, ChargingStatus::Available]);
        assert_eq!(majority(&map), Ok(ChargingStatus::Available));
    }

    #[test]
    fn empty_is_an_error() {
        let map: BTreeMap<usize, ChargingStatus> = BTreeMap::new();
        assert!(majority(&map).is_err());
    }

    proptest! {
        #[test]
        fn result_is_a_maximal_and_smallest_tied_value(values in proptest::collection::vec(0u8..6, 1..30)) {
            let map: BTreeMap<usize, u8> = values.iter().copied().enumerate().collect();
            let winner = majority(&map).unwrap();

            let count = |v: u8| values.iter().filter(|x| **x == v).count();
            let winner_count = count(winner);
            prop_assert!(winner_count > 0);
            for v in values.iter().copied() {
                prop_assert!(winner_count >= count(v));
                if count(v) == winner_count {
                    prop_assert!(winner <= v);
                }
            }
        }
    }
}
