// tests/batch_planner.rs

use countdag::plan::{batch_label, parse_descriptor, BatchPolicy};
use proptest::prelude::*;

#[test]
fn ten_units_in_batches_of_four() {
    let plan = BatchPolicy::default().plan(10);

    let labels: Vec<&str> = plan.iter().map(|b| b.label.as_str()).collect();
    assert_eq!(labels, vec!["001", "005", "009"]);

    let ranges: Vec<(u64, u64)> = plan.iter().map(|b| (b.first, b.last)).collect();
    assert_eq!(ranges, vec![(1, 4), (5, 8), (9, 10)]);
    assert_eq!(plan[2].unit_count(), 2);
}

#[test]
fn zero_units_means_no_batches() {
    assert!(BatchPolicy::default().plan(0).is_empty());
}

#[test]
fn exact_multiple_has_no_short_batch() {
    let plan = BatchPolicy::default().plan(8);
    assert_eq!(plan.len(), 2);
    assert!(plan.iter().all(|b| b.unit_count() == 4));
}

#[test]
fn window_of_last_batch_runs_past_the_count() {
    let policy = BatchPolicy::default();
    let window: Vec<u64> = policy.window(9).collect();
    assert_eq!(window, vec![9, 10, 11, 12]);
}

#[test]
fn zero_batch_size_is_rejected() {
    assert!(BatchPolicy::new(0).is_none());
    assert_eq!(BatchPolicy::new(3).map(|p| p.size()), Some(3));
}

#[test]
fn labels_are_zero_padded_but_not_truncated() {
    assert_eq!(batch_label(1, 3), "001");
    assert_eq!(batch_label(45, 3), "045");
    assert_eq!(batch_label(1001, 3), "1001");
    assert_eq!(batch_label(45, 4), "0045");
}

#[test]
fn labels_widen_together_past_one_thousand_units() {
    let plan = BatchPolicy::default().plan(1004);
    assert_eq!(plan.first().map(|b| b.label.as_str()), Some("0001"));
    assert_eq!(plan[249].label, "0997");
    assert_eq!(plan[250].label, "1001");
    assert!(plan[249].label < plan[250].label);

    // Up to a final batch starting at 997 three digits still suffice.
    let plan = BatchPolicy::default().plan(1000);
    assert_eq!(plan.last().map(|b| b.label.as_str()), Some("997"));
}

#[test]
fn descriptors_parse_positive_starts_only() {
    assert_eq!(parse_descriptor("9\n"), Some(9));
    assert_eq!(parse_descriptor("  13 "), Some(13));
    assert_eq!(parse_descriptor("0"), None);
    assert_eq!(parse_descriptor("nine"), None);
    assert_eq!(parse_descriptor(""), None);
}

proptest! {
    #[test]
    fn plan_covers_every_unit_exactly_once(total in 0u64..5_000, size in 1usize..64) {
        let policy = BatchPolicy::new(size).unwrap();
        let plan = policy.plan(total);

        prop_assert_eq!(plan.len() as u64, total.div_ceil(size as u64));

        let mut expected = 1u64;
        for batch in &plan {
            prop_assert_eq!(batch.first, expected);
            prop_assert!(batch.last >= batch.first);
            prop_assert!(batch.unit_count() <= size as u64);
            expected = batch.last + 1;
        }
        prop_assert_eq!(expected, total + 1);

        // Every batch but the last is full.
        if let Some((_last, full)) = plan.split_last() {
            prop_assert!(full.iter().all(|b| b.unit_count() == size as u64));
        }
    }

    #[test]
    fn labels_sort_like_their_starts(total in 1u64..5_000, size in 1usize..16) {
        let plan = BatchPolicy::new(size).unwrap().plan(total);
        let mut labels: Vec<String> = plan.iter().map(|b| b.label.clone()).collect();
        let in_order = labels.clone();
        labels.sort();
        prop_assert_eq!(labels, in_order);
    }

    #[test]
    fn window_contains_the_planned_batch(total in 1u64..2_000, size in 1usize..32) {
        let policy = BatchPolicy::new(size).unwrap();
        for batch in policy.plan(total) {
            let window = policy.window(batch.first);
            prop_assert!(window.contains(&batch.first));
            prop_assert!(window.contains(&batch.last));
            prop_assert_eq!(window.count(), size);
        }
    }
}
