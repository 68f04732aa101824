//! Tests for `Progress`.

use crate::progress::Progress;
use proptest::prelude::*;

#[test]
fn weights_are_normalized() {
  let mut p = Progress::new([("a", 10), ("b", 30), ("c", 60)]);
  assert_eq!(p.percentage(), 0);
  assert_eq!(p.complete("b"), 30);
  assert_eq!(p.complete("a"), 40);
  assert!(!p.is_complete());
  assert_eq!(p.complete("c"), 100);
  assert!(p.is_complete());
}

#[test]
fn completion_is_idempotent() {
  let mut p = Progress::new([("a", 50), ("b", 50)]);
  assert_eq!(p.complete("a"), 50);
  assert_eq!(p.complete("a"), 50);
  assert_eq!(p.complete("unknown"), 50);
}

#[test]
fn hundred_only_when_everything_is_done() {
  let mut p = Progress::new([("a", 999), ("b", 1)]);
  assert_eq!(p.complete("a"), 99);
  assert_eq!(p.complete("b"), 100);
}

#[test]
fn zero_weights_count_equally() {
  let mut p = Progress::new([("a", 0), ("b", 0), ("c", 0), ("d", 0)]);
  assert_eq!(p.complete("a"), 25);
  assert_eq!(p.complete("b"), 50);
}

#[test]
fn empty_graph_is_complete() {
  let p = Progress::new(std::iter::empty::<(&str, u32)>());
  assert_eq!(p.percentage(), 100);
  assert!(p.is_complete());
}

proptest! {
  #[test]
  fn percentage_never_decreases(
    weights in proptest::collection::vec(0u32..1000, 1..12),
    order in proptest::collection::vec(0usize..12, 0..24),
  ) {
    let ids: Vec<String> = (0..weights.len()).map(|i| format!("s{i}")).collect();
    let mut p = Progress::new(ids.iter().map(String::as_str).zip(weights.iter().copied()));
    let mut last = p.percentage();
    for i in order {
      let pct = p.complete(&ids[i % ids.len()]);
      prop_assert!(pct >= last);
      prop_assert!(pct <= 100);
      last = pct;
    }
    for id in &ids {
      p.complete(id);
    }
    prop_assert_eq!(p.percentage(), 100);
  }
}
