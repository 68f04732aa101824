//! Weight-normalized run progress.

use std::collections::{BTreeMap, BTreeSet};

/// Tracks `Σ weight(Succeeded | Skipped) / Σ weight(all)` as a percentage.
///
/// Completion is idempotent and the reported percentage never decreases. When every weight is
/// zero, each step counts equally.
#[derive(Debug, Clone)]
pub struct Progress {
  weights: BTreeMap<String, u64>,
  total: u64,
  completed: BTreeSet<String>,
  completed_weight: u64,
  last: u8,
}

impl Progress {
  pub fn new<'a>(weights: impl IntoIterator<Item = (&'a str, u32)>) -> Self {
    let mut weights: BTreeMap<String, u64> = weights
      .into_iter()
      .map(|(id, w)| (id.to_string(), u64::from(w)))
      .collect();
    if weights.values().all(|w| *w == 0) {
      weights.values_mut().for_each(|w| *w = 1);
    }
    let total = weights.values().sum();
    Self {
      weights,
      total,
      completed: BTreeSet::new(),
      completed_weight: 0,
      last: 0,
    }
  }

  /// Counts `step_id` as done (succeeded or skipped) and returns the new percentage.
  pub fn complete(&mut self, step_id: &str) -> u8 {
    if let Some(w) = self.weights.get(step_id) {
      if self.completed.insert(step_id.to_string()) {
        self.completed_weight += *w;
      }
    }
    let computed = if self.total == 0 {
      100
    } else {
      // Floor, so 100 is only reported once every step is done.
      ((self.completed_weight * 100) / self.total) as u8
    };
    self.last = self.last.max(computed);
    self.last
  }

  pub fn percentage(&self) -> u8 {
    if self.total == 0 { 100 } else { self.last }
  }

  pub fn is_complete(&self) -> bool {
    self.completed.len() == self.weights.len()
  }
}
