use crate::{dispatch::Predictions, layout::Layout};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Accuracy {
    pub correct: usize,
    pub total: usize,
}

impl Accuracy {
    pub fn percent(&self) -> f64 {
        if self.total == 0 {
            return 0.0;
        }
        100.0 * self.correct as f64 / self.total as f64
    }
}

impl fmt::Display for Accuracy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:.2} % ({}/{})", self.percent(), self.correct, self.total)
    }
}

/// Compares predictions with labels in original example order. Padding rows are never visited.
pub fn score(layout: &Layout, labels: &[usize], predictions: &Predictions) -> Accuracy {
    let total = labels.len().min(layout.num_examples);
    let correct = labels[..total]
        .iter()
        .enumerate()
        .filter(|&(n, &label)| predictions.get(layout.locate(n)) == Some(label))
        .count();

    Accuracy { correct, total }
}
