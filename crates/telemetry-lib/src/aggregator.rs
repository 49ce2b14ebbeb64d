//! Folds raw samples into the shape detectors consume

use crate::models::{Metric, SignalInput};

/// Group metric values by composite key, preserving arrival order per key,
/// and merge all labels with last-write-wins semantics.
///
/// An empty input yields an empty [`SignalInput`]; callers should treat that
/// as "nothing to detect this cycle".
pub fn aggregate(metrics: &[Metric]) -> SignalInput {
    let mut input = SignalInput::default();

    for metric in metrics {
        input
            .metrics
            .entry(metric.key())
            .or_default()
            .push(metric.value);

        for (key, value) in &metric.labels {
            input.labels.insert(key.clone(), value.clone());
        }
    }

    input
}
