use crate::{
    dataset::Dataset,
    error::{Error, Result},
    kernel::{ClassificationKernel, KernelDims, SlotRequest},
    layout::{Layout, SlotIndex},
    stats::ClassStatistics,
};
use rayon::prelude::*;

/// Class statistics copied into one slot's padded request layout.
#[derive(Debug, Clone, PartialEq)]
pub struct SlotStatistics {
    pub priors: Vec<f32>,
    pub means: Vec<f32>,
    pub variances: Vec<f32>,
}

impl SlotStatistics {
    /// Lays the unpadded statistics out at `stride`, zero filling the padding columns.
    pub fn broadcast(stats: &ClassStatistics, stride: usize) -> Self {
        let num_features = stats.num_features();
        let mut means = vec![0.0; stats.num_classes() * stride];
        let mut variances = vec![0.0; stats.num_classes() * stride];

        for k in 0..stats.num_classes() {
            let row = k * stride..k * stride + num_features;
            means[row.clone()].copy_from_slice(stats.class_means(k));
            variances[row].copy_from_slice(stats.class_variances(k));
        }

        SlotStatistics {
            priors: stats.priors().to_vec(),
            means,
            variances,
        }
    }
}

/// Per-slot predictions, laid out like the feature partition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Predictions {
    chunk_size: usize,
    slots: Vec<Vec<usize>>,
}

impl Predictions {
    pub fn new(chunk_size: usize, slots: Vec<Vec<usize>>) -> Self {
        Predictions { chunk_size, slots }
    }

    pub fn chunk_size(&self) -> usize {
        self.chunk_size
    }

    pub fn slot(&self, slot: usize) -> Option<&[usize]> {
        self.slots.get(slot).map(Vec::as_slice)
    }

    pub fn num_slots(&self) -> usize {
        self.slots.len()
    }

    pub fn get(&self, index: SlotIndex) -> Option<usize> {
        self.slots.get(index.slot)?.get(index.offset).copied()
    }
}

/// Fans one classify call out over every pool slot and waits for all of them.
pub struct Dispatcher {
    pool: rayon::ThreadPool,
}

impl Dispatcher {
    /// A dispatcher with one submission thread per slot.
    pub fn new(slots: usize) -> Result<Self> {
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(slots.max(1))
            .thread_name(|i| format!("gnb-slot-{i}"))
            .build()
            .map_err(|err| Error::InvalidConfig(format!("failed to build slot pool: {err}")))?;
        Ok(Dispatcher { pool })
    }

    pub fn classify(
        &self,
        dataset: &Dataset,
        stats: &ClassStatistics,
        epsilon: f32,
        kernel: &dyn ClassificationKernel,
    ) -> Result<Predictions> {
        let layout = *dataset.layout();
        if stats.num_features() != layout.num_features {
            return Err(Error::InvalidConfig(format!(
                "statistics cover {} features, dataset has {}",
                stats.num_features(),
                layout.num_features
            )));
        }
        let num_classes = stats.num_classes();
        if let Some(&label) = dataset.labels().iter().find(|&&label| label >= num_classes) {
            return Err(Error::InvalidConfig(format!(
                "dataset label {label} outside the {num_classes} trained classes"
            )));
        }
        let dims = KernelDims {
            num_classes,
            num_features: layout.num_features,
            feature_stride: layout.num_features_padded,
            chunk_size: layout.chunk_size,
        };

        // Every slot gets its own copy so requests share nothing.
        let broadcast = SlotStatistics::broadcast(stats, layout.num_features_padded);
        let slot_stats = vec![broadcast; layout.slots];

        let slots = self.pool.install(|| {
            slot_stats
                .par_iter()
                .enumerate()
                .map(|(slot, slot_stats)| {
                    let request = SlotRequest {
                        slot,
                        features: dataset.slot_features(slot),
                        means: &slot_stats.means,
                        variances: &slot_stats.variances,
                        priors: &slot_stats.priors,
                        epsilon,
                        dims,
                    };
                    run_slot(kernel, &request, &layout)
                })
                .collect::<Result<Vec<_>>>()
        })?;

        Ok(Predictions::new(layout.chunk_size, slots))
    }
}

fn run_slot(
    kernel: &dyn ClassificationKernel,
    request: &SlotRequest<'_>,
    layout: &Layout,
) -> Result<Vec<usize>> {
    let slot = request.slot;
    tracing::debug!(slot, kernel = kernel.name(), rows = layout.rows_in_slot(slot), "submitting");

    let predictions = kernel.score(request).map_err(|err| {
        tracing::warn!(slot, error = %err, "slot failed");
        match err {
            Error::Dispatch { .. } => err,
            other => Error::dispatch(slot, other.to_string()),
        }
    })?;

    if predictions.len() != layout.chunk_size {
        return Err(Error::dispatch(
            slot,
            format!(
                "kernel returned {} predictions for a chunk of {}",
                predictions.len(),
                layout.chunk_size
            ),
        ));
    }
    if let Some(class) = predictions
        .iter()
        .take(layout.rows_in_slot(slot))
        .find(|&&class| class >= request.dims.num_classes)
    {
        return Err(Error::dispatch(
            slot,
            format!("kernel predicted unknown class {class}"),
        ));
    }

    tracing::debug!(slot, "slot complete");
    Ok(predictions)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{kernel::CpuKernel, layout::LayoutConfig};
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn scenario() -> (Dataset, ClassStatistics) {
        let config = LayoutConfig {
            slots: 2,
            vectorization: 2,
            parallelism: 1,
        };
        let layout = Layout::plan(&config, 2, 5).unwrap();
        let rows = vec![
            (0, vec![0.0, 0.0]),
            (1, vec![10.0, 0.0]),
            (2, vec![0.0, 10.0]),
            (3, vec![10.0, 10.0]),
            (1, vec![10.5, 0.5]),
        ];
        let dataset = Dataset::from_rows(rows, layout, 4).unwrap();
        let stats = ClassStatistics::estimate(&dataset, 4).unwrap();
        (dataset, stats)
    }

    #[test]
    fn broadcast_pads_each_class_row() {
        let (_, stats) = scenario();
        let wide = SlotStatistics::broadcast(&stats, 4);
        assert_eq!(wide.means.len(), 16);
        assert_eq!(&wide.means[4..8], &[10.25, 0.25, 0.0, 0.0]);
        assert_eq!(wide.priors, stats.priors());
    }

    #[test]
    fn classifies_every_slot() {
        let (dataset, stats) = scenario();
        let dispatcher = Dispatcher::new(2).unwrap();
        let predictions = dispatcher
            .classify(&dataset, &stats, 0.05, &CpuKernel::new())
            .unwrap();

        assert_eq!(predictions.num_slots(), 2);
        assert_eq!(predictions.slot(0).map(<[usize]>::len), Some(3));
        assert_eq!(predictions.slot(1).map(<[usize]>::len), Some(3));
        assert_eq!(predictions.slot(2), None);
        let index = dataset.layout().locate(4);
        assert_eq!(index, SlotIndex { slot: 1, offset: 1 });
        assert_eq!(predictions.get(index), Some(1));
        assert_eq!(predictions.get(SlotIndex { slot: 2, offset: 0 }), None);
    }

    struct CountingKernel {
        calls: AtomicUsize,
    }

    impl ClassificationKernel for CountingKernel {
        fn name(&self) -> &str {
            "counting"
        }

        fn score(&self, request: &SlotRequest<'_>) -> Result<Vec<usize>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(vec![request.slot; request.dims.chunk_size])
        }
    }

    #[test]
    fn one_request_per_slot() {
        let (dataset, stats) = scenario();
        let kernel = CountingKernel {
            calls: AtomicUsize::new(0),
        };
        let predictions = Dispatcher::new(2)
            .unwrap()
            .classify(&dataset, &stats, 0.05, &kernel)
            .unwrap();

        assert_eq!(kernel.calls.load(Ordering::SeqCst), 2);
        // Each slot only wrote its own region.
        assert_eq!(predictions.slot(0), Some(&[0, 0, 0][..]));
        assert_eq!(predictions.slot(1), Some(&[1, 1, 1][..]));
    }

    struct FailingSlot(usize);

    impl ClassificationKernel for FailingSlot {
        fn name(&self) -> &str {
            "failing"
        }

        fn score(&self, request: &SlotRequest<'_>) -> Result<Vec<usize>> {
            if request.slot == self.0 {
                Err(Error::InvalidConfig("device lost".to_string()))
            } else {
                Ok(vec![0; request.dims.chunk_size])
            }
        }
    }

    #[test]
    fn one_failed_slot_fails_the_call() {
        let (dataset, stats) = scenario();
        let err = Dispatcher::new(2)
            .unwrap()
            .classify(&dataset, &stats, 0.05, &FailingSlot(1))
            .unwrap_err();
        assert!(matches!(err, Error::Dispatch { slot: 1, .. }), "{err}");
    }

    struct ShortKernel;

    impl ClassificationKernel for ShortKernel {
        fn name(&self) -> &str {
            "short"
        }

        fn score(&self, _request: &SlotRequest<'_>) -> Result<Vec<usize>> {
            Ok(vec![0])
        }
    }

    #[test]
    fn wrong_prediction_count_is_rejected() {
        let (dataset, stats) = scenario();
        let err = Dispatcher::new(2)
            .unwrap()
            .classify(&dataset, &stats, 0.05, &ShortKernel)
            .unwrap_err();
        assert!(matches!(err, Error::Dispatch { .. }));
    }

    /// Answers the first real row of one slot with a class the model does not have.
    struct UnknownClass(usize);

    impl ClassificationKernel for UnknownClass {
        fn name(&self) -> &str {
            "unknown-class"
        }

        fn score(&self, request: &SlotRequest<'_>) -> Result<Vec<usize>> {
            let mut predictions = vec![0; request.dims.chunk_size];
            if request.slot == self.0 {
                predictions[0] = request.dims.num_classes;
            }
            Ok(predictions)
        }
    }

    #[test]
    fn unknown_class_on_a_real_row_is_rejected() {
        let (dataset, stats) = scenario();
        let dispatcher = Dispatcher::new(2).unwrap();
        for slot in 0..2 {
            let err = dispatcher
                .classify(&dataset, &stats, 0.05, &UnknownClass(slot))
                .unwrap_err();
            match err {
                Error::Dispatch { slot: failed, .. } => assert_eq!(failed, slot),
                other => panic!("expected a dispatch error, got {other}"),
            }
        }
    }

    #[test]
    fn mismatched_statistics_are_rejected() {
        let (dataset, _) = scenario();
        let config = LayoutConfig {
            slots: 2,
            vectorization: 4,
            parallelism: 1,
        };
        let wider = Dataset::from_rows(
            vec![
                (0, vec![0.0, 0.0, 0.0]),
                (1, vec![1.0, 1.0, 1.0]),
                (2, vec![2.0, 2.0, 2.0]),
                (3, vec![3.0, 3.0, 3.0]),
            ],
            Layout::plan(&config, 3, 4).unwrap(),
            4,
        )
        .unwrap();
        let wider_stats = ClassStatistics::estimate(&wider, 4).unwrap();

        let dispatcher = Dispatcher::new(2).unwrap();
        let err = dispatcher
            .classify(&dataset, &wider_stats, 0.05, &CpuKernel::new())
            .unwrap_err();
        assert!(matches!(err, Error::InvalidConfig(_)), "{err}");

        let narrow = Dataset::from_rows(
            vec![(0, vec![0.0, 0.0]), (1, vec![1.0, 1.0])],
            Layout::plan(&config, 2, 2).unwrap(),
            2,
        )
        .unwrap();
        let narrow_stats = ClassStatistics::estimate(&narrow, 2).unwrap();
        let err = dispatcher
            .classify(&dataset, &narrow_stats, 0.05, &CpuKernel::new())
            .unwrap_err();
        assert!(matches!(err, Error::InvalidConfig(_)), "{err}");
    }
}
