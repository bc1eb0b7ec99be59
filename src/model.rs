use crate::{
    dataset::Dataset,
    dispatch::{Dispatcher, Predictions},
    error::{Error, Result},
    kernel::ClassificationKernel,
    layout::{Layout, LayoutConfig},
    scorer::{self, Accuracy},
    stats::ClassStatistics,
};
use std::{io, path::Path, time::Instant};

/// Largest class count the accelerator kernel accepts.
pub const MAX_CLASSES: usize = 64;
/// Largest feature count the accelerator kernel accepts.
pub const MAX_FEATURES: usize = 2047;

struct Trained {
    dataset: Dataset,
    stats: ClassStatistics,
}

/// Gaussian Naive Bayes over a fixed (classes, features) shape.
pub struct NaiveBayes {
    num_classes: usize,
    num_features: usize,
    config: LayoutConfig,
    dispatcher: Dispatcher,
    trained: Option<Trained>,
}

impl NaiveBayes {
    pub fn new(num_classes: usize, num_features: usize, config: LayoutConfig) -> Result<Self> {
        if num_classes == 0 || num_classes > MAX_CLASSES {
            return Err(Error::InvalidConfig(format!(
                "class count {num_classes} outside [1, {MAX_CLASSES}]"
            )));
        }
        if num_features == 0 || num_features > MAX_FEATURES {
            return Err(Error::InvalidConfig(format!(
                "feature count {num_features} outside [1, {MAX_FEATURES}]"
            )));
        }
        config.validate()?;

        Ok(NaiveBayes {
            num_classes,
            num_features,
            config,
            dispatcher: Dispatcher::new(config.slots)?,
            trained: None,
        })
    }

    pub fn num_classes(&self) -> usize {
        self.num_classes
    }

    pub fn num_features(&self) -> usize {
        self.num_features
    }

    /// Loads `num_examples` rows from `path` and estimates the class statistics.
    ///
    /// On failure the previously trained state, if any, is left untouched.
    pub fn train<P: AsRef<Path>>(&mut self, path: P, num_examples: usize) -> Result<()> {
        let layout = self.plan(num_examples)?;
        let dataset = timed("load", || {
            Dataset::from_path(path, layout, self.num_classes)
        })?;
        self.fit(dataset)
    }

    pub fn train_from_reader<R: io::Read>(&mut self, reader: R, num_examples: usize) -> Result<()> {
        let layout = self.plan(num_examples)?;
        let dataset = timed("load", || {
            Dataset::from_reader(reader, layout, self.num_classes)
        })?;
        self.fit(dataset)
    }

    /// Estimates the class statistics from an already loaded dataset.
    pub fn fit(&mut self, dataset: Dataset) -> Result<()> {
        let layout = dataset.layout();
        if layout.num_features != self.num_features || layout.slots != self.config.slots {
            return Err(Error::InvalidConfig(format!(
                "dataset laid out for {} features over {} slots, model expects {} over {}",
                layout.num_features, layout.slots, self.num_features, self.config.slots
            )));
        }

        let stats = timed("train", || {
            ClassStatistics::estimate(&dataset, self.num_classes)
        })?;
        self.trained = Some(Trained { dataset, stats });
        Ok(())
    }

    pub fn plan(&self, num_examples: usize) -> Result<Layout> {
        Layout::plan(&self.config, self.num_features, num_examples)
    }

    pub fn statistics(&self) -> Option<&ClassStatistics> {
        self.trained.as_ref().map(|trained| &trained.stats)
    }

    pub fn dataset(&self) -> Option<&Dataset> {
        self.trained.as_ref().map(|trained| &trained.dataset)
    }

    /// Scores every training example on `kernel`, one request per pool slot.
    pub fn classify(&self, epsilon: f32, kernel: &dyn ClassificationKernel) -> Result<Predictions> {
        let trained = self.trained.as_ref().ok_or(Error::NotTrained)?;
        timed("classify", || {
            self.dispatcher
                .classify(&trained.dataset, &trained.stats, epsilon, kernel)
        })
    }

    /// Classifies the training set and reports how many predictions match their labels.
    pub fn predict(&self, epsilon: f32, kernel: &dyn ClassificationKernel) -> Result<Accuracy> {
        let predictions = self.classify(epsilon, kernel)?;
        let trained = self.trained.as_ref().ok_or(Error::NotTrained)?;
        let accuracy = scorer::score(
            trained.dataset.layout(),
            trained.dataset.labels(),
            &predictions,
        );
        tracing::info!(
            correct = accuracy.correct,
            total = accuracy.total,
            "accuracy {:.2} %",
            accuracy.percent()
        );
        Ok(accuracy)
    }
}

fn timed<T>(phase: &str, f: impl FnOnce() -> Result<T>) -> Result<T> {
    let start = Instant::now();
    let result = f();
    let elapsed = start.elapsed();
    match &result {
        Ok(_) => tracing::info!(
            phase,
            elapsed_ms = elapsed.as_millis() as u64,
            "took {:.2}s",
            elapsed.as_secs_f64()
        ),
        Err(err) => tracing::error!(phase, error = %err, "failed"),
    }
    result
}
