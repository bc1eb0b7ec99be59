//! Gaussian Naive Bayes with slot-partitioned, parallel classification.
//!
//! Training rows are laid out once into one padded buffer per pool slot. Each classify
//! call sends every slot to a [`ClassificationKernel`] concurrently and waits for all of
//! them before scoring.

pub mod dataset;
pub mod dispatch;
pub mod error;
pub mod kernel;
pub mod layout;
pub mod model;
pub mod scorer;
pub mod stats;

pub use dataset::Dataset;
pub use dispatch::{Dispatcher, Predictions};
pub use error::{Error, Result};
pub use kernel::{ClassificationKernel, CpuKernel, KernelDims, SlotRequest, WorkerPool};
pub use layout::{Layout, LayoutConfig, SlotIndex};
pub use model::NaiveBayes;
pub use scorer::Accuracy;
pub use stats::ClassStatistics;
