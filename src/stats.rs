use crate::{
    dataset::Dataset,
    error::{Error, Result},
};

/// Per-class Gaussian parameters at the true feature width.
///
/// `means` and `variances` are row-major `[num_classes][num_features]`.
#[derive(Debug, Clone, PartialEq)]
pub struct ClassStatistics {
    num_classes: usize,
    num_features: usize,
    priors: Vec<f32>,
    means: Vec<f32>,
    variances: Vec<f32>,
}

impl ClassStatistics {
    /// Estimates priors, means and variances from every example in `dataset`.
    ///
    /// The prior of class `k` is `count[k] / num_features`. This is not a relative
    /// frequency; it is kept because existing accuracy numbers depend on it.
    pub fn estimate(dataset: &Dataset, num_classes: usize) -> Result<Self> {
        let num_features = dataset.layout().num_features;

        let mut counts = vec![0usize; num_classes];
        // Each class accumulates around its first sample so a constant feature sums to exactly 0.
        let mut shifts = vec![0.0f64; num_classes * num_features];
        let mut sums = vec![0.0f64; num_classes * num_features];
        let mut sq_sums = vec![0.0f64; num_classes * num_features];

        for (label, features) in dataset.rows() {
            if label >= num_classes {
                return Err(Error::InvalidConfig(format!(
                    "label {label} outside [0, {num_classes})"
                )));
            }
            let base = label * num_features;
            if counts[label] == 0 {
                for (shift, &x) in shifts[base..base + num_features].iter_mut().zip(features) {
                    *shift = f64::from(x);
                }
            }
            counts[label] += 1;
            for (j, &x) in features.iter().enumerate() {
                let x = f64::from(x) - shifts[base + j];
                sums[base + j] += x;
                sq_sums[base + j] += x * x;
            }
        }

        if let Some(class) = counts.iter().position(|&count| count == 0) {
            return Err(Error::EmptyClass { class });
        }

        let priors = counts
            .iter()
            .map(|&count| (count as f64 / num_features as f64) as f32)
            .collect();

        let mut means = vec![0.0f32; num_classes * num_features];
        let mut variances = vec![0.0f32; num_classes * num_features];
        for (k, &count) in counts.iter().enumerate() {
            let count = count as f64;
            for j in 0..num_features {
                let i = k * num_features + j;
                let mean = sums[i] / count;
                means[i] = (shifts[i] + mean) as f32;
                variances[i] = (sq_sums[i] / count - mean * mean).max(0.0) as f32;
            }
        }

        Ok(ClassStatistics {
            num_classes,
            num_features,
            priors,
            means,
            variances,
        })
    }

    pub fn num_classes(&self) -> usize {
        self.num_classes
    }

    pub fn num_features(&self) -> usize {
        self.num_features
    }

    pub fn priors(&self) -> &[f32] {
        &self.priors
    }

    pub fn means(&self) -> &[f32] {
        &self.means
    }

    pub fn variances(&self) -> &[f32] {
        &self.variances
    }

    pub fn class_means(&self, class: usize) -> &[f32] {
        &self.means[class * self.num_features..(class + 1) * self.num_features]
    }

    pub fn class_variances(&self, class: usize) -> &[f32] {
        &self.variances[class * self.num_features..(class + 1) * self.num_features]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::layout::{Layout, LayoutConfig};

    fn dataset(rows: Vec<(usize, Vec<f32>)>, num_classes: usize) -> Dataset {
        let config = LayoutConfig {
            slots: 2,
            vectorization: 4,
            parallelism: 1,
        };
        let layout = Layout::plan(&config, rows[0].1.len(), rows.len()).unwrap();
        Dataset::from_rows(rows, layout, num_classes).unwrap()
    }

    #[test]
    fn constant_class_has_zero_variance() {
        let data = dataset(
            vec![
                (0, vec![2.5, 2.5, 2.5]),
                (1, vec![1.0, 2.0, 3.0]),
                (0, vec![2.5, 2.5, 2.5]),
                (1, vec![3.0, 4.0, 5.0]),
                (0, vec![2.5, 2.5, 2.5]),
            ],
            2,
        );
        let stats = ClassStatistics::estimate(&data, 2).unwrap();

        assert_eq!(stats.class_means(0), &[2.5, 2.5, 2.5]);
        assert_eq!(stats.class_variances(0), &[0.0, 0.0, 0.0]);
        assert_eq!(stats.class_means(1), &[2.0, 3.0, 4.0]);
        assert_eq!(stats.class_variances(1), &[1.0, 1.0, 1.0]);
    }

    #[test]
    fn long_constant_class_has_exactly_zero_variance() {
        for &(c, n) in &[(0.1f32, 100usize), (123.456, 37), (1.7, 12345)] {
            let mut rows = vec![(1, vec![c + 1.0, -c]), (1, vec![c - 1.0, c])];
            rows.extend((0..n).map(|_| (0, vec![c, c])));
            let data = dataset(rows, 2);
            let stats = ClassStatistics::estimate(&data, 2).unwrap();

            assert_eq!(stats.class_means(0), &[c, c], "c = {c}, n = {n}");
            assert_eq!(stats.class_variances(0), &[0.0, 0.0], "c = {c}, n = {n}");
            assert!(stats.variances().iter().all(|&v| v >= 0.0));
        }
    }

    #[test]
    fn priors_divide_by_feature_count() {
        let data = dataset(
            vec![
                (0, vec![0.0, 0.0]),
                (0, vec![1.0, 1.0]),
                (0, vec![2.0, 2.0]),
                (1, vec![3.0, 3.0]),
            ],
            2,
        );
        let stats = ClassStatistics::estimate(&data, 2).unwrap();
        assert_eq!(stats.priors(), &[1.5, 0.5]);
    }

    #[test]
    fn empty_class_is_an_error() {
        let data = dataset(vec![(0, vec![1.0]), (2, vec![2.0])], 3);
        let err = ClassStatistics::estimate(&data, 3).unwrap_err();
        assert!(matches!(err, Error::EmptyClass { class: 1 }));
    }

    #[test]
    fn padding_does_not_leak_into_statistics() {
        // 3 features padded to 4, 3 rows in 2 slots of 2: slot 1 holds a pad row.
        let data = dataset(
            vec![
                (0, vec![1.0, 1.0, 1.0]),
                (0, vec![3.0, 3.0, 3.0]),
                (0, vec![5.0, 5.0, 5.0]),
            ],
            1,
        );
        let stats = ClassStatistics::estimate(&data, 1).unwrap();
        assert_eq!(stats.means().len(), 3);
        assert_eq!(stats.class_means(0), &[3.0, 3.0, 3.0]);
        assert!(stats.variances().iter().all(|&v| (v - 8.0 / 3.0).abs() < 1e-5));
    }
}
