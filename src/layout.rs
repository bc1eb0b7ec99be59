use crate::error::{Error, Result};

/// Shape of the worker pool the buffers are laid out for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LayoutConfig {
    /// Number of concurrent requests (pool slots).
    pub slots: usize,
    /// Features per row are padded to a multiple of this.
    pub vectorization: usize,
    /// Rows per slot are padded to a multiple of this.
    pub parallelism: usize,
}

impl Default for LayoutConfig {
    fn default() -> Self {
        LayoutConfig {
            slots: 8,
            vectorization: 16,
            parallelism: 8,
        }
    }
}

impl LayoutConfig {
    pub fn validate(&self) -> Result<()> {
        if self.slots == 0 || self.vectorization == 0 || self.parallelism == 0 {
            return Err(Error::InvalidConfig(format!(
                "slots, vectorization and parallelism must be non-zero (got {}, {}, {})",
                self.slots, self.vectorization, self.parallelism
            )));
        }
        Ok(())
    }
}

/// Where an example lives in the partitioned buffers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SlotIndex {
    pub slot: usize,
    pub offset: usize,
}

/// Buffer sizes for one (numFeatures, numExamples) pair. Computed once, never changed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Layout {
    pub num_features: usize,
    pub num_features_padded: usize,
    pub num_examples: usize,
    pub chunk_size: usize,
    pub slots: usize,
}

fn round_up(value: usize, multiple: usize) -> usize {
    value.div_ceil(multiple) * multiple
}

impl Layout {
    pub fn plan(config: &LayoutConfig, num_features: usize, num_examples: usize) -> Result<Self> {
        config.validate()?;
        if num_features == 0 || num_examples == 0 {
            return Err(Error::InvalidConfig(format!(
                "need at least one feature and one example (got {num_features} features, {num_examples} examples)"
            )));
        }

        let chunk_size = round_up(num_examples.div_ceil(config.slots), config.parallelism);

        Ok(Layout {
            num_features,
            num_features_padded: round_up(num_features, config.vectorization),
            num_examples,
            chunk_size,
            slots: config.slots,
        })
    }

    /// Maps example `n` to its slot and in-slot offset.
    pub fn locate(&self, n: usize) -> SlotIndex {
        SlotIndex {
            slot: n / self.chunk_size,
            offset: n % self.chunk_size,
        }
    }

    /// Number of real (non-padding) rows held by `slot`.
    pub fn rows_in_slot(&self, slot: usize) -> usize {
        let start = slot * self.chunk_size;
        self.num_examples.saturating_sub(start).min(self.chunk_size)
    }

    /// Length of one slot's feature buffer.
    pub fn slot_buffer_len(&self) -> usize {
        self.chunk_size * self.num_features_padded
    }

    /// Range of the true features of the row at `offset` inside a slot buffer.
    pub fn row_range(&self, offset: usize) -> std::ops::Range<usize> {
        let start = offset * self.num_features_padded;
        start..start + self.num_features
    }
}
