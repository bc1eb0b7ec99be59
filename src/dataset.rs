use crate::{
    error::{Error, Result},
    layout::Layout,
};
use csv::{ReaderBuilder, StringRecord, Trim};
use std::{fs::File, io, path::Path};

/// Labeled examples partitioned into one padded feature buffer per pool slot.
#[derive(Debug, Clone)]
pub struct Dataset {
    layout: Layout,
    labels: Vec<usize>,
    slots: Vec<Vec<f32>>,
}

impl Dataset {
    /// Loads `layout.num_examples` rows from a comma separated file. Extra rows are ignored.
    pub fn from_path<P: AsRef<Path>>(path: P, layout: Layout, num_classes: usize) -> Result<Self> {
        let path = path.as_ref();
        let file = File::open(path).map_err(|source| Error::Io {
            path: Some(path.to_path_buf()),
            source,
        })?;

        Self::from_reader(file, layout, num_classes).map_err(|err| match err {
            Error::Io { source, .. } => Error::Io {
                path: Some(path.to_path_buf()),
                source,
            },
            other => other,
        })
    }

    pub fn from_reader<R: io::Read>(reader: R, layout: Layout, num_classes: usize) -> Result<Self> {
        let mut reader = ReaderBuilder::new()
            .has_headers(false)
            .flexible(true)
            .trim(Trim::All)
            .from_reader(reader);

        let mut dataset = Dataset::empty(layout);
        let mut record = StringRecord::new();
        while dataset.labels.len() < layout.num_examples {
            let more = reader.read_record(&mut record).map_err(|err| {
                let row = err.position().map_or(0, |pos| pos.line());
                match err.into_kind() {
                    csv::ErrorKind::Io(source) => Error::Io { path: None, source },
                    kind => Error::format(row, format!("{kind:?}")),
                }
            })?;
            if !more {
                break;
            }
            if record.len() == 1 && record[0].is_empty() {
                continue;
            }

            let row = record.position().map_or(0, |pos| pos.line());
            let (label, features) = parse_row(&record, row, layout.num_features, num_classes)?;
            dataset.push(label, &features);
        }

        if dataset.labels.len() < layout.num_examples {
            return Err(Error::ShortInput {
                expected: layout.num_examples,
                found: dataset.labels.len(),
            });
        }

        Ok(dataset)
    }

    /// Builds a dataset from in-memory rows, applying the same checks as the file loader.
    pub fn from_rows<I>(rows: I, layout: Layout, num_classes: usize) -> Result<Self>
    where
        I: IntoIterator<Item = (usize, Vec<f32>)>,
    {
        let mut dataset = Dataset::empty(layout);
        for (label, features) in rows.into_iter().take(layout.num_examples) {
            let row = dataset.labels.len() as u64 + 1;
            if label >= num_classes {
                return Err(Error::format(
                    row,
                    format!("label {label} outside [0, {num_classes})"),
                ));
            }
            if features.len() != layout.num_features {
                return Err(Error::format(
                    row,
                    format!(
                        "expected {} features, found {}",
                        layout.num_features,
                        features.len()
                    ),
                ));
            }
            dataset.push(label, &features);
        }

        if dataset.labels.len() < layout.num_examples {
            return Err(Error::ShortInput {
                expected: layout.num_examples,
                found: dataset.labels.len(),
            });
        }

        Ok(dataset)
    }

    fn empty(layout: Layout) -> Self {
        Dataset {
            layout,
            labels: Vec::with_capacity(layout.num_examples),
            slots: vec![vec![0.0; layout.slot_buffer_len()]; layout.slots],
        }
    }

    fn push(&mut self, label: usize, features: &[f32]) {
        let index = self.layout.locate(self.labels.len());
        let range = self.layout.row_range(index.offset);
        self.slots[index.slot][range].copy_from_slice(features);
        self.labels.push(label);
    }

    pub fn layout(&self) -> &Layout {
        &self.layout
    }

    pub fn labels(&self) -> &[usize] {
        &self.labels
    }

    pub fn len(&self) -> usize {
        self.labels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }

    /// The padded feature buffer of one slot, `chunk_size * num_features_padded` long.
    pub fn slot_features(&self, slot: usize) -> &[f32] {
        &self.slots[slot]
    }

    /// True features of example `n`, read back through its slot and offset.
    pub fn row(&self, n: usize) -> &[f32] {
        let index = self.layout.locate(n);
        &self.slots[index.slot][self.layout.row_range(index.offset)]
    }

    pub fn rows(&self) -> impl Iterator<Item = (usize, &[f32])> + '_ {
        (0..self.len()).map(move |n| (self.labels[n], self.row(n)))
    }
}

fn parse_row(
    record: &StringRecord,
    row: u64,
    num_features: usize,
    num_classes: usize,
) -> Result<(usize, Vec<f32>)> {
    if record.len() != num_features + 1 {
        return Err(Error::format(
            row,
            format!(
                "expected {} fields (label + {num_features} features), found {}",
                num_features + 1,
                record.len()
            ),
        ));
    }

    let label_field = &record[0];
    let label: usize = label_field
        .parse()
        .map_err(|_| Error::format(row, format!("label {label_field:?} is not a class index")))?;
    if label >= num_classes {
        return Err(Error::format(
            row,
            format!("label {label} outside [0, {num_classes})"),
        ));
    }

    let features = record
        .iter()
        .skip(1)
        .map(|field| {
            field
                .parse::<f32>()
                .map_err(|_| Error::format(row, format!("feature {field:?} is not a number")))
        })
        .collect::<Result<Vec<_>>>()?;

    Ok((label, features))
}
