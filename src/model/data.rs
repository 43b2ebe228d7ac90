use std::path::{Path, PathBuf};

use burn::prelude::*;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;

use crate::error::DataError;

/// Numeric table held in memory: every column but the last is a feature,
/// the last is the regression target.
#[derive(Debug, Clone)]
pub struct CsvDataset {
    features: Vec<f32>,
    targets: Vec<f32>,
    num_features: usize,
}

impl CsvDataset {
    /// Read a CSV file. With `has_headers` the first row is skipped;
    /// otherwise every row, the first included, must be numeric.
    pub fn load(path: &Path, has_headers: bool) -> Result<Self, DataError> {
        let content = std::fs::read_to_string(path).map_err(|e| DataError::Read {
            path: path.to_path_buf(),
            source: e,
        })?;
        Self::parse(path, &content, has_headers)
    }

    fn parse(path: &Path, content: &str, has_headers: bool) -> Result<Self, DataError> {
        let parse_error = |line: usize, reason: String| DataError::Parse {
            path: path.to_path_buf(),
            line,
            reason,
        };

        let mut reader = csv::ReaderBuilder::new()
            .has_headers(has_headers)
            .trim(csv::Trim::All)
            .from_reader(content.as_bytes());

        let mut rows: Vec<Vec<f32>> = Vec::new();
        let mut first_line = 1;
        for result in reader.records() {
            let record = result.map_err(|e| {
                let line = e.position().map_or(0, |p| p.line() as usize);
                parse_error(line, e.to_string())
            })?;
            let line = record.position().map_or(0, |p| p.line() as usize);
            let row: Vec<f32> = record
                .deserialize(None)
                .map_err(|e| parse_error(line, e.to_string()))?;
            if rows.is_empty() {
                first_line = line;
            }
            rows.push(row);
        }

        let Some(first) = rows.first() else {
            return Err(DataError::Empty(path.to_path_buf()));
        };
        let width = first.len();
        if width < 2 {
            return Err(parse_error(
                first_line,
                "need at least one feature and a target column".into(),
            ));
        }

        let num_features = width - 1;
        let mut features = Vec::with_capacity(rows.len() * num_features);
        let mut targets = Vec::with_capacity(rows.len());
        for row in &rows {
            features.extend_from_slice(&row[..num_features]);
            targets.push(row[num_features]);
        }

        Ok(CsvDataset {
            features,
            targets,
            num_features,
        })
    }

    pub fn from_rows(rows: &[(Vec<f32>, f32)]) -> Result<Self, DataError> {
        let origin = PathBuf::from("<memory>");
        let Some((first, _)) = rows.first() else {
            return Err(DataError::Empty(origin));
        };
        let num_features = first.len();
        let mut features = Vec::with_capacity(rows.len() * num_features);
        let mut targets = Vec::with_capacity(rows.len());
        for (i, (x, y)) in rows.iter().enumerate() {
            if x.len() != num_features {
                return Err(DataError::Parse {
                    path: origin,
                    line: i + 1,
                    reason: format!("expected {num_features} features, found {}", x.len()),
                });
            }
            features.extend_from_slice(x);
            targets.push(*y);
        }
        Ok(CsvDataset {
            features,
            targets,
            num_features,
        })
    }

    pub fn len(&self) -> usize {
        self.targets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.targets.is_empty()
    }

    pub fn num_features(&self) -> usize {
        self.num_features
    }

    /// Collate the given rows into `([n, num_features], [n, 1])` tensors.
    pub fn batch<B: Backend>(
        &self,
        indices: &[usize],
        device: &B::Device,
    ) -> (Tensor<B, 2>, Tensor<B, 2>) {
        let n = indices.len();
        let mut xs = Vec::with_capacity(n * self.num_features);
        let mut ys = Vec::with_capacity(n);
        for &i in indices {
            let start = i * self.num_features;
            xs.extend_from_slice(&self.features[start..start + self.num_features]);
            ys.push(self.targets[i]);
        }
        let inputs = Tensor::<B, 2>::from_data(TensorData::new(xs, [n, self.num_features]), device);
        let targets = Tensor::<B, 2>::from_data(TensorData::new(ys, [n, 1]), device);
        (inputs, targets)
    }
}

/// Splits a dataset into index batches each epoch.
#[derive(Debug, Clone, Copy)]
pub struct DataLoader {
    pub batch_size: usize,
    pub shuffle: bool,
    pub drop_last: bool,
}

impl DataLoader {
    pub fn num_batches(&self, len: usize) -> usize {
        if self.drop_last {
            len / self.batch_size
        } else {
            len.div_ceil(self.batch_size)
        }
    }

    /// Index batches for one epoch. Shuffles with `rng` when enabled.
    pub fn epoch_batches(&self, len: usize, rng: &mut StdRng) -> Vec<Vec<usize>> {
        let mut order: Vec<usize> = (0..len).collect();
        if self.shuffle {
            order.shuffle(rng);
        }
        let mut batches: Vec<Vec<usize>> =
            order.chunks(self.batch_size).map(|c| c.to_vec()).collect();
        if self.drop_last && batches.last().is_some_and(|b| b.len() < self.batch_size) {
            batches.pop();
        }
        batches
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn::backend::NdArray;
    use rand::SeedableRng;

    type TestBackend = NdArray<f32>;

    #[test]
    fn test_parse_with_header() {
        let data = CsvDataset::parse(Path::new("t.csv"), "x1,x2,y\n1,2,3\n4,5,6\n\n", true).unwrap();
        assert_eq!(data.len(), 2);
        assert_eq!(data.num_features(), 2);
    }

    #[test]
    fn test_parse_without_header() {
        let data = CsvDataset::parse(Path::new("t.csv"), "1.5,0.5\n2.5,1.0\n", false).unwrap();
        assert_eq!(data.len(), 2);
        assert_eq!(data.num_features(), 1);
    }

    #[test]
    fn test_parse_quoted_and_padded_fields() {
        let content = "\"x\",\"y\"\n\"1.5\",\"2.0\"\n 3.5 , 4.0 \n";
        let data = CsvDataset::parse(Path::new("t.csv"), content, true).unwrap();
        assert_eq!(data.len(), 2);
        assert_eq!(data.targets, vec![2.0, 4.0]);
        assert_eq!(data.features, vec![1.5, 3.5]);
    }

    #[test]
    fn test_bad_first_row_without_header_is_an_error() {
        let err = CsvDataset::parse(Path::new("t.csv"), "1.0,2.O\n3.0,4.0\n5.0,6.0\n", false)
            .unwrap_err();
        assert!(matches!(err, DataError::Parse { line: 1, .. }), "got {err}");
    }

    #[test]
    fn test_parse_rejects_ragged_rows() {
        let err = CsvDataset::parse(Path::new("t.csv"), "1,2,3\n4,5\n", false).unwrap_err();
        assert!(matches!(err, DataError::Parse { .. }), "got {err}");
    }

    #[test]
    fn test_parse_rejects_garbage_after_header() {
        let err = CsvDataset::parse(Path::new("t.csv"), "a,b\n1,2\nx,3\n", true).unwrap_err();
        assert!(matches!(err, DataError::Parse { line: 3, .. }), "got {err}");
    }

    #[test]
    fn test_parse_single_column_rejected() {
        let err = CsvDataset::parse(Path::new("t.csv"), "1\n2\n", false).unwrap_err();
        assert!(matches!(err, DataError::Parse { .. }), "got {err}");
    }

    #[test]
    fn test_parse_empty() {
        let err = CsvDataset::parse(Path::new("t.csv"), "a,b\n", true).unwrap_err();
        assert!(matches!(err, DataError::Empty(_)));
    }

    #[test]
    fn test_load_missing_file() {
        let err = CsvDataset::load(Path::new("does/not/exist.csv"), true).unwrap_err();
        assert!(matches!(err, DataError::Read { .. }));
    }

    #[test]
    fn test_batch_tensors() {
        let data = CsvDataset::from_rows(&[
            (vec![1.0, 2.0], 3.0),
            (vec![4.0, 5.0], 6.0),
            (vec![7.0, 8.0], 9.0),
        ])
        .unwrap();
        let device = Default::default();
        let (x, y) = data.batch::<TestBackend>(&[2, 0], &device);
        assert_eq!(x.shape().dims, [2, 2]);
        assert_eq!(y.shape().dims, [2, 1]);
        let xs: Vec<f32> = x.into_data().to_vec().unwrap();
        let ys: Vec<f32> = y.into_data().to_vec().unwrap();
        assert_eq!(xs, vec![7.0, 8.0, 1.0, 2.0]);
        assert_eq!(ys, vec![9.0, 3.0]);
    }

    #[test]
    fn test_drop_last() {
        let loader = DataLoader {
            batch_size: 4,
            shuffle: false,
            drop_last: true,
        };
        let mut rng = StdRng::seed_from_u64(0);
        let batches = loader.epoch_batches(10, &mut rng);
        assert_eq!(batches.len(), 2);
        assert_eq!(loader.num_batches(10), 2);
        assert_eq!(batches[0], vec![0, 1, 2, 3]);
    }

    #[test]
    fn test_keep_last_partial_batch() {
        let loader = DataLoader {
            batch_size: 4,
            shuffle: false,
            drop_last: false,
        };
        let mut rng = StdRng::seed_from_u64(0);
        let batches = loader.epoch_batches(10, &mut rng);
        assert_eq!(batches.len(), 3);
        assert_eq!(loader.num_batches(10), 3);
        assert_eq!(batches[2], vec![8, 9]);
    }

    #[test]
    fn test_shuffle_is_seeded() {
        let loader = DataLoader {
            batch_size: 3,
            shuffle: true,
            drop_last: false,
        };
        let a = loader.epoch_batches(20, &mut StdRng::seed_from_u64(7));
        let b = loader.epoch_batches(20, &mut StdRng::seed_from_u64(7));
        assert_eq!(a, b);
        let mut all: Vec<usize> = a.into_iter().flatten().collect();
        all.sort_unstable();
        assert_eq!(all, (0..20).collect::<Vec<_>>());
    }
}
