//! Confusion matrix over a fixed label range.

use std::{ fmt, fs::File, path::Path };

use serde::{ Deserialize, Serialize };

use crate::error::{ EvalError, Result };

/// Count matrix where `rows[t][p]` is the number of pixels of true class `t`
/// predicted as class `p`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfusionMatrix {
    rows: Vec<Vec<u64>>,
}

/// Extra statistics only defined for two classes.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BinaryStats {
    pub precision: f64,
    pub recall: f64,
    pub f1: f64,
}

fn ratio(num: f64, den: f64) -> f64 {
    if den == 0.0 { 0.0 } else { num / den }
}

impl ConfusionMatrix {
    pub fn new(n_classes: usize) -> Self {
        Self {
            rows: vec![vec![0; n_classes]; n_classes],
        }
    }

    /// Pairs whose target or prediction falls outside `0..n_classes` are skipped.
    pub fn from_predictions(targets: &[i64], predictions: &[i64], n_classes: usize) -> Self {
        let mut matrix = Self::new(n_classes);
        matrix.accumulate(targets, predictions);
        matrix
    }

    pub fn from_rows(rows: Vec<Vec<u64>>) -> Result<Self> {
        let n_classes = rows.len();
        if let Some((row, values)) = rows.iter().enumerate().find(|(_, r)| r.len() != n_classes) {
            return Err(EvalError::NotSquare { row, len: values.len(), n_classes });
        }
        Ok(Self { rows })
    }

    pub fn accumulate(&mut self, targets: &[i64], predictions: &[i64]) {
        let n = self.n_classes() as i64;
        for (&target, &pred) in targets.iter().zip(predictions.iter()) {
            if (0..n).contains(&target) && (0..n).contains(&pred) {
                self.rows[target as usize][pred as usize] += 1;
            }
        }
    }

    pub fn n_classes(&self) -> usize {
        self.rows.len()
    }

    pub fn rows(&self) -> &[Vec<u64>] {
        &self.rows
    }

    pub fn get(&self, target: usize, pred: usize) -> u64 {
        self.rows[target][pred]
    }

    pub fn total(&self) -> u64 {
        self.rows.iter().flatten().sum()
    }

    pub fn trace(&self) -> u64 {
        (0..self.n_classes()).map(|i| self.rows[i][i]).sum()
    }

    pub fn row_sum(&self, target: usize) -> u64 {
        self.rows[target].iter().sum()
    }

    pub fn col_sum(&self, pred: usize) -> u64 {
        self.rows.iter().map(|row| row[pred]).sum()
    }

    /// Sum of the diagonal over the total; 0 for an empty matrix.
    pub fn accuracy(&self) -> f64 {
        ratio(self.trace() as f64, self.total() as f64)
    }

    /// Precision, recall and F1 of class 1, `None` unless the matrix is 2x2.
    pub fn binary_stats(&self) -> Option<BinaryStats> {
        if self.n_classes() != 2 {
            return None;
        }
        let tp = self.rows[1][1] as f64;
        let precision = ratio(tp, self.col_sum(1) as f64);
        let recall = ratio(tp, self.row_sum(1) as f64);
        let f1 = ratio(2.0 * precision * recall, precision + recall);
        Some(BinaryStats { precision, recall, f1 })
    }

    pub fn without_diagonal(&self) -> Self {
        let mut rows = self.rows.clone();
        for (i, row) in rows.iter_mut().enumerate() {
            row[i] = 0;
        }
        Self { rows }
    }

    /// Reads a headerless CSV, one matrix row per line.
    pub fn read_csv<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let file = File::open(path).map_err(|source| EvalError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let mut reader = csv::ReaderBuilder::new().has_headers(false).trim(csv::Trim::All).from_reader(file);

        let rows = reader
            .deserialize::<Vec<u64>>()
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Self::from_rows(rows)
    }

    pub fn write_csv<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let mut writer = csv::WriterBuilder::new().has_headers(false).from_path(path)?;
        for row in &self.rows {
            writer.serialize(row)?;
        }
        writer.flush().map_err(csv::Error::from)?;
        Ok(())
    }
}

impl fmt::Display for ConfusionMatrix {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let width = self.rows
            .iter()
            .flatten()
            .map(|v| v.to_string().len())
            .max()
            .unwrap_or(1)
            .max(4);

        write!(f, "{:>6}", "")?;
        for pred in 0..self.n_classes() {
            write!(f, " {:>width$}", format!("P{pred}"))?;
        }
        writeln!(f)?;

        for (target, row) in self.rows.iter().enumerate() {
            write!(f, "{:>6}", format!("T{target}"))?;
            for value in row {
                write!(f, " {value:>width$}")?;
            }
            writeln!(f)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use rand::{ rngs::StdRng, Rng, SeedableRng };

    #[test]
    fn counts_true_rows_against_predicted_columns() {
        let cm = ConfusionMatrix::from_predictions(&[0, 0, 1, 2, 2], &[0, 1, 1, 2, 0], 3);
        assert_eq!(cm.rows(), &[vec![1, 1, 0], vec![0, 1, 0], vec![1, 0, 1]]);
        assert_eq!(cm.trace(), 3);
        assert_relative_eq!(cm.accuracy(), 0.6);
    }

    #[test]
    fn labels_outside_range_are_ignored() {
        let cm = ConfusionMatrix::from_predictions(&[0, 7, 1, -1], &[0, 0, 9, 1], 2);
        assert_eq!(cm.total(), 1);
    }

    #[test]
    fn total_matches_number_of_in_range_pairs() {
        let mut rng = StdRng::seed_from_u64(7);
        let targets: Vec<i64> = (0..500).map(|_| rng.gen_range(0..6)).collect();
        let preds: Vec<i64> = (0..500).map(|_| rng.gen_range(0..6)).collect();
        let cm = ConfusionMatrix::from_predictions(&targets, &preds, 6);

        assert_eq!(cm.total(), 500);
        let row_total: u64 = (0..6).map(|c| cm.row_sum(c)).sum();
        let col_total: u64 = (0..6).map(|c| cm.col_sum(c)).sum();
        assert_eq!(row_total, 500);
        assert_eq!(col_total, 500);
        for class in 0..6 {
            let expected = targets.iter().filter(|&&t| t == class as i64).count() as u64;
            assert_eq!(cm.row_sum(class), expected);
        }
    }

    #[test]
    fn binary_stats_follow_positive_class() {
        let cm = ConfusionMatrix::from_rows(vec![vec![50, 10], vec![5, 35]]).unwrap();
        let stats = cm.binary_stats().unwrap();
        assert_relative_eq!(stats.precision, 35.0 / 45.0);
        assert_relative_eq!(stats.recall, 35.0 / 40.0);
        let f1 = (2.0 * stats.precision * stats.recall) / (stats.precision + stats.recall);
        assert_relative_eq!(stats.f1, f1);
    }

    #[test]
    fn binary_stats_without_positives_are_zero() {
        let cm = ConfusionMatrix::from_rows(vec![vec![4, 0], vec![0, 0]]).unwrap();
        let stats = cm.binary_stats().unwrap();
        assert_eq!(stats.precision, 0.0);
        assert_eq!(stats.recall, 0.0);
        assert_eq!(stats.f1, 0.0);
        assert!(ConfusionMatrix::new(3).binary_stats().is_none());
    }

    #[test]
    fn empty_matrix_has_zero_accuracy() {
        assert_eq!(ConfusionMatrix::new(4).accuracy(), 0.0);
    }

    #[test]
    fn rejects_ragged_rows() {
        let err = ConfusionMatrix::from_rows(vec![vec![1, 2], vec![3]]).unwrap_err();
        assert!(matches!(err, EvalError::NotSquare { row: 1, len: 1, n_classes: 2 }));
    }

    #[test]
    fn diagonal_can_be_dropped() {
        let cm = ConfusionMatrix::from_rows(vec![vec![3, 1], vec![2, 4]]).unwrap();
        assert_eq!(cm.without_diagonal().rows(), &[vec![0, 1], vec![2, 0]]);
    }

    #[test]
    fn csv_round_trip_preserves_counts() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cm.csv");
        let cm = ConfusionMatrix::from_rows(vec![vec![10, 2, 0], vec![1, 8, 3], vec![0, 0, 12]]).unwrap();

        cm.write_csv(&path).unwrap();
        assert_eq!(ConfusionMatrix::read_csv(&path).unwrap(), cm);
    }

    #[test]
    fn display_is_aligned() {
        let cm = ConfusionMatrix::from_rows(vec![vec![12345, 1], vec![0, 7]]).unwrap();
        let text = cm.to_string();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines.len(), 3);
        assert!(lines.iter().all(|line| line.len() == lines[0].len()));
        assert!(lines[1].starts_with("    T0"));
    }
}
