//! Count matrix representation for RNA-seq data

use ndarray::{Array2, ArrayView1, ArrayView2, Axis};

use crate::error::{DeaError, Result};

/// Which axis of the matrix holds features (genes)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Orientation {
    /// Features as rows, samples as columns (layout of the input CSV)
    FeaturesByRows,
    /// Samples as rows, features as columns (layout required by model fitting)
    SamplesByRows,
}

impl Orientation {
    fn flipped(self) -> Self {
        match self {
            Orientation::FeaturesByRows => Orientation::SamplesByRows,
            Orientation::SamplesByRows => Orientation::FeaturesByRows,
        }
    }
}

/// A matrix of non-negative integer read counts with row and column identifiers
#[derive(Debug, Clone, PartialEq)]
pub struct CountMatrix {
    counts: Array2<f64>,
    row_ids: Vec<String>,
    col_ids: Vec<String>,
    orientation: Orientation,
}

impl CountMatrix {
    /// Create a count matrix, validating dimensions and count values
    pub fn new(
        counts: Array2<f64>,
        row_ids: Vec<String>,
        col_ids: Vec<String>,
        orientation: Orientation,
    ) -> Result<Self> {
        let (n_rows, n_cols) = counts.dim();

        if row_ids.len() != n_rows {
            return Err(DeaError::parse(format!(
                "expected {} row identifiers, got {}",
                n_rows,
                row_ids.len()
            )));
        }
        if col_ids.len() != n_cols {
            return Err(DeaError::parse(format!(
                "expected {} column identifiers, got {}",
                n_cols,
                col_ids.len()
            )));
        }

        if counts
            .iter()
            .any(|&x| !x.is_finite() || x < 0.0 || x != x.round())
        {
            return Err(DeaError::parse("counts must be non-negative integers"));
        }

        Ok(Self {
            counts,
            row_ids,
            col_ids,
            orientation,
        })
    }

    /// Build a features-by-rows matrix, the layout of a raw count table
    pub fn from_features_by_rows(
        counts: Array2<f64>,
        feature_ids: Vec<String>,
        sample_ids: Vec<String>,
    ) -> Result<Self> {
        Self::new(counts, feature_ids, sample_ids, Orientation::FeaturesByRows)
    }

    pub fn orientation(&self) -> Orientation {
        self.orientation
    }

    pub fn counts(&self) -> ArrayView2<'_, f64> {
        self.counts.view()
    }

    pub fn row_ids(&self) -> &[String] {
        &self.row_ids
    }

    pub fn col_ids(&self) -> &[String] {
        &self.col_ids
    }

    /// Feature identifiers, whatever the orientation
    pub fn feature_ids(&self) -> &[String] {
        match self.orientation {
            Orientation::FeaturesByRows => &self.row_ids,
            Orientation::SamplesByRows => &self.col_ids,
        }
    }

    /// Sample identifiers, whatever the orientation
    pub fn sample_ids(&self) -> &[String] {
        match self.orientation {
            Orientation::FeaturesByRows => &self.col_ids,
            Orientation::SamplesByRows => &self.row_ids,
        }
    }

    pub fn n_features(&self) -> usize {
        self.feature_ids().len()
    }

    pub fn n_samples(&self) -> usize {
        self.sample_ids().len()
    }

    /// Counts laid out as features x samples, borrowing when possible
    pub fn features_by_samples(&self) -> ArrayView2<'_, f64> {
        match self.orientation {
            Orientation::FeaturesByRows => self.counts.view(),
            Orientation::SamplesByRows => self.counts.t(),
        }
    }

    /// Counts of one feature across all samples
    pub fn feature_counts(&self, feature_idx: usize) -> ArrayView1<'_, f64> {
        match self.orientation {
            Orientation::FeaturesByRows => self.counts.row(feature_idx),
            Orientation::SamplesByRows => self.counts.column(feature_idx),
        }
    }

    /// Total counts per sample (library size)
    pub fn library_sizes(&self) -> Vec<f64> {
        self.features_by_samples()
            .axis_iter(Axis(1))
            .map(|col| col.sum())
            .collect()
    }

    /// Keep features whose total count across samples is at least `min_reads`
    ///
    /// Rows are features here, so the matrix must still be in its loaded orientation.
    /// Removing every feature is not an error at this point; fitting reports it.
    pub fn filter_low_count(&self, min_reads: u64) -> Result<Self> {
        if self.orientation != Orientation::FeaturesByRows {
            return Err(DeaError::invalid(
                "low-count filtering must run before the matrix is transposed",
            ));
        }

        let threshold = min_reads as f64;
        let keep: Vec<usize> = self
            .counts
            .axis_iter(Axis(0))
            .enumerate()
            .filter(|(_, row)| row.sum() >= threshold)
            .map(|(i, _)| i)
            .collect();

        let removed = self.row_ids.len() - keep.len();
        if removed > 0 {
            log::info!(
                "Removed {} of {} features with fewer than {} total reads",
                removed,
                self.row_ids.len(),
                min_reads
            );
        }

        Ok(Self {
            counts: self.counts.select(Axis(0), &keep),
            row_ids: keep.iter().map(|&i| self.row_ids[i].clone()).collect(),
            col_ids: self.col_ids.clone(),
            orientation: self.orientation,
        })
    }

    /// Swap rows and columns (features-by-rows <-> samples-by-rows)
    pub fn transpose(&self) -> Self {
        Self {
            counts: self.counts.t().to_owned(),
            row_ids: self.col_ids.clone(),
            col_ids: self.row_ids.clone(),
            orientation: self.orientation.flipped(),
        }
    }

    /// Keep only the given samples, in the given order
    pub fn subset_samples(&self, sample_indices: &[usize]) -> Self {
        let sample_axis = match self.orientation {
            Orientation::FeaturesByRows => Axis(1),
            Orientation::SamplesByRows => Axis(0),
        };
        let counts = self.counts.select(sample_axis, sample_indices);
        let picked: Vec<String> = sample_indices
            .iter()
            .map(|&i| self.sample_ids()[i].clone())
            .collect();

        match self.orientation {
            Orientation::FeaturesByRows => Self {
                counts,
                row_ids: self.row_ids.clone(),
                col_ids: picked,
                orientation: self.orientation,
            },
            Orientation::SamplesByRows => Self {
                counts,
                row_ids: picked,
                col_ids: self.col_ids.clone(),
                orientation: self.orientation,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    fn ids(prefix: &str, n: usize) -> Vec<String> {
        (1..=n).map(|i| format!("{}{}", prefix, i)).collect()
    }

    #[test]
    fn test_count_matrix_creation() {
        let counts = array![[10.0, 20.0, 30.0], [5.0, 15.0, 25.0]];
        let matrix = CountMatrix::from_features_by_rows(counts, ids("gene", 2), ids("s", 3)).unwrap();
        assert_eq!(matrix.n_features(), 2);
        assert_eq!(matrix.n_samples(), 3);
        assert_eq!(matrix.library_sizes(), vec![15.0, 35.0, 55.0]);
    }

    #[test]
    fn test_negative_and_fractional_counts_rejected() {
        let negative = CountMatrix::from_features_by_rows(array![[1.0, -5.0]], ids("gene", 1), ids("s", 2));
        assert!(matches!(negative, Err(DeaError::Parse { .. })));

        let fractional = CountMatrix::from_features_by_rows(array![[1.0, 2.5]], ids("gene", 1), ids("s", 2));
        assert!(matches!(fractional, Err(DeaError::Parse { .. })));
    }

    #[test]
    fn test_filter_low_count_respects_threshold() {
        let counts = array![
            [0.0, 1.0, 2.0, 3.0],  // 6
            [5.0, 5.0, 0.0, 0.0],  // 10
            [9.0, 0.0, 0.0, 0.0],  // 9
            [100.0, 0.0, 3.0, 1.0] // 104
        ];
        let matrix = CountMatrix::from_features_by_rows(counts.clone(), ids("gene", 4), ids("s", 4)).unwrap();
        let filtered = matrix.filter_low_count(10).unwrap();

        assert_eq!(filtered.feature_ids(), &["gene2".to_string(), "gene4".to_string()]);
        for row in filtered.counts().rows() {
            assert!(row.sum() >= 10.0);
        }
        for (i, id) in matrix.feature_ids().iter().enumerate() {
            if !filtered.feature_ids().contains(id) {
                assert!(counts.row(i).sum() < 10.0);
            }
        }
    }

    #[test]
    fn test_filter_can_remove_everything() {
        let matrix = CountMatrix::from_features_by_rows(array![[1.0, 1.0]], ids("gene", 1), ids("s", 2)).unwrap();
        let filtered = matrix.filter_low_count(100).unwrap();
        assert_eq!(filtered.n_features(), 0);
        assert_eq!(filtered.n_samples(), 2);
    }

    #[test]
    fn test_filter_after_transpose_rejected() {
        let matrix = CountMatrix::from_features_by_rows(array![[1.0, 1.0]], ids("gene", 1), ids("s", 2)).unwrap();
        assert!(matrix.transpose().filter_low_count(1).is_err());
    }

    #[test]
    fn test_transpose_round_trip() {
        let counts = array![[1.0, 2.0, 3.0], [4.0, 5.0, 6.0]];
        let matrix = CountMatrix::from_features_by_rows(counts, ids("gene", 2), ids("s", 3)).unwrap();
        let t = matrix.transpose();

        assert_eq!(t.orientation(), Orientation::SamplesByRows);
        assert_eq!(t.counts().dim(), (3, 2));
        assert_eq!(t.row_ids(), matrix.sample_ids());
        assert_eq!(t.feature_ids(), matrix.feature_ids());
        assert_eq!(t.features_by_samples(), matrix.counts());
        assert_eq!(t.transpose(), matrix);
    }

    #[test]
    fn test_subset_samples_in_both_orientations() {
        let counts = array![[1.0, 2.0, 3.0], [4.0, 5.0, 6.0]];
        let matrix = CountMatrix::from_features_by_rows(counts, ids("gene", 2), ids("s", 3)).unwrap();

        let sub = matrix.subset_samples(&[2, 0]);
        assert_eq!(sub.sample_ids(), &["s3".to_string(), "s1".to_string()]);
        assert_eq!(sub.feature_counts(1).to_vec(), vec![6.0, 4.0]);

        let sub_t = matrix.transpose().subset_samples(&[2, 0]);
        assert_eq!(sub_t.transpose(), sub);
    }
}
