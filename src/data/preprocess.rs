//! Input alignment and low-count filtering ahead of model fitting

use crate::data::metadata::is_missing;
use crate::data::{CountMatrix, Orientation, SampleMetadata};
use crate::error::{DeaError, Result};

/// Counts and metadata ready for fitting
#[derive(Debug, Clone)]
pub struct PreparedData {
    /// Samples as rows, features as columns
    pub counts: CountMatrix,
    /// Rows in the same order as the count samples
    pub metadata: SampleMetadata,
    pub design_factor: String,
}

/// Align metadata to the count samples, drop samples without a design value,
/// filter low-count features and transpose to samples-by-rows
pub fn preprocess(
    counts: &CountMatrix,
    metadata: &SampleMetadata,
    min_reads_per_gene: u64,
) -> Result<PreparedData> {
    if counts.orientation() != Orientation::FeaturesByRows {
        return Err(DeaError::invalid("preprocess expects counts with features as rows"));
    }

    let metadata = metadata.align_index(counts.sample_ids())?;
    let design_factor = metadata.design_factor()?.to_string();

    let keep: Vec<usize> = metadata
        .design_values()?
        .iter()
        .enumerate()
        .filter(|(_, v)| !is_missing(v))
        .map(|(i, _)| i)
        .collect();

    let (counts, metadata) = if keep.len() < metadata.n_samples() {
        let dropped: Vec<&str> = metadata
            .sample_ids()
            .iter()
            .enumerate()
            .filter(|(i, _)| !keep.contains(i))
            .map(|(_, id)| id.as_str())
            .collect();
        log::warn!(
            "Dropping {} samples with no value for '{}': {}",
            dropped.len(),
            design_factor,
            dropped.join(", ")
        );
        (counts.subset_samples(&keep), metadata.subset(&keep))
    } else {
        (counts.clone(), metadata)
    };

    if counts.n_samples() == 0 {
        return Err(DeaError::EmptyDataset {
            reason: format!("no sample has a value for design factor '{}'", design_factor),
        });
    }

    let filtered = counts.filter_low_count(min_reads_per_gene)?;
    if filtered.n_features() == 0 {
        return Err(DeaError::EmptyDataset {
            reason: format!("no feature has at least {} total reads", min_reads_per_gene),
        });
    }

    log::info!(
        "Prepared {} features across {} samples (design factor '{}')",
        filtered.n_features(),
        filtered.n_samples(),
        design_factor
    );

    Ok(PreparedData {
        counts: filtered.transpose(),
        metadata,
        design_factor,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::Covariate;
    use ndarray::array;

    fn strings(values: &[&str]) -> Vec<String> {
        values.iter().map(|s| s.to_string()).collect()
    }

    fn inputs(conditions: &[&str]) -> (CountMatrix, SampleMetadata) {
        let counts = CountMatrix::from_features_by_rows(
            array![[10.0, 20.0, 30.0, 40.0], [0.0, 1.0, 0.0, 2.0], [5.0, 5.0, 5.0, 5.0]],
            strings(&["g1", "g2", "g3"]),
            strings(&["s1", "s2", "s3", "s4"]),
        )
        .unwrap();
        // Metadata listed in a different order, with an extra sample
        let meta = SampleMetadata::new(
            strings(&["s4", "s3", "extra", "s2", "s1"]),
            vec![Covariate::new(
                "condition",
                strings(&[conditions[3], conditions[2], "A", conditions[1], conditions[0]]),
            )],
        )
        .unwrap();
        (counts, meta)
    }

    #[test]
    fn test_preprocess_filters_and_transposes() {
        let (counts, meta) = inputs(&["A", "A", "B", "B"]);
        let prepared = preprocess(&counts, &meta, 10).unwrap();

        assert_eq!(prepared.counts.orientation(), Orientation::SamplesByRows);
        assert_eq!(prepared.counts.feature_ids(), &strings(&["g1", "g3"]));
        assert_eq!(prepared.metadata.sample_ids(), prepared.counts.sample_ids());
        assert_eq!(prepared.design_factor, "condition");
        for j in 0..prepared.counts.n_features() {
            assert!(prepared.counts.feature_counts(j).sum() >= 10.0);
        }
    }

    #[test]
    fn test_missing_design_values_are_dropped() {
        let (counts, meta) = inputs(&["A", "NA", "B", "B"]);
        let prepared = preprocess(&counts, &meta, 0).unwrap();
        assert_eq!(prepared.counts.sample_ids(), &strings(&["s1", "s3", "s4"]));
        assert_eq!(prepared.metadata.design_values().unwrap(), &strings(&["A", "B", "B"]));
    }

    #[test]
    fn test_everything_filtered_is_empty_dataset() {
        let (counts, meta) = inputs(&["A", "A", "B", "B"]);
        let result = preprocess(&counts, &meta, 1000);
        assert!(matches!(result, Err(DeaError::EmptyDataset { .. })));
    }

    #[test]
    fn test_sample_without_metadata_is_parse_error() {
        let (counts, _) = inputs(&["A", "A", "B", "B"]);
        let meta = SampleMetadata::new(
            strings(&["s1", "s2"]),
            vec![Covariate::new("condition", strings(&["A", "B"]))],
        )
        .unwrap();
        assert!(matches!(preprocess(&counts, &meta, 0), Err(DeaError::Parse { .. })));
    }
}
