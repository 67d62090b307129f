//! Sample metadata: one row per sample, ordered covariate columns

use std::collections::{HashMap, HashSet};

use serde::{Deserialize, Serialize};

use crate::error::{DeaError, Result};

/// How a covariate column was typed at load time
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CovariateKind {
    Categorical,
    /// Every non-missing value parses as a number
    Continuous,
}

/// A named metadata column
///
/// Raw string values are kept for both kinds so a numeric column can still act as a
/// design factor with its labels as levels.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Covariate {
    name: String,
    kind: CovariateKind,
    values: Vec<String>,
}

/// True for the spellings of a missing value accepted in metadata cells
pub fn is_missing(value: &str) -> bool {
    matches!(value.trim(), "" | "NA" | "NaN" | "nan" | "N/A")
}

impl Covariate {
    /// Build a column, inferring its kind from the values
    pub fn new(name: impl Into<String>, values: Vec<String>) -> Self {
        let mut any_present = false;
        let numeric = values
            .iter()
            .filter(|v| !is_missing(v))
            .all(|v| {
                any_present = true;
                v.trim().parse::<f64>().is_ok()
            });
        let kind = if numeric && any_present {
            CovariateKind::Continuous
        } else {
            CovariateKind::Categorical
        };
        Self {
            name: name.into(),
            kind,
            values,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn kind(&self) -> CovariateKind {
        self.kind
    }

    pub fn values(&self) -> &[String] {
        &self.values
    }

    /// Numeric view of a continuous column, NaN for missing cells
    pub fn numeric_values(&self) -> Option<Vec<f64>> {
        if self.kind != CovariateKind::Continuous {
            return None;
        }
        Some(
            self.values
                .iter()
                .map(|v| v.trim().parse::<f64>().unwrap_or(f64::NAN))
                .collect(),
        )
    }

    fn pick(&self, indices: &[usize]) -> Self {
        Self {
            name: self.name.clone(),
            kind: self.kind,
            values: indices.iter().map(|&i| self.values[i].clone()).collect(),
        }
    }
}

/// Sample metadata indexed by sample identifier
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SampleMetadata {
    sample_ids: Vec<String>,
    covariates: Vec<Covariate>,
}

impl SampleMetadata {
    pub fn new(sample_ids: Vec<String>, covariates: Vec<Covariate>) -> Result<Self> {
        let mut seen = HashSet::new();
        for id in &sample_ids {
            if !seen.insert(id.as_str()) {
                return Err(DeaError::parse(format!("duplicate sample identifier '{}' in metadata", id)));
            }
        }
        for cov in &covariates {
            if cov.values.len() != sample_ids.len() {
                return Err(DeaError::parse(format!(
                    "covariate '{}' has {} values for {} samples",
                    cov.name,
                    cov.values.len(),
                    sample_ids.len()
                )));
            }
        }
        Ok(Self { sample_ids, covariates })
    }

    pub fn sample_ids(&self) -> &[String] {
        &self.sample_ids
    }

    pub fn n_samples(&self) -> usize {
        self.sample_ids.len()
    }

    pub fn covariates(&self) -> &[Covariate] {
        &self.covariates
    }

    pub fn covariate(&self, name: &str) -> Option<&Covariate> {
        self.covariates.iter().find(|c| c.name == name)
    }

    /// Name of the first covariate column, the variable the model contrasts on
    pub fn design_factor(&self) -> Result<&str> {
        self.covariates
            .first()
            .map(|c| c.name.as_str())
            .ok_or_else(|| DeaError::parse("metadata has no covariate column to use as design factor"))
    }

    /// Per-sample values of the design factor
    pub fn design_values(&self) -> Result<&[String]> {
        self.covariates
            .first()
            .map(|c| c.values.as_slice())
            .ok_or_else(|| DeaError::parse("metadata has no covariate column to use as design factor"))
    }

    /// Sorted distinct non-missing values of a column
    pub fn levels(&self, name: &str) -> Option<Vec<String>> {
        self.covariate(name).map(|cov| {
            let mut unique: Vec<String> = cov
                .values
                .iter()
                .filter(|v| !is_missing(v))
                .cloned()
                .collect();
            unique.sort();
            unique.dedup();
            unique
        })
    }

    /// Indices of samples whose value in `name` equals `level`
    pub fn samples_with_level(&self, name: &str, level: &str) -> Vec<usize> {
        self.covariate(name)
            .map(|cov| {
                cov.values
                    .iter()
                    .enumerate()
                    .filter(|(_, v)| v.as_str() == level)
                    .map(|(i, _)| i)
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Reorder and subset rows to exactly `sample_ids`
    ///
    /// Metadata rows for samples absent from `sample_ids` are dropped.
    pub fn align_index(&self, sample_ids: &[String]) -> Result<Self> {
        let position: HashMap<&str, usize> = self
            .sample_ids
            .iter()
            .enumerate()
            .map(|(i, id)| (id.as_str(), i))
            .collect();

        let indices = sample_ids
            .iter()
            .map(|id| {
                position.get(id.as_str()).copied().ok_or_else(|| {
                    DeaError::parse(format!("sample '{}' from the count matrix has no metadata row", id))
                })
            })
            .collect::<Result<Vec<usize>>>()?;

        let dropped = self.sample_ids.len() - indices.len();
        if dropped > 0 {
            log::debug!("Dropped {} metadata rows without counts", dropped);
        }

        Ok(self.subset(&indices))
    }

    /// Keep the given rows, in the given order
    pub fn subset(&self, sample_indices: &[usize]) -> Self {
        Self {
            sample_ids: sample_indices.iter().map(|&i| self.sample_ids[i].clone()).collect(),
            covariates: self.covariates.iter().map(|c| c.pick(sample_indices)).collect(),
        }
    }
}
