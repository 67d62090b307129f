//! Text artifact of a run: `key: value` scalars followed by the filtered result table
//!
//! ```text
//! format_version: 1
//! counts_file: counts.csv
//! ...
//! matrice:
//! Geneid  baseMean  log2FoldChange  lfcSE  stat  pvalue  padj
//! gene1   ...
//! ```

use std::str::FromStr;

use crate::error::{DeaError, Result};
use crate::testing::{ResultRow, ResultSummary};

pub const FORMAT_VERSION: u32 = 1;
/// Marker line preceding the table
pub const TABLE_MARKER: &str = "matrice:";
pub const TABLE_COLUMNS: [&str; 7] = ["Geneid", "baseMean", "log2FoldChange", "lfcSE", "stat", "pvalue", "padj"];

/// Everything written into an artifact
#[derive(Debug, Clone, PartialEq)]
pub struct ArtifactContent {
    pub counts_file: String,
    pub metadata_file: String,
    pub refit_cooks: bool,
    pub min_reads_per_gene: u64,
    pub design_factor: String,
    /// Contrast numerator
    pub condition_1: String,
    /// Contrast denominator
    pub condition_2: String,
    pub alpha_thres: f64,
    pub lfc_thres: f64,
    pub summary: ResultSummary,
    /// Filtered result rows
    pub rows: Vec<ResultRow>,
}

/// Scalar values are written verbatim; line breaks would end the entry early
fn one_line(value: &str) -> String {
    value.replace(['\r', '\n'], " ")
}

impl ArtifactContent {
    /// Scalars in serialization order
    pub fn scalars(&self) -> Vec<(&'static str, String)> {
        vec![
            ("format_version", FORMAT_VERSION.to_string()),
            ("counts_file", one_line(&self.counts_file)),
            ("metadata_file", one_line(&self.metadata_file)),
            ("refit_cooks", self.refit_cooks.to_string()),
            ("min_reads_per_gene", self.min_reads_per_gene.to_string()),
            ("design_factor", one_line(&self.design_factor)),
            ("condition_1", one_line(&self.condition_1)),
            ("condition_2", one_line(&self.condition_2)),
            ("alpha_thres", self.alpha_thres.to_string()),
            ("lfc_thres", self.lfc_thres.to_string()),
            ("genes_total", self.summary.total.to_string()),
            ("genes_tested", self.summary.tested.to_string()),
            ("genes_significant", self.summary.significant.to_string()),
            ("genes_up", self.summary.up.to_string()),
            ("genes_down", self.summary.down.to_string()),
        ]
    }
}

/// Shortest text that parses back to the same value; tiny p-values use exponents
fn number(value: f64) -> String {
    format!("{:?}", value)
}

/// Fixed-width table with one header line; ids left-aligned, numbers right-aligned
pub fn render_table(rows: &[ResultRow]) -> String {
    let cells: Vec<[String; 7]> = rows
        .iter()
        .map(|r| {
            [
                r.feature_id.clone(),
                number(r.base_mean),
                number(r.log2_fold_change),
                number(r.lfc_se),
                number(r.stat),
                number(r.pvalue),
                number(r.padj),
            ]
        })
        .collect();

    let mut widths: Vec<usize> = TABLE_COLUMNS.iter().map(|c| c.len()).collect();
    for row in &cells {
        for (w, cell) in widths.iter_mut().zip(row.iter()) {
            *w = (*w).max(cell.len());
        }
    }

    let format_line = |values: &[&str]| -> String {
        let mut line = format!("{:<width$}", values[0], width = widths[0]);
        for (value, &width) in values[1..].iter().zip(&widths[1..]) {
            line.push_str(&format!("  {:>width$}", value, width = width));
        }
        line.trim_end().to_string()
    };

    let mut out = format_line(&TABLE_COLUMNS);
    for row in &cells {
        let values: Vec<&str> = row.iter().map(String::as_str).collect();
        out.push('\n');
        out.push_str(&format_line(&values));
    }
    out
}

/// Serialize a run into its artifact text
pub fn serialize(content: &ArtifactContent) -> String {
    let mut text = String::new();
    for (key, value) in content.scalars() {
        text.push_str(key);
        text.push_str(": ");
        text.push_str(&value);
        text.push('\n');
    }
    text.push_str(TABLE_MARKER);
    text.push('\n');
    text.push_str(&render_table(&content.rows));
    text.push('\n');
    text
}

/// Parsed artifact
#[derive(Debug, Clone, PartialEq)]
pub struct ResultView {
    /// Scalars in file order
    pub scalars: Vec<(String, String)>,
    /// Table text under the canonical header
    pub table: String,
    pub rows: Vec<ResultRow>,
}

impl ResultView {
    pub fn get(&self, key: &str) -> Option<&str> {
        self.scalars
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    /// Scalar parsed into a typed value
    pub fn value<T: FromStr>(&self, key: &str) -> Result<T> {
        let raw = self
            .get(key)
            .ok_or_else(|| DeaError::parse(format!("artifact has no '{}' entry", key)))?;
        raw.parse()
            .map_err(|_| DeaError::parse(format!("artifact entry '{}' has invalid value '{}'", key, raw)))
    }

    /// Table as CSV with the canonical column names
    pub fn to_csv(&self) -> Result<String> {
        let mut writer = csv::Writer::from_writer(Vec::new());
        if self.rows.is_empty() {
            writer.write_record(TABLE_COLUMNS)?;
        }
        for row in &self.rows {
            writer.serialize(row)?;
        }
        let bytes = writer
            .into_inner()
            .map_err(|e| DeaError::Io(e.into_error()))?;
        String::from_utf8(bytes).map_err(|e| DeaError::parse(format!("CSV output is not UTF-8: {}", e)))
    }
}

fn parse_row(line: &str) -> Result<ResultRow> {
    let tokens: Vec<&str> = line.split_whitespace().collect();
    if tokens.len() < TABLE_COLUMNS.len() {
        return Err(DeaError::parse(format!("artifact table row has too few columns: '{}'", line)));
    }
    // Identifiers may contain spaces; the last six tokens are numbers
    let split = tokens.len() - 6;
    let value = |s: &str| -> Result<f64> {
        s.parse::<f64>()
            .map_err(|_| DeaError::parse(format!("invalid number '{}' in artifact table", s)))
    };
    Ok(ResultRow {
        feature_id: tokens[..split].join(" "),
        base_mean: value(tokens[split])?,
        log2_fold_change: value(tokens[split + 1])?,
        lfc_se: value(tokens[split + 2])?,
        stat: value(tokens[split + 3])?,
        pvalue: value(tokens[split + 4])?,
        padj: value(tokens[split + 5])?,
    })
}

/// Parse an artifact
///
/// Lines before the table marker are split on their first ':'; only the single space
/// written after the separator is removed from the value. The table's own header line
/// is dropped and replaced by the canonical one.
pub fn parse(text: &str) -> Result<ResultView> {
    let lines: Vec<&str> = text.lines().collect();
    let marker = lines
        .iter()
        .position(|l| l.trim() == TABLE_MARKER)
        .ok_or_else(|| DeaError::parse(format!("artifact has no '{}' section", TABLE_MARKER)))?;

    let scalars: Vec<(String, String)> = lines[..marker]
        .iter()
        .filter_map(|line| line.split_once(':'))
        .map(|(k, v)| {
            let v = v.strip_prefix(' ').unwrap_or(v);
            (k.trim().to_string(), v.to_string())
        })
        .collect();

    let data_lines: Vec<&str> = lines[marker + 1..]
        .iter()
        .map(|l| l.trim())
        .filter(|l| !l.is_empty())
        .skip(1)
        .collect();
    let rows = data_lines
        .iter()
        .map(|l| parse_row(l))
        .collect::<Result<Vec<_>>>()?;

    let mut table = TABLE_COLUMNS.join(" ");
    for line in &data_lines {
        table.push('\n');
        table.push_str(line);
    }

    Ok(ResultView { scalars, table, rows })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn content(rows: Vec<ResultRow>) -> ArtifactContent {
        ArtifactContent {
            counts_file: "counts.csv".to_string(),
            metadata_file: "metadata.csv".to_string(),
            refit_cooks: true,
            min_reads_per_gene: 10,
            design_factor: "condition".to_string(),
            condition_1: "treated".to_string(),
            condition_2: "control".to_string(),
            alpha_thres: 0.05,
            lfc_thres: 1.5,
            summary: ResultSummary {
                total: 100,
                tested: 95,
                significant: 12,
                up: 7,
                down: 5,
                outliers: 1,
                alpha: 0.05,
            },
            rows,
        }
    }

    fn sample_rows() -> Vec<ResultRow> {
        vec![
            ResultRow {
                feature_id: "geneA".to_string(),
                base_mean: 1234.5678,
                log2_fold_change: 2.25,
                lfc_se: 0.1234567891,
                stat: 18.2,
                pvalue: 4.5e-74,
                padj: 2.1e-70,
            },
            ResultRow {
                feature_id: "gene B".to_string(),
                base_mean: 12.0,
                log2_fold_change: -3.0,
                lfc_se: 0.5,
                stat: -6.0,
                pvalue: 1.97e-9,
                padj: 3.3e-8,
            },
        ]
    }

    #[test]
    fn test_scalar_round_trip() {
        let original = content(sample_rows());
        let view = parse(&serialize(&original)).unwrap();

        for (key, value) in original.scalars() {
            assert_eq!(view.get(key), Some(value.as_str()), "key {}", key);
        }
        assert_eq!(view.value::<bool>("refit_cooks").unwrap(), original.refit_cooks);
        assert_eq!(view.value::<u64>("min_reads_per_gene").unwrap(), original.min_reads_per_gene);
        assert_eq!(view.value::<f64>("alpha_thres").unwrap(), original.alpha_thres);
        assert_eq!(view.value::<f64>("lfc_thres").unwrap(), original.lfc_thres);
        assert_eq!(view.value::<u32>("format_version").unwrap(), FORMAT_VERSION);
    }

    #[test]
    fn test_rows_and_canonical_header() {
        let original = content(sample_rows());
        let view = parse(&serialize(&original)).unwrap();
        assert_eq!(view.rows, original.rows);
        let first_line = view.table.lines().next().unwrap();
        assert_eq!(first_line, "Geneid baseMean log2FoldChange lfcSE stat pvalue padj");
        assert_eq!(view.table.lines().count(), 3);
    }

    #[test]
    fn test_empty_table() {
        let view = parse(&serialize(&content(Vec::new()))).unwrap();
        assert!(view.rows.is_empty());
        assert_eq!(view.table, TABLE_COLUMNS.join(" "));
        assert_eq!(view.to_csv().unwrap().trim(), TABLE_COLUMNS.join(","));
    }

    #[test]
    fn test_csv_export() {
        let view = parse(&serialize(&content(sample_rows()))).unwrap();
        let csv_text = view.to_csv().unwrap();
        let mut lines = csv_text.lines();
        assert_eq!(lines.next(), Some("Geneid,baseMean,log2FoldChange,lfcSE,stat,pvalue,padj"));
        assert!(lines.next().unwrap().starts_with("geneA,1234.5678,2.25,"));
    }

    #[test]
    fn test_missing_marker_is_parse_error() {
        assert!(matches!(parse("alpha_thres: 0.05\n"), Err(DeaError::Parse { .. })));
        assert!(matches!(parse("counts_file: matrice:x.csv\n"), Err(DeaError::Parse { .. })));
    }

    #[test]
    fn test_whitespace_in_values_is_kept() {
        let mut original = content(Vec::new());
        original.counts_file = "my  counts.csv".to_string();
        original.metadata_file = " meta data.csv  ".to_string();
        original.condition_1 = "treated  A".to_string();
        original.condition_2 = "\tcontrol".to_string();
        let view = parse(&serialize(&original)).unwrap();
        assert_eq!(view.get("counts_file"), Some("my  counts.csv"));
        assert_eq!(view.get("metadata_file"), Some(" meta data.csv  "));
        assert_eq!(view.get("condition_1"), Some("treated  A"));
        assert_eq!(view.get("condition_2"), Some("\tcontrol"));
    }

    #[test]
    fn test_line_breaks_in_values_stay_on_one_line() {
        let mut original = content(sample_rows());
        original.design_factor = "cond\nition\r".to_string();
        let view = parse(&serialize(&original)).unwrap();
        assert_eq!(view.get("design_factor"), Some("cond ition "));
        assert_eq!(view.get("condition_1"), Some("treated"));
        assert_eq!(view.rows, original.rows);
    }
}
