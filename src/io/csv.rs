//! CSV reading for count matrices and sample metadata

use std::collections::HashSet;
use std::fs::File;
use std::io::Read;
use std::path::Path;

use ndarray::Array2;

use crate::data::{CountMatrix, Covariate, SampleMetadata};
use crate::error::{DeaError, Result};

/// Strip surrounding quotes the CSV reader left in place (single quotes)
fn strip_quotes(s: &str) -> String {
    let s = s.trim();
    if s.len() >= 2
        && ((s.starts_with('"') && s.ends_with('"')) || (s.starts_with('\'') && s.ends_with('\'')))
    {
        s[1..s.len() - 1].to_string()
    } else {
        s.to_string()
    }
}

/// A parsed table: header names after the index column, row ids, and raw cells
struct RawTable {
    columns: Vec<String>,
    row_ids: Vec<String>,
    cells: Vec<Vec<String>>,
}

fn read_raw_table<R: Read>(mut reader: R, what: &str) -> Result<RawTable> {
    let mut text = String::new();
    reader
        .read_to_string(&mut text)
        .map_err(|e| DeaError::parse(format!("{} is not valid UTF-8 text: {}", what, e)))?;

    let header_line = text.lines().find(|l| !l.trim().is_empty()).ok_or_else(|| {
        DeaError::parse(format!("{} is empty", what))
    })?;
    let delimiter = if header_line.contains('\t') { b'\t' } else { b',' };

    let mut csv_reader = csv::ReaderBuilder::new()
        .delimiter(delimiter)
        .has_headers(true)
        .trim(csv::Trim::All)
        .from_reader(text.as_bytes());

    let header = csv_reader
        .headers()
        .map_err(|e| DeaError::parse(format!("malformed {} header: {}", what, e)))?
        .clone();
    if header.len() < 2 {
        return Err(DeaError::parse(format!(
            "{} header needs an index column and at least one data column",
            what
        )));
    }
    let columns: Vec<String> = header.iter().skip(1).map(strip_quotes).collect();

    let mut row_ids = Vec::new();
    let mut cells = Vec::new();
    let mut seen = HashSet::new();

    for (line_no, record) in csv_reader.records().enumerate() {
        let record = record.map_err(|e| DeaError::parse(format!("malformed {}: {}", what, e)))?;
        if record.iter().all(|f| f.is_empty()) {
            continue;
        }

        let id = strip_quotes(&record[0]);
        if id.is_empty() {
            return Err(DeaError::parse(format!("{} row {} has an empty identifier", what, line_no + 2)));
        }
        if !seen.insert(id.clone()) {
            return Err(DeaError::parse(format!("duplicate identifier '{}' in {}", id, what)));
        }

        row_ids.push(id);
        cells.push(record.iter().skip(1).map(strip_quotes).collect());
    }

    if row_ids.is_empty() {
        return Err(DeaError::parse(format!("{} has no data rows", what)));
    }

    Ok(RawTable { columns, row_ids, cells })
}

/// Parse one count cell; `12` and `12.0` are accepted, negatives and fractions are not
fn parse_count(value: &str, feature: &str, sample: &str) -> Result<f64> {
    let parsed = value.parse::<f64>().map_err(|_| {
        DeaError::parse(format!(
            "invalid count '{}' for feature '{}' in sample '{}'",
            value, feature, sample
        ))
    })?;
    if !parsed.is_finite() || parsed < 0.0 || parsed.fract() != 0.0 {
        return Err(DeaError::parse(format!(
            "count '{}' for feature '{}' in sample '{}' is not a non-negative integer",
            value, feature, sample
        )));
    }
    Ok(parsed)
}

/// Read a count table: first column feature ids, header row sample ids
pub fn read_count_table<R: Read>(reader: R) -> Result<CountMatrix> {
    let table = read_raw_table(reader, "count table")?;

    let mut seen = HashSet::new();
    for sample in &table.columns {
        if !seen.insert(sample.as_str()) {
            return Err(DeaError::parse(format!("duplicate sample '{}' in count table header", sample)));
        }
    }

    let n_features = table.row_ids.len();
    let n_samples = table.columns.len();
    let mut counts = Array2::zeros((n_features, n_samples));

    for (i, row) in table.cells.iter().enumerate() {
        for (j, cell) in row.iter().enumerate() {
            counts[[i, j]] = parse_count(cell, &table.row_ids[i], &table.columns[j])?;
        }
    }

    log::debug!("Read count table with {} features and {} samples", n_features, n_samples);
    CountMatrix::from_features_by_rows(counts, table.row_ids, table.columns)
}

/// Read a metadata table: first column sample ids, remaining columns covariates
pub fn read_metadata_table<R: Read>(reader: R) -> Result<SampleMetadata> {
    let table = read_raw_table(reader, "metadata table")?;

    let covariates = table
        .columns
        .iter()
        .enumerate()
        .map(|(j, name)| {
            let values = table.cells.iter().map(|row| row[j].clone()).collect();
            Covariate::new(name.clone(), values)
        })
        .collect();

    SampleMetadata::new(table.row_ids, covariates)
}

/// Read a count matrix from a CSV or TSV file
pub fn read_count_matrix<P: AsRef<Path>>(path: P) -> Result<CountMatrix> {
    read_count_table(File::open(path)?)
}

/// Read sample metadata from a CSV or TSV file
pub fn read_metadata<P: AsRef<Path>>(path: P) -> Result<SampleMetadata> {
    read_metadata_table(File::open(path)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::CovariateKind;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_read_count_matrix() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "gene_id\ts1\ts2\ts3").unwrap();
        writeln!(file, "gene1\t100\t200\t150").unwrap();
        writeln!(file, "gene2\t50\t75.0\t60").unwrap();

        let matrix = read_count_matrix(file.path()).unwrap();
        assert_eq!(matrix.n_features(), 2);
        assert_eq!(matrix.n_samples(), 3);
        assert_eq!(matrix.counts()[[1, 1]], 75.0);
    }

    #[test]
    fn test_read_quoted_comma_table() {
        let text = "\"\",\"A1\",\"B1\"\n\"g1\",1,2\n'g2',3,4\n";
        let matrix = read_count_table(text.as_bytes()).unwrap();
        assert_eq!(matrix.sample_ids(), &["A1".to_string(), "B1".to_string()]);
        assert_eq!(matrix.feature_ids(), &["g1".to_string(), "g2".to_string()]);
    }

    #[test]
    fn test_invalid_count_cells() {
        for bad in ["-1", "1.5", "abc", ""] {
            let text = format!("id,s1,s2\ng1,3,{}\n", bad);
            let result = read_count_table(text.as_bytes());
            assert!(matches!(result, Err(DeaError::Parse { .. })), "accepted '{}'", bad);
        }
    }

    #[test]
    fn test_ragged_rows_rejected() {
        let result = read_count_table("id,s1,s2\ng1,3\n".as_bytes());
        assert!(matches!(result, Err(DeaError::Parse { .. })));
    }

    #[test]
    fn test_empty_and_header_only_rejected() {
        assert!(matches!(read_count_table("".as_bytes()), Err(DeaError::Parse { .. })));
        assert!(matches!(read_count_table("id,s1\n".as_bytes()), Err(DeaError::Parse { .. })));
        assert!(matches!(read_metadata_table("sample\n".as_bytes()), Err(DeaError::Parse { .. })));
    }

    #[test]
    fn test_duplicate_feature_rejected() {
        let result = read_count_table("id,s1\ng1,1\ng1,2\n".as_bytes());
        assert!(matches!(result, Err(DeaError::Parse { .. })));
    }

    #[test]
    fn test_read_metadata() {
        let text = "sample,condition,batch,rin\nA1,A,b1,7.5\nB1,B,b2,NA\n";
        let meta = read_metadata_table(text.as_bytes()).unwrap();
        assert_eq!(meta.n_samples(), 2);
        assert_eq!(meta.design_factor().unwrap(), "condition");
        assert_eq!(meta.covariate("batch").unwrap().kind(), CovariateKind::Categorical);
        assert_eq!(meta.covariate("rin").unwrap().kind(), CovariateKind::Continuous);
    }
}
