//! offsets.rs – variable 5' P-site offset table
//!
//! Two tab-separated columns: read length, 5' offset. Read lengths are
//! taken after trimming 5' mismatches, and the accepted lengths for the
//! whole run are exactly the lengths listed here. Each listed offset is
//! expanded per mismatch count: a read with `nmis` trimmed mismatches is
//! shifted by `offset + nmis`, as though the trimmed bases were absent.

use std::collections::HashMap;
use std::path::Path;

use tracing::info;

use crate::error::{RegressError, RegressResult};

#[derive(Debug, Clone)]
pub struct OffsetTable {
    shifts: HashMap<(u32, u8), i64>,
    rdlens: Vec<u32>,
    max5mis: u8,
}

impl OffsetTable {
    pub fn from_file(path: &Path, max5mis: u8) -> RegressResult<OffsetTable> {
        let mut reader = csv::ReaderBuilder::new()
            .delimiter(b'\t')
            .has_headers(false)
            .flexible(false)
            .from_path(path)?;

        let mut shifts = HashMap::new();
        let mut rdlens: Vec<u32> = Vec::new();
        for (lineno, record) in reader.records().enumerate() {
            let record = record.map_err(RegressError::OffsetParse)?;
            if record.len() < 2 {
                return Err(RegressError::Configuration(format!(
                    "offset table line {}: expected 2 columns, found {}",
                    lineno + 1,
                    record.len()
                )));
            }
            let rdlen: u32 = record[0].trim().parse().map_err(|_| {
                RegressError::Configuration(format!(
                    "offset table line {}: unparseable read length '{}'",
                    lineno + 1,
                    &record[0]
                ))
            })?;
            let offset: i64 = record[1].trim().parse().map_err(|_| {
                RegressError::Configuration(format!(
                    "offset table line {}: unparseable offset '{}'",
                    lineno + 1,
                    &record[1]
                ))
            })?;
            if rdlens.contains(&rdlen) {
                return Err(RegressError::Configuration(format!(
                    "offset table line {}: duplicate read length {}",
                    lineno + 1,
                    rdlen
                )));
            }
            for nmis in 0..=max5mis {
                shifts.insert((rdlen, nmis), offset + nmis as i64);
            }
            rdlens.push(rdlen);
        }
        if rdlens.is_empty() {
            return Err(RegressError::Configuration(
                "offset table contains no read lengths".to_string(),
            ));
        }
        rdlens.sort_unstable();
        info!(
            "Loaded P-site offsets for {} read lengths (max 5' mismatches {})",
            rdlens.len(),
            max5mis
        );
        Ok(OffsetTable {
            shifts,
            rdlens,
            max5mis,
        })
    }

    /// Accepted read lengths, sorted ascending; one profile bin per length.
    pub fn rdlens(&self) -> &[u32] {
        &self.rdlens
    }

    pub fn nbins(&self) -> usize {
        self.rdlens.len()
    }

    pub fn bin_of(&self, rdlen: u32) -> Option<usize> {
        self.rdlens.binary_search(&rdlen).ok()
    }

    pub fn shift(&self, rdlen: u32, nmis: u8) -> Option<i64> {
        self.shifts.get(&(rdlen, nmis)).copied()
    }

    #[cfg(test)]
    pub fn from_entries(entries: &[(u32, i64)], max5mis: u8) -> OffsetTable {
        let mut shifts = HashMap::new();
        let mut rdlens = Vec::new();
        for &(rdlen, offset) in entries {
            for nmis in 0..=max5mis {
                shifts.insert((rdlen, nmis), offset + nmis as i64);
            }
            rdlens.push(rdlen);
        }
        rdlens.sort_unstable();
        OffsetTable {
            shifts,
            rdlens,
            max5mis,
        }
    }

    /// Every accepted (read length, mismatch count) key.
    pub fn keys(&self) -> impl Iterator<Item = (u32, u8)> + '_ {
        self.rdlens
            .iter()
            .flat_map(move |&rdlen| (0..=self.max5mis).map(move |nmis| (rdlen, nmis)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_table(content: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(content.as_bytes()).unwrap();
        file
    }

    #[test]
    fn expands_offsets_per_mismatch() {
        let file = write_table("28\t12\n29\t13\n");
        let table = OffsetTable::from_file(file.path(), 1).unwrap();
        assert_eq!(table.rdlens(), &[28, 29]);
        assert_eq!(table.shift(28, 0), Some(12));
        assert_eq!(table.shift(28, 1), Some(13));
        assert_eq!(table.shift(29, 1), Some(14));
        assert_eq!(table.shift(30, 0), None);
        assert_eq!(table.keys().count(), 4);
    }

    #[test]
    fn malformed_rows_are_configuration_errors() {
        let file = write_table("28\ttwelve\n");
        match OffsetTable::from_file(file.path(), 1) {
            Err(RegressError::Configuration(_)) => {}
            other => panic!("expected configuration error, got {:?}", other.map(|_| ())),
        }
    }

    #[test]
    fn empty_table_rejected() {
        let file = write_table("");
        assert!(OffsetTable::from_file(file.path(), 0).is_err());
    }
}
