//! alignment.rs – P-site-shifted read count store
//!
//! The regression never touches alignment records directly; it sees an
//! opaque store answering one query: for a set of genomic positions on a
//! strand, the read count at each position keyed by (read length, trimmed
//! 5' mismatches). Counts are loaded from a tab-separated table of 5'-end
//! positions and shifted to P-site coordinates on the way in, using the
//! offset table; keys outside the accepted (length, mismatch) set are
//! discarded at load.

use std::collections::HashMap;
use std::path::Path;

use polars::prelude::*;
use tracing::info;

use crate::error::{RegressError, RegressResult};
use crate::helper_functions::read_tsv;
use crate::models::Strand;

use super::offsets::OffsetTable;

type PositionCounts = HashMap<i64, f64>;

pub struct TableReadSource {
    counts: HashMap<(String, Strand), HashMap<(u32, u8), PositionCounts>>,
}

impl TableReadSource {
    /// Columns: chrom, strand, fivep_pos, rdlen, nmis, count. `fivep_pos`
    /// is the genomic position of the read's 5' end after mismatch
    /// trimming; the stored position is the estimated P-site,
    /// `fivep_pos ± shift` along the read's strand.
    pub fn from_table(path: &Path, offsets: &OffsetTable) -> RegressResult<TableReadSource> {
        let df = read_tsv(path)?;
        let chrom = df.column("chrom")?.str()?;
        let strand = df.column("strand")?.str()?;
        let fivep = df.column("fivep_pos")?.i64()?;
        let rdlen = df.column("rdlen")?.i64()?;
        let nmis = df.column("nmis")?.i64()?;
        // integral counts parse as i64
        let count = df.column("count")?.cast(&DataType::Float64)?;
        let count = count.f64()?;

        let mut counts: HashMap<(String, Strand), HashMap<(u32, u8), PositionCounts>> =
            HashMap::new();
        let mut kept = 0usize;
        for i in 0..df.height() {
            let (Some(chrom), Some(strand), Some(pos), Some(rdlen), Some(nmis), Some(count)) = (
                chrom.get(i),
                strand.get(i),
                fivep.get(i),
                rdlen.get(i),
                nmis.get(i),
                count.get(i),
            ) else {
                return Err(RegressError::InputIntegrity(format!(
                    "read count table row {}: null field",
                    i
                )));
            };
            let strand = Strand::from_symbol(strand).ok_or_else(|| {
                RegressError::InputIntegrity(format!(
                    "read count table row {}: bad strand '{}'",
                    i, strand
                ))
            })?;
            let key = (rdlen as u32, nmis as u8);
            // reads outside the accepted length/mismatch set never count
            let Some(shift) = offsets.shift(key.0, key.1) else {
                continue;
            };
            let psite = match strand {
                Strand::Forward => pos + shift,
                Strand::Reverse => pos - shift,
            };
            *counts
                .entry((chrom.to_string(), strand))
                .or_default()
                .entry(key)
                .or_default()
                .entry(psite)
                .or_insert(0.0) += count;
            kept += 1;
        }
        if kept == 0 {
            return Err(RegressError::InputIntegrity(
                "read count table holds no reads at accepted lengths".to_string(),
            ));
        }
        info!("Loaded {} read count rows", kept);
        Ok(TableReadSource { counts })
    }

    /// Counts at each of `positions`, keyed by (read length, mismatches).
    /// Every accepted key is present in the result, with a vector aligned
    /// to `positions`; absent positions contribute zero.
    pub fn hashed_counts(
        &self,
        chrom: &str,
        strand: Strand,
        positions: &[i64],
        offsets: &OffsetTable,
    ) -> HashMap<(u32, u8), Vec<f64>> {
        let per_key = self.counts.get(&(chrom.to_string(), strand));
        offsets
            .keys()
            .map(|key| {
                let row = match per_key.and_then(|m| m.get(&key)) {
                    Some(positional) => positions
                        .iter()
                        .map(|pos| positional.get(pos).copied().unwrap_or(0.0))
                        .collect(),
                    None => vec![0.0; positions.len()],
                };
                (key, row)
            })
            .collect()
    }

    #[cfg(test)]
    pub fn from_entries(
        entries: &[(&str, Strand, i64, u32, u8, f64)],
        offsets: &OffsetTable,
    ) -> TableReadSource {
        let mut counts: HashMap<(String, Strand), HashMap<(u32, u8), PositionCounts>> =
            HashMap::new();
        for &(chrom, strand, psite, rdlen, nmis, count) in entries {
            if offsets.shift(rdlen, nmis).is_none() {
                continue;
            }
            *counts
                .entry((chrom.to_string(), strand))
                .or_default()
                .entry((rdlen, nmis))
                .or_default()
                .entry(psite)
                .or_insert(0.0) += count;
        }
        TableReadSource { counts }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn offsets() -> OffsetTable {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(b"28\t12\n").unwrap();
        OffsetTable::from_file(file.path(), 1).unwrap()
    }

    #[test]
    fn shift_applied_along_strand() {
        let offsets = offsets();
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("reads.tsv");
        std::fs::write(
            &path,
            "chrom\tstrand\tfivep_pos\trdlen\tnmis\tcount\n\
             chr1\t+\t100\t28\t0\t2\n\
             chr1\t-\t100\t28\t0\t3\n\
             chr1\t+\t100\t31\t0\t9\n",
        )
        .unwrap();
        let source = TableReadSource::from_table(&path, &offsets).unwrap();

        let fwd = source.hashed_counts("chr1", Strand::Forward, &[112, 100], &offsets);
        assert_eq!(fwd[&(28, 0)], vec![2.0, 0.0]);
        // nmis = 1 key exists even with no reads under it
        assert_eq!(fwd[&(28, 1)], vec![0.0, 0.0]);

        let rev = source.hashed_counts("chr1", Strand::Reverse, &[88], &offsets);
        assert_eq!(rev[&(28, 0)], vec![3.0]);
    }

    #[test]
    fn unaccepted_lengths_rejected_entirely() {
        let offsets = offsets();
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("reads.tsv");
        std::fs::write(
            &path,
            "chrom\tstrand\tfivep_pos\trdlen\tnmis\tcount\nchr1\t+\t100\t35\t0\t2\n",
        )
        .unwrap();
        assert!(TableReadSource::from_table(&path, &offsets).is_err());
    }
}
