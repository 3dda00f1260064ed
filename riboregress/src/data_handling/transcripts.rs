//! transcripts.rs – BED transcript models and family membership
//!
//! Transcripts arrive as BED12 (spliced exon blocks); a two-column table
//! maps transcript id to transcript family id. Both are read fully into
//! memory up front and stay immutable for the rest of the run.

use std::collections::HashMap;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;

use tracing::info;

use crate::error::{RegressError, RegressResult};
use crate::models::Strand;

/// One spliced transcript: genomic exon segments, ascending and disjoint.
#[derive(Debug, Clone)]
pub struct Transcript {
    pub tid: String,
    pub chrom: String,
    pub strand: Strand,
    /// Half-open genomic [start, end) exon segments, sorted ascending.
    pub exons: Vec<(i64, i64)>,
}

impl Transcript {
    /// Parse one BED line. BED12 lines use the block columns; shorter BED
    /// lines describe a single unspliced segment.
    pub fn from_bed(line: &str) -> RegressResult<Transcript> {
        let fields: Vec<&str> = line.split_whitespace().collect();
        if fields.len() < 6 {
            return Err(RegressError::InputIntegrity(format!(
                "BED line has {} fields, need at least 6: '{}'",
                fields.len(),
                line.trim_end()
            )));
        }
        let chrom = fields[0].to_string();
        let start: i64 = parse_bed_int(fields[1], line)?;
        let end: i64 = parse_bed_int(fields[2], line)?;
        let tid = fields[3].to_string();
        let strand = Strand::from_symbol(fields[5]).ok_or_else(|| {
            RegressError::InputIntegrity(format!("BED line has bad strand '{}'", fields[5]))
        })?;

        let exons = if fields.len() >= 12 {
            let sizes = parse_bed_list(fields[10], line)?;
            let starts = parse_bed_list(fields[11], line)?;
            if sizes.len() != starts.len() {
                return Err(RegressError::InputIntegrity(format!(
                    "BED line for {}: blockSizes/blockStarts length mismatch",
                    tid
                )));
            }
            sizes
                .iter()
                .zip(starts.iter())
                .map(|(&size, &off)| (start + off, start + off + size))
                .collect()
        } else {
            vec![(start, end)]
        };
        Ok(Transcript {
            tid,
            chrom,
            strand,
            exons,
        })
    }

    /// Spliced length in nucleotides.
    pub fn len(&self) -> usize {
        self.exons
            .iter()
            .map(|&(start, end)| (end - start) as usize)
            .sum()
    }

    /// All covered genomic positions, ascending.
    pub fn position_set(&self) -> Vec<i64> {
        let mut positions = Vec::with_capacity(self.len());
        for &(start, end) in &self.exons {
            positions.extend(start..end);
        }
        positions
    }

    /// Covered genomic positions in transcript (5'→3') order: ascending on
    /// the forward strand, descending on the reverse strand.
    pub fn local_positions(&self) -> Vec<i64> {
        let mut positions = self.position_set();
        if self.strand == Strand::Reverse {
            positions.reverse();
        }
        positions
    }
}

fn parse_bed_int(field: &str, line: &str) -> RegressResult<i64> {
    field.parse().map_err(|_| {
        RegressError::InputIntegrity(format!(
            "BED line has unparseable coordinate '{}': '{}'",
            field,
            line.trim_end()
        ))
    })
}

fn parse_bed_list(field: &str, line: &str) -> RegressResult<Vec<i64>> {
    field
        .trim_end_matches(',')
        .split(',')
        .map(|v| parse_bed_int(v, line))
        .collect()
}

/// All transcripts of the run, hashed by id.
pub struct TranscriptTable {
    by_tid: HashMap<String, Transcript>,
}

impl TranscriptTable {
    pub fn from_bed_file(path: &Path) -> RegressResult<TranscriptTable> {
        let reader = BufReader::new(File::open(path)?);
        let mut by_tid = HashMap::new();
        for line in reader.lines() {
            let line = line?;
            if line.trim().is_empty() || line.starts_with('#') {
                continue;
            }
            let transcript = Transcript::from_bed(&line)?;
            by_tid.insert(transcript.tid.clone(), transcript);
        }
        if by_tid.is_empty() {
            return Err(RegressError::InputIntegrity(
                "transcript BED input is empty".to_string(),
            ));
        }
        info!("Loaded {} transcripts", by_tid.len());
        Ok(TranscriptTable { by_tid })
    }

    pub fn get(&self, tid: &str) -> Option<&Transcript> {
        self.by_tid.get(tid)
    }

    pub fn len(&self) -> usize {
        self.by_tid.len()
    }

    #[cfg(test)]
    pub fn from_transcripts(transcripts: Vec<Transcript>) -> TranscriptTable {
        TranscriptTable {
            by_tid: transcripts
                .into_iter()
                .map(|t| (t.tid.clone(), t))
                .collect(),
        }
    }
}

/// Transcript id → family id membership, precomputed externally.
pub struct FamilyTable {
    tfam_of: HashMap<String, String>,
}

impl FamilyTable {
    /// Two whitespace-separated columns: transcript id, family id.
    pub fn from_file(path: &Path) -> RegressResult<FamilyTable> {
        let reader = BufReader::new(File::open(path)?);
        let mut tfam_of = HashMap::new();
        for line in reader.lines() {
            let line = line?;
            let mut fields = line.split_whitespace();
            match (fields.next(), fields.next()) {
                (Some(tid), Some(tfam)) => {
                    tfam_of.insert(tid.to_string(), tfam.to_string());
                }
                (None, _) => continue,
                _ => {
                    return Err(RegressError::InputIntegrity(format!(
                        "family table line missing columns: '{}'",
                        line.trim_end()
                    )))
                }
            }
        }
        if tfam_of.is_empty() {
            return Err(RegressError::InputIntegrity(
                "family membership table is empty".to_string(),
            ));
        }
        info!("Loaded family membership for {} transcripts", tfam_of.len());
        Ok(FamilyTable { tfam_of })
    }

    pub fn family_of(&self, tid: &str) -> Option<&str> {
        self.tfam_of.get(tid).map(String::as_str)
    }

    #[cfg(test)]
    pub fn from_pairs(pairs: &[(&str, &str)]) -> FamilyTable {
        FamilyTable {
            tfam_of: pairs
                .iter()
                .map(|&(tid, tfam)| (tid.to_string(), tfam.to_string()))
                .collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bed12_blocks_become_exons() {
        let line = "chr1\t100\t400\ttx1\t0\t+\t100\t400\t0\t2\t50,100,\t0,200,";
        let t = Transcript::from_bed(line).unwrap();
        assert_eq!(t.exons, vec![(100, 150), (300, 400)]);
        assert_eq!(t.len(), 150);
        let positions = t.position_set();
        assert_eq!(positions.len(), 150);
        assert_eq!(positions[0], 100);
        assert_eq!(positions[50], 300);
    }

    #[test]
    fn reverse_strand_local_order_descends() {
        let line = "chr1\t100\t160\ttx1\t0\t-";
        let t = Transcript::from_bed(line).unwrap();
        let local = t.local_positions();
        assert_eq!(local[0], 159);
        assert_eq!(*local.last().unwrap(), 100);
    }

    #[test]
    fn bad_strand_rejected() {
        assert!(Transcript::from_bed("chr1\t0\t10\ttx\t0\t.").is_err());
    }
}
