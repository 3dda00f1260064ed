//! family.rs – shared coordinate frame for one transcript family
//!
//! All transcripts of a family compete for the same reads, so their
//! candidate ORFs are fit jointly against one observation vector. The
//! frame is the union of covered genomic positions in 5'→3' family order,
//! with a per-transcript map from local (start-relative) coordinates to
//! frame indices; isoforms sharing exons thereby aggregate reads over the
//! same genomic positions.

use std::collections::{BTreeSet, HashMap};

use ndarray::Array1;

use crate::error::{RegressError, RegressResult};
use crate::models::{CandidateOrf, RunContext, Strand};

pub struct FamilyFrame {
    pub tfam: String,
    pub chrom: String,
    pub strand: Strand,
    /// Genomic positions covered by any member transcript, 5'→3'.
    pub grid: Vec<i64>,
    /// Per transcript: frame index of each local position, 5'→3'.
    pub tid_indices: HashMap<String, Vec<usize>>,
    /// Per transcript: spliced length.
    pub tlens: HashMap<String, usize>,
}

impl FamilyFrame {
    pub fn positions(&self) -> usize {
        self.grid.len()
    }
}

/// Build the frame from the transcripts carrying this family's candidates.
pub fn assemble_family_frame(
    ctx: &RunContext,
    tfam: &str,
    orfs: &[CandidateOrf],
) -> RegressResult<FamilyFrame> {
    let chrom = orfs[0].chrom.clone();
    let strand = orfs[0].strand;

    let mut tids: Vec<&str> = orfs.iter().map(|orf| orf.tid.as_str()).collect();
    tids.sort_unstable();
    tids.dedup();

    let mut union: BTreeSet<i64> = BTreeSet::new();
    let mut locals: HashMap<String, Vec<i64>> = HashMap::new();
    let mut tlens: HashMap<String, usize> = HashMap::new();
    for tid in &tids {
        let transcript = ctx.transcripts.get(tid).ok_or_else(|| {
            RegressError::AssemblyConsistency {
                tfam: tfam.to_string(),
                msg: format!("transcript {} not in BED input", tid),
            }
        })?;
        let local = transcript.local_positions();
        union.extend(local.iter().copied());
        tlens.insert(tid.to_string(), local.len());
        locals.insert(tid.to_string(), local);
    }

    let mut grid: Vec<i64> = union.into_iter().collect();
    if strand == Strand::Reverse {
        grid.reverse();
    }
    let index_of: HashMap<i64, usize> = grid
        .iter()
        .enumerate()
        .map(|(idx, &pos)| (pos, idx))
        .collect();

    let mut tid_indices = HashMap::with_capacity(locals.len());
    for (tid, local) in locals {
        let indices: Vec<usize> = local.iter().map(|pos| index_of[pos]).collect();
        tid_indices.insert(tid, indices);
    }

    Ok(FamilyFrame {
        tfam: tfam.to_string(),
        chrom,
        strand,
        grid,
        tid_indices,
        tlens,
    })
}

/// Observed counts over the frame, summed across mismatch bins:
/// row-major [bins × positions] flattened to `bin * positions + index`.
pub fn observed_counts(ctx: &RunContext, frame: &FamilyFrame) -> Array1<f64> {
    let nnt = frame.positions();
    let nbins = ctx.offsets.nbins();
    let hashed = ctx
        .reads
        .hashed_counts(&frame.chrom, frame.strand, &frame.grid, &ctx.offsets);
    let mut counts = Array1::<f64>::zeros(nbins * nnt);
    for ((rdlen, _nmis), row) in &hashed {
        let Some(bin) = ctx.offsets.bin_of(*rdlen) else {
            continue;
        };
        for (j, v) in row.iter().enumerate() {
            counts[bin * nnt + j] += v;
        }
    }
    counts
}

/// Total reads within one nt of a candidate's start codon, summed over
/// all read-length bins.
pub fn start_codon_reads(counts: &Array1<f64>, frame: &FamilyFrame, orf: &CandidateOrf) -> f64 {
    let nnt = frame.positions();
    let nbins = counts.len() / nnt;
    let indices = &frame.tid_indices[&orf.tid];
    let lo = (orf.tcoord - 1).max(0) as usize;
    let hi = ((orf.tcoord + 2) as usize).min(indices.len());
    let mut total = 0.0;
    for &idx in &indices[lo..hi] {
        for bin in 0..nbins {
            total += counts[bin * nnt + idx];
        }
    }
    total
}
