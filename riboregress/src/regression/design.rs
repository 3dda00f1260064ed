//! design.rs – sparse design matrix over a family frame
//!
//! One column per candidate; the nonzero entries of a column are exactly
//! the expected-profile densities over the frame positions the candidate
//! spans, replicated across read-length bins. Pruning never narrows a
//! matrix in place: each stage produces a fresh matrix/candidate pair.

use ndarray::{s, Array1, Array2};

use crate::config::{ABORT_CODON_NT, HISTOP_NT};
use crate::error::{RegressError, RegressResult};
use crate::metagene::ProfileTemplate;
use crate::models::CandidateOrf;

use super::family::FamilyFrame;

/// Compressed sparse columns; `rows` are strictly ascending per column.
#[derive(Debug, Clone)]
pub struct SparseDesignMatrix {
    nrows: usize,
    columns: Vec<SparseColumn>,
}

#[derive(Debug, Clone)]
pub struct SparseColumn {
    pub rows: Vec<usize>,
    pub vals: Vec<f64>,
}

impl SparseDesignMatrix {
    pub fn nrows(&self) -> usize {
        self.nrows
    }

    pub fn ncols(&self) -> usize {
        self.columns.len()
    }

    /// Aᵀb.
    pub fn dot_columns(&self, b: &Array1<f64>) -> Array1<f64> {
        let mut out = Array1::zeros(self.ncols());
        for (c, col) in self.columns.iter().enumerate() {
            let mut acc = 0.0;
            for (&row, &val) in col.rows.iter().zip(&col.vals) {
                acc += val * b[row];
            }
            out[c] = acc;
        }
        out
    }

    /// AᵀA via sorted-row merges; symmetric.
    pub fn normal_matrix(&self) -> Array2<f64> {
        let n = self.ncols();
        let mut ata = Array2::zeros((n, n));
        for i in 0..n {
            for j in i..n {
                let dot = sparse_dot(&self.columns[i], &self.columns[j]);
                ata[[i, j]] = dot;
                ata[[j, i]] = dot;
            }
        }
        ata
    }

    /// New matrix holding only the `keep` columns, in order.
    pub fn select_columns(&self, keep: &[usize]) -> SparseDesignMatrix {
        SparseDesignMatrix {
            nrows: self.nrows,
            columns: keep.iter().map(|&c| self.columns[c].clone()).collect(),
        }
    }

    #[cfg(test)]
    pub fn from_dense(a: &Array2<f64>) -> SparseDesignMatrix {
        let columns = (0..a.ncols())
            .map(|c| {
                let mut rows = Vec::new();
                let mut vals = Vec::new();
                for r in 0..a.nrows() {
                    if a[[r, c]] != 0.0 {
                        rows.push(r);
                        vals.push(a[[r, c]]);
                    }
                }
                SparseColumn { rows, vals }
            })
            .collect();
        SparseDesignMatrix {
            nrows: a.nrows(),
            columns,
        }
    }

    /// Dense copy of one column, for feature-row comparisons in tests.
    #[cfg(test)]
    pub fn dense_column(&self, c: usize) -> Array1<f64> {
        let mut out = Array1::zeros(self.nrows);
        let col = &self.columns[c];
        for (&row, &val) in col.rows.iter().zip(&col.vals) {
            out[row] = val;
        }
        out
    }
}

fn sparse_dot(a: &SparseColumn, b: &SparseColumn) -> f64 {
    let mut acc = 0.0;
    let (mut i, mut j) = (0, 0);
    while i < a.rows.len() && j < b.rows.len() {
        match a.rows[i].cmp(&b.rows[j]) {
            std::cmp::Ordering::Less => i += 1,
            std::cmp::Ordering::Greater => j += 1,
            std::cmp::Ordering::Equal => {
                acc += a.vals[i] * b.vals[j];
                i += 1;
                j += 1;
            }
        }
    }
    acc
}

/// Expand the raw ORF rows into the candidate set to fit: real ORFs
/// deduplicated by name (keeping the row with the longest 5' UTR), one
/// abortive-initiation stub per distinct genomic start, and in full mode
/// one histop stub per distinct genomic stop.
pub fn build_candidate_set(orfs: &[CandidateOrf], start_only: bool) -> Vec<CandidateOrf> {
    let mut real: Vec<CandidateOrf> = orfs.to_vec();
    real.sort_by(|a, b| b.tcoord.cmp(&a.tcoord));
    let mut seen = std::collections::HashSet::new();
    real.retain(|orf| seen.insert(orf.name.clone()));

    let mut candidates = real;

    let mut seen_starts = std::collections::HashSet::new();
    for orf in orfs {
        if !seen_starts.insert(orf.gcoord) {
            continue;
        }
        let mut abort = orf.clone();
        abort.gstop = abort.gcoord; // marker for an abortive stub
        abort.tstop = abort.tcoord + ABORT_CODON_NT;
        abort.name = format!("{}_{}_abort", abort.tfam, abort.gcoord);
        candidates.push(abort);
    }

    if !start_only {
        let mut seen_stops = std::collections::HashSet::new();
        for orf in orfs {
            if !seen_stops.insert(orf.gstop) {
                continue;
            }
            let mut histop = orf.clone();
            histop.gcoord = histop.gstop; // marker for a histop stub
            histop.tcoord = histop.tstop;
            histop.name = format!("{}_{}_stop", histop.tfam, histop.gstop);
            candidates.push(histop);
        }
    }
    candidates
}

/// Scatter every candidate's expected profile into its column.
///
/// A 5' UTR shorter than the start window trims the head of the profile;
/// a 3' UTR shorter than the stop window trims the tail. Trimmed
/// positions are omitted outright. The profile cell count must equal the
/// translated index count for every candidate; a mismatch means the frame
/// and the annotation disagree and the family cannot be fit.
pub fn build_design_matrix(
    frame: &FamilyFrame,
    template: &ProfileTemplate,
    candidates: &[CandidateOrf],
) -> RegressResult<SparseDesignMatrix> {
    let (s0, _s1) = template.start_nt;
    let (_t0, t1) = template.stop_nt;
    let nnt = frame.positions();
    let nbins = template.rdlens.len();
    let stoplen = template.stop.ncols();

    let mut columns = Vec::with_capacity(candidates.len());
    for orf in candidates {
        let indices = frame.tid_indices.get(&orf.tid).ok_or_else(|| mismatch(
            frame,
            orf,
            "transcript missing from family frame".to_string(),
        ))?;
        let tlen = frame.tlens[&orf.tid] as i64;

        let (window, profile) = if !orf.is_histop() {
            let orflen = orf.tstop - orf.tcoord;
            if orflen <= 0 || orflen % 3 != 0 {
                return Err(mismatch(
                    frame,
                    orf,
                    format!("ORF length {} is not a positive codon multiple", orflen),
                ));
            }
            let startadj = (-s0 - orf.tcoord).max(0);
            let stopadj = (orf.tstop + t1 - tlen).max(0);
            let lo = orf.tcoord + s0 + startadj;
            let hi = orf.tstop + t1 - stopadj;
            if lo < 0 || hi > tlen || lo > hi {
                return Err(mismatch(
                    frame,
                    orf,
                    format!("trimmed window [{}, {}) exceeds transcript", lo, hi),
                ));
            }
            let profile = template.expected_profile(orflen);
            let keep = profile.slice(s![
                ..,
                startadj as usize..(template.profile_columns(orflen) - stopadj) as usize
            ]);
            (&indices[lo as usize..hi as usize], keep.to_owned())
        } else {
            if orf.tstop < HISTOP_NT || orf.tstop > tlen {
                return Err(mismatch(
                    frame,
                    orf,
                    format!("histop window ends at {} on a {} nt transcript", orf.tstop, tlen),
                ));
            }
            let lo = (orf.tstop - HISTOP_NT) as usize;
            let profile = template
                .stop
                .slice(s![.., stoplen - HISTOP_NT as usize..])
                .to_owned();
            (&indices[lo..orf.tstop as usize], profile)
        };

        if profile.ncols() != window.len() {
            return Err(mismatch(
                frame,
                orf,
                format!(
                    "profile spans {} positions but {} frame indices translated",
                    profile.ncols(),
                    window.len()
                ),
            ));
        }

        let mut rows = Vec::with_capacity(window.len() * nbins);
        let mut vals = Vec::with_capacity(window.len() * nbins);
        for bin in 0..nbins {
            for (k, &idx) in window.iter().enumerate() {
                rows.push(bin * nnt + idx);
                vals.push(profile[[bin, k]]);
            }
        }
        columns.push(SparseColumn { rows, vals });
    }

    Ok(SparseDesignMatrix {
        nrows: nbins * nnt,
        columns,
    })
}

fn mismatch(frame: &FamilyFrame, orf: &CandidateOrf, msg: String) -> RegressError {
    RegressError::AssemblyConsistency {
        tfam: frame.tfam.clone(),
        msg: format!("candidate {}: {}", orf.name, msg),
    }
}
