use std::path::PathBuf;

use crate::error::{RegressError, RegressResult};

/// Span of the synthetic abortive-initiation stub: one codon past the start.
pub const ABORT_CODON_NT: i64 = 3;

/// Span of the synthetic histop stub: the last 6 nt before a stop codon.
pub const HISTOP_NT: i64 = 6;

/// ORFs shorter than this use the truncated short-stop profile regimes.
pub const SHORT_STOP_NT: i64 = 9;

/// Fitted strengths at or below this are machine-rounding noise and are
/// dropped from the retained set.
pub const MIN_STRENGTH: f64 = 1e-6;

/// User-facing knobs for one regression run.
///
/// `start_range`/`stop_range` are in codons around the start and stop, and
/// are converted to nucleotide window bounds by `start_nt`/`stop_nt`; the
/// window bounds are ignored when an existing metagene file is loaded.
#[derive(Debug, Clone)]
pub struct RegressOptions {
    /// Codons modeled (before, after-and-including) the start codon.
    pub start_range: (u32, u32),
    /// Codons modeled (before-and-including, after) the stop codon.
    pub stop_range: (u32, u32),
    /// Minimum windowed read total for a CDS to enter the metagene.
    pub min_cds_reads: f64,
    /// Minimum reads within one nt of a putative start codon.
    pub start_count: f64,
    /// Maximum trimmed 5' mismatches; reads beyond this are excluded.
    pub max5mis: u8,
    /// Initiation-inhibitor mode: only start strengths are produced.
    pub start_only: bool,
    /// Metagene template file: loaded if present, written after the
    /// metagene pass otherwise.
    pub metagene_path: Option<PathBuf>,
}

impl Default for RegressOptions {
    fn default() -> Self {
        RegressOptions {
            start_range: (1, 50),
            stop_range: (7, 0),
            min_cds_reads: 64.0,
            start_count: 0.0,
            max5mis: 1,
            start_only: false,
            metagene_path: None,
        }
    }
}

impl RegressOptions {
    /// Start window in nt: (s0, s1) with s0 <= 0 <= s1.
    pub fn start_nt(&self) -> (i64, i64) {
        (
            -(self.start_range.0 as i64) * 3,
            (self.start_range.1 as i64) * 3,
        )
    }

    /// Stop window in nt: (t0, t1) with t0 < 0 <= t1.
    pub fn stop_nt(&self) -> (i64, i64) {
        (
            -(self.stop_range.0 as i64) * 3,
            (self.stop_range.1 as i64) * 3,
        )
    }

    /// Minimum AA length for a CDS to be usable as a metagene reference.
    pub fn min_aalen(&self) -> i64 {
        (self.start_nt().1 - self.stop_nt().0) / 3
    }

    /// Checked before any dispatch; a stop window that cannot hold the
    /// short-stop slice would make the profile regimes index out of range.
    pub fn validate(&self) -> RegressResult<()> {
        if self.stop_nt().0 >= -(HISTOP_NT) {
            return Err(RegressError::Configuration(format!(
                "stop range must cover at least 3 codons before the stop (got {} nt)",
                -self.stop_nt().0
            )));
        }
        Ok(())
    }
}
