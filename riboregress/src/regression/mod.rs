//! regression – per-family strength fitting
//!
//! One call per transcript family: assemble the shared frame, expand
//! candidates, scatter the design matrix, fit non-negative strengths,
//! weight them, aggregate per start/stop codon. Every numeric dead end
//! returns an explicit empty outcome so heterogeneous per-family results
//! concatenate safely; only input-integrity problems escape the family.

pub mod aggregate;
pub mod design;
pub mod family;
pub mod nnls;
pub mod weights;

use std::fmt;

use ndarray::Array1;
use tracing::{debug, error, warn};

use crate::config::MIN_STRENGTH;
use crate::metagene::ProfileTemplate;
use crate::models::{CandidateOrf, OrfStrengthRecord, RunContext, StartStrengthRecord, StopStrengthRecord};

/// Why a family produced no rows.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    NoCandidates,
    BelowStartCount,
    NoSupport,
    AllBelowThreshold,
    DegenerateFit,
    SingularCovariance,
    AssemblyMismatch,
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            SkipReason::NoCandidates => "no candidate ORFs",
            SkipReason::BelowStartCount => "no start codon met the minimum read count",
            SkipReason::NoSupport => "no candidate had nonzero read support",
            SkipReason::AllBelowThreshold => "all fitted strengths below threshold",
            SkipReason::DegenerateFit => "NNLS degenerate or non-convergent",
            SkipReason::SingularCovariance => "covariance (sub)matrix singular",
            SkipReason::AssemblyMismatch => "design matrix assembly inconsistency",
        };
        f.write_str(text)
    }
}

#[derive(Debug, Default)]
pub struct FamilyResult {
    pub orfs: Vec<OrfStrengthRecord>,
    pub starts: Vec<StartStrengthRecord>,
    pub stops: Vec<StopStrengthRecord>,
}

/// Same merge shape either way: `Empty` contributes zero rows.
#[derive(Debug)]
pub enum FamilyOutcome {
    Fitted(FamilyResult),
    Empty { tfam: String, reason: SkipReason },
}

/// Fit one transcript family. `orfs` are the family's regression-eligible
/// rows, all on one chromosome and strand.
pub fn regress_family(
    ctx: &RunContext,
    template: &ProfileTemplate,
    tfam: &str,
    orfs: &[CandidateOrf],
) -> FamilyOutcome {
    let empty = |reason: SkipReason| FamilyOutcome::Empty {
        tfam: tfam.to_string(),
        reason,
    };
    if orfs.is_empty() {
        return empty(SkipReason::NoCandidates);
    }

    let frame = match family::assemble_family_frame(ctx, tfam, orfs) {
        Ok(frame) => frame,
        Err(err) => {
            error!("{}: frame assembly failed: {}", tfam, err);
            return empty(SkipReason::AssemblyMismatch);
        }
    };
    let counts = family::observed_counts(ctx, &frame);

    // only model ORFs with some minimum of reads near the start codon
    let filtered: Vec<CandidateOrf> = if ctx.opts.start_count > 0.0 {
        orfs.iter()
            .filter(|orf| family::start_codon_reads(&counts, &frame, orf) >= ctx.opts.start_count)
            .cloned()
            .collect()
    } else {
        orfs.to_vec()
    };
    if filtered.is_empty() {
        return empty(SkipReason::BelowStartCount);
    }

    let candidates = design::build_candidate_set(&filtered, ctx.opts.start_only);
    let matrix = match design::build_design_matrix(&frame, template, &candidates) {
        Ok(matrix) => matrix,
        Err(err) => {
            error!("{}: {}", tfam, err);
            return empty(SkipReason::AssemblyMismatch);
        }
    };

    // stage 1: drop columns with no possible support
    let support = matrix.dot_columns(&counts);
    let keep: Vec<usize> = (0..candidates.len())
        .filter(|&c| support[c] > 0.0)
        .collect();
    if keep.is_empty() {
        return empty(SkipReason::NoSupport);
    }
    let matrix = matrix.select_columns(&keep);
    let candidates: Vec<CandidateOrf> = keep.iter().map(|&c| candidates[c].clone()).collect();

    // stage 2: constrained fit
    let Some(fit) = nnls::solve(&matrix, &counts) else {
        warn!("{}: degenerate NNLS fit", tfam);
        return empty(SkipReason::DegenerateFit);
    };

    // stage 3: drop rounding-noise strengths
    let retained: Vec<usize> = (0..candidates.len())
        .filter(|&c| fit.coeffs[c] > MIN_STRENGTH)
        .collect();
    if retained.is_empty() {
        return empty(SkipReason::AllBelowThreshold);
    }
    let matrix = matrix.select_columns(&retained);
    let candidates: Vec<CandidateOrf> =
        retained.iter().map(|&c| candidates[c].clone()).collect();
    let strengths = Array1::from_iter(retained.iter().map(|&c| fit.coeffs[c]));

    let Some(cov) = weights::covariance(
        &matrix.normal_matrix(),
        fit.residual,
        matrix.nrows(),
        candidates.len(),
    ) else {
        warn!("{}: singular covariance", tfam);
        return empty(SkipReason::SingularCovariance);
    };
    let per_candidate = weights::candidate_weights(&strengths, &cov);

    let orf_records: Vec<OrfStrengthRecord> = candidates
        .iter()
        .enumerate()
        .map(|(i, orf)| OrfStrengthRecord {
            orf: orf.clone(),
            strength: strengths[i],
            weight: per_candidate[i],
        })
        .collect();

    let Some(starts) =
        aggregate::aggregate_starts(&candidates, &strengths, &cov, ctx.opts.start_only)
    else {
        warn!("{}: singular start-group covariance", tfam);
        return empty(SkipReason::SingularCovariance);
    };
    let stops = if ctx.opts.start_only {
        Vec::new()
    } else {
        match aggregate::aggregate_stops(&candidates, &strengths, &cov) {
            Some(stops) => stops,
            None => {
                warn!("{}: singular stop-group covariance", tfam);
                return empty(SkipReason::SingularCovariance);
            }
        }
    };

    debug!(
        "{}: {} retained candidates, {} starts, {} stops",
        tfam,
        orf_records.len(),
        starts.len(),
        stops.len()
    );
    FamilyOutcome::Fitted(FamilyResult {
        orfs: orf_records,
        starts,
        stops,
    })
}
