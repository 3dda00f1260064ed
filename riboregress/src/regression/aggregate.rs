//! aggregate.rs – per-start and per-stop aggregation
//!
//! Candidates sharing a genomic start (or stop) codon are collapsed into
//! one record: exact sum of strengths, quadratic-form weight over the
//! group's covariance submatrix. Start groups exclude histop stubs and,
//! outside start-only mode, abortive stubs as well; stop groups take
//! elongating ORFs plus histop stubs but never abortive ones.

use std::collections::BTreeMap;

use ndarray::{Array1, Array2};

use crate::models::{CandidateOrf, StartStrengthRecord, StopStrengthRecord};

use super::weights::group_weight;

/// `None` means a group's covariance submatrix was singular; the caller
/// downgrades the family to an empty outcome.
pub fn aggregate_starts(
    candidates: &[CandidateOrf],
    strengths: &Array1<f64>,
    cov: &Array2<f64>,
    start_only: bool,
) -> Option<Vec<StartStrengthRecord>> {
    let mut groups: BTreeMap<i64, Vec<usize>> = BTreeMap::new();
    for (i, orf) in candidates.iter().enumerate() {
        let included = if start_only {
            // abortive initiation counts toward the start, histop never does
            !orf.is_histop()
        } else {
            orf.is_elongating()
        };
        if included {
            groups.entry(orf.gcoord).or_default().push(i);
        }
    }

    let mut records = Vec::with_capacity(groups.len());
    for (gcoord, members) in groups {
        let first = &candidates[members[0]];
        let strength: f64 = members.iter().map(|&i| strengths[i]).sum();
        let weight = group_weight(strengths, cov, &members)?;
        records.push(StartStrengthRecord {
            tfam: first.tfam.clone(),
            chrom: first.chrom.clone(),
            gcoord,
            strand: first.strand,
            codon: first.codon.clone(),
            strength,
            weight,
        });
    }
    Some(records)
}

pub fn aggregate_stops(
    candidates: &[CandidateOrf],
    strengths: &Array1<f64>,
    cov: &Array2<f64>,
) -> Option<Vec<StopStrengthRecord>> {
    let mut groups: BTreeMap<i64, Vec<usize>> = BTreeMap::new();
    for (i, orf) in candidates.iter().enumerate() {
        if !orf.is_abortive() {
            groups.entry(orf.gstop).or_default().push(i);
        }
    }

    let mut records = Vec::with_capacity(groups.len());
    for (gstop, members) in groups {
        let first = &candidates[members[0]];
        let strength: f64 = members.iter().map(|&i| strengths[i]).sum();
        let weight = group_weight(strengths, cov, &members)?;
        records.push(StopStrengthRecord {
            tfam: first.tfam.clone(),
            chrom: first.chrom.clone(),
            gstop,
            strand: first.strand,
            strength,
            weight,
        });
    }
    Some(records)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Strand;
    use ndarray::array;

    fn orf(name: &str, tcoord: i64, tstop: i64, gcoord: i64, gstop: i64) -> CandidateOrf {
        CandidateOrf {
            name: name.to_string(),
            tfam: "fam".to_string(),
            tid: "t1".to_string(),
            tcoord,
            tstop,
            chrom: "chr1".to_string(),
            gcoord,
            gstop,
            strand: Strand::Forward,
            codon: "ATG".to_string(),
            aalen: ((tstop - tcoord) / 3 - 1).max(0),
            orftype: "new".to_string(),
            annot_start: false,
            annot_stop: false,
        }
    }

    #[test]
    fn start_strength_is_exact_member_sum() {
        // two elongating ORFs share a start, plus an abortive stub there
        let candidates = vec![
            orf("a", 100, 400, 1000, 1300),
            orf("b", 100, 250, 1000, 1150),
            orf("fam_1000_abort", 100, 103, 1000, 1000),
        ];
        let x = array![2.0, 1.5, 0.25];
        let cov = Array2::eye(3) * 0.1;

        let starts = aggregate_starts(&candidates, &x, &cov, false).unwrap();
        assert_eq!(starts.len(), 1);
        assert_eq!(starts[0].gcoord, 1000);
        assert!((starts[0].strength - 3.5).abs() < 1e-12);
        assert!(starts[0].weight >= 0.0);
        assert_eq!(starts[0].codon, "ATG");

        // start-only mode also counts the abortive stub
        let starts = aggregate_starts(&candidates, &x, &cov, true).unwrap();
        assert!((starts[0].strength - 3.75).abs() < 1e-12);
    }

    #[test]
    fn stop_groups_take_histop_but_never_abortive() {
        let candidates = vec![
            orf("a", 100, 400, 1000, 1300),
            orf("fam_1300_stop", 400, 400, 1300, 1300),
            orf("fam_1000_abort", 100, 103, 1000, 1000),
        ];
        let x = array![2.0, 0.5, 0.25];
        let cov = Array2::eye(3) * 0.1;

        let stops = aggregate_stops(&candidates, &x, &cov).unwrap();
        assert_eq!(stops.len(), 1);
        assert_eq!(stops[0].gstop, 1300);
        assert!((stops[0].strength - 2.5).abs() < 1e-12);
    }

    #[test]
    fn correlated_group_weight_differs_from_weight_sum() {
        let candidates = vec![orf("a", 100, 400, 1000, 1300), orf("b", 100, 250, 1000, 1150)];
        let x = array![1.0, 1.0];
        let cov = array![[0.5, 0.4], [0.4, 0.5]];
        let starts = aggregate_starts(&candidates, &x, &cov, false).unwrap();
        // xᵀΣ⁻¹x for this Σ is 2/0.9, while summing x²/Σ_ii would give 4
        assert!((starts[0].weight - 2.0 / 0.9).abs() < 1e-9);
    }
}
