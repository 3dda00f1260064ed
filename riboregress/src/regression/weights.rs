//! weights.rs – confidence weights from the fit covariance
//!
//! Homoscedastic approximation: every observation cell carries the same
//! noise variance, so Var(x) = r² · diag((AᵀA)⁻¹) / dof with dof = cells
//! minus retained candidates. The per-candidate weight x²/Var(x) is a
//! ranking feature for the downstream calibration stage, not a calibrated
//! probability.

use log::warn;
use ndarray::{Array1, Array2};
use ndarray_linalg::Inverse;

/// Covariance of the retained strengths, or `None` when AᵀA is singular
/// or there are no spare degrees of freedom.
pub fn covariance(
    ata: &Array2<f64>,
    residual: f64,
    observations: usize,
    retained: usize,
) -> Option<Array2<f64>> {
    let dof = observations as f64 - retained as f64;
    if dof <= 0.0 {
        warn!(
            "no degrees of freedom: {} observations, {} candidates",
            observations, retained
        );
        return None;
    }
    match ata.inv() {
        Ok(inv) => Some(inv * (residual * residual / dof)),
        Err(_) => {
            warn!("normal matrix of {} retained candidates is singular", retained);
            None
        }
    }
}

/// Per-candidate weight x_i² / Σ_ii.
pub fn candidate_weights(strengths: &Array1<f64>, cov: &Array2<f64>) -> Array1<f64> {
    Array1::from_iter(
        strengths
            .iter()
            .enumerate()
            .map(|(i, &x)| x * x / cov[[i, i]]),
    )
}

/// Quadratic-form weight xᵍᵀ (Σᵍ)⁻¹ xᵍ for one aggregation group.
/// Members of a group are correlated through the shared fit, so this is
/// deliberately not a sum of the members' individual weights.
pub fn group_weight(
    strengths: &Array1<f64>,
    cov: &Array2<f64>,
    members: &[usize],
) -> Option<f64> {
    let k = members.len();
    let mut sub = Array2::zeros((k, k));
    let mut xg = Array1::zeros(k);
    for (a, &i) in members.iter().enumerate() {
        xg[a] = strengths[i];
        for (b, &j) in members.iter().enumerate() {
            sub[[a, b]] = cov[[i, j]];
        }
    }
    match sub.inv() {
        Ok(inv) => Some(xg.dot(&inv.dot(&xg))),
        Err(_) => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    #[test]
    fn diagonal_case_matches_scalar_formula() {
        let ata = array![[4.0, 0.0], [0.0, 2.0]];
        let cov = covariance(&ata, 2.0, 104, 2).unwrap();
        // r²/dof = 4/102
        assert!((cov[[0, 0]] - 4.0 / 102.0 / 4.0).abs() < 1e-12);
        let x = array![3.0, 1.0];
        let w = candidate_weights(&x, &cov);
        assert!((w[0] - 9.0 / cov[[0, 0]]).abs() < 1e-9);
        assert!(w.iter().all(|&v| v >= 0.0));
    }

    #[test]
    fn group_weight_is_nonnegative_and_singularities_surface() {
        let cov = array![[2.0, 0.5], [0.5, 1.0]];
        let x = array![1.0, 2.0];
        let w = group_weight(&x, &cov, &[0, 1]).unwrap();
        assert!(w >= 0.0);

        let singular = array![[1.0, 1.0], [1.0, 1.0]];
        assert!(group_weight(&x, &singular, &[0, 1]).is_none());
    }

    #[test]
    fn zero_dof_is_degenerate() {
        let ata = array![[1.0]];
        assert!(covariance(&ata, 1.0, 1, 1).is_none());
    }
}
