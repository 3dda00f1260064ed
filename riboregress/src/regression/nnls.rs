//! nnls.rs – non-negative least squares by active-set iteration
//!
//! Lawson–Hanson over the normal equations: the passive-set subproblem is
//! the same closed-form solve the rest of the pipeline uses, so AᵀA and
//! Aᵀb are formed once from the sparse design matrix and shared by every
//! iteration. Counts and profile densities are non-negative, which keeps
//! the normal equations well scaled for families of realistic size.

use log::warn;
use ndarray::{Array1, Array2};
use ndarray_linalg::Solve;

use super::design::SparseDesignMatrix;

#[derive(Debug, Clone)]
pub struct NnlsFit {
    /// Fitted strengths, aligned to the design matrix columns; all >= 0.
    pub coeffs: Array1<f64>,
    /// 2-norm of the residual at the solution.
    pub residual: f64,
}

/// Solve `min ||Ax - b||^2 s.t. x >= 0`. Returns `None` when the normal
/// equations go singular or the iteration fails to converge; callers
/// treat that as a numeric degeneracy, not an error.
pub fn solve(matrix: &SparseDesignMatrix, b: &Array1<f64>) -> Option<NnlsFit> {
    let ata = matrix.normal_matrix();
    let atb = matrix.dot_columns(b);
    let btb = b.dot(b);
    solve_normal(&ata, &atb, btb)
}

fn solve_normal(ata: &Array2<f64>, atb: &Array1<f64>, btb: f64) -> Option<NnlsFit> {
    let n = atb.len();
    let mut x = Array1::<f64>::zeros(n);
    let mut passive = vec![false; n];
    let tol = f64::EPSILON
        * n as f64
        * ata.iter().fold(0.0f64, |acc, v| acc.max(v.abs())).max(1.0);

    let max_outer = 3 * n.max(1);
    for _ in 0..max_outer {
        let w = atb - &ata.dot(&x);
        let mut best: Option<usize> = None;
        for i in 0..n {
            if !passive[i] && w[i] > tol && best.map_or(true, |j| w[i] > w[j]) {
                best = Some(i);
            }
        }
        let Some(entering) = best else {
            return Some(finish(ata, atb, btb, x));
        };
        passive[entering] = true;

        // inner loop: shrink the passive set until the subproblem solution
        // is strictly feasible
        let mut feasible = false;
        for _ in 0..n {
            let p: Vec<usize> = (0..n).filter(|&i| passive[i]).collect();
            let z = match subproblem(ata, atb, &p) {
                Ok(z) => z,
                Err(_) => {
                    warn!("normal equations singular on passive set of {}", p.len());
                    return None;
                }
            };
            if z.iter().all(|&v| v > 0.0) {
                for i in 0..n {
                    x[i] = 0.0;
                }
                for (k, &i) in p.iter().enumerate() {
                    x[i] = z[k];
                }
                feasible = true;
                break;
            }
            let mut alpha = f64::INFINITY;
            let mut leaving = None;
            for (k, &i) in p.iter().enumerate() {
                if z[k] <= 0.0 {
                    let denom = x[i] - z[k];
                    let step = if denom > 0.0 { x[i] / denom } else { 0.0 };
                    if step < alpha {
                        alpha = step;
                        leaving = Some(i);
                    }
                }
            }
            for (k, &i) in p.iter().enumerate() {
                x[i] += alpha * (z[k] - x[i]);
                if x[i] < 0.0 {
                    x[i] = 0.0;
                    passive[i] = false;
                }
            }
            // the minimizing variable hits the bound exactly
            if let Some(i) = leaving {
                x[i] = 0.0;
                passive[i] = false;
            }
        }
        if !feasible {
            warn!("inner active-set loop failed to restore feasibility");
            return None;
        }
    }
    warn!("NNLS did not converge within {} iterations", max_outer);
    None
}

fn subproblem(
    ata: &Array2<f64>,
    atb: &Array1<f64>,
    p: &[usize],
) -> Result<Array1<f64>, ndarray_linalg::error::LinalgError> {
    let k = p.len();
    let mut sub_ata = Array2::zeros((k, k));
    let mut sub_atb = Array1::zeros(k);
    for (a, &i) in p.iter().enumerate() {
        sub_atb[a] = atb[i];
        for (b, &j) in p.iter().enumerate() {
            sub_ata[[a, b]] = ata[[i, j]];
        }
    }
    sub_ata.solve(&sub_atb)
}

fn finish(ata: &Array2<f64>, atb: &Array1<f64>, btb: f64, x: Array1<f64>) -> NnlsFit {
    let quad = x.dot(&ata.dot(&x));
    let cross = x.dot(atb);
    let residual = (btb - 2.0 * cross + quad).max(0.0).sqrt();
    NnlsFit {
        coeffs: x,
        residual,
    }
}
