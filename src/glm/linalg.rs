//! Small dense linear algebra for p x p normal equations

use ndarray::{Array1, Array2, ArrayView1, ArrayView2};

/// Lower Cholesky factor of a symmetric matrix
///
/// Non-positive pivots are replaced by a tiny value so nearly singular systems still
/// produce a finite factor; `strict` makes them fail instead.
fn cholesky(a: ArrayView2<f64>, strict: bool) -> Option<Array2<f64>> {
    let n = a.nrows();
    let mut l = Array2::<f64>::zeros((n, n));

    for i in 0..n {
        for j in 0..=i {
            let mut sum = a[[i, j]];
            for k in 0..j {
                sum -= l[[i, k]] * l[[j, k]];
            }
            if i == j {
                if sum <= 0.0 || !sum.is_finite() {
                    if strict {
                        return None;
                    }
                    sum = 1e-12;
                }
                l[[i, j]] = sum.sqrt();
            } else {
                l[[i, j]] = sum / l[[j, j]];
            }
        }
    }
    Some(l)
}

fn solve_with_factor(l: &Array2<f64>, b: ArrayView1<f64>) -> Array1<f64> {
    let n = l.nrows();
    let mut y = Array1::<f64>::zeros(n);
    for i in 0..n {
        let mut sum = b[i];
        for j in 0..i {
            sum -= l[[i, j]] * y[j];
        }
        y[i] = sum / l[[i, i]];
    }

    let mut x = Array1::<f64>::zeros(n);
    for i in (0..n).rev() {
        let mut sum = y[i];
        for j in (i + 1)..n {
            sum -= l[[j, i]] * x[j];
        }
        x[i] = sum / l[[i, i]];
    }
    x
}

/// Solve `a x = b` for symmetric positive (semi-)definite `a`
pub fn solve_symmetric(a: ArrayView2<f64>, b: ArrayView1<f64>) -> Array1<f64> {
    match cholesky(a, false) {
        Some(l) => solve_with_factor(&l, b),
        None => Array1::from_elem(b.len(), f64::NAN),
    }
}

/// Inverse of a symmetric positive (semi-)definite matrix
pub fn invert_symmetric(a: ArrayView2<f64>) -> Array2<f64> {
    let n = a.nrows();
    let mut inv = Array2::<f64>::from_elem((n, n), f64::NAN);
    if let Some(l) = cholesky(a, false) {
        for col in 0..n {
            let mut e = Array1::<f64>::zeros(n);
            e[col] = 1.0;
            inv.column_mut(col).assign(&solve_with_factor(&l, e.view()));
        }
    }
    inv
}

/// log det(a) for a symmetric positive definite matrix, None otherwise
pub fn log_det_symmetric(a: ArrayView2<f64>) -> Option<f64> {
    let l = cholesky(a, true)?;
    Some((0..l.nrows()).map(|i| 2.0 * l[[i, i]].ln()).sum())
}

/// X' diag(w) X
pub fn xtwx(design: ArrayView2<f64>, weights: &[f64]) -> Array2<f64> {
    let p = design.ncols();
    let mut out = Array2::<f64>::zeros((p, p));
    for (i, row) in design.rows().into_iter().enumerate() {
        let w = weights[i];
        for j in 0..p {
            for k in 0..p {
                out[[j, k]] += w * row[j] * row[k];
            }
        }
    }
    out
}
