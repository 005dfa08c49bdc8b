use nalgebra::{DMatrix, DVector};

// smallest accepted ratio between a cholesky pivot and the diagonal entry it was reduced from
const MIN_RELATIVE_PIVOT: f64 = 1e-10;

/// Solve `lhs * x = rhs` for a symmetric positive definite `lhs`.
///
/// Returns `None` when `lhs` is singular or numerically close to it: some unknown is almost a
/// combination of the previous ones, so the data does not determine it. The test compares every
/// squared pivot of the factorization with its diagonal entry, which does not depend on the
/// scaling of the unknowns.
pub(crate) fn solve_spd(lhs: DMatrix<f64>, rhs: &DVector<f64>) -> Option<DVector<f64>> {
    let diag = lhs.diagonal();
    let chol = lhs.cholesky()?;

    let l = chol.l_dirty();
    let well_posed = diag.iter().enumerate().all(|(k, &d)| {
        let pivot = l[(k, k)] * l[(k, k)];
        d > 0.0 && pivot >= MIN_RELATIVE_PIVOT * d
    });
    if !well_posed {
        return None;
    }

    let x = chol.solve(rhs);
    x.iter().all(|v| v.is_finite()).then_some(x)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_solve_spd() -> Result<(), Box<dyn std::error::Error>> {
        let lhs = DMatrix::from_row_slice(2, 2, &[4.0, 1.0, 1.0, 3.0]);
        let rhs = DVector::from_column_slice(&[1.0, 2.0]);
        let x = solve_spd(lhs, &rhs).ok_or("no solution")?;
        assert_relative_eq!(x[0], 1.0 / 11.0, epsilon = 1e-12);
        assert_relative_eq!(x[1], 7.0 / 11.0, epsilon = 1e-12);
        Ok(())
    }

    #[test]
    fn test_scaled_unknowns_are_accepted() -> Result<(), Box<dyn std::error::Error>> {
        let lhs = DMatrix::from_row_slice(2, 2, &[1e-12, 0.0, 0.0, 1e6]);
        let rhs = DVector::from_column_slice(&[1e-12, 1e6]);
        let x = solve_spd(lhs, &rhs).ok_or("no solution")?;
        assert_relative_eq!(x[0], 1.0, epsilon = 1e-9);
        assert_relative_eq!(x[1], 1.0, epsilon = 1e-9);
        Ok(())
    }

    #[test]
    fn test_nearly_dependent_unknowns_are_rejected() {
        // the second column differs from the first by a rounding error
        let e = 1e-7;
        let lhs = DMatrix::from_row_slice(2, 2, &[1.0, 1.0, 1.0, 1.0 + e * e]);
        let rhs = DVector::from_column_slice(&[1.0, 1.0]);
        assert!(solve_spd(lhs, &rhs).is_none());

        let zero = DMatrix::zeros(2, 2);
        assert!(solve_spd(zero, &rhs).is_none());
    }
}
