use glam::{DAffine3, DMat3, DQuat, DVec3};
use nalgebra::{DMatrix, Matrix4, SymmetricEigen};

/// Accumulates weighted point correspondences and finds the transform best mapping the source
/// points onto the target points in the least squares sense.
///
/// The solvers follow Horn's closed form method: the optimal rotation is the eigenvector of the
/// largest eigenvalue of a 4x4 symmetric matrix built from the cross covariance of the points.
///
/// Every `find_*` method returns a transform with NaN components when the accumulated
/// correspondences do not determine a solution.
#[derive(Debug, Clone)]
pub struct PointToPointAligningTransform {
    sum_w: f64,
    sum_src: DVec3,
    sum_tgt: DVec3,
    // sum of w * src * tgt^T
    sum_src_tgt: DMat3,
    sum_src_sq: f64,
}

impl Default for PointToPointAligningTransform {
    fn default() -> Self {
        Self::new()
    }
}

impl PointToPointAligningTransform {
    /// Create an empty accumulator.
    pub fn new() -> Self {
        Self {
            sum_w: 0.0,
            sum_src: DVec3::ZERO,
            sum_tgt: DVec3::ZERO,
            sum_src_tgt: DMat3::ZERO,
            sum_src_sq: 0.0,
        }
    }

    /// Add a correspondence from `src` to `tgt` with the given weight.
    pub fn add(&mut self, src: DVec3, tgt: DVec3, w: f64) {
        self.sum_w += w;
        self.sum_src += w * src;
        self.sum_tgt += w * tgt;
        self.sum_src_tgt += outer(src, tgt) * w;
        self.sum_src_sq += w * src.length_squared();
    }

    /// Total weight of the added correspondences.
    pub fn total_weight(&self) -> f64 {
        self.sum_w
    }

    fn centroids(&self) -> Option<(DVec3, DVec3)> {
        (self.sum_w > 0.0).then(|| (self.sum_src / self.sum_w, self.sum_tgt / self.sum_w))
    }

    // cross covariance of the centered points, entry (a, b) is sum of w * src_a * tgt_b
    fn centered_covariance(&self, c_src: DVec3, c_tgt: DVec3) -> DMat3 {
        self.sum_src_tgt - outer(c_src, c_tgt) * self.sum_w
    }

    fn centered_src_sq(&self, c_src: DVec3) -> f64 {
        self.sum_src_sq - self.sum_w * c_src.length_squared()
    }

    /// The translation minimizing the distances when no rotation is allowed.
    pub fn find_best_translation(&self) -> DVec3 {
        match self.centroids() {
            Some((c_src, c_tgt)) => c_tgt - c_src,
            None => DVec3::NAN,
        }
    }

    /// The best rigid motion with uniform scaling.
    pub fn find_best_rigid_scale_xf(&self) -> DAffine3 {
        let Some((c_src, c_tgt)) = self.centroids() else {
            return nan_xf();
        };
        let cov = self.centered_covariance(c_src, c_tgt);
        let Some((q, lambda)) = best_rotation(&horn_matrix(&cov), &full_basis()) else {
            return nan_xf();
        };
        let src_sq = self.centered_src_sq(c_src);
        if src_sq <= 0.0 {
            return nan_xf();
        }
        let scale = lambda / src_sq;
        compose(DMat3::from_quat(q) * scale, c_src, c_tgt)
    }

    /// The best rigid motion.
    pub fn find_best_rigid_xf(&self) -> DAffine3 {
        self.rigid_xf_in_subspace(&full_basis())
    }

    /// The best rigid motion whose rotation axis is orthogonal to `axis`.
    pub fn find_best_rigid_xf_orthogonal_rotation_axis(&self, axis: DVec3) -> DAffine3 {
        let axis = axis.normalize_or_zero();
        if axis == DVec3::ZERO {
            return nan_xf();
        }
        let (u, v) = axis.any_orthonormal_pair();
        let basis = [
            [1.0, 0.0, 0.0, 0.0],
            [0.0, u.x, u.y, u.z],
            [0.0, v.x, v.y, v.z],
        ];
        self.rigid_xf_in_subspace(&basis)
    }

    /// The best rigid motion rotating about `axis` only.
    pub fn find_best_rigid_xf_fixed_rotation_axis(&self, axis: DVec3) -> DAffine3 {
        let axis = axis.normalize_or_zero();
        let Some((c_src, c_tgt)) = self.centroids() else {
            return nan_xf();
        };
        if axis == DVec3::ZERO {
            return nan_xf();
        }
        let cov = self.centered_covariance(c_src, c_tgt);

        // sum of tgt . R src = cos(t) * a + sin(t) * b + const
        let a = trace(&cov) - axis.dot(cov * axis);
        let b = axis.dot(cross_sum(&cov));
        let angle = b.atan2(a);

        compose(
            DMat3::from_axis_angle(axis, angle),
            c_src,
            c_tgt,
        )
    }

    fn rigid_xf_in_subspace(&self, basis: &[[f64; 4]]) -> DAffine3 {
        let Some((c_src, c_tgt)) = self.centroids() else {
            return nan_xf();
        };
        let cov = self.centered_covariance(c_src, c_tgt);
        match best_rotation(&horn_matrix(&cov), basis) {
            Some((q, _)) => compose(DMat3::from_quat(q), c_src, c_tgt),
            None => nan_xf(),
        }
    }
}

fn nan_xf() -> DAffine3 {
    DAffine3::from_mat3_translation(DMat3::NAN, DVec3::NAN)
}

// x -> m * (x - c_src) + c_tgt
fn compose(m: DMat3, c_src: DVec3, c_tgt: DVec3) -> DAffine3 {
    DAffine3::from_mat3_translation(m, c_tgt - m * c_src)
}

fn outer(a: DVec3, b: DVec3) -> DMat3 {
    DMat3::from_cols(a * b.x, a * b.y, a * b.z)
}

fn trace(m: &DMat3) -> f64 {
    m.x_axis.x + m.y_axis.y + m.z_axis.z
}

// sum of src x tgt from the cross covariance
fn cross_sum(s: &DMat3) -> DVec3 {
    let e = |a: usize, b: usize| s.col(b)[a];
    DVec3::new(e(1, 2) - e(2, 1), e(2, 0) - e(0, 2), e(0, 1) - e(1, 0))
}

fn full_basis() -> [[f64; 4]; 4] {
    [
        [1.0, 0.0, 0.0, 0.0],
        [0.0, 1.0, 0.0, 0.0],
        [0.0, 0.0, 1.0, 0.0],
        [0.0, 0.0, 0.0, 1.0],
    ]
}

// the symmetric matrix N of Horn's method, with quaternions ordered (w, x, y, z)
fn horn_matrix(s: &DMat3) -> Matrix4<f64> {
    let e = |a: usize, b: usize| s.col(b)[a];
    let (sxx, sxy, sxz) = (e(0, 0), e(0, 1), e(0, 2));
    let (syx, syy, syz) = (e(1, 0), e(1, 1), e(1, 2));
    let (szx, szy, szz) = (e(2, 0), e(2, 1), e(2, 2));

    #[rustfmt::skip]
    let n = Matrix4::new(
        sxx + syy + szz, syz - szy,        szx - sxz,        sxy - syx,
        syz - szy,       sxx - syy - szz,  sxy + syx,        szx + sxz,
        szx - sxz,       sxy + syx,        -sxx + syy - szz, syz + szy,
        sxy - syx,       szx + sxz,        syz + szy,        -sxx - syy + szz,
    );
    n
}

/// The unit quaternion maximizing `q^T n q` among the quaternions spanned by `basis`,
/// together with the maximal value.
fn best_rotation(n: &Matrix4<f64>, basis: &[[f64; 4]]) -> Option<(DQuat, f64)> {
    if !n.iter().all(|v| v.is_finite()) {
        return None;
    }

    let b = DMatrix::from_fn(4, basis.len(), |r, c| basis[c][r]);
    let n = DMatrix::from_column_slice(4, 4, n.as_slice());
    let reduced = b.transpose() * n * &b;

    let eigen = SymmetricEigen::try_new(reduced, f64::EPSILON, 1000)?;
    let (best, lambda) = eigen
        .eigenvalues
        .iter()
        .copied()
        .enumerate()
        .max_by(|a, b| a.1.total_cmp(&b.1))?;

    let q = b * eigen.eigenvectors.column(best);
    let q = DQuat::from_xyzw(q[1], q[2], q[3], q[0]);
    let len = q.length();
    if !(len > 0.0) {
        return None;
    }
    Some((q / len, lambda))
}
