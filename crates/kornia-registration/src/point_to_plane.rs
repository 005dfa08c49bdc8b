use glam::{DAffine3, DVec3, Vec3};
use nalgebra::{DMatrix, DVector, SMatrix, SVector};

use crate::{
    linalg::solve_spd,
    xf::{RigidScaleXf3, RigidXf3},
    IcpMode,
};

// unknowns: rotation vector (3), translation (3), scale increment (1)
const NUM_UNKNOWNS: usize = 7;

type Row = SVector<f64, NUM_UNKNOWNS>;

/// Accumulates weighted point-to-plane constraints and finds the small motion minimizing the
/// squared distances from the moved source points to the target tangent planes.
///
/// The rotation and the scale are linearized around the identity, so the solution is accurate
/// for small motions. Points should be centered near the origin for good conditioning.
#[derive(Debug, Clone)]
pub struct PointToPlaneAligningTransform {
    ata: SMatrix<f64, NUM_UNKNOWNS, NUM_UNKNOWNS>,
    atb: Row,
}

impl Default for PointToPlaneAligningTransform {
    fn default() -> Self {
        Self::new()
    }
}

impl PointToPlaneAligningTransform {
    /// Create an empty accumulator.
    pub fn new() -> Self {
        Self {
            ata: SMatrix::zeros(),
            atb: Row::zeros(),
        }
    }

    /// Add the constraint that `src` moves onto the plane through `tgt` with normal `tgt_norm`.
    pub fn add(&mut self, src: DVec3, tgt: DVec3, tgt_norm: DVec3, w: f64) {
        let c = src.cross(tgt_norm);
        let row = Row::from([
            c.x,
            c.y,
            c.z,
            tgt_norm.x,
            tgt_norm.y,
            tgt_norm.z,
            tgt_norm.dot(src),
        ]);
        let rhs = tgt_norm.dot(tgt - src);
        self.ata += row * row.transpose() * w;
        self.atb += row * (rhs * w);
    }

    // solves the normal equations restricted to x = basis * z
    fn solve_in_subspace(&self, basis: &[Row]) -> Option<Row> {
        let b = DMatrix::from_fn(NUM_UNKNOWNS, basis.len(), |r, c| basis[c][r]);
        let ata = DMatrix::from_column_slice(NUM_UNKNOWNS, NUM_UNKNOWNS, self.ata.as_slice());
        let atb = DVector::from_column_slice(self.atb.as_slice());

        let lhs = b.transpose() * ata * &b;
        let rhs = b.transpose() * atb;
        let x = b * solve_spd(lhs, &rhs)?;
        Some(Row::from_column_slice(x.as_slice()))
    }

    /// The best small rigid motion with uniform scaling.
    pub fn find_best_rigid_scale_xf(&self) -> RigidScaleXf3 {
        match self.solve_in_subspace(&unit_basis(0..NUM_UNKNOWNS)) {
            Some(x) => RigidScaleXf3 {
                a: DVec3::new(x[0], x[1], x[2]),
                b: DVec3::new(x[3], x[4], x[5]),
                s: 1.0 + x[6],
            },
            None => RigidScaleXf3::NAN,
        }
    }

    /// The best small rigid motion.
    pub fn find_best_rigid_xf(&self) -> RigidXf3 {
        self.rigid_xf_in_subspace(unit_basis(0..6))
    }

    /// The best small rigid motion rotating about `axis` only.
    pub fn find_best_rigid_xf_fixed_rotation_axis(&self, axis: DVec3) -> RigidXf3 {
        let axis = axis.normalize_or_zero();
        if axis == DVec3::ZERO {
            return RigidXf3::NAN;
        }
        let mut basis = vec![rotation_column(axis)];
        basis.extend(unit_basis(3..6));
        self.rigid_xf_in_subspace(basis)
    }

    /// The best small rigid motion whose rotation axis is orthogonal to `axis`.
    pub fn find_best_rigid_xf_orthogonal_rotation_axis(&self, axis: DVec3) -> RigidXf3 {
        let axis = axis.normalize_or_zero();
        if axis == DVec3::ZERO {
            return RigidXf3::NAN;
        }
        let (u, v) = axis.any_orthonormal_pair();
        let mut basis = vec![rotation_column(u), rotation_column(v)];
        basis.extend(unit_basis(3..6));
        self.rigid_xf_in_subspace(basis)
    }

    /// The best translation when no rotation or scaling is allowed.
    pub fn find_best_translation(&self) -> DVec3 {
        match self.solve_in_subspace(&unit_basis(3..6)) {
            Some(x) => DVec3::new(x[3], x[4], x[5]),
            None => DVec3::NAN,
        }
    }

    /// The best translation given a fixed rotation vector and scale.
    pub fn find_best_translation_with(&self, rot: DVec3, scale: f64) -> DVec3 {
        let fixed = Row::from([rot.x, rot.y, rot.z, 0.0, 0.0, 0.0, scale - 1.0]);
        let rhs = self.atb.fixed_rows::<3>(3).into_owned()
            - self.ata.fixed_rows::<3>(3).into_owned() * fixed;
        let lhs = self.ata.fixed_view::<3, 3>(3, 3);
        let lhs = DMatrix::from_fn(3, 3, |r, c| lhs[(r, c)]);

        match solve_spd(lhs, &DVector::from_column_slice(rhs.as_slice())) {
            Some(b) => DVec3::new(b[0], b[1], b[2]),
            None => DVec3::NAN,
        }
    }

    fn rigid_xf_in_subspace(&self, basis: Vec<Row>) -> RigidXf3 {
        match self.solve_in_subspace(&basis) {
            Some(x) => RigidXf3 {
                a: DVec3::new(x[0], x[1], x[2]),
                b: DVec3::new(x[3], x[4], x[5]),
            },
            None => RigidXf3::NAN,
        }
    }
}

fn unit_basis(range: std::ops::Range<usize>) -> Vec<Row> {
    range
        .map(|i| {
            let mut col = Row::zeros();
            col[i] = 1.0;
            col
        })
        .collect()
}

fn rotation_column(axis: DVec3) -> Row {
    Row::from([axis.x, axis.y, axis.z, 0.0, 0.0, 0.0, 0.0])
}

/// Solve `p2pl` for the transform family of `mode`, limiting the rotation and the scaling.
///
/// When the rotation angle exceeds `angle_limit` or the scale leaves
/// `[1 / scale_limit, scale_limit]`, both are clamped and the translation is recomputed for the
/// clamped values.
pub fn get_aligning_xf(
    p2pl: &PointToPlaneAligningTransform,
    mode: IcpMode,
    angle_limit: f32,
    scale_limit: f32,
    fixed_rotation_axis: Vec3,
) -> DAffine3 {
    let axis = fixed_rotation_axis.as_dvec3();
    let rigid = |xf: RigidXf3| RigidScaleXf3 {
        a: xf.a,
        b: xf.b,
        s: 1.0,
    };

    let mut am = match mode {
        IcpMode::RigidScale => p2pl.find_best_rigid_scale_xf(),
        IcpMode::AnyRigidXf => rigid(p2pl.find_best_rigid_xf()),
        IcpMode::OrthogonalAxis => rigid(p2pl.find_best_rigid_xf_orthogonal_rotation_axis(axis)),
        IcpMode::FixedAxis => rigid(p2pl.find_best_rigid_xf_fixed_rotation_axis(axis)),
        IcpMode::TranslationOnly => {
            return DAffine3::from_translation(p2pl.find_best_translation());
        }
    };

    let angle_limit = angle_limit as f64;
    let scale_limit = (scale_limit as f64).max(1.0);
    let angle = am.a.length();
    if angle > angle_limit || am.s > scale_limit || am.s * scale_limit < 1.0 {
        am.s = am.s.clamp(1.0 / scale_limit, scale_limit);
        if angle > angle_limit {
            am.a *= angle_limit / angle;
        }
        am.b = p2pl.find_best_translation_with(am.a, am.s);
    }

    am.linear_xf()
}
