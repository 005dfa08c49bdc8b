use glam::DVec3;
use nalgebra::{DMatrix, DVector, SMatrix, SVector};

use crate::{linalg::solve_spd, xf::RigidXf3};

// rotation vector (3) and translation (3) of every object
const DOF: usize = 6;

/// Finds small rigid motions of many objects at once, minimizing the weighted distances between
/// corresponding points of different objects.
///
/// Every object `k` moves by `p -> p + a_k x p + b_k`, linearized around the identity. All
/// correspondences feed one sparse-structured system of normal equations over the motions of all
/// objects, so competing pairwise constraints are balanced against each other. The last object is
/// kept in place to remove the freedom of moving every object together.
#[derive(Debug, Clone)]
pub struct MultiwayAligningTransform {
    num_objs: usize,
    h: DMatrix<f64>,
    g: DVector<f64>,
}

impl Default for MultiwayAligningTransform {
    fn default() -> Self {
        Self::new(0)
    }
}

fn skew(p: DVec3) -> SMatrix<f64, 3, 3> {
    SMatrix::<f64, 3, 3>::new(0.0, -p.z, p.y, p.z, 0.0, -p.x, -p.y, p.x, 0.0)
}

// jacobian of p + a x p + b with respect to (a, b)
fn point_jacobian(p: DVec3) -> SMatrix<f64, 3, DOF> {
    let mut j = SMatrix::<f64, 3, DOF>::zeros();
    j.fixed_view_mut::<3, 3>(0, 0).copy_from(&(-skew(p)));
    j.fixed_view_mut::<3, 3>(0, 3)
        .copy_from(&SMatrix::<f64, 3, 3>::identity());
    j
}

fn plane_jacobian(p: DVec3, n: DVec3) -> SMatrix<f64, 1, DOF> {
    let c = p.cross(n);
    SMatrix::<f64, 1, DOF>::new(c.x, c.y, c.z, n.x, n.y, n.z)
}

impl MultiwayAligningTransform {
    /// Create an empty system for `num_objs` objects.
    pub fn new(num_objs: usize) -> Self {
        let n = DOF * num_objs;
        Self {
            num_objs,
            h: DMatrix::zeros(n, n),
            g: DVector::zeros(n),
        }
    }

    /// Clear the system and resize it for `num_objs` objects.
    pub fn reset(&mut self, num_objs: usize) {
        *self = Self::new(num_objs);
    }

    /// Number of objects in the system.
    pub fn num_objs(&self) -> usize {
        self.num_objs
    }

    /// Add the constraint that point `pa` of object `a` meets point `pb` of object `b`.
    pub fn add_point_to_point(&mut self, a: usize, pa: DVec3, b: usize, pb: DVec3, w: f64) {
        let e = pa - pb;
        self.accumulate(
            a,
            &point_jacobian(pa),
            b,
            &(-point_jacobian(pb)),
            &SVector::<f64, 3>::new(e.x, e.y, e.z),
            w,
        );
    }

    /// Add the constraint that point `pa` of object `a` meets the plane of object `b` through
    /// `pb` with normal `nb`.
    pub fn add_point_to_plane(
        &mut self,
        a: usize,
        pa: DVec3,
        b: usize,
        pb: DVec3,
        nb: DVec3,
        w: f64,
    ) {
        let e = nb.dot(pa - pb);
        self.accumulate(
            a,
            &plane_jacobian(pa, nb),
            b,
            &(-plane_jacobian(pb, nb)),
            &SVector::<f64, 1>::new(e),
            w,
        );
    }

    // adds w * |ja * x_a + jb * x_b + e|^2 to the objective
    fn accumulate<const R: usize>(
        &mut self,
        a: usize,
        ja: &SMatrix<f64, R, DOF>,
        b: usize,
        jb: &SMatrix<f64, R, DOF>,
        e: &SVector<f64, R>,
        w: f64,
    ) {
        let (ra, rb) = (DOF * a, DOF * b);
        let ja_t = ja.transpose();
        let jb_t = jb.transpose();

        let mut blk = self.h.fixed_view_mut::<DOF, DOF>(ra, ra);
        blk += &ja_t * ja * w;
        let mut blk = self.h.fixed_view_mut::<DOF, DOF>(rb, rb);
        blk += &jb_t * jb * w;
        let cross = &ja_t * jb * w;
        let mut blk = self.h.fixed_view_mut::<DOF, DOF>(ra, rb);
        blk += cross;
        let mut blk = self.h.fixed_view_mut::<DOF, DOF>(rb, ra);
        blk += cross.transpose();

        let mut seg = self.g.fixed_rows_mut::<DOF>(ra);
        seg -= &ja_t * e * w;
        let mut seg = self.g.fixed_rows_mut::<DOF>(rb);
        seg -= &jb_t * e * w;
    }

    /// Solve for the motion of every object.
    ///
    /// The last object always gets the identity. If the system is singular or nearly so, for
    /// example when an object takes part in no constraint or when a motion does not change any
    /// distance, every motion is NaN.
    pub fn solve(&self) -> Vec<RigidXf3> {
        match self.num_objs {
            0 => return Vec::new(),
            1 => return vec![RigidXf3::IDENTITY],
            _ => {}
        }
        let n = DOF * (self.num_objs - 1);
        let lhs = self.h.view((0, 0), (n, n)).into_owned();
        let rhs = self.g.rows(0, n).into_owned();

        let Some(x) = solve_spd(lhs, &rhs) else {
            return vec![RigidXf3::NAN; self.num_objs];
        };

        let mut res = (0..self.num_objs - 1)
            .map(|k| {
                let v = x.fixed_rows::<DOF>(DOF * k);
                RigidXf3 {
                    a: DVec3::new(v[0], v[1], v[2]),
                    b: DVec3::new(v[3], v[4], v[5]),
                }
            })
            .collect::<Vec<_>>();
        res.push(RigidXf3::IDENTITY);
        res
    }
}
