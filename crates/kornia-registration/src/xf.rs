use glam::{Affine3A, DAffine3, DMat3, DQuat, DVec3, Mat3};

/// A small rigid motion parametrized by a rotation vector and a translation.
///
/// The rotation vector `a` is the axis of rotation scaled by the angle in radians.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RigidXf3 {
    /// Rotation vector.
    pub a: DVec3,
    /// Translation.
    pub b: DVec3,
}

impl RigidXf3 {
    /// The motion that leaves every point in place.
    pub const IDENTITY: Self = Self {
        a: DVec3::ZERO,
        b: DVec3::ZERO,
    };

    /// A motion with every component set to NaN, used to report a failed solve.
    pub const NAN: Self = Self {
        a: DVec3::NAN,
        b: DVec3::NAN,
    };

    /// Convert to an affine transform with an orthonormal rotation.
    pub fn rigid_xf(&self) -> DAffine3 {
        DAffine3::from_mat3_translation(rotation_from_vector(self.a), self.b)
    }
}

/// A small similarity motion: rotation vector, translation and uniform scale.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RigidScaleXf3 {
    /// Rotation vector.
    pub a: DVec3,
    /// Translation.
    pub b: DVec3,
    /// Uniform scale.
    pub s: f64,
}

impl RigidScaleXf3 {
    /// A motion with every component set to NaN, used to report a failed solve.
    pub const NAN: Self = Self {
        a: DVec3::NAN,
        b: DVec3::NAN,
        s: f64::NAN,
    };

    /// Convert to an affine transform `x -> s * R(a) * x + b`.
    pub fn linear_xf(&self) -> DAffine3 {
        DAffine3::from_mat3_translation(rotation_from_vector(self.a) * self.s, self.b)
    }
}

/// Rotation matrix from a rotation vector (axis times angle).
pub(crate) fn rotation_from_vector(a: DVec3) -> DMat3 {
    DMat3::from_quat(DQuat::from_scaled_axis(a))
}

/// Widen a single precision transform to double precision.
pub(crate) fn affine_to_f64(xf: &Affine3A) -> DAffine3 {
    let m = xf.matrix3.to_cols_array();
    let t = xf.translation;
    DAffine3::from_mat3_translation(
        DMat3::from_cols_array(&m.map(f64::from)),
        DVec3::new(t.x as f64, t.y as f64, t.z as f64),
    )
}

/// Narrow a double precision transform to single precision.
pub(crate) fn affine_to_f32(xf: &DAffine3) -> Affine3A {
    let m = xf.matrix3.to_cols_array();
    Affine3A::from_mat3_translation(
        Mat3::from_cols_array(&m.map(|v| v as f32)),
        xf.translation.as_vec3(),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use glam::Vec3;

    #[test]
    fn test_rigid_xf() {
        let xf = RigidXf3 {
            a: DVec3::new(0.0, 0.0, std::f64::consts::FRAC_PI_2),
            b: DVec3::new(1.0, 0.0, 0.0),
        }
        .rigid_xf();

        let p = xf.transform_point3(DVec3::X);
        assert_relative_eq!(p.x, 1.0, epsilon = 1e-12);
        assert_relative_eq!(p.y, 1.0, epsilon = 1e-12);
        assert_relative_eq!(p.z, 0.0, epsilon = 1e-12);

        assert_eq!(RigidXf3::IDENTITY.rigid_xf(), DAffine3::IDENTITY);
        assert!(!RigidXf3::NAN.rigid_xf().is_finite());
    }

    #[test]
    fn test_rigid_scale_xf() {
        let xf = RigidScaleXf3 {
            a: DVec3::ZERO,
            b: DVec3::new(0.0, 1.0, 0.0),
            s: 2.0,
        }
        .linear_xf();

        let p = xf.transform_point3(DVec3::new(1.0, 1.0, 1.0));
        assert_relative_eq!(p.x, 2.0, epsilon = 1e-12);
        assert_relative_eq!(p.y, 3.0, epsilon = 1e-12);
        assert_relative_eq!(p.z, 2.0, epsilon = 1e-12);
    }

    #[test]
    fn test_affine_precision_conversion() {
        let xf = Affine3A::from_rotation_translation(
            glam::Quat::from_rotation_y(0.3),
            Vec3::new(1.0, -2.0, 0.5),
        );
        let back = affine_to_f32(&affine_to_f64(&xf));
        assert!(back.abs_diff_eq(xf, 1e-7));
    }
}
