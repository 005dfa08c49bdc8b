use glam::Vec3;
use serde::{Deserialize, Serialize};

use crate::RegistrationError;

/// The error metric minimized by the registration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum IcpMethod {
    /// Minimize the distance between corresponding points.
    PointToPoint,
    /// Minimize the distance from points to the tangent plane at the corresponding point.
    #[default]
    PointToPlane,
    /// Point-to-point for the first two iterations, then point-to-plane.
    Combined,
}

/// The error metric used in one iteration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IcpMetric {
    /// Distance between corresponding points.
    PointToPoint,
    /// Distance to the tangent plane at the target point.
    PointToPlane,
}

impl IcpMethod {
    /// The metric to use in the given iteration, counted from 1.
    pub fn metric_for_iteration(&self, iter: usize) -> IcpMetric {
        match self {
            IcpMethod::PointToPoint => IcpMetric::PointToPoint,
            IcpMethod::Combined if iter < 3 => IcpMetric::PointToPoint,
            IcpMethod::PointToPlane | IcpMethod::Combined => IcpMetric::PointToPlane,
        }
    }
}

/// The family of transforms the registration may apply to each object.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum IcpMode {
    /// Rigid motion with uniform scaling.
    RigidScale,
    /// Any rigid motion.
    #[default]
    AnyRigidXf,
    /// Rigid motion whose rotation axis is orthogonal to the fixed axis.
    OrthogonalAxis,
    /// Rigid motion whose rotation axis is the fixed axis.
    FixedAxis,
    /// Translation only.
    TranslationOnly,
}

impl IcpMode {
    /// Whether the mode constrains the rotation with [`IcpProperties::fixed_rotation_axis`].
    pub fn uses_fixed_axis(&self) -> bool {
        matches!(self, IcpMode::OrthogonalAxis | IcpMode::FixedAxis)
    }
}

/// Parameters of the multiway registration.
///
/// Missing fields take their default values when deserializing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct IcpProperties {
    /// The error metric.
    pub method: IcpMethod,
    /// Rotation limit in radians of one point-to-plane iteration.
    pub p2pl_angle_limit: f32,
    /// Scaling limit of one point-to-plane iteration, must be at least 1.
    pub p2pl_scale_limit: f32,
    /// Pairs whose normals make an angle with a cosine below this value are rejected.
    pub cos_threshold: f32,
    /// Pairs with a squared distance above this value are rejected.
    pub dist_threshold_sq: f32,
    /// Pairs farther than this factor times the root mean square distance of an object
    /// are rejected.
    pub far_dist_factor: f32,
    /// The family of transforms applied to the objects.
    pub icp_mode: IcpMode,
    /// Axis used by [`IcpMode::FixedAxis`] and [`IcpMode::OrthogonalAxis`].
    pub fixed_rotation_axis: Vec3,
    /// Maximum number of iterations.
    pub iter_limit: usize,
    /// Number of consecutive iterations without improvement after which the registration stops.
    pub bad_iter_stop_count: usize,
    /// The registration stops once the distance metric falls below this value.
    pub exit_val: f32,
    /// Keep only pairs where the source point is also the closest point of its target.
    pub mutual_closest: bool,
}

impl Default for IcpProperties {
    fn default() -> Self {
        Self {
            method: IcpMethod::default(),
            p2pl_angle_limit: std::f32::consts::PI / 6.0,
            p2pl_scale_limit: 2.0,
            cos_threshold: 0.7,
            dist_threshold_sq: 1.0,
            far_dist_factor: 3.0,
            icp_mode: IcpMode::default(),
            fixed_rotation_axis: Vec3::ZERO,
            iter_limit: 10,
            bad_iter_stop_count: 3,
            exit_val: 0.0,
            mutual_closest: false,
        }
    }
}

impl IcpProperties {
    /// Check that every parameter is in its valid range.
    pub fn validate(&self) -> Result<(), RegistrationError> {
        let invalid = |name: &'static str, reason: String| {
            Err(RegistrationError::InvalidParameter { name, reason })
        };

        if self.iter_limit == 0 {
            return invalid("iter_limit", "must be at least 1".to_string());
        }
        if !(self.p2pl_angle_limit > 0.0) {
            return invalid(
                "p2pl_angle_limit",
                format!("must be positive, got {}", self.p2pl_angle_limit),
            );
        }
        if !(self.p2pl_scale_limit >= 1.0) {
            return invalid(
                "p2pl_scale_limit",
                format!("must be at least 1, got {}", self.p2pl_scale_limit),
            );
        }
        if !(self.dist_threshold_sq >= 0.0) {
            return invalid(
                "dist_threshold_sq",
                format!("must be non-negative, got {}", self.dist_threshold_sq),
            );
        }
        if !(self.far_dist_factor >= 0.0) {
            return invalid(
                "far_dist_factor",
                format!("must be non-negative, got {}", self.far_dist_factor),
            );
        }
        if self.cos_threshold.is_nan() {
            return invalid("cos_threshold", "must not be NaN".to_string());
        }
        if self.icp_mode.uses_fixed_axis()
            && !(self.fixed_rotation_axis.length_squared() > 0.0
                && self.fixed_rotation_axis.is_finite())
        {
            return invalid(
                "fixed_rotation_axis",
                format!("must be a non-zero vector in {:?} mode", self.icp_mode),
            );
        }
        Ok(())
    }
}

/// Why the registration stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum IcpExitType {
    /// The registration did not run yet.
    #[default]
    NotStarted,
    /// A solver failed to find a finite transform.
    NotFoundSolution,
    /// The iteration limit was reached.
    MaxIterations,
    /// Too many consecutive iterations did not improve the distance metric.
    MaxBadIterations,
    /// The distance metric fell below the exit value.
    StopMsdReached,
    /// The progress callback requested cancellation.
    Cancelled,
}

impl std::fmt::Display for IcpExitType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let msg = match self {
            IcpExitType::NotStarted => "Not started yet.",
            IcpExitType::NotFoundSolution => "No solution found.",
            IcpExitType::MaxIterations => "Limit of iterations reached.",
            IcpExitType::MaxBadIterations => "No improvement iterations limit reached.",
            IcpExitType::StopMsdReached => "Required mean squared distance reached.",
            IcpExitType::Cancelled => "Cancelled.",
        };
        f.write_str(msg)
    }
}

/// Human readable summary of a registration run.
pub fn icp_status_info(iterations: usize, exit_type: IcpExitType) -> String {
    format!("Performed {iterations} iterations.\n{exit_type}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_properties_are_valid() -> Result<(), RegistrationError> {
        let prop = IcpProperties::default();
        assert_eq!(prop.method, IcpMethod::PointToPlane);
        assert_eq!(prop.icp_mode, IcpMode::AnyRigidXf);
        assert_eq!(prop.iter_limit, 10);
        assert_eq!(prop.bad_iter_stop_count, 3);
        prop.validate()
    }

    #[test]
    fn test_validate_rejects() {
        let prop = IcpProperties {
            iter_limit: 0,
            ..Default::default()
        };
        assert!(matches!(
            prop.validate(),
            Err(RegistrationError::InvalidParameter {
                name: "iter_limit",
                ..
            })
        ));

        let prop = IcpProperties {
            p2pl_scale_limit: 0.5,
            ..Default::default()
        };
        assert!(prop.validate().is_err());

        let prop = IcpProperties {
            icp_mode: IcpMode::FixedAxis,
            ..Default::default()
        };
        assert!(matches!(
            prop.validate(),
            Err(RegistrationError::InvalidParameter {
                name: "fixed_rotation_axis",
                ..
            })
        ));

        let prop = IcpProperties {
            icp_mode: IcpMode::FixedAxis,
            fixed_rotation_axis: Vec3::Z,
            ..Default::default()
        };
        assert!(prop.validate().is_ok());
    }

    #[test]
    fn test_properties_from_partial_json() -> Result<(), Box<dyn std::error::Error>> {
        let prop: IcpProperties = serde_json::from_str(
            r#"{ "method": "Combined", "iter_limit": 25, "fixed_rotation_axis": [0.0, 0.0, 1.0] }"#,
        )?;
        assert_eq!(prop.method, IcpMethod::Combined);
        assert_eq!(prop.iter_limit, 25);
        assert_eq!(prop.fixed_rotation_axis, Vec3::Z);
        assert_eq!(prop.cos_threshold, 0.7);
        assert_eq!(prop.far_dist_factor, 3.0);
        Ok(())
    }

    #[test]
    fn test_metric_for_iteration() {
        let combined = IcpMethod::Combined;
        assert_eq!(combined.metric_for_iteration(1), IcpMetric::PointToPoint);
        assert_eq!(combined.metric_for_iteration(2), IcpMetric::PointToPoint);
        assert_eq!(combined.metric_for_iteration(3), IcpMetric::PointToPlane);
        assert_eq!(
            IcpMethod::PointToPoint.metric_for_iteration(7),
            IcpMetric::PointToPoint
        );
        assert_eq!(
            IcpMethod::PointToPlane.metric_for_iteration(1),
            IcpMetric::PointToPlane
        );
    }

    #[test]
    fn test_status_info() {
        assert_eq!(
            icp_status_info(4, IcpExitType::StopMsdReached),
            "Performed 4 iterations.\nRequired mean squared distance reached."
        );
        assert_eq!(
            icp_status_info(0, IcpExitType::NotStarted),
            "Performed 0 iterations.\nNot started yet."
        );
    }
}
