use glam::{DAffine3, DVec3, Vec3};
use rayon::prelude::*;

use crate::{
    multiway::MultiwayAligningTransform,
    pairs::PairStore,
    point_to_plane::{get_aligning_xf, PointToPlaneAligningTransform},
    point_to_point::PointToPointAligningTransform,
    IcpMetric, IcpMode, IcpProperties,
};

/// Computes, from the active pairs, the motion that brings every object closer to the others.
///
/// The returned transforms act in the common frame and are applied on the left of the current
/// object transforms. `None` means no finite solution was found for at least one object.
pub trait IterationSolver: Send + Sync {
    /// Solve one iteration with the given error metric.
    fn solve(
        &self,
        pairs: &PairStore,
        metric: IcpMetric,
        prop: &IcpProperties,
    ) -> Option<Vec<DAffine3>>;
}

/// Solves a separate system for every object, moving it towards the midpoints of its pairs.
#[derive(Debug, Clone, Copy, Default)]
pub struct IndependentEquations;

/// Solves one system coupling the motions of all objects.
///
/// The transform mode is ignored: the objects always move rigidly.
#[derive(Debug, Clone, Copy, Default)]
pub struct MultiwayEquations;

fn midpoint(a: Vec3, b: Vec3) -> Vec3 {
    0.5 * (a + b)
}

fn finite(xf: DAffine3) -> Option<DAffine3> {
    xf.is_finite().then_some(xf)
}

fn point_to_point_delta(pairs: &PairStore, id: usize, prop: &IcpProperties) -> Option<DAffine3> {
    let mut p2pt = PointToPointAligningTransform::new();
    pairs.for_each_active_pair_of(id, |p| {
        p2pt.add(
            p.own_point.as_dvec3(),
            midpoint(p.own_point, p.other_point).as_dvec3(),
            p.weight as f64,
        );
    });

    let axis = prop.fixed_rotation_axis.as_dvec3();
    let xf = match prop.icp_mode {
        IcpMode::RigidScale => p2pt.find_best_rigid_scale_xf(),
        IcpMode::AnyRigidXf => p2pt.find_best_rigid_xf(),
        IcpMode::OrthogonalAxis => p2pt.find_best_rigid_xf_orthogonal_rotation_axis(axis),
        IcpMode::FixedAxis => p2pt.find_best_rigid_xf_fixed_rotation_axis(axis),
        IcpMode::TranslationOnly => DAffine3::from_translation(p2pt.find_best_translation()),
    };
    finite(xf)
}

fn point_to_plane_delta(pairs: &PairStore, id: usize, prop: &IcpProperties) -> Option<DAffine3> {
    // each pair contributes its midpoint and the point of this object
    let mut sum = DVec3::ZERO;
    let mut count = 0usize;
    pairs.for_each_active_pair_of(id, |p| {
        sum += (midpoint(p.own_point, p.other_point) + p.own_point).as_dvec3();
        count += 1;
    });
    if count == 0 {
        return None;
    }
    let centroid = sum / (2 * count) as f64;

    let mut p2pl = PointToPlaneAligningTransform::new();
    pairs.for_each_active_pair_of(id, |p| {
        let own = p.own_point.as_dvec3();
        let mid = midpoint(p.own_point, p.other_point).as_dvec3();
        p2pl.add(
            own - centroid,
            mid - centroid,
            p.other_norm.as_dvec3(),
            p.weight as f64,
        );
    });

    let xf = get_aligning_xf(
        &p2pl,
        prop.icp_mode,
        prop.p2pl_angle_limit,
        prop.p2pl_scale_limit,
        prop.fixed_rotation_axis,
    );
    finite(
        DAffine3::from_translation(centroid) * xf * DAffine3::from_translation(-centroid),
    )
}

impl IterationSolver for IndependentEquations {
    fn solve(
        &self,
        pairs: &PairStore,
        metric: IcpMetric,
        prop: &IcpProperties,
    ) -> Option<Vec<DAffine3>> {
        (0..pairs.num_objs())
            .into_par_iter()
            .map(|id| {
                let delta = match metric {
                    IcpMetric::PointToPoint => point_to_point_delta(pairs, id, prop),
                    IcpMetric::PointToPlane => point_to_plane_delta(pairs, id, prop),
                };
                if delta.is_none() {
                    log::warn!("No {metric:?} solution for object {id}");
                }
                delta
            })
            .collect()
    }
}

impl IterationSolver for MultiwayEquations {
    fn solve(
        &self,
        pairs: &PairStore,
        metric: IcpMetric,
        _prop: &IcpProperties,
    ) -> Option<Vec<DAffine3>> {
        let num_objs = pairs.num_objs();
        let mut mat = MultiwayAligningTransform::new(num_objs);

        for i in 0..num_objs {
            for j in (0..num_objs).filter(|&j| j != i) {
                for p in pairs.get(i, j).active_pairs() {
                    let (src, tgt) = (p.src_point.as_dvec3(), p.tgt_point.as_dvec3());
                    let w = p.weight as f64;
                    match metric {
                        IcpMetric::PointToPoint => {
                            mat.add_point_to_point(i, src, j, tgt, w);
                            mat.add_point_to_point(j, tgt, i, src, w);
                        }
                        IcpMetric::PointToPlane => {
                            mat.add_point_to_plane(i, src, j, tgt, p.tgt_norm.as_dvec3(), w);
                            mat.add_point_to_plane(j, tgt, i, src, p.src_norm.as_dvec3(), w);
                        }
                    }
                }
            }
        }

        let deltas = mat
            .solve()
            .iter()
            .map(|xf| finite(xf.rigid_xf()))
            .collect::<Option<Vec<_>>>();
        if deltas.is_none() {
            log::warn!("No {metric:?} multiway solution");
        }
        deltas
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pairs::{PointPair, PointPairs};
    use approx::assert_relative_eq;
    use kornia_3d::synthetic::fibonacci_ellipsoid;

    // two objects, the first moved by `xf`, with exact pairs in both directions
    fn moved_store(xf: &DAffine3) -> Result<PairStore, Box<dyn std::error::Error>> {
        let cloud = fibonacci_ellipsoid(100, [1.0, 0.8, 0.6], [0.0; 3])?;
        let normals = cloud.normals().ok_or("missing normals")?;
        let samples = (0..cloud.len()).collect::<Vec<_>>();

        let moved = |p: &[f64; 3], n: &[f64; 3]| {
            let (p, n) = (DVec3::from_array(*p), DVec3::from_array(*n));
            (xf.transform_point3(p).as_vec3(), xf.transform_vector3(n).normalize().as_vec3())
        };
        let fixed = |p: &[f64; 3], n: &[f64; 3]| {
            (DVec3::from_array(*p).as_vec3(), DVec3::from_array(*n).as_vec3())
        };

        let mut store = PairStore::from_samples(&[samples.clone(), samples]);
        for (i, j) in [(0, 1), (1, 0)] {
            let vec = cloud
                .points()
                .iter()
                .zip(normals)
                .enumerate()
                .map(|(v, (p, n))| {
                    let (own, other) = (moved(p, n), fixed(p, n));
                    let ((src_point, src_norm), (tgt_point, tgt_norm)) =
                        if i == 0 { (own, other) } else { (other, own) };
                    PointPair {
                        src_vert: v,
                        src_point,
                        src_norm,
                        tgt_close_vert: v,
                        tgt_point,
                        tgt_norm,
                        normals_angle_cos: src_norm.dot(tgt_norm),
                        dist_sq: src_point.distance_squared(tgt_point),
                        weight: 1.0,
                        valid: true,
                    }
                })
                .collect::<Vec<_>>();
            let active = vec![true; vec.len()];
            *store.get_mut(i, j) = PointPairs { vec, active };
        }
        Ok(store)
    }

    fn translated_store(t: Vec3) -> Result<PairStore, Box<dyn std::error::Error>> {
        moved_store(&DAffine3::from_translation(t.as_dvec3()))
    }

    // mean distance between the pairs of objects 0 and 1 once the deltas are applied
    fn mean_dist_after(store: &PairStore, deltas: &[DAffine3]) -> f64 {
        let pairs = store.get(0, 1).pairs();
        pairs
            .iter()
            .map(|p| {
                let src = deltas[0].transform_point3(p.src_point.as_dvec3());
                let tgt = deltas[1].transform_point3(p.tgt_point.as_dvec3());
                src.distance(tgt)
            })
            .sum::<f64>()
            / pairs.len() as f64
    }

    fn rotation_modes() -> [(IcpMode, Vec3); 4] {
        [
            (IcpMode::RigidScale, Vec3::ZERO),
            (IcpMode::AnyRigidXf, Vec3::ZERO),
            (IcpMode::FixedAxis, Vec3::Z),
            (IcpMode::OrthogonalAxis, Vec3::X),
        ]
    }

    #[test]
    fn test_independent_point_to_point_keeps_aligned_objects(
    ) -> Result<(), Box<dyn std::error::Error>> {
        let store = moved_store(&DAffine3::IDENTITY)?;

        for (icp_mode, fixed_rotation_axis) in rotation_modes() {
            let prop = IcpProperties {
                icp_mode,
                fixed_rotation_axis,
                ..Default::default()
            };
            let deltas = IndependentEquations
                .solve(&store, IcpMetric::PointToPoint, &prop)
                .ok_or("no solution")?;
            for delta in deltas {
                assert!(
                    delta.abs_diff_eq(DAffine3::IDENTITY, 1e-6),
                    "{icp_mode:?} moved an aligned object: {delta:?}"
                );
            }
        }
        Ok(())
    }

    #[test]
    fn test_independent_point_to_point_rotation_modes() -> Result<(), Box<dyn std::error::Error>>
    {
        let angle = 0.02;
        let xf = DAffine3::from_rotation_translation(
            glam::DQuat::from_rotation_z(angle),
            DVec3::new(0.01, -0.005, 0.0),
        );
        let store = moved_store(&xf)?;
        let before = mean_dist_after(&store, &[DAffine3::IDENTITY, DAffine3::IDENTITY]);

        for (icp_mode, fixed_rotation_axis) in rotation_modes() {
            let prop = IcpProperties {
                icp_mode,
                fixed_rotation_axis,
                ..Default::default()
            };
            let deltas = IndependentEquations
                .solve(&store, IcpMetric::PointToPoint, &prop)
                .ok_or("no solution")?;

            // each object goes about halfway, the first one rotating back about z
            let after = mean_dist_after(&store, &deltas);
            assert!(after < 0.1 * before, "{icp_mode:?}: {after} vs {before}");

            let (scale, rot, _) = deltas[0].to_scale_rotation_translation();
            assert_relative_eq!(scale.x, 1.0, epsilon = 1e-3);
            let (axis, found) = rot.to_axis_angle();
            let signed = if axis.z < 0.0 { found } else { -found };
            assert!(
                signed > 0.4 * angle && signed < 0.6 * angle,
                "{icp_mode:?}: angle {signed}"
            );
            assert_relative_eq!(axis.z.abs(), 1.0, epsilon = 1e-3);
        }
        Ok(())
    }

    #[test]
    fn test_independent_point_to_point_meets_halfway() -> Result<(), Box<dyn std::error::Error>> {
        let t = Vec3::new(0.02, -0.01, 0.015);
        let store = translated_store(t)?;
        let prop = IcpProperties {
            icp_mode: IcpMode::TranslationOnly,
            ..Default::default()
        };

        let deltas = IndependentEquations
            .solve(&store, IcpMetric::PointToPoint, &prop)
            .ok_or("no solution")?;
        assert_eq!(deltas.len(), 2);
        assert_relative_eq!(deltas[0].translation.x, -0.5 * t.x as f64, epsilon = 1e-6);
        assert_relative_eq!(deltas[1].translation.x, 0.5 * t.x as f64, epsilon = 1e-6);
        assert_relative_eq!(deltas[1].translation.z, 0.5 * t.z as f64, epsilon = 1e-6);
        Ok(())
    }

    #[test]
    fn test_independent_point_to_plane() -> Result<(), Box<dyn std::error::Error>> {
        let t = Vec3::new(0.0, 0.02, -0.01);
        let store = translated_store(t)?;
        let prop = IcpProperties::default();

        let deltas = IndependentEquations
            .solve(&store, IcpMetric::PointToPlane, &prop)
            .ok_or("no solution")?;
        assert_relative_eq!(deltas[0].translation.y, -0.01, epsilon = 1e-5);
        assert_relative_eq!(deltas[0].translation.z, 0.005, epsilon = 1e-5);
        assert_relative_eq!(deltas[1].translation.y, 0.01, epsilon = 1e-5);
        Ok(())
    }

    #[test]
    fn test_multiway_fixes_last_object() -> Result<(), Box<dyn std::error::Error>> {
        let t = Vec3::new(0.02, -0.01, 0.015);
        let store = translated_store(t)?;

        for metric in [IcpMetric::PointToPoint, IcpMetric::PointToPlane] {
            let deltas = MultiwayEquations
                .solve(&store, metric, &IcpProperties::default())
                .ok_or("no solution")?;
            assert_relative_eq!(deltas[0].translation.x, -t.x as f64, epsilon = 1e-6);
            assert_relative_eq!(deltas[0].translation.y, -t.y as f64, epsilon = 1e-6);
            assert_eq!(deltas[1], DAffine3::IDENTITY);
        }
        Ok(())
    }

    #[test]
    fn test_no_active_pairs_fails() {
        let store = PairStore::from_samples(&[vec![0, 1], vec![0, 1]]);
        let prop = IcpProperties::default();
        assert!(IndependentEquations
            .solve(&store, IcpMetric::PointToPlane, &prop)
            .is_none());
        assert!(IndependentEquations
            .solve(&store, IcpMetric::PointToPoint, &prop)
            .is_none());
        assert!(MultiwayEquations
            .solve(&store, IcpMetric::PointToPoint, &prop)
            .is_none());
    }
}
