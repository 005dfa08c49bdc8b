use glam::{Mat3A, Vec3};
use rayon::prelude::*;

use crate::{pairs::PairStore, IcpObject, IcpProperties, PointPairs};

/// Number of outlier rejection passes run after each correspondence update.
const FAR_PAIRS_MAX_PASSES: usize = 3;

/// Thresholds a pair must pass to become active.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PairFilter {
    /// Minimum cosine of the angle between the source and the target normal.
    pub cos_threshold: f32,
    /// Maximum squared distance between the source and the target point.
    pub dist_threshold_sq: f32,
    /// Require the source point to be the closest point of its target.
    pub mutual_closest: bool,
}

impl From<&IcpProperties> for PairFilter {
    fn from(prop: &IcpProperties) -> Self {
        Self {
            cos_threshold: prop.cos_threshold,
            dist_threshold_sq: prop.dist_threshold_sq,
            mutual_closest: prop.mutual_closest,
        }
    }
}

// maps normals through the linear part of an affine transform
fn normal_matrix(m: Mat3A) -> Mat3A {
    m.inverse().transpose()
}

fn transform_normal(m: &Mat3A, n: Option<Vec3>) -> Vec3 {
    n.map_or(Vec3::ZERO, |n| (*m * n).normalize_or_zero())
}

/// Find, for every sampled point of `src`, the closest point of `tgt` and refresh the active set.
///
/// Both points of a pair are stored in the common frame. A pair is active when a target point
/// was found and the pair passes every threshold of `filter`.
///
/// # Arguments
///
/// * `pairs` - The correspondences from `src` to `tgt`, allocated by a previous sampling.
/// * `src` - The object the sampled points belong to.
/// * `tgt` - The object searched for the closest points.
/// * `filter` - The acceptance thresholds.
pub fn update_point_pairs(
    pairs: &mut PointPairs,
    src: &IcpObject<'_>,
    tgt: &IcpObject<'_>,
    filter: &PairFilter,
) {
    let src_to_tgt = tgt.xf.inverse() * src.xf;
    let tgt_to_src = src.xf.inverse() * tgt.xf;
    let src_norm_xf = normal_matrix(src.xf.matrix3);
    let tgt_norm_xf = normal_matrix(tgt.xf.matrix3);

    for (pair, active) in pairs.vec.iter_mut().zip(pairs.active.iter_mut()) {
        *active = false;

        let local_src = src.source.point(pair.src_vert);
        let Some(prj) = tgt.source.project(src_to_tgt.transform_point3(local_src)) else {
            pair.valid = false;
            continue;
        };

        pair.src_point = src.xf.transform_point3(local_src);
        pair.src_norm = transform_normal(&src_norm_xf, src.source.normal(pair.src_vert));
        pair.tgt_close_vert = prj.closest_vert;
        pair.tgt_point = tgt.xf.transform_point3(prj.point);
        pair.tgt_norm = transform_normal(&tgt_norm_xf, prj.normal);
        pair.normals_angle_cos = if pair.src_norm == Vec3::ZERO || pair.tgt_norm == Vec3::ZERO {
            1.0
        } else {
            pair.src_norm.dot(pair.tgt_norm)
        };
        pair.dist_sq = pair.src_point.distance_squared(pair.tgt_point);
        pair.weight = src.source.weight(pair.src_vert);
        pair.valid = true;

        if pair.normals_angle_cos < filter.cos_threshold
            || pair.dist_sq > filter.dist_threshold_sq
        {
            continue;
        }

        if filter.mutual_closest {
            let back = src
                .source
                .project(tgt_to_src.transform_point3(prj.point))
                .map(|p| p.closest_vert);
            if back != Some(pair.src_vert) {
                continue;
            }
        }

        *active = true;
    }
}

impl PairStore {
    /// Refresh the correspondences of every ordered pair of objects, then reject the far pairs.
    ///
    /// The ordered pairs are processed in parallel.
    pub fn update(&mut self, objects: &[IcpObject<'_>], prop: &IcpProperties) {
        let num_objs = self.num_objs();
        let filter = PairFilter::from(prop);

        self.pairs
            .par_iter_mut()
            .enumerate()
            .filter(|(k, _)| k / num_objs != k % num_objs)
            .for_each(|(k, pairs)| {
                let (i, j) = (k / num_objs, k % num_objs);
                update_point_pairs(pairs, &objects[i], &objects[j], &filter);
            });

        let num_deactivated = self.deactivate_far_dist_pairs(prop);
        log::debug!(
            "Updated point pairs: {} active, {} far pairs deactivated",
            self.num_active_pairs(),
            num_deactivated
        );
    }

    /// Deactivate the pairs far from the typical distance of the objects they touch.
    ///
    /// For each object whose root mean square distance is small enough, the pairs it shares
    /// with the objects of higher index are capped at `(far_dist_factor * rms)^2`. Runs up to
    /// three passes and stops early once a pass deactivates nothing.
    ///
    /// Returns the number of deactivated pairs.
    pub fn deactivate_far_dist_pairs(&mut self, prop: &IcpProperties) -> usize {
        let num_objs = self.num_objs();
        let mut total = 0;

        for _ in 0..FAR_PAIRS_MAX_PASSES {
            let max_dist_sq = (0..num_objs)
                .into_par_iter()
                .map(|id| {
                    let rms = self.sum_sq_dist_to_point_of(id).root_mean_sq();
                    (prop.far_dist_factor * rms).powi(2)
                })
                .collect::<Vec<_>>();

            let mut num_deactivated = 0;
            for (i, &max_i) in max_dist_sq.iter().enumerate() {
                if max_i >= prop.dist_threshold_sq {
                    continue;
                }
                for j in i + 1..num_objs {
                    num_deactivated += self.get_mut(i, j).deactivate_far_pairs(max_i);
                    num_deactivated += self.get_mut(j, i).deactivate_far_pairs(max_i);
                }
            }

            total += num_deactivated;
            if num_deactivated == 0 {
                break;
            }
        }

        total
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::PointCloudSource;
    use glam::Affine3A;
    use kornia_3d::{pointcloud::PointCloud, synthetic::fibonacci_ellipsoid};

    fn filter() -> PairFilter {
        PairFilter::from(&IcpProperties::default())
    }

    #[test]
    fn test_update_point_pairs_translated() -> Result<(), Box<dyn std::error::Error>> {
        let src = PointCloudSource::new(PointCloud::new(
            vec![[0.0, 0.0, 0.0], [1.0, 0.0, 0.0]],
            Some(vec![[0.0, 0.0, 1.0]; 2]),
        )?)?;
        let tgt = PointCloudSource::new(PointCloud::new(
            vec![[0.0, 0.0, 0.0], [1.0, 0.0, 0.0]],
            Some(vec![[0.0, 0.0, 1.0]; 2]),
        )?)?;

        let src_obj = IcpObject::new(
            &src,
            Affine3A::from_translation(Vec3::new(0.0, 0.0, 0.1)),
        );
        let tgt_obj = IcpObject::new(&tgt, Affine3A::IDENTITY);

        let mut pairs = PointPairs::from_samples(&[0, 1]);
        update_point_pairs(&mut pairs, &src_obj, &tgt_obj, &filter());

        assert_eq!(pairs.num_active(), 2);
        let pair = pairs.pairs()[1];
        assert!(pair.valid);
        assert_eq!(pair.tgt_close_vert, 1);
        assert_eq!(pair.src_point, Vec3::new(1.0, 0.0, 0.1));
        assert_eq!(pair.tgt_point, Vec3::X);
        assert!((pair.dist_sq - 0.01).abs() < 1e-6);
        assert_eq!(pair.normals_angle_cos, 1.0);
        assert!((pair.dist_to_plane() + 0.1).abs() < 1e-6);
        Ok(())
    }

    #[test]
    fn test_update_point_pairs_thresholds() -> Result<(), Box<dyn std::error::Error>> {
        let src = PointCloudSource::new(PointCloud::new(
            vec![[0.0, 0.0, 0.0], [5.0, 0.0, 0.0]],
            Some(vec![[0.0, 0.0, 1.0], [0.0, 0.0, 1.0]]),
        )?)?;
        let tgt = PointCloudSource::new(PointCloud::new(
            vec![[0.0, 0.0, 0.1], [5.0, 0.0, 0.0]],
            Some(vec![[1.0, 0.0, 0.0], [0.0, 0.0, 1.0]]),
        )?)?;

        let src_obj = IcpObject::new(&src, Affine3A::IDENTITY);
        let tgt_obj = IcpObject::new(&tgt, Affine3A::IDENTITY);

        let mut pairs = PointPairs::from_samples(&[0, 1]);
        update_point_pairs(&mut pairs, &src_obj, &tgt_obj, &filter());

        // the first pair has orthogonal normals
        assert_eq!(pairs.active_indices().collect::<Vec<_>>(), vec![1]);
        assert!(pairs.pairs()[0].valid);

        let strict = PairFilter {
            dist_threshold_sq: -1.0,
            ..filter()
        };
        update_point_pairs(&mut pairs, &src_obj, &tgt_obj, &strict);
        assert_eq!(pairs.num_active(), 0);
        Ok(())
    }

    #[test]
    fn test_update_point_pairs_mutual_closest() -> Result<(), Box<dyn std::error::Error>> {
        let src = PointCloudSource::new(PointCloud::new(
            vec![[0.0, 0.0, 0.0], [0.1, 0.0, 0.0]],
            None,
        )?)?;
        let tgt = PointCloudSource::new(PointCloud::new(vec![[0.0, 0.0, 0.0]], None)?)?;

        let src_obj = IcpObject::new(&src, Affine3A::IDENTITY);
        let tgt_obj = IcpObject::new(&tgt, Affine3A::IDENTITY);

        let mut pairs = PointPairs::from_samples(&[0, 1]);
        update_point_pairs(&mut pairs, &src_obj, &tgt_obj, &filter());
        assert_eq!(pairs.num_active(), 2);

        let mutual = PairFilter {
            mutual_closest: true,
            ..filter()
        };
        update_point_pairs(&mut pairs, &src_obj, &tgt_obj, &mutual);
        assert_eq!(pairs.active_indices().collect::<Vec<_>>(), vec![0]);
        Ok(())
    }

    #[test]
    fn test_store_update_respects_thresholds() -> Result<(), Box<dyn std::error::Error>> {
        let base = fibonacci_ellipsoid(300, [1.0, 0.8, 0.6], [0.0; 3])?;
        let a = PointCloudSource::new(base.clone())?;
        let b = PointCloudSource::new(base)?;
        let objects = [
            IcpObject::new(&a, Affine3A::from_rotation_z(0.05)),
            IcpObject::new(&b, Affine3A::from_translation(Vec3::new(0.02, 0.0, 0.01))),
        ];

        let prop = IcpProperties {
            dist_threshold_sq: 0.01,
            cos_threshold: 0.9,
            ..Default::default()
        };
        let mut store = PairStore::resample(&objects, 0.01)?;
        store.update(&objects, &prop);

        assert!(store.num_active_pairs() > 0);
        for (i, j) in [(0, 1), (1, 0)] {
            for pair in store.get(i, j).active_pairs() {
                assert!(pair.dist_sq <= prop.dist_threshold_sq);
                assert!(pair.normals_angle_cos >= prop.cos_threshold);
            }
        }
        Ok(())
    }

    #[test]
    fn test_deactivate_far_dist_pairs() -> Result<(), Box<dyn std::error::Error>> {
        let base = fibonacci_ellipsoid(200, [1.0, 1.0, 1.0], [0.0; 3])?;
        let mut points = base.points().to_vec();
        points.push([0.0, 0.0, 1.5]);
        let outlier = points.len() - 1;
        let a = PointCloudSource::new(PointCloud::new(points, None)?)?;
        let b = PointCloudSource::new(base)?;

        let objects = [
            IcpObject::new(&a, Affine3A::IDENTITY),
            IcpObject::new(&b, Affine3A::IDENTITY),
        ];
        let prop = IcpProperties {
            cos_threshold: -1.0,
            ..Default::default()
        };
        let mut store = PairStore::resample(&objects, 0.001)?;
        store.update(&objects, &prop);

        let outlier_pair = store
            .get(0, 1)
            .pairs()
            .iter()
            .position(|p| p.src_vert == outlier)
            .ok_or("outlier not sampled")?;
        assert!(store.get(0, 1).pairs()[outlier_pair].valid);
        assert!(!store.get(0, 1).is_active(outlier_pair));

        // once a pass deactivates nothing, further calls are no-ops
        while store.deactivate_far_dist_pairs(&prop) > 0 {}
        let before = store.get(0, 1).clone();
        assert_eq!(store.deactivate_far_dist_pairs(&prop), 0);
        assert_eq!(store.get(0, 1), &before);
        Ok(())
    }
}
