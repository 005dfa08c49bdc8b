use std::collections::HashMap;

use glam::DVec3;

use crate::{pointcloud::PointCloud, PointCloudError};

/// Subsample a point cloud on a regular voxel grid.
///
/// The space is split into cubic voxels of side `voxel_size` anchored at the minimum bound of
/// the cloud. From every occupied voxel the point closest to the voxel center is kept, so the
/// selected points approximate a uniform spacing of `voxel_size`.
///
/// # Arguments
///
/// * `pointcloud` - The input point cloud.
/// * `voxel_size` - The side length of a voxel.
///
/// # Returns
///
/// The indices of the selected points in ascending order.
///
/// Example:
///
/// ```
/// use kornia_3d::{pointcloud::PointCloud, sampling::grid_sampling};
///
/// let pointcloud = PointCloud::new(vec![[0.0, 0.0, 0.0], [0.1, 0.0, 0.0], [2.0, 0.0, 0.0]], None)?;
/// let samples = grid_sampling(&pointcloud, 1.0)?;
/// assert_eq!(samples.len(), 2);
/// # Ok::<(), kornia_3d::PointCloudError>(())
/// ```
pub fn grid_sampling(
    pointcloud: &PointCloud,
    voxel_size: f64,
) -> Result<Vec<usize>, PointCloudError> {
    if !(voxel_size > 0.0 && voxel_size.is_finite()) {
        return Err(PointCloudError::InvalidVoxelSize(voxel_size));
    }

    let origin = pointcloud.get_min_bound();

    // voxel index -> (point index, squared distance to the voxel center)
    let mut grid: HashMap<[i64; 3], (usize, f64)> = HashMap::new();

    for (i, point) in pointcloud.points().iter().enumerate() {
        let p = DVec3::from_array(*point);
        let cell = ((p - origin) / voxel_size).floor();
        let key = [cell.x as i64, cell.y as i64, cell.z as i64];
        let center = origin + (cell + DVec3::splat(0.5)) * voxel_size;
        let dist_sq = p.distance_squared(center);

        grid.entry(key)
            .and_modify(|best| {
                if dist_sq < best.1 {
                    *best = (i, dist_sq);
                }
            })
            .or_insert((i, dist_sq));
    }

    let mut samples = grid.into_values().map(|(i, _)| i).collect::<Vec<_>>();
    samples.sort_unstable();

    Ok(samples)
}
