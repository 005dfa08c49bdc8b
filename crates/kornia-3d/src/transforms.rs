use glam::{DAffine3, DVec3};

use crate::{pointcloud::PointCloud, PointCloudError};

/// Apply an affine transform to every point of a point cloud.
///
/// Normals are mapped with the linear part of the transform and re-normalized, which is exact
/// for rigid and uniformly scaled transforms. Weights are carried over unchanged.
///
/// # Arguments
///
/// * `pointcloud` - The point cloud to transform.
/// * `dst_from_src` - The transform from the point cloud frame to the destination frame.
///
/// # Returns
///
/// A new point cloud expressed in the destination frame.
pub fn transform_pointcloud(
    pointcloud: &PointCloud,
    dst_from_src: &DAffine3,
) -> Result<PointCloud, PointCloudError> {
    let points = pointcloud
        .points()
        .iter()
        .map(|p| dst_from_src.transform_point3(DVec3::from_array(*p)).to_array())
        .collect();

    let normals = pointcloud.normals().map(|normals| {
        normals
            .iter()
            .map(|n| {
                dst_from_src
                    .transform_vector3(DVec3::from_array(*n))
                    .normalize_or_zero()
                    .to_array()
            })
            .collect()
    });

    let transformed = PointCloud::new(points, normals)?;
    match pointcloud.weights() {
        Some(weights) => transformed.with_weights(weights.to_vec()),
        None => Ok(transformed),
    }
}
