use glam::DVec3;

use crate::{pointcloud::PointCloud, PointCloudError};

/// Sample the surface of an axis-aligned ellipsoid with a Fibonacci lattice.
///
/// The points are spread almost uniformly over the surface and carry the analytic outward
/// normals, which makes the cloud usable for point-to-plane registration.
///
/// # Arguments
///
/// * `num_points` - The number of points to generate.
/// * `radii` - The semi-axes of the ellipsoid along x, y and z.
/// * `center` - The center of the ellipsoid.
pub fn fibonacci_ellipsoid(
    num_points: usize,
    radii: [f64; 3],
    center: [f64; 3],
) -> Result<PointCloud, PointCloudError> {
    let golden_angle = std::f64::consts::PI * (3.0 - 5f64.sqrt());
    let radii = DVec3::from_array(radii);
    let center = DVec3::from_array(center);

    let (points, normals) = (0..num_points)
        .map(|i| {
            let z = 1.0 - 2.0 * (i as f64 + 0.5) / num_points as f64;
            let r = (1.0 - z * z).sqrt();
            let phi = golden_angle * i as f64;
            let unit = DVec3::new(r * phi.cos(), r * phi.sin(), z);

            let point = center + radii * unit;
            let normal = (unit / radii).normalize();
            (point.to_array(), normal.to_array())
        })
        .unzip();

    PointCloud::new(points, Some(normals))
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_fibonacci_ellipsoid() -> Result<(), PointCloudError> {
        let radii = [1.0, 0.8, 0.6];
        let center = [0.5, -1.0, 2.0];
        let cloud = fibonacci_ellipsoid(200, radii, center)?;
        assert_eq!(cloud.len(), 200);

        let normals = cloud.normals().ok_or(PointCloudError::EmptyData)?;
        for (p, n) in cloud.points().iter().zip(normals.iter()) {
            // every point lies on the implicit surface
            let v = (0..3)
                .map(|k| ((p[k] - center[k]) / radii[k]).powi(2))
                .sum::<f64>();
            assert_relative_eq!(v, 1.0, epsilon = 1e-9);
            assert_relative_eq!(DVec3::from_array(*n).length(), 1.0, epsilon = 1e-9);
        }
        Ok(())
    }
}
