#![deny(missing_docs)]
#![doc = env!("CARGO_PKG_DESCRIPTION")]

/// Nearest neighbor search over point clouds.
pub mod nearest;

/// Point cloud container.
pub mod pointcloud;

/// Spatial subsampling of point clouds.
pub mod sampling;

/// Synthetic point clouds for testing and benchmarking.
pub mod synthetic;

/// Rigid and similarity transforms applied to point clouds.
pub mod transforms;

/// Errors raised by the point cloud primitives.
#[derive(thiserror::Error, Debug, PartialEq)]
pub enum PointCloudError {
    /// The point cloud has no points.
    #[error("Pointcloud data is empty")]
    EmptyData,

    /// The number of normals does not match the number of points.
    #[error("Expected {0} normals, got {1}")]
    NormalsMismatch(usize, usize),

    /// The number of weights does not match the number of points.
    #[error("Expected {0} weights, got {1}")]
    WeightsMismatch(usize, usize),

    /// The voxel size used for sampling must be strictly positive and finite.
    #[error("Invalid voxel size: {0}")]
    InvalidVoxelSize(f64),
}
