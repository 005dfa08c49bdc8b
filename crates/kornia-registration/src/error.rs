use kornia_3d::PointCloudError;

/// Errors raised while setting up a registration.
///
/// Numerical failures during the iterations are not errors, they are reported through
/// [`crate::IcpExitType`].
#[derive(thiserror::Error, Debug)]
pub enum RegistrationError {
    /// Registration needs at least one object.
    #[error("At least one object is required for registration")]
    NoObjects,

    /// The sampling voxel size must be strictly positive and finite.
    #[error("Invalid sampling voxel size: {0}")]
    InvalidVoxelSize(f32),

    /// A registration parameter is out of its valid range.
    #[error("Invalid parameter `{name}`: {reason}")]
    InvalidParameter {
        /// Name of the offending parameter.
        name: &'static str,
        /// Why the value was rejected.
        reason: String,
    },

    /// Error coming from the point cloud primitives.
    #[error(transparent)]
    PointCloud(#[from] PointCloudError),
}
