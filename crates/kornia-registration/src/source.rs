use glam::{Affine3A, DVec3, Vec3};
use kornia_3d::{nearest::NearestIndex, pointcloud::PointCloud, sampling::grid_sampling};

use crate::RegistrationError;

/// The point on a surface closest to a query.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Projection {
    /// The closest point, in the local frame of the surface.
    pub point: Vec3,
    /// The surface normal at the closest point, if the surface has normals.
    pub normal: Option<Vec3>,
    /// Index of the surface point closest to the query.
    pub closest_vert: usize,
}

/// A set of points that can be registered: a mesh or a point cloud.
///
/// All coordinates are in the local frame of the source.
pub trait PointSource: Send + Sync {
    /// Total number of points.
    fn num_points(&self) -> usize;

    /// The point with the given index.
    fn point(&self, idx: usize) -> Vec3;

    /// The normal at the point with the given index, if available.
    fn normal(&self, idx: usize) -> Option<Vec3>;

    /// The weight of the point with the given index.
    fn weight(&self, _idx: usize) -> f32 {
        1.0
    }

    /// Select a subset of points approximating a uniform spacing of `voxel_size`.
    fn grid_sampling(&self, voxel_size: f32) -> Result<Vec<usize>, RegistrationError>;

    /// Find the point of the surface closest to `query`.
    fn project(&self, query: Vec3) -> Option<Projection>;
}

/// A [`PointSource`] over a point cloud, backed by a kd-tree.
pub struct PointCloudSource {
    cloud: PointCloud,
    index: NearestIndex,
}

impl PointCloudSource {
    /// Index a point cloud for registration.
    ///
    /// # Errors
    ///
    /// Fails if the point cloud is empty.
    pub fn new(cloud: PointCloud) -> Result<Self, RegistrationError> {
        let index = NearestIndex::new(cloud.points())?;
        Ok(Self { cloud, index })
    }

    /// The indexed point cloud.
    pub fn cloud(&self) -> &PointCloud {
        &self.cloud
    }
}

impl PointSource for PointCloudSource {
    fn num_points(&self) -> usize {
        self.cloud.len()
    }

    fn point(&self, idx: usize) -> Vec3 {
        DVec3::from_array(self.cloud.points()[idx]).as_vec3()
    }

    fn normal(&self, idx: usize) -> Option<Vec3> {
        self.cloud
            .normals()
            .map(|normals| DVec3::from_array(normals[idx]).as_vec3())
    }

    fn weight(&self, idx: usize) -> f32 {
        self.cloud.weights().map_or(1.0, |weights| weights[idx])
    }

    fn grid_sampling(&self, voxel_size: f32) -> Result<Vec<usize>, RegistrationError> {
        Ok(grid_sampling(&self.cloud, voxel_size as f64)?)
    }

    fn project(&self, query: Vec3) -> Option<Projection> {
        let nn = self.index.nearest(&query.as_dvec3().to_array());
        Some(Projection {
            point: self.point(nn.index),
            normal: self.normal(nn.index),
            closest_vert: nn.index,
        })
    }
}

/// An object taking part in the registration: its points and its current transform.
///
/// The transform maps the local frame of the source to the common frame.
#[derive(Clone, Copy)]
pub struct IcpObject<'a> {
    /// The points of the object.
    pub source: &'a dyn PointSource,
    /// The transform from the object frame to the common frame.
    pub xf: Affine3A,
}

impl<'a> IcpObject<'a> {
    /// Create an object from its points and its initial transform.
    pub fn new(source: &'a dyn PointSource, xf: Affine3A) -> Self {
        Self { source, xf }
    }
}
