use glam::DVec3;

use crate::PointCloudError;

/// A point cloud with points, and optionally normals and per-point weights.
#[derive(Debug, Clone)]
pub struct PointCloud {
    // The points in the point cloud.
    points: Vec<[f64; 3]>,
    // The normals of the points.
    normals: Option<Vec<[f64; 3]>>,
    // The weights of the points.
    weights: Option<Vec<f32>>,
}

impl PointCloud {
    /// Create a new point cloud from points and normals (optional).
    ///
    /// # Errors
    ///
    /// Returns [`PointCloudError::NormalsMismatch`] if the normals do not match the points.
    pub fn new(
        points: Vec<[f64; 3]>,
        normals: Option<Vec<[f64; 3]>>,
    ) -> Result<Self, PointCloudError> {
        if let Some(normals) = &normals {
            if normals.len() != points.len() {
                return Err(PointCloudError::NormalsMismatch(
                    points.len(),
                    normals.len(),
                ));
            }
        }
        Ok(Self {
            points,
            normals,
            weights: None,
        })
    }

    /// Attach per-point weights to the point cloud.
    ///
    /// # Errors
    ///
    /// Returns [`PointCloudError::WeightsMismatch`] if the weights do not match the points.
    pub fn with_weights(mut self, weights: Vec<f32>) -> Result<Self, PointCloudError> {
        if weights.len() != self.points.len() {
            return Err(PointCloudError::WeightsMismatch(
                self.points.len(),
                weights.len(),
            ));
        }
        self.weights = Some(weights);
        Ok(self)
    }

    /// Get the number of points in the point cloud.
    #[inline]
    pub fn len(&self) -> usize {
        self.points.len()
    }

    /// Check if the point cloud is empty.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    /// Get as reference the points in the point cloud.
    pub fn points(&self) -> &[[f64; 3]] {
        &self.points
    }

    /// Get as reference the normals of the points in the point cloud.
    pub fn normals(&self) -> Option<&[[f64; 3]]> {
        self.normals.as_deref()
    }

    /// Get as reference the weights of the points in the point cloud.
    pub fn weights(&self) -> Option<&[f32]> {
        self.weights.as_deref()
    }

    /// Get the minimum bound of the point cloud.
    pub fn get_min_bound(&self) -> DVec3 {
        self.points
            .iter()
            .map(|p| DVec3::from_array(*p))
            .reduce(|a, b| a.min(b))
            .unwrap_or(DVec3::ZERO)
    }

    /// Get the maximum bound of the point cloud.
    pub fn get_max_bound(&self) -> DVec3 {
        self.points
            .iter()
            .map(|p| DVec3::from_array(*p))
            .reduce(|a, b| a.max(b))
            .unwrap_or(DVec3::ZERO)
    }
}
