use kiddo::immutable::float::kdtree::ImmutableKdTree;

use crate::PointCloudError;

/// Result of a nearest neighbor query.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct NearestNeighbor {
    /// Index of the nearest point in the indexed set.
    pub index: usize,
    /// Squared euclidean distance from the query to the nearest point.
    pub distance_sq: f64,
}

/// A kd-tree over a fixed set of 3d points.
///
/// The tree is built once and queried many times, e.g. once per sampled point and
/// per registration iteration.
pub struct NearestIndex {
    kdtree: ImmutableKdTree<f64, u32, 3, 32>,
}

impl NearestIndex {
    /// Build the index from a set of points.
    ///
    /// # Errors
    ///
    /// Returns [`PointCloudError::EmptyData`] if `points` is empty.
    pub fn new(points: &[[f64; 3]]) -> Result<Self, PointCloudError> {
        if points.is_empty() {
            return Err(PointCloudError::EmptyData);
        }
        Ok(Self {
            kdtree: ImmutableKdTree::new_from_slice(points),
        })
    }

    /// Find the point closest to `query`.
    pub fn nearest(&self, query: &[f64; 3]) -> NearestNeighbor {
        let nn = self.kdtree.nearest_one::<kiddo::SquaredEuclidean>(query);
        NearestNeighbor {
            index: nn.item as usize,
            distance_sq: nn.distance,
        }
    }
}
