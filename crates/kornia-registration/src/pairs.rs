use glam::Vec3;
use rayon::prelude::*;

use crate::{IcpObject, RegistrationError};

/// A correspondence between a sampled point of one object and the closest point of another.
///
/// Points and normals are expressed in the common frame at the time of the last update.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct PointPair {
    /// Index of the sampled point in the source object.
    pub src_vert: usize,
    /// The source point.
    pub src_point: Vec3,
    /// The source normal, zero if the source has no normals.
    pub src_norm: Vec3,
    /// Index of the target point closest to the source point.
    pub tgt_close_vert: usize,
    /// The target point.
    pub tgt_point: Vec3,
    /// The target normal, zero if the target has no normals.
    pub tgt_norm: Vec3,
    /// Cosine of the angle between the normals, 1 if any normal is missing.
    pub normals_angle_cos: f32,
    /// Squared distance between the source and the target point.
    pub dist_sq: f32,
    /// Weight of the pair in the solvers.
    pub weight: f32,
    /// Whether a target point was found in the last update.
    pub valid: bool,
}

impl PointPair {
    fn new(src_vert: usize) -> Self {
        Self {
            src_vert,
            weight: 1.0,
            ..Default::default()
        }
    }

    /// Signed distance from the source point to the tangent plane at the target point.
    pub fn dist_to_plane(&self) -> f32 {
        self.tgt_norm.dot(self.tgt_point - self.src_point)
    }
}

/// A sum of values together with the number of summed values.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct NumSum {
    /// The sum.
    pub sum: f64,
    /// The number of summed values.
    pub num: usize,
}

impl NumSum {
    /// Square root of the mean value, or `f32::MAX` if nothing was summed.
    pub fn root_mean_sq(&self) -> f32 {
        if self.num == 0 {
            return f32::MAX;
        }
        (self.sum / self.num as f64).sqrt() as f32
    }
}

impl std::ops::Add for NumSum {
    type Output = NumSum;

    fn add(self, rhs: NumSum) -> NumSum {
        NumSum {
            sum: self.sum + rhs.sum,
            num: self.num + rhs.num,
        }
    }
}

impl std::iter::Sum for NumSum {
    fn sum<I: Iterator<Item = NumSum>>(iter: I) -> NumSum {
        iter.fold(NumSum::default(), |acc, s| acc + s)
    }
}

/// The correspondences from one object to another, with the subset currently active.
///
/// The number of pairs is fixed by the sampling of the source object, only the pair contents
/// and the active subset change between iterations.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PointPairs {
    pub(crate) vec: Vec<PointPair>,
    pub(crate) active: Vec<bool>,
}

impl PointPairs {
    /// Allocate one inactive pair per sampled source point.
    pub fn from_samples(samples: &[usize]) -> Self {
        Self {
            vec: samples.iter().map(|&v| PointPair::new(v)).collect(),
            active: vec![false; samples.len()],
        }
    }

    /// Number of pairs, active or not.
    pub fn len(&self) -> usize {
        self.vec.len()
    }

    /// Whether there are no pairs.
    pub fn is_empty(&self) -> bool {
        self.vec.is_empty()
    }

    /// All pairs, active or not.
    pub fn pairs(&self) -> &[PointPair] {
        &self.vec
    }

    /// Whether the pair with the given index is active.
    pub fn is_active(&self, idx: usize) -> bool {
        self.active[idx]
    }

    /// Indices of the active pairs.
    pub fn active_indices(&self) -> impl Iterator<Item = usize> + '_ {
        self.active
            .iter()
            .enumerate()
            .filter_map(|(i, &on)| on.then_some(i))
    }

    /// The active pairs.
    pub fn active_pairs(&self) -> impl Iterator<Item = &PointPair> + '_ {
        self.vec
            .iter()
            .zip(self.active.iter())
            .filter_map(|(pair, &on)| on.then_some(pair))
    }

    /// Number of active pairs.
    pub fn num_active(&self) -> usize {
        self.active.iter().filter(|&&on| on).count()
    }

    /// Sum of squared point-to-point distances over the active pairs.
    pub fn sum_sq_dist_to_point(&self) -> NumSum {
        self.active_pairs()
            .map(|pair| NumSum {
                sum: pair.dist_sq as f64,
                num: 1,
            })
            .sum()
    }

    /// Sum of squared point-to-plane distances over the active pairs.
    pub fn sum_sq_dist_to_plane(&self) -> NumSum {
        self.active_pairs()
            .map(|pair| NumSum {
                sum: (pair.dist_to_plane() as f64).powi(2),
                num: 1,
            })
            .sum()
    }

    /// Deactivate the active pairs with a squared distance above `max_dist_sq`.
    ///
    /// Returns the number of deactivated pairs.
    pub fn deactivate_far_pairs(&mut self, max_dist_sq: f32) -> usize {
        let mut num_deactivated = 0;
        for (pair, on) in self.vec.iter().zip(self.active.iter_mut()) {
            if *on && pair.dist_sq > max_dist_sq {
                *on = false;
                num_deactivated += 1;
            }
        }
        num_deactivated
    }
}

/// A pair seen from one of its two objects.
#[derive(Debug, Clone, Copy)]
pub struct OrientedPair {
    /// The point belonging to the object.
    pub own_point: Vec3,
    /// The point belonging to the other object.
    pub other_point: Vec3,
    /// The normal at the point of the other object.
    pub other_norm: Vec3,
    /// Weight of the pair.
    pub weight: f32,
}

/// The correspondences between every ordered pair of distinct objects.
///
/// Containers are stored densely, indexed by `(source, target)`; the diagonal stays empty.
#[derive(Debug, Clone, Default)]
pub struct PairStore {
    num_objs: usize,
    pub(crate) pairs: Vec<PointPairs>,
}

impl PairStore {
    /// Allocate the containers for the given samples of every object.
    pub fn from_samples(samples_per_obj: &[Vec<usize>]) -> Self {
        let num_objs = samples_per_obj.len();
        let mut pairs = Vec::with_capacity(num_objs * num_objs);
        for (i, samples) in samples_per_obj.iter().enumerate() {
            for j in 0..num_objs {
                pairs.push(if i == j {
                    PointPairs::default()
                } else {
                    PointPairs::from_samples(samples)
                });
            }
        }
        Self { num_objs, pairs }
    }

    /// Sample every object with the given voxel size and allocate fresh, inactive pairs.
    pub fn resample(
        objects: &[IcpObject<'_>],
        sampling_voxel_size: f32,
    ) -> Result<Self, RegistrationError> {
        let samples = objects
            .par_iter()
            .map(|obj| obj.source.grid_sampling(sampling_voxel_size))
            .collect::<Result<Vec<_>, _>>()?;

        log::debug!(
            "Resampled {} objects: {:?} samples",
            samples.len(),
            samples.iter().map(Vec::len).collect::<Vec<_>>()
        );

        Ok(Self::from_samples(&samples))
    }

    /// Number of objects.
    pub fn num_objs(&self) -> usize {
        self.num_objs
    }

    /// The correspondences from object `i` to object `j`.
    pub fn get(&self, i: usize, j: usize) -> &PointPairs {
        &self.pairs[i * self.num_objs + j]
    }

    pub(crate) fn get_mut(&mut self, i: usize, j: usize) -> &mut PointPairs {
        &mut self.pairs[i * self.num_objs + j]
    }

    /// Ordered pairs of distinct objects.
    fn directed_edges(&self) -> impl Iterator<Item = (usize, usize)> {
        let n = self.num_objs;
        (0..n).flat_map(move |i| (0..n).filter(move |&j| j != i).map(move |j| (i, j)))
    }

    /// Ordered pairs of distinct objects with `id` as source or target.
    fn directed_edges_of(&self, id: usize) -> impl Iterator<Item = (usize, usize)> {
        (0..self.num_objs)
            .filter(move |&j| j != id)
            .flat_map(move |j| [(id, j), (j, id)])
    }

    /// Sum of squared point-to-point distances over all active pairs.
    pub fn sum_sq_dist_to_point(&self) -> NumSum {
        self.directed_edges()
            .map(|(i, j)| self.get(i, j).sum_sq_dist_to_point())
            .sum()
    }

    /// Sum of squared point-to-point distances over the active pairs touching object `id`.
    pub fn sum_sq_dist_to_point_of(&self, id: usize) -> NumSum {
        self.directed_edges_of(id)
            .map(|(i, j)| self.get(i, j).sum_sq_dist_to_point())
            .sum()
    }

    /// Sum of squared point-to-plane distances over all active pairs.
    pub fn sum_sq_dist_to_plane(&self) -> NumSum {
        self.directed_edges()
            .map(|(i, j)| self.get(i, j).sum_sq_dist_to_plane())
            .sum()
    }

    /// Sum of squared point-to-plane distances over the active pairs touching object `id`.
    pub fn sum_sq_dist_to_plane_of(&self, id: usize) -> NumSum {
        self.directed_edges_of(id)
            .map(|(i, j)| self.get(i, j).sum_sq_dist_to_plane())
            .sum()
    }

    /// Number of active pairs.
    pub fn num_active_pairs(&self) -> usize {
        self.directed_edges()
            .map(|(i, j)| self.get(i, j).num_active())
            .sum()
    }

    /// Number of active pairs touching object `id`.
    pub fn num_active_pairs_of(&self, id: usize) -> usize {
        self.directed_edges_of(id)
            .map(|(i, j)| self.get(i, j).num_active())
            .sum()
    }

    /// Visit every active pair touching object `id`, seen from `id`.
    pub fn for_each_active_pair_of(&self, id: usize, mut f: impl FnMut(OrientedPair)) {
        for j in (0..self.num_objs).filter(|&j| j != id) {
            for pair in self.get(id, j).active_pairs() {
                f(OrientedPair {
                    own_point: pair.src_point,
                    other_point: pair.tgt_point,
                    other_norm: pair.tgt_norm,
                    weight: pair.weight,
                });
            }
            for pair in self.get(j, id).active_pairs() {
                f(OrientedPair {
                    own_point: pair.tgt_point,
                    other_point: pair.src_point,
                    other_norm: pair.src_norm,
                    weight: pair.weight,
                });
            }
        }
    }
}
