use glam::Affine3A;

use crate::{
    pairs::PairStore,
    params::icp_status_info,
    solver::{IndependentEquations, IterationSolver, MultiwayEquations},
    xf::{affine_to_f32, affine_to_f64},
    IcpExitType, IcpMetric, IcpObject, IcpProperties, RegistrationError,
};

type PerIterationCallback<'a> = Box<dyn FnMut(usize) + 'a>;

/// Registers many objects at once by iterating closest point search and motion estimation.
///
/// Each iteration refreshes the pairs between every ordered pair of objects, rejects outliers,
/// moves all objects and evaluates the stopping criteria. The objects are moved either by one
/// system coupling all of them (the default) or by a separate system per object.
///
/// Example:
///
/// ```
/// use glam::{Affine3A, Vec3};
/// use kornia_3d::synthetic::fibonacci_ellipsoid;
/// use kornia_registration::{IcpObject, IcpProperties, MultiwayIcp, PointCloudSource};
///
/// let cloud = fibonacci_ellipsoid(300, [1.0, 0.8, 0.6], [0.0; 3])?;
/// let a = PointCloudSource::new(cloud.clone())?;
/// let b = PointCloudSource::new(cloud)?;
///
/// let objects = vec![
///     IcpObject::new(&a, Affine3A::from_translation(Vec3::new(0.02, 0.0, 0.0))),
///     IcpObject::new(&b, Affine3A::IDENTITY),
/// ];
/// let mut icp = MultiwayIcp::new(objects, 0.01)?;
/// icp.set_params(IcpProperties { exit_val: 1e-4, ..Default::default() })?;
///
/// let xfs = icp.calculate_transformations(|_| true).ok_or("cancelled")?;
/// assert_eq!(xfs.len(), 2);
/// println!("{}", icp.status_info());
/// # Ok::<(), Box<dyn std::error::Error>>(())
/// ```
pub struct MultiwayIcp<'a> {
    objs: Vec<IcpObject<'a>>,
    pairs: PairStore,
    prop: IcpProperties,
    independent_equations: bool,
    per_iteration_cb: Option<PerIterationCallback<'a>>,
    iter: usize,
    result_type: IcpExitType,
}

impl<'a> MultiwayIcp<'a> {
    /// Prepare the registration of `objects`, sampling their points with the given voxel size.
    ///
    /// # Errors
    ///
    /// Fails if there are no objects or the voxel size is not positive.
    pub fn new(
        objects: Vec<IcpObject<'a>>,
        sampling_voxel_size: f32,
    ) -> Result<Self, RegistrationError> {
        if objects.is_empty() {
            return Err(RegistrationError::NoObjects);
        }
        let mut icp = Self {
            objs: objects,
            pairs: PairStore::default(),
            prop: IcpProperties::default(),
            independent_equations: false,
            per_iteration_cb: None,
            iter: 0,
            result_type: IcpExitType::NotStarted,
        };
        icp.resample_points(sampling_voxel_size)?;
        Ok(icp)
    }

    /// Replace the parameters.
    ///
    /// # Errors
    ///
    /// Fails if a parameter is out of its valid range, the previous parameters are kept.
    pub fn set_params(&mut self, prop: IcpProperties) -> Result<(), RegistrationError> {
        prop.validate()?;
        self.prop = prop;
        Ok(())
    }

    /// The current parameters.
    pub fn params(&self) -> &IcpProperties {
        &self.prop
    }

    /// Solve a separate system per object instead of one system coupling all objects.
    pub fn set_independent_equations(&mut self, independent: bool) {
        self.independent_equations = independent;
    }

    /// Whether a separate system is solved per object.
    pub fn independent_equations(&self) -> bool {
        self.independent_equations
    }

    /// Observe the progress: called with 0 after the first pair update, then with the index of
    /// every completed iteration.
    pub fn set_per_iteration_callback(&mut self, cb: impl FnMut(usize) + 'a) {
        self.per_iteration_cb = Some(Box::new(cb));
    }

    /// Sample the points of every object anew, discarding all pairs.
    ///
    /// # Errors
    ///
    /// Fails if the voxel size is not positive.
    pub fn resample_points(&mut self, sampling_voxel_size: f32) -> Result<(), RegistrationError> {
        if !(sampling_voxel_size > 0.0 && sampling_voxel_size.is_finite()) {
            return Err(RegistrationError::InvalidVoxelSize(sampling_voxel_size));
        }
        self.pairs = PairStore::resample(&self.objs, sampling_voxel_size)?;
        Ok(())
    }

    /// Refresh the pairs from the current transforms and reject the outliers.
    pub fn update_point_pairs(&mut self) {
        self.pairs.update(&self.objs, &self.prop);
    }

    /// Run the registration and return the transform of every object.
    ///
    /// `progress` receives the fraction of the iteration limit done after each iteration and
    /// returns `false` to cancel. A cancelled run restores the transforms the objects had on
    /// entry and returns `None`.
    pub fn calculate_transformations(
        &mut self,
        mut progress: impl FnMut(f32) -> bool,
    ) -> Option<Vec<Affine3A>> {
        let entry_xfs = self.objs.iter().map(|obj| obj.xf).collect::<Vec<_>>();
        let solver: &dyn IterationSolver = if self.independent_equations {
            &IndependentEquations
        } else {
            &MultiwayEquations
        };

        let mut min_dist = f32::MAX;
        let mut bad_iter_count = 0;
        self.result_type = IcpExitType::MaxIterations;

        for iter in 1..=self.prop.iter_limit {
            self.iter = iter;
            let now = std::time::Instant::now();

            self.update_point_pairs();
            if iter == 1 {
                self.notify_iteration(0);
            }

            let metric = self.prop.method.metric_for_iteration(iter);
            let deltas = solver.solve(&self.pairs, metric, &self.prop);
            if let Some(deltas) = &deltas {
                for (obj, delta) in self.objs.iter_mut().zip(deltas) {
                    obj.xf = affine_to_f32(&(*delta * affine_to_f64(&obj.xf)));
                }
            }
            self.notify_iteration(iter);

            if deltas.is_none() {
                log::warn!("Iteration {iter}: no solution found");
                self.result_type = IcpExitType::NotFoundSolution;
                break;
            }

            let cur_dist = match metric {
                IcpMetric::PointToPoint => self.mean_sq_dist_to_point(),
                IcpMetric::PointToPlane => self.mean_sq_dist_to_plane(),
            };
            log::debug!(
                "Iteration {iter}: {} active pairs, {metric:?} distance {cur_dist}, elapsed {:?}",
                self.num_active_pairs(),
                now.elapsed()
            );

            if cur_dist < self.prop.exit_val {
                self.result_type = IcpExitType::StopMsdReached;
                break;
            }

            if cur_dist < min_dist {
                min_dist = cur_dist;
                bad_iter_count = 0;
            } else {
                bad_iter_count += 1;
                if bad_iter_count >= self.prop.bad_iter_stop_count {
                    self.result_type = IcpExitType::MaxBadIterations;
                    break;
                }
            }

            if !progress(iter as f32 / self.prop.iter_limit as f32) {
                for (obj, xf) in self.objs.iter_mut().zip(entry_xfs) {
                    obj.xf = xf;
                }
                self.result_type = IcpExitType::Cancelled;
                log::info!("{}", self.status_info());
                return None;
            }
        }

        log::info!("{}", self.status_info());
        Some(self.objs.iter().map(|obj| obj.xf).collect())
    }

    fn notify_iteration(&mut self, iter: usize) {
        if let Some(cb) = self.per_iteration_cb.as_mut() {
            cb(iter);
        }
    }

    /// The objects with their current transforms.
    pub fn objects(&self) -> &[IcpObject<'a>] {
        &self.objs
    }

    /// The pairs between the objects.
    pub fn pairs(&self) -> &PairStore {
        &self.pairs
    }

    /// Root mean square point-to-point distance over all active pairs.
    pub fn mean_sq_dist_to_point(&self) -> f32 {
        self.pairs.sum_sq_dist_to_point().root_mean_sq()
    }

    /// Root mean square point-to-point distance over the active pairs touching object `id`.
    pub fn mean_sq_dist_to_point_of(&self, id: usize) -> f32 {
        self.pairs.sum_sq_dist_to_point_of(id).root_mean_sq()
    }

    /// Root mean square point-to-plane distance over all active pairs.
    pub fn mean_sq_dist_to_plane(&self) -> f32 {
        self.pairs.sum_sq_dist_to_plane().root_mean_sq()
    }

    /// Root mean square point-to-plane distance over the active pairs touching object `id`.
    pub fn mean_sq_dist_to_plane_of(&self, id: usize) -> f32 {
        self.pairs.sum_sq_dist_to_plane_of(id).root_mean_sq()
    }

    /// Number of active pairs.
    pub fn num_active_pairs(&self) -> usize {
        self.pairs.num_active_pairs()
    }

    /// Number of active pairs touching object `id`.
    pub fn num_active_pairs_of(&self, id: usize) -> usize {
        self.pairs.num_active_pairs_of(id)
    }

    /// Number of iterations of the last run.
    pub fn iterations(&self) -> usize {
        self.iter
    }

    /// Why the last run stopped.
    pub fn exit_type(&self) -> IcpExitType {
        self.result_type
    }

    /// Human readable summary of the last run.
    pub fn status_info(&self) -> String {
        icp_status_info(self.iter, self.result_type)
    }
}
