use argh::FromArgs;
use std::path::PathBuf;

use glam::{Affine3A, DAffine3, DQuat, DVec3};
use kornia_3d::{
    pointcloud::PointCloud, synthetic::fibonacci_ellipsoid, transforms::transform_pointcloud,
};
use kornia_registration::{IcpObject, IcpProperties, MultiwayIcp, PointCloudSource};
use rand::{rngs::StdRng, Rng, SeedableRng};

#[derive(FromArgs)]
/// Register synthetic point clouds displaced by random motions
struct Args {
    /// number of point clouds to register
    #[argh(option, default = "4")]
    num_objects: usize,

    /// number of points per cloud
    #[argh(option, default = "5000")]
    num_points: usize,

    /// voxel size used to sample the clouds
    #[argh(option, default = "0.02")]
    voxel_size: f32,

    /// maximum rotation angle of the displacement in radians
    #[argh(option, default = "0.05")]
    max_angle: f64,

    /// maximum translation of the displacement along each axis
    #[argh(option, default = "0.03")]
    max_shift: f64,

    /// amplitude of the uniform noise added to the points
    #[argh(option, default = "0.001")]
    noise: f64,

    /// seed of the random generator
    #[argh(option, default = "42")]
    seed: u64,

    /// solve a separate system per cloud
    #[argh(switch)]
    independent: bool,

    /// path to a json file with the registration parameters
    #[argh(option)]
    params: Option<PathBuf>,
}

fn random_motion(rng: &mut StdRng, max_angle: f64, max_shift: f64) -> DAffine3 {
    let mut uniform = |limit: f64| {
        if limit > 0.0 {
            rng.random_range(-limit..limit)
        } else {
            0.0
        }
    };
    let axis = DVec3::new(uniform(1.0), uniform(1.0), uniform(1.0)).normalize_or(DVec3::Z);
    let angle = uniform(max_angle);
    let shift = DVec3::new(uniform(max_shift), uniform(max_shift), uniform(max_shift));
    DAffine3::from_rotation_translation(DQuat::from_axis_angle(axis, angle), shift)
}

fn add_noise(
    cloud: &PointCloud,
    rng: &mut StdRng,
    noise: f64,
) -> Result<PointCloud, Box<dyn std::error::Error>> {
    if noise <= 0.0 {
        return Ok(cloud.clone());
    }
    let points = cloud
        .points()
        .iter()
        .map(|p| p.map(|v| v + rng.random_range(-noise..noise)))
        .collect();
    Ok(PointCloud::new(points, cloud.normals().map(|n| n.to_vec()))?)
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();
    let args: Args = argh::from_env();

    let prop = match &args.params {
        Some(path) => serde_json::from_str::<IcpProperties>(&std::fs::read_to_string(path)?)?,
        None => IcpProperties::default(),
    };

    let mut rng = StdRng::seed_from_u64(args.seed);
    let base = fibonacci_ellipsoid(args.num_points, [1.0, 0.8, 0.6], [0.0; 3])?;

    // the last cloud is the reference, the others are displaced
    let mut truth = (1..args.num_objects)
        .map(|_| random_motion(&mut rng, args.max_angle, args.max_shift))
        .collect::<Vec<_>>();
    truth.push(DAffine3::IDENTITY);

    let mut sources = Vec::with_capacity(truth.len());
    for xf in &truth {
        let cloud = transform_pointcloud(&base, &xf.inverse())?;
        sources.push(PointCloudSource::new(add_noise(&cloud, &mut rng, args.noise)?)?);
    }
    log::info!(
        "Generated {} clouds of {} points",
        sources.len(),
        args.num_points
    );

    let objects = sources
        .iter()
        .map(|s| IcpObject::new(s, Affine3A::IDENTITY))
        .collect::<Vec<_>>();

    let mut icp = MultiwayIcp::new(objects, args.voxel_size)?;
    icp.set_params(prop)?;
    icp.set_independent_equations(args.independent);
    icp.set_per_iteration_callback(|iter| log::debug!("Completed iteration {iter}"));

    let xfs = icp
        .calculate_transformations(|progress| {
            log::info!("Progress: {:.0}%", progress * 100.0);
            true
        })
        .ok_or("registration cancelled")?;

    println!("{}", icp.status_info());
    println!(
        "Active pairs: {}, point distance: {:.6}, plane distance: {:.6}",
        icp.num_active_pairs(),
        icp.mean_sq_dist_to_point(),
        icp.mean_sq_dist_to_plane()
    );

    for (id, (xf, expected)) in xfs.iter().zip(&truth).enumerate() {
        let err_t = (xf.translation.as_dvec3() - expected.translation).length();
        let err_r = (xf.matrix3.as_dmat3() - expected.matrix3)
            .to_cols_array()
            .iter()
            .map(|v| v * v)
            .sum::<f64>()
            .sqrt();
        println!(
            "Cloud #{id}: {} active pairs, translation error {err_t:.6}, rotation error {err_r:.6}",
            icp.num_active_pairs_of(id)
        );
    }

    Ok(())
}
