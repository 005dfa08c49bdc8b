#![deny(missing_docs)]
#![doc = env!("CARGO_PKG_DESCRIPTION")]

/// Correspondence search and outlier rejection.
pub mod correspondences;

mod error;
pub use error::RegistrationError;

/// The registration loop.
pub mod icp_multiway;
pub use icp_multiway::MultiwayIcp;

mod linalg;

/// Solver coupling the motions of all objects.
pub mod multiway;

/// Point pairs and their aggregates.
pub mod pairs;
pub use pairs::{NumSum, PairStore, PointPair, PointPairs};

/// Registration parameters and exit reasons.
pub mod params;
pub use params::{icp_status_info, IcpExitType, IcpMethod, IcpMetric, IcpMode, IcpProperties};

/// Point-to-plane aligning transform.
pub mod point_to_plane;

/// Point-to-point aligning transform.
pub mod point_to_point;

/// Per-iteration solving strategies.
pub mod solver;

/// The objects being registered.
pub mod source;
pub use source::{IcpObject, PointCloudSource, PointSource, Projection};

/// Small motion parametrizations.
pub mod xf;
