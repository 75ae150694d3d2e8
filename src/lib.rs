//! Two-view reconstruction for calibrated cameras.
//!
//! Given matched pixels in two views and both intrinsic matrices, recover the
//! pose of the second camera relative to the first and triangulate the scene
//! points. The pose is picked among the four configurations of the essential
//! matrix by counting points in front of both cameras.

pub mod algorithms;
pub mod error;
pub mod io;
pub mod reconstruction;

pub use algorithms::{
    estimate_fundamental, select_pose, triangulate_linear, Intrinsics, SelectedPose,
    Triangulation,
};
pub use error::{PointDegeneracy, ReconstructionError, Stage, TwoViewError};
pub use reconstruction::{reconstruct, Reconstruction, ReconstructionConfig};
