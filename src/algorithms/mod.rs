//! Collection of the two-view geometry algorithms: linear triangulation,
//! relative pose disambiguation and the epipolar estimates feeding them.

pub mod camera;
pub mod epipolar;
pub mod triangulation;

pub use camera::{
    select_from_candidates, select_pose, select_pose_with, CandidateScore, Intrinsics,
    PoseDecomposer, SelectedPose, SvdDecomposer,
};
pub use epipolar::{estimate_fundamental, EightPoint, EssentialMatrix, FundamentalMatrix};
pub use triangulation::{triangulate_linear, Triangulation};
