use std::cmp::Ordering;

use nalgebra::{Matrix3, Matrix3x4, Vector2, Vector3, Vector4};

use crate::{
    algorithms::{
        epipolar::{EssentialMatrix, FundamentalMatrix},
        triangulation::{ensure_finite, triangulate_linear, validate_correspondences, Triangulation},
    },
    error::TwoViewError,
};

const NUM_CONFIGURATIONS: usize = 4;

/// Candidate `[R | t]` extrinsics for camera 2.
pub type PoseCandidates = [Matrix3x4<f64>; NUM_CONFIGURATIONS];

/// Intrinsic matrices of both cameras.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Intrinsics {
    pub k1: Matrix3<f64>,
    pub k2: Matrix3<f64>,
}

/// The disambiguated pose of camera 2 with the structure triangulated under it.
#[derive(Clone, Debug)]
pub struct SelectedPose {
    /// Extrinsic `[R | t]` of camera 2, camera 1 being `[I | 0]`.
    pub m2: Matrix3x4<f64>,
    /// Projection matrix `K2 * m2`.
    pub c2: Matrix3x4<f64>,
    pub triangulation: Triangulation,
    /// Number of points in front of both cameras.
    pub in_front: usize,
}

/// Source of the four relative-pose configurations encoded by an essential matrix.
pub trait PoseDecomposer {
    fn pose_candidates(&self, essential: &EssentialMatrix) -> Result<PoseCandidates, TwoViewError>;
}

/// Decomposition by SVD of the essential matrix, see [`EssentialMatrix::pose_candidates`].
#[derive(Clone, Copy, Debug, Default)]
pub struct SvdDecomposer;

impl PoseDecomposer for SvdDecomposer {
    fn pose_candidates(&self, essential: &EssentialMatrix) -> Result<PoseCandidates, TwoViewError> {
        essential.pose_candidates()
    }
}

type T = f64;

/// Pinhole intrinsic with square pixels and the principal point at the image center.
pub fn pinhole_intrinsic(focal: T, width: T, height: T) -> Matrix3<T> {
    Matrix3::new(
        focal,
        0.0,
        width / 2.0,
        0.0,
        focal,
        height / 2.0,
        0.0,
        0.0,
        1.0,
    )
}

/// Extrinsic `[I | 0]` of the reference camera.
pub fn identity_extrinsic() -> Matrix3x4<f64> {
    Matrix3x4::identity()
}

/// Stack a rotation and a translation into `[R | t]`.
pub fn extrinsic_matrix(rotation: &Matrix3<f64>, translation: &Vector3<f64>) -> Matrix3x4<f64> {
    Matrix3x4::from_columns(&[
        rotation.column(0).into_owned(),
        rotation.column(1).into_owned(),
        rotation.column(2).into_owned(),
        *translation,
    ])
}

/// Compose an intrinsic matrix with an extrinsic into a 3x4 projection matrix.
pub fn projection_matrix(intrinsic: &Matrix3<f64>, extrinsic: &Matrix3x4<f64>) -> Matrix3x4<f64> {
    intrinsic * extrinsic
}

/// Depth of a world point along the optical axis of a camera with the given extrinsic.
pub fn depth(extrinsic: &Matrix3x4<f64>, point: &Vector3<f64>) -> f64 {
    (extrinsic * Vector4::new(point.x, point.y, point.z, 1.0)).z
}

/// Count the points satisfying the [Cheirality Condition](http://users.cecs.anu.edu.au/~hartley/Papers/cheiral/revision/cheiral.pdf),
/// i.e. lying strictly in front of camera 1 (`[I | 0]`) and of camera 2 (`extrinsic`).
///
/// Each point is checked on its own: `X_3 > 0` and `r_3 X + t_3 > 0`.
pub fn cheirality_count<'a>(
    extrinsic: &Matrix3x4<f64>,
    points: impl IntoIterator<Item = &'a Vector3<f64>>,
) -> usize {
    points
        .into_iter()
        .filter(|x| x.z > 0.0 && depth(extrinsic, x) > 0.0)
        .count()
}

/// Ranking of one candidate pose over a set of correspondences.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct CandidateScore {
    /// Points in front of both cameras.
    pub in_front: usize,
    /// Correspondences that did not triangulate.
    pub degenerate: usize,
    /// Reprojection error over the correspondences that did.
    pub error: f64,
}

impl CandidateScore {
    pub fn of(extrinsic: &Matrix3x4<f64>, triangulation: &Triangulation) -> Self {
        Self {
            in_front: cheirality_count(extrinsic, triangulation.points()),
            degenerate: triangulation.degenerate().count(),
            error: triangulation.error,
        }
    }

    /// More points in front wins, then fewer degenerate points. Errors are
    /// only compared once both candidates sum over the same number of points.
    pub fn beats(&self, other: &Self) -> bool {
        match self
            .in_front
            .cmp(&other.in_front)
            .then(other.degenerate.cmp(&self.degenerate))
        {
            Ordering::Greater => true,
            Ordering::Less => false,
            Ordering::Equal => self.error < other.error,
        }
    }
}

/// Determines which candidate pose of camera 2 is correct.
///
/// Every candidate is triangulated and ranked with [`CandidateScore::beats`].
/// The winner is then triangulated once more for the returned structure.
pub fn select_from_candidates(
    candidates: &PoseCandidates,
    x1_set: &[Vector2<f64>],
    x2_set: &[Vector2<f64>],
    intrinsics: &Intrinsics,
) -> Result<SelectedPose, TwoViewError> {
    validate_correspondences(x1_set, x2_set, 1)?;
    ensure_finite(intrinsics.k1.iter(), "first intrinsic matrix")?;
    ensure_finite(intrinsics.k2.iter(), "second intrinsic matrix")?;

    let camera_matrix1 = projection_matrix(&intrinsics.k1, &identity_extrinsic());

    let mut best: Option<(usize, CandidateScore)> = None;
    for (i, m2) in candidates.iter().enumerate() {
        let camera_matrix2 = projection_matrix(&intrinsics.k2, m2);
        let triangulation = triangulate_linear(&camera_matrix1, x1_set, &camera_matrix2, x2_set)?;
        let score = CandidateScore::of(m2, &triangulation);

        log::debug!(
            "pose candidate {i}: {}/{} points in front, {} degenerate, reprojection error {:.6}",
            score.in_front,
            triangulation.len(),
            score.degenerate,
            score.error
        );

        let improves = match &best {
            None => score.in_front > 0,
            Some((_, best_score)) => score.beats(best_score),
        };
        if improves {
            best = Some((i, score));
        }
    }

    let (index, CandidateScore { in_front, .. }) = best.ok_or(TwoViewError::SelectionFailure)?;
    let m2 = candidates[index];
    let c2 = projection_matrix(&intrinsics.k2, &m2);
    let triangulation = triangulate_linear(&camera_matrix1, x1_set, &c2, x2_set)?;

    log::info!(
        "selected pose candidate {index} with {in_front}/{} points in front, reprojection error {:.6}",
        triangulation.len(),
        triangulation.error
    );

    Ok(SelectedPose {
        m2,
        c2,
        triangulation,
        in_front,
    })
}

/// Recover camera 2's pose from a fundamental matrix, using `decomposer` for
/// the essential matrix configurations.
pub fn select_pose_with<D: PoseDecomposer>(
    decomposer: &D,
    fundamental: &FundamentalMatrix,
    x1_set: &[Vector2<f64>],
    x2_set: &[Vector2<f64>],
    intrinsics: &Intrinsics,
) -> Result<SelectedPose, TwoViewError> {
    validate_correspondences(x1_set, x2_set, 1)?;
    ensure_finite(fundamental.0.iter(), "fundamental matrix")?;

    let essential = fundamental.into_essential(&intrinsics.k1, &intrinsics.k2);
    let candidates = decomposer.pose_candidates(&essential)?;

    select_from_candidates(&candidates, x1_set, x2_set, intrinsics)
}

/// Recover camera 2's pose from a fundamental matrix and the camera intrinsics.
pub fn select_pose(
    fundamental: &FundamentalMatrix,
    x1_set: &[Vector2<f64>],
    x2_set: &[Vector2<f64>],
    intrinsics: &Intrinsics,
) -> Result<SelectedPose, TwoViewError> {
    select_pose_with(&SvdDecomposer, fundamental, x1_set, x2_set, intrinsics)
}
