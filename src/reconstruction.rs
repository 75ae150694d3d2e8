use std::path::Path;

use nalgebra::{Matrix3, Matrix3x4, Vector2, Vector3};
use sample_consensus::Model;
use serde::{Deserialize, Serialize};

use crate::{
    algorithms::{estimate_fundamental, select_pose, Intrinsics, SelectedPose},
    error::ReconstructionError,
    io::{read_json, write_json_atomic, Correspondences, IntrinsicsRecord, ReconstructionRecord},
};

/// Settings for a reconstruction run.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReconstructionConfig {
    /// Normalization scale for the eight-point solver, usually the larger
    /// image dimension. Derived from the correspondences when unset.
    pub scale: Option<f64>,
    /// Upper bound on the total squared reprojection error of the result.
    pub max_reprojection_error: f64,
}

impl Default for ReconstructionConfig {
    fn default() -> Self {
        Self {
            scale: None,
            max_reprojection_error: 500.0,
        }
    }
}

/// Output of a successful reconstruction.
#[derive(Clone, Debug)]
pub struct Reconstruction {
    pub fundamental: Matrix3<f64>,
    /// Extrinsic of camera 2 relative to camera 1.
    pub m2: Matrix3x4<f64>,
    /// Projection matrix of camera 2.
    pub c2: Matrix3x4<f64>,
    pub points: Vec<Vector3<f64>>,
    /// Total squared reprojection error over both views.
    pub error: f64,
}

/// The larger dimension across the given images, reading only their headers.
pub fn scale_from_images<P: AsRef<Path>>(paths: &[P]) -> Result<Option<f64>, ReconstructionError> {
    let mut scale: Option<u32> = None;
    for path in paths {
        let (width, height) = image::image_dimensions(path)?;
        scale = Some(scale.unwrap_or(0).max(width).max(height));
    }
    Ok(scale.map(f64::from))
}

/// Largest absolute pixel coordinate, a stand-in for the image size.
pub fn scale_from_points(x1_set: &[Vector2<f64>], x2_set: &[Vector2<f64>]) -> f64 {
    let largest = x1_set
        .iter()
        .chain(x2_set)
        .map(|x| x.amax())
        .fold(0.0, f64::max);
    if largest > 0.0 {
        largest
    } else {
        1.0
    }
}

/// Estimate F, pick the pose of camera 2 and triangulate the scene.
///
/// Fails when pose selection fails, when any point of the final structure is
/// degenerate, or when the total reprojection error exceeds the configured bound.
pub fn reconstruct(
    x1_set: &[Vector2<f64>],
    x2_set: &[Vector2<f64>],
    intrinsics: &Intrinsics,
    config: &ReconstructionConfig,
) -> Result<Reconstruction, ReconstructionError> {
    let scale = config
        .scale
        .unwrap_or_else(|| scale_from_points(x1_set, x2_set));
    if !(scale.is_finite() && scale > 0.0) {
        return Err(ReconstructionError::InvalidScale(scale));
    }

    let fundamental = estimate_fundamental(x1_set, x2_set, scale)?;
    let mean_residual = x1_set
        .iter()
        .zip(x2_set)
        .map(|(x1, x2)| fundamental.residual(&(*x1, *x2)))
        .sum::<f64>()
        / x1_set.len() as f64;
    log::debug!("fundamental matrix with scale {scale}, mean epipolar distance {mean_residual:.6}");

    let SelectedPose {
        m2,
        c2,
        triangulation,
        ..
    } = select_pose(&fundamental, x1_set, x2_set, intrinsics)?;

    for (index, kind) in triangulation.degenerate() {
        log::warn!("correspondence {index} could not be triangulated: {kind}");
    }

    let error = triangulation.error;
    if error > config.max_reprojection_error {
        return Err(ReconstructionError::ReprojectionBoundExceeded {
            error,
            bound: config.max_reprojection_error,
        });
    }

    Ok(Reconstruction {
        fundamental: fundamental.0,
        m2,
        c2,
        points: triangulation.into_points()?,
        error,
    })
}

/// Read correspondences and intrinsics, reconstruct, and persist the result.
///
/// The output is written only once the whole reconstruction succeeded.
pub fn reconstruct_files(
    correspondences_path: &Path,
    intrinsics_path: &Path,
    output_path: &Path,
    config: &ReconstructionConfig,
) -> Result<Reconstruction, ReconstructionError> {
    let correspondences: Correspondences = read_json(correspondences_path)?;
    let intrinsics: IntrinsicsRecord = read_json(intrinsics_path)?;

    let reconstruction = reconstruct(
        &correspondences.points1(),
        &correspondences.points2(),
        &Intrinsics::from(&intrinsics),
        config,
    )?;

    write_json_atomic(output_path, &ReconstructionRecord::from(&reconstruction))?;
    log::info!(
        "reconstructed {} points with reprojection error {:.6}",
        reconstruction.points.len(),
        reconstruction.error
    );

    Ok(reconstruction)
}
