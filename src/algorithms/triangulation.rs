use nalgebra::{Matrix3x4, Matrix4, Vector2, Vector3, Vector4};

use crate::error::{PointDegeneracy, Stage, TwoViewError};

/// Second-smallest singular value, relative to the largest, under which the
/// constraint system is treated as having a null space of dimension >= 2.
const RANK_TOLERANCE: f64 = 1e-10;

/// Homogeneous divisors smaller than this fraction of the vector norm are zero.
const DIVISOR_TOLERANCE: f64 = 1e-12;

/// Outcome of triangulating a single correspondence.
pub type PointEstimate = Result<Vector3<f64>, PointDegeneracy>;

/// Result of a linear two-view triangulation.
///
/// `estimates` is index-aligned with the input correspondences. Degenerate
/// points are kept in place as errors and do not contribute to `error`.
#[derive(Clone, Debug)]
pub struct Triangulation {
    pub estimates: Vec<PointEstimate>,
    /// Sum over points and both views of the squared pixel reprojection distance.
    pub error: f64,
}

impl Triangulation {
    pub fn len(&self) -> usize {
        self.estimates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.estimates.is_empty()
    }

    /// Iterate the points that triangulated cleanly.
    pub fn points(&self) -> impl Iterator<Item = &Vector3<f64>> + '_ {
        self.estimates.iter().filter_map(|estimate| estimate.as_ref().ok())
    }

    /// Indices of the correspondences that could not be triangulated, with the reason.
    pub fn degenerate(&self) -> impl Iterator<Item = (usize, PointDegeneracy)> + '_ {
        self.estimates
            .iter()
            .enumerate()
            .filter_map(|(index, estimate)| estimate.as_ref().err().map(|kind| (index, *kind)))
    }

    /// Unwrap into plain points, failing on the first degenerate correspondence.
    pub fn into_points(self) -> Result<Vec<Vector3<f64>>, TwoViewError> {
        self.estimates
            .into_iter()
            .enumerate()
            .map(|(index, estimate)| {
                estimate.map_err(|kind| TwoViewError::Degenerate { index, kind })
            })
            .collect()
    }
}

/// Build the 4x4 homogeneous system `A X = 0` for one correspondence.
///
/// Two rows come from each view: `y * p3 - p2` and `p1 - x * p3`, where `pk`
/// is the k-th row of that view's projection matrix.
pub fn constraint_system(
    camera_matrix1: &Matrix3x4<f64>,
    x1: &Vector2<f64>,
    camera_matrix2: &Matrix3x4<f64>,
    x2: &Vector2<f64>,
) -> Matrix4<f64> {
    Matrix4::from_rows(&[
        x1.y * camera_matrix1.row(2) - camera_matrix1.row(1),
        camera_matrix1.row(0) - x1.x * camera_matrix1.row(2),
        x2.y * camera_matrix2.row(2) - camera_matrix2.row(1),
        camera_matrix2.row(0) - x2.x * camera_matrix2.row(2),
    ])
}

/// Solve a constraint system for its null-space direction and return the
/// Euclidean point it represents.
///
/// The right singular vector of the smallest singular value is scaled so its
/// fourth coordinate is one. Only the null space matters, so scaling any row
/// of `matrix_a` leaves the result unchanged.
pub fn solve_constraint_system(matrix_a: &Matrix4<f64>) -> Result<Vector3<f64>, PointDegeneracy> {
    let svd = matrix_a.svd(false, true);
    let matrix_v_t = svd.v_t.ok_or(PointDegeneracy::DegenerateGeometry)?;
    let singular_values = svd.singular_values;

    // nalgebra does not promise an ordering, so rank the values explicitly
    let mut order = [0usize, 1, 2, 3];
    order.sort_by(|&i, &j| singular_values[i].total_cmp(&singular_values[j]));

    let largest = singular_values[order[3]];
    if largest.is_nan() || largest <= 0.0 || singular_values[order[1]] <= RANK_TOLERANCE * largest {
        return Err(PointDegeneracy::DegenerateGeometry);
    }

    let null_vector = matrix_v_t.row(order[0]);
    let w = null_vector[3];
    if w.abs() <= DIVISOR_TOLERANCE * null_vector.norm() {
        return Err(PointDegeneracy::NormalizationFailure(Stage::Solve));
    }

    Ok(Vector3::new(
        null_vector[0] / w,
        null_vector[1] / w,
        null_vector[2] / w,
    ))
}

/// Project a Euclidean point through a camera and return pixel coordinates.
pub fn reproject(
    camera_matrix: &Matrix3x4<f64>,
    point: &Vector3<f64>,
    view: u8,
) -> Result<Vector2<f64>, PointDegeneracy> {
    let projected = camera_matrix * Vector4::new(point.x, point.y, point.z, 1.0);
    dehomogenize(&projected).ok_or(PointDegeneracy::NormalizationFailure(Stage::Reprojection(view)))
}

fn dehomogenize(x: &Vector3<f64>) -> Option<Vector2<f64>> {
    if x.z.abs() <= DIVISOR_TOLERANCE * x.norm() {
        return None;
    }
    Some(Vector2::new(x.x / x.z, x.y / x.z))
}

/// Linear (DLT) triangulation of index-aligned correspondences in two views.
///
/// Every correspondence yields one entry in the output, either a point or the
/// reason it is degenerate. The total error sums the squared pixel distances
/// between observations and reprojections in both views for the clean points.
pub fn triangulate_linear(
    camera_matrix1: &Matrix3x4<f64>,
    x1_set: &[Vector2<f64>],
    camera_matrix2: &Matrix3x4<f64>,
    x2_set: &[Vector2<f64>],
) -> Result<Triangulation, TwoViewError> {
    validate_correspondences(x1_set, x2_set, 1)?;
    ensure_finite(camera_matrix1.iter(), "first projection matrix")?;
    ensure_finite(camera_matrix2.iter(), "second projection matrix")?;

    let mut error = 0.0;
    let estimates: Vec<PointEstimate> = x1_set
        .iter()
        .zip(x2_set)
        .map(|(x1, x2)| {
            let matrix_a = constraint_system(camera_matrix1, x1, camera_matrix2, x2);
            let point = solve_constraint_system(&matrix_a)?;

            let x1_hat = reproject(camera_matrix1, &point, 1)?;
            let x2_hat = reproject(camera_matrix2, &point, 2)?;
            error += (x1 - x1_hat).norm_squared() + (x2 - x2_hat).norm_squared();

            Ok(point)
        })
        .collect();

    let triangulation = Triangulation { estimates, error };
    for (index, kind) in triangulation.degenerate() {
        log::debug!("correspondence {index} is degenerate: {kind}");
    }

    Ok(triangulation)
}

/// Eager shape and sanity checks on a pair of correspondence sets.
pub(crate) fn validate_correspondences(
    x1_set: &[Vector2<f64>],
    x2_set: &[Vector2<f64>],
    required: usize,
) -> Result<(), TwoViewError> {
    if x1_set.len() != x2_set.len() {
        return Err(TwoViewError::InputShapeMismatch {
            left: x1_set.len(),
            right: x2_set.len(),
        });
    }
    if x1_set.len() < required {
        return Err(TwoViewError::NotEnoughCorrespondences {
            required,
            got: x1_set.len(),
        });
    }
    ensure_finite(
        x1_set.iter().chain(x2_set).flat_map(|x| x.iter()),
        "correspondences",
    )
}

pub(crate) fn ensure_finite<'a>(
    values: impl IntoIterator<Item = &'a f64>,
    what: &'static str,
) -> Result<(), TwoViewError> {
    if values.into_iter().all(|v| v.is_finite()) {
        Ok(())
    } else {
        Err(TwoViewError::NonFiniteInput(what))
    }
}
