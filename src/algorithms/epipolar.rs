use nalgebra::{DMatrix, Matrix3, Matrix3x4, RowVector3, Vector2, Vector3};
use sample_consensus::{Estimator, Model};

use crate::{
    algorithms::{
        camera::extrinsic_matrix,
        triangulation::{ensure_finite, validate_correspondences},
    },
    error::TwoViewError,
};

/// A pixel in view 1 and its match in view 2.
pub type Correspondence = (Vector2<f64>, Vector2<f64>);

const EIGHT_POINT_SAMPLES: usize = 8;

/// Fundamental matrix `F` with `x2^T F x1 = 0` for matching pixels.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct FundamentalMatrix(pub Matrix3<f64>);

/// Essential matrix `E = K2^T F K1`, the calibrated counterpart of [`FundamentalMatrix`].
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct EssentialMatrix(pub Matrix3<f64>);

/// E = K2^T F K1
pub fn essential_from_fundamental(
    fundamental: &Matrix3<f64>,
    k1: &Matrix3<f64>,
    k2: &Matrix3<f64>,
) -> Matrix3<f64> {
    k2.transpose() * fundamental * k1
}

impl FundamentalMatrix {
    pub fn into_essential(self, k1: &Matrix3<f64>, k2: &Matrix3<f64>) -> EssentialMatrix {
        EssentialMatrix(essential_from_fundamental(&self.0, k1, k2))
    }
}

impl EssentialMatrix {
    /// Convert the Essential Matrix into the four `[R | t]` configurations of camera 2.
    ///
    /// With `E = U diag(s, s, 0) V^T` and `W` a quarter turn about z, the rotations
    /// are `U W V^T` and `U W^T V^T`, and the translation is `+-u_3`. U and V^T are
    /// sign-corrected so both rotations are proper, and the translation has unit norm.
    pub fn pose_candidates(&self) -> Result<[Matrix3x4<f64>; 4], TwoViewError> {
        ensure_finite(self.0.iter(), "essential matrix")?;

        let svd = self.0.svd(true, true);
        let matrix_u = svd.u.ok_or(TwoViewError::SvdFailure)?;
        let matrix_v_t = svd.v_t.ok_or(TwoViewError::SvdFailure)?;

        // reorder so the smallest singular value comes last
        let mut order = [0usize, 1, 2];
        order.sort_by(|&i, &j| svd.singular_values[j].total_cmp(&svd.singular_values[i]));

        let mut matrix_u = Matrix3::from_columns(&order.map(|i| matrix_u.column(i).into_owned()));
        let mut matrix_v_t = Matrix3::from_rows(&order.map(|i| matrix_v_t.row(i).into_owned()));

        if matrix_u.determinant() < 0.0 {
            matrix_u.column_mut(2).neg_mut();
        }
        if matrix_v_t.determinant() < 0.0 {
            matrix_v_t.row_mut(2).neg_mut();
        }

        let matrix_w = Matrix3::new(0.0, -1.0, 0.0, 1.0, 0.0, 0.0, 0.0, 0.0, 1.0);

        let rotation1 = matrix_u * matrix_w * matrix_v_t;
        let rotation2 = matrix_u * matrix_w.transpose() * matrix_v_t;

        // t = u_3 where: U[u_1, u_2, u_3]
        let camera_t: Vector3<f64> = matrix_u.column(2).normalize();

        Ok([
            extrinsic_matrix(&rotation1, &camera_t),
            extrinsic_matrix(&rotation1, &-camera_t),
            extrinsic_matrix(&rotation2, &camera_t),
            extrinsic_matrix(&rotation2, &-camera_t),
        ])
    }
}

impl Model<Correspondence> for FundamentalMatrix {
    /// Symmetric epipolar distance of a correspondence under this matrix.
    fn residual(&self, data: &Correspondence) -> f64 {
        let src_homogenous = Vector3::new(data.0.x, data.0.y, 1.0);
        let dst_homogenous = Vector3::new(data.1.x, data.1.y, 1.0);

        // epipolar lines in view 2 and view 1
        let line2 = self.0 * src_homogenous;
        let line1 = self.0.transpose() * dst_homogenous;
        let algebraic = dst_homogenous.dot(&line2).abs();

        let norm = f64::sqrt(
            line2.x * line2.x + line2.y * line2.y + line1.x * line1.x + line1.y * line1.y,
        );
        if norm > 0.0 {
            algebraic / norm
        } else {
            f64::INFINITY
        }
    }
}

/// Normalized eight-point estimator for the fundamental matrix.
///
/// Each view is moved to its centroid and scaled to a mean distance of
/// `sqrt(2)` before the design matrix is built, and the estimate is mapped
/// back afterwards. `scale` (usually the larger image dimension) is only used
/// for a view whose points all coincide. Accepts eight or more correspondences.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct EightPoint {
    pub scale: f64,
}

impl EightPoint {
    pub fn new(scale: f64) -> Self {
        Self { scale }
    }

    /// Similarity taking `points` to zero mean and mean distance `sqrt(2)`.
    fn normalizing_transform(&self, points: &[Vector2<f64>]) -> Matrix3<f64> {
        let n = points.len() as f64;
        let centroid = points.iter().sum::<Vector2<f64>>() / n;
        let mean_distance = points.iter().map(|x| (x - centroid).norm()).sum::<f64>() / n;

        if mean_distance > 0.0 && mean_distance.is_finite() {
            let s = std::f64::consts::SQRT_2 / mean_distance;
            Matrix3::new(s, 0.0, -s * centroid.x, 0.0, s, -s * centroid.y, 0.0, 0.0, 1.0)
        } else {
            let s = self.scale.recip();
            Matrix3::new(s, 0.0, 0.0, 0.0, s, 0.0, 0.0, 0.0, 1.0)
        }
    }

    fn solve<I>(&self, data: I) -> Option<FundamentalMatrix>
    where
        I: Iterator<Item = Correspondence>,
    {
        if !(self.scale.is_finite() && self.scale > 0.0) {
            return None;
        }
        let (src, dst): (Vec<Vector2<f64>>, Vec<Vector2<f64>>) = data.unzip();
        if src.len() < EIGHT_POINT_SAMPLES {
            return None;
        }

        let matrix_t1 = self.normalizing_transform(&src);
        let matrix_t2 = self.normalizing_transform(&dst);
        let apply = |t: &Matrix3<f64>, x: &Vector2<f64>| {
            Vector2::new(t[(0, 0)] * x.x + t[(0, 2)], t[(1, 1)] * x.y + t[(1, 2)])
        };

        // Setup homogeneous linear equation as dst' * F * src = 0.
        const COLUMNS: usize = 9;
        let rows: Vec<[f64; COLUMNS]> = src
            .iter()
            .zip(&dst)
            .map(|(src, dst)| {
                let p = apply(&matrix_t1, src);
                let q = apply(&matrix_t2, dst);
                let (x, y, xp, yp) = (p.x, p.y, q.x, q.y);
                [xp * x, xp * y, xp, yp * x, yp * y, yp, x, y, 1.0]
            })
            .collect();

        // a thin SVD of an 8x9 matrix only has 8 right singular vectors, so pad
        // with zero rows; they leave the null space unchanged
        let matrix_a = DMatrix::from_fn(rows.len().max(COLUMNS), COLUMNS, |i, j| {
            rows.get(i).map_or(0.0, |row| row[j])
        });

        // Solve for the nullspace of the constraint matrix.
        let svd = matrix_a.svd(false, true);
        let matrix_v_t = svd.v_t?;
        let null_index = index_of_smallest(svd.singular_values.iter())?;
        let normalized = Matrix3::from_row_iterator(matrix_v_t.row(null_index).iter().copied());

        // Create a Rank 2 matrix to eliminate noise
        let svd = normalized.svd(true, true);
        let (matrix_u, matrix_v_t) = (svd.u?, svd.v_t?);
        let mut singular_values = svd.singular_values;
        let smallest = index_of_smallest(singular_values.iter())?;
        singular_values[smallest] = 0.0;
        let rank2 = matrix_u * Matrix3::from_diagonal(&singular_values) * matrix_v_t;

        // undo the normalization: F = T2^T F' T1
        let fundamental = matrix_t2.transpose() * rank2 * matrix_t1;

        let corner = fundamental[(2, 2)];
        let fundamental = if corner.abs() > 1e-12 * fundamental.norm() {
            fundamental / corner
        } else {
            fundamental.normalize()
        };

        fundamental
            .iter()
            .all(|v| v.is_finite())
            .then_some(FundamentalMatrix(fundamental))
    }
}

fn index_of_smallest<'a>(values: impl Iterator<Item = &'a f64>) -> Option<usize> {
    values
        .enumerate()
        .min_by(|a, b| a.1.total_cmp(b.1))
        .map(|(index, _)| index)
}

impl Estimator<Correspondence> for EightPoint {
    const MIN_SAMPLES: usize = EIGHT_POINT_SAMPLES;
    type Model = FundamentalMatrix;
    type ModelIter = Option<FundamentalMatrix>;

    fn estimate<I>(&self, data: I) -> Self::ModelIter
    where
        I: Iterator<Item = Correspondence> + Clone,
    {
        self.solve(data)
    }
}

/// Estimate the fundamental matrix from all correspondences with [`EightPoint`].
pub fn estimate_fundamental(
    x1_set: &[Vector2<f64>],
    x2_set: &[Vector2<f64>],
    scale: f64,
) -> Result<FundamentalMatrix, TwoViewError> {
    validate_correspondences(x1_set, x2_set, EIGHT_POINT_SAMPLES)?;

    EightPoint::new(scale)
        .estimate(x1_set.iter().copied().zip(x2_set.iter().copied()))
        .ok_or(TwoViewError::FundamentalEstimation)
}

/// Cross-product matrix `[t]x`.
pub fn skew(t: &Vector3<f64>) -> Matrix3<f64> {
    Matrix3::from_rows(&[
        RowVector3::new(0.0, -t.z, t.y),
        RowVector3::new(t.z, 0.0, -t.x),
        RowVector3::new(-t.y, t.x, 0.0),
    ])
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::algorithms::camera::{identity_extrinsic, projection_matrix};
    use crate::algorithms::triangulation::reproject;
    use approx::assert_relative_eq;
    use nalgebra::Rotation3;
    use rand::{rngs::StdRng, Rng, SeedableRng};
    use rand_distr::{Distribution, Normal};

    fn relative_pose() -> (Matrix3<f64>, Vector3<f64>) {
        let rotation = Rotation3::from_euler_angles(0.1, -0.05, 0.2);
        (rotation.into_inner(), Vector3::new(0.6, 0.02, -0.1))
    }

    fn k1() -> Matrix3<f64> {
        Matrix3::new(600.0, 0.0, 320.0, 0.0, 600.0, 240.0, 0.0, 0.0, 1.0)
    }

    fn k2() -> Matrix3<f64> {
        Matrix3::new(580.0, 0.0, 310.0, 0.0, 585.0, 250.0, 0.0, 0.0, 1.0)
    }

    fn synthetic_matches(n: usize) -> (Vec<Vector2<f64>>, Vec<Vector2<f64>>) {
        let (r, t) = relative_pose();
        let c1 = projection_matrix(&k1(), &identity_extrinsic());
        let c2 = projection_matrix(&k2(), &extrinsic_matrix(&r, &t));
        let mut rng = StdRng::seed_from_u64(3);
        (0..n)
            .map(|_| {
                let x = Vector3::new(
                    rng.gen_range(-2.0..2.0),
                    rng.gen_range(-1.5..1.5),
                    rng.gen_range(4.0..9.0),
                );
                (reproject(&c1, &x, 1).unwrap(), reproject(&c2, &x, 2).unwrap())
            })
            .unzip()
    }

    #[test]
    fn candidates_contain_the_true_pose() {
        let (r, t) = relative_pose();
        let essential = EssentialMatrix(skew(&t) * r);

        let candidates = essential.pose_candidates().unwrap();
        let expected = extrinsic_matrix(&r, &t.normalize());

        let matching = candidates
            .iter()
            .filter(|m| (*m - expected).norm() < 1e-9)
            .count();
        assert_eq!(matching, 1);
    }

    #[test]
    fn candidates_are_proper_and_reproduce_essential() {
        let (r, t) = relative_pose();
        let e = skew(&t) * r;
        let e_unit = e.normalize();

        for candidate in EssentialMatrix(e).pose_candidates().unwrap() {
            let rotation = candidate.fixed_columns::<3>(0).into_owned();
            let translation = candidate.column(3).into_owned();

            assert_relative_eq!(rotation.determinant(), 1.0, epsilon = 1e-9);
            assert_relative_eq!(rotation.transpose() * rotation, Matrix3::identity(), epsilon = 1e-9);
            assert_relative_eq!(translation.norm(), 1.0, epsilon = 1e-12);

            let rebuilt = (skew(&translation) * rotation).normalize();
            let same = (rebuilt - e_unit).norm().min((rebuilt + e_unit).norm());
            assert!(same < 1e-9, "candidate does not reproduce E: {same}");
        }
    }

    #[test]
    fn non_finite_essential_is_rejected() {
        let mut e = Matrix3::identity();
        e[(1, 1)] = f64::INFINITY;
        assert!(matches!(
            EssentialMatrix(e).pose_candidates(),
            Err(TwoViewError::NonFiniteInput(_))
        ));
    }

    #[test]
    fn essential_round_trips_through_fundamental() {
        let (r, t) = relative_pose();
        let e = skew(&t) * r;
        let f = k2().try_inverse().unwrap().transpose() * e * k1().try_inverse().unwrap();

        let essential = FundamentalMatrix(f).into_essential(&k1(), &k2());
        assert_relative_eq!(essential.0, e, epsilon = 1e-9);
    }

    #[test]
    fn eight_point_satisfies_epipolar_constraint() {
        let (pts1, pts2) = synthetic_matches(30);
        let fundamental = estimate_fundamental(&pts1, &pts2, 640.0).unwrap();

        for (x1, x2) in pts1.iter().zip(&pts2) {
            let residual = fundamental.residual(&(*x1, *x2));
            assert!(residual < 1e-6, "epipolar residual too large: {residual}");
        }
        assert_relative_eq!(fundamental.0[(2, 2)], 1.0);
        assert_relative_eq!(fundamental.0.determinant(), 0.0, epsilon = 1e-9);
    }

    #[test]
    fn eight_point_matches_ground_truth() {
        let (r, t) = relative_pose();
        let e = skew(&t) * r;
        let f_true = k2().try_inverse().unwrap().transpose() * e * k1().try_inverse().unwrap();
        let f_true = f_true / f_true[(2, 2)];

        let (pts1, pts2) = synthetic_matches(8);
        let fundamental = estimate_fundamental(&pts1, &pts2, 640.0).unwrap();
        assert_relative_eq!(fundamental.0, f_true, epsilon = 1e-6, max_relative = 1e-6);
    }

    #[test]
    fn eight_point_does_not_depend_on_scale() {
        let (pts1, pts2) = synthetic_matches(20);
        let small = estimate_fundamental(&pts1, &pts2, 640.0).unwrap();
        let large = estimate_fundamental(&pts1, &pts2, 1.0e6).unwrap();
        assert_eq!(small, large);
    }

    #[test]
    fn eight_point_is_stable_under_pixel_noise() {
        let (pts1, pts2) = synthetic_matches(60);
        let mut rng = StdRng::seed_from_u64(17);
        let noise = Normal::new(0.0, 0.5).unwrap();
        let mut jitter = |x: &Vector2<f64>| {
            x + Vector2::new(noise.sample(&mut rng), noise.sample(&mut rng))
        };
        let noisy1: Vec<_> = pts1.iter().map(&mut jitter).collect();
        let noisy2: Vec<_> = pts2.iter().map(&mut jitter).collect();

        let fundamental = estimate_fundamental(&noisy1, &noisy2, 640.0).unwrap();
        let mean = noisy1
            .iter()
            .zip(&noisy2)
            .map(|(x1, x2)| fundamental.residual(&(*x1, *x2)))
            .sum::<f64>()
            / 60.0;
        assert!(mean < 1.0, "mean epipolar distance {mean}");
    }

    #[test]
    fn coincident_view_falls_back_to_scale() {
        let estimator = EightPoint::new(500.0);
        let points = vec![Vector2::new(10.0, 20.0); 8];
        let t = estimator.normalizing_transform(&points);
        assert_eq!(t, Matrix3::new(0.002, 0.0, 0.0, 0.0, 0.002, 0.0, 0.0, 0.0, 1.0));

        let spread = [Vector2::new(0.0, 0.0), Vector2::new(2.0, 0.0)];
        let t = estimator.normalizing_transform(&spread);
        let centered = t * Vector3::new(2.0, 0.0, 1.0);
        assert_relative_eq!(centered, Vector3::new(std::f64::consts::SQRT_2, 0.0, 1.0));
    }

    #[test]
    fn eight_point_needs_eight_matches() {
        let (pts1, pts2) = synthetic_matches(7);
        assert!(matches!(
            estimate_fundamental(&pts1, &pts2, 640.0),
            Err(TwoViewError::NotEnoughCorrespondences { required: 8, got: 7 })
        ));
    }

    #[test]
    fn eight_point_rejects_bad_scale() {
        let (pts1, pts2) = synthetic_matches(12);
        assert!(matches!(
            estimate_fundamental(&pts1, &pts2, 0.0),
            Err(TwoViewError::FundamentalEstimation)
        ));
    }
}
