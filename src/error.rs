use std::fmt;

/// Where a homogeneous division failed while triangulating a single point.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Stage {
    /// Dividing the null-space vector by its fourth coordinate.
    Solve,
    /// Dividing a reprojected point by its third coordinate, for view 1 or 2.
    Reprojection(u8),
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Stage::Solve => write!(f, "solve"),
            Stage::Reprojection(view) => write!(f, "reprojection into view {view}"),
        }
    }
}

/// Why a single correspondence could not be turned into a Euclidean point.
#[derive(thiserror::Error, Clone, Copy, Debug, PartialEq, Eq)]
pub enum PointDegeneracy {
    /// The 4x4 constraint system has a null space of dimension two or more.
    #[error("rank-deficient constraint system")]
    DegenerateGeometry,
    /// A homogeneous divisor vanished.
    #[error("homogeneous coordinate vanishes during {0}")]
    NormalizationFailure(Stage),
}

/// Errors raised by triangulation and pose selection.
#[derive(thiserror::Error, Debug)]
pub enum TwoViewError {
    /// The two correspondence sets are not index-aligned.
    #[error("correspondence sets differ in length: {left} vs {right}")]
    InputShapeMismatch { left: usize, right: usize },
    /// Too few correspondences for the requested operation.
    #[error("need at least {required} correspondences, got {got}")]
    NotEnoughCorrespondences { required: usize, got: usize },
    /// A matrix or point carries a NaN or infinite entry.
    #[error("non-finite value in {0}")]
    NonFiniteInput(&'static str),
    /// A point of the final reconstruction is degenerate.
    #[error("point {index}: {kind}")]
    Degenerate { index: usize, kind: PointDegeneracy },
    /// No candidate pose puts a single point in front of both cameras.
    #[error("no candidate pose places any point in front of both cameras")]
    SelectionFailure,
    /// nalgebra did not hand back the requested singular vectors.
    #[error("singular value decomposition did not produce singular vectors")]
    SvdFailure,
    /// The eight-point solver could not produce a model.
    #[error("fundamental matrix estimation failed")]
    FundamentalEstimation,
}

/// Errors raised by the end-to-end reconstruction driver.
#[derive(thiserror::Error, Debug)]
pub enum ReconstructionError {
    #[error(transparent)]
    TwoView(#[from] TwoViewError),
    #[error("reprojection error {error:.3} exceeds bound {bound:.3}")]
    ReprojectionBoundExceeded { error: f64, bound: f64 },
    #[error("invalid normalization scale {0}")]
    InvalidScale(f64),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("image error: {0}")]
    Image(#[from] image::ImageError),
    #[error("could not persist output: {0}")]
    Persist(#[from] tempfile::PersistError),
}
