//! JSON stores for the inputs and the result of a reconstruction.
//!
//! Matrices are written row-major as nested arrays.

use std::{fs, io::Write, path::Path};

use nalgebra::{Matrix3, Matrix3x4, Vector2};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use tempfile::NamedTempFile;

use crate::{algorithms::Intrinsics, error::ReconstructionError, reconstruction::Reconstruction};

/// Matched pixels, `pts1[i]` and `pts2[i]` seeing the same scene point.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Correspondences {
    pub pts1: Vec<[f64; 2]>,
    pub pts2: Vec<[f64; 2]>,
}

impl Correspondences {
    pub fn points1(&self) -> Vec<Vector2<f64>> {
        self.pts1.iter().map(|&[x, y]| Vector2::new(x, y)).collect()
    }

    pub fn points2(&self) -> Vec<Vector2<f64>> {
        self.pts2.iter().map(|&[x, y]| Vector2::new(x, y)).collect()
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct IntrinsicsRecord {
    #[serde(rename = "K1")]
    pub k1: [[f64; 3]; 3],
    #[serde(rename = "K2")]
    pub k2: [[f64; 3]; 3],
}

impl From<&IntrinsicsRecord> for Intrinsics {
    fn from(record: &IntrinsicsRecord) -> Self {
        Self {
            k1: Matrix3::from_fn(|i, j| record.k1[i][j]),
            k2: Matrix3::from_fn(|i, j| record.k2[i][j]),
        }
    }
}

/// What gets persisted after a successful reconstruction.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ReconstructionRecord {
    #[serde(rename = "F")]
    pub fundamental: [[f64; 3]; 3],
    #[serde(rename = "M2")]
    pub m2: [[f64; 4]; 3],
    #[serde(rename = "C2")]
    pub c2: [[f64; 4]; 3],
    #[serde(rename = "P")]
    pub points: Vec<[f64; 3]>,
    pub reprojection_error: f64,
}

fn rows_3x4(matrix: &Matrix3x4<f64>) -> [[f64; 4]; 3] {
    std::array::from_fn(|i| std::array::from_fn(|j| matrix[(i, j)]))
}

fn rows_3x3(matrix: &Matrix3<f64>) -> [[f64; 3]; 3] {
    std::array::from_fn(|i| std::array::from_fn(|j| matrix[(i, j)]))
}

impl From<&Reconstruction> for ReconstructionRecord {
    fn from(reconstruction: &Reconstruction) -> Self {
        Self {
            fundamental: rows_3x3(&reconstruction.fundamental),
            m2: rows_3x4(&reconstruction.m2),
            c2: rows_3x4(&reconstruction.c2),
            points: reconstruction
                .points
                .iter()
                .map(|x| [x.x, x.y, x.z])
                .collect(),
            reprojection_error: reconstruction.error,
        }
    }
}

pub fn read_json<T: DeserializeOwned>(path: &Path) -> Result<T, ReconstructionError> {
    let data = fs::read_to_string(path)?;
    Ok(serde_json::from_str(&data)?)
}

/// Write `value` as pretty JSON so that `path` either keeps its old content or
/// holds the complete new document.
///
/// The document goes to a temporary file in the destination directory, which
/// is then renamed over `path`.
pub fn write_json_atomic<T: Serialize>(path: &Path, value: &T) -> Result<(), ReconstructionError> {
    let dir = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };

    let mut file = NamedTempFile::new_in(dir)?;
    serde_json::to_writer_pretty(&mut file, value)?;
    file.write_all(b"\n")?;
    file.as_file().sync_all()?;
    file.persist(path)?;

    log::debug!("wrote {}", path.display());
    Ok(())
}
