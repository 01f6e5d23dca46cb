use crate::affine::{AFFINE_TOLERANCE, Affine};
use crate::error::{ParcelError, ParcelResult};

use ndarray::Array3;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// Shape plus voxel-to-world affine: where every voxel sits in space.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct Grid {
    pub shape: (usize, usize, usize),
    pub affine: Affine,
}

impl Grid {
    pub fn new(shape: (usize, usize, usize), affine: Affine) -> Self {
        Self { shape, affine }
    }

    /// Same shape and affines equal within [`AFFINE_TOLERANCE`].
    pub fn matches(&self, other: &Grid) -> bool {
        self.shape == other.shape && self.affine.approx_eq(&other.affine, AFFINE_TOLERANCE)
    }

    pub fn len(&self) -> usize {
        self.shape.0 * self.shape.1 * self.shape.2
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// A 3D array with its spatial transform.
///
/// Atlases are `Volume<i32>` (0 is background), metric maps are
/// `Volume<f64>` where NaN marks a missing sample.
#[derive(Clone, Debug, PartialEq)]
pub struct Volume<T> {
    data: Array3<T>,
    affine: Affine,
}

pub type LabelVolume = Volume<i32>;
pub type ScalarVolume = Volume<f64>;

impl<T> Volume<T> {
    /// Fails when the affine is singular or not finite.
    pub fn new(data: Array3<T>, affine: Affine) -> ParcelResult<Self> {
        if !affine.is_invertible() {
            return Err(ParcelError::ShapeMismatch(format!(
                "affine {:?} is singular",
                affine.rows()
            )));
        }
        Ok(Self { data, affine })
    }

    /// Get the dimensions of the volume (x, y, z)
    pub fn dim(&self) -> (usize, usize, usize) {
        self.data.dim()
    }

    pub fn shape(&self) -> (usize, usize, usize) {
        self.dim()
    }

    /// Get a reference to the underlying data
    pub fn data(&self) -> &Array3<T> {
        &self.data
    }

    pub fn affine(&self) -> &Affine {
        &self.affine
    }

    pub fn grid(&self) -> Grid {
        Grid::new(self.dim(), self.affine)
    }

    pub fn into_data(self) -> Array3<T> {
        self.data
    }
}

impl LabelVolume {
    /// Sorted distinct positive labels, computed from the data on every call.
    pub fn labels(&self) -> BTreeSet<i32> {
        self.data.iter().copied().filter(|&label| label > 0).collect()
    }

    pub fn has_labels(&self) -> bool {
        self.data.iter().any(|&label| label > 0)
    }

    /// Zero every label where `mask` is zero. Both must share a shape.
    pub(crate) fn masked(&self, mask: &LabelVolume) -> LabelVolume {
        let mut data = self.data.clone();
        ndarray::Zip::from(&mut data)
            .and(mask.data())
            .par_for_each(|label, &keep| {
                if keep == 0 {
                    *label = 0;
                }
            });
        Volume {
            data,
            affine: self.affine,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn singular_affine_is_rejected() {
        let data = Array3::<f64>::zeros((2, 2, 2));
        let result = Volume::new(data, Affine::from_diagonal(1.0, 1.0, 0.0));
        assert!(matches!(result, Err(ParcelError::ShapeMismatch(_))));
    }

    #[test]
    fn labels_skip_background_and_negatives() {
        let mut data = Array3::<i32>::zeros((2, 2, 2));
        data[[0, 0, 0]] = 3;
        data[[1, 0, 0]] = 1;
        data[[1, 1, 1]] = -2;
        data[[0, 1, 1]] = 3;
        let atlas = Volume::new(data, Affine::identity()).unwrap();
        assert_eq!(atlas.labels().into_iter().collect::<Vec<_>>(), vec![1, 3]);
        assert!(atlas.has_labels());
    }

    #[test]
    fn grids_match_within_tolerance() {
        let a = Grid::new((4, 4, 4), Affine::from_diagonal(2.0, 2.0, 2.0));
        let mut noisy = a;
        noisy.affine.0[2][3] = 5e-6;
        assert!(a.matches(&noisy));
        assert!(!a.matches(&Grid::new((4, 4, 5), a.affine)));
    }

    #[test]
    fn mask_zeroes_labels_outside() {
        let atlas = Volume::new(Array3::from_elem((2, 1, 1), 5), Affine::identity()).unwrap();
        let mut keep = Array3::zeros((2, 1, 1));
        keep[[1, 0, 0]] = 1;
        let mask = Volume::new(keep, Affine::identity()).unwrap();
        let masked = atlas.masked(&mask);
        assert_eq!(masked.data()[[0, 0, 0]], 0);
        assert_eq!(masked.data()[[1, 0, 0]], 5);
    }
}
