use std::borrow::Cow;

use crate::enums::VolumeKind;
use crate::error::{ParcelError, ParcelResult};
use crate::interpolator::Interpolator;
use crate::volume::{Grid, Volume};

use ndarray::Array3;
use rayon::prelude::*;
use tracing::debug;

/// Voxel types the resampler knows how to move between grids.
pub trait Sample: Copy + Send + Sync {
    const KIND: VolumeKind;

    /// Value for target voxels outside the source extent.
    fn outside() -> Self;

    fn sample(data: &Array3<Self>, coord: [f64; 3]) -> Option<Self>;
}

impl Sample for i32 {
    const KIND: VolumeKind = VolumeKind::Label;

    fn outside() -> Self {
        0
    }

    fn sample(data: &Array3<Self>, coord: [f64; 3]) -> Option<Self> {
        Interpolator::nearest(data, coord)
    }
}

impl Sample for f64 {
    const KIND: VolumeKind = VolumeKind::Scalar;

    fn outside() -> Self {
        f64::NAN
    }

    fn sample(data: &Array3<Self>, coord: [f64; 3]) -> Option<Self> {
        Interpolator::trilinear_interpolate(data, coord)
    }
}

pub struct Resampler;

impl Resampler {
    /// Resample `source` onto `target`.
    ///
    /// Already co-registered volumes come back borrowed and untouched.
    ///
    /// # Errors
    ///
    /// `ShapeMismatch` when either grid is empty or has a singular affine.
    pub fn resample<'a, T: Sample>(
        source: &'a Volume<T>,
        target: &Grid,
    ) -> ParcelResult<Cow<'a, Volume<T>>> {
        let source_grid = source.grid();
        if source_grid.matches(target) {
            return Ok(Cow::Borrowed(source));
        }
        if source_grid.is_empty() || target.is_empty() {
            return Err(ParcelError::ShapeMismatch(format!(
                "cannot resample between shapes {:?} and {:?}",
                source_grid.shape, target.shape
            )));
        }
        let world_to_source = source.affine().inverse().ok_or_else(|| {
            ParcelError::ShapeMismatch("source affine is singular".to_string())
        })?;
        if !target.affine.is_invertible() {
            return Err(ParcelError::ShapeMismatch(
                "target affine is singular".to_string(),
            ));
        }

        // target voxel -> world -> source voxel, folded into one transform
        let target_to_source = world_to_source.compose(&target.affine);
        debug!(
            kind = ?T::KIND,
            interpolation = ?T::KIND.interpolation(),
            from = ?source_grid.shape,
            to = ?target.shape,
            from_voxel = ?source_grid.affine.voxel_sizes(),
            to_voxel = ?target.affine.voxel_sizes(),
            "resampling volume"
        );

        let (nx, ny, nz) = target.shape;
        let data = source.data();
        let values: Vec<T> = (0..nx)
            .into_par_iter()
            .flat_map_iter(|i| {
                (0..ny).flat_map(move |j| {
                    (0..nz).map(move |k| {
                        let coord = target_to_source.apply([i as f64, j as f64, k as f64]);
                        T::sample(data, coord).unwrap_or_else(T::outside)
                    })
                })
            })
            .collect();

        let array = Array3::from_shape_vec(target.shape, values)
            .map_err(|e| ParcelError::ShapeMismatch(e.to_string()))?;
        Ok(Cow::Owned(Volume::new(array, target.affine)?))
    }
}
