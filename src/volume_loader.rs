use crate::affine::Affine;
use crate::error::JobIoError;
use crate::volume::{LabelVolume, ScalarVolume, Volume};

use ndarray::Array3;
use nifti::volume::ndarray::IntoNdArray;
use nifti::{NiftiHeader, NiftiObject, ReaderOptions};
use std::path::Path;
use tracing::debug;

/// Labels stored as floats must sit this close to an integer.
const LABEL_ROUNDING_TOLERANCE: f64 = 1e-3;

pub struct VolumeLoader;

impl VolumeLoader {
    /// Load an integer label volume from a `.nii` / `.nii.gz` file.
    ///
    /// # Errors
    ///
    /// `NotFound` if the file is missing, `Unreadable` if it is not a 3D
    /// NIfTI volume or holds non-integer labels.
    pub fn load_labels(path: impl AsRef<Path>) -> Result<LabelVolume, JobIoError> {
        let path = path.as_ref();
        let (values, shape, affine) = Self::read(path, "atlas")?;
        let mut labels = Vec::with_capacity(values.len());
        for value in values {
            let rounded = value.round();
            if !value.is_finite() || (value - rounded).abs() > LABEL_ROUNDING_TOLERANCE {
                return Err(unreadable("atlas", path, format!("non-integer label value {value}")));
            }
            labels.push(rounded as i32);
        }
        Self::build(labels, shape, affine, "atlas", path)
    }

    /// Load a floating point metric map; NaN voxels are kept as missing.
    pub fn load_scalars(path: impl AsRef<Path>) -> Result<ScalarVolume, JobIoError> {
        let path = path.as_ref();
        let (values, shape, affine) = Self::read(path, "metric map")?;
        Self::build(values, shape, affine, "metric map", path)
    }

    /// Brain mask; any nonzero voxel is inside.
    pub fn load_mask(path: impl AsRef<Path>) -> Result<LabelVolume, JobIoError> {
        let path = path.as_ref();
        let (values, shape, affine) = Self::read(path, "mask")?;
        let flags = values
            .into_iter()
            .map(|v| i32::from(v != 0.0 && !v.is_nan()))
            .collect();
        Self::build(flags, shape, affine, "mask", path)
    }

    fn read(
        path: &Path,
        what: &str,
    ) -> Result<(Vec<f64>, (usize, usize, usize), Affine), JobIoError> {
        if !path.is_file() {
            return Err(JobIoError::NotFound {
                what: what.to_string(),
                location: path.display().to_string(),
            });
        }
        let object = ReaderOptions::new()
            .read_file(path)
            .map_err(|e| unreadable(what, path, e.to_string()))?;
        let affine = Self::get_affine(object.header());
        let array = object
            .into_volume()
            .into_ndarray::<f64>()
            .map_err(|e| unreadable(what, path, e.to_string()))?;

        let shape = Self::spatial_shape(array.shape())
            .ok_or_else(|| unreadable(what, path, format!("unsupported shape {:?}", array.shape())))?;
        // logical (x, y, z) order, independent of the on-disk layout
        let values: Vec<f64> = array.iter().copied().collect();
        debug!(path = %path.display(), ?shape, "loaded NIfTI volume");
        Ok((values, shape, affine))
    }

    fn build<T>(
        values: Vec<T>,
        shape: (usize, usize, usize),
        affine: Affine,
        what: &str,
        path: &Path,
    ) -> Result<Volume<T>, JobIoError> {
        let array =
            Array3::from_shape_vec(shape, values).map_err(|e| unreadable(what, path, e.to_string()))?;
        Volume::new(array, affine).map_err(|e| unreadable(what, path, e.to_string()))
    }

    /// 3D shape, allowing trailing singleton axes (e.g. a one-frame 4D file).
    fn spatial_shape(shape: &[usize]) -> Option<(usize, usize, usize)> {
        match shape {
            [x, y, z, rest @ ..] if rest.iter().all(|&n| n == 1) => Some((*x, *y, *z)),
            _ => None,
        }
    }

    /// sform when set, else qform, else plain voxel scaling.
    fn get_affine(header: &NiftiHeader) -> Affine {
        if header.sform_code > 0 {
            let rows = [header.srow_x, header.srow_y, header.srow_z];
            let mut m = Affine::identity().0;
            for (dst, src) in m.iter_mut().zip(rows) {
                for (d, s) in dst.iter_mut().zip(src) {
                    *d = s as f64;
                }
            }
            return Affine(m);
        }

        let voxel = |i: usize| {
            let size = header.pixdim[i] as f64;
            if size > 0.0 { size } else { 1.0 }
        };
        let (dx, dy, dz) = (voxel(1), voxel(2), voxel(3));
        if header.qform_code <= 0 {
            return Affine::from_diagonal(dx, dy, dz);
        }

        let b = header.quatern_b as f64;
        let c = header.quatern_c as f64;
        let d = header.quatern_d as f64;
        let a = (1.0 - (b * b + c * c + d * d)).max(0.0).sqrt();
        let qfac = if header.pixdim[0] < 0.0 { -1.0 } else { 1.0 };
        let r = [
            [a * a + b * b - c * c - d * d, 2.0 * (b * c - a * d), 2.0 * (b * d + a * c)],
            [2.0 * (b * c + a * d), a * a + c * c - b * b - d * d, 2.0 * (c * d - a * b)],
            [2.0 * (b * d - a * c), 2.0 * (c * d + a * b), a * a + d * d - c * c - b * b],
        ];
        let scale = [dx, dy, dz * qfac];
        let offset = [
            header.quatern_x as f64,
            header.quatern_y as f64,
            header.quatern_z as f64,
        ];
        let mut m = Affine::identity().0;
        for row in 0..3 {
            for col in 0..3 {
                m[row][col] = r[row][col] * scale[col];
            }
            m[row][3] = offset[row];
        }
        Affine(m)
    }
}

fn unreadable(what: &str, path: &Path, reason: String) -> JobIoError {
    JobIoError::Unreadable {
        what: what.to_string(),
        path: path.to_path_buf(),
        reason,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray_nifti::Array3 as DiskArray;
    use nifti::writer::WriterOptions;

    #[test]
    fn reads_voxels_in_logical_axis_order() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("fa.nii.gz");
        let data = DiskArray::from_shape_fn((3, 4, 5), |(i, j, k)| (100 * i + 10 * j + k) as f32);
        let header = NiftiHeader {
            sform_code: 1,
            srow_x: [2.0, 0.0, 0.0, -10.0],
            srow_y: [0.0, 2.0, 0.0, -20.0],
            srow_z: [0.0, 0.0, 2.0, -30.0],
            ..NiftiHeader::default()
        };
        WriterOptions::new(&path)
            .reference_header(&header)
            .write_nifti(&data)
            .unwrap();

        let volume = VolumeLoader::load_scalars(&path).unwrap();
        assert_eq!(volume.shape(), (3, 4, 5));
        assert_eq!(volume.data()[[1, 2, 3]], 123.0);
        assert_eq!(volume.data()[[2, 3, 4]], 234.0);
        assert_eq!(
            *volume.affine(),
            Affine::from_diagonal(2.0, 2.0, 2.0).with_translation(-10.0, -20.0, -30.0)
        );
    }

    #[test]
    fn float_stored_atlas_is_rounded_to_labels() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("atlas.nii");
        let data = DiskArray::from_shape_fn((2, 2, 2), |(i, _, k)| (i + 2 * k) as f32 + 0.0004);
        WriterOptions::new(&path).write_nifti(&data).unwrap();

        let atlas = VolumeLoader::load_labels(&path).unwrap();
        assert_eq!(atlas.data()[[0, 1, 0]], 0);
        assert_eq!(atlas.data()[[1, 0, 1]], 3);
        assert_eq!(atlas.labels().into_iter().collect::<Vec<_>>(), vec![1, 2, 3]);

        let fractional = dir.path().join("fractional.nii");
        let data = DiskArray::from_elem((2, 2, 2), 1.5f32);
        WriterOptions::new(&fractional).write_nifti(&data).unwrap();
        assert!(matches!(
            VolumeLoader::load_labels(&fractional),
            Err(JobIoError::Unreadable { .. })
        ));
    }

    #[test]
    fn mask_marks_every_nonzero_voxel() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("mask.nii.gz");
        let data = DiskArray::from_shape_fn((2, 2, 2), |(i, j, _)| if i == j { 0u8 } else { 7 });
        WriterOptions::new(&path).write_nifti(&data).unwrap();

        let mask = VolumeLoader::load_mask(&path).unwrap();
        assert_eq!(mask.shape(), (2, 2, 2));
        assert_eq!(mask.data()[[0, 0, 1]], 0);
        assert_eq!(mask.data()[[0, 1, 1]], 1);
        assert_eq!(mask.data()[[1, 0, 0]], 1);
        assert_eq!(mask.data()[[1, 1, 0]], 0);
    }

    #[test]
    fn missing_file_is_not_found_not_unreadable() {
        let dir = tempfile::tempdir().unwrap();
        let err = VolumeLoader::load_scalars(dir.path().join("fa.nii.gz")).unwrap_err();
        assert!(matches!(err, JobIoError::NotFound { .. }));
    }

    #[test]
    fn garbage_file_is_unreadable() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("atlas.nii");
        std::fs::write(&path, b"not a nifti file").unwrap();
        let err = VolumeLoader::load_labels(&path).unwrap_err();
        assert!(matches!(err, JobIoError::Unreadable { .. }));
    }

    #[test]
    fn trailing_singleton_axes_are_squeezed() {
        assert_eq!(VolumeLoader::spatial_shape(&[4, 5, 6]), Some((4, 5, 6)));
        assert_eq!(VolumeLoader::spatial_shape(&[4, 5, 6, 1]), Some((4, 5, 6)));
        assert_eq!(VolumeLoader::spatial_shape(&[4, 5, 6, 3]), None);
        assert_eq!(VolumeLoader::spatial_shape(&[4, 5]), None);
    }

    #[test]
    fn affine_prefers_sform_then_qform_then_pixdim() {
        let mut header = NiftiHeader::default();
        header.sform_code = 0;
        header.qform_code = 0;
        header.quatern_b = 0.0;
        header.quatern_c = 0.0;
        header.quatern_d = 0.0;
        header.pixdim = [1.0, 2.0, 2.0, 3.0, 0.0, 0.0, 0.0, 0.0];
        assert_eq!(VolumeLoader::get_affine(&header), Affine::from_diagonal(2.0, 2.0, 3.0));

        header.qform_code = 1;
        header.quatern_x = -90.0;
        header.quatern_y = 10.0;
        header.quatern_z = 5.0;
        let q = VolumeLoader::get_affine(&header);
        assert!(q.approx_eq(
            &Affine::from_diagonal(2.0, 2.0, 3.0).with_translation(-90.0, 10.0, 5.0),
            1e-9
        ));

        header.sform_code = 2;
        header.srow_x = [1.0, 0.0, 0.0, 7.0];
        header.srow_y = [0.0, 1.0, 0.0, 8.0];
        header.srow_z = [0.0, 0.0, 1.0, 9.0];
        assert_eq!(
            VolumeLoader::get_affine(&header),
            Affine::identity().with_translation(7.0, 8.0, 9.0)
        );
    }
}
