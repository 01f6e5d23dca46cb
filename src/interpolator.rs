use ndarray::Array3;

/// Slack on the volume bounds so a voxel centre sitting exactly on the edge
/// survives a round trip through two affines.
const EDGE_EPSILON: f64 = 1e-6;

pub(crate) struct Interpolator;

impl Interpolator {
    /// Nearest voxel to `coord`, or `None` outside the voxel boxes of the volume.
    #[inline]
    pub(crate) fn nearest_index(
        dim: (usize, usize, usize),
        coord: [f64; 3],
    ) -> Option<[usize; 3]> {
        let dims = [dim.0, dim.1, dim.2];
        let mut index = [0usize; 3];
        for axis in 0..3 {
            let c = coord[axis];
            let n = dims[axis] as f64;
            if !c.is_finite() || c < -0.5 - EDGE_EPSILON || c >= n - 0.5 + EDGE_EPSILON {
                return None;
            }
            index[axis] = (c.round().max(0.0) as usize).min(dims[axis] - 1);
        }
        Some(index)
    }

    #[inline]
    pub(crate) fn nearest<T: Copy>(data: &Array3<T>, coord: [f64; 3]) -> Option<T> {
        Self::nearest_index(data.dim(), coord).map(|[i, j, k]| data[[i, j, k]])
    }

    /// Trilinear sample at `coord`. `None` outside the hull of voxel centres,
    /// so nothing is ever extrapolated.
    #[inline]
    pub(crate) fn trilinear_interpolate(data: &Array3<f64>, coord: [f64; 3]) -> Option<f64> {
        let (nx, ny, nz) = data.dim();
        let dims = [nx, ny, nz];
        let mut lo = [0usize; 3];
        let mut hi = [0usize; 3];
        let mut frac = [0.0f64; 3];
        for axis in 0..3 {
            let c = coord[axis];
            let upper = (dims[axis] - 1) as f64;
            if !c.is_finite() || c < -EDGE_EPSILON || c > upper + EDGE_EPSILON {
                return None;
            }
            let c = c.clamp(0.0, upper);
            let c0 = c.floor() as usize;
            lo[axis] = c0;
            hi[axis] = (c0 + 1).min(dims[axis] - 1);
            frac[axis] = c - c0 as f64;
        }

        let [x0, y0, z0] = lo;
        let [x1, y1, z1] = hi;
        let [dx, dy, dz] = frac;
        let one_minus_dx = 1.0 - dx;
        let one_minus_dy = 1.0 - dy;
        let one_minus_dz = 1.0 - dz;

        // Skip zero-weight corners so a NaN neighbour does not leak into an
        // exact grid hit.
        let lerp = |a: f64, b: f64, t: f64, one_minus_t: f64| {
            if t == 0.0 {
                a
            } else if t == 1.0 {
                b
            } else {
                a.mul_add(one_minus_t, b * t)
            }
        };

        let c00 = lerp(data[[x0, y0, z0]], data[[x1, y0, z0]], dx, one_minus_dx);
        let c01 = lerp(data[[x0, y0, z1]], data[[x1, y0, z1]], dx, one_minus_dx);
        let c10 = lerp(data[[x0, y1, z0]], data[[x1, y1, z0]], dx, one_minus_dx);
        let c11 = lerp(data[[x0, y1, z1]], data[[x1, y1, z1]], dx, one_minus_dx);

        let c0 = lerp(c00, c10, dy, one_minus_dy);
        let c1 = lerp(c01, c11, dy, one_minus_dy);

        Some(lerp(c0, c1, dz, one_minus_dz))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ramp() -> Array3<f64> {
        Array3::from_shape_fn((3, 3, 3), |(i, j, k)| (i + 10 * j + 100 * k) as f64)
    }

    #[test]
    fn trilinear_hits_grid_points_exactly() {
        let data = ramp();
        assert_eq!(Interpolator::trilinear_interpolate(&data, [1.0, 2.0, 0.0]), Some(21.0));
        assert_eq!(Interpolator::trilinear_interpolate(&data, [2.0, 2.0, 2.0]), Some(222.0));
    }

    #[test]
    fn trilinear_is_linear_between_centres() {
        let data = ramp();
        let value = Interpolator::trilinear_interpolate(&data, [0.5, 1.5, 0.25]).unwrap();
        assert!((value - (0.5 + 15.0 + 25.0)).abs() < 1e-12);
    }

    #[test]
    fn trilinear_never_extrapolates() {
        let data = ramp();
        assert_eq!(Interpolator::trilinear_interpolate(&data, [-0.1, 0.0, 0.0]), None);
        assert_eq!(Interpolator::trilinear_interpolate(&data, [0.0, 2.1, 0.0]), None);
    }

    #[test]
    fn nan_neighbour_does_not_touch_exact_hits() {
        let mut data = ramp();
        data[[1, 0, 0]] = f64::NAN;
        assert_eq!(Interpolator::trilinear_interpolate(&data, [0.0, 0.0, 0.0]), Some(0.0));
        assert!(Interpolator::trilinear_interpolate(&data, [0.5, 0.0, 0.0]).unwrap().is_nan());
    }

    #[test]
    fn nearest_covers_voxel_boxes() {
        let data = Array3::from_shape_fn((2, 1, 1), |(i, _, _)| i as i32 + 1);
        assert_eq!(Interpolator::nearest(&data, [-0.4, 0.0, 0.0]), Some(1));
        assert_eq!(Interpolator::nearest(&data, [0.6, 0.2, -0.2]), Some(2));
        assert_eq!(Interpolator::nearest(&data, [1.6, 0.0, 0.0]), None);
    }
}
