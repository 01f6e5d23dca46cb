use serde::{Deserialize, Serialize};

/// Element-wise tolerance under which two affines describe the same grid.
pub const AFFINE_TOLERANCE: f64 = 1e-5;

const SINGULAR_PIVOT: f64 = 1e-12;

/// A 4x4 voxel-to-world transform, stored row-major.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct Affine(pub [[f64; 4]; 4]);

impl Default for Affine {
    fn default() -> Self {
        Self::identity()
    }
}

impl Affine {
    pub fn identity() -> Self {
        Self::from_diagonal(1.0, 1.0, 1.0)
    }

    /// Axis-aligned transform with the given voxel sizes and no offset.
    pub fn from_diagonal(sx: f64, sy: f64, sz: f64) -> Self {
        Self([
            [sx, 0.0, 0.0, 0.0],
            [0.0, sy, 0.0, 0.0],
            [0.0, 0.0, sz, 0.0],
            [0.0, 0.0, 0.0, 1.0],
        ])
    }

    pub fn with_translation(mut self, tx: f64, ty: f64, tz: f64) -> Self {
        self.0[0][3] = tx;
        self.0[1][3] = ty;
        self.0[2][3] = tz;
        self
    }

    pub fn rows(&self) -> &[[f64; 4]; 4] {
        &self.0
    }

    /// Map a (possibly fractional) voxel coordinate to world space.
    #[inline]
    pub fn apply(&self, point: [f64; 3]) -> [f64; 3] {
        let m = &self.0;
        let mut out = [0.0; 3];
        for (row, value) in out.iter_mut().enumerate() {
            *value = m[row][0].mul_add(
                point[0],
                m[row][1].mul_add(point[1], m[row][2].mul_add(point[2], m[row][3])),
            );
        }
        out
    }

    pub fn compose(&self, rhs: &Affine) -> Affine {
        let mut out = [[0.0; 4]; 4];
        for (i, row) in out.iter_mut().enumerate() {
            for (j, cell) in row.iter_mut().enumerate() {
                *cell = (0..4).map(|k| self.0[i][k] * rhs.0[k][j]).sum();
            }
        }
        Affine(out)
    }

    pub fn approx_eq(&self, other: &Affine, tolerance: f64) -> bool {
        self.0
            .iter()
            .flatten()
            .zip(other.0.iter().flatten())
            .all(|(a, b)| (a - b).abs() <= tolerance)
    }

    pub fn is_finite(&self) -> bool {
        self.0.iter().flatten().all(|v| v.is_finite())
    }

    /// Gauss-Jordan inverse with partial pivoting. `None` when singular.
    pub fn inverse(&self) -> Option<Affine> {
        if !self.is_finite() {
            return None;
        }
        let mut a = self.0;
        let mut inv = Affine::identity().0;

        for col in 0..4 {
            let pivot_row = (col..4).max_by(|&r1, &r2| a[r1][col].abs().total_cmp(&a[r2][col].abs()))?;
            if a[pivot_row][col].abs() < SINGULAR_PIVOT {
                return None;
            }
            a.swap(col, pivot_row);
            inv.swap(col, pivot_row);

            let pivot = a[col][col];
            for j in 0..4 {
                a[col][j] /= pivot;
                inv[col][j] /= pivot;
            }
            for row in 0..4 {
                if row == col {
                    continue;
                }
                let factor = a[row][col];
                if factor == 0.0 {
                    continue;
                }
                for j in 0..4 {
                    a[row][j] -= factor * a[col][j];
                    inv[row][j] -= factor * inv[col][j];
                }
            }
        }
        Some(Affine(inv))
    }

    pub fn is_invertible(&self) -> bool {
        self.inverse().is_some()
    }

    /// Voxel edge lengths, taken as the column norms of the linear part.
    pub fn voxel_sizes(&self) -> [f64; 3] {
        let m = &self.0;
        let mut sizes = [0.0; 3];
        for (col, size) in sizes.iter_mut().enumerate() {
            *size = (0..3).map(|row| m[row][col] * m[row][col]).sum::<f64>().sqrt();
        }
        sizes
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn inverse_round_trips_a_scaled_translated_affine() {
        let affine = Affine::from_diagonal(2.0, 3.0, 0.5).with_translation(-10.0, 4.0, 7.5);
        let inv = affine.inverse().unwrap();
        assert!(affine.compose(&inv).approx_eq(&Affine::identity(), 1e-12));

        let world = affine.apply([1.0, 2.0, 3.0]);
        assert_eq!(world, [-8.0, 10.0, 9.0]);
        let back = inv.apply(world);
        for (b, e) in back.iter().zip([1.0, 2.0, 3.0]) {
            assert!((b - e).abs() < 1e-12);
        }
    }

    #[test]
    fn singular_affines_have_no_inverse() {
        let flat = Affine::from_diagonal(1.0, 0.0, 1.0);
        assert!(flat.inverse().is_none());

        let mut nan = Affine::identity();
        nan.0[0][0] = f64::NAN;
        assert!(!nan.is_invertible());
    }

    #[test]
    fn approx_eq_absorbs_storage_noise() {
        let a = Affine::from_diagonal(2.0, 2.0, 2.0);
        let mut b = a;
        b.0[0][3] += 1e-7;
        assert!(a.approx_eq(&b, AFFINE_TOLERANCE));
        b.0[0][3] += 1e-3;
        assert!(!a.approx_eq(&b, AFFINE_TOLERANCE));
    }

    #[test]
    fn voxel_sizes_are_column_norms() {
        let a = Affine::from_diagonal(-2.0, 1.5, 3.0);
        assert_eq!(a.voxel_sizes(), [2.0, 1.5, 3.0]);
    }
}
