//! Affine transforms in 3D
//!
//! A thin wrapper around a homogeneous `cgmath::Matrix4<f64>` whose last row is
//! always `[0, 0, 0, 1]`. Naming follows the composition conventions used by the
//! viewer: `concatenate(other)` applies `other` first, `pre_concatenate(other)`
//! applies `other` last.

use cgmath::{Matrix4, SquareMatrix, Vector4};

/// A 3D affine transform
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Affine3 {
    matrix: Matrix4<f64>,
}

impl Affine3 {
    /// The identity transform
    pub fn identity() -> Self {
        Self {
            matrix: Matrix4::identity(),
        }
    }

    /// Creates a transform from the upper three rows of a row-major 3x4 matrix
    pub fn from_rows(rows: [[f64; 4]; 3]) -> Self {
        let [r0, r1, r2] = rows;
        // cgmath matrices are column-major
        let matrix = Matrix4::new(
            r0[0], r1[0], r2[0], 0.0, //
            r0[1], r1[1], r2[1], 0.0, //
            r0[2], r1[2], r2[2], 0.0, //
            r0[3], r1[3], r2[3], 1.0,
        );
        Self { matrix }
    }

    /// Axis-aligned scaling
    pub fn scaling(sx: f64, sy: f64, sz: f64) -> Self {
        Self {
            matrix: Matrix4::from_nonuniform_scale(sx, sy, sz),
        }
    }

    /// Pure translation
    pub fn translation(tx: f64, ty: f64, tz: f64) -> Self {
        Self {
            matrix: Matrix4::from_translation(cgmath::Vector3::new(tx, ty, tz)),
        }
    }

    /// Rotation about the z axis (radians)
    pub fn rotation_z(angle: f64) -> Self {
        Self {
            matrix: Matrix4::from_angle_z(cgmath::Rad(angle)),
        }
    }

    /// Rotation about the y axis (radians)
    pub fn rotation_y(angle: f64) -> Self {
        Self {
            matrix: Matrix4::from_angle_y(cgmath::Rad(angle)),
        }
    }

    /// Transform from canvas coordinates to the pixel grid of an image that is
    /// `width x height` while the canvas is `canvas_width x canvas_height`.
    ///
    /// Pixel centers are aligned, so canvas pixel `(0, 0)` lands at
    /// `0.5 * scale - 0.5` in the smaller image.
    pub fn screen_scale(width: u32, height: u32, canvas_width: u32, canvas_height: u32) -> Self {
        let x_scale = f64::from(width) / f64::from(canvas_width);
        let y_scale = f64::from(height) / f64::from(canvas_height);
        Self::from_rows([
            [x_scale, 0.0, 0.0, 0.5 * x_scale - 0.5],
            [0.0, y_scale, 0.0, 0.5 * y_scale - 0.5],
            [0.0, 0.0, 1.0, 0.0],
        ])
    }

    /// Returns `self ∘ other`: `other` is applied first
    pub fn concatenate(&self, other: &Affine3) -> Self {
        Self {
            matrix: self.matrix * other.matrix,
        }
    }

    /// Returns `other ∘ self`: `other` is applied last
    pub fn pre_concatenate(&self, other: &Affine3) -> Self {
        Self {
            matrix: other.matrix * self.matrix,
        }
    }

    /// Inverse transform, `None` if the linear part is singular
    pub fn inverse(&self) -> Option<Self> {
        self.matrix.invert().map(|matrix| Self { matrix })
    }

    /// Applies the transform to a point
    pub fn apply(&self, p: [f64; 3]) -> [f64; 3] {
        let v = self.matrix * Vector4::new(p[0], p[1], p[2], 1.0);
        [v.x, v.y, v.z]
    }

    /// Applies only the linear part to a direction vector
    pub fn apply_linear(&self, d: [f64; 3]) -> [f64; 3] {
        let v = self.matrix * Vector4::new(d[0], d[1], d[2], 0.0);
        [v.x, v.y, v.z]
    }

    /// Matrix element at `(row, col)` of the 3x4 affine part
    pub fn get(&self, row: usize, col: usize) -> f64 {
        self.matrix[col][row]
    }

    /// The underlying homogeneous matrix
    pub fn matrix(&self) -> &Matrix4<f64> {
        &self.matrix
    }
}

impl Default for Affine3 {
    fn default() -> Self {
        Self::identity()
    }
}
