//! Rigid-body transforms.
//!
//! Translations are [`Vec3`], rotations unit [`Quaternion`]s (w, x, y, z
//! convention) and poses [`Transform3D`].  A transform `aMb` maps points
//! expressed in frame `b` into frame `a`; composing `aMb.compose(bMc)` yields
//! `aMc`.
//!
//! # Example
//!
//! ```rust
//! use agimus_perception::transform::{Quaternion, Transform3D, Vec3};
//!
//! let w_m_base = Transform3D::new(Vec3::new(1.0, 0.0, 0.0), Quaternion::identity());
//! let base_m_camera = Transform3D::new(Vec3::new(0.5, 0.0, 0.0), Quaternion::identity());
//!
//! let w_m_camera = w_m_base.compose(base_m_camera);
//! assert!((w_m_camera.translation.x - 1.5).abs() < 1e-12);
//!
//! let back = w_m_camera.inverse().compose(w_m_camera);
//! assert!(back.translation.x.abs() < 1e-12);
//! ```

// ────────────────────────────────────────────────────────────────────────────
// Primitive types
// ────────────────────────────────────────────────────────────────────────────

/// A 3-D vector.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Vec3 {
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

impl Vec3 {
    /// Create a new vector.
    pub fn new(x: f64, y: f64, z: f64) -> Self {
        Self { x, y, z }
    }

    /// The zero vector.
    pub fn zero() -> Self {
        Self::new(0.0, 0.0, 0.0)
    }

    pub fn add(self, rhs: Self) -> Self {
        Self::new(self.x + rhs.x, self.y + rhs.y, self.z + rhs.z)
    }

    pub fn neg(self) -> Self {
        Self::new(-self.x, -self.y, -self.z)
    }

    pub fn scale(self, s: f64) -> Self {
        Self::new(self.x * s, self.y * s, self.z * s)
    }

    pub fn norm(self) -> f64 {
        (self.x * self.x + self.y * self.y + self.z * self.z).sqrt()
    }

    pub fn to_array(self) -> [f64; 3] {
        [self.x, self.y, self.z]
    }
}

impl From<[f64; 3]> for Vec3 {
    fn from(a: [f64; 3]) -> Self {
        Self::new(a[0], a[1], a[2])
    }
}

/// A unit quaternion representing a 3-D rotation (w, x, y, z convention).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Quaternion {
    pub w: f64,
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

impl Quaternion {
    /// Create a quaternion.  The caller is responsible for providing a unit
    /// quaternion (|q| = 1); see [`Quaternion::normalized`].
    pub fn new(w: f64, x: f64, y: f64, z: f64) -> Self {
        Self { w, x, y, z }
    }

    /// The identity rotation (no rotation).
    pub fn identity() -> Self {
        Self::new(1.0, 0.0, 0.0, 0.0)
    }

    /// Rotation of `angle` radians about `axis`.  A zero axis yields the
    /// identity.
    pub fn from_axis_angle(axis: Vec3, angle: f64) -> Self {
        let n = axis.norm();
        if n == 0.0 {
            return Self::identity();
        }
        let (s, c) = (angle * 0.5).sin_cos();
        let k = s / n;
        Self::new(c, axis.x * k, axis.y * k, axis.z * k)
    }

    /// Scale to unit norm.  A zero quaternion yields the identity.
    pub fn normalized(self) -> Self {
        let n = (self.w * self.w + self.x * self.x + self.y * self.y + self.z * self.z).sqrt();
        if n == 0.0 {
            return Self::identity();
        }
        Self::new(self.w / n, self.x / n, self.y / n, self.z / n)
    }

    /// Hamilton product: compose two rotations.
    pub fn mul(self, rhs: Self) -> Self {
        Self::new(
            self.w * rhs.w - self.x * rhs.x - self.y * rhs.y - self.z * rhs.z,
            self.w * rhs.x + self.x * rhs.w + self.y * rhs.z - self.z * rhs.y,
            self.w * rhs.y - self.x * rhs.z + self.y * rhs.w + self.z * rhs.x,
            self.w * rhs.z + self.x * rhs.y - self.y * rhs.x + self.z * rhs.w,
        )
    }

    /// Conjugate (== inverse for a unit quaternion).
    pub fn conjugate(self) -> Self {
        Self::new(self.w, -self.x, -self.y, -self.z)
    }

    /// Rotate a vector by this quaternion: p' = q * p * q*.
    pub fn rotate(self, v: Vec3) -> Vec3 {
        let p = Self::new(0.0, v.x, v.y, v.z);
        let rotated = self.mul(p).mul(self.conjugate());
        Vec3::new(rotated.x, rotated.y, rotated.z)
    }
}

impl Default for Quaternion {
    fn default() -> Self {
        Self::identity()
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Transform3D
// ────────────────────────────────────────────────────────────────────────────

/// A rigid-body 3-D transform: rotation followed by translation.
///
/// Represents the pose of frame B relative to frame A: to convert a point
/// expressed in frame B into frame A, rotate it by `rotation` then add
/// `translation`.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Transform3D {
    pub translation: Vec3,
    pub rotation: Quaternion,
}

impl Transform3D {
    /// Create a transform from a translation and rotation.
    pub fn new(translation: Vec3, rotation: Quaternion) -> Self {
        Self {
            translation,
            rotation,
        }
    }

    /// The identity transform (no translation, no rotation).
    pub fn identity() -> Self {
        Self::new(Vec3::zero(), Quaternion::identity())
    }

    /// A pure translation.
    pub fn from_translation(translation: Vec3) -> Self {
        Self::new(translation, Quaternion::identity())
    }

    /// A pure rotation.
    pub fn from_rotation(rotation: Quaternion) -> Self {
        Self::new(Vec3::zero(), rotation)
    }

    /// Compose two transforms: if `self` = T_A_B and `other` = T_B_C, the
    /// result is T_A_C.
    pub fn compose(self, other: Self) -> Self {
        let translated = self.translation.add(self.rotation.rotate(other.translation));
        let rotated = self.rotation.mul(other.rotation);
        Self::new(translated, rotated)
    }

    /// The inverse transform: T_A_B → T_B_A.
    pub fn inverse(self) -> Self {
        let r = self.rotation.conjugate();
        Self::new(r.rotate(self.translation).neg(), r)
    }

    /// Map a point expressed in B into A.
    pub fn transform_point(self, p: Vec3) -> Vec3 {
        self.rotation.rotate(p).add(self.translation)
    }

    /// Pose as `[x, y, z, qx, qy, qz, qw]`.
    pub fn to_xyz_quat(self) -> [f64; 7] {
        let t = self.translation;
        let q = self.rotation;
        [t.x, t.y, t.z, q.x, q.y, q.z, q.w]
    }

    /// Inverse of [`Transform3D::to_xyz_quat`]; the quaternion is normalised.
    pub fn from_xyz_quat(v: [f64; 7]) -> Self {
        Self::new(
            Vec3::new(v[0], v[1], v[2]),
            Quaternion::new(v[6], v[3], v[4], v[5]).normalized(),
        )
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Tests
// ────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use std::f64::consts::{FRAC_1_SQRT_2, FRAC_PI_2};

    // ── Quaternion ──────────────────────────────────────────────────────────

    #[test]
    fn quaternion_identity_rotate_is_noop() {
        let r = Quaternion::identity().rotate(Vec3::new(1.0, 2.0, 3.0));
        assert_abs_diff_eq!(r.x, 1.0);
        assert_abs_diff_eq!(r.y, 2.0);
        assert_abs_diff_eq!(r.z, 3.0);
    }

    #[test]
    fn quaternion_90deg_yaw_rotates_x_to_y() {
        let q = Quaternion::new(FRAC_1_SQRT_2, 0.0, 0.0, FRAC_1_SQRT_2);
        let r = q.rotate(Vec3::new(1.0, 0.0, 0.0));
        assert_abs_diff_eq!(r.x, 0.0, epsilon = 1e-12);
        assert_abs_diff_eq!(r.y, 1.0, epsilon = 1e-12);
        assert_abs_diff_eq!(r.z, 0.0, epsilon = 1e-12);
    }

    #[test]
    fn axis_angle_matches_explicit_quaternion() {
        let q = Quaternion::from_axis_angle(Vec3::new(0.0, 0.0, 2.0), FRAC_PI_2);
        assert_abs_diff_eq!(q.w, FRAC_1_SQRT_2, epsilon = 1e-12);
        assert_abs_diff_eq!(q.z, FRAC_1_SQRT_2, epsilon = 1e-12);
        assert_eq!(Quaternion::from_axis_angle(Vec3::zero(), 1.0), Quaternion::identity());
    }

    #[test]
    fn quaternion_conjugate_is_inverse() {
        let q = Quaternion::new(FRAC_1_SQRT_2, 0.0, 0.0, FRAC_1_SQRT_2);
        let prod = q.mul(q.conjugate());
        assert_abs_diff_eq!(prod.w, 1.0, epsilon = 1e-12);
        assert_abs_diff_eq!(prod.x, 0.0, epsilon = 1e-12);
        assert_abs_diff_eq!(prod.z, 0.0, epsilon = 1e-12);
    }

    // ── Transform3D ─────────────────────────────────────────────────────────

    #[test]
    fn transform_compose_translations_add() {
        let t1 = Transform3D::from_translation(Vec3::new(1.0, 0.0, 0.0));
        let t2 = Transform3D::from_translation(Vec3::new(2.0, 0.0, 0.0));
        assert_abs_diff_eq!(t1.compose(t2).translation.x, 3.0);
    }

    #[test]
    fn compose_respects_rotation() {
        // Base rotated 90° about Z; camera 1 m along the base's local +X.
        let w_m_b = Transform3D::from_rotation(Quaternion::from_axis_angle(
            Vec3::new(0.0, 0.0, 1.0),
            FRAC_PI_2,
        ));
        let b_m_c = Transform3D::from_translation(Vec3::new(1.0, 0.0, 0.0));
        let t = w_m_b.compose(b_m_c).translation;
        assert_abs_diff_eq!(t.x, 0.0, epsilon = 1e-12);
        assert_abs_diff_eq!(t.y, 1.0, epsilon = 1e-12);
    }

    #[test]
    fn inverse_undoes_transform() {
        let t = Transform3D::new(
            Vec3::new(0.3, -1.2, 2.0),
            Quaternion::from_axis_angle(Vec3::new(1.0, 1.0, 0.0), 0.7),
        );
        let p = Vec3::new(0.5, 0.25, -4.0);
        let back = t.inverse().transform_point(t.transform_point(p));
        assert_abs_diff_eq!(back.x, p.x, epsilon = 1e-12);
        assert_abs_diff_eq!(back.y, p.y, epsilon = 1e-12);
        assert_abs_diff_eq!(back.z, p.z, epsilon = 1e-12);

        let id = t.compose(t.inverse());
        assert_abs_diff_eq!(id.translation.norm(), 0.0, epsilon = 1e-12);
        assert_abs_diff_eq!(id.rotation.w.abs(), 1.0, epsilon = 1e-12);
    }

    #[test]
    fn xyz_quat_layout_puts_w_last() {
        let t = Transform3D::new(
            Vec3::new(1.0, 2.0, 3.0),
            Quaternion::new(FRAC_1_SQRT_2, 0.0, 0.0, FRAC_1_SQRT_2),
        );
        let v = t.to_xyz_quat();
        assert_eq!(&v[0..3], &[1.0, 2.0, 3.0]);
        assert_abs_diff_eq!(v[6], FRAC_1_SQRT_2);
        let back = Transform3D::from_xyz_quat(v);
        assert_abs_diff_eq!(back.rotation.z, FRAC_1_SQRT_2, epsilon = 1e-12);
    }
}
