//! Rotation helpers: Rodrigues vectors and projection onto SO(3).

use nalgebra::{Matrix3, Rotation3, Vector3};

/// Rotation matrix from a Rodrigues (axis * angle) vector.
#[inline]
pub fn rodrigues_to_matrix(r: &Vector3<f64>) -> Matrix3<f64> {
    Rotation3::new(*r).into_inner()
}

/// Rodrigues vector of a rotation matrix. `m` must already be a rotation.
#[inline]
pub fn matrix_to_rodrigues(m: &Matrix3<f64>) -> Vector3<f64> {
    Rotation3::from_matrix_unchecked(*m).scaled_axis()
}

/// Closest rotation to `m` in the Frobenius sense (`U * V^T` from the SVD).
///
/// Returns `None` when the closest orthogonal matrix is a reflection or the
/// input is not finite.
pub fn orthonormalize_rotation(m: &Matrix3<f64>) -> Option<Matrix3<f64>> {
    if !m.iter().all(|v| v.is_finite()) {
        return None;
    }
    let svd = m.svd(true, true);
    let u = svd.u?;
    let v_t = svd.v_t?;
    let r = u * v_t;
    if r.determinant() <= 0.0 {
        return None;
    }
    Some(r)
}

/// True when `m` is orthonormal with determinant +1 within `tol`.
pub fn is_rotation(m: &Matrix3<f64>, tol: f64) -> bool {
    if !m.iter().all(|v| v.is_finite()) {
        return false;
    }
    let err = (m.transpose() * m - Matrix3::identity()).abs().max();
    err <= tol && (m.determinant() - 1.0).abs() <= tol
}
