//! Body <-> NED frame transforms. Everything that touches a sensor's
//! native frame lives here; no frame-mixed value is ever handed to a
//! filter (spec §9).

use nalgebra::Vector3;

/// Earth radius used for the small-angle/equirectangular lat-lon
/// projection, meters.
const EARTH_RADIUS_M: f64 = 6.371e6;

/// Rotate a vector from body frame into NED using the body->NED
/// quaternion `(w, x, y, z)`.
pub fn rotate_body_to_ned(q: [f64; 4], body: Vector3<f64>) -> Vector3<f64> {
    let (w, x, y, z) = (q[0], q[1], q[2], q[3]);

    let r00 = 1.0 - 2.0 * (y * y + z * z);
    let r01 = 2.0 * (x * y - w * z);
    let r02 = 2.0 * (x * z + w * y);

    let r10 = 2.0 * (x * y + w * z);
    let r11 = 1.0 - 2.0 * (x * x + z * z);
    let r12 = 2.0 * (y * z - w * x);

    let r20 = 2.0 * (x * z - w * y);
    let r21 = 2.0 * (y * z + w * x);
    let r22 = 1.0 - 2.0 * (x * x + y * y);

    Vector3::new(
        r00 * body.x + r01 * body.y + r02 * body.z,
        r10 * body.x + r11 * body.y + r12 * body.z,
        r20 * body.x + r21 * body.y + r22 * body.z,
    )
}

/// Rotate a vector from NED into body frame (the transpose/inverse of
/// `rotate_body_to_ned`, since the rotation matrix is orthonormal).
pub fn rotate_ned_to_body(q: [f64; 4], ned: Vector3<f64>) -> Vector3<f64> {
    let (w, x, y, z) = (q[0], q[1], q[2], q[3]);
    // Transpose of the matrix above.
    let r00 = 1.0 - 2.0 * (y * y + z * z);
    let r10 = 2.0 * (x * y - w * z);
    let r20 = 2.0 * (x * z + w * y);

    let r01 = 2.0 * (x * y + w * z);
    let r11 = 1.0 - 2.0 * (x * x + z * z);
    let r21 = 2.0 * (y * z - w * x);

    let r02 = 2.0 * (x * z - w * y);
    let r12 = 2.0 * (y * z + w * x);
    let r22 = 1.0 - 2.0 * (x * x + y * y);

    Vector3::new(
        r00 * ned.x + r01 * ned.y + r02 * ned.z,
        r10 * ned.x + r11 * ned.y + r12 * ned.z,
        r20 * ned.x + r21 * ned.y + r22 * ned.z,
    )
}

/// Equirectangular lat/lon/alt -> local NED displacement, using
/// `origin_*` as the local-tangent-plane origin.
pub fn lla_to_ned(
    lat_deg: f64,
    lon_deg: f64,
    alt_m: f64,
    origin_lat_deg: f64,
    origin_lon_deg: f64,
    origin_alt_m: f64,
) -> Vector3<f64> {
    let lat_rad = lat_deg.to_radians();
    let lon_rad = lon_deg.to_radians();
    let origin_lat_rad = origin_lat_deg.to_radians();
    let origin_lon_rad = origin_lon_deg.to_radians();

    let dlat = lat_rad - origin_lat_rad;
    let dlon = lon_rad - origin_lon_rad;

    let north = EARTH_RADIUS_M * dlat;
    let east = EARTH_RADIUS_M * dlon * origin_lat_rad.cos();
    let down = -(alt_m - origin_alt_m);

    Vector3::new(north, east, down)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn identity_quaternion_is_a_no_op() {
        let v = Vector3::new(1.0, 2.0, 3.0);
        let out = rotate_body_to_ned([1.0, 0.0, 0.0, 0.0], v);
        assert_relative_eq!(out, v, epsilon = 1e-12);
    }

    #[test]
    fn body_to_ned_round_trips_through_ned_to_body() {
        // Arbitrary non-trivial attitude, normalized.
        let q_raw = [0.9, 0.2, -0.1, 0.3];
        let norm: f64 = q_raw.iter().map(|c| c * c).sum::<f64>().sqrt();
        let q = [q_raw[0] / norm, q_raw[1] / norm, q_raw[2] / norm, q_raw[3] / norm];

        let offset = Vector3::new(0.0, 0.0, 0.0);
        let world = rotate_body_to_ned(q, offset);
        let back = rotate_ned_to_body(q, world);
        assert_relative_eq!(back, offset, epsilon = 1e-5);

        let v = Vector3::new(0.4, -1.2, 2.0);
        let rotated = rotate_body_to_ned(q, v);
        let recovered = rotate_ned_to_body(q, rotated);
        assert_relative_eq!(recovered, v, epsilon = 1e-9);
    }

    #[test]
    fn lla_to_ned_is_zero_at_origin() {
        let ned = lla_to_ned(47.3, 8.5, 500.0, 47.3, 8.5, 500.0);
        assert_relative_eq!(ned, Vector3::zeros(), epsilon = 1e-9);
    }
}
