//! Observation Assembler: turns one fresh sensor sample into a canonical
//! `Observation` — value, per-axis mask, diagonal covariance, and the
//! semantic quantity it observes — ready for a `FilterBank` to fold into
//! an `H` of its own layout (spec §4.2).

use nalgebra::Vector3;

use crate::config::{AidMask, Config};
use crate::error::AssemblerError;
use crate::filters::{AxisMask, ObservedQuantity};
use crate::frames::{lla_to_ned, rotate_body_to_ned};
use crate::types::{
    FiducialMarkerReport, IrlockReport, SensorKind, TargetGnssReport, TimestampS, UwbDistance, VehicleAttitude, VehicleGpsPosition,
    VehicleLocalPosition,
};

/// A single canonical observation, ready to feed into a `FilterBank`.
#[derive(Clone, Debug, PartialEq)]
pub struct Observation {
    pub kind: SensorKind,
    pub timestamp: TimestampS,
    pub quantity: ObservedQuantity,
    pub mask: AxisMask,
    pub z: Vector3<f64>,
    pub r_diag: Vector3<f64>,
}

/// Horizontal scale applied to every position observation (spec §4.2,
/// last paragraph) before it is handed to a filter.
fn scale_horizontal(mut v: Vector3<f64>, cfg: &Config) -> Vector3<f64> {
    v.x *= cfg.scale_x;
    v.y *= cfg.scale_y;
    v
}

fn is_stale(sample_ts: TimestampS, now: TimestampS, timeout: f64) -> bool {
    now - sample_ts > timeout || sample_ts > now
}

/// Target GPS position vs. vehicle GPS position, NED displacement with
/// the vehicle GPS fix as local-tangent origin (spec §4.2 "Target GPS
/// position").
pub fn target_gps_position(
    report: &TargetGnssReport,
    vehicle_gps: &VehicleGpsPosition,
    now: TimestampS,
    cfg: &Config,
) -> Result<Observation, AssemblerError> {
    if !cfg.aid_mask.contains(AidMask::TARGET_GPS) {
        return Err(AssemblerError::Disabled);
    }
    if !vehicle_gps.fix_valid {
        return Err(AssemblerError::MissingPrerequisite);
    }
    if is_stale(report.timestamp, now, cfg.measurement_valid_timeout) || is_stale(vehicle_gps.timestamp, now, cfg.measurement_valid_timeout) {
        return Err(AssemblerError::Stale);
    }

    let ned = lla_to_ned(
        report.lat_deg,
        report.lon_deg,
        report.alt_m,
        vehicle_gps.lat_deg,
        vehicle_gps.lon_deg,
        vehicle_gps.alt_m,
    );
    let z = scale_horizontal(ned, cfg);
    let r_diag = Vector3::new(
        cfg.gps_p_noise * cfg.gps_p_noise,
        cfg.gps_p_noise * cfg.gps_p_noise,
        (2.0 * cfg.gps_p_noise) * (2.0 * cfg.gps_p_noise),
    );

    Ok(Observation {
        kind: SensorKind::TargetGpsPosition,
        timestamp: report.timestamp,
        quantity: ObservedQuantity::Position { bias_observed: true },
        mask: AxisMask::ALL,
        z,
        r_diag,
    })
}

/// Mission-landing position used as a target-GPS stand-in when
/// target-GPS is unavailable/disabled (spec §4.2 "Mission landing
/// position", §4.3 "mutually exclusive, target GPS wins").
pub fn mission_landing_position(
    setpoint: &crate::types::PositionSetpointTriplet,
    vehicle_gps: &VehicleGpsPosition,
    now: TimestampS,
    cfg: &Config,
) -> Result<Observation, AssemblerError> {
    if !cfg.aid_mask.contains(AidMask::MISSION_LANDING) {
        return Err(AssemblerError::Disabled);
    }
    if !setpoint.valid || !vehicle_gps.fix_valid {
        return Err(AssemblerError::MissingPrerequisite);
    }
    if is_stale(setpoint.timestamp, now, cfg.measurement_valid_timeout) {
        return Err(AssemblerError::Stale);
    }

    let ned = lla_to_ned(
        setpoint.lat_deg,
        setpoint.lon_deg,
        setpoint.alt_m,
        vehicle_gps.lat_deg,
        vehicle_gps.lon_deg,
        vehicle_gps.alt_m,
    );
    let z = scale_horizontal(ned, cfg);
    let r_diag = Vector3::new(
        cfg.gps_p_noise * cfg.gps_p_noise,
        cfg.gps_p_noise * cfg.gps_p_noise,
        (2.0 * cfg.gps_p_noise) * (2.0 * cfg.gps_p_noise),
    );

    Ok(Observation {
        kind: SensorKind::MissionLandingPosition,
        timestamp: setpoint.timestamp,
        quantity: ObservedQuantity::Position { bias_observed: true },
        mask: AxisMask::ALL,
        z,
        r_diag,
    })
}

/// Vehicle GPS velocity, only meaningful against a moving-augmented
/// coupled model (spec §4.2 "Vehicle GPS velocity").
pub fn uav_gps_velocity(vehicle_gps: &VehicleGpsPosition, now: TimestampS, cfg: &Config) -> Result<Observation, AssemblerError> {
    if !cfg.aid_mask.contains(AidMask::REL_GPS_VEL) {
        return Err(AssemblerError::Disabled);
    }
    if !vehicle_gps.fix_valid {
        return Err(AssemblerError::MissingPrerequisite);
    }
    if is_stale(vehicle_gps.timestamp, now, cfg.measurement_updated_timeout) {
        return Err(AssemblerError::Stale);
    }

    let z = Vector3::from(vehicle_gps.vel_ned);
    let r_diag = Vector3::repeat(cfg.gps_v_noise * cfg.gps_v_noise);

    Ok(Observation {
        kind: SensorKind::VehicleGpsVelocity,
        timestamp: vehicle_gps.timestamp,
        quantity: ObservedQuantity::VehicleVelocity,
        mask: AxisMask::ALL,
        z,
        r_diag,
    })
}

/// Vision/fiducial marker pose: sensor/body rotation+offset, then
/// body->NED via attitude (spec §4.2 "Vision").
pub fn vision(
    report: &FiducialMarkerReport,
    attitude: &VehicleAttitude,
    local_pos: &VehicleLocalPosition,
    now: TimestampS,
    cfg: &Config,
) -> Result<Observation, AssemblerError> {
    if !cfg.aid_mask.contains(AidMask::VISION) {
        return Err(AssemblerError::Disabled);
    }
    if is_stale(report.timestamp, now, cfg.measurement_updated_timeout) {
        return Err(AssemblerError::Stale);
    }

    let body = cfg.sens_rot.rotate(Vector3::from(report.xyz)) + Vector3::from(cfg.sens_pos);
    let ned = rotate_body_to_ned(attitude.q, body);
    let z = scale_horizontal(ned, cfg);

    let dist_bottom_floor = local_pos.dist_bottom.max(1.0);
    let r_diag = match (report.covariance, cfg.ev_noise_md) {
        (Some(cov), false) => Vector3::from(cov),
        (Some(cov), true) => {
            let floor = cfg.evp_noise * cfg.evp_noise * dist_bottom_floor;
            Vector3::new(cov[0].max(floor), cov[1].max(floor), cov[2].max(floor))
        }
        (None, _) => Vector3::repeat(cfg.evp_noise * cfg.evp_noise * dist_bottom_floor),
    };
    let _ = cfg.eva_noise; // attitude-derived angular noise term: no separate vision orientation output to attach it to here

    Ok(Observation {
        kind: SensorKind::Vision,
        timestamp: report.timestamp,
        quantity: ObservedQuantity::Position { bias_observed: false },
        mask: AxisMask::ALL,
        z,
        r_diag,
    })
}

/// IRLOCK: two tangent-of-angle measurements scaled by altitude into a
/// horizontal displacement, z fixed at `-dist_bottom` (spec §4.2
/// "IRLOCK").
pub fn irlock(
    report: &IrlockReport,
    attitude: &VehicleAttitude,
    local_pos: &VehicleLocalPosition,
    now: TimestampS,
    cfg: &Config,
) -> Result<Observation, AssemblerError> {
    if !cfg.aid_mask.contains(AidMask::IRLOCK) {
        return Err(AssemblerError::Disabled);
    }
    if !local_pos.dist_bottom_valid {
        return Err(AssemblerError::MissingPrerequisite);
    }
    if is_stale(report.timestamp, now, cfg.measurement_updated_timeout) {
        return Err(AssemblerError::Stale);
    }

    let dist_bottom = local_pos.dist_bottom;
    let body_unit = Vector3::new(report.angle_x, report.angle_y, 1.0);
    let body = cfg.sens_rot.rotate(body_unit * dist_bottom) + Vector3::from(cfg.sens_pos);
    let ned = rotate_body_to_ned(attitude.q, body);
    let z = scale_horizontal(Vector3::new(ned.x, ned.y, -dist_bottom), cfg);

    let r = cfg.meas_unc * cfg.meas_unc * dist_bottom * dist_bottom;
    let r_diag = Vector3::new(r, r, r);

    Ok(Observation {
        kind: SensorKind::Irlock,
        timestamp: report.timestamp,
        quantity: ObservedQuantity::Position { bias_observed: false },
        mask: AxisMask::X | AxisMask::Y,
        z,
        r_diag,
    })
}

/// UWB: 3D position in a grid frame, transformed grid->body->NED (spec
/// §4.2 "UWB"). Grid orientation relative to body is the same mount
/// rotation/offset pair as IRLOCK.
pub fn uwb(sample: &UwbDistance, attitude: &VehicleAttitude, now: TimestampS, cfg: &Config) -> Result<Observation, AssemblerError> {
    if !cfg.aid_mask.contains(AidMask::UWB) {
        return Err(AssemblerError::Disabled);
    }
    if is_stale(sample.timestamp, now, cfg.measurement_updated_timeout) {
        return Err(AssemblerError::Stale);
    }

    let body = cfg.sens_rot.rotate(Vector3::from(sample.grid_xyz)) + Vector3::from(cfg.sens_pos);
    let ned = rotate_body_to_ned(attitude.q, body);
    let z = scale_horizontal(ned, cfg);
    let r_diag = Vector3::repeat(cfg.meas_unc * cfg.meas_unc);

    Ok(Observation {
        kind: SensorKind::Uwb,
        timestamp: sample.timestamp,
        quantity: ObservedQuantity::Position { bias_observed: false },
        mask: AxisMask::ALL,
        z,
        r_diag,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn identity_attitude() -> VehicleAttitude {
        VehicleAttitude { timestamp: 0.0, q: [1.0, 0.0, 0.0, 0.0] }
    }

    #[test]
    fn irlock_scales_angle_by_altitude_and_fixes_down() {
        let cfg = Config { aid_mask: AidMask::IRLOCK, ..Config::default() };
        let report = IrlockReport { timestamp: 1.0, angle_x: 0.1, angle_y: 0.0, signal_quality: 1.0 };
        let local_pos = VehicleLocalPosition { timestamp: 1.0, xyz: [0.0; 3], dist_bottom: 5.0, dist_bottom_valid: true };

        let obs = irlock(&report, &identity_attitude(), &local_pos, 1.0, &cfg).unwrap();

        assert_relative_eq!(obs.z.x, 0.5, epsilon = 1e-9);
        assert_relative_eq!(obs.z.y, 0.0, epsilon = 1e-9);
        assert_relative_eq!(obs.z.z, -5.0, epsilon = 1e-9);
        assert_eq!(obs.mask, AxisMask::X | AxisMask::Y);
    }

    #[test]
    fn irlock_requires_valid_dist_bottom() {
        let cfg = Config { aid_mask: AidMask::IRLOCK, ..Config::default() };
        let report = IrlockReport { timestamp: 1.0, angle_x: 0.1, angle_y: 0.0, signal_quality: 1.0 };
        let local_pos = VehicleLocalPosition { timestamp: 1.0, xyz: [0.0; 3], dist_bottom: 5.0, dist_bottom_valid: false };

        assert_eq!(irlock(&report, &identity_attitude(), &local_pos, 1.0, &cfg), Err(AssemblerError::MissingPrerequisite));
    }

    #[test]
    fn irlock_disabled_in_aid_mask_is_rejected() {
        let cfg = Config { aid_mask: AidMask::VISION, ..Config::default() };
        let report = IrlockReport { timestamp: 1.0, angle_x: 0.1, angle_y: 0.0, signal_quality: 1.0 };
        let local_pos = VehicleLocalPosition { timestamp: 1.0, xyz: [0.0; 3], dist_bottom: 5.0, dist_bottom_valid: true };

        assert_eq!(irlock(&report, &identity_attitude(), &local_pos, 1.0, &cfg), Err(AssemblerError::Disabled));
    }

    #[test]
    fn target_gps_requires_vehicle_fix() {
        let cfg = Config::default();
        let report = TargetGnssReport { timestamp: 1.0, lat_deg: 47.0, lon_deg: 8.0, alt_m: 500.0 };
        let mut vehicle_gps = VehicleGpsPosition {
            timestamp: 1.0,
            lat_deg: 47.0,
            lon_deg: 8.0,
            alt_m: 500.0,
            vel_ned: [0.0; 3],
            eph_m: 1.0,
            epv_m: 1.0,
            fix_valid: false,
        };
        assert_eq!(
            target_gps_position(&report, &vehicle_gps, 1.0, &cfg),
            Err(AssemblerError::MissingPrerequisite)
        );
        vehicle_gps.fix_valid = true;
        assert!(target_gps_position(&report, &vehicle_gps, 1.0, &cfg).is_ok());
    }

    #[test]
    fn stale_sample_is_rejected() {
        let cfg = Config { aid_mask: AidMask::UWB, ..Config::default() };
        let sample = UwbDistance { timestamp: 0.0, grid_xyz: [1.0, 2.0, 3.0] };
        assert_eq!(uwb(&sample, &identity_attitude(), 1.0, &cfg), Err(AssemblerError::Stale));
    }

    #[test]
    fn uwb_disabled_in_aid_mask_is_rejected() {
        let cfg = Config { aid_mask: AidMask::VISION, ..Config::default() };
        let sample = UwbDistance { timestamp: 1.0, grid_xyz: [1.0, 2.0, 3.0] };
        assert_eq!(uwb(&sample, &identity_attitude(), 1.0, &cfg), Err(AssemblerError::Disabled));
    }
}
